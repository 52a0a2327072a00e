//! Hand-written recursive descent parser for the model DSL.
//!
//! # Grammar
//!
//! ```text
//! file        := named_model+ | anonymous_model
//! named_model := "---" "model" IDENT NL STRING? content
//! content     := (config | input | output | assignment | import | connection)*
//! config      := "config" IDENT ("=" value)? STRING?
//! input       := "input"  IDENT STRING?
//! output      := "output" IDENT STRING?
//! assignment  := IDENT ("." IDENT)* "=" value
//! import      := "import" IDENT ("." IDENT)*
//! connection  := segment ("->" segment)*
//! segment     := block | signal ("," signal)* | "(" IDENT ")"
//! block       := "|" (IDENT ":")? (IDENT | STRING | REF) (IDENT "=" value)* "|"
//! signal      := ("[" local "]")? (IDENT ".")? IDENT ("[" local "]")?
//! value       := INT | FLOAT | STRING | REF | IDENT | list | dict | "..."
//! ```
//!
//! One statement per line. A connection made of a single segment must be a
//! block.

use std::ops::Range;

use super::ast::*;
use super::error::{SyntaxError, SyntaxErrorKind};
use super::lexer::{tokenize, Token};
use super::location::{Location, SourceMap};

/// Parse a model file
pub fn parse(source: &str, file: Option<&str>) -> Result<ParsedFile, SyntaxError> {
    let map = SourceMap::new(source, file);
    let tokens = tokenize(source).map_err(|offset| {
        let location = map.location(offset);
        let context = map.context(&location);
        SyntaxError::new(
            SyntaxErrorKind::InvalidToken,
            "unrecognized input",
            location,
            context,
        )
    })?;

    let mut parser = Parser {
        stream: TokenStream::new(&tokens, source.len()),
        map,
    };
    let models = parser.file()?;
    Ok(ParsedFile {
        file: file.map(str::to_string),
        models,
    })
}

/// Parse a single value, as written on the right of `=`
pub fn parse_value(source: &str) -> Result<Literal, SyntaxError> {
    let map = SourceMap::new(source, None);
    let tokens = tokenize(source).map_err(|offset| {
        let location = map.location(offset);
        SyntaxError::new(
            SyntaxErrorKind::InvalidToken,
            "unrecognized input",
            location,
            String::new(),
        )
    })?;

    let mut parser = Parser {
        stream: TokenStream::new(&tokens, source.len()),
        map,
    };
    parser.skip_newlines();
    let value = parser.value()?;
    parser.skip_newlines();
    if !parser.stream.at_end() {
        return Err(parser.unexpected("after value"));
    }
    Ok(value)
}

/// Token stream with lookahead and position tracking.
struct TokenStream<'src> {
    tokens: &'src [(Token, Range<usize>)],
    pos: usize,
    source_len: usize,
}

impl<'src> TokenStream<'src> {
    fn new(tokens: &'src [(Token, Range<usize>)], source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            source_len,
        }
    }

    fn peek(&self) -> Option<&'src Token> {
        self.tokens.get(self.pos).map(|(tok, _)| tok)
    }

    fn peek_nth(&self, n: usize) -> Option<&'src Token> {
        self.tokens.get(self.pos + n).map(|(tok, _)| tok)
    }

    fn advance(&mut self) -> Option<&'src Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, expected: &Token) -> bool {
        matches!(self.peek(), Some(t) if std::mem::discriminant(t) == std::mem::discriminant(expected))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Byte offset of the current token, or of the end of input
    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, span)| span.start)
            .unwrap_or(self.source_len)
    }
}

struct Parser<'src> {
    stream: TokenStream<'src>,
    map: SourceMap<'src>,
}

type ParseResult<T> = Result<T, SyntaxError>;

impl<'src> Parser<'src> {
    // ── Helpers ─────────────────────────────────────────────────────────

    fn location(&self) -> Location {
        self.map.location(self.stream.offset())
    }

    fn error(&self, kind: SyntaxErrorKind, message: impl Into<String>) -> SyntaxError {
        let location = self.location();
        let context = self.map.context(&location);
        SyntaxError::new(kind, message, location, context)
    }

    fn unexpected(&self, context: &str) -> SyntaxError {
        match self.stream.peek() {
            Some(token) => self.error(
                SyntaxErrorKind::UnexpectedToken,
                format!("unexpected {} {}", token.describe(), context),
            ),
            None => self.error(
                SyntaxErrorKind::UnexpectedEof,
                format!("unexpected end of input {}", context),
            ),
        }
    }

    fn expect(&mut self, expected: Token, context: &str) -> ParseResult<()> {
        if self.stream.check(&expected) {
            self.stream.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("{} (expected {})", context, expected.describe())))
        }
    }

    fn expect_ident(&mut self, context: &str) -> ParseResult<String> {
        match self.stream.peek() {
            Some(Token::Ident(name)) => {
                self.stream.advance();
                Ok(name.clone())
            }
            _ => Err(self.unexpected(&format!("{} (expected a name)", context))),
        }
    }

    fn skip_newlines(&mut self) {
        while self.stream.check(&Token::Newline) {
            self.stream.advance();
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.stream.peek(), None | Some(Token::Newline) | Some(Token::ModelHeader))
    }

    fn end_of_statement(&mut self) -> ParseResult<()> {
        if self.at_statement_end() {
            if self.stream.check(&Token::Newline) {
                self.stream.advance();
            }
            Ok(())
        } else {
            Err(self.unexpected("at end of statement"))
        }
    }

    fn optional_description(&mut self) -> Option<String> {
        match self.stream.peek() {
            Some(Token::Str(text)) => {
                self.stream.advance();
                Some(text.clone())
            }
            _ => None,
        }
    }

    // ── Models ──────────────────────────────────────────────────────────

    fn file(&mut self) -> ParseResult<Vec<ParsedModel>> {
        self.skip_newlines();
        let mut models = Vec::new();

        if !self.stream.check(&Token::ModelHeader) {
            let mut model = ParsedModel::empty(None, self.map.location(0));
            self.model_body(&mut model)?;
            if self.stream.check(&Token::ModelHeader) {
                return Err(self.error(
                    SyntaxErrorKind::InvalidSyntax,
                    "model header after statements of the anonymous model",
                ));
            }
            models.push(model);
            return Ok(models);
        }

        while self.stream.check(&Token::ModelHeader) {
            let location = self.location();
            self.stream.advance();
            let name = self.expect_ident("in model header")?;
            self.end_of_statement()?;
            self.skip_newlines();

            let mut model = ParsedModel::empty(Some(name), location);
            if let Some(Token::Str(doc)) = self.stream.peek() {
                if matches!(
                    self.stream.peek_nth(1),
                    None | Some(Token::Newline) | Some(Token::ModelHeader)
                ) {
                    model.docstring = Some(doc.clone());
                    self.stream.advance();
                    self.end_of_statement()?;
                }
            }
            self.model_body(&mut model)?;
            models.push(model);
        }
        Ok(models)
    }

    fn model_body(&mut self, model: &mut ParsedModel) -> ParseResult<()> {
        loop {
            self.skip_newlines();
            if self.stream.at_end() || self.stream.check(&Token::ModelHeader) {
                return Ok(());
            }
            self.statement(model)?;
            self.end_of_statement()?;
        }
    }

    fn statement(&mut self, model: &mut ParsedModel) -> ParseResult<()> {
        let keyword = match (self.stream.peek(), self.stream.peek_nth(1)) {
            (Some(Token::Ident(word)), Some(Token::Ident(_))) => Some(word.as_str()),
            _ => None,
        };

        match keyword {
            Some("config") => {
                let stmt = self.config_stmt()?;
                model.configs.push(stmt);
            }
            Some("input") => {
                let stmt = self.io_stmt()?;
                model.inputs.push(stmt);
            }
            Some("output") => {
                let stmt = self.io_stmt()?;
                model.outputs.push(stmt);
            }
            Some("import") => {
                let stmt = self.import_stmt()?;
                model.imports.push(stmt);
            }
            _ if self.is_assignment() => {
                let stmt = self.assignment()?;
                model.assignments.push(stmt);
            }
            _ => {
                let stmt = self.connection()?;
                model.connections.push(stmt);
            }
        }
        Ok(())
    }

    fn is_assignment(&self) -> bool {
        let mut n = 0;
        loop {
            if !matches!(self.stream.peek_nth(n), Some(Token::Ident(_))) {
                return false;
            }
            match self.stream.peek_nth(n + 1) {
                Some(Token::Dot) => n += 2,
                Some(Token::Eq) => return true,
                _ => return false,
            }
        }
    }

    fn dotted_name(&mut self, context: &str) -> ParseResult<String> {
        let mut name = self.expect_ident(context)?;
        while self.stream.check(&Token::Dot) {
            self.stream.advance();
            name.push('.');
            name.push_str(&self.expect_ident(context)?);
        }
        Ok(name)
    }

    fn config_stmt(&mut self) -> ParseResult<ConfigStmt> {
        let location = self.location();
        self.stream.advance();
        let name = self.expect_ident("in config declaration")?;
        let default = if self.stream.check(&Token::Eq) {
            self.stream.advance();
            Some(self.value()?)
        } else {
            None
        };
        let description = self.optional_description();
        Ok(ConfigStmt {
            name,
            default,
            description,
            location,
        })
    }

    fn io_stmt(&mut self) -> ParseResult<IoStmt> {
        let location = self.location();
        self.stream.advance();
        let name = self.expect_ident("in signal declaration")?;
        let description = self.optional_description();
        Ok(IoStmt {
            name,
            description,
            location,
        })
    }

    fn import_stmt(&mut self) -> ParseResult<ImportStmt> {
        let location = self.location();
        self.stream.advance();
        let package = self.dotted_name("in import")?;
        Ok(ImportStmt { package, location })
    }

    fn assignment(&mut self) -> ParseResult<Assignment> {
        let location = self.location();
        let key = self.dotted_name("in assignment")?;
        self.expect(Token::Eq, "in assignment")?;
        let value = self.value()?;
        Ok(Assignment {
            key,
            value,
            location,
        })
    }

    // ── Connections ─────────────────────────────────────────────────────

    fn connection(&mut self) -> ParseResult<ConnectionStmt> {
        let location = self.location();
        let mut elements = vec![self.segment()?];
        while self.stream.check(&Token::Arrow) {
            self.stream.advance();
            self.skip_newlines();
            elements.push(self.segment()?);
        }

        if elements.len() == 1 && !matches!(elements[0], Element::Block(_)) {
            return Err(SyntaxError::new(
                SyntaxErrorKind::InvalidSyntax,
                "a connection needs at least two segments",
                location.clone(),
                self.map.context(&location),
            ));
        }
        Ok(ConnectionStmt { elements, location })
    }

    fn segment(&mut self) -> ParseResult<Element> {
        match self.stream.peek() {
            Some(Token::Pipe) => Ok(Element::Block(self.block_ref()?)),
            Some(Token::LParen) => {
                let location = self.location();
                self.stream.advance();
                let name = self.expect_ident("in port")?;
                self.expect(Token::RParen, "after port name")?;
                Ok(Element::Port(PortRef { name, location }))
            }
            Some(Token::Ident(_)) | Some(Token::LBracket) => Ok(Element::Signals(self.signal_list()?)),
            _ => Err(self.unexpected("where a block, a signal or a port was expected")),
        }
    }

    fn block_ref(&mut self) -> ParseResult<BlockRef> {
        let location = self.location();
        self.stream.advance();

        let name = match (self.stream.peek(), self.stream.peek_nth(1)) {
            (Some(Token::Ident(name)), Some(Token::Colon)) => {
                let name = name.clone();
                self.stream.advance();
                self.stream.advance();
                Some(name)
            }
            _ => None,
        };

        let kind = match self.stream.peek() {
            Some(Token::Ident(t)) | Some(Token::Str(t)) => BlockKind::Name(t.clone()),
            Some(Token::Ref(var)) => BlockKind::Ref(var.clone()),
            _ => return Err(self.unexpected("where a block type was expected")),
        };
        self.stream.advance();

        let mut config = Vec::new();
        while let Some(Token::Ident(key)) = self.stream.peek() {
            let key = key.clone();
            self.stream.advance();
            self.expect(Token::Eq, "in block configuration")?;
            let value = self.value()?;
            config.push((key, value));
        }
        self.expect(Token::Pipe, "at end of block")?;

        Ok(BlockRef {
            name,
            kind,
            config,
            location,
        })
    }

    fn signal_list(&mut self) -> ParseResult<SignalList> {
        let location = self.location();
        let mut signals = vec![self.signal()?];
        while self.stream.check(&Token::Comma) {
            self.stream.advance();
            signals.push(self.signal()?);
        }
        Ok(SignalList { signals, location })
    }

    fn signal(&mut self) -> ParseResult<SignalRef> {
        let location = self.location();
        let local_input = self.local_name()?;
        let first = self.expect_ident("in signal")?;
        let (block, name) = if self.stream.check(&Token::Dot) {
            self.stream.advance();
            (Some(first), self.expect_ident("after '.' in signal")?)
        } else {
            (None, first)
        };
        let local_output = self.local_name()?;
        Ok(SignalRef {
            name,
            block,
            local_input,
            local_output,
            location,
        })
    }

    fn local_name(&mut self) -> ParseResult<Option<LocalName>> {
        if !self.stream.check(&Token::LBracket) {
            return Ok(None);
        }
        self.stream.advance();
        let local = match self.stream.peek() {
            Some(Token::Ident(name)) => LocalName::Name(name.clone()),
            Some(Token::Int(i)) if *i >= 0 => LocalName::Index(*i as usize),
            _ => return Err(self.unexpected("in local signal name")),
        };
        self.stream.advance();
        self.expect(Token::RBracket, "after local signal name")?;
        Ok(Some(local))
    }

    // ── Values ──────────────────────────────────────────────────────────

    fn value(&mut self) -> ParseResult<Literal> {
        let literal = match self.stream.peek() {
            Some(Token::Int(i)) => Literal::Int(*i),
            Some(Token::Float(x)) => Literal::Float(*x),
            Some(Token::Str(s)) => Literal::Str(s.clone()),
            Some(Token::Ref(var)) => Literal::Ref(var.clone()),
            Some(Token::Ellipsis) => Literal::Ellipsis,
            Some(Token::Ident(word)) => match word.as_str() {
                "true" | "True" => Literal::Bool(true),
                "false" | "False" => Literal::Bool(false),
                "null" | "None" => Literal::Null,
                _ => Literal::Str(word.clone()),
            },
            Some(Token::LBracket) => return self.list(),
            Some(Token::LBrace) => return self.dict(),
            _ => return Err(self.unexpected("where a value was expected")),
        };
        self.stream.advance();
        Ok(literal)
    }

    fn list(&mut self) -> ParseResult<Literal> {
        self.stream.advance();
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if self.stream.check(&Token::RBracket) {
                break;
            }
            items.push(self.value()?);
            self.skip_newlines();
            if self.stream.check(&Token::Comma) {
                self.stream.advance();
            } else {
                break;
            }
        }
        self.expect(Token::RBracket, "at end of list")?;
        Ok(Literal::List(items))
    }

    fn dict(&mut self) -> ParseResult<Literal> {
        self.stream.advance();
        let mut entries = Vec::new();
        loop {
            self.skip_newlines();
            let key = match self.stream.peek() {
                Some(Token::Ident(k)) | Some(Token::Str(k)) => k.clone(),
                Some(Token::RBrace) => break,
                _ => return Err(self.unexpected("where a dictionary key was expected")),
            };
            self.stream.advance();
            self.expect(Token::Colon, "after dictionary key")?;
            self.skip_newlines();
            let value = self.value()?;
            entries.push((key, value));
            self.skip_newlines();
            if self.stream.check(&Token::Comma) {
                self.stream.advance();
            } else {
                break;
            }
        }
        self.skip_newlines();
        self.expect(Token::RBrace, "at end of dictionary")?;
        Ok(Literal::Dict(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(source: &str) -> ParsedModel {
        let mut file = parse(source, None).unwrap();
        assert_eq!(file.models.len(), 1);
        file.models.remove(0)
    }

    #[test]
    fn test_anonymous_model() {
        let model = single("|constant value=7| -> |gain k=3| -> (out)\n");
        assert!(model.name.is_none());
        assert_eq!(model.connections.len(), 1);
        let elements = &model.connections[0].elements;
        assert_eq!(elements.len(), 3);
        match &elements[0] {
            Element::Block(b) => {
                assert_eq!(b.kind, BlockKind::Name("constant".into()));
                assert_eq!(b.config, vec![("value".into(), Literal::Int(7))]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&elements[2], Element::Port(p) if p.name == "out"));
    }

    #[test]
    fn test_named_models_with_docstrings() {
        let source = r#"
--- model first
"""Doc of first."""
config k = 2 "gain"
input x "the input"
output y
(x) -> |gain k=$k| -> (y)

---- model second
|first| -> out
"#;
        let file = parse(source, Some("two.pg")).unwrap();
        assert_eq!(file.models.len(), 2);

        let first = &file.models[0];
        assert_eq!(first.name.as_deref(), Some("first"));
        assert_eq!(first.docstring.as_deref(), Some("Doc of first."));
        assert_eq!(first.configs[0].name, "k");
        assert_eq!(first.configs[0].default, Some(Literal::Int(2)));
        assert_eq!(first.configs[0].description.as_deref(), Some("gain"));
        assert_eq!(first.inputs[0].name, "x");
        assert_eq!(first.outputs[0].name, "y");
        assert_eq!(first.location.file.as_deref(), Some("two.pg"));
        assert_eq!(first.location.line, 2);

        let second = &file.models[1];
        assert_eq!(second.name.as_deref(), Some("second"));
        assert!(matches!(
            second.connections[0].elements[1],
            Element::Signals(ref l) if l.signals[0].name == "out"
        ));
    }

    #[test]
    fn test_assignments_and_imports() {
        let model = single("import std.extra\na = $b\ngain.k = 3\nb = x\n");
        assert_eq!(model.imports[0].package, "std.extra");
        let keys: Vec<_> = model.assignments.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "gain.k", "b"]);
        assert_eq!(model.assignments[0].value, Literal::Ref("b".into()));
        assert_eq!(model.assignments[2].value, Literal::Str("x".into()));
    }

    #[test]
    fn test_signals_with_local_names() {
        let model = single("|a| -> [0]y[x], [out]b.z -> |b|\n");
        let Element::Signals(list) = &model.connections[0].elements[1] else {
            panic!("expected signals");
        };
        assert_eq!(list.signals.len(), 2);
        assert_eq!(list.signals[0].local_input, Some(LocalName::Index(0)));
        assert_eq!(list.signals[0].local_output, Some(LocalName::Name("x".into())));
        assert_eq!(list.signals[1].block.as_deref(), Some("b"));
        assert_eq!(list.signals[1].name, "z");
    }

    #[test]
    fn test_block_names_and_dynamic_types() {
        let model = single("|g: gain k=1| -> |\"print\"| \n|other: $kind|\n");
        let Element::Block(g) = &model.connections[0].elements[0] else {
            panic!("expected block");
        };
        assert_eq!(g.name.as_deref(), Some("g"));
        let Element::Block(p) = &model.connections[0].elements[1] else {
            panic!("expected block");
        };
        assert_eq!(p.kind, BlockKind::Name("print".into()));
        let Element::Block(o) = &model.connections[1].elements[0] else {
            panic!("expected block");
        };
        assert_eq!(o.kind, BlockKind::Ref("kind".into()));
    }

    #[test]
    fn test_values() {
        assert_eq!(parse_value("[1, 2.5, 'a']").unwrap(), Literal::List(vec![
            Literal::Int(1),
            Literal::Float(2.5),
            Literal::Str("a".into()),
        ]));
        assert_eq!(
            parse_value("{a: 1, \"b\": [true, None]}").unwrap(),
            Literal::Dict(vec![
                ("a".into(), Literal::Int(1)),
                ("b".into(), Literal::List(vec![Literal::Bool(true), Literal::Null])),
            ])
        );
        assert_eq!(parse_value("...").unwrap(), Literal::Ellipsis);
        assert_eq!(parse_value("word").unwrap(), Literal::Str("word".into()));
        assert!(parse_value("1 2").is_err());
    }

    #[test]
    fn test_multiline_list_and_continuation() {
        let model = single("a = [1,\n  2,\n]\n|constant \\\n value=$a| -> x\n");
        assert_eq!(
            model.assignments[0].value,
            Literal::List(vec![Literal::Int(1), Literal::Int(2)])
        );
        assert_eq!(model.connections.len(), 1);
    }

    #[test]
    fn test_contextual_keywords() {
        let model = single("|constant value=1| -> input -> |gain k=1| -> output\n");
        assert!(model.inputs.is_empty());
        assert_eq!(model.connections[0].elements.len(), 4);
    }

    #[test]
    fn test_syntax_error_location_and_context() {
        let err = parse("a = 1\n|gain k=| -> x\nb = 2\n", Some("bad.pg")).unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::UnexpectedToken);
        assert_eq!(err.location.line, 2);
        assert_eq!(err.location.column, 9);
        assert!(err.context.contains("a = 1"));
        assert!(err.context.contains("b = 2"));
        assert!(err.to_string().contains("bad.pg:2:9"));
    }

    #[test]
    fn test_unclosed_block_is_eof_error() {
        let err = parse("|gain k=1", None).unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_lone_signal_is_rejected() {
        let err = parse("x\n", None).unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::InvalidSyntax);
    }

    #[test]
    fn test_header_after_anonymous_content() {
        assert!(parse("|a| -> x\n--- model m\n|b|\n", None).is_err());
    }

    #[test]
    fn test_invalid_token() {
        let err = parse("|a| ? x", None).unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::InvalidToken);
        assert_eq!(err.location.column, 5);
    }
}
