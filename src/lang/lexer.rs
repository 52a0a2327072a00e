//! Lexical analysis for the model DSL.
//!
//! Line endings are significant and come out as [`Token::Newline`]; a
//! backslash at the end of a line joins it with the next one. Comments start
//! with `#` and run to the end of the line. Words such as `config` or `input`
//! are plain identifiers; the parser decides from context whether they act as
//! keywords.

use logos::Logos;
use std::ops::Range;

/// Model DSL token.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\f\r]+")]
#[logos(skip r"\\\r?\n")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    /// Model header `--- model` (any number of dashes, at least three)
    #[regex(r"---+[ \t]*model")]
    ModelHeader,

    #[token("\n")]
    Newline,

    #[token("->")]
    Arrow,

    #[token("|")]
    Pipe,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token(",")]
    Comma,

    #[token(":")]
    Colon,

    #[token(".")]
    Dot,

    #[token("=")]
    Eq,

    #[token("...")]
    Ellipsis,

    /// Variable reference `$name` or `${name}`; carries the bare name
    #[regex(r"\$[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice()[1..].to_string())]
    #[regex(r"\$\{[A-Za-z_][A-Za-z0-9_]*\}", |lex| {
        let s = lex.slice();
        s[2..s.len() - 1].to_string()
    })]
    Ref(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"-?[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"-?[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    /// String literal in any of the four quote styles, unescaped
    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape(strip(lex.slice(), 1)))]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, |lex| unescape(strip(lex.slice(), 1)))]
    #[regex(r#""""([^"]|"[^"]|""[^"])*""""#, |lex| Some(strip(lex.slice(), 3).to_string()))]
    #[regex(r#"'''([^']|'[^']|''[^'])*'''"#, |lex| Some(strip(lex.slice(), 3).to_string()))]
    Str(String),
}

fn strip(s: &str, quotes: usize) -> &str {
    &s[quotes..s.len() - quotes]
}

fn unescape(s: &str) -> Option<String> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next()? {
            'n' => result.push('\n'),
            'r' => result.push('\r'),
            't' => result.push('\t'),
            '0' => result.push('\0'),
            '\\' => result.push('\\'),
            '"' => result.push('"'),
            '\'' => result.push('\''),
            _ => return None,
        }
    }
    Some(result)
}

impl Token {
    /// Short description used in error messages
    pub fn describe(&self) -> String {
        match self {
            Token::ModelHeader => "model header".to_string(),
            Token::Newline => "end of line".to_string(),
            Token::Arrow => "'->'".to_string(),
            Token::Pipe => "'|'".to_string(),
            Token::LBracket => "'['".to_string(),
            Token::RBracket => "']'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::LBrace => "'{'".to_string(),
            Token::RBrace => "'}'".to_string(),
            Token::Comma => "','".to_string(),
            Token::Colon => "':'".to_string(),
            Token::Dot => "'.'".to_string(),
            Token::Eq => "'='".to_string(),
            Token::Ellipsis => "'...'".to_string(),
            Token::Ref(name) => format!("reference ${}", name),
            Token::Ident(name) => format!("identifier {:?}", name),
            Token::Int(i) => format!("integer {}", i),
            Token::Float(x) => format!("number {}", x),
            Token::Str(_) => "string".to_string(),
        }
    }
}

/// Tokenize `source`, pairing every token with its byte span.
///
/// On failure returns the byte offset of the first unrecognized input.
pub fn tokenize(source: &str) -> Result<Vec<(Token, Range<usize>)>, usize> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next() {
        match token {
            Ok(token) => tokens.push((token, lexer.span())),
            Err(()) => return Err(lexer.span().start),
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_connection_tokens() {
        assert_eq!(
            lex("|constant value=7| -> x"),
            vec![
                Token::Pipe,
                Token::Ident("constant".into()),
                Token::Ident("value".into()),
                Token::Eq,
                Token::Int(7),
                Token::Pipe,
                Token::Arrow,
                Token::Ident("x".into()),
            ]
        );
    }

    #[test]
    fn test_model_header() {
        assert_eq!(
            lex("---- model foo\n"),
            vec![Token::ModelHeader, Token::Ident("foo".into()), Token::Newline]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            lex("-3 2.5 1e3 -0.5"),
            vec![
                Token::Int(-3),
                Token::Float(2.5),
                Token::Float(1000.0),
                Token::Float(-0.5)
            ]
        );
    }

    #[test]
    fn test_references() {
        assert_eq!(
            lex("$a ${b}"),
            vec![Token::Ref("a".into()), Token::Ref("b".into())]
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            lex(r#""a\"b" 'c' """multi
line""""#),
            vec![
                Token::Str("a\"b".into()),
                Token::Str("c".into()),
                Token::Str("multi\nline".into()),
            ]
        );
    }

    #[test]
    fn test_comments_and_continuations() {
        assert_eq!(
            lex("a # comment\nb \\\n c"),
            vec![
                Token::Ident("a".into()),
                Token::Newline,
                Token::Ident("b".into()),
                Token::Ident("c".into()),
            ]
        );
    }

    #[test]
    fn test_ellipsis_and_dot() {
        assert_eq!(
            lex("a.b ..."),
            vec![
                Token::Ident("a".into()),
                Token::Dot,
                Token::Ident("b".into()),
                Token::Ellipsis
            ]
        );
    }

    #[test]
    fn test_unrecognized_input() {
        assert_eq!(tokenize("a ? b"), Err(2));
    }
}
