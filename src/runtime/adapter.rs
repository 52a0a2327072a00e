//! Models as block types
//!
//! A [`ModelFactory`] registers a parsed model under its name so other models
//! can instance it like any block. Each instance is assembled against a
//! registry layer that forbids the model's own name.

use std::sync::Arc;

use crate::core::block::{Block, BlockSpec, IoSpec, SignalDecl};
use crate::core::config::{ConfigDecl, ConfigError, ConfigMap, Settings};
use crate::core::registry::{BlockFactory, Registry};
use crate::error::Error;
use crate::lang::ParsedModel;

use super::assembler::{assemble, model_inputs, model_outputs};

/// Block factory backed by a parsed model
pub struct ModelFactory {
    parsed: Arc<ParsedModel>,
    spec: BlockSpec,
}

impl ModelFactory {
    /// Factory for `parsed`, registered as `name`
    pub fn new(name: impl Into<String>, parsed: Arc<ParsedModel>) -> Self {
        let describe = |names: Vec<String>, decls: &[crate::lang::ast::IoStmt]| {
            names
                .into_iter()
                .map(|name| {
                    let description = decls
                        .iter()
                        .find(|d| d.name == name)
                        .and_then(|d| d.description.clone())
                        .unwrap_or_default();
                    SignalDecl::new(name, description)
                })
                .collect::<Vec<_>>()
        };

        let mut spec = BlockSpec::new(name)
            .describe(parsed.docstring.clone().unwrap_or_default())
            .inputs(IoSpec::Fixed(describe(model_inputs(&parsed), &parsed.inputs)))
            .outputs(IoSpec::Fixed(describe(model_outputs(&parsed), &parsed.outputs)));
        for config in &parsed.configs {
            let description = config.description.clone().unwrap_or_default();
            let decl = match config.default.as_ref().and_then(|d| d.to_value()) {
                Some(default) => ConfigDecl::with_default(&config.name, default, description),
                None => ConfigDecl::required(&config.name, description),
            };
            spec = spec.config(decl);
        }

        Self { parsed, spec }
    }

    pub fn parsed(&self) -> &ParsedModel {
        &self.parsed
    }
}

impl BlockFactory for ModelFactory {
    fn spec(&self) -> &BlockSpec {
        &self.spec
    }

    /// Passed through untouched; the assembler resolves model config itself
    /// and routes dotted keys to inner blocks.
    fn resolve_config(&self, passed: &ConfigMap, _settings: &Settings) -> Result<ConfigMap, ConfigError> {
        Ok(passed.clone())
    }

    fn instance(&self, name: &str, config: &ConfigMap, registry: &Registry) -> Result<Box<dyn Block>, Error> {
        let scoped = registry.child_forbidding(&self.spec.name);
        let model = assemble(&self.parsed, name, config, &scoped)?;
        Ok(Box::new(model))
    }

    fn model_source(&self) -> Option<Arc<ParsedModel>> {
        Some(self.parsed.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parse;

    #[test]
    fn test_spec_mirrors_declarations() {
        let file = parse(
            "--- model scale\n\
             \"\"\"Scales its input.\"\"\"\n\
             config k = 2 \"factor\"\n\
             input x \"value in\"\n\
             output y\n\
             (x) -> |gain k=$k| -> (y)\n",
            None,
        )
        .unwrap();
        let factory = ModelFactory::new("scale", Arc::new(file.models[0].clone()));
        let spec = factory.spec();
        assert_eq!(spec.description, "Scales its input.");
        assert_eq!(spec.inputs.fixed_names(), Some(vec!["x".to_string()]));
        assert_eq!(spec.outputs.fixed_names(), Some(vec!["y".to_string()]));
        assert_eq!(spec.config.len(), 1);
        assert!(spec.config[0].has_default());
        assert!(factory.model_source().is_some());
    }

    #[test]
    fn test_self_instantiation_is_forbidden() {
        let file = parse(
            "--- model loop\n\
             input x\n\
             output y\n\
             (x) -> |loop| -> (y)\n",
            None,
        )
        .unwrap();
        let registry = Registry::default_library(Settings::default()).unwrap();
        registry
            .register(Arc::new(ModelFactory::new("loop", Arc::new(file.models[0].clone()))))
            .unwrap();
        let err = match registry.instance("loop", "l", &ConfigMap::new()) {
            Ok(_) => panic!("recursion must be rejected"),
            Err(e) => e.to_string(),
        };
        assert!(err.contains("recursive instantiation"), "{}", err);
    }
}
