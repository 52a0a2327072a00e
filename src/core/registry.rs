//! Block Registry - layered name → factory mapping
//!
//! This module provides the registry the assembler consults to turn block
//! type names into instances. It supports:
//! - Block registration with declaration checks
//! - Layered lookup (a child layer shadows its parent)
//! - Forbidden names, used to stop a model from instancing itself
//! - Packages imported on demand, from installers or from the search path
//! - "Did you mean" suggestions for unknown names

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::block::{Block, BlockError, BlockSpec};
use super::config::{resolve_config, ConfigError, ConfigMap, Settings};
use crate::error::{Error, WriterError};
use crate::lang::ParsedModel;
use crate::runtime::loader::Loader;

/// Something that can produce block instances of one type
pub trait BlockFactory: Send + Sync {
    /// Immutable type metadata, readable before instancing
    fn spec(&self) -> &BlockSpec;

    /// Resolve passed config against the declared keys
    fn resolve_config(&self, passed: &ConfigMap, settings: &Settings) -> Result<ConfigMap, ConfigError> {
        resolve_config(&self.spec().config, passed, settings.strict_config)
    }

    /// Create an instance named `name` with an already resolved config
    fn instance(&self, name: &str, config: &ConfigMap, registry: &Registry) -> Result<Box<dyn Block>, Error>;

    /// Parsed source of a type that is itself a model
    fn model_source(&self) -> Option<Arc<ParsedModel>> {
        None
    }
}

/// Factory built from a spec and a constructor closure
pub struct FnFactory<F> {
    spec: BlockSpec,
    make: F,
}

impl<F> FnFactory<F>
where
    F: Fn(&ConfigMap) -> Result<Box<dyn Block>, BlockError> + Send + Sync,
{
    pub fn new(spec: BlockSpec, make: F) -> Self {
        Self { spec, make }
    }
}

impl<F> BlockFactory for FnFactory<F>
where
    F: Fn(&ConfigMap) -> Result<Box<dyn Block>, BlockError> + Send + Sync,
{
    fn spec(&self) -> &BlockSpec {
        &self.spec
    }

    fn instance(&self, name: &str, config: &ConfigMap, _registry: &Registry) -> Result<Box<dyn Block>, Error> {
        (self.make)(config).map_err(|e| {
            Error::semantic(format!(
                "cannot create block {:?} of type {:?}: {}",
                name, self.spec.name, e
            ))
        })
    }
}

#[derive(Clone)]
enum Entry {
    Factory(Arc<dyn BlockFactory>),
    Forbidden,
}

/// Installs the blocks of a package into a registry
pub type PackageInstaller = Arc<dyn Fn(&Registry) -> Result<(), Error> + Send + Sync>;

struct Shared {
    settings: Settings,
    packages: RwLock<HashMap<String, PackageInstaller>>,
    imported: Mutex<HashSet<String>>,
    loader: RwLock<Option<Loader>>,
}

/// Layered block registry
///
/// Each layer is an `Arc<RwLock<HashMap>>` using parking_lot's RwLock;
/// clones share the same layers. Settings, packages and the loader are
/// shared by every layer of one registry.
#[derive(Clone)]
pub struct Registry {
    layer: Arc<RwLock<HashMap<String, Entry>>>,
    parent: Option<Box<Registry>>,
    shared: Arc<Shared>,
}

impl Registry {
    /// Create an empty registry
    pub fn new(settings: Settings) -> Self {
        Self {
            layer: Arc::new(RwLock::new(HashMap::new())),
            parent: None,
            shared: Arc::new(Shared {
                settings,
                packages: RwLock::new(HashMap::new()),
                imported: Mutex::new(HashSet::new()),
                loader: RwLock::new(None),
            }),
        }
    }

    /// Empty registry plus the built-in blocks
    pub fn default_library(settings: Settings) -> Result<Self, Error> {
        let registry = Self::new(settings);
        crate::blocks::register_std(&registry)?;
        Ok(registry)
    }

    /// Policy flags shared by all layers
    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    /// Loader used to resolve imports not provided by an installer
    pub fn set_loader(&self, loader: Loader) {
        *self.shared.loader.write() = Some(loader);
    }

    /// Register a block type in this layer
    ///
    /// # Returns
    /// * `Err(RegistryError::Invalid)` if the declarations are impossible
    /// * `Err(RegistryError::DuplicateBlock)` if this layer already has the name
    pub fn register(&self, factory: Arc<dyn BlockFactory>) -> Result<(), RegistryError> {
        factory.spec().validate()?;

        let name = factory.spec().name.clone();
        let mut layer = self.layer.write();
        if layer.contains_key(&name) {
            return Err(RegistryError::DuplicateBlock(name));
        }
        tracing::debug!(block = %name, "registered block type");
        layer.insert(name, Entry::Factory(factory));
        Ok(())
    }

    /// Register a block type from a spec and a constructor
    pub fn register_fn<F>(&self, spec: BlockSpec, make: F) -> Result<(), RegistryError>
    where
        F: Fn(&ConfigMap) -> Result<Box<dyn Block>, BlockError> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnFactory::new(spec, make)))
    }

    /// Whether a usable factory is visible under `name`
    pub fn exists(&self, name: &str) -> bool {
        self.get_factory(name).is_ok()
    }

    /// Look up a factory, nearest layer first
    pub fn get_factory(&self, name: &str) -> Result<Arc<dyn BlockFactory>, RegistryError> {
        let mut current = Some(self);
        while let Some(registry) = current {
            match registry.layer.read().get(name) {
                Some(Entry::Factory(factory)) => return Ok(factory.clone()),
                Some(Entry::Forbidden) => return Err(RegistryError::Forbidden(name.to_string())),
                None => {}
            }
            current = registry.parent.as_deref();
        }
        Err(RegistryError::UnknownBlock {
            name: name.to_string(),
            suggestions: suggest(name, &self.known_blocks()),
        })
    }

    /// Create a block instance with config resolved against its type
    pub fn instance(
        &self,
        type_name: &str,
        instance_name: &str,
        config: &ConfigMap,
    ) -> Result<Box<dyn Block>, Error> {
        let factory = self.get_factory(type_name)?;
        let resolved = factory
            .resolve_config(config, self.settings())
            .map_err(|e| Error::semantic(format!("block {:?}: {}", instance_name, e)))?;
        factory.instance(instance_name, &resolved, self)
    }

    /// New layer on top of this one in which `name` cannot be instanced
    pub fn child_forbidding(&self, name: &str) -> Registry {
        let mut layer = HashMap::new();
        layer.insert(name.to_string(), Entry::Forbidden);
        Registry {
            layer: Arc::new(RwLock::new(layer)),
            parent: Some(Box::new(self.clone())),
            shared: self.shared.clone(),
        }
    }

    /// All usable names, sorted
    pub fn known_blocks(&self) -> Vec<String> {
        let mut forbidden = HashSet::new();
        let mut known = BTreeSet::new();
        let mut current = Some(self);
        while let Some(registry) = current {
            for (name, entry) in registry.layer.read().iter() {
                match entry {
                    Entry::Forbidden => {
                        forbidden.insert(name.clone());
                    }
                    Entry::Factory(_) if !forbidden.contains(name) => {
                        known.insert(name.clone());
                    }
                    Entry::Factory(_) => {}
                }
            }
            current = registry.parent.as_deref();
        }
        known.into_iter().collect()
    }

    /// Number of types registered in this layer
    pub fn count(&self) -> usize {
        self.layer.read().len()
    }

    fn root(&self) -> &Registry {
        let mut current = self;
        while let Some(parent) = current.parent.as_deref() {
            current = parent;
        }
        current
    }

    /// Make a package available under `import name`
    pub fn register_package<F>(&self, name: impl Into<String>, installer: F)
    where
        F: Fn(&Registry) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.shared
            .packages
            .write()
            .insert(name.into(), Arc::new(installer));
    }

    /// Import a package once
    ///
    /// Registered installers win; otherwise the loader looks for `name.pg`
    /// or a directory `name/` on the search path. Blocks land in the root
    /// layer so every model sees them.
    pub fn import(&self, name: &str) -> Result<(), Error> {
        if !self.shared.imported.lock().insert(name.to_string()) {
            return Ok(());
        }

        let result = self.install(name);
        if result.is_err() {
            self.shared.imported.lock().remove(name);
        }
        result
    }

    fn install(&self, name: &str) -> Result<(), Error> {
        let installer = self.shared.packages.read().get(name).cloned();
        if let Some(installer) = installer {
            tracing::debug!(package = %name, "installing package");
            return installer(self.root());
        }

        let loader = self
            .shared
            .loader
            .read()
            .clone()
            .unwrap_or_else(|| Loader::from_env(self.settings().cache));
        match loader.find_package(name) {
            Some(path) => {
                tracing::debug!(package = %name, path = %path.display(), "loading package");
                loader.load_path(&path, self.root())
            }
            None => Err(RegistryError::UnknownPackage(name.to_string()).into()),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

/// Up to three known names within edit distance 3, closest first
fn suggest(name: &str, known: &[String]) -> Vec<String> {
    let mut scored: Vec<(usize, &String)> = known
        .iter()
        .map(|k| (levenshtein(name, k), k))
        .filter(|(d, _)| *d <= 3)
        .collect();
    scored.sort();
    scored.into_iter().take(3).map(|(_, k)| k.clone()).collect()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut row = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            row[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(row[j] + 1);
        }
        prev = row;
    }
    prev[b.len()]
}

fn did_you_mean(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!("; did you mean {}?", suggestions.join(", "))
    }
}

/// Errors that can occur during registry operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    /// No factory under that name
    #[error("unknown block type {name:?}{}", did_you_mean(suggestions))]
    UnknownBlock { name: String, suggestions: Vec<String> },

    /// Attempted to register a name twice in one layer
    #[error("duplicate block type {0:?}")]
    DuplicateBlock(String),

    /// Name forbidden in this layer
    #[error("recursive instantiation of model {0:?}")]
    Forbidden(String),

    /// Package not registered and not on the search path
    #[error("unknown package {0:?}")]
    UnknownPackage(String),

    /// Declarations rejected at registration
    #[error(transparent)]
    Invalid(#[from] WriterError),
}
