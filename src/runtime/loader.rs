//! Model file loader
//!
//! Finds `*.pg` files on a search path, parses them (through a parse cache
//! kept next to each source) and registers every model they define as a
//! block type.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::core::registry::Registry;
use crate::error::Error;
use crate::lang::{parse, ParsedFile};

use super::adapter::ModelFactory;

/// Extension of model files
pub const MODEL_EXTENSION: &str = "pg";

/// Environment variable holding extra search directories, colon-separated
pub const PATH_VAR: &str = "PROCFLOW_PATH";

/// Loads model files into a registry
#[derive(Debug, Clone, Default)]
pub struct Loader {
    search_path: Vec<PathBuf>,
    cache: bool,
}

impl Loader {
    pub fn new(search_path: Vec<PathBuf>, cache: bool) -> Self {
        Self { search_path, cache }
    }

    /// Search path taken from `PROCFLOW_PATH`; unset or empty is fine
    pub fn from_env(cache: bool) -> Self {
        let search_path = std::env::var(PATH_VAR)
            .map(|raw| {
                raw.split(':')
                    .filter(|dir| !dir.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();
        Self::new(search_path, cache)
    }

    /// Append a directory to the search path
    pub fn add_dir(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.search_path.contains(&dir) {
            self.search_path.push(dir);
        }
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// `dir/name.pg` or a directory `dir/name/`, first match on the search path
    ///
    /// Dotted names map to nested directories.
    pub fn find_package(&self, name: &str) -> Option<PathBuf> {
        let relative: PathBuf = name.split('.').collect();
        self.search_path.iter().find_map(|dir| {
            let file = dir.join(&relative).with_extension(MODEL_EXTENSION);
            if file.is_file() {
                return Some(file);
            }
            let package = dir.join(&relative);
            package.is_dir().then_some(package)
        })
    }

    /// Parse a model file, using the cache when it matches the source text
    pub fn parse_file(&self, path: &Path) -> Result<ParsedFile, Error> {
        let source = fs::read_to_string(path).map_err(|e| Error::io(path.display(), e))?;
        let cache = cache_path(path);
        let digest = source_digest(&source);
        if self.cache {
            if let Some(parsed) = read_cache(&cache, &digest) {
                tracing::debug!(path = %path.display(), "parse cache hit");
                return Ok(parsed);
            }
        }

        let file = path.display().to_string();
        let parsed = parse(&source, Some(file.as_str()))?;

        if self.cache {
            write_cache(&cache, digest, &parsed);
        }
        Ok(parsed)
    }

    /// Register every model of one file; returns the registered names
    ///
    /// A file without model headers registers its anonymous model under the
    /// file stem.
    pub fn load_file(&self, path: &Path, registry: &Registry) -> Result<Vec<String>, Error> {
        let parsed = self.parse_file(path)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut names = Vec::new();
        for model in parsed.models {
            let name = model.name.clone().unwrap_or_else(|| stem.clone());
            if registry.exists(&name) {
                tracing::warn!(model = %name, path = %path.display(), "model already registered; keeping the first");
                continue;
            }
            registry.register(Arc::new(ModelFactory::new(&name, Arc::new(model))))?;
            tracing::debug!(model = %name, path = %path.display(), "registered model");
            names.push(name);
        }
        Ok(names)
    }

    /// Register the models of a file or of every file under a directory
    pub fn load_path(&self, path: &Path, registry: &Registry) -> Result<(), Error> {
        if path.is_dir() {
            self.load_dir(path, registry).map(|_| ())
        } else {
            self.load_file(path, registry).map(|_| ())
        }
    }

    /// Register every `*.pg` under `dir`, in sorted order
    pub fn load_dir(&self, dir: &Path, registry: &Registry) -> Result<Vec<String>, Error> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::io(dir.display(), e.into()))?;
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if !hidden && path.is_file() && path.extension().map_or(false, |ext| ext == MODEL_EXTENSION) {
                files.push(path.to_path_buf());
            }
        }

        let mut names = Vec::new();
        for file in files {
            names.extend(self.load_file(&file, registry)?);
        }
        Ok(names)
    }

    /// Register every model found on the search path; missing directories are skipped
    pub fn load_all(&self, registry: &Registry) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        for dir in &self.search_path {
            if !dir.is_dir() {
                tracing::debug!(dir = %dir.display(), "search directory does not exist");
                continue;
            }
            names.extend(self.load_dir(dir, registry)?);
        }
        Ok(names)
    }
}

/// `dir/.name.pg.cache.json` for `dir/name.pg`
pub fn cache_path(source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    source.with_file_name(format!(".{}.cache.json", name))
}

/// On-disk parse cache: the AST plus the digest of the text it came from
#[derive(Serialize, Deserialize)]
struct CacheEntry {
    source_sha256: String,
    parsed: ParsedFile,
}

fn source_digest(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Cached AST if the cache is readable and was built from `digest`
fn read_cache(cache: &Path, digest: &str) -> Option<ParsedFile> {
    let text = fs::read_to_string(cache).ok()?;
    match serde_json::from_str::<CacheEntry>(&text) {
        Ok(entry) if entry.source_sha256 == digest => Some(entry.parsed),
        Ok(_) => {
            tracing::debug!(cache = %cache.display(), "parse cache is stale");
            None
        }
        Err(e) => {
            tracing::debug!(cache = %cache.display(), error = %e, "ignoring corrupt parse cache");
            None
        }
    }
}

fn write_cache(cache: &Path, source_sha256: String, parsed: &ParsedFile) {
    let entry = CacheEntry {
        source_sha256,
        parsed: parsed.clone(),
    };
    let result = serde_json::to_string(&entry)
        .map_err(std::io::Error::from)
        .and_then(|text| fs::write(cache, text));
    if let Err(e) = result {
        tracing::debug!(cache = %cache.display(), error = %e, "cannot write parse cache");
    }
}
