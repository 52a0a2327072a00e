//! procflow - run a model file
//!
//! Loads a model from a `.pg` file or by name from the search path, runs it
//! to completion and prints its public outputs.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use procflow::{parse_value, BlockRuntime, ConfigMap, Loader, ParsedModel, Registry, Settings, Value};

#[derive(Parser, Debug)]
#[command(name = "procflow")]
#[command(about = "Run a procflow model", version)]
struct Cli {
    /// Path to a .pg file, or the name of a model on the search path
    model: String,

    /// Config passed to the model; dotted keys address inner blocks
    #[arg(value_name = "KEY=VALUE", value_parser = parse_assignment)]
    config: Vec<(String, Value)>,

    /// Extra directory to search for models (repeatable)
    #[arg(short = 'd', long = "dir", value_name = "DIR")]
    dirs: Vec<PathBuf>,

    /// Record and print execution statistics
    #[arg(long)]
    stats: bool,

    /// Ignore and do not write parse caches
    #[arg(long)]
    no_cache: bool,

    /// Treat unknown or unused config as a warning
    #[arg(long)]
    lenient: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// `key=value`, with the value read as a DSL literal or else as a plain string
fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in {:?}", raw));
    }
    let value = parse_value(value)
        .ok()
        .and_then(|literal| literal.to_value())
        .unwrap_or_else(|| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "procflow=debug" } else { "procflow=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            let user_error = e
                .downcast_ref::<procflow::Error>()
                .map_or(false, procflow::Error::is_user_error);
            ExitCode::from(if user_error { 2 } else { 1 })
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings = Settings::from_env();
    if cli.stats {
        settings = settings.with_stats();
    }
    if cli.no_cache {
        settings.cache = false;
    }
    if cli.lenient {
        settings = settings.lenient();
    }

    let registry = Registry::default_library(settings.clone())?;
    let mut loader = Loader::from_env(settings.cache);
    for dir in &cli.dirs {
        loader.add_dir(dir);
    }

    let path = Path::new(&cli.model);
    let (name, parsed) = if path.is_file() {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            loader.add_dir(parent);
        }
        registry.set_loader(loader.clone());
        root_from_file(&loader, path, &registry)?
    } else {
        registry.set_loader(loader.clone());
        loader.load_all(&registry)?;
        let factory = registry.get_factory(&cli.model).map_err(procflow::Error::from)?;
        let parsed = factory
            .model_source()
            .ok_or_else(|| anyhow!("{:?} is a built-in block, not a model", cli.model))?;
        (cli.model.clone(), (*parsed).clone())
    };

    let config: ConfigMap = cli.config.into_iter().collect();
    let mut runtime = BlockRuntime::from_parsed(&parsed, &name, &config, &registry)?;
    runtime
        .run()
        .with_context(|| format!("model {:?} failed", name))?;

    for output in runtime.model().output_names() {
        match runtime.output(output).and_then(|slot| slot.timestamp.map(|ts| (&slot.value, ts))) {
            Some((value, timestamp)) => println!("{} = {} @ {}", output, value, timestamp),
            None => println!("{} = <unset>", output),
        }
    }
    if let Some(report) = runtime.stats() {
        println!();
        print!("{}", report);
    }
    Ok(())
}

/// Register the models of `path` and pick the one to run
///
/// The anonymous model wins, then the model named after the file, then the
/// first one in the file.
fn root_from_file(
    loader: &Loader,
    path: &Path,
    registry: &Registry,
) -> anyhow::Result<(String, ParsedModel)> {
    let file = loader.parse_file(path)?;
    loader.load_file(path, registry)?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main".to_string());
    let root = file
        .models
        .iter()
        .find(|m| m.name.is_none())
        .or_else(|| file.models.iter().find(|m| m.name.as_deref() == Some(stem.as_str())))
        .or_else(|| file.models.first())
        .ok_or_else(|| anyhow!("{} defines no model", path.display()))?;
    let name = root.name.clone().unwrap_or(stem);
    Ok((name, root.clone()))
}
