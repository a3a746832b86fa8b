use std::env;
use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;
use trackdb::config::{config_path_from_env, load_or_create_config};
use trackdb::CatalogConfig;

/// Options every helper program accepts, plus whatever else was given.
pub struct Options {
    pub config_path: PathBuf,
    pub debug: bool,
    pub args: Vec<String>,
}

pub fn parse() -> Result<Options, String> {
    let mut config_path = None;
    let mut debug = false;
    let mut args = Vec::new();
    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let value = iter.next().ok_or("--config needs a path")?;
                config_path = Some(PathBuf::from(value));
            }
            "--debug" | "-d" => debug = true,
            "--no-debug" | "-D" => debug = false,
            _ => args.push(arg),
        }
    }
    Ok(Options {
        config_path: config_path.unwrap_or_else(config_path_from_env),
        debug,
        args,
    })
}

pub fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn load_config(path: &Path) -> Result<CatalogConfig, Box<dyn std::error::Error>> {
    let (config, created) = load_or_create_config(path)?;
    if created {
        tracing::info!("Wrote default configuration to {:?}", path);
    }
    Ok(config)
}
