use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

const DEFAULT_ALIAS: &str = "{/artist}{/album}{/title}{ext}";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub root: String,
    pub encoding: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            root: String::new(),
            encoding: "UTF-8".to_string(),
        }
    }
}

/// How one name part is derived from a track's path in a given context.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamePartRule {
    pub part: String,
    pub regex: String,
    pub replace: String,
    /// Glob over context names, `*` matching any run.
    #[serde(default = "any_context")]
    pub context: String,
}

fn any_context() -> String {
    "*".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub version: u32,
    /// Directory holding the database file.
    pub home: String,
    pub collections: Vec<CollectionConfig>,
    pub alias: String,
    pub stopwords: Vec<String>,
    pub nameparts: Vec<NamePartRule>,
    /// File extensions the rescanner treats as tracks.
    pub extensions: Vec<String>,
    /// Tracks played more recently than this are not picked at random.
    pub replay_min_secs: u64,
    pub rescan_program: String,
    pub upgrade_program: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            home: "data".to_string(),
            collections: Vec::new(),
            alias: DEFAULT_ALIAS.to_string(),
            stopwords: default_stopwords(),
            nameparts: default_nameparts(),
            extensions: [".mp3", ".ogg", ".flac", ".wav"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            replay_min_secs: 8 * 3600,
            rescan_program: "trackdb-rescan".to_string(),
            upgrade_program: "trackdb-dbupgrade".to_string(),
        }
    }
}

fn default_stopwords() -> Vec<String> {
    let mut words: Vec<String> = (1..=30).map(|n| n.to_string()).collect();
    words.extend((1..=9).map(|n| format!("{:02}", n)));
    words.extend(
        [
            "the", "a", "an", "and", "to", "too", "in", "on", "of", "we", "i", "am", "as", "im",
            "for", "is",
        ]
        .iter()
        .map(|w| w.to_string()),
    );
    words
}

fn default_nameparts() -> Vec<NamePartRule> {
    let rule = |part: &str, regex: &str, replace: &str, context: &str| NamePartRule {
        part: part.to_string(),
        regex: regex.to_string(),
        replace: replace.to_string(),
        context: context.to_string(),
    };
    vec![
        rule("title", r"/([0-9]+:)?([^/]+)\.[a-zA-Z0-9]+$", "$2", "display"),
        rule("title", r"/([^/]+)\.[a-zA-Z0-9]+$", "$1", "sort"),
        rule("album", r"/([^/]+)/[^/]+$", "$1", "*"),
        rule("artist", r"/([^/]+)/[^/]+/[^/]+$", "$1", "*"),
        rule("ext", r"(\.[a-zA-Z0-9]+)$", "$1", "*"),
    ]
}

impl CatalogConfig {
    /// Checks the parts of the file that would otherwise fail late.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_alias(&self.alias)?;
        for rule in &self.nameparts {
            Regex::new(&rule.regex).map_err(|err| {
                ConfigError::Invalid(format!("namepart {} regex: {}", rule.part, err))
            })?;
        }
        for collection in &self.collections {
            if !collection.root.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "collection root {:?} is not absolute",
                    collection.root
                )));
            }
        }
        Ok(())
    }

    pub fn db_path(&self, config_path: &Path) -> PathBuf {
        resolve_path(config_path, &self.home).join("trackdb.redb")
    }
}

fn validate_alias(alias: &str) -> Result<(), ConfigError> {
    if !alias.starts_with('{') {
        return Err(ConfigError::Invalid(format!(
            "alias {:?} must start with a part",
            alias
        )));
    }
    let mut rest = alias;
    while let Some(open) = rest.find('{') {
        let close = rest[open..]
            .find('}')
            .ok_or_else(|| ConfigError::Invalid(format!("unterminated part in alias {:?}", alias)))?;
        let name = &rest[open + 1..open + close];
        if name.trim_start_matches('/').is_empty() {
            return Err(ConfigError::Invalid(format!("empty part in alias {:?}", alias)));
        }
        rest = &rest[open + close + 1..];
    }
    Ok(())
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
            ConfigError::Invalid(what) => write!(f, "invalid config: {}", what),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("TRACKDB_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(CatalogConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: CatalogConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.alias.trim().is_empty() {
            config.alias = DEFAULT_ALIAS.to_string();
        }
        for collection in &mut config.collections {
            while collection.root.len() > 1 && collection.root.ends_with('/') {
                collection.root.pop();
            }
        }
        config.validate()?;
        return Ok((config, false));
    }

    let config = CatalogConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &CatalogConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}
