//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{DEFAULT_CAPACITY, DEFAULT_NAMESPACE, DEFAULT_TTL_SECONDS, default_vary_headers};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "stowage";
const ENV_PREFIX: &str = "STOWAGE";
pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

/// Command-line arguments for the stowage binary.
#[derive(Debug, Parser)]
#[command(
    name = "stowage",
    version,
    about = "Seal, open and inspect persisted application state"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "STOWAGE_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Encrypt standard input and print the sealed payload.
    Seal(SecretArgs),
    /// Decrypt a sealed payload from standard input and print the plaintext.
    Open(SecretArgs),
    /// List the entries of a file-backed local store.
    Inspect(InspectArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct SecretArgs {
    /// Override the persistence secret.
    #[arg(long = "secret", value_name = "SECRET")]
    pub secret: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct InspectArgs {
    #[command(flatten)]
    pub secret: SecretArgs,

    /// Override the local storage file to read.
    #[arg(long = "storage-file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub storage_file: Option<PathBuf>,

    /// Show only this key.
    #[arg(long = "key", value_name = "KEY")]
    pub key: Option<String>,

    /// Decrypt values with the persistence secret.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub decrypt: bool,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub persist: PersistSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Clone)]
pub struct PersistSettings {
    pub secret: Option<String>,
    pub storage_file: Option<PathBuf>,
    pub interactive: bool,
    pub quota_bytes: u64,
}

impl std::fmt::Debug for PersistSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistSettings")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("storage_file", &self.storage_file)
            .field("interactive", &self.interactive)
            .field("quota_bytes", &self.quota_bytes)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub namespace: String,
    pub capacity: usize,
    pub ttl_seconds: u64,
    pub vary_headers: Vec<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("cache.vary_headers"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_cli_overrides(cli);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    persist: RawPersistSettings,
    cache: RawCacheSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPersistSettings {
    secret: Option<String>,
    storage_file: Option<PathBuf>,
    interactive: Option<bool>,
    quota_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    namespace: Option<String>,
    capacity: Option<usize>,
    ttl_seconds: Option<u64>,
    vary_headers: Option<Vec<String>>,
}

impl RawSettings {
    fn apply_cli_overrides(&mut self, cli: &CliArgs) {
        if let Some(level) = cli.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = cli.log_json {
            self.logging.json = Some(json);
        }

        match &cli.command {
            Command::Seal(args) | Command::Open(args) => self.apply_secret_override(args),
            Command::Inspect(args) => {
                self.apply_secret_override(&args.secret);
                if let Some(path) = args.storage_file.as_ref() {
                    self.persist.storage_file = Some(path.clone());
                }
            }
        }
    }

    fn apply_secret_override(&mut self, args: &SecretArgs) {
        if let Some(secret) = args.secret.as_ref() {
            self.persist.secret = Some(secret.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            persist,
            cache,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let persist = build_persist_settings(persist)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self {
            logging,
            persist,
            cache,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_persist_settings(persist: RawPersistSettings) -> Result<PersistSettings, LoadError> {
    let secret = persist.secret.filter(|secret| !secret.is_empty());
    let storage_file = persist
        .storage_file
        .filter(|path| !path.as_os_str().is_empty());

    let quota_bytes = persist.quota_bytes.unwrap_or(DEFAULT_QUOTA_BYTES);
    if quota_bytes == 0 {
        return Err(LoadError::invalid(
            "persist.quota_bytes",
            "must be greater than zero",
        ));
    }

    Ok(PersistSettings {
        secret,
        storage_file,
        interactive: persist.interactive.unwrap_or(true),
        quota_bytes,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let namespace = match cache.namespace {
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(LoadError::invalid("cache.namespace", "must not be empty"));
            }
            trimmed.to_string()
        }
        None => DEFAULT_NAMESPACE.to_string(),
    };

    let ttl_seconds = cache.ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS);
    if ttl_seconds == 0 {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            "must be greater than zero",
        ));
    }

    let vary_headers = match cache.vary_headers {
        Some(headers) => headers
            .iter()
            .map(|header| header.trim().to_ascii_lowercase())
            .filter(|header| !header.is_empty())
            .collect(),
        None => default_vary_headers(),
    };

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        namespace,
        capacity: cache.capacity.unwrap_or(DEFAULT_CAPACITY).max(1),
        ttl_seconds,
        vary_headers,
    })
}
