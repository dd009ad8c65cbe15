use std::{collections::HashMap, path::Path};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".into(), port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/romkeep.db".into() }
    }
}

/// Glob patterns matched against bare file and folder names.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ExcludeConfig {
    pub platforms: Vec<String>,
    pub single_file_names: Vec<String>,
    pub single_file_extensions: Vec<String>,
    pub multi_file_names: Vec<String>,
    pub firmware_names: Vec<String>,
    pub firmware_extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub base_path: String,
    pub exclude: ExcludeConfig,
    /// Folder name -> canonical platform slug used for provider lookups.
    pub platform_bindings: HashMap<String, String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self { base_path: "library".into(), exclude: ExcludeConfig::default(), platform_bindings: HashMap::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub timeout_secs: u64,
    pub event_buffer: usize,
    pub job_history: usize,
    /// Periodic low-priority QUICK rescan; disabled when unset.
    pub rescan_interval_secs: Option<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        // 4 hours
        Self { timeout_secs: 14_400, event_buffer: 256, job_history: 50, rescan_interval_secs: None }
    }
}

/// A provider is used only when enabled and its dataset loads.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub enabled: bool,
    pub dataset: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self { enabled: true, dataset: None }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    pub igdb: ProviderConfig,
    pub moby: ProviderConfig,
}

/// Every section falls back to the same values `config/default.toml` spells out.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub library: LibraryConfig,
    pub scan: ScanConfig,
    pub providers: ProvidersConfig,
}

const DEFAULTS: &str = include_str!("../config/default.toml");

fn builder() -> ::config::ConfigBuilder<::config::builder::DefaultState> {
    ::config::Config::builder().add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
}

/// Only the embedded defaults, without local files or the environment.
pub fn defaults() -> anyhow::Result<AppConfig> {
    Ok(builder().build()?.try_deserialize()?)
}

/// Layers, lowest precedence first: embedded defaults, `romkeep.toml` in the
/// working directory, the file named by `ROMKEEP_CONFIG`, then
/// `ROMKEEP__SECTION__KEY` variables (a `.env` file is read into the
/// environment first).
pub fn load() -> anyhow::Result<AppConfig> {
    let _ = dotenvy::dotenv();

    let mut layers = builder().add_source(::config::File::with_name("romkeep").required(false));
    if let Ok(custom_path) = std::env::var("ROMKEEP_CONFIG") {
        layers = layers.add_source(::config::File::with_name(&custom_path).required(false));
    }
    layers = layers.add_source(::config::Environment::with_prefix("ROMKEEP").separator("__"));

    let app_cfg: AppConfig = layers.build()?.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    if cfg.server.port == 0 {
        anyhow::bail!("invalid server.port: {}", cfg.server.port);
    }

    if cfg.library.base_path.trim().is_empty() {
        anyhow::bail!("library.base_path must not be empty");
    }
    for (folder, slug) in &cfg.library.platform_bindings {
        if folder.trim().is_empty() || slug.trim().is_empty() {
            anyhow::bail!("library.platform_bindings entries must not be empty");
        }
    }

    if cfg.scan.timeout_secs == 0 {
        anyhow::bail!("scan.timeout_secs must be > 0");
    }
    if cfg.scan.event_buffer == 0 {
        anyhow::bail!("scan.event_buffer must be > 0");
    }
    if cfg.scan.job_history == 0 {
        anyhow::bail!("scan.job_history must be > 0");
    }
    if let Some(every) = cfg.scan.rescan_interval_secs {
        if every < 60 {
            anyhow::bail!("scan.rescan_interval_secs must be >= 60 when set");
        }
    }

    Ok(())
}

/// Creates the directory holding a file-backed SQLite database.
///
/// Accepts `sqlite:path` and `sqlite://path`, ignores query parameters, and
/// does nothing for in-memory databases or other schemes.
pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return Ok(());
    };
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return Ok(());
    }
    // sqlite:///C:/data/x.db
    #[cfg(windows)]
    let path = match path.as_bytes() {
        [b'/', drive, b':', ..] if drive.is_ascii_alphabetic() => &path[1..],
        _ => path,
    };
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
