//! Layered configuration for the shelf server.
//!
//! Values come from, in increasing precedence: built-in defaults, a TOML
//! file (`shelf.toml` in the platform config directory unless a path is
//! given), and `SHELF_`-prefixed environment variables with `__` separating
//! nesting levels (`SHELF_SERVER__BIND`, `SHELF_STORAGE__BUCKET`, ...).
//!
//! Only the library root is mandatory; everything else has a sensible
//! default, and the object-store section is optional altogether (a purely
//! local library never touches S3).

pub mod error;

use crate::error::{ErrorKind, Result};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "SHELF_";
const CONFIG_FILE: &str = "shelf.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub library: LibraryConfig,
    /// Optional remote object store holding source documents.
    pub storage: Option<StorageConfig>,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Root directory for derived artifacts. Scratch space lives under it,
    /// which keeps atomic renames on one filesystem.
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { root: default_cache_root() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    /// Directory scanned for source documents.
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores (B2, MinIO, Tigris, ...).
    pub endpoint: Option<String>,
    pub key_id: String,
    pub key_secret: String,
    /// Key prefix all object keys are resolved under.
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessConfig {
    /// Milliseconds between items in a preprocessing job.
    #[serde(default = "default_item_delay_ms")]
    pub item_delay_ms: u64,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self { item_delay_ms: default_item_delay_ms() }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8620))
}

fn default_cache_root() -> PathBuf {
    // Falls back to a relative path only when the platform gives us nothing;
    // validation rejects that case with a clear message.
    directories::ProjectDirs::from("", "", "shelf")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("shelf-cache"))
}

fn default_item_delay_ms() -> u64 {
    500
}

impl Config {
    /// Load and validate configuration from defaults, file, and environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let path = match file {
            Some(path) => path.to_path_buf(),
            None => default_config_file()?,
        };
        tracing::debug!(path = %path.display(), "loading configuration");
        let config: Config = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|err| exn::Exn::from(ErrorKind::Load(err.to_string())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for path in [&self.cache.root, &self.library.root] {
            if !path.is_absolute() {
                exn::bail!(ErrorKind::RelativePath(path.clone()));
            }
        }
        if let Some(storage) = &self.storage {
            for (field, value) in [
                ("storage.bucket", &storage.bucket),
                ("storage.region", &storage.region),
                ("storage.key_id", &storage.key_id),
                ("storage.key_secret", &storage.key_secret),
            ] {
                if value.trim().is_empty() {
                    exn::bail!(ErrorKind::Invalid(format!("{field} must not be empty")));
                }
            }
        }
        Ok(())
    }
}

fn default_config_file() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "shelf").ok_or_else(|| exn::Exn::from(ErrorKind::NoProjectDirs))?;
    Ok(dirs.config_dir().join(CONFIG_FILE))
}
