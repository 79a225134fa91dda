//! Runtime configuration read from `PAGESMITH_*` environment variables.

use std::path::PathBuf;

use anyhow::Context;

use crate::api::SecurityConfig;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// SQLite file; the platform data directory when unset.
    pub database: Option<PathBuf>,
    pub port: u16,
    /// Bearer key required on every route except health.
    pub api_key: Option<String>,
    /// Allowed CORS origins. Any origin is allowed when unset.
    pub cors_origins: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: None,
            port: DEFAULT_PORT,
            api_key: None,
            cors_origins: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let port = match non_empty("PAGESMITH_PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("PAGESMITH_PORT is not a valid port: {raw}"))?,
            None => DEFAULT_PORT,
        };

        let cors_origins = non_empty("PAGESMITH_CORS_ORIGINS").map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        Ok(Self {
            database: non_empty("PAGESMITH_DATABASE").map(PathBuf::from),
            port,
            api_key: non_empty("PAGESMITH_API_KEY"),
            cors_origins,
        })
    }

    pub fn database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => default_database_path(),
        }
    }

    pub fn security(&self) -> SecurityConfig {
        SecurityConfig {
            api_key: self.api_key.clone(),
            cors_origins: self.cors_origins.clone(),
        }
    }
}

/// `pagesmith.db` under the platform data directory.
pub fn default_database_path() -> anyhow::Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "pagesmith")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().join("pagesmith.db"))
}
