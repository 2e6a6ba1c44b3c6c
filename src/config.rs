//! Application configuration.
//!
//! Sources, lowest to highest priority: built-in defaults, the optional
//! `config/brainplaner.json` under the project root, then environment
//! variables. `config/.env` is loaded into the environment first.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::models::DEFAULT_DEVICE;

pub const ENV_FILE: &str = "config/.env";
pub const SETTINGS_FILE: &str = "config/brainplaner.json";

fn default_interpreter() -> Option<String> {
    if cfg!(windows) {
        Some("python".into())
    } else {
        Some("python3".into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggerConfig {
    /// Runs `program` through this interpreter; `None` executes it directly.
    pub interpreter: Option<String>,
    pub program: PathBuf,
    /// Extra arguments placed before `--session-id`.
    pub args: Vec<String>,
    pub logs_dir: PathBuf,
    pub detach: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            program: PathBuf::from("scripts/computer_logger.py"),
            args: Vec::new(),
            logs_dir: PathBuf::from("data/logs"),
            detach: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupabaseConfig {
    pub url: String,
    #[serde(skip_serializing)]
    pub key: String,
}

impl SupabaseConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty() && !self.key.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Supabase { url: String, key: String },
    Sqlite(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    #[serde(skip)]
    pub project_root: PathBuf,
    pub database_path: PathBuf,
    pub device: String,
    pub supabase: SupabaseConfig,
    pub logger: LoggerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            database_path: PathBuf::from("data/brainplaner.sqlite3"),
            device: DEFAULT_DEVICE.into(),
            supabase: SupabaseConfig::default(),
            logger: LoggerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Project root is `BRAINPLANER_ROOT` or the current directory.
    pub fn load() -> Result<Self> {
        let root = match env::var_os("BRAINPLANER_ROOT") {
            Some(root) => PathBuf::from(root),
            None => env::current_dir().context("failed to read current directory")?,
        };
        Self::load_from(&root)
    }

    pub fn load_from(project_root: &Path) -> Result<Self> {
        load_env_file(&project_root.join(ENV_FILE));

        let mut config = Self::read_settings(&project_root.join(SETTINGS_FILE))?;
        config.project_root = project_root.to_path_buf();
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    fn read_settings(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        match serde_json::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(err) => {
                warn!(
                    "Ignoring malformed settings file {}: {err}",
                    path.display()
                );
                Ok(Self::default())
            }
        }
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SUPABASE_URL") {
            self.supabase.url = url;
        }
        if let Some(key) = lookup("SUPABASE_KEY") {
            self.supabase.key = key;
        }
        if let Some(path) = lookup("BRAINPLANER_DB_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(device) = lookup("BRAINPLANER_DEVICE") {
            self.device = device;
        }
        if let Some(interpreter) = lookup("BRAINPLANER_LOGGER_INTERPRETER") {
            // An empty value means "execute the program directly".
            self.logger.interpreter = Some(interpreter).filter(|value| !value.is_empty());
        }
        if let Some(program) = lookup("BRAINPLANER_LOGGER_PROGRAM") {
            self.logger.program = PathBuf::from(program);
        }
        if let Some(logs_dir) = lookup("BRAINPLANER_LOGS_DIR") {
            self.logger.logs_dir = PathBuf::from(logs_dir);
        }
    }

    pub fn database_path(&self) -> PathBuf {
        if self.database_path.is_absolute() {
            self.database_path.clone()
        } else {
            self.project_root.join(&self.database_path)
        }
    }

    /// The hosted store wins when both its url and key are set.
    pub fn store_backend(&self) -> StoreBackend {
        if self.supabase.is_configured() {
            StoreBackend::Supabase {
                url: self.supabase.url.clone(),
                key: self.supabase.key.clone(),
            }
        } else {
            StoreBackend::Sqlite(self.database_path())
        }
    }
}

fn load_env_file(path: &Path) {
    match dotenvy::from_path(path) {
        Ok(()) => info!("Loaded environment from {}", path.display()),
        Err(err) if err.not_found() => {}
        Err(err) => warn!("Failed to load {}: {err}", path.display()),
    }
}
