use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bite_core::db::SqliteStore;
use bite_core::json_file::JsonFileStore;
use bite_core::memory::MemoryStore;
use bite_core::store::Storage;
use clap::ValueEnum;
use directories::ProjectDirs;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
    /// Process memory only; everything is lost on exit
    Memory,
    /// A single JSON document in the data directory
    Json,
    /// SQLite database in the data directory
    Sqlite,
}

impl StorageKind {
    fn from_env(raw: &str) -> Result<Self> {
        Self::from_str(raw.trim(), true).map_err(|_| {
            anyhow::anyhow!("Invalid BITE_STORAGE '{raw}': expected memory, json, or sqlite")
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub json_path: PathBuf,
    pub storage: StorageKind,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
}

impl Config {
    /// Read configuration from the environment (and `.env`), falling back to
    /// the platform data directory. `storage` overrides `BITE_STORAGE`.
    pub fn load(storage: Option<StorageKind>) -> Result<Self> {
        let data_dir = match non_empty_env("BITE_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => ProjectDirs::from("", "", "bite")
                .context("Could not determine home directory")?
                .data_dir()
                .to_path_buf(),
        };

        let storage = match storage {
            Some(kind) => kind,
            None => non_empty_env("BITE_STORAGE")
                .map(|raw| StorageKind::from_env(&raw))
                .transpose()?
                .unwrap_or(StorageKind::Sqlite),
        };

        Ok(Config {
            db_path: data_dir.join("bite.db"),
            json_path: data_dir.join("bite.json"),
            data_dir,
            storage,
            openai_api_key: non_empty_env("OPENAI_API_KEY"),
            openai_base_url: non_empty_env("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
        })
    }

    /// Open the configured backend, creating the data directory on demand.
    pub fn open_store(&self) -> Result<Arc<dyn Storage>> {
        if self.storage != StorageKind::Memory {
            std::fs::create_dir_all(&self.data_dir).with_context(|| {
                format!(
                    "Failed to create data directory: {}",
                    self.data_dir.display()
                )
            })?;
        }

        let store: Arc<dyn Storage> = match self.storage {
            StorageKind::Memory => Arc::new(MemoryStore::new()),
            StorageKind::Json => Arc::new(
                JsonFileStore::open(&self.json_path)
                    .with_context(|| format!("Failed to open {}", self.json_path.display()))?,
            ),
            StorageKind::Sqlite => Arc::new(
                SqliteStore::open(&self.db_path)
                    .with_context(|| format!("Failed to open {}", self.db_path.display()))?,
            ),
        };
        tracing::info!(storage = ?self.storage, "storage ready");
        Ok(store)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
