pub mod conversations;
pub mod db;
pub mod messages;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{Config, CONFIG_FILE};

pub use conversations::ConversationStore;
pub use db::Database;
pub use messages::MessageLog;

const DATA_DIR: &str = ".pingme";
const DB_FILE: &str = "pingme.db";

/// Create the data directory, the database schema and a default config
/// file under `path`. Returns the config file location.
pub async fn init(path: &Path) -> Result<PathBuf> {
    let data_path = path.join(DATA_DIR);

    tokio::fs::create_dir_all(&data_path)
        .await
        .with_context(|| format!("creating {}", data_path.display()))?;

    let db_path = data_path.join(DB_FILE);
    let db = Database::new(&db_path)?;
    db.initialize()?;

    let config_path = path.join(CONFIG_FILE);
    if !tokio::fs::try_exists(&config_path).await? {
        let mut config = Config::default();
        config.storage.path = db_path;
        tokio::fs::write(&config_path, config.to_toml()?)
            .await
            .with_context(|| format!("writing {}", config_path.display()))?;
    }

    Ok(config_path)
}
