use std::path::PathBuf;

/// Core configuration for opening the history store.
#[derive(Clone, Debug)]
pub struct Config {
    pub base_path: PathBuf,
}

impl Config {
    pub fn db_path(&self) -> PathBuf {
        self.base_path.join("history.redb")
    }

    pub fn config_path(&self) -> PathBuf {
        self.base_path.join("history.toml")
    }
}
