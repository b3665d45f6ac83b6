mod core;
mod history;

pub use core::Config;
pub use history::{HistoryConfig, HistoryConfigError, LoggingConfig, SyncConfig};
