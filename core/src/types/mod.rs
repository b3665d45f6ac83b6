pub(crate) mod config;
pub use config::{Config, HistoryConfig, HistoryConfigError, LoggingConfig, SyncConfig};

pub(crate) mod entity;
pub use entity::{EntityId, EntityKind};

pub(crate) mod query;
pub use query::{
    MAX_HASH_LENGTH, MAX_QUERY_LENGTH, MatchHash, MatchHashError, QueryString, QueryStringError,
};
