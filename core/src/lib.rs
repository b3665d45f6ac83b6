//! Durable side of the query history: typed values, the store gateway and its
//! redb implementation, and the recorder that writes new observations.

pub mod recorder;
pub mod store;
pub mod types;
