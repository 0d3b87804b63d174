pub mod config;
pub mod error;

pub use config::{AutosaveConfig, EngineConfig, TaskQueueConfig};
pub use error::{Result, SyncError};
