pub mod changeset;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod logging;
pub mod model;
pub mod registry;
pub mod remote;
pub mod task;
pub mod tracker;

pub use config::SyncConfig;
pub use engine::{CycleReport, SyncContext, SyncManager};
pub use errors::{SyncError, SyncResult};
pub use logging::{init_logging, LogLevel};
pub use model::{ClientId, ClientInfo, DocumentId, DocumentInfo, ObjectId};
pub use task::CancelToken;
