//! Commit ingestion: registration, per-repository sync runs and periodic
//! monitoring, connected through the event dispatcher.

mod error;
mod monitor;
mod orchestrator;
mod pipeline;
mod registration;

pub use error::{IngestError, Result};
pub use monitor::MonitoringScheduler;
pub use orchestrator::{IngestionOrchestrator, SyncOutcome, SyncReport};
pub use pipeline::Pipeline;
pub use registration::RegistrationFlow;
