//! Upload side of the pipeline
//!
//! - `api`: the three-operation protocol spoken with the record store
//! - `session`: the shared, single-flight login session
//! - `orchestrator`: per-file initiate -> transfer -> complete with failure
//!   isolation

pub mod api;
pub mod orchestrator;
pub mod session;

pub use api::{GraphQlUploadApi, UploadApi};
pub use orchestrator::{UploadOrchestrator, UploadSettings};
pub use session::{Credentials, SessionManager, SessionTicket};
