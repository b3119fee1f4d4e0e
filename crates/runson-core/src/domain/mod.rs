//! Domain models for runson.
//!
//! - `RemoteBranch`: a branch discovered on a remote repository
//! - `WorkflowFile`: a workflow document in the storage tree
//! - `EditRecord`: one edited file in a bulk-edit request
//! - `Report`: per-unit outcomes of a batch

pub mod branch;
pub mod error;
pub mod report;
pub mod workflow;

pub use branch::RemoteBranch;
pub use error::{Result, SyncError};
pub use report::{EditReport, Outcome, Report};
pub use workflow::{decode_edits, EditRecord, WorkflowFile};
