//! ABOUTME: Domain types shared by the orchestrator, bus client, and workers
//! ABOUTME: No I/O lives here; only the data model and its invariants

pub mod error;
pub mod message;
pub mod stage;
pub mod workflow;

pub use error::{NewsflowError, Result};
pub use message::{CompletionMessage, CompletionStatus, TaskMessage, SCHEMA_VERSION};
pub use stage::{stages_for_workflow_type, FanOut, Stage};
pub use workflow::{WorkflowErrorInfo, WorkflowRecord, WorkflowStatus, UNIT_CHILD_KEY};
