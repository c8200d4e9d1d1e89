//! ABOUTME: State machine, HTTP surface, completion consumer, and janitor sweep
//! ABOUTME: The orchestrator is the only component permitted to mutate the workflow store

mod completion_consumer;
mod engine;
mod http;
mod janitor;
mod lanes;

pub use completion_consumer::run as run_completion_consumer;
pub use engine::Engine;
pub use http::{router, AppState};
pub use janitor::Janitor;
