//! ABOUTME: Shared consume/execute/publish skeleton reused by every newsflow worker binary
//! ABOUTME: A worker binary only has to implement TaskHandler; this crate does the rest

mod direct_http;
mod handler;
mod idempotency;
mod loop_;

pub use direct_http::direct_invocation_router;
pub use handler::TaskHandler;
pub use idempotency::IdempotencyGuard;
pub use loop_::WorkerLoop;
