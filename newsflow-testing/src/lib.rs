//! ABOUTME: Test-only Bus fake shared across the workspace's integration tests
//! ABOUTME: Not part of any production binary; this crate is a dev-dependency only

mod fake_bus;

pub use fake_bus::FakeBus;
