//! ABOUTME: AMQP 0-9-1 message bus client: topology, reconnect loop, pub/sub trait
//! ABOUTME: The orchestrator and workers depend only on the Bus/Consumer/Delivery traits

mod lapin_bus;
mod reconnect;
pub mod topology;
mod trait_def;

pub use lapin_bus::LapinBus;
pub use reconnect::Backoff;
pub use trait_def::{Bus, Consumer, Delivery};
