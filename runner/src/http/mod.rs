//! Backend HTTP API

pub mod client;
pub mod deployments;
pub mod events;
pub mod test_events;
