//! Background-style loops driven by the run

pub mod poller;
pub mod ready;
