//! OTA update test runner library
//!
//! Drives one over-the-air update test: create and lock the source and target
//! events on the backend, deploy the target while holding a device lease,
//! poll the deployment to a terminal state, optionally check that the device
//! comes back up, and report the verdict.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod lease;
pub mod logs;
pub mod models;
pub mod storage;
pub mod utils;
pub mod workers;
