//! Exclusive device leases through the device-control tool

pub mod guard;
pub mod jmp;
pub mod preflight;
