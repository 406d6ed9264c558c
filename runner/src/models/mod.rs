//! Typed records passed between run phases

pub mod deployment;
pub mod event;
pub mod plan;
pub mod test_run;
