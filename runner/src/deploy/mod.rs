//! Update event lifecycle and deployment tracking

pub mod fsm;
pub mod lifecycle;
pub mod status;
