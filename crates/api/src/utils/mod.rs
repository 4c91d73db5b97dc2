//! Health reporting and logging helpers

pub mod health;
pub mod logging;
