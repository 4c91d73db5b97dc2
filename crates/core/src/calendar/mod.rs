//! Calendar source and event ports

pub mod ports;
