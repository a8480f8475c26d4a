//! Tether core library — session-paired relay server and configuration,
//! used by the CLI.

pub mod config;
pub mod relay;
