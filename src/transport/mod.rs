//! Command-line transport

pub mod plugin_cli;
