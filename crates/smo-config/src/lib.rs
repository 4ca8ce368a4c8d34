//! Settings for the `smo` server, proxy and client.
//!
//! Persisted as `config.ron` in the config directory. Every section is
//! `#[serde(default)]`, so older or hand-trimmed files keep loading. Command
//! line flags override the file for a single run.

mod cli;
mod config;
mod error;

pub use cli::{CliArgs, ClientArgs, Command, ProxyArgs, ServerArgs};
pub use config::{ClientSection, Config, DebugConfig, ProxySection, ServerSection};
pub use error::ConfigError;
