//! Waymark CLI library
//!
//! Command-line tooling around the Waymark harness: a mock auth backend for
//! deterministic browser tests, credential fixtures, configuration and
//! artifact-layout inspection.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod config;
mod error;
pub mod handlers;
pub mod mock_server;
mod output;
pub mod test_data;

pub use commands::{
    ArtifactsArgs, CaptureArgs, Cli, ColorArg, Commands, ConfigAction, ConfigArgs, MockServerArgs,
};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use mock_server::{
    router, AuthRequest, MockAuthBackend, MockServer, MockServerConfig, MockUser,
};
pub use output::Reporter;
pub use test_data::{TestDataFactory, TestUser};
