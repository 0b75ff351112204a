#![forbid(unsafe_code)]

pub mod airgapped;
pub mod cli;
pub mod config;
pub mod images;
pub mod runtime;
pub mod signature;
pub mod telemetry;

pub use cli::Cli;
