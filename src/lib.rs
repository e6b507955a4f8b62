pub mod cli;
pub mod config;
pub mod detect;
pub mod error;
pub mod registry;
pub mod shell;
pub mod tmux;

pub use error::{Error, Result};

/// Version of cea-tmux
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
