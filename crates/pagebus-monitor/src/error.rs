//! Error types for monitor sessions and command parsing.

use std::path::PathBuf;

use pagebus_core::{BusError, ProfileError};
use thiserror::Error;

/// Reasons a monitor command line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The line held no command.
    #[error("empty command")]
    Empty,
    /// The first word is not a known command.
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    /// A required argument is missing.
    #[error("`{command}` needs {argument}")]
    MissingArgument {
        /// Command being parsed.
        command: &'static str,
        /// Description of the missing argument.
        argument: &'static str,
    },
    /// A numeric argument is malformed or out of range.
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    /// More arguments were given than the command takes.
    #[error("`{0}` takes fewer arguments")]
    TooManyArguments(&'static str),
    /// A layer toggle was neither `on` nor `off`.
    #[error("expected `on` or `off`, got `{0}`")]
    InvalidToggle(String),
}

/// Errors raised while loading a machine or executing commands.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Reading a profile file failed.
    #[error("cannot read `{path}`: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A profile file is not valid JSON for a machine profile.
    #[error("malformed profile `{path}`: {source}")]
    ProfileJson {
        /// File being parsed.
        path: PathBuf,
        /// Underlying parse failure.
        #[source]
        source: serde_json::Error,
    },
    /// Rendering a profile as JSON failed.
    #[error("cannot render profile: {0}")]
    Render(#[source] serde_json::Error),
    /// The profile could not be turned into a bus.
    #[error(transparent)]
    Profile(#[from] ProfileError),
    /// A bus operation was rejected.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// Device registration failed.
    #[error(transparent)]
    Registry(#[from] pagebus_core::RegistryError),
    /// A command line could not be parsed.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// A dump would run past the end of the address space.
    #[error("dump of {len:#X} bytes at ${start:04X} runs past the {space:#X}-byte address space")]
    DumpOutOfRange {
        /// First address requested.
        start: u32,
        /// Requested byte count.
        len: u32,
        /// Size of the address space.
        space: u64,
    },
}
