//! Memory monitor for the pagebus address-space core.
//!
//! Loads a machine description, builds a live [`pagebus_core::Bus`] with its
//! overlay layers and soft switches, and runs line-oriented inspection
//! commands against it.

/// Session and command-parsing errors.
pub mod error;
pub use error::{CommandError, MonitorError};

/// JSON machine descriptions.
pub mod profile_file;
pub use profile_file::{
    load_profile, LayerSpec, MonitorProfile, SoftSwitchSpec, SwitchBinding, SwitchOp,
};

/// Built-in demonstration machine.
pub mod demo;
pub use demo::{demo_profile, LANGUAGE_CARD};

/// Monitor command grammar.
pub mod command;
pub use command::{parse_command, parse_hex, Command, HELP_TEXT};

/// Live bus state driven by commands.
pub mod session;
pub use session::Session;

use clap as _;
use tracing_subscriber as _;

#[cfg(test)]
use tempfile as _;
