//! Monitor command grammar.
//!
//! One command per line, words separated by whitespace. Addresses, lengths
//! and byte values are hexadecimal with an optional `$` or `0x` prefix;
//! record counts are decimal.

use crate::error::CommandError;

/// Default number of bytes shown by `dump` without a length.
pub const DEFAULT_DUMP_LEN: u32 = 0x40;

/// Default number of records shown by `trace` without a count.
pub const DEFAULT_TRACE_COUNT: usize = 16;

/// Text printed by `help`.
pub const HELP_TEXT: &str = "\
commands:
  dump <addr> [len]          side-effect-free hex dump (len defaults to 40)
  peek <addr>                side-effect-free byte read
  poke <addr> <byte>...      side-effect-free writes, ROM included
  read <addr> [bits]         CPU data read (8, 16 or 32 bits)
  write <addr> <value> [bits] CPU data write
  regions                    coalesced page table listing
  layers                     overlay layers and their state
  layer <name> on|off        activate or deactivate a layer
  trace [count]              newest trace records
  events                     drain device notifications
  devices                    registered devices
  help                       this text
numbers are hex ($C000, 0xC000 or C000); trace counts are decimal";

/// One parsed monitor command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Hex dump through debug reads.
    Dump {
        /// First address.
        start: u32,
        /// Byte count.
        len: u32,
    },
    /// Single debug read.
    Peek {
        /// Address to read.
        address: u32,
    },
    /// Debug writes of consecutive bytes.
    Poke {
        /// First address.
        address: u32,
        /// Bytes to store.
        bytes: Vec<u8>,
    },
    /// Side-effecting CPU read.
    Read {
        /// Address to read.
        address: u32,
        /// Width in bits.
        bits: u8,
    },
    /// Side-effecting CPU write.
    Write {
        /// Address to write.
        address: u32,
        /// Value to store.
        value: u32,
        /// Width in bits.
        bits: u8,
    },
    /// Region listing.
    Regions,
    /// Layer listing.
    Layers,
    /// Layer toggle.
    Layer {
        /// Layer name.
        name: String,
        /// `true` to activate.
        on: bool,
    },
    /// Newest trace records.
    Trace {
        /// Record count.
        count: usize,
    },
    /// Drain pending device notifications.
    Events,
    /// Registered devices.
    Devices,
    /// Command summary.
    Help,
}

/// Parses one command line.
///
/// # Errors
///
/// Returns a [`CommandError`] describing the first problem found.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err(CommandError::Empty);
    };
    let args: Vec<&str> = words.collect();

    let command = match verb.to_ascii_lowercase().as_str() {
        "dump" | "d" => {
            expect_at_most("dump", &args, 2)?;
            Command::Dump {
                start: required("dump", "an address", &args, 0)?,
                len: optional(&args, 1)?.unwrap_or(DEFAULT_DUMP_LEN),
            }
        }
        "peek" => {
            expect_at_most("peek", &args, 1)?;
            Command::Peek {
                address: required("peek", "an address", &args, 0)?,
            }
        }
        "poke" => {
            let address = required("poke", "an address", &args, 0)?;
            if args.len() < 2 {
                return Err(CommandError::MissingArgument {
                    command: "poke",
                    argument: "at least one byte",
                });
            }
            let bytes = args[1..]
                .iter()
                .map(|word| parse_byte(word))
                .collect::<Result<Vec<u8>, _>>()?;
            Command::Poke { address, bytes }
        }
        "read" => {
            expect_at_most("read", &args, 2)?;
            Command::Read {
                address: required("read", "an address", &args, 0)?,
                bits: parse_bits(&args, 1)?,
            }
        }
        "write" => {
            expect_at_most("write", &args, 3)?;
            Command::Write {
                address: required("write", "an address", &args, 0)?,
                value: required("write", "a value", &args, 1)?,
                bits: parse_bits(&args, 2)?,
            }
        }
        "regions" => {
            expect_at_most("regions", &args, 0)?;
            Command::Regions
        }
        "layers" => {
            expect_at_most("layers", &args, 0)?;
            Command::Layers
        }
        "layer" => {
            expect_at_most("layer", &args, 2)?;
            let name = args.first().ok_or(CommandError::MissingArgument {
                command: "layer",
                argument: "a layer name",
            })?;
            let toggle = args.get(1).ok_or(CommandError::MissingArgument {
                command: "layer",
                argument: "`on` or `off`",
            })?;
            let on = match toggle.to_ascii_lowercase().as_str() {
                "on" => true,
                "off" => false,
                _ => return Err(CommandError::InvalidToggle((*toggle).to_owned())),
            };
            Command::Layer {
                name: (*name).to_owned(),
                on,
            }
        }
        "trace" => {
            expect_at_most("trace", &args, 1)?;
            let count = match args.first() {
                Some(word) => word
                    .parse()
                    .map_err(|_| CommandError::InvalidNumber((*word).to_owned()))?,
                None => DEFAULT_TRACE_COUNT,
            };
            Command::Trace { count }
        }
        "events" => {
            expect_at_most("events", &args, 0)?;
            Command::Events
        }
        "devices" => {
            expect_at_most("devices", &args, 0)?;
            Command::Devices
        }
        "help" | "?" => Command::Help,
        _ => return Err(CommandError::UnknownCommand(verb.to_owned())),
    };
    Ok(command)
}

/// Parses a hexadecimal number with an optional `$` or `0x` prefix.
///
/// # Errors
///
/// Returns [`CommandError::InvalidNumber`] for empty, non-hex or
/// out-of-range input.
pub fn parse_hex(word: &str) -> Result<u32, CommandError> {
    let digits = word
        .strip_prefix('$')
        .or_else(|| word.strip_prefix("0x"))
        .or_else(|| word.strip_prefix("0X"))
        .unwrap_or(word);
    u32::from_str_radix(digits, 16).map_err(|_| CommandError::InvalidNumber(word.to_owned()))
}

fn parse_byte(word: &str) -> Result<u8, CommandError> {
    let value = parse_hex(word)?;
    u8::try_from(value).map_err(|_| CommandError::InvalidNumber(word.to_owned()))
}

fn parse_bits(args: &[&str], index: usize) -> Result<u8, CommandError> {
    match args.get(index) {
        None => Ok(8),
        Some(word) => match word.parse::<u8>() {
            Ok(bits @ (8 | 16 | 32)) => Ok(bits),
            _ => Err(CommandError::InvalidNumber((*word).to_owned())),
        },
    }
}

fn required(
    command: &'static str,
    argument: &'static str,
    args: &[&str],
    index: usize,
) -> Result<u32, CommandError> {
    optional(args, index)?.ok_or(CommandError::MissingArgument { command, argument })
}

fn optional(args: &[&str], index: usize) -> Result<Option<u32>, CommandError> {
    args.get(index).map(|word| parse_hex(word)).transpose()
}

const fn expect_at_most(
    command: &'static str,
    args: &[&str],
    max: usize,
) -> Result<(), CommandError> {
    if args.len() > max {
        Err(CommandError::TooManyArguments(command))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_command, parse_hex, Command, CommandError, DEFAULT_DUMP_LEN};

    #[test]
    fn hex_accepts_all_three_spellings() {
        assert_eq!(parse_hex("$C000"), Ok(0xC000));
        assert_eq!(parse_hex("0xc000"), Ok(0xC000));
        assert_eq!(parse_hex("C000"), Ok(0xC000));
        assert_eq!(
            parse_hex("$"),
            Err(CommandError::InvalidNumber("$".to_owned()))
        );
        assert_eq!(
            parse_hex("G1"),
            Err(CommandError::InvalidNumber("G1".to_owned()))
        );
    }

    #[test]
    fn dump_defaults_its_length() {
        assert_eq!(
            parse_command("dump $D000"),
            Ok(Command::Dump {
                start: 0xD000,
                len: DEFAULT_DUMP_LEN
            })
        );
        assert_eq!(
            parse_command("  D 0xC800   100 "),
            Ok(Command::Dump {
                start: 0xC800,
                len: 0x100
            })
        );
    }

    #[test]
    fn poke_collects_every_byte() {
        assert_eq!(
            parse_command("poke $0300 A9 00 60"),
            Ok(Command::Poke {
                address: 0x0300,
                bytes: vec![0xA9, 0x00, 0x60]
            })
        );
        assert_eq!(
            parse_command("poke $0300"),
            Err(CommandError::MissingArgument {
                command: "poke",
                argument: "at least one byte"
            })
        );
        assert_eq!(
            parse_command("poke $0300 100"),
            Err(CommandError::InvalidNumber("100".to_owned()))
        );
    }

    #[test]
    fn read_and_write_take_optional_widths() {
        assert_eq!(
            parse_command("read $C080"),
            Ok(Command::Read {
                address: 0xC080,
                bits: 8
            })
        );
        assert_eq!(
            parse_command("write 2000 BEEF 16"),
            Ok(Command::Write {
                address: 0x2000,
                value: 0xBEEF,
                bits: 16
            })
        );
        assert_eq!(
            parse_command("read 2000 24"),
            Err(CommandError::InvalidNumber("24".to_owned()))
        );
    }

    #[test]
    fn layer_toggle_must_be_on_or_off() {
        assert_eq!(
            parse_command("layer lc-bank ON"),
            Ok(Command::Layer {
                name: "lc-bank".to_owned(),
                on: true
            })
        );
        assert_eq!(
            parse_command("layer lc-bank maybe"),
            Err(CommandError::InvalidToggle("maybe".to_owned()))
        );
        assert_eq!(
            parse_command("layer"),
            Err(CommandError::MissingArgument {
                command: "layer",
                argument: "a layer name"
            })
        );
    }

    #[test]
    fn trace_count_is_decimal() {
        assert_eq!(parse_command("trace 10"), Ok(Command::Trace { count: 10 }));
        assert_eq!(parse_command("trace"), Ok(Command::Trace { count: 16 }));
    }

    #[test]
    fn rejects_empty_unknown_and_extra_arguments() {
        assert_eq!(parse_command("   "), Err(CommandError::Empty));
        assert_eq!(
            parse_command("step"),
            Err(CommandError::UnknownCommand("step".to_owned()))
        );
        assert_eq!(
            parse_command("regions now"),
            Err(CommandError::TooManyArguments("regions"))
        );
        assert_eq!(parse_command("?"), Ok(Command::Help));
    }
}
