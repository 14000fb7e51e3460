//! Page permission bits, target capability bits and region classification.

use std::fmt;

bitflags::bitflags! {
    /// Access permissions carried by a page entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
    pub struct PagePerms: u8 {
        /// Data and debug reads are allowed.
        const READ = 1 << 0;
        /// Data writes are allowed.
        const WRITE = 1 << 1;
        /// Instruction fetches are allowed.
        const EXECUTE = 1 << 2;
    }
}

impl PagePerms {
    /// `R-X`, the usual ROM permission set.
    pub const RX: Self = Self::READ.union(Self::EXECUTE);
    /// `RW-`, data-only RAM or I/O.
    pub const RW: Self = Self::READ.union(Self::WRITE);
    /// `RWX`, general-purpose RAM.
    pub const RWX: Self = Self::READ.union(Self::WRITE).union(Self::EXECUTE);
}

impl fmt::Display for PagePerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |bit: Self, ch: char| if self.contains(bit) { ch } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(Self::READ, 'R'),
            flag(Self::WRITE, 'W'),
            flag(Self::EXECUTE, 'X')
        )
    }
}

bitflags::bitflags! {
    /// Behavioural capabilities advertised by a bus target.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
    pub struct TargetCaps: u8 {
        /// Side-effect-free reads are supported.
        const SUPPORTS_PEEK = 1 << 0;
        /// Side-effect-free writes are supported.
        const SUPPORTS_POKE = 1 << 1;
        /// Native multi-byte access is supported.
        const SUPPORTS_WIDE = 1 << 2;
        /// Ordinary accesses may change device state.
        const HAS_SIDE_EFFECTS = 1 << 3;
        /// Access timing matters to the device model.
        const TIMING_SENSITIVE = 1 << 4;
    }
}

impl TargetCaps {
    /// Capabilities of plain RAM and ROM backing stores.
    pub const PLAIN_MEMORY: Self = Self::SUPPORTS_PEEK
        .union(Self::SUPPORTS_POKE)
        .union(Self::SUPPORTS_WIDE);
}

/// Coarse classification of a page's current occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum RegionTag {
    /// Nothing is mapped.
    #[default]
    Invalid,
    /// Read/write memory.
    Ram,
    /// Read-only memory.
    Rom,
    /// Memory-mapped I/O and soft switches.
    Io,
    /// Per-slot peripheral ROM.
    SlotRom,
    /// Per-slot peripheral I/O window.
    SlotIo,
    /// Shared expansion ROM window.
    ExpansionRom,
    /// Composite window subdivided into sub-regions.
    Composite,
    /// Generic device-backed region.
    Device,
}

impl RegionTag {
    /// Short lowercase name used by listings and dumps.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Ram => "ram",
            Self::Rom => "rom",
            Self::Io => "io",
            Self::SlotRom => "slot-rom",
            Self::SlotIo => "slot-io",
            Self::ExpansionRom => "expansion-rom",
            Self::Composite => "composite",
            Self::Device => "device",
        }
    }
}

impl fmt::Display for RegionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
