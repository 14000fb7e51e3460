//! Bus access requests and the permission/alignment policy applied to them.

use crate::{BusError, FaultKind, PagePerms};

/// Width of a single bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessWidth {
    /// One byte.
    #[default]
    Byte,
    /// Two bytes, little-endian.
    Half,
    /// Four bytes, little-endian.
    Word,
}

impl AccessWidth {
    /// Validates a raw bit width.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidWidth`] for anything other than 8, 16 or 32.
    pub const fn from_bits(bits: u8) -> Result<Self, BusError> {
        match bits {
            8 => Ok(Self::Byte),
            16 => Ok(Self::Half),
            32 => Ok(Self::Word),
            other => Err(BusError::InvalidWidth(other)),
        }
    }

    /// Width in bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::Byte => 8,
            Self::Half => 16,
            Self::Word => 32,
        }
    }

    /// Width in bytes.
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Half => 2,
            Self::Word => 4,
        }
    }

    /// Mask selecting the valid value bits for this width.
    #[must_use]
    pub const fn value_mask(self) -> u32 {
        match self {
            Self::Byte => 0xFF,
            Self::Half => 0xFFFF,
            Self::Word => u32::MAX,
        }
    }
}

/// How a multi-byte access is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessMode {
    /// One page-table resolution, one target, all-or-nothing.
    #[default]
    Atomic,
    /// Independent per-byte sub-transactions; a fault on one byte does not
    /// stop the remaining bytes.
    Decomposed,
}

/// Why an access is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessIntent {
    /// CPU data read.
    #[default]
    DataRead,
    /// CPU data write.
    DataWrite,
    /// Tooling read; never triggers device side effects.
    DebugRead,
    /// Tooling write; bypasses write protection and never triggers side effects.
    DebugWrite,
    /// CPU opcode or operand fetch.
    InstructionFetch,
    /// Device-initiated read (DMA).
    DmaRead,
    /// Device-initiated write (DMA).
    DmaWrite,
}

impl AccessIntent {
    /// Returns `true` for intents that store data.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::DataWrite | Self::DebugWrite | Self::DmaWrite)
    }

    /// Returns `true` for tooling intents.
    #[must_use]
    pub const fn is_debug(self) -> bool {
        matches!(self, Self::DebugRead | Self::DebugWrite)
    }

    /// Permission bit the page must carry for this intent.
    #[must_use]
    pub const fn required_permission(self) -> PagePerms {
        match self {
            Self::DataRead | Self::DebugRead | Self::DmaRead => PagePerms::READ,
            Self::DataWrite | Self::DebugWrite | Self::DmaWrite => PagePerms::WRITE,
            Self::InstructionFetch => PagePerms::EXECUTE,
        }
    }

    /// Short lowercase name used by trace listings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DataRead => "read",
            Self::DataWrite => "write",
            Self::DebugRead => "dbg-read",
            Self::DebugWrite => "dbg-write",
            Self::InstructionFetch => "fetch",
            Self::DmaRead => "dma-read",
            Self::DmaWrite => "dma-write",
        }
    }
}

bitflags::bitflags! {
    /// Per-access modifier flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
    pub struct AccessFlags: u8 {
        /// Route through the side-effect-free target path.
        const NO_SIDE_EFFECTS = 1 << 0;
        /// Access is part of a bulk tooling walk.
        const BULK = 1 << 1;
        /// Suppress trace emission for this access.
        const NO_TRACE = 1 << 2;
    }
}

/// Identifies the actor that issued an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SourceId(pub u16);

impl SourceId {
    /// The primary CPU.
    pub const CPU: Self = Self(0);
    /// Interactive tooling.
    pub const TOOLING: Self = Self(0xFFFE);
}

/// One immutable access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BusAccess {
    /// Byte address.
    pub address: u32,
    /// Value to store for write intents; ignored for reads.
    pub value: u32,
    /// Access width.
    pub width: AccessWidth,
    /// Multi-byte resolution mode.
    pub mode: AccessMode,
    /// `true` when issued by the emulated machine rather than the host.
    pub emulated: bool,
    /// Why the access is made.
    pub intent: AccessIntent,
    /// Which actor issued the access.
    pub source: SourceId,
    /// Machine cycle at issue time.
    pub cycle: u64,
    /// Modifier flags.
    pub flags: AccessFlags,
}

impl BusAccess {
    /// Builds a single-byte atomic access from the CPU.
    #[must_use]
    pub const fn new(address: u32, intent: AccessIntent) -> Self {
        Self {
            address,
            value: 0,
            width: AccessWidth::Byte,
            mode: AccessMode::Atomic,
            emulated: true,
            intent,
            source: SourceId::CPU,
            cycle: 0,
            flags: AccessFlags::empty(),
        }
    }

    /// CPU data read of one byte.
    #[must_use]
    pub const fn read(address: u32) -> Self {
        Self::new(address, AccessIntent::DataRead)
    }

    /// CPU data write of one byte.
    #[must_use]
    pub const fn write(address: u32, value: u8) -> Self {
        Self::new(address, AccessIntent::DataWrite).with_value(value as u32)
    }

    /// Tooling read of one byte.
    #[must_use]
    pub const fn debug_read(address: u32) -> Self {
        Self::new(address, AccessIntent::DebugRead).from_tooling()
    }

    /// Tooling write of one byte.
    #[must_use]
    pub const fn debug_write(address: u32, value: u8) -> Self {
        Self::new(address, AccessIntent::DebugWrite)
            .with_value(value as u32)
            .from_tooling()
    }

    /// Instruction fetch of one byte.
    #[must_use]
    pub const fn fetch(address: u32) -> Self {
        Self::new(address, AccessIntent::InstructionFetch)
    }

    /// Replaces the width.
    #[must_use]
    pub const fn with_width(mut self, width: AccessWidth) -> Self {
        self.width = width;
        self
    }

    /// Replaces the resolution mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replaces the write value.
    #[must_use]
    pub const fn with_value(mut self, value: u32) -> Self {
        self.value = value;
        self
    }

    /// Adds modifier flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: AccessFlags) -> Self {
        self.flags = self.flags.union(flags);
        self
    }

    /// Replaces the issuing source.
    #[must_use]
    pub const fn with_source(mut self, source: SourceId) -> Self {
        self.source = source;
        self
    }

    /// Replaces the cycle stamp.
    #[must_use]
    pub const fn at_cycle(mut self, cycle: u64) -> Self {
        self.cycle = cycle;
        self
    }

    /// Marks the access as host-issued tooling traffic.
    #[must_use]
    pub const fn from_tooling(mut self) -> Self {
        self.emulated = false;
        self.source = SourceId::TOOLING;
        self
    }

    /// Returns `true` when the target must be driven through peek/poke.
    #[must_use]
    pub const fn suppresses_side_effects(&self) -> bool {
        self.intent.is_debug() || self.flags.contains(AccessFlags::NO_SIDE_EFFECTS)
    }

    /// Derives the single-byte sub-transaction for byte `index` of this access.
    #[must_use]
    pub const fn byte_lane(&self, index: u32) -> Self {
        let mut lane = *self;
        lane.address = self.address.wrapping_add(index);
        lane.value = match self.value.checked_shr(index.saturating_mul(8)) {
            Some(shifted) => shifted & 0xFF,
            None => 0,
        };
        lane.width = AccessWidth::Byte;
        lane
    }
}

/// Checks the page permissions against the access intent.
///
/// `DebugWrite` bypasses write protection so tooling can patch ROM.
///
/// # Errors
///
/// Returns [`FaultKind::Nx`] for fetches from non-executable pages and
/// [`FaultKind::Permission`] for any other missing permission.
pub const fn validate_permission(perms: PagePerms, intent: AccessIntent) -> Result<(), FaultKind> {
    if matches!(intent, AccessIntent::DebugWrite) {
        return Ok(());
    }
    if perms.contains(intent.required_permission()) {
        Ok(())
    } else if matches!(intent, AccessIntent::InstructionFetch) {
        Err(FaultKind::Nx)
    } else {
        Err(FaultKind::Permission)
    }
}

/// Validates natural alignment for atomic wide accesses.
///
/// # Errors
///
/// Returns [`FaultKind::Misaligned`] when `address` is not a multiple of the
/// access width.
pub const fn validate_alignment(address: u32, width: AccessWidth) -> Result<(), FaultKind> {
    if address % width.bytes() == 0 {
        Ok(())
    } else {
        Err(FaultKind::Misaligned)
    }
}
