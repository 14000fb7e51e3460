//! Fault taxonomy, the per-access fault record and result helpers.

use thiserror::Error;

use crate::RegionTag;

/// Value returned for each byte of a faulted read on the hot path.
pub const OPEN_BUS_VALUE: u8 = 0xFF;

/// Stable taxonomy of address-space faults.
///
/// Faults are expected outcomes of guest behaviour (unmapped I/O, write
/// protected ROM) and always travel as data, never as panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum FaultKind {
    /// No target answers at this address.
    #[error("unmapped address")]
    Unmapped = 0x01,
    /// A target exists but the page lacks the permission the intent needs.
    #[error("permission denied")]
    Permission = 0x02,
    /// Instruction fetch from a page without execute permission.
    #[error("instruction fetch from non-executable page")]
    Nx = 0x03,
    /// Atomic wide access not aligned to its width.
    #[error("misaligned access")]
    Misaligned = 0x04,
    /// The target explicitly rejected the access.
    #[error("device rejected access")]
    DeviceFault = 0x05,
}

impl FaultKind {
    /// Converts a fault kind to its stable byte code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable byte code back into a fault kind.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Unmapped),
            0x02 => Some(Self::Permission),
            0x03 => Some(Self::Nx),
            0x04 => Some(Self::Misaligned),
            0x05 => Some(Self::DeviceFault),
            _ => None,
        }
    }

    /// Lowercase label used in dump fault summaries.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unmapped => "unmapped",
            Self::Permission => "permission",
            Self::Nx => "no-execute",
            Self::Misaligned => "misaligned",
            Self::DeviceFault => "device-fault",
        }
    }
}

/// A typed, data-carrying failure outcome of one bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[error("{kind} at ${address:04X} ({region})")]
pub struct BusFault {
    /// What went wrong.
    pub kind: FaultKind,
    /// Region classification of the page that faulted.
    pub region: RegionTag,
    /// Byte address of the faulting (sub-)transaction.
    pub address: u32,
}

impl BusFault {
    /// Creates a fault record.
    #[must_use]
    pub const fn new(kind: FaultKind, region: RegionTag, address: u32) -> Self {
        Self {
            kind,
            region,
            address,
        }
    }

    /// Creates an [`FaultKind::Unmapped`] fault.
    #[must_use]
    pub const fn unmapped(address: u32) -> Self {
        Self::new(FaultKind::Unmapped, RegionTag::Invalid, address)
    }
}

/// Result of a bus access: the value, or the fault that prevented it.
pub type BusResult<T> = Result<T, BusFault>;

/// Convenience queries over [`BusResult`].
pub trait BusResultExt {
    /// Returns `true` when the access faulted.
    fn is_fault(&self) -> bool;
    /// Returns the fault kind, or `None` for a successful access.
    fn fault_kind(&self) -> Option<FaultKind>;
}

impl<T> BusResultExt for BusResult<T> {
    fn is_fault(&self) -> bool {
        self.is_err()
    }

    fn fault_kind(&self) -> Option<FaultKind> {
        self.as_ref().err().map(|fault| fault.kind)
    }
}
