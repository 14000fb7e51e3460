//! Host-side errors for programming mistakes and malformed configuration.
//!
//! These never describe guest behaviour; address-space faults are
//! [`crate::BusFault`] values instead.

use thiserror::Error;

use crate::TargetId;

/// Errors raised by bus construction, mapping and layer management.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Access width in bits is not 8, 16 or 32.
    #[error("invalid access width: {0} bits")]
    InvalidWidth(u8),
    /// Address-space geometry is not representable.
    #[error("invalid geometry: {address_bits}-bit space with page shift {page_shift}")]
    InvalidGeometry {
        /// Requested address-space width.
        address_bits: u8,
        /// Requested page shift.
        page_shift: u8,
    },
    /// A mapping range is not page aligned.
    #[error("range ${start:X}+${len:X} is not page aligned")]
    UnalignedRange {
        /// Range start address.
        start: u32,
        /// Range length in bytes.
        len: u32,
    },
    /// A range extends past the end of the address space or the target.
    #[error("range ${start:X}+${len:X} is out of bounds")]
    RangeOutOfBounds {
        /// Range start address or offset.
        start: u32,
        /// Range length in bytes.
        len: u32,
    },
    /// No target with this id exists in the arena.
    #[error("unknown target id {0}")]
    UnknownTarget(TargetId),
    /// A target with this name is already registered.
    #[error("duplicate target name `{0}`")]
    DuplicateTarget(String),
    /// No layer with this name exists.
    #[error("unknown layer `{0}`")]
    UnknownLayer(String),
    /// A layer with this name is already registered.
    #[error("duplicate layer name `{0}`")]
    DuplicateLayer(String),
    /// A layer tried to cover a page whose base mapping was never saved.
    #[error("base mapping for page ${page:X} was not saved before layer `{layer}` covered it")]
    BaseMappingNotSaved {
        /// Layer name.
        layer: String,
        /// Page index lacking a snapshot.
        page: usize,
    },
    /// A base snapshot was requested while a layer is overriding the range.
    #[error("cannot save base mapping for page ${page:X}: layer `{layer}` is active over it")]
    LayerActiveOverRange {
        /// Active layer name.
        layer: String,
        /// Overridden page index.
        page: usize,
    },
    /// Trace ring capacity must be a non-zero power of two.
    #[error("trace capacity {0} is not a non-zero power of two")]
    InvalidTraceCapacity(usize),
    /// Composite sub-regions overlap or exceed the composite size.
    #[error("sub-region `{0}` overlaps another sub-region or exceeds the composite window")]
    InvalidSubRegion(String),
}
