//! Paged address-space bus for 8-bit machine emulation.
//!
//! A [`Bus`] owns a flat [`PageTable`] over an arena of [`BusTarget`]s.
//! Overlay layers ([`LayerManager`]) temporarily remap page ranges by
//! priority, devices talk back to the bus through an explicit
//! [`DeviceContext`], and every access can be mirrored into a bounded
//! [`TraceRing`].

/// Page permissions, target capabilities and region classification.
pub mod perms;
pub use perms::{PagePerms, RegionTag, TargetCaps};

/// Bus fault taxonomy and per-access results.
pub mod fault;
pub use fault::{BusFault, BusResult, BusResultExt, FaultKind, OPEN_BUS_VALUE};

/// Configuration errors raised while building or remapping the bus.
pub mod error;
pub use error::BusError;

/// Access descriptors and validation helpers.
pub mod access;
pub use access::{
    validate_alignment, validate_permission, AccessFlags, AccessIntent, AccessMode, AccessWidth,
    BusAccess, SourceId,
};

/// Bus targets and the arena page entries index into.
pub mod target;
pub use target::{
    BusTarget, CompositeTarget, DeviceContext, DeviceHandler, DeviceTarget, Direction,
    LayerCommand, RamTarget, RomTarget, SplitTarget, SubRegion, TargetArena, TargetId,
    TargetReject, MAX_TARGET_NESTING,
};

/// Address geometry and the flat page table.
pub mod page_table;
pub use page_table::{
    Geometry, PageEntry, PageTable, DEFAULT_ADDRESS_BITS, DEFAULT_PAGE_SHIFT, MAX_ADDRESS_BITS,
    MAX_PAGE_COUNT, MIN_PAGE_SHIFT,
};

/// Priority-ordered overlay layers.
pub mod layers;
pub use layers::{LayerId, LayerManager, LayerMapping, OverlayLayer};

/// Bounded device-to-host notification queue.
pub mod notify;
pub use notify::{
    DeviceNotification, NotificationKind, NotificationQueue, DEFAULT_NOTIFICATION_CAPACITY,
};

/// Fixed-capacity access trace ring.
pub mod trace;
pub use trace::{TraceRecord, TraceRing, TraceSink};

/// Bus dispatch: page lookup, permission checks and target routing.
pub mod bus;
pub use bus::{Bus, CompositeRegionView, DecomposedRead, DecomposedWrite, RangeMapping};

/// Structured 20-bit device page identifiers.
pub mod device_id;
pub use device_id::{DeviceClass, DevicePageId, DEVICE_PAGE_ID_BITS};

/// Device metadata registry.
pub mod registry;
pub use registry::{DeviceInfo, DeviceRegistry, RegistryError};

/// Soft-switch tables and the device that executes them.
pub mod soft_switch;
pub use soft_switch::{SoftSwitchDevice, SoftSwitchTable, SwitchAction, SwitchEntry};

/// Declarative machine profiles and bus construction from them.
pub mod profile;
pub use profile::{
    BackingSpec, MachineProfile, ProfileError, RegionKind, RegionSpec, SubRegionSpec,
};

/// Run/pause/halt control and the threaded machine driver.
pub mod run_control;
pub use run_control::{
    run_until_stopped, InstructionStepper, Machine, MachineError, RunControl, RunOutcome,
    RunState, StepOutcome, StopReason,
};

/// Memory dumps and region listings for tooling.
pub mod dump;
pub use dump::{FaultRun, MemoryDump, RegionListing, RegionRow, DUMP_ROW_BYTES};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
