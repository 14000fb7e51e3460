//! Bus targets and the owning arena that page entries index into.
//!
//! Page entries never hold references to targets; they hold a [`TargetId`]
//! into a [`TargetArena`]. Composite and split targets route to other arena
//! entries, so the arena resolves them down to a leaf (RAM, ROM or device)
//! before any byte is touched.

use std::fmt;

/// Composite and split targets.
pub mod composite;
/// Device-backed targets and the explicit device context.
pub mod device;
/// Plain RAM and ROM byte stores.
pub mod memory;

pub use composite::{CompositeTarget, SplitTarget, SubRegion};
pub use device::{DeviceContext, DeviceHandler, DeviceTarget, LayerCommand};
pub use memory::{RamTarget, RomTarget};

use crate::{BusError, FaultKind, TargetCaps};

/// Maximum composite/split indirections followed before giving up.
pub const MAX_TARGET_NESTING: usize = 8;

/// Index of a target inside a [`TargetArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TargetId(pub u32);

impl TargetId {
    /// Position in the arena's slot vector.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reasons a target refuses a byte access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetReject {
    /// Write to read-only storage without a debug bypass.
    ReadOnly,
    /// Offset falls into a gap or past the end of the target.
    Unbacked,
    /// The device does not support side-effect-free access.
    NoSideEffectFreePath,
    /// The device handler refused the access.
    Rejected,
    /// Composite/split chain exceeded [`MAX_TARGET_NESTING`] or was cyclic.
    NestingTooDeep,
}

impl TargetReject {
    /// Maps a target rejection onto the bus fault taxonomy.
    #[must_use]
    pub const fn fault_kind(self) -> FaultKind {
        match self {
            Self::ReadOnly => FaultKind::Permission,
            Self::Unbacked => FaultKind::Unmapped,
            Self::NoSideEffectFreePath | Self::Rejected | Self::NestingTooDeep => {
                FaultKind::DeviceFault
            }
        }
    }
}

/// Direction used when routing through split targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Reads, peeks and fetches.
    Read,
    /// Writes and pokes.
    Write,
}

/// Closed set of target kinds a page can point at.
pub enum BusTarget {
    /// Read/write byte store.
    Ram(RamTarget),
    /// Read-only byte store.
    Rom(RomTarget),
    /// Window subdivided into named sub-regions backed by other targets.
    Composite(CompositeTarget),
    /// Reads from one target, writes to another.
    Split(SplitTarget),
    /// Device handler with its own read/write semantics.
    Device(DeviceTarget),
}

impl BusTarget {
    /// Short kind name for listings.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Ram(_) => "ram",
            Self::Rom(_) => "rom",
            Self::Composite(_) => "composite",
            Self::Split(_) => "split",
            Self::Device(_) => "device",
        }
    }

    /// Composite introspection payload, when this is a composite target.
    #[must_use]
    pub const fn as_composite(&self) -> Option<&CompositeTarget> {
        match self {
            Self::Composite(composite) => Some(composite),
            Self::Ram(_) | Self::Rom(_) | Self::Split(_) | Self::Device(_) => None,
        }
    }
}

impl fmt::Debug for BusTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ram(ram) => f.debug_tuple("Ram").field(&ram.len()).finish(),
            Self::Rom(rom) => f.debug_tuple("Rom").field(&rom.len()).finish(),
            Self::Composite(composite) => f.debug_tuple("Composite").field(composite).finish(),
            Self::Split(split) => f.debug_tuple("Split").field(split).finish(),
            Self::Device(device) => f.debug_tuple("Device").field(device).finish(),
        }
    }
}

#[derive(Debug)]
struct TargetSlot {
    name: String,
    target: BusTarget,
}

/// Owning store of every target in the machine.
#[derive(Debug, Default)]
pub struct TargetArena {
    slots: Vec<TargetSlot>,
}

impl TargetArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a named target and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::DuplicateTarget`] when the name is taken.
    #[allow(clippy::cast_possible_truncation)]
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        target: BusTarget,
    ) -> Result<TargetId, BusError> {
        let name = name.into();
        if self.find(&name).is_some() {
            return Err(BusError::DuplicateTarget(name));
        }
        let id = TargetId(self.slots.len() as u32);
        self.slots.push(TargetSlot { name, target });
        Ok(id)
    }

    /// Number of targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` when no target has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Looks up a target by id.
    #[must_use]
    pub fn get(&self, id: TargetId) -> Option<&BusTarget> {
        self.slots.get(id.index()).map(|slot| &slot.target)
    }

    /// Looks up a target by id for mutation.
    #[must_use]
    pub fn get_mut(&mut self, id: TargetId) -> Option<&mut BusTarget> {
        self.slots.get_mut(id.index()).map(|slot| &mut slot.target)
    }

    /// Name a target was registered under.
    #[must_use]
    pub fn name(&self, id: TargetId) -> Option<&str> {
        self.slots.get(id.index()).map(|slot| slot.name.as_str())
    }

    /// Finds a target id by name.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn find(&self, name: &str) -> Option<TargetId> {
        self.slots
            .iter()
            .position(|slot| slot.name == name)
            .map(|index| TargetId(index as u32))
    }

    /// Iterates `(id, name, target)` in registration order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn iter(&self) -> impl Iterator<Item = (TargetId, &str, &BusTarget)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| (TargetId(index as u32), slot.name.as_str(), &slot.target))
    }

    /// Addressable size of a target in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownTarget`] for ids not in this arena.
    pub fn size(&self, id: TargetId) -> Result<u32, BusError> {
        self.size_at_depth(id, 0)
    }

    fn size_at_depth(&self, id: TargetId, depth: usize) -> Result<u32, BusError> {
        let target = self.get(id).ok_or(BusError::UnknownTarget(id))?;
        Ok(match target {
            BusTarget::Ram(ram) => ram.len(),
            BusTarget::Rom(rom) => rom.len(),
            BusTarget::Composite(composite) => composite.size(),
            BusTarget::Split(_) if depth >= MAX_TARGET_NESTING => 0,
            BusTarget::Split(split) => self
                .size_at_depth(split.read, depth + 1)?
                .min(self.size_at_depth(split.write, depth + 1)?),
            BusTarget::Device(device) => device.size(),
        })
    }

    /// Effective capabilities of a target, folding in composite children.
    ///
    /// Peek/poke/wide support is the intersection over children; side effects
    /// and timing sensitivity are the union.
    #[must_use]
    pub fn caps(&self, id: TargetId) -> TargetCaps {
        self.caps_at_depth(id, 0)
    }

    fn caps_at_depth(&self, id: TargetId, depth: usize) -> TargetCaps {
        if depth > MAX_TARGET_NESTING {
            return TargetCaps::empty();
        }
        let Some(target) = self.get(id) else {
            return TargetCaps::empty();
        };
        match target {
            BusTarget::Ram(_) | BusTarget::Rom(_) => TargetCaps::PLAIN_MEMORY,
            BusTarget::Device(device) => device.caps(),
            BusTarget::Split(split) => fold_caps([
                self.caps_at_depth(split.read, depth + 1),
                self.caps_at_depth(split.write, depth + 1),
            ]),
            BusTarget::Composite(composite) => fold_caps(
                composite
                    .sub_regions()
                    .iter()
                    .map(|sub| self.caps_at_depth(sub.target, depth + 1)),
            ),
        }
    }

    /// Composite sub-regions of a target, if it is a composite.
    #[must_use]
    pub fn sub_regions(&self, id: TargetId) -> Option<&[SubRegion]> {
        self.get(id)
            .and_then(BusTarget::as_composite)
            .map(CompositeTarget::sub_regions)
    }

    /// Follows composite and split indirections down to a leaf target.
    ///
    /// # Errors
    ///
    /// Returns [`TargetReject::Unbacked`] for gaps and unknown ids and
    /// [`TargetReject::NestingTooDeep`] for over-long or cyclic chains.
    pub fn resolve(
        &self,
        id: TargetId,
        offset: u32,
        direction: Direction,
    ) -> Result<(TargetId, u32), TargetReject> {
        let mut id = id;
        let mut offset = offset;
        for _ in 0..=MAX_TARGET_NESTING {
            match self.get(id).ok_or(TargetReject::Unbacked)? {
                BusTarget::Composite(composite) => {
                    (id, offset) = composite.route(offset).ok_or(TargetReject::Unbacked)?;
                }
                BusTarget::Split(split) => {
                    id = match direction {
                        Direction::Read => split.read,
                        Direction::Write => split.write,
                    };
                }
                BusTarget::Ram(_) | BusTarget::Rom(_) | BusTarget::Device(_) => {
                    return Ok((id, offset));
                }
            }
        }
        Err(TargetReject::NestingTooDeep)
    }

    /// Returns `true` when a write to `(id, offset)` would be refused as
    /// read-only before reaching any device handler.
    #[must_use]
    pub fn write_is_protected(&self, id: TargetId, offset: u32, bypass: bool) -> bool {
        if bypass {
            return false;
        }
        matches!(
            self.resolve(id, offset, Direction::Write)
                .ok()
                .and_then(|(leaf, _)| self.get(leaf)),
            Some(BusTarget::Rom(_))
        )
    }

    /// Side-effecting byte read.
    ///
    /// # Errors
    ///
    /// Returns the [`TargetReject`] raised while routing or by the leaf.
    pub fn read(
        &mut self,
        id: TargetId,
        offset: u32,
        ctx: &mut DeviceContext<'_>,
    ) -> Result<u8, TargetReject> {
        let (leaf, offset) = self.resolve(id, offset, Direction::Read)?;
        match self.get_mut(leaf).ok_or(TargetReject::Unbacked)? {
            BusTarget::Ram(ram) => ram.read(offset),
            BusTarget::Rom(rom) => rom.read(offset),
            BusTarget::Device(device) => device.read(offset, ctx),
            BusTarget::Composite(_) | BusTarget::Split(_) => Err(TargetReject::NestingTooDeep),
        }
    }

    /// Side-effect-free byte read.
    ///
    /// # Errors
    ///
    /// Returns [`TargetReject::NoSideEffectFreePath`] for devices that cannot
    /// peek, or any routing rejection.
    pub fn peek(&self, id: TargetId, offset: u32) -> Result<u8, TargetReject> {
        let (leaf, offset) = self.resolve(id, offset, Direction::Read)?;
        match self.get(leaf).ok_or(TargetReject::Unbacked)? {
            BusTarget::Ram(ram) => ram.read(offset),
            BusTarget::Rom(rom) => rom.read(offset),
            BusTarget::Device(device) => device.peek(offset),
            BusTarget::Composite(_) | BusTarget::Split(_) => Err(TargetReject::NestingTooDeep),
        }
    }

    /// Side-effecting byte write.
    ///
    /// # Errors
    ///
    /// Returns [`TargetReject::ReadOnly`] for ROM leaves, or any device or
    /// routing rejection.
    pub fn write(
        &mut self,
        id: TargetId,
        offset: u32,
        value: u8,
        ctx: &mut DeviceContext<'_>,
    ) -> Result<(), TargetReject> {
        let (leaf, offset) = self.resolve(id, offset, Direction::Write)?;
        match self.get_mut(leaf).ok_or(TargetReject::Unbacked)? {
            BusTarget::Ram(ram) => ram.write(offset, value),
            BusTarget::Rom(_) => Err(TargetReject::ReadOnly),
            BusTarget::Device(device) => device.write(offset, value, ctx),
            BusTarget::Composite(_) | BusTarget::Split(_) => Err(TargetReject::NestingTooDeep),
        }
    }

    /// Device leaf and leaf offset when all `bytes` write lanes from `offset`
    /// land on the same device in order.
    #[must_use]
    pub fn device_span(&self, id: TargetId, offset: u32, bytes: u32) -> Option<(TargetId, u32)> {
        let (leaf, base) = self.resolve(id, offset, Direction::Write).ok()?;
        if !matches!(self.get(leaf), Some(BusTarget::Device(_))) {
            return None;
        }
        (1..bytes)
            .all(|lane| {
                self.resolve(id, offset + lane, Direction::Write).ok() == Some((leaf, base + lane))
            })
            .then_some((leaf, base))
    }

    /// Side-effecting wide write handed to a device leaf as one call.
    ///
    /// # Errors
    ///
    /// Returns [`TargetReject::Unbacked`] when `leaf` is not a device, or the
    /// device's own rejection.
    pub fn write_device_wide(
        &mut self,
        leaf: TargetId,
        offset: u32,
        value: u32,
        bytes: u32,
        ctx: &mut DeviceContext<'_>,
    ) -> Result<(), TargetReject> {
        match self.get_mut(leaf).ok_or(TargetReject::Unbacked)? {
            BusTarget::Device(device) => device.write_wide(offset, value, bytes, ctx),
            _ => Err(TargetReject::Unbacked),
        }
    }

    /// Side-effect-free byte write. ROM leaves accept it only with `bypass`.
    ///
    /// # Errors
    ///
    /// Returns [`TargetReject::ReadOnly`] for ROM without bypass,
    /// [`TargetReject::NoSideEffectFreePath`] for devices that cannot poke,
    /// or any routing rejection.
    pub fn poke(
        &mut self,
        id: TargetId,
        offset: u32,
        value: u8,
        bypass: bool,
    ) -> Result<(), TargetReject> {
        let (leaf, offset) = self.resolve(id, offset, Direction::Write)?;
        match self.get_mut(leaf).ok_or(TargetReject::Unbacked)? {
            BusTarget::Ram(ram) => ram.write(offset, value),
            BusTarget::Rom(rom) if bypass => rom.patch(offset, value),
            BusTarget::Rom(_) => Err(TargetReject::ReadOnly),
            BusTarget::Device(device) => device.poke(offset, value),
            BusTarget::Composite(_) | BusTarget::Split(_) => Err(TargetReject::NestingTooDeep),
        }
    }
}

fn fold_caps(children: impl IntoIterator<Item = TargetCaps>) -> TargetCaps {
    let shared = TargetCaps::PLAIN_MEMORY;
    let sticky = TargetCaps::HAS_SIDE_EFFECTS | TargetCaps::TIMING_SENSITIVE;
    let (intersection, union) = children
        .into_iter()
        .fold((shared, TargetCaps::empty()), |(both, any), caps| {
            (both & caps, any | (caps & sticky))
        });
    intersection | union
}
