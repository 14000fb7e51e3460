//! The bus: single entry point for every access into the address space.
//!
//! Dispatch order for one access is page lookup, permission check, atomic
//! alignment/width check, then delegation to the arena target. Debug intents
//! and the `NO_SIDE_EFFECTS` flag always take the peek/poke path. Device
//! layer commands queued during an access are applied before it returns.

use std::ops::Range;

use crate::access::{validate_alignment, validate_permission};
use crate::target::{DeviceContext, Direction, LayerCommand, TargetReject};
use crate::{
    AccessFlags, AccessIntent, AccessMode, AccessWidth, BusAccess, BusError, BusFault, BusResult,
    BusTarget, DeviceNotification, FaultKind, Geometry, LayerId, LayerManager, LayerMapping,
    NotificationQueue, PageEntry, PagePerms, PageTable, RegionTag, TargetArena, TargetCaps,
    TargetId, TraceRecord, TraceRing, TraceSink, OPEN_BUS_VALUE,
};

/// Base mapping applied to a page-aligned address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RangeMapping {
    /// Target answering the range.
    pub target: TargetId,
    /// Permissions for every page in the range.
    pub perms: PagePerms,
    /// Region classification.
    pub region: RegionTag,
    /// Offset within the target answering the first byte.
    pub target_offset: u32,
    /// Hot-path device id, `0` for plain memory.
    pub device_id: u32,
    /// Capability override; `None` derives caps from the target.
    pub caps: Option<TargetCaps>,
}

impl RangeMapping {
    /// Maps `target` from its first byte.
    #[must_use]
    pub const fn new(target: TargetId, perms: PagePerms, region: RegionTag) -> Self {
        Self {
            target,
            perms,
            region,
            target_offset: 0,
            device_id: 0,
            caps: None,
        }
    }

    /// Starts the mapping at `target_offset` within the target.
    #[must_use]
    pub const fn with_target_offset(mut self, target_offset: u32) -> Self {
        self.target_offset = target_offset;
        self
    }

    /// Stamps a device id on the pages.
    #[must_use]
    pub const fn with_device(mut self, device_id: u32) -> Self {
        self.device_id = device_id;
        self
    }

    /// Overrides the capabilities derived from the target.
    #[must_use]
    pub const fn with_caps(mut self, caps: TargetCaps) -> Self {
        self.caps = Some(caps);
        self
    }
}

/// Per-byte outcome of a decomposed read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecomposedRead {
    address: u32,
    bytes: Vec<BusResult<u8>>,
}

impl DecomposedRead {
    /// Address of the first byte.
    #[must_use]
    pub const fn address(&self) -> u32 {
        self.address
    }

    /// One result per requested byte, in address order.
    #[must_use]
    pub fn bytes(&self) -> &[BusResult<u8>] {
        &self.bytes
    }

    /// Faults raised by individual bytes.
    pub fn faults(&self) -> impl Iterator<Item = &BusFault> + '_ {
        self.bytes.iter().filter_map(|byte| byte.as_ref().err())
    }

    /// Returns `true` when every byte succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.bytes.iter().all(Result::is_ok)
    }

    /// Little-endian value of the first four bytes, or the first fault.
    ///
    /// # Errors
    ///
    /// Returns the first [`BusFault`] raised by any byte.
    pub fn value(&self) -> BusResult<u32> {
        if let Some(fault) = self.faults().next() {
            return Err(*fault);
        }
        Ok(self.open_bus_value())
    }

    /// Little-endian value of the first four bytes with faulted bytes read
    /// as [`OPEN_BUS_VALUE`].
    #[must_use]
    pub fn open_bus_value(&self) -> u32 {
        (0_u32..)
            .zip(self.bytes.iter().take(4))
            .fold(0, |value, (lane, byte)| {
                value | (u32::from(*byte.as_ref().unwrap_or(&OPEN_BUS_VALUE)) << (lane * 8))
            })
    }
}

/// Per-byte outcome of a decomposed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecomposedWrite {
    address: u32,
    results: Vec<BusResult<()>>,
}

impl DecomposedWrite {
    /// Address of the first byte.
    #[must_use]
    pub const fn address(&self) -> u32 {
        self.address
    }

    /// One result per byte, in address order.
    #[must_use]
    pub fn results(&self) -> &[BusResult<()>] {
        &self.results
    }

    /// Faults raised by individual bytes.
    pub fn faults(&self) -> impl Iterator<Item = &BusFault> + '_ {
        self.results.iter().filter_map(|result| result.as_ref().err())
    }

    /// Returns `true` when every byte was stored.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(Result::is_ok)
    }

    /// Collapses the outcome to the first fault.
    ///
    /// # Errors
    ///
    /// Returns the first [`BusFault`] raised by any byte.
    pub fn first_fault(&self) -> BusResult<()> {
        self.faults().next().map_or(Ok(()), |fault| Err(*fault))
    }
}

/// Composite sub-region placed at its absolute address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CompositeRegionView {
    /// Absolute address of the first byte.
    pub start: u32,
    /// Length in bytes.
    pub size: u32,
    /// Sub-region label.
    pub label: String,
    /// Classification of the backing store.
    pub region: RegionTag,
    /// Backing arena target.
    pub target: TargetId,
    /// Name the backing target was registered under.
    pub target_name: String,
}

#[derive(Debug, Clone, Copy)]
struct Resolved {
    target: TargetId,
    offset: u32,
    entry: PageEntry,
}

/// Paged address-space bus.
#[derive(Debug)]
pub struct Bus {
    table: PageTable,
    arena: TargetArena,
    layers: LayerManager,
    notifications: NotificationQueue,
    pending_layer_commands: Vec<LayerCommand>,
    trace: Option<TraceRing>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(Geometry::default())
    }
}

impl Bus {
    /// Creates a bus with every page unmapped.
    #[must_use]
    pub fn new(geometry: Geometry) -> Self {
        let table = PageTable::new(geometry);
        let layers = LayerManager::new(table.page_count());
        Self {
            table,
            arena: TargetArena::new(),
            layers,
            notifications: NotificationQueue::default(),
            pending_layer_commands: Vec::new(),
            trace: None,
        }
    }

    /// Address-space geometry.
    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.table.geometry()
    }

    /// Number of pages.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.table.page_count()
    }

    /// log2 of the page size.
    #[must_use]
    pub const fn page_shift(&self) -> u8 {
        self.table.page_shift()
    }

    /// Winning entry for page `index`, layers included.
    ///
    /// # Panics
    ///
    /// Panics when `index >= page_count()`.
    #[must_use]
    pub fn page_entry(&self, index: usize) -> &PageEntry {
        self.table.page_entry(index)
    }

    /// The live page table.
    #[must_use]
    pub const fn page_table(&self) -> &PageTable {
        &self.table
    }

    /// The target arena.
    #[must_use]
    pub const fn arena(&self) -> &TargetArena {
        &self.arena
    }

    /// Registers a named target.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::DuplicateTarget`] when the name is taken.
    pub fn add_target(
        &mut self,
        name: impl Into<String>,
        target: BusTarget,
    ) -> Result<TargetId, BusError> {
        self.arena.insert(name, target)
    }

    /// Finds a target by name.
    #[must_use]
    pub fn target_id(&self, name: &str) -> Option<TargetId> {
        self.arena.find(name)
    }

    /// Points every page of `[start, start + len)` at `mapping`.
    ///
    /// Pages with a saved base snapshot have the snapshot updated; their live
    /// entry only changes when no active layer overrides them.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnalignedRange`], [`BusError::RangeOutOfBounds`]
    /// when the range leaves the address space or the target, or
    /// [`BusError::UnknownTarget`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn map_range(&mut self, start: u32, len: u32, mapping: RangeMapping) -> Result<(), BusError> {
        let pages = self.page_range(start, len)?;
        let target_size = self.arena.size(mapping.target)?;
        if u64::from(mapping.target_offset) + u64::from(len) > u64::from(target_size) {
            return Err(BusError::RangeOutOfBounds {
                start: mapping.target_offset,
                len,
            });
        }
        let caps = mapping
            .caps
            .unwrap_or_else(|| self.arena.caps(mapping.target));
        let page_size = self.geometry().page_size();
        for (step, page) in pages.enumerate() {
            let entry = PageEntry {
                target: Some(mapping.target),
                perms: mapping.perms,
                caps,
                region: mapping.region,
                physical_base: mapping.target_offset + step as u32 * page_size,
                device_id: mapping.device_id,
            };
            self.layers.set_base_entry(&mut self.table, page, entry);
        }
        Ok(())
    }

    /// Resets every page of `[start, start + len)` to unmapped.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnalignedRange`] or [`BusError::RangeOutOfBounds`].
    pub fn unmap_range(&mut self, start: u32, len: u32) -> Result<(), BusError> {
        for page in self.page_range(start, len)? {
            self.layers
                .set_base_entry(&mut self.table, page, PageEntry::UNMAPPED);
        }
        Ok(())
    }

    fn page_range(&self, start: u32, len: u32) -> Result<Range<usize>, BusError> {
        let geometry = self.geometry();
        if len == 0 || !geometry.is_page_aligned(start) || !geometry.is_page_aligned(len) {
            return Err(BusError::UnalignedRange { start, len });
        }
        if u64::from(start) + u64::from(len) > geometry.space_size() {
            return Err(BusError::RangeOutOfBounds { start, len });
        }
        let shift = geometry.page_shift();
        let first = (start >> shift) as usize;
        Ok(first..first + (len >> shift) as usize)
    }

    /// The overlay layer manager.
    #[must_use]
    pub const fn layers(&self) -> &LayerManager {
        &self.layers
    }

    /// Registers an inactive overlay layer.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::DuplicateLayer`] when the name is taken.
    pub fn create_layer(
        &mut self,
        name: impl Into<String>,
        priority: i32,
    ) -> Result<LayerId, BusError> {
        self.layers.create_layer(name, priority)
    }

    /// Finds a layer by name.
    #[must_use]
    pub fn layer_id(&self, name: &str) -> Option<LayerId> {
        self.layers.layer_id(name)
    }

    /// Snapshots the base mapping of `page_count` pages from `start_page`.
    ///
    /// # Errors
    ///
    /// See [`LayerManager::save_base_mapping_range`].
    pub fn save_base_mapping_range(
        &mut self,
        start_page: usize,
        page_count: usize,
    ) -> Result<(), BusError> {
        self.layers
            .save_base_mapping_range(&self.table, start_page, page_count)
    }

    /// Activates a layer by name.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownLayer`] or [`BusError::BaseMappingNotSaved`].
    pub fn activate_layer(&mut self, name: &str) -> Result<(), BusError> {
        let id = self.named_layer(name)?;
        self.layers.activate(&mut self.table, id)
    }

    /// Deactivates a layer by name, restoring the saved base mapping.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownLayer`].
    pub fn deactivate_layer(&mut self, name: &str) -> Result<(), BusError> {
        let id = self.named_layer(name)?;
        self.layers.deactivate(&mut self.table, id)
    }

    /// Activates a layer by id.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownLayer`] or [`BusError::BaseMappingNotSaved`].
    pub fn activate_layer_by_id(&mut self, id: LayerId) -> Result<(), BusError> {
        self.layers.activate(&mut self.table, id)
    }

    /// Deactivates a layer by id.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownLayer`].
    pub fn deactivate_layer_by_id(&mut self, id: LayerId) -> Result<(), BusError> {
        self.layers.deactivate(&mut self.table, id)
    }

    /// Replaces the mapping of a named layer.
    ///
    /// # Errors
    ///
    /// See [`LayerManager::update_mapping`].
    pub fn update_layer_mapping(
        &mut self,
        name: &str,
        mapping: LayerMapping,
    ) -> Result<(), BusError> {
        let id = self.named_layer(name)?;
        self.layers
            .update_mapping(&mut self.table, &self.arena, id, mapping)
    }

    /// Returns `true` when the named layer exists and is active.
    #[must_use]
    pub fn is_layer_active(&self, name: &str) -> bool {
        self.layers.is_layer_active(name)
    }

    fn named_layer(&self, name: &str) -> Result<LayerId, BusError> {
        self.layers
            .layer_id(name)
            .ok_or_else(|| BusError::UnknownLayer(name.to_owned()))
    }

    /// Performs a read and returns its value or fault.
    ///
    /// # Errors
    ///
    /// Returns the [`BusFault`] that prevented the read. In decomposed mode
    /// every byte is still attempted and the first fault is reported.
    pub fn try_read(&mut self, access: &BusAccess) -> BusResult<u32> {
        match access.mode {
            AccessMode::Atomic => self.read_atomic(access),
            AccessMode::Decomposed => self
                .try_read_decomposed(access, access.width.bytes())
                .value(),
        }
    }

    /// Performs a write.
    ///
    /// # Errors
    ///
    /// Returns the [`BusFault`] that prevented the write. Atomic writes store
    /// nothing on fault; decomposed writes store every byte that can be
    /// stored and report the first fault.
    #[allow(clippy::cast_possible_truncation)]
    pub fn try_write(&mut self, access: &BusAccess) -> BusResult<()> {
        match access.mode {
            AccessMode::Atomic => self.write_atomic(access),
            AccessMode::Decomposed => {
                let bytes: Vec<u8> = (0..access.width.bytes())
                    .map(|lane| (access.value >> (lane * 8)) as u8)
                    .collect();
                self.try_write_decomposed(access, &bytes).first_fault()
            }
        }
    }

    /// Reads `len` bytes from `access.address` as independent byte
    /// transactions sharing the access's intent, source and flags.
    ///
    /// A fault on one byte never stops the walk.
    #[allow(clippy::cast_possible_truncation)]
    pub fn try_read_decomposed(&mut self, access: &BusAccess, len: u32) -> DecomposedRead {
        let bytes = (0..len)
            .map(|index| {
                let lane = access.byte_lane(index);
                self.read_atomic(&lane).map(|value| (value & 0xFF) as u8)
            })
            .collect();
        DecomposedRead {
            address: access.address,
            bytes,
        }
    }

    /// Writes `bytes` from `access.address` as independent byte transactions.
    ///
    /// Every byte is attempted even after an earlier byte faulted.
    pub fn try_write_decomposed(&mut self, access: &BusAccess, bytes: &[u8]) -> DecomposedWrite {
        let results = (0_u32..)
            .zip(bytes)
            .map(|(index, byte)| {
                let lane = access.byte_lane(index).with_value(u32::from(*byte));
                self.write_atomic(&lane)
            })
            .collect();
        DecomposedWrite {
            address: access.address,
            results,
        }
    }

    /// Hot-path CPU byte read; faults read as [`OPEN_BUS_VALUE`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_u8(&mut self, address: u32) -> u8 {
        self.read_atomic(&BusAccess::read(address))
            .map_or(OPEN_BUS_VALUE, |value| (value & 0xFF) as u8)
    }

    /// Hot-path CPU byte write; faults are dropped.
    pub fn write_u8(&mut self, address: u32, value: u8) {
        let _ = self.write_atomic(&BusAccess::write(address, value));
    }

    /// Hot-path CPU read of `width_bits`, little-endian, decomposed per byte.
    /// Faulted bytes read as [`OPEN_BUS_VALUE`].
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidWidth`] for widths other than 8, 16 or 32.
    pub fn read(&mut self, address: u32, width_bits: u8) -> Result<u32, BusError> {
        let width = AccessWidth::from_bits(width_bits)?;
        let access = BusAccess::read(address)
            .with_width(width)
            .with_mode(AccessMode::Decomposed);
        Ok(self
            .try_read_decomposed(&access, width.bytes())
            .open_bus_value())
    }

    /// Hot-path CPU write of `width_bits`, little-endian, decomposed per byte.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidWidth`] for widths other than 8, 16 or 32.
    pub fn write(&mut self, address: u32, width_bits: u8, value: u32) -> Result<(), BusError> {
        let width = AccessWidth::from_bits(width_bits)?;
        let access = BusAccess::new(address, AccessIntent::DataWrite)
            .with_width(width)
            .with_mode(AccessMode::Decomposed)
            .with_value(value & width.value_mask());
        let _ = self.try_write(&access);
        Ok(())
    }

    /// Side-effect-free tooling read of one byte.
    ///
    /// # Errors
    ///
    /// Returns the [`BusFault`] raised by the read.
    #[allow(clippy::cast_possible_truncation)]
    pub fn peek_u8(&mut self, address: u32) -> BusResult<u8> {
        self.read_atomic(&BusAccess::debug_read(address))
            .map(|value| (value & 0xFF) as u8)
    }

    /// Side-effect-free tooling write of one byte; patches ROM.
    ///
    /// # Errors
    ///
    /// Returns the [`BusFault`] raised by the write.
    pub fn poke_u8(&mut self, address: u32, value: u8) -> BusResult<()> {
        self.write_atomic(&BusAccess::debug_write(address, value))
    }

    fn resolve(&self, access: &BusAccess) -> BusResult<Resolved> {
        let Some((entry, offset)) = self.table.lookup(access.address) else {
            return Err(BusFault::unmapped(access.address));
        };
        let entry = *entry;
        let fault = |kind: FaultKind| BusFault::new(kind, entry.region, access.address);
        let target = entry.target.ok_or_else(|| fault(FaultKind::Unmapped))?;
        validate_permission(entry.perms, access.intent).map_err(fault)?;
        if access.width != AccessWidth::Byte {
            validate_alignment(access.address, access.width).map_err(fault)?;
            if !entry.caps.contains(TargetCaps::SUPPORTS_WIDE) {
                return Err(fault(FaultKind::DeviceFault));
            }
        }
        Ok(Resolved {
            target,
            offset,
            entry,
        })
    }

    fn read_atomic(&mut self, access: &BusAccess) -> BusResult<u32> {
        let result = self.resolve(access).and_then(|resolved| {
            let mut value = 0;
            for lane in 0..access.width.bytes() {
                let byte = self
                    .read_target(access, resolved, resolved.offset + lane)
                    .map_err(|reject| reject_fault(reject, resolved, access))?;
                value |= u32::from(byte) << (lane * 8);
            }
            Ok(value)
        });
        self.apply_layer_commands();
        self.record(access, *result.as_ref().unwrap_or(&0), result.as_ref().err().copied());
        result
    }

    fn write_atomic(&mut self, access: &BusAccess) -> BusResult<()> {
        let result = self
            .resolve(access)
            .and_then(|resolved| self.write_resolved(access, resolved));
        self.apply_layer_commands();
        self.record(
            access,
            access.value & access.width.value_mask(),
            result.as_ref().err().copied(),
        );
        result
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_resolved(&mut self, access: &BusAccess, resolved: Resolved) -> BusResult<()> {
        let bytes = access.width.bytes();
        let bypass = access.intent == AccessIntent::DebugWrite;
        if bytes > 1 {
            for lane in 0..bytes {
                let offset = resolved.offset + lane;
                if self.arena.write_is_protected(resolved.target, offset, bypass) {
                    return Err(reject_fault(TargetReject::ReadOnly, resolved, access));
                }
                self.arena
                    .resolve(resolved.target, offset, Direction::Write)
                    .map_err(|reject| reject_fault(reject, resolved, access))?;
            }
            if !access.suppresses_side_effects() {
                if let Some((leaf, offset)) =
                    self.arena.device_span(resolved.target, resolved.offset, bytes)
                {
                    let mut ctx = DeviceContext::new(
                        access.cycle,
                        access.source,
                        resolved.entry.device_id,
                        &mut self.pending_layer_commands,
                        &mut self.notifications,
                    );
                    let value = access.value & access.width.value_mask();
                    return self
                        .arena
                        .write_device_wide(leaf, offset, value, bytes, &mut ctx)
                        .map_err(|reject| reject_fault(reject, resolved, access));
                }
            }
        }
        for lane in 0..bytes {
            let byte = (access.value >> (lane * 8)) as u8;
            self.write_target(access, resolved, resolved.offset + lane, byte)
                .map_err(|reject| reject_fault(reject, resolved, access))?;
        }
        Ok(())
    }

    fn read_target(
        &mut self,
        access: &BusAccess,
        resolved: Resolved,
        offset: u32,
    ) -> Result<u8, TargetReject> {
        if access.suppresses_side_effects() {
            return self.arena.peek(resolved.target, offset);
        }
        let mut ctx = DeviceContext::new(
            access.cycle,
            access.source,
            resolved.entry.device_id,
            &mut self.pending_layer_commands,
            &mut self.notifications,
        );
        self.arena.read(resolved.target, offset, &mut ctx)
    }

    fn write_target(
        &mut self,
        access: &BusAccess,
        resolved: Resolved,
        offset: u32,
        value: u8,
    ) -> Result<(), TargetReject> {
        if access.suppresses_side_effects() {
            let bypass = access.intent == AccessIntent::DebugWrite;
            return self.arena.poke(resolved.target, offset, value, bypass);
        }
        let mut ctx = DeviceContext::new(
            access.cycle,
            access.source,
            resolved.entry.device_id,
            &mut self.pending_layer_commands,
            &mut self.notifications,
        );
        self.arena.write(resolved.target, offset, value, &mut ctx)
    }

    fn apply_layer_commands(&mut self) {
        if self.pending_layer_commands.is_empty() {
            return;
        }
        let mut commands = std::mem::take(&mut self.pending_layer_commands);
        for command in commands.drain(..) {
            let outcome = match command {
                LayerCommand::Activate(id) => self.layers.activate(&mut self.table, id),
                LayerCommand::Deactivate(id) => self.layers.deactivate(&mut self.table, id),
            };
            if let Err(error) = outcome {
                tracing::warn!(%error, ?command, "device layer command failed");
            }
        }
        self.pending_layer_commands = commands;
    }

    fn record(&mut self, access: &BusAccess, value: u32, fault: Option<BusFault>) {
        if let Some(fault) = fault {
            tracing::trace!(
                address = fault.address,
                kind = fault.kind.label(),
                intent = access.intent.as_str(),
                "bus fault"
            );
        }
        if access.flags.contains(AccessFlags::NO_TRACE) {
            return;
        }
        let (region, device_id) = self
            .table
            .lookup(access.address)
            .map_or((RegionTag::Invalid, 0), |(entry, _)| {
                (entry.region, entry.device_id)
            });
        if let Some(ring) = self.trace.as_mut() {
            ring.on_access(TraceRecord {
                cycle: access.cycle,
                address: access.address,
                value,
                width_bits: access.width.bits(),
                intent: access.intent,
                flags: access.flags,
                source: access.source,
                device_id,
                region,
                fault: fault.map(|fault| fault.kind),
            });
        }
    }

    /// Pending device notifications.
    #[must_use]
    pub const fn notifications(&self) -> &NotificationQueue {
        &self.notifications
    }

    /// Removes and returns every pending device notification in order.
    pub fn drain_notifications(&mut self) -> Vec<DeviceNotification> {
        self.notifications.drain().collect()
    }

    /// Starts recording accesses into a fresh ring of `capacity` records.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidTraceCapacity`] unless `capacity` is a
    /// non-zero power of two.
    pub fn enable_trace(&mut self, capacity: usize) -> Result<(), BusError> {
        self.trace = Some(TraceRing::with_capacity(capacity)?);
        Ok(())
    }

    /// Stops recording and hands back the ring, if one was active.
    pub fn disable_trace(&mut self) -> Option<TraceRing> {
        self.trace.take()
    }

    /// The active trace ring.
    #[must_use]
    pub const fn trace(&self) -> Option<&TraceRing> {
        self.trace.as_ref()
    }

    /// Sub-regions of the composite answering page `index`, placed at
    /// absolute addresses. Empty when the page is not composite-backed.
    #[must_use]
    pub fn composite_sub_regions(&self, index: usize) -> Vec<CompositeRegionView> {
        let Some(entry) = self.table.get(index) else {
            return Vec::new();
        };
        let Some(sub_regions) = entry.target.and_then(|id| self.arena.sub_regions(id)) else {
            return Vec::new();
        };
        let origin = self
            .geometry()
            .page_base(index)
            .wrapping_sub(entry.physical_base);
        sub_regions
            .iter()
            .map(|sub| CompositeRegionView {
                start: origin.wrapping_add(sub.offset),
                size: sub.size,
                label: sub.label.clone(),
                region: sub.region,
                target: sub.target,
                target_name: self.arena.name(sub.target).unwrap_or_default().to_owned(),
            })
            .collect()
    }
}

const fn reject_fault(reject: TargetReject, resolved: Resolved, access: &BusAccess) -> BusFault {
    BusFault::new(reject.fault_kind(), resolved.entry.region, access.address)
}

#[cfg(test)]
mod tests {
    use super::{Bus, RangeMapping};
    use crate::{
        AccessFlags, AccessIntent, AccessMode, AccessWidth, BusAccess, BusError, BusResultExt,
        BusTarget, FaultKind, PagePerms, RamTarget, RegionTag, RomTarget, OPEN_BUS_VALUE,
    };

    fn bus() -> Bus {
        let mut bus = Bus::default();
        let ram = bus
            .add_target("ram", BusTarget::Ram(RamTarget::new(0x1000)))
            .expect("ram");
        let rom = bus
            .add_target("rom", BusTarget::Rom(RomTarget::filled(0x100, 0x60)))
            .expect("rom");
        bus.map_range(0x0000, 0x1000, RangeMapping::new(ram, PagePerms::RWX, RegionTag::Ram))
            .expect("map ram");
        bus.map_range(0xFF00, 0x100, RangeMapping::new(rom, PagePerms::RX, RegionTag::Rom))
            .expect("map rom");
        bus
    }

    #[test]
    fn atomic_word_roundtrip_is_little_endian() {
        let mut bus = bus();
        let write = BusAccess::new(0x200, AccessIntent::DataWrite)
            .with_width(AccessWidth::Word)
            .with_value(0x1122_3344);
        assert_eq!(bus.try_write(&write), Ok(()));
        assert_eq!(bus.read_u8(0x200), 0x44);
        assert_eq!(bus.read_u8(0x203), 0x11);
        let read = BusAccess::read(0x200).with_width(AccessWidth::Word);
        assert_eq!(bus.try_read(&read), Ok(0x1122_3344));
    }

    #[test]
    fn misaligned_atomic_access_faults() {
        let mut bus = bus();
        let read = BusAccess::read(0x201).with_width(AccessWidth::Half);
        assert_eq!(bus.try_read(&read).fault_kind(), Some(FaultKind::Misaligned));
        let decomposed = read.with_mode(AccessMode::Decomposed);
        assert_eq!(bus.try_read(&decomposed), Ok(0));
    }

    #[test]
    fn fetch_from_non_executable_page_is_nx() {
        let mut bus = bus();
        let ram = bus.target_id("ram").expect("ram");
        bus.map_range(0x0000, 0x100, RangeMapping::new(ram, PagePerms::RW, RegionTag::Ram))
            .expect("remap");
        assert_eq!(
            bus.try_read(&BusAccess::fetch(0x10)).fault_kind(),
            Some(FaultKind::Nx)
        );
        assert_eq!(bus.try_read(&BusAccess::fetch(0xFF00)), Ok(0x60));
    }

    #[test]
    fn hot_path_read_uses_open_bus_for_unmapped_bytes() {
        let mut bus = bus();
        bus.write_u8(0x0FFF, 0xAB);
        assert_eq!(bus.read(0x0FFF, 16), Ok(0xFFAB));
        assert_eq!(bus.read_u8(0x8000), OPEN_BUS_VALUE);
        assert_eq!(bus.read(0, 12), Err(BusError::InvalidWidth(12)));
        assert_eq!(bus.write(0, 24, 0), Err(BusError::InvalidWidth(24)));
    }

    #[test]
    fn atomic_write_across_rom_stores_nothing() {
        let mut bus = bus();
        let rom = bus.target_id("rom").expect("rom");
        let ram = bus.target_id("ram").expect("ram");
        bus.map_range(0x100, 0x100, RangeMapping::new(rom, PagePerms::RWX, RegionTag::Rom))
            .expect("writable rom page");
        bus.map_range(0x200, 0x100, RangeMapping::new(ram, PagePerms::RWX, RegionTag::Ram))
            .expect("ram page");
        let write = BusAccess::new(0x100, AccessIntent::DataWrite)
            .with_width(AccessWidth::Half)
            .with_value(0xBEEF);
        assert_eq!(
            bus.try_write(&write).fault_kind(),
            Some(FaultKind::Permission)
        );
        assert_eq!(bus.peek_u8(0x100), Ok(0x60));
        assert_eq!(bus.poke_u8(0x100, 0x11), Ok(()));
        assert_eq!(bus.peek_u8(0x100), Ok(0x11));
    }

    #[test]
    fn no_trace_flag_skips_recording() {
        let mut bus = bus();
        bus.enable_trace(4).expect("trace");
        bus.read_u8(0);
        let quiet = BusAccess::read(1).with_flags(AccessFlags::NO_TRACE);
        assert_eq!(bus.try_read(&quiet), Ok(0));
        let trace = bus.trace().expect("enabled");
        assert_eq!(trace.len(), 1);
        assert_eq!(trace.iter().next().map(|r| r.address), Some(0));
        assert!(bus.disable_trace().is_some());
        assert!(bus.trace().is_none());
    }

    #[test]
    fn map_range_validates_alignment_and_bounds() {
        let mut bus = bus();
        let ram = bus.target_id("ram").expect("ram");
        let mapping = RangeMapping::new(ram, PagePerms::RW, RegionTag::Ram);
        assert!(matches!(
            bus.map_range(0x80, 0x100, mapping),
            Err(BusError::UnalignedRange { .. })
        ));
        assert!(matches!(
            bus.map_range(0xFF00, 0x200, mapping),
            Err(BusError::RangeOutOfBounds { .. })
        ));
        assert!(matches!(
            bus.map_range(0x2000, 0x2000, mapping),
            Err(BusError::RangeOutOfBounds { .. })
        ));
        bus.unmap_range(0x0000, 0x100).expect("unmap");
        assert_eq!(
            bus.try_read(&BusAccess::read(0x10)).fault_kind(),
            Some(FaultKind::Unmapped)
        );
    }

    #[test]
    fn map_range_under_active_layer_updates_snapshot_only() {
        let mut bus = bus();
        let ram = bus.target_id("ram").expect("ram");
        let rom = bus.target_id("rom").expect("rom");
        bus.save_base_mapping_range(0xFF, 1).expect("save");
        bus.create_layer("shadow", 0).expect("layer");
        bus.update_layer_mapping(
            "shadow",
            crate::LayerMapping::new(0xFF00, ram, PagePerms::RW).with_window(0, 0x100),
        )
        .expect("mapping");
        bus.activate_layer("shadow").expect("activate");

        bus.map_range(0xFF00, 0x100, RangeMapping::new(rom, PagePerms::READ, RegionTag::Rom))
            .expect("remap base");
        assert_eq!(bus.page_entry(0xFF).target, Some(ram));

        bus.deactivate_layer("shadow").expect("deactivate");
        assert_eq!(bus.page_entry(0xFF).target, Some(rom));
        assert_eq!(bus.page_entry(0xFF).perms, PagePerms::READ);
    }
}
