//! Priority-ordered overlay layers over the base page mapping.
//!
//! A layer temporarily takes over a contiguous page range. The manager keeps
//! a snapshot of the base entries for every page a layer may cover, so that
//! deactivation restores the prior mapping exactly.
//!
//! When several active layers cover one page the layer with the highest
//! priority wins; equal priorities go to the layer created first.

use std::fmt;
use std::ops::Range;

use crate::{BusError, PageEntry, PagePerms, PageTable, RegionTag, TargetArena, TargetId};

/// Index of a layer inside its [`LayerManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LayerId(pub u16);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Where an active layer redirects its pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LayerMapping {
    /// First covered byte address; must be page aligned.
    pub base_address: u32,
    /// Target answering the covered pages.
    pub target: TargetId,
    /// Permissions for the covered pages.
    pub perms: PagePerms,
    /// Region classification for the covered pages.
    pub region: RegionTag,
    /// Offset within `target` answering `base_address`.
    pub target_offset: u32,
    /// Covered length in bytes; `None` covers the rest of the target.
    pub length: Option<u32>,
    /// Hot-path device id stamped on the covered pages.
    pub device_id: u32,
}

impl LayerMapping {
    /// Maps the whole of `target` at `base_address`.
    #[must_use]
    pub const fn new(base_address: u32, target: TargetId, perms: PagePerms) -> Self {
        Self {
            base_address,
            target,
            perms,
            region: RegionTag::Ram,
            target_offset: 0,
            length: None,
            device_id: 0,
        }
    }

    /// Replaces the region classification.
    #[must_use]
    pub const fn with_region(mut self, region: RegionTag) -> Self {
        self.region = region;
        self
    }

    /// Maps `length` bytes of the target starting at `target_offset`.
    #[must_use]
    pub const fn with_window(mut self, target_offset: u32, length: u32) -> Self {
        self.target_offset = target_offset;
        self.length = Some(length);
        self
    }

    /// Stamps a device id on the covered pages.
    #[must_use]
    pub const fn with_device(mut self, device_id: u32) -> Self {
        self.device_id = device_id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ResolvedMapping {
    mapping: LayerMapping,
    pages: Range<usize>,
    first: PageEntry,
    page_size: u32,
}

impl ResolvedMapping {
    #[allow(clippy::cast_possible_truncation)]
    fn entry_for(&self, page: usize) -> PageEntry {
        let step = (page - self.pages.start) as u32;
        PageEntry {
            physical_base: self.first.physical_base + step * self.page_size,
            ..self.first
        }
    }
}

/// One named overlay layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayLayer {
    name: String,
    priority: i32,
    active: bool,
    resolved: Option<ResolvedMapping>,
}

impl OverlayLayer {
    /// Layer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Priority; higher wins.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Returns `true` while the layer overrides its pages.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Current mapping, if one has been set.
    #[must_use]
    pub fn mapping(&self) -> Option<&LayerMapping> {
        self.resolved.as_ref().map(|resolved| &resolved.mapping)
    }

    /// Page indices the current mapping covers.
    #[must_use]
    pub fn pages(&self) -> Range<usize> {
        self.resolved
            .as_ref()
            .map_or(0..0, |resolved| resolved.pages.clone())
    }

    fn covers(&self, page: usize) -> bool {
        self.resolved
            .as_ref()
            .is_some_and(|resolved| resolved.pages.contains(&page))
    }
}

/// Registry of overlay layers plus the saved base mapping they sit on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerManager {
    layers: Vec<OverlayLayer>,
    saved_base: Vec<Option<PageEntry>>,
}

impl LayerManager {
    /// Creates a manager for a table of `page_count` pages.
    #[must_use]
    pub fn new(page_count: usize) -> Self {
        Self {
            layers: Vec::new(),
            saved_base: vec![None; page_count],
        }
    }

    /// Registers an inactive layer.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::DuplicateLayer`] when the name is taken.
    #[allow(clippy::cast_possible_truncation)]
    pub fn create_layer(
        &mut self,
        name: impl Into<String>,
        priority: i32,
    ) -> Result<LayerId, BusError> {
        let name = name.into();
        if self.layer_id(&name).is_some() {
            return Err(BusError::DuplicateLayer(name));
        }
        let id = LayerId(self.layers.len() as u16);
        tracing::debug!(layer = %name, priority, "created overlay layer");
        self.layers.push(OverlayLayer {
            name,
            priority,
            active: false,
            resolved: None,
        });
        Ok(id)
    }

    /// Finds a layer by name.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn layer_id(&self, name: &str) -> Option<LayerId> {
        self.layers
            .iter()
            .position(|layer| layer.name == name)
            .map(|index| LayerId(index as u16))
    }

    /// Looks up a layer.
    #[must_use]
    pub fn layer(&self, id: LayerId) -> Option<&OverlayLayer> {
        self.layers.get(usize::from(id.0))
    }

    /// All layers in creation order.
    #[must_use]
    pub fn layers(&self) -> &[OverlayLayer] {
        &self.layers
    }

    /// Returns `true` when the named layer exists and is active.
    #[must_use]
    pub fn is_layer_active(&self, name: &str) -> bool {
        self.layer_id(name)
            .and_then(|id| self.layer(id))
            .is_some_and(OverlayLayer::is_active)
    }

    /// Saved base entry for `page`, if one was snapshotted.
    #[must_use]
    pub fn saved_base(&self, page: usize) -> Option<&PageEntry> {
        self.saved_base.get(page).and_then(Option::as_ref)
    }

    /// Layer currently winning `page`, if any.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn winner(&self, page: usize) -> Option<LayerId> {
        self.layers
            .iter()
            .enumerate()
            .filter(|(_, layer)| layer.active && layer.covers(page))
            .max_by(|(a_index, a), (b_index, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b_index.cmp(a_index))
            })
            .map(|(index, _)| LayerId(index as u16))
    }

    /// Snapshots the current entries of `page_count` pages from `start_page`.
    ///
    /// Re-saving a range is allowed while no layer overrides it.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::RangeOutOfBounds`] for ranges past the table and
    /// [`BusError::LayerActiveOverRange`] when an active layer currently
    /// overrides one of the pages.
    #[allow(clippy::cast_possible_truncation)]
    pub fn save_base_mapping_range(
        &mut self,
        table: &PageTable,
        start_page: usize,
        page_count: usize,
    ) -> Result<(), BusError> {
        let pages = checked_page_range(table, start_page, page_count)?;
        if let Some(page) = pages.clone().find(|&page| self.winner(page).is_some()) {
            let layer = self
                .winner(page)
                .and_then(|id| self.layer(id))
                .map(|layer| layer.name.clone())
                .unwrap_or_default();
            return Err(BusError::LayerActiveOverRange { layer, page });
        }
        for page in pages.clone() {
            self.saved_base[page] = Some(*table.page_entry(page));
        }
        tracing::debug!(?pages, "saved base mapping range");
        Ok(())
    }

    /// Makes a layer visible.
    ///
    /// Activating an already active layer is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownLayer`] for bad ids and
    /// [`BusError::BaseMappingNotSaved`] when a covered page has no snapshot.
    pub fn activate(&mut self, table: &mut PageTable, id: LayerId) -> Result<(), BusError> {
        let layer = self.layer(id).ok_or_else(|| unknown(id))?;
        if layer.active {
            return Ok(());
        }
        let pages = layer.pages();
        self.require_saved(id, pages.clone())?;
        self.layers[usize::from(id.0)].active = true;
        self.refresh(table, pages.clone());
        tracing::debug!(layer = %self.layers[usize::from(id.0)].name, ?pages, "activated overlay layer");
        Ok(())
    }

    /// Hides a layer, restoring whatever lies beneath on its pages.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownLayer`] for bad ids.
    pub fn deactivate(&mut self, table: &mut PageTable, id: LayerId) -> Result<(), BusError> {
        let layer = self.layer(id).ok_or_else(|| unknown(id))?;
        if !layer.active {
            return Ok(());
        }
        let pages = layer.pages();
        self.layers[usize::from(id.0)].active = false;
        self.refresh(table, pages.clone());
        tracing::debug!(layer = %self.layers[usize::from(id.0)].name, ?pages, "deactivated overlay layer");
        Ok(())
    }

    /// Replaces a layer's mapping. Active layers take effect immediately.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownLayer`], [`BusError::UnknownTarget`],
    /// [`BusError::UnalignedRange`] for unaligned base or window,
    /// [`BusError::RangeOutOfBounds`] when the window leaves the address
    /// space or the target, and [`BusError::BaseMappingNotSaved`] when an
    /// active layer would cover an unsaved page.
    pub fn update_mapping(
        &mut self,
        table: &mut PageTable,
        arena: &TargetArena,
        id: LayerId,
        mapping: LayerMapping,
    ) -> Result<(), BusError> {
        let layer = self.layer(id).ok_or_else(|| unknown(id))?;
        let active = layer.active;
        let old_pages = layer.pages();
        let resolved = resolve_mapping(table, arena, mapping)?;
        if active {
            self.require_saved(id, resolved.pages.clone())?;
        }
        let new_pages = resolved.pages.clone();
        self.layers[usize::from(id.0)].resolved = Some(resolved);
        if active {
            self.refresh(table, old_pages);
            self.refresh(table, new_pages);
        }
        Ok(())
    }

    /// Applies a base-mapping change for `page`.
    ///
    /// Pages with a snapshot get the snapshot updated; the live entry only
    /// changes when no layer overrides the page.
    pub(crate) fn set_base_entry(&mut self, table: &mut PageTable, page: usize, entry: PageEntry) {
        if self.saved_base[page].is_some() {
            self.saved_base[page] = Some(entry);
            if self.winner(page).is_some() {
                return;
            }
        }
        table.set(page, entry);
    }

    fn require_saved(&self, id: LayerId, pages: Range<usize>) -> Result<(), BusError> {
        match pages.into_iter().find(|&page| self.saved_base[page].is_none()) {
            Some(page) => Err(BusError::BaseMappingNotSaved {
                layer: self.layers[usize::from(id.0)].name.clone(),
                page,
            }),
            None => Ok(()),
        }
    }

    fn refresh(&self, table: &mut PageTable, pages: Range<usize>) {
        for page in pages {
            let winning = self
                .winner(page)
                .and_then(|id| self.layers[usize::from(id.0)].resolved.as_ref())
                .map(|resolved| resolved.entry_for(page));
            if let Some(entry) = winning.or(self.saved_base[page]) {
                table.set(page, entry);
            }
        }
    }
}

fn unknown(id: LayerId) -> BusError {
    BusError::UnknownLayer(id.to_string())
}

fn checked_page_range(
    table: &PageTable,
    start_page: usize,
    page_count: usize,
) -> Result<Range<usize>, BusError> {
    let end = start_page
        .checked_add(page_count)
        .filter(|&end| end <= table.page_count());
    let geometry = table.geometry();
    #[allow(clippy::cast_possible_truncation)]
    let as_bytes = |pages: usize| (pages as u32).wrapping_shl(u32::from(geometry.page_shift()));
    end.map(|end| start_page..end)
        .ok_or_else(|| BusError::RangeOutOfBounds {
            start: as_bytes(start_page),
            len: as_bytes(page_count),
        })
}

fn resolve_mapping(
    table: &PageTable,
    arena: &TargetArena,
    mapping: LayerMapping,
) -> Result<ResolvedMapping, BusError> {
    let geometry = table.geometry();
    let target_size = arena.size(mapping.target)?;
    let length = mapping
        .length
        .unwrap_or_else(|| target_size.saturating_sub(mapping.target_offset));
    if !geometry.is_page_aligned(mapping.base_address) || !geometry.is_page_aligned(length) || length == 0 {
        return Err(BusError::UnalignedRange {
            start: mapping.base_address,
            len: length,
        });
    }
    let out_of_space = u64::from(mapping.base_address) + u64::from(length) > geometry.space_size();
    let out_of_target = u64::from(mapping.target_offset) + u64::from(length) > u64::from(target_size);
    if out_of_space || out_of_target {
        return Err(BusError::RangeOutOfBounds {
            start: mapping.base_address,
            len: length,
        });
    }
    let first_page = (mapping.base_address >> geometry.page_shift()) as usize;
    let page_count = (length >> geometry.page_shift()) as usize;
    Ok(ResolvedMapping {
        mapping,
        pages: first_page..first_page + page_count,
        first: PageEntry {
            target: Some(mapping.target),
            perms: mapping.perms,
            caps: arena.caps(mapping.target),
            region: mapping.region,
            physical_base: mapping.target_offset,
            device_id: mapping.device_id,
        },
        page_size: geometry.page_size(),
    })
}
