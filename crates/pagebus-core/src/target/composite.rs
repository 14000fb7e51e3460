use super::TargetId;
use crate::{BusError, RegionTag};

/// One named slice of a composite window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SubRegion {
    /// Start offset within the composite.
    pub offset: u32,
    /// Length in bytes.
    pub size: u32,
    /// Diagnostic label, e.g. `rom-half`.
    pub label: String,
    /// Classification of the backing store.
    pub region: RegionTag,
    /// Arena target backing this slice.
    pub target: TargetId,
    /// Offset inside `target` that corresponds to `offset`.
    pub target_offset: u32,
}

impl SubRegion {
    /// Creates a sub-region backed from the start of `target`.
    #[must_use]
    pub fn new(
        offset: u32,
        size: u32,
        label: impl Into<String>,
        region: RegionTag,
        target: TargetId,
    ) -> Self {
        Self {
            offset,
            size,
            label: label.into(),
            region,
            target,
            target_offset: 0,
        }
    }

    /// Backs this slice from `target_offset` within its target.
    #[must_use]
    pub const fn at_target_offset(mut self, target_offset: u32) -> Self {
        self.target_offset = target_offset;
        self
    }

    /// Exclusive end offset.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }

    /// Returns `true` when `offset` falls into this slice.
    #[must_use]
    pub const fn contains(&self, offset: u32) -> bool {
        offset >= self.offset && (offset as u64) < self.end()
    }
}

/// Window whose range is divided among several backing targets.
///
/// Sub-regions are kept sorted by offset and never overlap; gaps answer as
/// unbacked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompositeTarget {
    size: u32,
    sub_regions: Vec<SubRegion>,
}

impl CompositeTarget {
    /// Creates an empty composite window of `size` bytes.
    #[must_use]
    pub const fn new(size: u32) -> Self {
        Self {
            size,
            sub_regions: Vec::new(),
        }
    }

    /// Builder form of [`Self::add_sub_region`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::add_sub_region`].
    pub fn with_sub_region(mut self, sub: SubRegion) -> Result<Self, BusError> {
        self.add_sub_region(sub)?;
        Ok(self)
    }

    /// Registers a sub-region.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidSubRegion`] when the slice is empty, runs
    /// past the window or overlaps an existing slice.
    pub fn add_sub_region(&mut self, sub: SubRegion) -> Result<(), BusError> {
        let fits = sub.size > 0 && sub.end() <= u64::from(self.size);
        let overlaps = self
            .sub_regions
            .iter()
            .any(|other| u64::from(sub.offset) < other.end() && u64::from(other.offset) < sub.end());
        if !fits || overlaps {
            return Err(BusError::InvalidSubRegion(sub.label));
        }
        let at = self
            .sub_regions
            .partition_point(|other| other.offset < sub.offset);
        self.sub_regions.insert(at, sub);
        Ok(())
    }

    /// Window size in bytes.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Sub-regions in ascending offset order.
    #[must_use]
    pub fn sub_regions(&self) -> &[SubRegion] {
        &self.sub_regions
    }

    /// Maps a window offset to `(backing target, offset in target)`.
    #[must_use]
    pub fn route(&self, offset: u32) -> Option<(TargetId, u32)> {
        let after = self
            .sub_regions
            .partition_point(|sub| sub.offset <= offset);
        let sub = self.sub_regions.get(after.checked_sub(1)?)?;
        sub.contains(offset)
            .then(|| (sub.target, sub.target_offset + (offset - sub.offset)))
    }
}

/// Routes reads to one target and writes to another.
///
/// This is how a window can read ROM while writes land in the RAM beneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SplitTarget {
    /// Target answering reads, peeks and fetches.
    pub read: TargetId,
    /// Target receiving writes and pokes.
    pub write: TargetId,
}
