//! Fixed-capacity access trace ring.
//!
//! Storage is allocated once; emitting overwrites the slot at
//! `write_index & (capacity - 1)` so the newest `capacity` records survive.

use crate::{AccessFlags, AccessIntent, BusError, FaultKind, RegionTag, SourceId};

/// Compact record of one bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TraceRecord {
    /// Machine cycle at issue time.
    pub cycle: u64,
    /// Byte address.
    pub address: u32,
    /// Value read or written.
    pub value: u32,
    /// Access width in bits.
    pub width_bits: u8,
    /// Why the access was made.
    pub intent: AccessIntent,
    /// Modifier flags of the access.
    pub flags: AccessFlags,
    /// Issuing actor.
    pub source: SourceId,
    /// Device id of the page that answered, `0` for plain memory.
    pub device_id: u32,
    /// Region classification of the page.
    pub region: RegionTag,
    /// Fault raised, if the access failed.
    pub fault: Option<FaultKind>,
}

/// Consumer of trace records emitted by the bus.
pub trait TraceSink {
    /// Records one access in issue order.
    fn on_access(&mut self, record: TraceRecord);
}

/// Power-of-two circular buffer of [`TraceRecord`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRing {
    records: Box<[TraceRecord]>,
    mask: usize,
    write_index: u64,
}

impl TraceRing {
    /// Allocates a ring of `capacity` records.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidTraceCapacity`] unless `capacity` is a
    /// non-zero power of two.
    pub fn with_capacity(capacity: usize) -> Result<Self, BusError> {
        if !capacity.is_power_of_two() {
            return Err(BusError::InvalidTraceCapacity(capacity));
        }
        Ok(Self {
            records: vec![TraceRecord::default(); capacity].into_boxed_slice(),
            mask: capacity - 1,
            write_index: 0,
        })
    }

    /// Stores a record, overwriting the oldest once full.
    #[allow(clippy::cast_possible_truncation)]
    pub fn emit(&mut self, record: TraceRecord) {
        self.records[(self.write_index as usize) & self.mask] = record;
        self.write_index = self.write_index.wrapping_add(1);
    }

    /// Slot count.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Records currently retained.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn len(&self) -> usize {
        self.write_index.min(self.records.len() as u64) as usize
    }

    /// Returns `true` before the first emit.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.write_index == 0
    }

    /// Total records ever emitted, including overwritten ones.
    #[must_use]
    pub const fn total_emitted(&self) -> u64 {
        self.write_index
    }

    /// Retained records, oldest first.
    #[allow(clippy::cast_possible_truncation)]
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TraceRecord> + '_ {
        let retained = self.len();
        let start = (self.write_index as usize).wrapping_sub(retained);
        (0..retained).map(move |step| &self.records[start.wrapping_add(step) & self.mask])
    }

    /// The newest `count` records, oldest first.
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &TraceRecord> + '_ {
        self.iter().skip(self.len().saturating_sub(count))
    }

    /// Forgets every record without releasing storage.
    pub fn clear(&mut self) {
        self.write_index = 0;
    }
}

impl TraceSink for TraceRing {
    fn on_access(&mut self, record: TraceRecord) {
        self.emit(record);
    }
}
