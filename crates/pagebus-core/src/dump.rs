//! Tooling views: per-byte memory dumps and coalesced region listings.

use std::fmt;

use crate::{
    AccessFlags, AccessIntent, AccessMode, Bus, BusAccess, BusResult, CompositeRegionView,
    FaultKind, PagePerms, RegionTag, TargetId,
};

/// Bytes per rendered dump row.
pub const DUMP_ROW_BYTES: usize = 16;

/// Contiguous addresses that faulted with the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultRun {
    /// First faulted address.
    pub start: u32,
    /// Last faulted address, inclusive.
    pub end: u32,
    /// Shared fault kind.
    pub kind: FaultKind,
}

impl fmt::Display for FaultRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "${:04X} {}", self.start, self.kind.label())
        } else {
            write!(f, "${:04X}-${:04X} {}", self.start, self.end, self.kind.label())
        }
    }
}

/// Result of a decomposed walk over an address range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDump {
    start: u32,
    bytes: Vec<BusResult<u8>>,
}

impl MemoryDump {
    /// Reads `len` bytes from `start` one byte at a time, continuing past
    /// faults.
    pub fn capture(bus: &mut Bus, start: u32, len: u32, intent: AccessIntent) -> Self {
        let access = BusAccess::new(start, intent)
            .from_tooling()
            .with_mode(AccessMode::Decomposed)
            .with_flags(AccessFlags::BULK);
        let read = bus.try_read_decomposed(&access, len);
        Self {
            start,
            bytes: read.bytes().to_vec(),
        }
    }

    /// First address.
    #[must_use]
    pub const fn start(&self) -> u32 {
        self.start
    }

    /// Per-byte results in address order.
    #[must_use]
    pub fn bytes(&self) -> &[BusResult<u8>] {
        &self.bytes
    }

    /// Faults coalesced into contiguous same-kind runs.
    #[must_use]
    pub fn fault_runs(&self) -> Vec<FaultRun> {
        let mut runs: Vec<FaultRun> = Vec::new();
        for fault in self.bytes.iter().filter_map(|byte| byte.as_ref().err()) {
            match runs.last_mut() {
                Some(run) if run.kind == fault.kind && run.end.wrapping_add(1) == fault.address => {
                    run.end = fault.address;
                }
                _ => runs.push(FaultRun {
                    start: fault.address,
                    end: fault.address,
                    kind: fault.kind,
                }),
            }
        }
        runs
    }
}

impl fmt::Display for MemoryDump {
    #[allow(clippy::cast_possible_truncation)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (row, chunk) in self.bytes.chunks(DUMP_ROW_BYTES).enumerate() {
            let address = self
                .start
                .wrapping_add((row * DUMP_ROW_BYTES) as u32);
            write!(f, "${address:04X}:")?;
            for byte in chunk {
                match byte {
                    Ok(value) => write!(f, " {value:02X}")?,
                    Err(_) => f.write_str(" --")?,
                }
            }
            writeln!(f)?;
        }
        let runs = self.fault_runs();
        if !runs.is_empty() {
            writeln!(f, "faults:")?;
            for run in runs {
                writeln!(f, "  {run}")?;
            }
        }
        Ok(())
    }
}

/// Contiguous pages answered by the same target with the same permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRow {
    /// First address.
    pub start: u32,
    /// Last address, inclusive.
    pub end: u32,
    /// Answering target, `None` when unmapped.
    pub target: Option<TargetId>,
    /// Target name, empty when unmapped.
    pub target_name: String,
    /// Target kind name, e.g. `ram`.
    pub kind: &'static str,
    /// Page permissions.
    pub perms: PagePerms,
    /// Region classification.
    pub region: RegionTag,
    /// Hot-path device id.
    pub device_id: u32,
    /// Sub-regions when the target is composite.
    pub sub_regions: Vec<CompositeRegionView>,
}

/// Snapshot of the live page table grouped into rows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegionListing {
    rows: Vec<RegionRow>,
}

impl RegionListing {
    /// Walks every page and coalesces runs of identical mappings.
    #[must_use]
    pub fn capture(bus: &Bus) -> Self {
        let geometry = bus.geometry();
        let mut rows: Vec<RegionRow> = Vec::new();
        let mut previous_physical = 0_u32;
        for (index, entry) in bus.page_table().entries().iter().enumerate() {
            let base = geometry.page_base(index);
            let end = base.wrapping_add(geometry.page_mask());
            // Mirrors repeat physical offsets and must start a new row.
            let contiguous = entry.target.is_none()
                || entry.physical_base == previous_physical.wrapping_add(geometry.page_size());
            previous_physical = entry.physical_base;
            if let Some(row) = rows.last_mut() {
                if contiguous
                    && row.target == entry.target
                    && row.perms == entry.perms
                    && row.region == entry.region
                    && row.device_id == entry.device_id
                {
                    row.end = end;
                    continue;
                }
            }
            let (target_name, kind) = entry.target.map_or((String::new(), "unmapped"), |id| {
                (
                    bus.arena().name(id).unwrap_or_default().to_owned(),
                    bus.arena().get(id).map_or("unknown", |target| target.kind_name()),
                )
            });
            rows.push(RegionRow {
                start: base,
                end,
                target: entry.target,
                target_name,
                kind,
                perms: entry.perms,
                region: entry.region,
                device_id: entry.device_id,
                sub_regions: bus.composite_sub_regions(index),
            });
        }
        Self { rows }
    }

    /// Rows in address order.
    #[must_use]
    pub fn rows(&self) -> &[RegionRow] {
        &self.rows
    }
}

impl fmt::Display for RegionListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.rows {
            write!(
                f,
                "${:04X}-${:04X}  {}  {:<13} {:<9}",
                row.start, row.end, row.perms, row.region, row.kind
            )?;
            if row.target.is_some() {
                write!(f, " {}", row.target_name)?;
            }
            if row.device_id != 0 {
                write!(f, " (device {})", row.device_id)?;
            }
            writeln!(f)?;
            for sub in &row.sub_regions {
                writeln!(
                    f,
                    "    ${:04X}-${:04X}  {:<13} {} -> {}",
                    sub.start,
                    sub.start.wrapping_add(sub.size.saturating_sub(1)),
                    sub.region,
                    sub.label,
                    sub.target_name
                )?;
            }
        }
        Ok(())
    }
}
