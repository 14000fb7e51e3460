//! Address-space geometry and the flat page table.

use crate::{BusError, PagePerms, RegionTag, TargetCaps, TargetId};

/// Address-space width of the classic 8-bit machine.
pub const DEFAULT_ADDRESS_BITS: u8 = 16;
/// Page shift of the classic 8-bit machine (256-byte pages).
pub const DEFAULT_PAGE_SHIFT: u8 = 8;
/// Widest supported address space.
pub const MAX_ADDRESS_BITS: u8 = 32;
/// Smallest page; keeps aligned 32-bit accesses inside one page.
pub const MIN_PAGE_SHIFT: u8 = 2;
/// Upper bound on page-table entries.
pub const MAX_PAGE_COUNT: usize = 1 << 20;

const _: () = assert!(
    DEFAULT_PAGE_SHIFT >= MIN_PAGE_SHIFT && DEFAULT_PAGE_SHIFT <= DEFAULT_ADDRESS_BITS,
    "default page shift must fit the default address space"
);
const _: () = assert!(
    1usize << (DEFAULT_ADDRESS_BITS - DEFAULT_PAGE_SHIFT) <= MAX_PAGE_COUNT,
    "default geometry must fit the page-count bound"
);

/// Address-space width and page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Geometry {
    address_bits: u8,
    page_shift: u8,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            address_bits: DEFAULT_ADDRESS_BITS,
            page_shift: DEFAULT_PAGE_SHIFT,
        }
    }
}

impl Geometry {
    /// Validates and creates a geometry.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidGeometry`] when the address width exceeds
    /// 32 bits, the page shift is below [`MIN_PAGE_SHIFT`] or above the
    /// address width, or the table would exceed [`MAX_PAGE_COUNT`] entries.
    pub const fn new(address_bits: u8, page_shift: u8) -> Result<Self, BusError> {
        let valid = address_bits <= MAX_ADDRESS_BITS
            && page_shift >= MIN_PAGE_SHIFT
            && page_shift <= address_bits
            && page_shift < 32
            && (1u64 << (address_bits - page_shift)) <= MAX_PAGE_COUNT as u64;
        if valid {
            Ok(Self {
                address_bits,
                page_shift,
            })
        } else {
            Err(BusError::InvalidGeometry {
                address_bits,
                page_shift,
            })
        }
    }

    /// Address-space width in bits.
    #[must_use]
    pub const fn address_bits(self) -> u8 {
        self.address_bits
    }

    /// log2 of the page size.
    #[must_use]
    pub const fn page_shift(self) -> u8 {
        self.page_shift
    }

    /// Page size in bytes.
    #[must_use]
    pub const fn page_size(self) -> u32 {
        1 << self.page_shift
    }

    /// Mask selecting the offset within a page.
    #[must_use]
    pub const fn page_mask(self) -> u32 {
        self.page_size() - 1
    }

    /// Number of pages.
    #[must_use]
    pub const fn page_count(self) -> usize {
        1 << (self.address_bits - self.page_shift)
    }

    /// Total bytes in the address space.
    #[must_use]
    pub const fn space_size(self) -> u64 {
        1 << self.address_bits
    }

    /// Returns `true` when `address` lies inside the address space.
    #[must_use]
    pub const fn contains(self, address: u32) -> bool {
        (address as u64) < self.space_size()
    }

    /// Page index of `address`, or `None` outside the address space.
    #[must_use]
    pub const fn page_index(self, address: u32) -> Option<usize> {
        if self.contains(address) {
            Some((address >> self.page_shift) as usize)
        } else {
            None
        }
    }

    /// First byte address of page `index`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn page_base(self, index: usize) -> u32 {
        (index as u32) << self.page_shift
    }

    /// Returns `true` when `value` is a multiple of the page size.
    #[must_use]
    pub const fn is_page_aligned(self, value: u32) -> bool {
        value & self.page_mask() == 0
    }
}

/// What currently answers one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PageEntry {
    /// Owning target, or `None` when unmapped.
    pub target: Option<TargetId>,
    /// Permissions enforced for accesses through this page.
    pub perms: PagePerms,
    /// Capabilities of the target as seen through this page.
    pub caps: TargetCaps,
    /// Region classification.
    pub region: RegionTag,
    /// Offset within the target of the first byte of this page.
    pub physical_base: u32,
    /// Hot-path device id of the owner, `0` for plain memory.
    pub device_id: u32,
}

impl PageEntry {
    /// Canonical entry for a page nothing answers.
    pub const UNMAPPED: Self = Self {
        target: None,
        perms: PagePerms::empty(),
        caps: TargetCaps::empty(),
        region: RegionTag::Invalid,
        physical_base: 0,
        device_id: 0,
    };

    /// Returns `true` when a target answers this page.
    #[must_use]
    pub const fn is_mapped(&self) -> bool {
        self.target.is_some()
    }
}

impl Default for PageEntry {
    fn default() -> Self {
        Self::UNMAPPED
    }
}

/// Flat, index-addressed page table. Lookup is a single slice index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTable {
    geometry: Geometry,
    entries: Box<[PageEntry]>,
}

impl PageTable {
    /// Allocates a table with every page unmapped.
    #[must_use]
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            entries: vec![PageEntry::UNMAPPED; geometry.page_count()].into_boxed_slice(),
        }
    }

    /// Address-space geometry.
    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Number of pages.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.entries.len()
    }

    /// log2 of the page size.
    #[must_use]
    pub const fn page_shift(&self) -> u8 {
        self.geometry.page_shift()
    }

    /// Returns the winning entry for page `index`.
    ///
    /// # Panics
    ///
    /// Panics when `index >= page_count()`; that is a caller bug, not a
    /// guest-visible fault.
    #[must_use]
    pub fn page_entry(&self, index: usize) -> &PageEntry {
        &self.entries[index]
    }

    /// Non-panicking variant of [`Self::page_entry`].
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&PageEntry> {
        self.entries.get(index)
    }

    /// Resolves `address` to its entry and the byte offset within the target.
    #[must_use]
    pub fn lookup(&self, address: u32) -> Option<(&PageEntry, u32)> {
        let index = self.geometry.page_index(address)?;
        let entry = self.entries.get(index)?;
        let offset = entry
            .physical_base
            .wrapping_add(address & self.geometry.page_mask());
        Some((entry, offset))
    }

    /// All entries in page order.
    #[must_use]
    pub fn entries(&self) -> &[PageEntry] {
        &self.entries
    }

    pub(crate) fn set(&mut self, index: usize, entry: PageEntry) {
        self.entries[index] = entry;
    }
}
