//! Machine profiles: declarative descriptions used to populate a bus.
//!
//! A profile lists regions by address range and backing kind. Population
//! creates one arena target per region (plus one per composite sub-region,
//! named `<region>.<label>`) and maps its pages faithfully.

use thiserror::Error;

use crate::{
    Bus, BusError, BusTarget, CompositeTarget, Geometry, PagePerms, RamTarget, RangeMapping,
    RegionTag, RomTarget, SubRegion, TargetCaps, DEFAULT_ADDRESS_BITS, DEFAULT_PAGE_SHIFT,
};

/// Errors raised while populating a bus from a [`MachineProfile`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    /// Geometry or another bus-level constraint failed.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// A region could not be created or mapped.
    #[error("region `{region}`: {source}")]
    Region {
        /// Region name.
        region: String,
        /// Underlying failure.
        #[source]
        source: BusError,
    },
    /// Two regions claim the same addresses.
    #[error("regions `{first}` and `{second}` overlap")]
    Overlap {
        /// Lower region.
        first: String,
        /// Region starting inside `first`.
        second: String,
    },
    /// A ROM image does not fit its region.
    #[error("image for `{region}` is {image} bytes but the region holds {size}")]
    ImageTooLarge {
        /// Region or sub-region name.
        region: String,
        /// Image length.
        image: usize,
        /// Available bytes.
        size: u32,
    },
}

/// Backing store of a plain region or composite sub-region.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "kebab-case"))]
pub enum BackingSpec {
    /// Read/write memory filled with `fill`.
    Ram {
        /// Initial byte value.
        #[cfg_attr(feature = "serde", serde(default))]
        fill: u8,
    },
    /// Read-only memory loaded from `image`, padded with `fill`.
    Rom {
        /// Image bytes from offset 0.
        #[cfg_attr(feature = "serde", serde(default))]
        image: Vec<u8>,
        /// Padding byte after the image.
        #[cfg_attr(feature = "serde", serde(default))]
        fill: u8,
    },
}

impl BackingSpec {
    fn build(&self, name: &str, size: u32) -> Result<BusTarget, ProfileError> {
        match self {
            Self::Ram { fill } => Ok(BusTarget::Ram(RamTarget::filled(size, *fill))),
            Self::Rom { image, fill } => {
                if image.len() > size as usize {
                    return Err(ProfileError::ImageTooLarge {
                        region: name.to_owned(),
                        image: image.len(),
                        size,
                    });
                }
                let mut bytes = image.clone();
                bytes.resize(size as usize, *fill);
                Ok(BusTarget::Rom(RomTarget::from_image(bytes)))
            }
        }
    }
}

/// One named slice of a composite region.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SubRegionSpec {
    /// Offset within the composite region.
    pub offset: u32,
    /// Length in bytes.
    pub size: u32,
    /// Label, e.g. `rom-half`.
    pub label: String,
    /// Classification reported by enumeration.
    pub region: RegionTag,
    /// Backing store.
    pub backing: BackingSpec,
}

/// Backing kind of a profile region.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "kebab-case"))]
pub enum RegionKind {
    /// Read/write memory.
    Ram {
        /// Initial byte value.
        #[cfg_attr(feature = "serde", serde(default))]
        fill: u8,
    },
    /// Read-only memory.
    Rom {
        /// Image bytes from offset 0.
        #[cfg_attr(feature = "serde", serde(default))]
        image: Vec<u8>,
        /// Padding byte after the image.
        #[cfg_attr(feature = "serde", serde(default))]
        fill: u8,
    },
    /// Window divided among named sub-regions.
    Composite {
        /// Sub-regions; gaps answer as unmapped.
        sub_regions: Vec<SubRegionSpec>,
    },
    /// Explicitly unmapped range.
    Unmapped,
}

/// One address range of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegionSpec {
    /// Unique name; becomes the arena target name.
    pub name: String,
    /// First address; page aligned.
    pub start: u32,
    /// Length in bytes; page aligned.
    pub size: u32,
    /// Backing kind.
    pub kind: RegionKind,
    /// Page permissions.
    #[cfg_attr(feature = "serde", serde(default = "default_perms"))]
    pub perms: PagePerms,
    /// Capability override; `None` derives caps from the backing.
    #[cfg_attr(feature = "serde", serde(default))]
    pub caps: Option<TargetCaps>,
    /// Region classification.
    pub region: RegionTag,
    /// Hot-path device id, `0` for plain memory.
    #[cfg_attr(feature = "serde", serde(default))]
    pub device_id: u32,
}

#[cfg(feature = "serde")]
const fn default_perms() -> PagePerms {
    PagePerms::RWX
}

/// Complete description of a machine's initial address space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineProfile {
    /// Profile name.
    pub name: String,
    /// Address-space width in bits.
    #[cfg_attr(feature = "serde", serde(default = "default_address_bits"))]
    pub address_bits: u8,
    /// log2 of the page size.
    #[cfg_attr(feature = "serde", serde(default = "default_page_shift"))]
    pub page_shift: u8,
    /// Regions in any order.
    pub regions: Vec<RegionSpec>,
}

#[cfg(feature = "serde")]
const fn default_address_bits() -> u8 {
    DEFAULT_ADDRESS_BITS
}

#[cfg(feature = "serde")]
const fn default_page_shift() -> u8 {
    DEFAULT_PAGE_SHIFT
}

impl MachineProfile {
    /// Creates an empty profile with the default 16-bit geometry.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address_bits: DEFAULT_ADDRESS_BITS,
            page_shift: DEFAULT_PAGE_SHIFT,
            regions: Vec::new(),
        }
    }

    /// Appends a region.
    #[must_use]
    pub fn with_region(mut self, region: RegionSpec) -> Self {
        self.regions.push(region);
        self
    }

    fn check_overlaps(&self) -> Result<(), ProfileError> {
        let mut spans: Vec<(u64, u64, &str)> = self
            .regions
            .iter()
            .map(|spec| {
                let start = u64::from(spec.start);
                (start, start + u64::from(spec.size), spec.name.as_str())
            })
            .collect();
        spans.sort_unstable();
        spans.windows(2).try_for_each(|pair| {
            let ((_, end, first), (start, _, second)) = (pair[0], pair[1]);
            if start < end {
                Err(ProfileError::Overlap {
                    first: first.to_owned(),
                    second: second.to_owned(),
                })
            } else {
                Ok(())
            }
        })
    }
}

impl RegionSpec {
    /// Creates a region with no caps override and device id `0`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        start: u32,
        size: u32,
        kind: RegionKind,
        perms: PagePerms,
        region: RegionTag,
    ) -> Self {
        Self {
            name: name.into(),
            start,
            size,
            kind,
            perms,
            caps: None,
            region,
            device_id: 0,
        }
    }

    fn populate(&self, bus: &mut Bus) -> Result<(), ProfileError> {
        let wrap = |source| ProfileError::Region {
            region: self.name.clone(),
            source,
        };
        let target = match &self.kind {
            RegionKind::Unmapped => {
                return bus.unmap_range(self.start, self.size).map_err(wrap);
            }
            RegionKind::Ram { fill } => BackingSpec::Ram { fill: *fill }.build(&self.name, self.size)?,
            RegionKind::Rom { image, fill } => BackingSpec::Rom {
                image: image.clone(),
                fill: *fill,
            }
            .build(&self.name, self.size)?,
            RegionKind::Composite { sub_regions } => {
                let mut composite = CompositeTarget::new(self.size);
                for sub in sub_regions {
                    let name = format!("{}.{}", self.name, sub.label);
                    let backing = sub.backing.build(&name, sub.size)?;
                    let id = bus.add_target(name, backing).map_err(wrap)?;
                    composite
                        .add_sub_region(SubRegion::new(
                            sub.offset,
                            sub.size,
                            sub.label.clone(),
                            sub.region,
                            id,
                        ))
                        .map_err(wrap)?;
                }
                BusTarget::Composite(composite)
            }
        };
        let id = bus.add_target(self.name.clone(), target).map_err(wrap)?;
        let mut mapping =
            RangeMapping::new(id, self.perms, self.region).with_device(self.device_id);
        if let Some(caps) = self.caps {
            mapping = mapping.with_caps(caps);
        }
        bus.map_range(self.start, self.size, mapping).map_err(wrap)
    }
}

impl Bus {
    /// Builds a bus from a profile.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::Bus`] for bad geometry,
    /// [`ProfileError::Overlap`] for overlapping regions,
    /// [`ProfileError::ImageTooLarge`] for oversized images and
    /// [`ProfileError::Region`] for misaligned ranges, duplicate names or
    /// invalid sub-region layouts.
    pub fn from_profile(profile: &MachineProfile) -> Result<Self, ProfileError> {
        let geometry = Geometry::new(profile.address_bits, profile.page_shift)?;
        profile.check_overlaps()?;
        let mut bus = Self::new(geometry);
        for spec in &profile.regions {
            spec.populate(&mut bus)?;
        }
        tracing::debug!(
            profile = %profile.name,
            regions = profile.regions.len(),
            targets = bus.arena().len(),
            "populated bus from profile"
        );
        Ok(bus)
    }
}

#[cfg(test)]
mod tests {
    use super::{BackingSpec, MachineProfile, ProfileError, RegionKind, RegionSpec, SubRegionSpec};
    use crate::{Bus, BusAccess, BusError, BusResultExt, FaultKind, PagePerms, RegionTag};

    fn card() -> RegionSpec {
        RegionSpec::new(
            "card",
            0xC000,
            0x1000,
            RegionKind::Composite {
                sub_regions: vec![
                    SubRegionSpec {
                        offset: 0,
                        size: 0x800,
                        label: "rom-half".into(),
                        region: RegionTag::Rom,
                        backing: BackingSpec::Rom {
                            image: vec![0xA9, 0x01],
                            fill: 0xEA,
                        },
                    },
                    SubRegionSpec {
                        offset: 0x800,
                        size: 0x800,
                        label: "ram-half".into(),
                        region: RegionTag::Ram,
                        backing: BackingSpec::Ram { fill: 0 },
                    },
                ],
            },
            PagePerms::RWX,
            RegionTag::Composite,
        )
    }

    #[test]
    fn population_maps_every_region() {
        let profile = MachineProfile::new("test")
            .with_region(RegionSpec::new(
                "main",
                0,
                0x8000,
                RegionKind::Ram { fill: 0 },
                PagePerms::RWX,
                RegionTag::Ram,
            ))
            .with_region(card());
        let mut bus = Bus::from_profile(&profile).expect("valid profile");

        assert_eq!(bus.page_entry(0x7F).region, RegionTag::Ram);
        assert_eq!(bus.page_entry(0xC0).region, RegionTag::Composite);
        assert_eq!(bus.page_entry(0x80).region, RegionTag::Invalid);
        assert!(bus.target_id("card.rom-half").is_some());
        assert_eq!(bus.try_read(&BusAccess::read(0xC001)), Ok(0x01));
        assert_eq!(bus.try_read(&BusAccess::read(0xC002)), Ok(0xEA));
        assert_eq!(
            bus.try_write(&BusAccess::write(0xC000, 0)).fault_kind(),
            Some(FaultKind::Permission)
        );
        assert_eq!(bus.try_write(&BusAccess::write(0xC800, 5)), Ok(()));
        assert_eq!(bus.read_u8(0xC800), 5);
    }

    #[test]
    fn overlapping_regions_are_rejected() {
        let profile = MachineProfile::new("bad")
            .with_region(RegionSpec::new(
                "a",
                0,
                0x2000,
                RegionKind::Ram { fill: 0 },
                PagePerms::RW,
                RegionTag::Ram,
            ))
            .with_region(RegionSpec::new(
                "b",
                0x1000,
                0x1000,
                RegionKind::Ram { fill: 0 },
                PagePerms::RW,
                RegionTag::Ram,
            ));
        assert_eq!(
            Bus::from_profile(&profile).err(),
            Some(ProfileError::Overlap {
                first: "a".into(),
                second: "b".into()
            })
        );
    }

    #[test]
    fn oversized_image_and_misalignment_are_reported() {
        let big = MachineProfile::new("big").with_region(RegionSpec::new(
            "rom",
            0xFF00,
            0x100,
            RegionKind::Rom {
                image: vec![0; 0x101],
                fill: 0,
            },
            PagePerms::RX,
            RegionTag::Rom,
        ));
        assert!(matches!(
            Bus::from_profile(&big),
            Err(ProfileError::ImageTooLarge { image: 0x101, size: 0x100, .. })
        ));

        let skewed = MachineProfile::new("skewed").with_region(RegionSpec::new(
            "ram",
            0x80,
            0x100,
            RegionKind::Ram { fill: 0 },
            PagePerms::RW,
            RegionTag::Ram,
        ));
        assert!(matches!(
            Bus::from_profile(&skewed),
            Err(ProfileError::Region {
                source: BusError::UnalignedRange { .. },
                ..
            })
        ));
    }

    #[test]
    fn invalid_geometry_is_reported() {
        let mut profile = MachineProfile::new("wide");
        profile.address_bits = 40;
        assert!(matches!(
            Bus::from_profile(&profile),
            Err(ProfileError::Bus(BusError::InvalidGeometry { .. }))
        ));
    }
}
