//! Structured 20-bit device page identifiers.
//!
//! Layout: bits 19..=16 class, bits 15..=8 instance, bits 7..=0 page.

use std::fmt;

use crate::RegistryError;

/// Number of meaningful bits in a [`DevicePageId`].
pub const DEVICE_PAGE_ID_BITS: u32 = 20;

const CLASS_SHIFT: u32 = 16;
const INSTANCE_SHIFT: u32 = 8;
const RAW_MASK: u32 = (1 << DEVICE_PAGE_ID_BITS) - 1;

/// Device category occupying the top four bits of a [`DevicePageId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum DeviceClass {
    /// Reserved; never valid in an id.
    #[default]
    Invalid = 0x0,
    /// Motherboard-compatible soft-switch I/O.
    CompatIo = 0x1,
    /// Expansion slot firmware.
    SlotRom = 0x2,
    /// Expansion slot I/O registers.
    SlotIo = 0x3,
    /// Disk and block storage.
    Storage = 0x4,
    /// Timers and interval counters.
    Timer = 0x5,
    /// Video generators.
    Video = 0x6,
    /// Sound generators.
    Audio = 0x7,
    /// Keyboard, paddles and other input.
    Input = 0x8,
    /// Serial ports.
    Serial = 0x9,
    /// Network adapters.
    Network = 0xA,
    /// Memory expansion controllers.
    Memory = 0xB,
    /// Real-time clocks.
    Clock = 0xC,
    /// Coprocessor cards.
    Coprocessor = 0xD,
    /// Debug and diagnostic ports.
    Debug = 0xE,
    /// Vendor-specific devices.
    Vendor = 0xF,
}

impl DeviceClass {
    /// Converts the class to its 4-bit code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a 4-bit code into a class; `None` above `0xF`.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0x0 => Self::Invalid,
            0x1 => Self::CompatIo,
            0x2 => Self::SlotRom,
            0x3 => Self::SlotIo,
            0x4 => Self::Storage,
            0x5 => Self::Timer,
            0x6 => Self::Video,
            0x7 => Self::Audio,
            0x8 => Self::Input,
            0x9 => Self::Serial,
            0xA => Self::Network,
            0xB => Self::Memory,
            0xC => Self::Clock,
            0xD => Self::Coprocessor,
            0xE => Self::Debug,
            0xF => Self::Vendor,
            _ => return None,
        })
    }

    /// Short lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::CompatIo => "compat-io",
            Self::SlotRom => "slot-rom",
            Self::SlotIo => "slot-io",
            Self::Storage => "storage",
            Self::Timer => "timer",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Input => "input",
            Self::Serial => "serial",
            Self::Network => "network",
            Self::Memory => "memory",
            Self::Clock => "clock",
            Self::Coprocessor => "coprocessor",
            Self::Debug => "debug",
            Self::Vendor => "vendor",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Packed `(class, instance, page)` device page identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DevicePageId(u32);

impl DevicePageId {
    /// Packs a class, instance and page.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidDeviceClass`] for
    /// [`DeviceClass::Invalid`].
    pub const fn new(class: DeviceClass, instance: u8, page: u8) -> Result<Self, RegistryError> {
        if matches!(class, DeviceClass::Invalid) {
            return Err(RegistryError::InvalidDeviceClass);
        }
        Ok(Self::pack(class, instance, page))
    }

    /// Validates a raw 20-bit value.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidPageId`] when bits above 19 are set or
    /// the class field is zero.
    pub const fn from_raw(raw: u32) -> Result<Self, RegistryError> {
        if raw & !RAW_MASK != 0 || raw >> CLASS_SHIFT == 0 {
            return Err(RegistryError::InvalidPageId(raw));
        }
        Ok(Self(raw))
    }

    const fn pack(class: DeviceClass, instance: u8, page: u8) -> Self {
        Self(
            ((class as u32) << CLASS_SHIFT) | ((instance as u32) << INSTANCE_SHIFT) | page as u32,
        )
    }

    /// Raw 20-bit value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Device class.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn class(self) -> DeviceClass {
        match DeviceClass::from_u8((self.0 >> CLASS_SHIFT) as u8) {
            Some(class) => class,
            None => DeviceClass::Invalid,
        }
    }

    /// Instance within the class.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn instance(self) -> u8 {
        (self.0 >> INSTANCE_SHIFT) as u8
    }

    /// Page within the instance.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn page(self) -> u8 {
        self.0 as u8
    }

    /// Motherboard soft-switch page `page`.
    #[must_use]
    pub const fn compat_io(page: u8) -> Self {
        Self::pack(DeviceClass::CompatIo, 0, page)
    }

    /// Firmware page `page` of the card in `slot`.
    #[must_use]
    pub const fn slot_rom(slot: u8, page: u8) -> Self {
        Self::pack(DeviceClass::SlotRom, slot, page)
    }

    /// I/O registers of the card in `slot`.
    #[must_use]
    pub const fn slot_io(slot: u8) -> Self {
        Self::pack(DeviceClass::SlotIo, slot, 0)
    }

    /// Page `page` of storage controller `instance`.
    #[must_use]
    pub const fn storage(instance: u8, page: u8) -> Self {
        Self::pack(DeviceClass::Storage, instance, page)
    }

    /// Timer `instance`.
    #[must_use]
    pub const fn timer(instance: u8) -> Self {
        Self::pack(DeviceClass::Timer, instance, 0)
    }

    /// Debug port page `page`.
    #[must_use]
    pub const fn debug(page: u8) -> Self {
        Self::pack(DeviceClass::Debug, 0, page)
    }
}

impl fmt::Display for DevicePageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:02X}:{:02X}",
            self.class(),
            self.instance(),
            self.page()
        )
    }
}
