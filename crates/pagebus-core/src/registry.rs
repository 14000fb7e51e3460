//! Device metadata keyed by hot-path integer id and by [`DevicePageId`].

use std::collections::BTreeMap;

use thiserror::Error;

use crate::{DeviceClass, DevicePageId};

/// Errors raised by device registration and id construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Hot-path id `0` is reserved for plain memory.
    #[error("device id 0 is reserved for plain memory")]
    ReservedId,
    /// A device with this integer id is already registered.
    #[error("device id {0} is already registered")]
    DuplicateId(u32),
    /// A device with this page id is already registered.
    #[error("device page id {0} is already registered")]
    DuplicatePageId(DevicePageId),
    /// [`DeviceClass::Invalid`] cannot appear in a page id.
    #[error("device class 0 is reserved")]
    InvalidDeviceClass,
    /// Raw value is not a well-formed 20-bit page id.
    #[error("raw device page id ${0:X} is malformed")]
    InvalidPageId(u32),
    /// Every non-zero integer id is taken.
    #[error("device id space exhausted")]
    IdsExhausted,
}

/// Metadata describing one registered device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DeviceInfo {
    /// Hot-path integer id stamped on page entries.
    pub id: u32,
    /// Structured page id, when assigned.
    pub page_id: Option<DevicePageId>,
    /// Device kind, e.g. `soft-switch`.
    pub kind: String,
    /// Display name.
    pub name: String,
    /// Hierarchical wiring path, e.g. `main/slot6/disk`.
    pub wiring_path: String,
}

impl DeviceInfo {
    /// Device class taken from the page id.
    #[must_use]
    pub fn class(&self) -> DeviceClass {
        self.page_id.map_or(DeviceClass::Invalid, DevicePageId::class)
    }
}

/// Registry of device metadata, built once at machine construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRegistry {
    devices: BTreeMap<u32, DeviceInfo>,
    by_page_id: BTreeMap<DevicePageId, u32>,
    next_id: u32,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device without a page id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ReservedId`] for id `0` and
    /// [`RegistryError::DuplicateId`] when the id is taken.
    pub fn register(
        &mut self,
        id: u32,
        kind: impl Into<String>,
        name: impl Into<String>,
        wiring_path: impl Into<String>,
    ) -> Result<(), RegistryError> {
        self.insert(DeviceInfo {
            id,
            page_id: None,
            kind: kind.into(),
            name: name.into(),
            wiring_path: wiring_path.into(),
        })
    }

    /// Registers a device with a structured page id.
    ///
    /// # Errors
    ///
    /// As [`Self::register`], plus [`RegistryError::DuplicatePageId`].
    pub fn register_with_page(
        &mut self,
        id: u32,
        page_id: DevicePageId,
        kind: impl Into<String>,
        name: impl Into<String>,
        wiring_path: impl Into<String>,
    ) -> Result<(), RegistryError> {
        self.insert(DeviceInfo {
            id,
            page_id: Some(page_id),
            kind: kind.into(),
            name: name.into(),
            wiring_path: wiring_path.into(),
        })
    }

    fn insert(&mut self, info: DeviceInfo) -> Result<(), RegistryError> {
        if info.id == 0 {
            return Err(RegistryError::ReservedId);
        }
        if self.devices.contains_key(&info.id) {
            return Err(RegistryError::DuplicateId(info.id));
        }
        if let Some(page_id) = info.page_id {
            if self.by_page_id.contains_key(&page_id) {
                return Err(RegistryError::DuplicatePageId(page_id));
            }
            self.by_page_id.insert(page_id, info.id);
        }
        self.next_id = self.next_id.max(info.id);
        self.devices.insert(info.id, info);
        Ok(())
    }

    /// Looks up a device by integer id.
    #[must_use]
    pub fn try_get(&self, id: u32) -> Option<&DeviceInfo> {
        self.devices.get(&id)
    }

    /// Looks up a device by page id.
    #[must_use]
    pub fn try_get_by_page_id(&self, page_id: DevicePageId) -> Option<&DeviceInfo> {
        self.by_page_id
            .get(&page_id)
            .and_then(|id| self.devices.get(id))
    }

    /// Every device in ascending id order.
    pub fn all(&self) -> impl Iterator<Item = &DeviceInfo> + '_ {
        self.devices.values()
    }

    /// Devices whose page id belongs to `class`.
    pub fn by_class(&self, class: DeviceClass) -> impl Iterator<Item = &DeviceInfo> + '_ {
        self.devices
            .values()
            .filter(move |info| info.page_id.is_some_and(|page_id| page_id.class() == class))
    }

    /// Number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Allocates an unused id above every id handed out or registered so far.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::IdsExhausted`] once `u32::MAX` is reached.
    pub fn generate_id(&mut self) -> Result<u32, RegistryError> {
        let mut candidate = self.next_id.checked_add(1).ok_or(RegistryError::IdsExhausted)?;
        while self.devices.contains_key(&candidate) {
            candidate = candidate.checked_add(1).ok_or(RegistryError::IdsExhausted)?;
        }
        self.next_id = candidate;
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceRegistry, RegistryError};
    use crate::{DeviceClass, DevicePageId};

    #[test]
    fn lookup_by_both_keys() {
        let mut registry = DeviceRegistry::new();
        registry
            .register_with_page(
                3,
                DevicePageId::slot_rom(6, 0),
                "disk-ii",
                "Disk II",
                "main/slot6",
            )
            .expect("register");
        registry
            .register(4, "speaker", "Speaker", "main/speaker")
            .expect("register");

        assert_eq!(registry.try_get(3).map(|d| d.name.as_str()), Some("Disk II"));
        assert_eq!(
            registry
                .try_get_by_page_id(DevicePageId::slot_rom(6, 0))
                .map(|d| d.id),
            Some(3)
        );
        assert!(registry.try_get_by_page_id(DevicePageId::slot_rom(5, 0)).is_none());
        assert_eq!(registry.all().count(), 2);
        assert_eq!(registry.by_class(DeviceClass::SlotRom).count(), 1);
        assert_eq!(registry.try_get(4).map(|d| d.class()), Some(DeviceClass::Invalid));
    }

    #[test]
    fn duplicates_and_reserved_ids_are_rejected() {
        let mut registry = DeviceRegistry::new();
        registry
            .register_with_page(1, DevicePageId::timer(0), "timer", "T0", "main/t0")
            .expect("register");
        assert_eq!(
            registry.register(1, "x", "x", "x"),
            Err(RegistryError::DuplicateId(1))
        );
        assert_eq!(
            registry.register_with_page(2, DevicePageId::timer(0), "x", "x", "x"),
            Err(RegistryError::DuplicatePageId(DevicePageId::timer(0)))
        );
        assert!(registry.try_get(2).is_none());
        assert_eq!(
            registry.register(0, "x", "x", "x"),
            Err(RegistryError::ReservedId)
        );
    }

    #[test]
    fn generated_ids_are_monotonic_and_skip_taken_ids() {
        let mut registry = DeviceRegistry::new();
        assert_eq!(registry.generate_id(), Ok(1));
        registry.register(5, "k", "n", "p").expect("register");
        assert_eq!(registry.generate_id(), Ok(6));
        assert_eq!(registry.generate_id(), Ok(7));
    }
}
