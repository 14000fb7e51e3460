//! Device page id packing and device registry lookups.

use bitflags as _;
use pagebus_core::{
    DeviceClass, DevicePageId, DeviceRegistry, RegistryError, DEVICE_PAGE_ID_BITS,
};
use proptest::prelude::*;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

#[rstest]
#[case(DevicePageId::compat_io(0xC0), DeviceClass::CompatIo, 0, 0xC0)]
#[case(DevicePageId::slot_rom(6, 0), DeviceClass::SlotRom, 6, 0)]
#[case(DevicePageId::slot_io(3), DeviceClass::SlotIo, 3, 0)]
#[case(DevicePageId::storage(1, 2), DeviceClass::Storage, 1, 2)]
#[case(DevicePageId::timer(4), DeviceClass::Timer, 4, 0)]
#[case(DevicePageId::debug(0x7F), DeviceClass::Debug, 0, 0x7F)]
fn factories_fill_the_expected_fields(
    #[case] id: DevicePageId,
    #[case] class: DeviceClass,
    #[case] instance: u8,
    #[case] page: u8,
) {
    assert_eq!((id.class(), id.instance(), id.page()), (class, instance, page));
}

#[test]
fn bit_layout_is_class_instance_page() {
    let id = DevicePageId::new(DeviceClass::SlotRom, 0x06, 0x12).expect("valid id");
    assert_eq!(id.raw(), 0x2_0612);
    assert!(id.raw() < 1 << DEVICE_PAGE_ID_BITS);
    assert_eq!(id.to_string(), "slot-rom:06:12");
}

#[rstest]
#[case(0x0_0612)]
#[case(0x10_0000)]
#[case(0xFFFF_FFFF)]
fn malformed_raw_ids_are_rejected(#[case] raw: u32) {
    assert_eq!(
        DevicePageId::from_raw(raw),
        Err(RegistryError::InvalidPageId(raw))
    );
}

#[test]
fn invalid_class_is_rejected() {
    assert_eq!(
        DevicePageId::new(DeviceClass::Invalid, 1, 1),
        Err(RegistryError::InvalidDeviceClass)
    );
}

proptest! {
    #[test]
    fn pack_then_unpack_round_trips(class in 1_u8..=15, instance in any::<u8>(), page in any::<u8>()) {
        let class = DeviceClass::from_u8(class).expect("class in range");
        let id = DevicePageId::new(class, instance, page).expect("valid class");
        prop_assert_eq!((id.class(), id.instance(), id.page()), (class, instance, page));
        prop_assert_eq!(DevicePageId::from_raw(id.raw()), Ok(id));
    }
}

#[test]
fn registry_serves_both_keys_and_filters_by_class() {
    let mut registry = DeviceRegistry::new();
    let keyboard = registry.generate_id().expect("id");
    registry
        .register_with_page(
            keyboard,
            DevicePageId::compat_io(0xC0),
            "keyboard",
            "Keyboard latch",
            "main/io/keyboard",
        )
        .expect("keyboard");
    let disk = registry.generate_id().expect("id");
    registry
        .register_with_page(
            disk,
            DevicePageId::slot_io(6),
            "disk-ii",
            "Disk II",
            "main/slot6/disk",
        )
        .expect("disk");
    let disk_rom = registry.generate_id().expect("id");
    registry
        .register_with_page(
            disk_rom,
            DevicePageId::slot_rom(6, 0),
            "disk-ii-rom",
            "Disk II boot ROM",
            "main/slot6/rom",
        )
        .expect("disk rom");

    assert_eq!((keyboard, disk, disk_rom), (1, 2, 3));
    assert_eq!(registry.len(), 3);
    assert_eq!(
        registry
            .try_get_by_page_id(DevicePageId::slot_io(6))
            .map(|info| info.wiring_path.as_str()),
        Some("main/slot6/disk")
    );
    assert_eq!(registry.try_get(disk_rom).map(|info| info.class()), Some(DeviceClass::SlotRom));
    let compat: Vec<u32> = registry.by_class(DeviceClass::CompatIo).map(|info| info.id).collect();
    assert_eq!(compat, vec![keyboard]);
    assert!(registry.try_get(99).is_none());
    assert_eq!(
        registry.register(disk, "x", "x", "x"),
        Err(RegistryError::DuplicateId(disk))
    );
}
