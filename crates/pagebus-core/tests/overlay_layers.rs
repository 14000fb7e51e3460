//! Overlay layer priority, restore and soft-switch driven bank switching.

use bitflags as _;
use pagebus_core::{
    Bus, BusError, BusTarget, DeviceTarget, LayerMapping, NotificationKind, PageEntry, PagePerms,
    RamTarget, RangeMapping, RegionTag, RomTarget, SoftSwitchDevice, SoftSwitchTable,
    SwitchAction,
};
use proptest::prelude::*;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

fn banked() -> Bus {
    let mut bus = Bus::default();
    let ram = bus
        .add_target("main-ram", BusTarget::Ram(RamTarget::filled(0xC000, 0x00)))
        .expect("ram");
    let rom = bus
        .add_target("monitor-rom", BusTarget::Rom(RomTarget::filled(0x3000, 0xD0)))
        .expect("rom");
    let bank = bus
        .add_target("lc-ram", BusTarget::Ram(RamTarget::filled(0x3000, 0x1C)))
        .expect("bank");
    let alt = bus
        .add_target("aux-ram", BusTarget::Ram(RamTarget::filled(0x1000, 0xA5)))
        .expect("aux");
    bus.map_range(0x0000, 0xC000, RangeMapping::new(ram, PagePerms::RWX, RegionTag::Ram))
        .expect("map ram");
    bus.map_range(0xD000, 0x3000, RangeMapping::new(rom, PagePerms::RX, RegionTag::Rom))
        .expect("map rom");
    bus.save_base_mapping_range(0xD0, 0x30).expect("save rom pages");

    bus.create_layer("language-card", 10).expect("layer");
    bus.update_layer_mapping(
        "language-card",
        LayerMapping::new(0xD000, bank, PagePerms::RWX),
    )
    .expect("bank mapping");
    bus.create_layer("aux", 20).expect("layer");
    bus.update_layer_mapping(
        "aux",
        LayerMapping::new(0xE000, alt, PagePerms::RW).with_window(0, 0x1000),
    )
    .expect("aux mapping");
    bus
}

fn snapshot(bus: &Bus) -> Vec<PageEntry> {
    bus.page_table().entries().to_vec()
}

#[test]
fn higher_priority_layer_wins_and_restores_in_order() {
    let mut bus = banked();
    assert_eq!(bus.read_u8(0xE000), 0xD0);

    bus.activate_layer("language-card").expect("activate");
    assert_eq!(bus.read_u8(0xD000), 0x1C);
    assert_eq!(bus.read_u8(0xE000), 0x1C);

    bus.activate_layer("aux").expect("activate");
    assert_eq!(bus.read_u8(0xD000), 0x1C);
    assert_eq!(bus.read_u8(0xE000), 0xA5);
    assert_eq!(bus.page_entry(0xE0).perms, PagePerms::RW);

    bus.deactivate_layer("aux").expect("deactivate");
    assert_eq!(bus.read_u8(0xE000), 0x1C);

    bus.deactivate_layer("language-card").expect("deactivate");
    assert_eq!(bus.read_u8(0xE000), 0xD0);
    assert_eq!(bus.page_entry(0xE0).region, RegionTag::Rom);
}

#[test]
fn equal_priority_prefers_earlier_layer() {
    let mut bus = banked();
    let late = bus
        .add_target("late-ram", BusTarget::Ram(RamTarget::filled(0x1000, 0x77)))
        .expect("late");
    bus.create_layer("late", 10).expect("layer");
    bus.update_layer_mapping("late", LayerMapping::new(0xD000, late, PagePerms::RW))
        .expect("mapping");

    bus.activate_layer("late").expect("activate");
    bus.activate_layer("language-card").expect("activate");
    assert_eq!(bus.read_u8(0xD000), 0x1C);

    bus.deactivate_layer("language-card").expect("deactivate");
    assert_eq!(bus.read_u8(0xD000), 0x77);
}

#[test]
fn activation_requires_a_saved_base() {
    let mut bus = banked();
    let low = bus.target_id("main-ram").expect("ram id");
    bus.create_layer("shadow", 1).expect("layer");
    bus.update_layer_mapping("shadow", LayerMapping::new(0x0000, low, PagePerms::READ).with_window(0, 0x100))
        .expect("mapping");
    assert_eq!(
        bus.activate_layer("shadow"),
        Err(BusError::BaseMappingNotSaved {
            layer: "shadow".to_owned(),
            page: 0,
        })
    );
    assert!(!bus.is_layer_active("shadow"));
    assert_eq!(
        bus.activate_layer("missing"),
        Err(BusError::UnknownLayer("missing".to_owned()))
    );
}

#[test]
fn saving_under_an_active_layer_is_rejected() {
    let mut bus = banked();
    bus.activate_layer("language-card").expect("activate");
    assert_eq!(
        bus.save_base_mapping_range(0xD0, 1),
        Err(BusError::LayerActiveOverRange {
            layer: "language-card".to_owned(),
            page: 0xD0,
        })
    );
    assert_eq!(
        bus.save_base_mapping_range(0xFF, 2),
        Err(BusError::RangeOutOfBounds {
            start: 0xFF00,
            len: 0x200,
        })
    );
}

#[test]
fn remap_under_active_layer_lands_in_snapshot() {
    let mut bus = banked();
    let ram = bus.target_id("main-ram").expect("ram id");
    bus.activate_layer("language-card").expect("activate");
    bus.map_range(
        0xD000,
        0x1000,
        RangeMapping::new(ram, PagePerms::RW, RegionTag::Ram).with_target_offset(0x1000),
    )
    .expect("remap base");
    assert_eq!(bus.read_u8(0xD000), 0x1C);

    bus.write_u8(0x1000, 0x3E);
    bus.deactivate_layer("language-card").expect("deactivate");
    assert_eq!(bus.read_u8(0xD000), 0x3E);
    assert_eq!(bus.read_u8(0xE000), 0xD0);
}

#[test]
fn soft_switch_reads_toggle_banks_through_the_bus() {
    let mut bus = banked();
    let card = bus.layer_id("language-card").expect("layer id");
    let mut table = SoftSwitchTable::new(0x100);
    table
        .set_read(0x80, SwitchAction::Activate(card))
        .expect("switch");
    table
        .set_both(0x81, SwitchAction::Deactivate(card))
        .expect("switch");
    table.set_write(0x8F, SwitchAction::Latch(3)).expect("switch");
    let io = bus
        .add_target("io", BusTarget::Device(DeviceTarget::new(SoftSwitchDevice::new(table))))
        .expect("io");
    bus.map_range(
        0xC000,
        0x100,
        RangeMapping::new(io, PagePerms::RW, RegionTag::Io).with_device(7),
    )
    .expect("map io");

    assert_eq!(bus.peek_u8(0xC080), Ok(0));
    assert!(!bus.is_layer_active("language-card"));

    let _ = bus.read_u8(0xC080);
    assert!(bus.is_layer_active("language-card"));
    assert_eq!(bus.read_u8(0xD000), 0x1C);

    bus.write_u8(0xC081, 0);
    assert!(!bus.is_layer_active("language-card"));
    assert_eq!(bus.read_u8(0xD000), 0xD0);

    bus.write_u8(0xC08F, 0);
    assert_eq!(bus.read_u8(0xC000), 3);
    let notifications = bus.drain_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].device_id, 7);
    assert_eq!(notifications[0].kind, NotificationKind::ModeChanged { mode: 3 });
    assert!(bus.notifications().is_empty());
}

proptest! {
    #[test]
    fn activate_deactivate_restores_table_exactly(
        start_page in 0_usize..0xF0,
        pages in 1_usize..16,
        cycles in 1_usize..5,
    ) {
        let mut bus = Bus::default();
        let ram = bus
            .add_target("ram", BusTarget::Ram(RamTarget::new(0x1_0000)))
            .expect("ram");
        let overlay = bus
            .add_target("overlay", BusTarget::Ram(RamTarget::new(0x1000)))
            .expect("overlay");
        bus.map_range(0x0000, 0x8000, RangeMapping::new(ram, PagePerms::RWX, RegionTag::Ram))
            .expect("map low");
        bus.map_range(
            0x8000,
            0x8000,
            RangeMapping::new(ram, PagePerms::RX, RegionTag::Rom).with_target_offset(0x8000),
        )
        .expect("map high");
        bus.save_base_mapping_range(start_page, pages).expect("save");
        let size = u32::try_from(pages * 0x100).expect("size");
        let base = u32::try_from(start_page * 0x100).expect("base");
        bus.create_layer("overlay", 5).expect("layer");
        bus.update_layer_mapping(
            "overlay",
            LayerMapping::new(base, overlay, PagePerms::RW).with_window(0, size),
        )
        .expect("mapping");

        let before = snapshot(&bus);
        for _ in 0..cycles {
            bus.activate_layer("overlay").expect("activate");
            prop_assert_eq!(bus.page_entry(start_page).target, Some(overlay));
            bus.deactivate_layer("overlay").expect("deactivate");
            prop_assert_eq!(&snapshot(&bus), &before);
        }
    }
}
