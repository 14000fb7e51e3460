//! Built-in demonstration machine.
//!
//! Layout, loosely modelled on a 64K Apple II with a language card:
//!
//! ```text
//! $0000-$BFFF  main RAM
//! $C000-$C0FF  soft switches ($C080 read: card on, $C081: card off,
//!              $C08F write: latch mode 1)
//! $C800-$CFFF  expansion window: ROM half, then RAM half
//! $D000-$FFFF  monitor ROM, overlaid by the `lc-bank` layer
//! ```

use pagebus_core::{
    BackingSpec, MachineProfile, PagePerms, RegionKind, RegionSpec, RegionTag, SubRegionSpec,
};

use crate::profile_file::{LayerSpec, MonitorProfile, SoftSwitchSpec, SwitchBinding, SwitchOp};

/// Name of the language-card layer.
pub const LANGUAGE_CARD: &str = "lc-bank";

/// Reset vector contents of the monitor ROM image (`$FFFC`).
pub const RESET_VECTOR: u16 = 0xFA62;

fn monitor_rom() -> Vec<u8> {
    let mut image = vec![0xEA; 0x3000];
    let [low, high] = RESET_VECTOR.to_le_bytes();
    image[0x2FFC] = low;
    image[0x2FFD] = high;
    image
}

/// Profile of the demonstration machine.
#[must_use]
pub fn demo_profile() -> MonitorProfile {
    let machine = MachineProfile::new("demo-ii")
        .with_region(RegionSpec::new(
            "main-ram",
            0x0000,
            0xC000,
            RegionKind::Ram { fill: 0x00 },
            PagePerms::RWX,
            RegionTag::Ram,
        ))
        .with_region(RegionSpec::new(
            "expansion",
            0xC800,
            0x0800,
            RegionKind::Composite {
                sub_regions: vec![
                    SubRegionSpec {
                        offset: 0x000,
                        size: 0x400,
                        label: "rom-half".to_owned(),
                        region: RegionTag::ExpansionRom,
                        backing: BackingSpec::Rom {
                            image: Vec::new(),
                            fill: 0x60,
                        },
                    },
                    SubRegionSpec {
                        offset: 0x400,
                        size: 0x400,
                        label: "ram-half".to_owned(),
                        region: RegionTag::Ram,
                        backing: BackingSpec::Ram { fill: 0x00 },
                    },
                ],
            },
            PagePerms::RWX,
            RegionTag::Composite,
        ))
        .with_region(RegionSpec::new(
            "monitor-rom",
            0xD000,
            0x3000,
            RegionKind::Rom {
                image: monitor_rom(),
                fill: 0xEA,
            },
            PagePerms::RX,
            RegionTag::Rom,
        ));

    let activate = SwitchOp::Activate {
        layer: LANGUAGE_CARD.to_owned(),
    };
    let deactivate = SwitchOp::Deactivate {
        layer: LANGUAGE_CARD.to_owned(),
    };
    MonitorProfile {
        machine,
        layers: vec![LayerSpec {
            name: LANGUAGE_CARD.to_owned(),
            priority: 10,
            start: 0xD000,
            size: 0x3000,
            fill: 0x00,
            perms: PagePerms::RWX,
            region: RegionTag::Ram,
            active: false,
        }],
        soft_switches: vec![SoftSwitchSpec {
            name: "softswitch".to_owned(),
            start: 0xC000,
            size: 0x100,
            switches: vec![
                SwitchBinding {
                    offset: 0x80,
                    on_read: Some(activate),
                    on_write: None,
                },
                SwitchBinding {
                    offset: 0x81,
                    on_read: Some(deactivate.clone()),
                    on_write: Some(deactivate),
                },
                SwitchBinding {
                    offset: 0x8F,
                    on_read: None,
                    on_write: Some(SwitchOp::Latch { mode: 1 }),
                },
            ],
        }],
    }
}
