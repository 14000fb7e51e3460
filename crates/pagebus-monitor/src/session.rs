//! A live bus plus its device registry, driven one command at a time.

use std::fmt::Write as _;

use pagebus_core::{
    AccessIntent, AccessMode, AccessWidth, Bus, BusAccess, BusError, BusTarget, DevicePageId,
    DeviceRegistry, DeviceTarget, LayerMapping, MemoryDump, PagePerms, RamTarget, RangeMapping,
    RegionListing, RegionTag, SoftSwitchDevice, SoftSwitchTable, SwitchAction,
};
use tracing::{debug, info};

use crate::command::{Command, HELP_TEXT};
use crate::error::MonitorError;
use crate::profile_file::{LayerSpec, MonitorProfile, SoftSwitchSpec, SwitchOp};

/// Interactive monitor state.
pub struct Session {
    bus: Bus,
    devices: DeviceRegistry,
    cycle: u64,
}

impl Session {
    /// Builds the bus, layers and soft switches a profile describes.
    ///
    /// `trace_capacity` of `None` leaves access tracing off.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Profile`] for an invalid base layout,
    /// [`MonitorError::Bus`] for bad layers or switch bindings and
    /// [`MonitorError::Registry`] when device ids collide.
    pub fn build(
        profile: &MonitorProfile,
        trace_capacity: Option<usize>,
    ) -> Result<Self, MonitorError> {
        let mut bus = Bus::from_profile(&profile.machine)?;
        let mut devices = DeviceRegistry::new();
        for region in profile.machine.regions.iter().filter(|r| r.device_id != 0) {
            devices.register(
                region.device_id,
                region.region.as_str(),
                region.name.as_str(),
                format!("main/{}", region.name),
            )?;
        }
        for layer in &profile.layers {
            add_layer(&mut bus, layer)?;
        }
        for switches in &profile.soft_switches {
            add_soft_switches(&mut bus, &mut devices, switches)?;
        }
        for layer in profile.layers.iter().filter(|layer| layer.active) {
            bus.activate_layer(&layer.name)?;
        }
        if let Some(capacity) = trace_capacity {
            bus.enable_trace(capacity)?;
        }
        info!(
            profile = %profile.machine.name,
            targets = bus.arena().len(),
            layers = profile.layers.len(),
            devices = devices.len(),
            "session ready"
        );
        Ok(Self {
            bus,
            devices,
            cycle: 0,
        })
    }

    /// The live bus.
    #[must_use]
    pub const fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Registered devices.
    #[must_use]
    pub const fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    /// Runs one command and returns its printable output.
    ///
    /// Bus faults are part of the output, not errors.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Bus`] for unknown layers or invalid widths.
    pub fn execute(&mut self, command: &Command) -> Result<String, MonitorError> {
        debug!(?command, "executing");
        let output = match command {
            Command::Dump { start, len } => {
                let space = self.bus.geometry().space_size();
                if u64::from(*start) + u64::from(*len) > space {
                    return Err(MonitorError::DumpOutOfRange {
                        start: *start,
                        len: *len,
                        space,
                    });
                }
                MemoryDump::capture(&mut self.bus, *start, *len, AccessIntent::DebugRead)
                    .to_string()
            }
            Command::Peek { address } => match self.bus.peek_u8(*address) {
                Ok(value) => format!("${address:04X}: {value:02X}\n"),
                Err(fault) => format!("${address:04X}: fault: {fault}\n"),
            },
            Command::Poke { address, bytes } => self.poke(*address, bytes),
            Command::Read { address, bits } => {
                let access = self.cpu_access(*address, AccessIntent::DataRead, *bits)?;
                match self.bus.try_read(&access) {
                    Ok(value) => {
                        format!("${address:04X} -> {value:0width$X}\n", width = hex_digits(*bits))
                    }
                    Err(fault) => format!("${address:04X}: fault: {fault}\n"),
                }
            }
            Command::Write {
                address,
                value,
                bits,
            } => {
                let access = self
                    .cpu_access(*address, AccessIntent::DataWrite, *bits)?
                    .with_value(*value);
                match self.bus.try_write(&access) {
                    Ok(()) => {
                        format!("${address:04X} <- {value:0width$X}\n", width = hex_digits(*bits))
                    }
                    Err(fault) => format!("${address:04X}: fault: {fault}\n"),
                }
            }
            Command::Regions => RegionListing::capture(&self.bus).to_string(),
            Command::Layers => self.render_layers(),
            Command::Layer { name, on } => {
                if *on {
                    self.bus.activate_layer(name)?;
                } else {
                    self.bus.deactivate_layer(name)?;
                }
                format!("layer {name} {}\n", if *on { "on" } else { "off" })
            }
            Command::Trace { count } => self.render_trace(*count),
            Command::Events => self.render_events(),
            Command::Devices => self.render_devices(),
            Command::Help => format!("{HELP_TEXT}\n"),
        };
        Ok(output)
    }

    fn cpu_access(
        &mut self,
        address: u32,
        intent: AccessIntent,
        bits: u8,
    ) -> Result<BusAccess, BusError> {
        let width = AccessWidth::from_bits(bits)?;
        self.cycle += 1;
        Ok(BusAccess::new(address, intent)
            .with_width(width)
            .with_mode(AccessMode::Decomposed)
            .at_cycle(self.cycle))
    }

    fn poke(&mut self, address: u32, bytes: &[u8]) -> String {
        let access = BusAccess::new(address, AccessIntent::DebugWrite)
            .from_tooling()
            .with_mode(AccessMode::Decomposed);
        let written = self.bus.try_write_decomposed(&access, bytes);
        let stored = written.results().iter().filter(|result| result.is_ok()).count();
        let mut out = format!("poked {stored} of {} bytes at ${address:04X}\n", bytes.len());
        for fault in written.faults() {
            let _ = writeln!(out, "  fault: {fault}");
        }
        out
    }

    fn render_layers(&self) -> String {
        let mut out = String::new();
        for (index, layer) in self.bus.layers().layers().iter().enumerate() {
            let _ = write!(
                out,
                "L{index} {:<16} prio {:>4}  {}",
                layer.name(),
                layer.priority(),
                if layer.is_active() { "active  " } else { "inactive" }
            );
            let pages = layer.pages();
            if let Some(mapping) = layer.mapping().filter(|_| !pages.is_empty()) {
                let first = self.bus.geometry().page_base(pages.start);
                let last = self
                    .bus
                    .geometry()
                    .page_base(pages.end - 1)
                    .wrapping_add(self.bus.geometry().page_mask());
                let _ = write!(out, "  ${first:04X}-${last:04X} {}", mapping.perms);
            }
            out.push('\n');
        }
        if out.is_empty() {
            out.push_str("no layers\n");
        }
        out
    }

    fn render_trace(&self, count: usize) -> String {
        let Some(ring) = self.bus.trace() else {
            return "tracing is off\n".to_owned();
        };
        let mut out = String::new();
        for record in ring.recent(count) {
            let intent = format!("{:?}", record.intent);
            let _ = write!(
                out,
                "{:>8}  ${:04X}  {:<16} {:0width$X}",
                record.cycle,
                record.address,
                intent,
                record.value,
                width = hex_digits(record.width_bits)
            );
            if let Some(fault) = record.fault {
                let _ = write!(out, "  {}", fault.label());
            }
            out.push('\n');
        }
        let _ = writeln!(out, "{} records emitted", ring.total_emitted());
        out
    }

    fn render_events(&mut self) -> String {
        let dropped = self.bus.notifications().dropped();
        let mut out = String::new();
        for event in self.bus.drain_notifications() {
            let _ = writeln!(
                out,
                "cycle {:>8}  device {:>3}  {:?}",
                event.cycle, event.device_id, event.kind
            );
        }
        if dropped > 0 {
            let _ = writeln!(out, "{dropped} notifications dropped");
        }
        if out.is_empty() {
            out.push_str("no events\n");
        }
        out
    }

    fn render_devices(&self) -> String {
        let mut out = String::new();
        for info in self.devices.all() {
            let page = info
                .page_id
                .map_or_else(|| "-".to_owned(), |page_id| page_id.to_string());
            let _ = writeln!(
                out,
                "{:>3}  {:<16} {:<12} {:<16} {}",
                info.id, page, info.kind, info.name, info.wiring_path
            );
        }
        if out.is_empty() {
            out.push_str("no devices\n");
        }
        out
    }
}

fn hex_digits(bits: u8) -> usize {
    usize::from(bits / 4).max(2)
}

fn add_layer(bus: &mut Bus, spec: &LayerSpec) -> Result<(), BusError> {
    let target = bus.add_target(
        format!("{}.backing", spec.name),
        BusTarget::Ram(RamTarget::filled(spec.size, spec.fill)),
    )?;
    bus.create_layer(spec.name.as_str(), spec.priority)?;
    bus.update_layer_mapping(
        &spec.name,
        LayerMapping::new(spec.start, target, spec.perms)
            .with_window(0, spec.size)
            .with_region(spec.region),
    )?;
    let shift = bus.page_shift();
    bus.save_base_mapping_range((spec.start >> shift) as usize, (spec.size >> shift) as usize)?;
    debug!(layer = %spec.name, start = spec.start, size = spec.size, "added layer");
    Ok(())
}

fn resolve(bus: &Bus, op: Option<&SwitchOp>) -> Result<SwitchAction, BusError> {
    let layer = |name: &str| {
        bus.layer_id(name)
            .ok_or_else(|| BusError::UnknownLayer(name.to_owned()))
    };
    Ok(match op {
        None => SwitchAction::None,
        Some(SwitchOp::Activate { layer: name }) => SwitchAction::Activate(layer(name.as_str())?),
        Some(SwitchOp::Deactivate { layer: name }) => SwitchAction::Deactivate(layer(name.as_str())?),
        Some(SwitchOp::Select { on, off }) => SwitchAction::Select {
            on: layer(on.as_str())?,
            off: layer(off.as_str())?,
        },
        Some(SwitchOp::Latch { mode }) => SwitchAction::Latch(*mode),
    })
}

fn add_soft_switches(
    bus: &mut Bus,
    devices: &mut DeviceRegistry,
    spec: &SoftSwitchSpec,
) -> Result<(), MonitorError> {
    let mut table = SoftSwitchTable::new(spec.size);
    for binding in &spec.switches {
        table.set_read(binding.offset, resolve(bus, binding.on_read.as_ref())?)?;
        table.set_write(binding.offset, resolve(bus, binding.on_write.as_ref())?)?;
    }
    let target = bus.add_target(
        spec.name.as_str(),
        BusTarget::Device(DeviceTarget::new(SoftSwitchDevice::new(table))),
    )?;
    let device_id = devices.generate_id()?;
    let page = (spec.start >> bus.page_shift()) & 0xFF;
    devices.register_with_page(
        device_id,
        DevicePageId::compat_io(u8::try_from(page).unwrap_or_default()),
        "soft-switch",
        spec.name.as_str(),
        format!("main/{}", spec.name),
    )?;
    bus.map_range(
        spec.start,
        spec.size,
        RangeMapping::new(target, PagePerms::RW, RegionTag::Io).with_device(device_id),
    )?;
    debug!(name = %spec.name, device_id, switches = spec.switches.len(), "mapped soft switches");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Session;
    use crate::command::{parse_command, Command};
    use crate::demo::{demo_profile, LANGUAGE_CARD, RESET_VECTOR};
    use crate::error::MonitorError;
    use pagebus_core::BusError;

    fn demo() -> Session {
        Session::build(&demo_profile(), Some(64)).expect("demo builds")
    }

    fn run(session: &mut Session, line: &str) -> String {
        let command = parse_command(line).expect("valid command");
        session.execute(&command).expect("command runs")
    }

    #[test]
    fn demo_reset_vector_is_visible() {
        let mut session = demo();
        let [low, high] = RESET_VECTOR.to_le_bytes();
        assert_eq!(run(&mut session, "peek FFFC"), format!("$FFFC: {low:02X}\n"));
        assert_eq!(run(&mut session, "peek FFFD"), format!("$FFFD: {high:02X}\n"));
        assert_eq!(run(&mut session, "read FFFC 16"), "$FFFC -> FA62\n");
    }

    #[test]
    fn dump_stops_at_the_end_of_the_address_space() {
        let mut session = demo();
        let tail = run(&mut session, "dump FFF0 10");
        assert!(tail.starts_with("$FFF0: EA"), "{tail}");

        let command = parse_command("dump 0 FFFFFFFF").expect("valid command");
        assert!(matches!(
            session.execute(&command),
            Err(MonitorError::DumpOutOfRange {
                start: 0,
                len: 0xFFFF_FFFF,
                space: 0x1_0000,
            })
        ));
        let command = parse_command("dump FFFF 2").expect("valid command");
        assert!(matches!(
            session.execute(&command),
            Err(MonitorError::DumpOutOfRange { .. })
        ));
    }

    #[test]
    fn soft_switch_read_banks_in_the_language_card() {
        let mut session = demo();
        assert_eq!(run(&mut session, "read D000"), "$D000 -> EA\n");
        run(&mut session, "read C080");
        assert!(session.bus().is_layer_active(LANGUAGE_CARD));
        assert_eq!(run(&mut session, "read D000"), "$D000 -> 00\n");
        run(&mut session, "write C081 0");
        assert!(!session.bus().is_layer_active(LANGUAGE_CARD));
    }

    #[test]
    fn peek_does_not_fire_switches() {
        let mut session = demo();
        run(&mut session, "peek C080");
        run(&mut session, "dump C080 2");
        assert!(!session.bus().is_layer_active(LANGUAGE_CARD));
    }

    #[test]
    fn cpu_write_to_rom_faults_but_poke_patches() {
        let mut session = demo();
        assert_eq!(
            run(&mut session, "write D000 42"),
            "$D000: fault: permission denied at $D000 (rom)\n"
        );
        assert_eq!(run(&mut session, "poke D000 42 43"), "poked 2 of 2 bytes at $D000\n");
        assert_eq!(run(&mut session, "read D001"), "$D001 -> 43\n");
    }

    #[test]
    fn poke_reports_unmapped_bytes() {
        let mut session = demo();
        let output = run(&mut session, "poke C7FF 1 2");
        assert_eq!(
            output,
            "poked 1 of 2 bytes at $C7FF\n  fault: unmapped address at $C7FF (invalid)\n"
        );
        assert_eq!(run(&mut session, "peek C800"), "$C800: 02\n");
    }

    #[test]
    fn latch_write_posts_an_event() {
        let mut session = demo();
        run(&mut session, "write C08F 0");
        let events = run(&mut session, "events");
        assert!(events.contains("device   1"));
        assert!(events.contains("ModeChanged { mode: 1 }"));
        assert_eq!(run(&mut session, "events"), "no events\n");
    }

    #[test]
    fn layers_and_devices_are_listed() {
        let mut session = demo();
        let layers = run(&mut session, "layers");
        assert!(layers.starts_with("L0 lc-bank"));
        assert!(layers.contains("inactive"));
        assert!(layers.contains("$D000-$FFFF RWX"));
        run(&mut session, "layer lc-bank on");
        assert!(!run(&mut session, "layers").contains("inactive"));
        let devices = run(&mut session, "devices");
        assert!(devices.contains("compat-io:00:C0"));
        assert!(devices.contains("main/softswitch"));
    }

    #[test]
    fn unknown_layer_is_an_error() {
        let mut session = demo();
        let result = session.execute(&Command::Layer {
            name: "nope".to_owned(),
            on: true,
        });
        assert!(matches!(
            result,
            Err(MonitorError::Bus(BusError::UnknownLayer(ref name))) if name == "nope"
        ));
    }

    #[test]
    fn trace_lists_cpu_accesses_and_faults() {
        let mut session = demo();
        run(&mut session, "read 0300");
        run(&mut session, "read C400");
        let trace = run(&mut session, "trace 2");
        let lines: Vec<&str> = trace.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("$0300  DataRead"));
        assert!(lines[1].ends_with("unmapped"));
        assert_eq!(lines[2], "2 records emitted");
    }
}
