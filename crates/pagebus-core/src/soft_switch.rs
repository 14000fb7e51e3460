//! Soft switches: addresses whose access, not its data, flips machine state.
//!
//! A [`SoftSwitchTable`] is a dense per-offset table of actions, one for reads
//! and one for writes. [`SoftSwitchDevice`] executes them through the
//! [`DeviceContext`] it is handed, so every registered switch is visible by
//! walking [`SoftSwitchTable::entries`].

use crate::target::{DeviceContext, DeviceHandler, TargetReject};
use crate::{BusError, LayerId, NotificationKind, TargetCaps};

/// What touching a soft-switch offset does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SwitchAction {
    /// Nothing.
    #[default]
    None,
    /// Make a layer visible.
    Activate(LayerId),
    /// Hide a layer.
    Deactivate(LayerId),
    /// Hide `off`, then show `on`.
    Select {
        /// Layer to show.
        on: LayerId,
        /// Layer to hide.
        off: LayerId,
    },
    /// Store a mode code in the device latch and announce it.
    Latch(u8),
}

/// Read and write actions for one offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SwitchEntry {
    /// Fired by side-effecting reads.
    pub read: SwitchAction,
    /// Fired by side-effecting writes.
    pub write: SwitchAction,
}

/// Dense soft-switch table indexed by offset within the device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SoftSwitchTable {
    entries: Vec<SwitchEntry>,
}

impl SoftSwitchTable {
    /// Creates a table of `size` inert offsets.
    #[must_use]
    pub fn new(size: u32) -> Self {
        Self {
            entries: vec![SwitchEntry::default(); size as usize],
        }
    }

    /// Sets the action fired by reads of `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::RangeOutOfBounds`] for offsets past the table.
    pub fn set_read(&mut self, offset: u32, action: SwitchAction) -> Result<(), BusError> {
        self.entry_mut(offset)?.read = action;
        Ok(())
    }

    /// Sets the action fired by writes to `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::RangeOutOfBounds`] for offsets past the table.
    pub fn set_write(&mut self, offset: u32, action: SwitchAction) -> Result<(), BusError> {
        self.entry_mut(offset)?.write = action;
        Ok(())
    }

    /// Sets the same action for reads and writes of `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::RangeOutOfBounds`] for offsets past the table.
    pub fn set_both(&mut self, offset: u32, action: SwitchAction) -> Result<(), BusError> {
        *self.entry_mut(offset)? = SwitchEntry {
            read: action,
            write: action,
        };
        Ok(())
    }

    fn entry_mut(&mut self, offset: u32) -> Result<&mut SwitchEntry, BusError> {
        self.entries
            .get_mut(offset as usize)
            .ok_or(BusError::RangeOutOfBounds { start: offset, len: 1 })
    }

    /// Entry for `offset`.
    #[must_use]
    pub fn entry(&self, offset: u32) -> Option<&SwitchEntry> {
        self.entries.get(offset as usize)
    }

    /// Every entry, indexed by offset.
    #[must_use]
    pub fn entries(&self) -> &[SwitchEntry] {
        &self.entries
    }

    /// Offsets with at least one non-inert action.
    pub fn active_offsets(&self) -> impl Iterator<Item = (u32, &SwitchEntry)> + '_ {
        (0_u32..)
            .zip(&self.entries)
            .filter(|(_, entry)| **entry != SwitchEntry::default())
    }

    /// Table size in bytes.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn size(&self) -> u32 {
        self.entries.len() as u32
    }
}

/// Device answering a soft-switch page.
///
/// Reads return the mode latch. Peeks return it too but fire nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftSwitchDevice {
    table: SoftSwitchTable,
    latch: u8,
}

impl SoftSwitchDevice {
    /// Wraps a table with the latch cleared.
    #[must_use]
    pub const fn new(table: SoftSwitchTable) -> Self {
        Self { table, latch: 0 }
    }

    /// The dispatch table.
    #[must_use]
    pub const fn table(&self) -> &SoftSwitchTable {
        &self.table
    }

    /// Current mode latch.
    #[must_use]
    pub const fn latch(&self) -> u8 {
        self.latch
    }

    fn fire(&mut self, action: SwitchAction, ctx: &mut DeviceContext<'_>) {
        match action {
            SwitchAction::None => {}
            SwitchAction::Activate(layer) => ctx.activate_layer(layer),
            SwitchAction::Deactivate(layer) => ctx.deactivate_layer(layer),
            SwitchAction::Select { on, off } => {
                ctx.deactivate_layer(off);
                ctx.activate_layer(on);
            }
            SwitchAction::Latch(mode) => {
                self.latch = mode;
                ctx.notify(NotificationKind::ModeChanged { mode });
            }
        }
    }
}

impl DeviceHandler for SoftSwitchDevice {
    fn kind(&self) -> &str {
        "soft-switch"
    }

    fn size(&self) -> u32 {
        self.table.size()
    }

    fn caps(&self) -> TargetCaps {
        TargetCaps::SUPPORTS_PEEK | TargetCaps::HAS_SIDE_EFFECTS
    }

    fn read(&mut self, offset: u32, ctx: &mut DeviceContext<'_>) -> Result<u8, TargetReject> {
        let action = self.table.entry(offset).ok_or(TargetReject::Unbacked)?.read;
        self.fire(action, ctx);
        Ok(self.latch)
    }

    fn write(
        &mut self,
        offset: u32,
        _value: u8,
        ctx: &mut DeviceContext<'_>,
    ) -> Result<(), TargetReject> {
        let action = self.table.entry(offset).ok_or(TargetReject::Unbacked)?.write;
        self.fire(action, ctx);
        Ok(())
    }

    fn peek(&self, offset: u32) -> Result<u8, TargetReject> {
        self.table.entry(offset).ok_or(TargetReject::Unbacked)?;
        Ok(self.latch)
    }
}
