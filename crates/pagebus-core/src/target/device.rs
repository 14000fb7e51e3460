//! Device-backed targets and the context handed to their handlers.

use std::fmt;

use super::TargetReject;
use crate::{LayerId, NotificationKind, NotificationQueue, SourceId, TargetCaps};

/// Overlay-layer change requested by a device while handling an access.
///
/// Commands are queued on the [`DeviceContext`] and applied by the bus, in
/// issue order, once the handler has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerCommand {
    /// Make the layer visible.
    Activate(LayerId),
    /// Hide the layer and restore what lies beneath.
    Deactivate(LayerId),
}

/// Explicit handle a device receives for one side-effecting access.
pub struct DeviceContext<'a> {
    cycle: u64,
    source: SourceId,
    device_id: u32,
    commands: &'a mut Vec<LayerCommand>,
    notifications: &'a mut NotificationQueue,
}

impl<'a> DeviceContext<'a> {
    /// Creates a context over the bus-owned command and notification queues.
    pub fn new(
        cycle: u64,
        source: SourceId,
        device_id: u32,
        commands: &'a mut Vec<LayerCommand>,
        notifications: &'a mut NotificationQueue,
    ) -> Self {
        Self {
            cycle,
            source,
            device_id,
            commands,
            notifications,
        }
    }

    /// Machine cycle of the access.
    #[must_use]
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Actor that issued the access.
    #[must_use]
    pub const fn source(&self) -> SourceId {
        self.source
    }

    /// Hot-path device id of the page that routed here.
    #[must_use]
    pub const fn device_id(&self) -> u32 {
        self.device_id
    }

    /// Queues activation of an overlay layer.
    pub fn activate_layer(&mut self, layer: LayerId) {
        self.commands.push(LayerCommand::Activate(layer));
    }

    /// Queues deactivation of an overlay layer.
    pub fn deactivate_layer(&mut self, layer: LayerId) {
        self.commands.push(LayerCommand::Deactivate(layer));
    }

    /// Posts a change notification for consumers such as a renderer.
    pub fn notify(&mut self, kind: NotificationKind) {
        self.notifications.push(self.device_id, self.cycle, kind);
    }
}

/// Behaviour of a device-backed address range.
///
/// `read` and `write` may change device state. `peek` and `poke` must not;
/// devices that cannot answer without side effects keep the default
/// implementations, which refuse.
pub trait DeviceHandler: Send {
    /// Short kind name, e.g. `soft-switch`.
    fn kind(&self) -> &str;

    /// Addressable size in bytes.
    fn size(&self) -> u32;

    /// Capabilities advertised to the page table.
    fn caps(&self) -> TargetCaps;

    /// Side-effecting read.
    ///
    /// # Errors
    ///
    /// Returns a [`TargetReject`] when the device refuses the access.
    fn read(&mut self, offset: u32, ctx: &mut DeviceContext<'_>) -> Result<u8, TargetReject>;

    /// Side-effecting write.
    ///
    /// # Errors
    ///
    /// Returns a [`TargetReject`] when the device refuses the access.
    fn write(
        &mut self,
        offset: u32,
        value: u8,
        ctx: &mut DeviceContext<'_>,
    ) -> Result<(), TargetReject>;

    /// Side-effecting write of `bytes` little-endian lanes starting at
    /// `offset`, issued by an atomic wide access to a device advertising
    /// [`TargetCaps::SUPPORTS_WIDE`].
    ///
    /// The whole value is accepted or rejected: on `Err` no lane may have
    /// changed device state. The default stores each lane through
    /// [`Self::write`], so devices that can refuse individual bytes must
    /// override it.
    ///
    /// # Errors
    ///
    /// Returns a [`TargetReject`] when the device refuses the access.
    #[allow(clippy::cast_possible_truncation)]
    fn write_wide(
        &mut self,
        offset: u32,
        value: u32,
        bytes: u32,
        ctx: &mut DeviceContext<'_>,
    ) -> Result<(), TargetReject> {
        for lane in 0..bytes {
            self.write(offset + lane, (value >> (lane * 8)) as u8, ctx)?;
        }
        Ok(())
    }

    /// Side-effect-free read.
    ///
    /// # Errors
    ///
    /// Defaults to [`TargetReject::NoSideEffectFreePath`].
    fn peek(&self, _offset: u32) -> Result<u8, TargetReject> {
        Err(TargetReject::NoSideEffectFreePath)
    }

    /// Side-effect-free write.
    ///
    /// # Errors
    ///
    /// Defaults to [`TargetReject::NoSideEffectFreePath`].
    fn poke(&mut self, _offset: u32, _value: u8) -> Result<(), TargetReject> {
        Err(TargetReject::NoSideEffectFreePath)
    }
}

/// Arena wrapper around a boxed device handler.
pub struct DeviceTarget {
    handler: Box<dyn DeviceHandler>,
}

impl DeviceTarget {
    /// Wraps a handler.
    #[must_use]
    pub fn new(handler: impl DeviceHandler + 'static) -> Self {
        Self {
            handler: Box::new(handler),
        }
    }

    /// Device kind name.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.handler.kind()
    }

    /// Addressable size in bytes.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.handler.size()
    }

    /// Advertised capabilities.
    #[must_use]
    pub fn caps(&self) -> TargetCaps {
        self.handler.caps()
    }

    /// Borrows the handler.
    #[must_use]
    pub fn handler(&self) -> &dyn DeviceHandler {
        self.handler.as_ref()
    }

    pub(crate) fn read(
        &mut self,
        offset: u32,
        ctx: &mut DeviceContext<'_>,
    ) -> Result<u8, TargetReject> {
        self.bounds(offset)?;
        self.handler.read(offset, ctx)
    }

    pub(crate) fn write(
        &mut self,
        offset: u32,
        value: u8,
        ctx: &mut DeviceContext<'_>,
    ) -> Result<(), TargetReject> {
        self.bounds(offset)?;
        self.handler.write(offset, value, ctx)
    }

    pub(crate) fn write_wide(
        &mut self,
        offset: u32,
        value: u32,
        bytes: u32,
        ctx: &mut DeviceContext<'_>,
    ) -> Result<(), TargetReject> {
        self.bounds(offset + bytes.saturating_sub(1))?;
        self.handler.write_wide(offset, value, bytes, ctx)
    }

    pub(crate) fn peek(&self, offset: u32) -> Result<u8, TargetReject> {
        self.bounds(offset)?;
        if !self.caps().contains(TargetCaps::SUPPORTS_PEEK) {
            return Err(TargetReject::NoSideEffectFreePath);
        }
        self.handler.peek(offset)
    }

    pub(crate) fn poke(&mut self, offset: u32, value: u8) -> Result<(), TargetReject> {
        self.bounds(offset)?;
        if !self.caps().contains(TargetCaps::SUPPORTS_POKE) {
            return Err(TargetReject::NoSideEffectFreePath);
        }
        self.handler.poke(offset, value)
    }

    fn bounds(&self, offset: u32) -> Result<(), TargetReject> {
        if offset < self.size() {
            Ok(())
        } else {
            Err(TargetReject::Unbacked)
        }
    }
}

impl fmt::Debug for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceTarget")
            .field("kind", &self.kind())
            .field("size", &self.size())
            .field("caps", &self.caps())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceContext, DeviceHandler, DeviceTarget, LayerCommand};
    use crate::target::TargetReject;
    use crate::{LayerId, NotificationKind, NotificationQueue, SourceId, TargetCaps};

    struct Latch {
        value: u8,
    }

    impl DeviceHandler for Latch {
        fn kind(&self) -> &str {
            "latch"
        }

        fn size(&self) -> u32 {
            2
        }

        fn caps(&self) -> TargetCaps {
            TargetCaps::HAS_SIDE_EFFECTS
        }

        fn read(&mut self, _offset: u32, ctx: &mut DeviceContext<'_>) -> Result<u8, TargetReject> {
            ctx.activate_layer(LayerId(1));
            Ok(self.value)
        }

        fn write(
            &mut self,
            offset: u32,
            value: u8,
            ctx: &mut DeviceContext<'_>,
        ) -> Result<(), TargetReject> {
            self.value = value;
            ctx.notify(NotificationKind::DataChanged { offset });
            Ok(())
        }
    }

    #[test]
    fn context_queues_commands_and_notifications() {
        let mut device = DeviceTarget::new(Latch { value: 3 });
        let mut commands = Vec::new();
        let mut notifications = NotificationQueue::with_capacity(4);
        let mut ctx = DeviceContext::new(9, SourceId::CPU, 7, &mut commands, &mut notifications);

        assert_eq!(device.read(0, &mut ctx), Ok(3));
        assert_eq!(device.write(1, 5, &mut ctx), Ok(()));
        assert_eq!(device.read(2, &mut ctx), Err(TargetReject::Unbacked));

        assert_eq!(commands, vec![LayerCommand::Activate(LayerId(1))]);
        let drained: Vec<_> = notifications.drain().collect();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].device_id, 7);
        assert_eq!(drained[0].cycle, 9);
    }

    #[test]
    fn devices_without_peek_caps_refuse_side_effect_free_access() {
        let mut device = DeviceTarget::new(Latch { value: 0 });
        assert_eq!(device.peek(0), Err(TargetReject::NoSideEffectFreePath));
        assert_eq!(device.poke(0, 1), Err(TargetReject::NoSideEffectFreePath));
    }
}
