use super::bitrate::BitTiming;
use super::{Controller, Hardware, HardwareInfo};
use crate::data_link::OperatingMode;
use crate::error::{CoreError, Result};
use crate::types::{BufferIndex, CanMessage, Channel};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Transmit hook, called for every frame handed to a virtual controller.
///
/// The hook runs without the virtual bus lock, so it may feed the frame back
/// into a port with `PortEvents::frame_received`. The port's controller is
/// still claimed for the duration of the call, so the hook must not report
/// transmit completion or bus-off to the sending port synchronously.
pub type TransmitHook = Box<dyn Fn(Channel, &CanMessage) -> Result<()> + Send + Sync>;

type SharedHook = Arc<dyn Fn(Channel, &CanMessage) -> Result<()> + Send + Sync>;

#[derive(Debug, Default)]
struct ChannelRecord {
    sent: Vec<(BufferIndex, CanMessage)>,
    mode: OperatingMode,
    nominal: Option<BitTiming>,
    data: Option<BitTiming>,
    claimed: bool,
}

#[derive(Default)]
struct VirtualBus {
    records: HashMap<Channel, ChannelRecord>,
    transmit_hook: Option<SharedHook>,
}

/// In-memory CAN hardware.
///
/// Every channel accepts frames immediately and records them, so tests can
/// inspect what the core handed to the controller. Received frames and state
/// changes are injected through the port's event handle, exactly as a real
/// interrupt handler would.
#[derive(Clone)]
pub struct VirtualHardware {
    channels: Vec<Channel>,
    info: HardwareInfo,
    unavailable: HashSet<Channel>,
    bus: Arc<Mutex<VirtualBus>>,
}

impl VirtualHardware {
    /// Creates FD-capable hardware with `channel_count` channels and 32 buffers
    pub fn new(channel_count: u8) -> Self {
        let channels = Channel::ALL
            .iter()
            .copied()
            .take(usize::from(channel_count))
            .collect::<Vec<_>>();
        let info = HardwareInfo {
            name: "virtual CAN".to_owned(),
            version: (1, 0),
            channels: channels.len() as u8,
            buffer_count: 32,
            supports_fd: true,
            supports_listen_only: true,
            supports_error_frames: true,
            timestamp_resolution_ns: 1_000,
        };
        Self {
            channels,
            info,
            unavailable: HashSet::new(),
            bus: Arc::new(Mutex::new(VirtualBus::default())),
        }
    }

    /// Minimal single-buffer classic controller
    pub fn minimal() -> Self {
        Self::new(1)
            .with_buffer_count(1)
            .without_fd()
            .without_listen_only()
    }

    pub fn with_buffer_count(mut self, count: u8) -> Self {
        self.info.buffer_count = count;
        self
    }

    pub fn without_fd(mut self) -> Self {
        self.info.supports_fd = false;
        self
    }

    pub fn without_listen_only(mut self) -> Self {
        self.info.supports_listen_only = false;
        self
    }

    pub fn without_error_frames(mut self) -> Self {
        self.info.supports_error_frames = false;
        self
    }

    /// Marks a channel as present but impossible to claim
    pub fn with_unavailable(mut self, channel: Channel) -> Self {
        self.unavailable.insert(channel);
        self
    }

    pub fn info(&self) -> &HardwareInfo {
        &self.info
    }

    /// Sets a handler deciding whether transmitted frames are accepted
    pub fn set_transmit_handler(&self, handler: Option<TransmitHook>) {
        self.bus.lock().transmit_hook = handler.map(Arc::from);
    }

    /// Frames accepted for transmission on `channel`, oldest first
    pub fn sent(&self, channel: Channel) -> Vec<(BufferIndex, CanMessage)> {
        self.bus
            .lock()
            .records
            .get(&channel)
            .map(|r| r.sent.clone())
            .unwrap_or_default()
    }

    pub fn mode(&self, channel: Channel) -> OperatingMode {
        self.bus
            .lock()
            .records
            .get(&channel)
            .map(|r| r.mode)
            .unwrap_or_default()
    }

    /// Nominal and data timing last applied to `channel`
    pub fn bitrate(&self, channel: Channel) -> Option<(BitTiming, Option<BitTiming>)> {
        let bus = self.bus.lock();
        let record = bus.records.get(&channel)?;
        record.nominal.map(|nominal| (nominal, record.data))
    }

    pub fn is_claimed(&self, channel: Channel) -> bool {
        self.bus
            .lock()
            .records
            .get(&channel)
            .is_some_and(|r| r.claimed)
    }
}

impl Hardware for VirtualHardware {
    type Controller = VirtualController;

    fn channels(&self) -> &[Channel] {
        &self.channels
    }

    fn claim(&self, channel: Channel) -> Result<VirtualController> {
        if !self.channels.contains(&channel) {
            return Err(CoreError::InvalidChannel(channel));
        }
        if self.unavailable.contains(&channel) {
            return Err(CoreError::Hardware(format!(
                "interface for {:?} cannot be claimed",
                channel
            )));
        }

        let mut bus = self.bus.lock();
        let record = bus.records.entry(channel).or_default();
        *record = ChannelRecord {
            claimed: true,
            ..Default::default()
        };

        Ok(VirtualController {
            channel,
            info: self.info.clone(),
            bus: Arc::clone(&self.bus),
        })
    }
}

/// Controller handed out by [`VirtualHardware`]
pub struct VirtualController {
    channel: Channel,
    info: HardwareInfo,
    bus: Arc<Mutex<VirtualBus>>,
}

impl VirtualController {
    fn with_record<T>(&self, f: impl FnOnce(&mut ChannelRecord) -> Result<T>) -> Result<T> {
        let mut bus = self.bus.lock();
        match bus.records.get_mut(&self.channel) {
            Some(record) if record.claimed => f(record),
            _ => Err(CoreError::Hardware("controller released".to_owned())),
        }
    }
}

impl Controller for VirtualController {
    fn info(&self) -> HardwareInfo {
        self.info.clone()
    }

    fn set_bitrate(&mut self, nominal: &BitTiming, data: Option<&BitTiming>) -> Result<()> {
        if data.is_some() && !self.info.supports_fd {
            return Err(CoreError::NotSupported("CAN FD data bit rate"));
        }
        self.with_record(|record| {
            record.nominal = Some(*nominal);
            record.data = data.copied();
            Ok(())
        })
    }

    fn set_mode(&mut self, mode: OperatingMode) -> Result<()> {
        self.with_record(|record| {
            record.mode = mode;
            Ok(())
        })
    }

    fn transmit(&mut self, index: BufferIndex, msg: &CanMessage) -> Result<()> {
        let hook = self.bus.lock().transmit_hook.clone();
        if let Some(hook) = hook {
            hook(self.channel, msg)?;
        }
        let mut bus = self.bus.lock();
        match bus.records.get_mut(&self.channel) {
            Some(record) if record.claimed && record.mode.can_transmit() => {
                record.sent.push((index, *msg));
                Ok(())
            }
            Some(record) if record.claimed => {
                Err(CoreError::Hardware("controller not in transmit mode".to_owned()))
            }
            _ => Err(CoreError::Hardware("controller released".to_owned())),
        }
    }

    fn release(&mut self) -> Result<()> {
        self.with_record(|record| {
            record.claimed = false;
            record.mode = OperatingMode::Stopped;
            Ok(())
        })
    }
}
