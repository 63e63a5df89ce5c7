use super::buffer::{BufferTable, Direction, MessageBuffer, BUFFER_MAX};
use super::driver::{ChannelRegistry, PortConfig};
use super::events::PortEvents;
use super::fifo::{Fifo, PushError};
use super::handler::Handlers;
use super::statistic::{Statistic, StatisticCounter};
use crate::data_link::{CanMode, ControllerState, OperatingMode};
use crate::error::{CoreError, Result};
use crate::physical::bitrate::{BitrateConfig, DataBitrate, NominalBitrate};
use crate::physical::{Controller, HardwareInfo};
use crate::types::{BufferIndex, CanMessage, Channel, Config, MsgFlags};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Mode bookkeeping guarded together with the state snapshot
#[derive(Debug, Default)]
pub(crate) struct PortStatus {
    pub(crate) state: ControllerState,
    pub(crate) auto_stop: bool,
    pub(crate) bitrate: Option<BitrateConfig>,
}

/// State shared between a [`Port`] and its [`PortEvents`] handles.
///
/// Lock order: `controller` → `buffers` → FIFO → `status` → statistics.
/// Hardware calls run with `controller` held and may deliver events into
/// the port. `handlers` is only held long enough to clone a
/// handler out of it.
pub(crate) struct Shared<C: Controller> {
    pub(crate) channel: Channel,
    pub(crate) config: PortConfig,
    pub(crate) info: HardwareInfo,
    pub(crate) opened: Instant,
    pub(crate) released: AtomicBool,
    pub(crate) controller: Mutex<C>,
    pub(crate) status: Mutex<PortStatus>,
    pub(crate) buffers: RwLock<BufferTable>,
    pub(crate) handlers: RwLock<Handlers>,
    pub(crate) stats: StatisticCounter,
    registry: Arc<ChannelRegistry>,
}

impl<C: Controller> Shared<C> {
    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(CoreError::NotInitialized);
        }
        Ok(())
    }

    /// Range check shared by every buffer operation
    pub(crate) fn check_index(&self, index: BufferIndex) -> Result<()> {
        if index == 0 || index > BUFFER_MAX {
            return Err(CoreError::BufferRange(index));
        }
        if index > self.info.buffer_count {
            return Err(CoreError::NotSupported("buffer index beyond hardware buffer count"));
        }
        Ok(())
    }

    pub(crate) fn mode(&self) -> OperatingMode {
        self.status.lock().state.mode
    }

    fn transmit_mode_check(&self) -> Result<()> {
        match self.mode() {
            OperatingMode::Started => Ok(()),
            OperatingMode::ListenOnly => Err(CoreError::ModeError("listen-only mode")),
            OperatingMode::Stopped | OperatingMode::StoppedOnBusError => {
                Err(CoreError::BusNotStarted)
            }
        }
    }

    /// Sends the next queued frame of a transmit FIFO if the buffer is idle.
    ///
    /// Returns `Ok(false)` when nothing was sent. Receive buffers are never
    /// drained.
    pub(crate) fn drain(&self, index: BufferIndex) -> Result<bool> {
        if !self.mode().can_transmit() {
            return Ok(false);
        }

        let msg = {
            let mut buffers = self.buffers.write();
            let buffer = buffers.get_mut(index)?;
            if buffer.direction != Direction::Transmit
                || buffer.in_flight.is_some()
                || !buffer.enabled
            {
                return Ok(false);
            }
            let msg = match buffer.fifo.as_ref().and_then(|fifo| fifo.pop()) {
                Some(msg) => msg,
                None => return Ok(false),
            };
            buffer.in_flight = Some(msg);
            msg
        };

        if let Err(e) = self.dispatch(index, &msg) {
            self.stats.record_lost(1);
            warn!(channel = ?self.channel, index, error = %e, "FIFO frame rejected by controller");
            return Err(e);
        }
        Ok(true)
    }

    /// Hands a frame already marked in flight to the controller. Runs
    /// without the buffer table lock so the hardware may deliver events
    /// while it transmits.
    fn dispatch(&self, index: BufferIndex, msg: &CanMessage) -> Result<()> {
        let result = self.controller.lock().transmit(index, msg);
        match result {
            Ok(()) => {
                self.stats.record_transmitted();
                Ok(())
            }
            Err(e) => {
                if let Ok(buffer) = self.buffers.write().get_mut(index) {
                    buffer.in_flight = None;
                }
                Err(e)
            }
        }
    }

    fn drain_all(&self) {
        let indices = self.buffers.read().fifo_indices(Direction::Transmit);
        for index in indices {
            if let Err(e) = self.drain(index) {
                debug!(channel = ?self.channel, index, error = %e, "FIFO drain failed");
            }
        }
    }

    pub(crate) fn timestamp(&self) -> u64 {
        self.opened.elapsed().as_micros() as u64
    }

    fn teardown(&self) -> Result<()> {
        let discarded = self.buffers.write().clear();
        *self.handlers.write() = Handlers::default();
        self.status.lock().state.mode = OperatingMode::Stopped;

        let result = {
            let mut controller = self.controller.lock();
            if let Err(e) = controller.set_mode(OperatingMode::Stopped) {
                warn!(channel = ?self.channel, error = %e, "stopping controller on release failed");
            }
            controller.release()
        };
        self.registry.release(self.channel);

        info!(channel = ?self.channel, discarded, "CAN port released");
        result
    }
}

/// Handle to one open CAN channel.
///
/// Created by `Driver::init`. Every operation fails with
/// [`CoreError::NotInitialized`] once the port has been released. Dropping
/// an unreleased port releases it.
pub struct Port<C: Controller> {
    shared: Arc<Shared<C>>,
}

impl<C: Controller> Port<C> {
    pub(crate) fn new(
        channel: Channel,
        config: PortConfig,
        info: HardwareInfo,
        controller: C,
        registry: Arc<ChannelRegistry>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                channel,
                config,
                info,
                opened: Instant::now(),
                released: AtomicBool::new(false),
                controller: Mutex::new(controller),
                status: Mutex::new(PortStatus::default()),
                buffers: RwLock::new(BufferTable::new()),
                handlers: RwLock::new(Handlers::default()),
                stats: StatisticCounter::default(),
                registry,
            }),
        }
    }

    pub fn channel(&self) -> Channel {
        self.shared.channel
    }

    pub fn config(&self) -> PortConfig {
        self.shared.config
    }

    /// Event ingress for the hardware collaborator
    pub fn events(&self) -> PortEvents<C> {
        PortEvents::new(Arc::clone(&self.shared))
    }

    /// Releases the channel, detaching FIFOs, dropping buffers and handlers.
    /// A second call fails with `NotInitialized`.
    pub fn release(&self) -> Result<()> {
        if self.shared.released.swap(true, Ordering::AcqRel) {
            return Err(CoreError::NotInitialized);
        }
        self.shared.teardown()
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    /// Sets the nominal bit rate and, unless `data` is `None`, the FD data
    /// phase bit rate. Only allowed while the controller is stopped.
    pub fn bitrate(&self, nominal: NominalBitrate, data: DataBitrate) -> Result<()> {
        self.shared.ensure_live()?;
        let config = BitrateConfig::new(nominal, data);
        config.validate()?;
        if config.is_fd() && !self.shared.info.supports_fd {
            return Err(CoreError::NotSupported("CAN FD data bit rate"));
        }

        let mut controller = self.shared.controller.lock();
        let mut status = self.shared.status.lock();
        if !status.state.mode.is_stopped() {
            return Err(CoreError::ModeError("bit rate change while bus is running"));
        }
        controller.set_bitrate(&config.nominal, config.data.as_ref())?;
        status.bitrate = Some(config);

        debug!(
            channel = ?self.shared.channel,
            nominal = config.nominal.bitrate,
            data = ?config.data.map(|d| d.bitrate),
            "bit rate set"
        );
        Ok(())
    }

    /// Bit rate last applied with [`Port::bitrate`]
    pub fn bitrate_config(&self) -> Result<Option<BitrateConfig>> {
        self.shared.ensure_live()?;
        Ok(self.shared.status.lock().bitrate)
    }

    /// Changes the operating mode
    pub fn can_mode(&self, mode: CanMode) -> Result<()> {
        self.shared.ensure_live()?;
        let (target, auto_stop) = match mode {
            CanMode::Start => (OperatingMode::Started, false),
            CanMode::StopOnBusError => (OperatingMode::Started, true),
            CanMode::Stop => (OperatingMode::Stopped, false),
            CanMode::ListenOnly => {
                if !self.shared.info.supports_listen_only {
                    return Err(CoreError::NotSupported("listen-only mode"));
                }
                (OperatingMode::ListenOnly, false)
            }
        };

        {
            let mut controller = self.shared.controller.lock();
            let mut status = self.shared.status.lock();
            if status.state.mode != target {
                controller.set_mode(target)?;
            }
            status.state.mode = target;
            status.auto_stop = auto_stop;
        }
        if !target.can_transmit() {
            self.shared.buffers.write().clear_in_flight();
        }

        info!(channel = ?self.shared.channel, ?mode, "CAN mode changed");
        if target.can_transmit() {
            self.shared.drain_all();
        }
        Ok(())
    }

    /// Snapshot of bus state, operating mode and error counters
    pub fn can_state(&self) -> Result<ControllerState> {
        self.shared.ensure_live()?;
        Ok(self.shared.status.lock().state)
    }

    /// Hardware description of the controller behind this port
    pub fn hdi(&self) -> Result<HardwareInfo> {
        self.shared.ensure_live()?;
        Ok(self.shared.info.clone())
    }

    pub fn statistic(&self) -> Result<Statistic> {
        self.shared.ensure_live()?;
        Ok(self.shared.stats.snapshot())
    }

    /// Installs receive, transmit and error handlers, replacing earlier ones
    pub fn int_functions(&self, handlers: Handlers) -> Result<()> {
        self.shared.ensure_live()?;
        debug!(channel = ?self.shared.channel, ?handlers, "handlers installed");
        *self.shared.handlers.write() = handlers;
        Ok(())
    }

    /// Configures message buffer `index`.
    ///
    /// `flags` selects extended identifiers (`EXT`), FD frames (`FDF`, `BRS`)
    /// and remote frames (`RTR`). `accept_mask` applies to receive buffers
    /// only; set bits must match. A buffer with a FIFO attached cannot be
    /// reconfigured until the FIFO is released.
    pub fn buffer_config(
        &self,
        index: BufferIndex,
        identifier: u32,
        accept_mask: u32,
        flags: MsgFlags,
        direction: Direction,
    ) -> Result<()> {
        self.shared.ensure_live()?;
        self.shared.check_index(index)?;
        if flags.contains(MsgFlags::FDF) && !self.shared.info.supports_fd {
            return Err(CoreError::NotSupported("CAN FD buffer"));
        }
        let buffer = MessageBuffer::new(identifier, accept_mask, flags, direction)?;

        let mut buffers = self.shared.buffers.write();
        if let Ok(existing) = buffers.get(index) {
            if existing.fifo.is_some() {
                return Err(CoreError::ResourceBusy("buffer has a FIFO attached"));
            }
        }
        buffers.insert(index, buffer);

        debug!(channel = ?self.shared.channel, index, identifier, ?flags, ?direction, "buffer configured");
        Ok(())
    }

    /// Enables or disables a configured buffer, keeping its configuration
    pub fn buffer_enable(&self, index: BufferIndex, enabled: bool) -> Result<()> {
        self.shared.ensure_live()?;
        self.shared.check_index(index)?;
        self.shared.buffers.write().get_mut(index)?.enabled = enabled;
        if enabled {
            self.shared.drain(index)?;
        }
        Ok(())
    }

    /// Writes `bytes` into the payload starting at `start`
    pub fn buffer_set_data(&self, index: BufferIndex, bytes: &[u8], start: usize) -> Result<()> {
        self.shared.ensure_live()?;
        self.shared.check_index(index)?;
        self.shared
            .buffers
            .write()
            .get_mut(index)?
            .write_data(start, bytes)
    }

    /// Fills `out` from the payload starting at `start`
    pub fn buffer_get_data(&self, index: BufferIndex, out: &mut [u8], start: usize) -> Result<()> {
        self.shared.ensure_live()?;
        self.shared.check_index(index)?;
        self.shared.buffers.write().get_mut(index)?.read_data(start, out)
    }

    pub fn buffer_set_dlc(&self, index: BufferIndex, dlc: u8) -> Result<()> {
        self.shared.ensure_live()?;
        self.shared.check_index(index)?;
        self.shared.buffers.write().get_mut(index)?.set_dlc(dlc)
    }

    pub fn buffer_get_dlc(&self, index: BufferIndex) -> Result<u8> {
        self.shared.ensure_live()?;
        self.shared.check_index(index)?;
        Ok(self.shared.buffers.read().get(index)?.dlc)
    }

    /// Last frame held by a buffer's single slot
    pub fn buffer_message(&self, index: BufferIndex) -> Result<CanMessage> {
        self.shared.ensure_live()?;
        self.shared.check_index(index)?;
        Ok(self.shared.buffers.read().get(index)?.message())
    }

    /// Returns and clears the receive overrun marker of a buffer
    pub fn buffer_overrun(&self, index: BufferIndex) -> Result<bool> {
        self.shared.ensure_live()?;
        self.shared.check_index(index)?;
        let mut buffers = self.shared.buffers.write();
        let buffer = buffers.get_mut(index)?;
        Ok(std::mem::take(&mut buffer.overrun))
    }

    /// Transmits the current contents of a transmit buffer.
    ///
    /// Fails with `ResourceBusy` while an earlier frame of the buffer, sent
    /// directly or from its FIFO, waits for its `Transmitted` event.
    pub fn buffer_send(&self, index: BufferIndex) -> Result<()> {
        self.shared.ensure_live()?;
        self.shared.check_index(index)?;

        let msg = {
            let mut buffers = self.shared.buffers.write();
            let buffer = buffers.get_mut(index)?;
            if buffer.direction != Direction::Transmit {
                return Err(CoreError::WrongDirection(index));
            }
            if !buffer.enabled {
                return Err(CoreError::BufferDisabled(index));
            }
            self.shared.transmit_mode_check()?;
            if buffer.in_flight.is_some() {
                return Err(CoreError::ResourceBusy("frame in flight on buffer"));
            }

            let mut msg = buffer.message();
            msg.timestamp = self.shared.timestamp();
            buffer.in_flight = Some(msg);
            msg
        };
        self.shared.dispatch(index, &msg)?;

        debug!(channel = ?self.shared.channel, index, id = ?msg.id, dlc = msg.dlc, "buffer sent");
        Ok(())
    }

    /// Frees a buffer. Fails with `ResourceBusy` while a FIFO is attached.
    pub fn buffer_release(&self, index: BufferIndex) -> Result<()> {
        self.shared.ensure_live()?;
        self.shared.check_index(index)?;
        let mut buffers = self.shared.buffers.write();
        if buffers.get(index)?.fifo.is_some() {
            return Err(CoreError::ResourceBusy("buffer has a FIFO attached"));
        }
        buffers.remove(index);
        debug!(channel = ?self.shared.channel, index, "buffer released");
        Ok(())
    }

    /// Binds `fifo` to a configured buffer.
    ///
    /// Receive buffers then deliver every accepted frame into the FIFO and
    /// leave their single slot untouched. Transmit buffers send queued
    /// frames one per transmit opportunity; their single slot stays the
    /// assembly area for [`Port::buffer_send`].
    pub fn fifo_config(&self, index: BufferIndex, fifo: Fifo) -> Result<()> {
        self.shared.ensure_live()?;
        self.shared.check_index(index)?;
        let mut buffers = self.shared.buffers.write();
        let buffer = buffers.get_mut(index)?;
        if buffer.fifo.is_some() {
            return Err(CoreError::ResourceBusy("buffer already has a FIFO attached"));
        }
        debug!(channel = ?self.shared.channel, index, capacity = fifo.capacity(), "FIFO attached");
        buffer.fifo = Some(Arc::new(fifo));
        Ok(())
    }

    /// Dequeues received frames into `out`, returning how many were written.
    /// An empty FIFO yields `Ok(0)`.
    pub fn fifo_read(&self, index: BufferIndex, out: &mut [CanMessage]) -> Result<usize> {
        self.shared.ensure_live()?;
        self.shared.check_index(index)?;
        let fifo = {
            let buffers = self.shared.buffers.read();
            let buffer = buffers.get(index)?;
            if buffer.direction != Direction::Receive {
                return Err(CoreError::WrongDirection(index));
            }
            buffer
                .fifo
                .clone()
                .ok_or(CoreError::FifoNotConfigured(index))?
        };
        Ok(fifo.pop_into(out))
    }

    /// Queues frames for transmission from a transmit buffer.
    ///
    /// Frames that do not fit are rejected and counted as lost; the call then
    /// fails with `BufferOverflow` carrying the written and dropped counts.
    pub fn fifo_write(&self, index: BufferIndex, messages: &[CanMessage]) -> Result<usize> {
        self.shared.ensure_live()?;
        self.shared.check_index(index)?;
        for msg in messages {
            msg.validate()?;
            if msg.is_fd() && !self.shared.info.supports_fd {
                return Err(CoreError::NotSupported("CAN FD frame"));
            }
        }

        let fifo = {
            let buffers = self.shared.buffers.read();
            let buffer = buffers.get(index)?;
            if buffer.direction != Direction::Transmit {
                return Err(CoreError::WrongDirection(index));
            }
            buffer
                .fifo
                .clone()
                .ok_or(CoreError::FifoNotConfigured(index))?
        };

        let mut written = 0;
        for msg in messages {
            match fifo.push(*msg) {
                Ok(()) => written += 1,
                Err(PushError::Full) => break,
                Err(PushError::Detached) => return Err(CoreError::FifoNotConfigured(index)),
            }
        }
        let dropped = messages.len() - written;
        self.shared.stats.record_lost(dropped as u64);

        self.shared.drain(index)?;

        if dropped > 0 {
            warn!(channel = ?self.shared.channel, index, written, dropped, "transmit FIFO full");
            return Err(CoreError::BufferOverflow { written, dropped });
        }
        Ok(written)
    }

    /// Detaches the FIFO of a buffer, discarding queued frames.
    /// Returns the number of frames discarded.
    pub fn fifo_release(&self, index: BufferIndex) -> Result<usize> {
        self.shared.ensure_live()?;
        self.shared.check_index(index)?;
        let fifo = self
            .shared
            .buffers
            .write()
            .get_mut(index)?
            .fifo
            .take()
            .ok_or(CoreError::FifoNotConfigured(index))?;
        let discarded = fifo.detach();
        debug!(channel = ?self.shared.channel, index, discarded, "FIFO released");
        Ok(discarded)
    }
}

impl<C: Controller> Drop for Port<C> {
    fn drop(&mut self) {
        if !self.shared.released.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.shared.teardown() {
                warn!(channel = ?self.shared.channel, error = %e, "release on drop failed");
            }
        }
    }
}
