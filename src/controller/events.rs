use super::buffer::Direction;
use super::fifo::PushError;
use super::handler::Delivery;
use super::port::Shared;
use super::driver::ConfigFlags;
use crate::data_link::{ControllerState, ErrorType, OperatingMode, StateReport};
use crate::error::{CoreError, Result};
use crate::physical::Controller;
use crate::types::{BufferIndex, CanMessage};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Activity reported for one message buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferEvent {
    /// A frame arrived in a receive buffer
    Received(CanMessage),
    /// The frame in flight on a transmit buffer left the controller
    Transmitted,
}

/// Event ingress of a port, handed to the hardware collaborator.
///
/// Cloneable and usable from the thread that services the hardware. Every
/// call returns promptly: locks are held for a single table or queue update
/// and handlers run after they are released.
pub struct PortEvents<C: Controller> {
    shared: Arc<Shared<C>>,
}

impl<C: Controller> Clone for PortEvents<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Controller> PortEvents<C> {
    pub(crate) fn new(shared: Arc<Shared<C>>) -> Self {
        Self { shared }
    }

    /// Signals activity on buffer `index`.
    ///
    /// For receive buffers the receive handler sees the frame first; unless
    /// it consumes the frame, it then goes to the attached FIFO or, without
    /// a FIFO, to the single slot. For transmit buffers the transmit handler
    /// is called with the completed frame and the next FIFO entry is sent.
    pub fn fifo_event(&self, index: BufferIndex, event: BufferEvent) -> Result<()> {
        self.shared.ensure_live()?;
        self.shared.check_index(index)?;
        match event {
            BufferEvent::Received(msg) => self.received(index, msg),
            BufferEvent::Transmitted => self.transmitted(index),
        }
    }

    /// Runs acceptance filtering over the enabled receive buffers and
    /// delivers `msg` to the lowest matching index. Returns the index, or
    /// `None` when no buffer accepts the frame.
    pub fn frame_received(&self, msg: CanMessage) -> Result<Option<BufferIndex>> {
        self.shared.ensure_live()?;
        msg.validate()?;
        let index = match self.shared.buffers.read().find_receiver(&msg) {
            Some(index) => index,
            None => {
                trace!(channel = ?self.shared.channel, id = ?msg.id, "frame filtered");
                return Ok(None);
            }
        };
        self.fifo_event(index, BufferEvent::Received(msg))?;
        Ok(Some(index))
    }

    /// Records a bus state reported by the hardware.
    ///
    /// A change of bus state is forwarded to the error handler exactly once.
    /// Reaching bus-off in stop-on-bus-error mode stops the controller
    /// before the handler runs.
    pub fn state_changed(&self, report: StateReport) -> Result<()> {
        self.shared.ensure_live()?;

        let snapshot = {
            let mut controller = self.shared.controller.lock();
            let mut status = self.shared.status.lock();
            status.state.tx_errors = report.tx_errors;
            status.state.rx_errors = report.rx_errors;
            if status.state.bus == report.bus {
                return Ok(());
            }
            status.state.bus = report.bus;

            if report.bus.is_bus_off() && status.auto_stop && status.state.mode.is_running() {
                status.state.mode = OperatingMode::StoppedOnBusError;
                if let Err(e) = controller.set_mode(OperatingMode::Stopped) {
                    warn!(channel = ?self.shared.channel, error = %e, "stopping controller after bus-off failed");
                }
                warn!(channel = ?self.shared.channel, "bus-off, controller stopped");
            }
            status.state
        };

        if snapshot.mode == OperatingMode::StoppedOnBusError {
            self.shared.buffers.write().clear_in_flight();
        }
        debug!(channel = ?self.shared.channel, bus = ?snapshot.bus, "bus state changed");
        self.notify_error(&snapshot);
        Ok(())
    }

    /// Records an error frame seen on the bus
    pub fn error_frame(&self, error: ErrorType) -> Result<()> {
        self.shared.ensure_live()?;
        self.shared.stats.record_error();
        let snapshot = {
            let mut status = self.shared.status.lock();
            status.state.last_error = error;
            status.state
        };
        if self.shared.config.flags.contains(ConfigFlags::ERROR_FRAMES) {
            self.notify_error(&snapshot);
        }
        Ok(())
    }

    fn notify_error(&self, state: &ControllerState) {
        let handler = self.shared.handlers.read().error.clone();
        if let Some(handler) = handler {
            handler.on_error(state);
        }
    }

    fn received(&self, index: BufferIndex, mut msg: CanMessage) -> Result<()> {
        if !self.shared.mode().is_running() {
            return Err(CoreError::BusNotStarted);
        }
        msg.validate()?;

        let fifo = {
            let buffers = self.shared.buffers.read();
            let buffer = buffers.get(index)?;
            if buffer.direction != Direction::Receive {
                return Err(CoreError::WrongDirection(index));
            }
            if !buffer.enabled {
                return Err(CoreError::BufferDisabled(index));
            }
            if msg.is_fd() && !buffer.is_fd() {
                return Err(CoreError::DataLength("FD frame on a classic buffer".to_owned()));
            }
            buffer.fifo.clone()
        };

        if msg.timestamp == 0 && self.shared.config.flags.contains(ConfigFlags::TIMESTAMPS) {
            msg.timestamp = self.shared.timestamp();
        }
        self.shared.stats.record_received();

        let handler = self.shared.handlers.read().receive.clone();
        if let Some(handler) = handler {
            if handler.on_receive(&msg, index) == Delivery::Consumed {
                return Ok(());
            }
        }

        if let Some(fifo) = fifo {
            return match fifo.push(msg) {
                Ok(()) => Ok(()),
                Err(reason) => {
                    self.shared.stats.record_lost(1);
                    warn!(channel = ?self.shared.channel, index, ?reason, "receive FIFO dropped frame");
                    match reason {
                        PushError::Full => Err(CoreError::BufferOverflow {
                            written: 0,
                            dropped: 1,
                        }),
                        PushError::Detached => Err(CoreError::FifoNotConfigured(index)),
                    }
                }
            };
        }

        let mut buffers = self.shared.buffers.write();
        let buffer = match buffers.get_mut(index) {
            Ok(buffer) if buffer.direction == Direction::Receive && buffer.fifo.is_none() => buffer,
            // Reconfigured between the check above and now
            _ => {
                self.shared.stats.record_lost(1);
                return Err(CoreError::BufferNotConfigured(index));
            }
        };
        if buffer.store(&msg) {
            self.shared.stats.record_lost(1);
            warn!(channel = ?self.shared.channel, index, "receive buffer overrun");
        }
        Ok(())
    }

    fn transmitted(&self, index: BufferIndex) -> Result<()> {
        let (msg, has_fifo) = {
            let mut buffers = self.shared.buffers.write();
            let buffer = buffers.get_mut(index)?;
            if buffer.direction != Direction::Transmit {
                return Err(CoreError::WrongDirection(index));
            }
            (buffer.in_flight.take(), buffer.fifo.is_some())
        };

        match msg {
            Some(msg) => {
                let handler = self.shared.handlers.read().transmit.clone();
                if let Some(handler) = handler {
                    handler.on_transmit(&msg, index);
                }
            }
            None => trace!(channel = ?self.shared.channel, index, "transmit event without frame in flight"),
        }

        if has_fifo {
            self.shared.drain(index)?;
        }
        Ok(())
    }
}
