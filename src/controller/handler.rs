//! Event handlers installed with `Port::int_functions`.
//!
//! Handlers run synchronously on the event path, i.e. on whatever thread the
//! hardware collaborator delivers events from. They must not block and must
//! not do unbounded work. No core lock is held while a handler runs.

use crate::data_link::ControllerState;
use crate::types::{BufferIndex, CanMessage};
use std::fmt;
use std::sync::Arc;

/// What happens to a received frame after the receive handler saw it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The handler took the frame; it is not stored anywhere else
    Consumed,
    /// The frame also goes to the buffer's FIFO, or its single slot
    Forward,
}

pub trait ReceiveHandler: Send + Sync {
    fn on_receive(&self, msg: &CanMessage, index: BufferIndex) -> Delivery;
}

pub trait TransmitHandler: Send + Sync {
    fn on_transmit(&self, msg: &CanMessage, index: BufferIndex);
}

pub trait ErrorHandler: Send + Sync {
    fn on_error(&self, state: &ControllerState);
}

impl<F> ReceiveHandler for F
where
    F: Fn(&CanMessage, BufferIndex) -> Delivery + Send + Sync,
{
    fn on_receive(&self, msg: &CanMessage, index: BufferIndex) -> Delivery {
        self(msg, index)
    }
}

impl<F> TransmitHandler for F
where
    F: Fn(&CanMessage, BufferIndex) + Send + Sync,
{
    fn on_transmit(&self, msg: &CanMessage, index: BufferIndex) {
        self(msg, index)
    }
}

impl<F> ErrorHandler for F
where
    F: Fn(&ControllerState) + Send + Sync,
{
    fn on_error(&self, state: &ControllerState) {
        self(state)
    }
}

/// Set of up to three handlers; an absent handler skips that category
#[derive(Clone, Default)]
pub struct Handlers {
    pub receive: Option<Arc<dyn ReceiveHandler>>,
    pub transmit: Option<Arc<dyn TransmitHandler>>,
    pub error: Option<Arc<dyn ErrorHandler>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_receive<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CanMessage, BufferIndex) -> Delivery + Send + Sync + 'static,
    {
        self.receive = Some(Arc::new(handler));
        self
    }

    pub fn on_transmit<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CanMessage, BufferIndex) + Send + Sync + 'static,
    {
        self.transmit = Some(Arc::new(handler));
        self
    }

    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ControllerState) + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(handler));
        self
    }

    /// Installs a receive handler object, e.g. a protocol stack
    pub fn with_receive_handler(mut self, handler: Arc<dyn ReceiveHandler>) -> Self {
        self.receive = Some(handler);
        self
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("receive", &self.receive.is_some())
            .field("transmit", &self.transmit.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}
