//! Hardware collaborator interface.
//!
//! The core never performs physical I/O itself. A hardware driver implements
//! [`Hardware`] to enumerate and claim channels, and hands out one
//! [`Controller`] per claimed channel. The controller applies bit timing and
//! operating mode and accepts frames for transmission. Events travelling the
//! other way (received frames, transmit completion, bus state changes) are
//! pushed into the core through `controller::PortEvents`.
//!
//! Two building blocks live here:
//! - [`bitrate`]: named bit rate selections and the resulting bit timing
//! - [`virtual_can`]: an in-memory controller for tests and hardware-less use
//!
//! # Examples
//!
//! ```rust
//! use libcancore::physical::virtual_can::VirtualHardware;
//! use libcancore::physical::Hardware;
//! use libcancore::types::Channel;
//!
//! let hardware = VirtualHardware::new(2);
//! assert_eq!(hardware.channels().len(), 2);
//! assert!(hardware.claim(Channel::Channel1).is_ok());
//! ```

pub mod bitrate;
pub mod virtual_can;

use crate::data_link::OperatingMode;
use crate::error::Result;
use crate::types::{BufferIndex, CanMessage, Channel};
use bitrate::BitTiming;

/// Hardware description of a CAN controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareInfo {
    pub name: String,
    pub version: (u8, u8),
    pub channels: u8,
    /// Number of physical message buffers, addressed 1..=buffer_count
    pub buffer_count: u8,
    pub supports_fd: bool,
    pub supports_listen_only: bool,
    pub supports_error_frames: bool,
    pub timestamp_resolution_ns: u32,
}

impl Default for HardwareInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: (0, 0),
            channels: 1,
            buffer_count: 1,
            supports_fd: false,
            supports_listen_only: false,
            supports_error_frames: false,
            timestamp_resolution_ns: 0,
        }
    }
}

/// One claimed CAN channel of a hardware driver
pub trait Controller: Send {
    fn info(&self) -> HardwareInfo;
    fn set_bitrate(&mut self, nominal: &BitTiming, data: Option<&BitTiming>) -> Result<()>;
    fn set_mode(&mut self, mode: OperatingMode) -> Result<()>;
    /// Hands a frame to the controller for transmission from buffer `index`.
    /// Must return without waiting for the bus.
    fn transmit(&mut self, index: BufferIndex, msg: &CanMessage) -> Result<()>;
    fn release(&mut self) -> Result<()>;
}

/// Hardware driver able to open CAN channels
pub trait Hardware: Send + Sync {
    type Controller: Controller;

    /// Channels this hardware provides
    fn channels(&self) -> &[Channel];
    /// Claims the physical interface behind `channel`
    fn claim(&self, channel: Channel) -> Result<Self::Controller>;
}
