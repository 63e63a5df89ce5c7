//! Hardware-independent CAN controller core.
//!
//! A [`Driver`] wraps a hardware implementation and opens one [`Port`] per
//! CAN channel. The port carries the whole controller model:
//!
//! - bit timing and operating mode (`bitrate`, `can_mode`, `can_state`)
//! - a table of up to [`BUFFER_MAX`] message buffers, each fixed to transmit
//!   or receive, addressed from index 1
//! - optional [`Fifo`] queues bound to buffers
//! - statistics and the hardware description
//! - receive/transmit/error [`Handlers`]
//!
//! The hardware side pushes events through [`PortEvents`], obtained from
//! `Port::events`.
//!
//! # Examples
//!
//! ```rust
//! use libcancore::controller::{Direction, Driver, PortConfig};
//! use libcancore::data_link::CanMode;
//! use libcancore::physical::bitrate::{DataBitrate, NominalBitrate};
//! use libcancore::physical::virtual_can::VirtualHardware;
//! use libcancore::types::{Channel, MsgFlags};
//!
//! let driver = Driver::new(VirtualHardware::new(1));
//! let port = driver.init(Channel::Channel1, PortConfig::default()).unwrap();
//! port.bitrate(NominalBitrate::Rate500K, DataBitrate::None).unwrap();
//!
//! port.buffer_config(1, 0x100, 0, MsgFlags::NONE, Direction::Transmit).unwrap();
//! port.buffer_set_dlc(1, 2).unwrap();
//! port.buffer_set_data(1, &[0x11, 0x22], 0).unwrap();
//!
//! port.can_mode(CanMode::Start).unwrap();
//! port.buffer_send(1).unwrap();
//! assert_eq!(port.statistic().unwrap().transmitted, 1);
//! ```

mod buffer;
mod driver;
mod events;
mod fifo;
mod handler;
mod port;
mod statistic;


pub use buffer::{Direction, BUFFER_MAX};
pub use driver::{ChannelMap, ConfigFlags, Driver, MultiChannel, PortConfig, SingleChannel};
pub use events::{BufferEvent, PortEvents};
pub use fifo::Fifo;
pub use handler::{Delivery, ErrorHandler, Handlers, ReceiveHandler, TransmitHandler};
pub use port::Port;
pub use statistic::Statistic;
