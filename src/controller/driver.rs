use super::port::Port;
use crate::error::{CoreError, Result};
use crate::physical::{Controller, Hardware};
use crate::types::{Channel, Config};
use bitflags::bitflags;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

bitflags! {
    /// Options applied when a port is opened
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConfigFlags: u32 {
        const NONE = 0;
        /// Single-channel operation: the requested channel is ignored and
        /// the hardware's first channel is opened
        const SMALL_CODE = 1 << 0;
        /// Forward every error frame to the error handler
        const ERROR_FRAMES = 1 << 1;
        /// Stamp received frames that arrive without a timestamp
        const TIMESTAMPS = 1 << 2;
    }
}

/// Port configuration passed to [`Driver::init`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortConfig {
    pub flags: ConfigFlags,
}

impl PortConfig {
    pub fn new(flags: ConfigFlags) -> Self {
        Self { flags }
    }

    /// Channel selection strategy implied by the flags
    pub fn channel_map(&self) -> &'static dyn ChannelMap {
        if self.flags.contains(ConfigFlags::SMALL_CODE) {
            &SingleChannel
        } else {
            &MultiChannel
        }
    }
}

impl Config for PortConfig {
    fn validate(&self) -> Result<()> {
        if ConfigFlags::from_bits(self.flags.bits()).is_none() {
            return Err(CoreError::InvalidParameter("unknown configuration flag"));
        }
        Ok(())
    }
}

/// Maps the channel a caller asks for onto a channel of the hardware
pub trait ChannelMap: Send + Sync {
    fn resolve(&self, requested: Channel, available: &[Channel]) -> Result<Channel>;
}

/// Every channel of the hardware is addressable
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiChannel;

impl ChannelMap for MultiChannel {
    fn resolve(&self, requested: Channel, available: &[Channel]) -> Result<Channel> {
        if available.contains(&requested) {
            Ok(requested)
        } else {
            Err(CoreError::InvalidChannel(requested))
        }
    }
}

/// Channel parameter is elided; the first hardware channel is always used
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleChannel;

impl ChannelMap for SingleChannel {
    fn resolve(&self, _requested: Channel, available: &[Channel]) -> Result<Channel> {
        available
            .first()
            .copied()
            .ok_or_else(|| CoreError::InitFail("hardware provides no channel".to_owned()))
    }
}

/// Channels currently held by an open port
#[derive(Debug, Default)]
pub(crate) struct ChannelRegistry {
    open: Mutex<HashSet<Channel>>,
}

impl ChannelRegistry {
    fn acquire(&self, channel: Channel) -> Result<()> {
        if self.open.lock().insert(channel) {
            Ok(())
        } else {
            Err(CoreError::ChannelInUse(channel))
        }
    }

    pub(crate) fn release(&self, channel: Channel) {
        self.open.lock().remove(&channel);
    }

    fn contains(&self, channel: Channel) -> bool {
        self.open.lock().contains(&channel)
    }
}

/// Entry point: owns the hardware and hands out one [`Port`] per channel
pub struct Driver<H: Hardware> {
    hardware: H,
    registry: Arc<ChannelRegistry>,
}

impl<H: Hardware> Driver<H> {
    pub fn new(hardware: H) -> Self {
        Self {
            hardware,
            registry: Arc::new(ChannelRegistry::default()),
        }
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    /// True while a port holds `channel`
    pub fn is_open(&self, channel: Channel) -> bool {
        self.registry.contains(channel)
    }

    /// Opens `channel` and returns its port.
    ///
    /// The controller is left stopped with the hardware's default bit rate.
    pub fn init(&self, channel: Channel, config: PortConfig) -> Result<Port<H::Controller>> {
        config
            .validate()
            .map_err(|e| CoreError::InitFail(e.to_string()))?;

        let channel = config
            .channel_map()
            .resolve(channel, self.hardware.channels())?;
        self.registry.acquire(channel)?;

        match self.open(channel, config) {
            Ok(port) => {
                info!(?channel, flags = ?config.flags, "CAN port opened");
                Ok(port)
            }
            Err(e) => {
                self.registry.release(channel);
                debug!(?channel, error = %e, "CAN port open failed");
                Err(e)
            }
        }
    }

    fn open(&self, channel: Channel, config: PortConfig) -> Result<Port<H::Controller>> {
        let mut controller = self.hardware.claim(channel).map_err(|e| match e {
            CoreError::Hardware(_) | CoreError::InvalidChannel(_) => e,
            other => CoreError::InitFail(other.to_string()),
        })?;

        let info = controller.info();
        let unusable = if info.buffer_count == 0 {
            Some(CoreError::InitFail(
                "controller reports no message buffers".to_owned(),
            ))
        } else if config.flags.contains(ConfigFlags::ERROR_FRAMES) && !info.supports_error_frames {
            Some(CoreError::NotSupported("error frame reporting"))
        } else {
            None
        };
        if let Some(err) = unusable {
            if let Err(e) = controller.release() {
                warn!(?channel, error = %e, "releasing rejected controller failed");
            }
            return Err(err);
        }

        Ok(Port::new(
            channel,
            config,
            info,
            controller,
            Arc::clone(&self.registry),
        ))
    }
}
