use crate::error::{CoreError, Result};
use crate::types::Config;

/// Bit timing applied to one phase of a CAN frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitTiming {
    pub bitrate: u32,
    pub sample_point: f32,
    pub sjw: u8,
}

impl Config for BitTiming {
    fn validate(&self) -> Result<()> {
        if self.bitrate == 0 {
            return Err(CoreError::InvalidParameter("bitrate must not be zero"));
        }
        if self.sample_point <= 0.0 || self.sample_point >= 1.0 {
            return Err(CoreError::InvalidParameter("sample point must be within (0, 1)"));
        }
        if self.sjw == 0 {
            return Err(CoreError::InvalidParameter("SJW must not be zero"));
        }
        Ok(())
    }
}

/// Nominal (arbitration phase) bit rate selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NominalBitrate {
    Rate10K,      // 10kbit/sec, 87.5% sample point
    Rate20K,      // 20kbit/sec, 87.5% sample point
    Rate50K,      // 50kbit/sec, 87.5% sample point
    Rate100K,     // 100kbit/sec, 87.5% sample point
    Rate125K,     // 125kbit/sec, 87.5% sample point
    Rate250K,     // 250kbit/sec, 87.5% sample point
    Rate500K,     // 500kbit/sec, 87.5% sample point
    Rate800K,     // 800kbit/sec, 80% sample point
    Rate1M,       // 1Mbit/sec, 75% sample point
    Custom(u32),  // Raw bit rate, 87.5% sample point
}

/// Data phase bit rate selection for CAN FD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBitrate {
    /// Classic CAN only, no bit rate switch
    #[default]
    None,
    Rate1M,      // 1Mbit/sec, 75% sample point
    Rate2M,      // 2Mbit/sec, 75% sample point
    Rate4M,      // 4Mbit/sec, 75% sample point
    Rate5M,      // 5Mbit/sec, 75% sample point
    Rate8M,      // 8Mbit/sec, 75% sample point
    Custom(u32), // Raw bit rate, 75% sample point
}

impl NominalBitrate {
    pub fn timing(self) -> BitTiming {
        let (bitrate, sample_point, sjw) = match self {
            NominalBitrate::Rate10K => (10_000, 0.875, 1),
            NominalBitrate::Rate20K => (20_000, 0.875, 1),
            NominalBitrate::Rate50K => (50_000, 0.875, 1),
            NominalBitrate::Rate100K => (100_000, 0.875, 1),
            NominalBitrate::Rate125K => (125_000, 0.875, 1),
            NominalBitrate::Rate250K => (250_000, 0.875, 1),
            NominalBitrate::Rate500K => (500_000, 0.875, 1),
            NominalBitrate::Rate800K => (800_000, 0.8, 1),
            NominalBitrate::Rate1M => (1_000_000, 0.75, 1),
            NominalBitrate::Custom(rate) => (rate, 0.875, 1),
        };
        BitTiming {
            bitrate,
            sample_point,
            sjw,
        }
    }
}

impl DataBitrate {
    /// Timing for the data phase, `None` for classic-only operation
    pub fn timing(self) -> Option<BitTiming> {
        let bitrate = match self {
            DataBitrate::None => return None,
            DataBitrate::Rate1M => 1_000_000,
            DataBitrate::Rate2M => 2_000_000,
            DataBitrate::Rate4M => 4_000_000,
            DataBitrate::Rate5M => 5_000_000,
            DataBitrate::Rate8M => 8_000_000,
            DataBitrate::Custom(rate) => rate,
        };
        Some(BitTiming {
            bitrate,
            sample_point: 0.75,
            sjw: 1,
        })
    }

    pub fn is_none(self) -> bool {
        self == DataBitrate::None
    }
}

/// Bit rate pair applied to a port
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitrateConfig {
    pub nominal: BitTiming,
    pub data: Option<BitTiming>,
}

impl BitrateConfig {
    pub fn new(nominal: NominalBitrate, data: DataBitrate) -> Self {
        Self {
            nominal: nominal.timing(),
            data: data.timing(),
        }
    }

    pub fn is_fd(&self) -> bool {
        self.data.is_some()
    }
}

impl Config for BitrateConfig {
    fn validate(&self) -> Result<()> {
        self.nominal.validate()?;
        if let Some(data) = &self.data {
            data.validate()?;
            if data.bitrate < self.nominal.bitrate {
                return Err(CoreError::InvalidParameter(
                    "data bit rate must not be below the nominal bit rate",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_rates_resolve() {
        assert_eq!(NominalBitrate::Rate500K.timing().bitrate, 500_000);
        assert_eq!(NominalBitrate::Custom(33_333).timing().bitrate, 33_333);
        assert_eq!(DataBitrate::Rate2M.timing().unwrap().bitrate, 2_000_000);
        assert!(DataBitrate::None.timing().is_none());
    }

    #[test]
    fn data_rate_below_nominal_is_rejected() {
        let config = BitrateConfig::new(NominalBitrate::Rate1M, DataBitrate::Custom(500_000));
        assert!(config.validate().is_err());

        let config = BitrateConfig::new(NominalBitrate::Rate500K, DataBitrate::Rate4M);
        assert!(config.validate().is_ok());
        assert!(config.is_fd());
    }

    #[test]
    fn zero_rate_is_rejected() {
        let config = BitrateConfig::new(NominalBitrate::Custom(0), DataBitrate::None);
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidParameter(_))
        ));
    }
}
