use crate::error::{CoreError, Result};
use bitflags::bitflags;

/// Timestamp in microseconds
pub type Timestamp = u64;

/// Buffer index inside the message buffer table, starting at 1
pub type BufferIndex = u8;

/// Largest standard (11-bit) identifier
pub const STD_ID_MAX: u32 = 0x7FF;
/// Largest extended (29-bit) identifier
pub const EXT_ID_MAX: u32 = 0x1FFF_FFFF;

/// Payload capacity of a classic CAN frame
pub const CLASSIC_DATA_MAX: usize = 8;
/// Payload capacity of a CAN FD frame
pub const FD_DATA_MAX: usize = 64;

/// Physical CAN channels a hardware driver may provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Channel1 = 1,
    Channel2,
    Channel3,
    Channel4,
    Channel5,
    Channel6,
    Channel7,
    Channel8,
}

impl Channel {
    pub const ALL: [Channel; 8] = [
        Channel::Channel1,
        Channel::Channel2,
        Channel::Channel3,
        Channel::Channel4,
        Channel::Channel5,
        Channel::Channel6,
        Channel::Channel7,
        Channel::Channel8,
    ];

    /// One-based channel number
    pub fn number(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Channel {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1..=8 => Ok(Channel::ALL[usize::from(value - 1)]),
            _ => Err(CoreError::InvalidParameter("channel number must be 1..8")),
        }
    }
}

/// CAN identifier, tagged with its frame format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanId {
    Standard(u16),
    Extended(u32),
}

impl CanId {
    /// Builds a standard identifier, rejecting values wider than 11 bits
    pub fn standard(id: u16) -> Result<Self> {
        if u32::from(id) > STD_ID_MAX {
            return Err(CoreError::InvalidParameter("standard identifier exceeds 11 bits"));
        }
        Ok(CanId::Standard(id))
    }

    /// Builds an extended identifier, rejecting values wider than 29 bits
    pub fn extended(id: u32) -> Result<Self> {
        if id > EXT_ID_MAX {
            return Err(CoreError::InvalidParameter("extended identifier exceeds 29 bits"));
        }
        Ok(CanId::Extended(id))
    }

    pub fn raw(self) -> u32 {
        match self {
            CanId::Standard(id) => u32::from(id),
            CanId::Extended(id) => id,
        }
    }

    pub fn is_extended(self) -> bool {
        matches!(self, CanId::Extended(_))
    }

    fn fits(self) -> bool {
        match self {
            CanId::Standard(id) => u32::from(id) <= STD_ID_MAX,
            CanId::Extended(id) => id <= EXT_ID_MAX,
        }
    }

    /// Mask covering every bit of this identifier's format
    pub fn full_mask(self) -> u32 {
        match self {
            CanId::Standard(_) => STD_ID_MAX,
            CanId::Extended(_) => EXT_ID_MAX,
        }
    }
}

bitflags! {
    /// Per-message and per-buffer control bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MsgFlags: u8 {
        const NONE = 0;
        const EXT = 1 << 0; // Extended frame format
        const FDF = 1 << 1; // FD frame format
        const RTR = 1 << 2; // Remote transmission request
        const BRS = 1 << 3; // Bit rate switch during data phase
        const ESI = 1 << 4; // Error state indicator of the transmitter
    }
}

// FD payload lengths indexed by DLC 9..15
const FD_LENGTHS: [usize; 7] = [12, 16, 20, 24, 32, 48, 64];

/// Converts a data length code into a payload length in bytes.
///
/// Classic frames saturate at 8 bytes for DLC 9..15, FD frames use the coded
/// lengths up to 64 bytes.
pub fn dlc_to_len(dlc: u8, fd: bool) -> Result<usize> {
    match dlc {
        0..=8 => Ok(usize::from(dlc)),
        9..=15 if fd => Ok(FD_LENGTHS[usize::from(dlc - 9)]),
        9..=15 => Ok(CLASSIC_DATA_MAX),
        _ => Err(CoreError::DataLength(format!("DLC {} out of range", dlc))),
    }
}

/// Smallest DLC whose payload can hold `len` bytes
pub fn len_to_dlc(len: usize, fd: bool) -> Result<u8> {
    if len <= CLASSIC_DATA_MAX {
        return Ok(len as u8);
    }
    if !fd {
        return Err(CoreError::DataLength(format!(
            "{} bytes exceed a classic frame",
            len
        )));
    }
    FD_LENGTHS
        .iter()
        .position(|&l| len <= l)
        .map(|pos| pos as u8 + 9)
        .ok_or_else(|| CoreError::DataLength(format!("{} bytes exceed an FD frame", len)))
}

/// Checks a DLC against the frame format it will be used with
pub fn validate_dlc(dlc: u8, fd: bool) -> Result<()> {
    let max = if fd { 15 } else { 8 };
    if dlc > max {
        return Err(CoreError::DataLength(format!(
            "DLC {} exceeds {} for {} frames",
            dlc,
            max,
            if fd { "FD" } else { "classic" }
        )));
    }
    Ok(())
}

/// CAN message as it travels through buffers and FIFOs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanMessage {
    pub id: CanId,
    pub flags: MsgFlags,
    pub dlc: u8,
    pub data: [u8; FD_DATA_MAX],
    pub timestamp: Timestamp,
}

impl Default for CanMessage {
    fn default() -> Self {
        Self {
            id: CanId::Standard(0),
            flags: MsgFlags::NONE,
            dlc: 0,
            data: [0; FD_DATA_MAX],
            timestamp: 0,
        }
    }
}

impl CanMessage {
    /// Builds a data frame, choosing the DLC from the payload length
    pub fn new(id: CanId, payload: &[u8]) -> Result<Self> {
        let fd = payload.len() > CLASSIC_DATA_MAX;
        let dlc = len_to_dlc(payload.len(), fd)?;
        let mut flags = MsgFlags::NONE;
        flags.set(MsgFlags::EXT, id.is_extended());
        flags.set(MsgFlags::FDF, fd);

        let mut msg = Self {
            id,
            flags,
            dlc,
            ..Default::default()
        };
        msg.data[..payload.len()].copy_from_slice(payload);
        msg.validate()?;
        Ok(msg)
    }

    /// Builds an FD frame even for payloads that fit a classic frame
    pub fn new_fd(id: CanId, payload: &[u8]) -> Result<Self> {
        let dlc = len_to_dlc(payload.len(), true)?;
        let mut flags = MsgFlags::FDF;
        flags.set(MsgFlags::EXT, id.is_extended());

        let mut msg = Self {
            id,
            flags,
            dlc,
            ..Default::default()
        };
        msg.data[..payload.len()].copy_from_slice(payload);
        msg.validate()?;
        Ok(msg)
    }

    /// Builds a remote transmission request
    pub fn remote(id: CanId, dlc: u8) -> Result<Self> {
        let mut flags = MsgFlags::RTR;
        flags.set(MsgFlags::EXT, id.is_extended());
        let msg = Self {
            id,
            flags,
            dlc,
            ..Default::default()
        };
        msg.validate()?;
        Ok(msg)
    }

    pub fn is_fd(&self) -> bool {
        self.flags.contains(MsgFlags::FDF)
    }

    pub fn is_remote(&self) -> bool {
        self.flags.contains(MsgFlags::RTR)
    }

    /// Number of payload bytes implied by the DLC
    pub fn len(&self) -> usize {
        if self.is_remote() {
            return 0;
        }
        dlc_to_len(self.dlc, self.is_fd()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload bytes covered by the DLC
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// Checks identifier width, flag consistency and DLC range
    pub fn validate(&self) -> Result<()> {
        if !self.id.fits() {
            return Err(CoreError::InvalidParameter("identifier exceeds its format"));
        }
        if self.id.is_extended() != self.flags.contains(MsgFlags::EXT) {
            return Err(CoreError::InvalidParameter(
                "EXT flag does not match identifier format",
            ));
        }
        if self.is_fd() && self.is_remote() {
            return Err(CoreError::InvalidParameter("FD frames cannot be remote frames"));
        }
        if !self.is_fd() && self.flags.intersects(MsgFlags::BRS | MsgFlags::ESI) {
            return Err(CoreError::InvalidParameter("BRS/ESI require an FD frame"));
        }
        validate_dlc(self.dlc, self.is_fd())
    }
}

/// Configuration trait that must be implemented by all configuration structs
pub trait Config: Send + Sync {
    fn validate(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fd_dlc_mapping() {
        assert_eq!(dlc_to_len(8, true).unwrap(), 8);
        assert_eq!(dlc_to_len(9, true).unwrap(), 12);
        assert_eq!(dlc_to_len(13, true).unwrap(), 32);
        assert_eq!(dlc_to_len(15, true).unwrap(), 64);
        assert_eq!(dlc_to_len(15, false).unwrap(), 8);
        assert!(dlc_to_len(16, true).is_err());
    }

    #[test]
    fn length_rounds_up_to_next_dlc() {
        assert_eq!(len_to_dlc(5, false).unwrap(), 5);
        assert_eq!(len_to_dlc(9, true).unwrap(), 9);
        assert_eq!(len_to_dlc(33, true).unwrap(), 14);
        assert_eq!(len_to_dlc(64, true).unwrap(), 15);
        assert!(len_to_dlc(9, false).is_err());
        assert!(len_to_dlc(65, true).is_err());
    }

    #[test]
    fn identifier_width_is_checked() {
        assert!(CanId::standard(0x7FF).is_ok());
        assert!(CanId::standard(0x800).is_err());
        assert!(CanId::extended(0x1FFF_FFFF).is_ok());
        assert!(CanId::extended(0x2000_0000).is_err());
    }

    #[test]
    fn message_constructors_set_flags() {
        let msg = CanMessage::new(CanId::Extended(0x18FF_0001), &[1, 2, 3]).unwrap();
        assert!(msg.flags.contains(MsgFlags::EXT));
        assert!(!msg.is_fd());
        assert_eq!(msg.payload(), &[1, 2, 3]);

        let long = [0xAA; 20];
        let fd = CanMessage::new(CanId::Standard(0x123), &long).unwrap();
        assert!(fd.is_fd());
        assert_eq!(fd.dlc, 11);
        assert_eq!(fd.len(), 20);

        let rtr = CanMessage::remote(CanId::Standard(0x10), 4).unwrap();
        assert!(rtr.is_remote());
        assert!(rtr.is_empty());
    }

    #[test]
    fn inconsistent_flags_are_rejected() {
        let mut msg = CanMessage::new(CanId::Standard(0x100), &[0; 8]).unwrap();
        msg.flags |= MsgFlags::BRS;
        assert!(msg.validate().is_err());

        let mut msg = CanMessage::new(CanId::Standard(0x100), &[0; 8]).unwrap();
        msg.flags |= MsgFlags::EXT;
        assert!(msg.validate().is_err());
    }

    #[test]
    fn channel_from_number() {
        assert_eq!(Channel::try_from(1).unwrap(), Channel::Channel1);
        assert_eq!(Channel::try_from(8).unwrap().number(), 8);
        assert!(Channel::try_from(0).is_err());
        assert!(Channel::try_from(9).is_err());
    }
}
