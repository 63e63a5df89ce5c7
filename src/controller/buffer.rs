use super::fifo::Fifo;
use crate::error::{CoreError, Result};
use crate::types::{
    dlc_to_len, validate_dlc, BufferIndex, CanId, CanMessage, MsgFlags, Timestamp, EXT_ID_MAX,
    FD_DATA_MAX, STD_ID_MAX,
};
use std::sync::Arc;

/// Highest buffer index the table can address
pub const BUFFER_MAX: BufferIndex = 32;

/// Direction a message buffer is fixed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Transmit,
    Receive,
}

/// One slot of the message buffer table
#[derive(Debug)]
pub(crate) struct MessageBuffer {
    pub(crate) id: CanId,
    pub(crate) mask: u32,
    pub(crate) flags: MsgFlags,
    pub(crate) direction: Direction,
    pub(crate) dlc: u8,
    pub(crate) data: [u8; FD_DATA_MAX],
    pub(crate) timestamp: Timestamp,
    pub(crate) enabled: bool,
    pub(crate) fifo: Option<Arc<Fifo>>,
    /// Frame handed to the controller and not yet confirmed
    pub(crate) in_flight: Option<CanMessage>,
    /// Identifier and flags of the last frame stored in a receive slot
    received: Option<(CanId, MsgFlags)>,
    unread: bool,
    pub(crate) overrun: bool,
}

impl MessageBuffer {
    /// Validates a buffer configuration and builds the slot.
    ///
    /// The identifier format follows `flags`: `EXT` selects a 29-bit
    /// identifier. Transmit buffers drop the acceptance mask.
    pub(crate) fn new(
        identifier: u32,
        accept_mask: u32,
        flags: MsgFlags,
        direction: Direction,
    ) -> Result<Self> {
        if flags.intersects(MsgFlags::ESI) {
            return Err(CoreError::InvalidParameter("ESI is not a buffer control flag"));
        }
        if flags.contains(MsgFlags::FDF | MsgFlags::RTR) {
            return Err(CoreError::InvalidParameter("FD frames cannot be remote frames"));
        }
        if flags.contains(MsgFlags::BRS) && !flags.contains(MsgFlags::FDF) {
            return Err(CoreError::InvalidParameter("BRS requires an FD buffer"));
        }

        let id = if flags.contains(MsgFlags::EXT) {
            if identifier > EXT_ID_MAX {
                return Err(CoreError::InvalidParameter("extended identifier exceeds 29 bits"));
            }
            CanId::Extended(identifier)
        } else {
            if identifier > STD_ID_MAX {
                return Err(CoreError::InvalidParameter("standard identifier exceeds 11 bits"));
            }
            CanId::Standard(identifier as u16)
        };

        let mask = match direction {
            Direction::Receive => accept_mask & id.full_mask(),
            Direction::Transmit => 0,
        };

        Ok(Self {
            id,
            mask,
            flags,
            direction,
            dlc: 0,
            data: [0; FD_DATA_MAX],
            timestamp: 0,
            enabled: true,
            fifo: None,
            in_flight: None,
            received: None,
            unread: false,
            overrun: false,
        })
    }

    pub(crate) fn is_fd(&self) -> bool {
        self.flags.contains(MsgFlags::FDF)
    }

    /// Payload length implied by the current DLC
    pub(crate) fn data_len(&self) -> usize {
        dlc_to_len(self.dlc, self.is_fd()).unwrap_or(0)
    }

    pub(crate) fn set_dlc(&mut self, dlc: u8) -> Result<()> {
        validate_dlc(dlc, self.is_fd())?;
        self.dlc = dlc;
        Ok(())
    }

    fn check_range(&self, start: usize, size: usize) -> Result<()> {
        let len = self.data_len();
        match start.checked_add(size) {
            Some(end) if end <= len => Ok(()),
            _ => Err(CoreError::DataLength(format!(
                "bytes {}..{} exceed DLC length {}",
                start,
                start.saturating_add(size),
                len
            ))),
        }
    }

    pub(crate) fn write_data(&mut self, start: usize, bytes: &[u8]) -> Result<()> {
        self.check_range(start, bytes.len())?;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn read_data(&mut self, start: usize, out: &mut [u8]) -> Result<()> {
        self.check_range(start, out.len())?;
        out.copy_from_slice(&self.data[start..start + out.len()]);
        self.unread = false;
        Ok(())
    }

    /// Acceptance filtering: bits set in the mask must match
    pub(crate) fn accepts(&self, msg: &CanMessage) -> bool {
        self.enabled
            && self.direction == Direction::Receive
            && self.id.is_extended() == msg.id.is_extended()
            && (msg.id.raw() & self.mask) == (self.id.raw() & self.mask)
            && (self.is_fd() || !msg.is_fd())
    }

    /// Frame assembled from the slot contents
    pub(crate) fn message(&self) -> CanMessage {
        let (id, flags) = self.received.unwrap_or((self.id, self.flags));
        CanMessage {
            id,
            flags,
            dlc: self.dlc,
            data: self.data,
            timestamp: self.timestamp,
        }
    }

    /// Stores a received frame in the single slot. Returns true when unread
    /// data was overwritten.
    pub(crate) fn store(&mut self, msg: &CanMessage) -> bool {
        let overwritten = self.unread;
        self.received = Some((msg.id, msg.flags));
        self.dlc = msg.dlc;
        self.data = msg.data;
        self.timestamp = msg.timestamp;
        self.unread = true;
        self.overrun |= overwritten;
        overwritten
    }
}

/// Fixed arena of message buffers, addressed 1..=BUFFER_MAX
#[derive(Debug)]
pub(crate) struct BufferTable {
    slots: Vec<Option<MessageBuffer>>,
}

impl BufferTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: (0..BUFFER_MAX).map(|_| None).collect(),
        }
    }

    fn slot_mut(&mut self, index: BufferIndex) -> &mut Option<MessageBuffer> {
        &mut self.slots[usize::from(index - 1)]
    }

    /// Buffer at a checked index, or `BufferNotConfigured`
    pub(crate) fn get(&self, index: BufferIndex) -> Result<&MessageBuffer> {
        self.slots[usize::from(index - 1)]
            .as_ref()
            .ok_or(CoreError::BufferNotConfigured(index))
    }

    pub(crate) fn get_mut(&mut self, index: BufferIndex) -> Result<&mut MessageBuffer> {
        self.slot_mut(index)
            .as_mut()
            .ok_or(CoreError::BufferNotConfigured(index))
    }

    /// Installs a buffer, returning the configuration it replaced
    pub(crate) fn insert(&mut self, index: BufferIndex, buffer: MessageBuffer) -> Option<MessageBuffer> {
        self.slot_mut(index).replace(buffer)
    }

    pub(crate) fn remove(&mut self, index: BufferIndex) -> Option<MessageBuffer> {
        self.slot_mut(index).take()
    }

    /// Lowest-indexed receive buffer accepting `msg`
    pub(crate) fn find_receiver(&self, msg: &CanMessage) -> Option<BufferIndex> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|b| b.accepts(msg)))
            .map(|pos| pos as BufferIndex + 1)
    }

    /// Indices of configured buffers with a FIFO attached
    pub(crate) fn fifo_indices(&self, direction: Direction) -> Vec<BufferIndex> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(pos, slot)| match slot {
                Some(b) if b.direction == direction && b.fifo.is_some() => {
                    Some(pos as BufferIndex + 1)
                }
                _ => None,
            })
            .collect()
    }

    /// Removes every buffer, detaching FIFOs. Returns discarded FIFO entries.
    pub(crate) fn clear(&mut self) -> usize {
        let mut discarded = 0;
        for slot in self.slots.iter_mut() {
            if let Some(buffer) = slot.take() {
                if let Some(fifo) = buffer.fifo {
                    discarded += fifo.detach();
                }
            }
        }
        discarded
    }

    pub(crate) fn clear_in_flight(&mut self) {
        for buffer in self.slots.iter_mut().flatten() {
            buffer.in_flight = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transmit_buffer_ignores_mask() {
        let buffer =
            MessageBuffer::new(0x100, 0x7FF, MsgFlags::NONE, Direction::Transmit).unwrap();
        assert_eq!(buffer.mask, 0);
        assert_eq!(buffer.id, CanId::Standard(0x100));
    }

    #[test]
    fn identifier_width_follows_ext_flag() {
        assert!(MessageBuffer::new(0x800, 0, MsgFlags::NONE, Direction::Receive).is_err());
        let buffer =
            MessageBuffer::new(0x800, 0, MsgFlags::EXT, Direction::Receive).unwrap();
        assert_eq!(buffer.id, CanId::Extended(0x800));
    }

    #[test]
    fn conflicting_flags_are_rejected() {
        assert!(MessageBuffer::new(1, 0, MsgFlags::FDF | MsgFlags::RTR, Direction::Transmit).is_err());
        assert!(MessageBuffer::new(1, 0, MsgFlags::BRS, Direction::Transmit).is_err());
    }

    #[test]
    fn acceptance_mask_filters_identifiers() {
        let buffer =
            MessageBuffer::new(0x120, 0x7F0, MsgFlags::NONE, Direction::Receive).unwrap();
        let hit = CanMessage::new(CanId::Standard(0x12A), &[]).unwrap();
        let miss = CanMessage::new(CanId::Standard(0x13A), &[]).unwrap();
        let ext = CanMessage::new(CanId::Extended(0x12A), &[]).unwrap();
        assert!(buffer.accepts(&hit));
        assert!(!buffer.accepts(&miss));
        assert!(!buffer.accepts(&ext));
    }

    #[test]
    fn data_access_is_bounded_by_dlc() {
        let mut buffer =
            MessageBuffer::new(0x100, 0, MsgFlags::NONE, Direction::Transmit).unwrap();
        buffer.set_dlc(4).unwrap();
        assert!(buffer.write_data(2, &[1, 2]).is_ok());
        assert!(matches!(
            buffer.write_data(3, &[1, 2]),
            Err(CoreError::DataLength(_))
        ));
        assert!(buffer.set_dlc(9).is_err());
    }

    #[test]
    fn store_reports_overwrite_of_unread_data() {
        let mut buffer =
            MessageBuffer::new(0x100, 0x7FF, MsgFlags::NONE, Direction::Receive).unwrap();
        let msg = CanMessage::new(CanId::Standard(0x100), &[1, 2]).unwrap();
        assert!(!buffer.store(&msg));
        assert!(buffer.store(&msg));
        let mut out = [0u8; 2];
        buffer.read_data(0, &mut out).unwrap();
        assert_eq!(out, [1, 2]);
        assert!(!buffer.store(&msg));
        assert!(buffer.overrun);
    }

    #[test]
    fn stored_frame_keeps_filter_identifier() {
        let mut buffer =
            MessageBuffer::new(0x120, 0x7F0, MsgFlags::NONE, Direction::Receive).unwrap();
        let msg = CanMessage::new(CanId::Standard(0x125), &[7]).unwrap();
        buffer.store(&msg);
        assert_eq!(buffer.id, CanId::Standard(0x120));
        assert_eq!(buffer.message().id, CanId::Standard(0x125));
    }

    #[test]
    fn table_finds_lowest_matching_receiver() {
        let mut table = BufferTable::new();
        table.insert(
            5,
            MessageBuffer::new(0x200, 0x700, MsgFlags::NONE, Direction::Receive).unwrap(),
        );
        table.insert(
            3,
            MessageBuffer::new(0x200, 0x7FF, MsgFlags::NONE, Direction::Receive).unwrap(),
        );
        let msg = CanMessage::new(CanId::Standard(0x200), &[]).unwrap();
        assert_eq!(table.find_receiver(&msg), Some(3));
        let msg = CanMessage::new(CanId::Standard(0x2FF), &[]).unwrap();
        assert_eq!(table.find_receiver(&msg), Some(5));
        assert!(matches!(table.get(1), Err(CoreError::BufferNotConfigured(1))));
    }
}
