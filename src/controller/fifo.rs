use crate::error::{CoreError, Result};
use crate::types::CanMessage;
use parking_lot::Mutex;

/// Reason a frame could not be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushError {
    Full,
    Detached,
}

#[derive(Debug)]
struct Ring {
    slots: Box<[CanMessage]>,
    head: usize,
    count: usize,
    overflows: u64,
    detached: bool,
}

impl Ring {
    fn push(&mut self, msg: CanMessage) -> std::result::Result<(), PushError> {
        if self.detached {
            return Err(PushError::Detached);
        }
        let capacity = self.slots.len();
        if self.count >= capacity {
            self.overflows += 1;
            return Err(PushError::Full);
        }
        let tail = (self.head + self.count) % capacity;
        self.slots[tail] = msg;
        self.count += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<CanMessage> {
        if self.count == 0 {
            return None;
        }
        let msg = self.slots[self.head];
        self.head = (self.head + 1) % self.slots.len();
        self.count -= 1;
        Some(msg)
    }
}

/// Bounded queue of CAN messages bridging the event path and the application.
///
/// Storage is allocated once at construction; enqueue and dequeue never
/// allocate. A FIFO is bound to one message buffer with `Port::fifo_config`
/// and afterwards only reachable through the port.
#[derive(Debug)]
pub struct Fifo {
    ring: Mutex<Ring>,
}

impl Fifo {
    /// Creates a FIFO holding up to `capacity` messages
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(CoreError::InvalidParameter("FIFO capacity must not be zero"));
        }
        Ok(Self {
            ring: Mutex::new(Ring {
                slots: vec![CanMessage::default(); capacity].into_boxed_slice(),
                head: 0,
                count: 0,
                overflows: 0,
                detached: false,
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().slots.len()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let ring = self.ring.lock();
        ring.count >= ring.slots.len()
    }

    /// Number of pushes rejected because the FIFO was full
    pub fn overflow_count(&self) -> u64 {
        self.ring.lock().overflows
    }

    pub(crate) fn push(&self, msg: CanMessage) -> std::result::Result<(), PushError> {
        self.ring.lock().push(msg)
    }

    pub(crate) fn pop(&self) -> Option<CanMessage> {
        self.ring.lock().pop()
    }

    /// Dequeues into `out` in arrival order, returning the number written
    pub(crate) fn pop_into(&self, out: &mut [CanMessage]) -> usize {
        let mut ring = self.ring.lock();
        let mut read = 0;
        for slot in out.iter_mut() {
            match ring.pop() {
                Some(msg) => {
                    *slot = msg;
                    read += 1;
                }
                None => break,
            }
        }
        read
    }

    /// Marks the FIFO detached and discards pending entries.
    ///
    /// Pushes racing with the detach fail with [`PushError::Detached`] instead
    /// of landing in a queue nobody reads.
    pub(crate) fn detach(&self) -> usize {
        let mut ring = self.ring.lock();
        let discarded = ring.count;
        ring.detached = true;
        ring.head = 0;
        ring.count = 0;
        discarded
    }
}
