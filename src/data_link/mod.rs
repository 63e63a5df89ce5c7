//! Controller state as reported by the data link layer.
//!
//! The hardware collaborator derives the bus state from its transmit and
//! receive error counters and reports it through a [`StateReport`]. The core
//! keeps the latest snapshot in a [`ControllerState`] together with the
//! operating mode it controls itself.

/// CAN bus error state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum BusState {
    #[default]
    ErrorActive,
    ErrorWarning,
    ErrorPassive,
    BusOff,
}

impl BusState {
    /// Bus state implied by a pair of error counters (ISO 11898-1 limits)
    pub fn from_counters(tec: u16, rec: u8) -> Self {
        if tec > 255 {
            BusState::BusOff
        } else if tec > 127 || rec > 127 {
            BusState::ErrorPassive
        } else if tec >= 96 || rec >= 96 {
            BusState::ErrorWarning
        } else {
            BusState::ErrorActive
        }
    }

    pub fn is_bus_off(self) -> bool {
        self == BusState::BusOff
    }
}

/// Operating mode of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperatingMode {
    #[default]
    Stopped,
    Started,
    ListenOnly,
    /// Stopped by the core after bus-off while auto-stop was armed
    StoppedOnBusError,
}

impl OperatingMode {
    /// Frames may be received
    pub fn is_running(self) -> bool {
        matches!(self, OperatingMode::Started | OperatingMode::ListenOnly)
    }

    /// Frames may be transmitted
    pub fn can_transmit(self) -> bool {
        self == OperatingMode::Started
    }

    pub fn is_stopped(self) -> bool {
        !self.is_running()
    }
}

/// Mode requested through `Port::can_mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanMode {
    Start,
    Stop,
    /// Start, and stop automatically once bus-off is reached
    StopOnBusError,
    ListenOnly,
}

/// CAN error types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorType {
    #[default]
    None,
    Bit0,      // Transmitted 0 but received 1
    Bit1,      // Transmitted 1 but received 0
    Stuff,     // Bit stuffing error
    Form,      // Form error
    Crc,       // CRC error
    Ack,       // No acknowledgment received
    Other(u8), // Other error types
}

/// State change delivered by the hardware collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateReport {
    pub bus: BusState,
    /// Transmit error counter; exceeds 255 only at bus-off
    pub tx_errors: u16,
    pub rx_errors: u8,
}

impl StateReport {
    pub fn new(bus: BusState) -> Self {
        Self {
            bus,
            tx_errors: 0,
            rx_errors: 0,
        }
    }

    pub fn with_counters(bus: BusState, tx_errors: u16, rx_errors: u8) -> Self {
        Self {
            bus,
            tx_errors,
            rx_errors,
        }
    }

    /// Report for controllers that only expose their error counters
    pub fn from_counters(tx_errors: u16, rx_errors: u8) -> Self {
        Self::with_counters(BusState::from_counters(tx_errors, rx_errors), tx_errors, rx_errors)
    }
}

/// Snapshot returned by `Port::can_state`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerState {
    pub bus: BusState,
    pub mode: OperatingMode,
    pub last_error: ErrorType,
    pub tx_errors: u16,
    pub rx_errors: u8,
}
