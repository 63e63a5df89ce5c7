// Layered CAN controller core
pub mod controller; // Ports, message buffers, FIFOs, event dispatch
pub mod data_link; // Bus state and error model
pub mod physical; // Hardware interface, bit timing, virtual controller

// Re-exports for convenience
pub use controller::{Driver, Fifo, Port, PortEvents};
pub use physical::virtual_can;

// Common types and traits
pub mod error;
pub mod types;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
