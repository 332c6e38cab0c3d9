//! Byte transport abstraction.
//!
//! The protocol driver depends on a deliberately narrow contract: an opened
//! full-duplex byte stream whose inbound bytes are pushed into the session's
//! receive queue, with `write` and `close` on the outbound side. On native
//! platforms the contract is implemented over the `serialport` crate; tests
//! implement it with in-memory doubles.
//!
//! ```text
//! +------------------+
//! |  Protocol driver | --- write(cmd bytes) --->  Transport
//! |    (Session)     | <-- RxPusher::push ------  reader thread
//! +------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

use crate::error::Result;

/// Caterina bootloaders enumerate as a CDC-ACM port at this rate.
pub const DEFAULT_BAUD: u32 = 57_600;

/// The byte transport contract consumed by the protocol driver.
///
/// Implementations deliver inbound bytes through the [`RxPusher`] they were
/// constructed with, in arrival order and without gaps.
///
/// [`RxPusher`]: crate::buffer::RxPusher
pub trait Transport {
    /// Write a byte sequence to the device.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Close the transport and release the underlying handle.
    ///
    /// Called exactly once per session; safe on an already-closed transport.
    fn close(&mut self) -> Result<()>;

    /// Name of the underlying port, for diagnostics.
    fn name(&self) -> &str;
}

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate; Caterina ignores the actual rate but 57600 is conventional.
    pub baud_rate: u32,
}

impl SerialConfig {
    /// Create a configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
        }
    }
}

/// Serial port information, as reported by enumeration.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// USB vendors whose boards commonly ship a Caterina bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownVendor {
    /// Arduino SA (Leonardo, Micro).
    Arduino,
    /// SparkFun (Pro Micro).
    SparkFun,
    /// Adafruit (ItsyBitsy 32u4 and friends).
    Adafruit,
    /// Anything else.
    Unknown,
}

impl KnownVendor {
    /// Classify a USB vendor ID.
    #[must_use]
    pub fn from_vid(vid: u16) -> Self {
        match vid {
            0x2341 | 0x2A03 => Self::Arduino,
            0x1B4F => Self::SparkFun,
            0x239A => Self::Adafruit,
            _ => Self::Unknown,
        }
    }

    /// Whether this vendor is a recognized Caterina board maker.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl PortInfo {
    /// Classify the port's USB vendor.
    pub fn vendor(&self) -> KnownVendor {
        self.vid.map_or(KnownVendor::Unknown, KnownVendor::from_vid)
    }
}

// Re-export the native implementation when enabled
#[cfg(feature = "native")]
pub use native::{NativePort, list_ports};
