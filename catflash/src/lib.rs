//! # catflash
//!
//! A library for flashing AVR32U4-class boards (Arduino Leonardo, Pro Micro)
//! through their resident Caterina bootloader, over a serial transport.
//!
//! This crate provides:
//!
//! - The Caterina command/response protocol driver (handshake, device
//!   identification, block-level flash and EEPROM I/O)
//! - Read, write (+ optional EEPROM) and verify workflows with progress
//!   reporting and guaranteed transport cleanup
//! - A narrow byte-transport abstraction with a native `serialport`-backed
//!   implementation
//!
//! ## Supported Chips
//!
//! - ATmega32U4 (signature `0x1E9587`)
//!
//! ## Features
//!
//! - `native` (default): serial transport via the `serialport` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! use catflash::CaterinaFlasher;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reset the board first so the bootloader window is open.
//!     let flasher = CaterinaFlasher::open("/dev/ttyACM0", 57600)?;
//!
//!     let image = std::fs::read("firmware.bin")?;
//!     flasher.write_firmware(&image, None, &mut |msg| {
//!         if msg.len() == 1 {
//!             print!("{msg}");
//!         } else {
//!             println!("{msg}");
//!         }
//!     })?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod device;
pub mod error;
pub mod flasher;
pub mod port;
pub mod protocol;

#[cfg(test)]
pub(crate) mod testutil;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, list_ports};
pub use {
    buffer::{DEFAULT_TIMEOUT_TICKS, ERASE_TIMEOUT_TICKS, RxPusher, RxQueue, SystemTicker, Ticker},
    device::{ATMEGA32U4, McuDescriptor, SUPPORTED_MCUS, by_signature},
    error::{Error, Result},
    flasher::CaterinaFlasher,
    port::{DEFAULT_BAUD, KnownVendor, PortInfo, SerialConfig, Transport},
    protocol::{MemorySection, Session},
};
