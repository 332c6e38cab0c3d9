//! Error types for catflash.

use std::io;
use thiserror::Error;

/// Result type for catflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for catflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A read deadline elapsed before enough bytes arrived.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The device did not answer the handshake with the Caterina identifier.
    #[error("Caterina bootloader not found")]
    BootloaderNotFound,

    /// The bootloader declined buffered memory access, or block I/O was
    /// attempted before a buffer size was negotiated.
    #[error("Bootloader does not support buffered memory access")]
    BufferAccessUnsupported,

    /// A command was not acknowledged with `0x0D`.
    #[error("Command rejected: expected ack 0x0d, got {received:#04x}")]
    CommandRejected {
        /// The byte the device answered instead of the acknowledgment.
        received: u8,
    },

    /// The device signature is not in the descriptor table.
    #[error("Unsupported device signature {signature:#08x}")]
    UnsupportedDevice {
        /// Signature read back from the device.
        signature: u32,
    },

    /// An image does not fit the targeted memory region.
    #[error("Image too large: {len} bytes exceeds limit of {limit} bytes")]
    ImageTooLarge {
        /// Length of the offending image.
        len: usize,
        /// Capacity of the targeted region.
        limit: usize,
    },

    /// Read-back data diverged from the supplied image.
    #[error("Verify failed at address {offset:#x}")]
    VerifyMismatch {
        /// First offset at which the device contents differ.
        offset: usize,
    },
}
