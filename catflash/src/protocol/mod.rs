//! Caterina bootloader protocol.
//!
//! Caterina is the AVR109/butterfly-style command set shipped on AVR32U4
//! boards (Arduino Leonardo, Pro Micro). Commands are single ASCII bytes,
//! optionally followed by a payload; sizes and addresses are 2-byte
//! big-endian; most commands are acknowledged with a single carriage return.
//!
//! ```text
//! host                          device
//!  | 'S' ------------------------> |
//!  | <----------------- "CATERIN" |
//!  | 'A' <hi> <lo> --------------> |
//!  | <------------------------ \r |
//!  | 'B' <hi> <lo> 'F' <payload> > |
//!  | <------------------------ \r |
//! ```

pub mod session;

use std::fmt;

/// One-byte acknowledgment every non-bulk command ends with.
pub const ACK: u8 = 0x0D;

/// Terminator of the null-terminated device type list.
pub const DEVICE_TYPE_END: u8 = 0x00;

/// Identifier returned by the software-identifier command.
pub const BOOTLOADER_ID: &[u8; 7] = b"CATERIN";

/// Caterina command bytes.
pub mod command {
    /// Read the 7-byte software identifier.
    pub const SOFTWARE_ID: u8 = b'S';
    /// Read the 2-byte software version.
    pub const SOFTWARE_VERSION: u8 = b'V';
    /// Read the hardware version (1 byte, or `?` when unknown).
    pub const HARDWARE_VERSION: u8 = b'v';
    /// Read the programmer type.
    pub const PROGRAMMER_TYPE: u8 = b'p';
    /// Query auto address increment support.
    pub const AUTO_INCREMENT: u8 = b'a';
    /// Query buffered access support and buffer size.
    pub const BUFFER_ACCESS: u8 = b'b';
    /// Read the null-terminated device type list.
    pub const DEVICE_TYPE_LIST: u8 = b't';
    /// Select a device type.
    pub const SELECT_DEVICE: u8 = b'T';
    /// Read the extended fuse byte.
    pub const READ_EFUSE: u8 = b'Q';
    /// Read the low fuse byte.
    pub const READ_LFUSE: u8 = b'F';
    /// Read the high fuse byte.
    pub const READ_HFUSE: u8 = b'N';
    /// Read the lock bits.
    pub const READ_LOCK: u8 = b'r';
    /// Read the 3-byte device signature.
    pub const READ_SIGNATURE: u8 = b's';
    /// Set the transfer start address (2-byte big-endian payload).
    pub const SET_ADDRESS: u8 = b'A';
    /// Block read (`g <sizeHi> <sizeLo> <'F'|'E'>`).
    pub const BLOCK_READ: u8 = b'g';
    /// Block write (`B <sizeHi> <sizeLo> <'F'|'E'>` + payload).
    pub const BLOCK_WRITE: u8 = b'B';
    /// Enter programming mode.
    pub const ENTER_PROG_MODE: u8 = b'P';
    /// Leave programming mode.
    pub const LEAVE_PROG_MODE: u8 = b'L';
    /// Erase the application flash.
    pub const CHIP_ERASE: u8 = b'e';
    /// Exit the bootloader.
    pub const EXIT: u8 = b'E';
}

/// Memory targeted by a block transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySection {
    /// Application flash.
    Flash,
    /// EEPROM.
    Eeprom,
}

impl MemorySection {
    /// Target selector byte appended to block commands.
    pub fn selector(self) -> u8 {
        match self {
            Self::Flash => b'F',
            Self::Eeprom => b'E',
        }
    }

    /// Block size for this section.
    ///
    /// Flash uses the negotiated buffer size; EEPROM access on this
    /// bootloader is unbuffered and moves one byte per command.
    pub fn block_size(self, negotiated: usize) -> usize {
        match self {
            Self::Flash => negotiated,
            Self::Eeprom => 1,
        }
    }
}

impl fmt::Display for MemorySection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flash => write!(f, "flash"),
            Self::Eeprom => write!(f, "EEPROM"),
        }
    }
}

pub use session::Session;
