//! Descriptor table for supported MCUs.
//!
//! The Caterina handshake ends with a signature read; the signature selects
//! one entry of this table, which fixes the memory geometry every later
//! block operation relies on.

use std::fmt;

/// Memory geometry of one supported chip.
///
/// Instances are static table entries and are never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McuDescriptor {
    /// Human-readable chip name.
    pub name: &'static str,
    /// 24-bit device signature as read back by the `s` command.
    pub signature: u32,
    /// Flash capacity in bytes.
    pub flash_size: usize,
    /// EEPROM capacity in bytes.
    pub eeprom_size: usize,
    /// Start of the boot section; application images must end below this.
    pub boot_section_addr: usize,
}

impl fmt::Display for McuDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (signature {:#08x})", self.name, self.signature)
    }
}

/// ATmega32U4, the chip behind Arduino Leonardo and Pro Micro boards.
pub const ATMEGA32U4: McuDescriptor = McuDescriptor {
    name: "atmega32u4",
    signature: 0x1E9587,
    flash_size: 32768,
    eeprom_size: 1024,
    boot_section_addr: 0x7000,
};

/// All chips this crate knows how to flash.
pub static SUPPORTED_MCUS: &[McuDescriptor] = &[ATMEGA32U4];

/// Look up a descriptor by device signature.
pub fn by_signature(signature: u32) -> Option<&'static McuDescriptor> {
    SUPPORTED_MCUS.iter().find(|m| m.signature == signature)
}
