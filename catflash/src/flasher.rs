//! Operation orchestrator: the three public firmware workflows.
//!
//! Each operation is one fresh open/detect/act/close cycle, so the methods
//! consume `self`. Whatever the outcome, the bootloader exit command is
//! issued and the transport is closed exactly once before the result is
//! returned; the first error wins and is also surfaced to the progress sink.

use log::info;

use crate::buffer::{RxQueue, SystemTicker, Ticker};
use crate::device::McuDescriptor;
use crate::error::{Error, Result};
use crate::port::Transport;
use crate::protocol::{MemorySection, Session};

/// Flasher for one Caterina bootloader session.
pub struct CaterinaFlasher<P: Transport, T: Ticker = SystemTicker> {
    session: Session<P, T>,
}

impl<P: Transport> CaterinaFlasher<P, SystemTicker> {
    /// Create a flasher over an opened transport.
    ///
    /// `rx` must be the queue the transport delivers inbound bytes into.
    pub fn new(port: P, rx: RxQueue) -> Self {
        Self::with_ticker(port, rx, SystemTicker)
    }
}

impl<P: Transport, T: Ticker> CaterinaFlasher<P, T> {
    /// Create a flasher with an injected ticker (used by tests).
    pub fn with_ticker(port: P, rx: RxQueue, ticker: T) -> Self {
        Self {
            session: Session::new(port, rx, ticker),
        }
    }

    /// Read firmware back from flash.
    ///
    /// `size` 0 means the full flash; larger requests are clamped to the
    /// identified chip's flash size.
    pub fn read_firmware(
        mut self,
        size: usize,
        progress: &mut dyn FnMut(&str),
    ) -> Result<Vec<u8>> {
        let outcome = self.run_read(size, progress);
        self.finish(outcome, progress)
    }

    /// Erase, write and verify a flash image, optionally followed by an
    /// EEPROM image.
    ///
    /// Size limits are checked before any destructive command is issued.
    pub fn write_firmware(
        mut self,
        flash: &[u8],
        eeprom: Option<&[u8]>,
        progress: &mut dyn FnMut(&str),
    ) -> Result<()> {
        let outcome = self.run_write(flash, eeprom, progress);
        self.finish(outcome, progress)
    }

    /// Compare a flash image against the device without writing anything.
    pub fn verify_firmware(
        mut self,
        flash: &[u8],
        progress: &mut dyn FnMut(&str),
    ) -> Result<()> {
        let outcome = self.run_verify(flash, progress);
        self.finish(outcome, progress)
    }

    /// Detect the bootloader and identify the MCU.
    fn start(&mut self, progress: &mut dyn FnMut(&str)) -> Result<&'static McuDescriptor> {
        info!("Starting session on {}", self.session.port_name());
        self.session.detect()?;
        let mcu = self.session.identify()?;
        progress(&format!("{} found.", mcu.name));
        Ok(mcu)
    }

    fn run_read(
        &mut self,
        size: usize,
        progress: &mut dyn FnMut(&str),
    ) -> Result<Vec<u8>> {
        let mcu = self.start(progress)?;

        let size = if size == 0 {
            mcu.flash_size
        } else {
            size.min(mcu.flash_size)
        };

        progress(&format!("Reading {size} bytes..."));
        let image = self.session.read_memory(MemorySection::Flash, size, progress)?;
        progress("Read complete");
        Ok(image)
    }

    fn run_write(
        &mut self,
        flash: &[u8],
        eeprom: Option<&[u8]>,
        progress: &mut dyn FnMut(&str),
    ) -> Result<()> {
        let mcu = self.start(progress)?;

        // The application image must not overlap the boot section, and the
        // EEPROM image must fit; both are checked before anything destructive.
        if flash.len() > mcu.boot_section_addr {
            return Err(Error::ImageTooLarge {
                len: flash.len(),
                limit: mcu.boot_section_addr,
            });
        }
        if let Some(eeprom) = eeprom {
            if eeprom.len() > mcu.eeprom_size {
                return Err(Error::ImageTooLarge {
                    len: eeprom.len(),
                    limit: mcu.eeprom_size,
                });
            }
        }

        self.session.enter_programming_mode()?;

        progress("Erasing flash...");
        self.session.erase_all()?;
        progress("Erase complete");

        progress(&format!("Writing {} bytes of flash...", flash.len()));
        self.session
            .write_memory(MemorySection::Flash, flash, progress)?;
        progress("Write complete");

        self.session.verify(MemorySection::Flash, flash, progress)?;

        if let Some(eeprom) = eeprom {
            progress(&format!("Writing {} bytes of EEPROM...", eeprom.len()));
            self.session
                .write_memory(MemorySection::Eeprom, eeprom, progress)?;
            self.session
                .verify(MemorySection::Eeprom, eeprom, progress)?;
        }

        self.session.leave_programming_mode()
    }

    fn run_verify(&mut self, flash: &[u8], progress: &mut dyn FnMut(&str)) -> Result<()> {
        let mcu = self.start(progress)?;

        if flash.len() > mcu.boot_section_addr {
            return Err(Error::ImageTooLarge {
                len: flash.len(),
                limit: mcu.boot_section_addr,
            });
        }

        self.session.verify(MemorySection::Flash, flash, progress)
    }

    /// Guaranteed-cleanup path shared by all operations.
    ///
    /// The bootloader exit command is issued on success and failure alike,
    /// and the transport is closed exactly once. The operation's own error
    /// takes precedence over cleanup errors.
    fn finish<R>(mut self, outcome: Result<R>, progress: &mut dyn FnMut(&str)) -> Result<R> {
        let exit = self.session.exit();
        let close = self.session.close();

        let result = match outcome {
            Ok(value) => exit.and(close).map(|()| value),
            Err(err) => Err(err),
        };

        if let Err(ref err) = result {
            progress(&err.to_string());
        }
        result
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{CaterinaFlasher, RxQueue, SystemTicker};
    use crate::error::Result;
    use crate::port::{NativePort, SerialConfig};

    impl CaterinaFlasher<NativePort, SystemTicker> {
        /// Open a serial port and build a flasher around it.
        ///
        /// Convenience constructor for native platforms; the receive queue
        /// is created and wired to the port's reader internally.
        pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
            let rx = RxQueue::new();
            let config = SerialConfig::new(port_name, baud_rate);
            let port = NativePort::open(&config, rx.pusher())?;
            Ok(Self::new(port, rx))
        }
    }
}
