//! Protocol driver: one bootloader session over one transport.
//!
//! A [`Session`] owns the transport, the receive queue and the negotiated
//! state (buffer size, identified MCU) for the duration of a single
//! operation. Exchanges are strictly request-then-response; the next command
//! is never sent before the previous response has been consumed.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use log::{debug, info};

use crate::buffer::{DEFAULT_TIMEOUT_TICKS, ERASE_TIMEOUT_TICKS, RxQueue, Ticker};
use crate::device::{self, McuDescriptor};
use crate::error::{Error, Result};
use crate::port::Transport;
use crate::protocol::{ACK, BOOTLOADER_ID, DEVICE_TYPE_END, MemorySection, command};

/// Protocol driver state for one operation.
pub struct Session<P: Transport, T: Ticker> {
    port: P,
    rx: RxQueue,
    ticker: T,
    buffer_size: usize,
    mcu: Option<&'static McuDescriptor>,
}

impl<P: Transport, T: Ticker> Session<P, T> {
    /// Create a session over an opened transport.
    ///
    /// `rx` must be the queue whose pusher the transport delivers into.
    pub fn new(port: P, rx: RxQueue, ticker: T) -> Self {
        Self {
            port,
            rx,
            ticker,
            buffer_size: 0,
            mcu: None,
        }
    }

    /// The MCU identified by [`Session::identify`], if any.
    pub fn mcu(&self) -> Option<&'static McuDescriptor> {
        self.mcu
    }

    /// Block size negotiated during [`Session::detect`].
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Name of the underlying port.
    pub fn port_name(&self) -> &str {
        self.port.name()
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write(bytes)
    }

    fn read_exact(&mut self, size: usize, timeout_ticks: u32) -> Result<Vec<u8>> {
        self.rx.await_bytes(size, timeout_ticks, &self.ticker)
    }

    fn read_byte(&mut self, timeout_ticks: u32) -> Result<u8> {
        Ok(self.read_exact(1, timeout_ticks)?[0])
    }

    fn expect_ack_within(&mut self, timeout_ticks: u32) -> Result<()> {
        let received = self.read_byte(timeout_ticks)?;
        if received != ACK {
            return Err(Error::CommandRejected { received });
        }
        Ok(())
    }

    fn expect_ack(&mut self) -> Result<()> {
        self.expect_ack_within(DEFAULT_TIMEOUT_TICKS)
    }

    /// Block size for `section`, failing if flash block I/O is attempted
    /// before the handshake has negotiated a buffer size.
    fn negotiated_block_size(&self, section: MemorySection) -> Result<usize> {
        let block_size = section.block_size(self.buffer_size);
        if block_size == 0 {
            return Err(Error::BufferAccessUnsupported);
        }
        Ok(block_size)
    }

    /// Send a single-command query and read its one-byte answer.
    fn query_byte(&mut self, cmd: u8) -> Result<u8> {
        self.send(&[cmd])?;
        self.read_byte(DEFAULT_TIMEOUT_TICKS)
    }

    /// Run the handshake: confirm the bootloader, negotiate the buffer size
    /// and select the device type.
    ///
    /// An identifier mismatch means "no Caterina bootloader on this port"
    /// ([`Error::BootloaderNotFound`]), not a protocol fault.
    pub fn detect(&mut self) -> Result<()> {
        self.send(&[command::SOFTWARE_ID])?;
        let ident = self.read_exact(BOOTLOADER_ID.len(), DEFAULT_TIMEOUT_TICKS)?;
        if ident.as_slice() != BOOTLOADER_ID {
            debug!(
                "software identifier mismatch: {:?}",
                String::from_utf8_lossy(&ident)
            );
            return Err(Error::BootloaderNotFound);
        }
        info!("Bootloader: {}", String::from_utf8_lossy(&ident));

        self.send(&[command::SOFTWARE_VERSION])?;
        let sw = self.read_exact(2, DEFAULT_TIMEOUT_TICKS)?;
        info!(
            "Software version: {}.{}",
            sw[0].wrapping_sub(b'0'),
            sw[1].wrapping_sub(b'0')
        );

        let hw_major = self.query_byte(command::HARDWARE_VERSION)?;
        if hw_major == b'?' {
            info!("Hardware version unknown");
        } else {
            let hw_minor = self.read_byte(DEFAULT_TIMEOUT_TICKS)?;
            info!("Hardware version: {hw_major}.{hw_minor}");
        }

        let programmer = self.query_byte(command::PROGRAMMER_TYPE)?;
        info!("Programmer type: {}", programmer as char);

        let auto_increment = self.query_byte(command::AUTO_INCREMENT)? == b'Y';
        info!("Auto address increment: {auto_increment}");

        if self.query_byte(command::BUFFER_ACCESS)? != b'Y' {
            return Err(Error::BufferAccessUnsupported);
        }
        let size = self.read_exact(2, DEFAULT_TIMEOUT_TICKS)?;
        self.buffer_size = usize::from(BigEndian::read_u16(&size));
        info!("Buffer size: {} bytes", self.buffer_size);

        let device_type = self.query_byte(command::DEVICE_TYPE_LIST)?;
        debug!("Device type: {device_type:#04x}");
        // The device type list is null-terminated; drain it fully.
        while self.read_byte(DEFAULT_TIMEOUT_TICKS)? != DEVICE_TYPE_END {}

        self.send(&[command::SELECT_DEVICE, device_type])?;
        self.expect_ack()?;

        let efuse = self.query_byte(command::READ_EFUSE)?;
        let lfuse = self.query_byte(command::READ_LFUSE)?;
        let hfuse = self.query_byte(command::READ_HFUSE)?;
        let lock = self.query_byte(command::READ_LOCK)?;
        info!("Fuses: lock={lock:#04x} E={efuse:#04x} H={hfuse:#04x} L={lfuse:#04x}");

        Ok(())
    }

    /// Read the device signature and resolve it against the descriptor table.
    pub fn identify(&mut self) -> Result<&'static McuDescriptor> {
        self.send(&[command::READ_SIGNATURE])?;
        let raw = self.read_exact(3, DEFAULT_TIMEOUT_TICKS)?;
        // Reassembly order is specific to this protocol; do not generalize
        // it to other multi-byte fields.
        let signature =
            (u32::from(raw[2]) << 16) | (u32::from(raw[1]) << 8) | u32::from(raw[0]);
        debug!("Signature: {signature:#08x}");

        let mcu =
            device::by_signature(signature).ok_or(Error::UnsupportedDevice { signature })?;
        info!("Identified {mcu}");
        self.mcu = Some(mcu);
        Ok(mcu)
    }

    /// Set the transfer start address (word-addressed, big-endian).
    ///
    /// Sent once per transfer; the device auto-increments afterwards, so
    /// blocks must follow address-ascending and contiguous.
    fn set_address(&mut self, addr: u16) -> Result<()> {
        let mut cmd = Vec::with_capacity(3);
        cmd.push(command::SET_ADDRESS);
        #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
        cmd.write_u16::<BigEndian>(addr).unwrap();
        self.send(&cmd)?;
        self.expect_ack()
    }

    #[allow(clippy::cast_possible_truncation)] // block size is device-negotiated u16
    fn block_header(cmd: u8, size: usize, section: MemorySection) -> Vec<u8> {
        let mut header = Vec::with_capacity(4);
        header.push(cmd);
        #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
        header.write_u16::<BigEndian>(size as u16).unwrap();
        header.push(section.selector());
        header
    }

    /// Read `len` bytes of the given memory, block by block from address 0.
    ///
    /// The device always returns full blocks (negotiated size for flash, one
    /// byte for EEPROM); the accumulated result is truncated to `len` before
    /// return. Invokes `progress` once per block with a tick marker.
    pub fn read_memory(
        &mut self,
        section: MemorySection,
        len: usize,
        progress: &mut dyn FnMut(&str),
    ) -> Result<Vec<u8>> {
        let block_size = self.negotiated_block_size(section)?;
        self.set_address(0)?;
        let header = Self::block_header(command::BLOCK_READ, block_size, section);
        let mut image = Vec::with_capacity(len);
        let mut cursor = 0;

        while cursor < len {
            self.send(&header)?;
            let block = self.read_exact(block_size, DEFAULT_TIMEOUT_TICKS)?;
            image.extend_from_slice(&block);
            cursor += block_size;
            progress(".");
        }

        image.truncate(len);
        Ok(image)
    }

    /// Write an image to the given memory, block by block from address 0.
    ///
    /// The final block is truncated to the remaining length. A missing or
    /// rejected acknowledgment aborts the write mid-stream; no retry is
    /// attempted.
    pub fn write_memory(
        &mut self,
        section: MemorySection,
        image: &[u8],
        progress: &mut dyn FnMut(&str),
    ) -> Result<()> {
        let block_size = self.negotiated_block_size(section)?;
        self.set_address(0)?;

        // Discard stale bytes before the write's response stream begins.
        self.rx.clear();

        let mut cursor = 0;

        while cursor < image.len() {
            let chunk = block_size.min(image.len() - cursor);
            self.send(&Self::block_header(command::BLOCK_WRITE, chunk, section))?;
            self.send(&image[cursor..cursor + chunk])?;
            self.expect_ack()?;
            cursor += chunk;
            progress(".");
        }

        Ok(())
    }

    /// Read back `image.len()` bytes and compare byte-for-byte.
    ///
    /// Stops at the first divergence and reports its offset.
    pub fn verify(
        &mut self,
        section: MemorySection,
        image: &[u8],
        progress: &mut dyn FnMut(&str),
    ) -> Result<()> {
        progress(&format!("Verifying {} bytes of {section}...", image.len()));
        let device = self.read_memory(section, image.len(), progress)?;

        for (offset, (expected, actual)) in image.iter().zip(device.iter()).enumerate() {
            if expected != actual {
                progress(&format!("Verify failed at address {offset:#x}"));
                return Err(Error::VerifyMismatch { offset });
            }
        }

        progress("Verify OK");
        Ok(())
    }

    /// Enter programming mode; mandatory before any write or erase.
    pub fn enter_programming_mode(&mut self) -> Result<()> {
        self.send(&[command::ENTER_PROG_MODE])?;
        self.expect_ack()
    }

    /// Leave programming mode; mandatory before the final exit.
    pub fn leave_programming_mode(&mut self) -> Result<()> {
        self.send(&[command::LEAVE_PROG_MODE])?;
        self.expect_ack()
    }

    /// Erase the application flash. Uses the extended deadline; bulk erase
    /// is a slow whole-chip operation on this bootloader.
    pub fn erase_all(&mut self) -> Result<()> {
        self.send(&[command::CHIP_ERASE])?;
        self.expect_ack_within(ERASE_TIMEOUT_TICKS)
    }

    /// Terminate the bootloader session.
    pub fn exit(&mut self) -> Result<()> {
        self.send(&[command::EXIT])?;
        self.expect_ack()
    }

    /// Close the underlying transport.
    pub fn close(&mut self) -> Result<()> {
        self.port.close()
    }
}
