//! In-memory doubles for driver and orchestrator tests.
//!
//! `FakeDevice` emulates the bootloader side of the wire protocol: it parses
//! the command stream written by the driver, answers from scripted handshake
//! metadata and byte-addressed flash/EEPROM arrays, and counts the commands
//! it served so tests can assert on exact exchange sequences.

use std::sync::{Arc, Mutex};

use crate::buffer::{RxPusher, RxQueue, Ticker};
use crate::error::Result;
use crate::port::Transport;
use crate::protocol::{ACK, DEVICE_TYPE_END, command};

/// Ticker that never sleeps, so deadline expiry is immediate in tests.
pub(crate) struct NullTicker;

impl Ticker for NullTicker {
    fn tick(&self) {}
}

/// Byte the fake answers instead of ACK when failure injection is armed.
pub(crate) const NAK: u8 = 0x15;

#[derive(Debug)]
enum Mode {
    Command,
    SelectDevice,
    SetAddress(Vec<u8>),
    BlockReadHeader(Vec<u8>),
    BlockWriteHeader(Vec<u8>),
    BlockWritePayload {
        size: usize,
        selector: u8,
        got: Vec<u8>,
    },
}

struct State {
    flash: Vec<u8>,
    eeprom: Vec<u8>,
    buffer_size: u16,
    ident: Vec<u8>,
    buffer_access: bool,
    signature: [u8; 3],
    fail_ack_on: Option<u8>,
    silenced: Vec<u8>,

    mode: Mode,
    addr: usize,

    block_reads: usize,
    block_writes: usize,
    write_block_sizes: Vec<usize>,
    erase_count: usize,
    enter_prog_count: usize,
    leave_prog_count: usize,
    exit_count: usize,
    close_count: usize,
}

impl State {
    fn new() -> Self {
        Self {
            flash: vec![0xFF; 32768],
            eeprom: vec![0xFF; 1024],
            buffer_size: 128,
            ident: b"CATERIN".to_vec(),
            buffer_access: true,
            // Raw response of the `s` command for signature 0x1E9587.
            signature: [0x87, 0x95, 0x1E],
            fail_ack_on: None,
            silenced: Vec::new(),
            mode: Mode::Command,
            addr: 0,
            block_reads: 0,
            block_writes: 0,
            write_block_sizes: Vec::new(),
            erase_count: 0,
            enter_prog_count: 0,
            leave_prog_count: 0,
            exit_count: 0,
            close_count: 0,
        }
    }

    fn ack(&self, pusher: &RxPusher, cmd: u8) {
        if self.fail_ack_on == Some(cmd) {
            pusher.push(&[NAK]);
        } else {
            pusher.push(&[ACK]);
        }
    }

    fn memory_mut(&mut self, selector: u8) -> &mut Vec<u8> {
        if selector == b'E' {
            &mut self.eeprom
        } else {
            &mut self.flash
        }
    }

    fn feed(&mut self, byte: u8, pusher: &RxPusher) {
        match std::mem::replace(&mut self.mode, Mode::Command) {
            Mode::Command => self.dispatch(byte, pusher),
            Mode::SelectDevice => self.ack(pusher, command::SELECT_DEVICE),
            Mode::SetAddress(mut got) => {
                got.push(byte);
                if got.len() == 2 {
                    self.addr = usize::from(got[0]) << 8 | usize::from(got[1]);
                    self.ack(pusher, command::SET_ADDRESS);
                } else {
                    self.mode = Mode::SetAddress(got);
                }
            },
            Mode::BlockReadHeader(mut got) => {
                got.push(byte);
                if got.len() == 3 {
                    let size = usize::from(got[0]) << 8 | usize::from(got[1]);
                    let addr = self.addr;
                    let block: Vec<u8> = {
                        let memory = self.memory_mut(got[2]);
                        memory[addr..addr + size].to_vec()
                    };
                    pusher.push(&block);
                    self.addr += size;
                    self.block_reads += 1;
                } else {
                    self.mode = Mode::BlockReadHeader(got);
                }
            },
            Mode::BlockWriteHeader(mut got) => {
                got.push(byte);
                if got.len() == 3 {
                    self.mode = Mode::BlockWritePayload {
                        size: usize::from(got[0]) << 8 | usize::from(got[1]),
                        selector: got[2],
                        got: Vec::new(),
                    };
                } else {
                    self.mode = Mode::BlockWriteHeader(got);
                }
            },
            Mode::BlockWritePayload {
                size,
                selector,
                mut got,
            } => {
                got.push(byte);
                if got.len() == size {
                    let addr = self.addr;
                    self.memory_mut(selector)[addr..addr + size].copy_from_slice(&got);
                    self.addr += size;
                    self.block_writes += 1;
                    self.write_block_sizes.push(size);
                    self.ack(pusher, command::BLOCK_WRITE);
                } else {
                    self.mode = Mode::BlockWritePayload {
                        size,
                        selector,
                        got,
                    };
                }
            },
        }
    }

    fn dispatch(&mut self, cmd: u8, pusher: &RxPusher) {
        if self.silenced.contains(&cmd) {
            return;
        }
        match cmd {
            command::SOFTWARE_ID => pusher.push(&self.ident.clone()),
            command::SOFTWARE_VERSION => pusher.push(b"10"),
            command::HARDWARE_VERSION => pusher.push(b"?"),
            command::PROGRAMMER_TYPE => pusher.push(b"S"),
            command::AUTO_INCREMENT => pusher.push(b"Y"),
            command::BUFFER_ACCESS => {
                if self.buffer_access {
                    let size = self.buffer_size;
                    pusher.push(&[b'Y', (size >> 8) as u8, (size & 0xFF) as u8]);
                } else {
                    pusher.push(b"N");
                }
            },
            command::DEVICE_TYPE_LIST => pusher.push(&[0x44, DEVICE_TYPE_END]),
            command::SELECT_DEVICE => self.mode = Mode::SelectDevice,
            command::READ_EFUSE => pusher.push(&[0xCB]),
            command::READ_LFUSE => pusher.push(&[0xFF]),
            command::READ_HFUSE => pusher.push(&[0xD8]),
            command::READ_LOCK => pusher.push(&[0x2F]),
            command::READ_SIGNATURE => pusher.push(&self.signature.clone()),
            command::SET_ADDRESS => self.mode = Mode::SetAddress(Vec::new()),
            command::BLOCK_READ => self.mode = Mode::BlockReadHeader(Vec::new()),
            command::BLOCK_WRITE => self.mode = Mode::BlockWriteHeader(Vec::new()),
            command::ENTER_PROG_MODE => {
                self.enter_prog_count += 1;
                self.ack(pusher, cmd);
            },
            command::LEAVE_PROG_MODE => {
                self.leave_prog_count += 1;
                self.ack(pusher, cmd);
            },
            command::CHIP_ERASE => {
                self.erase_count += 1;
                self.flash.fill(0xFF);
                self.ack(pusher, cmd);
            },
            command::EXIT => {
                self.exit_count += 1;
                self.ack(pusher, cmd);
            },
            other => panic!("fake device: unexpected command byte {other:#04x}"),
        }
    }
}

/// Transport half of the fake; moved into the session under test.
pub(crate) struct FakeDevice {
    state: Arc<Mutex<State>>,
    pusher: RxPusher,
}

/// Assertion half of the fake; survives the session.
pub(crate) struct FakeHandle {
    state: Arc<Mutex<State>>,
}

impl FakeDevice {
    /// Create a fake wired to push its responses into `rx`.
    pub fn new(rx: &RxQueue) -> (Self, FakeHandle) {
        let state = Arc::new(Mutex::new(State::new()));
        let device = Self {
            state: Arc::clone(&state),
            pusher: rx.pusher(),
        };
        (device, FakeHandle { state })
    }

    pub fn with_ident(self, ident: &[u8]) -> Self {
        self.state.lock().unwrap().ident = ident.to_vec();
        self
    }

    pub fn with_buffer_access(self, supported: bool) -> Self {
        self.state.lock().unwrap().buffer_access = supported;
        self
    }

    pub fn with_signature_bytes(self, raw: [u8; 3]) -> Self {
        self.state.lock().unwrap().signature = raw;
        self
    }

    pub fn with_flash_contents(self, contents: &[u8]) -> Self {
        let mut state = self.state.lock().unwrap();
        state.flash[..contents.len()].copy_from_slice(contents);
        drop(state);
        self
    }

    pub fn fail_ack_on(self, cmd: u8) -> Self {
        self.state.lock().unwrap().fail_ack_on = Some(cmd);
        self
    }

    pub fn silence(self, cmd: u8) -> Self {
        self.state.lock().unwrap().silenced.push(cmd);
        self
    }
}

impl Transport for FakeDevice {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for &byte in bytes {
            state.feed(byte, &self.pusher);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().close_count += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

impl FakeHandle {
    pub fn block_reads(&self) -> usize {
        self.state.lock().unwrap().block_reads
    }

    pub fn block_writes(&self) -> usize {
        self.state.lock().unwrap().block_writes
    }

    pub fn write_block_sizes(&self) -> Vec<usize> {
        self.state.lock().unwrap().write_block_sizes.clone()
    }

    pub fn erase_count(&self) -> usize {
        self.state.lock().unwrap().erase_count
    }

    pub fn enter_prog_count(&self) -> usize {
        self.state.lock().unwrap().enter_prog_count
    }

    pub fn leave_prog_count(&self) -> usize {
        self.state.lock().unwrap().leave_prog_count
    }

    pub fn exit_count(&self) -> usize {
        self.state.lock().unwrap().exit_count
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().close_count
    }

    pub fn flash(&self) -> Vec<u8> {
        self.state.lock().unwrap().flash.clone()
    }

    pub fn eeprom(&self) -> Vec<u8> {
        self.state.lock().unwrap().eeprom.clone()
    }
}
