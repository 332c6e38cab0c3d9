//! Native serial transport using the `serialport` crate.
//!
//! The port is opened with a short read timeout and a reader thread that
//! pushes every inbound chunk into the session's receive queue, reproducing
//! the callback-delivery contract the protocol driver expects. The thread
//! owns no protocol state and is joined on close.

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{trace, warn};

use crate::buffer::RxPusher;
use crate::error::{Error, Result};
use crate::port::{PortInfo, SerialConfig, Transport};

/// Poll interval of the reader thread.
const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Native serial transport.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl NativePort {
    /// Open a serial port and start delivering inbound bytes to `sink`.
    pub fn open(config: &SerialConfig, sink: RxPusher) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(READ_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()?;

        let stop = Arc::new(AtomicBool::new(false));
        let reader = Self::spawn_reader(port.try_clone()?, sink, Arc::clone(&stop));

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
            stop,
            reader: Some(reader),
        })
    }

    fn spawn_reader(
        mut port: Box<dyn serialport::SerialPort>,
        sink: RxPusher,
        stop: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        std::thread::spawn(move || {
            let mut buf = [0u8; 256];
            while !stop.load(Ordering::Relaxed) {
                match port.read(&mut buf) {
                    Ok(0) => {},
                    Ok(n) => {
                        trace!("serial rx {n} bytes");
                        sink.push(&buf[..n]);
                    },
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {},
                    Err(e) => {
                        warn!("serial reader stopping: {e}");
                        break;
                    },
                }
            }
        })
    }
}

impl Transport for NativePort {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "port closed",
            )))?;
        port.write_all(bytes)?;
        port.flush()?;
        trace!("serial tx {} bytes: {bytes:02x?}", bytes.len());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        // Take ownership of the port and let it drop (close)
        self.port.take();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NativePort {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// List all available serial ports.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(Error::Serial)?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let (vid, pid, product) = match &p.port_type {
                serialport::SerialPortType::UsbPort(info) => {
                    (Some(info.vid), Some(info.pid), info.product.clone())
                },
                _ => (None, None, None),
            };

            PortInfo {
                name: p.port_name,
                vid,
                pid,
                product,
            }
        })
        .collect())
}
