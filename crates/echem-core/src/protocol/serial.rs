//! Serial port transport
//!
//! Real-hardware transport: 8-N-1 framing at a fixed baud rate, separate read
//! and write timeouts, and line reassembly on the read half.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use tracing::{debug, info, warn};

use super::stream::{LineReader, LineWriter, ReadOutcome, TransportAdapter, TransportChannels};
use super::{ProtocolError, MAX_LINE_LENGTH};
use crate::config::SerialSettings;

/// A serial port the analyzer might be attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,
    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,
    /// USB product ID (if USB device)
    pub pid: Option<u16>,
    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,
    /// Product name (if available)
    pub product: Option<String>,
    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
                serial_number: usb.serial_number,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// USB CDC ports first, then USB-serial adapters, then everything else,
/// numerically within each group.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0u8, "ttyACM"), (1u8, "ttyUSB")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let index = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, index, basename.to_string());
        }
    }
    (2, 0, basename.to_string())
}

/// List serial ports an analyzer could be attached to, in a stable order
pub fn list_ports() -> Vec<PortInfo> {
    let mut found: BTreeMap<String, PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .map(|p| (p.name.clone(), p))
        .collect();

    // udev may not have enumerated freshly plugged adapters yet
    #[cfg(target_os = "linux")]
    if let Ok(entries) = std::fs::read_dir("/dev") {
        for name in entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|n| n.starts_with("ttyACM") || n.starts_with("ttyUSB"))
        {
            let full = format!("/dev/{}", name);
            found
                .entry(full.clone())
                .or_insert_with(|| PortInfo::bare(full));
        }
    }

    let mut ports: Vec<PortInfo> = found.into_values().collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

fn open_port(settings: &SerialSettings, name: &str) -> Result<Box<dyn SerialPort>, ProtocolError> {
    serialport::new(name, settings.baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(settings.read_timeout())
        .open()
        .map_err(|e| ProtocolError::ConnectionFailed(format!("{}: {}", name, e)))
}

/// Serial transport for a physical analyzer
#[derive(Debug, Clone)]
pub struct SerialTransport {
    settings: SerialSettings,
}

impl SerialTransport {
    /// Create a transport; the port is not opened until [`TransportAdapter::open`]
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }

    fn port_name(&self) -> Result<&str, ProtocolError> {
        self.settings
            .port_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or(ProtocolError::MissingAddress)
    }
}

impl TransportAdapter for SerialTransport {
    fn describe(&self) -> String {
        match self.port_name() {
            Ok(name) => format!("{} @ {}", name, self.settings.baud_rate),
            Err(_) => "serial (no port)".to_string(),
        }
    }

    fn open(&mut self) -> Result<TransportChannels, ProtocolError> {
        let name = self.port_name()?.to_string();
        let mut read_port = open_port(&self.settings, &name)?;
        read_port
            .clear(serialport::ClearBuffer::All)
            .map_err(|e| ProtocolError::ConnectionFailed(e.to_string()))?;

        let mut write_port = read_port
            .try_clone()
            .map_err(|e| ProtocolError::ConnectionFailed(e.to_string()))?;
        write_port.set_timeout(self.settings.write_timeout())?;
        // Windows keeps one timeout per device, so the reader's must be applied last
        read_port.set_timeout(self.settings.read_timeout())?;

        info!("Connected to {} @ {} baud", name, self.settings.baud_rate);

        Ok(TransportChannels {
            reader: Box::new(SerialLineReader::new(read_port)),
            writer: Box::new(SerialLineWriter {
                port: Some(write_port),
                name,
            }),
        })
    }
}

struct SerialLineReader {
    port: Box<dyn SerialPort>,
    pending: Vec<u8>,
}

impl SerialLineReader {
    fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            pending: Vec::with_capacity(256),
        }
    }
}

impl LineReader for SerialLineReader {
    fn read_line(&mut self) -> Result<ReadOutcome, ProtocolError> {
        if let Some(outcome) = take_line(&mut self.pending) {
            return Ok(outcome);
        }

        let mut chunk = [0u8; 256];
        match self.port.read(&mut chunk) {
            Ok(0) => return Ok(ReadOutcome::Idle),
            Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                return Ok(ReadOutcome::Idle)
            }
            Err(e) => return Err(ProtocolError::SerialError(e.to_string())),
        }

        if let Some(outcome) = take_line(&mut self.pending) {
            return Ok(outcome);
        }
        if self.pending.len() > MAX_LINE_LENGTH {
            warn!("Discarding {} bytes without a line terminator", self.pending.len());
            return Ok(ReadOutcome::Undecodable(std::mem::take(&mut self.pending)));
        }
        Ok(ReadOutcome::Idle)
    }
}

/// Split the first `\n`-terminated line off `pending`
fn take_line(pending: &mut Vec<u8>) -> Option<ReadOutcome> {
    let end = pending.iter().position(|&b| b == b'\n')?;
    let raw: Vec<u8> = pending.drain(..=end).collect();
    Some(match String::from_utf8(raw) {
        Ok(line) => ReadOutcome::Line(line),
        Err(e) => ReadOutcome::Undecodable(e.into_bytes()),
    })
}

struct SerialLineWriter {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl LineWriter for SerialLineWriter {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let port = self.port.as_mut().ok_or(ProtocolError::NotConnected)?;
        // flush() maps to tcdrain on unix and can stall past the write timeout;
        // write_all already hands the bytes to the kernel tty buffer.
        port.write_all(bytes)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        debug!("wrote {} bytes to {}", bytes.len(), self.name);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Disconnected from {}", self.name);
        }
    }
}

impl Drop for SerialLineWriter {
    fn drop(&mut self) {
        self.close();
    }
}
