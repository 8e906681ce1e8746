//! Real axis transport over a serial/socket channel, built on a
//! `serialport`-based motor connection, one port per command/status
//! handle so a blocking status read never stalls a command write.

use super::{write_with_one_retry, AxisAddress, AxisChannels, AxisSetup, AxisTransport, Handle};
use crate::errors::TransportError;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::time::Duration;

struct Channel {
    addr: AxisAddress,
    port: Box<dyn serialport::SerialPort>,
}

/// Drives real motor nodes over RS-232/USB-serial, one port per handle.
/// Command and status handles for the same axis are independent
/// [`serialport`] handles so a blocking status read never stalls a
/// command write (§4.1).
pub struct SerialTransport {
    baud_rate: u32,
    timeout: Duration,
    next_handle: u32,
    channels: HashMap<Handle, Channel>,
}

impl SerialTransport {
    pub fn new(baud_rate: u32, timeout: Duration) -> Self {
        SerialTransport {
            baud_rate,
            timeout,
            next_handle: 0,
            channels: HashMap::new(),
        }
    }

    fn open_one(&mut self, addr: &AxisAddress) -> Result<Handle, TransportError> {
        let port_name = format!("{}:{}", addr.host, addr.port);
        let port = serialport::new(&port_name, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| TransportError::Open {
                address: addr.to_string(),
                reason: e.to_string(),
            })?;

        let handle = Handle(self.next_handle);
        self.next_handle += 1;
        self.channels.insert(
            handle,
            Channel {
                addr: addr.clone(),
                port,
            },
        );
        Ok(handle)
    }
}

impl AxisTransport for SerialTransport {
    fn open(&mut self, addr: &AxisAddress) -> Result<AxisChannels, TransportError> {
        Ok(AxisChannels {
            command: self.open_one(addr)?,
            status: self.open_one(addr)?,
        })
    }

    fn close(&mut self, handle: Handle) {
        self.channels.remove(&handle);
    }

    fn write(&mut self, handle: Handle, text: &str) -> Result<(), TransportError> {
        let line = format!("{}\n", text);
        let channel = self
            .channels
            .get_mut(&handle)
            .ok_or_else(|| TransportError::Write {
                address: "<closed handle>".to_string(),
                reason: "handle not open".to_string(),
            })?;
        let addr = channel.addr.clone();
        write_with_one_retry(&addr, || {
            channel
                .port
                .write_all(line.as_bytes())
                .map_err(|e| TransportError::Write {
                    address: addr.to_string(),
                    reason: e.to_string(),
                })
        })
    }

    fn setup(&mut self, handle: Handle, setup: &AxisSetup) -> Result<(), TransportError> {
        self.write(handle, &format!("msteps {}", setup.msteps))?;
        self.write(handle, &format!("esteps {}", setup.esteps))?;
        self.write(handle, &format!("esign {}", setup.esign))?;
        self.write(handle, &format!("maxvel {}", setup.maxvel))?;
        self.write(handle, &format!("maxacc {}", setup.maxacc))?;
        self.write(handle, &format!("limacc {}", setup.limacc))?;
        self.write(handle, &format!("ipolar {}", if setup.ipolar { 1 } else { 0 }))
    }

    fn read_int(&mut self, handle: Handle, query: &str) -> Result<i64, TransportError> {
        let channel = self
            .channels
            .get_mut(&handle)
            .ok_or_else(|| TransportError::Read {
                address: "<closed handle>".to_string(),
                reason: "handle not open".to_string(),
            })?;
        let addr = channel.addr.clone();

        channel
            .port
            .write_all(format!("{}\n", query).as_bytes())
            .map_err(|e| TransportError::Read {
                address: addr.to_string(),
                reason: e.to_string(),
            })?;

        let mut reader = BufReader::new(&mut channel.port);
        let mut line = String::new();
        reader.read_line(&mut line).map_err(|e| TransportError::Read {
            address: addr.to_string(),
            reason: e.to_string(),
        })?;

        line.trim()
            .trim_start_matches('=')
            .parse::<i64>()
            .map_err(|e| TransportError::Read {
                address: addr.to_string(),
                reason: format!("non-numeric reply {:?}: {}", line, e),
            })
    }

    fn read_nonblocking(&mut self, handle: Handle) -> Vec<String> {
        let Some(channel) = self.channels.get_mut(&handle) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let available = channel.port.bytes_to_read().unwrap_or(0);
        if available == 0 {
            return out;
        }
        let mut buf = vec![0u8; available as usize];
        if let Ok(n) = channel.port.read(&mut buf) {
            if let Ok(text) = std::str::from_utf8(&buf[..n]) {
                out.extend(text.lines().map(|l| l.to_string()));
            }
        }
        out
    }

    fn interrupt(&mut self, handle: Handle) -> Result<(), TransportError> {
        self.write(handle, "stop!")
    }
}
