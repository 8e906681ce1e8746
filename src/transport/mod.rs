//! C1: axis transport. An opaque channel to a motor node identified by
//! `(host, port, address)` (§4.1). The wire-level serial/socket protocol
//! itself is out of scope (§1) -- this module only implements the bounded
//! operation set the rest of the core drives it through, plus a virtual
//! mode that simulates the same operations without hardware.

mod real;
mod virtual_axis;

pub use real::SerialTransport;
pub use virtual_axis::VirtualTransport;

use crate::errors::TransportError;
use std::fmt;

/// Identifies a motor node: `(host, port, address)` (§4.1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AxisAddress {
    pub host: String,
    pub port: u16,
    pub address: u8,
}

impl fmt::Display for AxisAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.host, self.port, self.address)
    }
}

/// A handle is scoped to one of the two independent channels opened per
/// axis (§4.1: "a long-running status read never stalls behind an
/// in-flight command").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub(crate) u32);

/// The two handles returned by `open` for one axis.
#[derive(Debug, Clone, Copy)]
pub struct AxisChannels {
    pub command: Handle,
    pub status: Handle,
}

/// Setup commands sent once per axis when a transport is opened (§4.1).
#[derive(Debug, Clone, Copy)]
pub struct AxisSetup {
    pub msteps: f64,
    pub esteps: f64,
    pub esign: i8,
    pub maxvel: f64,
    pub maxacc: f64,
    pub limacc: f64,
    /// Homing-switch polarity.
    pub ipolar: bool,
}

/// The bounded operation set of §4.1's table, implemented identically by
/// [`SerialTransport`] and [`VirtualTransport`] so the dispatcher can treat
/// `virtual_mode` as a pure implementation swap (§4.1: "the two code paths
/// must produce identical observable state").
pub trait AxisTransport {
    /// Opens a control+status channel pair to the node at `addr`.
    fn open(&mut self, addr: &AxisAddress) -> Result<AxisChannels, TransportError>;

    /// Idempotent.
    fn close(&mut self, handle: Handle);

    /// Fire-and-forget textual command. Failure is fatal.
    fn write(&mut self, handle: Handle, text: &str) -> Result<(), TransportError>;

    /// Sends the one-time axis setup sequence (`msteps`, `esteps`, `esign`,
    /// `maxvel`, `maxacc`, `limacc`, `ipolar`). Changing `msteps`/`esteps`/
    /// `esign` clears the node's homed flag (§4.1).
    fn setup(&mut self, handle: Handle, setup: &AxisSetup) -> Result<(), TransportError>;

    /// Blocking read of a single integer register (`=mpos`, `=epos`,
    /// `=mvel`, `=clock`, ...). Failure is fatal.
    fn read_int(&mut self, handle: Handle, query: &str) -> Result<i64, TransportError>;

    /// Drains any available lines without blocking.
    fn read_nonblocking(&mut self, handle: Handle) -> Vec<String>;

    /// Forcibly aborts any running script on the node.
    fn interrupt(&mut self, handle: Handle) -> Result<(), TransportError>;
}

/// Retry policy for a single command write, per §7: "Fatal after one
/// retry -- supervisor restart."
pub(crate) fn write_with_one_retry<F>(addr: &AxisAddress, mut attempt: F) -> Result<(), TransportError>
where
    F: FnMut() -> Result<(), TransportError>,
{
    retry::retry(retry::delay::Fixed::from_millis(20).take(1), || {
        attempt().map_err(|err| {
            tracing::warn!(%addr, error = %err, "transport write failed, retrying once");
            err
        })
    })
    .map_err(|err| match err {
        retry::Error::Operation { error, .. } => error,
        retry::Error::Internal(reason) => TransportError::Write {
            address: addr.to_string(),
            reason,
        },
    })
}
