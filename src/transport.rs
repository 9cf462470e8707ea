use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{error::Error, options::LinkOptions};

/// A transport backed by a real serial port.
pub mod serial;

/// An in-memory transport with scriptable faults.
pub mod mock;

/// Anything bytes can be read from and written to.
///
/// The link splits a transport into a read half and a write half,
/// the transport is released when both halves are gone.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// An opened transport.
pub type BoxedTransport = Box<dyn Transport>;

/// Opens transports for a link.
pub trait Connector: Send + Sync + 'static {
    /// Open the transport described by the options.
    /// Fails with [`Error::Connection`] if the driver refuses.
    fn open(&self, options: &LinkOptions) -> Result<BoxedTransport, Error>;

    /// Decide whether a failed read or write means the transport is gone.
    fn classify(&self, error: &io::Error) -> Fault {
        Fault::from(error)
    }
}

/// How bad a failed read or write is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The device vanished or is no longer configured.
    /// The transport is closed and the loops stop.
    Fatal,

    /// Only this attempt failed.
    Transient,
}

/// "Device not configured", reported when a USB serial adapter is pulled.
#[cfg(unix)]
fn is_device_not_configured(error: &io::Error) -> bool {
    error.raw_os_error() == Some(nix::errno::Errno::ENXIO as i32)
}

#[cfg(not(unix))]
fn is_device_not_configured(_error: &io::Error) -> bool {
    false
}

impl From<&io::Error> for Fault {
    fn from(error: &io::Error) -> Self {
        use io::ErrorKind::*;

        if is_device_not_configured(error) {
            return Fault::Fatal;
        }

        match error.kind() {
            NotFound | BrokenPipe | ConnectionReset | ConnectionAborted | NotConnected => {
                Fault::Fatal
            }
            _ => Fault::Transient,
        }
    }
}
