//! Transport layer abstraction.
//!
//! Defines the `Transport` trait the wire codec and engine run against,
//! allowing different implementations (nusb, scripted, etc.), and the
//! `TransportFactory` used to obtain a fresh transport after the device
//! re-enumerates mid-flash.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("device not found")]
    DeviceNotFound,

    #[error("failed to open device: {0}")]
    OpenFailed(String),

    #[error("failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("no bulk {direction} endpoint")]
    EndpointNotFound { direction: &'static str },

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("device disconnected")]
    Disconnected,

    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract bulk transport to one fastboot device.
pub trait Transport {
    /// Write raw bytes to the OUT endpoint.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read one raw frame from the IN endpoint, up to `max_len` bytes.
    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Block until the device disappears from the bus.
    fn wait_for_disconnect(&mut self) -> Result<(), TransportError>;
}

/// Produces a fresh transport after device re-enumeration.
pub trait TransportFactory {
    fn reopen(&mut self) -> Result<Box<dyn Transport>, TransportError>;
}
