//! nusb-based USB transport implementation.
//!
//! Fastboot devices expose a vendor-specific interface (class 0xFF,
//! subclass 0x42, protocol 0x03) with one bulk endpoint per direction.

use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use nusb::transfer::{Bulk, In, Out};
use nusb::{MaybeFuture, list_devices};
use tracing::{debug, info, instrument};

use super::traits::{Transport, TransportError, TransportFactory};
use crate::protocol::constants::{
    FASTBOOT_CLASS, FASTBOOT_PROTOCOL, FASTBOOT_SUBCLASS, SUPPORTED_VIDS,
};

/// nusb-based fastboot transport.
pub struct UsbTransport {
    interface: nusb::Interface,
    in_endpoint: u8,
    out_endpoint: u8,
    device_id: nusb::DeviceId,
}

impl UsbTransport {
    /// Open the first device carrying a fastboot interface.
    #[instrument(level = "info")]
    pub fn open() -> Result<Self, TransportError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        for device_info in devices {
            if SUPPORTED_VIDS.contains(&device_info.vendor_id()) {
                return Self::open_device_info(device_info);
            }
        }

        Err(TransportError::DeviceNotFound)
    }

    fn open_device_info(device_info: nusb::DeviceInfo) -> Result<Self, TransportError> {
        let device_id = device_info.id();

        info!(
            vendor_id = %format!("{:04X}", device_info.vendor_id()),
            product_id = %format!("{:04X}", device_info.product_id()),
            "Found device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        // Locate the fastboot interface and its bulk endpoint pair.
        let mut iface_number: Option<u8> = None;
        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;

        for config in device.configurations() {
            for iface in config.interfaces() {
                for alt in iface.alt_settings() {
                    if alt.class() != FASTBOOT_CLASS
                        || alt.subclass() != FASTBOOT_SUBCLASS
                        || alt.protocol() != FASTBOOT_PROTOCOL
                    {
                        continue;
                    }
                    iface_number = Some(iface.interface_number());
                    for ep in alt.endpoints() {
                        if ep.transfer_type() == nusb::descriptors::TransferType::Bulk {
                            if ep.direction() == nusb::transfer::Direction::In {
                                in_endpoint = ep.address();
                            } else {
                                out_endpoint = ep.address();
                            }
                        }
                    }
                }
            }
        }

        let Some(iface_number) = iface_number else {
            return Err(TransportError::OpenFailed(
                "no fastboot interface on device".into(),
            ));
        };
        if in_endpoint == 0 {
            return Err(TransportError::EndpointNotFound { direction: "in" });
        }
        if out_endpoint == 0 {
            return Err(TransportError::EndpointNotFound { direction: "out" });
        }

        let interface = device.claim_interface(iface_number).wait().map_err(|e| {
            TransportError::ClaimInterfaceFailed {
                interface: iface_number,
                message: e.to_string(),
            }
        })?;

        info!(
            iface = iface_number,
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            "Device opened successfully"
        );

        Ok(Self {
            interface,
            in_endpoint,
            out_endpoint,
            device_id,
        })
    }

    fn still_enumerated(&self) -> bool {
        match list_devices().wait() {
            Ok(mut devices) => devices.any(|d| d.id() == self.device_id),
            Err(_) => false,
        }
    }
}

impl Transport for UsbTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let ep = self
            .interface
            .endpoint::<Bulk, Out>(self.out_endpoint)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        let mut writer = ep.writer(4096);
        writer
            .write_all(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    #[instrument(skip(self), fields(max_len))]
    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let ep = self
            .interface
            .endpoint::<Bulk, In>(self.in_endpoint)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        let mut reader = ep.reader(4096);
        let mut buf = vec![0u8; max_len];

        let n = reader
            .read(&mut buf)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        buf.truncate(n);
        debug!(bytes_read = n, "Read complete");
        Ok(buf)
    }

    fn wait_for_disconnect(&mut self) -> Result<(), TransportError> {
        const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(60);

        info!("Waiting for device to disconnect...");
        let start = Instant::now();
        while self.still_enumerated() {
            if start.elapsed() > DISCONNECT_TIMEOUT {
                return Err(TransportError::Timeout {
                    timeout_ms: DISCONNECT_TIMEOUT.as_millis() as u64,
                });
            }
            thread::sleep(Duration::from_millis(100));
        }
        info!("Device disconnected");
        Ok(())
    }
}

/// Factory that polls the bus until a fastboot device (re-)appears.
pub struct UsbFactory {
    timeout: Duration,
}

impl UsbFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl TransportFactory for UsbFactory {
    fn reopen(&mut self) -> Result<Box<dyn Transport>, TransportError> {
        info!("Waiting for device...");
        let start = Instant::now();
        let mut poll_count = 0u64;

        loop {
            poll_count += 1;

            match UsbTransport::open() {
                Ok(t) => {
                    debug!("Device found after {} polls", poll_count);
                    return Ok(Box::new(t));
                }
                Err(TransportError::DeviceNotFound) => {
                    if start.elapsed() > self.timeout {
                        return Err(TransportError::Timeout {
                            timeout_ms: self.timeout.as_millis() as u64,
                        });
                    }
                    thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
