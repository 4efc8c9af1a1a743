//! USB transport
//!
//! The channel controller talks to the device through the `UsbTransport`
//! trait: requests go out as bulk-OUT writes, received bulk-IN transfers are
//! pushed into an `mpsc` channel as raw chunks. `RusbTransport` implements it
//! over libusb through `rusb`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use rusb::{DeviceHandle, Direction, GlobalContext, TransferType};

use crate::constants::*;
use crate::error::{KvaserError, Result};

/// Byte transport between the driver and one device
pub trait UsbTransport {
    /// Write one encoded command to the device
    fn send_request(&mut self, data: &[u8]) -> Result<()>;

    /// Start forwarding received transfers into `sender`
    fn start_reception(&mut self, sender: Sender<Vec<u8>>) -> Result<()>;

    /// Stop forwarding; dropping the sender ends the reception thread
    fn abort_reception(&mut self) -> Result<()>;
}

/// Bulk endpoint pair of the Kvaser interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub bulk_in: u8,
    pub bulk_out: u8,
}

/// `UsbTransport` over a libusb device handle
pub struct RusbTransport {
    handle: Arc<DeviceHandle<GlobalContext>>,
    endpoints: Endpoints,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    bus: u8,
    address: u8,
}

impl RusbTransport {
    /// Open `device`, claim the Kvaser interface and locate its bulk endpoints
    pub fn open(device: &rusb::Device<GlobalContext>) -> Result<Self> {
        let handle = device.open()?;

        #[cfg(any(target_os = "linux", target_os = "macos"))]
        {
            if handle.kernel_driver_active(KVASER_INTERFACE).unwrap_or(false) {
                handle
                    .detach_kernel_driver(KVASER_INTERFACE)
                    .map_err(KvaserError::ClaimInterface)?;
            }
        }

        handle
            .claim_interface(KVASER_INTERFACE)
            .map_err(KvaserError::ClaimInterface)?;

        let endpoints = match find_bulk_endpoints(device) {
            Ok(endpoints) => endpoints,
            Err(e) => {
                let _ = handle.release_interface(KVASER_INTERFACE);
                return Err(e);
            }
        };
        log::debug!(
            "bus {} addr {}: bulk IN 0x{:02X}, bulk OUT 0x{:02X}",
            device.bus_number(),
            device.address(),
            endpoints.bulk_in,
            endpoints.bulk_out
        );

        Ok(Self {
            handle: Arc::new(handle),
            endpoints,
            running: Arc::new(AtomicBool::new(false)),
            reader: None,
            bus: device.bus_number(),
            address: device.address(),
        })
    }

    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Device serial number from the string descriptor, empty if absent
    pub fn serial_number(&self) -> Result<String> {
        let desc = self.handle.device().device_descriptor()?;
        match desc.serial_number_string_index() {
            Some(index) => Ok(self.handle.read_string_descriptor_ascii(index)?),
            None => Ok(String::new()),
        }
    }
}

/// First bulk IN and bulk OUT endpoint of the Kvaser interface
fn find_bulk_endpoints(device: &rusb::Device<GlobalContext>) -> Result<Endpoints> {
    let config = device.active_config_descriptor()?;
    let mut bulk_in = None;
    let mut bulk_out = None;

    for interface in config.interfaces() {
        if interface.number() != KVASER_INTERFACE {
            continue;
        }
        for setting in interface.descriptors() {
            for endpoint in setting.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Bulk {
                    continue;
                }
                match endpoint.direction() {
                    Direction::In if bulk_in.is_none() => bulk_in = Some(endpoint.address()),
                    Direction::Out if bulk_out.is_none() => bulk_out = Some(endpoint.address()),
                    _ => {}
                }
            }
        }
    }

    match (bulk_in, bulk_out) {
        (Some(bulk_in), Some(bulk_out)) => Ok(Endpoints { bulk_in, bulk_out }),
        _ => Err(KvaserError::NotSupported("bulk endpoints not found")),
    }
}

impl UsbTransport for RusbTransport {
    fn send_request(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(KvaserError::NullArgument("request"));
        }
        log::trace!("> {:02X?}", data);
        let written = self
            .handle
            .write_bulk(self.endpoints.bulk_out, data, USB_COMMAND_TIMEOUT)?;
        if written != data.len() {
            log::warn!("short bulk write: {} of {} bytes", written, data.len());
            return Err(KvaserError::Fatal("short bulk write"));
        }
        Ok(())
    }

    fn start_reception(&mut self, sender: Sender<Vec<u8>>) -> Result<()> {
        if self.reader.is_some() {
            return Err(KvaserError::Fatal("reception already running"));
        }
        self.running.store(true, Ordering::Release);

        let handle = Arc::clone(&self.handle);
        let running = Arc::clone(&self.running);
        let endpoint = self.endpoints.bulk_in;
        let reader = thread::Builder::new()
            .name("kvaser-usb-in".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; USB_READ_BUFFER_SIZE];
                while running.load(Ordering::Acquire) {
                    match handle.read_bulk(endpoint, &mut buf, USB_READ_TIMEOUT) {
                        Ok(0) | Err(rusb::Error::Timeout) => continue,
                        Ok(len) => {
                            log::trace!("< {:02X?}", &buf[..len]);
                            if sender.send(buf[..len].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(rusb::Error::NoDevice) => {
                            log::error!("device disconnected, stopping reception");
                            break;
                        }
                        Err(rusb::Error::Interrupted) => break,
                        Err(e) => {
                            log::warn!("bulk IN transfer failed: {}", e);
                            thread::sleep(USB_READ_TIMEOUT);
                        }
                    }
                }
                log::debug!("USB reader stopped");
            })
            .map_err(|_| KvaserError::Fatal("failed to spawn USB reader"))?;

        self.reader = Some(reader);
        Ok(())
    }

    fn abort_reception(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                log::error!("USB reader panicked");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RusbTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusbTransport")
            .field("bus", &self.bus)
            .field("address", &self.address)
            .field("bulk_in", &format_args!("0x{:02X}", self.endpoints.bulk_in))
            .field("bulk_out", &format_args!("0x{:02X}", self.endpoints.bulk_out))
            .field("receiving", &self.reader.is_some())
            .finish()
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        let _ = self.abort_reception();
        if let Some(handle) = Arc::get_mut(&mut self.handle) {
            let _ = handle.release_interface(KVASER_INTERFACE);
        }
    }
}
