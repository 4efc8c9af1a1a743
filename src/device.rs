//! Kvaser device discovery
//!
//! This module holds the table of supported products and finds attached
//! Kvaser interfaces on the USB bus.

use rusb::GlobalContext;

use crate::constants::*;
use crate::error::{KvaserError, Result};
use crate::structures::DeviceFamily;
use crate::transport::RusbTransport;

/// Static properties of a supported product
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvaserProduct {
    pub product_id: u16,
    pub name: &'static str,
    pub family: DeviceFamily,
    /// CAN channels on the device
    pub channels: u8,
    /// CAN controller clock in MHz
    pub can_clock: u32,
    /// Timestamp timer frequency in MHz
    pub timer_freq: u32,
    pub can_fd: bool,
    pub non_iso: bool,
    pub silent_mode: bool,
    pub error_frame: bool,
}

/// Supported products
pub const PRODUCTS: &[KvaserProduct] = &[
    KvaserProduct {
        product_id: LEAF_PRO_HS_V2_PRODUCT_ID,
        name: "Kvaser Leaf Pro HS v2",
        family: DeviceFamily::Hydra,
        channels: 1,
        can_clock: 80,
        timer_freq: 80,
        can_fd: true,
        non_iso: true,
        silent_mode: true,
        error_frame: true,
    },
    KvaserProduct {
        product_id: HYBRID_PRO_CANLIN_PRODUCT_ID,
        name: "Kvaser Hybrid Pro CAN/LIN",
        family: DeviceFamily::Hydra,
        channels: 1,
        can_clock: 80,
        timer_freq: 80,
        can_fd: true,
        non_iso: true,
        silent_mode: true,
        error_frame: true,
    },
    KvaserProduct {
        product_id: U100P_PRODUCT_ID,
        name: "Kvaser U100P",
        family: DeviceFamily::Hydra,
        channels: 1,
        can_clock: 80,
        timer_freq: 24,
        can_fd: true,
        non_iso: true,
        silent_mode: true,
        error_frame: true,
    },
    KvaserProduct {
        product_id: LEAF_LIGHT_V2_PRODUCT_ID,
        name: "Kvaser Leaf Light v2",
        family: DeviceFamily::Leaf,
        channels: 1,
        can_clock: 24,
        timer_freq: 24,
        can_fd: false,
        non_iso: false,
        silent_mode: false,
        error_frame: false,
    },
];

/// Look up a product by its USB product id
pub fn probe(product_id: u16) -> Option<&'static KvaserProduct> {
    PRODUCTS.iter().find(|p| p.product_id == product_id)
}

/// Check if a USB device is a supported Kvaser device
fn probe_ids(vendor_id: u16, product_id: u16) -> Option<&'static KvaserProduct> {
    if vendor_id != KVASER_VENDOR_ID {
        return None;
    }
    probe(product_id)
}

/// An attached, not yet opened Kvaser device
pub struct KvaserDevice {
    device: rusb::Device<GlobalContext>,
    product: &'static KvaserProduct,
}

impl KvaserDevice {
    pub fn product(&self) -> &'static KvaserProduct {
        self.product
    }

    /// Get the USB bus number
    pub fn bus(&self) -> u8 {
        self.device.bus_number()
    }

    /// Get the USB device address
    pub fn address(&self) -> u8 {
        self.device.address()
    }

    /// Open the device and claim its interface
    pub fn open(&self) -> Result<RusbTransport> {
        log::info!("opening {}", self);
        RusbTransport::open(&self.device)
    }
}

impl std::fmt::Display for KvaserDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:04x}:{:04x} (bus {}, addr {})",
            self.product.name,
            KVASER_VENDOR_ID,
            self.product.product_id,
            self.bus(),
            self.address()
        )
    }
}

impl std::fmt::Debug for KvaserDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvaserDevice")
            .field("bus", &self.bus())
            .field("address", &self.address())
            .field("product_id", &format_args!("0x{:04X}", self.product.product_id))
            .field("family", &self.product.family)
            .finish()
    }
}

/// Scan for supported Kvaser devices
///
/// Devices whose descriptor cannot be read are skipped.
pub fn scan() -> Result<Vec<KvaserDevice>> {
    let mut devices = Vec::new();

    for device in rusb::devices()?.iter() {
        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(_) => continue,
        };

        if let Some(product) = probe_ids(desc.vendor_id(), desc.product_id()) {
            log::debug!(
                "found {} on bus {} addr {}",
                product.name,
                device.bus_number(),
                device.address()
            );
            devices.push(KvaserDevice { device, product });
        }
    }

    Ok(devices)
}

/// Find a specific Kvaser device by bus and address
pub fn find(bus: u8, address: u8) -> Result<Option<KvaserDevice>> {
    for device in rusb::devices()?.iter() {
        if device.bus_number() != bus || device.address() != address {
            continue;
        }

        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(_) => continue,
        };

        if let Some(product) = probe_ids(desc.vendor_id(), desc.product_id()) {
            return Ok(Some(KvaserDevice { device, product }));
        }
    }

    Ok(None)
}

/// Open the `index`-th attached Kvaser device
pub fn open(index: usize) -> Result<(RusbTransport, &'static KvaserProduct)> {
    let device = scan()?
        .into_iter()
        .nth(index)
        .ok_or(KvaserError::DeviceNotFound)?;
    let transport = device.open()?;
    Ok((transport, device.product))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_known_products() {
        let leaf = probe(LEAF_LIGHT_V2_PRODUCT_ID).unwrap();
        assert_eq!(leaf.family, DeviceFamily::Leaf);
        assert!(!leaf.can_fd);
        assert_eq!(leaf.timer_freq, 24);

        let pro = probe(LEAF_PRO_HS_V2_PRODUCT_ID).unwrap();
        assert_eq!(pro.family, DeviceFamily::Hydra);
        assert!(pro.can_fd);
        assert_eq!(pro.can_clock, 80);

        assert_eq!(probe(U100P_PRODUCT_ID).unwrap().timer_freq, 24);
        assert!(probe(0x0001).is_none());
    }

    #[test]
    fn test_probe_requires_kvaser_vendor() {
        assert!(probe_ids(KVASER_VENDOR_ID, LEAF_LIGHT_V2_PRODUCT_ID).is_some());
        assert!(probe_ids(0x1D50, LEAF_LIGHT_V2_PRODUCT_ID).is_none());
    }

    #[test]
    fn test_product_ids_unique() {
        for (i, a) in PRODUCTS.iter().enumerate() {
            for b in &PRODUCTS[i + 1..] {
                assert_ne!(a.product_id, b.product_id);
            }
        }
    }
}
