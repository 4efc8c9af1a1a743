//! Kvaser USB CAN Protocol Implementation for Rust
//!
//! This crate talks the native command protocol of Kvaser USB CAN interfaces
//! from user space. Two protocol families are supported: the flat Leaf
//! protocol of the Leaf Light v2 and the addressed Hydra protocol of the Leaf
//! Pro HS v2, Hybrid Pro CAN/LIN and U100P.
//!
//! # Features
//!
//! - Classic CAN on all devices, CAN FD with bit-rate switching on Hydra devices
//! - Hardware timestamps in nanoseconds
//! - Bounded receive queue with overflow accounting
//! - Transmit flow control with optional acknowledgment wait
//! - Chip state, error and bus load monitoring
//!
//! # Example
//!
//! ```no_run
//! use kvaser_usb::{BusParams, CanFrame, ChannelConfig, ChannelController, KvaserError, OpMode};
//! use std::time::Duration;
//!
//! fn main() -> kvaser_usb::Result<()> {
//!     let (transport, product) = kvaser_usb::open(0)?;
//!     let mut channel = ChannelController::configure(transport, product, 0, ChannelConfig::default())?;
//!
//!     channel.initialize(OpMode::DEFAULT)?;
//!     channel.set_bus_params(&BusParams::new(500_000, 13, 2, 1))?;
//!     channel.start_chip()?;
//!
//!     let frame = CanFrame::with_data(0x123, &[0x11, 0x22, 0x33, 0x44]);
//!     channel.send_message(&frame, Duration::from_millis(100))?;
//!
//!     loop {
//!         match channel.read_message(Some(Duration::from_millis(100))) {
//!             Ok(frame) => println!("RX  {}", frame),
//!             Err(KvaserError::Empty) => continue,
//!             Err(e) => return Err(e),
//!         }
//!     }
//! }
//! ```
//!
//! # Supported Devices
//!
//! - Kvaser Leaf Light v2 (VID: 0x0BFD, PID: 0x0120)
//! - Kvaser Leaf Pro HS v2 (VID: 0x0BFD, PID: 0x0107)
//! - Kvaser Hybrid Pro CAN/LIN (VID: 0x0BFD, PID: 0x010E)
//! - Kvaser U100P (VID: 0x0BFD, PID: 0x0112)

pub mod channel;
pub mod constants;
pub mod demux;
pub mod device;
pub mod error;
pub mod frame;
pub mod hydra;
pub mod leaf;
pub mod pipe;
pub mod queue;
pub mod structures;
pub mod tracker;
pub mod transport;
pub mod wire;

// Re-export main types at crate root
pub use constants::{
    // Operation mode flags
    CANMODE_BRSE,
    CANMODE_DEFAULT,
    CANMODE_ERR,
    CANMODE_FDOE,
    CANMODE_MON,
    CANMODE_NISO,
    CANMODE_NRTR,
    CANMODE_NXTD,
    // Product ids
    HYBRID_PRO_CANLIN_PRODUCT_ID,
    KVASER_VENDOR_ID,
    LEAF_LIGHT_V2_PRODUCT_ID,
    LEAF_PRO_HS_V2_PRODUCT_ID,
    U100P_PRODUCT_ID,
};

pub use channel::{ChannelConfig, ChannelController, ChannelReader, ChannelStatistics};
pub use demux::Statistics;
pub use device::{find, open, probe, scan, KvaserDevice, KvaserProduct, PRODUCTS};
pub use error::{KvaserError, Result};
pub use frame::{CanFrame, Timestamp};
pub use structures::{
    BusLoad, BusParams, BusParamsFd, Capabilities, CardInfo, DeviceFamily, DriverMode, EventData,
    InterfaceInfo, OpMode, SoftwareInfo, TransceiverInfo,
};
pub use transport::{RusbTransport, UsbTransport};
