//! Simulated Kvaser device behind a `UsbTransport`
//!
//! `MockTransport` records every request and answers it the way a device of
//! the chosen family would, pushing the replies into the reception channel.
//! Clones share the same state so a test can keep a handle after moving the
//! transport into a `ChannelController`.

#![allow(dead_code)]

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};

use kvaser_usb::constants::*;
use kvaser_usb::{DeviceFamily, KvaserError, Result, UsbTransport};

/// HE address the simulated router assigns to CAN channel 0
pub const CAN_HE: u8 = 0x11;
/// HE address of the simulated SYSDBG endpoint
pub const SYSDBG_HE: u8 = 0x22;

/// Behaviour of the simulated device
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub family: DeviceFamily,
    pub serial_number: u32,
    pub firmware_version: u32,
    pub sw_options: u32,
    pub max_outstanding: u16,
    /// Acknowledge transmit requests
    pub ack_tx: bool,
    /// Capability sub-commands answered as present
    pub capabilities: Vec<u16>,
    /// Keep bit timing different from what was requested
    pub reject_bus_params: bool,
    /// Answer START_CHIP with an error event instead (Hydra)
    pub start_chip_error: Option<u8>,
    pub clock_ticks: u64,
    bus_params: [u8; 8],
}

impl SimulatedDevice {
    pub fn hydra() -> Self {
        Self {
            family: DeviceFamily::Hydra,
            serial_number: 12345,
            firmware_version: 0x0305_0123,
            sw_options: SWOPTION_80_MHZ_CLK | SWOPTION_CANFD_CAP | SWOPTION_CAP_REQ,
            max_outstanding: 100,
            ack_tx: true,
            capabilities: vec![CAP_SUB_CMD_SILENT_MODE, CAP_SUB_CMD_ERRFRAME, CAP_SUB_CMD_SINGLE_SHOT],
            reject_bus_params: false,
            start_chip_error: None,
            clock_ticks: 0,
            bus_params: [0; 8],
        }
    }

    pub fn leaf() -> Self {
        Self {
            family: DeviceFamily::Leaf,
            serial_number: 67890,
            firmware_version: 0x0201_0042,
            sw_options: SWOPTION_24_MHZ_CLK,
            max_outstanding: 32,
            ..Self::hydra()
        }
    }

    fn respond(&mut self, request: &[u8]) -> Vec<Vec<u8>> {
        match self.family {
            DeviceFamily::Hydra => self.respond_hydra(request),
            DeviceFamily::Leaf => self.respond_leaf(request),
        }
    }

    fn respond_hydra(&mut self, request: &[u8]) -> Vec<Vec<u8>> {
        let reply = |opcode: u8| {
            let mut buf = vec![0u8; HYDRA_CMD_SIZE];
            buf[0] = opcode;
            buf[1] = request[1];
            buf[2..4].copy_from_slice(&request[2..4]);
            buf
        };

        match request[0] {
            CMD_MAP_CHANNEL_REQ => {
                let mut buf = reply(CMD_MAP_CHANNEL_RESP);
                buf[4] = if request[4..7] == *b"CAN" { CAN_HE } else { SYSDBG_HE };
                vec![buf]
            }
            CMD_STOP_CHIP_REQ => vec![reply(CMD_STOP_CHIP_RESP)],
            CMD_START_CHIP_REQ => match self.start_chip_error {
                Some(code) => {
                    let mut buf = reply(CMD_ERROR_EVENT);
                    buf[11] = code;
                    vec![buf]
                }
                None => vec![reply(CMD_START_CHIP_RESP)],
            },
            CMD_GET_CARD_INFO_REQ => {
                let mut buf = reply(CMD_GET_CARD_INFO_RESP);
                buf[4..8].copy_from_slice(&self.serial_number.to_le_bytes());
                buf[28] = 1;
                vec![buf]
            }
            CMD_GET_SOFTWARE_DETAILS_REQ => {
                let mut buf = reply(CMD_GET_SOFTWARE_DETAILS_RESP);
                buf[4..8].copy_from_slice(&self.sw_options.to_le_bytes());
                buf[8..12].copy_from_slice(&self.firmware_version.to_le_bytes());
                buf[24..28].copy_from_slice(&8_000_000u32.to_le_bytes());
                vec![buf]
            }
            CMD_GET_SOFTWARE_INFO_REQ => {
                let mut buf = reply(CMD_GET_SOFTWARE_INFO_RESP);
                buf[12..14].copy_from_slice(&self.max_outstanding.to_le_bytes());
                vec![buf]
            }
            CMD_GET_TRANSCEIVER_INFO_REQ => {
                let mut buf = reply(CMD_GET_TRANSCEIVER_INFO_RESP);
                buf[9] = TRANSCEIVER_TYPE_1050;
                vec![buf]
            }
            CMD_GET_CAPABILITIES_REQ => {
                let sub_cmd = u16::from_le_bytes([request[4], request[5]]);
                let present = self.capabilities.contains(&sub_cmd) as u32;
                let mut buf = reply(CMD_GET_CAPABILITIES_RESP);
                buf[4..6].copy_from_slice(&sub_cmd.to_le_bytes());
                buf[8..12].copy_from_slice(&1u32.to_le_bytes());
                buf[12..16].copy_from_slice(&present.to_le_bytes());
                vec![buf]
            }
            CMD_SET_BUSPARAMS_REQ => {
                self.store_bus_params(&request[4..12]);
                vec![reply(CMD_SET_BUSPARAMS_RESP)]
            }
            CMD_GET_BUSPARAMS_REQ => {
                let mut buf = reply(CMD_GET_BUSPARAMS_RESP);
                buf[4..12].copy_from_slice(&self.bus_params);
                vec![buf]
            }
            CMD_GET_DRIVERMODE_REQ => {
                let mut buf = reply(CMD_GET_DRIVERMODE_RESP);
                buf[4] = DRIVERMODE_NORMAL;
                vec![buf]
            }
            CMD_READ_CLOCK_REQ => {
                let mut buf = reply(CMD_READ_CLOCK_RESP);
                put_ticks48(&mut buf[4..10], self.clock_ticks);
                vec![buf]
            }
            CMD_FLUSH_QUEUE => vec![reply(CMD_FLUSH_QUEUE_RESP)],
            CMD_EXTENDED if request[6] == CMD_TX_CAN_MESSAGE_FD => {
                if !self.ack_tx {
                    return Vec::new();
                }
                let mut buf = vec![0u8; HYDRA_CMD_SIZE];
                buf[0] = CMD_EXTENDED;
                buf[1] = request[1];
                buf[2] = request[2];
                buf[4..6].copy_from_slice(&(HYDRA_CMD_SIZE as u16).to_le_bytes());
                buf[6] = CMD_TX_ACKNOWLEDGE_FD;
                vec![buf]
            }
            _ => Vec::new(),
        }
    }

    fn respond_leaf(&mut self, request: &[u8]) -> Vec<Vec<u8>> {
        let reply = |len: u8, opcode: u8| {
            let mut buf = vec![0u8; len as usize];
            buf[0] = len;
            buf[1] = opcode;
            buf
        };

        match request[1] {
            CMD_STOP_CHIP_REQ => vec![reply(LEN_STOP_CHIP_RESP, CMD_STOP_CHIP_RESP)],
            CMD_START_CHIP_REQ => vec![reply(LEN_START_CHIP_RESP, CMD_START_CHIP_RESP)],
            CMD_GET_CARD_INFO_REQ => {
                let mut buf = reply(LEN_GET_CARD_INFO_RESP, CMD_GET_CARD_INFO_RESP);
                buf[3] = 1;
                buf[4..8].copy_from_slice(&self.serial_number.to_le_bytes());
                vec![buf]
            }
            CMD_GET_SOFTWARE_INFO_REQ => {
                let mut buf = reply(LEN_GET_SOFTWARE_INFO_RESP, CMD_GET_SOFTWARE_INFO_RESP);
                buf[4..8].copy_from_slice(&self.sw_options.to_le_bytes());
                buf[8..12].copy_from_slice(&self.firmware_version.to_le_bytes());
                buf[12..14].copy_from_slice(&self.max_outstanding.to_le_bytes());
                vec![buf]
            }
            CMD_GET_TRANSCEIVER_INFO_REQ => {
                let mut buf = reply(LEN_GET_TRANSCEIVER_INFO_RESP, CMD_GET_TRANSCEIVER_INFO_RESP);
                buf[9] = TRANSCEIVER_TYPE_251;
                vec![buf]
            }
            CMD_GET_INTERFACE_INFO_REQ => {
                let mut buf = reply(LEN_GET_INTERFACE_INFO_RESP, CMD_GET_INTERFACE_INFO_RESP);
                buf[8] = 3;
                vec![buf]
            }
            CMD_GET_CAPABILITIES_REQ => {
                let sub_cmd = u16::from_le_bytes([request[4], request[5]]);
                let present = self.capabilities.contains(&sub_cmd) as u32;
                let mut buf = reply(LEN_GET_CAPABILITIES_RESP, CMD_GET_CAPABILITIES_RESP);
                buf[4..6].copy_from_slice(&sub_cmd.to_le_bytes());
                buf[8..12].copy_from_slice(&1u32.to_le_bytes());
                buf[12..16].copy_from_slice(&present.to_le_bytes());
                vec![buf]
            }
            CMD_SET_BUSPARAMS_REQ => {
                self.store_bus_params(&request[4..12]);
                Vec::new()
            }
            CMD_GET_BUSPARAMS_REQ => {
                let mut buf = reply(LEN_GET_BUSPARAMS_RESP, CMD_GET_BUSPARAMS_RESP);
                buf[4..12].copy_from_slice(&self.bus_params);
                vec![buf]
            }
            CMD_READ_CLOCK_REQ => {
                let mut buf = reply(LEN_READ_CLOCK_RESP, CMD_READ_CLOCK_RESP);
                put_ticks48(&mut buf[4..10], self.clock_ticks);
                vec![buf]
            }
            CMD_FLUSH_QUEUE => vec![reply(LEN_FILO_FLUSH_QUEUE_RESP, CMD_FILO_FLUSH_QUEUE_RESP)],
            CMD_TX_STD_MESSAGE | CMD_TX_EXT_MESSAGE => {
                if !self.ack_tx {
                    return Vec::new();
                }
                let mut buf = reply(LEN_TX_ACKNOWLEDGE, CMD_TX_ACKNOWLEDGE);
                buf[2] = request[2];
                buf[3] = request[3];
                vec![buf]
            }
            _ => Vec::new(),
        }
    }

    fn store_bus_params(&mut self, params: &[u8]) {
        self.bus_params.copy_from_slice(params);
        if self.reject_bus_params {
            self.bus_params[4] = self.bus_params[4].wrapping_add(1);
        }
    }
}

fn put_ticks48(buf: &mut [u8], ticks: u64) {
    buf[0..2].copy_from_slice(&(ticks as u16).to_le_bytes());
    buf[2..4].copy_from_slice(&((ticks >> 16) as u16).to_le_bytes());
    buf[4..6].copy_from_slice(&((ticks >> 32) as u16).to_le_bytes());
}

#[derive(Debug)]
struct MockState {
    device: SimulatedDevice,
    sender: Option<Sender<Vec<u8>>>,
    requests: Vec<Vec<u8>>,
    fail_start: bool,
}

/// `UsbTransport` answering from a `SimulatedDevice`
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(device: SimulatedDevice) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                device,
                sender: None,
                requests: Vec::new(),
                fail_start: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Change the simulated device
    pub fn device<F: FnOnce(&mut SimulatedDevice)>(&self, f: F) {
        f(&mut self.lock().device);
    }

    pub fn fail_start(&self) {
        self.lock().fail_start = true;
    }

    /// Deliver an unsolicited chunk as if read from the bulk-IN endpoint
    pub fn inject(&self, chunk: Vec<u8>) {
        if let Some(sender) = &self.lock().sender {
            let _ = sender.send(chunk);
        }
    }

    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.lock().requests.clone()
    }

    /// Opcodes of the recorded requests
    pub fn opcodes(&self) -> Vec<u8> {
        let family = self.lock().device.family;
        self.requests()
            .iter()
            .map(|r| match family {
                DeviceFamily::Hydra => r[0],
                DeviceFamily::Leaf => r[1],
            })
            .collect()
    }

    pub fn is_receiving(&self) -> bool {
        self.lock().sender.is_some()
    }
}

impl UsbTransport for MockTransport {
    fn send_request(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        state.requests.push(data.to_vec());
        let replies = state.device.respond(data);
        if let Some(sender) = &state.sender {
            for reply in replies {
                let _ = sender.send(reply);
            }
        }
        Ok(())
    }

    fn start_reception(&mut self, sender: Sender<Vec<u8>>) -> Result<()> {
        let mut state = self.lock();
        if state.fail_start {
            return Err(KvaserError::Usb(rusb::Error::NoDevice));
        }
        state.sender = Some(sender);
        Ok(())
    }

    fn abort_reception(&mut self) -> Result<()> {
        self.lock().sender = None;
        Ok(())
    }
}
