//! Kvaser USB protocol constants
//!
//! This module contains the command codes, frame lengths, flag bits and device
//! identifiers shared by the Leaf (flat command) and Hydra (addressed command)
//! protocol variants.

use std::time::Duration;

// ============================================================================
// USB Device Identifiers
// ============================================================================

/// Kvaser AB vendor ID
pub const KVASER_VENDOR_ID: u16 = 0x0BFD;
/// Kvaser Leaf Pro HS v2 (Hydra family)
pub const LEAF_PRO_HS_V2_PRODUCT_ID: u16 = 0x0107;
/// Kvaser Hybrid Pro CAN/LIN (Hydra family)
pub const HYBRID_PRO_CANLIN_PRODUCT_ID: u16 = 0x010E;
/// Kvaser U100P (Hydra family)
pub const U100P_PRODUCT_ID: u16 = 0x0112;
/// Kvaser Leaf Light v2 (Leaf family)
pub const LEAF_LIGHT_V2_PRODUCT_ID: u16 = 0x0120;

/// USB interface carrying the bulk endpoints
pub const KVASER_INTERFACE: u8 = 0;

// ============================================================================
// Timing and Sizes
// ============================================================================

/// Timeout for a command response (Leaf)
pub const USB_COMMAND_TIMEOUT: Duration = Duration::from_millis(800);
/// Timeout for a command response (Hydra)
pub const HYDRA_RESPONSE_TIMEOUT: Duration = Duration::from_millis(5000);
/// Timeout of a single bulk-IN transfer on the reader thread
pub const USB_READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Size of a bulk-IN transfer buffer
pub const USB_READ_BUFFER_SIZE: usize = 3072;
/// Default number of elements in the receive message queue
pub const RECEIVE_QUEUE_SIZE: usize = 65536;

/// Maximum number of transmit messages awaiting acknowledgment (Leaf)
pub const LEAF_MAX_OUTSTANDING_TX: u16 = 64;
/// Maximum number of transmit messages awaiting acknowledgment (Hydra)
pub const HYDRA_MAX_OUTSTANDING_TX: u16 = 200;

/// Shortest Leaf command
pub const KVASER_MIN_COMMAND_LENGTH: usize = 4;
/// Longest Leaf command
pub const KVASER_MAX_COMMAND_LENGTH: usize = 32;
/// Size of an ordinary Hydra command
pub const HYDRA_CMD_SIZE: usize = 32;
/// Size of the largest Hydra extended command
pub const HYDRA_CMD_EXT_SIZE: usize = 96;

// ============================================================================
// Command Codes (shared by Leaf and Hydra)
// ============================================================================

pub const CMD_RX_STD_MESSAGE: u8 = 12;
pub const CMD_TX_STD_MESSAGE: u8 = 13;
pub const CMD_RX_EXT_MESSAGE: u8 = 14;
pub const CMD_TX_EXT_MESSAGE: u8 = 15;
pub const CMD_SET_BUSPARAMS_REQ: u8 = 16;
pub const CMD_GET_BUSPARAMS_REQ: u8 = 17;
pub const CMD_GET_BUSPARAMS_RESP: u8 = 18;
pub const CMD_GET_CHIP_STATE_REQ: u8 = 19;
pub const CMD_CHIP_STATE_EVENT: u8 = 20;
pub const CMD_SET_DRIVERMODE_REQ: u8 = 21;
pub const CMD_GET_DRIVERMODE_REQ: u8 = 22;
pub const CMD_GET_DRIVERMODE_RESP: u8 = 23;
pub const CMD_RESET_CHIP_REQ: u8 = 24;
pub const CMD_RESET_CARD_REQ: u8 = 25;
pub const CMD_START_CHIP_REQ: u8 = 26;
pub const CMD_START_CHIP_RESP: u8 = 27;
pub const CMD_STOP_CHIP_REQ: u8 = 28;
pub const CMD_STOP_CHIP_RESP: u8 = 29;
pub const CMD_READ_CLOCK_REQ: u8 = 30;
pub const CMD_READ_CLOCK_RESP: u8 = 31;
/// Hydra: transmit a classic CAN message
pub const CMD_TX_CAN_MESSAGE: u8 = 33;
pub const CMD_GET_CARD_INFO_REQ: u8 = 34;
pub const CMD_GET_CARD_INFO_RESP: u8 = 35;
pub const CMD_GET_INTERFACE_INFO_REQ: u8 = 36;
pub const CMD_GET_INTERFACE_INFO_RESP: u8 = 37;
pub const CMD_GET_SOFTWARE_INFO_REQ: u8 = 38;
pub const CMD_GET_SOFTWARE_INFO_RESP: u8 = 39;
pub const CMD_GET_BUSLOAD_REQ: u8 = 40;
pub const CMD_GET_BUSLOAD_RESP: u8 = 41;
pub const CMD_RESET_STATISTICS: u8 = 42;
pub const CMD_ERROR_EVENT: u8 = 45;
pub const CMD_FLUSH_QUEUE: u8 = 48;
pub const CMD_RESET_ERROR_COUNTER: u8 = 49;
pub const CMD_TX_ACKNOWLEDGE: u8 = 50;
pub const CMD_CAN_ERROR_EVENT: u8 = 51;
/// Hydra: flush queue response
pub const CMD_FLUSH_QUEUE_RESP: u8 = 66;
/// Leaf: flush queue response
pub const CMD_FILO_FLUSH_QUEUE_RESP: u8 = 68;
pub const CMD_SET_BUSPARAMS_FD_REQ: u8 = 69;
pub const CMD_SET_BUSPARAMS_FD_RESP: u8 = 70;
/// Hydra: set bus parameters response
pub const CMD_SET_BUSPARAMS_RESP: u8 = 85;
pub const CMD_GET_CAPABILITIES_REQ: u8 = 95;
pub const CMD_GET_CAPABILITIES_RESP: u8 = 96;
pub const CMD_GET_TRANSCEIVER_INFO_REQ: u8 = 97;
pub const CMD_GET_TRANSCEIVER_INFO_RESP: u8 = 98;
/// Leaf: received (logged) CAN message
pub const CMD_LOG_MESSAGE: u8 = 106;
pub const CMD_MAP_CHANNEL_REQ: u8 = 200;
pub const CMD_MAP_CHANNEL_RESP: u8 = 201;
pub const CMD_GET_SOFTWARE_DETAILS_REQ: u8 = 202;
pub const CMD_GET_SOFTWARE_DETAILS_RESP: u8 = 203;
/// Hydra: extended command (length-prefixed body)
pub const CMD_EXTENDED: u8 = 255;

// Hydra extended sub-commands

pub const CMD_TX_CAN_MESSAGE_FD: u8 = 224;
pub const CMD_TX_ACKNOWLEDGE_FD: u8 = 225;
pub const CMD_RX_MESSAGE_FD: u8 = 226;
pub const CMD_AUTOTX_MESSAGE_FD: u8 = 227;

/// Read clock flag: sample the clock now
pub const READ_CLOCK_NOW: u8 = 0x01;

// ============================================================================
// Leaf Command Lengths
// ============================================================================

pub const LEN_SET_BUSPARAMS_REQ: u8 = 12;
pub const LEN_GET_BUSPARAMS_REQ: u8 = 4;
pub const LEN_GET_BUSPARAMS_RESP: u8 = 12;
pub const LEN_GET_CHIP_STATE_REQ: u8 = 4;
pub const LEN_CHIP_STATE_EVENT: u8 = 16;
pub const LEN_SET_DRIVERMODE_REQ: u8 = 8;
pub const LEN_GET_DRIVERMODE_REQ: u8 = 4;
pub const LEN_GET_DRIVERMODE_RESP: u8 = 8;
pub const LEN_RESET_CHIP_REQ: u8 = 4;
pub const LEN_RESET_CARD_REQ: u8 = 4;
pub const LEN_START_CHIP_REQ: u8 = 4;
pub const LEN_START_CHIP_RESP: u8 = 4;
pub const LEN_STOP_CHIP_REQ: u8 = 4;
pub const LEN_STOP_CHIP_RESP: u8 = 4;
pub const LEN_READ_CLOCK_REQ: u8 = 4;
pub const LEN_READ_CLOCK_RESP: u8 = 12;
pub const LEN_GET_CARD_INFO_REQ: u8 = 4;
pub const LEN_GET_CARD_INFO_RESP: u8 = 32;
pub const LEN_GET_INTERFACE_INFO_REQ: u8 = 4;
pub const LEN_GET_INTERFACE_INFO_RESP: u8 = 12;
pub const LEN_GET_SOFTWARE_INFO_REQ: u8 = 4;
pub const LEN_GET_SOFTWARE_INFO_RESP: u8 = 32;
pub const LEN_GET_BUSLOAD_REQ: u8 = 4;
pub const LEN_GET_BUSLOAD_RESP: u8 = 16;
pub const LEN_RESET_STATISTICS: u8 = 4;
pub const LEN_ERROR_EVENT: u8 = 16;
pub const LEN_FLUSH_QUEUE: u8 = 8;
pub const LEN_RESET_ERROR_COUNTER: u8 = 4;
pub const LEN_TX_ACKNOWLEDGE: u8 = 12;
pub const LEN_CAN_ERROR_EVENT: u8 = 16;
pub const LEN_FILO_FLUSH_QUEUE_RESP: u8 = 8;
pub const LEN_GET_CAPABILITIES_REQ: u8 = 8;
pub const LEN_GET_CAPABILITIES_RESP: u8 = 16;
pub const LEN_GET_TRANSCEIVER_INFO_REQ: u8 = 4;
pub const LEN_GET_TRANSCEIVER_INFO_RESP: u8 = 12;
pub const LEN_LOG_MESSAGE: u8 = 24;
pub const LEN_TX_MESSAGE: u8 = 20;

// ============================================================================
// Hydra Addressing
// ============================================================================

/// HE address of the router
pub const ROUTER_HE: u8 = 0x00;
/// Placeholder HE address (not mapped, or addressed to the card itself)
pub const ILLEGAL_HE: u8 = 0x3E;
/// Number of HE addresses
pub const MAX_HE_COUNT: u8 = 64;
/// Channels behind one Hydra card
pub const HYDRA_MAX_CARD_CHANNELS: u8 = 5;
/// Transaction sequence of the SYSDBG map request
pub const HYDRA_SYSDBG_TRANSACTION: u16 = 0x61;
/// Transaction sequence base of a CAN channel map request
pub const HYDRA_MAP_CAN_TRANSACTION: u16 = 0x40;

// ============================================================================
// Message Flags (logged and transmitted messages)
// ============================================================================

pub const MSGFLAG_ERROR_FRAME: u32 = 0x01;
pub const MSGFLAG_OVERRUN: u32 = 0x02;
pub const MSGFLAG_NERR: u32 = 0x04;
pub const MSGFLAG_WAKEUP: u32 = 0x08;
pub const MSGFLAG_REMOTE_FRAME: u32 = 0x10;
pub const MSGFLAG_EXTENDED_ID: u32 = 0x20;
pub const MSGFLAG_TX: u32 = 0x40;
pub const MSGFLAG_TXRQ: u32 = 0x80;
pub const MSGFLAG_SSM_NACK: u32 = 0x1000;
pub const MSGFLAG_ABL: u32 = 0x2000;
pub const MSGFLAG_FDF: u32 = 0x10000;
pub const MSGFLAG_BRS: u32 = 0x20000;
pub const MSGFLAG_ESI: u32 = 0x40000;

// FPGA identifier and control words of a Hydra FD transmit

pub const FPGA_ID_EXTENDED: u32 = 0xC000_0000;
pub const FPGA_ID_REMOTE: u32 = 0x2000_0000;
pub const FPGA_CTRL_REQUEST_ACK: u32 = 0x8000_0000;
pub const FPGA_CTRL_FDF: u32 = 0x8000;
pub const FPGA_CTRL_BRS: u32 = 0x4000;
pub const FPGA_CTRL_ESI: u32 = 0x2000;

// ============================================================================
// Bus Status Flags (chip state event)
// ============================================================================

pub const BUSSTAT_BUSOFF: u8 = 0x01;
pub const BUSSTAT_ERROR_PASSIVE: u8 = 0x02;
pub const BUSSTAT_ERROR_WARNING: u8 = 0x04;
pub const BUSSTAT_ERROR_ACTIVE: u8 = 0x08;
pub const BUSSTAT_BUSOFF_RECOVERY: u8 = 0x10;
pub const BUSSTAT_IGNORING_ERRORS: u8 = 0x20;

// ============================================================================
// Driver Modes
// ============================================================================

pub const DRIVERMODE_NORMAL: u8 = 0x01;
pub const DRIVERMODE_SILENT: u8 = 0x02;
pub const DRIVERMODE_SELFRECEPTION: u8 = 0x03;
pub const DRIVERMODE_OFF: u8 = 0x04;

// ============================================================================
// Software Options (software info / software details response)
// ============================================================================

pub const SWOPTION_CONFIG_MODE: u32 = 0x01;
pub const SWOPTION_AUTO_TX_BUFFER: u32 = 0x02;
pub const SWOPTION_BETA: u32 = 0x04;
pub const SWOPTION_RC: u32 = 0x08;
pub const SWOPTION_BAD_MOOD: u32 = 0x10;
/// CPU frequency field
pub const SWOPTION_CPU_FQ_MASK: u32 = 0x60;
pub const SWOPTION_16_MHZ_CLK: u32 = 0x00;
pub const SWOPTION_32_MHZ_CLK: u32 = 0x20;
pub const SWOPTION_24_MHZ_CLK: u32 = 0x40;
/// Hydra: 80 MHz CPU clock (same field value as 32 MHz on Leaf)
pub const SWOPTION_80_MHZ_CLK: u32 = 0x20;
pub const SWOPTION_TIMEOFFSET_VALID: u32 = 0x80;
pub const SWOPTION_DELAY_MSGS: u32 = 0x100;
pub const SWOPTION_USE_HYDRA_EXT: u32 = 0x200;
pub const SWOPTION_CANFD_CAP: u32 = 0x400;
pub const SWOPTION_NONISO_CAP: u32 = 0x800;
/// Device answers GET_CAPABILITIES_REQ
pub const SWOPTION_CAP_REQ: u32 = 0x1000;
/// Hydra: CAN controller clock field
pub const SWOPTION_CAN_CLK_MASK: u32 = 0x6000;
pub const SWOPTION_80_MHZ_CAN_CLK: u32 = 0x2000;
pub const SWOPTION_24_MHZ_CAN_CLK: u32 = 0x4000;

// ============================================================================
// Capability Sub-Commands
// ============================================================================

pub const CAP_SUB_CMD_DUMMY_NOT_IMPLEMENTED: u16 = 0;
pub const CAP_SUB_CMD_DUMMY_UNAVAILABLE: u16 = 1;
pub const CAP_SUB_CMD_SILENT_MODE: u16 = 2;
pub const CAP_SUB_CMD_ERRFRAME: u16 = 3;
pub const CAP_SUB_CMD_BUS_STATS: u16 = 4;
pub const CAP_SUB_CMD_ERRCOUNT_READ: u16 = 5;
pub const CAP_SUB_CMD_SINGLE_SHOT: u16 = 6;
pub const CAP_SUB_CMD_SYNC_TX_FLUSH: u16 = 7;
pub const CAP_SUB_CMD_HAS_LOGGER: u16 = 8;
pub const CAP_SUB_CMD_HAS_REMOTE: u16 = 9;
pub const CAP_SUB_CMD_HAS_SCRIPT: u16 = 10;
pub const CAP_SUB_CMD_LIN_HYBRID: u16 = 11;
pub const CAP_SUB_CMD_KDI_INFO: u16 = 12;
pub const CAP_SUB_CMD_HAS_KDI: u16 = 13;
pub const CAP_SUB_CMD_HAS_IO_API: u16 = 14;
pub const CAP_SUB_CMD_HAS_BUSPARAMS_TQ: u16 = 15;

/// Capability status: OK
pub const CAP_STATUS_OK: u16 = 0;

// ============================================================================
// Operation Mode (capability mask negotiated with the consumer)
// ============================================================================

/// Monitor (listen-only) mode
pub const CANMODE_MON: u8 = 0x01;
/// Error frame reception
pub const CANMODE_ERR: u8 = 0x02;
/// Remote frames suppressed
pub const CANMODE_NRTR: u8 = 0x04;
/// Extended identifiers suppressed
pub const CANMODE_NXTD: u8 = 0x08;
/// Shared access
pub const CANMODE_SHRD: u8 = 0x10;
/// Non-ISO CAN FD
pub const CANMODE_NISO: u8 = 0x20;
/// Bit-rate switching enabled
pub const CANMODE_BRSE: u8 = 0x40;
/// CAN FD operation enabled
pub const CANMODE_FDOE: u8 = 0x80;
/// Classic CAN, everything allowed
pub const CANMODE_DEFAULT: u8 = 0x00;

// ============================================================================
// Firmware Error Codes (error event)
// ============================================================================

pub const FIRMWARE_ERR_OK: u8 = 0;
pub const FIRMWARE_ERR_CAN: u8 = 1;
pub const FIRMWARE_ERR_NVRAM_ERROR: u8 = 2;
pub const FIRMWARE_ERR_NOPRIV: u8 = 3;
pub const FIRMWARE_ERR_ILLEGAL_ADDRESS: u8 = 4;
pub const FIRMWARE_ERR_UNKNOWN_CMD: u8 = 5;
pub const FIRMWARE_ERR_FATAL: u8 = 6;
pub const FIRMWARE_ERR_CHECKSUM_ERROR: u8 = 7;
pub const FIRMWARE_ERR_QUEUE_LEVEL: u8 = 8;
pub const FIRMWARE_ERR_PARAMETER: u8 = 9;

// ============================================================================
// Transceiver Types
// ============================================================================

pub const TRANSCEIVER_TYPE_UNKNOWN: u8 = 0;
pub const TRANSCEIVER_TYPE_251: u8 = 1;
pub const TRANSCEIVER_TYPE_252: u8 = 2;
pub const TRANSCEIVER_TYPE_SWC: u8 = 6;
pub const TRANSCEIVER_TYPE_1054_OPTO: u8 = 11;
pub const TRANSCEIVER_TYPE_SWC_OPTO: u8 = 12;
pub const TRANSCEIVER_TYPE_1050: u8 = 14;
pub const TRANSCEIVER_TYPE_1050_OPTO: u8 = 15;
pub const TRANSCEIVER_TYPE_LIN: u8 = 19;

// ============================================================================
// CAN Frame Sizes
// ============================================================================

/// Maximum data length for classic CAN
pub const CAN_MAX_DLEN: usize = 8;
/// Maximum data length for CAN FD
pub const CANFD_MAX_DLEN: usize = 64;
/// Maximum standard (11-bit) identifier
pub const CAN_MAX_STD_ID: u32 = 0x7FF;
/// Maximum extended (29-bit) identifier
pub const CAN_MAX_XTD_ID: u32 = 0x1FFF_FFFF;
/// Extended identifier bit in a logged message
pub const LOG_MESSAGE_EXT_FLAG: u32 = 0x8000_0000;

/// CAN FD DLC to data length lookup table
pub const CANFD_DLC_TO_LEN: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// Get a human-readable name for a firmware error code
pub fn firmware_error_name(code: u8) -> &'static str {
    match code {
        FIRMWARE_ERR_OK => "ok",
        FIRMWARE_ERR_CAN => "CAN error",
        FIRMWARE_ERR_NVRAM_ERROR => "NVRAM error",
        FIRMWARE_ERR_NOPRIV => "no privilege",
        FIRMWARE_ERR_ILLEGAL_ADDRESS => "illegal address",
        FIRMWARE_ERR_UNKNOWN_CMD => "unknown command",
        FIRMWARE_ERR_FATAL => "fatal",
        FIRMWARE_ERR_CHECKSUM_ERROR => "checksum error",
        FIRMWARE_ERR_QUEUE_LEVEL => "queue level",
        FIRMWARE_ERR_PARAMETER => "parameter error",
        _ => "unknown",
    }
}

/// Get a human-readable name for a transceiver type
pub fn transceiver_name(kind: u8) -> &'static str {
    match kind {
        TRANSCEIVER_TYPE_251 => "82C251",
        TRANSCEIVER_TYPE_252 => "82C252/TJA1053/TJA1054",
        TRANSCEIVER_TYPE_SWC => "single wire",
        TRANSCEIVER_TYPE_1054_OPTO => "TJA1054 (opto)",
        TRANSCEIVER_TYPE_SWC_OPTO => "single wire (opto)",
        TRANSCEIVER_TYPE_1050 => "TJA1050",
        TRANSCEIVER_TYPE_1050_OPTO => "TJA1050 (opto)",
        TRANSCEIVER_TYPE_LIN => "LIN",
        _ => "unknown",
    }
}
