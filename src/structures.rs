//! Kvaser USB protocol structures
//!
//! This module contains the decoded forms of bus parameters, device information
//! and events exchanged with both device families, plus the operation mode mask.

use crate::constants::*;

/// Device protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFamily {
    /// Flat command protocol (Leaf Light v2)
    Leaf,
    /// Addressed command protocol (Leaf Pro HS v2 and friends)
    Hydra,
}

impl DeviceFamily {
    /// Highest number of transmit messages the family can keep in flight
    pub fn max_outstanding_tx(&self) -> u16 {
        match self {
            DeviceFamily::Leaf => LEAF_MAX_OUTSTANDING_TX,
            DeviceFamily::Hydra => HYDRA_MAX_OUTSTANDING_TX,
        }
    }

    /// Response timeout used while awaiting a command response
    pub fn response_timeout(&self) -> std::time::Duration {
        match self {
            DeviceFamily::Leaf => USB_COMMAND_TIMEOUT,
            DeviceFamily::Hydra => HYDRA_RESPONSE_TIMEOUT,
        }
    }
}

/// Operation mode
///
/// Bit mask of `CANMODE_*` flags. Used both as the capability mask negotiated
/// with the device and as the mode requested by the consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpMode(pub u8);

impl OpMode {
    pub const DEFAULT: OpMode = OpMode(CANMODE_DEFAULT);

    /// Raw flag bits
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Check whether all bits of `flags` are set
    pub fn contains(&self, flags: u8) -> bool {
        self.0 & flags == flags
    }

    /// Bits of `self` that are not part of `allowed`
    pub fn unsupported(&self, allowed: OpMode) -> u8 {
        self.0 & !allowed.0
    }

    pub fn is_fd(&self) -> bool {
        self.contains(CANMODE_FDOE)
    }

    pub fn is_brs(&self) -> bool {
        self.contains(CANMODE_BRSE)
    }

    pub fn is_monitor(&self) -> bool {
        self.contains(CANMODE_MON)
    }

    pub fn error_frames(&self) -> bool {
        self.contains(CANMODE_ERR)
    }

    pub fn suppress_extended(&self) -> bool {
        self.contains(CANMODE_NXTD)
    }

    pub fn suppress_remote(&self) -> bool {
        self.contains(CANMODE_NRTR)
    }
}

impl std::ops::BitOr<u8> for OpMode {
    type Output = OpMode;

    fn bitor(self, rhs: u8) -> OpMode {
        OpMode(self.0 | rhs)
    }
}

impl std::fmt::Display for OpMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Driver mode of the CAN controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DriverMode {
    Normal = DRIVERMODE_NORMAL,
    Silent = DRIVERMODE_SILENT,
    SelfReception = DRIVERMODE_SELFRECEPTION,
    Off = DRIVERMODE_OFF,
}

impl DriverMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            DRIVERMODE_NORMAL => Some(DriverMode::Normal),
            DRIVERMODE_SILENT => Some(DriverMode::Silent),
            DRIVERMODE_SELFRECEPTION => Some(DriverMode::SelfReception),
            DRIVERMODE_OFF => Some(DriverMode::Off),
            _ => None,
        }
    }
}

/// Bus timing parameters of one phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusParams {
    /// Bit-rate in bits per second
    pub bit_rate: u32,
    /// Time segment 1 (before the sample point)
    pub tseg1: u8,
    /// Time segment 2 (after the sample point)
    pub tseg2: u8,
    /// Synchronization jump width
    pub sjw: u8,
    /// Number of sampling points (1 or 3)
    pub no_samp: u8,
}

impl BusParams {
    /// Create bus parameters with a single sampling point
    pub fn new(bit_rate: u32, tseg1: u8, tseg2: u8, sjw: u8) -> Self {
        Self {
            bit_rate,
            tseg1,
            tseg2,
            sjw,
            no_samp: 1,
        }
    }

    /// Sample point in percent
    pub fn sample_point(&self) -> f32 {
        let total = 1 + self.tseg1 as u32 + self.tseg2 as u32;
        (1 + self.tseg1 as u32) as f32 * 100.0 / total as f32
    }

    /// Whether every timing field is non-zero
    pub fn is_valid(&self) -> bool {
        self.bit_rate != 0 && self.tseg1 != 0 && self.tseg2 != 0 && self.sjw != 0 && self.no_samp != 0
    }
}

impl std::fmt::Display for BusParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} bit/s, tseg1={}, tseg2={}, sjw={}, samples={} ({:.1}%)",
            self.bit_rate,
            self.tseg1,
            self.tseg2,
            self.sjw,
            self.no_samp,
            self.sample_point()
        )
    }
}

/// Bus timing parameters for CAN FD (nominal and data phase)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusParamsFd {
    /// Arbitration phase
    pub nominal: BusParams,
    /// Data phase (used with bit-rate switching)
    pub data: BusParams,
    /// Open the channel as CAN FD
    pub can_fd: bool,
}

/// Card information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CardInfo {
    pub channel_count: u8,
    pub serial_number: u32,
    pub clock_resolution: u32,
    pub mfg_date: u32,
    /// EAN, least significant byte first
    pub ean: [u8; 8],
    pub hw_revision: u8,
    pub usb_hs_mode: u8,
    pub hw_type: u8,
    pub timestamp_ref: u8,
}

impl CardInfo {
    /// EAN in the printed form `73-30130-00351-4`
    pub fn ean_string(&self) -> String {
        let mut digits = String::with_capacity(16);
        for b in self.ean.iter().rev() {
            digits.push_str(&format!("{:02x}", b));
        }
        let digits = digits.trim_start_matches('0');
        if digits.len() < 13 {
            return digits.to_string();
        }
        let n = digits.len();
        format!(
            "{}-{}-{}-{}",
            &digits[..n - 11],
            &digits[n - 11..n - 6],
            &digits[n - 6..n - 1],
            &digits[n - 1..]
        )
    }
}

/// Firmware information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftwareInfo {
    /// `SWOPTION_*` flags
    pub sw_options: u32,
    pub firmware_version: u32,
    pub max_outstanding_tx: u16,
    pub max_bitrate: u32,
    /// Hydra only
    pub sw_name: u32,
    /// Hydra only
    pub ean: [u8; 8],
}

impl SoftwareInfo {
    /// CPU frequency field of the software options
    pub fn cpu_frequency_bits(&self) -> u32 {
        self.sw_options & SWOPTION_CPU_FQ_MASK
    }

    /// CAN clock field of the software options (Hydra)
    pub fn can_clock_bits(&self) -> u32 {
        self.sw_options & SWOPTION_CAN_CLK_MASK
    }

    pub fn is_canfd_capable(&self) -> bool {
        self.sw_options & SWOPTION_CANFD_CAP != 0
    }

    pub fn is_noniso_capable(&self) -> bool {
        self.sw_options & SWOPTION_NONISO_CAP != 0
    }

    pub fn answers_capabilities(&self) -> bool {
        self.sw_options & SWOPTION_CAP_REQ != 0
    }

    /// Firmware version as `major.minor.build`
    pub fn version_string(&self) -> String {
        format!(
            "{}.{}.{}",
            self.firmware_version >> 24,
            (self.firmware_version >> 16) & 0xFF,
            self.firmware_version & 0xFFFF
        )
    }
}

/// Interface information (Leaf only)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub channel_capabilities: u32,
    pub can_chip_type: u8,
    pub can_chip_sub_type: u8,
}

/// Transceiver information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransceiverInfo {
    pub capabilities: u32,
    pub status: u8,
    /// `TRANSCEIVER_TYPE_*`
    pub kind: u8,
}

impl TransceiverInfo {
    pub fn name(&self) -> &'static str {
        transceiver_name(self.kind)
    }
}

/// Device capabilities reported through `GET_CAPABILITIES_REQ`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub silent_mode: bool,
    pub error_frame: bool,
    pub bus_stats: bool,
    pub error_count: bool,
    pub single_shot: bool,
    pub sync_tx_flush: bool,
    pub has_logger: bool,
    pub has_remote: bool,
    pub has_script: bool,
    pub lin_hybrid: bool,
    pub kdi_info: bool,
    pub has_kdi: bool,
    pub has_io_api: bool,
    pub has_busparams_tq: bool,
}

impl Capabilities {
    /// Record the answer to one capability sub-command
    pub fn set(&mut self, sub_cmd: u16, present: bool) {
        let field = match sub_cmd {
            CAP_SUB_CMD_SILENT_MODE => &mut self.silent_mode,
            CAP_SUB_CMD_ERRFRAME => &mut self.error_frame,
            CAP_SUB_CMD_BUS_STATS => &mut self.bus_stats,
            CAP_SUB_CMD_ERRCOUNT_READ => &mut self.error_count,
            CAP_SUB_CMD_SINGLE_SHOT => &mut self.single_shot,
            CAP_SUB_CMD_SYNC_TX_FLUSH => &mut self.sync_tx_flush,
            CAP_SUB_CMD_HAS_LOGGER => &mut self.has_logger,
            CAP_SUB_CMD_HAS_REMOTE => &mut self.has_remote,
            CAP_SUB_CMD_HAS_SCRIPT => &mut self.has_script,
            CAP_SUB_CMD_LIN_HYBRID => &mut self.lin_hybrid,
            CAP_SUB_CMD_KDI_INFO => &mut self.kdi_info,
            CAP_SUB_CMD_HAS_KDI => &mut self.has_kdi,
            CAP_SUB_CMD_HAS_IO_API => &mut self.has_io_api,
            CAP_SUB_CMD_HAS_BUSPARAMS_TQ => &mut self.has_busparams_tq,
            _ => return,
        };
        *field = present;
    }
}

/// Answer to a single capability sub-command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityResponse {
    pub sub_cmd: u16,
    pub status: u16,
    pub mask: u32,
    pub value: u32,
}

/// Bus load measurement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusLoad {
    pub sample_interval: u16,
    pub active_samples: u16,
    pub delta_t: u16,
}

impl BusLoad {
    /// Bus load in hundredths of a percent (0..=10000)
    pub fn load(&self) -> u16 {
        if self.delta_t == 0 {
            return 0;
        }
        let load = self.active_samples as u64 * self.sample_interval as u64 * 10 / self.delta_t as u64;
        load.min(10000) as u16
    }

    /// Bus load in percent
    pub fn percent(&self) -> f32 {
        self.load() as f32 / 100.0
    }
}

/// Chip state event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChipStateEvent {
    pub time: u64,
    pub tx_errors: u8,
    pub rx_errors: u8,
    /// `BUSSTAT_*` flags
    pub bus_status: u8,
}

impl ChipStateEvent {
    pub fn is_bus_off(&self) -> bool {
        self.bus_status & BUSSTAT_BUSOFF != 0
    }

    pub fn is_error_passive(&self) -> bool {
        self.bus_status & BUSSTAT_ERROR_PASSIVE != 0
    }

    pub fn is_error_warning(&self) -> bool {
        self.bus_status & BUSSTAT_ERROR_WARNING != 0
    }
}

/// Firmware error event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorEvent {
    pub time: u64,
    pub code: u8,
    pub add_info1: u16,
    pub add_info2: u16,
}

/// CAN bus error event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanErrorEvent {
    pub time: u64,
    pub flags: u8,
    pub channel: u8,
    pub tx_errors: u8,
    pub rx_errors: u8,
    pub bus_status: u8,
    pub error_factor: u8,
}

/// Transmit acknowledgment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxAcknowledge {
    /// Leaf only
    pub channel: u8,
    pub trans_id: u8,
    pub time: u64,
    pub flags: u32,
}

/// Live snapshot of the most recent events of a channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventData {
    pub chip_state: ChipStateEvent,
    pub error: ErrorEvent,
    pub can_error: CanErrorEvent,
    /// Message flags of the last frame that was not delivered
    pub last_flags: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_mode_unsupported_bits() {
        let capability = OpMode(CANMODE_NXTD | CANMODE_NRTR | CANMODE_ERR);
        assert_eq!(OpMode(CANMODE_NXTD).unsupported(capability), 0);
        assert_eq!(OpMode(CANMODE_FDOE | CANMODE_ERR).unsupported(capability), CANMODE_FDOE);
        assert!(OpMode(CANMODE_FDOE | CANMODE_BRSE).is_brs());
    }

    #[test]
    fn test_driver_mode_from_u8() {
        assert_eq!(DriverMode::from_u8(1), Some(DriverMode::Normal));
        assert_eq!(DriverMode::from_u8(4), Some(DriverMode::Off));
        assert_eq!(DriverMode::from_u8(0), None);
    }

    #[test]
    fn test_bus_params_sample_point() {
        let params = BusParams::new(500_000, 13, 2, 1);
        assert_eq!(params.sample_point(), 87.5);
        assert!(params.is_valid());
        assert!(!BusParams::default().is_valid());
    }

    #[test]
    fn test_bus_load() {
        let load = BusLoad {
            sample_interval: 100,
            active_samples: 50,
            delta_t: 1000,
        };
        assert_eq!(load.load(), 50);

        let saturated = BusLoad {
            sample_interval: 1000,
            active_samples: 1000,
            delta_t: 1,
        };
        assert_eq!(saturated.load(), 10000);
        assert_eq!(BusLoad::default().load(), 0);
    }

    #[test]
    fn test_capabilities_set() {
        let mut caps = Capabilities::default();
        caps.set(CAP_SUB_CMD_SILENT_MODE, true);
        caps.set(CAP_SUB_CMD_HAS_IO_API, true);
        caps.set(99, true);
        assert!(caps.silent_mode);
        assert!(caps.has_io_api);
        assert!(!caps.error_frame);
    }

    #[test]
    fn test_software_info_version() {
        let info = SoftwareInfo {
            firmware_version: 0x0304_0123,
            sw_options: SWOPTION_CAP_REQ | SWOPTION_24_MHZ_CLK,
            ..Default::default()
        };
        assert_eq!(info.version_string(), "3.4.291");
        assert!(info.answers_capabilities());
        assert_eq!(info.cpu_frequency_bits(), SWOPTION_24_MHZ_CLK);
    }

    #[test]
    fn test_ean_string() {
        let info = CardInfo {
            ean: [0x14, 0x35, 0x00, 0x30, 0x01, 0x33, 0x07, 0x00],
            ..Default::default()
        };
        assert_eq!(info.ean_string(), "73-30130-00351-4");
    }
}
