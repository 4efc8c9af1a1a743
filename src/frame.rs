//! Kvaser CAN frame implementation
//!
//! This module provides the `CanFrame` struct shared by both device families,
//! the DLC/length conversion tables and the device tick to timestamp conversion.

use crate::constants::{CANFD_DLC_TO_LEN, CANFD_MAX_DLEN, CAN_MAX_DLEN, CAN_MAX_STD_ID, CAN_MAX_XTD_ID};

/// Convert DLC to data length
///
/// Classic CAN saturates at 8 bytes, CAN FD uses the DLC table and
/// saturates at 64 bytes for any DLC above 15.
pub fn dlc_to_len(dlc: u8, fd: bool) -> usize {
    if fd {
        if (dlc as usize) < CANFD_DLC_TO_LEN.len() {
            CANFD_DLC_TO_LEN[dlc as usize]
        } else {
            CANFD_MAX_DLEN
        }
    } else {
        (dlc as usize).min(CAN_MAX_DLEN)
    }
}

/// Convert data length to DLC
///
/// Lengths between two table entries round up to the next DLC.
pub fn len_to_dlc(length: usize, fd: bool) -> u8 {
    if !fd {
        return length.min(CAN_MAX_DLEN) as u8;
    }
    match length {
        l if l > 48 => 15,
        l if l > 32 => 14,
        l if l > 24 => 13,
        l if l > 20 => 12,
        l if l > 16 => 11,
        l if l > 12 => 10,
        l if l > 8 => 9,
        l => l as u8,
    }
}

/// Convert device timer ticks to nanoseconds
///
/// # Arguments
/// * `ticks` - timer value from the device (48-bit or 64-bit)
/// * `freq_mhz` - timer frequency in MHz (0 is treated as 1)
pub fn nanoseconds_from_ticks(ticks: u64, freq_mhz: u32) -> u64 {
    let freq = if freq_mhz == 0 { 1 } else { freq_mhz as u128 };
    (ticks as u128 * 1000 / freq).min(u64::MAX as u128) as u64
}

/// Device timestamp with nanosecond resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    /// Seconds
    pub sec: u64,
    /// Nanoseconds (0..1_000_000_000)
    pub nsec: u32,
}

impl Timestamp {
    /// Build a timestamp from device timer ticks
    pub fn from_ticks(ticks: u64, freq_mhz: u32) -> Self {
        Self::from_nanos(nanoseconds_from_ticks(ticks, freq_mhz))
    }

    /// Build a timestamp from nanoseconds
    pub fn from_nanos(nsec: u64) -> Self {
        Self {
            sec: nsec / 1_000_000_000,
            nsec: (nsec % 1_000_000_000) as u32,
        }
    }

    /// Total nanoseconds
    pub fn as_nanos(&self) -> u64 {
        self.sec * 1_000_000_000 + self.nsec as u64
    }

    /// Timestamp in seconds
    pub fn as_secs_f64(&self) -> f64 {
        self.sec as f64 + self.nsec as f64 / 1_000_000_000.0
    }
}

/// CAN frame as exchanged with the consumer
///
/// Supports both classic CAN (8 bytes max) and CAN FD (64 bytes max).
/// The payload length is always derived from `dlc`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    /// CAN identifier (11-bit or 29-bit, without flags)
    pub id: u32,
    /// Extended (29-bit) identifier
    pub xtd: bool,
    /// Remote transmission request
    pub rtr: bool,
    /// Error/status frame
    pub sts: bool,
    /// CAN FD format
    pub fdf: bool,
    /// Bit-rate switch
    pub brs: bool,
    /// Error state indicator
    pub esi: bool,
    /// Data length code
    pub dlc: u8,
    /// Frame data (up to 64 bytes for CAN FD)
    pub data: [u8; CANFD_MAX_DLEN],
    /// Device timestamp
    pub timestamp: Timestamp,
}

impl Default for CanFrame {
    fn default() -> Self {
        Self::new(0)
    }
}

impl CanFrame {
    /// Create an empty standard frame
    pub fn new(id: u32) -> Self {
        Self {
            id,
            xtd: false,
            rtr: false,
            sts: false,
            fdf: false,
            brs: false,
            esi: false,
            dlc: 0,
            data: [0u8; CANFD_MAX_DLEN],
            timestamp: Timestamp::default(),
        }
    }

    /// Create a classic CAN frame with the specified ID and data
    ///
    /// Identifiers above 0x7FF select the extended format.
    pub fn with_data(id: u32, data: &[u8]) -> Self {
        let mut frame = Self::new(id & CAN_MAX_XTD_ID);
        frame.xtd = id > CAN_MAX_STD_ID;
        frame.set_data(data);
        frame
    }

    /// Create a classic CAN frame with an extended (29-bit) identifier
    pub fn with_extended_data(id: u32, data: &[u8]) -> Self {
        let mut frame = Self::new(id & CAN_MAX_XTD_ID);
        frame.xtd = true;
        frame.set_data(data);
        frame
    }

    /// Create a remote transmission request
    pub fn remote(id: u32, dlc: u8) -> Self {
        let mut frame = Self::new(id & CAN_MAX_XTD_ID);
        frame.xtd = id > CAN_MAX_STD_ID;
        frame.rtr = true;
        frame.dlc = dlc.min(CAN_MAX_DLEN as u8);
        frame
    }

    /// Create a new CAN FD frame with the specified ID and data
    ///
    /// # Arguments
    /// * `id` - CAN identifier (above 0x7FF selects the extended format)
    /// * `data` - Frame data (up to 64 bytes)
    /// * `brs` - Enable bit rate switch (transmit data at higher rate)
    pub fn with_fd_data(id: u32, data: &[u8], brs: bool) -> Self {
        let mut frame = Self::new(id & CAN_MAX_XTD_ID);
        frame.xtd = id > CAN_MAX_STD_ID;
        frame.fdf = true;
        frame.brs = brs;
        frame.set_data(data);
        frame
    }

    /// Set frame data, padding up to the next valid FD length
    pub fn set_data(&mut self, data: &[u8]) {
        let max_len = if self.fdf { CANFD_MAX_DLEN } else { CAN_MAX_DLEN };
        let data_len = data.len().min(max_len);

        self.data = [0u8; CANFD_MAX_DLEN];
        self.data[..data_len].copy_from_slice(&data[..data_len]);
        self.dlc = len_to_dlc(data_len, self.fdf);
    }

    /// Check if this is an extended ID frame (29-bit)
    pub fn is_extended_id(&self) -> bool {
        self.xtd
    }

    /// Check if this is a remote transmission request
    pub fn is_remote_frame(&self) -> bool {
        self.rtr
    }

    /// Check if this is an error/status frame
    pub fn is_error_frame(&self) -> bool {
        self.sts
    }

    /// Check if this is a CAN FD frame
    pub fn is_fd(&self) -> bool {
        self.fdf
    }

    /// Check if bit rate switch is enabled
    pub fn is_brs(&self) -> bool {
        self.brs
    }

    /// Get actual data length based on DLC and frame type
    pub fn data_length(&self) -> usize {
        dlc_to_len(self.dlc, self.fdf)
    }

    /// Get frame data as a slice
    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_length()]
    }
}

impl std::fmt::Display for CanFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fd_indicator = if self.fdf { " FD" } else { "" };
        let brs_indicator = if self.brs { " BRS" } else { "" };

        let data_str = if self.sts {
            "error frame".to_string()
        } else if self.rtr {
            "remote request".to_string()
        } else {
            self.data()
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(" ")
        };

        let width = if self.xtd { 8 } else { 3 };
        write!(
            f,
            "{}.{:09}  {:>w$X}{}{}   [{}]  {}",
            self.timestamp.sec,
            self.timestamp.nsec,
            self.id,
            fd_indicator,
            brs_indicator,
            self.data_length(),
            data_str,
            w = width
        )
    }
}

impl std::fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanFrame")
            .field("id", &format_args!("0x{:08X}", self.id))
            .field("xtd", &self.xtd)
            .field("rtr", &self.rtr)
            .field("sts", &self.sts)
            .field("fdf", &self.fdf)
            .field("brs", &self.brs)
            .field("esi", &self.esi)
            .field("dlc", &self.dlc)
            .field("data", &self.data())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Decoded CAN message together with the raw device flags
#[derive(Debug, Clone, Copy)]
pub struct ReceivedMessage {
    pub frame: CanFrame,
    /// `MSGFLAG_*` bits as reported by the device
    pub flags: u32,
    /// Whether the flags describe a frame rather than a bus condition
    pub valid: bool,
}
