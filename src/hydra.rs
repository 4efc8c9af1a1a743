//! Hydra command codec
//!
//! Hydra commands are addressed: the 4-byte header is
//! `{opcode, HE address, transaction lo, transaction hi}` where the HE address
//! carries the 6-bit destination and the transaction field a 12-bit sequence.
//! Ordinary commands are 32 bytes long. `CMD_EXTENDED` frames add a 16-bit
//! length (32..=96) at byte 4 and an extended opcode at byte 6; they carry the
//! CAN FD transmit, receive and acknowledge traffic.

use crate::constants::*;
use crate::error::{KvaserError, Result};
use crate::frame::{dlc_to_len, CanFrame, ReceivedMessage, Timestamp};
use crate::structures::*;
use crate::wire::{ByteReader, ByteWriter};

/// Message flags a received frame may carry and still be delivered
const DELIVERABLE_FLAGS: u32 = MSGFLAG_REMOTE_FRAME
    | MSGFLAG_ERROR_FRAME
    | MSGFLAG_EXTENDED_ID
    | MSGFLAG_FDF
    | MSGFLAG_BRS
    | MSGFLAG_ESI;

/// Data bytes reported by an error frame
const ERROR_FRAME_LENGTH: usize = 4;

/// Byte offset of the payload in an extended frame
const EXT_PAYLOAD_OFFSET: usize = 32;

/// Replace the destination bits of an HE address byte
pub fn set_dst(address: u8, dst: u8) -> u8 {
    (address & 0xC0) | (dst & 0x3F)
}

/// Replace the sequence bits of a transaction field
pub fn set_seq(trans: u16, seq: u16) -> u16 {
    (trans & 0xF000) | (seq & 0x0FFF)
}

// ============================================================================
// Framing
// ============================================================================

/// Length of the command starting at `buf[0]`
///
/// Ordinary commands are always 32 bytes. For `CMD_EXTENDED` the length is
/// read from the frame's own header, which must be complete. Returns `None`
/// while the header is still incomplete and an error for an implausible length.
pub fn frame_length(buf: &[u8]) -> Result<Option<usize>> {
    match buf.first() {
        None => Ok(None),
        Some(&CMD_EXTENDED) => {
            if buf.len() < 6 {
                return Ok(None);
            }
            let len = ByteReader::new(buf).u16(4)? as usize;
            if !(HYDRA_CMD_SIZE..=HYDRA_CMD_EXT_SIZE).contains(&len) {
                return Err(KvaserError::InvalidResponse {
                    opcode: CMD_EXTENDED,
                    expected: HYDRA_CMD_EXT_SIZE,
                    actual: len,
                });
            }
            Ok(Some(len))
        }
        Some(_) => Ok(Some(HYDRA_CMD_SIZE)),
    }
}

/// Opcode of the command starting at `buf[0]`
pub fn opcode(buf: &[u8]) -> Option<u8> {
    buf.first().copied()
}

/// Extended opcode of a `CMD_EXTENDED` frame
pub fn extended_opcode(buf: &[u8]) -> Option<u8> {
    match buf.first() {
        Some(&CMD_EXTENDED) => buf.get(6).copied(),
        _ => None,
    }
}

// ============================================================================
// Request Builders
// ============================================================================

/// Start a 32-byte command addressed to `dest` with a zero transaction field
fn command(opcode: u8, dest: u8) -> Result<ByteWriter> {
    let mut w = ByteWriter::new(HYDRA_CMD_SIZE);
    w.put_u8(0, opcode)?;
    w.put_u8(1, set_dst(0, dest))?;
    Ok(w)
}

fn simple(opcode: u8, dest: u8) -> Result<Vec<u8>> {
    command(opcode, dest).map(ByteWriter::into_vec)
}

fn put_bus_params(w: &mut ByteWriter, offset: usize, params: &BusParams) -> Result<()> {
    w.put_u32(offset, params.bit_rate)?;
    w.put_u8(offset + 4, params.tseg1)?;
    w.put_u8(offset + 5, params.tseg2)?;
    w.put_u8(offset + 6, params.sjw)?;
    w.put_u8(offset + 7, params.no_samp)
}

/// Map a logical CAN channel to its HE address (sent to the router)
pub fn map_channel_req(channel: u8) -> Result<Vec<u8>> {
    if channel >= HYDRA_MAX_CARD_CHANNELS {
        return Err(KvaserError::IllegalParameter("channel number"));
    }
    let mut w = command(CMD_MAP_CHANNEL_REQ, ROUTER_HE)?;
    w.put_u16(2, set_seq(0, HYDRA_MAP_CAN_TRANSACTION | channel as u16))?;
    w.put_bytes(4, b"CAN")?;
    w.put_u8(20, channel)?;
    Ok(w.into_vec())
}

/// Map the SYSDBG endpoint, which answers capability queries
pub fn map_sysdbg_req() -> Result<Vec<u8>> {
    let mut w = command(CMD_MAP_CHANNEL_REQ, ROUTER_HE)?;
    w.put_u16(2, set_seq(0, HYDRA_SYSDBG_TRANSACTION))?;
    w.put_bytes(4, b"SYSDBG")?;
    Ok(w.into_vec())
}

pub fn set_bus_params_req(dest: u8, params: &BusParams) -> Result<Vec<u8>> {
    let mut w = command(CMD_SET_BUSPARAMS_REQ, dest)?;
    put_bus_params(&mut w, 4, params)?;
    Ok(w.into_vec())
}

/// Nominal phase at bytes 4..12, data phase at 16..24, FD mode flag at 24
pub fn set_bus_params_fd_req(dest: u8, params: &BusParamsFd) -> Result<Vec<u8>> {
    let mut w = command(CMD_SET_BUSPARAMS_FD_REQ, dest)?;
    put_bus_params(&mut w, 4, &params.nominal)?;
    put_bus_params(&mut w, 16, &params.data)?;
    w.put_u8(24, params.can_fd as u8)?;
    Ok(w.into_vec())
}

/// Read back bus parameters; `data_phase` selects the FD data phase
pub fn get_bus_params_req(dest: u8, data_phase: bool) -> Result<Vec<u8>> {
    let mut w = command(CMD_GET_BUSPARAMS_REQ, dest)?;
    w.put_u8(4, data_phase as u8)?;
    Ok(w.into_vec())
}

pub fn set_driver_mode_req(dest: u8, mode: DriverMode) -> Result<Vec<u8>> {
    let mut w = command(CMD_SET_DRIVERMODE_REQ, dest)?;
    w.put_u8(4, mode as u8)?;
    Ok(w.into_vec())
}

pub fn get_driver_mode_req(dest: u8) -> Result<Vec<u8>> {
    simple(CMD_GET_DRIVERMODE_REQ, dest)
}

pub fn get_chip_state_req(dest: u8) -> Result<Vec<u8>> {
    simple(CMD_GET_CHIP_STATE_REQ, dest)
}

pub fn start_chip_req(dest: u8) -> Result<Vec<u8>> {
    simple(CMD_START_CHIP_REQ, dest)
}

pub fn stop_chip_req(dest: u8) -> Result<Vec<u8>> {
    simple(CMD_STOP_CHIP_REQ, dest)
}

pub fn reset_chip_req(dest: u8) -> Result<Vec<u8>> {
    simple(CMD_RESET_CHIP_REQ, dest)
}

pub fn reset_card_req() -> Result<Vec<u8>> {
    simple(CMD_RESET_CARD_REQ, ROUTER_HE)
}

pub fn flush_queue_req(dest: u8) -> Result<Vec<u8>> {
    simple(CMD_FLUSH_QUEUE, dest)
}

pub fn reset_error_counter_req(dest: u8) -> Result<Vec<u8>> {
    simple(CMD_RESET_ERROR_COUNTER, dest)
}

pub fn reset_statistics_req(dest: u8) -> Result<Vec<u8>> {
    simple(CMD_RESET_STATISTICS, dest)
}

pub fn read_clock_req(flags: u8) -> Result<Vec<u8>> {
    let mut w = command(CMD_READ_CLOCK_REQ, ILLEGAL_HE)?;
    w.put_u8(4, flags)?;
    Ok(w.into_vec())
}

pub fn get_bus_load_req(dest: u8) -> Result<Vec<u8>> {
    simple(CMD_GET_BUSLOAD_REQ, dest)
}

pub fn get_card_info_req(data_level: u8) -> Result<Vec<u8>> {
    let mut w = command(CMD_GET_CARD_INFO_REQ, ILLEGAL_HE)?;
    w.put_u8(4, data_level)?;
    Ok(w.into_vec())
}

pub fn get_software_details_req(hydra_ext: bool) -> Result<Vec<u8>> {
    let mut w = command(CMD_GET_SOFTWARE_DETAILS_REQ, ILLEGAL_HE)?;
    w.put_u8(4, hydra_ext as u8)?;
    Ok(w.into_vec())
}

/// Software info request; Hydra firmware only answers the outstanding limit
pub fn get_max_outstanding_req() -> Result<Vec<u8>> {
    simple(CMD_GET_SOFTWARE_INFO_REQ, ILLEGAL_HE)
}

/// Capability query, addressed to the SYSDBG endpoint
pub fn get_capabilities_req(sysdbg_he: u8, sub_cmd: u16) -> Result<Vec<u8>> {
    let mut w = command(CMD_GET_CAPABILITIES_REQ, sysdbg_he)?;
    w.put_u16(4, sub_cmd)?;
    Ok(w.into_vec())
}

pub fn get_transceiver_info_req(dest: u8) -> Result<Vec<u8>> {
    simple(CMD_GET_TRANSCEIVER_INFO_REQ, dest)
}

/// Extended transmit request for classic and FD frames
///
/// The frame is 96 bytes when it carries data, 32 bytes otherwise. Bit 31 of
/// the FPGA control word requests an acknowledgment, the low byte echoes the
/// transaction id.
pub fn tx_message_req(dest: u8, trans_id: u8, frame: &CanFrame) -> Result<Vec<u8>> {
    let max_dlc = if frame.fdf { 15 } else { CAN_MAX_DLEN as u8 };
    let dlc = frame.dlc.min(max_dlc);
    let len = if dlc != 0 {
        HYDRA_CMD_EXT_SIZE
    } else {
        HYDRA_CMD_SIZE
    };

    let mut flags = MSGFLAG_TX;
    let mut fpga_id = frame.id & CAN_MAX_XTD_ID;
    let mut fpga_ctrl = FPGA_CTRL_REQUEST_ACK | trans_id as u32 | ((dlc as u32 & 0x0F) << 8);
    if frame.xtd {
        flags |= MSGFLAG_EXTENDED_ID;
        fpga_id |= FPGA_ID_EXTENDED;
    }
    if frame.rtr {
        flags |= MSGFLAG_REMOTE_FRAME;
        fpga_id |= FPGA_ID_REMOTE;
    }
    if frame.fdf {
        flags |= MSGFLAG_FDF;
        fpga_ctrl |= FPGA_CTRL_FDF;
    }
    if frame.brs {
        flags |= MSGFLAG_BRS;
        fpga_ctrl |= FPGA_CTRL_BRS;
    }
    if frame.esi {
        flags |= MSGFLAG_ESI;
        fpga_ctrl |= FPGA_CTRL_ESI;
    }

    let data_len = dlc_to_len(dlc, frame.fdf);
    let mut w = ByteWriter::new(len);
    w.put_u8(0, CMD_EXTENDED)?;
    w.put_u8(1, set_dst(0, dest))?;
    w.put_u8(2, trans_id)?;
    w.put_u16(4, len as u16)?;
    w.put_u8(6, CMD_TX_CAN_MESSAGE_FD)?;
    w.put_u32(8, flags)?;
    w.put_u32(12, frame.id)?;
    w.put_u32(16, fpga_id)?;
    w.put_u32(20, fpga_ctrl)?;
    w.put_u8(24, data_len as u8)?;
    w.put_u8(25, dlc)?;
    if len > HYDRA_CMD_SIZE {
        w.put_bytes(EXT_PAYLOAD_OFFSET, &frame.data[..data_len])?;
    }
    Ok(w.into_vec())
}

// ============================================================================
// Response Decoders
// ============================================================================

/// Check the opcode and the size of a received 32-byte command
fn expect(buf: &[u8], opcode: u8) -> Result<ByteReader<'_>> {
    let r = ByteReader::new(buf);
    let actual = r.u8(0)?;
    if actual != opcode || buf.len() < HYDRA_CMD_SIZE {
        return Err(KvaserError::InvalidResponse {
            opcode,
            expected: HYDRA_CMD_SIZE,
            actual: buf.len(),
        });
    }
    Ok(r)
}

/// Check an extended frame and its extended opcode
fn expect_extended(buf: &[u8], ext_opcode: u8) -> Result<ByteReader<'_>> {
    let r = ByteReader::new(buf);
    if buf.len() < HYDRA_CMD_SIZE || r.u8(0)? != CMD_EXTENDED || r.u8(6)? != ext_opcode {
        return Err(KvaserError::InvalidResponse {
            opcode: ext_opcode,
            expected: HYDRA_CMD_SIZE,
            actual: buf.len(),
        });
    }
    Ok(r)
}

/// HE addresses from a map channel response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelMapping {
    /// HE address to send channel commands to
    pub he: u8,
    /// Channel index reported in the low bits of the transaction field
    pub source: u8,
}

pub fn decode_map_channel(buf: &[u8]) -> Result<ChannelMapping> {
    let r = expect(buf, CMD_MAP_CHANNEL_RESP)?;
    Ok(ChannelMapping {
        he: r.u8(4)?,
        source: (r.u16(2)? & 0x0F) as u8,
    })
}

pub fn decode_bus_params(buf: &[u8]) -> Result<BusParams> {
    let r = expect(buf, CMD_GET_BUSPARAMS_RESP)?;
    Ok(BusParams {
        bit_rate: r.u32(4)?,
        tseg1: r.u8(8)?,
        tseg2: r.u8(9)?,
        sjw: r.u8(10)?,
        no_samp: r.u8(11)?,
    })
}

pub fn decode_driver_mode(buf: &[u8]) -> Result<u8> {
    expect(buf, CMD_GET_DRIVERMODE_RESP)?.u8(4)
}

pub fn decode_read_clock(buf: &[u8]) -> Result<u64> {
    expect(buf, CMD_READ_CLOCK_RESP)?.ticks48(4)
}

pub fn decode_bus_load(buf: &[u8]) -> Result<BusLoad> {
    let r = expect(buf, CMD_GET_BUSLOAD_RESP)?;
    Ok(BusLoad {
        sample_interval: r.u16(10)?,
        active_samples: r.u16(12)?,
        delta_t: r.u16(14)?,
    })
}

pub fn decode_card_info(buf: &[u8]) -> Result<CardInfo> {
    let r = expect(buf, CMD_GET_CARD_INFO_RESP)?;
    let mut ean = [0u8; 8];
    ean.copy_from_slice(r.bytes(16, 8)?);
    Ok(CardInfo {
        serial_number: r.u32(4)?,
        clock_resolution: r.u32(8)?,
        mfg_date: r.u32(12)?,
        ean,
        hw_revision: r.u8(24)?,
        usb_hs_mode: r.u8(25)?,
        hw_type: r.u8(26)?,
        timestamp_ref: r.u8(27)?,
        channel_count: r.u8(28)?,
    })
}

/// Software details; the outstanding limit arrives separately
pub fn decode_software_details(buf: &[u8]) -> Result<SoftwareInfo> {
    let r = expect(buf, CMD_GET_SOFTWARE_DETAILS_RESP)?;
    let mut ean = [0u8; 8];
    ean.copy_from_slice(r.bytes(16, 8)?);
    Ok(SoftwareInfo {
        sw_options: r.u32(4)?,
        firmware_version: r.u32(8)?,
        sw_name: r.u32(12)?,
        ean,
        max_bitrate: r.u32(24)?,
        max_outstanding_tx: 0,
    })
}

pub fn decode_max_outstanding(buf: &[u8]) -> Result<u16> {
    expect(buf, CMD_GET_SOFTWARE_INFO_RESP)?.u16(12)
}

pub fn decode_capabilities(buf: &[u8]) -> Result<CapabilityResponse> {
    let r = expect(buf, CMD_GET_CAPABILITIES_RESP)?;
    Ok(CapabilityResponse {
        sub_cmd: r.u16(4)?,
        status: r.u16(6)?,
        mask: r.u32(8)?,
        value: r.u32(12)?,
    })
}

/// Whether a capability answer reports the feature for `channel`
pub fn capability_present(resp: &CapabilityResponse, channel: u8) -> bool {
    let bit = 1u32.checked_shl(channel as u32).unwrap_or(0);
    resp.status == CAP_STATUS_OK && resp.mask & bit != 0 && resp.value & bit != 0
}

pub fn decode_transceiver_info(buf: &[u8]) -> Result<TransceiverInfo> {
    let r = expect(buf, CMD_GET_TRANSCEIVER_INFO_RESP)?;
    Ok(TransceiverInfo {
        capabilities: r.u32(4)?,
        status: r.u8(8)?,
        kind: r.u8(9)?,
    })
}

/// Error event code, if `buf` is an error event
pub fn error_event_code(buf: &[u8]) -> Option<u8> {
    match buf.first() {
        Some(&CMD_ERROR_EVENT) => buf.get(11).copied(),
        _ => None,
    }
}

// ============================================================================
// Events and Messages
// ============================================================================

pub fn decode_chip_state_event(buf: &[u8]) -> Result<ChipStateEvent> {
    let r = expect(buf, CMD_CHIP_STATE_EVENT)?;
    Ok(ChipStateEvent {
        time: r.ticks48(4)?,
        tx_errors: r.u8(10)?,
        rx_errors: r.u8(11)?,
        bus_status: r.u8(12)?,
    })
}

pub fn decode_error_event(buf: &[u8]) -> Result<ErrorEvent> {
    let r = expect(buf, CMD_ERROR_EVENT)?;
    Ok(ErrorEvent {
        time: r.ticks48(4)?,
        code: r.u8(11)?,
        add_info1: r.u16(12)?,
        add_info2: r.u16(14)?,
    })
}

/// CAN error event; Hydra reports it per HE address, so the channel is 0
pub fn decode_can_error_event(buf: &[u8]) -> Result<CanErrorEvent> {
    let r = expect(buf, CMD_CAN_ERROR_EVENT)?;
    Ok(CanErrorEvent {
        time: r.ticks48(4)?,
        flags: r.u8(10)?,
        channel: 0,
        tx_errors: r.u8(12)?,
        rx_errors: r.u8(13)?,
        bus_status: r.u8(14)?,
        error_factor: r.u8(15)?,
    })
}

pub fn decode_tx_acknowledge(buf: &[u8]) -> Result<TxAcknowledge> {
    let r = expect_extended(buf, CMD_TX_ACKNOWLEDGE_FD)?;
    Ok(TxAcknowledge {
        channel: 0,
        trans_id: r.u8(2)?,
        flags: r.u32(8)?,
        time: r.u64(24)?,
    })
}

/// Decode a received CAN or CAN FD message
///
/// Error frames always report four data bytes. The message is only
/// deliverable when its flags stay within the frame format flags.
pub fn decode_rx_message(buf: &[u8], timer_freq: u32) -> Result<ReceivedMessage> {
    let r = expect_extended(buf, CMD_RX_MESSAGE_FD)?;
    let flags = r.u32(8)?;

    let mut frame = CanFrame::new(r.u32(12)? & CAN_MAX_XTD_ID);
    frame.xtd = flags & MSGFLAG_EXTENDED_ID != 0;
    frame.rtr = flags & MSGFLAG_REMOTE_FRAME != 0;
    frame.fdf = flags & MSGFLAG_FDF != 0;
    frame.brs = flags & MSGFLAG_BRS != 0;
    frame.esi = flags & MSGFLAG_ESI != 0;
    frame.sts = flags & MSGFLAG_ERROR_FRAME != 0;
    frame.dlc = r.u8(21)? & 0x0F;

    let length = if frame.sts {
        ERROR_FRAME_LENGTH
    } else {
        CANFD_DLC_TO_LEN[frame.dlc as usize]
    };
    let available = buf.len().saturating_sub(EXT_PAYLOAD_OFFSET).min(length);
    frame.data[..available].copy_from_slice(r.bytes(EXT_PAYLOAD_OFFSET, available)?);
    if frame.sts {
        frame.dlc = ERROR_FRAME_LENGTH as u8;
    }
    frame.timestamp = Timestamp::from_ticks(r.u64(24)?, timer_freq);

    Ok(ReceivedMessage {
        frame,
        flags,
        valid: flags & !DELIVERABLE_FLAGS == 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rx_frame(flags: u32, id: u32, dlc: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; HYDRA_CMD_EXT_SIZE];
        buf[0] = CMD_EXTENDED;
        buf[4..6].copy_from_slice(&(HYDRA_CMD_EXT_SIZE as u16).to_le_bytes());
        buf[6] = CMD_RX_MESSAGE_FD;
        buf[8..12].copy_from_slice(&flags.to_le_bytes());
        buf[12..16].copy_from_slice(&id.to_le_bytes());
        buf[21] = dlc;
        buf[24..32].copy_from_slice(&80_000_000u64.to_le_bytes());
        buf[32..32 + payload.len()].copy_from_slice(payload);
        buf
    }

    #[test]
    fn test_address_helpers() {
        assert_eq!(set_dst(0xC5, 0x3E), 0xFE);
        assert_eq!(set_dst(0, 0x7F), 0x3F);
        assert_eq!(set_seq(0xA123, 0x1061), 0xA061);
    }

    #[test]
    fn test_map_channel_req() {
        let buf = map_channel_req(1).unwrap();
        assert_eq!(buf.len(), HYDRA_CMD_SIZE);
        assert_eq!(buf[0], CMD_MAP_CHANNEL_REQ);
        assert_eq!(buf[1], ROUTER_HE);
        assert_eq!(buf[2], 0x41);
        assert_eq!(&buf[4..7], b"CAN");
        assert_eq!(buf[20], 1);
        assert!(map_channel_req(HYDRA_MAX_CARD_CHANNELS).is_err());

        let sysdbg = map_sysdbg_req().unwrap();
        assert_eq!(sysdbg[2], 0x61);
        assert_eq!(&sysdbg[4..10], b"SYSDBG");
    }

    #[test]
    fn test_decode_map_channel() {
        let mut buf = vec![0u8; HYDRA_CMD_SIZE];
        buf[0] = CMD_MAP_CHANNEL_RESP;
        buf[2] = 0x40;
        buf[4] = 0x05;
        let mapping = decode_map_channel(&buf).unwrap();
        assert_eq!(mapping.he, 0x05);
        assert_eq!(mapping.source, 0);
    }

    #[test]
    fn test_set_bus_params_fd_req() {
        let params = BusParamsFd {
            nominal: BusParams::new(500_000, 63, 16, 16),
            data: BusParams::new(2_000_000, 15, 4, 4),
            can_fd: true,
        };
        let buf = set_bus_params_fd_req(0x05, &params).unwrap();
        assert_eq!(buf[0], CMD_SET_BUSPARAMS_FD_REQ);
        assert_eq!(buf[1], 0x05);
        assert_eq!(&buf[4..8], &500_000u32.to_le_bytes());
        assert_eq!(&buf[8..12], &[63, 16, 16, 1]);
        assert_eq!(&buf[16..20], &2_000_000u32.to_le_bytes());
        assert_eq!(&buf[20..24], &[15, 4, 4, 1]);
        assert_eq!(buf[24], 1);
    }

    #[test]
    fn test_bus_params_round_trip() {
        let params = BusParams::new(500_000, 13, 2, 1);
        let mut buf = set_bus_params_req(0x05, &params).unwrap();
        buf[0] = CMD_GET_BUSPARAMS_RESP;
        assert_eq!(decode_bus_params(&buf).unwrap(), params);
        assert!(decode_bus_params(&buf[..16]).is_err());
    }

    #[test]
    fn test_tx_message_fd() {
        let frame = CanFrame::with_fd_data(0x1234_5678, &[0xAB; 12], true);
        let buf = tx_message_req(0x05, 9, &frame).unwrap();
        assert_eq!(buf.len(), HYDRA_CMD_EXT_SIZE);
        assert_eq!(buf[0], CMD_EXTENDED);
        assert_eq!(buf[1], 0x05);
        assert_eq!(buf[2], 9);
        assert_eq!(u16::from_le_bytes([buf[4], buf[5]]), 96);
        assert_eq!(buf[6], CMD_TX_CAN_MESSAGE_FD);

        let flags = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        assert_eq!(flags, MSGFLAG_TX | MSGFLAG_EXTENDED_ID | MSGFLAG_FDF | MSGFLAG_BRS);
        let fpga_id = u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]);
        assert_eq!(fpga_id, 0x1234_5678 | FPGA_ID_EXTENDED);
        let fpga_ctrl = u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]);
        assert_eq!(fpga_ctrl, FPGA_CTRL_REQUEST_ACK | 9 | (9 << 8) | FPGA_CTRL_FDF | FPGA_CTRL_BRS);
        assert_eq!(buf[24], 12);
        assert_eq!(buf[25], 9);
        assert_eq!(&buf[32..44], &[0xAB; 12]);
        assert!(buf[44..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_tx_message_without_data_is_short() {
        let frame = CanFrame::remote(0x100, 0);
        let buf = tx_message_req(0x05, 1, &frame).unwrap();
        assert_eq!(buf.len(), HYDRA_CMD_SIZE);
        assert_eq!(u16::from_le_bytes([buf[4], buf[5]]), 32);
        let fpga_id = u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]);
        assert_eq!(fpga_id, 0x100 | FPGA_ID_REMOTE);
    }

    #[test]
    fn test_frame_length() {
        let ext = rx_frame(0, 0x123, 8, &[1; 8]);
        assert_eq!(frame_length(&ext).unwrap(), Some(96));
        assert_eq!(frame_length(&ext[..5]).unwrap(), None);
        assert_eq!(frame_length(&[CMD_CHIP_STATE_EVENT]).unwrap(), Some(32));
        assert_eq!(frame_length(&[]).unwrap(), None);

        let mut bad = ext.clone();
        bad[4] = 200;
        assert!(frame_length(&bad).is_err());
    }

    #[test]
    fn test_decode_rx_message() {
        let buf = rx_frame(MSGFLAG_FDF | MSGFLAG_BRS, 0x321, 10, &[7u8; 16]);
        let msg = decode_rx_message(&buf, 80).unwrap();
        assert!(msg.valid);
        assert_eq!(msg.frame.id, 0x321);
        assert!(msg.frame.fdf && msg.frame.brs && !msg.frame.xtd);
        assert_eq!(msg.frame.data(), &[7u8; 16]);
        assert_eq!(msg.frame.timestamp.sec, 1);
    }

    #[test]
    fn test_decode_rx_error_frame() {
        let buf = rx_frame(MSGFLAG_ERROR_FRAME, 0, 0, &[1, 2, 3, 4]);
        let msg = decode_rx_message(&buf, 80).unwrap();
        assert!(msg.valid);
        assert!(msg.frame.sts);
        assert_eq!(msg.frame.dlc, 4);
        assert_eq!(msg.frame.data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_rx_overrun_not_valid() {
        let buf = rx_frame(MSGFLAG_OVERRUN, 0x10, 0, &[]);
        assert!(!decode_rx_message(&buf, 80).unwrap().valid);
    }

    #[test]
    fn test_capability_present_per_channel() {
        let resp = CapabilityResponse {
            sub_cmd: CAP_SUB_CMD_SILENT_MODE,
            status: CAP_STATUS_OK,
            mask: 0b11,
            value: 0b10,
        };
        assert!(!capability_present(&resp, 0));
        assert!(capability_present(&resp, 1));
        assert!(!capability_present(&resp, 40));
    }

    #[test]
    fn test_decode_error_event() {
        let mut buf = vec![0u8; HYDRA_CMD_SIZE];
        buf[0] = CMD_ERROR_EVENT;
        buf[11] = FIRMWARE_ERR_PARAMETER;
        buf[12] = 0x34;
        buf[13] = 0x12;
        assert_eq!(error_event_code(&buf), Some(FIRMWARE_ERR_PARAMETER));
        let event = decode_error_event(&buf).unwrap();
        assert_eq!(event.code, FIRMWARE_ERR_PARAMETER);
        assert_eq!(event.add_info1, 0x1234);
    }
}
