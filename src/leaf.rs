//! Leaf command codec
//!
//! The Leaf protocol uses flat commands with a 4-byte header
//! `{length, opcode, transaction id, channel}` followed by an opcode-specific
//! payload of at most 32 bytes in total. Builders return the encoded command,
//! decoders check the declared length and the opcode before reading any field.

use crate::constants::*;
use crate::error::{KvaserError, Result};
use crate::frame::{CanFrame, ReceivedMessage, Timestamp};
use crate::structures::*;
use crate::wire::{ByteReader, ByteWriter};

/// Message flags a logged frame may carry and still be delivered
const DELIVERABLE_FLAGS: u32 = MSGFLAG_REMOTE_FRAME | MSGFLAG_ERROR_FRAME;

// ============================================================================
// Request Builders
// ============================================================================

/// Start a command: zero-filled buffer with `{len, opcode, opcode, byte3}`
fn command(len: u8, opcode: u8, byte3: u8) -> Result<ByteWriter> {
    let mut w = ByteWriter::new(len as usize);
    w.put_u8(0, len)?;
    w.put_u8(1, opcode)?;
    w.put_u8(2, opcode)?;
    w.put_u8(3, byte3)?;
    Ok(w)
}

fn simple(len: u8, opcode: u8, byte3: u8) -> Result<Vec<u8>> {
    command(len, opcode, byte3).map(ByteWriter::into_vec)
}

pub fn set_bus_params_req(channel: u8, params: &BusParams) -> Result<Vec<u8>> {
    let mut w = command(LEN_SET_BUSPARAMS_REQ, CMD_SET_BUSPARAMS_REQ, channel)?;
    w.put_u32(4, params.bit_rate)?;
    w.put_u8(8, params.tseg1)?;
    w.put_u8(9, params.tseg2)?;
    w.put_u8(10, params.sjw)?;
    w.put_u8(11, params.no_samp)?;
    Ok(w.into_vec())
}

pub fn get_bus_params_req(channel: u8) -> Result<Vec<u8>> {
    simple(LEN_GET_BUSPARAMS_REQ, CMD_GET_BUSPARAMS_REQ, channel)
}

pub fn set_driver_mode_req(channel: u8, mode: DriverMode) -> Result<Vec<u8>> {
    let mut w = command(LEN_SET_DRIVERMODE_REQ, CMD_SET_DRIVERMODE_REQ, channel)?;
    w.put_u8(4, mode as u8)?;
    Ok(w.into_vec())
}

pub fn get_driver_mode_req(channel: u8) -> Result<Vec<u8>> {
    simple(LEN_GET_DRIVERMODE_REQ, CMD_GET_DRIVERMODE_REQ, channel)
}

pub fn get_chip_state_req(channel: u8) -> Result<Vec<u8>> {
    simple(LEN_GET_CHIP_STATE_REQ, CMD_GET_CHIP_STATE_REQ, channel)
}

pub fn start_chip_req(channel: u8) -> Result<Vec<u8>> {
    simple(LEN_START_CHIP_REQ, CMD_START_CHIP_REQ, channel)
}

pub fn stop_chip_req(channel: u8) -> Result<Vec<u8>> {
    simple(LEN_STOP_CHIP_REQ, CMD_STOP_CHIP_REQ, channel)
}

pub fn reset_chip_req(channel: u8) -> Result<Vec<u8>> {
    simple(LEN_RESET_CHIP_REQ, CMD_RESET_CHIP_REQ, channel)
}

pub fn reset_card_req() -> Result<Vec<u8>> {
    simple(LEN_RESET_CARD_REQ, CMD_RESET_CARD_REQ, 0)
}

/// Transmit request for a classic CAN message
///
/// Extended identifiers are split over five bytes, standard ones over two.
/// Channel and transaction id swap places compared to the other commands.
pub fn tx_message_req(channel: u8, trans_id: u8, frame: &CanFrame) -> Result<Vec<u8>> {
    let opcode = if frame.xtd {
        CMD_TX_EXT_MESSAGE
    } else {
        CMD_TX_STD_MESSAGE
    };
    let mut w = ByteWriter::new(LEN_TX_MESSAGE as usize);
    w.put_u8(0, LEN_TX_MESSAGE)?;
    w.put_u8(1, opcode)?;
    w.put_u8(2, channel)?;
    w.put_u8(3, trans_id)?;

    let id = frame.id;
    if frame.xtd {
        w.put_u8(4, ((id >> 24) & 0x1F) as u8)?;
        w.put_u8(5, ((id >> 18) & 0x3F) as u8)?;
        w.put_u8(6, ((id >> 14) & 0x0F) as u8)?;
        w.put_u8(7, ((id >> 6) & 0xFF) as u8)?;
        w.put_u8(8, (id & 0x3F) as u8)?;
    } else {
        w.put_u8(4, ((id >> 6) & 0x1F) as u8)?;
        w.put_u8(5, (id & 0x3F) as u8)?;
    }
    w.put_u8(9, frame.dlc.min(CAN_MAX_DLEN as u8))?;
    w.put_bytes(10, &frame.data[..CAN_MAX_DLEN])?;

    let mut flags = MSGFLAG_TX as u8;
    if frame.rtr {
        flags |= MSGFLAG_REMOTE_FRAME as u8;
    }
    w.put_u8(19, flags)?;
    Ok(w.into_vec())
}

pub fn flush_queue_req(channel: u8, flags: u8) -> Result<Vec<u8>> {
    let mut w = command(LEN_FLUSH_QUEUE, CMD_FLUSH_QUEUE, channel)?;
    w.put_u8(4, flags)?;
    Ok(w.into_vec())
}

pub fn reset_error_counter_req(channel: u8) -> Result<Vec<u8>> {
    simple(LEN_RESET_ERROR_COUNTER, CMD_RESET_ERROR_COUNTER, channel)
}

pub fn reset_statistics_req(channel: u8) -> Result<Vec<u8>> {
    simple(LEN_RESET_STATISTICS, CMD_RESET_STATISTICS, channel)
}

pub fn read_clock_req(flags: u8) -> Result<Vec<u8>> {
    simple(LEN_READ_CLOCK_REQ, CMD_READ_CLOCK_REQ, flags)
}

pub fn get_bus_load_req(channel: u8) -> Result<Vec<u8>> {
    simple(LEN_GET_BUSLOAD_REQ, CMD_GET_BUSLOAD_REQ, channel)
}

pub fn get_card_info_req(data_level: u8) -> Result<Vec<u8>> {
    simple(LEN_GET_CARD_INFO_REQ, CMD_GET_CARD_INFO_REQ, data_level)
}

pub fn get_software_info_req() -> Result<Vec<u8>> {
    simple(LEN_GET_SOFTWARE_INFO_REQ, CMD_GET_SOFTWARE_INFO_REQ, 0)
}

pub fn get_interface_info_req(channel: u8) -> Result<Vec<u8>> {
    simple(LEN_GET_INTERFACE_INFO_REQ, CMD_GET_INTERFACE_INFO_REQ, channel)
}

/// Capability query; transaction id and channel bytes stay zero
pub fn get_capabilities_req(sub_cmd: u16, sub_data: u16) -> Result<Vec<u8>> {
    let mut w = ByteWriter::new(LEN_GET_CAPABILITIES_REQ as usize);
    w.put_u8(0, LEN_GET_CAPABILITIES_REQ)?;
    w.put_u8(1, CMD_GET_CAPABILITIES_REQ)?;
    w.put_u16(4, sub_cmd)?;
    w.put_u16(6, sub_data)?;
    Ok(w.into_vec())
}

pub fn get_transceiver_info_req(channel: u8) -> Result<Vec<u8>> {
    simple(LEN_GET_TRANSCEIVER_INFO_REQ, CMD_GET_TRANSCEIVER_INFO_REQ, channel)
}

// ============================================================================
// Response Decoders
// ============================================================================

/// Check the declared length and the opcode of a received command
fn expect(buf: &[u8], len: u8, opcode: u8) -> Result<ByteReader<'_>> {
    let r = ByteReader::new(buf);
    let declared = r.u8(0)?;
    let actual = r.u8(1)?;
    if declared != len || actual != opcode || buf.len() < len as usize {
        return Err(KvaserError::InvalidResponse {
            opcode,
            expected: len as usize,
            actual: declared as usize,
        });
    }
    Ok(r)
}

/// Length of the command starting at `buf[0]`
pub fn frame_length(buf: &[u8]) -> usize {
    buf.first().copied().unwrap_or(0) as usize
}

/// Opcode of the command starting at `buf[0]`
pub fn opcode(buf: &[u8]) -> Option<u8> {
    buf.get(1).copied()
}

pub fn decode_bus_params(buf: &[u8]) -> Result<BusParams> {
    let r = expect(buf, LEN_GET_BUSPARAMS_RESP, CMD_GET_BUSPARAMS_RESP)?;
    Ok(BusParams {
        bit_rate: r.u32(4)?,
        tseg1: r.u8(8)?,
        tseg2: r.u8(9)?,
        sjw: r.u8(10)?,
        no_samp: r.u8(11)?,
    })
}

pub fn decode_driver_mode(buf: &[u8]) -> Result<u8> {
    let r = expect(buf, LEN_GET_DRIVERMODE_RESP, CMD_GET_DRIVERMODE_RESP)?;
    r.u8(4)
}

pub fn decode_read_clock(buf: &[u8]) -> Result<u64> {
    let r = expect(buf, LEN_READ_CLOCK_RESP, CMD_READ_CLOCK_RESP)?;
    r.ticks48(4)
}

pub fn decode_bus_load(buf: &[u8]) -> Result<BusLoad> {
    let r = expect(buf, LEN_GET_BUSLOAD_RESP, CMD_GET_BUSLOAD_RESP)?;
    Ok(BusLoad {
        sample_interval: r.u16(10)?,
        active_samples: r.u16(12)?,
        delta_t: r.u16(14)?,
    })
}

pub fn decode_card_info(buf: &[u8]) -> Result<CardInfo> {
    let r = expect(buf, LEN_GET_CARD_INFO_RESP, CMD_GET_CARD_INFO_RESP)?;
    let mut ean = [0u8; 8];
    ean.copy_from_slice(r.bytes(20, 8)?);
    Ok(CardInfo {
        channel_count: r.u8(3)?,
        serial_number: r.u32(4)?,
        clock_resolution: r.u32(12)?,
        mfg_date: r.u32(16)?,
        ean,
        hw_revision: r.u8(28)?,
        usb_hs_mode: r.u8(29)?,
        hw_type: r.u8(30)?,
        timestamp_ref: r.u8(31)?,
    })
}

/// Software information; Leaf firmware does not report a maximum bit-rate
pub fn decode_software_info(buf: &[u8]) -> Result<SoftwareInfo> {
    let r = expect(buf, LEN_GET_SOFTWARE_INFO_RESP, CMD_GET_SOFTWARE_INFO_RESP)?;
    Ok(SoftwareInfo {
        sw_options: r.u32(4)?,
        firmware_version: r.u32(8)?,
        max_outstanding_tx: r.u16(12)?,
        max_bitrate: 1_000_000,
        ..Default::default()
    })
}

pub fn decode_interface_info(buf: &[u8]) -> Result<InterfaceInfo> {
    let r = expect(buf, LEN_GET_INTERFACE_INFO_RESP, CMD_GET_INTERFACE_INFO_RESP)?;
    Ok(InterfaceInfo {
        channel_capabilities: r.u32(4)?,
        can_chip_type: r.u8(8)?,
        can_chip_sub_type: r.u8(9)?,
    })
}

pub fn decode_capabilities(buf: &[u8]) -> Result<CapabilityResponse> {
    let r = expect(buf, LEN_GET_CAPABILITIES_RESP, CMD_GET_CAPABILITIES_RESP)?;
    Ok(CapabilityResponse {
        sub_cmd: r.u16(4)?,
        status: r.u16(6)?,
        mask: r.u32(8)?,
        value: r.u32(12)?,
    })
}

/// Whether a capability answer reports the feature as present
pub fn capability_present(resp: &CapabilityResponse) -> bool {
    resp.status == CAP_STATUS_OK && resp.value & resp.mask != 0
}

pub fn decode_transceiver_info(buf: &[u8]) -> Result<TransceiverInfo> {
    let r = expect(buf, LEN_GET_TRANSCEIVER_INFO_RESP, CMD_GET_TRANSCEIVER_INFO_RESP)?;
    Ok(TransceiverInfo {
        capabilities: r.u32(4)?,
        status: r.u8(8)?,
        kind: r.u8(9)?,
    })
}

pub fn decode_tx_acknowledge(buf: &[u8]) -> Result<TxAcknowledge> {
    let r = expect(buf, LEN_TX_ACKNOWLEDGE, CMD_TX_ACKNOWLEDGE)?;
    Ok(TxAcknowledge {
        channel: r.u8(2)?,
        trans_id: r.u8(3)?,
        time: r.ticks48(4)?,
        flags: r.u8(10)? as u32,
    })
}

// ============================================================================
// Events and Messages
// ============================================================================

pub fn decode_chip_state_event(buf: &[u8]) -> Result<ChipStateEvent> {
    let r = expect(buf, LEN_CHIP_STATE_EVENT, CMD_CHIP_STATE_EVENT)?;
    Ok(ChipStateEvent {
        time: r.ticks48(4)?,
        tx_errors: r.u8(10)?,
        rx_errors: r.u8(11)?,
        bus_status: r.u8(12)?,
    })
}

pub fn decode_error_event(buf: &[u8]) -> Result<ErrorEvent> {
    let r = expect(buf, LEN_ERROR_EVENT, CMD_ERROR_EVENT)?;
    Ok(ErrorEvent {
        time: r.ticks48(4)?,
        code: r.u8(3)?,
        add_info1: r.u16(12)?,
        add_info2: r.u16(14)?,
    })
}

pub fn decode_can_error_event(buf: &[u8]) -> Result<CanErrorEvent> {
    let r = expect(buf, LEN_CAN_ERROR_EVENT, CMD_CAN_ERROR_EVENT)?;
    Ok(CanErrorEvent {
        time: r.ticks48(4)?,
        flags: r.u8(3)?,
        channel: r.u8(10)?,
        tx_errors: r.u8(12)?,
        rx_errors: r.u8(13)?,
        bus_status: r.u8(14)?,
        error_factor: r.u8(15)?,
    })
}

/// Decode a logged CAN message
///
/// Bit 31 of the identifier word selects the extended format. The message is
/// only deliverable when its flags are limited to remote and error frame.
pub fn decode_log_message(buf: &[u8], timer_freq: u32) -> Result<ReceivedMessage> {
    let r = expect(buf, LEN_LOG_MESSAGE, CMD_LOG_MESSAGE)?;
    let flags = r.u8(3)? as u32;
    let ident = r.u32(12)?;

    let mut frame = CanFrame::new(ident & CAN_MAX_XTD_ID);
    frame.xtd = ident & LOG_MESSAGE_EXT_FLAG != 0;
    frame.rtr = flags & MSGFLAG_REMOTE_FRAME != 0;
    frame.sts = flags & MSGFLAG_ERROR_FRAME != 0;
    frame.dlc = r.u8(10)?.min(CAN_MAX_DLEN as u8);
    frame.data[..CAN_MAX_DLEN].copy_from_slice(r.bytes(16, CAN_MAX_DLEN)?);
    frame.timestamp = Timestamp::from_ticks(r.ticks48(4)?, timer_freq);

    Ok(ReceivedMessage {
        frame,
        flags,
        valid: flags & !DELIVERABLE_FLAGS == 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_bus_params_req() {
        let params = BusParams::new(500_000, 13, 2, 1);
        let buf = set_bus_params_req(0, &params).unwrap();
        assert_eq!(
            buf,
            vec![12, CMD_SET_BUSPARAMS_REQ, CMD_SET_BUSPARAMS_REQ, 0, 0x20, 0xA1, 0x07, 0x00, 13, 2, 1, 1]
        );
    }

    #[test]
    fn test_bus_params_round_trip() {
        let params = BusParams::new(250_000, 5, 2, 1);
        let mut buf = set_bus_params_req(0, &params).unwrap();
        buf[1] = CMD_GET_BUSPARAMS_RESP;
        assert_eq!(decode_bus_params(&buf).unwrap(), params);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let mut buf = set_bus_params_req(0, &BusParams::new(250_000, 5, 2, 1)).unwrap();
        buf[1] = CMD_GET_BUSPARAMS_RESP;
        buf[0] = 8;
        assert!(matches!(decode_bus_params(&buf), Err(KvaserError::InvalidResponse { .. })));
        assert!(decode_bus_params(&[]).is_err());
    }

    #[test]
    fn test_driver_mode_req() {
        let buf = set_driver_mode_req(0, DriverMode::Normal).unwrap();
        assert_eq!(buf, vec![8, CMD_SET_DRIVERMODE_REQ, CMD_SET_DRIVERMODE_REQ, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_tx_message_standard() {
        let frame = CanFrame::with_data(0x123, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let buf = tx_message_req(0, 7, &frame).unwrap();
        assert_eq!(buf.len(), 20);
        assert_eq!(buf[1], CMD_TX_STD_MESSAGE);
        assert_eq!(buf[3], 7);
        assert_eq!(buf[4], 0x04);
        assert_eq!(buf[5], 0x23);
        assert_eq!(buf[9], 8);
        assert_eq!(&buf[10..18], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(buf[19], MSGFLAG_TX as u8);
    }

    #[test]
    fn test_tx_message_extended_remote() {
        let mut frame = CanFrame::remote(0x1ABC_DEF0, 4);
        frame.xtd = true;
        let buf = tx_message_req(0, 1, &frame).unwrap();
        let id = 0x1ABC_DEF0u32;
        assert_eq!(buf[1], CMD_TX_EXT_MESSAGE);
        assert_eq!(buf[4], ((id >> 24) & 0x1F) as u8);
        assert_eq!(buf[5], ((id >> 18) & 0x3F) as u8);
        assert_eq!(buf[6], ((id >> 14) & 0x0F) as u8);
        assert_eq!(buf[7], ((id >> 6) & 0xFF) as u8);
        assert_eq!(buf[8], (id & 0x3F) as u8);
        assert_eq!(buf[9], 4);
        assert_eq!(buf[19], (MSGFLAG_TX | MSGFLAG_REMOTE_FRAME) as u8);
    }

    #[test]
    fn test_capabilities_req() {
        let buf = get_capabilities_req(CAP_SUB_CMD_ERRFRAME, 0).unwrap();
        assert_eq!(buf, vec![8, CMD_GET_CAPABILITIES_REQ, 0, 0, 3, 0, 0, 0]);
    }

    #[test]
    fn test_decode_log_message() {
        let mut buf = vec![0u8; 24];
        buf[0] = LEN_LOG_MESSAGE;
        buf[1] = CMD_LOG_MESSAGE;
        buf[3] = MSGFLAG_REMOTE_FRAME as u8;
        buf[4..10].copy_from_slice(&[0x00, 0x6C, 0xDC, 0x02, 0x00, 0x00]);
        buf[10] = 3;
        buf[12..16].copy_from_slice(&(0x1234_5678u32 | LOG_MESSAGE_EXT_FLAG).to_le_bytes());
        buf[16..19].copy_from_slice(&[0xAA, 0xBB, 0xCC]);

        let msg = decode_log_message(&buf, 24).unwrap();
        assert!(msg.valid);
        assert!(msg.frame.xtd);
        assert!(msg.frame.rtr);
        assert_eq!(msg.frame.id, 0x1234_5678);
        assert_eq!(msg.frame.data(), &[0xAA, 0xBB, 0xCC]);
        assert_eq!(msg.frame.timestamp.sec, 2);
    }

    #[test]
    fn test_decode_log_message_with_bus_flags_is_not_valid() {
        let mut buf = vec![0u8; 24];
        buf[0] = LEN_LOG_MESSAGE;
        buf[1] = CMD_LOG_MESSAGE;
        buf[3] = MSGFLAG_OVERRUN as u8;
        let msg = decode_log_message(&buf, 24).unwrap();
        assert!(!msg.valid);
    }

    #[test]
    fn test_decode_chip_state_event() {
        let mut buf = vec![0u8; 16];
        buf[0] = LEN_CHIP_STATE_EVENT;
        buf[1] = CMD_CHIP_STATE_EVENT;
        buf[10] = 96;
        buf[11] = 128;
        buf[12] = BUSSTAT_ERROR_PASSIVE;
        let event = decode_chip_state_event(&buf).unwrap();
        assert_eq!(event.tx_errors, 96);
        assert_eq!(event.rx_errors, 128);
        assert!(event.is_error_passive());
    }

    #[test]
    fn test_decode_capabilities_present() {
        let mut buf = vec![0u8; 16];
        buf[0] = LEN_GET_CAPABILITIES_RESP;
        buf[1] = CMD_GET_CAPABILITIES_RESP;
        buf[4] = CAP_SUB_CMD_SILENT_MODE as u8;
        buf[8] = 0x01;
        buf[12] = 0x01;
        let resp = decode_capabilities(&buf).unwrap();
        assert_eq!(resp.sub_cmd, CAP_SUB_CMD_SILENT_MODE);
        assert!(capability_present(&resp));
    }
}
