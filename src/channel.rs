//! CAN channel controller
//!
//! `ChannelController` drives one CAN channel of a Kvaser device through its
//! lifecycle: configure, initialize, bus on/off, transmit and receive, teardown.
//! Requests are encoded with the Leaf or Hydra codec depending on the product
//! family and written through a `UsbTransport`; responses come back through
//! the response pipe filled by the reception thread.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::constants::*;
use crate::demux::{self, ReceptionContext};
use crate::device::KvaserProduct;
use crate::error::{KvaserError, Result};
use crate::frame::{nanoseconds_from_ticks, CanFrame};
use crate::hydra;
use crate::leaf;
use crate::structures::*;
use crate::transport::UsbTransport;

/// Runtime settings of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Receive queue capacity in frames
    pub queue_capacity: usize,
    /// Response timeout of Leaf commands
    pub command_timeout: Duration,
    /// Response timeout of Hydra commands
    pub response_timeout: Duration,
    /// Acknowledgment wait used by `transmit`; zero sends without waiting
    pub tx_ack_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            queue_capacity: RECEIVE_QUEUE_SIZE,
            command_timeout: USB_COMMAND_TIMEOUT,
            response_timeout: HYDRA_RESPONSE_TIMEOUT,
            tx_ack_timeout: Duration::ZERO,
        }
    }
}

/// Transmit and receive counters of a channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStatistics {
    pub tx_messages: u64,
    pub tx_errors: u64,
    pub rx_messages: u64,
    pub rx_status_frames: u64,
    /// Events received
    pub rx_errors: u64,
    /// Highest receive queue fill level
    pub queue_high_water: usize,
    /// Frames lost to a full receive queue
    pub queue_dropped: u64,
}

/// Operation mode bits the product can offer before the firmware is asked
pub fn capability_mask(product: &KvaserProduct) -> OpMode {
    let mut mask = CANMODE_NXTD | CANMODE_NRTR;
    // Hydra firmware always reports status frames
    if product.error_frame || product.family == DeviceFamily::Hydra {
        mask |= CANMODE_ERR;
    }
    if product.silent_mode {
        mask |= CANMODE_MON;
    }
    if product.family == DeviceFamily::Hydra && product.can_fd {
        mask |= CANMODE_FDOE | CANMODE_BRSE;
    }
    OpMode(mask)
}

/// Transmit limit from the firmware report, bounded by the family maximum
pub fn select_max_outstanding(family: DeviceFamily, reported: u16) -> u16 {
    let limit = family.max_outstanding_tx().min(255);
    if reported > 0 && reported < limit {
        reported
    } else {
        limit
    }
}

/// CAN clock and timer frequency in MHz from the reported software options
pub fn select_clocks(product: &KvaserProduct, info: &SoftwareInfo) -> (u32, u32) {
    let bits = info.cpu_frequency_bits();
    match product.family {
        DeviceFamily::Leaf => {
            let clock = match bits {
                SWOPTION_16_MHZ_CLK => 16,
                SWOPTION_32_MHZ_CLK => 32,
                SWOPTION_24_MHZ_CLK => 24,
                _ => product.can_clock,
            };
            (clock, clock)
        }
        DeviceFamily::Hydra => {
            let can_clock = match info.can_clock_bits() {
                SWOPTION_80_MHZ_CAN_CLK => 80,
                SWOPTION_24_MHZ_CAN_CLK => 24,
                _ => product.can_clock,
            };
            let timer = match bits {
                SWOPTION_80_MHZ_CLK => 80,
                SWOPTION_24_MHZ_CLK => 24,
                _ => product.timer_freq,
            };
            (can_clock, timer)
        }
    }
}

/// Reject frames the operation mode does not allow to be sent
pub fn check_transmit(mode: OpMode, frame: &CanFrame) -> Result<()> {
    if frame.xtd && mode.suppress_extended() {
        return Err(KvaserError::IllegalParameter("extended frames suppressed"));
    }
    if frame.rtr && mode.suppress_remote() {
        return Err(KvaserError::IllegalParameter("remote frames suppressed"));
    }
    if frame.fdf && !mode.is_fd() {
        return Err(KvaserError::IllegalParameter("CAN FD not enabled"));
    }
    if frame.brs && !mode.is_brs() {
        return Err(KvaserError::IllegalParameter("bit-rate switching not enabled"));
    }
    if frame.brs && !frame.fdf {
        return Err(KvaserError::IllegalParameter("bit-rate switch without FD format"));
    }
    if frame.sts {
        return Err(KvaserError::IllegalParameter("error frames cannot be sent"));
    }
    Ok(())
}

/// Receive side of a channel, shareable with other threads
///
/// A read blocked here is woken by `ChannelController::teardown` and then
/// fails with `NotInitialized`, as does every read until the channel is
/// initialized again.
#[derive(Debug, Clone)]
pub struct ChannelReader {
    ctx: Arc<ReceptionContext>,
}

impl ChannelReader {
    /// Take the oldest received frame; see `ChannelController::read_message`
    pub fn read_message(&self, timeout: Option<Duration>) -> Result<CanFrame> {
        self.ctx.read_message(timeout)
    }

    pub fn event_data(&self) -> EventData {
        self.ctx.event_data()
    }

    pub fn queue_overflow(&self) -> bool {
        self.ctx.queue.is_overflow()
    }
}

/// One CAN channel of an opened Kvaser device
pub struct ChannelController<T: UsbTransport> {
    transport: T,
    product: &'static KvaserProduct,
    channel: u8,
    config: ChannelConfig,
    ctx: Arc<ReceptionContext>,
    reception: Option<JoinHandle<()>>,
    op_capability: OpMode,
    channel2he: u8,
    he2channel: u8,
    sysdbg_he: u8,
    can_clock: u32,
    card_info: CardInfo,
    software_info: SoftwareInfo,
    transceiver_info: TransceiverInfo,
    capabilities: Capabilities,
    tx_messages: u64,
    tx_errors: u64,
}

impl<T: UsbTransport> ChannelController<T> {
    /// Set up channel state for `product`; nothing is sent to the device yet
    pub fn configure(
        transport: T,
        product: &'static KvaserProduct,
        channel: u8,
        config: ChannelConfig,
    ) -> Result<Self> {
        if channel >= product.channels {
            return Err(KvaserError::IllegalParameter("channel number"));
        }
        let ctx = Arc::new(ReceptionContext::new(
            config.queue_capacity,
            product.family.max_outstanding_tx(),
        )?);
        ctx.set_timer_freq(product.timer_freq);

        log::debug!("{} channel {}: configured", product.name, channel);
        Ok(Self {
            transport,
            product,
            channel,
            config,
            ctx,
            reception: None,
            op_capability: capability_mask(product),
            channel2he: ILLEGAL_HE,
            he2channel: ILLEGAL_HE,
            sysdbg_he: ILLEGAL_HE,
            can_clock: product.can_clock,
            card_info: CardInfo::default(),
            software_info: SoftwareInfo::default(),
            transceiver_info: TransceiverInfo::default(),
            capabilities: Capabilities {
                silent_mode: product.silent_mode,
                error_frame: product.error_frame,
                ..Default::default()
            },
            tx_messages: 0,
            tx_errors: 0,
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start reception, query the device and apply `op_mode`
    ///
    /// The chip stays off the bus; call `start_chip` afterwards.
    pub fn initialize(&mut self, op_mode: OpMode) -> Result<()> {
        if self.reception.is_some() {
            return Err(KvaserError::Fatal("channel already initialized"));
        }
        log::info!("initializing {} channel {}", self.product.name, self.channel);

        self.ctx.open();
        let (sender, receiver) = mpsc::channel();
        let demux = demux::for_family(self.product.family, Arc::clone(&self.ctx));
        self.reception = Some(demux::spawn_reception(receiver, demux)?);
        if let Err(e) = self.transport.start_reception(sender) {
            log::error!("reception could not be started: {}", e);
            self.stop_reception();
            return Err(e);
        }

        if let Err(e) = self.bring_up(op_mode) {
            log::error!("initialization failed: {}", e);
            self.stop_reception();
            return Err(e);
        }
        Ok(())
    }

    fn bring_up(&mut self, op_mode: OpMode) -> Result<()> {
        let family = self.product.family;
        if family == DeviceFamily::Hydra {
            self.map_channel()?;
        }

        log::debug!("stop chip (bus off)");
        self.stop_chip(family == DeviceFamily::Hydra)?;
        log::debug!("set driver mode NORMAL");
        self.set_driver_mode(DriverMode::Normal)?;
        self.request_chip_state()?;

        self.card_info = self.get_card_info()?;
        self.software_info = self.get_software_info()?;
        self.transceiver_info = self.get_transceiver_info()?;
        if self.software_info.answers_capabilities() {
            self.capabilities = self.get_capabilities()?;
        }
        log::debug!(
            "serial {}, firmware {}, transceiver {}",
            self.card_info.serial_number,
            self.software_info.version_string(),
            self.transceiver_info.name()
        );

        let (can_clock, timer_freq) = select_clocks(self.product, &self.software_info);
        self.can_clock = can_clock;
        self.ctx.set_timer_freq(timer_freq);
        log::info!("CAN clock {} MHz, timer {} MHz", can_clock, timer_freq);

        let max_outstanding = select_max_outstanding(family, self.software_info.max_outstanding_tx);
        self.ctx.tracker.set_max_outstanding(max_outstanding);
        log::info!("max outstanding tx: {}", max_outstanding);

        let mut capability = self.op_capability.bits() & !(CANMODE_FDOE | CANMODE_BRSE | CANMODE_NISO);
        if family == DeviceFamily::Hydra && self.software_info.is_canfd_capable() {
            capability |= CANMODE_FDOE | CANMODE_BRSE;
        }
        self.op_capability = OpMode(capability);

        let unsupported = op_mode.unsupported(self.op_capability);
        if unsupported != 0 {
            log::error!("unsupported operation mode bits 0x{:02X}", unsupported);
            return Err(KvaserError::IllegalParameter("unsupported operation mode"));
        }
        self.ctx.set_op_mode(op_mode);
        Ok(())
    }

    /// Hydra: look up the HE addresses of the channel and of SYSDBG
    fn map_channel(&mut self) -> Result<()> {
        let timeout = self.response_timeout();
        let request = hydra::map_channel_req(self.channel)?;
        let resp = self.transact(&request, CMD_MAP_CHANNEL_RESP, timeout)?;
        let mapping = hydra::decode_map_channel(&resp)?;
        self.channel2he = mapping.he;
        self.he2channel = mapping.source;

        let resp = self.transact(&hydra::map_sysdbg_req()?, CMD_MAP_CHANNEL_RESP, timeout)?;
        self.sysdbg_he = hydra::decode_map_channel(&resp)?.he;
        log::debug!(
            "channel {} mapped to HE 0x{:02X}, SYSDBG HE 0x{:02X}",
            self.channel,
            self.channel2he,
            self.sysdbg_he
        );
        Ok(())
    }

    /// Take the channel off the bus and stop reception
    ///
    /// Blocked readers are woken first and later reads fail with
    /// `NotInitialized`. Also run when the controller is dropped while
    /// initialized.
    pub fn teardown(&mut self) -> Result<()> {
        self.ensure_running()?;
        log::info!("teardown {} channel {}", self.product.name, self.channel);

        self.ctx.close();
        if let Err(e) = self.stop_chip(false) {
            log::warn!("chip could not be stopped: {}", e);
        }
        if let Err(e) = self.set_driver_mode(DriverMode::Normal) {
            log::warn!("driver mode could not be set: {}", e);
        }
        self.stop_reception();

        let stats = self.statistics();
        log::info!(
            "tx {} ({} failed), rx {}, error frames {}, events {}, queue high water {}, dropped {}",
            stats.tx_messages,
            stats.tx_errors,
            stats.rx_messages,
            stats.rx_status_frames,
            stats.rx_errors,
            stats.queue_high_water,
            stats.queue_dropped
        );
        Ok(())
    }

    fn stop_reception(&mut self) {
        self.ctx.close();
        if let Err(e) = self.transport.abort_reception() {
            log::warn!("reception could not be aborted: {}", e);
        }
        if let Some(handle) = self.reception.take() {
            if handle.join().is_err() {
                log::error!("reception thread panicked");
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.reception.is_some()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.reception.is_none() {
            return Err(KvaserError::NotInitialized);
        }
        Ok(())
    }

    // ========================================================================
    // Request / Response
    // ========================================================================

    fn response_timeout(&self) -> Duration {
        match self.product.family {
            DeviceFamily::Leaf => self.config.command_timeout,
            DeviceFamily::Hydra => self.config.response_timeout,
        }
    }

    fn send(&mut self, request: &[u8]) -> Result<()> {
        self.ensure_running()?;
        self.transport.send_request(request)
    }

    /// Wait for the response carrying `opcode`, skipping unrelated frames
    ///
    /// On Hydra an error event ends the wait with the mapped firmware error.
    fn await_response(&self, opcode: u8, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let frame = self.ctx.pipe.read(remaining, opcode)?;
            let received = match self.product.family {
                DeviceFamily::Leaf => leaf::opcode(&frame),
                DeviceFamily::Hydra => {
                    if let Some(code) = hydra::error_event_code(&frame) {
                        log::warn!("error event while waiting for {}: {}", opcode, firmware_error_name(code));
                        return Err(KvaserError::from_firmware(code));
                    }
                    hydra::opcode(&frame)
                }
            };
            if received == Some(opcode) {
                return Ok(frame);
            }
            log::trace!("skipping response {:?} while waiting for {}", received, opcode);
        }
    }

    fn transact(&mut self, request: &[u8], opcode: u8, timeout: Duration) -> Result<Vec<u8>> {
        self.send(request)?;
        self.await_response(opcode, timeout)
    }

    // ========================================================================
    // Bus Parameters and Modes
    // ========================================================================

    /// Set the bit timing
    ///
    /// Hydra devices confirm the request and the parameters are read back;
    /// a mismatch is reported as `IllegalParameter`.
    pub fn set_bus_params(&mut self, params: &BusParams) -> Result<()> {
        if !params.is_valid() {
            return Err(KvaserError::IllegalParameter("bus parameters"));
        }
        log::debug!("set bus params: {}", params);
        match self.product.family {
            DeviceFamily::Leaf => {
                let request = leaf::set_bus_params_req(self.channel, params)?;
                self.send(&request)
            }
            DeviceFamily::Hydra => {
                if params.no_samp != 1 {
                    return Err(KvaserError::IllegalParameter("only one sampling point supported"));
                }
                let request = hydra::set_bus_params_req(self.channel2he, params)?;
                let timeout = self.response_timeout();
                self.transact(&request, CMD_SET_BUSPARAMS_RESP, timeout)?;

                let actual = self.get_bus_params()?;
                if actual != *params {
                    log::warn!("bus params read back as {}", actual);
                    return Err(KvaserError::IllegalParameter("bus parameters not accepted"));
                }
                Ok(())
            }
        }
    }

    /// Set nominal and data phase bit timing (Hydra only)
    pub fn set_bus_params_fd(&mut self, params: &BusParamsFd) -> Result<()> {
        if self.product.family != DeviceFamily::Hydra {
            return Err(KvaserError::NotSupported("CAN FD bus parameters"));
        }
        if params.nominal.no_samp != 1 || (params.can_fd && params.data.no_samp != 1) {
            return Err(KvaserError::IllegalParameter("only one sampling point supported"));
        }
        log::debug!("set bus params FD: {} / {}", params.nominal, params.data);
        let request = hydra::set_bus_params_fd_req(self.channel2he, params)?;
        let timeout = self.response_timeout();
        self.transact(&request, CMD_SET_BUSPARAMS_FD_RESP, timeout)?;

        let actual = self.get_bus_params_fd()?;
        if actual.nominal != params.nominal || (params.can_fd && actual.data != params.data) {
            log::warn!("bus params read back as {} / {}", actual.nominal, actual.data);
            return Err(KvaserError::IllegalParameter("bus parameters not accepted"));
        }
        Ok(())
    }

    pub fn get_bus_params(&mut self) -> Result<BusParams> {
        let timeout = self.response_timeout();
        match self.product.family {
            DeviceFamily::Leaf => {
                let request = leaf::get_bus_params_req(self.channel)?;
                let resp = self.transact(&request, CMD_GET_BUSPARAMS_RESP, timeout)?;
                leaf::decode_bus_params(&resp)
            }
            DeviceFamily::Hydra => {
                let request = hydra::get_bus_params_req(self.channel2he, false)?;
                let resp = self.transact(&request, CMD_GET_BUSPARAMS_RESP, timeout)?;
                hydra::decode_bus_params(&resp)
            }
        }
    }

    /// Nominal and data phase bit timing (Hydra only)
    pub fn get_bus_params_fd(&mut self) -> Result<BusParamsFd> {
        if self.product.family != DeviceFamily::Hydra {
            return Err(KvaserError::NotSupported("CAN FD bus parameters"));
        }
        let timeout = self.response_timeout();
        let nominal = self.get_bus_params()?;
        let request = hydra::get_bus_params_req(self.channel2he, true)?;
        let resp = self.transact(&request, CMD_GET_BUSPARAMS_RESP, timeout)?;
        Ok(BusParamsFd {
            nominal,
            data: hydra::decode_bus_params(&resp)?,
            can_fd: self.ctx.op_mode().is_fd(),
        })
    }

    pub fn set_driver_mode(&mut self, mode: DriverMode) -> Result<()> {
        let request = match self.product.family {
            DeviceFamily::Leaf => leaf::set_driver_mode_req(self.channel, mode)?,
            DeviceFamily::Hydra => hydra::set_driver_mode_req(self.channel2he, mode)?,
        };
        self.send(&request)
    }

    pub fn get_driver_mode(&mut self) -> Result<DriverMode> {
        let timeout = self.response_timeout();
        let mode = match self.product.family {
            DeviceFamily::Leaf => {
                let request = leaf::get_driver_mode_req(self.channel)?;
                let resp = self.transact(&request, CMD_GET_DRIVERMODE_RESP, timeout)?;
                leaf::decode_driver_mode(&resp)?
            }
            DeviceFamily::Hydra => {
                let request = hydra::get_driver_mode_req(self.channel2he)?;
                let resp = self.transact(&request, CMD_GET_DRIVERMODE_RESP, timeout)?;
                hydra::decode_driver_mode(&resp)?
            }
        };
        DriverMode::from_u8(mode).ok_or(KvaserError::Fatal("unknown driver mode"))
    }

    // ========================================================================
    // Chip and Card Control
    // ========================================================================

    /// Go bus on
    pub fn start_chip(&mut self) -> Result<()> {
        let request = match self.product.family {
            DeviceFamily::Leaf => leaf::start_chip_req(self.channel)?,
            DeviceFamily::Hydra => hydra::start_chip_req(self.channel2he)?,
        };
        let timeout = self.response_timeout();
        self.transact(&request, CMD_START_CHIP_RESP, timeout)?;
        log::info!("channel {} bus on", self.channel);
        Ok(())
    }

    /// Go bus off, optionally waiting for the confirmation
    pub fn stop_chip(&mut self, wait: bool) -> Result<()> {
        let request = match self.product.family {
            DeviceFamily::Leaf => leaf::stop_chip_req(self.channel)?,
            DeviceFamily::Hydra => hydra::stop_chip_req(self.channel2he)?,
        };
        if wait {
            let timeout = self.response_timeout();
            self.transact(&request, CMD_STOP_CHIP_RESP, timeout)?;
        } else {
            self.send(&request)?;
        }
        log::info!("channel {} bus off", self.channel);
        Ok(())
    }

    pub fn reset_chip(&mut self) -> Result<()> {
        let request = match self.product.family {
            DeviceFamily::Leaf => leaf::reset_chip_req(self.channel)?,
            DeviceFamily::Hydra => hydra::reset_chip_req(self.channel2he)?,
        };
        self.send(&request)
    }

    pub fn reset_card(&mut self) -> Result<()> {
        let request = match self.product.family {
            DeviceFamily::Leaf => leaf::reset_card_req()?,
            DeviceFamily::Hydra => hydra::reset_card_req()?,
        };
        self.send(&request)
    }

    /// Ask for a chip state event; it updates `event_data` when it arrives
    pub fn request_chip_state(&mut self) -> Result<()> {
        let request = match self.product.family {
            DeviceFamily::Leaf => leaf::get_chip_state_req(self.channel)?,
            DeviceFamily::Hydra => hydra::get_chip_state_req(self.channel2he)?,
        };
        self.send(&request)
    }

    /// Flush the device transmit queue
    pub fn flush_queue(&mut self) -> Result<()> {
        let timeout = self.response_timeout();
        match self.product.family {
            DeviceFamily::Leaf => {
                let request = leaf::flush_queue_req(self.channel, 0)?;
                self.transact(&request, CMD_FILO_FLUSH_QUEUE_RESP, timeout)?;
            }
            DeviceFamily::Hydra => {
                let request = hydra::flush_queue_req(self.channel2he)?;
                self.transact(&request, CMD_FLUSH_QUEUE_RESP, timeout)?;
            }
        }
        Ok(())
    }

    pub fn reset_error_counter(&mut self) -> Result<()> {
        let request = match self.product.family {
            DeviceFamily::Leaf => leaf::reset_error_counter_req(self.channel)?,
            DeviceFamily::Hydra => hydra::reset_error_counter_req(self.channel2he)?,
        };
        self.send(&request)
    }

    pub fn reset_statistics(&mut self) -> Result<()> {
        let request = match self.product.family {
            DeviceFamily::Leaf => leaf::reset_statistics_req(self.channel)?,
            DeviceFamily::Hydra => hydra::reset_statistics_req(self.channel2he)?,
        };
        self.send(&request)
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Transmit one frame
    ///
    /// With a non-zero `timeout` the call waits for the device acknowledgment;
    /// with a zero timeout the frame is sent and acknowledgments are dropped.
    /// Fails with `Busy` while the device holds the maximum number of
    /// unacknowledged frames.
    pub fn send_message(&mut self, frame: &CanFrame, timeout: Duration) -> Result<()> {
        self.ensure_running()?;
        let result = self.transmit_frame(frame, timeout);
        match result {
            Ok(()) => self.tx_messages += 1,
            Err(_) => self.tx_errors += 1,
        }
        result
    }

    /// Transmit one frame with the configured acknowledgment timeout
    pub fn transmit(&mut self, frame: &CanFrame) -> Result<()> {
        self.send_message(frame, self.config.tx_ack_timeout)
    }

    fn transmit_frame(&mut self, frame: &CanFrame, timeout: Duration) -> Result<()> {
        check_transmit(self.ctx.op_mode(), frame)?;

        let trans_id = self.ctx.tracker.reserve()?;
        let request = match self.product.family {
            DeviceFamily::Leaf => leaf::tx_message_req(self.channel, trans_id, frame),
            DeviceFamily::Hydra => hydra::tx_message_req(self.channel2he, trans_id, frame),
        };
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                self.ctx.tracker.cancel();
                return Err(e);
            }
        };

        let wait = !timeout.is_zero();
        self.ctx.tracker.set_suppress_ack(!wait);
        if let Err(e) = self.transport.send_request(&request) {
            self.ctx.tracker.cancel();
            return Err(e);
        }
        log::trace!("sent {} (transaction {})", frame, trans_id);
        if !wait {
            return Ok(());
        }

        match self.product.family {
            DeviceFamily::Leaf => {
                self.await_response(CMD_TX_ACKNOWLEDGE, timeout)?;
            }
            DeviceFamily::Hydra => {
                let ack = self.await_response(CMD_EXTENDED, timeout)?;
                if hydra::extended_opcode(&ack) != Some(CMD_TX_ACKNOWLEDGE_FD) {
                    return Err(KvaserError::Fatal("unexpected extended response"));
                }
            }
        }
        Ok(())
    }

    /// Take the oldest received frame
    ///
    /// `None` blocks until a frame arrives or the channel is torn down,
    /// `Some(Duration::ZERO)` polls. Fails with `NotInitialized` outside
    /// `initialize`/`teardown`.
    pub fn read_message(&self, timeout: Option<Duration>) -> Result<CanFrame> {
        self.ctx.read_message(timeout)
    }

    /// Handle for reading frames from another thread
    pub fn reader(&self) -> ChannelReader {
        ChannelReader {
            ctx: Arc::clone(&self.ctx),
        }
    }

    // ========================================================================
    // Device Information
    // ========================================================================

    /// Device clock in nanoseconds
    pub fn read_clock(&mut self) -> Result<u64> {
        let timeout = self.response_timeout();
        let ticks = match self.product.family {
            DeviceFamily::Leaf => {
                let resp = self.transact(&leaf::read_clock_req(0)?, CMD_READ_CLOCK_RESP, timeout)?;
                leaf::decode_read_clock(&resp)?
            }
            DeviceFamily::Hydra => {
                let resp = self.transact(&hydra::read_clock_req(0)?, CMD_READ_CLOCK_RESP, timeout)?;
                hydra::decode_read_clock(&resp)?
            }
        };
        Ok(nanoseconds_from_ticks(ticks, self.ctx.timer_freq()))
    }

    pub fn get_bus_load(&mut self) -> Result<BusLoad> {
        let timeout = self.response_timeout();
        match self.product.family {
            DeviceFamily::Leaf => {
                let request = leaf::get_bus_load_req(self.channel)?;
                let resp = self.transact(&request, CMD_GET_BUSLOAD_RESP, timeout)?;
                leaf::decode_bus_load(&resp)
            }
            DeviceFamily::Hydra => {
                let request = hydra::get_bus_load_req(self.channel2he)?;
                let resp = self.transact(&request, CMD_GET_BUSLOAD_RESP, timeout)?;
                hydra::decode_bus_load(&resp)
            }
        }
    }

    pub fn get_card_info(&mut self) -> Result<CardInfo> {
        let timeout = self.response_timeout();
        match self.product.family {
            DeviceFamily::Leaf => {
                let resp = self.transact(&leaf::get_card_info_req(0)?, CMD_GET_CARD_INFO_RESP, timeout)?;
                leaf::decode_card_info(&resp)
            }
            DeviceFamily::Hydra => {
                let resp = self.transact(&hydra::get_card_info_req(0)?, CMD_GET_CARD_INFO_RESP, timeout)?;
                hydra::decode_card_info(&resp)
            }
        }
    }

    /// Firmware information
    ///
    /// Hydra devices report the details and the transmit limit in two
    /// separate responses.
    pub fn get_software_info(&mut self) -> Result<SoftwareInfo> {
        let timeout = self.response_timeout();
        match self.product.family {
            DeviceFamily::Leaf => {
                let request = leaf::get_software_info_req()?;
                let resp = self.transact(&request, CMD_GET_SOFTWARE_INFO_RESP, timeout)?;
                leaf::decode_software_info(&resp)
            }
            DeviceFamily::Hydra => {
                let request = hydra::get_software_details_req(true)?;
                let resp = self.transact(&request, CMD_GET_SOFTWARE_DETAILS_RESP, timeout)?;
                let mut info = hydra::decode_software_details(&resp)?;

                let request = hydra::get_max_outstanding_req()?;
                let resp = self.transact(&request, CMD_GET_SOFTWARE_INFO_RESP, timeout)?;
                info.max_outstanding_tx = hydra::decode_max_outstanding(&resp)?;
                Ok(info)
            }
        }
    }

    /// Interface information (Leaf only)
    pub fn get_interface_info(&mut self) -> Result<InterfaceInfo> {
        if self.product.family != DeviceFamily::Leaf {
            return Err(KvaserError::NotSupported("interface information"));
        }
        let timeout = self.response_timeout();
        let request = leaf::get_interface_info_req(self.channel)?;
        let resp = self.transact(&request, CMD_GET_INTERFACE_INFO_RESP, timeout)?;
        leaf::decode_interface_info(&resp)
    }

    /// Query every capability sub-command the family knows
    ///
    /// Answers with a non-OK status keep the product default.
    pub fn get_capabilities(&mut self) -> Result<Capabilities> {
        let timeout = self.response_timeout();
        let mut caps = Capabilities {
            silent_mode: self.product.silent_mode,
            error_frame: self.product.error_frame,
            ..Default::default()
        };
        match self.product.family {
            DeviceFamily::Leaf => {
                for sub_cmd in CAP_SUB_CMD_SILENT_MODE..=CAP_SUB_CMD_HAS_SCRIPT {
                    let request = leaf::get_capabilities_req(sub_cmd, 0)?;
                    let resp = self.transact(&request, CMD_GET_CAPABILITIES_RESP, timeout)?;
                    let resp = leaf::decode_capabilities(&resp)?;
                    if resp.status == CAP_STATUS_OK {
                        caps.set(sub_cmd, leaf::capability_present(&resp));
                    }
                }
            }
            DeviceFamily::Hydra => {
                for sub_cmd in CAP_SUB_CMD_SILENT_MODE..=CAP_SUB_CMD_HAS_BUSPARAMS_TQ {
                    let request = hydra::get_capabilities_req(self.sysdbg_he, sub_cmd)?;
                    let resp = self.transact(&request, CMD_GET_CAPABILITIES_RESP, timeout)?;
                    let resp = hydra::decode_capabilities(&resp)?;
                    if resp.status == CAP_STATUS_OK {
                        caps.set(sub_cmd, hydra::capability_present(&resp, self.channel));
                    }
                }
            }
        }
        Ok(caps)
    }

    pub fn get_transceiver_info(&mut self) -> Result<TransceiverInfo> {
        let timeout = self.response_timeout();
        match self.product.family {
            DeviceFamily::Leaf => {
                let request = leaf::get_transceiver_info_req(self.channel)?;
                let resp = self.transact(&request, CMD_GET_TRANSCEIVER_INFO_RESP, timeout)?;
                leaf::decode_transceiver_info(&resp)
            }
            DeviceFamily::Hydra => {
                let request = hydra::get_transceiver_info_req(self.channel2he)?;
                let resp = self.transact(&request, CMD_GET_TRANSCEIVER_INFO_RESP, timeout)?;
                hydra::decode_transceiver_info(&resp)
            }
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Snapshot of the most recent chip state, error and CAN error events
    pub fn event_data(&self) -> EventData {
        self.ctx.event_data()
    }

    /// Sticky flag: frames were lost because the receive queue was full
    pub fn queue_overflow(&self) -> bool {
        self.ctx.queue.is_overflow()
    }

    pub fn statistics(&self) -> ChannelStatistics {
        let rx = self.ctx.statistics();
        ChannelStatistics {
            tx_messages: self.tx_messages,
            tx_errors: self.tx_errors,
            rx_messages: rx.messages,
            rx_status_frames: rx.status_frames,
            rx_errors: rx.errors,
            queue_high_water: self.ctx.queue.high_water(),
            queue_dropped: self.ctx.queue.overflow_counter(),
        }
    }

    pub fn product(&self) -> &'static KvaserProduct {
        self.product
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Operation mode bits the channel accepts
    pub fn op_capability(&self) -> OpMode {
        self.op_capability
    }

    /// Operation mode applied by `initialize`
    pub fn op_mode(&self) -> OpMode {
        self.ctx.op_mode()
    }

    /// CAN controller clock in MHz
    pub fn can_clock(&self) -> u32 {
        self.can_clock
    }

    /// Timestamp timer frequency in MHz
    pub fn timer_freq(&self) -> u32 {
        self.ctx.timer_freq()
    }

    pub fn max_outstanding_tx(&self) -> u16 {
        self.ctx.tracker.max_outstanding()
    }

    /// Card information read during `initialize`
    pub fn card_info(&self) -> &CardInfo {
        &self.card_info
    }

    /// Firmware information read during `initialize`
    pub fn software_info(&self) -> &SoftwareInfo {
        &self.software_info
    }

    /// Transceiver information read during `initialize`
    pub fn transceiver_info(&self) -> &TransceiverInfo {
        &self.transceiver_info
    }

    /// Capabilities read during `initialize`, product defaults otherwise
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// HE address of the channel (Hydra only)
    pub fn channel_he(&self) -> u8 {
        self.channel2he
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: UsbTransport> std::fmt::Debug for ChannelController<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelController")
            .field("product", &self.product.name)
            .field("channel", &self.channel)
            .field("initialized", &self.reception.is_some())
            .field("op_capability", &format_args!("0x{:02X}", self.op_capability.bits()))
            .field("op_mode", &format_args!("0x{:02X}", self.ctx.op_mode().bits()))
            .field("channel_he", &format_args!("0x{:02X}", self.channel2he))
            .field("source", &self.he2channel)
            .finish()
    }
}

impl<T: UsbTransport> Drop for ChannelController<T> {
    fn drop(&mut self) {
        if self.reception.is_some() {
            let _ = self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::probe;

    #[test]
    fn test_capability_mask_leaf() {
        let leaf = probe(LEAF_LIGHT_V2_PRODUCT_ID).unwrap();
        assert_eq!(capability_mask(leaf), OpMode(CANMODE_NXTD | CANMODE_NRTR));
    }

    #[test]
    fn test_capability_mask_hydra() {
        let pro = probe(LEAF_PRO_HS_V2_PRODUCT_ID).unwrap();
        let mask = capability_mask(pro);
        assert!(mask.contains(CANMODE_FDOE | CANMODE_BRSE | CANMODE_ERR | CANMODE_MON));
        assert!(mask.contains(CANMODE_NXTD | CANMODE_NRTR));
        assert!(!mask.contains(CANMODE_NISO));
    }

    #[test]
    fn test_capability_mask_hydra_always_reports_errors() {
        let pro = probe(LEAF_PRO_HS_V2_PRODUCT_ID).unwrap();
        let quiet = KvaserProduct {
            error_frame: false,
            silent_mode: false,
            can_fd: false,
            ..*pro
        };
        assert_eq!(capability_mask(&quiet), OpMode(CANMODE_NXTD | CANMODE_NRTR | CANMODE_ERR));

        let leaf = probe(LEAF_LIGHT_V2_PRODUCT_ID).unwrap();
        assert!(!capability_mask(leaf).contains(CANMODE_ERR));
    }

    #[test]
    fn test_select_max_outstanding() {
        assert_eq!(select_max_outstanding(DeviceFamily::Leaf, 0), 64);
        assert_eq!(select_max_outstanding(DeviceFamily::Leaf, 32), 32);
        assert_eq!(select_max_outstanding(DeviceFamily::Leaf, 64), 64);
        assert_eq!(select_max_outstanding(DeviceFamily::Leaf, 1000), 64);
        assert_eq!(select_max_outstanding(DeviceFamily::Hydra, 199), 199);
        assert_eq!(select_max_outstanding(DeviceFamily::Hydra, 250), 200);
    }

    #[test]
    fn test_select_clocks() {
        let options = |sw_options| SoftwareInfo {
            sw_options,
            ..Default::default()
        };
        let leaf = probe(LEAF_LIGHT_V2_PRODUCT_ID).unwrap();
        assert_eq!(select_clocks(leaf, &options(SWOPTION_16_MHZ_CLK)), (16, 16));
        assert_eq!(select_clocks(leaf, &options(SWOPTION_32_MHZ_CLK | SWOPTION_CAP_REQ)), (32, 32));
        assert_eq!(select_clocks(leaf, &options(SWOPTION_24_MHZ_CLK)), (24, 24));

        let u100p = probe(U100P_PRODUCT_ID).unwrap();
        assert_eq!(select_clocks(u100p, &options(SWOPTION_80_MHZ_CLK)), (80, 80));
        assert_eq!(select_clocks(u100p, &options(SWOPTION_24_MHZ_CLK)), (80, 24));
        assert_eq!(select_clocks(u100p, &options(0)), (80, 24));

        // the CAN clock field overrides the product clock
        let can24 = options(SWOPTION_24_MHZ_CAN_CLK | SWOPTION_24_MHZ_CLK);
        assert_eq!(select_clocks(u100p, &can24), (24, 24));
        let can80 = options(SWOPTION_80_MHZ_CAN_CLK | SWOPTION_24_MHZ_CLK | SWOPTION_CANFD_CAP);
        assert_eq!(select_clocks(u100p, &can80), (80, 24));
        let slow = KvaserProduct {
            can_clock: 24,
            ..*u100p
        };
        assert_eq!(select_clocks(&slow, &options(SWOPTION_80_MHZ_CAN_CLK)), (80, 24));
        assert_eq!(select_clocks(&slow, &options(0)), (24, 24));
    }

    #[test]
    fn test_check_transmit() {
        let classic = CanFrame::with_data(0x123, &[1, 2]);
        let extended = CanFrame::with_extended_data(0x123, &[1, 2]);
        let remote = CanFrame::remote(0x123, 2);
        let fd = CanFrame::with_fd_data(0x123, &[0; 12], false);
        let fd_brs = CanFrame::with_fd_data(0x123, &[0; 12], true);

        assert!(check_transmit(OpMode::DEFAULT, &classic).is_ok());
        assert!(check_transmit(OpMode(CANMODE_NXTD), &extended).is_err());
        assert!(check_transmit(OpMode(CANMODE_NRTR), &remote).is_err());
        assert!(check_transmit(OpMode::DEFAULT, &fd).is_err());
        assert!(check_transmit(OpMode(CANMODE_FDOE), &fd).is_ok());
        assert!(check_transmit(OpMode(CANMODE_FDOE), &fd_brs).is_err());
        assert!(check_transmit(OpMode(CANMODE_FDOE | CANMODE_BRSE), &fd_brs).is_ok());

        let mut brs_only = classic;
        brs_only.brs = true;
        assert!(check_transmit(OpMode(CANMODE_FDOE | CANMODE_BRSE), &brs_only).is_err());

        let mut status = classic;
        status.sts = true;
        assert!(matches!(
            check_transmit(OpMode(CANMODE_ERR), &status),
            Err(KvaserError::IllegalParameter(_))
        ));
    }

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();
        assert_eq!(config.queue_capacity, 65536);
        assert_eq!(config.command_timeout, Duration::from_millis(800));
        assert_eq!(config.response_timeout, Duration::from_millis(5000));
    }
}
