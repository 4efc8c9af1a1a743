//! Reception demultiplexer
//!
//! The USB transport delivers raw bulk-IN chunks holding any number of
//! concatenated device commands. A demultiplexer splits a chunk into commands
//! and routes each one:
//!
//! - events update the live `EventData` snapshot
//! - command responses go to the `ResponsePipe`
//! - received CAN frames are filtered by the operation mode and queued
//! - transmit acknowledgments release a `TxTracker` slot
//!
//! Chunks reach the demultiplexer through a `std::sync::mpsc` channel drained by
//! the thread started with `spawn_reception`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::constants::*;
use crate::error::{KvaserError, Result};
use crate::frame::{CanFrame, ReceivedMessage};
use crate::hydra;
use crate::leaf;
use crate::pipe::ResponsePipe;
use crate::queue::MessageQueue;
use crate::structures::{DeviceFamily, EventData, OpMode};
use crate::tracker::TxTracker;

/// Reception counters of one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    /// CAN frames queued
    pub messages: u64,
    /// Error frames queued
    pub status_frames: u64,
    /// Events received and failed transmissions
    pub errors: u64,
}

/// State shared between the reception thread and the channel controller
#[derive(Debug)]
pub struct ReceptionContext {
    pub queue: MessageQueue<CanFrame>,
    pub pipe: ResponsePipe,
    pub tracker: TxTracker,
    events: Mutex<EventData>,
    running: AtomicBool,
    op_mode: AtomicU8,
    timer_freq: AtomicU32,
    msg_counter: AtomicU64,
    sts_counter: AtomicU64,
    err_counter: AtomicU64,
}

impl ReceptionContext {
    pub fn new(queue_capacity: usize, max_outstanding: u16) -> Result<Self> {
        Ok(Self {
            queue: MessageQueue::new(queue_capacity)?,
            pipe: ResponsePipe::new(),
            tracker: TxTracker::new(max_outstanding),
            events: Mutex::new(EventData::default()),
            running: AtomicBool::new(false),
            op_mode: AtomicU8::new(CANMODE_DEFAULT),
            timer_freq: AtomicU32::new(1),
            msg_counter: AtomicU64::new(0),
            sts_counter: AtomicU64::new(0),
            err_counter: AtomicU64::new(0),
        })
    }

    fn events(&self) -> MutexGuard<'_, EventData> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the most recent events
    pub fn event_data(&self) -> EventData {
        *self.events()
    }

    pub fn op_mode(&self) -> OpMode {
        OpMode(self.op_mode.load(Ordering::Acquire))
    }

    pub fn set_op_mode(&self, mode: OpMode) {
        self.op_mode.store(mode.bits(), Ordering::Release);
    }

    /// Timer frequency in MHz used for timestamps
    pub fn timer_freq(&self) -> u32 {
        self.timer_freq.load(Ordering::Acquire)
    }

    pub fn set_timer_freq(&self, freq_mhz: u32) {
        self.timer_freq.store(freq_mhz, Ordering::Release);
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            messages: self.msg_counter.load(Ordering::Relaxed),
            status_frames: self.sts_counter.load(Ordering::Relaxed),
            errors: self.err_counter.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn count_error(&self) {
        self.err_counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all state and accept reads
    pub fn open(&self) {
        self.reset();
        self.running.store(true, Ordering::Release);
    }

    /// Wake blocked readers and waiters; reads fail until `open`
    pub fn close(&self) {
        self.running.store(false, Ordering::Release);
        self.queue.close();
        self.pipe.abort();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Take the oldest received frame
    ///
    /// Fails with `NotInitialized` when the context is closed, also for a
    /// reader woken by `close`.
    pub fn read_message(&self, timeout: Option<Duration>) -> Result<CanFrame> {
        if !self.is_running() {
            return Err(KvaserError::NotInitialized);
        }
        match self.queue.dequeue(timeout) {
            Err(KvaserError::Empty) if !self.is_running() => Err(KvaserError::NotInitialized),
            result => result,
        }
    }

    /// Clear counters, event snapshot and queued data
    pub fn reset(&self) {
        self.queue.reset();
        self.pipe.reset();
        self.tracker.reset();
        *self.events() = EventData::default();
        self.msg_counter.store(0, Ordering::Relaxed);
        self.sts_counter.store(0, Ordering::Relaxed);
        self.err_counter.store(0, Ordering::Relaxed);
    }

    /// Whether the operation mode lets `frame` through
    fn accepts(&self, frame: &CanFrame) -> bool {
        let mode = self.op_mode();
        if frame.xtd && mode.suppress_extended() {
            return false;
        }
        if frame.rtr && mode.suppress_remote() {
            return false;
        }
        if frame.sts && !mode.error_frames() {
            return false;
        }
        true
    }

    /// Queue a decoded message or record its flags when it is not a frame
    fn deliver(&self, message: ReceivedMessage) {
        if !message.valid {
            log::debug!("message flags 0x{:08X} without frame", message.flags);
            self.events().last_flags = message.flags;
            return;
        }
        let frame = message.frame;
        if !self.accepts(&frame) {
            log::trace!("frame 0x{:X} suppressed by operation mode", frame.id);
            return;
        }
        match self.queue.enqueue(frame) {
            Ok(()) if frame.sts => {
                self.sts_counter.fetch_add(1, Ordering::Relaxed);
            }
            Ok(()) => {
                self.msg_counter.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => log::trace!("receive queue full, frame 0x{:X} dropped", frame.id),
        }
    }

    /// Forward a transmit acknowledgment if a sender waits for it
    fn acknowledge(&self, trans_id: u8, frame: &[u8]) {
        if self.tracker.release(trans_id) {
            self.pipe.write(frame);
        }
    }
}

/// Splits raw reception chunks into commands and routes them
pub trait Demultiplexer: Send {
    /// Process one chunk as delivered by the transport
    fn process(&mut self, chunk: &[u8]);
}

/// Demultiplexer for the flat Leaf protocol
#[derive(Debug)]
pub struct LeafDemultiplexer {
    ctx: Arc<ReceptionContext>,
}

impl LeafDemultiplexer {
    pub fn new(ctx: Arc<ReceptionContext>) -> Self {
        Self { ctx }
    }

    fn dispatch(&self, frame: &[u8]) {
        let ctx = &self.ctx;
        let Some(opcode) = leaf::opcode(frame) else {
            return;
        };
        match opcode {
            CMD_RX_STD_MESSAGE | CMD_RX_EXT_MESSAGE => {}
            CMD_CHIP_STATE_EVENT => match leaf::decode_chip_state_event(frame) {
                Ok(event) => ctx.events().chip_state = event,
                Err(e) => log::warn!("chip state event: {}", e),
            },
            CMD_ERROR_EVENT => match leaf::decode_error_event(frame) {
                Ok(event) => {
                    log::debug!("error event: code {}", event.code);
                    ctx.events().error = event;
                }
                Err(e) => log::warn!("error event: {}", e),
            },
            CMD_CAN_ERROR_EVENT => match leaf::decode_can_error_event(frame) {
                Ok(event) => ctx.events().can_error = event,
                Err(e) => log::warn!("CAN error event: {}", e),
            },
            CMD_GET_BUSPARAMS_RESP
            | CMD_GET_DRIVERMODE_RESP
            | CMD_START_CHIP_RESP
            | CMD_STOP_CHIP_RESP
            | CMD_READ_CLOCK_RESP
            | CMD_GET_CARD_INFO_RESP
            | CMD_GET_INTERFACE_INFO_RESP
            | CMD_GET_SOFTWARE_INFO_RESP
            | CMD_GET_BUSLOAD_RESP
            | CMD_FILO_FLUSH_QUEUE_RESP
            | CMD_GET_CAPABILITIES_RESP
            | CMD_GET_TRANSCEIVER_INFO_RESP => ctx.pipe.write(frame),
            CMD_LOG_MESSAGE => match leaf::decode_log_message(frame, ctx.timer_freq()) {
                Ok(message) => ctx.deliver(message),
                Err(e) => log::warn!("logged message: {}", e),
            },
            CMD_TX_ACKNOWLEDGE => match leaf::decode_tx_acknowledge(frame) {
                Ok(ack) => ctx.acknowledge(ack.trans_id, frame),
                Err(e) => log::warn!("transmit acknowledgment: {}", e),
            },
            other => log::trace!("ignoring command {}", other),
        }
    }
}

impl Demultiplexer for LeafDemultiplexer {
    fn process(&mut self, chunk: &[u8]) {
        if chunk.len() < KVASER_MIN_COMMAND_LENGTH {
            log::warn!("short USB transfer ({} bytes)", chunk.len());
            return;
        }
        let mut index = 0;
        while index < chunk.len() {
            let nbyte = leaf::frame_length(&chunk[index..]);
            if nbyte == 0 || index + nbyte > chunk.len() {
                log::warn!(
                    "corrupt command length {} at offset {} of {}, dropping rest of transfer",
                    nbyte,
                    index,
                    chunk.len()
                );
                return;
            }
            self.dispatch(&chunk[index..index + nbyte]);
            index += nbyte;
        }
    }
}

/// Demultiplexer for the addressed Hydra protocol
///
/// Hydra devices may split a command over two USB transfers; the unconsumed
/// tail of a chunk is retained and prefixed to the next one.
#[derive(Debug)]
pub struct HydraDemultiplexer {
    ctx: Arc<ReceptionContext>,
    retention: Vec<u8>,
}

impl HydraDemultiplexer {
    pub fn new(ctx: Arc<ReceptionContext>) -> Self {
        Self {
            ctx,
            retention: Vec::with_capacity(USB_READ_BUFFER_SIZE + HYDRA_CMD_EXT_SIZE),
        }
    }

    /// Bytes of an incomplete command carried over to the next chunk
    pub fn retained(&self) -> usize {
        self.retention.len()
    }

    fn dispatch(&self, frame: &[u8]) {
        let ctx = &self.ctx;
        let Some(opcode) = hydra::opcode(frame) else {
            return;
        };
        match opcode {
            CMD_CHIP_STATE_EVENT => {
                match hydra::decode_chip_state_event(frame) {
                    Ok(event) => ctx.events().chip_state = event,
                    Err(e) => log::warn!("chip state event: {}", e),
                }
                ctx.count_error();
            }
            CMD_ERROR_EVENT => {
                match hydra::decode_error_event(frame) {
                    Ok(event) => {
                        log::debug!("error event: code {}", event.code);
                        ctx.events().error = event;
                    }
                    Err(e) => log::warn!("error event: {}", e),
                }
                ctx.pipe.write(frame);
                ctx.count_error();
            }
            CMD_CAN_ERROR_EVENT => {
                match hydra::decode_can_error_event(frame) {
                    Ok(event) => ctx.events().can_error = event,
                    Err(e) => log::warn!("CAN error event: {}", e),
                }
                ctx.count_error();
            }
            CMD_GET_BUSPARAMS_RESP
            | CMD_GET_DRIVERMODE_RESP
            | CMD_START_CHIP_RESP
            | CMD_STOP_CHIP_RESP
            | CMD_READ_CLOCK_RESP
            | CMD_GET_CARD_INFO_RESP
            | CMD_GET_INTERFACE_INFO_RESP
            | CMD_GET_SOFTWARE_INFO_RESP
            | CMD_GET_BUSLOAD_RESP
            | CMD_FLUSH_QUEUE_RESP
            | CMD_SET_BUSPARAMS_FD_RESP
            | CMD_SET_BUSPARAMS_RESP
            | CMD_GET_CAPABILITIES_RESP
            | CMD_GET_TRANSCEIVER_INFO_RESP
            | CMD_MAP_CHANNEL_RESP
            | CMD_GET_SOFTWARE_DETAILS_RESP => ctx.pipe.write(frame),
            CMD_EXTENDED => match hydra::extended_opcode(frame) {
                Some(CMD_RX_MESSAGE_FD) => match hydra::decode_rx_message(frame, ctx.timer_freq()) {
                    Ok(message) => ctx.deliver(message),
                    Err(e) => log::warn!("received message: {}", e),
                },
                Some(CMD_TX_ACKNOWLEDGE_FD) => match hydra::decode_tx_acknowledge(frame) {
                    Ok(ack) => ctx.acknowledge(ack.trans_id, frame),
                    Err(e) => log::warn!("transmit acknowledgment: {}", e),
                },
                other => log::trace!("ignoring extended command {:?}", other),
            },
            other => log::trace!("ignoring command {}", other),
        }
    }
}

impl Demultiplexer for HydraDemultiplexer {
    fn process(&mut self, chunk: &[u8]) {
        self.retention.extend_from_slice(chunk);
        if self.retention.len() < HYDRA_CMD_SIZE {
            return;
        }

        let buf = std::mem::take(&mut self.retention);
        let mut index = 0;
        while index < buf.len() {
            let nbyte = match hydra::frame_length(&buf[index..]) {
                Ok(Some(nbyte)) => nbyte,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("{} at offset {}, dropping {} bytes", e, index, buf.len() - index);
                    index = buf.len();
                    break;
                }
            };
            if index + nbyte > buf.len() {
                log::trace!("command split over transfers ({} of {} bytes)", buf.len() - index, nbyte);
                break;
            }
            self.dispatch(&buf[index..index + nbyte]);
            index += nbyte;
        }

        self.retention = buf;
        self.retention.drain(..index);
    }
}

/// Drain raw reception chunks from `receiver` on a dedicated thread
///
/// The thread ends when every sender has been dropped.
pub fn spawn_reception<D>(receiver: Receiver<Vec<u8>>, mut demux: D) -> Result<JoinHandle<()>>
where
    D: Demultiplexer + 'static,
{
    thread::Builder::new()
        .name("kvaser-reception".to_string())
        .spawn(move || {
            log::debug!("reception thread started");
            for chunk in receiver {
                demux.process(&chunk);
            }
            log::debug!("reception thread stopped");
        })
        .map_err(|_| KvaserError::Fatal("failed to spawn reception thread"))
}

/// Demultiplexer matching the device family
pub fn for_family(family: DeviceFamily, ctx: Arc<ReceptionContext>) -> Box<dyn Demultiplexer> {
    match family {
        DeviceFamily::Leaf => Box::new(LeafDemultiplexer::new(ctx)),
        DeviceFamily::Hydra => Box::new(HydraDemultiplexer::new(ctx)),
    }
}

impl Demultiplexer for Box<dyn Demultiplexer> {
    fn process(&mut self, chunk: &[u8]) {
        (**self).process(chunk)
    }
}
