//! Transmit acknowledgment tracker
//!
//! Counts the transmit requests awaiting their acknowledgment and hands out
//! the cycling transaction id stamped into each request. The reception thread
//! releases a slot whenever an acknowledgment arrives.

use std::sync::{Mutex, MutexGuard};

use crate::error::{KvaserError, Result};

#[derive(Debug)]
struct TrackerState {
    max_outstanding: u16,
    outstanding: u16,
    transaction_id: u16,
    suppress_ack: bool,
}

/// Outstanding transmit bookkeeping of one channel
#[derive(Debug)]
pub struct TxTracker {
    state: Mutex<TrackerState>,
}

impl TxTracker {
    pub fn new(max_outstanding: u16) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                max_outstanding: max_outstanding.max(1),
                outstanding: 0,
                transaction_id: 0,
                suppress_ack: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve a slot and return the transaction id for the request
    ///
    /// Fails with `KvaserError::Busy` when every slot is in use.
    pub fn reserve(&self) -> Result<u8> {
        let mut state = self.lock();
        if state.outstanding >= state.max_outstanding {
            return Err(KvaserError::Busy {
                outstanding: state.outstanding,
            });
        }
        state.transaction_id = (state.transaction_id + 1) % state.max_outstanding;
        state.outstanding += 1;
        Ok(state.transaction_id as u8)
    }

    /// Give back a slot whose request never reached the device
    pub fn cancel(&self) {
        let mut state = self.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
    }

    /// Account for an acknowledgment carrying `trans_id`
    ///
    /// Returns whether the acknowledgment should be forwarded to a waiting
    /// sender: acks are not suppressed and the id is the one last handed out.
    /// The slot is released in every case.
    pub fn release(&self, trans_id: u8) -> bool {
        let mut state = self.lock();
        let forward = !state.suppress_ack && trans_id as u16 == state.transaction_id;
        state.outstanding = state.outstanding.saturating_sub(1);
        forward
    }

    /// Limit the number of outstanding requests (at least 1)
    pub fn set_max_outstanding(&self, max_outstanding: u16) {
        let mut state = self.lock();
        state.max_outstanding = max_outstanding.max(1);
        state.transaction_id %= state.max_outstanding;
    }

    pub fn max_outstanding(&self) -> u16 {
        self.lock().max_outstanding
    }

    /// Fire-and-forget transmission: acknowledgments are not forwarded
    pub fn set_suppress_ack(&self, suppress: bool) {
        self.lock().suppress_ack = suppress;
    }

    pub fn outstanding(&self) -> u16 {
        self.lock().outstanding
    }

    /// Transaction id handed out by the last `reserve`
    pub fn current_id(&self) -> u8 {
        self.lock().transaction_id as u8
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        state.outstanding = 0;
        state.transaction_id = 0;
        state.suppress_ack = false;
    }
}
