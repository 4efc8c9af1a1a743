//! Response pipe
//!
//! Carries command responses from the reception thread to the thread that
//! sent the request. Frames are kept whole and delivered in arrival order.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{KvaserError, Result};

/// Frames kept when nobody reads the pipe
const PIPE_DEPTH: usize = 256;

#[derive(Debug, Default)]
struct PipeState {
    frames: VecDeque<Vec<u8>>,
    aborted: bool,
}

#[derive(Debug, Default)]
pub struct ResponsePipe {
    state: Mutex<PipeState>,
    cond: Condvar,
}

impl ResponsePipe {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append one received command
    ///
    /// When the pipe is full the oldest frame is discarded; stale responses
    /// are of no use to a later request.
    pub fn write(&self, frame: &[u8]) {
        let mut state = self.lock();
        if state.frames.len() >= PIPE_DEPTH {
            state.frames.pop_front();
            log::debug!("response pipe full, discarding oldest frame");
        }
        state.frames.push_back(frame.to_vec());
        drop(state);
        self.cond.notify_all();
    }

    /// Take the oldest frame, waiting at most `timeout`
    ///
    /// `opcode` only labels the `Timeout` error.
    pub fn read(&self, timeout: Duration, opcode: u8) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.aborted {
                return Err(KvaserError::Aborted);
            }
            if let Some(frame) = state.frames.pop_front() {
                return Ok(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(KvaserError::Timeout { opcode });
            }
            state = self
                .cond
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Fail every current and future read with `KvaserError::Aborted`
    pub fn abort(&self) {
        self.lock().aborted = true;
        self.cond.notify_all();
    }

    /// Drop pending frames and re-arm after an abort
    pub fn reset(&self) {
        let mut state = self.lock();
        state.frames.clear();
        state.aborted = false;
    }

    /// Drop pending frames
    pub fn clear(&self) {
        self.lock().frames.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_write_then_read() {
        let pipe = ResponsePipe::new();
        pipe.write(&[1, 2, 3]);
        pipe.write(&[4]);
        assert_eq!(pipe.read(Duration::ZERO, 0).unwrap(), vec![1, 2, 3]);
        assert_eq!(pipe.read(Duration::ZERO, 0).unwrap(), vec![4]);
    }

    #[test]
    fn test_read_timeout() {
        let pipe = ResponsePipe::new();
        match pipe.read(Duration::from_millis(10), 0x1B) {
            Err(KvaserError::Timeout { opcode }) => assert_eq!(opcode, 0x1B),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_abort_wakes_reader() {
        let pipe = Arc::new(ResponsePipe::new());
        let reader = Arc::clone(&pipe);
        let handle = thread::spawn(move || reader.read(Duration::from_secs(10), 0));
        thread::sleep(Duration::from_millis(10));
        pipe.abort();
        assert!(matches!(handle.join().unwrap(), Err(KvaserError::Aborted)));

        pipe.reset();
        pipe.write(&[9]);
        assert_eq!(pipe.read(Duration::ZERO, 0).unwrap(), vec![9]);
    }

    #[test]
    fn test_depth_limit() {
        let pipe = ResponsePipe::new();
        for i in 0..(PIPE_DEPTH + 2) {
            pipe.write(&[(i % 256) as u8]);
        }
        assert_eq!(pipe.len(), PIPE_DEPTH);
        assert_eq!(pipe.read(Duration::ZERO, 0).unwrap(), vec![2]);
    }
}
