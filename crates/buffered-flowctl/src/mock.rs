//! An in-memory [`BufferedChannel`] for tests.
//!
//! [`MockChannel`] records every message it is given and lets the test
//! decide what the buffered amount is.  Clones share state, so a test can
//! keep one handle while a [`FlowController`](crate::FlowController) owns
//! another.

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use thiserror::Error;

use crate::channel::BufferedChannel;

/// An error from [`MockChannel::send`].
#[derive(Debug, Clone, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum MockSendError {
    /// The channel was closed with [`MockChannel::close`].
    #[error("mock channel is closed")]
    Closed,
    /// A failure injected with [`MockChannel::fail_next_send`].
    #[error("injected send failure: {0}")]
    Injected(String),
}

/// Shared state of a [`MockChannel`].
#[derive(Debug, Default)]
struct MockState {
    /// What we pretend is sitting in the outbound buffer.
    buffered_amount: u64,
    /// The threshold a controller registered, if any.
    low_threshold: Option<u64>,
    /// Every message successfully sent, in order.
    sent: Vec<Bytes>,
    /// If set, the next send fails with this message.
    fail_next: Option<String>,
    /// If true, every send fails.
    closed: bool,
}

/// A [`BufferedChannel`] whose buffered amount is controlled by the test.
///
/// Each successful send adds the message length to the buffered amount;
/// nothing ever drains unless the test calls
/// [`set_buffered_amount`](MockChannel::set_buffered_amount).
#[derive(Debug, Clone)]
pub struct MockChannel {
    /// Name used in log messages.
    label: Arc<str>,
    /// State shared between clones.
    state: Arc<Mutex<MockState>>,
}

impl MockChannel {
    /// Make a new, empty, open channel.
    pub fn new(label: &str) -> Self {
        MockChannel {
            label: label.into(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Lock the shared state.
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock channel lock poisoned")
    }

    /// Return every message sent so far, in order.
    pub fn sent(&self) -> Vec<Bytes> {
        self.lock().sent.clone()
    }

    /// Forget the messages sent so far, returning them.
    pub fn take_sent(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.lock().sent)
    }

    /// Pretend the channel has (re)filled or drained to `amount` bytes.
    pub fn set_buffered_amount(&self, amount: u64) {
        self.lock().buffered_amount = amount;
    }

    /// Return the threshold set with `set_buffered_amount_low_threshold`.
    pub fn buffered_amount_low_threshold(&self) -> Option<u64> {
        self.lock().low_threshold
    }

    /// Make the next send fail, with `reason`.
    pub fn fail_next_send(&self, reason: &str) {
        self.lock().fail_next = Some(reason.to_owned());
    }

    /// Make every subsequent send fail.
    pub fn close(&self) {
        self.lock().closed = true;
    }
}

impl BufferedChannel for MockChannel {
    type Error = MockSendError;

    fn send(&mut self, message: Bytes) -> Result<(), MockSendError> {
        let mut state = self.lock();
        if state.closed {
            return Err(MockSendError::Closed);
        }
        if let Some(reason) = state.fail_next.take() {
            return Err(MockSendError::Injected(reason));
        }
        state.buffered_amount = state.buffered_amount.saturating_add(message.len() as u64);
        state.sent.push(message);
        Ok(())
    }

    fn buffered_amount(&self) -> u64 {
        self.lock().buffered_amount
    }

    fn set_buffered_amount_low_threshold(&mut self, threshold: u64) {
        self.lock().low_threshold = Some(threshold);
    }

    fn label(&self) -> &str {
        &self.label
    }
}
