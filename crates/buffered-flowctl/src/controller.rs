//! Sender-side flow control for a single [`BufferedChannel`].
//!
//! A [`FlowController`] watches the channel's buffered amount after every
//! write.  Once it reaches the high water mark, the controller is *paused*
//! and refuses further writes until the channel reports that its buffered
//! amount dropped to the low water mark.
//!
//! The pause state is published on a [`postage::watch`] channel, so any
//! number of [`Ready`] futures can wait for the controller to resume.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use futures::future::FusedFuture;
use pin_project::pin_project;
use postage::watch;
use tracing::{debug, trace};

use crate::channel::BufferedChannel;
use crate::config::FlowCtrlConfig;
use crate::{Error, Result};

/// Whether a [`FlowController`] currently accepts writes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(clippy::exhaustive_enums)] // A controller is either paused or it isn't.
pub enum FlowState {
    /// Writes are accepted.
    Flowing,
    /// The high water mark was reached; writes are refused until the channel
    /// drains to the low water mark.
    Paused,
}

impl FlowState {
    /// Return true if this is [`FlowState::Paused`].
    pub fn is_paused(self) -> bool {
        self == FlowState::Paused
    }
}

/// A flow-controlled (sender side) wrapper around a [`BufferedChannel`].
///
/// Use [`write`](FlowController::write) to send messages, and wait for
/// [`ready`](FlowController::ready) before each write.
/// Forward the channel's "buffered amount low" event to
/// [`buffered_amount_low`](FlowController::buffered_amount_low).
///
/// To queue writes without waiting, wrap the controller in an
/// [`OrderedFlowQueue`](crate::OrderedFlowQueue).
#[derive(Debug)]
pub struct FlowController<C> {
    /// The channel being flow-controlled.
    channel: C,
    /// Resume once the buffered amount is at or below this.
    low_water_mark: u64,
    /// Pause once the buffered amount is at or above this.
    high_water_mark: u64,
    /// Current pause state, and the readiness signal for [`Ready`] futures.
    state: watch::Sender<FlowState>,
    /// Never polled; read for the current state, and cloned to make new
    /// receivers, which therefore start by yielding the current state.
    state_rx: watch::Receiver<FlowState>,
}

impl<C: BufferedChannel> FlowController<C> {
    /// Wrap `channel`, using the watermarks from `config`.
    ///
    /// Registers the low water mark as the channel's "buffered amount low"
    /// threshold.
    pub fn new(mut channel: C, config: &FlowCtrlConfig) -> Self {
        channel.set_buffered_amount_low_threshold(config.low_water_mark());
        let (state, state_rx) = watch::channel_with(FlowState::Flowing);
        FlowController {
            channel,
            low_water_mark: config.low_water_mark(),
            high_water_mark: config.high_water_mark(),
            state,
            state_rx,
        }
    }

    /// Wrap `channel`, using the default watermarks.
    pub fn with_defaults(channel: C) -> Self {
        Self::new(channel, &FlowCtrlConfig::default())
    }

    /// Write `message` to the channel's buffer, for delivery to the remote side.
    ///
    /// The controller must not be paused: wait for
    /// [`ready`](FlowController::ready) first.  Writing while paused fails
    /// with [`Error::ChannelPaused`] without touching the channel; the
    /// message is not queued.
    ///
    /// A failure of the channel itself is returned as
    /// [`Error::TransportFailure`].
    pub fn write(&mut self, message: impl Into<Bytes>) -> Result<()> {
        if self.is_paused() {
            return Err(Error::ChannelPaused);
        }

        let message = message.into();
        let len = message.len();
        self.channel.send(message).map_err(Error::transport)?;

        // The buffered amount includes what we just enqueued, as well as
        // anything earlier writes left behind.
        let buffered = self.channel.buffered_amount();
        trace!(
            "{}: wrote {} bytes (buffered={})",
            self.channel.label(),
            len,
            buffered
        );
        if buffered >= self.high_water_mark && self.maybe_set_state(FlowState::Paused) {
            debug!("{}: paused (buffered={})", self.channel.label(), buffered);
        }
        Ok(())
    }

    /// Handle the channel's "buffered amount low" event.
    ///
    /// Resumes the controller, waking every pending [`Ready`] future.
    /// Does nothing if the controller is not paused.
    pub fn buffered_amount_low(&mut self) {
        if self.maybe_set_state(FlowState::Flowing) {
            debug!(
                "{}: resumed (buffered={})",
                self.channel.label(),
                self.channel.buffered_amount()
            );
        }
    }

    /// Handle a change of the channel's buffered amount.
    ///
    /// For channels that report every change rather than a threshold
    /// crossing: resumes the controller only if the buffered amount is now
    /// at or below the low water mark.
    pub fn buffered_amount_changed(&mut self) {
        if self.channel.buffered_amount() <= self.low_water_mark {
            self.buffered_amount_low();
        }
    }

    /// Update the pause state, notifying receivers only on an actual change.
    ///
    /// Returns true if the state changed.
    fn maybe_set_state(&mut self, new: FlowState) -> bool {
        let current = *self.state_rx.borrow();
        if current == new {
            return false;
        }
        // The read guard above is gone, so borrow_mut can't deadlock.
        *self.state.borrow_mut() = new;
        true
    }
}

impl<C> FlowController<C> {
    /// Return a future that completes once the controller is not paused.
    ///
    /// Completes immediately if the controller is flowing.  The future does
    /// not borrow the controller; it also completes if the controller is
    /// dropped.
    pub fn ready(&self) -> Ready {
        Ready::from_receiver(self.subscribe())
    }

    /// Return the current pause state.
    pub fn state(&self) -> FlowState {
        *self.state_rx.borrow()
    }

    /// Return true if writes are currently refused.
    pub fn is_paused(&self) -> bool {
        self.state().is_paused()
    }

    /// Return a receiver which observes every change of the pause state.
    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.state_rx.clone()
    }

    /// The low water mark, in bytes.
    pub fn low_water_mark(&self) -> u64 {
        self.low_water_mark
    }

    /// The high water mark, in bytes.
    pub fn high_water_mark(&self) -> u64 {
        self.high_water_mark
    }

    /// Return a reference to the underlying channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Return a mutable reference to the underlying channel.
    ///
    /// Sending on the channel directly bypasses flow control.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Unwrap the underlying channel.
    pub fn into_channel(self) -> C {
        self.channel
    }
}

/// Future returned by [`FlowController::ready`].
///
/// Resolves once the controller is not paused.
#[derive(Debug)]
#[pin_project]
#[must_use = "futures do nothing unless polled"]
pub struct Ready {
    /// Receiver for the controller's pause state.
    #[pin]
    state: watch::Receiver<FlowState>,
    /// Set once we've returned `Ready`.
    done: bool,
}

impl Ready {
    /// Wait on `state`, which must not have been polled yet.
    pub(crate) fn from_receiver(state: watch::Receiver<FlowState>) -> Self {
        Ready { state, done: false }
    }
}

impl Future for Ready {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(());
        }
        // A fresh receiver yields the current state first, then each change.
        loop {
            match this.state.as_mut().poll_next(cx) {
                Poll::Ready(Some(FlowState::Paused)) => continue,
                // Flowing, or the controller went away and can never pause
                // us again.
                Poll::Ready(Some(FlowState::Flowing)) | Poll::Ready(None) => {
                    *this.done = true;
                    return Poll::Ready(());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl FusedFuture for Ready {
    fn is_terminated(&self) -> bool {
        self.done
    }
}
