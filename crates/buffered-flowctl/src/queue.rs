//! An unbounded, ordered write queue in front of a [`FlowController`].
//!
//! [`OrderedFlowQueue::write`] never waits and never fails with
//! [`Error::ChannelPaused`]: it appends the message to a queue, which a
//! [`FlowQueueReactor`] drains into the controller, one message at a time,
//! in submission order, and only while the controller is not paused.
//!
//! While this cancels the effect of the flow control for the producer, it
//! prevents the channel's own buffer from becoming saturated, by keeping
//! the excess in application space instead.
//!
//! # Transport failures
//!
//! If the channel fails to send a message, that message's [`WriteReceipt`]
//! resolves to [`Error::TransportFailure`] and the queue becomes *broken*:
//! the reactor never touches the channel again, and every message still
//! queued, or written afterwards, is rejected with [`Error::QueueBroken`].
//! The reactor keeps answering until the [`OrderedFlowQueue`] is dropped,
//! and then returns the transport failure from
//! [`run`](FlowQueueReactor::run).

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::channel::{mpsc, oneshot};
use futures::future::{Fuse, FusedFuture};
use futures::{FutureExt as _, StreamExt as _, select_biased};
use pin_project::pin_project;
use postage::watch;
use tracing::{debug, trace, warn};

use crate::channel::BufferedChannel;
use crate::controller::{FlowController, FlowState, Ready};
use crate::{Error, Result};

/// A request from an [`OrderedFlowQueue`] to its reactor.
#[derive(Debug)]
enum QueueRequest {
    /// Write a message to the controller.
    Write {
        /// The message.
        message: Bytes,
        /// Where to report the outcome.
        done: oneshot::Sender<Result<()>>,
    },
    /// Report once every earlier request has been handled.
    Flush {
        /// Where to report the outcome.
        done: oneshot::Sender<Result<()>>,
    },
}

impl QueueRequest {
    /// Report `result` to whoever submitted this request.
    fn complete(self, result: Result<()>) {
        let done = match self {
            QueueRequest::Write { done, .. } | QueueRequest::Flush { done } => done,
        };
        // The receipt may have been dropped; that's fine.
        let _ = done.send(result);
    }
}

/// A channel event, forwarded by a [`LowWaterNotifier`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum FlowEvent {
    /// The buffered amount dropped to or below the low water mark.
    BufferedAmountLow,
    /// The buffered amount changed, in either direction.
    BufferedAmountChanged,
}

/// Producer handle for an ordered, flow-controlled write queue.
///
/// Made by [`OrderedFlowQueue::new`], together with the
/// [`FlowQueueReactor`] that does the actual sending.
///
/// Dropping this handle does not discard queued messages: the reactor
/// sends everything already queued, and then stops.
#[derive(Debug)]
pub struct OrderedFlowQueue {
    /// Sends requests to the reactor.
    requests: mpsc::UnboundedSender<QueueRequest>,
    /// Our own notifier, handed out by [`OrderedFlowQueue::notifier`].
    notifier: LowWaterNotifier,
    /// The controller's pause state.
    state: watch::Receiver<FlowState>,
}

/// Forwards a channel's buffered-amount events to a [`FlowQueueReactor`].
///
/// Wire this to the channel's "buffered amount low" event (or its
/// "buffered amount changed" event, if that is what the channel offers).
/// Notifiers are cheap to clone and may be used from any thread.
///
/// Notifying a reactor that has already stopped does nothing.
#[derive(Debug, Clone)]
pub struct LowWaterNotifier {
    /// Sends events to the reactor.
    events: mpsc::UnboundedSender<FlowEvent>,
}

/// The task that drains an [`OrderedFlowQueue`] into its [`FlowController`].
///
/// Must be driven by calling [`run`](FlowQueueReactor::run), typically by
/// spawning it on an executor.  Nothing is ever sent otherwise.
#[derive(Debug)]
#[must_use = "a FlowQueueReactor sends nothing unless you call run()"]
pub struct FlowQueueReactor<C> {
    /// The controller we feed.
    controller: FlowController<C>,
    /// Requests, in submission order.
    requests: mpsc::UnboundedReceiver<QueueRequest>,
    /// Events from [`LowWaterNotifier`]s.
    events: mpsc::UnboundedReceiver<FlowEvent>,
    /// The transport failure that broke this queue, if any.
    failure: Option<Error>,
    /// A write taken off the queue while paused, to be sent first on resume.
    deferred: Option<QueueRequest>,
}

/// Why a reactor stopped.
#[derive(Debug)]
enum ReactorError {
    /// The producer went away and everything queued has been handled.
    Shutdown,
    /// We are paused and nothing can ever resume us.
    Stalled,
}

/// Future returned by [`OrderedFlowQueue::write`] and
/// [`OrderedFlowQueue::flush`].
///
/// Resolves to `Ok(())` once the message was handed to the channel (or, for
/// a flush, once every earlier message was), or to the error that prevented
/// it.  Dropping a receipt does not cancel the write.
#[derive(Debug)]
#[pin_project]
#[must_use = "futures do nothing unless polled"]
pub struct WriteReceipt {
    /// Receives the outcome from the reactor.
    ///
    /// Fused because a bare `oneshot::Receiver` has a broken `FusedFuture`
    /// implementation (futures-rs #2455).
    #[pin]
    outcome: Fuse<oneshot::Receiver<Result<()>>>,
}

impl OrderedFlowQueue {
    /// Wrap `controller` in an ordered write queue.
    ///
    /// Returns the producer handle and the reactor.  The caller must arrange
    /// for [`FlowQueueReactor::run`] to be polled.
    pub fn new<C: BufferedChannel>(
        controller: FlowController<C>,
    ) -> (OrderedFlowQueue, FlowQueueReactor<C>) {
        let (requests_tx, requests_rx) = mpsc::unbounded();
        let (events_tx, events_rx) = mpsc::unbounded();
        let queue = OrderedFlowQueue {
            requests: requests_tx,
            notifier: LowWaterNotifier { events: events_tx },
            state: controller.subscribe(),
        };
        let reactor = FlowQueueReactor {
            controller,
            requests: requests_rx,
            events: events_rx,
            failure: None,
            deferred: None,
        };
        (queue, reactor)
    }

    /// Queue `message` to be written to the channel.
    ///
    /// Returns immediately.  The message is written once every message
    /// queued before it has been written and the channel is not paused.
    pub fn write(&self, message: impl Into<Bytes>) -> WriteReceipt {
        let (done, outcome) = oneshot::channel();
        self.submit(QueueRequest::Write {
            message: message.into(),
            done,
        });
        WriteReceipt {
            outcome: outcome.fuse(),
        }
    }

    /// Return a receipt that resolves once every message queued so far has
    /// been written.
    ///
    /// Resolves to [`Error::QueueBroken`] if the queue is broken.
    pub fn flush(&self) -> WriteReceipt {
        let (done, outcome) = oneshot::channel();
        self.submit(QueueRequest::Flush { done });
        WriteReceipt {
            outcome: outcome.fuse(),
        }
    }

    /// Hand `request` to the reactor.
    fn submit(&self, request: QueueRequest) {
        // If the reactor is gone, the request (and its `done` sender) is
        // dropped, and the receipt reports QueueShutdown.
        let _ = self.requests.unbounded_send(request);
    }

    /// Return a notifier for the channel's buffered-amount events.
    pub fn notifier(&self) -> LowWaterNotifier {
        self.notifier.clone()
    }

    /// Return true if the controller is currently paused.
    ///
    /// Writes are still accepted while paused; they are just not sent yet.
    pub fn is_paused(&self) -> bool {
        self.state.borrow().is_paused()
    }

    /// Return a future that completes once the controller is not paused.
    ///
    /// Producers that want to avoid piling up messages in application space
    /// can wait for this before writing.
    pub fn ready(&self) -> Ready {
        Ready::from_receiver(self.state.clone())
    }
}

impl LowWaterNotifier {
    /// Report that the channel's buffered amount dropped to or below the
    /// low water mark.
    pub fn buffered_amount_low(&self) {
        self.notify(FlowEvent::BufferedAmountLow);
    }

    /// Report that the channel's buffered amount changed.
    ///
    /// The reactor resumes only if the buffered amount is now at or below
    /// the low water mark.
    pub fn buffered_amount_changed(&self) {
        self.notify(FlowEvent::BufferedAmountChanged);
    }

    /// Send `event` to the reactor, if it is still there.
    fn notify(&self, event: FlowEvent) {
        let _ = self.events.unbounded_send(event);
    }
}

impl<C: BufferedChannel> FlowQueueReactor<C> {
    /// Drain the queue until the [`OrderedFlowQueue`] is dropped and every
    /// queued message has been handled.
    ///
    /// Returns the transport failure that broke the queue, if any.  Returns
    /// [`Error::QueueShutdown`] if the reactor was paused, still holding
    /// messages, when the producer and every [`LowWaterNotifier`] went away;
    /// those messages are rejected with the same error.
    pub async fn run(mut self) -> Result<()> {
        debug!("{}: Running flow queue reactor", self.label());
        let result: Result<()> = loop {
            match self.run_once().await {
                Ok(()) => (),
                Err(ReactorError::Shutdown) => break self.failure.take().map_or(Ok(()), Err),
                Err(ReactorError::Stalled) => {
                    self.reject_pending(&Error::QueueShutdown);
                    break Err(Error::QueueShutdown);
                }
            }
        };
        debug!("{}: Flow queue reactor stopped: {:?}", self.label(), result);
        result
    }

    /// Handle one request or one event.
    async fn run_once(&mut self) -> std::result::Result<(), ReactorError> {
        let paused = self.failure.is_none() && self.controller.is_paused();
        if !paused {
            if let Some(request) = self.deferred.take() {
                self.handle_request(request);
                return Ok(());
            }
        } else if self.deferred.is_some() {
            // Only a notification can make progress now: leave the requests
            // where they are, so the next one waits for its turn.
            return match self.events.next().await {
                Some(event) => {
                    self.handle_event(event);
                    Ok(())
                }
                None => Err(ReactorError::Stalled),
            };
        }

        // Events first, so a burst of writes can't starve them.  A closed
        // event stream is fine while nothing is deferred; select skips it.
        let input = select_biased! {
            event = self.events.next() => event.map(Input::Event),
            request = self.requests.next() => match request {
                Some(request) => Some(Input::Request(request)),
                None => return Err(ReactorError::Shutdown),
            },
            complete => return Err(ReactorError::Shutdown),
        };
        match input {
            Some(Input::Event(event)) => self.handle_event(event),
            Some(Input::Request(request)) if paused => self.defer_request(request),
            Some(Input::Request(request)) => self.handle_request(request),
            None => {}
        }
        Ok(())
    }

    /// Handle a request taken off the queue while paused.
    ///
    /// A flush completes at once, since every write before it has already
    /// been handed to the channel.  A write waits in `deferred`.
    fn defer_request(&mut self, request: QueueRequest) {
        match request {
            flush @ QueueRequest::Flush { .. } => flush.complete(Ok(())),
            write @ QueueRequest::Write { .. } => self.deferred = Some(write),
        }
    }

    /// Apply a buffered-amount event to the controller.
    fn handle_event(&mut self, event: FlowEvent) {
        match event {
            FlowEvent::BufferedAmountLow => self.controller.buffered_amount_low(),
            FlowEvent::BufferedAmountChanged => self.controller.buffered_amount_changed(),
        }
    }

    /// Handle a request from the producer.
    ///
    /// Only called while the controller is not paused, or the queue is
    /// broken.  Requests taken while paused go through `defer_request`.
    fn handle_request(&mut self, request: QueueRequest) {
        if self.failure.is_some() {
            request.complete(Err(Error::QueueBroken));
            return;
        }
        match request {
            QueueRequest::Write { message, done } => {
                trace!("{}: dequeued {} bytes", self.label(), message.len());
                let result = self.controller.write(message);
                if let Err(e @ Error::TransportFailure(_)) = &result {
                    warn!(
                        "{}: send failed, rejecting all further writes: {}",
                        self.label(),
                        e
                    );
                    self.failure = Some(e.clone());
                }
                let _ = done.send(result);
            }
            flush @ QueueRequest::Flush { .. } => flush.complete(Ok(())),
        }
    }

    /// Reject every request still queued with `error`, and refuse new ones.
    ///
    /// Returns the number of requests rejected.
    fn reject_pending(&mut self, error: &Error) -> usize {
        self.requests.close();
        let mut n_rejected = 0_usize;
        if let Some(request) = self.deferred.take() {
            request.complete(Err(error.clone()));
            n_rejected += 1;
        }
        while let Ok(request) = self.requests.try_recv() {
            request.complete(Err(error.clone()));
            n_rejected += 1;
        }
        if n_rejected > 0 {
            warn!(
                "{}: stalled while paused; dropped {} queued writes",
                self.label(),
                n_rejected
            );
        }
        n_rejected
    }

    /// The channel's label, for log messages.
    fn label(&self) -> &str {
        self.controller.channel().label()
    }

    /// Return the controller this reactor feeds.
    pub fn controller(&self) -> &FlowController<C> {
        &self.controller
    }
}

/// Something that woke the reactor.
enum Input {
    /// A buffered-amount event.
    Event(FlowEvent),
    /// A producer request.
    Request(QueueRequest),
}

impl Future for WriteReceipt {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.project()
            .outcome
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(Error::QueueShutdown)))
    }
}

impl FusedFuture for WriteReceipt {
    fn is_terminated(&self) -> bool {
        self.outcome.is_terminated()
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list @@ -->

    use super::*;
    use crate::FlowCtrlConfig;
    use crate::mock::MockChannel;
    use assert_matches::assert_matches;
    use futures::executor::LocalPool;
    use futures::future::RemoteHandle;
    use futures::task::LocalSpawnExt as _;
    use tracing_test::traced_test;

    /// A queue over a mock channel, with its reactor spawned on a local pool.
    struct Harness {
        /// Executor; nothing happens until we run it.
        pool: LocalPool,
        /// Test-side handle to the channel.
        chan: MockChannel,
        /// The producer handle.
        queue: Option<OrderedFlowQueue>,
        /// Notifier for the reactor.
        notifier: LowWaterNotifier,
        /// Outcome of `reactor.run()`.
        reactor: RemoteHandle<Result<()>>,
    }

    impl Harness {
        fn new(low: u64, high: u64) -> Self {
            let pool = LocalPool::new();
            let chan = MockChannel::new("q");
            let config = FlowCtrlConfig::new(low, high).unwrap();
            let (queue, reactor) = OrderedFlowQueue::new(FlowController::new(chan.clone(), &config));
            let notifier = queue.notifier();
            let reactor = pool.spawner().spawn_local_with_handle(reactor.run()).unwrap();
            Harness {
                pool,
                chan,
                queue: Some(queue),
                notifier,
                reactor,
            }
        }

        fn queue(&self) -> &OrderedFlowQueue {
            self.queue.as_ref().unwrap()
        }

        fn stall(&mut self) {
            self.pool.run_until_stalled();
        }

        /// Simulate the channel draining to `amount`, and firing its event.
        fn drain_to(&mut self, amount: u64) {
            self.chan.set_buffered_amount(amount);
            self.notifier.buffered_amount_low();
            self.stall();
        }

        fn sent(&self) -> Vec<&'static str> {
            self.chan
                .sent()
                .iter()
                .map(|b| match &b[..] {
                    b"A" => "A",
                    b"B" => "B",
                    b"C" => "C",
                    b"D" => "D",
                    _ => "?",
                })
                .collect()
        }
    }

    fn check(receipt: &mut WriteReceipt) -> Option<Result<()>> {
        receipt.now_or_never()
    }

    #[test]
    fn basic_backpressure() {
        let mut h = Harness::new(10, 100);
        let mut big = h.queue().write(vec![0_u8; 150]);
        let mut next = h.queue().write(&b"A"[..]);
        h.stall();

        assert_matches!(check(&mut big), Some(Ok(())));
        assert!(h.queue().is_paused());
        assert_eq!(h.chan.buffered_amount(), 150);
        // Deferred while paused.
        assert_eq!(h.chan.sent().len(), 1);
        assert_matches!(check(&mut next), None);

        h.drain_to(5);
        assert!(!h.queue().is_paused());
        assert_matches!(check(&mut next), Some(Ok(())));
        assert_eq!(h.chan.sent().len(), 2);
        assert_eq!(h.chan.buffered_amount(), 6);
    }

    #[test]
    fn ordering_under_stall() {
        let mut h = Harness::new(1, 2);
        let mut a = h.queue().write(&b"A"[..]);
        let mut b = h.queue().write(&b"B"[..]);
        let mut c = h.queue().write(&b"C"[..]);
        h.stall();

        // A (buffered=1) then B (buffered=2): paused after B.
        assert_matches!(check(&mut a), Some(Ok(())));
        assert_matches!(check(&mut b), Some(Ok(())));
        assert_matches!(check(&mut c), None);
        assert_eq!(h.sent(), vec!["A", "B"]);

        h.drain_to(0);
        assert_matches!(check(&mut c), Some(Ok(())));
        assert_eq!(h.sent(), vec!["A", "B", "C"]);
    }

    #[test]
    fn pause_after_first() {
        // The channel pauses right after A; B and C wait for the resume.
        let mut h = Harness::new(0, 1);
        let receipts: Vec<_> = ["A", "B", "C"]
            .iter()
            .map(|m| h.queue().write(m.as_bytes().to_vec()))
            .collect();
        h.stall();
        assert_eq!(h.sent(), vec!["A"]);

        h.drain_to(0);
        assert_eq!(h.sent(), vec!["A", "B"]);
        h.drain_to(0);
        assert_eq!(h.sent(), vec!["A", "B", "C"]);

        for r in receipts {
            assert_matches!(r.now_or_never(), Some(Ok(())));
        }
    }

    #[test]
    fn spurious_notifications() {
        let mut h = Harness::new(10, 100);
        h.notifier.buffered_amount_low();
        h.notifier.buffered_amount_changed();
        h.stall();
        assert!(!h.queue().is_paused());

        // While paused, a "changed" event above the low mark doesn't resume.
        let _ = h.queue().write(vec![0_u8; 100]);
        let mut next = h.queue().write(&b"D"[..]);
        h.stall();
        assert!(h.queue().is_paused());
        h.chan.set_buffered_amount(50);
        h.notifier.buffered_amount_changed();
        h.stall();
        assert!(h.queue().is_paused());
        assert_matches!(check(&mut next), None);

        h.chan.set_buffered_amount(10);
        h.notifier.buffered_amount_changed();
        h.stall();
        assert_matches!(check(&mut next), Some(Ok(())));
    }

    #[test]
    fn flush_waits_for_earlier_writes() {
        let mut h = Harness::new(0, 1);
        let _ = h.queue().write(&b"A"[..]);
        let _ = h.queue().write(&b"B"[..]);
        let mut flushed = h.queue().flush();
        h.stall();
        assert_matches!(check(&mut flushed), None);

        h.drain_to(0);
        assert_matches!(check(&mut flushed), Some(Ok(())));
        assert_eq!(h.sent(), vec!["A", "B"]);
    }

    #[test]
    fn flush_completes_while_paused() {
        let mut h = Harness::new(10, 100);
        let mut big = h.queue().write(vec![0_u8; 150]);
        let mut flushed = h.queue().flush();
        h.stall();
        assert!(h.queue().is_paused());
        assert_matches!(check(&mut big), Some(Ok(())));
        // The write was handed over; the pause doesn't hold up the flush.
        assert_matches!(check(&mut flushed), Some(Ok(())));

        // A flush behind a deferred write still waits for that write.
        let mut next = h.queue().write(&b"A"[..]);
        let mut flushed = h.queue().flush();
        h.stall();
        assert_matches!(check(&mut next), None);
        assert_matches!(check(&mut flushed), None);
        h.drain_to(0);
        assert_matches!(check(&mut next), Some(Ok(())));
        assert_matches!(check(&mut flushed), Some(Ok(())));
    }

    #[test]
    fn producer_dropped_while_paused_and_idle() {
        let mut h = Harness::new(0, 1);
        let mut a = h.queue().write(&b"A"[..]);
        h.stall();
        assert!(h.queue().is_paused());
        assert_matches!(check(&mut a), Some(Ok(())));

        // Nothing left to send: the reactor stops cleanly.
        drop(h.queue.take());
        h.stall();
        drop(h.notifier);
        assert_matches!(h.pool.run_until(h.reactor), Ok(()));
    }

    #[test]
    fn transport_failure_breaks_queue() {
        let mut h = Harness::new(10, 100);
        let mut a = h.queue().write(&b"A"[..]);
        let mut b = h.queue().write(&b"B"[..]);
        let mut c = h.queue().write(&b"C"[..]);
        h.chan.fail_next_send("remote closed");
        h.stall();
        assert_matches!(check(&mut a), Some(Err(Error::TransportFailure(_))));
        assert_matches!(check(&mut b), Some(Err(Error::QueueBroken)));
        assert_matches!(check(&mut c), Some(Err(Error::QueueBroken)));
        assert!(h.chan.sent().is_empty());

        // Later writes are rejected too, without touching the channel.
        let mut d = h.queue().write(&b"D"[..]);
        let mut f = h.queue().flush();
        h.stall();
        assert_matches!(check(&mut d), Some(Err(Error::QueueBroken)));
        assert_matches!(check(&mut f), Some(Err(Error::QueueBroken)));
        assert!(h.chan.sent().is_empty());

        // The reactor reports the failure once the producer is gone.
        drop(h.queue.take());
        drop(h.notifier);
        let result = h.pool.run_until(h.reactor);
        assert_matches!(result, Err(Error::TransportFailure(_)));
    }

    #[test]
    fn failure_mid_queue() {
        let mut h = Harness::new(10, 100);
        let mut a = h.queue().write(&b"A"[..]);
        h.stall();
        assert_matches!(check(&mut a), Some(Ok(())));

        h.chan.close();
        let mut b = h.queue().write(&b"B"[..]);
        let mut c = h.queue().write(&b"C"[..]);
        h.stall();
        assert_matches!(check(&mut b), Some(Err(Error::TransportFailure(_))));
        assert_matches!(check(&mut c), Some(Err(Error::QueueBroken)));
        assert_eq!(h.sent(), vec!["A"]);
    }

    #[test]
    fn drop_producer_drains_queue() {
        let mut h = Harness::new(0, 2);
        let receipts: Vec<_> = (0..5).map(|_| h.queue().write(&b"A"[..])).collect();
        drop(h.queue.take());
        h.stall();
        assert_eq!(h.chan.sent().len(), 2);

        h.drain_to(0);
        h.drain_to(0);
        assert_eq!(h.chan.sent().len(), 5);

        drop(h.notifier);
        assert_matches!(h.pool.run_until(h.reactor), Ok(()));
        for r in receipts {
            assert_matches!(r.now_or_never(), Some(Ok(())));
        }
    }

    #[test]
    fn stalled_reactor_rejects_pending() {
        let mut h = Harness::new(0, 1);
        let mut a = h.queue().write(&b"A"[..]);
        let mut b = h.queue().write(&b"B"[..]);
        h.stall();
        assert_matches!(check(&mut a), Some(Ok(())));

        // Nobody is left who could ever resume the reactor.
        assert_eq!(h.sent(), vec!["A"]);
        drop(h.queue.take());
        drop(h.notifier);
        assert_matches!(h.pool.run_until(h.reactor), Err(Error::QueueShutdown));
        assert_matches!(check(&mut b), Some(Err(Error::QueueShutdown)));
        assert_eq!(h.chan.sent().len(), 1);
    }

    #[test]
    fn reactor_never_run() {
        let chan = MockChannel::new("idle");
        let (queue, reactor) = OrderedFlowQueue::new(FlowController::with_defaults(chan.clone()));
        let receipt = queue.write(&b"A"[..]);
        assert_eq!(reactor.controller().high_water_mark(), 1024 * 1024);
        drop(reactor);
        assert_matches!(receipt.now_or_never(), Some(Err(Error::QueueShutdown)));
        assert_matches!(
            queue.write(&b"B"[..]).now_or_never(),
            Some(Err(Error::QueueShutdown))
        );
        assert!(chan.sent().is_empty());
    }

    #[test]
    fn ready_tracks_pause() {
        let mut h = Harness::new(10, 100);
        assert_eq!(h.queue().ready().now_or_never(), Some(()));

        let _ = h.queue().write(vec![0_u8; 100]);
        h.stall();
        let mut ready = Box::pin(h.queue().ready());
        assert_eq!(ready.as_mut().now_or_never(), None);

        h.drain_to(0);
        assert_eq!(ready.as_mut().now_or_never(), Some(()));
    }

    #[test]
    fn fifo_under_random_drains() {
        // A deterministic pseudo-random schedule of writes and drains.
        let mut h = Harness::new(4, 16);
        let mut seed: u32 = 0x2545_f491;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed
        };

        let mut expected = Vec::new();
        let mut receipts = Vec::new();
        for i in 0_u32..200 {
            let len = (next() % 8 + 1) as usize;
            let mut msg = i.to_be_bytes().to_vec();
            msg.resize(4 + len, 0);
            expected.push(Bytes::from(msg.clone()));
            receipts.push(h.queue().write(msg));
            if next() % 3 == 0 {
                h.stall();
                if h.queue().is_paused() {
                    // The controller only pauses at or past the high mark.
                    assert!(h.chan.buffered_amount() >= 16);
                    h.drain_to(u64::from(next() % 5));
                }
            }
        }
        while h.chan.sent().len() < expected.len() {
            h.drain_to(0);
        }
        assert_eq!(h.chan.sent(), expected);
        for r in receipts {
            assert_matches!(r.now_or_never(), Some(Ok(())));
        }
    }

    #[test]
    #[traced_test]
    fn logs_failure() {
        let mut h = Harness::new(10, 100);
        h.chan.close();
        let _ = h.queue().write(&b"A"[..]);
        h.stall();
        assert!(logs_contain("q: send failed, rejecting all further writes"));
    }
}
