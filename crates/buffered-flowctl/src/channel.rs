//! The outbound channel that a [`FlowController`](crate::FlowController) drives.

use bytes::Bytes;

/// A message channel with a bounded outbound buffer.
///
/// This is the sender-side surface of something like a WebRTC data channel:
/// `send` only enqueues the message into a local buffer, which the channel
/// transmits to the peer at its own pace.  The buffer has a finite (and
/// usually unspecified) capacity; exceeding it may close the channel.
///
/// Implementations are expected to fire a "buffered amount low" event
/// whenever [`buffered_amount`](BufferedChannel::buffered_amount) drops to
/// or below the threshold set with
/// [`set_buffered_amount_low_threshold`](BufferedChannel::set_buffered_amount_low_threshold).
/// That event is not part of this trait: the owner of the channel forwards
/// it to [`FlowController::buffered_amount_low`](crate::FlowController::buffered_amount_low),
/// or to a [`LowWaterNotifier`](crate::LowWaterNotifier).
pub trait BufferedChannel {
    /// The error returned when the channel cannot accept a message at all.
    ///
    /// This indicates a transport failure (e.g. the channel was closed),
    /// not backpressure.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Enqueue `message` for delivery to the remote side.
    fn send(&mut self, message: Bytes) -> Result<(), Self::Error>;

    /// Return the number of bytes enqueued but not yet transmitted.
    fn buffered_amount(&self) -> u64;

    /// Set the buffered amount at or below which the channel fires its
    /// "buffered amount low" event.
    fn set_buffered_amount_low_threshold(&mut self, threshold: u64);

    /// A human-readable name for this channel, used in log messages.
    fn label(&self) -> &str;
}
