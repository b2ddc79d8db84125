//! Define an error type for the buffered-flowctl crate.
use std::sync::Arc;
use thiserror::Error;

/// An error that occurred while writing to a flow-controlled channel.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Tried to write to a [`FlowController`](crate::FlowController) while it
    /// was paused.
    ///
    /// Callers using the controller directly must wait for
    /// [`FlowController::ready`](crate::FlowController::ready) first.
    /// This never happens to writes made through an
    /// [`OrderedFlowQueue`](crate::OrderedFlowQueue).
    #[error("Unable to write, channel is paused")]
    ChannelPaused,
    /// The underlying channel refused the message.
    #[error("Transport failure while sending on channel")]
    TransportFailure(#[source] Arc<dyn std::error::Error + Send + Sync + 'static>),
    /// The message was not sent, because an earlier write on the same queue
    /// failed with a transport failure.
    ///
    /// The queue will not touch its channel again; it has to be rebuilt.
    #[error("Not sent: an earlier write on this queue failed")]
    QueueBroken,
    /// The queue's reactor stopped before the message could be sent.
    #[error("Flow queue reactor has shut down")]
    QueueShutdown,
}

impl Error {
    /// Wrap an error returned by a channel's `send` as a
    /// [`TransportFailure`](Error::TransportFailure).
    pub(crate) fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::TransportFailure(Arc::new(err))
    }
}

/// A Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
