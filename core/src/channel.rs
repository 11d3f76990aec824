//! The client-facing duplex channel seen by the terminal bridge and the
//! resource monitor.

use crate::errors::ChannelError;

/// One persistent text channel to a client (a WebSocket in the server).
///
/// Implementations must be cheap to call from blocking threads: `send`
/// only enqueues and never waits on the network.
pub trait ClientChannel: Send + Sync {
    /// Unique id of this channel. Terminal sessions are keyed by it.
    fn id(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Queue one text frame. Fails once the channel is closed.
    fn send(&self, text: &str) -> Result<(), ChannelError>;

    /// Close the channel. Idempotent.
    fn close(&self);
}
