//! Channel-to-owner event stream.

use omt_core::Tally;

/// Events a channel publishes to its owning sender or receiver over an
/// unbounded mpsc channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The remote peer changed this source's tally state
    TallyChanged(Tally),
    /// The remote peer redirected this connection to another address
    RedirectChanged(String),
    /// The channel is gone: stream closed, reset or failed. Emitted at
    /// most once per channel.
    Disconnected,
}
