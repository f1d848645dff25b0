use bytes::Bytes;
use std::time::Duration;

use crate::error::ChannelError;

/// Outcome of a bounded wait on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recv {
    /// Bytes as the stream delivered them: any number of frames, possibly split.
    Data(Bytes),
    /// Nothing arrived in time. Not an error; the sender retransmits on it.
    Timeout,
}

/// The byte stream both protocol ends talk over.
/// The protocol never opens or closes a channel; whoever builds one owns its lifetime.
#[allow(async_fn_in_trait)]
pub trait Channel {
    /// Write all of `bytes` to the peer.
    async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError>;

    /// Wait up to `timeout` for the next chunk from the peer.
    ///
    /// End of stream is reported as [`ChannelError::Closed`], never as empty data.
    async fn receive(&mut self, timeout: Duration) -> Result<Recv, ChannelError>;
}
