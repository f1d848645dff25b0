//! In-memory channel with a scripted inbound side, for driver tests.

use bytes::Bytes;
use std::collections::VecDeque;
use std::time::Duration;

use crate::channel::{Channel, Recv};
use crate::error::ChannelError;

#[derive(Debug, Default)]
pub(crate) struct ScriptedChannel {
    pub incoming: VecDeque<Recv>,
    pub sent: Vec<Bytes>,
    /// Once `incoming` is empty, report the peer as gone instead of timing out.
    pub close_when_drained: bool,
    /// Every `send` fails as if the peer had already hung up.
    pub refuse_sends: bool,
}

impl ScriptedChannel {
    pub fn push_data(&mut self, bytes: &'static [u8]) {
        self.incoming.push_back(Recv::Data(Bytes::from_static(bytes)));
    }

    pub fn push_timeout(&mut self) {
        self.incoming.push_back(Recv::Timeout);
    }
}

impl Channel for ScriptedChannel {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        if self.refuse_sends {
            return Err(ChannelError::Closed);
        }
        self.sent.push(Bytes::copy_from_slice(bytes));
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Recv, ChannelError> {
        match self.incoming.pop_front() {
            Some(Recv::Data(bytes)) => Ok(Recv::Data(bytes)),
            None if self.close_when_drained => Err(ChannelError::Closed),
            Some(Recv::Timeout) | None => {
                tokio::time::sleep(timeout).await;
                Ok(Recv::Timeout)
            }
        }
    }
}
