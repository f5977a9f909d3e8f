//! Control-channel abstraction
//!
//! The controller talks to each router over a control channel established
//! when the router authenticates. The transport behind it is a collaborator;
//! the core only depends on sending envelopes.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::message::Message;

/// Send side of a router's control channel
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Fire-and-forget send.
    async fn send(&self, msg: Message) -> Result<(), ChannelError>;

    /// Send, failing with [`ChannelError::Timeout`] if the message cannot
    /// be put on the wire within `timeout`.
    async fn send_with_timeout(&self, msg: Message, timeout: Duration) -> Result<(), ChannelError>;
}

/// Channel that records sent messages, for tests and simulation
#[derive(Default)]
pub struct RecordingChannel {
    sent: std::sync::Mutex<Vec<Message>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().expect("recording channel poisoned").clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("recording channel poisoned").len()
    }
}

#[async_trait]
impl ControlChannel for RecordingChannel {
    async fn send(&self, msg: Message) -> Result<(), ChannelError> {
        self.sent.lock().expect("recording channel poisoned").push(msg);
        Ok(())
    }

    async fn send_with_timeout(
        &self,
        msg: Message,
        _timeout: Duration,
    ) -> Result<(), ChannelError> {
        self.send(msg).await
    }
}

/// Channel whose sends always fail, for fault-path tests
pub struct DownChannel;

#[async_trait]
impl ControlChannel for DownChannel {
    async fn send(&self, _msg: Message) -> Result<(), ChannelError> {
        Err(ChannelError::Closed)
    }

    async fn send_with_timeout(
        &self,
        _msg: Message,
        _timeout: Duration,
    ) -> Result<(), ChannelError> {
        Err(ChannelError::Closed)
    }
}
