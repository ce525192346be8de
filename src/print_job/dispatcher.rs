// src/print_job/dispatcher.rs - Seam to the component that executes lines
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};

use crate::metadata::JobMetadata;

/// Named numeric status values pushed to the dispatcher.
pub type StatusFields = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Accepted,
    /// Not accepted yet; offer the same line again later.
    Busy,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Command rejected: '{line}': {reason}")]
    CommandRejected { line: String, reason: String },
    #[error("Stream registration rejected for {0}")]
    RegistrationRejected(String),
}

/// Executes instruction lines on behalf of the controller.
///
/// Calls are synchronous and must not block; contention is reported as
/// [`DispatchOutcome::Busy`].
pub trait CommandDispatcher: Send {
    fn dispatch(&mut self, line: &str) -> Result<DispatchOutcome, DispatchError>;

    fn set_status(&mut self, fields: &StatusFields);

    /// Announces a job stream. Returning `false` refuses the job.
    fn register_stream(&mut self, virtual_filename: &str, size: u64, metadata: &JobMetadata) -> bool;

    fn unregister(&mut self);
}

/// Messages produced by [`ChannelDispatcher`].
#[derive(Debug, Clone, PartialEq)]
pub enum DispatcherMessage {
    Command(String),
    Status(StatusFields),
    Registered {
        virtual_filename: String,
        size: u64,
        metadata: JobMetadata,
    },
    Unregistered,
}

struct Envelope {
    message: DispatcherMessage,
    _credit: Option<OwnedSemaphorePermit>,
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.message, f)
    }
}

/// Forwards everything, in order, to an executor task.
///
/// Only commands count against the capacity: when `capacity` commands are
/// waiting the dispatcher reads as `Busy`. Registration, status and
/// unregistration always go through. A closed channel rejects.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    sender: mpsc::UnboundedSender<Envelope>,
    credits: Arc<Semaphore>,
}

/// Executor side of a [`ChannelDispatcher`].
#[derive(Debug)]
pub struct DispatcherReceiver {
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

impl DispatcherReceiver {
    /// Next message; receiving a command frees its slot.
    pub async fn recv(&mut self) -> Option<DispatcherMessage> {
        self.receiver.recv().await.map(|envelope| envelope.message)
    }
}

impl ChannelDispatcher {
    pub fn channel(capacity: usize) -> (Self, DispatcherReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let dispatcher = Self {
            sender,
            credits: Arc::new(Semaphore::new(capacity.max(1))),
        };
        (dispatcher, DispatcherReceiver { receiver })
    }

    fn send_control(&self, message: DispatcherMessage) -> bool {
        self.sender
            .send(Envelope {
                message,
                _credit: None,
            })
            .is_ok()
    }
}

impl CommandDispatcher for ChannelDispatcher {
    fn dispatch(&mut self, line: &str) -> Result<DispatchOutcome, DispatchError> {
        let closed = || DispatchError::CommandRejected {
            line: line.to_string(),
            reason: "executor channel closed".to_string(),
        };
        if self.sender.is_closed() {
            return Err(closed());
        }
        let Ok(credit) = self.credits.clone().try_acquire_owned() else {
            return Ok(DispatchOutcome::Busy);
        };
        self.sender
            .send(Envelope {
                message: DispatcherMessage::Command(line.to_string()),
                _credit: Some(credit),
            })
            .map(|()| DispatchOutcome::Accepted)
            .map_err(|_| closed())
    }

    fn set_status(&mut self, fields: &StatusFields) {
        if !self.send_control(DispatcherMessage::Status(fields.clone())) {
            tracing::debug!("Dropped status update: executor channel closed");
        }
    }

    fn register_stream(&mut self, virtual_filename: &str, size: u64, metadata: &JobMetadata) -> bool {
        self.send_control(DispatcherMessage::Registered {
            virtual_filename: virtual_filename.to_string(),
            size,
            metadata: metadata.clone(),
        })
    }

    fn unregister(&mut self) {
        if !self.send_control(DispatcherMessage::Unregistered) {
            tracing::warn!("Failed to send unregister: executor channel closed");
        }
    }
}
