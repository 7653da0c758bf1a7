use crate::driver::Driver;
use crate::errors::{IvrError, Result};
use crate::event::{Event, PostOutcome, SlotId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One queued event for one timeslot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub slot: SlotId,
    pub event: Event,
}

/// Producer side of the dispatcher queue
#[derive(Debug, Clone)]
pub struct MessageQueue {
    sender: mpsc::Sender<Message>,
}

/// Consumer side, handed to [`Dispatcher::run`]
pub type MessageReceiver = mpsc::Receiver<Message>;

/// Bounded queue of `(slot, event)` pairs
pub fn message_queue(capacity: usize) -> (MessageQueue, MessageReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (MessageQueue { sender }, receiver)
}

impl MessageQueue {
    /// Queue an event without waiting. Fails when the queue is full or the
    /// dispatcher has stopped.
    pub fn send(&self, slot: SlotId, event: Event) -> Result<()> {
        self.sender
            .try_send(Message { slot, event })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => IvrError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => IvrError::QueueClosed,
            })
    }

    /// Queue an event, waiting for room
    pub async fn send_wait(&self, slot: SlotId, event: Event) -> Result<()> {
        self.sender
            .send(Message { slot, event })
            .await
            .map_err(|_| IvrError::QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Posts queued events so producers never pay for interpreter stepping
pub struct Dispatcher {
    driver: Arc<Driver>,
}

impl Dispatcher {
    pub fn new(driver: Arc<Driver>) -> Self {
        Self { driver }
    }

    /// Post one message; returns `None` for an unknown slot
    pub fn deliver(&self, message: Message) -> Option<PostOutcome> {
        match self.driver.post(message.slot, message.event.clone()) {
            Ok(outcome) => {
                if outcome.is_rejected() {
                    debug!("Dispatched {} rejected by slot {}", message.event, message.slot);
                }
                Some(outcome)
            }
            Err(e) => {
                warn!("Dropping {}: {}", message.event, e);
                None
            }
        }
    }

    /// Post everything already queued; returns how many were delivered
    pub fn drain(&self, receiver: &mut MessageReceiver) -> usize {
        let mut delivered = 0;
        while let Ok(message) = receiver.try_recv() {
            self.deliver(message);
            delivered += 1;
        }
        delivered
    }

    pub async fn run(self, mut receiver: MessageReceiver, cancel: CancellationToken) {
        debug!("Dispatcher started");
        loop {
            let first = tokio::select! {
                _ = cancel.cancelled() => break,
                message = receiver.recv() => message,
            };
            let Some(first) = first else {
                break;
            };
            self.deliver(first);
            self.drain(&mut receiver);
        }
        receiver.close();
        let remaining = self.drain(&mut receiver);
        debug!("Dispatcher stopped, {} messages delivered on the way out", remaining);
    }
}
