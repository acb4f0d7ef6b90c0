use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::{Error, Result};

/// Outcome of a blocking receive.
#[derive(Debug, PartialEq, Eq)]
pub enum Recv<T> {
    Item(T),
    /// The deadline passed with the queue still open and empty.
    TimedOut,
    /// The queue is closed and every admitted item has been received.
    Closed,
}

/// Unbounded FIFO hand-off from many producers to a single consumer.
///
/// The only [`Sender`] lives behind a lock: `send` holds it shared and `close` takes
/// it exclusively and drops it. An item is therefore either admitted before the close
/// and will be received, or rejected with [`Error::ChannelClosed`]. The receiver only
/// reports disconnection once everything admitted has been taken off the queue.
pub struct DeliveryChannel<T> {
    sender: RwLock<Option<Sender<T>>>,
    receiver: Receiver<T>,
    admitted: AtomicU64,
    rejected: AtomicU64,
}

impl<T> Default for DeliveryChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DeliveryChannel<T> {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender: RwLock::new(Some(sender)),
            receiver,
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Enqueue `item`. Never blocks beyond the internal lock.
    pub fn send(&self, item: T) -> Result<()> {
        let sender = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        // the receiver is owned by the channel, so an open sender never sees a disconnect
        match sender.as_ref().map(|tx| tx.send(item)) {
            Some(Ok(())) => {
                self.admitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Some(Err(_)) | None => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(Error::ChannelClosed)
            }
        }
    }

    /// Block until an item is available, the channel is closed and drained, or
    /// `deadline` passes. `None` waits indefinitely.
    pub fn recv_until(&self, deadline: Option<Instant>) -> Recv<T> {
        match deadline {
            None => match self.receiver.recv() {
                Ok(item) => Recv::Item(item),
                Err(_) => Recv::Closed,
            },
            Some(deadline) => match self.receiver.recv_deadline(deadline) {
                Ok(item) => Recv::Item(item),
                Err(RecvTimeoutError::Timeout) => Recv::TimedOut,
                Err(RecvTimeoutError::Disconnected) => Recv::Closed,
            },
        }
    }

    /// Receive without blocking.
    pub fn try_recv(&self) -> Recv<T> {
        match self.receiver.try_recv() {
            Ok(item) => Recv::Item(item),
            Err(TryRecvError::Empty) => Recv::TimedOut,
            Err(TryRecvError::Disconnected) => Recv::Closed,
        }
    }

    /// Stop admitting items. Returns `true` for the call that actually closed it.
    pub fn close(&self) -> bool {
        self.sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    /// Close and throw away everything still queued, returning how many items were
    /// discarded.
    pub fn close_and_discard(&self) -> usize {
        self.close();
        self.receiver.try_iter().count()
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Items currently waiting to be received.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Items accepted by `send` since creation.
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Items refused by `send` because the channel was closed.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}
