//! Bounded multi-consumer work queue between the producer and the consumers

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::model::RawLine;

/// Default number of lines the queue holds before the producer blocks
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Unit of work handed to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Line(RawLine),
    /// Tells exactly one consumer to flush and exit
    Shutdown,
}

/// Returned when every receiver is gone and the item can never be taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("all queue consumers have exited")]
pub struct Disconnected;

/// Create a bounded queue. The capacity is at least one slot.
pub fn work_queue(capacity: usize) -> (WorkSender, WorkReceiver) {
    let (sender, receiver) = bounded(capacity.max(1));
    (WorkSender { sender }, WorkReceiver { receiver })
}

/// Producer side; `push` blocks while the queue is full
#[derive(Debug, Clone)]
pub struct WorkSender {
    sender: Sender<WorkItem>,
}

impl WorkSender {
    pub fn push(&self, item: WorkItem) -> Result<(), Disconnected> {
        self.sender.send(item).map_err(|_| Disconnected)
    }

    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.sender.capacity()
    }
}

/// Consumer side; cloned once per consumer
#[derive(Debug, Clone)]
pub struct WorkReceiver {
    receiver: Receiver<WorkItem>,
}

impl WorkReceiver {
    /// Block until an item arrives. `None` once every sender is gone and the
    /// queue is drained.
    pub fn pop(&self) -> Option<WorkItem> {
        self.receiver.recv().ok()
    }
}

impl IntoIterator for WorkReceiver {
    type Item = WorkItem;
    type IntoIter = crossbeam_channel::IntoIter<WorkItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.receiver.into_iter()
    }
}
