//! Message types for actor communication
//!
//! Commands are sent to a specific actor over its mpsc channel; replies come
//! back on a oneshot channel carried in the command.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

/// Identifier of a live subscriber
pub type SubscriberId = u64;

/// One serialized snapshot, shared by all subscribers of a tick
pub type Frame = Arc<str>;

/// A live subscription handed out by the broadcaster
///
/// Dropping the receiver is enough to unsubscribe: the broadcaster prunes
/// the subscriber on its next tick without building a snapshot for it.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub frames: mpsc::Receiver<Frame>,
}

/// Commands that can be sent to the BroadcasterActor
#[derive(Debug)]
pub enum BroadcasterCommand {
    /// Register a subscriber and send it a snapshot right away
    Subscribe {
        respond_to: oneshot::Sender<Subscription>,
    },

    /// Remove a subscriber (no-op if it is already gone)
    Unsubscribe { id: SubscriberId },

    /// Number of currently registered subscribers
    SubscriberCount { respond_to: oneshot::Sender<usize> },

    /// Stop the timer, release every subscriber and exit
    Close { respond_to: oneshot::Sender<()> },
}

/// Why a frame could not be written to a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberWriteError {
    /// The subscriber went away
    Closed,

    /// The subscriber is not keeping up; this frame is skipped for it
    Full,
}

impl fmt::Display for SubscriberWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriberWriteError::Closed => write!(f, "subscriber disconnected"),
            SubscriberWriteError::Full => write!(f, "subscriber queue full"),
        }
    }
}

impl std::error::Error for SubscriberWriteError {}

impl<T> From<mpsc::error::TrySendError<T>> for SubscriberWriteError {
    fn from(err: mpsc::error::TrySendError<T>) -> Self {
        match err {
            mpsc::error::TrySendError::Closed(_) => SubscriberWriteError::Closed,
            mpsc::error::TrySendError::Full(_) => SubscriberWriteError::Full,
        }
    }
}

/// Result of an out-of-schedule probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Row id of the stored sample
    pub id: i64,
    pub ts: i64,
    pub target: String,
    pub success: bool,
}
