//! API shared state

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::ProbeKind;
use crate::actors::broadcaster::BroadcasterHandle;
use crate::actors::collector::Collector;
use crate::metrics::{SnapshotBuilder, WindowAggregator};
use crate::storage::SampleStore;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Sample store for raw series and health
    pub store: Arc<dyn SampleStore>,

    /// Window statistics for the windows endpoint
    pub aggregator: WindowAggregator,

    /// Snapshot builder for on-demand snapshots
    pub snapshots: SnapshotBuilder,

    /// Live broadcaster owned by the listener
    pub broadcaster: BroadcasterHandle,

    /// Collector per enabled probe type (for ad-hoc probes)
    pub collectors: Arc<HashMap<ProbeKind, Arc<dyn Collector>>>,

    /// Cancelled when open connections must end without waiting further
    pub terminate: CancellationToken,
}

impl ApiState {
    /// Create the state and spawn the live broadcaster
    pub fn new(
        aggregator: WindowAggregator,
        snapshots: SnapshotBuilder,
        push_interval: Duration,
        collectors: HashMap<ProbeKind, Arc<dyn Collector>>,
    ) -> Self {
        let broadcaster = BroadcasterHandle::spawn(snapshots.clone(), push_interval);

        Self {
            store: aggregator.store().clone(),
            aggregator,
            snapshots,
            broadcaster,
            collectors: Arc::new(collectors),
            terminate: CancellationToken::new(),
        }
    }
}
