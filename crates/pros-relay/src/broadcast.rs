//! Fan-out of filtered output lines to every connected viewer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use pros_relay_core::{OutputSink, SinkId};

/// Registry of connected sinks plus the publish path.
///
/// The registry lock is held only to mutate or snapshot the sink set,
/// never across an actual delivery. A sink whose delivery fails is pruned
/// on that publish; the others are unaffected. No queuing or backpressure:
/// a slow sink degrades independently.
#[derive(Clone, Default)]
pub struct Broadcaster {
    sinks: Arc<Mutex<HashMap<SinkId, Arc<dyn OutputSink>>>>,
    next_id: Arc<AtomicU64>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink; its id spans subscribe to unsubscribe or first
    /// failed delivery.
    pub fn subscribe(&self, sink: Arc<dyn OutputSink>) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sinks.lock().unwrap().insert(id, sink);
        debug!(%id, "sink subscribed");
        id
    }

    pub fn unsubscribe(&self, id: SinkId) {
        if self.sinks.lock().unwrap().remove(&id).is_some() {
            debug!(%id, "sink unsubscribed");
        }
    }

    /// Number of currently connected sinks.
    pub fn len(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver one line to every sink; prune those whose delivery fails.
    pub async fn publish(&self, line: &str) {
        let current: Vec<(SinkId, Arc<dyn OutputSink>)> = {
            let sinks = self.sinks.lock().unwrap();
            sinks.iter().map(|(id, s)| (*id, Arc::clone(s))).collect()
        };

        let mut dead = Vec::new();
        for (id, sink) in current {
            if let Err(e) = sink.send_line(line).await {
                warn!(%id, error = %e, "sink delivery failed, pruning");
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut sinks = self.sinks.lock().unwrap();
            for id in dead {
                sinks.remove(&id);
            }
        }
    }
}
