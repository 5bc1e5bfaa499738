//! Per-request event bus: a broadcast channel plus a monotonic sequence
//! counter, so every wire event carries `request_id` and an increasing
//! `seq` as the streaming interface requires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::models::{PipelineEvent, WireEvent};

const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    request_id: String,
    sender: broadcast::Sender<PipelineEvent>,
    seq: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(request_id: String) -> Self {
        let (sender, _receiver) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { request_id, sender, seq: Arc::new(AtomicU64::new(0)) }
    }

    pub fn sender(&self) -> broadcast::Sender<PipelineEvent> {
        self.sender.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn wrap(&self, event: PipelineEvent) -> WireEvent {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        WireEvent { request_id: self.request_id.clone(), seq, event }
    }
}
