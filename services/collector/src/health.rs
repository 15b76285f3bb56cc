//! Runtime metrics exposed through the health server

use health_check::HealthSource;
use std::sync::Arc;

use crate::metrics::RuntimeMetrics;
use crate::queue::EnvelopeQueue;

pub struct CollectorHealth {
    service_name: String,
    metrics: Arc<RuntimeMetrics>,
    queue: Arc<EnvelopeQueue>,
}

impl CollectorHealth {
    pub fn new(service_name: impl Into<String>, metrics: Arc<RuntimeMetrics>, queue: Arc<EnvelopeQueue>) -> Self {
        Self {
            service_name: service_name.into(),
            metrics,
            queue,
        }
    }
}

impl HealthSource for CollectorHealth {
    fn service_name(&self) -> &str {
        &self.service_name
    }

    fn is_ready(&self) -> bool {
        self.metrics.is_ready()
    }

    fn metrics(&self) -> serde_json::Value {
        serde_json::to_value(self.metrics.snapshot(self.queue.depth()))
            .unwrap_or(serde_json::Value::Null)
    }
}
