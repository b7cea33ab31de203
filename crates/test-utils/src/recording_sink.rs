use std::sync::{Arc, Mutex};

use ingestflow::metrics::{MetricsEvent, MetricsSink};

/// Metrics sink that keeps every event for later inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<MetricsEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricsEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&MetricsEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    pub fn boxed(&self) -> Box<dyn MetricsSink> {
        Box::new(self.clone())
    }
}

impl MetricsSink for RecordingSink {
    fn record(&mut self, event: MetricsEvent) {
        self.events.lock().unwrap().push(event);
    }
}
