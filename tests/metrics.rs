// tests/metrics.rs

mod common;

use std::time::{Duration, Instant};

use common::*;
use ingestflow::metrics::{spawn_metrics_sink, MetricsEvent, MetricsSender, MetricsSink};
use ingestflow::types::UnitType;

struct SlowSink;

impl MetricsSink for SlowSink {
    fn record(&mut self, _event: MetricsEvent) {
        std::thread::sleep(Duration::from_millis(200));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn emitting_never_waits_for_a_slow_sink() {
    init_tracing();
    let (sender, _task) = spawn_metrics_sink(Box::new(SlowSink), 1);

    let started = Instant::now();
    for _ in 0..1_000 {
        sender.emit(MetricsEvent::PackageStarted {
            unit: UnitType::Transfer,
        });
    }
    assert!(
        started.elapsed() < Duration::from_millis(150),
        "emit blocked for {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn events_reach_the_sink_in_order() {
    init_tracing();
    let sink = RecordingSink::new();
    let (sender, _task) = spawn_metrics_sink(sink.boxed(), 16);

    sender.emit(MetricsEvent::PackageStarted { unit: UnitType::Sip });
    sender.emit(MetricsEvent::JobCompleted {
        link: "verify".into(),
        script: "check".into(),
    });
    sender.emit(MetricsEvent::PackageCompleted { unit: UnitType::Sip });

    with_timeout(wait_until(|| sink.events().len() == 3)).await;
    assert_eq!(
        sink.events(),
        vec![
            MetricsEvent::PackageStarted { unit: UnitType::Sip },
            MetricsEvent::JobCompleted {
                link: "verify".into(),
                script: "check".into(),
            },
            MetricsEvent::PackageCompleted { unit: UnitType::Sip },
        ]
    );
}

#[test]
fn disabled_sender_drops_everything() {
    let sender = MetricsSender::disabled();
    sender.emit(MetricsEvent::PackageFailed {
        unit: UnitType::Dip,
    });
}
