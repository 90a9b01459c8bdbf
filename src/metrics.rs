//! (ambient) Metrics registry and counter/histogram handles for the
//! Dispatch Engine (C7), per spec.md §4.6/§6. The `/metrics` HTTP endpoint
//! itself is an external collaborator (spec.md §1); this module only owns
//! the `prometheus` registry and the handles `dispatch.rs` increments.
//!
//! Enrichment from the retrieved pack's `grove-pg-stream`/`pgtrickle-relay`
//! dependency stack, which already pairs `prometheus` with `axum` for this
//! exact purpose (see DESIGN.md).

use prometheus::{
    HistogramVec, IntCounterVec, Opts, Registry,
    exponential_buckets,
};

/// The four metrics spec.md §4.6 names, pre-registered against a single
/// `prometheus::Registry` owned by the `Manager`.
pub struct Metrics {
    registry: Registry,
    pub transformation_errors_total: IntCounterVec,
    pub publish_errors_total: IntCounterVec,
    pub processed_events_total: IntCounterVec,
    pub event_processing_duration_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transformation_errors_total = IntCounterVec::new(
            Opts::new(
                "transformation_errors_total",
                "Transformation stage failures, isolated to one event/sink",
            ),
            &["stage", "pipeline", "source", "sink"],
        )
        .expect("static metric definition");

        let publish_errors_total = IntCounterVec::new(
            Opts::new("publish_errors_total", "Sink publish call failures"),
            &["sink"],
        )
        .expect("static metric definition");

        let processed_events_total = IntCounterVec::new(
            Opts::new(
                "processed_events_total",
                "Events successfully dispatched to a sink",
            ),
            &["pipeline", "source", "sink"],
        )
        .expect("static metric definition");

        let event_processing_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "event_processing_duration_seconds",
                "Time spent applying transformations and publishing one event",
            )
            .buckets(exponential_buckets(0.0005, 2.0, 16).expect("static buckets")),
            &["pipeline", "source", "sink"],
        )
        .expect("static metric definition");

        registry
            .register(Box::new(transformation_errors_total.clone()))
            .expect("single registration");
        registry
            .register(Box::new(publish_errors_total.clone()))
            .expect("single registration");
        registry
            .register(Box::new(processed_events_total.clone()))
            .expect("single registration");
        registry
            .register(Box::new(event_processing_duration_seconds.clone()))
            .expect("single registration");

        Self {
            registry,
            transformation_errors_total,
            publish_errors_total,
            processed_events_total,
            event_processing_duration_seconds,
        }
    }

    /// The underlying registry, handed to an `axum` `/metrics` route by
    /// whatever wires the HTTP endpoint (left to `main.rs`, see
    /// SPEC_FULL.md §4.6 — the endpoint itself is out of scope).
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_independently_per_label_set() {
        let metrics = Metrics::new();
        metrics
            .publish_errors_total
            .with_label_values(&["diag"])
            .inc();
        metrics
            .publish_errors_total
            .with_label_values(&["other"])
            .inc_by(2);
        assert_eq!(metrics.publish_errors_total.with_label_values(&["diag"]).get(), 1);
        assert_eq!(metrics.publish_errors_total.with_label_values(&["other"]).get(), 2);
    }

    #[test]
    fn registry_exposes_registered_families() {
        let metrics = Metrics::new();
        let families = metrics.registry().gather();
        let names: Vec<_> = families.iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"processed_events_total".to_string()));
        assert!(names.contains(&"event_processing_duration_seconds".to_string()));
    }
}
