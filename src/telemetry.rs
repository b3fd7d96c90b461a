use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;

pub struct Metrics {
    request_counter: Counter<u64>,
    prediction_duration: Histogram<u64>,
    stale_predictions: Counter<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        // TODO: deprecated crate to be replaced with an OLTP exporter
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .unwrap();

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("dogcat_demo");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let prediction_duration = meter
            .u64_histogram("prediction_duration_ms")
            .with_boundaries(duration_boundaries())
            .with_description("Duration of prediction operations in milliseconds")
            .build();

        let stale_predictions = meter
            .u64_counter("stale_predictions_total")
            .with_description("Predictions discarded because a newer upload was issued")
            .build();

        Metrics {
            request_counter,
            prediction_duration,
            stale_predictions,
            registry,
        }
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_prediction_duration(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.prediction_duration.record(duration_ms, &attributes);
    }

    pub fn record_stale_prediction(&self) {
        self.stale_predictions.add(1, &[]);
    }
}

// Dense below 100ms where a warm CPU forward pass lands, coarse above.
fn duration_boundaries() -> Vec<f64> {
    let mut boundaries: Vec<f64> = (10..100).step_by(10).map(|x| x as f64).collect();
    boundaries.extend((100..=1000).step_by(100).map(|x| x as f64));
    boundaries.push(2000.0);
    boundaries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_boundaries() {
        let boundaries = duration_boundaries();

        assert_eq!(boundaries.first(), Some(&10.0));
        assert_eq!(boundaries.last(), Some(&2000.0));
        assert!(boundaries.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
