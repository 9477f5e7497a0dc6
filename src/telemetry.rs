use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    request_counter: IntCounterVec,
    prediction_duration: HistogramVec,
    prediction_outcomes: IntCounterVec,
    registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("skin_prediction".into()), None)?;

        let request_counter = IntCounterVec::new(
            Opts::new("requests_total", "Total number of requests"),
            &["route"],
        )?;

        let prediction_duration = HistogramVec::new(
            HistogramOpts::new(
                "prediction_duration_ms",
                "Duration of prediction operations in milliseconds",
            )
            .buckets(generate_boundaries(&[(10, 100, 10), (100, 1000, 100), (1000, 10000, 1000)])),
            &["route"],
        )?;

        let prediction_outcomes = IntCounterVec::new(
            Opts::new("predictions_total", "Predictions by outcome"),
            &["outcome"],
        )?;

        registry.register(Box::new(request_counter.clone()))?;
        registry.register(Box::new(prediction_duration.clone()))?;
        registry.register(Box::new(prediction_outcomes.clone()))?;

        Ok(Metrics {
            request_counter,
            prediction_duration,
            prediction_outcomes,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        self.request_counter.with_label_values(&[route]).inc();
    }

    pub fn record_prediction_duration(&self, duration_ms: f64, route: &str) {
        self.prediction_duration
            .with_label_values(&[route])
            .observe(duration_ms);
    }

    pub fn record_prediction_outcome(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.prediction_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Histogram buckets from `(start, end, step)` segments, deduplicated where
/// segments meet.
fn generate_boundaries(segments: &[(u64, u64, usize)]) -> Vec<f64> {
    let mut boundaries: Vec<u64> = Vec::new();
    for &(start, end, step) in segments {
        for bound in (start..=end).step_by(step) {
            if boundaries.last() != Some(&bound) {
                boundaries.push(bound);
            }
        }
    }
    boundaries.into_iter().map(|b| b as f64).collect()
}
