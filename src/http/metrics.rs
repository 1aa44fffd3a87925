use dashmap::DashMap;
use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

/// Distinct `path` label values before new paths are folded together.
pub const MAX_PATH_LABELS: usize = 128;

/// Label used for paths seen after the label set is full.
pub const OVERFLOW_PATH_LABEL: &str = "other";

lazy_static! {
    pub static ref REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "app_requests_total",
        "Total HTTP requests",
        &["path"]
    )
    .unwrap();
    pub static ref DECISIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ratelimit_decisions_total",
        "Rate limit decisions by outcome",
        &["decision"]
    )
    .unwrap();
    static ref PATH_LABELS: PathLabels = PathLabels::new(MAX_PATH_LABELS);
}

/// Bounded set of request paths that get their own label value.
///
/// Concurrent first sightings may overshoot `max` by at most the number of
/// racing requests.
#[derive(Debug)]
pub struct PathLabels {
    seen: DashMap<String, ()>,
    max: usize,
}

impl PathLabels {
    pub fn new(max: usize) -> Self {
        Self {
            seen: DashMap::new(),
            max,
        }
    }

    /// The label value to record `path` under.
    pub fn label<'a>(&self, path: &'a str) -> &'a str {
        if self.seen.contains_key(path) {
            return path;
        }
        if self.seen.len() < self.max {
            self.seen.insert(path.to_string(), ());
            return path;
        }
        OVERFLOW_PATH_LABEL
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Count one served request for `path`.
pub fn record_request(path: &str) {
    REQUESTS_TOTAL
        .with_label_values(&[PATH_LABELS.label(path)])
        .inc();
}

/// Render the default registry in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_labels_are_capped() {
        let labels = PathLabels::new(3);

        for path in ["/a", "/b", "/c"] {
            assert_eq!(labels.label(path), path);
        }
        assert_eq!(labels.label("/d"), OVERFLOW_PATH_LABEL);
        assert_eq!(labels.label("/e"), OVERFLOW_PATH_LABEL);
        assert_eq!(labels.len(), 3);
    }

    #[test]
    fn test_known_path_keeps_its_label_when_full() {
        let labels = PathLabels::new(1);

        assert_eq!(labels.label("/health-check"), "/health-check");
        assert_eq!(labels.label("/other-path"), OVERFLOW_PATH_LABEL);
        assert_eq!(labels.label("/health-check"), "/health-check");
    }
}
