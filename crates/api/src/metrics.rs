use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static ACCESS_DECISIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static YEAR_LIFECYCLE_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new("collegecm_http_requests_total", "API HTTP request count."),
                &["route", "method", "status"],
            )
            .expect("create collegecm_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "collegecm_http_request_duration_seconds",
                    "API HTTP request duration in seconds.",
                )
                .buckets(vec![
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
                &["route", "method", "outcome"],
            )
            .expect("create collegecm_http_request_duration_seconds"),
        )
    })
}

fn access_decisions_total() -> &'static IntCounterVec {
    ACCESS_DECISIONS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "collegecm_access_decisions_total",
                    "Access evaluator decisions by check and result.",
                ),
                &["check", "decision"],
            )
            .expect("create collegecm_access_decisions_total"),
        )
    })
}

fn year_lifecycle_total() -> &'static IntCounterVec {
    YEAR_LIFECYCLE_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "collegecm_year_lifecycle_total",
                    "Academic year open and close attempts.",
                ),
                &["operation", "outcome"],
            )
            .expect("create collegecm_year_lifecycle_total"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();

    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    http_request_duration_seconds()
        .with_label_values(&[route, method, outcome])
        .observe(duration.as_secs_f64());
}

/// `check` is one of `read`, `write`, `stage_write` or `custom`.
pub fn observe_access_decision(check: &str, decision: &str) {
    access_decisions_total()
        .with_label_values(&[check, decision])
        .inc();
}

pub fn observe_year_lifecycle(operation: &str, outcome: &str) {
    year_lifecycle_total()
        .with_label_values(&[operation, outcome])
        .inc();
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = access_decisions_total();
    let _ = year_lifecycle_total();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_text_contains_observed_series() {
        observe_http_request("/v1/years", "GET", 200, Duration::from_millis(3));
        observe_access_decision("read", "absent");
        observe_year_lifecycle("open", "conflict");

        let (body, content_type) = render().unwrap();
        let body = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(body.contains("collegecm_http_requests_total"));
        assert!(body.contains("decision=\"absent\""));
        assert!(body.contains("operation=\"open\""));
    }
}
