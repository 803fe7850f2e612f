use std::{sync::Arc, time::Instant};

use axum::{
    body::Body, extract::Extension, http::Request, middleware::Next,
    response::Response,
};
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter, UpDownCounter},
};

/// Request instruments for the gateway's HTTP surface.
#[derive(Clone)]
pub struct HttpMetrics {
    requests_total: Counter<u64>,
    request_duration_seconds: Histogram<f64>,
    active_requests: UpDownCounter<i64>,
    errors_total: Counter<u64>,
}

impl HttpMetrics {
    pub fn new() -> Self {
        let meter: Meter = opentelemetry::global::meter("tokdir-gateway");
        Self {
            requests_total: meter
                .u64_counter("http_requests_total")
                .with_description("Total HTTP requests")
                .build(),
            request_duration_seconds: meter
                .f64_histogram("http_request_duration_seconds")
                .with_description("HTTP request duration in seconds")
                .build(),
            active_requests: meter
                .i64_up_down_counter("http_active_requests")
                .with_description("In-flight HTTP requests")
                .build(),
            errors_total: meter
                .u64_counter("http_errors_total")
                .with_description("HTTP responses with status 4xx or 5xx")
                .build(),
        }
    }
}

impl Default for HttpMetrics {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn otel_metrics(
    Extension(metrics): Extension<Arc<HttpMetrics>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // the matched route keeps device ids out of the label set
    let route = req
        .extensions()
        .get::<axum::extract::MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let mut attrs = vec![
        KeyValue::new("http.method", req.method().as_str().to_string()),
        KeyValue::new("http.route", route),
    ];
    metrics.requests_total.add(1, &attrs);
    metrics.active_requests.add(1, &attrs);

    let start = Instant::now();
    let resp = next.run(req).await;
    let status = resp.status().as_u16();
    metrics.active_requests.add(-1, &attrs);

    attrs.push(KeyValue::new("http.status_code", status as i64));
    metrics
        .request_duration_seconds
        .record(start.elapsed().as_secs_f64(), &attrs);
    if status >= 400 {
        metrics.errors_total.add(1, &attrs);
    }
    resp
}
