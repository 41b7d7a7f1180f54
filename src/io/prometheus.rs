//! Prometheus metrics HTTP endpoint
//!
//! Exposes controller metrics in Prometheus text format at /metrics and a
//! health check at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_cycle_metrics(&mut output, site_id, &summary);
    write_access_metrics(&mut output, site_id, &summary);
    write_gate_metrics(&mut output, site_id, &summary);
    write_occupancy_metrics(&mut output, site_id, &summary);
    write_error_metrics(&mut output, site_id, &summary);

    output
}

fn write_cycle_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parking_cycles_total",
        "Control cycles executed",
        MetricType::Counter,
        site,
        summary.cycles_total,
    );
    write_histogram(
        output,
        "parking_cycle_duration_us",
        "Control cycle duration in microseconds",
        site,
        &summary.cycle_lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.cycle_sum_us,
    );
    write_metric(
        output,
        "parking_cycle_duration_p99_us",
        "99th percentile cycle duration",
        MetricType::Gauge,
        site,
        summary.cycle_p99_us,
    );
    write_metric(
        output,
        "parking_cycle_duration_max_us",
        "Maximum cycle duration in the current reporting window",
        MetricType::Gauge,
        site,
        summary.cycle_max_us,
    );
    write_metric(
        output,
        "parking_cycle_overruns_total",
        "Cycles that took longer than the cycle period",
        MetricType::Counter,
        site,
        summary.cycle_overruns,
    );
}

fn write_access_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parking_access_granted_total",
        "Authorized credentials that opened the gate",
        MetricType::Counter,
        site,
        summary.access_granted,
    );
    write_metric(
        output,
        "parking_access_denied_total",
        "Unauthorized credentials presented",
        MetricType::Counter,
        site,
        summary.access_denied,
    );
    write_metric(
        output,
        "parking_credentials_ignored_total",
        "Credentials presented while the gate was busy",
        MetricType::Counter,
        site,
        summary.credentials_ignored,
    );
    write_metric(
        output,
        "parking_acl_updates_total",
        "Runtime changes applied to the authorized set",
        MetricType::Counter,
        site,
        summary.acl_updates,
    );
}

fn write_gate_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parking_passages_total",
        "Confirmed vehicle passages",
        MetricType::Counter,
        site,
        summary.passages_confirmed,
    );
    write_metric(
        output,
        "parking_gate_closes_total",
        "Gate closes after a confirmed passage",
        MetricType::Counter,
        site,
        summary.gate_closes,
    );
    write_metric(
        output,
        "parking_gate_forced_closes_total",
        "Gate closes forced by the max-open guard",
        MetricType::Counter,
        site,
        summary.forced_closes,
    );
    write_metric(
        output,
        "parking_gate_state",
        "Gate state (0=closed, 1=closing_pending, 2=open)",
        MetricType::Gauge,
        site,
        summary.gate_state,
    );
    write_metric(
        output,
        "parking_no_echo_total",
        "Passage measurements without a valid echo",
        MetricType::Counter,
        site,
        summary.no_echo_readings,
    );
}

fn write_occupancy_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parking_available_spots",
        "Spots currently classified free",
        MetricType::Gauge,
        site,
        summary.available_spots,
    );
    write_metric(
        output,
        "parking_total_spots",
        "Sensed spots",
        MetricType::Gauge,
        site,
        summary.total_spots,
    );
}

fn write_error_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parking_sensor_faults_total",
        "Spot readings reported occupied because the sensor was unreadable",
        MetricType::Counter,
        site,
        summary.sensor_faults,
    );
    write_metric(
        output,
        "parking_credential_read_errors_total",
        "Failed or timed-out card reader polls",
        MetricType::Counter,
        site,
        summary.credential_read_errors,
    );
    write_metric(
        output,
        "parking_actuator_errors_total",
        "Failed or timed-out actuator commands",
        MetricType::Counter,
        site,
        summary.actuator_errors,
    );
    write_metric(
        output,
        "parking_display_errors_total",
        "Failed or timed-out display renders",
        MetricType::Counter,
        site,
        summary.display_errors,
    );
    write_metric(
        output,
        "parking_telemetry_dropped_total",
        "Telemetry messages dropped on a full egress channel",
        MetricType::Counter,
        site,
        summary.telemetry_dropped,
    );
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            let mut response = Response::new(Full::new(Bytes::from(body)));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            Ok(response)
        }
        (&Method::GET, "/health") => Ok(text_response(StatusCode::OK, "ok")),
        _ => Ok(text_response(StatusCode::NOT_FOUND, "Not Found")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();

        metrics.record_cycle(150);
        metrics.record_cycle(900);
        metrics.record_access(true);
        metrics.record_gate_close(true);
        metrics.set_occupancy(1, 3);

        let output = format_prometheus_metrics(&metrics, "lot-a");

        assert!(output.contains("parking_cycles_total{site=\"lot-a\"} 2"));
        assert!(output.contains("parking_cycle_duration_us_bucket{site=\"lot-a\",le=\"250\"} 1"));
        assert!(output.contains("parking_cycle_duration_us_bucket{site=\"lot-a\",le=\"+Inf\"} 2"));
        assert!(output.contains("parking_access_granted_total{site=\"lot-a\"} 1"));
        assert!(output.contains("parking_gate_forced_closes_total{site=\"lot-a\"} 1"));
        assert!(output.contains("parking_available_spots{site=\"lot-a\"} 1"));
        assert!(output.contains("parking_total_spots{site=\"lot-a\"} 3"));
        assert!(output.contains("parking_cycle_duration_us_sum{site=\"lot-a\"} 1050"));
    }

    #[test]
    fn test_histogram_survives_reports_and_scrapes() {
        let metrics = Metrics::new();
        metrics.record_cycle(150);
        let _ = format_prometheus_metrics(&metrics, "lot-a");
        metrics.report().log();
        metrics.record_cycle(150);

        let output = format_prometheus_metrics(&metrics, "lot-a");
        assert!(output.contains("parking_cycle_duration_us_bucket{site=\"lot-a\",le=\"250\"} 2"));
        assert!(output.contains("parking_cycle_duration_us_count{site=\"lot-a\"} 2"));
    }
}
