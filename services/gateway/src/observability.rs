//! Tracing, trace propagation, and the Prometheus endpoint.
//!
//! # Notes
//! - Spans are exported over OTLP only when `OTEL_EXPORTER_OTLP_ENDPOINT` is
//!   set; otherwise tracing is local `fmt` output.
//! - `init_observability` runs once per process (`OnceLock`); later calls
//!   return the same metrics handle.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static TRACING: OnceLock<()> = OnceLock::new();
static PROPAGATOR: OnceLock<()> = OnceLock::new();
static METRICS: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_observability(service_name: &str) -> PrometheusHandle {
    TRACING.get_or_init(|| {
        install_propagator();
        let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();
        let registry = tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(tracing_subscriber::fmt::layer());
        match build_tracer_provider(service_name, endpoint) {
            Some(provider) => {
                let tracer = provider.tracer(service_name.to_string());
                let _ = registry
                    .with(tracing_opentelemetry::layer().with_tracer(tracer))
                    .try_init();
            }
            None => {
                let _ = registry.try_init();
            }
        }
    });
    metrics_handle()
}

fn build_tracer_provider(service_name: &str, endpoint: Option<String>) -> Option<SdkTracerProvider> {
    let endpoint = endpoint.filter(|value| !value.trim().is_empty())?;
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .build()
    {
        Ok(exporter) => exporter,
        Err(err) => {
            eprintln!("OTLP exporter for {endpoint} not built: {err}");
            return None;
        }
    };
    let resource = Resource::builder_empty()
        .with_attributes(resource_attributes(
            service_name,
            std::env::var("TOLLGATE_SERVICE_INSTANCE_ID").ok(),
        ))
        .build();
    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build(),
    )
}

fn resource_attributes(service_name: &str, instance_id: Option<String>) -> Vec<KeyValue> {
    let mut attrs = vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ];
    if let Some(instance_id) = instance_id {
        attrs.push(KeyValue::new("service.instance.id", instance_id));
    }
    attrs
}

fn install_propagator() {
    PROPAGATOR.get_or_init(|| global::set_text_map_propagator(TraceContextPropagator::new()));
}

/// W3C trace context of an incoming request, used as the HTTP span's parent.
pub fn trace_context_from_headers(headers: &axum::http::HeaderMap) -> opentelemetry::Context {
    install_propagator();
    global::get_text_map_propagator(|propagator| propagator.extract(&Headers(headers)))
}

struct Headers<'a>(&'a axum::http::HeaderMap);

impl Extractor for Headers<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

fn metrics_handle() -> PrometheusHandle {
    METRICS
        .get_or_init(|| {
            let handle = match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => handle,
                Err(err) => {
                    tracing::warn!(error = %err, "metrics recorder already installed; /metrics will be empty");
                    PrometheusBuilder::new().build_recorder().handle()
                }
            };
            describe_metrics();
            handle
        })
        .clone()
}

fn describe_metrics() {
    metrics::describe_counter!(
        "tollgate_authz_decisions_total",
        "Authorization decisions by outcome (allowed, denied, error)"
    );
    metrics::describe_counter!(
        "tollgate_sync_records_total",
        "Directory records applied per source and operation"
    );
    metrics::describe_counter!(
        "tollgate_sync_fetch_errors_total",
        "Directory sync cycles aborted by a fetch or data error"
    );
    metrics::describe_counter!(
        "tollgate_audit_dropped_total",
        "Audit entries dropped because the queue was full or closed"
    );
    metrics::describe_counter!(
        "tollgate_audit_write_errors_total",
        "Audit entries the sink failed to persist"
    );
}

pub fn metrics_router(handle: PrometheusHandle) -> axum::Router {
    axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}

/// Serve `/metrics` on its own listener until the task is aborted.
pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "metrics listening");
    axum::serve(listener, metrics_router(handle).into_make_service()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
    use opentelemetry::trace::{TraceContextExt, TraceId};
    use serial_test::serial;
    use tower::ServiceExt;

    const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn no_endpoint_means_no_exporter() {
        assert!(build_tracer_provider("tollgate-gateway", None).is_none());
        assert!(build_tracer_provider("tollgate-gateway", Some("  ".to_string())).is_none());
    }

    #[test]
    fn resource_names_service_and_instance() {
        let attrs = resource_attributes("tollgate-gateway", Some("gw-1".to_string()));
        let get = |key: &str| {
            attrs
                .iter()
                .find(|attr| attr.key.as_str() == key)
                .map(|attr| attr.value.to_string())
        };
        assert_eq!(get("service.name").as_deref(), Some("tollgate-gateway"));
        assert_eq!(get("service.instance.id").as_deref(), Some("gw-1"));
        assert!(get("service.version").is_some());
        assert!(
            resource_attributes("tollgate-gateway", None)
                .iter()
                .all(|attr| attr.key.as_str() != "service.instance.id")
        );
    }

    #[test]
    fn incoming_traceparent_becomes_parent_context() {
        let mut headers = HeaderMap::new();
        headers.insert("traceparent", HeaderValue::from_static(TRACEPARENT));
        let context = trace_context_from_headers(&headers);
        let span = context.span();
        assert!(span.span_context().is_valid());
        assert_eq!(
            span.span_context().trace_id(),
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").expect("trace id")
        );
    }

    #[test]
    fn unreadable_traceparent_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("traceparent", HeaderValue::from_bytes(b"\xFF").expect("header"));
        assert!(Headers(&headers).get("traceparent").is_none());
        assert!(!trace_context_from_headers(&headers).span().span_context().is_valid());
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn metrics_route_renders_gateway_counters() {
        let handle = init_observability("tollgate-test");
        assert_eq!(
            init_observability("tollgate-test").render(),
            handle.render()
        );
        metrics::counter!("tollgate_authz_decisions_total", "outcome" => "allowed").increment(1);

        let response = metrics_router(handle)
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("metrics");
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let text = String::from_utf8(body.to_vec()).expect("utf8");
        assert!(text.contains("tollgate_authz_decisions_total"));
    }
}
