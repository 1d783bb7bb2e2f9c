//! Logging, tracing, and metrics for the auth service.
//!
//! # Purpose
//! One entry point, [`init_observability`], installs the tracing subscriber
//! (env filter, fmt output, and an OTLP span exporter when one can be built),
//! the W3C trace-context propagator, and the Prometheus recorder. The recorder
//! is rendered by a small router on its own listener.
//!
//! # Metrics
//! - [`ENFORCE_TOTAL`] `{result}`: policy decisions.
//! - [`POLICY_MUTATIONS_TOTAL`] `{op}`: tuples added or removed.
//! - [`USER_MUTATIONS_TOTAL`] `{op}`: user writes.
//! - [`USERS_ACTIVE`]: active users after the last write.
//!
//! # Notes
//! Every install step is guarded by a `OnceLock`; tests call the entry point
//! repeatedly.
use axum::http::HeaderMap;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TracerProvider;
use opentelemetry::{KeyValue, global};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const ENFORCE_TOTAL: &str = "orchestrator_auth_enforce_total";
pub const POLICY_MUTATIONS_TOTAL: &str = "orchestrator_auth_policy_mutations_total";
pub const USER_MUTATIONS_TOTAL: &str = "orchestrator_auth_user_mutations_total";
pub const USERS_ACTIVE: &str = "orchestrator_auth_users_active";

/// Resource attribute key and the environment variables consulted for it, in order.
const RESOURCE_ENV: &[(&str, &[&str])] = &[
    ("service.instance.id", &["AUTH_SERVICE_INSTANCE_ID", "HOSTNAME"]),
    ("k8s.cluster.name", &["K8S_CLUSTER_NAME"]),
    ("k8s.namespace.name", &["K8S_NAMESPACE_NAME"]),
    ("k8s.pod.name", &["K8S_POD_NAME"]),
    ("cloud.region", &["CLOUD_REGION"]),
    ("deployment.environment", &["DEPLOYMENT_ENVIRONMENT"]),
];

static SUBSCRIBER: OnceLock<()> = OnceLock::new();
static PROPAGATOR: OnceLock<()> = OnceLock::new();
static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install tracing and metrics for `service_name`.
///
/// # What it does
/// - Sets the trace-context propagator.
/// - Builds the subscriber: `RUST_LOG` filter (default `info`), fmt layer,
///   and an OpenTelemetry layer when the OTLP exporter is available.
/// - Installs the Prometheus recorder and describes the service metrics.
///
/// Returns the handle that renders the scrape body.
pub fn init_observability(service_name: &str) -> PrometheusHandle {
    install_propagator();
    SUBSCRIBER.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer());
        match tracer_provider(service_name) {
            Some(provider) => {
                let tracer = provider.tracer(service_name.to_string());
                global::set_tracer_provider(provider);
                let _ = registry
                    .with(tracing_opentelemetry::layer().with_tracer(tracer))
                    .try_init();
            }
            None => {
                let _ = registry.try_init();
            }
        }
    });

    let handle = RECORDER
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("install metrics recorder")
        })
        .clone();
    describe_metrics();
    handle
}

fn install_propagator() {
    PROPAGATOR.get_or_init(|| global::set_text_map_propagator(TraceContextPropagator::new()));
}

fn describe_metrics() {
    metrics::describe_counter!(ENFORCE_TOTAL, "Policy engine decisions by result");
    metrics::describe_counter!(POLICY_MUTATIONS_TOTAL, "Policy tuples added or removed");
    metrics::describe_counter!(
        USER_MUTATIONS_TOTAL,
        "User create, update, and delete operations"
    );
    metrics::describe_gauge!(USERS_ACTIVE, "Active users after the last user write");
}

fn tracer_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
        .ok()?;
    let resource = Resource::builder_empty()
        .with_attributes(resource_attributes(service_name, |key| std::env::var(key).ok()))
        .build();
    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build(),
    )
}

/// Resource attributes for the exporter; `lookup` reads the environment.
fn resource_attributes<F>(service_name: &str, lookup: F) -> Vec<KeyValue>
where
    F: Fn(&str) -> Option<String>,
{
    let mut attrs = vec![KeyValue::new("service.name", service_name.to_string())];
    for (key, vars) in RESOURCE_ENV {
        if let Some(value) = vars.iter().find_map(|var| lookup(*var)) {
            attrs.push(KeyValue::new(*key, value));
        }
    }
    attrs
}

/// Parent context carried by the request's `traceparent`/`tracestate` headers.
pub fn trace_context_from_headers(headers: &HeaderMap) -> opentelemetry::Context {
    install_propagator();
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// Router exposing `GET /metrics` for `handle`.
pub fn metrics_router(handle: PrometheusHandle) -> axum::Router {
    axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}

/// Serve `/metrics` on `addr` until the task is aborted.
pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "metrics listening");
    serve_metrics_until(handle, listener, std::future::pending()).await
}

async fn serve_metrics_until<F>(
    handle: PrometheusHandle,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, metrics_router(handle).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}
