use {
    prometheus::Encoder,
    std::{collections::HashMap, net::SocketAddr, sync::OnceLock},
    tokio::task::JoinHandle,
};

/// Global metrics registry used by all components.
static REGISTRY: OnceLock<prometheus_metric_storage::StorageRegistry> = OnceLock::new();

/// Configure global metrics registry.
///
/// This function allows specifying common prefix that will be added
/// to all metric names, as well as common labels.
///
/// This function can be called at most once, and it should be done before
/// any call to [`get_registry`], ideally in the very beginning
/// of the `main` function. Returns an error if the registry was already
/// initialized or the configuration is invalid.
pub fn setup_registry(
    prefix: Option<String>,
    labels: Option<HashMap<String, String>>,
) -> anyhow::Result<()> {
    let registry = prometheus::Registry::new_custom(prefix, labels)?;
    let storage_registry = prometheus_metric_storage::StorageRegistry::new(registry);
    REGISTRY
        .set(storage_registry)
        .map_err(|_| anyhow::anyhow!("metrics registry already initialized"))
}

/// Get the global instance of the metrics registry.
pub fn get_registry() -> &'static prometheus::Registry {
    get_storage_registry().registry()
}

/// Get the global instance of the metric storage registry.
///
/// If the registry was not configured with [`setup_registry`] it gets
/// initialized with default values. This keeps unit tests from having to set
/// up the registry before touching any metric.
pub fn get_storage_registry() -> &'static prometheus_metric_storage::StorageRegistry {
    REGISTRY.get_or_init(prometheus_metric_storage::StorageRegistry::default)
}

pub fn encode(registry: &prometheus::Registry) -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::warn!(?err, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Serves the encoded registry on `/metrics`.
pub fn serve_metrics(address: SocketAddr) -> JoinHandle<()> {
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(|| async { encode(get_registry()) }),
    );
    tracing::info!(%address, "serving metrics");
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(address).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(?err, %address, "failed to bind metrics listener");
                return;
            }
        };
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(?err, "metrics server stopped");
        }
    })
}
