//! Tower layer in front of the HTTP transport that traces every JSON-RPC
//! call and records how often and how long each method was called.

use {
    alloy::{
        rpc::json_rpc::{RequestPacket, ResponsePacket},
        transports::{TransportError, TransportFut},
    },
    prometheus::{HistogramTimer, IntGauge},
    std::task::{Context, Poll},
    tower::{Layer, Service},
};

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct InstrumentationLayer;

impl<S> Layer<S> for InstrumentationLayer {
    type Service = Instrumented<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Instrumented {
            inner,
            metrics: Metrics::instance(observe::metrics::get_storage_registry())
                .expect("unexpected error getting metrics instance"),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Instrumented<S> {
    inner: S,
    metrics: &'static Metrics,
}

impl<S> Service<RequestPacket> for Instrumented<S>
where
    S: Service<RequestPacket, Response = ResponsePacket, Error = TransportError>,
    S::Future: Send + 'static,
{
    type Error = TransportError;
    type Future = TransportFut<'static>;
    type Response = ResponsePacket;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut packet: RequestPacket) -> Self::Future {
        let methods = packet
            .requests_mut()
            .iter_mut()
            .map(|request| request.method().to_string())
            .collect::<Vec<_>>();
        tracing::trace!(?methods, "sending rpc request");
        let inflight = self.metrics.start(&methods);

        let response = self.inner.call(packet);
        let metrics = self.metrics;
        Box::pin(async move {
            let response = response.await;
            let result = if response.is_ok() { "success" } else { "failure" };
            if let Err(err) = &response {
                tracing::debug!(?err, ?methods, "rpc request failed");
            }
            for method in &methods {
                metrics
                    .requests
                    .with_label_values(&[method.as_str(), result])
                    .inc();
            }
            drop(inflight);
            response
        })
    }
}

#[derive(prometheus_metric_storage::MetricStorage, Debug)]
#[metric(subsystem = "node_rpc")]
struct Metrics {
    /// RPC requests sent to the node by method and result. Requests of a
    /// batch are counted individually.
    #[metric(labels("method", "result"))]
    requests: prometheus::IntCounterVec,

    /// Requests or batches sent to the node that did not complete yet.
    inflight: prometheus::IntGauge,

    /// Round trip time of requests by method.
    #[metric(labels("method"))]
    duration_seconds: prometheus::HistogramVec,
}

impl Metrics {
    /// Marks a request packet as in flight until the returned guard is
    /// dropped.
    fn start(&self, methods: &[String]) -> impl Drop + use<> {
        let timers = methods
            .iter()
            .map(|method| {
                self.duration_seconds
                    .with_label_values(&[method.as_str()])
                    .start_timer()
            })
            .collect::<Vec<HistogramTimer>>();
        let inflight: IntGauge = self.inflight.clone();
        inflight.inc();
        scopeguard::guard((inflight, timers), |(inflight, timers)| {
            inflight.dec();
            timers.into_iter().for_each(HistogramTimer::observe_duration);
        })
    }
}
