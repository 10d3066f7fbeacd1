use crate::{
    core::{NfStateChange, UpdateBatch},
    propagate::Classifier,
};
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::{convert::Infallible, fmt, sync::Arc};
use tokio::net::TcpListener;
use tracing::{debug, info, info_span, warn, Instrument};

type Body = Full<Bytes>;

/// Accepts datastore transactions and network function state changes.
#[derive(Clone)]
pub struct Ingest {
    classifier: Arc<Classifier>,
}

// === impl Ingest ===

impl Ingest {
    pub fn new(classifier: Arc<Classifier>) -> Self {
        Self { classifier }
    }

    /// Serves connections until `drain` is signaled, then lets in-flight
    /// requests complete.
    pub async fn serve(self, listener: TcpListener, drain: drain::Watch) {
        match listener.local_addr() {
            Ok(addr) => info!(%addr, "Update ingest server listening"),
            Err(error) => warn!(%error, "Update ingest server listening on unknown address"),
        }
        tokio::pin! {
            let shutdown = drain.clone().signaled();
        }
        loop {
            let (io, peer) = tokio::select! {
                res = listener.accept() => match res {
                    Ok(conn) => conn,
                    Err(error) => {
                        warn!(%error, "Failed to accept connection");
                        continue;
                    }
                },
                _ = &mut shutdown => {
                    debug!("Update ingest server shutting down");
                    return;
                }
            };

            let ingest = self.clone();
            let drain = drain.clone();
            tokio::spawn(
                async move {
                    let svc = service_fn(move |req: Request<hyper::body::Incoming>| {
                        let ingest = ingest.clone();
                        async move { Ok::<_, Infallible>(ingest.handle(req).await) }
                    });
                    let conn = http1::Builder::new().serve_connection(TokioIo::new(io), svc);
                    tokio::pin!(conn);
                    let res = tokio::select! {
                        res = conn.as_mut() => res,
                        handle = drain.signaled() => {
                            conn.as_mut().graceful_shutdown();
                            handle.release_after(conn).await
                        }
                    };
                    if let Err(error) = res {
                        debug!(%error, "Connection closed");
                    }
                }
                .instrument(info_span!("conn", %peer)),
            );
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<Body>
    where
        B: hyper::body::Body,
        B::Error: fmt::Display,
    {
        let path = req.uri().path().to_string();
        if !matches!(path.as_str(), "/updates" | "/nf-state") {
            return status(StatusCode::NOT_FOUND);
        }
        if req.method() != Method::POST {
            return status(StatusCode::METHOD_NOT_ALLOWED);
        }

        let body = match req.into_body().collect().await {
            Ok(body) => body.to_bytes(),
            Err(error) => {
                warn!(%path, %error, "Failed to read request body");
                return status(StatusCode::BAD_REQUEST);
            }
        };

        if path == "/updates" {
            let batch = match serde_json::from_slice::<UpdateBatch>(&body) {
                Ok(batch) => batch.normalize(),
                Err(error) => return invalid(&path, error),
            };
            debug!(updates = batch.len(), "Received update batch");
            self.classifier.handle_batch(batch).await;
            return status(StatusCode::NO_CONTENT);
        }

        let change = match serde_json::from_slice::<NfStateChange>(&body) {
            Ok(change) => change,
            Err(error) => return invalid(&path, error),
        };
        debug!(nf = %change.nf_name, state = %change.new_state, "Received state change");
        match self.classifier.handle_state_change(change).await {
            Ok(()) => status(StatusCode::NO_CONTENT),
            Err(error) => {
                warn!(%error, "Failed to handle state change");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, error)
            }
        }
    }
}

fn status(code: StatusCode) -> Response<Body> {
    let mut rsp = Response::new(Body::default());
    *rsp.status_mut() = code;
    rsp
}

fn invalid(path: &str, error: serde_json::Error) -> Response<Body> {
    warn!(%path, %error, "Invalid request body");
    error_response(StatusCode::BAD_REQUEST, error)
}

fn error_response(code: StatusCode, error: impl fmt::Display) -> Response<Body> {
    let body = json!({ "error": error.to_string() }).to_string();
    let mut rsp = Response::new(Body::from(body));
    *rsp.status_mut() = code;
    rsp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{
            testing::{FakeCluster, FakeGateway, RecordingBus},
            EventName, NF_ACTIVE_STATE,
        },
        index::Registry,
        propagate::{PropagateMetrics, Writer, WriterConfig},
        store::{MemoryStore, Store},
    };
    use pretty_assertions::assert_eq;

    struct Fixture {
        store: Arc<MemoryStore>,
        bus: Arc<RecordingBus>,
        ingest: Ingest,
    }

    fn fixture() -> Fixture {
        let registry = Registry::new(Some("nf0".to_string()), "xgvela1".to_string()).shared();
        let store = Arc::new(MemoryStore::default());
        let bus = Arc::new(RecordingBus::default());
        let metrics = PropagateMetrics::default();
        let writer = Arc::new(Writer::new(
            WriterConfig::default(),
            registry.clone(),
            Arc::new(FakeCluster::default()),
            store.clone(),
            Arc::new(FakeGateway::default()),
            bus.clone(),
            metrics.clone(),
        ));
        let classifier = Arc::new(Classifier::new(
            registry,
            store.clone(),
            writer,
            bus.clone(),
            metrics,
        ));
        Fixture {
            store,
            bus,
            ingest: Ingest::new(classifier),
        }
    }

    fn post(path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn update_batches_are_classified() {
        let f = fixture();
        let body = r#"[
            {"yangNamespace": "urn:amf-app:nf1"},
            {"yangNamespace": "urn:amf-app:nf1", "restart": true},
            {"yangNamespace": "urn:smf-app:nf1"}
        ]"#;
        let rsp = f.ingest.handle(post("/updates", body)).await;
        assert_eq!(rsp.status(), StatusCode::NO_CONTENT);
        // Updates of one namespace are merged before classification.
        assert_eq!(f.bus.count(EventName::ConfigUpdateReceived), 2);
    }

    #[tokio::test]
    async fn activation_is_recorded() {
        let f = fixture();
        let body = format!(r#"{{"nfName": "nf1", "newState": "{NF_ACTIVE_STATE}"}}"#);
        let rsp = f.ingest.handle(post("/nf-state", &body)).await;
        assert_eq!(rsp.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            f.store.get("stateActive/nf1").await.unwrap().as_deref(),
            Some("true")
        );

        let body = r#"{"nfName": "nf2", "newState": "INSTANTIATED_NOT_CONFIGURED"}"#;
        f.ingest.handle(post("/nf-state", body)).await;
        assert_eq!(f.store.get("stateActive/nf2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let f = fixture();
        f.store.fail_always();
        let body = format!(r#"{{"nfName": "nf1", "newState": "{NF_ACTIVE_STATE}"}}"#);
        let rsp = f.ingest.handle(post("/nf-state", &body)).await;
        assert_eq!(rsp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected() {
        let f = fixture();
        let rsp = f.ingest.handle(post("/updates", "{")).await;
        assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);

        let rsp = f.ingest.handle(post("/nf-state", "[]")).await;
        assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);

        let rsp = f.ingest.handle(post("/other", "[]")).await;
        assert_eq!(rsp.status(), StatusCode::NOT_FOUND);

        let req = Request::builder()
            .method(Method::GET)
            .uri("/updates")
            .body(Body::default())
            .unwrap();
        let rsp = f.ingest.handle(req).await;
        assert_eq!(rsp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(f.bus.events().is_empty());
    }

    #[tokio::test]
    async fn serves_until_drained() {
        let f = fixture();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (signal, watch) = drain::channel();
        let server = tokio::spawn(f.ingest.clone().serve(listener, watch));

        signal.drain().await;
        tokio::time::timeout(std::time::Duration::from_secs(1), server)
            .await
            .expect("server must stop")
            .unwrap();
    }
}
