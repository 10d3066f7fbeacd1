use crate::core::{ModelRef, RootKind, SchemaGateway};
use anyhow::{bail, Context, Result};
use base64::Engine;
use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const DATA_JSON: &str = "application/vnd.yang.data+json";
const COLLECTION_JSON: &str = "application/vnd.yang.collection+json";
const DATA_XML: &str = "application/vnd.yang.data+xml";
const COLLECTION_XML: &str = "application/vnd.yang.collection+xml";

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// The running datastore root, e.g. `http://localhost:8008/api/running`.
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

/// A [`SchemaGateway`] speaking the datastore's REST API.
#[derive(Clone, Debug)]
pub struct RestconfGateway {
    client: Client<HttpConnector, Full<Bytes>>,
    base_url: String,
    authorization: HeaderValue,
    timeout: Duration,
}

// === impl RestconfGateway ===

impl RestconfGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let GatewayConfig {
            base_url,
            username,
            password,
            timeout,
        } = config;
        let credentials =
            base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
        let authorization = HeaderValue::from_str(&format!("Basic {credentials}"))
            .context("invalid gateway credentials")?;
        let client = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization,
            timeout,
        })
    }

    fn uri(&self, model: &ModelRef, query: &str) -> Result<Uri> {
        let uri = format!("{}/{}{query}", self.base_url, model.path());
        uri.parse()
            .with_context(|| format!("invalid gateway uri: {uri}"))
    }

    /// Reads `model` in the `accept` representation. Absent or empty
    /// configuration is `None`.
    async fn fetch(&self, model: &ModelRef, accept: &'static str) -> Result<Option<Bytes>> {
        let uri = self.uri(model, "?deep")?;
        debug!(%uri, %accept, "Fetching running configuration");
        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(header::ACCEPT, accept)
            .header(header::AUTHORIZATION, self.authorization.clone())
            .body(Full::default())?;

        let (status, body) = self.send(req).await?;
        if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            bail!(
                "fetching {} failed with {status}: {}",
                model.path(),
                String::from_utf8_lossy(&body)
            );
        }
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(body))
    }

    async fn send(&self, req: Request<Full<Bytes>>) -> Result<(StatusCode, Bytes)> {
        let exchange = async {
            let rsp = self.client.request(req).await?;
            let status = rsp.status();
            let body = rsp.into_body().collect().await?.to_bytes();
            Ok::<_, anyhow::Error>((status, body))
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .context("gateway request timed out")?
    }
}

#[async_trait::async_trait]
impl SchemaGateway for RestconfGateway {
    async fn fetch_current(&self, model: &ModelRef) -> Result<Option<Value>> {
        let accept = match model.kind {
            RootKind::Container => DATA_JSON,
            RootKind::List => COLLECTION_JSON,
        };
        let Some(body) = self.fetch(model, accept).await? else {
            return Ok(None);
        };
        let config = serde_json::from_slice(&body)
            .with_context(|| format!("invalid configuration of {}", model.path()))?;
        Ok(Some(config))
    }

    async fn fetch_current_xml(&self, model: &ModelRef) -> Result<Option<String>> {
        let accept = match model.kind {
            RootKind::Container => DATA_XML,
            RootKind::List => COLLECTION_XML,
        };
        let Some(body) = self.fetch(model, accept).await? else {
            return Ok(None);
        };
        let document = String::from_utf8(body.to_vec())
            .with_context(|| format!("invalid configuration of {}", model.path()))?;
        Ok(Some(document))
    }

    async fn push(&self, model: &ModelRef, payload: &Value) -> Result<()> {
        // List roots are merged into; container roots are replaced.
        let method = match model.kind {
            RootKind::Container => Method::PUT,
            RootKind::List => Method::PATCH,
        };
        let uri = self.uri(model, "")?;
        debug!(%uri, %method, "Pushing configuration");
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, DATA_JSON)
            .header(header::AUTHORIZATION, self.authorization.clone())
            .body(Full::new(Bytes::from(serde_json::to_vec(payload)?)))?;

        let (status, body) = self.send(req).await?;
        if !status.is_success() {
            bail!(
                "pushing {} failed with {status}: {}",
                model.path(),
                String::from_utf8_lossy(&body)
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::{body::Incoming, server::conn::http1, service::service_fn, Response};
    use hyper_util::rt::TokioIo;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::{net::SocketAddr, sync::Arc};
    use tokio::net::TcpListener;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Seen {
        method: Method,
        path: String,
        accept: Option<String>,
        authorization: Option<String>,
        body: String,
    }

    /// Serves a single canned response per connection, recording requests.
    async fn serve(status: StatusCode, body: &'static str) -> (SocketAddr, Arc<Mutex<Vec<Seen>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        tokio::spawn(async move {
            loop {
                let (io, _) = listener.accept().await.unwrap();
                let record = record.clone();
                tokio::spawn(async move {
                    let svc = service_fn(move |req: Request<Incoming>| {
                        let record = record.clone();
                        async move {
                            let get = |name: header::HeaderName| {
                                req.headers()
                                    .get(name)
                                    .and_then(|v: &HeaderValue| v.to_str().ok())
                                    .map(String::from)
                            };
                            let mut seen = Seen {
                                method: req.method().clone(),
                                path: req
                                    .uri()
                                    .path_and_query()
                                    .map(|p| p.to_string())
                                    .unwrap_or_default(),
                                accept: get(header::ACCEPT),
                                authorization: get(header::AUTHORIZATION),
                                body: String::new(),
                            };
                            let bytes = req.into_body().collect().await?.to_bytes();
                            seen.body = String::from_utf8_lossy(&bytes).into_owned();
                            record.lock().push(seen);
                            Ok::<_, hyper::Error>(
                                Response::builder()
                                    .status(status)
                                    .body(Full::new(Bytes::from_static(body.as_bytes())))
                                    .unwrap(),
                            )
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(io), svc)
                        .await;
                });
            }
        });
        (addr, seen)
    }

    fn gateway(addr: SocketAddr) -> RestconfGateway {
        RestconfGateway::new(GatewayConfig {
            base_url: format!("http://{addr}/api/running/"),
            username: "admin".to_string(),
            password: "admin".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn model(kind: RootKind) -> ModelRef {
        ModelRef {
            prefix: "amfapp-nf1".to_string(),
            root: "config".to_string(),
            kind,
        }
    }

    #[tokio::test]
    async fn fetches_container_configuration() {
        let (addr, seen) = serve(StatusCode::OK, r#"{"amfapp-nf1:config":{"name":"a"}}"#).await;
        let config = gateway(addr)
            .fetch_current(&model(RootKind::Container))
            .await
            .unwrap();
        assert_eq!(config, Some(json!({"amfapp-nf1:config": {"name": "a"}})));

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, Method::GET);
        assert_eq!(seen[0].path, "/api/running/amfapp-nf1:config?deep");
        assert_eq!(seen[0].accept.as_deref(), Some(DATA_JSON));
        assert_eq!(seen[0].authorization.as_deref(), Some("Basic YWRtaW46YWRtaW4="));
    }

    #[tokio::test]
    async fn lists_are_fetched_as_collections() {
        let (addr, seen) = serve(StatusCode::OK, r#"{"collection":{}}"#).await;
        gateway(addr)
            .fetch_current(&model(RootKind::List))
            .await
            .unwrap();
        assert_eq!(seen.lock()[0].accept.as_deref(), Some(COLLECTION_JSON));
    }

    #[tokio::test]
    async fn fetches_xml_documents() {
        let xml = "<config xmlns=\"urn:amf-app:nf1\">\n  <name>a</name>\n</config>\n";
        let (addr, seen) = serve(StatusCode::OK, xml).await;
        let gw = gateway(addr);
        let document = gw
            .fetch_current_xml(&model(RootKind::Container))
            .await
            .unwrap();
        assert_eq!(document.as_deref(), Some(xml));
        gw.fetch_current_xml(&model(RootKind::List)).await.unwrap();

        let seen = seen.lock().clone();
        assert_eq!(seen[0].path, "/api/running/amfapp-nf1:config?deep");
        assert_eq!(seen[0].accept.as_deref(), Some(DATA_XML));
        assert_eq!(seen[1].accept.as_deref(), Some(COLLECTION_XML));
    }

    #[tokio::test]
    async fn absent_configuration_is_none() {
        let (addr, _) = serve(StatusCode::NOT_FOUND, "").await;
        let config = gateway(addr)
            .fetch_current(&model(RootKind::Container))
            .await
            .unwrap();
        assert_eq!(config, None);

        let (addr, _) = serve(StatusCode::OK, "").await;
        let config = gateway(addr)
            .fetch_current(&model(RootKind::Container))
            .await
            .unwrap();
        assert_eq!(config, None);
    }

    #[tokio::test]
    async fn server_errors_fail() {
        let (addr, _) = serve(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
        let gw = gateway(addr);
        assert!(gw.fetch_current(&model(RootKind::Container)).await.is_err());
        assert!(gw
            .push(&model(RootKind::Container), &json!({}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn push_method_follows_root_kind() {
        let (addr, seen) = serve(StatusCode::NO_CONTENT, "").await;
        let gw = gateway(addr);
        let payload = json!({"config": {"name": "b"}});
        gw.push(&model(RootKind::Container), &payload).await.unwrap();
        gw.push(&model(RootKind::List), &payload).await.unwrap();

        let seen = seen.lock().clone();
        assert_eq!(
            seen.iter().map(|s| s.method.clone()).collect::<Vec<_>>(),
            vec![Method::PUT, Method::PATCH]
        );
        assert_eq!(seen[0].path, "/api/running/amfapp-nf1:config");
        assert_eq!(
            serde_json::from_str::<Value>(&seen[0].body).unwrap(),
            payload
        );
    }
}
