//! Kubernetes API server client.
//!
//! Resource verbs go over the REST API with `reqwest`. Exec uses the
//! `v4.channel.k8s.io` WebSocket subprotocol: every binary frame starts
//! with a channel byte (1 stdout, 2 stderr, 3 status) followed by payload.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{
    AUTHORIZATION as WS_AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL,
};
use tokio_tungstenite::tungstenite::http::HeaderValue as WsHeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::client::{ClientError, ClientResult, ControlPlane};
use crate::manifest::{Deployment, Namespace, Pod, Service};

/// WebSocket subprotocol for exec streams.
pub const EXEC_PROTOCOL: &str = "v4.channel.k8s.io";

const STDOUT_CHANNEL: u8 = 1;
const STDERR_CHANNEL: u8 = 2;
const STATUS_CHANNEL: u8 = 3;

#[derive(Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Client for a Kubernetes API server.
#[derive(Debug, Clone)]
pub struct KubeClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl KubeClient {
    /// Create a client for the API server at `base_url`.
    pub fn new(base_url: &str, token: Option<String>) -> ClientResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = &token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ClientError::InvalidToken(e.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        kind: &'static str,
        name: &str,
    ) -> ClientResult<T> {
        let response = self.client.get(self.url(path)).send().await?;
        decode(check(response, kind, name, false).await?).await
    }

    async fn list<T: DeserializeOwned>(&self, path: &str, kind: &'static str) -> ClientResult<Vec<T>> {
        let list: ObjectList<T> = self.get_json(path, kind, "").await?;
        Ok(list.items)
    }

    async fn post<B: Serialize>(&self, path: &str, kind: &'static str, name: &str, body: &B) -> ClientResult<()> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        check(response, kind, name, true).await.map(drop)
    }

    async fn put<B: Serialize>(&self, path: &str, kind: &'static str, name: &str, body: &B) -> ClientResult<()> {
        let response = self.client.put(self.url(path)).json(body).send().await?;
        check(response, kind, name, false).await.map(drop)
    }

    async fn delete(&self, path: &str, kind: &'static str, name: &str) -> ClientResult<()> {
        let response = self.client.delete(self.url(path)).send().await?;
        check(response, kind, name, false).await.map(drop)
    }

    /// WebSocket URL of an exec request.
    pub fn exec_url(&self, namespace: &str, pod: &str, command: &[String]) -> ClientResult<Url> {
        let mut url = Url::parse(&self.url(&format!(
            "/api/v1/namespaces/{namespace}/pods/{pod}/exec"
        )))
        .map_err(|e| ClientError::Exec(format!("invalid exec url: {e}")))?;

        {
            let mut query = url.query_pairs_mut();
            for arg in command {
                query.append_pair("command", arg);
            }
            query.append_pair("stdout", "true");
            query.append_pair("stderr", "true");
        }

        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => return Err(ClientError::Exec(format!("unsupported scheme: {other}"))),
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Exec(format!("cannot switch {url} to {scheme}")))?;
        Ok(url)
    }
}

/// Map a response to the client error taxonomy.
///
/// A conflict only means "already exists" on create; on replace it is a
/// stale `resourceVersion` and stays an API error.
async fn check(
    response: Response,
    kind: &'static str,
    name: &str,
    creating: bool,
) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), kind, name, body = %body, "Control plane request failed");

    Err(match status {
        StatusCode::CONFLICT if creating => ClientError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        StatusCode::NOT_FOUND => ClientError::NotFound {
            kind,
            name: name.to_string(),
        },
        _ => ClientError::Api {
            status: status.as_u16(),
            body,
        },
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[derive(Debug, Deserialize)]
struct ExecStatus {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Demultiplexed output of one exec stream.
#[derive(Debug, Default)]
pub struct ExecOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    status: Option<Vec<u8>>,
}

impl ExecOutput {
    /// Append one channel-prefixed frame.
    pub fn push_frame(&mut self, frame: &[u8]) {
        let Some((&channel, payload)) = frame.split_first() else {
            return;
        };
        match channel {
            STDOUT_CHANNEL => self.stdout.extend_from_slice(payload),
            STDERR_CHANNEL => self.stderr.extend_from_slice(payload),
            STATUS_CHANNEL if !payload.is_empty() => self.status = Some(payload.to_vec()),
            _ => {}
        }
    }

    /// Stdout of a successful command; a failure status becomes an error
    /// carrying its message and stderr.
    pub fn finish(self) -> ClientResult<String> {
        if let Some(raw) = &self.status {
            let status: ExecStatus = serde_json::from_slice(raw)?;
            if status.status != "Success" {
                let stderr = String::from_utf8_lossy(&self.stderr);
                return Err(ClientError::Exec(format!(
                    "{}: {}",
                    status.message.unwrap_or(status.status),
                    stderr.trim()
                )));
            }
        }
        Ok(String::from_utf8_lossy(&self.stdout).into_owned())
    }
}

#[async_trait]
impl ControlPlane for KubeClient {
    async fn create_namespace(&self, namespace: &Namespace) -> ClientResult<()> {
        self.post("/api/v1/namespaces", "namespace", &namespace.metadata.name, namespace)
            .await
    }

    async fn list_namespaces(&self) -> ClientResult<Vec<Namespace>> {
        self.list("/api/v1/namespaces", "namespace").await
    }

    async fn delete_namespace(&self, name: &str) -> ClientResult<()> {
        self.delete(&format!("/api/v1/namespaces/{name}"), "namespace", name)
            .await
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> ClientResult<()> {
        self.post(
            &format!("/apis/apps/v1/namespaces/{namespace}/deployments"),
            "deployment",
            &deployment.metadata.name,
            deployment,
        )
        .await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> ClientResult<Deployment> {
        self.get_json(
            &format!("/apis/apps/v1/namespaces/{namespace}/deployments/{name}"),
            "deployment",
            name,
        )
        .await
    }

    async fn replace_deployment(&self, namespace: &str, deployment: &Deployment) -> ClientResult<()> {
        let name = &deployment.metadata.name;
        self.put(
            &format!("/apis/apps/v1/namespaces/{namespace}/deployments/{name}"),
            "deployment",
            name,
            deployment,
        )
        .await
    }

    async fn list_deployments(&self, namespace: &str) -> ClientResult<Vec<Deployment>> {
        self.list(
            &format!("/apis/apps/v1/namespaces/{namespace}/deployments"),
            "deployment",
        )
        .await
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> ClientResult<()> {
        self.delete(
            &format!("/apis/apps/v1/namespaces/{namespace}/deployments/{name}"),
            "deployment",
            name,
        )
        .await
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> ClientResult<()> {
        self.post(
            &format!("/api/v1/namespaces/{namespace}/services"),
            "service",
            &service.metadata.name,
            service,
        )
        .await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> ClientResult<Service> {
        self.get_json(
            &format!("/api/v1/namespaces/{namespace}/services/{name}"),
            "service",
            name,
        )
        .await
    }

    async fn replace_service(&self, namespace: &str, service: &Service) -> ClientResult<()> {
        let name = &service.metadata.name;
        self.put(
            &format!("/api/v1/namespaces/{namespace}/services/{name}"),
            "service",
            name,
            service,
        )
        .await
    }

    async fn list_services(&self, namespace: &str) -> ClientResult<Vec<Service>> {
        self.list(&format!("/api/v1/namespaces/{namespace}/services"), "service")
            .await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> ClientResult<()> {
        self.delete(
            &format!("/api/v1/namespaces/{namespace}/services/{name}"),
            "service",
            name,
        )
        .await
    }

    async fn list_pods(&self, namespace: &str) -> ClientResult<Vec<Pod>> {
        self.list(&format!("/api/v1/namespaces/{namespace}/pods"), "pod")
            .await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> ClientResult<()> {
        self.delete(
            &format!("/api/v1/namespaces/{namespace}/pods/{name}"),
            "pod",
            name,
        )
        .await
    }

    async fn exec(&self, namespace: &str, pod: &str, command: &[String]) -> ClientResult<String> {
        let url = self.exec_url(namespace, pod, command)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Exec(e.to_string()))?;

        let headers = request.headers_mut();
        headers.insert(SEC_WEBSOCKET_PROTOCOL, WsHeaderValue::from_static(EXEC_PROTOCOL));
        if let Some(token) = &self.token {
            let value = WsHeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ClientError::InvalidToken(e.to_string()))?;
            headers.insert(WS_AUTHORIZATION, value);
        }

        debug!(namespace, pod, command = ?command, "Opening exec stream");
        let (mut stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ClientError::Exec(format!("failed to open exec stream: {e}")))?;

        let mut output = ExecOutput::default();
        while let Some(message) = stream.next().await {
            match message.map_err(|e| ClientError::Exec(e.to_string()))? {
                Message::Binary(frame) => output.push_frame(&frame),
                Message::Close(_) => break,
                _ => {}
            }
        }

        output.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::worker_template;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service_json(cluster_ip: Option<&str>, resource_version: &str) -> serde_json::Value {
        let mut spec = serde_json::json!({
            "selector": { "app": "worker-1" },
            "ports": [{ "port": 10300 }]
        });
        if let Some(ip) = cluster_ip {
            spec["clusterIP"] = serde_json::json!(ip);
        }
        serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "worker-1-service", "resourceVersion": resource_version },
            "spec": spec
        })
    }

    #[tokio::test]
    async fn test_upsert_service_conflict_replaces_with_live_fields() {
        let server = MockServer::start().await;
        let base = "/api/v1/namespaces/ns/services";

        Mock::given(method("POST"))
            .and(path(base))
            .respond_with(ResponseTemplate::new(409).set_body_string("AlreadyExists"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{base}/worker-1-service")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(service_json(Some("10.0.0.7"), "42")),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(format!("{base}/worker-1-service")))
            .and(body_partial_json(serde_json::json!({
                "metadata": { "resourceVersion": "42" },
                "spec": { "clusterIP": "10.0.0.7" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(service_json(Some("10.0.0.7"), "43")))
            .expect(1)
            .mount(&server)
            .await;

        let client = KubeClient::new(&server.uri(), None).unwrap();
        let service: Service = serde_json::from_value(service_json(None, "1")).unwrap();
        client.upsert_service("ns", &service).await.unwrap();
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apis/apps/v1/namespaces/ns/deployments/worker-9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/apis/apps/v1/namespaces/ns/deployments/worker-1"))
            .respond_with(ResponseTemplate::new(409).set_body_string("stale"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/namespaces/ns/pods/worker-1-abc"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = KubeClient::new(&server.uri(), Some("token".to_string())).unwrap();

        let err = client.get_deployment("ns", "worker-9").await.unwrap_err();
        assert!(err.is_not_found());

        let dp = worker_template().with_app_name("worker-1");
        let err = client.replace_deployment("ns", &dp).await.unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 409, .. }));

        let err = client.delete_pod("ns", "worker-1-abc").await.unwrap_err();
        match err {
            ClientError::Api { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_token_is_rejected() {
        let err = KubeClient::new("https://cluster.local", Some("bad\ntoken".to_string()))
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_list_pods() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/ns/pods"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "PodList",
                "items": [
                    { "metadata": { "name": "worker-1-5d8f7-abcde" }, "status": { "phase": "Running" } },
                    { "metadata": { "name": "km-6c9d-xyz12" } }
                ]
            })))
            .mount(&server)
            .await;

        let client = KubeClient::new(&server.uri(), None).unwrap();
        let pods = client.list_pods("ns").await.unwrap();
        assert_eq!(pods.len(), 2);
        assert!(pods[0].belongs_to("worker-1"));
        assert!(pods[1].belongs_to("km"));
    }

    #[test]
    fn test_exec_url() {
        let client = KubeClient::new("https://10.0.0.1:6443/", None).unwrap();
        let argv = vec!["cat".to_string(), "./p2p/id_rsa.pub".to_string()];
        let url = client.exec_url("ns", "worker-1-abc", &argv).unwrap();

        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/api/v1/namespaces/ns/pods/worker-1-abc/exec");
        let commands: Vec<String> = url
            .query_pairs()
            .filter(|(k, _)| k == "command")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(commands, argv);
    }

    #[test]
    fn test_exec_output_demux() {
        let mut output = ExecOutput::default();
        output.push_frame(&[1, b'0', b'x']);
        output.push_frame(&[2, b'w', b'a', b'r', b'n']);
        output.push_frame(&[1, b'a', b'b']);
        output.push_frame(&[]);
        let mut status = vec![STATUS_CHANNEL];
        status.extend_from_slice(br#"{"metadata":{},"status":"Success"}"#);
        output.push_frame(&status);
        assert_eq!(output.finish().unwrap(), "0xab");
    }

    #[test]
    fn test_exec_output_failure_status() {
        let mut output = ExecOutput::default();
        output.push_frame(&[2, b'n', b'o', b'p', b'e']);
        let mut status = vec![STATUS_CHANNEL];
        status.extend_from_slice(
            br#"{"status":"Failure","message":"command terminated with non-zero exit code"}"#,
        );
        output.push_frame(&status);

        match output.finish() {
            Err(ClientError::Exec(message)) => {
                assert!(message.contains("non-zero exit code"));
                assert!(message.contains("nope"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
