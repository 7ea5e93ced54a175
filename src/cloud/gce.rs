//! Compute Engine REST adapter
//!
//! Talks to the Compute API v1 over HTTPS. Mutations return a long-running
//! operation; the adapter polls it with exponential backoff until it is
//! `DONE` or the operation timeout elapses, so a successful `insert` or
//! `delete` means the change has been applied.
//!
//! Error responses are mapped onto [`ProviderError::Api`] with the HTTP status
//! code. A `resourceInUseByAnotherResource` reason is surfaced with the
//! in-use marker in the message so the classifier can recognise it.

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use super::compute::{InstanceGroupManager, InstanceTemplate, KeyScope, ResourceKey};
use super::errors::{ProviderError, ProviderResult, RESOURCE_IN_USE_MARKER};
use crate::domain::ports::{ComputeProvider, InstanceGroupManagers, InstanceTemplates};
use crate::error::{Error, Result};

/// Default Compute API v1 endpoint
pub const DEFAULT_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1";

/// Metadata server token endpoint for the instance's default service account
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

const IN_USE_REASON: &str = "resourceInUseByAnotherResource";
const OPERATION_DONE: &str = "DONE";

/// Tokens are refreshed this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

// =============================================================================
// Configuration
// =============================================================================

/// Where access tokens come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// Fixed bearer token
    Static(String),
    /// File holding a bearer token, re-read on every refresh
    File(PathBuf),
    /// GCE metadata server
    MetadataServer,
}

/// Configuration for the Compute adapter
#[derive(Debug, Clone)]
pub struct GceConfig {
    /// API endpoint, without trailing slash
    pub endpoint: String,
    /// Project owning the resources
    pub project: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Upper bound on waiting for a long-running operation
    pub operation_timeout: Duration,
    pub token_source: TokenSource,
}

impl Default for GceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            project: String::new(),
            request_timeout: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(300),
            token_source: TokenSource::MetadataServer,
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// Long-running operation
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub self_link: Option<String>,
    #[serde(default)]
    pub http_error_status_code: Option<u16>,
    #[serde(default)]
    pub error: Option<OperationErrors>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OperationErrors {
    #[serde(default)]
    pub errors: Vec<OperationError>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status == OPERATION_DONE
    }

    /// Outcome of a finished operation
    pub fn into_result(self) -> ProviderResult<()> {
        let errors = match self.error {
            Some(e) if !e.errors.is_empty() => e.errors,
            _ => return Ok(()),
        };

        // Operation error codes are upper snake case, e.g.
        // RESOURCE_IN_USE_BY_ANOTHER_RESOURCE, so the marker survives as-is
        let message = errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(ProviderError::api(
            self.http_error_status_code.unwrap_or(400),
            message,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

/// Map an error response onto a provider error
pub fn parse_error_body(status: u16, body: &str) -> ProviderError {
    let envelope = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error,
        Err(_) => return ProviderError::api(status, body.trim()),
    };

    let in_use = envelope.errors.iter().any(|e| e.reason == IN_USE_REASON);
    let message = if in_use && !envelope.message.contains(RESOURCE_IN_USE_MARKER) {
        format!("{}: {}", RESOURCE_IN_USE_MARKER, envelope.message)
    } else {
        envelope.message
    };

    ProviderError::api(envelope.code.unwrap_or(status), message)
}

fn transport(err: reqwest::Error) -> ProviderError {
    ProviderError::Transport(err.to_string())
}

// =============================================================================
// Token Cache
// =============================================================================

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.expires_at
            .map_or(true, |at| Instant::now() + TOKEN_REFRESH_MARGIN < at)
    }
}

/// Read a bearer token from a file, trimming surrounding whitespace
pub async fn read_token_file(path: &std::path::Path) -> Result<String> {
    let token = tokio::fs::read_to_string(path).await?;
    let token = token.trim();
    if token.is_empty() {
        return Err(Error::Configuration(format!(
            "token file {} is empty",
            path.display()
        )));
    }
    Ok(token.to_string())
}

// =============================================================================
// Compute Client
// =============================================================================

/// Compute provider backed by the Compute Engine REST API
pub struct GceCompute {
    config: GceConfig,
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl GceCompute {
    /// Create a new adapter
    pub fn new(config: GceConfig) -> Result<Self> {
        if config.project.is_empty() {
            return Err(Error::Configuration("GCE project is not set".to_string()));
        }

        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    /// Use a preconfigured HTTP client
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn project(&self) -> &str {
        &self.config.project
    }

    pub fn templates_url(&self) -> String {
        format!(
            "{}/projects/{}/global/instanceTemplates",
            self.config.endpoint, self.config.project
        )
    }

    pub fn template_url(&self, name: &str) -> String {
        format!("{}/{}", self.templates_url(), urlencoding::encode(name))
    }

    pub fn group_managers_url(&self, zone: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}/instanceGroupManagers",
            self.config.endpoint,
            self.config.project,
            urlencoding::encode(zone)
        )
    }

    pub fn group_manager_url(&self, zone: &str, name: &str) -> String {
        format!(
            "{}/{}",
            self.group_managers_url(zone),
            urlencoding::encode(name)
        )
    }

    /// Operation URL when the operation carries no self link
    pub fn operation_url(&self, scope: &KeyScope, name: &str) -> String {
        match scope {
            KeyScope::Global => format!(
                "{}/projects/{}/global/operations/{}",
                self.config.endpoint, self.config.project, name
            ),
            KeyScope::Zonal(zone) => format!(
                "{}/projects/{}/zones/{}/operations/{}",
                self.config.endpoint, self.config.project, zone, name
            ),
        }
    }

    async fn access_token(&self) -> ProviderResult<String> {
        let cached = self.token.lock().clone().filter(CachedToken::is_fresh);
        if let Some(cached) = cached {
            return Ok(cached.value);
        }

        let fresh = match &self.config.token_source {
            TokenSource::Static(token) => CachedToken {
                value: token.clone(),
                expires_at: None,
            },
            TokenSource::File(path) => CachedToken {
                value: read_token_file(path)
                    .await
                    .map_err(|e| ProviderError::Transport(format!("reading token: {}", e)))?,
                // Re-read periodically so rotated tokens are picked up
                expires_at: Some(Instant::now() + TOKEN_REFRESH_MARGIN * 5),
            },
            TokenSource::MetadataServer => self.metadata_token().await?,
        };

        let value = fresh.value.clone();
        *self.token.lock() = Some(fresh);
        Ok(value)
    }

    async fn metadata_token(&self) -> ProviderResult<CachedToken> {
        let response = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(transport)?;

        let token: AccessToken = Self::decode(response).await?;
        debug!(expires_in = token.expires_in, "Fetched access token from metadata server");

        Ok(CachedToken {
            value: token.access_token,
            expires_at: Some(Instant::now() + Duration::from_secs(token.expires_in)),
        })
    }

    async fn send(&self, request: RequestBuilder) -> ProviderResult<Response> {
        let token = self.access_token().await?;
        request.bearer_auth(token).send().await.map_err(transport)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ProviderResult<T> {
        let status = response.status();
        if status.is_success() {
            response.json().await.map_err(transport)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(parse_error_body(status.as_u16(), &body))
        }
    }

    /// Blocks server-side until the operation is done or a deadline passes
    async fn poll(&self, url: &str) -> ProviderResult<Operation> {
        let response = self.send(self.client.post(format!("{}/wait", url))).await?;
        Self::decode(response).await
    }

    /// Wait for an operation to finish and return its outcome
    #[instrument(skip(self, operation), fields(operation = %operation.name))]
    async fn wait(&self, scope: &KeyScope, operation: Operation) -> ProviderResult<()> {
        if operation.is_done() {
            return operation.into_result();
        }

        let url = operation
            .self_link
            .clone()
            .unwrap_or_else(|| self.operation_url(scope, &operation.name));
        let url = url.as_str();
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            max_elapsed_time: Some(self.config.operation_timeout),
            ..Default::default()
        };

        let finished = backoff::future::retry(policy, move || async move {
            let op: Operation = self
                .poll(url)
                .await
                .map_err(|e| match e {
                    ProviderError::Transport(_) => backoff::Error::transient(e),
                    _ => backoff::Error::permanent(e),
                })?;

            if op.is_done() {
                Ok(op)
            } else {
                Err(backoff::Error::transient(ProviderError::Transport(format!(
                    "operation {} is still {}",
                    op.name, op.status
                ))))
            }
        })
        .await;

        match finished {
            Ok(op) => op.into_result(),
            Err(e) => {
                warn!(error = %e, "Gave up waiting for operation");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl InstanceTemplates for GceCompute {
    async fn get(&self, key: &ResourceKey) -> ProviderResult<InstanceTemplate> {
        let response = self.send(self.client.get(self.template_url(&key.name))).await?;
        Self::decode(response).await
    }

    async fn insert(&self, key: &ResourceKey, template: &InstanceTemplate) -> ProviderResult<()> {
        let mut body = template.clone();
        body.name = key.name.clone();

        let response = self
            .send(self.client.post(self.templates_url()).json(&body))
            .await?;
        let operation: Operation = Self::decode(response).await?;
        self.wait(&key.scope, operation).await
    }

    async fn delete(&self, key: &ResourceKey) -> ProviderResult<()> {
        let response = self
            .send(self.client.delete(self.template_url(&key.name)))
            .await?;
        let operation: Operation = Self::decode(response).await?;
        self.wait(&key.scope, operation).await
    }
}

#[async_trait]
impl InstanceGroupManagers for GceCompute {
    async fn get(&self, key: &ResourceKey) -> ProviderResult<InstanceGroupManager> {
        let zone = zone_of(key)?;
        let response = self
            .send(self.client.get(self.group_manager_url(zone, &key.name)))
            .await?;
        Self::decode(response).await
    }

    async fn insert(&self, key: &ResourceKey, igm: &InstanceGroupManager) -> ProviderResult<()> {
        let zone = zone_of(key)?;
        let mut body = igm.clone();
        body.name = key.name.clone();

        let response = self
            .send(self.client.post(self.group_managers_url(zone)).json(&body))
            .await?;
        let operation: Operation = Self::decode(response).await?;
        self.wait(&key.scope, operation).await
    }

    async fn delete(&self, key: &ResourceKey) -> ProviderResult<()> {
        let zone = zone_of(key)?;
        let response = self
            .send(self.client.delete(self.group_manager_url(zone, &key.name)))
            .await?;
        let operation: Operation = Self::decode(response).await?;
        self.wait(&key.scope, operation).await
    }
}

impl ComputeProvider for GceCompute {
    fn provider_name(&self) -> &str {
        "gce"
    }
}

fn zone_of(key: &ResourceKey) -> ProviderResult<&str> {
    key.zone().ok_or_else(|| {
        ProviderError::Transport(format!("group manager key {} has no zone", key))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::errors::{is_already_exists, is_in_use, is_not_found};
    use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server};
    use std::collections::VecDeque;
    use std::convert::Infallible;
    use std::io::Write;
    use std::net::SocketAddr;
    use std::sync::Arc;

    fn compute() -> GceCompute {
        GceCompute::new(GceConfig {
            endpoint: "https://compute.example.test/compute/v1".into(),
            project: "my-project".into(),
            token_source: TokenSource::Static("t0k3n".into()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_requires_project() {
        let result = GceCompute::new(GceConfig::default());
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_urls() {
        let c = compute();
        assert_eq!(
            c.template_url("a1b2"),
            "https://compute.example.test/compute/v1/projects/my-project/global/instanceTemplates/a1b2"
        );
        assert_eq!(
            c.group_manager_url("us-central1-a", "pool-0"),
            "https://compute.example.test/compute/v1/projects/my-project/zones/us-central1-a/instanceGroupManagers/pool-0"
        );
        assert_eq!(
            c.operation_url(&KeyScope::Zonal("us-central1-a".into()), "op-1"),
            "https://compute.example.test/compute/v1/projects/my-project/zones/us-central1-a/operations/op-1"
        );
        assert_eq!(
            c.operation_url(&KeyScope::Global, "op-2"),
            "https://compute.example.test/compute/v1/projects/my-project/global/operations/op-2"
        );
    }

    #[test]
    fn test_parse_not_found() {
        let body = r#"{"error": {"code": 404, "message": "The resource 'projects/p/global/instanceTemplates/a1' was not found", "errors": [{"reason": "notFound"}]}}"#;
        let err = parse_error_body(404, body);
        assert!(is_not_found(&err));
    }

    #[test]
    fn test_parse_already_exists() {
        let body = r#"{"error": {"code": 409, "message": "already exists", "errors": [{"reason": "alreadyExists"}]}}"#;
        assert!(is_already_exists(&parse_error_body(409, body)));
    }

    #[test]
    fn test_parse_in_use_adds_marker() {
        let body = r#"{"error": {"code": 400, "message": "The instance_template resource 'a1' is already being used by 'pool-0'", "errors": [{"reason": "resourceInUseByAnotherResource"}]}}"#;
        let err = parse_error_body(400, body);
        assert!(is_in_use(&err));
        assert_eq!(err.code(), Some(400));
    }

    #[test]
    fn test_parse_plain_bad_request_is_not_in_use() {
        let body = r#"{"error": {"code": 400, "message": "Invalid value for field", "errors": [{"reason": "invalid"}]}}"#;
        let err = parse_error_body(400, body);
        assert!(!is_in_use(&err));
        assert_eq!(err.code(), Some(400));
    }

    #[test]
    fn test_parse_non_json_body() {
        let err = parse_error_body(502, "Bad Gateway\n");
        assert_eq!(err, ProviderError::api(502, "Bad Gateway"));
    }

    #[test]
    fn test_operation_results() {
        let done: Operation = serde_json::from_value(serde_json::json!({
            "name": "op-1",
            "status": "DONE"
        }))
        .unwrap();
        assert!(done.is_done());
        assert!(done.into_result().is_ok());

        let failed: Operation = serde_json::from_value(serde_json::json!({
            "name": "op-2",
            "status": "DONE",
            "httpErrorStatusCode": 400,
            "error": {"errors": [{
                "code": "RESOURCE_IN_USE_BY_ANOTHER_RESOURCE",
                "message": "The instance_template resource 'a1' is already being used by 'pool-0'"
            }]}
        }))
        .unwrap();
        let err = failed.into_result().unwrap_err();
        assert!(is_in_use(&err));

        let running = Operation {
            name: "op-3".into(),
            status: "RUNNING".into(),
            ..Default::default()
        };
        assert!(!running.is_done());
    }

    #[test]
    fn test_zone_of_global_key() {
        assert!(zone_of(&ResourceKey::global("x")).unwrap_err().is_transport());
        assert_eq!(zone_of(&ResourceKey::zonal("x", "z")).unwrap(), "z");
    }

    #[tokio::test]
    async fn test_read_token_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  ya29.token  ").unwrap();

        let token = read_token_file(file.path()).await.unwrap();
        assert_eq!(token, "ya29.token");
    }

    #[tokio::test]
    async fn test_empty_token_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = read_token_file(file.path()).await;
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_static_token_is_cached() {
        let c = compute();
        assert_eq!(c.access_token().await.unwrap(), "t0k3n");
        assert!(c.token.lock().is_some());
        assert_eq!(c.access_token().await.unwrap(), "t0k3n");
    }

    // =========================================================================
    // Against a local Compute API
    // =========================================================================

    /// Requests seen by the local API as ("METHOD /path", body)
    type Seen = Arc<Mutex<Vec<(String, String)>>>;

    const TEMPLATES_PATH: &str = "/compute/v1/projects/my-project/global/instanceTemplates";
    const GLOBAL_OPERATIONS_PATH: &str = "/compute/v1/projects/my-project/global/operations";

    /// Answer requests with `responses` in order; the last one repeats
    async fn local_api(responses: Vec<(u16, &'static str)>) -> (String, Seen) {
        let responses = Arc::new(Mutex::new(VecDeque::from(responses)));
        let seen: Seen = Arc::default();

        let recorded = seen.clone();
        let make_svc = make_service_fn(move |_conn| {
            let responses = responses.clone();
            let recorded = recorded.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let responses = responses.clone();
                    let recorded = recorded.clone();
                    async move {
                        let authorized = req
                            .headers()
                            .get(AUTHORIZATION)
                            .map_or(false, |value| value == "Bearer t0k3n");
                        let line = format!("{} {}", req.method(), req.uri().path());
                        let body = hyper::body::to_bytes(req.into_body())
                            .await
                            .unwrap_or_default();
                        recorded
                            .lock()
                            .push((line, String::from_utf8_lossy(&body).into_owned()));

                        let (status, body) = if authorized {
                            let mut queue = responses.lock();
                            let next = if queue.len() > 1 {
                                queue.pop_front()
                            } else {
                                queue.front().copied()
                            };
                            next.unwrap_or((500, "nothing scripted"))
                        } else {
                            (401, r#"{"error": {"code": 401, "message": "unauthenticated"}}"#)
                        };

                        Ok::<_, Infallible>(
                            hyper::Response::builder()
                                .status(status)
                                .header(CONTENT_TYPE, "application/json")
                                .body(Body::from(body))
                                .unwrap(),
                        )
                    }
                }))
            }
        });

        let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
        let server = Server::bind(&addr).serve(make_svc);
        let endpoint = format!("http://{}/compute/v1", server.local_addr());
        tokio::spawn(server);

        (endpoint, seen)
    }

    fn local_compute(endpoint: String, operation_timeout: Duration) -> GceCompute {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        GceCompute::new(GceConfig {
            endpoint,
            project: "my-project".into(),
            operation_timeout,
            token_source: TokenSource::Static("t0k3n".into()),
            ..Default::default()
        })
        .unwrap()
        .with_client(client)
    }

    fn requests(seen: &Seen) -> Vec<String> {
        seen.lock().iter().map(|(line, _)| line.clone()).collect()
    }

    const RUNNING: &str = r#"{"kind": "compute#operation", "name": "op-1", "status": "RUNNING"}"#;
    const DONE: &str = r#"{"kind": "compute#operation", "name": "op-1", "status": "DONE"}"#;

    #[tokio::test]
    async fn test_get_template_decodes_api_body() {
        let body = r#"{
            "kind": "compute#instanceTemplate",
            "id": "4519384562398475612",
            "name": "a1b2",
            "properties": {
                "machineType": "n1-standard-2",
                "disks": [{
                    "boot": true,
                    "autoDelete": true,
                    "initializeParams": {"diskSizeGb": "30", "diskType": "pd-standard", "sourceImage": "img"}
                }]
            }
        }"#;
        let (endpoint, seen) = local_api(vec![(200, body)]).await;
        let c = local_compute(endpoint, Duration::from_secs(5));

        let template = InstanceTemplates::get(&c, &ResourceKey::global("a1b2"))
            .await
            .unwrap();
        assert_eq!(template.name, "a1b2");
        assert_eq!(template.properties.machine_type, "n1-standard-2");
        assert_eq!(template.properties.disks[0].initialize_params.disk_size_gb, 30);
        assert_eq!(requests(&seen), vec![format!("GET {}/a1b2", TEMPLATES_PATH)]);
    }

    #[tokio::test]
    async fn test_get_missing_template() {
        let body = r#"{"error": {"code": 404, "message": "The resource 'a1b2' was not found", "errors": [{"reason": "notFound"}]}}"#;
        let (endpoint, _) = local_api(vec![(404, body)]).await;
        let c = local_compute(endpoint, Duration::from_secs(5));

        let err = InstanceTemplates::get(&c, &ResourceKey::global("a1b2"))
            .await
            .unwrap_err();
        assert!(is_not_found(&err));
    }

    #[tokio::test]
    async fn test_get_group_manager_reference() {
        let body = r#"{
            "kind": "compute#instanceGroupManager",
            "name": "pool-0",
            "zone": "https://www.googleapis.com/compute/v1/projects/my-project/zones/us-central1-a",
            "baseInstanceName": "pool-0",
            "instanceTemplate": "https://www.googleapis.com/compute/v1/projects/my-project/global/instanceTemplates/aold",
            "targetSize": 2
        }"#;
        let (endpoint, seen) = local_api(vec![(200, body)]).await;
        let c = local_compute(endpoint, Duration::from_secs(5));

        let igm = InstanceGroupManagers::get(&c, &ResourceKey::zonal("pool-0", "us-central1-a"))
            .await
            .unwrap();
        assert_eq!(igm.template_name(), "aold");
        assert_eq!(igm.target_size, 2);
        assert_eq!(
            requests(&seen),
            vec!["GET /compute/v1/projects/my-project/zones/us-central1-a/instanceGroupManagers/pool-0"]
        );
    }

    #[tokio::test]
    async fn test_insert_waits_until_done() {
        let (endpoint, seen) = local_api(vec![(200, RUNNING), (200, RUNNING), (200, DONE)]).await;
        let c = local_compute(endpoint, Duration::from_secs(30));

        let template = InstanceTemplate::default();
        InstanceTemplates::insert(&c, &ResourceKey::global("a1b2"), &template)
            .await
            .unwrap();

        let wait = format!("POST {}/op-1/wait", GLOBAL_OPERATIONS_PATH);
        assert_eq!(
            requests(&seen),
            vec![format!("POST {}", TEMPLATES_PATH), wait.clone(), wait]
        );
        let inserted: serde_json::Value = serde_json::from_str(&seen.lock()[0].1).unwrap();
        assert_eq!(inserted["name"], "a1b2");
    }

    #[tokio::test]
    async fn test_zonal_insert_done_immediately() {
        let (endpoint, seen) = local_api(vec![(200, DONE)]).await;
        let c = local_compute(endpoint, Duration::from_secs(5));

        let igm = InstanceGroupManager {
            base_instance_name: "pool-0".into(),
            instance_template: "projects/my-project/global/instanceTemplates/a1b2".into(),
            target_size: 2,
            ..Default::default()
        };
        InstanceGroupManagers::insert(&c, &ResourceKey::zonal("pool-0", "us-central1-a"), &igm)
            .await
            .unwrap();
        assert_eq!(
            requests(&seen),
            vec!["POST /compute/v1/projects/my-project/zones/us-central1-a/instanceGroupManagers"]
        );
    }

    #[tokio::test]
    async fn test_wait_retries_undecodable_poll() {
        let (endpoint, seen) =
            local_api(vec![(200, RUNNING), (200, "<html>gateway</html>"), (200, DONE)]).await;
        let c = local_compute(endpoint, Duration::from_secs(30));

        InstanceTemplates::delete(&c, &ResourceKey::global("a1b2"))
            .await
            .unwrap();
        assert_eq!(seen.lock().len(), 3);
        assert_eq!(requests(&seen)[0], format!("DELETE {}/a1b2", TEMPLATES_PATH));
    }

    #[tokio::test]
    async fn test_wait_stops_on_api_error() {
        let unavailable = r#"{"error": {"code": 503, "message": "backend unavailable"}}"#;
        let (endpoint, seen) = local_api(vec![(200, RUNNING), (503, unavailable), (200, DONE)]).await;
        let c = local_compute(endpoint, Duration::from_secs(30));

        let err = InstanceTemplates::delete(&c, &ResourceKey::global("a1b2"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(503));
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_wait_gives_up_after_operation_timeout() {
        let (endpoint, _) = local_api(vec![(200, RUNNING)]).await;
        let c = local_compute(endpoint, Duration::from_secs(1));

        let err = InstanceTemplates::delete(&c, &ResourceKey::global("a1b2"))
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("RUNNING"));
    }

    #[tokio::test]
    async fn test_delete_in_use_template_rejected() {
        let body = r#"{"error": {"code": 400, "message": "The instance_template resource 'a1b2' is already being used by 'pool-0'", "errors": [{"reason": "resourceInUseByAnotherResource"}]}}"#;
        let (endpoint, seen) = local_api(vec![(400, body)]).await;
        let c = local_compute(endpoint, Duration::from_secs(5));

        let err = InstanceTemplates::delete(&c, &ResourceKey::global("a1b2"))
            .await
            .unwrap_err();
        assert!(is_in_use(&err));
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_in_use_reported_by_operation() {
        let failed = r#"{
            "name": "op-1",
            "status": "DONE",
            "httpErrorStatusCode": 400,
            "error": {"errors": [{
                "code": "RESOURCE_IN_USE_BY_ANOTHER_RESOURCE",
                "message": "The instance_template resource 'a1b2' is already being used by 'pool-0'"
            }]}
        }"#;
        let (endpoint, _) = local_api(vec![(200, RUNNING), (200, failed)]).await;
        let c = local_compute(endpoint, Duration::from_secs(30));

        let err = InstanceTemplates::delete(&c, &ResourceKey::global("a1b2"))
            .await
            .unwrap_err();
        assert!(is_in_use(&err));
        assert!(!is_not_found(&err));
    }

    #[tokio::test]
    async fn test_insert_conflict() {
        let body = r#"{"error": {"code": 409, "message": "The resource 'a1b2' already exists", "errors": [{"reason": "alreadyExists"}]}}"#;
        let (endpoint, _) = local_api(vec![(409, body)]).await;
        let c = local_compute(endpoint, Duration::from_secs(5));

        let err = InstanceTemplates::insert(&c, &ResourceKey::global("a1b2"), &InstanceTemplate::default())
            .await
            .unwrap_err();
        assert!(is_already_exists(&err));
    }
}
