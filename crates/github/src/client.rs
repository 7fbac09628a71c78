//! Authenticated transport shared by the REST and GraphQL adapters.

use std::sync::Arc;
use std::time::Duration;

use pipeline::ports::TrackerError;
use pipeline::RepositoryId;
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

const DEFAULT_API_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_ERROR_BODY_LEN: usize = 200;

pub(crate) const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
pub(crate) const DIFF_MEDIA_TYPE: &str = "application/vnd.github.v3.diff";

/// Cheap to clone; every adapter in this crate shares one connection pool.
#[derive(Clone)]
pub struct GitHubClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    token: String,
    api_url: Url,
    owner: String,
    repo: String,
}

impl GitHubClient {
    pub fn new(token: impl Into<String>, repository: &RepositoryId) -> Result<Self, TrackerError> {
        Self::with_api_url(token, repository, DEFAULT_API_URL)
    }

    /// Targets a GitHub Enterprise host or a test server.
    pub fn with_api_url(
        token: impl Into<String>,
        repository: &RepositoryId,
        api_url: &str,
    ) -> Result<Self, TrackerError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(TrackerError::MissingToken);
        }
        let (owner, repo) = repository.owner_and_name().ok_or_else(|| TrackerError::InvalidResponse {
            operation: "configure repository".into(),
            reason: format!("'{repository}' is not in owner/repo form"),
        })?;
        let api_url = Url::parse(api_url).map_err(|e| TrackerError::InvalidResponse {
            operation: "configure API URL".into(),
            reason: e.to_string(),
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("taskwright/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TrackerError::Api {
                operation: "build HTTP client".into(),
                status: 0,
                message: e.to_string(),
            })?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                token,
                api_url,
                owner: owner.to_string(),
                repo: repo.to_string(),
            }),
        })
    }

    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    /// `/repos/{owner}/{repo}/{segments...}` with each segment percent-encoded.
    pub(crate) fn repo_url(&self, segments: &[&str]) -> Url {
        let mut url = self.inner.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .push("repos")
                .push(&self.inner.owner)
                .push(&self.inner.repo)
                .extend(segments);
        }
        url
    }

    pub(crate) fn graphql_url(&self) -> Url {
        let mut url = self.inner.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("graphql");
        }
        url
    }

    fn request(&self, method: Method, url: Url, accept: &str) -> reqwest::RequestBuilder {
        self.inner
            .http
            .request(method, url)
            .bearer_auth(&self.inner.token)
            .header(ACCEPT, accept)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Sends a request and returns the raw body of a 2xx response.
    pub(crate) async fn send_raw(
        &self,
        operation: &str,
        method: Method,
        url: Url,
        accept: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<String, TrackerError> {
        let mut builder = self.request(method, url, accept);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await.map_err(|e| TrackerError::Transient {
            operation: operation.to_string(),
            status: 0,
            message: e.to_string(),
        })?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await.map_err(|e| TrackerError::Transient {
            operation: operation.to_string(),
            status: status.as_u16(),
            message: e.to_string(),
        })?;
        debug!(operation, status = status.as_u16(), "GitHub response");
        if status.is_success() {
            Ok(text)
        } else {
            Err(classify(operation, status, &headers, &text))
        }
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
    ) -> Result<T, TrackerError> {
        let text = self.send_raw(operation, method, url, JSON_MEDIA_TYPE, body).await?;
        decode(operation, &text)
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, operation: &str, url: Url) -> Result<T, TrackerError> {
        self.send_json(operation, Method::GET, url, None).await
    }

    pub(crate) async fn graphql<V: Serialize, T: DeserializeOwned>(
        &self,
        operation: &str,
        query: &str,
        variables: V,
    ) -> Result<T, TrackerError> {
        let body = serde_json::json!({ "query": query, "variables": variables });
        let text = self
            .send_raw(operation, Method::POST, self.graphql_url(), JSON_MEDIA_TYPE, Some(&body))
            .await?;
        let envelope: GraphQlEnvelope<T> = decode(operation, &text)?;
        if let Some(error) = envelope.errors.into_iter().next() {
            return Err(graphql_error(operation, error));
        }
        envelope.data.ok_or_else(|| TrackerError::InvalidResponse {
            operation: operation.to_string(),
            reason: "GraphQL response carried neither data nor errors".into(),
        })
    }
}

pub(crate) fn decode<T: DeserializeOwned>(operation: &str, text: &str) -> Result<T, TrackerError> {
    serde_json::from_str(text).map_err(|e| TrackerError::InvalidResponse {
        operation: operation.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn classify(operation: &str, status: StatusCode, headers: &HeaderMap, body: &str) -> TrackerError {
    let operation = operation.to_string();
    let message = sanitize(body);
    let rate_limit_exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");
    match status.as_u16() {
        429 => TrackerError::RateLimited {
            operation,
            retry_after: retry_after(headers),
        },
        403 if rate_limit_exhausted => TrackerError::RateLimited {
            operation,
            retry_after: retry_after(headers),
        },
        401 | 403 => TrackerError::PermissionDenied { operation, message },
        404 => TrackerError::NotFound { what: operation },
        code if status.is_server_error() => TrackerError::Transient {
            operation,
            status: code,
            message,
        },
        code => TrackerError::Api {
            operation,
            status: code,
            message,
        },
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Truncates error bodies and drops any that might echo a token.
fn sanitize(body: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &["token", "bearer", "ghp_", "gho_", "ghs_", "github_pat_"];
    let mut end = body.len().min(MAX_ERROR_BODY_LEN);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    let truncated = body[..end].trim();
    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(error details redacted)".to_string();
    }
    truncated.to_string()
}

#[derive(serde::Deserialize)]
struct GraphQlEnvelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct GraphQlError {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: String,
}

fn graphql_error(operation: &str, error: GraphQlError) -> TrackerError {
    let operation = operation.to_string();
    match error.kind.as_deref() {
        Some("FORBIDDEN") | Some("INSUFFICIENT_SCOPES") => TrackerError::PermissionDenied {
            operation,
            message: error.message,
        },
        Some("NOT_FOUND") => TrackerError::NotFound { what: operation },
        Some("RATE_LIMITED") => TrackerError::RateLimited {
            operation,
            retry_after: None,
        },
        _ => TrackerError::Api {
            operation,
            status: 200,
            message: error.message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn client() -> GitHubClient {
        let repo = RepositoryId::new("acme/widgets").expect("repo");
        GitHubClient::with_api_url("t0ken", &repo, "https://ghe.example.com/api/v3").expect("client")
    }

    #[test]
    fn label_names_are_percent_encoded_in_paths() {
        let url = client().repo_url(&["issues", "7", "labels", "needs review"]);
        assert_eq!(
            url.as_str(),
            "https://ghe.example.com/api/v3/repos/acme/widgets/issues/7/labels/needs%20review"
        );
    }

    #[test]
    fn graphql_lives_beside_the_rest_root() {
        let url = client().graphql_url();
        assert_eq!(url.as_str(), "https://ghe.example.com/api/v3/graphql");
    }

    #[test]
    fn empty_token_is_missing() {
        let repo = RepositoryId::new("acme/widgets").expect("repo");
        assert!(matches!(GitHubClient::new(" ", &repo), Err(TrackerError::MissingToken)));
    }

    #[test]
    fn malformed_repository_is_rejected() {
        let repo = RepositoryId::new("widgets").expect("repo");
        assert!(matches!(
            GitHubClient::new("t", &repo),
            Err(TrackerError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn forbidden_with_exhausted_quota_is_rate_limited() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(
            classify("add label", StatusCode::FORBIDDEN, &headers, ""),
            TrackerError::RateLimited {
                operation: "add label".into(),
                retry_after: Some(Duration::from_secs(30)),
            }
        );
        assert!(matches!(
            classify("add label", StatusCode::FORBIDDEN, &HeaderMap::new(), "Resource not accessible"),
            TrackerError::PermissionDenied { .. }
        ));
    }

    #[test]
    fn statuses_map_to_tracker_errors() {
        let h = HeaderMap::new();
        assert!(matches!(
            classify("get issue #3", StatusCode::NOT_FOUND, &h, ""),
            TrackerError::NotFound { .. }
        ));
        assert!(matches!(
            classify("x", StatusCode::SERVICE_UNAVAILABLE, &h, ""),
            TrackerError::Transient { status: 503, .. }
        ));
        assert!(matches!(
            classify("x", StatusCode::UNPROCESSABLE_ENTITY, &h, "Validation Failed"),
            TrackerError::Api { status: 422, .. }
        ));
    }

    #[test]
    fn error_bodies_mentioning_tokens_are_redacted() {
        assert_eq!(sanitize("Bad credentials for token ghp_abc"), "(error details redacted)");
        assert_eq!(sanitize("Validation Failed"), "Validation Failed");
    }

    #[test]
    fn graphql_forbidden_maps_to_permission_denied() {
        let error = GraphQlError {
            kind: Some("FORBIDDEN".into()),
            message: "Resource not accessible by integration".into(),
        };
        assert!(matches!(
            graphql_error("set project status", error),
            TrackerError::PermissionDenied { .. }
        ));
    }
}
