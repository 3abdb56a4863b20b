//! Authenticated request wrapper around the external consumer's HTTP API.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::delivery::auth_headers;
use crate::manager::CredentialManager;
use crate::{Error, Result};

const MAX_ERROR_BODY: usize = 500;

/// HTTP client for the consumer service that handles auth transparently.
///
/// Each request pulls the active credential through the manager (which
/// refreshes lazily), attaches the per-request auth headers, and on a
/// 401/403 forces one refresh and resends exactly once. A second auth
/// failure surfaces [`Error::AuthRejectedByConsumer`]; non-auth failures are
/// never routed through the refresh path.
pub struct ConsumerClient {
    http: reqwest::Client,
    base_url: Url,
    manager: Arc<CredentialManager>,
}

impl ConsumerClient {
    pub fn new(base_url: &str, manager: Arc<CredentialManager>) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: Url::parse(base_url)?,
            manager,
        })
    }

    pub async fn get_json(&self, path: &str) -> Result<Value> {
        self.send(Method::GET, path, None).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        self.send(Method::POST, path, Some(body)).await
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = self.base_url.join(path)?;

        let auth = self.current_auth().await?;
        let response = self
            .dispatch(method.clone(), url.clone(), body, auth.as_ref())
            .await?;
        let status = response.status();

        if !is_auth_failure(status) {
            return into_json(response).await;
        }

        debug!(%status, "consumer rejected credential, forcing refresh");
        let refreshed = match self.manager.force_refresh_active_token().await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!(error = %e, "forced refresh failed");
                None
            }
        };
        let Some(auth) = refreshed else {
            return Err(Error::AuthRejectedByConsumer {
                status: status.as_u16(),
            });
        };

        let retry = self.dispatch(method, url, body, Some(&auth)).await?;
        let retry_status = retry.status();
        if is_auth_failure(retry_status) {
            return Err(Error::AuthRejectedByConsumer {
                status: retry_status.as_u16(),
            });
        }
        into_json(retry).await
    }

    /// Active provider id and api key, when one is available. Lazy refresh
    /// happens inside the manager; `needs_login` errors propagate so the
    /// caller learns about a dead credential before the request goes out.
    async fn current_auth(&self) -> Result<Option<(String, String)>> {
        let Some(provider_id) = self.manager.active_source().await else {
            return Ok(None);
        };
        match self.manager.get_api_key(&provider_id).await? {
            Some(api_key) => Ok(Some((provider_id, api_key))),
            None => Ok(None),
        }
    }

    async fn dispatch(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        auth: Option<&(String, String)>,
    ) -> Result<reqwest::Response> {
        let mut request = self.http.request(method, url);
        if let Some((provider_id, api_key)) = auth {
            for (name, value) in auth_headers(provider_id, api_key) {
                request = request.header(name, value);
            }
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

async fn into_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let mut message = response.text().await.unwrap_or_default();
        message.truncate(MAX_ERROR_BODY);
        return Err(Error::Consumer {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response.json().await?)
}
