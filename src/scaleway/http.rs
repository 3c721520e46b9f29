//! Thin JSON client for Scaleway endpoints that `scaleway-rs` does not cover.

use std::sync::LazyLock;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::error::{classify_status, classify_transport};
use crate::provider::ProviderError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const SCALEWAY_API_BASE: &str = "https://api.scaleway.com";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Authenticated JSON client bound to one secret key.
#[derive(Clone)]
pub(crate) struct ApiClient {
    base: String,
    secret_key: String,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub(crate) fn new(secret_key: &str) -> Self {
        Self {
            base: String::from(SCALEWAY_API_BASE),
            secret_key: secret_key.to_owned(),
        }
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let request = HTTP_CLIENT
            .get(format!("{}{path}", self.base))
            .query(query);
        self.send(request).await
    }

    pub(crate) async fn patch<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ProviderError> {
        let request = HTTP_CLIENT
            .patch(format!("{}{path}", self.base))
            .json(body);
        self.send(request).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError> {
        let response = request
            .header("X-Auth-Token", &self.secret_key)
            .send()
            .await
            .map_err(|err| classify_transport(&err))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| classify_transport(&err))?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        serde_json::from_slice(&body).map_err(|err| ProviderError::Malformed {
            message: err.to_string(),
        })
    }
}
