//! Classification of Scaleway faults into [`ProviderError`].
//!
//! Raw SDK and HTTP errors stop here; everything above this module only sees
//! the closed provider taxonomy.

use reqwest::StatusCode;
use scaleway_rs::{ScalewayApiError, ScalewayError};
use serde::Deserialize;

use crate::provider::ProviderError;

/// Maps a Scaleway error `type` field onto the provider taxonomy.
pub(crate) fn classify_api_error(api_err: &ScalewayApiError) -> ProviderError {
    classify_etype(&api_err.etype, api_err.message.clone())
}

fn classify_etype(etype: &str, message: String) -> ProviderError {
    match etype {
        "denied_authentication" | "authentication_error" | "permissions_denied" => {
            ProviderError::Unauthorized { message }
        }
        "not_found" | "unknown_resource" => ProviderError::NotFound { message },
        "too_many_requests" | "rate_limited" => ProviderError::Throttled { message },
        "internal_error" | "service_unavailable" => ProviderError::Unavailable { message },
        _ => ProviderError::Rejected { message },
    }
}

/// Error body returned by the JSON API.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    etype: String,
    #[serde(default)]
    message: String,
}

/// Classifies an error raised by the `scaleway-rs` client.
pub(crate) fn classify_sdk_error(error: ScalewayError) -> ProviderError {
    match error {
        ScalewayError::Api(api_err) => classify_api_error(&api_err),
        other => ProviderError::Unavailable {
            message: other.to_string(),
        },
    }
}

/// Classifies a transport failure from `reqwest`.
pub(crate) fn classify_transport(error: &reqwest::Error) -> ProviderError {
    if error.is_decode() {
        return ProviderError::Malformed {
            message: error.to_string(),
        };
    }
    ProviderError::Unavailable {
        message: error.to_string(),
    }
}

/// Classifies a non-success HTTP answer from its status and body.
///
/// The body's `type` field wins for 4xx answers other than 401, 403, 404 and
/// 429; those statuses are unambiguous on their own.
pub(crate) fn classify_status(status: StatusCode, body: &[u8]) -> ProviderError {
    let parsed = serde_json::from_slice::<ErrorBody>(body).ok();
    let message = parsed.as_ref().map_or_else(
        || {
            let text = String::from_utf8_lossy(body).trim().to_owned();
            if text.is_empty() {
                status.to_string()
            } else {
                text
            }
        },
        |error_body| error_body.message.clone(),
    );

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized { message },
        StatusCode::NOT_FOUND => ProviderError::NotFound { message },
        StatusCode::TOO_MANY_REQUESTS => ProviderError::Throttled { message },
        server if server.is_server_error() => ProviderError::Unavailable { message },
        _ => match parsed {
            Some(error_body) => classify_etype(&error_body.etype, message),
            None => ProviderError::Rejected { message },
        },
    }
}
