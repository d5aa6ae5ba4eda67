use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::types::ApiError;

/// Failure talking to the CA or Configuration service.
#[derive(Debug, Error)]
pub enum DownstreamError {
    /// Connection failure, timeout, or an unreadable body.
    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with its structured error schema.
    #[error("{service} rejected the request (status {status}): code={} message={}", .error.code, .error.message)]
    Rejected {
        service: &'static str,
        status: u16,
        error: ApiError,
    },

    /// Non-success status with a body matching neither schema.
    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// Success status with a body matching neither schema.
    #[error("{service} returned a malformed response: {detail}")]
    Malformed {
        service: &'static str,
        detail: String,
    },

    /// Local data the service shares with us could not be read.
    #[error("{service} data unavailable: {detail}")]
    Unavailable {
        service: &'static str,
        detail: String,
    },
}

/// Decode a downstream reply: success schema first, then the error schema,
/// and only then give up.
pub fn decode_reply<T: DeserializeOwned>(
    service: &'static str,
    status: StatusCode,
    body: &[u8],
) -> Result<T, DownstreamError> {
    if status.is_success() {
        let success_err = match serde_json::from_slice::<T>(body) {
            Ok(reply) => return Ok(reply),
            Err(e) => e,
        };

        return match serde_json::from_slice::<ApiError>(body) {
            Ok(error) => Err(DownstreamError::Rejected {
                service,
                status: status.as_u16(),
                error,
            }),
            Err(_) => Err(DownstreamError::Malformed {
                service,
                detail: success_err.to_string(),
            }),
        };
    }

    match serde_json::from_slice::<ApiError>(body) {
        Ok(error) => Err(DownstreamError::Rejected {
            service,
            status: status.as_u16(),
            error,
        }),
        Err(_) => Err(DownstreamError::Status {
            service,
            status: status.as_u16(),
            body: truncate(&String::from_utf8_lossy(body), 512),
        }),
    }
}

/// Send a request tagged with a fresh `x-request-id` and decode the reply.
pub async fn send_and_decode<T: DeserializeOwned>(
    service: &'static str,
    request: RequestBuilder,
) -> Result<T, DownstreamError> {
    let request_id = Uuid::new_v4().to_string();
    debug!("{} request: x-request-id={}", service, request_id);

    let resp = request
        .header("x-request-id", &request_id)
        .send()
        .await
        .map_err(|source| DownstreamError::Transport { service, source })?;

    let status = resp.status();
    let body = resp
        .bytes()
        .await
        .map_err(|source| DownstreamError::Transport { service, source })?;

    decode_reply(service, status, &body)
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
