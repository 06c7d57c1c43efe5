//! HTTP plumbing shared by the reqwest-based adapters.

use std::time::Duration;

use reqwest::{Client, Response};
use tracing::warn;

use crate::types::Provider;
use crate::{HeimdallError, Result};

/// Backstop timeout for adapter clients; the gateway's per-attempt
/// timeout normally fires first.
pub(crate) const CLIENT_TIMEOUT: Duration = Duration::from_secs(120);

pub(crate) fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to build configured HTTP client, using defaults");
            Client::new()
        })
}

/// Map a transport failure, reporting client timeouts with the limit
/// that `client_timeout` configured.
pub(crate) fn transport_error(err: reqwest::Error, client_timeout: Duration) -> HeimdallError {
    if err.is_timeout() {
        HeimdallError::Timeout(client_timeout)
    } else {
        err.into()
    }
}

/// Map a non-success response to an error.
///
/// The upstream body is kept in the error for logs; it never reaches
/// [`HeimdallError::public_message`].
pub(crate) async fn handle_response_errors(response: Response, provider: Provider) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status.as_u16() {
        401 | 403 => Err(HeimdallError::AuthenticationFailed),
        code => {
            let body = response.text().await.unwrap_or_default();
            let message: String = body.chars().take(500).collect();
            warn!(%provider, status = code, "upstream error");
            Err(HeimdallError::Upstream {
                status: code,
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn client_timeout_reports_configured_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let limit = Duration::from_millis(50);
        let err = build_client(limit)
            .get(server.uri())
            .send()
            .await
            .map_err(|e| transport_error(e, limit))
            .unwrap_err();

        assert!(matches!(err, HeimdallError::Timeout(d) if d == limit));
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "provider call timed out after 50ms");
    }
}
