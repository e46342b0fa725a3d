use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::AuthError;

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Tokens returned by a successful refresh exchange. The endpoint may or may
/// not rotate the refresh token.
#[derive(Debug, Clone)]
pub struct ExchangedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Wire client for the refresh endpoint: `POST` with `{"refreshToken"}`,
/// success body `{"token", "refreshToken"}`.
#[derive(Debug, Clone)]
pub struct RefreshExchange {
    http: Client,
    endpoint: Url,
}

impl RefreshExchange {
    pub fn new(http: Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Exchange the refresh token for a new credential pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<ExchangedTokens, AuthError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&RefreshRequest { refresh_token })
            .timeout(EXCHANGE_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "".into());
            return Err(AuthError::Exchange { status, body });
        }

        let payload: RefreshResponse = response.json().await?;
        if payload.token.is_empty() {
            return Err(AuthError::EmptyExchangeToken);
        }

        Ok(ExchangedTokens {
            access_token: payload.token,
            refresh_token: payload.refresh_token.filter(|token| !token.is_empty()),
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    token: String,
    refresh_token: Option<String>,
}
