//! OIDC refresh-token exchange
//!
//! POSTs the account's refresh token and client credentials to the regional
//! token endpoint. The endpoint answers in camelCase JSON and may omit the
//! refresh token, in which case the caller keeps the one it sent.

use provider::RefreshRequest;
use serde::{Deserialize, Serialize};

use crate::constants::USER_AGENT;
use crate::error::{Error, Result};

/// Response from the token endpoint.
///
/// `expires_in` is a delta in seconds from the response time.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

/// Exchange a refresh token for a new access token.
///
/// 400/401 means the refresh token or client registration was refused;
/// anything else non-2xx is treated as a transient upstream failure.
pub async fn refresh_token(
    client: &reqwest::Client,
    token_url: &str,
    request: &RefreshRequest,
) -> Result<TokenResponse> {
    let payload = serde_json::json!({
        "clientId": request.client_id,
        "clientSecret": request.client_secret.expose(),
        "refreshToken": request.refresh_token.expose(),
        "grantType": "refresh_token",
    });

    let response = client
        .post(token_url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .json(&payload)
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 400 || status.as_u16() == 401 {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::Parse(format!("invalid token response: {e}")))
}
