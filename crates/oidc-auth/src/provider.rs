//! `CredentialProvider` backed by the regional OIDC token endpoint
//!
//! A refresh is two calls: the refresh-token grant, then a usage-limits
//! lookup with the new access token. Both must succeed for the grant to be
//! returned, since a suspended account still refreshes its token but is
//! refused by the usage API.

use std::future::Future;
use std::pin::Pin;

use chrono::Utc;
use provider::{CredentialProvider, ProviderFailure, RefreshRequest, TokenGrant};
use tracing::{debug, info};

use crate::constants::{TOKEN_PATH, oidc_base_url, usage_api_base};
use crate::error::Result;
use crate::token;
use crate::usage;

/// Lifetime assumed when the token endpoint omits `expiresIn`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

pub struct OidcProvider {
    client: reqwest::Client,
    oidc_base: Option<String>,
    usage_base: Option<String>,
}

impl OidcProvider {
    /// Provider that derives both hosts from each account's region.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            oidc_base: None,
            usage_base: None,
        }
    }

    /// Pin both hosts, ignoring the account region. Used against local mocks.
    pub fn with_base_urls(
        client: reqwest::Client,
        oidc_base: impl Into<String>,
        usage_base: impl Into<String>,
    ) -> Self {
        Self {
            client,
            oidc_base: Some(oidc_base.into()),
            usage_base: Some(usage_base.into()),
        }
    }

    fn token_url(&self, region: &str) -> String {
        match &self.oidc_base {
            Some(base) => format!("{base}{TOKEN_PATH}"),
            None => format!("{}{TOKEN_PATH}", oidc_base_url(region)),
        }
    }

    fn usage_base(&self, region: &str) -> &str {
        self.usage_base
            .as_deref()
            .unwrap_or_else(|| usage_api_base(region))
    }

    /// Refresh the token and collect profile plus usage for the account.
    pub async fn verify(&self, request: &RefreshRequest) -> Result<TokenGrant> {
        let token_url = self.token_url(&request.region);
        debug!(region = %request.region, client_id = %request.client_id, "refreshing OIDC token");

        let tokens = token::refresh_token(&self.client, &token_url, request).await?;
        let refresh_token = tokens
            .refresh_token
            .unwrap_or_else(|| request.refresh_token.expose().clone());

        let limits = usage::fetch_usage_limits(
            &self.client,
            self.usage_base(&request.region),
            &tokens.access_token,
        )
        .await?;
        let summary = usage::summarize(&limits, Utc::now());

        let email = limits.user_info.as_ref().and_then(|u| u.email.clone());
        let user_id = limits.user_info.as_ref().and_then(|u| u.user_id.clone());
        let subscription_type = limits
            .subscription_info
            .as_ref()
            .and_then(|s| s.subscription_type.clone());
        let subscription_title = limits
            .subscription_info
            .as_ref()
            .and_then(|s| s.subscription_title.clone());

        info!(
            region = %request.region,
            current = summary.report.current,
            limit = summary.report.limit,
            "OIDC refresh verified"
        );

        Ok(TokenGrant {
            access_token: tokens.access_token,
            refresh_token,
            expires_in: Some(if tokens.expires_in > 0 {
                tokens.expires_in
            } else {
                DEFAULT_EXPIRES_IN_SECS
            }),
            email,
            user_id,
            raw_type: subscription_type.clone(),
            subscription_type,
            subscription_title,
            days_remaining: summary.days_remaining,
            usage: Some(summary.report),
        })
    }
}

impl CredentialProvider for OidcProvider {
    fn id(&self) -> &str {
        "oidc"
    }

    fn refresh<'a>(
        &'a self,
        request: &'a RefreshRequest,
    ) -> Pin<Box<dyn Future<Output = provider::Result<TokenGrant>> + Send + 'a>> {
        Box::pin(async move { self.verify(request).await.map_err(ProviderFailure::from) })
    }
}
