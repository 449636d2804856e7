//! OIDC and usage-limits endpoint configuration
//!
//! Endpoints are derived from the account's region. None of these values are
//! secrets; the refresh token and client secret travel in `RefreshRequest`.

/// Path of the token endpoint under the regional OIDC host.
pub const TOKEN_PATH: &str = "/token";

/// Usage-limits API host for US and default regions.
pub const USAGE_API_US: &str = "https://q.us-east-1.amazonaws.com";

/// Usage-limits API host for `eu-*` regions.
pub const USAGE_API_EU: &str = "https://q.eu-central-1.amazonaws.com";

/// Usage-limits request path with the fixed query the API expects.
pub const USAGE_LIMITS_PATH: &str =
    "/getUsageLimits?origin=AI_EDITOR&resourceType=AGENTIC_REQUEST&isEmailRequired=true";

/// User-Agent sent with every request.
pub const USER_AGENT: &str = "aws-sdk-rust/1.3.9 os/linux lang/rust";

/// SDK user agent header expected by the usage API.
pub const AMZ_USER_AGENT: &str = "aws-sdk-rust/1.3.9 ua/2.1 api/ssooidc/1.88.0 m/E app/credential-refresh";

/// Limit assumed when the usage API omits one.
pub const DEFAULT_USAGE_LIMIT: f64 = 50.0;

/// Breakdown resource types that carry the account's metered usage.
pub const METERED_RESOURCE_TYPES: &[&str] = &["CREDIT", "AGENT_INTERACTIONS"];

/// Regional OIDC host, e.g. `https://oidc.us-east-1.amazonaws.com`.
pub fn oidc_base_url(region: &str) -> String {
    format!("https://oidc.{region}.amazonaws.com")
}

/// Usage API host for a region.
pub fn usage_api_base(region: &str) -> &'static str {
    if region.starts_with("eu-") {
        USAGE_API_EU
    } else {
        USAGE_API_US
    }
}
