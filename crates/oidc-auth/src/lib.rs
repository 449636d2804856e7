//! OIDC refresh-token provider
//!
//! Exchanges an account's refresh token at the regional OIDC endpoint, then
//! reads profile, subscription and usage from the usage-limits API with the
//! new access token. Failures are mapped onto `provider::FailureKind` so the
//! refresh pipeline can tell suspended accounts from revoked or unreachable
//! ones.
//!
//! Refresh flow:
//! 1. `token::refresh_token()` POSTs the grant to `oidc.{region}.amazonaws.com/token`
//! 2. `usage::fetch_usage_limits()` GETs usage with the new bearer token
//! 3. `usage::summarize()` extracts metered usage and free-trial allowance
//! 4. `OidcProvider` assembles the `TokenGrant`

pub mod constants;
pub mod error;
pub mod provider;
pub mod token;
pub mod usage;

pub use constants::*;
pub use error::{Error, Result};
pub use provider::OidcProvider;
pub use token::{TokenResponse, refresh_token};
pub use usage::{UsageLimitsResponse, UsageSummary, fetch_usage_limits, summarize};
