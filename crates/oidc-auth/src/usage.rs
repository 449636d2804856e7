//! Usage-limits lookup
//!
//! After a successful refresh the new access token is used to read the
//! account's profile, subscription and metered usage. A 403 from this API is
//! how suspended accounts surface: the body carries a `reason` such as
//! `TEMPORARILY_SUSPENDED`.

use chrono::{DateTime, Utc};
use provider::UsageReport;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::constants::{
    AMZ_USER_AGENT, DEFAULT_USAGE_LIMIT, METERED_RESOURCE_TYPES, USAGE_LIMITS_PATH, USER_AGENT,
};
use crate::error::{Error, Result};

/// Suspension reasons reported in 403 bodies.
const SUSPENSION_REASONS: &[&str] = &["TEMPORARILY_SUSPENDED", "PERMANENTLY_SUSPENDED"];

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageLimitsResponse {
    #[serde(default)]
    pub usage_breakdown_list: Option<Vec<UsageBreakdown>>,
    #[serde(default)]
    pub subscription_info: Option<SubscriptionInfo>,
    #[serde(default)]
    pub user_info: Option<UserInfo>,
    #[serde(default, deserialize_with = "timestamp_or_string")]
    pub next_date_reset: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageBreakdown {
    pub resource_type: Option<String>,
    pub display_name: Option<String>,
    pub current_usage: Option<f64>,
    pub current_usage_with_precision: Option<f64>,
    pub usage_limit: Option<f64>,
    pub usage_limit_with_precision: Option<f64>,
    pub free_trial_info: Option<FreeTrialInfo>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeTrialInfo {
    pub free_trial_status: Option<String>,
    #[serde(default, deserialize_with = "timestamp_or_string")]
    pub free_trial_expiry: Option<String>,
    pub current_usage: Option<f64>,
    pub current_usage_with_precision: Option<f64>,
    pub usage_limit: Option<f64>,
    pub usage_limit_with_precision: Option<f64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    #[serde(alias = "type")]
    pub subscription_type: Option<String>,
    pub subscription_title: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub email: Option<String>,
    pub user_id: Option<String>,
}

/// Usage numbers extracted from a response, plus the days left on a free trial.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageSummary {
    pub report: UsageReport,
    pub days_remaining: Option<u32>,
}

/// Accept either epoch seconds or a string; normalize to RFC 3339.
fn timestamp_or_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TimestampOrString {
        Timestamp(f64),
        String(String),
    }

    match Option::<TimestampOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(TimestampOrString::String(s)) => Ok(Some(s)),
        Some(TimestampOrString::Timestamp(ts)) => {
            let nanos = (ts.fract() * 1_000_000_000.0) as u32;
            DateTime::from_timestamp(ts as i64, nanos)
                .map(|dt| Some(dt.to_rfc3339()))
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {ts}")))
        }
    }
}

/// Fetch usage limits with a fresh access token.
pub async fn fetch_usage_limits(
    client: &reqwest::Client,
    api_base: &str,
    access_token: &str,
) -> Result<UsageLimitsResponse> {
    let url = format!("{api_base}{USAGE_LIMITS_PATH}");
    let response = client
        .get(&url)
        .header(reqwest::header::ACCEPT, "application/json")
        .header(reqwest::header::AUTHORIZATION, format!("Bearer {access_token}"))
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .header("x-amz-user-agent", AMZ_USER_AGENT)
        .send()
        .await
        .map_err(|e| Error::Http(format!("usage request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 403 {
            return Err(classify_forbidden(&body));
        }
        return Err(Error::UsageLookup(format!(
            "usage API returned {status}: {body}"
        )));
    }

    let text = response
        .text()
        .await
        .map_err(|e| Error::Http(format!("reading usage response: {e}")))?;
    debug!(bytes = text.len(), "usage limits received");

    serde_json::from_str(&text).map_err(|e| Error::Parse(format!("invalid usage response: {e}")))
}

/// Turn a 403 body into `Suspended` or `AccessDenied`.
///
/// The body is JSON with an optional `message` and `reason`. A suspension
/// reason wins over the message; a message that itself mentions suspension
/// is also treated as a suspension.
fn classify_forbidden(body: &str) -> Error {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string);
    let reason = parsed
        .as_ref()
        .and_then(|v| v.get("reason"))
        .and_then(|r| r.as_str())
        .map(str::to_string);

    if let Some(reason) = reason.as_deref() {
        if SUSPENSION_REASONS.contains(&reason) {
            return Error::Suspended(message.unwrap_or_else(|| reason.to_string()));
        }
    }

    match message {
        Some(msg) if msg.to_lowercase().contains("suspended") => Error::Suspended(msg),
        Some(msg) => Error::AccessDenied(msg),
        None => match reason {
            Some(reason) => Error::AccessDenied(format!("account access restricted: {reason}")),
            None => Error::AccessDenied("account access denied (403)".into()),
        },
    }
}

/// Extract metered usage from the first breakdown that tracks credits or
/// agent interactions. Free-trial allowances are added to the monthly numbers.
pub fn summarize(response: &UsageLimitsResponse, now: DateTime<Utc>) -> UsageSummary {
    let mut report = UsageReport {
        current: 0.0,
        limit: DEFAULT_USAGE_LIMIT,
        next_reset_date: response.next_date_reset.clone(),
        ..UsageReport::default()
    };
    let mut days_remaining = None;

    let metered = response
        .usage_breakdown_list
        .iter()
        .flatten()
        .find(|b| {
            b.resource_type
                .as_deref()
                .is_some_and(|t| METERED_RESOURCE_TYPES.contains(&t))
        });

    let Some(breakdown) = metered else {
        return UsageSummary {
            report,
            days_remaining,
        };
    };

    let monthly_current = breakdown
        .current_usage_with_precision
        .or(breakdown.current_usage)
        .unwrap_or(0.0);
    let monthly_limit = breakdown
        .usage_limit_with_precision
        .or(breakdown.usage_limit)
        .unwrap_or(DEFAULT_USAGE_LIMIT);

    report.base_current = Some(monthly_current);
    report.base_limit = Some(monthly_limit);
    report.current = monthly_current;
    report.limit = monthly_limit;
    report.resource_detail = Some(serde_json::json!({
        "resourceType": breakdown.resource_type,
        "displayName": breakdown.display_name,
    }));

    if let Some(trial) = &breakdown.free_trial_info {
        let trial_current = trial
            .current_usage_with_precision
            .or(trial.current_usage)
            .unwrap_or(0.0);
        let trial_limit = trial
            .usage_limit_with_precision
            .or(trial.usage_limit)
            .unwrap_or(0.0);

        report.current += trial_current;
        report.limit += trial_limit;
        report.free_trial_current = Some(trial_current);
        report.free_trial_limit = Some(trial_limit);
        report.free_trial_expiry = trial.free_trial_expiry.clone();

        days_remaining = trial
            .free_trial_expiry
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|expiry| {
                let days = expiry.with_timezone(&Utc).signed_duration_since(now).num_days();
                u32::try_from(days.max(0)).unwrap_or(u32::MAX)
            });
    }

    UsageSummary {
        report,
        days_remaining,
    }
}
