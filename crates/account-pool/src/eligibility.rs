//! Which accounts a cycle should refresh
//!
//! Pure functions over account snapshots. An account is due when its token
//! expires within `REFRESH_THRESHOLD`, including tokens that already expired.
//! Suspended and errored accounts are frozen until an operator acts, and
//! accounts with no recorded expiry have never been checked.

use std::time::Duration;

use crate::account::Account;

/// Time-to-expiry below which an account is refreshed.
pub const REFRESH_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// `REFRESH_THRESHOLD` in milliseconds.
pub const REFRESH_THRESHOLD_MS: i64 = REFRESH_THRESHOLD.as_millis() as i64;

pub fn is_eligible(account: &Account, now_ms: i64, threshold_ms: i64) -> bool {
    if account.status.is_frozen() {
        return false;
    }
    match account.credentials.expires_at {
        Some(expires_at) => expires_at - now_ms < threshold_ms,
        None => false,
    }
}

/// Accounts split for one cycle.
#[derive(Debug, Default)]
pub struct Partition {
    /// Due for refresh, in pool order.
    pub eligible: Vec<Account>,
    /// Frozen or never checked.
    pub skipped: usize,
    /// Token still valid beyond the threshold.
    pub healthy: usize,
}

pub fn partition(accounts: Vec<Account>, now_ms: i64, threshold_ms: i64) -> Partition {
    let mut out = Partition::default();
    for account in accounts {
        if account.status.is_frozen() || account.credentials.expires_at.is_none() {
            out.skipped += 1;
        } else if is_eligible(&account, now_ms, threshold_ms) {
            out.eligible.push(account);
        } else {
            out.healthy += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountStatus, Credentials};

    const NOW: i64 = 1_760_000_000_000;

    fn account(id: &str, status: AccountStatus, expires_at: Option<i64>) -> Account {
        Account {
            id: id.into(),
            status,
            credentials: Credentials {
                expires_at,
                ..Credentials::default()
            },
            ..Account::default()
        }
    }

    #[test]
    fn threshold_is_ten_minutes() {
        assert_eq!(REFRESH_THRESHOLD_MS, 600_000);
    }

    #[test]
    fn threshold_boundary() {
        let t = REFRESH_THRESHOLD_MS;
        let at = |offset| account("a", AccountStatus::Active, Some(NOW + offset));
        assert!(!is_eligible(&at(600_001), NOW, t));
        assert!(!is_eligible(&at(600_000), NOW, t));
        assert!(is_eligible(&at(599_999), NOW, t));
        assert!(is_eligible(&at(-1), NOW, t));
    }

    #[test]
    fn long_expired_token_is_eligible() {
        let acct = account("a", AccountStatus::Unknown, Some(NOW - 86_400_000));
        assert!(is_eligible(&acct, NOW, REFRESH_THRESHOLD_MS));
    }

    #[test]
    fn frozen_statuses_are_never_eligible() {
        for status in [AccountStatus::Suspended, AccountStatus::Error] {
            for offset in [-1_000_000, 0, 1, 599_999] {
                let acct = account("a", status, Some(NOW + offset));
                assert!(!is_eligible(&acct, NOW, REFRESH_THRESHOLD_MS));
            }
        }
    }

    #[test]
    fn missing_expiry_is_never_eligible() {
        let acct = account("a", AccountStatus::Active, None);
        assert!(!is_eligible(&acct, NOW, REFRESH_THRESHOLD_MS));
    }

    #[test]
    fn eligibility_is_pure() {
        let acct = account("a", AccountStatus::Active, Some(NOW + 1_000));
        let before = acct.clone();
        let first = is_eligible(&acct, NOW, REFRESH_THRESHOLD_MS);
        let second = is_eligible(&acct, NOW, REFRESH_THRESHOLD_MS);
        assert_eq!(first, second);
        assert_eq!(acct, before);
    }

    #[test]
    fn partition_counts_and_keeps_order() {
        let accounts = vec![
            account("due-1", AccountStatus::Active, Some(NOW - 5)),
            account("frozen", AccountStatus::Suspended, Some(NOW - 5)),
            account("healthy", AccountStatus::Active, Some(NOW + 3_600_000)),
            account("unchecked", AccountStatus::Unknown, None),
            account("due-2", AccountStatus::Expired, Some(NOW + 60_000)),
        ];
        let p = partition(accounts, NOW, REFRESH_THRESHOLD_MS);
        let ids: Vec<&str> = p.eligible.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["due-1", "due-2"]);
        assert_eq!(p.skipped, 2);
        assert_eq!(p.healthy, 1);
    }
}
