// src/sys/scheduler.rs

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::sys::secrets::Credential;

// ==============================================================================
// 1. Half-Life Renewal Policy
// ==============================================================================

/// Fraction of the lease after which the token is renewed and the next
/// refresh is scheduled.
pub const RENEWAL_FRACTION: f64 = 0.5;

pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(86_400);

/// Fixed pause after a failed watch cycle.
pub const FAILURE_BACKOFF: Duration = Duration::from_secs(60);

/// True when the credential has lived through at least half its lease, or
/// when there is no credential at all.
pub fn renewal_due(credential: Option<&Credential>, now: DateTime<Utc>) -> bool {
    let Some(credential) = credential else {
        return true;
    };

    let elapsed_secs = (now - credential.issued_at()).num_milliseconds() as f64 / 1000.0;
    let threshold_secs = credential.lease_duration_secs() as f64 * RENEWAL_FRACTION;

    elapsed_secs >= threshold_secs
}

/// Pause between successful cycles: half the lease, kept within [30s, 1d].
pub fn refresh_interval(lease_duration_secs: u64) -> Duration {
    let half_life = lease_duration_secs as f64 * RENEWAL_FRACTION;
    let clamped = half_life.clamp(
        MIN_REFRESH_INTERVAL.as_secs_f64(),
        MAX_REFRESH_INTERVAL.as_secs_f64(),
    );
    Duration::from_secs_f64(clamped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use secrecy::SecretString;

    fn credential(lease: u64, issued_at: DateTime<Utc>) -> Credential {
        Credential::new(SecretString::new("T1".into()), lease, issued_at)
    }

    #[test]
    fn renewal_is_due_without_credential() {
        assert!(renewal_due(None, Utc::now()));
    }

    #[test]
    fn renewal_flips_at_half_life() {
        let issued = Utc::now();
        let cred = credential(100, issued);

        assert!(!renewal_due(Some(&cred), issued));
        assert!(!renewal_due(Some(&cred), issued + TimeDelta::seconds(49)));
        assert!(!renewal_due(Some(&cred), issued + TimeDelta::milliseconds(49_999)));
        assert!(renewal_due(Some(&cred), issued + TimeDelta::seconds(50)));
        assert!(renewal_due(Some(&cred), issued + TimeDelta::seconds(500)));
    }

    #[test]
    fn renewal_handles_odd_leases() {
        let issued = Utc::now();
        let cred = credential(7, issued);

        assert!(!renewal_due(Some(&cred), issued + TimeDelta::seconds(3)));
        assert!(renewal_due(Some(&cred), issued + TimeDelta::milliseconds(3_500)));
    }

    #[test]
    fn zero_lease_is_always_due() {
        let issued = Utc::now();
        assert!(renewal_due(Some(&credential(0, issued)), issued));
    }

    #[test]
    fn refresh_interval_is_clamped_half_life() {
        let cases = [
            (0, 30.0),
            (10, 30.0),
            (60, 30.0),
            (61, 30.5),
            (200, 100.0),
            (3_600, 1_800.0),
            (172_800, 86_400.0),
            (200_000, 86_400.0),
        ];

        for (lease, expected) in cases {
            assert_eq!(
                refresh_interval(lease),
                Duration::from_secs_f64(expected),
                "lease {lease}"
            );
        }
    }
}
