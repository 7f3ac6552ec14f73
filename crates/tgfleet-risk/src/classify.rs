//! Provider error classification — maps Telegram RPC error text to account transitions.
//!
//! | Signature                                   | Verdict                 |
//! |---------------------------------------------|-------------------------|
//! | AUTH_KEY_UNREGISTERED, *DEACTIVATED*, BANNED, SESSION_REVOKED | dead |
//! | FLOOD_WAIT_N / "a wait of N seconds"        | cooling N + buffer secs |
//! | PEER_FLOOD                                  | cooling 1h              |
//! | PHONE_NUMBER_FLOOD                          | cooling 24h             |
//! | SLOWMODE_WAIT                               | cooling 30m             |
//! | USER_RESTRICTED, CHAT_RESTRICTED, CHAT_WRITE_FORBIDDEN | restricted   |

use std::sync::LazyLock;

use chrono::Duration;
use regex::Regex;
use tgfleet_core::config::RiskConfig;

/// What the risk engine should do with an account after a provider error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskVerdict {
    /// Session is gone for good.
    Dead { reason: String },
    Cooling { duration: Duration, reason: String },
    Restricted { reason: String },
    /// Not a risk signal; no transition.
    Unclassified,
}

const DEAD_SIGNATURES: &[&str] = &[
    "AUTH_KEY_UNREGISTERED",
    "DEACTIVATED",
    "SESSION_REVOKED",
    "BANNED",
];

const RESTRICTED_SIGNATURES: &[&str] = &[
    "USER_RESTRICTED",
    "CHAT_RESTRICTED",
    "CHAT_WRITE_FORBIDDEN",
    // Spam-limited in groups: a restriction, not a dead session.
    "USER_BANNED_IN_CHANNEL",
];

/// Ceiling on a provider-reported flood wait.
pub const MAX_FLOOD_WAIT_SECS: i64 = 7 * 24 * 60 * 60;

static FLOOD_WAIT_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"FLOOD(?:_PREMIUM)?_WAIT(?:_X)?\D{0,3}(\d+)").expect("valid flood wait regex")
});

static WAIT_OF_SECONDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"WAIT OF (\d+) SECONDS").expect("valid wait regex"));

/// Classify provider error text (case-insensitive).
pub fn classify_provider_error(error: &str, config: &RiskConfig) -> RiskVerdict {
    let upper = error.to_uppercase();

    if let Some(sig) = RESTRICTED_SIGNATURES
        .iter()
        .find(|sig| sig.contains("BANNED") && upper.contains(*sig))
    {
        return RiskVerdict::Restricted {
            reason: sig.to_string(),
        };
    }

    if let Some(sig) = DEAD_SIGNATURES.iter().find(|sig| upper.contains(*sig)) {
        return RiskVerdict::Dead {
            reason: sig.to_string(),
        };
    }

    if is_flood_wait(&upper) {
        let secs = extract_flood_wait_secs(&upper)
            .unwrap_or(config.default_flood_wait_secs)
            .clamp(0, MAX_FLOOD_WAIT_SECS);
        let duration = secs
            .checked_add(config.flood_wait_buffer_secs)
            .and_then(Duration::try_seconds)
            .unwrap_or_else(|| Duration::seconds(MAX_FLOOD_WAIT_SECS));
        return RiskVerdict::Cooling {
            duration,
            reason: format!("FLOOD_WAIT {secs}s"),
        };
    }

    if upper.contains("PEER_FLOOD") {
        return RiskVerdict::Cooling {
            duration: Duration::hours(1),
            reason: "PEER_FLOOD".into(),
        };
    }

    if upper.contains("PHONE_NUMBER_FLOOD") {
        return RiskVerdict::Cooling {
            duration: Duration::hours(24),
            reason: "PHONE_NUMBER_FLOOD".into(),
        };
    }

    if upper.contains("SLOWMODE_WAIT") || upper.contains("SLOW_MODE_WAIT") {
        return RiskVerdict::Cooling {
            duration: Duration::minutes(30),
            reason: "SLOWMODE_WAIT".into(),
        };
    }

    if let Some(sig) = RESTRICTED_SIGNATURES.iter().find(|sig| upper.contains(*sig)) {
        return RiskVerdict::Restricted {
            reason: sig.to_string(),
        };
    }

    RiskVerdict::Unclassified
}

fn is_flood_wait(upper: &str) -> bool {
    upper.contains("FLOOD_WAIT")
        || upper.contains("FLOOD_PREMIUM_WAIT")
        || WAIT_OF_SECONDS.is_match(upper)
}

/// Seconds embedded in a flood-wait error, if any. Expects upper-cased text.
/// Numbers that do not fit an `i64` yield None.
pub fn extract_flood_wait_secs(upper: &str) -> Option<i64> {
    FLOOD_WAIT_CODE
        .captures(upper)
        .or_else(|| WAIT_OF_SECONDS.captures(upper))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> RiskVerdict {
        classify_provider_error(text, &RiskConfig::default())
    }

    #[test]
    fn test_flood_wait_adds_buffer() {
        assert_eq!(
            classify("FLOOD_WAIT_30"),
            RiskVerdict::Cooling {
                duration: Duration::seconds(90),
                reason: "FLOOD_WAIT 30s".into(),
            }
        );
    }

    #[test]
    fn test_flood_wait_variants() {
        for text in [
            "rpc error 420: FLOOD_WAIT_120",
            "flood_wait (120)",
            "FLOOD_WAIT_X: 120",
            "FLOOD_PREMIUM_WAIT_120",
            "A wait of 120 seconds is required (caused by SendMessageRequest)",
        ] {
            match classify(text) {
                RiskVerdict::Cooling { duration, .. } => {
                    assert_eq!(duration, Duration::seconds(180), "{text}")
                }
                other => panic!("{text}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_flood_wait_without_number_uses_default() {
        match classify("FLOOD_WAIT") {
            RiskVerdict::Cooling { duration, .. } => {
                assert_eq!(duration, Duration::seconds(300 + 60))
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_huge_flood_wait_is_capped() {
        match classify("FLOOD_WAIT_9223372036854775") {
            RiskVerdict::Cooling { duration, reason } => {
                assert_eq!(duration, Duration::seconds(MAX_FLOOD_WAIT_SECS + 60));
                assert_eq!(reason, format!("FLOOD_WAIT {MAX_FLOOD_WAIT_SECS}s"));
            }
            other => panic!("{other:?}"),
        }
        // Too long for an i64: falls back to the configured default.
        match classify("FLOOD_WAIT_99999999999999999999999") {
            RiskVerdict::Cooling { duration, .. } => {
                assert_eq!(duration, Duration::seconds(300 + 60))
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_oversized_buffer_does_not_overflow() {
        let config = RiskConfig {
            flood_wait_buffer_secs: i64::MAX,
            ..Default::default()
        };
        match classify_provider_error("FLOOD_WAIT_30", &config) {
            RiskVerdict::Cooling { duration, .. } => {
                assert_eq!(duration, Duration::seconds(MAX_FLOOD_WAIT_SECS))
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_fixed_cooldowns() {
        let cases = [
            ("PEER_FLOOD", Duration::hours(1)),
            ("PHONE_NUMBER_FLOOD", Duration::hours(24)),
            ("SLOWMODE_WAIT_10", Duration::minutes(30)),
        ];
        for (text, expected) in cases {
            match classify(text) {
                RiskVerdict::Cooling { duration, .. } => assert_eq!(duration, expected, "{text}"),
                other => panic!("{text}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_dead_signatures() {
        for text in [
            "AUTH_KEY_UNREGISTERED",
            "user_deactivated_ban",
            "The user has been deactivated",
            "SESSION_REVOKED",
            "PHONE_NUMBER_BANNED",
        ] {
            assert!(
                matches!(classify(text), RiskVerdict::Dead { .. }),
                "{text}"
            );
        }
    }

    #[test]
    fn test_restricted_signatures() {
        for text in [
            "USER_RESTRICTED",
            "CHAT_RESTRICTED",
            "chat_write_forbidden",
            "USER_BANNED_IN_CHANNEL",
        ] {
            assert!(
                matches!(classify(text), RiskVerdict::Restricted { .. }),
                "{text}"
            );
        }
    }

    #[test]
    fn test_unrelated_error_is_unclassified() {
        assert_eq!(classify("connection reset by peer"), RiskVerdict::Unclassified);
        assert_eq!(classify("PEER_ID_INVALID"), RiskVerdict::Unclassified);
    }

    #[test]
    fn test_custom_buffer() {
        let config = RiskConfig {
            flood_wait_buffer_secs: 0,
            ..Default::default()
        };
        match classify_provider_error("FLOOD_WAIT_45", &config) {
            RiskVerdict::Cooling { duration, .. } => assert_eq!(duration, Duration::seconds(45)),
            other => panic!("{other:?}"),
        }
    }
}
