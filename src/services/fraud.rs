//! Fraud risk scorer
//!
//! Additive heuristic scoring of a request's behavioral signals into a
//! 0-100 risk score with the contributing reasons, so the audit trail can
//! record *why* a request was blocked. A signal that could not be computed
//! contributes zero and marks the assessment degraded; the gate fails open
//! on data unavailability and closed only on explicit high-confidence
//! signals.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::RwLock;

use crate::config::FraudConfig;

/// Behavioral signals for one request. A `None` means the signal could not
/// be computed (store timeout, first-ever attempt has no predecessor).
#[derive(Debug, Clone, Default)]
pub struct ActivitySignals {
    /// Requests from this identity in the recent window; None if the
    /// lookup failed
    pub recent_request_count: Option<u32>,
    /// Seconds since the identity's previous attempt; None if there is no
    /// prior attempt or the lookup failed
    pub seconds_since_last_attempt: Option<i64>,
    /// Whether the previous-attempt lookup failed (as opposed to "no prior
    /// attempt")
    pub last_attempt_lookup_failed: bool,
    /// Whether the request-count lookup failed
    pub request_count_lookup_failed: bool,
    /// Client IP
    pub ip_address: String,
    /// Client user agent
    pub user_agent: Option<String>,
}

/// The scorer's verdict on one request
#[derive(Debug, Clone, Serialize)]
pub struct FraudAssessment {
    /// Clamped to [0, 100]
    pub risk_score: u8,
    /// Score at or above the soft threshold
    pub is_risky: bool,
    /// Score at or above the hard-block threshold
    pub blocked: bool,
    /// At least one signal could not be computed
    pub degraded: bool,
    /// Human-readable contributions, one per signal that added points
    pub reasons: Vec<String>,
}

/// User-agent fragments typical of scripted clients
const SCRIPTED_AGENT_MARKERS: &[&str] = &["curl", "python", "wget", "httpclient", "bot", "scrapy"];

/// Heuristic fraud scorer
pub struct FraudScorer {
    config: FraudConfig,
    flagged_ips: RwLock<HashSet<String>>,
}

impl FraudScorer {
    pub fn new(config: FraudConfig) -> Self {
        Self {
            config,
            flagged_ips: RwLock::new(HashSet::new()),
        }
    }

    /// Mark an IP as previously involved in a hard block
    pub fn flag_ip(&self, ip: &str) {
        if let Ok(mut flagged) = self.flagged_ips.write() {
            flagged.insert(ip.to_string());
        }
    }

    fn is_flagged(&self, ip: &str) -> bool {
        self.flagged_ips
            .read()
            .map(|flagged| flagged.contains(ip))
            .unwrap_or(false)
    }

    /// Score one request's signals
    pub fn score(&self, signals: &ActivitySignals) -> FraudAssessment {
        let mut score: u32 = 0;
        let mut reasons = Vec::new();
        let mut degraded = false;

        match signals.recent_request_count {
            Some(count) if count >= self.config.velocity_threshold * 2 => {
                score += 50;
                reasons.push(format!(
                    "request velocity far above threshold ({} recent requests)",
                    count
                ));
            }
            Some(count) if count >= self.config.velocity_threshold => {
                score += 30;
                reasons.push(format!(
                    "request velocity above threshold ({} recent requests)",
                    count
                ));
            }
            Some(_) => {}
            None => {
                if signals.request_count_lookup_failed {
                    degraded = true;
                }
            }
        }

        match signals.seconds_since_last_attempt {
            Some(elapsed) if elapsed < 2 => {
                score += 25;
                reasons.push("sub-second retry interval".to_string());
            }
            Some(elapsed) if elapsed < 10 => {
                score += 10;
                reasons.push("rapid retry interval".to_string());
            }
            Some(_) => {}
            None => {
                if signals.last_attempt_lookup_failed {
                    degraded = true;
                }
            }
        }

        match signals.user_agent.as_deref() {
            None | Some("") => {
                score += 20;
                reasons.push("missing user agent".to_string());
            }
            Some(agent) => {
                let lower = agent.to_lowercase();
                if SCRIPTED_AGENT_MARKERS.iter().any(|m| lower.contains(m)) {
                    score += 15;
                    reasons.push("scripted user agent".to_string());
                }
            }
        }

        if self.is_flagged(&signals.ip_address) {
            score += 40;
            reasons.push("previously flagged ip".to_string());
        }

        let risk_score = score.min(100) as u8;
        FraudAssessment {
            risk_score,
            is_risky: risk_score >= self.config.risky_threshold,
            blocked: risk_score >= self.config.block_threshold,
            degraded,
            reasons,
        }
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// The score is always within [0, 100] and thresholds are
        /// consistent with it.
        #[test]
        fn score_clamped_and_thresholds_consistent(
            count in proptest::option::of(0u32..1000),
            elapsed in proptest::option::of(0i64..100_000),
            agent in proptest::option::of("[ -~]{0,60}"),
        ) {
            let scorer = FraudScorer::new(FraudConfig {
                risky_threshold: 50,
                block_threshold: 80,
                velocity_threshold: 10,
            });
            let signals = ActivitySignals {
                recent_request_count: count,
                seconds_since_last_attempt: elapsed,
                last_attempt_lookup_failed: false,
                request_count_lookup_failed: false,
                ip_address: "1.2.3.4".to_string(),
                user_agent: agent,
            };

            let assessment = scorer.score(&signals);
            prop_assert!(assessment.risk_score <= 100);
            prop_assert_eq!(assessment.is_risky, assessment.risk_score >= 50);
            prop_assert_eq!(assessment.blocked, assessment.risk_score >= 80);
            // Blocked implies risky (block threshold is the higher one)
            if assessment.blocked {
                prop_assert!(assessment.is_risky);
            }
        }

        /// Every point contribution is explained by a reason.
        #[test]
        fn nonzero_score_has_reasons(count in 10u32..1000) {
            let scorer = FraudScorer::new(FraudConfig {
                risky_threshold: 50,
                block_threshold: 80,
                velocity_threshold: 10,
            });
            let signals = ActivitySignals {
                recent_request_count: Some(count),
                seconds_since_last_attempt: Some(3600),
                last_attempt_lookup_failed: false,
                request_count_lookup_failed: false,
                ip_address: "1.2.3.4".to_string(),
                user_agent: Some("Mozilla/5.0".to_string()),
            };

            let assessment = scorer.score(&signals);
            prop_assert!(assessment.risk_score > 0);
            prop_assert!(!assessment.reasons.is_empty());
        }
    }
}
