//! Data quality validation.
//!
//! Scores quote points from exchanges:
//! - Staleness against `max_data_age`
//! - Implausible 24h moves against `max_price_deviation`
//! - Cross-exchange agreement (config-gated)
//! - Completeness (volume) and sanity (price, high/low)
//!
//! The validator only ever downgrades: the final tier is the minimum of the
//! adapter's provisional tier and every failed check.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rust_decimal::Decimal;

use crate::config::{ReferencePrice, ValidationConfig};
use crate::models::{QualityTier, QuotePoint};

/// Which check produced an issue.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QualityCheck {
    Staleness,
    Magnitude,
    CrossExchange,
    Completeness,
    Sanity,
}

/// A failed check and the tier it imposes.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationIssue {
    pub check: QualityCheck,
    pub tier: QualityTier,
    pub message: String,
}

/// Outcome of validating one point.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationOutcome {
    pub tier: QualityTier,
    pub issues: Vec<ValidationIssue>,
}

/// Quote point validator.
pub struct DataQualityValidator {
    config: ValidationConfig,
}

impl DataQualityValidator {
    /// Create a new validator with default configuration.
    pub fn new() -> Self {
        Self::with_config(ValidationConfig::default())
    }

    pub fn with_config(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Run every check against `point`. `peers` are other exchanges'
    /// observations of the same symbol.
    pub fn assess(
        &self,
        point: &QuotePoint,
        peers: &[&QuotePoint],
        now: DateTime<Utc>,
    ) -> ValidationOutcome {
        let mut issues = Vec::new();

        self.check_staleness(point, now, &mut issues);
        self.check_magnitude(point, &mut issues);
        if self.config.cross_exchange_validation {
            self.check_cross_exchange(point, peers, now, &mut issues);
        }
        self.check_completeness(point, &mut issues);
        self.check_sanity(point, &mut issues);

        let tier = issues
            .iter()
            .fold(point.quality, |tier, issue| tier.downgrade(issue.tier));

        ValidationOutcome { tier, issues }
    }

    /// Validate one point and return it with its final tier.
    pub fn validate(&self, point: &QuotePoint, peers: &[&QuotePoint]) -> QuotePoint {
        let outcome = self.assess(point, peers, Utc::now());
        self.log_outcome(point, &outcome);
        point.with_quality(outcome.tier)
    }

    /// Validate a batch. Peers for each point are the batch's other
    /// exchanges plus `reference` (latest known quotes), batch entries first.
    pub fn validate_batch(
        &self,
        points: Vec<QuotePoint>,
        reference: &[QuotePoint],
    ) -> Vec<QuotePoint> {
        let now = Utc::now();

        let mut by_symbol: HashMap<&str, Vec<&QuotePoint>> = HashMap::new();
        for p in points.iter().chain(reference.iter()) {
            let entry = by_symbol.entry(p.symbol.as_str()).or_default();
            if !entry.iter().any(|q| q.exchange == p.exchange) {
                entry.push(p);
            }
        }

        points
            .iter()
            .map(|point| {
                let peers: Vec<&QuotePoint> = by_symbol
                    .get(point.symbol.as_str())
                    .map(|all| {
                        all.iter()
                            .copied()
                            .filter(|q| q.exchange != point.exchange)
                            .collect()
                    })
                    .unwrap_or_default();
                let outcome = self.assess(point, &peers, now);
                self.log_outcome(point, &outcome);
                point.with_quality(outcome.tier)
            })
            .collect()
    }

    fn log_outcome(&self, point: &QuotePoint, outcome: &ValidationOutcome) {
        for issue in &outcome.issues {
            if issue.tier == QualityTier::Suspect {
                warn!(
                    "Quote {}@{} flagged {}: {}",
                    point.symbol, point.exchange, issue.tier, issue.message
                );
            } else {
                debug!(
                    "Quote {}@{} flagged {}: {}",
                    point.symbol, point.exchange, issue.tier, issue.message
                );
            }
        }
    }

    fn check_staleness(
        &self,
        point: &QuotePoint,
        now: DateTime<Utc>,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let age = point.age(now);
        if age.num_milliseconds() > (self.config.max_data_age_secs as i64) * 1_000 {
            issues.push(ValidationIssue {
                check: QualityCheck::Staleness,
                tier: QualityTier::Suspect,
                message: format!(
                    "Observation is {}s old (max {}s)",
                    age.num_seconds(),
                    self.config.max_data_age_secs
                ),
            });
        }
    }

    fn check_magnitude(&self, point: &QuotePoint, issues: &mut Vec<ValidationIssue>) {
        if point.price_change_percent_24h.abs() > self.config.max_price_deviation {
            issues.push(ValidationIssue {
                check: QualityCheck::Magnitude,
                tier: QualityTier::Suspect,
                message: format!(
                    "24h change {}% exceeds {}%",
                    point.price_change_percent_24h, self.config.max_price_deviation
                ),
            });
        }
    }

    fn check_cross_exchange(
        &self,
        point: &QuotePoint,
        peers: &[&QuotePoint],
        now: DateTime<Utc>,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let max_age_ms = (self.config.max_data_age_secs as i64) * 1_000;
        let prices: Vec<Decimal> = peers
            .iter()
            .filter(|p| p.exchange != point.exchange && p.symbol == point.symbol)
            .filter(|p| p.price_usd > Decimal::ZERO)
            .filter(|p| p.age(now).num_milliseconds() <= max_age_ms)
            .map(|p| p.price_usd)
            .collect();

        if prices.is_empty() || prices.len() < self.config.min_peers {
            return;
        }

        let Some(reference) = reference_price(&prices, self.config.reference_price) else {
            return;
        };
        if reference <= Decimal::ZERO {
            return;
        }

        let deviation = ((point.price_usd - reference) / reference * Decimal::ONE_HUNDRED).abs();
        if deviation > self.config.cross_exchange_tolerance_percent {
            issues.push(ValidationIssue {
                check: QualityCheck::CrossExchange,
                tier: QualityTier::Low,
                message: format!(
                    "Price deviates {}% from peer reference {} ({} peers)",
                    deviation.round_dp(2),
                    reference.round_dp(8),
                    prices.len()
                ),
            });
        }
    }

    fn check_completeness(&self, point: &QuotePoint, issues: &mut Vec<ValidationIssue>) {
        if point.volume_24h <= Decimal::ZERO {
            issues.push(ValidationIssue {
                check: QualityCheck::Completeness,
                tier: QualityTier::Low,
                message: "Missing 24h volume".to_string(),
            });
        }
    }

    fn check_sanity(&self, point: &QuotePoint, issues: &mut Vec<ValidationIssue>) {
        if point.price_usd <= Decimal::ZERO {
            issues.push(ValidationIssue {
                check: QualityCheck::Sanity,
                tier: QualityTier::Suspect,
                message: format!("Non-positive price: {}", point.price_usd),
            });
        }

        if let (Some(high), Some(low)) = (point.high_24h, point.low_24h) {
            if high < low {
                issues.push(ValidationIssue {
                    check: QualityCheck::Sanity,
                    tier: QualityTier::Low,
                    message: format!("High ({}) < Low ({})", high, low),
                });
            }
        }
    }
}

impl Default for DataQualityValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn reference_price(prices: &[Decimal], method: ReferencePrice) -> Option<Decimal> {
    if prices.is_empty() {
        return None;
    }
    match method {
        ReferencePrice::Mean => {
            let sum: Decimal = prices.iter().copied().sum();
            Some(sum / Decimal::from(prices.len()))
        }
        ReferencePrice::Median => {
            let mut sorted = prices.to_vec();
            sorted.sort();
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 0 {
                Some((sorted[mid - 1] + sorted[mid]) / Decimal::TWO)
            } else {
                Some(sorted[mid])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_point;
    use rust_decimal_macros::dec;

    fn validator() -> DataQualityValidator {
        DataQualityValidator::new()
    }

    #[test]
    fn test_modest_move_stays_high() {
        let mut point = sample_point("BTC", "binance", dec!(45000));
        point.price_change_24h = dec!(1000);
        point.price_change_percent_24h = dec!(2.27);

        let outcome = validator().assess(&point, &[], Utc::now());
        assert_eq!(outcome.tier, QualityTier::High);
        assert!(outcome.issues.is_empty());
    }

    #[test]
    fn test_large_move_is_suspect() {
        let mut point = sample_point("BTC", "binance", dec!(45000));
        point.price_change_percent_24h = dec!(26.67);

        let outcome = validator().assess(&point, &[], Utc::now());
        assert_eq!(outcome.tier, QualityTier::Suspect);
        assert_eq!(outcome.issues[0].check, QualityCheck::Magnitude);
    }

    #[test]
    fn test_three_minute_old_point_is_suspect() {
        let mut point = sample_point("ETH", "luno", dec!(3000));
        point.observed_at = Utc::now() - chrono::Duration::minutes(3);

        let outcome = validator().assess(&point, &[], Utc::now());
        assert_eq!(outcome.tier, QualityTier::Suspect);
    }

    #[test]
    fn test_stale_point_never_high_even_with_other_issues_absent() {
        let mut point = sample_point("ETH", "luno", dec!(3000));
        point.observed_at = Utc::now() - chrono::Duration::seconds(61);

        let validated = validator().validate(&point, &[]);
        assert_ne!(validated.quality, QualityTier::High);
    }

    #[test]
    fn test_zero_volume_is_low() {
        let mut point = sample_point("XRP", "binance", dec!(0.5));
        point.volume_24h = Decimal::ZERO;

        let outcome = validator().assess(&point, &[], Utc::now());
        assert_eq!(outcome.tier, QualityTier::Low);
    }

    #[test]
    fn test_validator_never_upgrades() {
        let point = sample_point("BTC", "luno", dec!(45000)).with_quality(QualityTier::Medium);

        let outcome = validator().assess(&point, &[], Utc::now());
        assert_eq!(outcome.tier, QualityTier::Medium);
    }

    #[test]
    fn test_cross_exchange_disagreement_is_low() {
        let point = sample_point("BTC", "luno", dec!(50000));
        let peer = sample_point("BTC", "binance", dec!(45000));

        let outcome = validator().assess(&point, &[&peer], Utc::now());
        assert_eq!(outcome.tier, QualityTier::Low);
        assert_eq!(outcome.issues[0].check, QualityCheck::CrossExchange);
    }

    #[test]
    fn test_cross_exchange_within_tolerance() {
        let point = sample_point("BTC", "luno", dec!(45500));
        let peer = sample_point("BTC", "binance", dec!(45000));

        let outcome = validator().assess(&point, &[&peer], Utc::now());
        assert_eq!(outcome.tier, QualityTier::High);
    }

    #[test]
    fn test_cross_exchange_disabled() {
        let config = ValidationConfig {
            cross_exchange_validation: false,
            ..Default::default()
        };
        let point = sample_point("BTC", "luno", dec!(60000));
        let peer = sample_point("BTC", "binance", dec!(45000));

        let outcome = DataQualityValidator::with_config(config).assess(&point, &[&peer], Utc::now());
        assert_eq!(outcome.tier, QualityTier::High);
    }

    #[test]
    fn test_cross_exchange_requires_min_peers() {
        let config = ValidationConfig {
            min_peers: 2,
            ..Default::default()
        };
        let point = sample_point("BTC", "luno", dec!(60000));
        let peer = sample_point("BTC", "binance", dec!(45000));

        let outcome = DataQualityValidator::with_config(config).assess(&point, &[&peer], Utc::now());
        assert_eq!(outcome.tier, QualityTier::High);
    }

    #[test]
    fn test_sanity_checks() {
        let mut point = sample_point("BTC", "binance", dec!(45000));
        point.high_24h = Some(dec!(44000));
        point.low_24h = Some(dec!(46000));
        assert_eq!(
            validator().assess(&point, &[], Utc::now()).tier,
            QualityTier::Low
        );

        let point = sample_point("BTC", "binance", dec!(0));
        assert_eq!(
            validator().assess(&point, &[], Utc::now()).tier,
            QualityTier::Suspect
        );
    }

    #[test]
    fn test_batch_uses_other_exchanges_as_peers() {
        let binance = sample_point("BTC", "binance", dec!(45000));
        let luno = sample_point("BTC", "luno", dec!(52000));
        let eth = sample_point("ETH", "binance", dec!(3000));

        let validated = validator().validate_batch(vec![binance, luno, eth], &[]);

        // With one peer each the two BTC quotes disagree with each other
        assert_eq!(validated[0].quality, QualityTier::Low);
        assert_eq!(validated[1].quality, QualityTier::Low);
        assert_eq!(validated[2].quality, QualityTier::High);
    }

    #[test]
    fn test_reference_price() {
        let prices = [dec!(1), dec!(3), dec!(10)];
        assert_eq!(reference_price(&prices, ReferencePrice::Median), Some(dec!(3)));
        assert_eq!(
            reference_price(&prices, ReferencePrice::Mean),
            Some(dec!(14) / dec!(3))
        );
        assert_eq!(
            reference_price(&[dec!(2), dec!(4)], ReferencePrice::Median),
            Some(dec!(3))
        );
        assert_eq!(reference_price(&[], ReferencePrice::Median), None);
    }
}
