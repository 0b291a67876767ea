use sia_common::api::renter::HostScoreBreakdown;
use sia_common::config::{COIN_PRECISION, VERSION};

use super::HostDbEntry;

// Multiplicative host scoring. Every adjustment keeps a nonzero baseline: a
// zero would mean the dimension stopped being reported, and an exact 1.0
// would mean it performs no ranking at all; both are treated as bugs by
// downstream tooling, so the formulas below approach their bounds without
// reaching them.
pub fn score_breakdown(entry: &HostDbEntry, height: u64) -> HostScoreBreakdown {
    let age_adjustment = age_adjustment(entry, height);
    let burn_adjustment = burn_adjustment(entry);
    let collateral_adjustment = collateral_adjustment(entry);
    let price_adjustment = price_adjustment(entry);
    let storage_remaining_adjustment = storage_remaining_adjustment(entry);
    let uptime_adjustment = uptime_adjustment(entry);
    let version_adjustment = version_adjustment(entry);

    let score = age_adjustment
        * burn_adjustment
        * collateral_adjustment
        * price_adjustment
        * storage_remaining_adjustment
        * uptime_adjustment
        * version_adjustment;

    HostScoreBreakdown {
        score,
        age_adjustment,
        burn_adjustment,
        collateral_adjustment,
        price_adjustment,
        storage_remaining_adjustment,
        uptime_adjustment,
        version_adjustment,
    }
}

// older hosts are more trustworthy; saturates asymptotically
fn age_adjustment(entry: &HostDbEntry, height: u64) -> f64 {
    let age = height.saturating_sub(entry.first_seen) as f64;
    0.25 + 0.75 * (age / (age + 1_000.0))
}

// hosts risking collateral relative to their prices have skin in the game
fn burn_adjustment(entry: &HostDbEntry) -> f64 {
    let Some(settings) = &entry.settings else {
        return 0.5;
    };
    let collateral = settings.collateral.value() as f64;
    let price = settings.storage_price.value() as f64 + 1.0;
    let ratio = collateral / price;
    0.5 + ratio / (ratio + 1.0)
}

fn collateral_adjustment(entry: &HostDbEntry) -> f64 {
    let Some(settings) = &entry.settings else {
        return 0.25;
    };
    let collateral = settings.collateral.value() as f64;
    let baseline = (COIN_PRECISION / 1_000_000) as f64 + 1.0;
    0.25 + collateral / (collateral + baseline)
}

// cheaper hosts score higher; the baseline pins the midpoint
fn price_adjustment(entry: &HostDbEntry) -> f64 {
    let Some(settings) = &entry.settings else {
        return 0.5;
    };
    let price = (settings.storage_price.value()
        + settings.upload_bandwidth_price.value()
        + settings.download_bandwidth_price.value()) as f64;
    let baseline = (COIN_PRECISION / 100_000) as f64 + 1.0;
    0.1 + 1.4 * (baseline / (price + baseline))
}

fn storage_remaining_adjustment(entry: &HostDbEntry) -> f64 {
    let Some(settings) = &entry.settings else {
        return 0.25;
    };
    let remaining = settings.remaining_storage as f64;
    let baseline = (64u64 << 30) as f64;
    0.25 + 0.75 * (remaining / (remaining + baseline))
}

fn uptime_adjustment(entry: &HostDbEntry) -> f64 {
    let up = entry.historic_uptime as f64 + 1.0;
    let down = entry.historic_downtime as f64 + 1.0;
    up / (up + down)
}

fn version_adjustment(entry: &HostDbEntry) -> f64 {
    match &entry.settings {
        Some(settings) if settings.version == VERSION => 1.1,
        Some(_) => 0.9,
        None => 0.95,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sia_common::crypto::SecretKey;

    fn bare_entry() -> HostDbEntry {
        HostDbEntry::new(
            SecretKey::from_bytes(&[1u8; 32]).public_key(),
            "host:9982".to_string(),
            10,
        )
    }

    #[test]
    fn test_every_dimension_is_nonzero_and_not_one() {
        let entry = bare_entry();
        let breakdown = score_breakdown(&entry, 500);
        for value in [
            breakdown.age_adjustment,
            breakdown.burn_adjustment,
            breakdown.collateral_adjustment,
            breakdown.price_adjustment,
            breakdown.storage_remaining_adjustment,
            breakdown.uptime_adjustment,
            breakdown.version_adjustment,
        ] {
            assert!(value > 0.0, "adjustment dropped to zero");
            assert_ne!(value, 1.0, "adjustment performs no ranking");
        }
        assert!(breakdown.score > 0.0);
    }

    #[test]
    fn test_age_rewards_longevity() {
        let entry = bare_entry();
        let young = score_breakdown(&entry, 20).age_adjustment;
        let old = score_breakdown(&entry, 100_000).age_adjustment;
        assert!(old > young);
    }

    #[test]
    fn test_downtime_hurts() {
        let mut entry = bare_entry();
        let healthy = score_breakdown(&entry, 100).uptime_adjustment;
        entry.historic_downtime = 50;
        let flaky = score_breakdown(&entry, 100).uptime_adjustment;
        assert!(flaky < healthy);
    }
}
