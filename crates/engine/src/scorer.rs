//! Composite candidate scoring.
//!
//! Four components, each normalised to [0, 1] over the candidate set, blended
//! with configured weights. Ordering is fully deterministic so replicas agree
//! on the winner: score, then priority, then earlier start date, then id.

use adserve_core::config::ServingConfig;
use adserve_core::types::Ad;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct ScoreBreakdown {
    pub priority: f64,
    pub ctr: f64,
    pub recency: f64,
    pub freshness: f64,
}

#[derive(Debug, Clone)]
pub struct ScoredAd {
    pub ad: Ad,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

fn effective_priority(ad: &Ad) -> f64 {
    if ad.priority > 0.0 {
        ad.priority
    } else {
        1.0
    }
}

fn raw_ctr(ad: &Ad, config: &ServingConfig) -> f64 {
    if ad.impressions < config.ctr.min_impressions {
        config.ctr.default_ctr
    } else {
        ad.clicks as f64 / ad.impressions as f64
    }
}

/// Score and sort a candidate set, best first.
pub fn rank(candidates: Vec<Ad>, now: DateTime<Utc>, config: &ServingConfig) -> Vec<ScoredAd> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let max_priority = candidates
        .iter()
        .map(effective_priority)
        .fold(1.0_f64, f64::max);
    let max_impressions = candidates
        .iter()
        .map(|ad| ad.impressions)
        .max()
        .unwrap_or(0)
        .max(1);
    let horizon_secs = (config.recency_horizon_days * 86_400) as f64;
    let weights = &config.weights;

    let mut scored: Vec<ScoredAd> = candidates
        .into_iter()
        .map(|ad| {
            let priority = effective_priority(&ad) / max_priority;
            let ctr = (raw_ctr(&ad, config) / config.ctr.target_ctr).min(1.0);
            let age_secs = (now - ad.start_date).num_seconds() as f64;
            let recency = (1.0 - age_secs / horizon_secs).clamp(0.0, 1.0);
            let freshness = 1.0 - ad.impressions as f64 / max_impressions as f64;

            let score = weights.priority * priority
                + weights.ctr * ctr
                + weights.recency * recency
                + weights.freshness * freshness;

            ScoredAd {
                ad,
                score,
                breakdown: ScoreBreakdown {
                    priority,
                    ctr,
                    recency,
                    freshness,
                },
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.ad.priority.total_cmp(&a.ad.priority))
            .then_with(|| a.ad.start_date.cmp(&b.ad.start_date))
            .then_with(|| a.ad.id.cmp(&b.ad.id))
    });
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use adserve_core::types::{AdStatus, Channel, Segment};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()
    }

    fn ad(id: &str) -> Ad {
        Ad {
            id: id.to_string(),
            title: format!("Ad {id}"),
            image_url: "https://cdn/img.png".to_string(),
            video_url: None,
            cta: None,
            segments: vec![Segment::Mass],
            channels: vec![Channel::Atm],
            locations: None,
            time_slots: None,
            start_date: now() - Duration::days(1),
            end_date: now() + Duration::days(30),
            status: AdStatus::Active,
            priority: 1.0,
            impressions: 0,
            clicks: 0,
            advertiser: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn components_stay_in_unit_range() {
        let mut a = ad("a");
        a.priority = 9.0;
        a.impressions = 5_000;
        a.clicks = 4_000;
        let mut b = ad("b");
        b.start_date = now() - Duration::days(400);
        b.impressions = 12;

        for scored in rank(vec![a, b], now(), &ServingConfig::default()) {
            let c = &scored.breakdown;
            for component in [c.priority, c.ctr, c.recency, c.freshness] {
                assert!((0.0..=1.0).contains(&component), "component {component}");
            }
            assert!((0.0..=1.0).contains(&scored.score));
        }
    }

    #[test]
    fn default_ctr_below_threshold_computed_at_threshold() {
        let config = ServingConfig::default();

        let mut nine = ad("nine");
        nine.impressions = 9;
        nine.clicks = 9;
        // 9/9 would be CTR 1.0, but under 10 impressions the default applies.
        assert_eq!(raw_ctr(&nine, &config), 0.02);

        let mut ten = ad("ten");
        ten.impressions = 10;
        ten.clicks = 5;
        assert_eq!(raw_ctr(&ten, &config), 0.5);
    }

    #[test]
    fn ctr_component_saturates_at_target() {
        let config = ServingConfig::default();
        let mut hot = ad("hot");
        hot.impressions = 100;
        hot.clicks = 60; // raw CTR 0.6, far above the 0.1 target
        let scored = rank(vec![hot], now(), &config);
        assert_eq!(scored[0].breakdown.ctr, 1.0);
    }

    #[test]
    fn higher_priority_wins_other_things_equal() {
        let mut a = ad("a");
        a.priority = 5.0;
        let b = ad("b");
        let scored = rank(vec![b, a], now(), &ServingConfig::default());
        assert_eq!(scored[0].ad.id, "a");
        assert!(scored[0].score > scored[1].score);
    }

    #[test]
    fn fresh_ad_beats_worn_ad() {
        let a = ad("a");
        let mut b = ad("b");
        b.impressions = 1_000;
        b.clicks = 20; // computed CTR 0.02 = the default, so CTR ties
        let scored = rank(vec![b, a], now(), &ServingConfig::default());
        assert_eq!(scored[0].ad.id, "a");
    }

    #[test]
    fn recency_decays_over_horizon() {
        let config = ServingConfig::default();
        let mut new = ad("new");
        new.start_date = now();
        let mut mid = ad("mid");
        mid.start_date = now() - Duration::days(15);
        let mut old = ad("old");
        old.start_date = now() - Duration::days(45);

        let scored = rank(vec![old, mid, new], now(), &config);
        let by_id = |id: &str| {
            scored
                .iter()
                .find(|s| s.ad.id == id)
                .map(|s| s.breakdown.recency)
                .unwrap()
        };
        assert_eq!(by_id("new"), 1.0);
        assert!((by_id("mid") - 0.5).abs() < 1e-9);
        assert_eq!(by_id("old"), 0.0);
    }

    #[test]
    fn ties_break_deterministically() {
        // Identical ads except id: winner must be the lexicographically
        // smaller id, on every run and in any input order.
        let first = rank(vec![ad("b"), ad("a"), ad("c")], now(), &ServingConfig::default());
        let second = rank(vec![ad("c"), ad("b"), ad("a")], now(), &ServingConfig::default());
        let ids_first: Vec<&str> = first.iter().map(|s| s.ad.id.as_str()).collect();
        let ids_second: Vec<&str> = second.iter().map(|s| s.ad.id.as_str()).collect();
        assert_eq!(ids_first, vec!["a", "b", "c"]);
        assert_eq!(ids_first, ids_second);
    }

    #[test]
    fn start_date_breaks_ties_before_id() {
        let mut early = ad("z-early");
        early.start_date = now() - Duration::days(2);
        let mut late = ad("a-late");
        late.start_date = now() - Duration::days(1);
        // Same priority; earlier start means lower recency, so give the pair
        // identical recency by weighting it out.
        let mut config = ServingConfig::default();
        config.weights.priority = 0.5;
        config.weights.ctr = 0.5;
        config.weights.recency = 0.0;
        config.weights.freshness = 0.0;

        let scored = rank(vec![late, early], now(), &config);
        assert_eq!(scored[0].ad.id, "z-early");
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(rank(vec![], now(), &ServingConfig::default()).is_empty());
    }
}
