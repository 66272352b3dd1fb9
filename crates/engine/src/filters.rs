//! Candidate filters: time-slot eligibility and per-customer frequency caps.
//!
//! Both return the surviving set plus a diagnostic list of exclusions for
//! logging.

use adserve_core::config::FrequencyConfig;
use adserve_core::types::{Ad, TimeSlot, UserProfile};
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone)]
pub enum ExclusionReason {
    OutsideTimeSlot { current: TimeSlot },
    DailyCapReached { seen_today: u32 },
    InCooldown { last_seen: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct FilterExclusion {
    pub ad_id: String,
    pub reason: ExclusionReason,
}

/// An ad passes when it has no time-slot restriction or the current slot is
/// listed.
pub fn filter_by_time_slot(
    ads: Vec<Ad>,
    now: DateTime<Utc>,
) -> (Vec<Ad>, Vec<FilterExclusion>) {
    let current = TimeSlot::of(now);
    let mut eligible = Vec::with_capacity(ads.len());
    let mut excluded = Vec::new();

    for ad in ads {
        let passes = match &ad.time_slots {
            None => true,
            Some(slots) => slots.is_empty() || slots.contains(&current),
        };
        if passes {
            eligible.push(ad);
        } else {
            excluded.push(FilterExclusion {
                ad_id: ad.id,
                reason: ExclusionReason::OutsideTimeSlot { current },
            });
        }
    }
    (eligible, excluded)
}

/// Drop ads the customer has seen too often: at least `max_per_day` times in
/// the trailing 24 h, or at all within the cooldown interval.
pub fn filter_by_frequency(
    ads: Vec<Ad>,
    profile: &UserProfile,
    now: DateTime<Utc>,
    config: &FrequencyConfig,
) -> (Vec<Ad>, Vec<FilterExclusion>) {
    let day_cutoff = now - Duration::hours(24);
    let cooldown_cutoff = now - Duration::seconds(config.cooldown_secs as i64);

    let mut eligible = Vec::with_capacity(ads.len());
    let mut excluded = Vec::new();

    for ad in ads {
        let history: Vec<DateTime<Utc>> = profile
            .impressions
            .iter()
            .filter(|entry| entry.ad_id == ad.id && entry.timestamp > day_cutoff)
            .map(|entry| entry.timestamp)
            .collect();

        let seen_today = history.len() as u32;
        let last_seen = history.iter().max().copied();

        if seen_today >= config.max_per_day {
            excluded.push(FilterExclusion {
                ad_id: ad.id,
                reason: ExclusionReason::DailyCapReached { seen_today },
            });
        } else if let Some(last) = last_seen.filter(|last| *last > cooldown_cutoff) {
            excluded.push(FilterExclusion {
                ad_id: ad.id,
                reason: ExclusionReason::InCooldown { last_seen: last },
            });
        } else {
            eligible.push(ad);
        }
    }
    (eligible, excluded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use adserve_core::types::{AdStatus, Channel, ImpressionRecord, Segment};
    use chrono::TimeZone;

    fn ad(id: &str, time_slots: Option<Vec<TimeSlot>>) -> Ad {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();
        Ad {
            id: id.to_string(),
            title: format!("Ad {id}"),
            image_url: "https://cdn/img.png".to_string(),
            video_url: None,
            cta: None,
            segments: vec![Segment::Mass],
            channels: vec![Channel::Atm],
            locations: None,
            time_slots,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(1),
            status: AdStatus::Active,
            priority: 1.0,
            impressions: 0,
            clicks: 0,
            advertiser: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, hour, 30, 0).unwrap()
    }

    fn profile_with(entries: Vec<(&str, DateTime<Utc>)>) -> UserProfile {
        UserProfile {
            customer_id: "C1".to_string(),
            impressions: entries
                .into_iter()
                .map(|(ad_id, timestamp)| ImpressionRecord {
                    ad_id: ad_id.to_string(),
                    timestamp,
                })
                .collect(),
            last_updated: at_hour(10),
        }
    }

    #[test]
    fn unrestricted_ads_pass_any_slot() {
        let ads = vec![ad("a", None), ad("b", Some(vec![]))];
        let (eligible, excluded) = filter_by_time_slot(ads, at_hour(3));
        assert_eq!(eligible.len(), 2);
        assert!(excluded.is_empty());
    }

    #[test]
    fn slot_restricted_ads_follow_the_clock() {
        let ads = vec![
            ad("morning", Some(vec![TimeSlot::Morning])),
            ad("evening", Some(vec![TimeSlot::Evening, TimeSlot::Night])),
        ];
        let (eligible, excluded) = filter_by_time_slot(ads.clone(), at_hour(9));
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, "morning");
        assert_eq!(excluded.len(), 1);
        assert_eq!(excluded[0].ad_id, "evening");

        let (eligible, _) = filter_by_time_slot(ads, at_hour(22));
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, "evening");
    }

    #[test]
    fn daily_cap_excludes_after_three() {
        let now = at_hour(10);
        let profile = profile_with(vec![
            ("a", now - Duration::hours(3)),
            ("a", now - Duration::hours(5)),
            ("a", now - Duration::hours(7)),
        ]);
        let (eligible, excluded) =
            filter_by_frequency(vec![ad("a", None)], &profile, now, &FrequencyConfig::default());
        assert!(eligible.is_empty());
        assert!(matches!(
            excluded[0].reason,
            ExclusionReason::DailyCapReached { seen_today: 3 }
        ));
    }

    #[test]
    fn impressions_older_than_a_day_do_not_count() {
        let now = at_hour(10);
        let profile = profile_with(vec![
            ("a", now - Duration::hours(25)),
            ("a", now - Duration::hours(26)),
            ("a", now - Duration::hours(30)),
        ]);
        let (eligible, excluded) =
            filter_by_frequency(vec![ad("a", None)], &profile, now, &FrequencyConfig::default());
        assert_eq!(eligible.len(), 1);
        assert!(excluded.is_empty());
    }

    #[test]
    fn cooldown_excludes_recently_seen() {
        let now = at_hour(10);
        let profile = profile_with(vec![("a", now - Duration::minutes(30))]);
        let (eligible, excluded) =
            filter_by_frequency(vec![ad("a", None)], &profile, now, &FrequencyConfig::default());
        assert!(eligible.is_empty());
        assert!(matches!(
            excluded[0].reason,
            ExclusionReason::InCooldown { .. }
        ));
    }

    #[test]
    fn survivors_satisfy_cap_and_cooldown() {
        let now = at_hour(12);
        let config = FrequencyConfig::default();
        let profile = profile_with(vec![
            ("a", now - Duration::hours(3)),
            ("a", now - Duration::hours(6)),
            ("b", now - Duration::minutes(10)),
            ("c", now - Duration::hours(23)),
        ]);
        let ads = vec![ad("a", None), ad("b", None), ad("c", None), ad("d", None)];
        let (eligible, _) = filter_by_frequency(ads, &profile, now, &config);

        let day_cutoff = now - Duration::hours(24);
        let cooldown_cutoff = now - Duration::seconds(config.cooldown_secs as i64);
        for survivor in &eligible {
            let history: Vec<_> = profile
                .impressions
                .iter()
                .filter(|e| e.ad_id == survivor.id && e.timestamp > day_cutoff)
                .collect();
            assert!((history.len() as u32) < config.max_per_day);
            assert!(history.iter().all(|e| e.timestamp <= cooldown_cutoff));
        }
        let ids: Vec<&str> = eligible.iter().map(|ad| ad.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "d"]);
    }
}
