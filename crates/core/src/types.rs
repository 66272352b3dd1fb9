use crate::config::SegmentThresholds;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Customer wealth bucket derived from the account balance. Ordering matters:
/// `low < mass < affluent < hnw`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    Low,
    Mass,
    Affluent,
    Hnw,
}

impl Segment {
    pub fn from_balance(balance: f64, thresholds: &SegmentThresholds) -> Segment {
        if balance < thresholds.low_max {
            Segment::Low
        } else if balance < thresholds.mass_max {
            Segment::Mass
        } else if balance < thresholds.affluent_max {
            Segment::Affluent
        } else {
            Segment::Hnw
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Low => "low",
            Segment::Mass => "mass",
            Segment::Affluent => "affluent",
            Segment::Hnw => "hnw",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ad delivery surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "ATM")]
    Atm,
    #[serde(rename = "mobile")]
    Mobile,
    #[serde(rename = "web")]
    Web,
    #[serde(rename = "USSD")]
    Ussd,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Atm => "ATM",
            Channel::Mobile => "mobile",
            Channel::Web => "web",
            Channel::Ussd => "USSD",
        }
    }

    pub fn parse(value: &str) -> Option<Channel> {
        match value {
            "ATM" => Some(Channel::Atm),
            "mobile" => Some(Channel::Mobile),
            "web" => Some(Channel::Web),
            "USSD" => Some(Channel::Ussd),
            _ => None,
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Channel::Atm
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named hour range applied to the wall clock. An ad with no time slots runs
/// all day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeSlot {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeSlot {
    /// morning [6,12), afternoon [12,17), evening [17,21), night otherwise.
    pub fn from_hour(hour: u32) -> TimeSlot {
        match hour {
            6..=11 => TimeSlot::Morning,
            12..=16 => TimeSlot::Afternoon,
            17..=20 => TimeSlot::Evening,
            _ => TimeSlot::Night,
        }
    }

    pub fn of(now: DateTime<Utc>) -> TimeSlot {
        TimeSlot::from_hour(now.hour())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeSlot::Morning => "morning",
            TimeSlot::Afternoon => "afternoon",
            TimeSlot::Evening => "evening",
            TimeSlot::Night => "night",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advertiser {
    pub name: String,
    pub contact_email: String,
}

/// Durable catalog record. Mutated only by admin writes and analytics
/// increments, never implicitly deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ad {
    pub id: String,
    pub title: String,
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta: Option<String>,
    pub segments: Vec<Segment>,
    #[serde(default = "default_channels")]
    pub channels: Vec<Channel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_slots: Option<Vec<TimeSlot>>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: AdStatus,
    #[serde(default = "default_priority")]
    pub priority: f64,
    #[serde(default)]
    pub impressions: u64,
    #[serde(default)]
    pub clicks: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertiser: Option<Advertiser>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn default_channels() -> Vec<Channel> {
    vec![Channel::Atm]
}

pub fn default_priority() -> f64 {
    1.0
}

fn default_status() -> AdStatus {
    AdStatus::Active
}

/// Admin payload for creating an ad. Identifier and counters are assigned by
/// the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAdRequest {
    pub title: String,
    pub image_url: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub cta: Option<String>,
    pub segments: Vec<Segment>,
    #[serde(default = "default_channels")]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub locations: Option<Vec<String>>,
    #[serde(default)]
    pub time_slots: Option<Vec<TimeSlot>>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default = "default_status")]
    pub status: AdStatus,
    #[serde(default = "default_priority")]
    pub priority: f64,
    #[serde(default)]
    pub advertiser: Option<Advertiser>,
}

/// Per-customer impression history held in the KV store. Absence is
/// equivalent to an empty profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub customer_id: String,
    #[serde(default)]
    pub impressions: Vec<ImpressionRecord>,
    pub last_updated: DateTime<Utc>,
}

impl UserProfile {
    pub fn empty(customer_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            customer_id: customer_id.to_string(),
            impressions: Vec::new(),
            last_updated: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpressionRecord {
    pub ad_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Serve request body. Fields are optional so validation can produce precise
/// client-facing messages instead of deserializer errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServeRequest {
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServeResponse {
    pub ad_id: String,
    pub title: String,
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta: Option<String>,
    pub segment: Segment,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpressionRequest {
    pub ad_id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickRequest {
    pub ad_id: String,
}
