use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Timestamps in statistics payloads: `2021-02-01T00:00:00.000000`, no offset.
pub mod api_time {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const LAYOUT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn parse(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
        NaiveDateTime::parse_from_str(s, LAYOUT)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format("%Y-%m-%dT%H:%M:%S%.6f").to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CountByDate {
    #[serde(default)]
    pub count: i64,
    #[serde(with = "api_time")]
    pub date: NaiveDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RateTotal {
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CountByDateWithRate {
    #[serde(default)]
    pub count: i64,
    #[serde(with = "api_time")]
    pub date: NaiveDateTime,
    #[serde(default)]
    pub rate: f64,
}

/// A web page on which users interacted with the bot.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PageStatistic {
    #[serde(default)]
    pub messages: i64,
    #[serde(default)]
    pub sessions: i64,
    #[serde(rename = "web_host", default)]
    pub host: String,
    #[serde(rename = "web_path", default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ChatLabel {
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
}

/// Handover (takeover) totals for a period.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Handovers {
    #[serde(default)]
    pub ended: i64,
    #[serde(default)]
    pub requests: i64,
    #[serde(default)]
    pub requests_while_closed: i64,
    #[serde(default)]
    pub started: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HandoversTimeSeries {
    #[serde(with = "api_time")]
    pub date: NaiveDateTime,
    #[serde(flatten)]
    pub handovers: Handovers,
}

/// Aggregated user ratings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Rating {
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub rating: i64,
    #[serde(default)]
    pub ratio: f64,
}

/// User feedback ratings, split by widget type.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Feedback {
    #[serde(default)]
    pub binary: Vec<Rating>,
    #[serde(default)]
    pub emojis: Vec<Rating>,
}
