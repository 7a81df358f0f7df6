use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable external player identifier.
///
/// Telegram hands out numeric ids while the web client posts strings, so both
/// are accepted on the way in and kept as their decimal/text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for PlayerId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PlayerId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(PlayerId::from(n)),
            Raw::Text(s) => {
                PlayerId::parse(&s).ok_or_else(|| serde::de::Error::custom("blank player id"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MiningState {
    Idle,
    Mining,
}

impl MiningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MiningState::Idle => "Idle",
            MiningState::Mining => "Mining",
        }
    }
}

impl FromStr for MiningState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Idle" => Ok(MiningState::Idle),
            "Mining" => Ok(MiningState::Mining),
            other => Err(format!("unknown mining state: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub display_name: String,
    pub photo_url: String,
    pub points: u64,
    pub mining_state: MiningState,
    pub session_started_at: Option<DateTime<Utc>>,
    pub accrued_elapsed_seconds: f64,
    pub last_updated_at: DateTime<Utc>,
}

impl PlayerRecord {
    /// Fresh idle record with placeholder name and the default photo.
    pub fn new(id: PlayerId, default_photo_url: &str, now: DateTime<Utc>) -> Self {
        Self {
            display_name: default_display_name(&id),
            id,
            photo_url: default_photo_url.to_string(),
            points: 0,
            mining_state: MiningState::Idle,
            session_started_at: None,
            accrued_elapsed_seconds: 0.0,
            last_updated_at: now,
        }
    }

    /// Seconds of the open session not yet folded into the accrued counter.
    pub fn live_elapsed(&self, now: DateTime<Utc>) -> f64 {
        match (self.mining_state, self.session_started_at) {
            (MiningState::Mining, Some(started)) => seconds_between(started, now),
            _ => 0.0,
        }
    }

    pub fn effective_elapsed(&self, now: DateTime<Utc>) -> f64 {
        self.accrued_elapsed_seconds + self.live_elapsed(now)
    }

    pub fn status(&self, now: DateTime<Utc>) -> MiningStatus {
        MiningStatus {
            state: self.mining_state,
            effective_elapsed: self.effective_elapsed(now),
        }
    }
}

pub fn default_display_name(id: &PlayerId) -> String {
    format!("Player_{}", id)
}

/// Read-only projection returned by status queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningStatus {
    pub state: MiningState,
    pub effective_elapsed: f64,
}

impl MiningStatus {
    pub fn idle() -> Self {
        Self {
            state: MiningState::Idle,
            effective_elapsed: 0.0,
        }
    }
}

/// Identity fields to lay over a player record. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerPatch {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub points: Option<u64>,
}

impl PlayerPatch {
    pub fn apply(&self, record: &mut PlayerRecord, now: DateTime<Utc>) {
        if let Some(name) = &self.display_name {
            record.display_name = name.clone();
        }
        if let Some(url) = &self.photo_url {
            record.photo_url = url.clone();
        }
        if let Some(points) = self.points {
            record.points = points;
        }
        record.last_updated_at = now;
    }
}

/// Whole seconds with millisecond precision; clock skew clamps to zero.
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds().max(0) as f64 / 1000.0
}
