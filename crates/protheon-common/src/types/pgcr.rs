//! Post-game carnage report (PGCR) record shape
//!
//! Producers only decode a record to check it is structurally sound; the
//! original line bytes are what travels on the queue. Fields therefore
//! default when absent, and only `activityDetails` is mandatory since it
//! carries the instance id used to identify a record in logs.

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A numeric identifier that may arrive as a JSON number or a numeric string.
///
/// Bungie ids overflow `f64` precision, so the literal text is kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct JsonNumber(String);

impl JsonNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JsonNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_numeric_literal(s: &str) -> bool {
    !s.is_empty() && s.parse::<f64>().is_ok() && !s.contains(['i', 'I', 'n', 'N'])
}

impl<'de> Deserialize<'de> for JsonNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NumberVisitor;

        impl Visitor<'_> for NumberVisitor {
            type Value = JsonNumber;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number or a numeric string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<JsonNumber, E> {
                Ok(JsonNumber(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<JsonNumber, E> {
                Ok(JsonNumber(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<JsonNumber, E> {
                Ok(JsonNumber(v.to_string()))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<JsonNumber, E> {
                if is_numeric_literal(v) {
                    Ok(JsonNumber(v.to_string()))
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }
        }

        deserializer.deserialize_any(NumberVisitor)
    }
}

impl Serialize for JsonNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pgcr {
    #[serde(default)]
    pub archived: Option<DateTime<Utc>>,
    #[serde(default)]
    pub period: Option<DateTime<Utc>>,
    #[serde(default)]
    pub starting_phase_index: Option<JsonNumber>,
    #[serde(default)]
    pub activity_was_started_from_beginning: bool,
    /// Required. It is the one key that tells a PGCR apart from a [`Job`]
    /// body on the shared queue, so a line without it is rejected rather than
    /// decoded as an empty record.
    ///
    /// [`Job`]: crate::types::Job
    pub activity_details: ActivityDetails,
    #[serde(default)]
    pub entries: Vec<Entry>,
    #[serde(default)]
    pub teams: Vec<serde_json::Value>,
}

impl Pgcr {
    /// Instance id of the activity, used to identify the record in logs
    pub fn instance_id(&self) -> &str {
        self.activity_details
            .instance_id
            .as_ref()
            .map(JsonNumber::as_str)
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActivityDetails {
    pub reference_id: Option<JsonNumber>,
    pub director_activity_hash: Option<JsonNumber>,
    pub instance_id: Option<JsonNumber>,
    pub mode: Option<JsonNumber>,
    pub modes: Vec<JsonNumber>,
    pub is_private: bool,
    pub membership_type: Option<JsonNumber>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Entry {
    pub standing: i64,
    pub score: i64,
    pub player: Player,
    pub character_id: String,
    pub values: Values,
    pub extended: Extended,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Player {
    pub destiny_user_info: DestinyUserInfo,
    pub character_class: String,
    pub class_hash: u32,
    pub race_hash: u32,
    pub gender_hash: u32,
    pub character_level: i64,
    pub light_level: i64,
    pub emblem_hash: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DestinyUserInfo {
    pub icon_path: String,
    pub cross_save_override: i64,
    pub applicable_membership_types: Vec<i64>,
    pub is_public: bool,
    pub membership_type: i64,
    pub membership_id: Option<JsonNumber>,
    pub display_name: String,
    pub bungie_global_display_name: String,
    pub bungie_global_display_name_code: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Values {
    pub assists: f64,
    pub completed: f64,
    pub deaths: f64,
    pub kills: f64,
    pub opponents_defeated: f64,
    pub efficiency: f64,
    #[serde(rename = "killsDeathsRatio")]
    pub kd: f64,
    #[serde(rename = "killsDeathsAssists")]
    pub kda: f64,
    pub score: f64,
    #[serde(rename = "activityDurationSeconds")]
    pub activity_duration: f64,
    pub completion_reason: f64,
    pub fireteam_id: f64,
    pub start_seconds: f64,
    pub time_played_seconds: f64,
    pub player_count: f64,
    pub team_score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Extended {
    pub values: ExtendedValues,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtendedValues {
    pub precision_kills: f64,
    pub weapon_kills_grenade: f64,
    pub weapon_kills_melee: f64,
    pub weapon_kills_super: f64,
    pub weapon_kills_ability: f64,
}
