//! Runtime settings assembled from `MISSION_*` environment variables.
//!
//! Every variable is optional; unset ones fall back to the builder defaults of the structure they
//! configure. Durations are given in milliseconds.
//!
//! | Variable | Setting |
//! |---|---|
//! | `MISSION_MAX_RETRIES` | [`LinkConfig`] retransmissions per command |
//! | `MISSION_ACK_TIMEOUT_MS` | [`LinkConfig`] wait per attempt |
//! | `MISSION_MIN_COMMAND_TIME_MS` | lower bound for the above |
//! | `MISSION_CONNECT_RETRIES` | [`MissionConfig::connect_retries`] |
//! | `MISSION_LAND_RETRIES` | [`MissionConfig::land_retries`] |
//! | `MISSION_MIN_SAFE_BATTERY` | [`MissionConfig::min_safe_battery`] |
//! | `MISSION_HEARTBEAT_TIMEOUT_MS` | [`MissionConfig::heartbeat_timeout`] |
//! | `MISSION_EMERGENCY_STOP` | [`MissionConfig::emergency_stop_on_land_failure`] |
//! | `MISSION_MAX_SINGLE_MOVE` | [`CapabilityLimits`] |
//! | `MISSION_MIN_MOVE` | [`CapabilityLimits`] |
//! | `MISSION_MAX_ROTATION` | [`CapabilityLimits`] |
//! | `MISSION_INITIAL_HEADING` | [`TranslateOptions::initial_heading`] |
//! | `MISSION_ALTITUDE_CHANGE` | [`TranslateOptions::altitude_change`] |
//! | `MISSION_TAG_SEQUENCE` | sequence-tag commands on the wire |

use std::str::FromStr;
use std::time::Duration;

use crate::link::{LinkConfig, LinkError};
use crate::state_machine::mission::MissionConfig;
use crate::translate::{CapabilityLimits, InvalidLimits, TranslateOptions};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Limits(#[from] InvalidLimits),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub link: LinkConfig,
    pub mission: MissionConfig,
    pub limits: CapabilityLimits,
    pub translate: TranslateOptions,
    pub tag_sequence: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Lookup(lookup);

        let link = LinkConfig::builder()
            .maybe_max_retries(env.parse("MISSION_MAX_RETRIES")?)
            .maybe_ack_timeout(env.millis("MISSION_ACK_TIMEOUT_MS")?)
            .maybe_min_command_time(env.millis("MISSION_MIN_COMMAND_TIME_MS")?)
            .build()?;

        let mission = MissionConfig::builder()
            .maybe_connect_retries(env.parse("MISSION_CONNECT_RETRIES")?)
            .maybe_land_retries(env.parse("MISSION_LAND_RETRIES")?)
            .maybe_min_safe_battery(env.parse("MISSION_MIN_SAFE_BATTERY")?)
            .maybe_heartbeat_timeout(env.millis("MISSION_HEARTBEAT_TIMEOUT_MS")?)
            .maybe_emergency_stop_on_land_failure(env.flag("MISSION_EMERGENCY_STOP")?)
            .build();

        let limits = CapabilityLimits::builder()
            .maybe_max_single_move(env.parse("MISSION_MAX_SINGLE_MOVE")?)
            .maybe_min_move(env.parse("MISSION_MIN_MOVE")?)
            .maybe_max_rotation(env.parse("MISSION_MAX_ROTATION")?)
            .build()?;

        let translate = TranslateOptions::builder()
            .maybe_initial_heading(env.parse("MISSION_INITIAL_HEADING")?)
            .maybe_altitude_change(env.parse("MISSION_ALTITUDE_CHANGE")?)
            .build();

        Ok(Self {
            link,
            mission,
            limits,
            translate,
            tag_sequence: env.flag("MISSION_TAG_SEQUENCE")?.unwrap_or(false),
        })
    }
}

struct Lookup<F>(F);

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn parse<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        self.get(key)
            .map(|value| {
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid { key, value })
            })
            .transpose()
    }

    fn millis(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_millis))
    }

    fn flag(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        self.get(key)
            .map(|value| {
                let normalized = value.trim().to_ascii_lowercase();
                match normalized.as_str() {
                    "1" | "true" | "yes" | "on" => Ok(true),
                    "0" | "false" | "no" | "off" => Ok(false),
                    _ => Err(ConfigError::Invalid { key, value }),
                }
            })
            .transpose()
    }
}
