/*
 *  states.rs
 *
 *  dialbridge - one poll, many widgets
 *  (c) 2020-26 Stuart Hunter
 *
 *  Player state as reported by the bridge
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
use chrono::{DateTime, Local};
use serde::Deserialize;

use crate::deutils::{default_false, deserialize_bool_from_anything};

/// Point-in-time copy of the player state cached by the bridge.
///
/// Never mutated once built; every scheduler tick replaces it wholesale and
/// hands the same `Arc` to every button for that tick.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    #[serde(default = "default_false", deserialize_with = "deserialize_bool_from_anything")]
    pub is_playing: bool,
    #[serde(default = "default_false", deserialize_with = "deserialize_bool_from_anything")]
    pub is_liked: bool,
    #[serde(default = "default_false", deserialize_with = "deserialize_bool_from_anything")]
    pub is_shuffled: bool,
    #[serde(default = "default_false", deserialize_with = "deserialize_bool_from_anything")]
    pub is_muted: bool,
    #[serde(skip, default = "Local::now")]
    pub fetched_at: DateTime<Local>,
}

impl StateSnapshot {
    pub fn new(is_playing: bool, is_liked: bool, is_shuffled: bool, is_muted: bool) -> Self {
        StateSnapshot {
            is_playing,
            is_liked,
            is_shuffled,
            is_muted,
            fetched_at: Local::now(),
        }
    }
}

impl Default for StateSnapshot {
    fn default() -> Self {
        StateSnapshot::new(false, false, false, false)
    }
}

/// Body of `GET <bridge>/states`.
#[derive(Debug, Deserialize)]
pub struct StatesEnvelope {
    pub states: StateSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bridge_envelope() {
        let body = r#"{"states": {"isPlaying": true, "isLiked": "1", "isShuffled": 0}}"#;
        let env: StatesEnvelope = serde_json::from_str(body).unwrap();
        assert!(env.states.is_playing);
        assert!(env.states.is_liked);
        assert!(!env.states.is_shuffled);
        assert!(!env.states.is_muted); // absent
    }

    #[test]
    fn envelope_without_states_is_rejected() {
        assert!(serde_json::from_str::<StatesEnvelope>(r#"{"isPlaying": true}"#).is_err());
    }
}
