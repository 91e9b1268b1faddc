/*
 *  widget.rs
 *
 *  dialbridge - one poll, many widgets
 *  (c) 2020-26 Stuart Hunter
 *
 *  Widget instances and the controller shared by buttons and dials
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::BridgeError;
use crate::states::StateSnapshot;
use crate::traits::CommandPayload;

/// Host-assigned identifier, stable for as long as the widget is visible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WidgetId(String);

impl WidgetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WidgetId {
    fn from(s: &str) -> Self {
        WidgetId(s.to_string())
    }
}

impl From<String> for WidgetId {
    fn from(s: String) -> Self {
        WidgetId(s)
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetKind {
    Button,
    Dial,
}

/// Input kinds a command can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Trigger {
    Press,
    TouchTap,
    RotateUp,
    RotateDown,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::Press => "press",
            Trigger::TouchTap => "touchTap",
            Trigger::RotateUp => "rotateUp",
            Trigger::RotateDown => "rotateDown",
        };
        f.write_str(name)
    }
}

/// User input delivered by the host for one widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Press,
    Release,
    TouchTap,
    DialRotate { ticks: i32 },
    DialPress,
}

/// Name of a host-side icon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageKey(String);

impl ImageKey {
    pub fn new(key: impl Into<String>) -> Self {
        ImageKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps a snapshot to an icon without touching the network.
pub trait Presentation {
    fn compute_presentation(&self, snapshot: &StateSnapshot) -> ImageKey;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaceName {
    #[default]
    PlayPause,
    Like,
    Shuffle,
    Mute,
    Static,
}

/// What a button shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonFace {
    PlayPause,
    Like,
    Shuffle,
    Mute,
    Static(ImageKey),
}

pub const DEFAULT_STATIC_KEY: &str = "idle";

impl ButtonFace {
    pub fn from_settings(settings: &WidgetSettings) -> Self {
        match settings.face {
            FaceName::PlayPause => ButtonFace::PlayPause,
            FaceName::Like => ButtonFace::Like,
            FaceName::Shuffle => ButtonFace::Shuffle,
            FaceName::Mute => ButtonFace::Mute,
            FaceName::Static => ButtonFace::Static(ImageKey::new(
                settings.static_key.as_deref().unwrap_or(DEFAULT_STATIC_KEY),
            )),
        }
    }
}

impl Presentation for ButtonFace {
    fn compute_presentation(&self, snapshot: &StateSnapshot) -> ImageKey {
        let pick = |on: bool, yes: &str, no: &str| ImageKey::new(if on { yes } else { no });
        match self {
            ButtonFace::PlayPause => pick(snapshot.is_playing, "pause", "play"),
            ButtonFace::Like => pick(snapshot.is_liked, "liked", "like"),
            ButtonFace::Shuffle => pick(snapshot.is_shuffled, "shuffleOn", "shuffleOff"),
            ButtonFace::Mute => pick(snapshot.is_muted, "muted", "unmuted"),
            ButtonFace::Static(key) => key.clone(),
        }
    }
}

/// Per-instance settings as sent by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WidgetSettings {
    pub face: FaceName,
    pub static_key: Option<String>,
    pub actions: BTreeMap<Trigger, String>,
    pub image_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetInstance {
    pub id: WidgetId,
    pub kind: WidgetKind,
    pub bound_actions: BTreeMap<Trigger, String>,
    pub image_source: Option<String>,
}

impl WidgetInstance {
    pub fn new(id: WidgetId, kind: WidgetKind, settings: &WidgetSettings) -> Self {
        WidgetInstance {
            id,
            kind,
            bound_actions: bound_actions(settings),
            image_source: image_source(settings),
        }
    }
}

fn bound_actions(settings: &WidgetSettings) -> BTreeMap<Trigger, String> {
    settings
        .actions
        .iter()
        .filter(|(_, action)| !action.trim().is_empty())
        .map(|(trigger, action)| (*trigger, action.trim().to_string()))
        .collect()
}

fn image_source(settings: &WidgetSettings) -> Option<String> {
    settings
        .image_source
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// What to do once a dispatched command has been accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    /// Fetch a fresh snapshot for this button only.
    RefreshPresentation,
    /// Re-run the image pipeline for this dial's source.
    RefetchImage,
}

/// A command to send in response to an input event.
#[derive(Debug, Clone, PartialEq)]
pub struct Reaction {
    pub action: String,
    pub payload: Option<CommandPayload>,
    pub follow_up: FollowUp,
}

/// Identifies the configuration an image fetch was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub source: String,
    pub epoch: u64,
}

#[derive(Debug, Clone)]
enum Variant {
    Button { face: ButtonFace, last_key: Option<ImageKey> },
    Dial,
}

/// Shared core for both widget kinds. Owns its instance exclusively.
#[derive(Debug, Clone)]
pub struct WidgetController {
    instance: WidgetInstance,
    variant: Variant,
    epoch: u64,
    // epoch this controller was created with
    born: u64,
    in_flight: usize,
}

impl WidgetController {
    pub fn new(id: WidgetId, kind: WidgetKind, settings: &WidgetSettings, epoch: u64) -> Self {
        let variant = match kind {
            WidgetKind::Button => Variant::Button { face: ButtonFace::from_settings(settings), last_key: None },
            WidgetKind::Dial => Variant::Dial,
        };
        WidgetController {
            instance: WidgetInstance::new(id, kind, settings),
            variant,
            epoch,
            born: epoch,
            in_flight: 0,
        }
    }

    pub fn id(&self) -> &WidgetId {
        &self.instance.id
    }

    pub fn kind(&self) -> WidgetKind {
        self.instance.kind
    }

    pub fn image_source(&self) -> Option<&str> {
        self.instance.image_source.as_deref()
    }

    /// Replace bindings and source in place. Returns true when the image
    /// source changed, in which case `epoch` becomes current and any fetch
    /// issued under the old one will be refused by [`accepts`](Self::accepts).
    pub fn apply_settings(&mut self, settings: &WidgetSettings, epoch: u64) -> bool {
        self.instance.bound_actions = bound_actions(settings);

        if let Variant::Button { face, last_key } = &mut self.variant {
            let next = ButtonFace::from_settings(settings);
            if *face != next {
                *face = next;
                *last_key = None;
            }
        }

        let source = image_source(settings);
        if source == self.instance.image_source {
            return false;
        }
        self.instance.image_source = source;
        self.epoch = epoch;
        true
    }

    /// Resolve an input event to the command it triggers. `Ok(None)` means
    /// the event is deliberately ignored.
    pub fn reaction(&self, event: &InputEvent) -> Result<Option<Reaction>, BridgeError> {
        let (trigger, payload) = match *event {
            InputEvent::Release => return Ok(None),
            InputEvent::DialRotate { ticks: 0 } => return Ok(None),
            InputEvent::Press => (Trigger::Press, None),
            InputEvent::TouchTap | InputEvent::DialPress => (Trigger::TouchTap, None),
            InputEvent::DialRotate { ticks } => {
                let trigger = if ticks > 0 { Trigger::RotateUp } else { Trigger::RotateDown };
                (trigger, Some(CommandPayload::with_value(i64::from(ticks.unsigned_abs()))))
            }
        };

        let action = self.instance.bound_actions.get(&trigger).ok_or_else(|| {
            BridgeError::ConfigurationMissing(format!("no command bound to {} on {}", trigger, self.instance.id))
        })?;

        let follow_up = match self.instance.kind {
            WidgetKind::Button => FollowUp::RefreshPresentation,
            WidgetKind::Dial => FollowUp::RefetchImage,
        };

        Ok(Some(Reaction { action: action.clone(), payload, follow_up }))
    }

    /// Recompute a button's icon. Only returns a key when it differs from
    /// the last one returned; dials always return `None`.
    pub fn present(&mut self, snapshot: &StateSnapshot) -> Option<ImageKey> {
        match &mut self.variant {
            Variant::Button { face, last_key } => {
                let key = face.compute_presentation(snapshot);
                if last_key.as_ref() == Some(&key) {
                    return None;
                }
                *last_key = Some(key.clone());
                Some(key)
            }
            Variant::Dial => None,
        }
    }

    /// Forget the last emitted key so the next `present` always emits.
    pub fn invalidate_presentation(&mut self) {
        if let Variant::Button { last_key, .. } = &mut self.variant {
            *last_key = None;
        }
    }

    pub fn fetch_ticket(&self) -> Option<FetchTicket> {
        self.image_source().map(|source| FetchTicket { source: source.to_string(), epoch: self.epoch })
    }

    /// True only if the ticket still matches the configured source.
    pub fn accepts(&self, ticket: &FetchTicket) -> bool {
        ticket.epoch == self.epoch && self.image_source() == Some(ticket.source.as_str())
    }

    pub fn fetch_in_flight(&self) -> bool {
        self.in_flight > 0
    }

    pub fn begin_fetch(&mut self) {
        self.in_flight += 1;
    }

    /// Settle a fetch begun by this controller. Tickets issued before it
    /// was created belong to a replaced controller and leave the count alone.
    pub fn finish_fetch(&mut self, ticket: &FetchTicket) {
        if ticket.epoch < self.born {
            return;
        }
        self.in_flight = self.in_flight.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(json: &str) -> WidgetSettings {
        serde_json::from_str(json).unwrap()
    }

    fn dial() -> WidgetController {
        let s = settings(r#"{"actions": {"rotateUp": "volumeUp", "rotateDown": "volumeDown", "touchTap": "toggleMute"},
                             "imageSource": "img://a"}"#);
        WidgetController::new("D1".into(), WidgetKind::Dial, &s, 1)
    }

    #[test]
    fn settings_parse_from_host_json() {
        let s = settings(r#"{"face": "like", "actions": {"press": "toggleLike"}, "imageSource": " "}"#);
        assert_eq!(s.face, FaceName::Like);
        assert_eq!(s.actions.get(&Trigger::Press).map(String::as_str), Some("toggleLike"));

        let w = WidgetInstance::new("B1".into(), WidgetKind::Button, &s);
        assert_eq!(w.image_source, None);
        assert_eq!(settings("{}"), WidgetSettings::default());
    }

    #[test]
    fn faces_map_snapshot_to_keys() {
        let snap = StateSnapshot::new(true, false, true, false);
        let key = |face: ButtonFace| face.compute_presentation(&snap).as_str().to_string();
        assert_eq!(key(ButtonFace::PlayPause), "pause");
        assert_eq!(key(ButtonFace::Like), "like");
        assert_eq!(key(ButtonFace::Shuffle), "shuffleOn");
        assert_eq!(key(ButtonFace::Mute), "unmuted");
        assert_eq!(key(ButtonFace::Static(ImageKey::new("logo"))), "logo");

        let s = settings(r#"{"face": "static"}"#);
        assert_eq!(ButtonFace::from_settings(&s), ButtonFace::Static(ImageKey::new(DEFAULT_STATIC_KEY)));
    }

    #[test]
    fn button_only_emits_on_change() {
        let s = settings(r#"{"face": "playPause", "actions": {"press": "togglePlay"}}"#);
        let mut b = WidgetController::new("B1".into(), WidgetKind::Button, &s, 1);
        let playing = StateSnapshot::new(true, false, false, false);

        assert_eq!(b.present(&playing), Some(ImageKey::new("pause")));
        assert_eq!(b.present(&playing), None);
        assert_eq!(b.present(&StateSnapshot::default()), Some(ImageKey::new("play")));

        b.invalidate_presentation();
        assert_eq!(b.present(&StateSnapshot::default()), Some(ImageKey::new("play")));
    }

    #[test]
    fn face_change_forces_next_emit() {
        let mut b = WidgetController::new("B1".into(), WidgetKind::Button, &settings(r#"{"face": "mute"}"#), 1);
        let snap = StateSnapshot::default();
        assert!(b.present(&snap).is_some());
        assert!(!b.apply_settings(&settings(r#"{"face": "like"}"#), 2));
        assert_eq!(b.present(&snap), Some(ImageKey::new("like")));
    }

    #[test]
    fn rotation_picks_direction_and_magnitude() {
        let d = dial();
        let up = d.reaction(&InputEvent::DialRotate { ticks: 3 }).unwrap().unwrap();
        assert_eq!(up.action, "volumeUp");
        assert_eq!(up.payload, Some(CommandPayload::with_value(3)));
        assert_eq!(up.follow_up, FollowUp::RefetchImage);

        let down = d.reaction(&InputEvent::DialRotate { ticks: -2 }).unwrap().unwrap();
        assert_eq!(down.action, "volumeDown");
        assert_eq!(down.payload.unwrap().value, Some(2));

        assert_eq!(d.reaction(&InputEvent::DialRotate { ticks: 0 }).unwrap(), None);
    }

    #[test]
    fn dial_press_acts_like_touch_tap() {
        let d = dial();
        let tap = d.reaction(&InputEvent::TouchTap).unwrap().unwrap();
        let press = d.reaction(&InputEvent::DialPress).unwrap().unwrap();
        assert_eq!(tap, press);
        assert_eq!(press.action, "toggleMute");
        assert_eq!(press.payload, None);
    }

    #[test]
    fn unbound_input_is_configuration_missing() {
        let b = WidgetController::new("B1".into(), WidgetKind::Button, &WidgetSettings::default(), 1);
        let err = b.reaction(&InputEvent::Press).unwrap_err();
        assert!(matches!(err, BridgeError::ConfigurationMissing(ref m) if m.contains("press")));
        assert_eq!(b.reaction(&InputEvent::Release).unwrap(), None);
    }

    #[test]
    fn source_change_invalidates_old_ticket() {
        let mut d = dial();
        let old = d.fetch_ticket().unwrap();
        assert!(d.accepts(&old));

        assert!(d.apply_settings(&settings(r#"{"imageSource": "img://b"}"#), 7));
        assert!(!d.accepts(&old));
        let new = d.fetch_ticket().unwrap();
        assert_eq!(new, FetchTicket { source: "img://b".into(), epoch: 7 });
        assert!(d.accepts(&new));

        // same source again keeps the current epoch
        assert!(!d.apply_settings(&settings(r#"{"imageSource": "img://b"}"#), 8));
        assert!(d.accepts(&new));
    }

    #[test]
    fn in_flight_counter_saturates() {
        let mut d = dial();
        let ticket = d.fetch_ticket().unwrap();
        d.finish_fetch(&ticket);
        assert!(!d.fetch_in_flight());
        d.begin_fetch();
        assert!(d.fetch_in_flight());
        d.finish_fetch(&ticket);
        assert!(!d.fetch_in_flight());
    }

    #[test]
    fn fetches_from_a_replaced_controller_do_not_settle_ours() {
        let s = settings(r#"{"imageSource": "img://b"}"#);
        let mut d = WidgetController::new("D1".into(), WidgetKind::Dial, &s, 5);
        d.begin_fetch();

        let earlier = FetchTicket { source: "img://a".into(), epoch: 4 };
        d.finish_fetch(&earlier);
        assert!(d.fetch_in_flight());

        // a source change keeps fetches begun before it counted
        d.begin_fetch();
        assert!(d.apply_settings(&settings(r#"{"imageSource": "img://c"}"#), 6));
        d.finish_fetch(&FetchTicket { source: "img://b".into(), epoch: 5 });
        d.finish_fetch(&FetchTicket { source: "img://b".into(), epoch: 5 });
        assert!(!d.fetch_in_flight());
    }
}
