/*
 *  host.rs
 *
 *  dialbridge - one poll, many widgets
 *  (c) 2020-26 Stuart Hunter
 *
 *  Host protocol: JSON lines in on stdin, JSON lines out on stdout
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

use anyhow::Context;
use log::{debug, info, warn};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::coordinator::{Credentials, DeckEvent, DeckHandle, GlobalSettings, PresentationUpdate};
use crate::deutils::deserialize_numeric_i32;
use crate::widget::{InputEvent, WidgetId, WidgetKind, WidgetSettings};

#[derive(Debug, Error)]
pub enum HostEventError {
    #[error("unreadable host event: {0}")]
    Json(#[from] serde_json::Error),
    #[error("refreshIntervalSeconds must be a positive number, got {0}")]
    InvalidInterval(f64),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalSettingsPayload {
    pub refresh_interval_seconds: Option<f64>,
    pub credentials: Option<String>,
}

impl GlobalSettingsPayload {
    /// Missing interval falls back to `default_interval`; blank credentials
    /// count as none.
    pub fn into_settings(self, default_interval: Duration) -> Result<GlobalSettings, HostEventError> {
        let refresh_interval = match self.refresh_interval_seconds {
            None => default_interval,
            Some(secs) => Duration::try_from_secs_f64(secs)
                .ok()
                .filter(|d| !d.is_zero())
                .ok_or(HostEventError::InvalidInterval(secs))?,
        };
        let credentials = self
            .credentials
            .filter(|c| !c.trim().is_empty())
            .map(Credentials::new);
        Ok(GlobalSettings { refresh_interval, credentials })
    }
}

/// One line from the host.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostEvent {
    WillAppear {
        context: WidgetId,
        kind: WidgetKind,
        #[serde(default)]
        settings: WidgetSettings,
    },
    WillDisappear { context: WidgetId },
    DidReceiveSettings {
        context: WidgetId,
        #[serde(default)]
        settings: WidgetSettings,
    },
    DidReceiveGlobalSettings {
        #[serde(default)]
        settings: GlobalSettingsPayload,
    },
    KeyDown { context: WidgetId },
    KeyUp { context: WidgetId },
    TouchTap { context: WidgetId },
    DialRotate {
        context: WidgetId,
        #[serde(deserialize_with = "deserialize_numeric_i32")]
        ticks: i32,
    },
    DialDown { context: WidgetId },
}

impl HostEvent {
    pub fn into_deck_event(self, default_interval: Duration) -> Result<DeckEvent, HostEventError> {
        let input = |id: WidgetId, event: InputEvent| DeckEvent::Input { id, event };
        let event = match self {
            HostEvent::WillAppear { context, kind, settings } => {
                DeckEvent::WidgetAppeared { id: context, kind, settings }
            }
            HostEvent::WillDisappear { context } => DeckEvent::WidgetDisappeared { id: context },
            HostEvent::DidReceiveSettings { context, settings } => {
                DeckEvent::WidgetSettingsChanged { id: context, settings }
            }
            HostEvent::DidReceiveGlobalSettings { settings } => {
                DeckEvent::GlobalSettingsChanged(settings.into_settings(default_interval)?)
            }
            HostEvent::KeyDown { context } => input(context, InputEvent::Press),
            HostEvent::KeyUp { context } => input(context, InputEvent::Release),
            HostEvent::TouchTap { context } => input(context, InputEvent::TouchTap),
            HostEvent::DialRotate { context, ticks } => input(context, InputEvent::DialRotate { ticks }),
            HostEvent::DialDown { context } => input(context, InputEvent::DialPress),
        };
        Ok(event)
    }
}

/// Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str, default_interval: Duration) -> Result<Option<DeckEvent>, HostEventError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let event: HostEvent = serde_json::from_str(line)?;
    event.into_deck_event(default_interval).map(Some)
}

async fn write_update<W: AsyncWrite + Unpin>(output: &mut W, update: &PresentationUpdate) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(update).context("encoding presentation update")?;
    line.push('\n');
    output.write_all(line.as_bytes()).await.context("writing to host")?;
    output.flush().await.context("flushing host output")?;
    debug!("host <- {} for {}", update_kind(update), update.context());
    Ok(())
}

fn update_kind(update: &PresentationUpdate) -> &'static str {
    match update {
        PresentationUpdate::SetImageKey { .. } => "setImageKey",
        PresentationUpdate::SetImage { .. } => "setImage",
    }
}

/// Pump host events into the coordinator and presentation updates back out
/// until `input` hits EOF. Bad lines are logged and skipped. On EOF the
/// handle is dropped and remaining updates are flushed before returning.
pub async fn run_lines<R, W>(
    input: R,
    mut output: W,
    handle: DeckHandle,
    mut updates: mpsc::UnboundedReceiver<PresentationUpdate>,
    default_interval: Duration,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading from host")? else {
                    info!("host closed its input");
                    break;
                };
                match parse_line(&line, default_interval) {
                    Ok(Some(event)) => {
                        if handle.send(event).await.is_err() {
                            warn!("coordinator stopped, dropping host input");
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("{}: {}", e, line.trim()),
                }
            }
            Some(update) = updates.recv() => write_update(&mut output, &update).await?,
        }
    }

    drop(handle);
    while let Some(update) = updates.recv().await {
        write_update(&mut output, &update).await?;
    }
    Ok(())
}

pub async fn run_stdio(
    handle: DeckHandle,
    updates: mpsc::UnboundedReceiver<PresentationUpdate>,
    default_interval: Duration,
) -> anyhow::Result<()> {
    run_lines(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), handle, updates, default_interval).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artwork::ImageFetchPipeline;
    use crate::coordinator::{Coordinator, DEFAULT_PLACEHOLDER};
    use crate::mock::{MockBridge, MockImageTransport};
    use crate::states::StateSnapshot;
    use crate::widget::{ImageKey, Trigger};

    const FIVE: Duration = Duration::from_secs(5);

    #[test]
    fn parses_widget_lifecycle() {
        let line = r#"{"event":"willAppear","context":"D1","kind":"dial",
                       "settings":{"actions":{"rotateUp":"volumeUp"},"imageSource":"img://a"}}"#
            .replace('\n', " ");
        match parse_line(&line, FIVE).unwrap().unwrap() {
            DeckEvent::WidgetAppeared { id, kind, settings } => {
                assert_eq!(id.as_str(), "D1");
                assert_eq!(kind, WidgetKind::Dial);
                assert_eq!(settings.actions[&Trigger::RotateUp], "volumeUp");
            }
            other => panic!("unexpected {other:?}"),
        }

        let gone = parse_line(r#"{"event":"willDisappear","context":"D1"}"#, FIVE).unwrap();
        assert!(matches!(gone, Some(DeckEvent::WidgetDisappeared { .. })));
        assert!(parse_line("   ", FIVE).unwrap().is_none());
    }

    #[test]
    fn parses_inputs() {
        let rotate = parse_line(r#"{"event":"dialRotate","context":"D1","ticks":"-2"}"#, FIVE).unwrap();
        assert!(matches!(rotate, Some(DeckEvent::Input { event: InputEvent::DialRotate { ticks: -2 }, .. })));

        let down = parse_line(r#"{"event":"dialDown","context":"D1"}"#, FIVE).unwrap();
        assert!(matches!(down, Some(DeckEvent::Input { event: InputEvent::DialPress, .. })));

        let up = parse_line(r#"{"event":"keyUp","context":"B1"}"#, FIVE).unwrap();
        assert!(matches!(up, Some(DeckEvent::Input { event: InputEvent::Release, .. })));

        assert!(parse_line(r#"{"event":"explode","context":"B1"}"#, FIVE).is_err());
    }

    #[test]
    fn global_settings_validate_interval() {
        let ok = parse_line(
            r#"{"event":"didReceiveGlobalSettings","settings":{"refreshIntervalSeconds":2.5,"credentials":"tok"}}"#,
            FIVE,
        )
        .unwrap();
        match ok {
            Some(DeckEvent::GlobalSettingsChanged(s)) => {
                assert_eq!(s.refresh_interval, Duration::from_millis(2500));
                assert_eq!(s.credentials.as_ref().map(Credentials::expose), Some("tok"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let defaulted = GlobalSettingsPayload { credentials: Some("  ".into()), ..Default::default() };
        let s = defaulted.into_settings(FIVE).unwrap();
        assert_eq!(s.refresh_interval, FIVE);
        assert!(s.credentials.is_none());

        for bad in [0.0, -1.0, f64::NAN] {
            let p = GlobalSettingsPayload { refresh_interval_seconds: Some(bad), credentials: None };
            assert!(matches!(p.into_settings(FIVE), Err(HostEventError::InvalidInterval(_))));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stdio_session_round_trip() {
        let bridge = MockBridge::new();
        bridge.set_snapshot(StateSnapshot::new(false, true, false, false));
        let (handle, updates, join) = Coordinator::spawn(
            bridge.clone(),
            ImageFetchPipeline::new(MockImageTransport::new(), 3),
            GlobalSettings::default(),
            ImageKey::new(DEFAULT_PLACEHOLDER),
        );

        let input = concat!(
            "{\"event\":\"didReceiveGlobalSettings\",\"settings\":{\"credentials\":\"tok\"}}\n",
            "not json\n",
            "{\"event\":\"willAppear\",\"context\":\"B1\",\"kind\":\"button\",\"settings\":{\"face\":\"like\"}}\n",
        );
        let mut output = Vec::new();
        run_lines(input.as_bytes(), &mut output, handle, updates, FIVE).await.unwrap();
        join.await.unwrap();

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines, vec![serde_json::json!({"event": "setImageKey", "context": "B1", "key": "liked"})]);
    }
}
