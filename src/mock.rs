/*
 *  mock.rs
 *
 *  dialbridge - one poll, many widgets
 *  (c) 2020-26 Stuart Hunter
 *
 *  In-memory bridge and image transport for running without a bridge process
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

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::error::{BridgeError, TransportFault};
use crate::states::StateSnapshot;
use crate::traits::{Bridge, CommandPayload, ImageTransport, RawImage};

/// Mock bridge
///
/// Serves a scripted snapshot and records every command it is sent.
/// Clones share state, so a test keeps one clone for inspection and hands
/// the other to the coordinator.
#[derive(Debug, Clone, Default)]
pub struct MockBridge {
    state: Arc<Mutex<MockBridgeState>>,
    snapshot_gate: Arc<Notify>,
}

/// Internal state for the mock bridge (shared for inspection in tests)
#[derive(Debug, Default)]
pub struct MockBridgeState {
    /// Snapshot returned by the next read
    pub snapshot: StateSnapshot,

    /// Number of snapshot reads started
    pub snapshot_requests: usize,

    /// Every command received, in order
    pub dispatched: Vec<(String, CommandPayload)>,

    pub fail_commands: bool,
    pub fail_snapshots: bool,

    /// Snapshot reads park until `release_snapshots`
    pub hang_snapshots: bool,
}

impl MockBridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockBridgeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_snapshot(&self, snapshot: StateSnapshot) {
        self.lock().snapshot = snapshot;
    }

    pub fn fail_commands(&self, fail: bool) {
        self.lock().fail_commands = fail;
    }

    pub fn fail_snapshots(&self, fail: bool) {
        self.lock().fail_snapshots = fail;
    }

    pub fn hang_snapshots(&self, hang: bool) {
        self.lock().hang_snapshots = hang;
    }

    /// Stop hanging and let every parked snapshot read finish.
    pub fn release_snapshots(&self) {
        self.lock().hang_snapshots = false;
        self.snapshot_gate.notify_waiters();
    }

    pub fn snapshot_requests(&self) -> usize {
        self.lock().snapshot_requests
    }

    pub fn dispatched(&self) -> Vec<(String, CommandPayload)> {
        self.lock().dispatched.clone()
    }
}

impl Bridge for MockBridge {
    async fn dispatch_command(&self, action: &str, payload: Option<CommandPayload>) -> Result<String, BridgeError> {
        let mut state = self.lock();
        state.dispatched.push((action.to_string(), payload.unwrap_or_default()));
        if state.fail_commands {
            return Err(BridgeError::Transport("mock bridge refused the command".into()));
        }
        Ok(r#"{"status":"success"}"#.to_string())
    }

    async fn fetch_state_snapshot(&self) -> Result<StateSnapshot, BridgeError> {
        let hang = {
            let mut state = self.lock();
            state.snapshot_requests += 1;
            state.hang_snapshots
        };
        if hang {
            self.snapshot_gate.notified().await;
        }

        let state = self.lock();
        if state.fail_snapshots {
            return Err(BridgeError::Unavailable { status: 503, body: "mock bridge unavailable".into() });
        }
        Ok(state.snapshot.clone())
    }
}

/// Scripted answer for one image source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockImage {
    Ok { content_type: String, body: Vec<u8> },
    Status(u16),
    /// Transport fault on every attempt
    Fail,
}

impl MockImage {
    pub fn ok(content_type: &str, body: &[u8]) -> Self {
        MockImage::Ok { content_type: content_type.to_string(), body: body.to_vec() }
    }
}

#[derive(Debug, Default)]
pub struct MockImageState {
    /// Every GET in the order it was issued
    pub requests: Vec<String>,
    pub responses: HashMap<String, MockImage>,
    held: HashMap<String, Arc<Notify>>,
}

/// Mock image transport
///
/// Unscripted sources answer 200 with `image/png` and the source string as
/// the body, so each source encodes to a distinct data URI.
#[derive(Debug, Clone, Default)]
pub struct MockImageTransport {
    state: Arc<Mutex<MockImageState>>,
}

impl MockImageTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockImageState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn respond(&self, source: &str, image: MockImage) {
        self.lock().responses.insert(source.to_string(), image);
    }

    /// Park GETs for `source` until `release` is called for it.
    pub fn hold(&self, source: &str) {
        self.lock().held.entry(source.to_string()).or_default();
    }

    pub fn release(&self, source: &str) {
        if let Some(gate) = self.lock().held.remove(source) {
            gate.notify_waiters();
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    pub fn requests_for(&self, source: &str) -> usize {
        self.lock().requests.iter().filter(|r| *r == source).count()
    }

    pub fn total_requests(&self) -> usize {
        self.lock().requests.len()
    }
}

impl ImageTransport for MockImageTransport {
    async fn get(&self, source: &str) -> Result<RawImage, TransportFault> {
        let gate = {
            let mut state = self.lock();
            state.requests.push(source.to_string());
            state.held.get(source).cloned()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let scripted = self.lock().responses.get(source).cloned();
        match scripted {
            Some(MockImage::Ok { content_type, body }) => Ok(RawImage {
                status: 200,
                content_type: Some(content_type),
                body,
            }),
            Some(MockImage::Status(status)) => Ok(RawImage { status, content_type: None, body: Vec::new() }),
            Some(MockImage::Fail) => Err(TransportFault(format!("{}: connection refused", source))),
            None => Ok(RawImage {
                status: 200,
                content_type: Some("image/png".to_string()),
                body: source.as_bytes().to_vec(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn bridge_records_commands() {
        let bridge = MockBridge::new();
        bridge.dispatch_command("volumeUp", Some(CommandPayload::with_value(2))).await.unwrap();
        bridge.fail_commands(true);
        assert!(bridge.dispatch_command("togglePlay", None).await.is_err());

        let sent = bridge.dispatched();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "volumeUp");
        assert_eq!(sent[0].1.value, Some(2));
    }

    #[tokio::test]
    async fn held_source_waits_for_release() {
        let transport = MockImageTransport::new();
        transport.hold("img://x");

        let t = transport.clone();
        let pending = tokio::spawn(async move { t.get("img://x").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!pending.is_finished());
        assert_eq!(transport.requests_for("img://x"), 1);

        transport.release("img://x");
        let raw = pending.await.unwrap().unwrap();
        assert_eq!(raw.body, b"img://x");
    }

    #[tokio::test]
    async fn hung_snapshot_resumes_on_release() {
        let bridge = MockBridge::new();
        bridge.set_snapshot(StateSnapshot::new(true, false, false, false));
        bridge.hang_snapshots(true);

        let b = bridge.clone();
        let pending = tokio::spawn(async move { b.fetch_state_snapshot().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!pending.is_finished());

        bridge.release_snapshots();
        assert!(pending.await.unwrap().unwrap().is_playing);
        assert_eq!(bridge.snapshot_requests(), 1);
    }
}
