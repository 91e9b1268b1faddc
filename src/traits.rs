/*
 *  traits.rs
 *
 *  dialbridge - one poll, many widgets
 *  (c) 2020-26 Stuart Hunter
 *
 *  Seams between the coordinator and the network
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

use std::future::Future;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{BridgeError, TransportFault};
use crate::states::StateSnapshot;

/// Extra data sent along with a command.
///
/// `value` carries the magnitude for dial rotations; anything in `extra`
/// is flattened into the request body next to `action`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CommandPayload {
    pub fn with_value(value: i64) -> Self {
        CommandPayload { value: Some(value), extra: Map::new() }
    }
}

/// Everything the coordinator needs from the bridge process.
///
/// Implemented over HTTP by [`BridgeClient`](crate::httprpc::BridgeClient)
/// and in memory by [`MockBridge`](crate::mock::MockBridge).
pub trait Bridge: Send + Sync + 'static {
    /// Send one command. Resolves with the raw response body on a 2xx,
    /// which callers log but never parse.
    fn dispatch_command(
        &self,
        action: &str,
        payload: Option<CommandPayload>,
    ) -> impl Future<Output = Result<String, BridgeError>> + Send;

    /// Read the bridge's cached player state.
    fn fetch_state_snapshot(&self) -> impl Future<Output = Result<StateSnapshot, BridgeError>> + Send;
}

/// A fully buffered HTTP response for an image source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// One GET against an image source, no retry and no status policy.
pub trait ImageTransport: Send + Sync + 'static {
    fn get(&self, source: &str) -> impl Future<Output = Result<RawImage, TransportFault>> + Send;
}
