/*
 *  error.rs
 *
 *  dialbridge - one poll, many widgets
 *  (c) 2020-26 Stuart Hunter
 *
 *  Error types shared by the bridge client, image pipeline and coordinator
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

use thiserror::Error;

/// Failures talking to the local bridge process.
///
/// None of these are fatal: reads treat them as "no update this cycle",
/// command dispatch surfaces them to the triggering widget which logs and
/// leaves its presentation alone.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Network failure or timeout, the bridge never answered.
    #[error("bridge transport error: {0}")]
    Transport(String),

    /// Bridge answered but with a non-success status.
    #[error("bridge unavailable: HTTP {status}")]
    Unavailable { status: u16, body: String },

    /// Bridge answered 2xx but the body was not what we expected.
    #[error("bridge response malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Nothing to send: no credentials or no command bound to the input.
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),
}

impl BridgeError {
    /// Transport failures may clear up on their own; everything else needs
    /// the bridge or the user to change something first.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Transport(_))
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => BridgeError::Unavailable {
                status: status.as_u16(),
                body: String::new(),
            },
            None => BridgeError::Transport(err.to_string()),
        }
    }
}

/// Raw transport failure from an [`ImageTransport`](crate::traits::ImageTransport).
/// Always eligible for retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportFault(pub String);

/// Terminal outcome of the image fetch pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageFetchError {
    #[error("no image source configured")]
    NoSource,

    #[error("image fetch gave up after {attempts} attempts: {message}")]
    Exhausted { attempts: u32, message: String },

    #[error("image source answered HTTP {0}")]
    Status(u16),

    #[error("image source returned an empty body")]
    EmptyBody,
}

/// The coordinator's event loop has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("coordinator has shut down")]
pub struct DeckClosed;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_is_the_only_transient_bridge_error() {
        assert!(BridgeError::Transport("refused".into()).is_transient());
        assert!(!BridgeError::Unavailable { status: 503, body: String::new() }.is_transient());
        assert!(!BridgeError::ConfigurationMissing("credentials".into()).is_transient());
    }

    #[test]
    fn exhausted_message_names_attempts() {
        let err = ImageFetchError::Exhausted { attempts: 4, message: "connection refused".into() };
        assert_eq!(err.to_string(), "image fetch gave up after 4 attempts: connection refused");
    }
}
