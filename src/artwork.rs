/*
 *  artwork.rs
 *
 *  dialbridge - one poll, many widgets
 *  (c) 2020-26 Stuart Hunter
 *
 *  Image fetch with bounded retry, encoded for the host as a data URI
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

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, warn};
use reqwest::{Client, header};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::error::{ImageFetchError, TransportFault};
use crate::traits::{ImageTransport, RawImage};

pub const DEFAULT_RETRIES: u32 = 3;
pub const IMAGE_TIMEOUT: Duration = Duration::from_secs(5);
const FALLBACK_MEDIA_TYPE: &str = "image/png";

/// `data:<media type>;base64,<payload>`, ready for the host's set-image call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DataUri(String);

impl DataUri {
    pub fn from_bytes(media_type: &str, bytes: &[u8]) -> Self {
        DataUri(format!("data:{};base64,{}", media_type, STANDARD.encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // payloads run to kilobytes, keep log lines readable
        let head: String = self.0.chars().take(40).collect();
        write!(f, "{}... ({} bytes)", head, self.0.len())
    }
}

/// Pick the media type from a `Content-Type` header, ignoring parameters and
/// anything that is not an image.
fn media_type(content_type: Option<&str>) -> &str {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(str::trim)
        .filter(|mt| mt.starts_with("image/") && mt.len() > "image/".len())
        .unwrap_or(FALLBACK_MEDIA_TYPE)
}

/// Fetches one image per call. Transport faults are retried immediately,
/// status errors are not.
#[derive(Debug, Clone)]
pub struct ImageFetchPipeline<T> {
    transport: T,
    retries: u32,
}

impl<T: ImageTransport> ImageFetchPipeline<T> {
    pub fn new(transport: T, retries: u32) -> Self {
        ImageFetchPipeline { transport, retries }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn fetch(&self, source: &str) -> Result<DataUri, ImageFetchError> {
        self.fetch_with_retries(source, self.retries).await
    }

    /// At most `retries_remaining + 1` GETs against `source`.
    pub async fn fetch_with_retries(&self, source: &str, retries_remaining: u32) -> Result<DataUri, ImageFetchError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(ImageFetchError::NoSource);
        }

        let mut remaining = retries_remaining;
        let mut attempts = 0u32;
        let raw = loop {
            attempts += 1;
            match self.transport.get(source).await {
                Ok(raw) => break raw,
                Err(TransportFault(message)) => {
                    if remaining == 0 {
                        warn!("image {} failed after {} attempts: {}", source, attempts, message);
                        return Err(ImageFetchError::Exhausted { attempts, message });
                    }
                    remaining -= 1;
                    debug!("image {} attempt {} failed ({}), {} retries left", source, attempts, message, remaining);
                }
            }
        };

        encode(source, raw)
    }
}

fn encode(source: &str, raw: RawImage) -> Result<DataUri, ImageFetchError> {
    if !(200..300).contains(&raw.status) {
        warn!("image {} answered HTTP {}", source, raw.status);
        return Err(ImageFetchError::Status(raw.status));
    }
    if raw.body.is_empty() {
        return Err(ImageFetchError::EmptyBody);
    }
    let uri = DataUri::from_bytes(media_type(raw.content_type.as_deref()), &raw.body);
    debug!("image {} -> {}", source, uri);
    Ok(uri)
}

/// reqwest-backed transport with a fixed per-attempt timeout.
#[derive(Debug, Clone)]
pub struct HttpImageTransport {
    client: Client,
}

impl HttpImageTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(HttpImageTransport { client })
    }
}

impl ImageTransport for HttpImageTransport {
    async fn get(&self, source: &str) -> Result<RawImage, TransportFault> {
        let response = self.client
            .get(source)
            .send()
            .await
            .map_err(|e| TransportFault(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportFault(e.to_string()))?
            .to_vec();

        Ok(RawImage { status, content_type, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockImage, MockImageTransport};

    #[test]
    fn media_type_prefers_image_content_type() {
        assert_eq!(media_type(Some("image/jpeg")), "image/jpeg");
        assert_eq!(media_type(Some("image/webp; charset=binary")), "image/webp");
        assert_eq!(media_type(Some("text/html")), "image/png");
        assert_eq!(media_type(Some("image/")), "image/png");
        assert_eq!(media_type(None), "image/png");
    }

    #[test]
    fn data_uri_encodes_body() {
        let uri = DataUri::from_bytes("image/png", b"abc");
        assert_eq!(uri.as_str(), "data:image/png;base64,YWJj");
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let transport = MockImageTransport::new();
        transport.respond("img://a", MockImage::ok("image/jpeg", b"jpeg-bytes"));
        let pipeline = ImageFetchPipeline::new(transport.clone(), DEFAULT_RETRIES);

        let uri = pipeline.fetch("img://a").await.unwrap();
        assert!(uri.as_str().starts_with("data:image/jpeg;base64,"));
        assert_eq!(transport.requests_for("img://a"), 1);
    }

    #[tokio::test]
    async fn transport_faults_are_retried_then_exhausted() {
        let transport = MockImageTransport::new();
        transport.respond("img://down", MockImage::Fail);
        let pipeline = ImageFetchPipeline::new(transport.clone(), 3);

        let err = pipeline.fetch("img://down").await.unwrap_err();
        assert!(matches!(err, ImageFetchError::Exhausted { attempts: 4, .. }));
        assert_eq!(transport.requests_for("img://down"), 4);
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let transport = MockImageTransport::new();
        transport.respond("img://down", MockImage::Fail);
        let pipeline = ImageFetchPipeline::new(transport.clone(), 3);

        let err = pipeline.fetch_with_retries("img://down", 0).await.unwrap_err();
        assert!(matches!(err, ImageFetchError::Exhausted { attempts: 1, .. }));
        assert_eq!(transport.requests_for("img://down"), 1);
    }

    #[tokio::test]
    async fn status_errors_are_not_retried() {
        let transport = MockImageTransport::new();
        transport.respond("img://gone", MockImage::Status(404));
        let pipeline = ImageFetchPipeline::new(transport.clone(), 3);

        assert_eq!(pipeline.fetch("img://gone").await, Err(ImageFetchError::Status(404)));
        assert_eq!(transport.requests_for("img://gone"), 1);
    }

    #[tokio::test]
    async fn empty_body_and_blank_source_fail() {
        let transport = MockImageTransport::new();
        transport.respond("img://empty", MockImage::ok("image/png", b""));
        let pipeline = ImageFetchPipeline::new(transport.clone(), 3);

        assert_eq!(pipeline.fetch("img://empty").await, Err(ImageFetchError::EmptyBody));
        assert_eq!(pipeline.fetch("   ").await, Err(ImageFetchError::NoSource));
        assert_eq!(transport.total_requests(), 1);
    }
}
