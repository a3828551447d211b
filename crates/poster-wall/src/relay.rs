//! Image relay: resolves opaque image references against the media server.
//!
//! References are URL-safe base64 of an absolute upstream path. Anything that
//! does not decode to such a path, or that the upstream cannot serve, is
//! answered with a 1x1 transparent GIF so the wall never shows a broken image.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

use crate::media::MediaServer;

/// 1x1 fully transparent GIF.
pub const PLACEHOLDER_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

pub const PLACEHOLDER_CONTENT_TYPE: &str = "image/gif";
pub const CACHE_ONE_HOUR: &str = "public, max-age=3600";
pub const CACHE_NONE: &str = "no-cache";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayRefError {
    #[error("image reference is empty")]
    Empty,
    #[error("image reference is not valid base64")]
    Encoding,
    #[error("image reference is not valid UTF-8")]
    Utf8,
    #[error("image reference must be an absolute upstream path")]
    NotAPath,
}

/// Encodes an upstream image path into an opaque reference; empty stays empty.
pub fn encode_ref(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    URL_SAFE_NO_PAD.encode(path.as_bytes())
}

pub fn decode_ref(encoded: &str) -> Result<String, RelayRefError> {
    let encoded = encoded.trim();
    if encoded.is_empty() {
        return Err(RelayRefError::Empty);
    }
    let raw = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|_| RelayRefError::Encoding)?;
    let path = String::from_utf8(raw).map_err(|_| RelayRefError::Utf8)?;
    if !path.starts_with('/') || path.starts_with("//") || path.contains("://") {
        return Err(RelayRefError::NotAPath);
    }
    Ok(path)
}

/// Relay URL for an opaque reference, as the wall client requests it.
pub fn image_url(base: &str, reference: &str) -> String {
    format!("{}/api/image?ref={reference}", base.trim_end_matches('/'))
}

/// Relay answer; always served with a success status.
#[derive(Debug, Clone)]
pub struct RelayedImage {
    pub bytes: Bytes,
    pub content_type: String,
    pub cache_control: &'static str,
}

impl RelayedImage {
    pub fn placeholder() -> Self {
        Self {
            bytes: Bytes::from_static(PLACEHOLDER_GIF),
            content_type: PLACEHOLDER_CONTENT_TYPE.to_string(),
            cache_control: CACHE_NONE,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.bytes.as_ref() == PLACEHOLDER_GIF
    }
}

#[derive(Clone)]
pub struct ImageRelay {
    server: Arc<dyn MediaServer>,
}

impl ImageRelay {
    pub fn new(server: Arc<dyn MediaServer>) -> Self {
        Self { server }
    }

    pub async fn fetch(&self, encoded: Option<&str>) -> RelayedImage {
        let path = match decode_ref(encoded.unwrap_or_default()) {
            Ok(path) => path,
            Err(err) => {
                debug!(error = %err, "relay serving placeholder");
                return RelayedImage::placeholder();
            }
        };

        match self.server.image(&path).await {
            Ok(upstream) if !upstream.bytes.is_empty() => {
                let content_type = upstream
                    .content_type
                    .filter(|ct| ct.starts_with("image/"))
                    .or_else(|| sniff_content_type(&upstream.bytes))
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                RelayedImage {
                    bytes: upstream.bytes,
                    content_type,
                    cache_control: CACHE_ONE_HOUR,
                }
            }
            Ok(_) => {
                warn!(%path, "upstream image empty; serving placeholder");
                RelayedImage::placeholder()
            }
            Err(err) => {
                warn!(%path, error = %err, "upstream image unavailable; serving placeholder");
                RelayedImage::placeholder()
            }
        }
    }
}

fn sniff_content_type(bytes: &[u8]) -> Option<String> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs_round_trip_paths() {
        let encoded = encode_ref("/library/metadata/1/thumb/2");
        assert!(!encoded.contains('/'));
        assert_eq!(decode_ref(&encoded).unwrap(), "/library/metadata/1/thumb/2");
    }

    #[test]
    fn refs_reject_foreign_hosts() {
        assert_eq!(
            decode_ref(&encode_ref("http://evil.example/x.png")),
            Err(RelayRefError::NotAPath)
        );
        assert_eq!(
            decode_ref(&encode_ref("//evil.example/x.png")),
            Err(RelayRefError::NotAPath)
        );
        assert_eq!(decode_ref(""), Err(RelayRefError::Empty));
        assert_eq!(decode_ref("***"), Err(RelayRefError::Encoding));
    }

    #[test]
    fn placeholder_is_a_gif() {
        let img = RelayedImage::placeholder();
        assert!(img.is_placeholder());
        assert_eq!(
            sniff_content_type(&img.bytes).as_deref(),
            Some(PLACEHOLDER_CONTENT_TYPE)
        );
    }
}
