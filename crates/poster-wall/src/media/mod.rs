//! Media-server access used by the server-resident probe, sampler and relay.

pub mod plex;
pub mod wire;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::item::Item;

pub use plex::PlexClient;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media server request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("media server answered {status} for {path}")]
    Status { status: u16, path: String },
    #[error("media server payload could not be decoded: {0}")]
    Decode(#[from] wire::DecodeError),
    #[error("media server JSON payload invalid: {0}")]
    Json(#[from] serde_json::Error),
}

/// A library section as enumerated by the media server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibrarySection {
    pub key: String,
    pub kind: String,
    pub title: String,
}

impl LibrarySection {
    /// Only movie and show sections feed the wall; music is always excluded.
    pub fn is_eligible(&self) -> bool {
        match self.kind.as_str() {
            "artist" | "music" => false,
            "movie" | "show" => true,
            _ => false,
        }
    }
}

/// One page of a library listing.
#[derive(Debug, Clone, Default)]
pub struct LibraryPage {
    pub items: Vec<Item>,
    /// Size of the whole section as reported upstream, 0 when unknown.
    pub total_size: u64,
}

/// Raw image bytes fetched on behalf of the relay.
#[derive(Debug, Clone)]
pub struct UpstreamImage {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Transport seam over the media server; tests substitute in-memory fakes.
#[async_trait]
pub trait MediaServer: Send + Sync {
    /// Raw body of the session-status listing, in whichever format the server chose.
    async fn session_status(&self) -> Result<String, MediaError>;

    async fn libraries(&self) -> Result<Vec<LibrarySection>, MediaError>;

    async fn library_page(
        &self,
        section: &LibrarySection,
        offset: u64,
        size: u64,
    ) -> Result<LibraryPage, MediaError>;

    /// Fetches an image by its upstream path (always starting with `/`).
    async fn image(&self, path: &str) -> Result<UpstreamImage, MediaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(kind: &str) -> LibrarySection {
        LibrarySection {
            key: "1".into(),
            kind: kind.into(),
            title: kind.into(),
        }
    }

    #[test]
    fn only_movie_and_show_sections_are_eligible() {
        assert!(section("movie").is_eligible());
        assert!(section("show").is_eligible());
        assert!(!section("artist").is_eligible());
        assert!(!section("photo").is_eligible());
    }
}
