use std::sync::Arc;

use tracing::{debug, warn};

use crate::item::Item;
use crate::media::MediaServer;
use crate::media::wire::SessionPayload;

/// Reports what the media server is currently playing.
///
/// Never fails: transport and decode problems degrade to "nothing playing".
#[derive(Clone)]
pub struct StreamProbe {
    server: Arc<dyn MediaServer>,
}

impl StreamProbe {
    pub fn new(server: Arc<dyn MediaServer>) -> Self {
        Self { server }
    }

    pub async fn active_streams(&self) -> Vec<Item> {
        let body = match self.server.session_status().await {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "session status unavailable; treating as idle");
                return Vec::new();
            }
        };
        match SessionPayload::decode(&body) {
            Ok(payload) => {
                let items = payload.into_items();
                debug!(streams = items.len(), "session status probed");
                items
            }
            Err(err) => {
                warn!(error = %err, "session status undecodable; treating as idle");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{LibraryPage, LibrarySection, MediaError, UpstreamImage};
    use async_trait::async_trait;

    struct Sessions(Result<&'static str, u16>);

    #[async_trait]
    impl MediaServer for Sessions {
        async fn session_status(&self) -> Result<String, MediaError> {
            self.0.map(str::to_string).map_err(|status| MediaError::Status {
                status,
                path: "/status/sessions".into(),
            })
        }

        async fn libraries(&self) -> Result<Vec<LibrarySection>, MediaError> {
            Ok(Vec::new())
        }

        async fn library_page(
            &self,
            _section: &LibrarySection,
            _offset: u64,
            _size: u64,
        ) -> Result<LibraryPage, MediaError> {
            Ok(LibraryPage::default())
        }

        async fn image(&self, path: &str) -> Result<UpstreamImage, MediaError> {
            Err(MediaError::Status {
                status: 404,
                path: path.to_string(),
            })
        }
    }

    fn probe(body: Result<&'static str, u16>) -> StreamProbe {
        StreamProbe::new(Arc::new(Sessions(body)))
    }

    #[tokio::test]
    async fn single_movie_session() {
        let streams = probe(Ok(
            r#"{"MediaContainer":{"Metadata":[{"title":"Foo","type":"movie","ratingKey":"1"}]}}"#,
        ))
        .active_streams()
        .await;
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].title, "Foo");
    }

    #[tokio::test]
    async fn upstream_errors_degrade_to_empty() {
        assert!(probe(Err(503)).active_streams().await.is_empty());
        assert!(probe(Ok("<<<garbage")).active_streams().await.is_empty());
    }
}
