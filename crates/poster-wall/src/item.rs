//! Poster-bearing media entities as they travel between the wall endpoint and the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    Movie,
    Show,
    Episode,
    Season,
    Collection,
    Placeholder,
    #[serde(other)]
    Other,
}

impl ItemKind {
    /// Maps an upstream `type` attribute onto the kinds the wall knows how to show.
    pub fn from_upstream(raw: &str) -> Self {
        match raw {
            "movie" => Self::Movie,
            "show" => Self::Show,
            "episode" => Self::Episode,
            "season" => Self::Season,
            "collection" => Self::Collection,
            "placeholder" => Self::Placeholder,
            _ => Self::Other,
        }
    }
}

/// Stable identity used for deduplication and the recently-seen window.
///
/// `ratingKey` wins when present; otherwise `title|year` stands in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey(String);

impl ItemKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wire shape shared by the wall endpoint and the engine.
///
/// Every field is best-effort: absent numbers decode as 0, absent strings as empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    #[serde(rename = "thumb")]
    pub thumb_ref: String,
    #[serde(rename = "art")]
    pub art_ref: String,
    pub year: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    #[serde(rename = "viewOffset")]
    pub view_offset_ms: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub show_title: String,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub season: u32,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub episode: u32,
    #[serde(rename = "show_thumb", skip_serializing_if = "String::is_empty")]
    pub show_thumb_ref: String,
    #[serde(rename = "ratingKey", skip_serializing_if = "String::is_empty")]
    pub rating_key: String,
    #[serde(rename = "addedAt")]
    pub added_at: i64,
}

fn is_zero_u32(value: &u32) -> bool {
    *value == 0
}

impl Item {
    /// Last-resort item shown when neither streams nor sampling produced anything.
    pub fn placeholder() -> Self {
        Self {
            title: "No content available".to_string(),
            kind: ItemKind::Placeholder,
            rating_key: "placeholder".to_string(),
            ..Self::default()
        }
    }

    pub fn key(&self) -> ItemKey {
        if self.rating_key.is_empty() {
            ItemKey(format!("{}|{}", self.title, self.year))
        } else {
            ItemKey(self.rating_key.clone())
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.kind == ItemKind::Placeholder
    }

    /// Poster reference, falling back to the show poster for episodes without their own.
    pub fn poster_ref(&self) -> Option<&str> {
        [self.thumb_ref.as_str(), self.show_thumb_ref.as_str()]
            .into_iter()
            .find(|r| !r.is_empty())
    }

    /// Reference for the ambient blurred background: art first, poster otherwise.
    pub fn background_ref(&self) -> Option<&str> {
        if self.art_ref.is_empty() {
            self.poster_ref()
        } else {
            Some(self.art_ref.as_str())
        }
    }

    /// Playback progress in `[0, 1]`, or `None` when the duration is unknown.
    pub fn progress(&self) -> Option<f32> {
        if self.duration_ms == 0 {
            return None;
        }
        Some((self.view_offset_ms as f64 / self.duration_ms as f64).clamp(0.0, 1.0) as f32)
    }

    /// Human label used in logs: `Show S02E05 · Title` for episodes.
    pub fn label(&self) -> String {
        if self.kind == ItemKind::Episode && !self.show_title.is_empty() {
            format!(
                "{} S{:02}E{:02} · {}",
                self.show_title, self.season, self.episode, self.title
            )
        } else if self.year > 0 {
            format!("{} ({})", self.title, self.year)
        } else {
            self.title.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_prefers_rating_key() {
        let mut item = Item {
            title: "Alien".into(),
            year: 1979,
            ..Item::default()
        };
        assert_eq!(item.key().as_str(), "Alien|1979");
        item.rating_key = "42".into();
        assert_eq!(item.key().as_str(), "42");
    }

    #[test]
    fn absent_wire_fields_default() {
        let item: Item = serde_json::from_str(r#"{"title":"Foo","type":"movie"}"#).unwrap();
        assert_eq!(item.title, "Foo");
        assert_eq!(item.kind, ItemKind::Movie);
        assert_eq!(item.year, 0);
        assert_eq!(item.duration_ms, 0);
        assert!(item.thumb_ref.is_empty());
        assert!(item.poster_ref().is_none());
    }

    #[test]
    fn unknown_kind_decodes_as_other() {
        let item: Item = serde_json::from_str(r#"{"title":"Clip","type":"clip"}"#).unwrap();
        assert_eq!(item.kind, ItemKind::Other);
    }

    #[test]
    fn episode_poster_falls_back_to_show() {
        let item = Item {
            kind: ItemKind::Episode,
            show_thumb_ref: "show".into(),
            ..Item::default()
        };
        assert_eq!(item.poster_ref(), Some("show"));
        assert_eq!(item.background_ref(), Some("show"));
    }

    #[test]
    fn progress_clamps() {
        let item = Item {
            duration_ms: 1000,
            view_offset_ms: 1500,
            ..Item::default()
        };
        assert_eq!(item.progress(), Some(1.0));
        assert_eq!(Item::default().progress(), None);
    }
}
