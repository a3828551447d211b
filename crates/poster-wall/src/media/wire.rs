//! Media-server wire formats.
//!
//! Session status arrives either as JSON (`{"MediaContainer": {"Metadata": [...]}}`)
//! or as the tag-based XML rendition of the same container. Both decode into
//! [`WireMetadata`] and are normalized by [`WireMetadata::into_item`] before any
//! other code sees them.

use std::fmt;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::Deserialize;
use serde::de::{self, Deserializer, Visitor};
use thiserror::Error;

use crate::item::{Item, ItemKind};
use crate::relay::encode_ref;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is neither JSON ({json}) nor XML ({xml})")]
    Unrecognized { json: String, xml: String },
}

/// The two session formats the media server may answer with.
#[derive(Debug)]
pub enum SessionPayload {
    Json(JsonEnvelope),
    Xml(Vec<WireMetadata>),
}

impl SessionPayload {
    /// Attempts JSON first and only falls back to the tag-based format when that fails.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        let json_err = match serde_json::from_str::<JsonEnvelope>(body) {
            Ok(envelope) => return Ok(Self::Json(envelope)),
            Err(err) => err,
        };
        match decode_xml_container(body) {
            Ok(entries) => Ok(Self::Xml(entries)),
            Err(xml_err) => Err(DecodeError::Unrecognized {
                json: json_err.to_string(),
                xml: xml_err,
            }),
        }
    }

    pub fn into_metadata(self) -> Vec<WireMetadata> {
        match self {
            Self::Json(envelope) => envelope.container.metadata,
            Self::Xml(entries) => entries,
        }
    }

    /// Normalized, display-eligible items in server order.
    pub fn into_items(self) -> Vec<Item> {
        self.into_metadata()
            .into_iter()
            .filter_map(WireMetadata::into_item)
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct JsonEnvelope {
    #[serde(rename = "MediaContainer")]
    pub container: JsonContainer,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct JsonContainer {
    #[serde(rename = "totalSize", deserialize_with = "lenient_u64")]
    pub total_size: u64,
    #[serde(rename = "Metadata")]
    pub metadata: Vec<WireMetadata>,
    #[serde(rename = "Directory")]
    pub directories: Vec<WireDirectory>,
}

/// Library section entry from `/library/sections`.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct WireDirectory {
    #[serde(deserialize_with = "lenient_string")]
    pub key: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct WireUser {
    pub title: String,
}

/// One metadata entry before normalization; every field is optional upstream.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WireMetadata {
    #[serde(deserialize_with = "lenient_string")]
    pub rating_key: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub thumb: String,
    pub art: String,
    pub summary: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub year: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub duration: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub view_offset: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub added_at: u64,
    pub grandparent_title: String,
    pub grandparent_thumb: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub parent_index: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub index: u64,
    #[serde(deserialize_with = "lenient_flag")]
    pub live: bool,
    #[serde(rename = "User")]
    pub user: Option<WireUser>,
}

impl WireMetadata {
    /// Live broadcasts, audio tracks and live TV never reach the wall.
    pub fn is_displayable(&self) -> bool {
        !self.live && !matches!(self.kind.as_str(), "track" | "livetv" | "live")
    }

    pub fn into_item(self) -> Option<Item> {
        if !self.is_displayable() {
            return None;
        }
        let kind = ItemKind::from_upstream(&self.kind);
        let mut item = Item {
            title: self.title,
            kind,
            thumb_ref: encode_ref(&self.thumb),
            art_ref: encode_ref(&self.art),
            year: u32::try_from(self.year).unwrap_or(0),
            summary: self.summary,
            duration_ms: self.duration,
            view_offset_ms: self.view_offset,
            user: self.user.map(|u| u.title).unwrap_or_default(),
            rating_key: self.rating_key,
            added_at: i64::try_from(self.added_at).unwrap_or(0),
            ..Item::default()
        };
        if kind == ItemKind::Episode {
            item.show_title = self.grandparent_title;
            item.season = u32::try_from(self.parent_index).unwrap_or(0);
            item.episode = u32::try_from(self.index).unwrap_or(0);
            item.show_thumb_ref = encode_ref(&self.grandparent_thumb);
        }
        Some(item)
    }

    fn apply_attribute(&mut self, key: &str, value: String) {
        match key {
            "ratingKey" => self.rating_key = value,
            "type" => self.kind = value,
            "title" => self.title = value,
            "thumb" => self.thumb = value,
            "art" => self.art = value,
            "summary" => self.summary = value,
            "year" => self.year = value.parse().unwrap_or(0),
            "duration" => self.duration = value.parse().unwrap_or(0),
            "viewOffset" => self.view_offset = value.parse().unwrap_or(0),
            "addedAt" => self.added_at = value.parse().unwrap_or(0),
            "grandparentTitle" => self.grandparent_title = value,
            "grandparentThumb" => self.grandparent_thumb = value,
            "parentIndex" => self.parent_index = value.parse().unwrap_or(0),
            "index" => self.index = value.parse().unwrap_or(0),
            "live" => self.live = parse_flag(&value),
            _ => {}
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim(), "1" | "true" | "TRUE" | "True")
}

fn decode_xml_container(body: &str) -> Result<Vec<WireMetadata>, String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<WireMetadata> = None;
    let mut depth = 0usize;
    let mut saw_container = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) => {
                open_xml_element(&tag, depth, &mut saw_container, &mut current)?;
                depth += 1;
            }
            Ok(Event::Empty(tag)) => {
                open_xml_element(&tag, depth, &mut saw_container, &mut current)?;
                if depth == 1 {
                    entries.extend(current.take());
                }
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                if depth == 1 {
                    entries.extend(current.take());
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(format!(
                    "at byte {}: {err}",
                    reader.error_position()
                ));
            }
        }
    }

    if !saw_container {
        return Err("missing MediaContainer root".to_string());
    }
    Ok(entries)
}

fn open_xml_element(
    tag: &BytesStart<'_>,
    depth: usize,
    saw_container: &mut bool,
    current: &mut Option<WireMetadata>,
) -> Result<(), String> {
    let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
    match depth {
        0 => {
            if name != "MediaContainer" {
                return Err(format!("unexpected root element <{name}>"));
            }
            *saw_container = true;
        }
        1 => {
            let mut meta = WireMetadata::default();
            for (key, value) in xml_attributes(tag)? {
                meta.apply_attribute(&key, value);
            }
            if meta.kind.is_empty() && name == "Track" {
                meta.kind = "track".to_string();
            }
            *current = Some(meta);
        }
        2 if name == "User" => {
            if let Some(meta) = current.as_mut() {
                let title = xml_attributes(tag)?
                    .into_iter()
                    .find_map(|(k, v)| (k == "title").then_some(v))
                    .unwrap_or_default();
                meta.user = Some(WireUser { title });
            }
        }
        _ => {}
    }
    Ok(())
}

fn xml_attributes(tag: &BytesStart<'_>) -> Result<Vec<(String, String)>, String> {
    let mut out = Vec::new();
    for attr in tag.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| err.to_string())?
            .into_owned();
        out.push((key, value));
    }
    Ok(out)
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct LenientString;

    impl<'de> Visitor<'de> for LenientString {
        type Value = String;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string, number or null")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(value.to_string())
        }

        fn visit_string<E: de::Error>(self, value: String) -> Result<Self::Value, E> {
            Ok(value)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(value.to_string())
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(value.to_string())
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
            Ok(value.to_string())
        }

        fn visit_bool<E: de::Error>(self, value: bool) -> Result<Self::Value, E> {
            Ok(value.to_string())
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(String::new())
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(String::new())
        }
    }

    deserializer.deserialize_any(LenientString)
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct LenientU64;

    impl<'de> Visitor<'de> for LenientU64 {
        type Value = u64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a non-negative number, numeric string or null")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(u64::try_from(value).unwrap_or(0))
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
            if value.is_finite() && value > 0.0 {
                Ok(value as u64)
            } else {
                Ok(0)
            }
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(value.trim().parse().unwrap_or(0))
        }

        fn visit_bool<E: de::Error>(self, _value: bool) -> Result<Self::Value, E> {
            Ok(0)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(0)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(0)
        }
    }

    deserializer.deserialize_any(LenientU64)
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct LenientFlag;

    impl<'de> Visitor<'de> for LenientFlag {
        type Value = bool;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a boolean, 0/1 or null")
        }

        fn visit_bool<E: de::Error>(self, value: bool) -> Result<Self::Value, E> {
            Ok(value)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(value != 0)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(value != 0)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(parse_flag(value))
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(false)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(false)
        }
    }

    deserializer.deserialize_any(LenientFlag)
}
