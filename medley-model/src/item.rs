use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{IdKind, IdMap, ids_from_guid, normalize_ids};
use crate::media_kind::MediaKind;

/// Normalized minimal form of a library item.
///
/// Every field except `kind` is optional; providers rarely know everything
/// about an item, and the key algebra is built to cope. Timestamps stay as
/// the provider-supplied strings and are parsed on demand, since upstreams
/// mix ISO-8601, epoch seconds and epoch millis freely.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaItem {
    #[serde(rename = "type", default)]
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ids: IdMap,
    /// Parent-show ids for seasons and episodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_ids: Option<IdMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_title: Option<String>,
    /// Raw rating as delivered by the provider; see [`normalize_rating`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watched: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watched_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_id: Option<String>,
}

impl MediaItem {
    /// A movie/show stub with just ids.
    pub fn new(kind: MediaKind, ids: IdMap) -> Self {
        MediaItem {
            kind,
            ids,
            ..Default::default()
        }
    }

    /// All normalized ids of the item, including ids recoverable from a
    /// raw GUID value.
    pub fn all_ids(&self) -> IdMap {
        let mut out = normalize_ids(&self.ids);
        if let Some(guid) = self.ids.get(&IdKind::Guid) {
            for (kind, v) in ids_from_guid(guid) {
                out.entry(kind).or_insert(v);
            }
        }
        out
    }

    /// Normalized parent-show ids, when any are present.
    pub fn normalized_show_ids(&self) -> Option<IdMap> {
        let sids = self.show_ids.as_ref()?;
        let n = normalize_ids(sids);
        if n.is_empty() { None } else { Some(n) }
    }

    /// The normalized minimal form: enforced id normalization with every
    /// optional attribute carried through. Idempotent.
    pub fn minimal(&self) -> MediaItem {
        let mut out = self.clone();
        out.ids = self.all_ids();
        out.show_ids = self.normalized_show_ids();
        out
    }

    /// The rating collapsed onto the 1–10 scale, if one is set and valid.
    pub fn normalized_rating(&self) -> Option<u8> {
        self.rating.and_then(normalize_rating)
    }

    /// Set a rating, rejecting values outside every known scale.
    pub fn with_rating(mut self, raw: f64) -> crate::error::Result<MediaItem> {
        let normalized = normalize_rating(raw).ok_or_else(|| {
            crate::error::ModelError::InvalidRating(format!("out of range: {raw}"))
        })?;
        self.rating = Some(normalized as f64);
        Ok(self)
    }

    /// `rated_at` as epoch seconds, when parseable.
    pub fn rated_at_epoch(&self) -> Option<i64> {
        self.rated_at.as_deref().and_then(parse_epoch)
    }

    /// `watched_at` as epoch seconds, when parseable.
    pub fn watched_at_epoch(&self) -> Option<i64> {
        self.watched_at.as_deref().and_then(parse_epoch)
    }
}

/// Collapse a raw rating value onto the integer 1–10 scale.
///
/// Values in (10, 100] are treated as percentages and divided by ten.
/// Anything that rounds outside 1–10 is rejected.
pub fn normalize_rating(raw: f64) -> Option<u8> {
    if !raw.is_finite() {
        return None;
    }
    let f = if raw > 10.0 && raw <= 100.0 { raw / 10.0 } else { raw };
    let n = f.round();
    if (1.0..=10.0).contains(&n) { Some(n as u8) } else { None }
}

/// Collapse a five-star rating (0–5, halves allowed) onto 1–10.
///
/// A plain number cannot reveal its own scale, so adapters whose service
/// rates out of five must opt in through this constructor.
pub fn rating_from_five_star(raw: f64) -> Option<u8> {
    if !raw.is_finite() || !(0.0..=5.0).contains(&raw) {
        return None;
    }
    normalize_rating(raw * 2.0)
}

/// Parse a timestamp into epoch seconds.
///
/// Accepts bare epoch digits (millis when 13+ digits), RFC 3339, and the
/// space-separated ISO variant some providers emit.
pub fn parse_epoch(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        let n: i64 = s.parse().ok()?;
        return Some(if s.len() >= 13 { n / 1000 } else { n });
    }
    let iso = s.replace(' ', "T");
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(&iso) {
        return Some(dt.timestamp());
    }
    let naive = chrono::NaiveDateTime::parse_from_str(&iso, "%Y-%m-%dT%H:%M:%S").ok()?;
    Some(naive.and_utc().timestamp())
}
