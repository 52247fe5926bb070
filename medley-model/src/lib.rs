//! Core data model shared across Medley crates: the normalized item shape,
//! identifier namespaces, and the canonical/alias key algebra that every
//! planner and blocklist decision is built on.

pub mod error;
pub mod ids;
pub mod item;
pub mod keys;
pub mod media_kind;
pub mod prelude;

// Intentionally curated re-exports for downstream consumers.
pub use error::{ModelError, Result as ModelResult};
pub use ids::{
    ID_KINDS, IdKind, IdMap, KEY_PRIORITY, any_key_overlap, coalesce_ids, has_external_ids,
    has_ids_for, ids_from_guid, ids_from_provider_ids, merge_ids, normalize_id, normalize_ids,
    parse_id, unified_keys_from_ids,
};
pub use item::{MediaItem, normalize_rating, parse_epoch, rating_from_five_star};
pub use keys::{canonical_key, keys_for_item, preferred_id_key, title_year_key};
pub use media_kind::MediaKind;
