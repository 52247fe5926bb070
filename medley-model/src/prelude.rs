//! Frequently used model types in one import.
//! Prefer this module over individual tree nodes in orchestration code.

pub use super::error::{ModelError, Result as ModelResult};
pub use super::ids::{ID_KINDS, IdKind, IdMap, KEY_PRIORITY};
pub use super::item::MediaItem;
pub use super::keys::{canonical_key, keys_for_item};
pub use super::media_kind::MediaKind;
