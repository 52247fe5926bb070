//! Property checks for the key algebra: normalization idempotence, alias
//! membership, and merge behavior over arbitrary item shapes.

use proptest::prelude::*;

use medley_model::{
    IdKind, IdMap, MediaItem, MediaKind, canonical_key, keys_for_item, merge_ids, normalize_ids,
};

fn id_value() -> impl Strategy<Value = String> {
    prop_oneof![
        "[0-9]{1,8}",
        "tt[0-9]{5,8}",
        "[a-z0-9-]{3,12}",
        Just("none".to_string()),
        Just(" 42 ".to_string()),
    ]
}

fn id_map() -> impl Strategy<Value = IdMap> {
    proptest::collection::btree_map(
        prop_oneof![
            Just(IdKind::Imdb),
            Just(IdKind::Tmdb),
            Just(IdKind::Tvdb),
            Just(IdKind::Trakt),
            Just(IdKind::Slug),
            Just(IdKind::Jellyfin),
        ],
        id_value(),
        0..4,
    )
}

fn media_kind() -> impl Strategy<Value = MediaKind> {
    prop_oneof![
        Just(MediaKind::Movie),
        Just(MediaKind::Show),
        Just(MediaKind::Season),
        Just(MediaKind::Episode),
    ]
}

fn media_item() -> impl Strategy<Value = MediaItem> {
    (
        media_kind(),
        proptest::option::of("[A-Za-z ]{1,24}"),
        proptest::option::of(1900i32..2100),
        id_map(),
        proptest::option::of(id_map()),
        proptest::option::of(0i32..40),
        proptest::option::of(1i32..100),
    )
        .prop_map(|(kind, title, year, ids, show_ids, season, episode)| MediaItem {
            kind,
            title,
            year,
            ids,
            show_ids,
            season,
            episode,
            ..Default::default()
        })
}

proptest! {
    #[test]
    fn canonical_key_idempotent_under_normalization(item in media_item()) {
        prop_assert_eq!(canonical_key(&item.minimal()), canonical_key(&item));
    }

    #[test]
    fn canonical_key_is_total(item in media_item()) {
        prop_assert!(!canonical_key(&item).is_empty());
    }

    #[test]
    fn canonical_key_is_an_alias_when_ids_present(item in media_item()) {
        if !item.all_ids().is_empty() {
            let keys = keys_for_item(&item);
            prop_assert!(keys.contains(&canonical_key(&item)));
        }
    }

    #[test]
    fn merge_with_self_equals_normalization(ids in id_map()) {
        prop_assert_eq!(merge_ids(&ids, &ids), normalize_ids(&ids));
    }

    #[test]
    fn minimal_is_idempotent(item in media_item()) {
        let once = item.minimal();
        prop_assert_eq!(once.minimal(), once);
    }
}
