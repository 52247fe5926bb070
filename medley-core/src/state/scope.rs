/// Sanitize a deployment scope label for use inside filenames.
///
/// Keeps alphanumerics plus `-`, `_` and `.`; everything else becomes an
/// underscore, runs collapse, and the result is capped at 96 characters.
pub fn safe_scope(value: &str) -> String {
    let mut s: String = value
        .chars()
        .map(|ch| if ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.') { ch } else { '_' })
        .collect();
    while s.contains("__") {
        s = s.replace("__", "_");
    }
    let s = s.trim_matches(|c| c == '_' || c == ' ');
    let s: String = s.chars().take(96).collect();
    if s.is_empty() { "default".to_string() } else { s }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_awkward_labels() {
        assert_eq!(safe_scope("home/lab #2"), "home_lab_2");
        assert_eq!(safe_scope("plex-trakt.main"), "plex-trakt.main");
        assert_eq!(safe_scope("___"), "default");
        assert_eq!(safe_scope(""), "default");
    }

    #[test]
    fn caps_length() {
        let long = "x".repeat(200);
        assert_eq!(safe_scope(&long).len(), 96);
    }
}
