//! Process-wide, append-only match-key normalization caches.
//!
//! A node's `matchName` is its NFKD-normalized (and, on case-insensitive
//! graphs, lowercased-first) name, used for every equality check so
//! that composed and decomposed Unicode spellings of the same name
//! compare equal. Normalization is pure and the input space is small
//! relative to a long-running process, so both variants are memoized
//! in a monotonically growing map — see `spec.md` §3.1, §9.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use unicode_normalization::UnicodeNormalization;

fn case_sensitive_cache() -> &'static Mutex<HashMap<String, std::sync::Arc<str>>> {
    static CACHE: OnceLock<Mutex<HashMap<String, std::sync::Arc<str>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn case_insensitive_cache() -> &'static Mutex<HashMap<String, std::sync::Arc<str>>> {
    static CACHE: OnceLock<Mutex<HashMap<String, std::sync::Arc<str>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Computes (and memoizes) the match key for `name` under the given
/// case-sensitivity mode.
pub fn match_key(name: &str, nocase: bool) -> std::sync::Arc<str> {
    let cache = if nocase { case_insensitive_cache() } else { case_sensitive_cache() };

    if let Some(hit) = cache.lock().unwrap().get(name) {
        return hit.clone();
    }

    let normalized: std::sync::Arc<str> = if nocase {
        name.to_lowercase().nfkd().collect::<String>().into()
    } else {
        name.nfkd().collect::<String>().into()
    };

    cache.lock().unwrap().entry(name.to_owned()).or_insert(normalized).clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nfkd_equivalence() {
        // "é" as a single codepoint vs "e" + combining acute accent.
        let composed = "caf\u{00e9}";
        let decomposed = "cafe\u{0301}";
        assert_eq!(match_key(composed, false), match_key(decomposed, false));
    }

    #[test]
    fn nocase_folds_ascii() {
        assert_eq!(match_key("README", true), match_key("readme", true));
        assert_ne!(match_key("README", false), match_key("readme", false));
    }
}
