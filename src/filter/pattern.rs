use crate::core::{Result, SyncError};
use lru::LruCache;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

const REGEX_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(200) {
    Some(size) => size,
    None => unreachable!(),
};

lazy_static::lazy_static! {
    static ref REGEX_LRU_CACHE: Mutex<LruCache<String, Arc<Regex>>> =
        Mutex::new(LruCache::new(REGEX_CACHE_SIZE));
}

/// Translates a LIKE pattern into an anchored regex
#[inline]
fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');

    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' if i + 1 < chars.len() => {
                i += 1;
                regex.push_str(&regex::escape(&chars[i].to_string()));
            }
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    regex.push('$');
    regex
}

/// Fast path for patterns that need no regex
#[inline]
fn fast_path_like(text: &str, pattern: &str, case_sensitive: bool) -> Option<bool> {
    if pattern.contains('_') || pattern.contains('\\') {
        return None;
    }

    let fold = |s: &str| {
        if case_sensitive {
            s.to_string()
        } else {
            s.to_lowercase()
        }
    };

    // exact match
    if !pattern.contains('%') {
        return Some(if case_sensitive {
            text == pattern
        } else {
            text.eq_ignore_ascii_case(pattern) || fold(text) == fold(pattern)
        });
    }

    let wildcards = pattern.matches('%').count();

    // "prefix%"
    if wildcards == 1 && pattern.ends_with('%') {
        let prefix = &pattern[..pattern.len() - 1];
        return Some(fold(text).starts_with(&fold(prefix)));
    }

    // "%suffix"
    if wildcards == 1 && pattern.starts_with('%') {
        return Some(fold(text).ends_with(&fold(&pattern[1..])));
    }

    // "%substring%"
    if wildcards == 2 && pattern.len() >= 2 && pattern.starts_with('%') && pattern.ends_with('%') {
        let substring = &pattern[1..pattern.len() - 1];
        return Some(fold(text).contains(&fold(substring)));
    }

    None
}

/// Compiled regex for a pattern, cached across calls
fn get_or_compile_regex(pattern: &str, case_sensitive: bool) -> Result<Arc<Regex>> {
    let cache_key = if case_sensitive {
        format!("s:{}", pattern)
    } else {
        format!("i:{}", pattern)
    };

    {
        let mut cache = REGEX_LRU_CACHE.lock()?;
        if let Some(regex) = cache.get(&cache_key) {
            return Ok(Arc::clone(regex));
        }
    }

    let compiled = regex::RegexBuilder::new(&like_to_regex(pattern))
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| SyncError::Config(format!("invalid LIKE pattern '{}': {}", pattern, e)))?;
    let compiled = Arc::new(compiled);

    REGEX_LRU_CACHE.lock()?.put(cache_key, Arc::clone(&compiled));
    Ok(compiled)
}

/// Matches `text` against a LIKE pattern: `%` any run, `_` one character,
/// `\` escapes the next character
#[inline]
pub fn eval_like(text: &str, pattern: &str, case_sensitive: bool) -> Result<bool> {
    if let Some(result) = fast_path_like(text, pattern, case_sensitive) {
        return Ok(result);
    }

    let regex = get_or_compile_regex(pattern, case_sensitive)?;
    Ok(regex.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_paths() {
        assert!(eval_like("Sales_Daily", "Sales%", true).unwrap());
        assert!(eval_like("Sales_Daily", "%daily", false).unwrap());
        assert!(!eval_like("Sales_Daily", "%daily", true).unwrap());
        assert!(eval_like("Sales_Daily", "%es_Da%", true).unwrap());
        assert!(eval_like("exact", "EXACT", false).unwrap());
    }

    #[test]
    fn test_regex_paths() {
        assert!(eval_like("q1_2024", "q_\\_%", true).unwrap());
        assert!(!eval_like("q12024", "q_\\_%", true).unwrap());
        assert!(eval_like("a.b", "a.b", true).unwrap());
        assert!(!eval_like("axb", "a.b", true).unwrap());
        assert!(eval_like("foo(bar)", "%(%)", true).unwrap());
        assert!(eval_like("Journey - Welcome", "journey%we_come", false).unwrap());
    }
}
