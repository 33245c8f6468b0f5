//! Filesystem-safe naming for report directories.
//!
//! Every group maps to a directory whose name is derived from the
//! group's native name. Sanitization is per segment; uniqueness among
//! siblings is enforced with numeric suffixes at first discovery, so
//! two distinct groups never collide in the same parent.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

/// Windows device names that cannot be used as path segments.
const RESERVED: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Maximum length of a single sanitized segment.
const MAX_SEGMENT: usize = 100;

/// Windows MAX_PATH; full-path collapsing kicks in beyond this.
pub const WINDOWS_PATH_LIMIT: usize = 260;

/// Sanitizes one group name into a directory segment.
pub fn sanitize_segment(name: &str) -> String {
    let mut out = String::with_capacity(name.len());

    for ch in name.to_lowercase().chars() {
        let replaced = matches!(
            ch,
            '/' | '\\' | '.' | '-' | '*' | '?' | '"' | '<' | '>' | '|' | ':'
        ) || ch.is_whitespace();
        if replaced {
            // Collapse runs of replaced characters into one underscore.
            if !out.ends_with('_') {
                out.push('_');
            }
        } else {
            out.push(ch);
        }
    }

    if out.is_empty() {
        out.push('_');
    }

    if RESERVED.contains(&out.as_str()) {
        out = format!("_{out}_");
    }

    if out.len() > MAX_SEGMENT {
        let mut cut = MAX_SEGMENT;
        while cut > 0 && !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }

    out
}

/// Picks a sibling-unique directory name, suffixing on collision.
pub fn assign_unique(used: &HashSet<String>, base: &str) -> String {
    if !used.contains(base) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}_{n}");
        if !used.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Shortens a deep segment chain to fit within `limit` total characters.
///
/// The leftmost ancestors are replaced with an 8-hex-character prefix of
/// the SHA-256 of the full original path, preserving the most specific
/// rightmost segments. Uniqueness survives because the hash covers the
/// whole path. Applied on Windows only, where `MAX_PATH` still bites.
pub fn collapse_long_path(base_len: usize, segments: &[String], limit: usize) -> Vec<String> {
    let full_len =
        base_len + segments.iter().map(|s| s.len() + 1).sum::<usize>();
    if full_len <= limit || segments.len() <= 1 {
        return segments.to_vec();
    }

    let full_path = segments.join("/");
    let digest = Sha256::digest(full_path.as_bytes());
    let prefix: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();

    for keep in (1..segments.len()).rev() {
        let tail = &segments[segments.len() - keep..];
        let len = base_len + prefix.len() + 1 + tail.iter().map(|s| s.len() + 1).sum::<usize>();
        if len <= limit {
            let mut out = Vec::with_capacity(keep + 1);
            out.push(prefix.clone());
            out.extend(tail.iter().cloned());
            return out;
        }
    }

    vec![prefix, segments[segments.len() - 1].clone()]
}
