//! Name normalization used for catalog lookups.
//!
//! Keys produced here are only ever compared, never displayed.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

static PARENTHETICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\([^)]*\)\s*").unwrap());

static CAPITAL_DISTRICT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",?\s+D\.?\s?C\.?(?:\s|$)").unwrap());

/// Trims, collapses whitespace runs and upper-cases.
pub fn normalize_key(s: &str) -> String {
    collapse_whitespace(s).to_uppercase()
}

/// Like [`normalize_key`] but with diacritics removed, e.g. `Medellín` -> `MEDELLIN`.
pub fn fold_key(s: &str) -> String {
    normalize_key(s)
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect()
}

/// Light cleanup before matching: drops parenthetical qualifiers and the
/// capital district suffix.
pub fn simplify_name(s: &str) -> String {
    let without_parens = PARENTHETICAL.replace_all(s, " ");
    let without_district = CAPITAL_DISTRICT.replace_all(&without_parens, " ");

    collapse_whitespace(&without_district)
}

/// Upper-cases the first letter of every alphabetic run and lower-cases the rest.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;

    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }

    out
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// -- Tests -------------------------------------------------------------------
