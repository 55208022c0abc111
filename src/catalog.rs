//! Canonical department/municipality catalog and its lookup indices.

use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

use crate::text::{fold_key, normalize_key};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Department {
    #[serde(rename = "departamento", default)]
    pub name: String,
    #[serde(rename = "ciudades", default)]
    pub municipalities: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalCatalog {
    pub departments: Vec<Department>,
}

impl CanonicalCatalog {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Could not read catalog `{}`", path.display()))?;
        let catalog = serde_json::from_str(&text)
            .with_context(|| format!("Catalog `{}` is not a department list", path.display()))?;

        Ok(catalog)
    }

    pub fn index(&self) -> CatalogIndex {
        CatalogIndex::build(self)
    }
}

/// How a name was resolved against an index level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchTier {
    Exact,
    Folded,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<'a> {
    pub key: &'a str,
    pub display: &'a str,
    pub tier: MatchTier,
}

/// One level of the catalog: normalized key to display name, with a
/// diacritic-insensitive secondary map.
#[derive(Debug, Default)]
pub struct NameIndex {
    exact: HashMap<String, String>,
    // `None` marks a folded key shared by two distinct catalog names.
    folded: HashMap<String, Option<String>>,
}

impl NameIndex {
    /// Returns the normalized key, or `None` when the name is blank.
    fn insert(&mut self, display: &str) -> Option<String> {
        let key = normalize_key(display);
        if key.is_empty() {
            return None;
        }

        if !self.exact.contains_key(&key) {
            self.exact.insert(key.clone(), display.to_string());

            self.folded
                .entry(fold_key(display))
                .and_modify(|existing| {
                    if existing.as_deref() != Some(key.as_str()) {
                        *existing = None;
                    }
                })
                .or_insert_with(|| Some(key.clone()));
        }

        Some(key)
    }

    pub fn resolve_exact(&self, text: &str) -> Option<Resolved<'_>> {
        self.exact
            .get_key_value(&normalize_key(text))
            .map(|(key, display)| Resolved {
                key,
                display,
                tier: MatchTier::Exact,
            })
    }

    pub fn resolve_folded(&self, text: &str) -> Option<Resolved<'_>> {
        let key = self.folded.get(&fold_key(text))?.as_deref()?;
        self.exact
            .get_key_value(key)
            .map(|(key, display)| Resolved {
                key,
                display,
                tier: MatchTier::Folded,
            })
    }

    /// Best Jaro-Winkler candidate at or above `threshold`. A tie for the best
    /// score resolves to nothing.
    pub fn resolve_fuzzy(&self, text: &str, threshold: f64) -> Option<Resolved<'_>> {
        let target = fold_key(text);
        if target.is_empty() {
            return None;
        }

        let mut best: Option<(f64, &String)> = None;
        let mut tied = false;

        for (folded, key) in &self.folded {
            let Some(key) = key else { continue };
            let score = jaro_winkler(&target, folded);
            if score < threshold {
                continue;
            }

            match best {
                Some((best_score, best_key)) if score == best_score && best_key != key => {
                    tied = true;
                }
                Some((best_score, _)) if score <= best_score => {}
                _ => {
                    best = Some((score, key));
                    tied = false;
                }
            }
        }

        if tied {
            return None;
        }

        let (_, key) = best?;
        self.exact
            .get_key_value(key.as_str())
            .map(|(key, display)| Resolved {
                key,
                display,
                tier: MatchTier::Fuzzy,
            })
    }

    /// Tries exact, folded and, if a threshold is given, fuzzy lookups in turn.
    pub fn resolve(&self, text: &str, fuzzy_threshold: Option<f64>) -> Option<Resolved<'_>> {
        self.resolve_exact(text)
            .or_else(|| self.resolve_folded(text))
            .or_else(|| fuzzy_threshold.and_then(|t| self.resolve_fuzzy(text, t)))
    }
}

/// Department index plus one municipality index per department key.
#[derive(Debug, Default)]
pub struct CatalogIndex {
    pub departments: NameIndex,
    pub municipalities: HashMap<String, NameIndex>,
}

impl CatalogIndex {
    pub fn build(catalog: &CanonicalCatalog) -> Self {
        let mut index = CatalogIndex::default();

        for department in &catalog.departments {
            let Some(dept_key) = index.departments.insert(&department.name) else {
                continue;
            };

            let bucket = index.municipalities.entry(dept_key).or_default();
            for municipality in &department.municipalities {
                bucket.insert(municipality);
            }
        }

        index
    }

    pub fn municipalities_of(&self, dept_key: &str) -> Option<&NameIndex> {
        self.municipalities.get(dept_key)
    }
}

// -- Tests -------------------------------------------------------------------
