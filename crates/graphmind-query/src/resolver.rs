//! Fuzzy matching of names mentioned in a question against the tenant's
//! canonical entity directory.
//!
//! Names and their alias forms (full name, listed aliases, first name only,
//! honorific-stripped, initials) are normalized and scored by normalized
//! edit distance. Only the caller's namespace is ever consulted.

use std::sync::Arc;

use graphmind_core::{CanonicalEntity, TenantNamespace};
use serde::Serialize;

use crate::directory::EntityDirectory;
use crate::error::Result;

const HONORIFICS: &[&str] = &[
    "mr", "mrs", "ms", "miss", "mx", "dr", "prof", "professor", "sir", "dame", "madam", "rev",
];

/// Weight applied to derived alias forms, so an exact full-name match
/// always outranks a first-name or initials match.
const DERIVED_FORM_WEIGHT: f64 = 0.95;

/// Scores closer than this are a tie.
const TIE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Resolved,
    /// Two or more entities tied for the best score. Not an error.
    Ambiguous,
    Unresolved,
}

/// Outcome of resolving one mention.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub mention: String,
    /// Canonical name when resolved, the original mention otherwise.
    pub canonical_name: String,
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub score: f64,
    pub status: ResolutionStatus,
}

impl Resolution {
    fn unresolved(mention: &str, score: f64, status: ResolutionStatus) -> Self {
        Self {
            mention: mention.to_string(),
            canonical_name: mention.to_string(),
            entity_id: None,
            entity_type: None,
            score,
            status,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status == ResolutionStatus::Resolved
    }
}

/// Resolver bound to a directory and an acceptance threshold.
pub struct EntityResolver {
    directory: Arc<dyn EntityDirectory>,
    threshold: f64,
}

impl EntityResolver {
    pub fn new(directory: Arc<dyn EntityDirectory>, threshold: f64) -> Self {
        Self {
            directory,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Resolve `name` within `namespace`.
    pub async fn resolve(&self, name: &str, namespace: &TenantNamespace) -> Result<Resolution> {
        let candidates = self.directory.entities(namespace).await?;
        let resolution = resolve_against(name, &candidates, self.threshold);

        match resolution.status {
            ResolutionStatus::Resolved => tracing::debug!(
                namespace = %namespace,
                mention = %name,
                canonical = %resolution.canonical_name,
                score = resolution.score,
                "Entity resolved"
            ),
            ResolutionStatus::Ambiguous => tracing::info!(
                namespace = %namespace,
                mention = %name,
                score = resolution.score,
                "Entity resolution ambiguous; proceeding unresolved"
            ),
            ResolutionStatus::Unresolved => tracing::debug!(
                namespace = %namespace,
                mention = %name,
                best_score = resolution.score,
                "No entity cleared the threshold"
            ),
        }
        Ok(resolution)
    }
}

/// Pure resolution against an already-fetched candidate list.
pub fn resolve_against(name: &str, candidates: &[CanonicalEntity], threshold: f64) -> Resolution {
    let query_forms = query_forms(name);
    if query_forms.is_empty() {
        return Resolution::unresolved(name, 0.0, ResolutionStatus::Unresolved);
    }

    let mut best: Option<(&CanonicalEntity, f64)> = None;
    let mut tied = false;

    for entity in candidates {
        let score = score_entity(&query_forms, entity);
        match best {
            Some((current, top)) if (score - top).abs() <= TIE_EPSILON => {
                if current.id != entity.id {
                    tied = true;
                }
            }
            Some((_, top)) if score < top => {}
            _ => {
                best = Some((entity, score));
                tied = false;
            }
        }
    }

    match best {
        Some((_, score)) if score < threshold => {
            Resolution::unresolved(name, score, ResolutionStatus::Unresolved)
        }
        Some((_, score)) if tied => Resolution::unresolved(name, score, ResolutionStatus::Ambiguous),
        Some((entity, score)) => Resolution {
            mention: name.to_string(),
            canonical_name: entity.name.clone(),
            entity_id: Some(entity.id.clone()),
            entity_type: Some(entity.entity_type.clone()),
            score,
            status: ResolutionStatus::Resolved,
        },
        None => Resolution::unresolved(name, 0.0, ResolutionStatus::Unresolved),
    }
}

fn query_forms(name: &str) -> Vec<String> {
    let normalized = normalize(name);
    if normalized.is_empty() {
        return Vec::new();
    }
    let mut forms = vec![normalized.clone()];
    if let Some(stripped) = strip_honorific(&normalized) {
        forms.push(stripped);
    }
    forms
}

fn score_entity(query_forms: &[String], entity: &CanonicalEntity) -> f64 {
    let forms = alias_forms(entity);
    let mut best = 0.0f64;
    for q in query_forms {
        for (form, weight) in &forms {
            best = best.max(similarity(q, form) * weight);
        }
    }
    best
}

/// Every normalized form an entity can be referred to by, with its weight.
pub fn alias_forms(entity: &CanonicalEntity) -> Vec<(String, f64)> {
    let mut forms: Vec<(String, f64)> = Vec::new();
    let mut push = |form: String, weight: f64| {
        if form.is_empty() {
            return;
        }
        match forms.iter_mut().find(|(f, _)| *f == form) {
            Some(existing) => existing.1 = existing.1.max(weight),
            None => forms.push((form, weight)),
        }
    };

    let full = normalize(&entity.name);
    push(full.clone(), 1.0);
    for alias in &entity.aliases {
        push(normalize(alias), 1.0);
    }

    let base = strip_honorific(&full).unwrap_or_else(|| full.clone());
    if base != full {
        push(base.clone(), DERIVED_FORM_WEIGHT);
    }

    let words: Vec<&str> = base.split(' ').filter(|w| !w.is_empty()).collect();
    if words.len() >= 2 {
        push(words[0].to_string(), DERIVED_FORM_WEIGHT);
        let initials: String = words.iter().filter_map(|w| w.chars().next()).collect();
        push(initials, DERIVED_FORM_WEIGHT);
    }

    forms
}

/// Lowercase, drop apostrophes, turn other punctuation into spaces, collapse
/// whitespace.
pub fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\'' || c == '\u{2019}' {
            continue;
        }
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_honorific(normalized: &str) -> Option<String> {
    let (first, rest) = normalized.split_once(' ')?;
    HONORIFICS
        .contains(&first)
        .then(|| rest.trim().to_string())
        .filter(|r| !r.is_empty())
}

/// `1 - levenshtein / max_len`, in `0..=1`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
