//! The fixed template catalog: lexical classification, mention extraction,
//! and rendering.
//!
//! Rendered text embeds only the namespace (already restricted to a safe
//! charset), labels and relationship types from the allow-lists below, and
//! integer limits. Every user-supplied value travels in the parameter map.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use graphmind_core::{QueryParams, TemplateKind, TenantNamespace};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Node labels a template may embed, with the nouns that select them.
pub const LABELS: &[(&str, &[&str])] = &[
    (
        "Person",
        &["person", "persons", "people", "friends", "contacts", "colleagues", "coworkers"],
    ),
    (
        "Organization",
        &["organization", "organizations", "organisations", "companies", "company", "orgs"],
    ),
    ("Project", &["project", "projects"]),
    ("Location", &["location", "locations", "places", "cities", "city"]),
    ("Event", &["event", "events", "meetings", "meeting"]),
    ("Topic", &["topic", "topics", "subjects"]),
    ("Technology", &["technology", "technologies", "tools", "tech"]),
    ("Document", &["document", "documents", "docs", "notes", "files"]),
];

/// Relationship types a template may embed, with the phrases that select them.
const RELATIONSHIP_PHRASES: &[(&str, &str)] = &[
    (r"(?i)\bworks?\s+with\b", "WORKS_WITH"),
    (r"(?i)\b(works?|worked)\s+(at|for)\b", "WORKS_AT"),
    (r"(?i)\breports?\s+to\b", "REPORTS_TO"),
    (r"(?i)\bmanages?\b", "MANAGES"),
    (r"(?i)\blives?\s+in\b", "LIVES_IN"),
    (r"(?i)\battended\b", "ATTENDED"),
    (r"(?i)\bknows?\b", "KNOWS"),
];

/// Words never treated as entity mentions even when capitalized.
const STOPWORDS: &[&str] = &[
    "who", "whom", "whose", "what", "when", "where", "which", "why", "how", "is", "are", "was",
    "were", "do", "does", "did", "list", "show", "tell", "me", "count", "find", "give", "get",
    "i", "my", "the", "a", "an", "all", "any", "about", "and", "or", "of", "in", "on", "at",
    "to", "with", "between", "last", "since", "yesterday", "today", "recent", "recently",
    "many", "number", "please", "can", "could", "would", "you", "describe", "everything",
    "anything", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "week", "month", "year",
];

/// Default look-back for temporal questions without an explicit period.
const DEFAULT_LOOKBACK_DAYS: i64 = 30;

struct Rule {
    kind: TemplateKind,
    pattern: Regex,
    confidence: f64,
}

const RULE_SOURCES: &[(TemplateKind, &str, f64)] = &[
    (TemplateKind::CountQuery, r"(?i)^\s*(how\s+many|count|number\s+of)\b", 0.9),
    (TemplateKind::CountQuery, r"(?i)\b(how\s+many|number\s+of)\b", 0.75),
    (
        TemplateKind::TemporalQuery,
        r"(?i)\b(when|yesterday|today|last\s+(week|month|year)|this\s+(week|month)|recent|recently|lately|since)\b",
        0.8,
    ),
    (
        TemplateKind::RelationshipQuery,
        r"(?i)\b(related|connected|connection|between|relationship|linked|knows?|works?\s+(with|at|for)|manages?|reports?\s+to|lives?\s+in|attended)\b",
        0.8,
    ),
    (
        TemplateKind::ListQuery,
        r"(?i)^\s*(list|show(\s+me)?(\s+all)?|what\s+are|which|find\s+all|give\s+me\s+all)\b",
        0.85,
    ),
    (
        TemplateKind::EntityLookup,
        r"(?i)^\s*(who\s+is|who's|who\s+was|what\s+is|what's|tell\s+me\s+about|describe)\b",
        0.9,
    ),
    (TemplateKind::EntityLookup, r"(?i)\b(who\s+is|tell\s+me\s+about)\b", 0.7),
];

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    RULE_SOURCES
        .iter()
        .filter_map(|&(kind, src, confidence)| {
            Regex::new(src).ok().map(|pattern| Rule {
                kind,
                pattern,
                confidence,
            })
        })
        .collect()
});

static RELATIONSHIP_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    RELATIONSHIP_PHRASES
        .iter()
        .filter_map(|&(src, rel)| Regex::new(src).ok().map(|re| (re, rel)))
        .collect()
});

static QUOTED: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r#""([^"]+)"|“([^”]+)”"#).ok());

static PERIODS: Lazy<Vec<(Regex, i64)>> = Lazy::new(|| {
    [
        (r"(?i)\b(yesterday|today)\b", 1),
        (r"(?i)\b(last|this|past)\s+week\b", 7),
        (r"(?i)\b(last|this|past)\s+month\b", 30),
        (r"(?i)\b(last|this|past)\s+year\b", 365),
    ]
    .iter()
    .filter_map(|&(src, days)| Regex::new(src).ok().map(|re| (re, days)))
    .collect()
});

static SINCE_DATE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\bsince\s+(\d{4}-\d{2}-\d{2})\b").ok());

// ── Classification ───────────────────────────────────────────────

/// Time window named in a temporal question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    LastDays(i64),
    Since(NaiveDate),
}

impl Period {
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::LastDays(days) => now - Duration::days(*days),
            Self::Since(date) => date.and_hms_opt(0, 0, 0).map(|d| d.and_utc()).unwrap_or(now),
        }
    }
}

/// Which template a question matched, and the hints pulled from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub kind: TemplateKind,
    pub confidence: f64,
    pub label: Option<&'static str>,
    pub relationship_type: Option<&'static str>,
    pub period: Option<Period>,
}

/// Classify a question by the first matching rule. `None` when no rule matches.
pub fn classify(question: &str) -> Option<Classification> {
    let rule = RULES.iter().find(|r| r.pattern.is_match(question))?;
    Some(Classification {
        kind: rule.kind,
        confidence: rule.confidence,
        label: detect_label(question),
        relationship_type: detect_relationship_type(question),
        period: detect_period(question),
    })
}

/// First allow-listed label whose noun appears in the question.
pub fn detect_label(question: &str) -> Option<&'static str> {
    words(question).find_map(|w| label_for_noun(&w))
}

fn label_for_noun(word: &str) -> Option<&'static str> {
    LABELS
        .iter()
        .find(|(_, nouns)| nouns.contains(&word))
        .map(|(label, _)| *label)
}

/// Canonical label for an entity type from the directory, if allow-listed.
pub fn allowed_label(entity_type: &str) -> Option<&'static str> {
    LABELS
        .iter()
        .map(|(label, _)| *label)
        .find(|label| label.eq_ignore_ascii_case(entity_type))
}

pub fn detect_relationship_type(question: &str) -> Option<&'static str> {
    RELATIONSHIP_RULES
        .iter()
        .find(|(re, _)| re.is_match(question))
        .map(|(_, rel)| *rel)
}

pub fn detect_period(question: &str) -> Option<Period> {
    if let Some(caps) = SINCE_DATE.as_ref().and_then(|re| re.captures(question)) {
        if let Some(date) = caps
            .get(1)
            .and_then(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok())
        {
            return Some(Period::Since(date));
        }
    }
    PERIODS
        .iter()
        .find(|(re, _)| re.is_match(question))
        .map(|(_, days)| Period::LastDays(*days))
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

// ── Mention Extraction ───────────────────────────────────────────

/// Candidate entity mentions: quoted phrases, then runs of capitalized words.
pub fn extract_mentions(question: &str) -> Vec<String> {
    let mut mentions: Vec<String> = Vec::new();
    let mut push = |m: String| {
        let m = m.trim().to_string();
        if !m.is_empty() && !mentions.iter().any(|e| e.eq_ignore_ascii_case(&m)) {
            mentions.push(m);
        }
    };

    let mut remainder = question.to_string();
    if let Some(re) = QUOTED.as_ref() {
        for caps in re.captures_iter(question) {
            if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
                push(m.as_str().to_string());
            }
        }
        remainder = re.replace_all(question, " , ").into_owned();
    }

    let mut run: Vec<String> = Vec::new();
    for raw in remainder.split_whitespace() {
        let ends_run = raw.ends_with(&[',', '?', '!', ';', ':'][..]);
        let token = clean_token(raw);

        if is_mention_word(&token) {
            run.push(token);
        } else if !run.is_empty() {
            push(run.join(" "));
            run.clear();
        }
        if ends_run && !run.is_empty() {
            push(run.join(" "));
            run.clear();
        }
    }
    if !run.is_empty() {
        push(run.join(" "));
    }

    mentions
}

fn clean_token(raw: &str) -> String {
    let trimmed = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '.');
    let trimmed = trimmed.trim_end_matches('.');
    let trimmed = trimmed
        .strip_suffix("'s")
        .or_else(|| trimmed.strip_suffix("’s"))
        .unwrap_or(trimmed);
    trimmed.to_string()
}

fn is_mention_word(token: &str) -> bool {
    let Some(first) = token.chars().next() else {
        return false;
    };
    if !first.is_uppercase() {
        return false;
    }
    let lower = token.to_lowercase();
    !STOPWORDS.contains(&lower.as_str()) && label_for_noun(&lower).is_none()
}

// ── Rendering ────────────────────────────────────────────────────

/// Everything a template needs to render.
#[derive(Debug, Clone)]
pub struct RenderInput<'a> {
    pub kind: TemplateKind,
    pub namespace: &'a TenantNamespace,
    /// Label for the primary node; must come from [`LABELS`].
    pub label: Option<&'static str>,
    pub relationship_type: Option<&'static str>,
    /// Canonical (or unresolved) names, at most two are used.
    pub names: &'a [String],
    pub period: Option<Period>,
    pub limit: u32,
    pub now: DateTime<Utc>,
}

fn node(var: &str, label: Option<&str>, namespace: &TenantNamespace) -> String {
    let label = label.map(|l| format!(":{l}")).unwrap_or_default();
    format!("({var}{label} {{namespace: '{namespace}'}})")
}

fn rel(var: &str, relationship_type: Option<&str>) -> String {
    let rtype = relationship_type.map(|t| format!(":{t}")).unwrap_or_default();
    format!("[{var}{rtype}]")
}

const NAME_MATCHES: &str = "toLower(e.name) = toLower($name)";

/// Templates whose query text always binds `$name`; they cannot render
/// without at least one mention.
pub fn requires_name(kind: TemplateKind) -> bool {
    matches!(kind, TemplateKind::EntityLookup)
}

/// Render the template to query text plus parameters.
///
/// `GeneratedQuery` construction is left to the caller; `Generative` has no
/// template and renders as an entity listing.
pub fn render(input: &RenderInput<'_>) -> (String, QueryParams) {
    let ns = input.namespace;
    let mut params = QueryParams::new();
    let name = input.names.first();
    let limit = input.limit;

    let text = match input.kind {
        TemplateKind::EntityLookup => {
            if let Some(name) = name {
                params.insert("name".into(), Value::String(name.clone()));
            }
            format!(
                "MATCH {} WHERE {NAME_MATCHES} OPTIONAL MATCH (e)-[r]-(related) RETURN e, r, related LIMIT {limit}",
                node("e", input.label, ns)
            )
        }
        TemplateKind::RelationshipQuery => match input.names {
            [source, target, ..] => {
                params.insert("source".into(), Value::String(source.clone()));
                params.insert("target".into(), Value::String(target.clone()));
                format!(
                    "MATCH {}-{}-(b) WHERE toLower(a.name) = toLower($source) AND toLower(b.name) = toLower($target) RETURN a, r, b LIMIT {limit}",
                    node("a", None, ns),
                    rel("r", input.relationship_type)
                )
            }
            [name] => {
                params.insert("name".into(), Value::String(name.clone()));
                let other = input.label.map(|l| format!(":{l}")).unwrap_or_default();
                format!(
                    "MATCH {}-{}-(b{other}) WHERE toLower(a.name) = toLower($name) RETURN a, r, b LIMIT {limit}",
                    node("a", None, ns),
                    rel("r", input.relationship_type)
                )
            }
            [] => format!(
                "MATCH {}-{}-(b) RETURN a, r, b LIMIT {limit}",
                node("a", input.label, ns),
                rel("r", input.relationship_type)
            ),
        },
        TemplateKind::TemporalQuery => {
            let since = input
                .period
                .map(|p| p.start(input.now))
                .unwrap_or_else(|| input.now - Duration::days(DEFAULT_LOOKBACK_DAYS));
            match name {
                Some(name) => {
                    params.insert("name".into(), Value::String(name.clone()));
                    let window = if input.period.is_some() {
                        params.insert("since".into(), Value::String(iso(since)));
                        " AND coalesce(r.created_at, related.created_at) >= $since"
                    } else {
                        ""
                    };
                    format!(
                        "MATCH {}-[r]-(related) WHERE {NAME_MATCHES}{window} RETURN e, r, related ORDER BY coalesce(r.created_at, related.created_at) DESC LIMIT {limit}",
                        node("e", None, ns)
                    )
                }
                None => {
                    params.insert("since".into(), Value::String(iso(since)));
                    format!(
                        "MATCH {} WHERE e.created_at >= $since RETURN e ORDER BY e.created_at DESC LIMIT {limit}",
                        node("e", input.label, ns)
                    )
                }
            }
        }
        TemplateKind::ListQuery | TemplateKind::Generative => match name {
            Some(name) => {
                params.insert("name".into(), Value::String(name.clone()));
                format!(
                    "MATCH {}-[r]-(m) WHERE toLower(m.name) = toLower($name) RETURN e, r, m LIMIT {limit}",
                    node("e", input.label, ns)
                )
            }
            None => format!(
                "MATCH {} RETURN e ORDER BY e.name LIMIT {limit}",
                node("e", input.label, ns)
            ),
        },
        TemplateKind::CountQuery => match name {
            Some(name) => {
                params.insert("name".into(), Value::String(name.clone()));
                let other = input.label.map(|l| format!(":{l}")).unwrap_or_default();
                format!(
                    "MATCH {}-[r]-(m{other}) WHERE {NAME_MATCHES} RETURN count(DISTINCT m) AS count LIMIT 1",
                    node("e", None, ns)
                )
            }
            None => format!(
                "MATCH {} RETURN count(e) AS count LIMIT 1",
                node("e", input.label, ns)
            ),
        },
    };

    (text, params)
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::validate;

    fn ns() -> TenantNamespace {
        TenantNamespace::new("alice").unwrap()
    }

    #[test]
    fn test_all_rules_compile() {
        assert_eq!(RULES.len(), RULE_SOURCES.len());
        assert_eq!(RELATIONSHIP_RULES.len(), RELATIONSHIP_PHRASES.len());
        assert_eq!(PERIODS.len(), 4);
        assert!(QUOTED.is_some());
        assert!(SINCE_DATE.is_some());
    }

    #[test]
    fn test_classification() {
        let kind = |q: &str| classify(q).map(|c| c.kind);
        assert_eq!(kind("Who is Sarah?"), Some(TemplateKind::EntityLookup));
        assert_eq!(kind("Tell me about Acme Corp"), Some(TemplateKind::EntityLookup));
        assert_eq!(kind("How many people do I know?"), Some(TemplateKind::CountQuery));
        assert_eq!(kind("What did I do last week?"), Some(TemplateKind::TemporalQuery));
        assert_eq!(kind("When did I meet Bob?"), Some(TemplateKind::TemporalQuery));
        assert_eq!(kind("How is Sarah connected to Bob?"), Some(TemplateKind::RelationshipQuery));
        assert_eq!(kind("Who knows Bob?"), Some(TemplateKind::RelationshipQuery));
        assert_eq!(kind("List all projects"), Some(TemplateKind::ListQuery));
        assert_eq!(kind("Show me all companies"), Some(TemplateKind::ListQuery));
        assert_eq!(kind("DELETE everything"), None);
        assert_eq!(kind("Summarize my graph"), None);
    }

    #[test]
    fn test_hints() {
        let c = classify("How many companies has Sarah worked for?").unwrap();
        assert_eq!(c.label, Some("Organization"));
        assert_eq!(c.relationship_type, Some("WORKS_AT"));

        assert_eq!(detect_relationship_type("Who does Sarah work with?"), Some("WORKS_WITH"));
        assert_eq!(detect_relationship_type("Who does Sarah like?"), None);
        assert_eq!(detect_period("anything recent"), None);
        assert_eq!(detect_period("what happened last month"), Some(Period::LastDays(30)));
        assert_eq!(
            detect_period("events since 2024-03-01"),
            NaiveDate::from_ymd_opt(2024, 3, 1).map(Period::Since)
        );
        assert_eq!(allowed_label("person"), Some("Person"));
        assert_eq!(allowed_label("Spaceship"), None);
    }

    #[test]
    fn test_extract_mentions() {
        assert_eq!(extract_mentions("Who is Sarah?"), vec!["Sarah"]);
        assert_eq!(
            extract_mentions("How is Sarah Johnson connected to Bob?"),
            vec!["Sarah Johnson", "Bob"]
        );
        assert_eq!(
            extract_mentions("Tell me about \"project x\" and Dr. Smith's team"),
            vec!["project x", "Dr Smith"]
        );
        assert_eq!(extract_mentions("List all Projects since March"), Vec::<String>::new());
        assert_eq!(extract_mentions("who is sarah"), Vec::<String>::new());
    }

    fn render_all(names: &[String]) -> Vec<(String, QueryParams)> {
        let namespace = ns();
        TemplateKind::CATALOG
            .iter()
            .map(|&kind| {
                render(&RenderInput {
                    kind,
                    namespace: &namespace,
                    label: Some("Person"),
                    relationship_type: Some("KNOWS"),
                    names,
                    period: Some(Period::LastDays(7)),
                    limit: 50,
                    now: Utc::now(),
                })
            })
            .collect()
    }

    #[test]
    fn test_every_rendering_passes_validation() {
        let name_sets: [Vec<String>; 3] = [
            vec![],
            vec!["Sarah Johnson".into()],
            vec!["Sarah Johnson".into(), "Bob".into()],
        ];
        for names in &name_sets {
            for (text, _) in render_all(names) {
                let verdict = validate(&text, &ns());
                assert!(verdict.ok, "{text} -> {:?}", verdict.error_code);
            }
        }
    }

    #[test]
    fn test_user_values_stay_in_parameters() {
        let hostile = vec!["x'}) DETACH DELETE e //".to_string()];
        for (text, params) in render_all(&hostile) {
            assert!(!text.contains("DETACH"), "{text}");
            if !params.is_empty() {
                assert!(params.values().any(|v| v == &Value::String(hostile[0].clone())));
            }
            assert!(validate(&text, &ns()).ok);
        }
    }

    #[test]
    fn test_entity_lookup_shape() {
        let namespace = ns();
        let names = vec!["Sarah Johnson".to_string()];
        let (text, params) = render(&RenderInput {
            kind: TemplateKind::EntityLookup,
            namespace: &namespace,
            label: Some("Person"),
            relationship_type: None,
            names: &names,
            period: None,
            limit: 50,
            now: Utc::now(),
        });
        assert_eq!(
            text,
            "MATCH (e:Person {namespace: 'alice'}) WHERE toLower(e.name) = toLower($name) OPTIONAL MATCH (e)-[r]-(related) RETURN e, r, related LIMIT 50"
        );
        assert_eq!(params.get("name"), Some(&Value::String("Sarah Johnson".into())));
    }

    #[test]
    fn test_count_shape() {
        let namespace = ns();
        let (text, params) = render(&RenderInput {
            kind: TemplateKind::CountQuery,
            namespace: &namespace,
            label: Some("Person"),
            relationship_type: None,
            names: &[],
            period: None,
            limit: 1,
            now: Utc::now(),
        });
        assert_eq!(
            text,
            "MATCH (e:Person {namespace: 'alice'}) RETURN count(e) AS count LIMIT 1"
        );
        assert!(params.is_empty());
    }
}
