//! Static read-only and tenant-scoping policy for query text.
//!
//! Runs on every query before it may reach the pool, whether a template or
//! the generative fallback produced it. The checks work on tokens, not raw
//! substrings, so keywords inside string literals, backtick identifiers,
//! comments, property names, map keys, and labels do not count.

use std::collections::HashSet;

use graphmind_core::{TenantNamespace, ValidationCode, ValidationVerdict, MAX_RESULT_LIMIT};

/// Mutating clauses. `DETACH DELETE` is caught by `DELETE`.
const DESTRUCTIVE_KEYWORDS: &[&str] = &["CREATE", "MERGE", "SET", "DELETE", "REMOVE", "DROP"];

/// Property name carrying the tenant namespace on every node.
pub const NAMESPACE_PROPERTY: &str = "namespace";

// ── Tokenizer ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Bare identifier or keyword.
    Ident(String),
    /// `` `quoted identifier` ``.
    Quoted(String),
    /// String literal contents, escapes resolved.
    Str(String),
    Number(String),
    /// `$name`.
    Param(String),
    Punct(char),
}

/// A token with its byte span in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub(crate) fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct(c)
    }

    pub(crate) fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(s) => Some(s),
            _ => None,
        }
    }
}

/// Split Cypher text into tokens. Comments and whitespace are dropped.
///
/// Total: unterminated strings, comments, and backticks run to the end of
/// the input rather than failing.
pub fn tokenize(text: &str) -> Vec<Token> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let end_of = |i: usize| chars.get(i).map(|&(b, _)| b).unwrap_or(text.len());
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (start, c) = chars[i];
        let next = chars.get(i + 1).map(|&(_, n)| n);

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Comments.
        if c == '/' && next == Some('/') {
            while i < chars.len() && chars[i].1 != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && next == Some('*') {
            i += 2;
            while i < chars.len() && !(chars[i].1 == '*' && chars.get(i + 1).map(|p| p.1) == Some('/')) {
                i += 1;
            }
            i = (i + 2).min(chars.len());
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            let mut value = String::new();
            i += 1;
            while i < chars.len() {
                let ch = chars[i].1;
                if ch == '\\' {
                    if let Some(&(_, escaped)) = chars.get(i + 1) {
                        value.push(escaped);
                    }
                    i += 2;
                    continue;
                }
                if ch == quote {
                    i += 1;
                    break;
                }
                value.push(ch);
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Str(value),
                start,
                end: end_of(i),
            });
            continue;
        }

        if c == '`' {
            let mut value = String::new();
            i += 1;
            while i < chars.len() {
                let ch = chars[i].1;
                if ch == '`' {
                    // A doubled backtick is an escaped backtick.
                    if chars.get(i + 1).map(|p| p.1) == Some('`') {
                        value.push('`');
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                value.push(ch);
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Quoted(value),
                start,
                end: end_of(i),
            });
            continue;
        }

        if c == '$' {
            let mut j = i + 1;
            while j < chars.len() && is_ident_char(chars[j].1) {
                j += 1;
            }
            let name: String = chars[i + 1..j].iter().map(|&(_, ch)| ch).collect();
            tokens.push(Token {
                kind: TokenKind::Param(name),
                start,
                end: end_of(j),
            });
            i = j.max(i + 1);
            continue;
        }

        if c.is_ascii_digit() {
            let mut j = i;
            while j < chars.len() && (chars[j].1.is_ascii_alphanumeric() || chars[j].1 == '.') {
                // `1..3` is a range, not a float.
                if chars[j].1 == '.' && chars.get(j + 1).map(|p| p.1) == Some('.') {
                    break;
                }
                j += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Number(text[start..end_of(j)].to_string()),
                start,
                end: end_of(j),
            });
            i = j;
            continue;
        }

        if is_ident_start(c) {
            let mut j = i;
            while j < chars.len() && is_ident_char(chars[j].1) {
                j += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Ident(text[start..end_of(j)].to_string()),
                start,
                end: end_of(j),
            });
            i = j;
            continue;
        }

        tokens.push(Token {
            kind: TokenKind::Punct(c),
            start,
            end: end_of(i + 1),
        });
        i += 1;
    }

    tokens
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

// ── Clause Scanners ──────────────────────────────────────────────

/// One tenant-scoping clause.
struct ScopeClause {
    value: String,
    /// `e` in `e.namespace = '...'`; `None` for a `{namespace: '...'}` map entry.
    variable: Option<String>,
}

fn variable_name(tok: &Token) -> Option<&str> {
    match &tok.kind {
        TokenKind::Ident(s) | TokenKind::Quoted(s) => Some(s),
        _ => None,
    }
}

/// The scoping clause whose `namespace` token is at `i`, if there is one.
fn scope_clause_at(tokens: &[Token], i: usize) -> Option<ScopeClause> {
    if tokens.get(i)?.ident() != Some(NAMESPACE_PROPERTY) {
        return None;
    }
    let prev = i.checked_sub(1).and_then(|p| tokens.get(p));
    let next = tokens.get(i + 1);

    let is_map_entry = prev.is_some_and(|p| p.is_punct('{') || p.is_punct(','))
        && next.is_some_and(|n| n.is_punct(':'));
    let compared = (prev.is_some_and(|p| p.is_punct('.'))
        && i >= 2
        && next.is_some_and(|n| n.is_punct('='))
        // `<>`, `>=` and `<=` already fail the `=` check; `==` is not Cypher.
        && !tokens.get(i + 2).is_some_and(|n| n.is_punct('=')))
    .then(|| variable_name(&tokens[i - 2]))
    .flatten();

    if !is_map_entry && compared.is_none() {
        return None;
    }
    let Some(Token {
        kind: TokenKind::Str(value),
        ..
    }) = tokens.get(i + 2)
    else {
        return None;
    };
    Some(ScopeClause {
        value: value.clone(),
        variable: if is_map_entry { None } else { compared.map(str::to_string) },
    })
}

/// Values of every tenant-scoping clause in the text:
/// `{namespace: '<v>'}` map entries and `<var>.namespace = '<v>'` comparisons.
pub fn namespace_clauses(tokens: &[Token]) -> Vec<String> {
    (0..tokens.len())
        .filter_map(|i| scope_clause_at(tokens, i))
        .map(|c| c.value)
        .collect()
}

/// Keywords that close the pattern part of a `MATCH` clause.
const PATTERN_END_KEYWORDS: &[&str] = &[
    "WHERE", "RETURN", "WITH", "MATCH", "OPTIONAL", "ORDER", "SKIP", "LIMIT", "UNWIND", "CALL",
    "UNION", "YIELD", "FOREACH", "DETACH",
];

/// One comma-separated path of a `MATCH` pattern.
#[derive(Default)]
struct PathPattern {
    nodes: usize,
    variables: Vec<String>,
    /// A node of this path carries the `{namespace: ...}` map entry.
    scoped: bool,
}

impl PathPattern {
    /// Record the node pattern between the parentheses at `open` and `close`.
    fn node(&mut self, tokens: &[Token], open: usize, close: usize) {
        self.nodes += 1;
        if let [first, rest @ ..] = &tokens[open + 1..close] {
            let bound = rest
                .first()
                .map_or(true, |t| t.is_punct(':') || t.is_punct('{'));
            if let Some(var) = variable_name(first).filter(|_| bound) {
                self.variables.push(var.to_string());
            }
        }
        if (open + 1..close).any(|k| scope_clause_at(tokens, k).is_some_and(|c| c.variable.is_none())) {
            self.scoped = true;
        }
    }
}

fn is_pattern_end(tokens: &[Token], j: usize) -> bool {
    let tok = &tokens[j];
    tok.is_punct(';')
        || tok.ident().is_some_and(|w| {
            (PATTERN_END_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(w))
                || DESTRUCTIVE_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(w)))
                && is_keyword_position(tokens, j)
        })
}

/// Every path of every `MATCH` / `OPTIONAL MATCH` clause.
fn match_patterns(tokens: &[Token]) -> Vec<PathPattern> {
    let mut paths = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        if !tok.ident().is_some_and(|w| w.eq_ignore_ascii_case("MATCH")) || !is_keyword_position(tokens, i) {
            continue;
        }
        let mut current = PathPattern::default();
        let mut depth = 0usize;
        let mut node_open = None;
        for j in i + 1..tokens.len() {
            let tok = &tokens[j];
            if depth == 0 {
                if is_pattern_end(tokens, j) {
                    break;
                }
                if tok.is_punct(',') {
                    paths.push(std::mem::take(&mut current));
                    continue;
                }
            }
            match &tok.kind {
                TokenKind::Punct(c @ ('(' | '[' | '{')) => {
                    if depth == 0 && *c == '(' {
                        node_open = Some(j);
                    }
                    depth += 1;
                }
                TokenKind::Punct(c @ (')' | ']' | '}')) => {
                    // Closes a block the clause is nested in, e.g. `EXISTS { MATCH ... }`.
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    if depth == 0 && *c == ')' {
                        if let Some(open) = node_open.take() {
                            current.node(tokens, open, j);
                        }
                    }
                }
                _ => {}
            }
        }
        paths.push(current);
    }
    paths.retain(|p| p.nodes > 0);
    paths
}

/// True when every matched path reaches the tenant clause: it holds the
/// scoped node, or shares a variable with a path (or `WHERE` comparison)
/// that does. `MATCH (a {namespace: 't'}), (b)` leaves `b` unscoped.
fn every_pattern_anchored(tokens: &[Token]) -> bool {
    let mut anchored: HashSet<String> = (0..tokens.len())
        .filter_map(|i| scope_clause_at(tokens, i))
        .filter_map(|c| c.variable)
        .collect();
    let paths = match_patterns(tokens);
    let mut pending: Vec<&PathPattern> = paths.iter().collect();
    loop {
        let before = pending.len();
        pending.retain(|p| {
            if p.scoped || p.variables.iter().any(|v| anchored.contains(v)) {
                anchored.extend(p.variables.iter().cloned());
                false
            } else {
                true
            }
        });
        if pending.is_empty() || pending.len() == before {
            return pending.is_empty();
        }
    }
}

/// True when a bare identifier is used as a clause keyword rather than a
/// property name (`x.set`), map key (`{set: 1}`), or label (`:Set`).
fn is_keyword_position(tokens: &[Token], i: usize) -> bool {
    let prev = i.checked_sub(1).and_then(|p| tokens.get(p));
    let next = tokens.get(i + 1);
    if prev.is_some_and(|p| p.is_punct('.') || p.is_punct(':')) {
        return false;
    }
    if next.is_some_and(|n| n.is_punct(':')) {
        return false;
    }
    true
}

/// First destructive keyword in clause position, if any.
pub fn find_destructive_keyword(tokens: &[Token]) -> Option<String> {
    tokens.iter().enumerate().find_map(|(i, tok)| {
        let word = tok.ident()?;
        let is_destructive = DESTRUCTIVE_KEYWORDS
            .iter()
            .any(|k| k.eq_ignore_ascii_case(word));
        (is_destructive && is_keyword_position(tokens, i)).then(|| word.to_uppercase())
    })
}

/// Indexes of `LIMIT` keywords in clause position.
pub fn limit_positions(tokens: &[Token]) -> Vec<usize> {
    tokens
        .iter()
        .enumerate()
        .filter(|(i, tok)| {
            tok.ident().is_some_and(|w| w.eq_ignore_ascii_case("LIMIT"))
                && is_keyword_position(tokens, *i)
        })
        .map(|(i, _)| i)
        .collect()
}

/// Exactly one `LIMIT <int>` as the terminal clause, value within bounds.
fn has_terminal_limit(tokens: &[Token]) -> bool {
    let positions = limit_positions(tokens);
    let [pos] = positions.as_slice() else {
        return false;
    };
    let Some(Token {
        kind: TokenKind::Number(raw),
        ..
    }) = tokens.get(pos + 1)
    else {
        return false;
    };
    let Ok(value) = raw.parse::<u32>() else {
        return false;
    };
    if value > MAX_RESULT_LIMIT {
        return false;
    }
    match &tokens[pos + 2..] {
        [] => true,
        [semi] => semi.is_punct(';'),
        _ => false,
    }
}

// ── Validation ───────────────────────────────────────────────────

/// Check `text` against the policy, in order: tenant scoping, then
/// read-only, then bounded result size. The first failure wins.
pub fn validate(text: &str, namespace: &TenantNamespace) -> ValidationVerdict {
    let tokens = tokenize(text);

    let clauses = namespace_clauses(&tokens);
    if clauses.len() != 1 || clauses[0] != namespace.as_str() || !every_pattern_anchored(&tokens) {
        return ValidationVerdict::rejected(ValidationCode::MissingNamespace);
    }

    if find_destructive_keyword(&tokens).is_some() {
        return ValidationVerdict::rejected(ValidationCode::DestructiveOperation);
    }

    if !has_terminal_limit(&tokens) {
        return ValidationVerdict::rejected(ValidationCode::UnboundedQuery);
    }

    ValidationVerdict::cleared()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(s: &str) -> TenantNamespace {
        TenantNamespace::new(s).unwrap()
    }

    fn code(text: &str) -> Option<ValidationCode> {
        validate(text, &ns("alice")).error_code
    }

    #[test]
    fn test_tokenize_basics() {
        let toks = tokenize("MATCH (e:Person {name: 'O\\'Brien'}) RETURN e.name LIMIT 5");
        let kinds: Vec<_> = toks.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(kinds[0], TokenKind::Ident("MATCH".into()));
        assert!(kinds.contains(&TokenKind::Str("O'Brien".into())));
        assert_eq!(kinds.last(), Some(&TokenKind::Number("5".into())));
    }

    #[test]
    fn test_tokenize_spans_cover_source() {
        let text = "MATCH (n {namespace: 'a'}) RETURN n";
        for tok in tokenize(text) {
            assert!(tok.start < tok.end && tok.end <= text.len());
        }
        let toks = tokenize(text);
        assert_eq!(&text[toks[0].start..toks[0].end], "MATCH");
    }

    #[test]
    fn test_accepts_map_clause() {
        let verdict = validate(
            "MATCH (e:Person {namespace: 'alice'}) RETURN e LIMIT 50",
            &ns("alice"),
        );
        assert!(verdict.ok);
        assert!(verdict.error_code.is_none());
    }

    #[test]
    fn test_accepts_comparison_clause_and_semicolon() {
        assert_eq!(
            code("MATCH (e) WHERE e.namespace = 'alice' RETURN e LIMIT 10;"),
            None
        );
    }

    #[test]
    fn test_missing_namespace() {
        assert_eq!(
            code("MATCH (e) RETURN e LIMIT 10"),
            Some(ValidationCode::MissingNamespace)
        );
        // Wrong tenant.
        assert_eq!(
            code("MATCH (e {namespace: 'bob'}) RETURN e LIMIT 10"),
            Some(ValidationCode::MissingNamespace)
        );
        // Two clauses, even if one matches.
        assert_eq!(
            code("MATCH (a {namespace: 'alice'}), (b {namespace: 'bob'}) RETURN a LIMIT 10"),
            Some(ValidationCode::MissingNamespace)
        );
        // Inside a string literal it is not a clause.
        assert_eq!(
            code("MATCH (e) WHERE e.note = \"{namespace: 'alice'}\" RETURN e LIMIT 10"),
            Some(ValidationCode::MissingNamespace)
        );
        // Inequality is not scoping.
        assert_eq!(
            code("MATCH (e) WHERE e.namespace <> 'alice' RETURN e LIMIT 10"),
            Some(ValidationCode::MissingNamespace)
        );
    }

    #[test]
    fn test_every_matched_path_must_reach_the_tenant() {
        for text in [
            "MATCH (a {namespace: 'alice'}), (b) RETURN b LIMIT 5",
            "MATCH (a {namespace: 'alice'}) MATCH (b:Person) RETURN b LIMIT 5",
            "MATCH (a {namespace: 'alice'}) OPTIONAL MATCH (x)-[r]-(y) RETURN y LIMIT 5",
            "MATCH (e) WHERE e.namespace = 'alice' MATCH (other) RETURN other LIMIT 5",
        ] {
            assert_eq!(code(text), Some(ValidationCode::MissingNamespace), "{text}");
        }
        for text in [
            "MATCH (a {namespace: 'alice'}), (a)-[:KNOWS]->(b) RETURN b LIMIT 5",
            "MATCH (e:Person {namespace: 'alice'}) WHERE toLower(e.name) = toLower($name) OPTIONAL MATCH (e)-[r]-(related) RETURN e, r, related LIMIT 50",
            "MATCH (a)-[r]-(b) WHERE a.namespace = 'alice' RETURN b LIMIT 5",
            "MATCH (b)-[:KNOWS]-(c) MATCH (a {namespace: 'alice'})-[:WORKS_WITH]-(b) RETURN c LIMIT 5",
            "MATCH p = ({namespace: 'alice'})-[*1..2]-(x) RETURN p LIMIT 5",
            "MATCH (`my node` {namespace: 'alice'}), (`my node`)-->(m) RETURN m LIMIT 5",
        ] {
            assert_eq!(code(text), None, "{text}");
        }
    }

    #[test]
    fn test_destructive_keywords() {
        for text in [
            "MATCH (n {namespace: 'alice'}) DETACH DELETE n LIMIT 1",
            "MATCH (n {namespace: 'alice'}) SET n.x = 1 RETURN n LIMIT 1",
            "MATCH (n {namespace: 'alice'}) REMOVE n.x RETURN n LIMIT 1",
            "MATCH (n {namespace: 'alice'}) create (m) RETURN m LIMIT 1",
            "MERGE (n {namespace: 'alice'}) RETURN n LIMIT 1",
            "MATCH (n {namespace: 'alice'}) WITH n DROP INDEX ON :Person(name) LIMIT 1",
        ] {
            assert_eq!(code(text), Some(ValidationCode::DestructiveOperation), "{text}");
        }
    }

    #[test]
    fn test_keywords_in_literals_and_names_are_allowed() {
        for text in [
            "MATCH (n {namespace: 'alice'}) WHERE n.title = 'DELETE me' RETURN n LIMIT 5",
            "MATCH (n {namespace: 'alice'}) RETURN n.set, n.created LIMIT 5",
            "MATCH (n:Set {namespace: 'alice'}) RETURN n LIMIT 5",
            "MATCH (n {namespace: 'alice', create: true}) RETURN n LIMIT 5",
            "MATCH (n {namespace: 'alice'}) RETURN n.`delete` AS `DROP` LIMIT 5",
            "MATCH (n {namespace: 'alice'}) // DELETE n\nRETURN n LIMIT 5",
            "MATCH (n {namespace: 'alice'}) /* MERGE */ RETURN n.createdAt LIMIT 5",
            "MATCH (n {namespace: 'alice'})-[:CREATED]->(m) RETURN m LIMIT 5",
        ] {
            assert_eq!(code(text), None, "{text}");
        }
    }

    #[test]
    fn test_limit_rules() {
        assert_eq!(
            code("MATCH (n {namespace: 'alice'}) RETURN n"),
            Some(ValidationCode::UnboundedQuery)
        );
        assert_eq!(
            code("MATCH (n {namespace: 'alice'}) RETURN n LIMIT 201"),
            Some(ValidationCode::UnboundedQuery)
        );
        assert_eq!(
            code("MATCH (n {namespace: 'alice'}) RETURN n LIMIT 200"),
            None
        );
        // Not terminal.
        assert_eq!(
            code("MATCH (n {namespace: 'alice'}) WITH n LIMIT 10 RETURN n"),
            Some(ValidationCode::UnboundedQuery)
        );
        // Two limits.
        assert_eq!(
            code("MATCH (n {namespace: 'alice'}) WITH n LIMIT 10 RETURN n LIMIT 10"),
            Some(ValidationCode::UnboundedQuery)
        );
        // Parameterized limit cannot be checked statically.
        assert_eq!(
            code("MATCH (n {namespace: 'alice'}) RETURN n LIMIT $n"),
            Some(ValidationCode::UnboundedQuery)
        );
        assert_eq!(
            code("MATCH (n {namespace: 'alice'}) RETURN n LIMIT 5.5"),
            Some(ValidationCode::UnboundedQuery)
        );
        // A property called limit is not a clause.
        assert_eq!(
            code("MATCH (n {namespace: 'alice'}) RETURN n.limit LIMIT 3"),
            None
        );
    }

    #[test]
    fn test_checks_run_in_order() {
        // Missing namespace wins over destructive and unbounded.
        assert_eq!(
            code("MATCH (n) DELETE n"),
            Some(ValidationCode::MissingNamespace)
        );
        // Destructive wins over unbounded.
        assert_eq!(
            code("MATCH (n {namespace: 'alice'}) DELETE n"),
            Some(ValidationCode::DestructiveOperation)
        );
    }
}
