//! Normalizes result rows into the canonical entity/relationship payload.
//!
//! Row shapes handled:
//! - graph values: nodes, edges, paths, and arrays of them
//! - relationship triples: `source` / `relationship` / `target` columns
//!   holding names or nodes
//! - scalar entity rows: `name` (plus optional `type` / `id`) columns
//! - aggregates: rows of bare scalars from any template; a `count` column
//!   (or the first integer of a count query) also sets `metadata.count`
//!
//! Formatting never fails. Values it cannot interpret are skipped, and
//! an edge whose endpoints are not both in the result is dropped, so every
//! relationship's `source` and `target` appear in `entities`.

use std::collections::{HashMap, HashSet};

use graphmind_core::{Entity, FormattedResult, Relationship, ResultMetadata, TemplateKind};
use graphmind_graph::QueryResponse;
use serde_json::{Map, Value};
use uuid::Uuid;

const DEFAULT_ENTITY_TYPE: &str = "Entity";
const DEFAULT_RELATIONSHIP_TYPE: &str = "RELATED_TO";
const RELATIONSHIP_COLUMNS: [&str; 3] = ["relationship", "relationship_type", "type"];

/// Build a [`FormattedResult`] from a decoded response.
pub fn format(
    response: &QueryResponse,
    template: TemplateKind,
    execution_time_ms: f64,
    cached: bool,
) -> FormattedResult {
    let mut collector = Collector::default();
    for row in &response.rows {
        collector.row(row, template);
    }
    let (entities, relationships, count, aggregates) = collector.finish();

    FormattedResult {
        metadata: ResultMetadata {
            entity_count: entities.len(),
            relationship_count: relationships.len(),
            execution_time_ms,
            cached,
            template_used: template,
            count,
            aggregates,
        },
        entities,
        relationships,
    }
}

/// Edge seen before all of its endpoint nodes have been.
struct PendingEdge {
    src_node: i64,
    dest_node: i64,
    relationship_type: String,
    properties: Map<String, Value>,
}

#[derive(Default)]
struct Collector {
    entities: Vec<Entity>,
    entity_index: HashMap<String, usize>,
    /// Database-internal node id -> entity id.
    node_ids: HashMap<i64, String>,
    pending: Vec<PendingEdge>,
    seen_edges: HashSet<i64>,
    relationships: Vec<Relationship>,
    seen_relationships: HashSet<(String, String, String)>,
    count: Option<i64>,
    aggregates: Vec<Map<String, Value>>,
}

impl Collector {
    fn row(&mut self, row: &Map<String, Value>, template: TemplateKind) {
        if self.triple_row(row) || self.scalar_entity_row(row) || self.aggregate_row(row, template) {
            return;
        }
        for (column, value) in row {
            if is_count_column(column) {
                if let Some(n) = value.as_i64() {
                    self.count = Some(n);
                    continue;
                }
            }
            self.value(value);
        }
    }

    /// Rows holding only scalars, whichever template produced them.
    ///
    /// An integer in a `count` / `count(...)` column, or the first integer
    /// of a count query, becomes `count`. Anything else is kept verbatim in
    /// `aggregates`.
    fn aggregate_row(&mut self, row: &Map<String, Value>, template: TemplateKind) -> bool {
        let values: Map<String, Value> = row
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if values.is_empty() || values.values().any(|v| v.is_object() || v.is_array()) {
            return false;
        }

        let counted = values
            .iter()
            .find(|(k, v)| is_count_column(k) && v.is_i64())
            .or_else(|| {
                (template == TemplateKind::CountQuery)
                    .then(|| values.iter().find(|(_, v)| v.is_i64()))
                    .flatten()
            })
            .and_then(|(_, v)| v.as_i64());
        if let Some(n) = counted {
            self.count.get_or_insert(n);
            if values.len() == 1 {
                return true;
            }
        }
        self.aggregates.push(values);
        true
    }

    /// `source` / `relationship` / `target` columns. Endpoints may be nodes or names.
    fn triple_row(&mut self, row: &Map<String, Value>) -> bool {
        let (Some(source), Some(target)) = (column(row, "source"), column(row, "target")) else {
            return false;
        };
        let relation = RELATIONSHIP_COLUMNS.iter().find_map(|c| column(row, c));
        if relation.is_none() {
            return false;
        }

        let source_id = self.endpoint(source, column(row, "source_type"));
        let target_id = self.endpoint(target, column(row, "target_type"));
        let (Some(source_id), Some(target_id)) = (source_id, target_id) else {
            // Treated as handled; a triple with a null end has nothing to link.
            return true;
        };

        let (relationship_type, properties) = match relation {
            Some(Value::String(s)) => (s.clone(), Map::new()),
            Some(edge) if is_edge(edge) => (
                edge.get("type")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_RELATIONSHIP_TYPE)
                    .to_string(),
                properties_of(edge),
            ),
            _ => (DEFAULT_RELATIONSHIP_TYPE.to_string(), Map::new()),
        };
        self.push_relationship(Relationship {
            source: source_id,
            target: target_id,
            relationship_type,
            properties,
        });
        true
    }

    fn endpoint(&mut self, value: &Value, type_hint: Option<&Value>) -> Option<String> {
        match value {
            Value::Null => None,
            Value::Object(_) if is_node(value) => self.node(value),
            other => {
                let name = scalar_text(other)?;
                let entity_type = type_hint
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_ENTITY_TYPE);
                Some(self.push_entity(Entity {
                    id: synthesized_id(&name),
                    entity_type: entity_type.to_string(),
                    name,
                    properties: Map::new(),
                }))
            }
        }
    }

    /// Rows of bare scalars naming one entity, e.g. `RETURN e.name AS name, labels(e)[0] AS type`.
    fn scalar_entity_row(&mut self, row: &Map<String, Value>) -> bool {
        let Some(name) = column(row, "name").and_then(scalar_text) else {
            return false;
        };
        if row.values().any(|v| is_node(v) || is_edge(v) || is_path(v)) {
            return false;
        }
        let id = column(row, "id")
            .and_then(scalar_text)
            .unwrap_or_else(|| synthesized_id(&name));
        let entity_type = column(row, "type")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_ENTITY_TYPE)
            .to_string();
        let properties = row
            .iter()
            .filter(|(k, v)| !matches!(k.to_ascii_lowercase().as_str(), "id" | "name" | "type") && !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.push_entity(Entity {
            id,
            entity_type,
            name,
            properties,
        });
        true
    }

    fn value(&mut self, value: &Value) {
        match value {
            Value::Array(items) => items.iter().for_each(|v| self.value(v)),
            v if is_path(v) => {
                for key in ["nodes", "edges"] {
                    if let Some(items) = v.get(key) {
                        self.value(items);
                    }
                }
            }
            v if is_node(v) => {
                self.node(v);
            }
            v if is_edge(v) => self.edge(v),
            // Stray scalars (e.g. `RETURN e.age`) carry no entity identity.
            _ => {}
        }
    }

    fn node(&mut self, value: &Value) -> Option<String> {
        let internal = value.get("id").and_then(Value::as_i64);
        let mut properties = properties_of(value);
        properties.remove("namespace");

        let id = properties
            .get("id")
            .and_then(scalar_text)
            .or_else(|| internal.map(|i| i.to_string()))?;
        let name = properties
            .get("name")
            .and_then(scalar_text)
            .unwrap_or_else(|| id.clone());
        let entity_type = value
            .get("labels")
            .and_then(Value::as_array)
            .and_then(|labels| labels.first())
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_ENTITY_TYPE)
            .to_string();

        let id = self.push_entity(Entity {
            id,
            entity_type,
            name,
            properties,
        });
        if let Some(internal) = internal {
            self.node_ids.insert(internal, id.clone());
        }
        Some(id)
    }

    fn edge(&mut self, value: &Value) {
        let (Some(src_node), Some(dest_node)) = (
            value.get("src_node").and_then(Value::as_i64),
            value.get("dest_node").and_then(Value::as_i64),
        ) else {
            return;
        };
        if let Some(internal) = value.get("id").and_then(Value::as_i64) {
            if !self.seen_edges.insert(internal) {
                return;
            }
        }
        self.pending.push(PendingEdge {
            src_node,
            dest_node,
            relationship_type: value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_RELATIONSHIP_TYPE)
                .to_string(),
            properties: properties_of(value),
        });
    }

    /// Returns the id the entity is stored under. First occurrence wins.
    fn push_entity(&mut self, entity: Entity) -> String {
        let id = entity.id.clone();
        if !self.entity_index.contains_key(&id) {
            self.entity_index.insert(id.clone(), self.entities.len());
            self.entities.push(entity);
        }
        id
    }

    fn push_relationship(&mut self, relationship: Relationship) {
        let key = (
            relationship.source.clone(),
            relationship.target.clone(),
            relationship.relationship_type.clone(),
        );
        if self.seen_relationships.insert(key) {
            self.relationships.push(relationship);
        }
    }

    fn finish(mut self) -> (Vec<Entity>, Vec<Relationship>, Option<i64>, Vec<Map<String, Value>>) {
        // Endpoints are resolved once every row has been seen.
        for edge in std::mem::take(&mut self.pending) {
            let endpoints = (
                self.node_ids.get(&edge.src_node).cloned(),
                self.node_ids.get(&edge.dest_node).cloned(),
            );
            match endpoints {
                (Some(source), Some(target)) => self.push_relationship(Relationship {
                    source,
                    target,
                    relationship_type: edge.relationship_type,
                    properties: edge.properties,
                }),
                _ => tracing::debug!(
                    src_node = edge.src_node,
                    dest_node = edge.dest_node,
                    "Dropping edge with an endpoint outside the result"
                ),
            }
        }
        (self.entities, self.relationships, self.count, self.aggregates)
    }
}

fn column<'a>(row: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    row.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
        .filter(|v| !v.is_null())
}

fn is_count_column(name: &str) -> bool {
    let name = name.trim().to_ascii_lowercase();
    name == "count" || name.starts_with("count(")
}

fn is_node(value: &Value) -> bool {
    value.get("labels").is_some_and(Value::is_array) && value.get("src_node").is_none()
}

fn is_edge(value: &Value) -> bool {
    value.get("src_node").is_some() && value.get("dest_node").is_some()
}

fn is_path(value: &Value) -> bool {
    value.get("nodes").is_some_and(Value::is_array) && value.get("edges").is_some_and(Value::is_array)
}

fn properties_of(value: &Value) -> Map<String, Value> {
    value
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Stable id for an entity known only by name.
fn synthesized_id(name: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.trim().to_lowercase().as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(columns: &[&str], rows: Vec<Value>) -> QueryResponse {
        QueryResponse {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .into_iter()
                .map(|r| r.as_object().cloned().unwrap_or_default())
                .collect(),
            statistics: vec![],
            execution_time_ms: Some(0.4),
        }
    }

    fn person(internal: i64, id: &str, name: &str) -> Value {
        json!({
            "id": internal,
            "labels": ["Person"],
            "properties": {"id": id, "name": name, "namespace": "alice"}
        })
    }

    fn edge(internal: i64, kind: &str, src: i64, dest: i64) -> Value {
        json!({
            "id": internal,
            "type": kind,
            "src_node": src,
            "dest_node": dest,
            "properties": {"since": 2020}
        })
    }

    fn assert_closed(result: &FormattedResult) {
        let ids: HashSet<&str> = result.entities.iter().map(|e| e.id.as_str()).collect();
        for rel in &result.relationships {
            assert!(ids.contains(rel.source.as_str()), "dangling source {}", rel.source);
            assert!(ids.contains(rel.target.as_str()), "dangling target {}", rel.target);
        }
    }

    #[test]
    fn test_empty_rows() {
        let result = format(&response(&["e"], vec![]), TemplateKind::EntityLookup, 0.1, false);
        assert!(result.entities.is_empty());
        assert!(result.relationships.is_empty());
        assert_eq!(result.metadata.entity_count, 0);
        assert_eq!(result.metadata.relationship_count, 0);
        assert_eq!(result.metadata.count, None);

        let encoded = serde_json::to_value(&result).unwrap();
        assert_eq!(encoded["entities"], json!([]));
        assert_eq!(encoded["relationships"], json!([]));
    }

    #[test]
    fn test_entity_lookup_rows_dedupe() {
        let rows = vec![
            json!({"e": person(0, "p1", "Sarah Johnson"), "r": edge(10, "WORKS_WITH", 0, 1), "related": person(1, "p2", "Tom Lee")}),
            json!({"e": person(0, "p1", "Sarah Johnson"), "r": edge(11, "KNOWS", 2, 0), "related": person(2, "p3", "Ana Diaz")}),
            json!({"e": person(0, "p1", "Sarah Johnson"), "r": null, "related": null}),
        ];
        let result = format(&response(&["e", "r", "related"], rows), TemplateKind::EntityLookup, 2.0, false);

        assert_eq!(result.entities.len(), 3);
        assert_eq!(result.entities[0].id, "p1");
        assert_eq!(result.entities[0].entity_type, "Person");
        assert_eq!(result.entities[0].name, "Sarah Johnson");
        assert!(!result.entities[0].properties.contains_key("namespace"));

        assert_eq!(result.relationships.len(), 2);
        assert_eq!(result.relationships[0].source, "p1");
        assert_eq!(result.relationships[0].target, "p2");
        assert_eq!(result.relationships[0].relationship_type, "WORKS_WITH");
        assert_eq!(result.relationships[0].properties["since"], json!(2020));
        assert_eq!(result.relationships[1].source, "p3");
        assert_eq!(result.metadata.entity_count, 3);
        assert_eq!(result.metadata.relationship_count, 2);
        assert_closed(&result);
    }

    #[test]
    fn test_edge_before_its_nodes_is_resolved() {
        let rows = vec![json!({"r": edge(5, "KNOWS", 0, 1), "a": person(0, "p1", "A"), "b": person(1, "p2", "B")})];
        let result = format(&response(&["r", "a", "b"], rows), TemplateKind::RelationshipQuery, 1.0, false);
        assert_eq!(result.relationships.len(), 1);
        assert_closed(&result);
    }

    #[test]
    fn test_edge_with_missing_endpoint_is_dropped() {
        let rows = vec![json!({"a": person(0, "p1", "A"), "r": edge(5, "KNOWS", 0, 99)})];
        let result = format(&response(&["a", "r"], rows), TemplateKind::RelationshipQuery, 1.0, false);
        assert_eq!(result.entities.len(), 1);
        assert!(result.relationships.is_empty());
    }

    #[test]
    fn test_node_without_id_property_uses_internal_id() {
        let node = json!({"id": 7, "labels": [], "properties": {}});
        let result = format(&response(&["n"], vec![json!({"n": node})]), TemplateKind::ListQuery, 1.0, false);
        assert_eq!(result.entities[0].id, "7");
        assert_eq!(result.entities[0].name, "7");
        assert_eq!(result.entities[0].entity_type, "Entity");
    }

    #[test]
    fn test_paths_are_flattened() {
        let path = json!({
            "nodes": [person(0, "p1", "A"), person(1, "p2", "B"), person(2, "p3", "C")],
            "edges": [edge(1, "KNOWS", 0, 1), edge(2, "KNOWS", 1, 2)]
        });
        let result = format(&response(&["p"], vec![json!({"p": path})]), TemplateKind::RelationshipQuery, 1.0, false);
        assert_eq!(result.entities.len(), 3);
        assert_eq!(result.relationships.len(), 2);
        assert_closed(&result);
    }

    #[test]
    fn test_scalar_triple_rows() {
        let rows = vec![
            json!({"source": "Sarah Johnson", "relationship": "WORKS_WITH", "target": "Tom Lee", "target_type": "Person"}),
            json!({"source": "Sarah Johnson", "relationship": "WORKS_AT", "target": "Acme", "target_type": "Organization"}),
            json!({"source": "sarah johnson", "relationship": "WORKS_AT", "target": "Acme", "target_type": "Organization"}),
        ];
        let result = format(
            &response(&["source", "relationship", "target", "target_type"], rows),
            TemplateKind::RelationshipQuery,
            1.0,
            false,
        );
        // Synthesized ids ignore case, so "sarah johnson" folds into "Sarah Johnson".
        assert_eq!(result.entities.len(), 3);
        assert_eq!(result.relationships.len(), 2);
        let acme = result.entities.iter().find(|e| e.name == "Acme").unwrap();
        assert_eq!(acme.entity_type, "Organization");
        assert_eq!(result.entities[0].entity_type, "Entity");
        assert_closed(&result);
    }

    #[test]
    fn test_triple_rows_with_node_endpoints() {
        let rows = vec![json!({
            "source": person(0, "p1", "A"),
            "type": "MANAGES",
            "target": person(1, "p2", "B")
        })];
        let result = format(&response(&["source", "type", "target"], rows), TemplateKind::RelationshipQuery, 1.0, false);
        assert_eq!(result.relationships[0].source, "p1");
        assert_eq!(result.relationships[0].target, "p2");
        assert_eq!(result.relationships[0].relationship_type, "MANAGES");
    }

    #[test]
    fn test_triple_with_null_end_is_skipped() {
        let rows = vec![json!({"source": "A", "relationship": "KNOWS", "target": null})];
        let result = format(&response(&["source", "relationship", "target"], rows), TemplateKind::RelationshipQuery, 1.0, false);
        assert!(result.relationships.is_empty());
        assert_closed(&result);
    }

    #[test]
    fn test_scalar_entity_rows() {
        let rows = vec![
            json!({"name": "Sarah Johnson", "type": "Person", "email": "s@example.com"}),
            json!({"name": "Acme", "type": "Organization", "email": null}),
        ];
        let result = format(&response(&["name", "type", "email"], rows), TemplateKind::ListQuery, 1.0, false);
        assert_eq!(result.entities.len(), 2);
        assert_eq!(result.entities[0].properties["email"], json!("s@example.com"));
        assert!(result.entities[1].properties.is_empty());
    }

    #[test]
    fn test_count_rows() {
        let result = format(
            &response(&["count"], vec![json!({"count": 42})]),
            TemplateKind::CountQuery,
            0.2,
            false,
        );
        assert_eq!(result.metadata.count, Some(42));
        assert!(result.entities.is_empty());

        let anonymous = format(
            &response(&["count(e)"], vec![json!({"count(e)": 7})]),
            TemplateKind::CountQuery,
            0.2,
            false,
        );
        assert_eq!(anonymous.metadata.count, Some(7));

        // Outside count queries an integer under another name is kept as an aggregate.
        let listed = format(
            &response(&["age"], vec![json!({"age": 30})]),
            TemplateKind::ListQuery,
            0.2,
            false,
        );
        assert_eq!(listed.metadata.count, None);
        assert_eq!(listed.metadata.aggregates, vec![json!({"age": 30}).as_object().cloned().unwrap()]);
    }

    #[test]
    fn test_generative_aggregates_are_kept() {
        let counted = format(
            &response(&["count(n)"], vec![json!({"count(n)": 5})]),
            TemplateKind::Generative,
            0.2,
            false,
        );
        assert_eq!(counted.metadata.count, Some(5));
        assert!(counted.metadata.aggregates.is_empty());

        let averaged = format(
            &response(&["avg_age"], vec![json!({"avg_age": 41.5})]),
            TemplateKind::Generative,
            0.2,
            false,
        );
        assert_eq!(averaged.metadata.count, None);
        assert_eq!(averaged.metadata.aggregates.len(), 1);
        assert_eq!(averaged.metadata.aggregates[0]["avg_age"], json!(41.5));
        assert!(averaged.entities.is_empty());

        let encoded = serde_json::to_value(&averaged).unwrap();
        assert_eq!(encoded["metadata"]["aggregates"], json!([{"avg_age": 41.5}]));
    }

    #[test]
    fn test_list_query_aggregates_are_kept() {
        let rows = vec![
            json!({"label": "Person", "total": 7}),
            json!({"label": "Organization", "total": 2}),
        ];
        let result = format(&response(&["label", "total"], rows), TemplateKind::ListQuery, 0.2, false);
        assert_eq!(result.metadata.count, None);
        assert_eq!(result.metadata.aggregates.len(), 2);
        assert_eq!(result.metadata.aggregates[0]["total"], json!(7));
        assert_eq!(result.metadata.aggregates[1]["label"], json!("Organization"));

        let total = format(
            &response(&["total"], vec![json!({"total": 7})]),
            TemplateKind::ListQuery,
            0.2,
            false,
        );
        assert_eq!(total.metadata.aggregates[0]["total"], json!(7));
    }

    #[test]
    fn test_count_next_to_graph_values() {
        let rows = vec![json!({"e": person(0, "p1", "A"), "count": 3})];
        let result = format(&response(&["e", "count"], rows), TemplateKind::Generative, 0.2, false);
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.metadata.count, Some(3));
        assert!(result.metadata.aggregates.is_empty());
    }

    #[test]
    fn test_metadata_passthrough() {
        let result = format(&response(&[], vec![]), TemplateKind::Generative, 3.25, true);
        assert!(result.metadata.cached);
        assert_eq!(result.metadata.execution_time_ms, 3.25);
        assert_eq!(result.metadata.template_used, TemplateKind::Generative);
    }
}
