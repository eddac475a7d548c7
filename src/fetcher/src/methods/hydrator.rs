//! Hydrator: walks the JSON rows the stored function returns and
//! applies the three per-node fixups the compiler's SQL shape requires —
//! value-column conversion, id-child normalization, and data-child
//! sort/recursion — driven by the same [`QueryNode`] the compiler walked.

use serde_json::{json, Map, Value};

use schema::{RelationKind, ResolvedRelation, Schema, SqlType};

use crate::methods::query_tree::QueryNode;
use crate::Result;

/// Converts a raw driver value for one own column into its domain form.
/// The default hook only touches [`SqlType::DateIso`] columns; callers with
/// richer domain types (money, enums, ...) supply their own.
pub trait ValueHydrator {
    fn hydrate(&self, sql_type: SqlType, value: Value) -> Value;
}

pub struct DefaultValueHydrator;

impl ValueHydrator for DefaultValueHydrator {
    fn hydrate(&self, sql_type: SqlType, value: Value) -> Value {
        match sql_type {
            SqlType::DateIso => match value.as_str().and_then(|s| {
                chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
            }) {
                Some(d) => Value::String(d.format("%Y-%m-%d").to_string()),
                None => value,
            },
            _ => value,
        }
    }
}

pub struct Hydrator<'a> {
    schema: &'a Schema,
    value_hydrator: &'a dyn ValueHydrator,
}

impl<'a> Hydrator<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            value_hydrator: &DefaultValueHydrator,
        }
    }

    pub fn with_value_hydrator(schema: &'a Schema, value_hydrator: &'a dyn ValueHydrator) -> Self {
        Self { schema, value_hydrator }
    }

    /// Hydrates every row in place, returning the same rows.
    pub fn hydrate_rows(&self, node: &QueryNode, rows: Vec<Value>) -> Result<Vec<Value>> {
        rows.into_iter()
            .map(|mut row| {
                if let Value::Object(ref mut obj) = row {
                    self.hydrate_node(node, obj)?;
                }
                Ok(row)
            })
            .collect()
    }

    fn hydrate_node(&self, node: &QueryNode, obj: &mut Map<String, Value>) -> Result<()> {
        let meta = node.meta();

        for col in &meta.columns {
            if let Some(v) = obj.get(&col.property_name).cloned() {
                let hydrated = self.value_hydrator.hydrate(col.sql_type, v);
                obj.insert(col.property_name.clone(), hydrated);
            }
        }

        if let QueryNode::Data { children, .. } = node {
            for (rel_name, child) in children {
                let rel = meta
                    .relation(rel_name)
                    .expect("tree builder only emits children for real relations");
                match child {
                    QueryNode::Ids { .. } => {
                        let id_prop = self.schema.get_id_property_name(meta, rel_name)?;
                        self.hydrate_id_child(obj, rel, id_prop);
                    }
                    QueryNode::Data { .. } => {
                        self.hydrate_data_child(child, obj, rel, rel_name)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn hydrate_id_child(&self, obj: &mut Map<String, Value>, rel: &ResolvedRelation, id_prop: &str) {
        if rel.kind.is_to_many() {
            let mut ids: Vec<i64> = match obj.get(id_prop) {
                Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_i64()).collect(),
                _ => Vec::new(),
            };
            ids.sort_unstable();
            ids.dedup();
            obj.insert(id_prop.to_string(), json!(ids));
        } else if matches!(obj.get(id_prop), None | Some(Value::Null)) {
            obj.remove(id_prop);
        }
    }

    fn hydrate_data_child(
        &self,
        child: &QueryNode,
        obj: &mut Map<String, Value>,
        rel: &ResolvedRelation,
        rel_name: &str,
    ) -> Result<()> {
        let junction_own_key = match rel.kind {
            RelationKind::ManyToMany => rel.junction.as_ref().map(|j| j.own_key.as_str()),
            _ => None,
        };

        if rel.kind.is_to_many() {
            let mut items: Vec<Value> = match obj.remove(rel_name) {
                Some(Value::Array(items)) => items.into_iter().filter(|v| !v.is_null()).collect(),
                _ => Vec::new(),
            };
            for item in &mut items {
                if let Value::Object(ref mut m) = item {
                    self.hydrate_node(child, m)?;
                    if let Some(own_key) = junction_own_key {
                        m.remove(own_key);
                    }
                }
            }
            items.sort_by_key(|v| v.get("id").and_then(|v| v.as_i64()).unwrap_or_default());
            obj.insert(rel_name.to_string(), Value::Array(items));
        } else {
            match obj.remove(rel_name) {
                None | Some(Value::Null) => {}
                Some(mut v) => {
                    if let Value::Object(ref mut m) = v {
                        self.hydrate_node(child, m)?;
                        if let Some(own_key) = junction_own_key {
                            m.remove(own_key);
                        }
                    }
                    obj.insert(rel_name.to_string(), v);
                }
            }
        }

        Ok(())
    }
}
