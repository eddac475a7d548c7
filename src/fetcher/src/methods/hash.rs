//! Tree hashing: a stable fingerprint over a compiled [`QueryNode`],
//! used to name its cached stored function.

use crate::methods::query_tree::QueryNode;
use schema::EntityMeta;
use std::collections::VecDeque;

fn meta_desc(meta: &EntityMeta) -> String {
    let props: Vec<&str> = meta.columns.iter().map(|c| c.property_name.as_str()).collect();
    let rels: Vec<String> = meta
        .relations
        .iter()
        .map(|r| {
            format!(
                "{}:{}:{}:{}:{}",
                r.property_name, meta.table_path, r.inverse_entity, r.kind.as_str(), r.is_owning
            )
        })
        .collect();
    format!(
        "{}:{}:{}",
        meta.table_path,
        props.join(":"),
        rels.join(",")
    )
}

/// Java-style 32-bit polynomial string hash: `h = 31*h + code`.
fn poly_hash(s: &str) -> i32 {
    let mut h: i32 = 0;
    for c in s.chars() {
        h = h.wrapping_mul(31).wrapping_add(c as i32);
    }
    h
}

/// Breadth-first traversal of `root`, concatenating each node's
/// `"<kind>-<alias>-<metaDesc>"` description, then a stable 32-bit hash of
/// the result, rendered as a non-negative decimal string safe to embed in a
/// SQL identifier.
pub fn tree_hash(root: &QueryNode) -> String {
    let mut pieces = Vec::new();
    let mut queue: VecDeque<&QueryNode> = VecDeque::new();
    queue.push_back(root);

    while let Some(node) = queue.pop_front() {
        let common = node.common();
        let kind = match node {
            QueryNode::Data { .. } => "data",
            QueryNode::Ids { .. } => "ids",
        };
        pieces.push(format!("{kind}-{}-{}", common.alias, meta_desc(&common.meta)));

        if let QueryNode::Data { children, .. } = node {
            for (_, child) in children {
                queue.push_back(child);
            }
        }
    }

    let joined = pieces.join(":");
    let h = poly_hash(&joined).unsigned_abs();
    h.to_string()
        .chars()
        .map(|c| if c.is_ascii_digit() { c } else { '0' })
        .collect()
}
