//! Trace reconstruction.
//!
//! Given a trace (or RPC) id, returns every correlated entry ordered by
//! timestamp across all log types, grouped into a tree by the RPC id
//! hierarchy: an RPC id whose value extends another entry's RPC id is
//! treated as its child. When no hierarchy is derivable the grouping is
//! flat.

use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::LogEntry;
use crate::storage::{MetadataStore, OlapStore};
use crate::utils::{ApiError, ApiResult};

use super::require_complete_job;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TraceNode {
    pub rpc_id: String,
    pub entries: Vec<LogEntry>,
    pub children: Vec<TraceNode>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TraceResponse {
    pub trace_id: String,
    pub total: usize,
    /// All entries in timestamp order, regardless of grouping.
    pub entries: Vec<LogEntry>,
    pub tree: Vec<TraceNode>,
}

pub struct TraceService {
    metadata: Arc<dyn MetadataStore>,
    olap: Arc<dyn OlapStore>,
}

impl TraceService {
    pub fn new(metadata: Arc<dyn MetadataStore>, olap: Arc<dyn OlapStore>) -> Self {
        Self { metadata, olap }
    }

    pub async fn reconstruct(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        trace_id: &str,
    ) -> ApiResult<TraceResponse> {
        require_complete_job(&self.metadata, tenant_id, job_id).await?;

        let entries = self.olap.trace(tenant_id, job_id, trace_id).await?;
        if entries.is_empty() {
            return Err(ApiError::not_found(format!("trace {}", trace_id)));
        }

        let tree = build_tree(&entries);
        Ok(TraceResponse {
            trace_id: trace_id.to_string(),
            total: entries.len(),
            entries,
            tree,
        })
    }
}

/// Group by RPC id, nesting a group under the longest other RPC id that
/// prefixes it. Entries without an RPC id form a flat root group.
pub fn build_tree(entries: &[LogEntry]) -> Vec<TraceNode> {
    let mut order: Vec<String> = Vec::new();
    for entry in entries {
        if !order.contains(&entry.rpc_id) {
            order.push(entry.rpc_id.clone());
        }
    }

    let parent_of = |rpc: &str| -> Option<String> {
        if rpc.is_empty() {
            return None;
        }
        order
            .iter()
            .filter(|candidate| {
                !candidate.is_empty() && candidate.as_str() != rpc && rpc.starts_with(candidate.as_str())
            })
            .max_by_key(|candidate| candidate.len())
            .cloned()
    };

    let mut nodes: Vec<(String, TraceNode)> = order
        .iter()
        .map(|rpc| {
            (
                rpc.clone(),
                TraceNode {
                    rpc_id: rpc.clone(),
                    entries: entries
                        .iter()
                        .filter(|e| &e.rpc_id == rpc)
                        .cloned()
                        .collect(),
                    children: Vec::new(),
                },
            )
        })
        .collect();

    // Attach children to parents from the most deeply nested upward so each
    // child is complete before its parent absorbs it.
    let mut roots: Vec<TraceNode> = Vec::new();
    while let Some((rpc, node)) = nodes.pop() {
        match parent_of(&rpc) {
            Some(parent_rpc) => {
                if let Some((_, parent)) = nodes.iter_mut().find(|(r, _)| *r == parent_rpc) {
                    parent.children.insert(0, node);
                } else if let Some(parent) = find_node(&mut roots, &parent_rpc) {
                    parent.children.insert(0, node);
                } else {
                    roots.insert(0, node);
                }
            }
            None => roots.insert(0, node),
        }
    }
    roots
}

fn find_node<'a>(nodes: &'a mut [TraceNode], rpc_id: &str) -> Option<&'a mut TraceNode> {
    for node in nodes {
        if node.rpc_id == rpc_id {
            return Some(node);
        }
        if let Some(found) = find_node(&mut node.children, rpc_id) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogType;
    use chrono::Utc;

    fn entry(rpc: &str) -> LogEntry {
        let mut e = LogEntry::blank(Uuid::nil(), Uuid::nil(), 1, Utc::now(), LogType::Api);
        e.rpc_id = rpc.to_string();
        e
    }

    #[test]
    fn nests_extended_rpc_ids() {
        let entries = vec![entry("001"), entry("001.2"), entry("001.2.1"), entry("002")];
        let tree = build_tree(&entries);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].rpc_id, "001");
        assert_eq!(tree[0].children[0].rpc_id, "001.2");
        assert_eq!(tree[0].children[0].children[0].rpc_id, "001.2.1");
        assert_eq!(tree[1].rpc_id, "002");
    }

    #[test]
    fn flat_when_no_hierarchy() {
        let entries = vec![entry("a"), entry("b"), entry("c")];
        let tree = build_tree(&entries);
        assert_eq!(tree.len(), 3);
        assert!(tree.iter().all(|n| n.children.is_empty()));
    }

    #[test]
    fn empty_rpc_ids_form_a_root_group() {
        let entries = vec![entry(""), entry("")];
        let tree = build_tree(&entries);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].entries.len(), 2);
    }
}
