//! Include tree construction (§4.4 "Include tree").

use crate::error::{Error, Result};
use crate::query_string::SortTerm;
use crate::schema::{CompiledResource, ResourceRegistry};

/// One node of the parsed `include=` tree.
#[derive(Clone, Debug, PartialEq)]
pub struct IncludeNode {
    /// Relationship alias on the parent resource.
    pub relationship: String,
    /// The resource this relationship targets.
    pub target_resource: String,
    pub children: Vec<IncludeNode>,
    /// Per-parent row cap on a to-many relationship, bounded by the global
    /// maximum page size (honored via parent-partitioned fetches, §4.5).
    pub per_parent_limit: Option<i64>,
    /// Ordering applied within each parent's group.
    pub order: Option<SortTerm>,
}

/// Build an include tree from dotted paths (already split by
/// [`crate::query_string::parse_query_string`]), failing if any path
/// exceeds `depth_limit` or names an unknown relationship
/// (Validator already runs the same check; this is the planner's
/// structural build step and re-validates defensively).
pub fn build_include_tree(
    paths: &[Vec<String>],
    resource: &CompiledResource,
    registry: &ResourceRegistry,
    depth_limit: u32,
) -> Result<Vec<IncludeNode>> {
    let mut roots: Vec<IncludeNode> = Vec::new();

    for path in paths {
        if path.len() as u32 > depth_limit {
            return Err(Error::validation(format!("/include/{}", path.join(".")), "max_depth"));
        }
        insert_path(&mut roots, path, resource, registry)?;
    }

    Ok(roots)
}

fn insert_path(
    siblings: &mut Vec<IncludeNode>,
    remaining: &[String],
    current_resource: &CompiledResource,
    registry: &ResourceRegistry,
) -> Result<()> {
    let Some((head, rest)) = remaining.split_first() else {
        return Ok(());
    };

    let relationship = current_resource
        .relationship(head)
        .ok_or_else(|| Error::validation(format!("/include/{}", head), "unknown_relationship"))?;
    let target_name = relationship
        .target()
        .ok_or_else(|| Error::validation(format!("/include/{}", head), "unknown_relationship"))?;
    let target_resource = registry.require(target_name)?;

    let position = siblings.iter().position(|n| &n.relationship == head);
    let index = match position {
        Some(i) => i,
        None => {
            siblings.push(IncludeNode {
                relationship: head.clone(),
                target_resource: target_name.to_string(),
                children: Vec::new(),
                per_parent_limit: None,
                order: None,
            });
            siblings.len() - 1
        }
    };

    insert_path(&mut siblings[index].children, rest, target_resource, registry)
}
