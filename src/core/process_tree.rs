//! Per-cycle process index and parent/child tree.
//!
//! One identity scan feeds a [`ProcessIndex`], which answers relationship
//! queries without rescanning. The tree view is built from the same index.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::source::ProcessIdentity;

/// Snapshot of every live identity with parent and group lookups.
///
/// Valid for one polling cycle only; processes keep changing underneath it.
#[derive(Debug, Clone, Default)]
pub struct ProcessIndex {
    by_pid: BTreeMap<u32, ProcessIdentity>,
    children: HashMap<u32, Vec<u32>>,
    groups: HashMap<u32, Vec<u32>>,
}

impl ProcessIndex {
    pub fn from_identities<I: IntoIterator<Item = ProcessIdentity>>(identities: I) -> Self {
        let by_pid: BTreeMap<u32, ProcessIdentity> =
            identities.into_iter().map(|id| (id.pid, id)).collect();

        // by_pid iterates in pid order, so every list below is sorted
        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut groups: HashMap<u32, Vec<u32>> = HashMap::new();
        for identity in by_pid.values() {
            children
                .entry(identity.parent_pid)
                .or_default()
                .push(identity.pid);
            groups.entry(identity.group_id).or_default().push(identity.pid);
        }

        Self {
            by_pid,
            children,
            groups,
        }
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessIdentity> {
        self.by_pid.get(&pid)
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.by_pid.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.by_pid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pid.is_empty()
    }

    pub fn identities(&self) -> impl Iterator<Item = &ProcessIdentity> {
        self.by_pid.values()
    }

    pub fn children_of(&self, pid: u32) -> &[u32] {
        self.children.get(&pid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn group_members(&self, group_id: u32) -> &[u32] {
        self.groups.get(&group_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Members of `pid`'s group (`pid` included); empty if `pid` is unknown
    pub fn group_peers_of(&self, pid: u32) -> &[u32] {
        match self.by_pid.get(&pid) {
            Some(identity) => self.group_members(identity.group_id),
            None => &[],
        }
    }
}

/// A node in the process tree
#[derive(Debug, Clone)]
pub struct ProcessTreeNode {
    pub process: ProcessIdentity,
    pub children: Vec<ProcessTreeNode>,
    pub depth: usize,
}

/// Build the parent/child forest. A process whose parent is not in the
/// index is a root.
pub fn build_process_tree(index: &ProcessIndex) -> Vec<ProcessTreeNode> {
    let mut visited = HashSet::new();
    let mut roots = Vec::new();

    for identity in index.identities() {
        let is_root =
            identity.parent_pid == identity.pid || !index.contains(identity.parent_pid);
        if is_root {
            roots.push(build_node(identity, index, 0, &mut visited));
        }
    }

    roots
}

fn build_node(
    process: &ProcessIdentity,
    index: &ProcessIndex,
    depth: usize,
    visited: &mut HashSet<u32>,
) -> ProcessTreeNode {
    visited.insert(process.pid);

    let mut children = Vec::new();
    for &child in index.children_of(process.pid) {
        // a pid reused mid-scan can close a loop
        if visited.contains(&child) {
            continue;
        }
        if let Some(identity) = index.get(child) {
            children.push(build_node(identity, index, depth + 1, visited));
        }
    }

    ProcessTreeNode {
        process: process.clone(),
        children,
        depth,
    }
}

/// A flattened process with indentation information
#[derive(Debug, Clone)]
pub struct FlattenedProcess {
    pub process: ProcessIdentity,
    pub depth: usize,
    pub is_last: bool,
    pub parent_chain: Vec<bool>,
}

/// Flatten a process tree into display order
pub fn flatten_tree(tree: &[ProcessTreeNode]) -> Vec<FlattenedProcess> {
    let mut result = Vec::new();
    for node in tree {
        flatten_node(node, &mut result, true, Vec::new());
    }
    result
}

fn flatten_node(
    node: &ProcessTreeNode,
    result: &mut Vec<FlattenedProcess>,
    is_last: bool,
    parent_chain: Vec<bool>,
) {
    result.push(FlattenedProcess {
        process: node.process.clone(),
        depth: node.depth,
        is_last,
        parent_chain: parent_chain.clone(),
    });

    let count = node.children.len();
    for (i, child) in node.children.iter().enumerate() {
        let mut chain = parent_chain.clone();
        if node.depth > 0 {
            chain.push(is_last);
        }
        flatten_node(child, result, i + 1 == count, chain);
    }
}

/// Tree glyphs for one row, `pstree` style
pub fn format_tree_indent(flattened: &FlattenedProcess) -> String {
    let mut indent = String::new();

    for &ancestor_is_last in &flattened.parent_chain {
        indent.push_str(if ancestor_is_last { "   " } else { "│  " });
    }

    if flattened.depth > 0 {
        indent.push_str(if flattened.is_last { "└─ " } else { "├─ " });
    }

    indent
}
