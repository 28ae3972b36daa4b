//! Dataflow IR for loop-level optimization of slice-processing composites.
//!
//! Nodes live in an arena indexed by integer id; producer/consumer edges and
//! fusion-group membership are id lists, never owning pointers, so cyclic
//! def-use structure and deep cloning stay simple.

pub mod build;
pub mod fuse;

use serde::{Deserialize, Serialize};

use crate::types::ElemType;

/// Kind of a dataflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, Serialize, Deserialize)]
pub enum NodeKind {
    Loop,
    Alloc,
    Load,
    Store,
    Elementwise,
    Reduction,
    Broadcast,
    Scalar,
    Call,
}

/// Iteration space of a loop, compared textually.
///
/// Two ranges are compatible exactly when all three components render the
/// same; anything cleverer (affine equivalence) is out of scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoopRange {
    pub start: String,
    pub end: String,
    pub stride: String,
}

impl LoopRange {
    pub fn compatible(&self, other: &Self) -> bool {
        self == other
    }
}

/// One node in the dataflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: usize,
    pub kind: NodeKind,
    /// Names this node defines (variables, buffers).
    pub outputs: Vec<String>,
    /// Names this node reads. Stores list their buffer here too, so a
    /// buffer's allocation sees its writer as a consumer.
    pub inputs: Vec<String>,
    /// Populated by [`analyze`]; ids of nodes producing this node's inputs.
    pub producers: Vec<usize>,
    /// Populated by [`analyze`]; ids of nodes consuming this node's outputs.
    pub consumers: Vec<usize>,
    pub loop_range: Option<LoopRange>,
    /// The enclosing loop's node id, for nodes nested in a loop body.
    pub parent_loop: Option<usize>,
    /// Fusion group membership; a node belongs to at most one group.
    pub group: Option<usize>,
    /// Execution position among top-level nodes; nested nodes carry `None`.
    pub exec_pos: Option<usize>,
    /// Abstract op name for elementwise/reduction/call nodes.
    pub op: Option<String>,
    pub has_single_consumer: bool,
    /// Set by the fusion post-pass on loads/stores made dead by buffer
    /// elimination.
    pub dead: bool,
}

impl Node {
    fn new(id: usize, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            outputs: Vec::new(),
            inputs: Vec::new(),
            producers: Vec::new(),
            consumers: Vec::new(),
            loop_range: None,
            parent_loop: None,
            group: None,
            exec_pos: None,
            op: None,
            has_single_consumer: false,
            dead: false,
        }
    }
}

/// A set of nodes collapsed into a single loop body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionGroup {
    pub id: usize,
    pub members: Vec<usize>,
    /// The execution-last member: the largest member id that bears an
    /// execution position.
    pub root: usize,
    pub loop_range: Option<LoopRange>,
    pub eliminated_allocs: Vec<usize>,
    /// Label of the rule or post-pass that formed the group.
    pub pattern: String,
}

impl FusionGroup {
    /// Number of loop nodes in the group; drives the pass statistics.
    pub fn loops_in_group(&self, func: &IRFunction) -> usize {
        self.members
            .iter()
            .filter(|&&id| func.node(id).kind == NodeKind::Loop)
            .count()
    }
}

/// Serializable fusion summary for one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionStats {
    pub function: String,
    pub original_passes: usize,
    pub fused_passes: usize,
    pub groups: usize,
    pub eliminated_allocs: usize,
}

/// A function lowered to the dataflow IR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IRFunction {
    pub name: String,
    pub elem: ElemType,
    pub nodes: Vec<Node>,
    pub groups: Vec<FusionGroup>,
}

impl IRFunction {
    pub fn new(name: impl Into<String>, elem: ElemType) -> Self {
        Self {
            name: name.into(),
            elem,
            nodes: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Node lookup by id. Ids equal vector indices except in renumbered
    /// clones, where lookup falls back to a scan.
    pub fn node(&self, id: usize) -> &Node {
        match self.nodes.get(id) {
            Some(n) if n.id == id => n,
            _ => self.nodes.iter().find(|n| n.id == id).expect("node id present"),
        }
    }

    pub fn node_mut(&mut self, id: usize) -> &mut Node {
        let index = match self.nodes.get(id) {
            Some(n) if n.id == id => id,
            _ => self
                .nodes
                .iter()
                .position(|n| n.id == id)
                .expect("node id present"),
        };
        &mut self.nodes[index]
    }

    pub(crate) fn push_node(&mut self, kind: NodeKind) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::new(id, kind));
        id
    }

    /// Rebuilds producer/consumer links from the name-based def-use chains
    /// and refreshes `has_single_consumer`.
    pub fn analyze(&mut self) {
        for node in &mut self.nodes {
            node.producers.clear();
            node.consumers.clear();
        }
        let n = self.nodes.len();
        for consumer in 0..n {
            let inputs = self.nodes[consumer].inputs.clone();
            for input in &inputs {
                // The most recent earlier definition wins.
                let producer = (0..consumer)
                    .rev()
                    .find(|&p| self.nodes[p].outputs.iter().any(|o| o == input));
                if let Some(producer) = producer
                    && producer != consumer
                {
                    if !self.nodes[consumer].producers.contains(&producer) {
                        self.nodes[consumer].producers.push(producer);
                    }
                    if !self.nodes[producer].consumers.contains(&consumer) {
                        self.nodes[producer].consumers.push(consumer);
                    }
                }
            }
        }
        for node in &mut self.nodes {
            node.has_single_consumer = node.consumers.len() == 1;
        }
    }

    /// Pass statistics per the fusion accounting rules:
    /// `original = loops + allocs`, and each group saves one pass per extra
    /// loop plus one per eliminated allocation.
    pub fn stats(&self) -> FusionStats {
        let loops = self.nodes.iter().filter(|n| n.kind == NodeKind::Loop).count();
        let allocs = self.nodes.iter().filter(|n| n.kind == NodeKind::Alloc).count();
        let original_passes = loops + allocs;
        let mut saved = 0usize;
        let mut eliminated = 0usize;
        for group in &self.groups {
            saved += group.loops_in_group(self).saturating_sub(1);
            eliminated += group.eliminated_allocs.len();
        }
        FusionStats {
            function: self.name.clone(),
            original_passes,
            fused_passes: original_passes - saved - eliminated,
            groups: self.groups.len(),
            eliminated_allocs: eliminated,
        }
    }

    /// Deep-copies the function, renumbering node ids by `offset` and
    /// rewiring every id reference through the same map. The clone aliases
    /// nothing from the original.
    pub fn clone_renumbered(&self, offset: usize) -> Self {
        let map = |id: usize| id + offset;
        let mut out = Self::new(self.name.clone(), self.elem);
        out.nodes = self
            .nodes
            .iter()
            .map(|n| {
                let mut n = n.clone();
                n.id = map(n.id);
                n.producers = n.producers.iter().copied().map(map).collect();
                n.consumers = n.consumers.iter().copied().map(map).collect();
                n.parent_loop = n.parent_loop.map(map);
                n
            })
            .collect();
        out.groups = self
            .groups
            .iter()
            .map(|g| {
                let mut g = g.clone();
                g.members = g.members.iter().copied().map(map).collect();
                g.root = map(g.root);
                g.eliminated_allocs = g.eliminated_allocs.iter().copied().map(map).collect();
                g
            })
            .collect();
        out
    }

    /// Rewrites call nodes whose op equals a function-parameter name so they
    /// point at the resolved argument instead. Used by higher-order
    /// resolution after cloning the host.
    pub fn rewrite_param_calls(&mut self, param: &str, replacement_op: &str, replacement_kind: NodeKind) {
        for node in &mut self.nodes {
            if node.kind == NodeKind::Call && node.op.as_deref() == Some(param) {
                node.op = Some(replacement_op.to_owned());
                node.kind = replacement_kind;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_node(func: &mut IRFunction, outputs: &[&str], inputs: &[&str]) -> usize {
        let id = func.push_node(NodeKind::Scalar);
        func.nodes[id].outputs = outputs.iter().map(|s| (*s).to_owned()).collect();
        func.nodes[id].inputs = inputs.iter().map(|s| (*s).to_owned()).collect();
        id
    }

    #[test]
    fn analysis_links_most_recent_definition() {
        let mut f = IRFunction::new("t", ElemType::F32);
        let a = scalar_node(&mut f, &["x"], &[]);
        let b = scalar_node(&mut f, &["x"], &["x"]);
        let c = scalar_node(&mut f, &["y"], &["x"]);
        f.analyze();
        assert_eq!(f.node(c).producers, vec![b], "redefinition shadows the first x");
        assert_eq!(f.node(a).consumers, vec![b]);
        assert!(f.node(b).has_single_consumer);
    }

    #[test]
    fn clone_renumbered_rewires_all_ids() {
        let mut f = IRFunction::new("t", ElemType::F32);
        let a = scalar_node(&mut f, &["x"], &[]);
        let b = scalar_node(&mut f, &["y"], &["x"]);
        f.analyze();
        let clone = f.clone_renumbered(10);
        assert_eq!(clone.nodes[0].id, 10);
        assert_eq!(clone.nodes[b].producers, vec![a + 10]);
        assert_eq!(clone.nodes[a].consumers, vec![b + 10]);
        assert_eq!(clone.node(a + 10).id, a + 10, "lookup follows renumbered ids");
    }
}
