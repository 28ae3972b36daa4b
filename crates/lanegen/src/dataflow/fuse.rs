//! Loop-fusion rule engine.
//!
//! Rules are ordered by descending priority and applied to producer-consumer
//! candidate pairs until fixpoint. Termination holds because every
//! application moves at least one ungrouped node into a group. After the
//! rules, an extension pass absorbs range-compatible stragglers, and the
//! softmax post-pass coalesces cross-loop temporary-array chains.

use ahash::AHashSet;

use crate::dataflow::{FusionGroup, IRFunction, NodeKind};

/// A fusion rule: a match predicate over a producer-consumer pair plus a
/// fusability guard. Group formation itself is shared by the driver.
pub trait FusionRule {
    fn name(&self) -> &'static str;
    fn priority(&self) -> u32;
    fn matches(&self, f: &IRFunction, producer: usize, consumer: usize) -> bool;
    fn can_fuse(&self, f: &IRFunction, producer: usize, consumer: usize) -> bool {
        ranges_compatible(f, producer, consumer)
    }
}

struct AllocElim;
struct ElemReduce;
struct ElemElem;
struct LoadElem;
struct ElemStore;

impl FusionRule for AllocElim {
    fn name(&self) -> &'static str {
        "alloc-elim"
    }
    fn priority(&self) -> u32 {
        10
    }
    fn matches(&self, f: &IRFunction, producer: usize, _consumer: usize) -> bool {
        let p = f.node(producer);
        p.kind == NodeKind::Alloc && p.has_single_consumer
    }
    fn can_fuse(&self, _f: &IRFunction, _producer: usize, _consumer: usize) -> bool {
        true
    }
}

impl FusionRule for ElemReduce {
    fn name(&self) -> &'static str {
        "elem-reduce"
    }
    fn priority(&self) -> u32 {
        8
    }
    fn matches(&self, f: &IRFunction, producer: usize, consumer: usize) -> bool {
        f.node(producer).kind == NodeKind::Elementwise
            && f.node(consumer).kind == NodeKind::Reduction
            && f.node(producer).has_single_consumer
    }
}

impl FusionRule for ElemElem {
    fn name(&self) -> &'static str {
        "elem-elem"
    }
    fn priority(&self) -> u32 {
        6
    }
    fn matches(&self, f: &IRFunction, producer: usize, consumer: usize) -> bool {
        f.node(producer).kind == NodeKind::Elementwise && f.node(consumer).kind == NodeKind::Elementwise
    }
}

impl FusionRule for LoadElem {
    fn name(&self) -> &'static str {
        "load-elem"
    }
    fn priority(&self) -> u32 {
        4
    }
    fn matches(&self, f: &IRFunction, producer: usize, consumer: usize) -> bool {
        f.node(producer).kind == NodeKind::Load
            && f.node(consumer).kind == NodeKind::Elementwise
            && f.node(producer).has_single_consumer
    }
    fn can_fuse(&self, _f: &IRFunction, _producer: usize, _consumer: usize) -> bool {
        true
    }
}

impl FusionRule for ElemStore {
    fn name(&self) -> &'static str {
        "elem-store"
    }
    fn priority(&self) -> u32 {
        2
    }
    fn matches(&self, f: &IRFunction, producer: usize, consumer: usize) -> bool {
        f.node(producer).kind == NodeKind::Elementwise && f.node(consumer).kind == NodeKind::Store
    }
}

/// The built-in rule set, highest priority first.
pub fn built_in_rules() -> Vec<Box<dyn FusionRule>> {
    let mut rules: Vec<Box<dyn FusionRule>> =
        vec![Box::new(AllocElim), Box::new(ElemReduce), Box::new(ElemElem), Box::new(LoadElem), Box::new(ElemStore)];
    rules.sort_by(|a, b| b.priority().cmp(&a.priority()));
    rules
}

/// Runs the rule engine to fixpoint, then extension and the softmax
/// post-pass. Node group fields and `func.groups` are updated in place.
pub fn fuse(func: &mut IRFunction) {
    let rules = built_in_rules();
    loop {
        let pairs = candidate_pairs(func);
        let mut applied = false;
        'rules: for rule in &rules {
            for &(p, c) in &pairs {
                if !fusable_pair(func, p, c) {
                    continue;
                }
                if rule.matches(func, p, c) && rule.can_fuse(func, p, c) && !would_cycle(func, p, c) {
                    apply_pair(func, p, c, rule.name());
                    applied = true;
                    break 'rules;
                }
            }
        }
        if !applied {
            break;
        }
    }
    extend_groups(func);
    fuse_softmax(func);
}

/// Producer-consumer edges, in deterministic id order.
fn candidate_pairs(func: &IRFunction) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for node in &func.nodes {
        for &consumer in &node.consumers {
            pairs.push((node.id, consumer));
        }
    }
    pairs.sort_unstable();
    pairs
}

/// A pair is still worth trying when fusing it would change membership:
/// both ungrouped, or exactly one grouped.
fn fusable_pair(func: &IRFunction, p: usize, c: usize) -> bool {
    match (func.node(p).group, func.node(c).group) {
        (None, None) => true,
        (Some(_), Some(_)) => false,
        _ => true,
    }
}

fn ranges_compatible(f: &IRFunction, producer: usize, consumer: usize) -> bool {
    match (&f.node(producer).loop_range, &f.node(consumer).loop_range) {
        (Some(a), Some(b)) => a.compatible(b),
        _ => false,
    }
}

/// Transitive closure over consumer edges.
fn reachable(func: &IRFunction, start: usize, forward: bool) -> AHashSet<usize> {
    let mut seen = AHashSet::new();
    let mut stack = vec![start];
    while let Some(id) = stack.pop() {
        let next = if forward {
            &func.node(id).consumers
        } else {
            &func.node(id).producers
        };
        for &n in next {
            if seen.insert(n) {
                stack.push(n);
            }
        }
    }
    seen
}

/// Group membership must stay acyclic: refuse to fuse a pair when one of its
/// nodes has a different group both downstream and upstream of it, which
/// would force data to flow back into that group.
fn would_cycle(func: &IRFunction, p: usize, c: usize) -> bool {
    for &node in &[p, c] {
        let own = func.node(node).group;
        let down = reachable(func, node, true);
        let up = reachable(func, node, false);
        let down_groups: AHashSet<usize> =
            down.iter().filter_map(|&n| func.node(n).group).filter(|g| Some(*g) != own).collect();
        let up_groups: AHashSet<usize> =
            up.iter().filter_map(|&n| func.node(n).group).filter(|g| Some(*g) != own).collect();
        if down_groups.intersection(&up_groups).next().is_some() {
            return true;
        }
    }
    false
}

/// Forms or extends a group for a matched pair. The member set also pulls in
/// the pair's enclosing loops so stats and root selection see the loop
/// granularity.
fn apply_pair(func: &mut IRFunction, p: usize, c: usize, pattern: &str) {
    let mut additions = vec![p, c];
    for &n in &[p, c] {
        if let Some(l) = func.node(n).parent_loop
            && func.node(l).group.is_none()
            && !additions.contains(&l)
        {
            additions.push(l);
        }
    }

    // A pair nested in an already-grouped loop extends that loop's group;
    // one loop never hosts two groups.
    let parent_group = [p, c]
        .iter()
        .find_map(|&n| func.node(n).parent_loop.and_then(|l| func.node(l).group));
    let target_group = func.node(p).group.or(func.node(c).group).or(parent_group);
    let gid = match target_group {
        Some(gid) => gid,
        None => {
            let gid = func.groups.len();
            func.groups.push(FusionGroup {
                id: gid,
                members: Vec::new(),
                root: c,
                loop_range: None,
                eliminated_allocs: Vec::new(),
                pattern: pattern.to_owned(),
            });
            gid
        }
    };

    for &n in &additions {
        if func.node(n).group.is_some() {
            continue;
        }
        func.node_mut(n).group = Some(gid);
        func.groups[gid].members.push(n);
        if func.node(n).kind == NodeKind::Alloc && !func.groups[gid].eliminated_allocs.contains(&n) {
            func.groups[gid].eliminated_allocs.push(n);
        }
    }
    refresh_group(func, gid);
}

/// Recomputes a group's root and loop range from its members.
fn refresh_group(func: &mut IRFunction, gid: usize) {
    let members = func.groups[gid].members.clone();
    let root = members
        .iter()
        .copied()
        .filter(|&id| func.node(id).exec_pos.is_some())
        .max()
        .or_else(|| members.iter().copied().max())
        .expect("groups are never empty");
    let range = members.iter().find_map(|&id| func.node(id).loop_range.clone());
    let group = &mut func.groups[gid];
    group.root = root;
    group.members.sort_unstable();
    if group.loop_range.is_none() {
        group.loop_range = range;
    }
}

/// Absorbs ungrouped elementwise/reduction nodes that share a group's loop
/// range and touch one of its members.
///
/// A reduction's output is only complete after its loop, so the connecting
/// edge must run toward the candidate from a non-reduction member, or from
/// a non-reduction candidate into a member. Absorbing a reduction into the
/// loop that consumes its final value would be unsound.
fn extend_groups(func: &mut IRFunction) {
    for gid in 0..func.groups.len() {
        loop {
            let members: AHashSet<usize> = func.groups[gid].members.iter().copied().collect();
            let range = func.groups[gid].loop_range.clone();
            let Some(range) = range else { break };
            let candidate = func.nodes.iter().find(|n| {
                let fed_by_member = n
                    .producers
                    .iter()
                    .any(|p| members.contains(p) && func.node(*p).kind != NodeKind::Reduction);
                let feeds_member = n.kind != NodeKind::Reduction && n.consumers.iter().any(|c| members.contains(c));
                n.group.is_none()
                    && matches!(n.kind, NodeKind::Elementwise | NodeKind::Reduction)
                    && n.loop_range.as_ref().is_some_and(|r| r.compatible(&range))
                    && (fed_by_member || feeds_member)
            });
            let Some(candidate) = candidate.map(|n| n.id) else { break };
            func.node_mut(candidate).group = Some(gid);
            func.groups[gid].members.push(candidate);
            if let Some(l) = func.node(candidate).parent_loop
                && func.node(l).group.is_none()
            {
                func.node_mut(l).group = Some(gid);
                func.groups[gid].members.push(l);
            }
            refresh_group(func, gid);
        }
    }
}

/// Softmax-shaped post-pass: a temporary array written by one loop and read
/// by the next ties the two loops into a single group; the allocation and
/// the load/store that round-trip it become dead, and a trailing reduction
/// over the freshly written output is absorbed as well.
fn fuse_softmax(func: &mut IRFunction) {
    let allocs: Vec<usize> = func
        .nodes
        .iter()
        .filter(|n| n.kind == NodeKind::Alloc && n.group.is_none())
        .map(|n| n.id)
        .collect();

    for alloc in allocs {
        let buf = match func.node(alloc).outputs.first() {
            Some(b) => b.clone(),
            None => continue,
        };
        let writer = func
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Loop && n.outputs.contains(&buf))
            .map(|n| n.id);
        let reader = func
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Loop && n.inputs.contains(&buf) && Some(n.id) != writer)
            .map(|n| n.id);
        let (Some(writer), Some(reader)) = (writer, reader) else {
            continue;
        };
        if writer >= reader {
            continue;
        }
        let compatible = match (&func.node(writer).loop_range, &func.node(reader).loop_range) {
            (Some(a), Some(b)) => a.compatible(b),
            _ => false,
        };
        if !compatible {
            continue;
        }

        // Collect the chain members: the alloc, both loops, their children,
        // and every member of any group those nodes already belong to.
        let mut members: AHashSet<usize> = AHashSet::new();
        members.insert(alloc);
        for &l in &[writer, reader] {
            members.insert(l);
            for n in &func.nodes {
                if n.parent_loop == Some(l) {
                    members.insert(n.id);
                }
            }
        }
        let mut absorbed_groups: AHashSet<usize> = AHashSet::new();
        for &m in members.clone().iter() {
            if let Some(g) = func.node(m).group {
                absorbed_groups.insert(g);
            }
        }
        for &g in &absorbed_groups {
            for m in func.groups[g].members.clone() {
                members.insert(m);
            }
        }

        // Absorb a following reduction loop that reads what the reader loop
        // just wrote.
        let written: Vec<String> = func.node(reader).outputs.clone();
        let follow = func
            .nodes
            .iter()
            .find(|n| {
                n.kind == NodeKind::Loop
                    && n.id > reader
                    && n.group.is_none()
                    && n.inputs.iter().any(|i| written.contains(i))
                    && n.loop_range.as_ref().zip(func.node(reader).loop_range.as_ref()).is_some_and(|(a, b)| {
                        a.compatible(b)
                    })
                    && func
                        .nodes
                        .iter()
                        .any(|c| c.parent_loop == Some(n.id) && c.kind == NodeKind::Reduction)
            })
            .map(|n| n.id);
        if let Some(follow) = follow {
            members.insert(follow);
            for n in &func.nodes {
                if n.parent_loop == Some(follow) {
                    members.insert(n.id);
                }
            }
        }

        // Coalesce: retire absorbed groups, then form the chain group.
        let mut eliminated: Vec<usize> = vec![alloc];
        for &g in &absorbed_groups {
            for &a in &func.groups[g].eliminated_allocs {
                if !eliminated.contains(&a) {
                    eliminated.push(a);
                }
            }
            func.groups[g].members.clear();
            func.groups[g].eliminated_allocs.clear();
        }
        let gid = func.groups.len();
        let mut member_list: Vec<usize> = members.into_iter().collect();
        member_list.sort_unstable();
        for &m in &member_list {
            func.node_mut(m).group = Some(gid);
        }
        eliminated.sort_unstable();
        let range = func.node(writer).loop_range.clone();
        func.groups.push(FusionGroup {
            id: gid,
            members: member_list,
            root: 0,
            loop_range: range,
            eliminated_allocs: eliminated,
            pattern: "softmax".to_owned(),
        });
        refresh_group(func, gid);

        // The store into the temporary and the load back out are dead once
        // the buffer is gone.
        mark_dead_roundtrip(func, &buf, writer, reader);
    }

    compact_groups(func);
}

/// Drops retired (empty) groups and renumbers the survivors so group ids
/// stay equal to their index and every node's membership points at a live
/// group.
fn compact_groups(func: &mut IRFunction) {
    let mut remap: Vec<Option<usize>> = vec![None; func.groups.len()];
    let mut survivors = Vec::new();
    for (old_id, group) in func.groups.drain(..).enumerate() {
        if group.members.is_empty() {
            continue;
        }
        let new_id = survivors.len();
        remap[old_id] = Some(new_id);
        let mut group = group;
        group.id = new_id;
        survivors.push(group);
    }
    func.groups = survivors;
    for node in &mut func.nodes {
        node.group = node.group.and_then(|g| remap[g]);
    }
}

fn mark_dead_roundtrip(func: &mut IRFunction, buf: &str, writer: usize, reader: usize) {
    let ids: Vec<usize> = func
        .nodes
        .iter()
        .filter(|n| {
            (n.parent_loop == Some(writer) && n.kind == NodeKind::Store && n.outputs.iter().any(|o| o == buf))
                || (n.parent_loop == Some(reader) && n.kind == NodeKind::Load && n.inputs.iter().any(|i| i == buf))
        })
        .map(|n| n.id)
        .collect();
    for id in ids {
        func.node_mut(id).dead = true;
    }
}
