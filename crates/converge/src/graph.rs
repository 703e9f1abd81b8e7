//! Task graph builder - dependency graph and deterministic execution order
//!
//! Nodes are stored in execution order, so a node's position doubles as its
//! scheduling priority. Two kinds of edges exist:
//!
//! - **requires**: declared `depends_on` edges. A failure propagates along
//!   them to every transitive dependent.
//! - **after**: implicit ordering-only edges that make system packages run
//!   before other kinds. They delay a node but never fail it.

use crate::error::GraphError;
use crate::types::{DesiredStateDocument, Resource, ResourceKind, ResourceRef};
use std::collections::{BTreeMap, BTreeSet};

/// Directed acyclic graph of resources with a fixed execution order
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: Vec<Resource>,
    requires: Vec<Vec<usize>>,
    after: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl TaskGraph {
    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Resources in execution order
    pub fn resources(&self) -> &[Resource] {
        &self.nodes
    }

    pub fn resource(&self, position: usize) -> &Resource {
        &self.nodes[position]
    }

    /// Positions of the declared dependencies of a node
    pub fn requires(&self, position: usize) -> &[usize] {
        &self.requires[position]
    }

    /// Positions of the nodes this one is implicitly ordered after
    pub fn ordered_after(&self, position: usize) -> &[usize] {
        &self.after[position]
    }

    /// Positions of the nodes waiting on this one (either edge kind)
    pub fn dependents(&self, position: usize) -> &[usize] {
        &self.dependents[position]
    }

    /// References in execution order
    pub fn order(&self) -> Vec<ResourceRef> {
        self.nodes.iter().map(Resource::reference).collect()
    }

    pub fn position_of(&self, reference: &ResourceRef) -> Option<usize> {
        self.nodes.iter().position(|r| r.reference() == *reference)
    }

    /// Keep only nodes matching `predicate`, preserving their relative order
    ///
    /// Edges to dropped nodes are removed; the dropped dependencies are
    /// treated as already satisfied.
    pub fn retain<F>(self, predicate: F) -> Self
    where
        F: Fn(&Resource) -> bool,
    {
        let mut mapping = vec![None; self.nodes.len()];
        let mut nodes = Vec::new();
        for (old, resource) in self.nodes.iter().enumerate() {
            if predicate(resource) {
                mapping[old] = Some(nodes.len());
                nodes.push(resource.clone());
            }
        }

        let remap = |edges: &[usize]| -> Vec<usize> {
            edges.iter().filter_map(|&e| mapping[e]).collect()
        };

        let mut requires = Vec::with_capacity(nodes.len());
        let mut after = Vec::with_capacity(nodes.len());
        for (old, new) in mapping.iter().enumerate() {
            if new.is_some() {
                requires.push(remap(&self.requires[old]));
                after.push(remap(&self.after[old]));
            }
        }

        let dependents = invert(nodes.len(), &requires, &after);
        Self {
            nodes,
            requires,
            after,
            dependents,
        }
    }
}

/// Build the task graph for a desired-state document
///
/// Fails without returning a partial graph when the document declares a
/// resource twice, references an undeclared resource, or contains a
/// dependency cycle.
pub fn build(document: &DesiredStateDocument) -> Result<TaskGraph, GraphError> {
    let resources = &document.resources;

    let mut index: BTreeMap<ResourceRef, usize> = BTreeMap::new();
    for (i, resource) in resources.iter().enumerate() {
        if index.insert(resource.reference(), i).is_some() {
            return Err(GraphError::DuplicateResource(resource.reference()));
        }
    }

    let mut requires = Vec::with_capacity(resources.len());
    for resource in resources {
        let mut deps = Vec::with_capacity(resource.depends_on.len());
        for dep in &resource.depends_on {
            let position = index
                .get(dep)
                .copied()
                .ok_or_else(|| GraphError::UnknownDependency {
                    from: resource.reference(),
                    missing: dep.clone(),
                })?;
            deps.push(position);
        }
        requires.push(deps);
    }

    if let Some(cycle) = find_cycle(&requires, index.values().copied()) {
        return Err(GraphError::CyclicDependency {
            involved: cycle.into_iter().map(|i| resources[i].reference()).collect(),
        });
    }

    let after = implicit_ordering(resources, &requires);
    let order = topological_order(resources, &requires, &after);
    log::debug!("Execution order: {} nodes", order.len());

    let mut position = vec![0; resources.len()];
    for (new, &old) in order.iter().enumerate() {
        position[old] = new;
    }
    let reindex = |edges: &[usize]| -> Vec<usize> {
        let mut out: Vec<usize> = edges.iter().map(|&e| position[e]).collect();
        out.sort_unstable();
        out
    };

    let nodes: Vec<Resource> = order.iter().map(|&i| resources[i].clone()).collect();
    let requires: Vec<Vec<usize>> = order.iter().map(|&i| reindex(&requires[i])).collect();
    let after: Vec<Vec<usize>> = order.iter().map(|&i| reindex(&after[i])).collect();
    let dependents = invert(nodes.len(), &requires, &after);

    Ok(TaskGraph {
        nodes,
        requires,
        after,
        dependents,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first cycle detection with an in-progress set
///
/// Returns the nodes on the first cycle found, each depending on the next.
fn find_cycle(requires: &[Vec<usize>], roots: impl Iterator<Item = usize>) -> Option<Vec<usize>> {
    let mut marks = vec![Mark::Unvisited; requires.len()];
    let mut stack = Vec::new();

    for root in roots {
        if marks[root] == Mark::Unvisited
            && let Some(cycle) = visit(root, requires, &mut marks, &mut stack)
        {
            return Some(cycle);
        }
    }
    None
}

fn visit(
    node: usize,
    requires: &[Vec<usize>],
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    marks[node] = Mark::InProgress;
    stack.push(node);

    for &dep in &requires[node] {
        match marks[dep] {
            Mark::InProgress => {
                let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                return Some(stack[start..].to_vec());
            }
            Mark::Unvisited => {
                if let Some(cycle) = visit(dep, requires, marks, stack) {
                    return Some(cycle);
                }
            }
            Mark::Done => {}
        }
    }

    stack.pop();
    marks[node] = Mark::Done;
    None
}

/// Ordering-only edges placing system packages before other kinds
///
/// A non-system node gets an edge from every system package unless it
/// already names a system package in `depends_on`, or the edge would close a
/// cycle (the system package itself depends on the node).
fn implicit_ordering(resources: &[Resource], requires: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut after: Vec<Vec<usize>> = vec![Vec::new(); resources.len()];
    let is_system = |i: usize| resources[i].kind == ResourceKind::SystemPackage;

    let mut system: Vec<usize> = (0..resources.len()).filter(|&i| is_system(i)).collect();
    system.sort_by_key(|&i| resources[i].reference());

    let mut others: Vec<usize> = (0..resources.len())
        .filter(|&i| !is_system(i) && !requires[i].iter().any(|&d| is_system(d)))
        .collect();
    others.sort_by_key(|&i| resources[i].reference());

    for &node in &others {
        for &sys in &system {
            if !reaches(sys, node, requires, &after) {
                after[node].push(sys);
            }
        }
    }
    after
}

/// Whether `from` transitively waits on `target` through either edge kind
fn reaches(from: usize, target: usize, requires: &[Vec<usize>], after: &[Vec<usize>]) -> bool {
    let mut seen = vec![false; requires.len()];
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if std::mem::replace(&mut seen[node], true) {
            continue;
        }
        stack.extend(requires[node].iter().chain(after[node].iter()).copied());
    }
    false
}

/// Kahn's algorithm; ready nodes are taken in `(kind, identifier)` order
fn topological_order(
    resources: &[Resource],
    requires: &[Vec<usize>],
    after: &[Vec<usize>],
) -> Vec<usize> {
    let dependents = invert(resources.len(), requires, after);
    let mut pending: Vec<usize> = (0..resources.len())
        .map(|i| requires[i].len() + after[i].len())
        .collect();

    let mut ready: BTreeSet<(ResourceRef, usize)> = (0..resources.len())
        .filter(|&i| pending[i] == 0)
        .map(|i| (resources[i].reference(), i))
        .collect();

    let mut order = Vec::with_capacity(resources.len());
    while let Some((_, node)) = ready.pop_first() {
        order.push(node);
        for &dependent in &dependents[node] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert((resources[dependent].reference(), dependent));
            }
        }
    }
    order
}

fn invert(len: usize, requires: &[Vec<usize>], after: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut dependents = vec![Vec::new(); len];
    for node in 0..len {
        for &dep in requires[node].iter().chain(after[node].iter()) {
            dependents[dep].push(node);
        }
    }
    dependents
}
