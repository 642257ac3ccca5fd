//! Dependency graph over operations
//!
//! Nodes are stored in a vector sorted by operation name, and edges are
//! index-based adjacency lists in both directions:
//! - `predecessors`: operations a node depends on (incoming edges)
//! - `successors`: operations that depend on a node (outgoing edges)
//!
//! Because node indices follow name order, a min-heap keyed by
//! `(depth, index)` in Kahn's algorithm gives a stable tie-break: shallower
//! operations first, then lexicographic by name. Every traversal is
//! deterministic.
//!
//! The graph is immutable once built. Sharing it between threads for
//! read-only queries needs no synchronisation.

use crate::error::{DependencyRule, Error, Result, ValidationError, ValidationIssue};
use crate::operation::{LIFECYCLE_ACTIONS, Operation, OperationKey};
use crate::registry::Registry;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, VecDeque};

/// How a class of structural rule violations is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleLevel {
    /// Violations fail the build
    Error,
    /// Violations are logged and the build continues
    Warn,
}

/// Which build-time rules are fatal
///
/// Cycles, unknown dependencies and self-dependencies are fatal whatever
/// the policy says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RulePolicy {
    /// Missing lifecycle actions and missing lifecycle-order edges
    pub lifecycle: RuleLevel,
    /// Cross-service `start` dependencies and non-install `install` dependencies
    pub structure: RuleLevel,
}

impl RulePolicy {
    /// Every rule is fatal
    pub fn strict() -> Self {
        Self {
            lifecycle: RuleLevel::Error,
            structure: RuleLevel::Error,
        }
    }

    /// Rule violations are only logged
    pub fn lenient() -> Self {
        Self {
            lifecycle: RuleLevel::Warn,
            structure: RuleLevel::Warn,
        }
    }
}

impl Default for RulePolicy {
    fn default() -> Self {
        Self::strict()
    }
}

/// Validated, acyclic dependency graph
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<Operation>,
    index: HashMap<String, usize>,
    predecessors: Vec<Vec<usize>>,
    successors: Vec<Vec<usize>>,
}

#[derive(Clone, Copy)]
enum Direction {
    Backward,
    Forward,
}

impl DependencyGraph {
    /// Build a graph enforcing every rule
    pub fn build(registry: &Registry) -> Result<Self> {
        Self::build_with(registry, RulePolicy::strict())
    }

    /// Build a graph with the given rule policy
    pub fn build_with(registry: &Registry, policy: RulePolicy) -> Result<Self> {
        Self::from_operations(registry.clone().into_operations(), policy)
    }

    fn from_operations(mut nodes: Vec<Operation>, policy: RulePolicy) -> Result<Self> {
        nodes.sort_by(|a, b| a.key().cmp(b.key()));

        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, op)| (op.name().to_string(), i))
            .collect();

        let mut fatal = Vec::new();
        let mut predecessors = vec![Vec::new(); nodes.len()];
        let mut successors = vec![Vec::new(); nodes.len()];

        for (i, op) in nodes.iter().enumerate() {
            for dep in op.depends_on() {
                match index.get(dep.name()) {
                    Some(&j) if j == i => fatal.push(ValidationIssue::IllegalDependency {
                        operation: op.name().to_string(),
                        dependency: dep.name().to_string(),
                        rule: DependencyRule::SelfDependency,
                    }),
                    Some(&j) => {
                        predecessors[i].push(j);
                        successors[j].push(i);
                    }
                    None => fatal.push(ValidationIssue::UnknownDependency {
                        operation: op.name().to_string(),
                        dependency: dep.name().to_string(),
                    }),
                }
            }
        }
        for list in predecessors.iter_mut().chain(successors.iter_mut()) {
            list.sort_unstable();
        }

        for cycle in find_cycles(&successors) {
            fatal.push(ValidationIssue::Cycle {
                cycle: cycle
                    .into_iter()
                    .map(|i| nodes[i].name().to_string())
                    .collect(),
            });
        }

        let mut issues = fatal;
        apply_level(
            &mut issues,
            structure_issues(&nodes, &index),
            policy.structure,
        );
        apply_level(&mut issues, lifecycle_issues(&nodes), policy.lifecycle);

        if !issues.is_empty() {
            return Err(ValidationError::new(issues).into());
        }

        log::debug!("Built dependency graph with {} operations", nodes.len());
        Ok(Self {
            nodes,
            index,
            predecessors,
            successors,
        })
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Operation> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All operations in name order
    pub fn operations(&self) -> &[Operation] {
        &self.nodes
    }

    /// Every service that declares at least one operation
    pub fn services(&self) -> BTreeSet<&str> {
        self.nodes.iter().map(|op| op.key().service()).collect()
    }

    /// Operations belonging to a service, in name order
    pub fn operations_of(&self, service: &str) -> Vec<&Operation> {
        self.nodes
            .iter()
            .filter(|op| op.key().service() == service)
            .collect()
    }

    /// Direct dependencies of an operation
    pub fn dependencies_of(&self, name: &str) -> Result<Vec<&Operation>> {
        let i = self.position(name)?;
        Ok(self.predecessors[i].iter().map(|&j| &self.nodes[j]).collect())
    }

    /// Direct dependents of an operation
    pub fn dependents_of(&self, name: &str) -> Result<Vec<&Operation>> {
        let i = self.position(name)?;
        Ok(self.successors[i].iter().map(|&j| &self.nodes[j]).collect())
    }

    /// Topological order over the whole graph
    pub fn topological_order(&self) -> Vec<&Operation> {
        self.kahn(&vec![true; self.nodes.len()])
    }

    /// Topological order over `subset`
    ///
    /// Paths leaving the subset still constrain the order: if `a` reaches
    /// `b` only through operations outside the subset, `a` comes first.
    pub fn topological_order_of<I, S>(&self, subset: I) -> Result<Vec<&Operation>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let members = self.membership(subset)?;
        Ok(self.kahn(&members))
    }

    /// Operations reachable backwards from `name`, including itself
    pub fn ancestors_of(&self, name: &str) -> Result<BTreeSet<OperationKey>> {
        let start = self.position(name)?;
        Ok(self.keys_of(&self.reach(&[start], Direction::Backward)))
    }

    /// Operations reachable forwards from `name`, including itself
    pub fn descendants_of(&self, name: &str) -> Result<BTreeSet<OperationKey>> {
        let start = self.position(name)?;
        Ok(self.keys_of(&self.reach(&[start], Direction::Forward)))
    }

    /// Every operation needed to reach `targets`, topologically ordered
    pub fn operations_to<I, S>(&self, targets: I) -> Result<Vec<&Operation>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let starts = self.positions(targets)?;
        Ok(self.kahn(&self.reach(&starts, Direction::Backward)))
    }

    /// Every operation affected by `sources`, topologically ordered
    pub fn operations_from<I, S>(&self, sources: I) -> Result<Vec<&Operation>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let starts = self.positions(sources)?;
        Ok(self.kahn(&self.reach(&starts, Direction::Forward)))
    }

    /// Subgraph induced by `nodes` and all their ancestors
    pub fn subgraph<I, S>(&self, nodes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let starts = self.positions(nodes)?;
        let keep = self.reach(&starts, Direction::Backward);

        let mut remap = vec![usize::MAX; self.nodes.len()];
        let mut nodes = Vec::new();
        for (i, op) in self.nodes.iter().enumerate() {
            if keep[i] {
                remap[i] = nodes.len();
                nodes.push(op.clone());
            }
        }

        // Ancestor sets are closed under dependencies, so every kept edge
        // has both endpoints in the new node table.
        let restrict = |lists: &[Vec<usize>]| -> Vec<Vec<usize>> {
            lists
                .iter()
                .enumerate()
                .filter(|(i, _)| keep[*i])
                .map(|(_, list)| {
                    list.iter()
                        .filter(|&&j| keep[j])
                        .map(|&j| remap[j])
                        .collect()
                })
                .collect()
        };

        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, op)| (op.name().to_string(), i))
            .collect();

        Ok(Self {
            predecessors: restrict(&self.predecessors),
            successors: restrict(&self.successors),
            nodes,
            index,
        })
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownOperation {
                name: name.to_string(),
            })
    }

    fn positions<I, S>(&self, names: I) -> Result<Vec<usize>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .map(|name| self.position(name.as_ref()))
            .collect()
    }

    fn membership<I, S>(&self, names: I) -> Result<Vec<bool>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut members = vec![false; self.nodes.len()];
        for i in self.positions(names)? {
            members[i] = true;
        }
        Ok(members)
    }

    fn keys_of(&self, members: &[bool]) -> BTreeSet<OperationKey> {
        members
            .iter()
            .enumerate()
            .filter(|(_, keep)| **keep)
            .map(|(i, _)| self.nodes[i].key().clone())
            .collect()
    }

    /// Breadth-first reachability from `starts`, inclusive
    fn reach(&self, starts: &[usize], direction: Direction) -> Vec<bool> {
        let edges = match direction {
            Direction::Backward => &self.predecessors,
            Direction::Forward => &self.successors,
        };

        let mut seen = vec![false; self.nodes.len()];
        let mut queue: VecDeque<usize> = VecDeque::new();
        for &start in starts {
            if !seen[start] {
                seen[start] = true;
                queue.push_back(start);
            }
        }
        while let Some(node) = queue.pop_front() {
            for &next in &edges[node] {
                if !seen[next] {
                    seen[next] = true;
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Successor lists between members, following paths through non-members
    fn member_successors(&self, members: &[bool]) -> Vec<Vec<usize>> {
        let mut successors = vec![Vec::new(); self.nodes.len()];
        for (from, targets) in successors.iter_mut().enumerate() {
            if !members[from] {
                continue;
            }
            let mut seen = vec![false; self.nodes.len()];
            let mut stack: Vec<usize> = self.successors[from].clone();
            while let Some(node) = stack.pop() {
                if seen[node] {
                    continue;
                }
                seen[node] = true;
                if members[node] {
                    targets.push(node);
                } else {
                    stack.extend(&self.successors[node]);
                }
            }
            targets.sort_unstable();
        }
        successors
    }

    /// Kahn's algorithm restricted to `members`
    ///
    /// Ready operations are released generation by generation: an operation's
    /// depth is one more than the deepest of its dependencies, and the heap
    /// pops the shallowest operation first, smallest name among equals.
    fn kahn(&self, members: &[bool]) -> Vec<&Operation> {
        let successors = if members.iter().all(|m| *m) {
            self.successors.clone()
        } else {
            self.member_successors(members)
        };

        let mut in_degree = vec![0usize; self.nodes.len()];
        for targets in &successors {
            for &next in targets {
                in_degree[next] += 1;
            }
        }
        let mut depth = vec![0usize; self.nodes.len()];

        let mut ready: BinaryHeap<Reverse<(usize, usize)>> = (0..self.nodes.len())
            .filter(|&i| members[i] && in_degree[i] == 0)
            .map(|i| Reverse((0, i)))
            .collect();

        let expected = members.iter().filter(|m| **m).count();
        let mut order = Vec::with_capacity(expected);
        while let Some(Reverse((level, node))) = ready.pop() {
            order.push(&self.nodes[node]);
            for &next in &successors[node] {
                depth[next] = depth[next].max(level + 1);
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse((depth[next], next)));
                }
            }
        }

        debug_assert_eq!(order.len(), expected);
        order
    }
}

/// Depth-first search reporting one cycle per back edge
fn find_cycles(successors: &[Vec<usize>]) -> Vec<Vec<usize>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Unvisited,
        OnPath,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; successors.len()];
    let mut cycles = Vec::new();

    for start in 0..successors.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        marks[start] = Mark::OnPath;
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            if let Some(&child) = successors[node].get(frame.1) {
                frame.1 += 1;
                match marks[child] {
                    Mark::Unvisited => {
                        marks[child] = Mark::OnPath;
                        stack.push((child, 0));
                    }
                    Mark::OnPath => {
                        let from = stack.iter().position(|&(n, _)| n == child).unwrap_or(0);
                        let mut cycle: Vec<usize> = stack[from..].iter().map(|&(n, _)| n).collect();
                        cycle.push(child);
                        cycles.push(cycle);
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                stack.pop();
            }
        }
    }

    cycles
}

/// Cross-service `start` dependencies and non-install `install` dependencies
fn structure_issues(nodes: &[Operation], index: &HashMap<String, usize>) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for op in nodes {
        let key = op.key();
        for dep in op.depends_on() {
            if !index.contains_key(dep.name()) || dep == key {
                continue;
            }
            if dep.action() == "start" && dep.service() != key.service() {
                issues.push(ValidationIssue::IllegalDependency {
                    operation: key.name().to_string(),
                    dependency: dep.name().to_string(),
                    rule: DependencyRule::CrossServiceStart,
                });
            }
            if key.action() == "install" && dep.action() != "install" {
                issues.push(ValidationIssue::IllegalDependency {
                    operation: key.name().to_string(),
                    dependency: dep.name().to_string(),
                    rule: DependencyRule::InstallOnlyOnInstall,
                });
            }
        }
    }
    issues
}

/// Lifecycle completeness and lifecycle-order edges for service-level operations
fn lifecycle_issues(nodes: &[Operation]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut declared: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for op in nodes {
        let key = op.key();
        let actions = declared.entry(key.service()).or_default();
        if !key.is_service_level() {
            continue;
        }
        actions.insert(key.action());

        let Some(pos) = LIFECYCLE_ACTIONS.iter().position(|a| *a == key.action()) else {
            continue;
        };
        if pos == 0 {
            continue;
        }
        let previous = key.with_action(LIFECYCLE_ACTIONS[pos - 1]);
        if !op.depends_on().contains(&previous) {
            issues.push(ValidationIssue::IllegalDependency {
                operation: key.name().to_string(),
                dependency: previous.name().to_string(),
                rule: DependencyRule::LifecycleOrder,
            });
        }
    }

    for (service, actions) in declared {
        for action in LIFECYCLE_ACTIONS {
            if !actions.contains(action) {
                issues.push(ValidationIssue::MissingLifecycleAction {
                    service: service.to_string(),
                    action: action.to_string(),
                });
            }
        }
    }
    issues
}

fn apply_level(issues: &mut Vec<ValidationIssue>, found: Vec<ValidationIssue>, level: RuleLevel) {
    match level {
        RuleLevel::Error => issues.extend(found),
        RuleLevel::Warn => {
            for issue in found {
                log::warn!("{issue}");
            }
        }
    }
}
