//! Dependency graph construction over extracted contract units.
//!
//! Nodes are contract names and raw import targets, sharing one namespace.
//! A node that only ever appears as an edge target was never declared in
//! the analysed tree; it is an external reference (vendor library, remote
//! interface) and is kept as a bare node without a synthesized unit.

use std::collections::HashSet;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::models::{ContractKind, ContractUnit, Heuristic};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Import,
    Inheritance,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    nodes: IndexSet<String>,
    declared: IndexSet<String>,
    edges: IndexSet<DependencyEdge>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a declared contract name. Returns false if already declared.
    pub fn declare(&mut self, name: &str) -> bool {
        self.nodes.insert(name.to_string());
        self.declared.insert(name.to_string())
    }

    /// Add an edge, creating the target node if needed. Returns false when
    /// the same (from, to, kind) triple was already present.
    pub fn add_edge(&mut self, from: &str, to: &str, kind: EdgeKind) -> bool {
        self.nodes.insert(from.to_string());
        self.nodes.insert(to.to_string());
        self.edges.insert(DependencyEdge {
            from: from.to_string(),
            to: to.to_string(),
            kind,
        })
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    pub fn edges(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.edges.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_count_of(&self, kind: EdgeKind) -> usize {
        self.edges.iter().filter(|e| e.kind == kind).count()
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.contains(name)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.contains(name)
    }

    pub fn declared(&self) -> impl Iterator<Item = &str> {
        self.declared.iter().map(String::as_str)
    }

    /// Nodes reachable only as edge targets, in insertion order.
    pub fn unresolved_references(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| !self.declared.contains(n.as_str()))
            .map(String::as_str)
            .collect()
    }

    pub fn edges_from<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DependencyEdge> {
        self.edges.iter().filter(move |e| e.from == name)
    }

    pub fn edges_into<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DependencyEdge> {
        self.edges.iter().filter(move |e| e.to == name)
    }

    /// Inheritance parents of `name` in edge order.
    pub fn parents_of<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        self.edges_from(name)
            .filter(|e| e.kind == EdgeKind::Inheritance)
            .map(|e| e.to.as_str())
            .collect()
    }

    /// Contracts that inherit from `name` in edge order.
    pub fn children_of<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        self.edges_into(name)
            .filter(|e| e.kind == EdgeKind::Inheritance)
            .map(|e| e.from.as_str())
            .collect()
    }

    /// True when `name` is used as a parent but does not inherit itself.
    pub fn is_only_inherited(&self, name: &str) -> bool {
        let inherited_from = self
            .edges_into(name)
            .any(|e| e.kind == EdgeKind::Inheritance);
        let inherits = self
            .edges_from(name)
            .any(|e| e.kind == EdgeKind::Inheritance);
        inherited_from && !inherits
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Build the repository-wide graph from every extracted unit.
///
/// All contract names are declared before any edge is added so that
/// declaration order, not reference order, decides node order for them.
pub fn build_dependency_graph(contracts: &[ContractUnit]) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for contract in contracts {
        graph.declare(&contract.name);
    }
    for contract in contracts {
        for import in &contract.imports {
            graph.add_edge(&contract.name, import, EdgeKind::Import);
        }
        for parent in &contract.inherits {
            graph.add_edge(&contract.name, parent, EdgeKind::Inheritance);
        }
    }
    graph
}

// ---------------------------------------------------------------------------
// Heuristics
// ---------------------------------------------------------------------------

const ENTRY_POINT_CONFIDENCE: f64 = 0.7;
const UPGRADEABLE_CONFIDENCE: f64 = 0.6;

/// Concrete contracts that are likely deployable.
///
/// A `contract` is excluded only when it is inherited from and does not
/// inherit anything itself (a pure base). A contract that is both a parent
/// and a child stays an entry point.
pub fn infer_entry_points(
    contracts: &[ContractUnit],
    graph: &DependencyGraph,
) -> Heuristic<Vec<String>> {
    let mut seen = HashSet::new();
    let mut entry_points = Vec::new();
    let mut excluded = Vec::new();

    for contract in contracts {
        if contract.kind != ContractKind::Contract || !seen.insert(contract.name.as_str()) {
            continue;
        }
        if graph.is_only_inherited(&contract.name) {
            excluded.push(contract.name.as_str());
        } else {
            entry_points.push(contract.name.clone());
        }
    }

    let mut rationale = String::from(
        "name-based: concrete contracts, excluding pure bases that are inherited from and inherit nothing",
    );
    if !excluded.is_empty() {
        rationale.push_str(&format!("; excluded bases: {}", excluded.join(", ")));
    }
    Heuristic::new(entry_points, ENTRY_POINT_CONFIDENCE, rationale)
}

/// Contracts whose declaration text matched an upgrade-pattern token.
pub fn detect_upgradeable(contracts: &[ContractUnit]) -> Heuristic<Vec<String>> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    let mut markers: IndexSet<&str> = IndexSet::new();
    for contract in contracts.iter().filter(|c| c.uses_upgradeable_pattern) {
        markers.extend(contract.upgrade_markers.iter().map(String::as_str));
        if seen.insert(contract.name.as_str()) {
            names.push(contract.name.clone());
        }
    }
    let rationale = if markers.is_empty() {
        "substring match against known proxy and initializer tokens; none matched".to_string()
    } else {
        format!(
            "substring match against known proxy and initializer tokens: {}",
            markers.iter().copied().collect::<Vec<_>>().join(", ")
        )
    };
    Heuristic::new(names, UPGRADEABLE_CONFIDENCE, rationale)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str, kind: ContractKind, imports: &[&str], inherits: &[&str]) -> ContractUnit {
        ContractUnit {
            name: name.to_string(),
            kind,
            file_path: format!("src/{name}.sol"),
            imports: imports.iter().map(|s| s.to_string()).collect(),
            inherits: inherits.iter().map(|s| s.to_string()).collect(),
            functions: vec![],
            state_variables: vec![],
            uses_upgradeable_pattern: false,
            upgrade_markers: vec![],
        }
    }

    #[test]
    fn test_every_contract_is_a_node_once() {
        let contracts = vec![
            unit("Token", ContractKind::Contract, &["./Base.sol"], &[]),
            unit("Sale", ContractKind::Contract, &[], &["Token", "Token"]),
            unit("Token", ContractKind::Contract, &[], &[]),
        ];
        let graph = build_dependency_graph(&contracts);
        let nodes: Vec<&str> = graph.nodes().collect();
        assert_eq!(nodes, vec!["Token", "Sale", "./Base.sol"]);
        for c in &contracts {
            assert_eq!(nodes.iter().filter(|n| **n == c.name).count(), 1);
        }
    }

    #[test]
    fn test_edges_deduplicated_by_triple() {
        let contracts = vec![
            unit("A", ContractKind::Contract, &["B"], &["B"]),
            unit("A", ContractKind::Contract, &["B"], &["B"]),
            unit("B", ContractKind::Contract, &[], &[]),
        ];
        let mut graph = build_dependency_graph(&contracts);
        // Same endpoints but different kinds are distinct edges.
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.edge_count_of(EdgeKind::Import), 1);
        assert_eq!(graph.edge_count_of(EdgeKind::Inheritance), 1);
        assert!(!graph.add_edge("A", "B", EdgeKind::Import));
    }

    #[test]
    fn test_unresolved_references_are_undeclared_nodes() {
        let contracts = vec![unit(
            "Vault",
            ContractKind::Contract,
            &["@openzeppelin/contracts/access/Ownable.sol"],
            &["Ownable", "IVault"],
        )];
        let graph = build_dependency_graph(&contracts);
        assert!(graph.is_declared("Vault"));
        assert!(!graph.is_declared("Ownable"));
        assert!(graph.contains_node("Ownable"));
        assert_eq!(
            graph.unresolved_references(),
            vec!["@openzeppelin/contracts/access/Ownable.sol", "Ownable", "IVault"]
        );
    }

    #[test]
    fn test_entry_points_scenario_token_sale() {
        let contracts = vec![
            unit("Token", ContractKind::Contract, &[], &[]),
            unit("Sale", ContractKind::Contract, &[], &["Token"]),
        ];
        let graph = build_dependency_graph(&contracts);
        let entry = infer_entry_points(&contracts, &graph);
        assert_eq!(entry.value, vec!["Sale"]);
        assert!(entry.rationale.contains("Token"));
        assert!(entry.confidence < 1.0);
    }

    #[test]
    fn test_entry_points_keep_intermediate_contracts() {
        // Middle is both inherited from and inherits, so it stays.
        let contracts = vec![
            unit("Root", ContractKind::Contract, &[], &[]),
            unit("Middle", ContractKind::Contract, &[], &["Root"]),
            unit("Leaf", ContractKind::Contract, &[], &["Middle"]),
        ];
        let graph = build_dependency_graph(&contracts);
        let entry = infer_entry_points(&contracts, &graph);
        assert_eq!(entry.value, vec!["Middle", "Leaf"]);
    }

    #[test]
    fn test_entry_points_skip_non_concrete_kinds() {
        let contracts = vec![
            unit("IToken", ContractKind::Interface, &[], &[]),
            unit("Math", ContractKind::Library, &[], &[]),
            unit("Base", ContractKind::Abstract, &[], &[]),
            unit("Impl", ContractKind::Contract, &[], &["Base", "IToken"]),
        ];
        let graph = build_dependency_graph(&contracts);
        let entry = infer_entry_points(&contracts, &graph);
        assert_eq!(entry.value, vec!["Impl"]);
    }

    #[test]
    fn test_entry_point_exclusion_matches_predicate() {
        let contracts = vec![
            unit("A", ContractKind::Contract, &[], &[]),
            unit("B", ContractKind::Contract, &[], &["A"]),
            unit("C", ContractKind::Contract, &[], &["B", "X"]),
            unit("D", ContractKind::Contract, &["A"], &[]),
            unit("E", ContractKind::Contract, &[], &["D"]),
        ];
        let graph = build_dependency_graph(&contracts);
        let entry = infer_entry_points(&contracts, &graph);
        for c in &contracts {
            let into = graph
                .edges()
                .any(|e| e.kind == EdgeKind::Inheritance && e.to == c.name);
            let out = graph
                .edges()
                .any(|e| e.kind == EdgeKind::Inheritance && e.from == c.name);
            let excluded = !entry.value.contains(&c.name);
            assert_eq!(excluded, into && !out, "contract {}", c.name);
        }
    }

    #[test]
    fn test_parents_and_children() {
        let contracts = vec![
            unit("Base", ContractKind::Abstract, &[], &[]),
            unit("One", ContractKind::Contract, &[], &["Base"]),
            unit("Two", ContractKind::Contract, &[], &["Base", "One"]),
        ];
        let graph = build_dependency_graph(&contracts);
        assert_eq!(graph.parents_of("Two"), vec!["Base", "One"]);
        assert_eq!(graph.children_of("Base"), vec!["One", "Two"]);
    }

    #[test]
    fn test_detect_upgradeable() {
        let mut logic = unit("Logic", ContractKind::Contract, &[], &["Initializable"]);
        logic.uses_upgradeable_pattern = true;
        logic.upgrade_markers = vec!["Initializable".to_string()];
        let contracts = vec![unit("Plain", ContractKind::Contract, &[], &[]), logic];
        let heuristic = detect_upgradeable(&contracts);
        assert_eq!(heuristic.value, vec!["Logic"]);
        assert!(heuristic.rationale.contains("Initializable"));
    }
}
