//! Contract, import and member extraction from parsed Solidity sources.
//!
//! Walks the top level of a tree-sitter syntax tree and produces one
//! [`ContractUnit`] per contract, abstract contract, interface or library
//! declaration, plus the file's import list. Internal and private functions
//! are dropped here so that later passes only ever see the callable surface.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;
use tree_sitter::Node;

use crate::errors::MigrationResult;
use crate::indexer::parser::{ParsedSource, SourceParser};
use crate::models::{
    ContractKind, ContractUnit, FunctionSignature, Mutability, StateVariable, Visibility,
};

// ---------------------------------------------------------------------------
// Extracted types
// ---------------------------------------------------------------------------

/// Everything extracted from a single source file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractedFile {
    pub file_path: String,
    pub imports: Vec<String>,
    pub contracts: Vec<ContractUnit>,
}

/// Tokens whose presence in a declaration suggests a proxy/upgrade pattern.
///
/// Matching is a plain substring test on the declaration text, so this is a
/// best-effort signal and can both over- and under-report.
pub const UPGRADE_PATTERN_TOKENS: &[&str] = &[
    "Initializable",
    "UUPSUpgradeable",
    "TransparentUpgradeableProxy",
    "ERC1967Proxy",
    "ERC1967Upgrade",
    "BeaconProxy",
    "UpgradeableBeacon",
    "ProxyAdmin",
    "_authorizeUpgrade",
    "upgradeTo",
    "upgradeToAndCall",
    "initializer",
    "_disableInitializers",
];

static QUOTED_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]*)"|'([^']*)'"#).unwrap());

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Push `value` unless it is empty or already present. Keeps first-seen order.
fn push_unique(list: &mut Vec<String>, seen: &mut HashSet<String>, value: String) {
    if !value.is_empty() && seen.insert(value.clone()) {
        list.push(value);
    }
}

/// First quoted literal of an import directive, if any.
pub fn import_path(directive_text: &str) -> Option<String> {
    let caps = QUOTED_LITERAL_RE.captures(directive_text)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// Upgrade-pattern tokens found in a declaration's raw text, in list order.
pub fn upgrade_markers(declaration_text: &str) -> Vec<String> {
    UPGRADE_PATTERN_TOKENS
        .iter()
        .filter(|token| declaration_text.contains(*token))
        .map(|token| token.to_string())
        .collect()
}

/// Normalize an inheritance specifier's text to the parent type name:
/// constructor arguments are dropped and whitespace around dots removed.
fn parent_name(specifier_text: &str) -> String {
    let head = specifier_text.split('(').next().unwrap_or("");
    head.chars().filter(|c| !c.is_whitespace()).collect()
}

fn children<'a>(node: Node<'a>) -> Vec<Node<'a>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

fn declared_kind(node: Node<'_>) -> Option<ContractKind> {
    match node.kind() {
        "interface_declaration" => Some(ContractKind::Interface),
        "library_declaration" => Some(ContractKind::Library),
        "contract_declaration" => {
            let leading = node.child(0).map(|c| c.kind());
            if leading == Some("abstract") {
                Some(ContractKind::Abstract)
            } else {
                Some(ContractKind::Contract)
            }
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Member extraction
// ---------------------------------------------------------------------------

fn visibility_of(parsed: &ParsedSource, node: Node<'_>) -> Option<Visibility> {
    children(node).into_iter().find_map(|child| match child.kind() {
        "visibility" => Visibility::parse(parsed.text(child)),
        other => Visibility::parse(other),
    })
}

fn count_parameters(node: Node<'_>) -> usize {
    children(node)
        .into_iter()
        .filter(|c| c.kind() == "parameter")
        .count()
}

fn function_signature(parsed: &ParsedSource, node: Node<'_>) -> Option<FunctionSignature> {
    let name = node
        .child_by_field_name("name")
        .map(|n| parsed.text(n).to_string())
        .filter(|n| !n.is_empty())?;

    let visibility = visibility_of(parsed, node).unwrap_or(Visibility::Public);
    if !visibility.is_exposed() {
        return None;
    }

    let mutability = children(node)
        .into_iter()
        .find(|c| c.kind() == "state_mutability")
        .and_then(|c| Mutability::parse(parsed.text(c)));

    let return_count = node
        .child_by_field_name("return_type")
        .map(count_parameters)
        .unwrap_or(0);

    Some(FunctionSignature {
        name,
        visibility,
        mutability,
        parameter_count: count_parameters(node),
        return_count,
    })
}

fn state_variable(parsed: &ParsedSource, node: Node<'_>) -> Option<StateVariable> {
    let name = node
        .child_by_field_name("name")
        .map(|n| parsed.text(n).to_string())
        .filter(|n| !n.is_empty())?;
    let type_name = node
        .child_by_field_name("type")
        .map(|n| parsed.text(n).to_string())
        .unwrap_or_default();
    let kinds: Vec<&str> = children(node).iter().map(|c| c.kind()).collect();

    Some(StateVariable {
        name,
        type_name,
        visibility: visibility_of(parsed, node).unwrap_or(Visibility::Internal),
        constant: kinds.contains(&"constant"),
        immutable: kinds.contains(&"immutable"),
    })
}

/// Single pass over a declaration subtree collecting exposed functions and
/// state variables in source order.
fn collect_members(
    parsed: &ParsedSource,
    declaration: Node<'_>,
) -> (Vec<FunctionSignature>, Vec<StateVariable>) {
    let mut functions = Vec::new();
    let mut variables = Vec::new();
    let mut stack = vec![declaration];

    while let Some(node) = stack.pop() {
        match node.kind() {
            "function_definition" => {
                if let Some(sig) = function_signature(parsed, node) {
                    functions.push(sig);
                }
                continue;
            }
            "state_variable_declaration" => {
                if let Some(var) = state_variable(parsed, node) {
                    variables.push(var);
                }
                continue;
            }
            // Members never nest inside these.
            "constructor_definition" | "modifier_definition" | "fallback_receive_definition"
            | "inheritance_specifier" | "struct_declaration" | "enum_declaration"
            | "event_definition" | "error_declaration" => continue,
            _ => {}
        }
        let kids = children(node);
        stack.extend(kids.into_iter().rev());
    }

    (functions, variables)
}

fn inheritance_parents(parsed: &ParsedSource, declaration: Node<'_>) -> Vec<String> {
    let mut parents = Vec::new();
    let mut seen = HashSet::new();
    for child in children(declaration) {
        if child.kind() == "inheritance_specifier" {
            push_unique(&mut parents, &mut seen, parent_name(parsed.text(child)));
        }
    }
    parents
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Extract the import list and contract units of an already parsed file.
pub fn extract_contracts(parsed: &ParsedSource) -> ExtractedFile {
    let root = parsed.root();
    let mut imports = Vec::new();
    let mut seen_imports = HashSet::new();
    let mut declarations = Vec::new();

    for node in children(root) {
        if node.kind() == "import_directive" {
            match import_path(parsed.text(node)) {
                Some(path) => push_unique(&mut imports, &mut seen_imports, path),
                None => warn!(
                    file = %parsed.path,
                    line = node.start_position().row + 1,
                    "skipping import directive without a quoted path"
                ),
            }
        } else if let Some(kind) = declared_kind(node) {
            declarations.push((node, kind));
        }
    }

    let mut contracts = Vec::new();
    for (node, kind) in declarations {
        let name = match node.child_by_field_name("name") {
            Some(n) if !parsed.text(n).is_empty() => parsed.text(n).to_string(),
            _ => {
                warn!(
                    file = %parsed.path,
                    line = node.start_position().row + 1,
                    kind = %kind,
                    "skipping declaration without a name"
                );
                continue;
            }
        };
        let (functions, state_variables) = collect_members(parsed, node);
        let markers = upgrade_markers(parsed.text(node));

        contracts.push(ContractUnit {
            name,
            kind,
            file_path: parsed.path.clone(),
            imports: imports.clone(),
            inherits: inheritance_parents(parsed, node),
            functions,
            state_variables,
            uses_upgradeable_pattern: !markers.is_empty(),
            upgrade_markers: markers,
        });
    }

    ExtractedFile {
        file_path: parsed.path.clone(),
        imports,
        contracts,
    }
}

/// Parse and extract a source file in one step.
pub fn extract_source(
    parser: &mut SourceParser,
    file_path: &str,
    source: &str,
) -> MigrationResult<ExtractedFile> {
    let parsed = parser.parse(file_path, source)?;
    Ok(extract_contracts(&parsed))
}
