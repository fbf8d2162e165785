//! Solidity parsing wrapper used by extraction passes.
//!
//! The grammar comes from the native `tree-sitter-solidity` crate. A tree
//! that contains error or missing nodes is treated as a failed parse for the
//! whole file: the structural model never contains units recovered from a
//! partially broken file.

use serde::Serialize;
use tree_sitter::{Node, Parser, Tree};

use crate::errors::{MigrationError, MigrationResult};

pub fn solidity_language() -> tree_sitter::Language {
    tree_sitter_solidity::LANGUAGE.into()
}

/// A successfully parsed source file. Holds the raw text the tree points into.
pub struct ParsedSource {
    pub path: String,
    pub source: String,
    pub tree: Tree,
}

impl ParsedSource {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn text(&self, node: Node<'_>) -> &str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }
}

pub struct SourceParser {
    parser: Parser,
}

impl SourceParser {
    pub fn new() -> MigrationResult<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&solidity_language())
            .map_err(|e| MigrationError::Internal(format!("Failed to set language: {e}")))?;
        Ok(Self { parser })
    }

    pub fn parse(&mut self, path: &str, source: &str) -> MigrationResult<ParsedSource> {
        let tree = self
            .parser
            .parse(source.as_bytes(), None)
            .ok_or_else(|| MigrationError::parse(path, "parser produced no syntax tree"))?;

        if tree.root_node().has_error() {
            let message = match first_error(tree.root_node()) {
                Some(node) => {
                    let pos = node.start_position();
                    let what = if node.is_missing() {
                        format!("missing {}", node.kind())
                    } else {
                        "syntax error".to_string()
                    };
                    format!("{what} at line {}, column {}", pos.row + 1, pos.column + 1)
                }
                None => "syntax error".to_string(),
            };
            return Err(MigrationError::parse(path, message));
        }

        Ok(ParsedSource {
            path: path.to_string(),
            source: source.to_string(),
            tree,
        })
    }
}

fn first_error(root: Node<'_>) -> Option<Node<'_>> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        // Reverse so the leftmost child is examined first.
        stack.extend(children.into_iter().rev());
    }
    None
}

#[derive(Clone, Debug, Serialize)]
pub struct GrammarReport {
    pub language: &'static str,
    pub available: bool,
    pub abi_version: usize,
    pub node_kinds: usize,
}

pub fn grammar_capability_report() -> GrammarReport {
    let language = solidity_language();
    let available = SourceParser::new().is_ok();
    GrammarReport {
        language: "solidity",
        available,
        abi_version: language.abi_version(),
        node_kinds: language.node_kind_count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_source() {
        let mut parser = SourceParser::new().unwrap();
        let parsed = parser
            .parse("src/A.sol", "pragma solidity ^0.8.0;\ncontract A {}\n")
            .unwrap();
        assert_eq!(parsed.root().kind(), "source_file");
        assert_eq!(parsed.path, "src/A.sol");
    }

    #[test]
    fn test_parse_reports_error_position() {
        let mut parser = SourceParser::new().unwrap();
        let err = parser
            .parse("src/Broken.sol", "contract A {\n  function f( {\n}\n")
            .err()
            .unwrap();
        match err {
            MigrationError::Parse { path, message } => {
                assert_eq!(path, "src/Broken.sol");
                assert!(message.contains("line"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_capability_report() {
        let report = grammar_capability_report();
        assert!(report.available);
        assert_eq!(report.language, "solidity");
        assert!(report.node_kinds > 0);
    }

    #[test]
    fn test_grammar_abi_is_loadable() {
        let report = grammar_capability_report();
        assert!(report.abi_version >= tree_sitter::MIN_COMPATIBLE_LANGUAGE_VERSION);
        assert!(report.abi_version <= tree_sitter::LANGUAGE_VERSION);

        let mut parser = SourceParser::new().expect("solidity grammar must load");
        let parsed = parser
            .parse("src/Vault.sol", "contract Vault { function deposit() external {} }")
            .unwrap();
        let extracted = crate::indexer::contracts::extract_contracts(&parsed);
        assert_eq!(extracted.contracts.len(), 1);
        assert_eq!(extracted.contracts[0].name, "Vault");
        assert_eq!(extracted.contracts[0].functions[0].name, "deposit");
    }
}
