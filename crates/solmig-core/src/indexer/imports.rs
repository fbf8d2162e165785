//! Import path resolution from Solidity import strings to repository files.

use std::collections::HashSet;
use std::path::Path;

/// Prefixes that mark an import as resolving outside the analysed tree.
pub const DEFAULT_EXTERNAL_IMPORT_PREFIXES: &[&str] = &[
    "@",
    "node_modules/",
    "forge-std/",
    "ds-test/",
    "solmate/",
    "solady/",
    "openzeppelin",
    "hardhat/",
    "lib/",
];

pub fn normalize_posix_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    let mut stack: Vec<&str> = Vec::new();
    for part in parts {
        match part {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            _ => stack.push(part),
        }
    }
    stack.join("/")
}

pub fn is_relative(import: &str) -> bool {
    import.starts_with("./") || import.starts_with("../")
}

/// Resolve an import string to a repository-relative candidate path.
///
/// Relative imports are joined onto the importing file's directory;
/// everything else is only normalised.
pub fn resolve_import(source_path: &str, import: &str) -> String {
    let import = import.replace('\\', "/");
    if is_relative(&import) {
        let source_dir = Path::new(source_path).parent().unwrap_or(Path::new(""));
        let joined = source_dir.join(&import);
        normalize_posix_path(&joined.to_string_lossy().replace('\\', "/"))
    } else {
        normalize_posix_path(&import)
    }
}

/// Whether a non-relative import points at a package or URL rather than a
/// file inside the repository.
pub fn is_external_import<S: AsRef<str>>(import: &str, prefixes: &[S]) -> bool {
    if is_relative(import) {
        return false;
    }
    if import.contains("://") || import.contains("node_modules/") {
        return true;
    }
    prefixes.iter().any(|p| import.starts_with(p.as_ref()))
}

/// Outcome of checking one import against the set of known files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportResolution {
    Resolved(String),
    External,
    Unresolved(String),
}

pub fn check_import<S: AsRef<str>>(
    source_path: &str,
    import: &str,
    known_paths: &HashSet<String>,
    external_prefixes: &[S],
) -> ImportResolution {
    if is_external_import(import, external_prefixes) {
        return ImportResolution::External;
    }
    let candidate = resolve_import(source_path, import);
    if known_paths.contains(&candidate) {
        ImportResolution::Resolved(candidate)
    } else {
        ImportResolution::Unresolved(candidate)
    }
}
