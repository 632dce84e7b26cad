//! Line-based import scanning.
//!
//! This is a heuristic over source lines, not a Python parser. It finds
//! `import x` and `from x import y` statements outside triple-quoted blocks
//! and skips comment lines.

/// Raw imported module names in order of first appearance.
///
/// Names are returned as written (`os.path`, `PIL`); normalization to
/// install names happens in [`crate::names::NameAliases`].
pub fn scan_imports(source: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut in_block = false;

    for line in source.lines() {
        // A line that opens and closes a block on its own leaves the state alone.
        let quotes = line.matches("\"\"\"").count() + line.matches("'''").count();
        if quotes % 2 == 1 {
            in_block = !in_block;
            continue;
        }
        if in_block || quotes > 0 {
            continue;
        }

        let code = line.split('#').next().unwrap_or_default();
        for name in imports_on_line(code) {
            if !found.contains(&name) {
                found.push(name);
            }
        }
    }
    found
}

fn imports_on_line(code: &str) -> Vec<String> {
    let tokens: Vec<&str> = code.split_whitespace().collect();
    match tokens.as_slice() {
        ["import", rest @ ..] => rest
            .join(" ")
            .split(',')
            .filter_map(|part| part.split_whitespace().next())
            .filter(|name| is_absolute(name))
            .map(str::to_string)
            .collect(),
        ["from", module, "import", ..] if is_absolute(module) => vec![module.to_string()],
        _ => Vec::new(),
    }
}

fn is_absolute(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_and_from_imports() {
        let src = "import os\nimport numpy as np\nfrom flask import Flask\nimport a, b as c\n";
        assert_eq!(scan_imports(src), vec!["os", "numpy", "flask", "a", "b"]);
    }

    #[test]
    fn test_skips_docstrings_and_comments() {
        let src = r#""""
import hidden
"""
# import commented
x = 1  # import trailing
'''one-line docstring'''
from requests.adapters import HTTPAdapter
"#;
        assert_eq!(scan_imports(src), vec!["requests.adapters"]);
    }

    #[test]
    fn test_relative_imports_ignored() {
        let src = "from . import models\nfrom .views import index\nimport yaml\nimport yaml\n";
        assert_eq!(scan_imports(src), vec!["yaml"]);
    }

    #[test]
    fn test_indented_imports_are_found() {
        let src = "try:\n    import simplejson as json\nexcept ImportError:\n    import json\n";
        assert_eq!(scan_imports(src), vec!["simplejson", "json"]);
    }
}
