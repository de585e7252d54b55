//! Python extractor backed by tree-sitter.
//!
//! Records every class and function definition, including async, decorated
//! and nested ones. Names are qualified by their enclosing definitions
//! (`Outer.Inner.method`); a function is a method only when its direct
//! parent is a class.

use super::SymbolExtractor;
use crate::error::{RefineError, RefineResult};
use crate::types::{ExtractedUnit, UnitKind};
use parking_lot::Mutex;
use std::path::{Component, Path};
use tree_sitter::{Node, Parser};

pub struct PythonExtractor {
    parser: Mutex<Parser>,
}

impl std::fmt::Debug for PythonExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PythonExtractor")
            .field("language", &"Python")
            .finish()
    }
}

impl PythonExtractor {
    pub fn new() -> RefineResult<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| RefineError::ExtractorInit {
                language: "python".to_string(),
                reason: format!("tree-sitter error: {e}"),
            })?;
        Ok(Self {
            parser: Mutex::new(parser),
        })
    }

    fn visit(
        &self,
        node: Node,
        code: &str,
        module: &str,
        scope: &mut Vec<String>,
        parent: Option<UnitKind>,
        units: &mut Vec<ExtractedUnit>,
    ) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            match child.kind() {
                "function_definition" | "class_definition" => {
                    self.definition(child, child, code, module, scope, parent, units);
                }
                "decorated_definition" => {
                    // decorators belong to the unit's span
                    if let Some(def) = child.child_by_field_name("definition") {
                        self.definition(def, child, code, module, scope, parent, units);
                    }
                }
                _ => self.visit(child, code, module, scope, parent, units),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn definition(
        &self,
        def: Node,
        span: Node,
        code: &str,
        module: &str,
        scope: &mut Vec<String>,
        parent: Option<UnitKind>,
        units: &mut Vec<ExtractedUnit>,
    ) {
        let Some(name) = def
            .child_by_field_name("name")
            .map(|n| code[n.byte_range()].to_string())
        else {
            return;
        };

        let kind = match (def.kind(), parent) {
            ("class_definition", _) => UnitKind::Class,
            (_, Some(UnitKind::Class)) => UnitKind::Method,
            _ => UnitKind::Function,
        };

        scope.push(name.clone());
        units.push(ExtractedUnit {
            unit_id: format!("{module}:{}", scope.join(".")),
            name,
            kind,
            start_line: span.start_position().row + 1,
            end_line: span.end_position().row + 1,
            content: code[span.byte_range()].to_string(),
        });

        if let Some(body) = def.child_by_field_name("body") {
            self.visit(body, code, module, scope, Some(kind), units);
        }
        scope.pop();
    }
}

impl SymbolExtractor for PythonExtractor {
    fn language(&self) -> &str {
        "python"
    }

    fn extensions(&self) -> &[&str] {
        &["py", "pyi"]
    }

    fn extract(&self, path: &Path, content: &str) -> RefineResult<Vec<ExtractedUnit>> {
        let tree = self
            .parser
            .lock()
            .parse(content, None)
            .ok_or_else(|| RefineError::Extraction {
                path: path.to_path_buf(),
                reason: "tree-sitter produced no syntax tree".to_string(),
            })?;

        let root = tree.root_node();
        if root.has_error() {
            let line = first_error(root).map_or(1, |n| n.start_position().row + 1);
            return Err(RefineError::Extraction {
                path: path.to_path_buf(),
                reason: format!("syntax error near line {line}"),
            });
        }

        let module = module_path(path);
        let mut units = Vec::new();
        self.visit(root, content, &module, &mut Vec::new(), None, &mut units);
        Ok(units)
    }
}

/// Dotted module path of a source path relative to the source root.
///
/// `pkg/sub/mod.py` becomes `pkg.sub.mod`; a trailing `__init__` is dropped
/// so a package's initializer is addressed by the package name.
pub fn module_path(path: &Path) -> String {
    let stem = path.with_extension("");
    let mut parts: Vec<String> = stem
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.len() > 1 && parts.last().is_some_and(|p| p == "__init__") {
        parts.pop();
    }
    parts.join(".")
}

fn first_error(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            if let Some(found) = first_error(child) {
                return Some(found);
            }
        }
    }
    None
}
