//! Definitions and imports of a source file, extracted with tree-sitter.
//!
//! Only the grammars compiled in through the `lang-*` features are parsed;
//! any other file has an empty outline.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};

use crate::error::IndexError;

/// Coarse category of a named definition, shared by every grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    /// Functions, methods, and macros.
    Function,
    /// Classes, structs, enums, traits, interfaces, and aliases.
    Type,
    Constant,
    Module,
}

impl SymbolKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Type => "type",
            Self::Constant => "constant",
            Self::Module => "module",
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SymbolKind {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "function" | "fn" | "func" | "def" | "method" => Ok(Self::Function),
            "type" | "class" | "struct" | "enum" | "trait" | "interface" => Ok(Self::Type),
            "constant" | "const" | "static" => Ok(Self::Constant),
            "module" | "mod" | "namespace" => Ok(Self::Module),
            other => Err(IndexError::InvalidInput(format!(
                "unknown symbol kind {other:?} (expected function, type, constant, or module)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// 1-based line of the definition's first token.
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// Statement text with whitespace runs collapsed.
    pub text: String,
    pub line: usize,
}

/// Everything extracted from one file, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileOutline {
    pub symbols: Vec<Symbol>,
    pub imports: Vec<Import>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grammar {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
}

impl Grammar {
    fn for_path(path: &str) -> Option<Self> {
        let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "rs" => Some(Self::Rust),
            "py" | "pyi" => Some(Self::Python),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "go" => Some(Self::Go),
            _ => None,
        }
    }

    /// `None` when the grammar's feature is disabled.
    fn language(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-js")]
            Self::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    fn definition(self, node_kind: &str) -> Option<SymbolKind> {
        use SymbolKind::{Constant, Function, Module, Type};

        match self {
            Self::Rust => match node_kind {
                "function_item" | "function_signature_item" | "macro_definition" => Some(Function),
                "struct_item" | "enum_item" | "union_item" | "trait_item" | "type_item" => {
                    Some(Type)
                }
                "const_item" | "static_item" => Some(Constant),
                "mod_item" => Some(Module),
                _ => None,
            },
            Self::Python => match node_kind {
                "function_definition" => Some(Function),
                "class_definition" => Some(Type),
                _ => None,
            },
            Self::JavaScript | Self::TypeScript | Self::Tsx => match node_kind {
                "function_declaration" | "generator_function_declaration" | "method_definition" => {
                    Some(Function)
                }
                "class_declaration"
                | "abstract_class_declaration"
                | "interface_declaration"
                | "type_alias_declaration"
                | "enum_declaration" => Some(Type),
                "internal_module" => Some(Module),
                _ => None,
            },
            Self::Go => match node_kind {
                "function_declaration" | "method_declaration" => Some(Function),
                "type_spec" | "type_alias" => Some(Type),
                "const_spec" => Some(Constant),
                _ => None,
            },
        }
    }

    fn is_import(self, node_kind: &str) -> bool {
        match self {
            Self::Rust => matches!(node_kind, "use_declaration" | "extern_crate_declaration"),
            Self::Python => matches!(
                node_kind,
                "import_statement" | "import_from_statement" | "future_import_statement"
            ),
            Self::JavaScript | Self::TypeScript | Self::Tsx => node_kind == "import_statement",
            Self::Go => node_kind == "import_spec",
        }
    }
}

fn node_text<'a>(node: &Node, source: &'a str) -> Option<&'a str> {
    source.get(node.byte_range())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Named definitions and import statements of `source`.
///
/// The grammar is picked from the extension of `path`. Unsupported files and
/// parser failures yield an empty outline; syntax errors only hide the
/// definitions inside the broken region.
#[must_use]
pub fn extract_outline(path: &str, source: &str) -> FileOutline {
    let Some(grammar) = Grammar::for_path(path) else {
        return FileOutline::default();
    };
    let Some(language) = grammar.language() else {
        return FileOutline::default();
    };

    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&language) {
        tracing::debug!(path, error = %e, "grammar rejected by parser");
        return FileOutline::default();
    }
    let Some(tree) = parser.parse(source, None) else {
        tracing::debug!(path, "tree-sitter parse failed");
        return FileOutline::default();
    };

    let mut outline = FileOutline::default();
    let mut stack = vec![tree.root_node()];
    while let Some(node) = stack.pop() {
        let kind = node.kind();
        let line = node.start_position().row + 1;

        if grammar.is_import(kind) {
            if let Some(text) = node_text(&node, source) {
                outline.imports.push(Import {
                    text: collapse_whitespace(text),
                    line,
                });
            }
            continue;
        }

        if let Some(symbol_kind) = grammar.definition(kind)
            && let Some(name) = node
                .child_by_field_name("name")
                .and_then(|n| node_text(&n, source))
        {
            outline.symbols.push(Symbol {
                name: name.to_owned(),
                kind: symbol_kind,
                line,
            });
        }

        // Reversed so the stack pops children in source order.
        let count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
        for i in (0..count).rev() {
            if let Some(child) = node.named_child(i) {
                stack.push(child);
            }
        }
    }

    tracing::debug!(
        path,
        symbols = outline.symbols.len(),
        imports = outline.imports.len(),
        "extracted outline"
    );
    outline
}
