//! Static symbol scanning.
//!
//! A deliberately lightweight, line-oriented scanner: each supported
//! language has an ordered list of regex rules, the first rule matching a
//! line wins, and the declaration's extent is found by brace matching
//! (C-family languages) or indentation (Python). It never fails; content
//! it does not understand yields no symbols.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Symbol, SymbolKind};

struct Rule {
    kind: SymbolKind,
    pattern: Regex,
}

fn rule(kind: SymbolKind, pattern: &str) -> Rule {
    Rule {
        kind,
        pattern: Regex::new(pattern).expect("symbol pattern must compile"),
    }
}

static RUST_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    let vis = r#"(?:pub(?:\([^)]*\))?\s+)?"#;
    vec![
        rule(
            SymbolKind::Function,
            &format!(
                r#"^\s*{vis}(?:default\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)"#
            ),
        ),
        rule(
            SymbolKind::Class,
            &format!(r#"^\s*{vis}(?:struct|enum|union)\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)"#),
        ),
        rule(
            SymbolKind::Interface,
            &format!(r#"^\s*{vis}(?:unsafe\s+)?trait\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)"#),
        ),
        rule(
            SymbolKind::Type,
            &format!(r#"^\s*{vis}type\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)"#),
        ),
        rule(
            SymbolKind::Constant,
            &format!(r#"^\s*{vis}(?:const|static)\s+(?:mut\s+)?(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s*:"#),
        ),
    ]
});

static TS_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    let ident = r#"[A-Za-z_$][\w$]*"#;
    vec![
        rule(
            SymbolKind::Function,
            &format!(r#"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(?P<name>{ident})"#),
        ),
        rule(
            SymbolKind::Class,
            &format!(r#"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(?P<name>{ident})"#),
        ),
        rule(
            SymbolKind::Interface,
            &format!(r#"^\s*(?:export\s+)?interface\s+(?P<name>{ident})"#),
        ),
        rule(
            SymbolKind::Type,
            &format!(r#"^\s*(?:export\s+)?type\s+(?P<name>{ident})\s*(?:<[^=]*>)?\s*="#),
        ),
        rule(
            SymbolKind::Function,
            &format!(
                r#"^\s*(?:export\s+)?(?:const|let)\s+(?P<name>{ident})\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\([^)]*\)|{ident})\s*(?::[^=]+)?=>"#
            ),
        ),
        rule(
            SymbolKind::Constant,
            r#"^(?:export\s+)?const\s+(?P<name>[A-Z][A-Z0-9_]*)\s*(?::[^=]+)?="#,
        ),
        rule(
            SymbolKind::Variable,
            &format!(r#"^(?:export\s+)?(?:let|var|const)\s+(?P<name>{ident})"#),
        ),
    ]
});

static PYTHON_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(
            SymbolKind::Function,
            r#"^\s*(?:async\s+)?def\s+(?P<name>[A-Za-z_]\w*)"#,
        ),
        rule(SymbolKind::Class, r#"^\s*class\s+(?P<name>[A-Za-z_]\w*)"#),
        rule(
            SymbolKind::Constant,
            r#"^(?P<name>[A-Z][A-Z0-9_]*)\s*(?::[^=]+)?=[^=]"#,
        ),
    ]
});

static GO_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(
            SymbolKind::Function,
            r#"^func\s+(?:\([^)]*\)\s*)?(?P<name>[A-Za-z_]\w*)"#,
        ),
        rule(SymbolKind::Class, r#"^type\s+(?P<name>[A-Za-z_]\w*)\s+struct\b"#),
        rule(
            SymbolKind::Interface,
            r#"^type\s+(?P<name>[A-Za-z_]\w*)\s+interface\b"#,
        ),
        rule(SymbolKind::Type, r#"^type\s+(?P<name>[A-Za-z_]\w*)"#),
        rule(SymbolKind::Constant, r#"^const\s+(?P<name>[A-Za-z_]\w*)"#),
        rule(SymbolKind::Variable, r#"^var\s+(?P<name>[A-Za-z_]\w*)"#),
    ]
});

static JAVA_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    let mods = r#"(?:(?:public|private|protected|static|final|abstract|sealed|synchronized|native)\s+)"#;
    vec![
        rule(
            SymbolKind::Constant,
            &format!(r#"^\s*{mods}*static\s+final\s+[\w<>\[\],.]+\s+(?P<name>[A-Z][A-Z0-9_]*)\s*="#),
        ),
        rule(
            SymbolKind::Interface,
            &format!(r#"^\s*{mods}*@?interface\s+(?P<name>[A-Za-z_]\w*)"#),
        ),
        rule(
            SymbolKind::Class,
            &format!(r#"^\s*{mods}*(?:class|enum|record)\s+(?P<name>[A-Za-z_]\w*)"#),
        ),
        rule(
            SymbolKind::Function,
            &format!(r#"^\s*{mods}+(?:<[^>]+>\s+)?[\w<>\[\],.]+\s+(?P<name>[A-Za-z_]\w*)\s*\("#),
        ),
    ]
});

#[derive(Clone, Copy, PartialEq, Eq)]
enum Extent {
    Braces,
    Indentation,
}

fn rules_for(language: &str) -> Option<(&'static [Rule], Extent)> {
    match language {
        "rust" => Some((RUST_RULES.as_slice(), Extent::Braces)),
        "typescript" | "javascript" => Some((TS_RULES.as_slice(), Extent::Braces)),
        "python" => Some((PYTHON_RULES.as_slice(), Extent::Indentation)),
        "go" => Some((GO_RULES.as_slice(), Extent::Braces)),
        "java" => Some((JAVA_RULES.as_slice(), Extent::Braces)),
        _ => None,
    }
}

/// Scan `content` for declarations, ordered by start line.
///
/// Unsupported languages yield an empty list.
pub fn scan_symbols(file_id: &str, language: Option<&str>, content: &str) -> Vec<Symbol> {
    let Some((rules, extent)) = language.and_then(rules_for) else {
        return Vec::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    let mut symbols = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let Some((kind, name)) = rules.iter().find_map(|r| {
            r.pattern
                .captures(line)
                .and_then(|c| c.name("name"))
                .map(|m| (r.kind, m.as_str().to_string()))
        }) else {
            continue;
        };
        let end = match extent {
            Extent::Braces => brace_end(&lines, idx),
            Extent::Indentation => indent_end(&lines, idx),
        };
        symbols.push(Symbol {
            id: uuid::Uuid::new_v4().to_string(),
            file_id: file_id.to_string(),
            name,
            kind,
            start_line: (idx + 1) as u32,
            end_line: (end + 1) as u32,
            explanation: None,
        });
    }
    symbols
}

/// Last line (0-based) of a brace-delimited declaration starting at `start`.
///
/// A declaration that ends with `;` before any `{` is a single statement.
fn brace_end(lines: &[&str], start: usize) -> usize {
    let mut depth = 0i32;
    let mut opened = false;

    for (offset, line) in lines[start..].iter().enumerate() {
        let mut in_string: Option<char> = None;
        let mut escaped = false;
        let mut prev = '\0';
        for ch in line.chars() {
            if let Some(quote) = in_string {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == quote {
                    in_string = None;
                }
                continue;
            }
            if ch == '/' && prev == '/' {
                break;
            }
            match ch {
                '"' | '`' => in_string = Some(ch),
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => {
                    depth -= 1;
                    if opened && depth <= 0 {
                        return start + offset;
                    }
                }
                ';' if !opened && depth == 0 => return start + offset,
                _ => {}
            }
            prev = ch;
        }
    }
    if opened {
        lines.len().saturating_sub(1)
    } else {
        start
    }
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Last line (0-based) of an indentation-delimited block starting at `start`.
fn indent_end(lines: &[&str], start: usize) -> usize {
    let base = indentation(lines[start]);
    let mut end = start;
    for (offset, line) in lines[start + 1..].iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if indentation(line) <= base {
            break;
        }
        end = start + 1 + offset;
    }
    end
}

/// The source lines of `symbol` (1-based, inclusive), joined with `\n`.
pub fn excerpt(content: &str, start_line: u32, end_line: u32) -> String {
    let start = start_line.saturating_sub(1) as usize;
    let len = end_line.saturating_sub(start_line) as usize + 1;
    content
        .lines()
        .skip(start)
        .take(len)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(symbols: &[Symbol]) -> Vec<(String, SymbolKind, u32, u32)> {
        symbols
            .iter()
            .map(|s| (s.name.clone(), s.kind, s.start_line, s.end_line))
            .collect()
    }

    #[test]
    fn test_rust_symbols() {
        let src = r#"use std::io;

pub const MAX: usize = 10;

pub struct Config {
    name: String,
}

pub trait Loader {
    fn load(&self) -> String;
}

pub async fn run(config: &Config) -> io::Result<()> {
    let s = "{ not a brace }";
    Ok(())
}

type Alias = Vec<u8>;
"#;
        let symbols = scan_symbols("f1", Some("rust"), src);
        assert_eq!(
            summary(&symbols),
            vec![
                ("MAX".to_string(), SymbolKind::Constant, 3, 3),
                ("Config".to_string(), SymbolKind::Class, 5, 7),
                ("Loader".to_string(), SymbolKind::Interface, 9, 11),
                ("load".to_string(), SymbolKind::Function, 10, 10),
                ("run".to_string(), SymbolKind::Function, 13, 16),
                ("Alias".to_string(), SymbolKind::Type, 18, 18),
            ]
        );
        assert!(symbols.iter().all(|s| s.file_id == "f1"));
    }

    #[test]
    fn test_typescript_symbols() {
        let src = r#"import { api } from "./api";

export const API_URL = "https://example.com";
export interface User {
  id: string;
}
export type Id = string;
export const fetchUser = async (id: Id): Promise<User> => {
  return api.get(id);
};
export default function Page() {
  return null;
}
class Store {}
let counter = 0;
"#;
        let symbols = scan_symbols("f", Some("typescript"), src);
        assert_eq!(
            summary(&symbols),
            vec![
                ("API_URL".to_string(), SymbolKind::Constant, 3, 3),
                ("User".to_string(), SymbolKind::Interface, 4, 6),
                ("Id".to_string(), SymbolKind::Type, 7, 7),
                ("fetchUser".to_string(), SymbolKind::Function, 8, 10),
                ("Page".to_string(), SymbolKind::Function, 11, 13),
                ("Store".to_string(), SymbolKind::Class, 14, 14),
                ("counter".to_string(), SymbolKind::Variable, 15, 15),
            ]
        );
    }

    #[test]
    fn test_python_symbols() {
        let src = "TIMEOUT = 30\n\nclass Client:\n    def get(self):\n        return 1\n\n    def post(self):\n        pass\n\nasync def main():\n    await x()\n";
        let symbols = scan_symbols("f", Some("python"), src);
        assert_eq!(
            summary(&symbols),
            vec![
                ("TIMEOUT".to_string(), SymbolKind::Constant, 1, 1),
                ("Client".to_string(), SymbolKind::Class, 3, 8),
                ("get".to_string(), SymbolKind::Function, 4, 5),
                ("post".to_string(), SymbolKind::Function, 7, 8),
                ("main".to_string(), SymbolKind::Function, 10, 11),
            ]
        );
    }

    #[test]
    fn test_go_symbols() {
        let src = "package main\n\ntype Server struct {\n\taddr string\n}\n\ntype Handler interface {\n\tServe()\n}\n\nfunc (s *Server) Start() error {\n\treturn nil\n}\n";
        let symbols = scan_symbols("f", Some("go"), src);
        assert_eq!(
            summary(&symbols),
            vec![
                ("Server".to_string(), SymbolKind::Class, 3, 5),
                ("Handler".to_string(), SymbolKind::Interface, 7, 9),
                ("Start".to_string(), SymbolKind::Function, 11, 13),
            ]
        );
    }

    #[test]
    fn test_java_symbols() {
        let src = "public class App {\n    public static final int LIMIT = 5;\n    public static void main(String[] args) {\n        run();\n    }\n}\n";
        let symbols = scan_symbols("f", Some("java"), src);
        assert_eq!(
            summary(&symbols),
            vec![
                ("App".to_string(), SymbolKind::Class, 1, 6),
                ("LIMIT".to_string(), SymbolKind::Constant, 2, 2),
                ("main".to_string(), SymbolKind::Function, 3, 5),
            ]
        );
    }

    #[test]
    fn test_unsupported_language() {
        assert!(scan_symbols("f", Some("markdown"), "# fn main() {}").is_empty());
        assert!(scan_symbols("f", None, "fn main() {}").is_empty());
    }

    #[test]
    fn test_excerpt() {
        let src = "a\nb\nc\nd";
        assert_eq!(excerpt(src, 2, 3), "b\nc");
        assert_eq!(excerpt(src, 4, 10), "d");
    }
}
