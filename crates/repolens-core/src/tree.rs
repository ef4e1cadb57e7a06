//! Structural model builder: flat repository paths → directory tree.
//!
//! The builder is a pure function. Identical path sets always produce
//! identical trees. Within each directory, **directories come first, then
//! files**, each group ordered lexicographically by name (byte order).
//!
//! ```text
//! ["src/app/page.ts", "src/services/api.ts", "package.json"]
//!
//! /
//! ├── src/
//! │   ├── app/
//! │   │   └── page.ts
//! │   └── services/
//! │       └── api.ts
//! └── package.json
//! ```

use serde::Serialize;
use std::collections::BTreeMap;

use crate::language::infer_language;
use crate::models::extension_of;

/// A directory or file in the repository tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    /// Last path segment (empty for the root).
    pub name: String,
    /// Repository-relative path (empty for the root).
    pub path: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    Directory,
    File {
        extension: Option<String>,
        language: Option<String>,
    },
}

impl TreeNode {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory)
    }

    /// Number of file leaves below this node.
    pub fn file_count(&self) -> usize {
        match self.kind {
            NodeKind::File { .. } => 1,
            NodeKind::Directory => self.children.iter().map(TreeNode::file_count).sum(),
        }
    }

    /// Number of directories below this node, excluding itself.
    pub fn directory_count(&self) -> usize {
        self.children
            .iter()
            .filter(|c| c.is_dir())
            .map(|c| 1 + c.directory_count())
            .sum()
    }

    /// Look up a descendant by repository-relative path.
    pub fn find(&self, path: &str) -> Option<&TreeNode> {
        let mut node = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.children.iter().find(|c| c.name == segment)?;
        }
        Some(node)
    }

    /// Indented listing, two spaces per level, directories suffixed with `/`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            child.render_into(&mut out, 0);
        }
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push_str(&self.name);
        if self.is_dir() {
            out.push('/');
        }
        out.push('\n');
        for child in &self.children {
            child.render_into(out, depth + 1);
        }
    }
}

enum Entry {
    Dir(BTreeMap<String, Entry>),
    File,
}

/// Strip `./` and leading `/`, drop empty segments.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Build the directory tree for a set of repository-relative paths.
///
/// Duplicate paths and file/directory collisions are logged and resolved
/// by letting the later entry win; they never fail the build.
pub fn build_tree<S: AsRef<str>>(paths: &[S]) -> TreeNode {
    let mut root: BTreeMap<String, Entry> = BTreeMap::new();

    for raw in paths {
        let path = normalize_path(raw.as_ref());
        if path.is_empty() {
            continue;
        }
        insert(&mut root, &path);
    }

    TreeNode {
        name: String::new(),
        path: String::new(),
        kind: NodeKind::Directory,
        children: to_nodes(root, ""),
    }
}

fn insert(root: &mut BTreeMap<String, Entry>, path: &str) {
    let segments: Vec<&str> = path.split('/').collect();
    let (leaf, dirs) = match segments.split_last() {
        Some(parts) => parts,
        None => return,
    };

    let mut level = root;
    for dir in dirs {
        let entry = level
            .entry(dir.to_string())
            .or_insert_with(|| Entry::Dir(BTreeMap::new()));
        if matches!(entry, Entry::File) {
            tracing::warn!(path, segment = *dir, "file replaced by directory of the same name");
            *entry = Entry::Dir(BTreeMap::new());
        }
        level = match entry {
            Entry::Dir(children) => children,
            Entry::File => unreachable!("file entries were replaced above"),
        };
    }

    match level.insert(leaf.to_string(), Entry::File) {
        Some(Entry::File) => tracing::warn!(path, "duplicate path in tree input"),
        Some(Entry::Dir(_)) => {
            tracing::warn!(path, "directory replaced by file of the same name")
        }
        None => {}
    }
}

fn to_nodes(entries: BTreeMap<String, Entry>, parent: &str) -> Vec<TreeNode> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();

    for (name, entry) in entries {
        let path = if parent.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", parent, name)
        };
        match entry {
            Entry::Dir(children) => {
                let children = to_nodes(children, &path);
                dirs.push(TreeNode {
                    name,
                    path,
                    kind: NodeKind::Directory,
                    children,
                });
            }
            Entry::File => {
                let extension = extension_of(&name);
                let language = infer_language(&name, extension.as_deref()).map(str::to_string);
                files.push(TreeNode {
                    name,
                    path,
                    kind: NodeKind::File {
                        extension,
                        language,
                    },
                    children: Vec::new(),
                });
            }
        }
    }

    dirs.extend(files);
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(node: &TreeNode) -> Vec<&str> {
        node.children.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_empty_input() {
        let tree = build_tree::<&str>(&[]);
        assert!(tree.is_dir());
        assert!(tree.children.is_empty());
        assert_eq!(tree.file_count(), 0);
        assert_eq!(tree.render(), "");
    }

    #[test]
    fn test_example_layout() {
        let tree = build_tree(&["src/app/page.ts", "src/services/api.ts", "package.json"]);
        assert_eq!(names(&tree), vec!["src", "package.json"]);

        let src = tree.find("src").unwrap();
        assert!(src.is_dir());
        assert_eq!(names(src), vec!["app", "services"]);

        let pkg = tree.find("package.json").unwrap();
        assert_eq!(
            pkg.kind,
            NodeKind::File {
                extension: Some("json".to_string()),
                language: Some("json".to_string()),
            }
        );
        assert_eq!(tree.file_count(), 3);
        assert_eq!(tree.directory_count(), 3);
    }

    #[test]
    fn test_directories_before_files() {
        let tree = build_tree(&["b.txt", "a/x.rs", "c/y.rs", "A.md"]);
        assert_eq!(names(&tree), vec!["a", "c", "A.md", "b.txt"]);
    }

    #[test]
    fn test_deterministic_regardless_of_input_order() {
        let a = build_tree(&["z/1.rs", "a/2.rs", "m.rs", "a/b/3.rs"]);
        let b = build_tree(&["a/b/3.rs", "m.rs", "z/1.rs", "a/2.rs"]);
        assert_eq!(a, b);
        assert_eq!(a.render(), b.render());
    }

    #[test]
    fn test_duplicates_are_not_fatal() {
        let tree = build_tree(&["src/a.rs", "src/a.rs"]);
        assert_eq!(tree.file_count(), 1);
    }

    #[test]
    fn test_normalizes_paths() {
        let tree = build_tree(&["./src//main.rs", "/README.md"]);
        assert!(tree.find("src/main.rs").is_some());
        assert_eq!(tree.find("src/main.rs").unwrap().path, "src/main.rs");
        assert!(tree.find("README.md").is_some());
    }

    #[test]
    fn test_file_directory_collision_later_wins() {
        let tree = build_tree(&["docs", "docs/intro.md"]);
        assert!(tree.find("docs").unwrap().is_dir());

        let tree = build_tree(&["docs/intro.md", "docs"]);
        assert!(!tree.find("docs").unwrap().is_dir());
    }

    #[test]
    fn test_render() {
        let tree = build_tree(&["src/main.rs", "Cargo.toml"]);
        assert_eq!(tree.render(), "src/\n  main.rs\nCargo.toml\n");
    }
}
