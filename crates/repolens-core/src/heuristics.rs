//! Deterministic framework and pattern detection.
//!
//! Every detector here is a total, pure function over the flat path list
//! (and, for frameworks, the dependency names parsed from manifests). No
//! detector ever fails: absence of evidence yields an empty result.
//!
//! Detection is driven by the static tables [`FRAMEWORK_RULES`] and
//! [`PATTERN_RULES`]; adding a framework or pattern means adding a row.
//!
//! The results serve two purposes: a cheap answer when no completion
//! provider is configured, and grounding context for the analysis prompts
//! so model output corroborates the deterministic evidence.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::models::split_path;
use crate::tree::normalize_path;

/// Evidence that implies a framework.
#[derive(Debug, Clone, Copy)]
pub enum Evidence {
    /// A manifest dependency with exactly this name.
    Dependency(&'static str),
    /// A file whose repository-relative path equals this value.
    FileAt(&'static str),
    /// A file with this name anywhere in the tree.
    FileNamed(&'static str),
}

pub struct FrameworkRule {
    pub label: &'static str,
    pub evidence: &'static [Evidence],
}

use Evidence::{Dependency as Dep, FileAt, FileNamed};

pub static FRAMEWORK_RULES: &[FrameworkRule] = &[
    FrameworkRule {
        label: "Next.js",
        evidence: &[
            Dep("next"),
            FileAt("next.config.js"),
            FileAt("next.config.mjs"),
            FileAt("next.config.ts"),
        ],
    },
    FrameworkRule {
        label: "React",
        evidence: &[Dep("react")],
    },
    FrameworkRule {
        label: "Vue",
        evidence: &[Dep("vue"), FileAt("vue.config.js")],
    },
    FrameworkRule {
        label: "Nuxt",
        evidence: &[Dep("nuxt"), FileAt("nuxt.config.ts"), FileAt("nuxt.config.js")],
    },
    FrameworkRule {
        label: "Angular",
        evidence: &[Dep("@angular/core"), FileAt("angular.json")],
    },
    FrameworkRule {
        label: "Svelte",
        evidence: &[Dep("svelte"), FileAt("svelte.config.js")],
    },
    FrameworkRule {
        label: "Express",
        evidence: &[Dep("express")],
    },
    FrameworkRule {
        label: "NestJS",
        evidence: &[Dep("@nestjs/core"), FileAt("nest-cli.json")],
    },
    FrameworkRule {
        label: "Vite",
        evidence: &[Dep("vite"), FileAt("vite.config.ts"), FileAt("vite.config.js")],
    },
    FrameworkRule {
        label: "Tailwind CSS",
        evidence: &[
            Dep("tailwindcss"),
            FileAt("tailwind.config.js"),
            FileAt("tailwind.config.ts"),
        ],
    },
    FrameworkRule {
        label: "Prisma",
        evidence: &[Dep("prisma"), Dep("@prisma/client"), FileAt("prisma/schema.prisma")],
    },
    FrameworkRule {
        label: "Jest",
        evidence: &[Dep("jest"), FileAt("jest.config.js"), FileAt("jest.config.ts")],
    },
    FrameworkRule {
        label: "Django",
        evidence: &[Dep("django"), FileAt("manage.py")],
    },
    FrameworkRule {
        label: "Flask",
        evidence: &[Dep("flask")],
    },
    FrameworkRule {
        label: "FastAPI",
        evidence: &[Dep("fastapi")],
    },
    FrameworkRule {
        label: "Ruby on Rails",
        evidence: &[Dep("rails"), FileAt("config/routes.rb")],
    },
    FrameworkRule {
        label: "Spring Boot",
        evidence: &[Dep("spring-boot-starter"), Dep("org.springframework.boot")],
    },
    FrameworkRule {
        label: "Laravel",
        evidence: &[Dep("laravel/framework"), FileAt("artisan")],
    },
    FrameworkRule {
        label: "Axum",
        evidence: &[Dep("axum")],
    },
    FrameworkRule {
        label: "Actix Web",
        evidence: &[Dep("actix-web")],
    },
    FrameworkRule {
        label: "Tokio",
        evidence: &[Dep("tokio")],
    },
    FrameworkRule {
        label: "Gin",
        evidence: &[Dep("github.com/gin-gonic/gin")],
    },
    FrameworkRule {
        label: "Docker",
        evidence: &[FileNamed("Dockerfile"), FileAt("docker-compose.yml"), FileAt("docker-compose.yaml")],
    },
];

pub struct PatternRule {
    pub label: &'static str,
    /// All of these top-level directory names must be present.
    pub requires: &'static [&'static str],
}

pub static PATTERN_RULES: &[PatternRule] = &[
    PatternRule {
        label: "MVC",
        requires: &["models", "views", "controllers"],
    },
    PatternRule {
        label: "Service Layer",
        requires: &["services"],
    },
    PatternRule {
        label: "Repository Pattern",
        requires: &["repositories"],
    },
    PatternRule {
        label: "Component-Based UI",
        requires: &["components"],
    },
    PatternRule {
        label: "Middleware Pipeline",
        requires: &["middleware"],
    },
    PatternRule {
        label: "Custom Hooks",
        requires: &["hooks"],
    },
    PatternRule {
        label: "Domain-Driven Design",
        requires: &["domain"],
    },
    PatternRule {
        label: "Route Handlers",
        requires: &["routes"],
    },
    PatternRule {
        label: "Monorepo",
        requires: &["packages"],
    },
    PatternRule {
        label: "Plugin Architecture",
        requires: &["plugins"],
    },
];

/// Directories treated as conventional source roots: their children count
/// as top-level for pattern detection.
const SOURCE_ROOTS: &[&str] = &["src", "lib", "app"];

/// Manifest file → build system label, checked in order.
const BUILD_SYSTEMS: &[(&str, &str)] = &[
    ("Cargo.toml", "Cargo"),
    ("pnpm-lock.yaml", "pnpm"),
    ("yarn.lock", "Yarn"),
    ("bun.lockb", "Bun"),
    ("package.json", "npm"),
    ("pom.xml", "Maven"),
    ("build.gradle.kts", "Gradle"),
    ("build.gradle", "Gradle"),
    ("go.mod", "Go Modules"),
    ("pyproject.toml", "Python (pyproject)"),
    ("setup.py", "setuptools"),
    ("requirements.txt", "pip"),
    ("Gemfile", "Bundler"),
    ("composer.json", "Composer"),
    ("CMakeLists.txt", "CMake"),
    ("Makefile", "Make"),
];

/// Files that conventionally start a program, by repository-relative path.
const ENTRY_POINTS: &[&str] = &[
    "src/main.rs",
    "src/lib.rs",
    "main.go",
    "main.py",
    "app.py",
    "manage.py",
    "src/index.ts",
    "src/index.tsx",
    "src/index.js",
    "src/main.ts",
    "src/main.tsx",
    "src/main.js",
    "src/app/page.tsx",
    "src/app/page.ts",
    "app/page.tsx",
    "pages/index.tsx",
    "pages/index.js",
    "index.js",
    "index.ts",
    "server.js",
    "server.ts",
];

/// Names of the manifests [`manifest_dependencies`] understands.
pub const MANIFEST_FILES: &[&str] = &[
    "package.json",
    "Cargo.toml",
    "requirements.txt",
    "pyproject.toml",
    "go.mod",
];

/// Everything the heuristic detectors found, bundled for prompts and reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Heuristics {
    pub frameworks: BTreeSet<String>,
    pub patterns: BTreeSet<String>,
    pub build_system: Option<String>,
    pub entry_points: Vec<String>,
}

impl Heuristics {
    pub fn detect<S: AsRef<str>>(paths: &[S], manifest_deps: &BTreeSet<String>) -> Self {
        Self {
            frameworks: detect_frameworks(paths, manifest_deps),
            patterns: detect_patterns(paths),
            build_system: detect_build_system(paths),
            entry_points: detect_entry_points(paths),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frameworks.is_empty()
            && self.patterns.is_empty()
            && self.build_system.is_none()
            && self.entry_points.is_empty()
    }

    /// Plain-text rendering used as grounding context in prompts.
    pub fn describe(&self) -> String {
        fn join(set: impl IntoIterator<Item = impl AsRef<str>>) -> String {
            let items: Vec<String> = set.into_iter().map(|s| s.as_ref().to_string()).collect();
            if items.is_empty() {
                "none detected".to_string()
            } else {
                items.join(", ")
            }
        }
        format!(
            "Frameworks: {}\nPatterns: {}\nBuild system: {}\nEntry points: {}",
            join(&self.frameworks),
            join(&self.patterns),
            self.build_system.as_deref().unwrap_or("none detected"),
            join(&self.entry_points),
        )
    }
}

/// Infer framework labels from file paths and manifest dependency names.
pub fn detect_frameworks<S: AsRef<str>>(
    paths: &[S],
    manifest_deps: &BTreeSet<String>,
) -> BTreeSet<String> {
    let normalized: BTreeSet<String> = paths.iter().map(|p| normalize_path(p.as_ref())).collect();
    let names: BTreeSet<&str> = normalized.iter().map(|p| split_path(p).1).collect();

    FRAMEWORK_RULES
        .iter()
        .filter(|rule| {
            rule.evidence.iter().any(|ev| match ev {
                Evidence::Dependency(dep) => manifest_deps.contains(*dep),
                Evidence::FileAt(path) => normalized.contains(*path),
                Evidence::FileNamed(name) => names.contains(name),
            })
        })
        .map(|rule| rule.label.to_string())
        .collect()
}

/// Infer structural pattern labels from top-level directory names.
pub fn detect_patterns<S: AsRef<str>>(paths: &[S]) -> BTreeSet<String> {
    let dirs = top_level_dirs(paths);
    PATTERN_RULES
        .iter()
        .filter(|rule| rule.requires.iter().all(|d| dirs.contains(*d)))
        .map(|rule| rule.label.to_string())
        .collect()
}

fn top_level_dirs<S: AsRef<str>>(paths: &[S]) -> BTreeSet<String> {
    let mut dirs = BTreeSet::new();
    for raw in paths {
        let path = normalize_path(raw.as_ref());
        let segments: Vec<&str> = path.split('/').collect();
        // The last segment is the file itself.
        if segments.len() < 2 {
            continue;
        }
        let first = segments[0].to_ascii_lowercase();
        if SOURCE_ROOTS.contains(&first.as_str()) && segments.len() >= 3 {
            dirs.insert(segments[1].to_ascii_lowercase());
        }
        dirs.insert(first);
    }
    dirs
}

/// Name the build system from root-level manifests, if any.
pub fn detect_build_system<S: AsRef<str>>(paths: &[S]) -> Option<String> {
    let root_files: BTreeSet<String> = paths
        .iter()
        .map(|p| normalize_path(p.as_ref()))
        .filter(|p| !p.contains('/'))
        .collect();
    BUILD_SYSTEMS
        .iter()
        .find(|(file, _)| root_files.contains(*file))
        .map(|(_, label)| label.to_string())
}

/// Conventional entry-point files present in the tree, plus `cmd/*/main.go`.
pub fn detect_entry_points<S: AsRef<str>>(paths: &[S]) -> Vec<String> {
    let normalized: BTreeSet<String> = paths.iter().map(|p| normalize_path(p.as_ref())).collect();
    let mut found: Vec<String> = ENTRY_POINTS
        .iter()
        .filter(|p| normalized.contains(**p))
        .map(|p| p.to_string())
        .collect();
    for path in &normalized {
        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() == 3 && segments[0] == "cmd" && segments[2] == "main.go" {
            found.push(path.clone());
        }
    }
    found
}

/// Whether `path` names a manifest [`manifest_dependencies`] can read.
pub fn is_manifest(path: &str) -> bool {
    MANIFEST_FILES.contains(&split_path(path).1)
}

/// Dependency names declared in a manifest file.
///
/// The manifest kind is chosen by file name. Unparsable or unknown
/// manifests yield an empty set.
pub fn manifest_dependencies(path: &str, content: &str) -> BTreeSet<String> {
    match split_path(path).1 {
        "package.json" => package_json_deps(content),
        "Cargo.toml" => cargo_toml_deps(content),
        "requirements.txt" => requirements_deps(content),
        "pyproject.toml" => pyproject_deps(content),
        "go.mod" => go_mod_deps(content),
        _ => BTreeSet::new(),
    }
}

fn package_json_deps(content: &str) -> BTreeSet<String> {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(content) else {
        return BTreeSet::new();
    };
    ["dependencies", "devDependencies", "peerDependencies"]
        .iter()
        .filter_map(|key| json.get(key).and_then(|d| d.as_object()))
        .flat_map(|deps| deps.keys().cloned())
        .collect()
}

fn cargo_toml_deps(content: &str) -> BTreeSet<String> {
    let Ok(value) = toml::from_str::<toml::Value>(content) else {
        return BTreeSet::new();
    };
    let mut deps = BTreeSet::new();
    for key in ["dependencies", "dev-dependencies", "build-dependencies"] {
        if let Some(table) = value.get(key).and_then(|t| t.as_table()) {
            deps.extend(table.keys().cloned());
        }
    }
    if let Some(table) = value
        .get("workspace")
        .and_then(|w| w.get("dependencies"))
        .and_then(|t| t.as_table())
    {
        deps.extend(table.keys().cloned());
    }
    deps
}

/// Strip version specifiers and extras: `Django>=4.2` → `django`.
fn python_requirement_name(line: &str) -> Option<String> {
    let line = line.split('#').next()?.trim();
    if line.is_empty() || line.starts_with('-') {
        return None;
    }
    let end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
        .unwrap_or(line.len());
    let name = &line[..end];
    if name.is_empty() {
        None
    } else {
        Some(name.to_ascii_lowercase())
    }
}

fn requirements_deps(content: &str) -> BTreeSet<String> {
    content.lines().filter_map(python_requirement_name).collect()
}

fn pyproject_deps(content: &str) -> BTreeSet<String> {
    let Ok(value) = toml::from_str::<toml::Value>(content) else {
        return BTreeSet::new();
    };
    let mut deps = BTreeSet::new();
    if let Some(list) = value
        .get("project")
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_array())
    {
        deps.extend(
            list.iter()
                .filter_map(|v| v.as_str())
                .filter_map(python_requirement_name),
        );
    }
    if let Some(table) = value
        .get("tool")
        .and_then(|t| t.get("poetry"))
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_table())
    {
        deps.extend(
            table
                .keys()
                .filter(|k| k.as_str() != "python")
                .map(|k| k.to_ascii_lowercase()),
        );
    }
    deps
}

fn go_mod_deps(content: &str) -> BTreeSet<String> {
    let mut deps = BTreeSet::new();
    let mut in_block = false;
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with("require (") {
            in_block = true;
            continue;
        }
        if in_block && line == ")" {
            in_block = false;
            continue;
        }
        let spec = if in_block {
            Some(line)
        } else {
            line.strip_prefix("require ")
        };
        if let Some(module) = spec.and_then(|s| s.split_whitespace().next()) {
            if !module.starts_with("//") {
                deps.insert(module.to_string());
            }
        }
    }
    deps
}

/// Merge dependency sets from several manifests.
pub fn merge_dependencies<'a>(
    manifests: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> BTreeSet<String> {
    let mut all = BTreeSet::new();
    for (path, content) in manifests {
        all.extend(manifest_dependencies(path, content));
    }
    all
}
