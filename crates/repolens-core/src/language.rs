//! Best-effort language tagging from file names and extensions.

/// Well-known extension-less (or special) file names.
const NAMED_FILES: &[(&str, &str)] = &[
    ("Dockerfile", "dockerfile"),
    ("Makefile", "makefile"),
    ("GNUmakefile", "makefile"),
    ("Rakefile", "ruby"),
    ("Gemfile", "ruby"),
    ("Podfile", "ruby"),
    ("Jenkinsfile", "groovy"),
    ("CMakeLists.txt", "cmake"),
];

const EXTENSIONS: &[(&str, &str)] = &[
    ("rs", "rust"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("mts", "typescript"),
    ("cts", "typescript"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("mjs", "javascript"),
    ("cjs", "javascript"),
    ("py", "python"),
    ("pyi", "python"),
    ("go", "go"),
    ("java", "java"),
    ("kt", "kotlin"),
    ("kts", "kotlin"),
    ("scala", "scala"),
    ("swift", "swift"),
    ("m", "objective-c"),
    ("mm", "objective-c"),
    ("c", "c"),
    ("h", "c"),
    ("cc", "cpp"),
    ("cpp", "cpp"),
    ("cxx", "cpp"),
    ("hpp", "cpp"),
    ("hh", "cpp"),
    ("cs", "csharp"),
    ("rb", "ruby"),
    ("php", "php"),
    ("ex", "elixir"),
    ("exs", "elixir"),
    ("erl", "erlang"),
    ("hs", "haskell"),
    ("clj", "clojure"),
    ("dart", "dart"),
    ("lua", "lua"),
    ("zig", "zig"),
    ("sh", "shell"),
    ("bash", "shell"),
    ("zsh", "shell"),
    ("ps1", "powershell"),
    ("sql", "sql"),
    ("html", "html"),
    ("htm", "html"),
    ("css", "css"),
    ("scss", "scss"),
    ("sass", "sass"),
    ("less", "less"),
    ("vue", "vue"),
    ("svelte", "svelte"),
    ("json", "json"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("toml", "toml"),
    ("xml", "xml"),
    ("md", "markdown"),
    ("mdx", "markdown"),
    ("rst", "restructuredtext"),
    ("graphql", "graphql"),
    ("gql", "graphql"),
    ("proto", "protobuf"),
    ("tf", "hcl"),
    ("hcl", "hcl"),
    ("gradle", "groovy"),
    ("groovy", "groovy"),
];

/// Infer a language tag for `name` with (lowercased) `extension`.
///
/// Returns `None` when nothing is known about the file type.
pub fn infer_language(name: &str, extension: Option<&str>) -> Option<&'static str> {
    if let Some((_, lang)) = NAMED_FILES.iter().find(|(n, _)| *n == name) {
        return Some(lang);
    }
    let ext = extension?;
    EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_extensions() {
        assert_eq!(infer_language("main.rs", Some("rs")), Some("rust"));
        assert_eq!(infer_language("page.tsx", Some("tsx")), Some("typescript"));
        assert_eq!(infer_language("app.py", Some("py")), Some("python"));
    }

    #[test]
    fn test_named_files_take_precedence() {
        assert_eq!(infer_language("Dockerfile", None), Some("dockerfile"));
        assert_eq!(infer_language("CMakeLists.txt", Some("txt")), Some("cmake"));
    }

    #[test]
    fn test_unknown() {
        assert_eq!(infer_language("LICENSE", None), None);
        assert_eq!(infer_language("data.bin", Some("bin")), None);
    }
}
