//! External package detection for generated code.
//!
//! Two independent sources are merged:
//! - import / require / dynamic import statements with bare module specifiers
//! - declarative tags: `<package>name</package>`, `<packages>a, b</packages>`
//!   and the `<dependency>` / `<dependencies>` aliases
//!
//! Relative specifiers, path aliases, runtime built-ins and packages that
//! are already installed never appear in the result.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

// `import x from "y"`, `import "y"`, `export { x } from "y"`
static STATIC_IMPORT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)\b(?:import|export)\s+(?:type\s+)?(?:[\w*$\s{},]*?\s*from\s*)?["']([^"'\n]+)["']"#)
        .unwrap()
});

// `require("y")`, `import("y")`
static CALL_IMPORT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:require|import)\s*\(\s*["']([^"'\n]+)["']\s*\)"#).unwrap()
});

static PACKAGE_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(package|dependency)>\s*(.*?)\s*</(?:package|dependency)>").unwrap()
});

static PACKAGES_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(packages|dependencies)>\s*(.*?)\s*</(?:packages|dependencies)>").unwrap()
});

// Valid npm-style name, optionally scoped
static PACKAGE_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:@[a-z0-9][\w.~-]*/)?[a-z0-9][\w.~-]*$").unwrap()
});

/// Node.js built-in modules, which are never installed.
pub const BUILTIN_MODULES: &[&str] = &[
    "assert",
    "buffer",
    "child_process",
    "cluster",
    "crypto",
    "dgram",
    "dns",
    "events",
    "fs",
    "http",
    "http2",
    "https",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "querystring",
    "readline",
    "stream",
    "string_decoder",
    "timers",
    "tls",
    "url",
    "util",
    "v8",
    "vm",
    "worker_threads",
    "zlib",
];

/// All module specifiers referenced by import-style statements, in order of
/// appearance (duplicates kept).
pub fn module_specifiers(source: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = STATIC_IMPORT_REGEX
        .captures_iter(source)
        .chain(CALL_IMPORT_REGEX.captures_iter(source))
        .filter_map(|cap| cap.get(1).map(|m| (m.start(), m.as_str().trim().to_string())))
        .collect();
    found.sort_by_key(|(pos, _)| *pos);
    found.dedup();
    found.into_iter().map(|(_, spec)| spec).collect()
}

/// Whether a specifier points into the project rather than at a package.
pub fn is_local_specifier(specifier: &str) -> bool {
    specifier.starts_with('.')
        || specifier.starts_with('/')
        || specifier.starts_with("@/")
        || specifier.starts_with("~/")
}

/// Reduce a bare specifier to its package name.
///
/// `lodash/fp` becomes `lodash`, `@scope/name/sub` becomes `@scope/name`.
/// Returns `None` for local specifiers, built-ins, URLs and malformed names.
pub fn package_name(specifier: &str) -> Option<String> {
    let specifier = specifier.trim();
    if specifier.is_empty() || is_local_specifier(specifier) || specifier.contains("://") {
        return None;
    }
    if specifier.starts_with("node:") {
        return None;
    }

    let mut parts = specifier.split('/');
    let first = parts.next()?;
    let name = if first.starts_with('@') {
        let second = parts.next().filter(|s| !s.is_empty())?;
        format!("{}/{}", first, second)
    } else {
        first.to_string()
    };

    if BUILTIN_MODULES.contains(&name.as_str()) || !PACKAGE_NAME_REGEX.is_match(&name) {
        return None;
    }
    Some(name)
}

/// Packages declared through the tag protocol, in order of appearance.
pub fn declared_packages(text: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();

    for cap in PACKAGE_TAG_REGEX.captures_iter(text) {
        if let Some(m) = cap.get(2) {
            found.push((m.start(), m.as_str().trim().to_string()));
        }
    }
    for cap in PACKAGES_TAG_REGEX.captures_iter(text) {
        if let Some(m) = cap.get(2) {
            for (i, name) in m.as_str().split([',', '\n']).enumerate() {
                found.push((m.start() + i, name.trim().to_string()));
            }
        }
    }

    found.sort_by_key(|(pos, _)| *pos);
    found
        .into_iter()
        .map(|(_, name)| name)
        .filter(|name| !name.is_empty())
        .collect()
}

/// Extracts the external packages a batch of generated files needs.
#[derive(Debug, Clone, Default)]
pub struct DependencyExtractor {
    installed: HashSet<String>,
}

impl DependencyExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclude names already present in the sandbox.
    pub fn with_installed<I, S>(installed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            installed: installed.into_iter().map(Into::into).collect(),
        }
    }

    /// Package names referenced by `files` (path, content) and by any
    /// declarative tags in `raw_text`, deduplicated by exact name in order of
    /// first appearance.
    pub fn extract<'a, I>(&self, files: I, raw_text: Option<&str>) -> Vec<String>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut packages: Vec<String> = Vec::new();
        let mut add = |name: String| {
            if !self.installed.contains(&name) && seen.insert(name.clone()) {
                packages.push(name);
            }
        };

        for (path, content) in files {
            if !is_script_path(path) {
                continue;
            }
            for specifier in module_specifiers(content) {
                if let Some(name) = package_name(&specifier) {
                    add(name);
                }
            }
        }

        if let Some(text) = raw_text {
            for declared in declared_packages(text) {
                // Declared names may carry a version: `react-icons@5`
                if let Some(name) = package_name(strip_version(&declared)) {
                    add(name);
                }
            }
        }

        packages
    }
}

fn is_script_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    [".js", ".jsx", ".ts", ".tsx", ".mjs", ".cjs", ".vue", ".svelte"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

fn strip_version(name: &str) -> &str {
    // Keep the leading `@` of a scoped name
    match name.char_indices().skip(1).find(|(_, c)| *c == '@') {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}
