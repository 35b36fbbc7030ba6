//! Manifest scanning.
//!
//! Builds a [`ProjectManifest`] from an in-memory file set (the sandbox file
//! cache) or from a project directory on disk. Imports are resolved to project
//! paths, exports and client-side routes are extracted with regexes.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use sandforge_common::{ManifestFile, ProjectManifest, Route, normalize_path};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::LazyLock;
use walkdir::WalkDir;

use crate::deps::{is_local_specifier, module_specifiers};

static EXPORT_DECL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)\bexport\s+(?:default\s+)?(?:async\s+)?(?:function\*?|class|const|let|var)\s+([A-Za-z_$][\w$]*)",
    )
    .unwrap()
});

static EXPORT_DEFAULT_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)\bexport\s+default\s+([A-Za-z_$][\w$]*)\s*;?\s*$").unwrap());

static EXPORT_LIST_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bexport\s*\{([^}]*)\}").unwrap());

static DEFAULT_IMPORT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bimport\s+([A-Za-z_$][\w$]*)\s*(?:,\s*\{[^}]*\})?\s*from\s*["']([^"']+)["']"#)
        .unwrap()
});

// <Route path="/about" element={<About />} /> or component={About}
static JSX_ROUTE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"<Route\b[^>]*?\bpath\s*=\s*["']([^"']+)["'][^>]*?\b(?:element\s*=\s*\{\s*<\s*|component\s*=\s*\{\s*)([A-Z][\w]*)"#,
    )
    .unwrap()
});

// { path: "/about", element: <About /> } or component: About
static OBJECT_ROUTE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\{\s*path\s*:\s*["']([^"']+)["']\s*,\s*(?:element\s*:\s*<\s*|component\s*:\s*)([A-Z][\w]*)"#,
    )
    .unwrap()
});

/// Entry point candidates in priority order.
const ENTRY_CANDIDATES: &[&str] = &[
    "src/App.jsx",
    "src/App.tsx",
    "src/App.js",
    "src/App.ts",
    "src/main.jsx",
    "src/main.tsx",
    "src/main.js",
    "src/main.ts",
    "src/index.jsx",
    "src/index.tsx",
    "src/index.js",
    "src/index.ts",
    "index.html",
];

const RESOLVE_EXTENSIONS: &[&str] = &[
    ".jsx", ".tsx", ".js", ".ts", ".mjs", ".css", ".scss", ".json", ".vue", ".svelte",
];

const SKIP_DIRS: &[&str] = &["node_modules", "dist", "build", "coverage", "target"];

const TEXT_EXTENSIONS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "mjs", "cjs", "css", "scss", "sass", "less", "html", "json", "md",
    "vue", "svelte", "svg", "txt", "yaml", "yml", "toml",
];

/// Largest file `scan_dir` will read.
const MAX_SCAN_BYTES: u64 = 1024 * 1024;

/// A file handed to the scanner.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
    pub last_modified: DateTime<Utc>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            last_modified: Utc::now(),
        }
    }
}

/// Build a manifest from a path → content map.
pub fn scan_files<I, P, C>(files: I) -> ProjectManifest
where
    I: IntoIterator<Item = (P, C)>,
    P: Into<String>,
    C: Into<String>,
{
    build_manifest(
        files
            .into_iter()
            .map(|(path, content)| SourceFile::new(path, content)),
    )
}

/// Build a manifest from files carrying their own modification times.
pub fn build_manifest<I>(sources: I) -> ProjectManifest
where
    I: IntoIterator<Item = SourceFile>,
{
    let sources: BTreeMap<String, SourceFile> = sources
        .into_iter()
        .map(|s| (normalize_path(&s.path), s))
        .filter(|(path, _)| !path.is_empty())
        .collect();

    let known: Vec<&str> = sources.keys().map(String::as_str).collect();
    let mut files: BTreeMap<String, ManifestFile> = BTreeMap::new();
    let mut routes: Vec<Route> = Vec::new();

    for (path, source) in &sources {
        let imports: Vec<String> = module_specifiers(&source.content)
            .iter()
            .filter(|spec| is_local_specifier(spec))
            .map(|spec| resolve_import(path, spec, &known))
            .fold(Vec::new(), |mut acc, p| {
                if !acc.contains(&p) {
                    acc.push(p);
                }
                acc
            });

        routes.extend(extract_routes(path, &source.content, &known));

        let mut file = ManifestFile::new(path, source.content.clone());
        file.last_modified = source.last_modified;
        file.imports = imports;
        file.exports = extract_exports(&source.content);
        files.insert(path.clone(), file);
    }

    let entry_point = ENTRY_CANDIDATES
        .iter()
        .find(|c| sources.contains_key(**c))
        .map(|c| c.to_string())
        .or_else(|| sources.keys().next().cloned())
        .unwrap_or_default();

    ProjectManifest::new(entry_point, files, routes)
}

/// Scan a project directory from disk.
///
/// Dependency, build and hidden directories are skipped, as are non-text and
/// oversized files.
pub fn scan_dir(dir: &Path) -> Result<ProjectManifest> {
    let mut sources = Vec::new();

    let walker = WalkDir::new(dir).into_iter().filter_entry(|entry| {
        let name = entry.file_name().to_string_lossy();
        if entry.depth() == 0 {
            return true;
        }
        if entry.file_type().is_dir() {
            return !name.starts_with('.') && !SKIP_DIRS.contains(&name.as_ref());
        }
        !name.starts_with('.')
    });

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_text = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| TEXT_EXTENSIONS.contains(&e.to_lowercase().as_str()));
        if !is_text {
            continue;
        }

        let metadata = entry
            .metadata()
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        if metadata.len() > MAX_SCAN_BYTES {
            continue;
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let relative = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();
        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        sources.push(SourceFile {
            path: relative,
            content,
            last_modified,
        });
    }

    Ok(build_manifest(sources))
}

/// Resolve a local specifier imported by `from` to a project path.
///
/// Tries the exact path, known extensions, then `index.*`. An unresolved
/// specifier is returned normalized but unprobed.
fn resolve_import(from: &str, specifier: &str, known: &[&str]) -> String {
    let joined = if let Some(rest) = specifier
        .strip_prefix("@/")
        .or_else(|| specifier.strip_prefix("~/"))
    {
        normalize_path(&format!("src/{}", rest))
    } else if specifier.starts_with('/') {
        normalize_path(specifier)
    } else {
        let base = from.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        normalize_path(&format!("{}/{}", base, specifier))
    };

    if known.contains(&joined.as_str()) {
        return joined;
    }
    for ext in RESOLVE_EXTENSIONS {
        let candidate = format!("{}{}", joined, ext);
        if known.contains(&candidate.as_str()) {
            return candidate;
        }
    }
    for ext in RESOLVE_EXTENSIONS {
        let candidate = format!("{}/index{}", joined, ext);
        if known.contains(&candidate.as_str()) {
            return candidate;
        }
    }
    joined
}

fn extract_exports(content: &str) -> Vec<String> {
    let mut exports: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        let name = name.trim();
        if !name.is_empty() && !exports.iter().any(|e| e == name) {
            exports.push(name.to_string());
        }
    };

    for cap in EXPORT_DECL_REGEX.captures_iter(content) {
        push(&cap[1]);
    }
    for cap in EXPORT_DEFAULT_NAME_REGEX.captures_iter(content) {
        push(&cap[1]);
    }
    for cap in EXPORT_LIST_REGEX.captures_iter(content) {
        for item in cap[1].split(',') {
            // `a as b` exports `b`
            let exported = item.rsplit(" as ").next().unwrap_or(item);
            push(exported);
        }
    }
    exports
}

fn extract_routes(path: &str, content: &str, known: &[&str]) -> Vec<Route> {
    let imported: HashMap<String, String> = DEFAULT_IMPORT_REGEX
        .captures_iter(content)
        .filter(|cap| is_local_specifier(&cap[2]))
        .map(|cap| (cap[1].to_string(), resolve_import(path, &cap[2], known)))
        .collect();

    JSX_ROUTE_REGEX
        .captures_iter(content)
        .chain(OBJECT_ROUTE_REGEX.captures_iter(content))
        .filter_map(|cap| {
            let route_path = cap[1].to_string();
            let component = &cap[2];
            let component_path = imported.get(component).cloned().or_else(|| {
                known
                    .iter()
                    .copied()
                    .find(|&p| {
                        let name = p.rsplit('/').next().unwrap_or(p);
                        name.split('.').next() == Some(component)
                    })
                    .map(str::to_string)
            })?;
            Some(Route {
                path: route_path,
                component_path,
            })
        })
        .collect()
}
