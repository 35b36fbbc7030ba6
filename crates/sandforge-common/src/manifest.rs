//! Structural snapshot of a project: files, import graph and routes.
//!
//! A `ProjectManifest` is immutable once built. The import graph is derived
//! from `files` inside [`ProjectManifest::new`], so every graph edge always
//! corresponds to an entry in some file's `imports`. Callers that observe a
//! changed file set build a new manifest and swap it in as a whole.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse classification of a project file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    Component,
    Page,
    Style,
    Config,
    Script,
    Markup,
    Data,
    Other,
}

const PAGE_DIRS: &[&str] = &["pages", "routes", "views", "app"];

impl FileKind {
    /// Classify a logical path by extension and location.
    pub fn from_path(path: &str) -> Self {
        let path = normalize_path(path);
        let file_name = path.rsplit('/').next().unwrap_or(path.as_str());
        let lower = file_name.to_lowercase();
        let ext = lower.rsplit_once('.').map(|(_, e)| e).unwrap_or("");

        if lower == "package.json"
            || lower.starts_with("tsconfig")
            || lower.contains(".config.")
            || lower.starts_with(".eslintrc")
            || lower == ".babelrc"
        {
            return FileKind::Config;
        }

        let in_page_dir = path
            .split('/')
            .rev()
            .skip(1)
            .any(|dir| PAGE_DIRS.contains(&dir.to_lowercase().as_str()));

        match ext {
            "css" | "scss" | "sass" | "less" => FileKind::Style,
            "html" | "htm" => FileKind::Markup,
            "json" | "yaml" | "yml" | "csv" | "toml" => FileKind::Data,
            "jsx" | "tsx" | "vue" | "svelte" => {
                if in_page_dir {
                    FileKind::Page
                } else {
                    FileKind::Component
                }
            }
            "js" | "ts" | "mjs" | "cjs" => {
                if in_page_dir {
                    FileKind::Page
                } else {
                    FileKind::Script
                }
            }
            _ => FileKind::Other,
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileKind::Component => "component",
            FileKind::Page => "page",
            FileKind::Style => "style",
            FileKind::Config => "config",
            FileKind::Script => "script",
            FileKind::Markup => "markup",
            FileKind::Data => "data",
            FileKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Per-file entry of a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub kind: FileKind,
    pub content: String,
    pub last_modified: DateTime<Utc>,
    /// Resolved logical paths of imported project files
    #[serde(default)]
    pub imports: Vec<String>,
    /// Exported symbol names
    #[serde(default)]
    pub exports: Vec<String>,
}

impl ManifestFile {
    pub fn new(path: &str, content: impl Into<String>) -> Self {
        Self {
            kind: FileKind::from_path(path),
            content: content.into(),
            last_modified: Utc::now(),
            imports: Vec::new(),
            exports: Vec::new(),
        }
    }
}

/// Import edges of one file in both directions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub imports: Vec<String>,
    pub imported_by: Vec<String>,
}

/// A client-side route and the file that renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub path: String,
    pub component_path: String,
}

/// Broad shape of the project, used to bias intent classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    Dashboard,
    Ecommerce,
    Blog,
    Landing,
    #[default]
    Unknown,
}

const PROJECT_TYPE_KEYWORDS: &[(ProjectType, &[&str])] = &[
    (
        ProjectType::Dashboard,
        &["dashboard", "chart", "analytics", "metric", "admin"],
    ),
    (
        ProjectType::Ecommerce,
        &["cart", "product", "checkout", "shop", "store"],
    ),
    (ProjectType::Blog, &["blog", "post", "article", "author"]),
    (
        ProjectType::Landing,
        &["hero", "landing", "pricing", "testimonial", "cta"],
    ),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectManifest {
    entry_point: String,
    files: BTreeMap<String, ManifestFile>,
    component_graph: BTreeMap<String, GraphNode>,
    routes: Vec<Route>,
}

impl ProjectManifest {
    /// Build a manifest, normalizing every path and deriving the import graph.
    ///
    /// Imports that point outside the file set stay in `files` but produce no
    /// graph edge.
    pub fn new(
        entry_point: impl AsRef<str>,
        files: BTreeMap<String, ManifestFile>,
        routes: Vec<Route>,
    ) -> Self {
        let files: BTreeMap<String, ManifestFile> = files
            .into_iter()
            .map(|(path, mut file)| {
                file.imports = file.imports.iter().map(|p| normalize_path(p)).collect();
                (normalize_path(&path), file)
            })
            .collect();

        let mut component_graph: BTreeMap<String, GraphNode> = files
            .keys()
            .map(|path| (path.clone(), GraphNode::default()))
            .collect();

        for (path, file) in &files {
            for target in &file.imports {
                if !files.contains_key(target) || target == path {
                    continue;
                }
                if let Some(node) = component_graph.get_mut(path)
                    && !node.imports.contains(target)
                {
                    node.imports.push(target.clone());
                }
                if let Some(node) = component_graph.get_mut(target)
                    && !node.imported_by.contains(path)
                {
                    node.imported_by.push(path.clone());
                }
            }
        }

        let routes = routes
            .into_iter()
            .map(|r| Route {
                path: r.path,
                component_path: normalize_path(&r.component_path),
            })
            .collect();

        Self {
            entry_point: normalize_path(entry_point.as_ref()),
            files,
            component_graph,
            routes,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn files(&self) -> &BTreeMap<String, ManifestFile> {
        &self.files
    }

    pub fn file(&self, path: &str) -> Option<&ManifestFile> {
        self.files.get(&normalize_path(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(&normalize_path(path))
    }

    /// All file paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn component_graph(&self) -> &BTreeMap<String, GraphNode> {
        &self.component_graph
    }

    /// Files that import `path`.
    pub fn dependents(&self, path: &str) -> &[String] {
        self.component_graph
            .get(&normalize_path(path))
            .map(|n| n.imported_by.as_slice())
            .unwrap_or(&[])
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Guess the project type from keywords in paths and file contents.
    ///
    /// The type with the most keyword hits wins; ties go to the earlier entry
    /// of the keyword table.
    pub fn project_type(&self) -> ProjectType {
        let mut best = (ProjectType::Unknown, 0usize);
        for (project_type, keywords) in PROJECT_TYPE_KEYWORDS {
            let hits: usize = self
                .files
                .iter()
                .map(|(path, file)| {
                    let path = path.to_lowercase();
                    let content = file.content.to_lowercase();
                    keywords
                        .iter()
                        .filter(|k| path.contains(*k) || content.contains(*k))
                        .count()
                })
                .sum();
            if hits > best.1 {
                best = (*project_type, hits);
            }
        }
        best.0
    }
}

/// Normalize a logical project path.
///
/// Separators become `/`, empty and `.` segments are dropped, `..` pops the
/// previous segment, and no leading or trailing slash survives.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.trim().split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}
