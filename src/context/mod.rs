//! Context selection: which files the generator edits and which it only reads.

use sandforge_common::{FileKind, ProjectManifest, normalize_path};
use serde::Serialize;

use crate::errors::ContextError;
use crate::intent::{ClassifierConfig, EditIntent, IntentClassifier, file_name, file_stem};

/// Base names of global style sheets, matched case-insensitively.
const GLOBAL_STYLE_STEMS: &[&str] = &["index", "app", "global", "globals", "main", "styles"];

/// The two disjoint file lists handed to the generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedContext {
    pub intent: EditIntent,
    /// Files the generator is expected to edit
    pub primary_files: Vec<String>,
    /// Everything else in the manifest, significant files first
    pub context_files: Vec<String>,
}

pub struct ContextSelector {
    classifier: IntentClassifier,
}

impl Default for ContextSelector {
    fn default() -> Self {
        Self::new(IntentClassifier::default())
    }
}

impl ContextSelector {
    pub fn new(classifier: IntentClassifier) -> Self {
        Self { classifier }
    }

    pub fn with_config(config: ClassifierConfig) -> Self {
        Self::new(IntentClassifier::new(config))
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    pub fn select(
        &self,
        prompt: &str,
        manifest: Option<&ProjectManifest>,
    ) -> Result<SelectedContext, ContextError> {
        self.select_with_history(prompt, manifest, &[])
    }

    /// Classify `prompt` and split the manifest into primary and context
    /// files. Fails when there is no manifest to select from.
    pub fn select_with_history(
        &self,
        prompt: &str,
        manifest: Option<&ProjectManifest>,
        recent_files: &[String],
    ) -> Result<SelectedContext, ContextError> {
        let manifest = manifest.ok_or_else(|| {
            ContextError::InvalidManifest("no project manifest to select context from".into())
        })?;

        let intent = self
            .classifier
            .classify_with_history(prompt, Some(manifest), recent_files);
        Ok(split_context(intent, manifest))
    }
}

/// Resolve the intent's target hints against `manifest` and partition every
/// manifest path into exactly one of the two lists.
pub fn split_context(intent: EditIntent, manifest: &ProjectManifest) -> SelectedContext {
    let primary_files = resolve_targets(&intent.target_files, manifest);

    let mut context_files: Vec<String> = significant_files(manifest)
        .into_iter()
        .filter(|p| !primary_files.contains(p))
        .collect();
    for path in manifest.paths() {
        if !primary_files.iter().any(|p| p == path) && !context_files.iter().any(|p| p == path) {
            context_files.push(path.to_string());
        }
    }

    SelectedContext {
        intent,
        primary_files,
        context_files,
    }
}

/// Map target hints to real manifest paths.
///
/// An exact path wins; otherwise every file whose base name contains the
/// hint's stem (case-insensitive) is taken. Unresolved hints are dropped.
fn resolve_targets(hints: &[String], manifest: &ProjectManifest) -> Vec<String> {
    let mut resolved: Vec<String> = Vec::new();
    let mut push = |path: &str| {
        if !resolved.iter().any(|p| p == path) {
            resolved.push(path.to_string());
        }
    };

    for hint in hints {
        let hint = normalize_path(hint);
        if manifest.contains(&hint) {
            push(&hint);
            continue;
        }
        let stem = file_stem(&hint).to_lowercase();
        if stem.is_empty() {
            continue;
        }
        for path in manifest.paths() {
            if file_name(path).to_lowercase().contains(&stem) {
                push(path);
            }
        }
    }
    resolved
}

/// Architecturally significant files present in the manifest, in order:
/// application root, global style sheets, dependency manifest, design-system
/// config.
fn significant_files(manifest: &ProjectManifest) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut push = |path: &str| {
        if manifest.contains(path) && !found.iter().any(|p| p == path) {
            found.push(path.to_string());
        }
    };

    if !manifest.entry_point().is_empty() {
        push(manifest.entry_point());
    }
    for path in manifest.paths() {
        if file_stem(path) == "App" && path.starts_with("src/") {
            push(path);
        }
    }
    for (path, file) in manifest.files() {
        let stem = file_stem(path).to_lowercase();
        if file.kind == FileKind::Style && GLOBAL_STYLE_STEMS.contains(&stem.as_str()) {
            push(path);
        }
    }
    push("package.json");
    for path in manifest.paths() {
        let name = file_name(path);
        if name.starts_with("tailwind.config.") || name.starts_with("theme.") {
            push(path);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::scan_files;

    fn sample_manifest() -> ProjectManifest {
        scan_files([
            ("src/App.jsx", "import Header from './components/Header';"),
            ("src/main.jsx", "import App from './App';"),
            ("src/components/Header.jsx", "export default function Header() {}"),
            ("src/components/Footer.jsx", "export default function Footer() {}"),
            ("src/components/LoginForm.jsx", "export default function LoginForm() {}"),
            ("src/index.css", "body {}"),
            ("package.json", "{}"),
            ("tailwind.config.js", "export default {}"),
            ("README.md", "# app"),
        ])
    }

    fn assert_partition(ctx: &SelectedContext, manifest: &ProjectManifest) {
        for p in &ctx.primary_files {
            assert!(!ctx.context_files.contains(p), "{} in both lists", p);
        }
        let mut all: Vec<&str> = ctx
            .primary_files
            .iter()
            .chain(&ctx.context_files)
            .map(String::as_str)
            .collect();
        all.sort();
        let expected: Vec<&str> = manifest.paths().collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_select_requires_manifest() {
        let selector = ContextSelector::default();
        let err = selector.select("add a header", None).unwrap_err();
        assert!(matches!(err, ContextError::InvalidManifest(_)));
    }

    #[test]
    fn test_select_resolves_named_component() {
        let manifest = sample_manifest();
        let ctx = ContextSelector::default()
            .select("make the header background blue", Some(&manifest))
            .unwrap();

        assert_eq!(ctx.primary_files[0], "src/components/Header.jsx");
        assert_partition(&ctx, &manifest);
    }

    #[test]
    fn test_significant_files_lead_context() {
        let manifest = sample_manifest();
        let ctx = ContextSelector::default()
            .select("change the footer text", Some(&manifest))
            .unwrap();

        assert!(ctx.primary_files.contains(&"src/components/Footer.jsx".to_string()));
        assert_eq!(
            &ctx.context_files[..4],
            &["src/App.jsx", "src/index.css", "package.json", "tailwind.config.js"]
        );
        assert_partition(&ctx, &manifest);
    }

    #[test]
    fn test_unresolved_hints_are_dropped() {
        let manifest = scan_files([("src/App.jsx", ""), ("src/index.css", "")]);
        let ctx = ContextSelector::default()
            .select("add a pricing table", Some(&manifest))
            .unwrap();

        // Pricing.jsx is only a conventional hint, not a manifest path
        assert!(ctx.intent.target_files.iter().any(|t| t.ends_with("Pricing.jsx")));
        assert!(ctx.primary_files.is_empty());
        assert_partition(&ctx, &manifest);
    }

    #[test]
    fn test_primary_significant_file_not_repeated() {
        let manifest = sample_manifest();
        let ctx = ContextSelector::default()
            .select("update the app title", Some(&manifest))
            .unwrap();

        assert!(ctx.primary_files.contains(&"src/App.jsx".to_string()));
        assert!(!ctx.context_files.contains(&"src/App.jsx".to_string()));
        assert_partition(&ctx, &manifest);
    }

    #[test]
    fn test_partition_holds_for_empty_manifest() {
        let manifest = ProjectManifest::empty();
        let ctx = ContextSelector::default()
            .select("anything", Some(&manifest))
            .unwrap();
        assert!(ctx.primary_files.is_empty());
        assert!(ctx.context_files.is_empty());
    }
}
