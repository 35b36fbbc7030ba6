//! Edit intent classification.
//!
//! Maps a free-text request (plus the current manifest, when there is one) to
//! a typed [`EditIntent`]. Classification is a pure scoring pass over an
//! ordered rule table and never fails: when no rule clears the confidence
//! threshold the request is treated as a complete build.

pub mod rules;

use regex::Regex;
use sandforge_common::{FileKind, ProjectManifest, ProjectType};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub use rules::{DEFAULT_RULES, IntentRule, RuleSpec, default_rules};
use rules::{FEATURE_VOCABULARY, UI_VOCABULARY, contains_word};

// Words that make a prompt refer back to earlier turns
static BACK_REFERENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(it|that|this|those|these|same|again|previous|the one)\b").unwrap()
});

/// Closed set of edit intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntentKind {
    AddComponent,
    AddPage,
    AddFeature,
    StyleUpdate,
    DataIntegration,
    InteractiveElement,
    LayoutChange,
    ContentUpdate,
    CompleteBuild,
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntentKind::AddComponent => "add-component",
            IntentKind::AddPage => "add-page",
            IntentKind::AddFeature => "add-feature",
            IntentKind::StyleUpdate => "style-update",
            IntentKind::DataIntegration => "data-integration",
            IntentKind::InteractiveElement => "interactive-element",
            IntentKind::LayoutChange => "layout-change",
            IntentKind::ContentUpdate => "content-update",
            IntentKind::CompleteBuild => "complete-build",
        };
        write!(f, "{}", s)
    }
}

/// Classified purpose of one user turn. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditIntent {
    #[serde(rename = "type")]
    pub kind: IntentKind,
    /// In `[0, 1]`
    pub confidence: f64,
    /// Candidate paths, highest confidence first
    pub target_files: Vec<String>,
    pub keywords: Vec<String>,
    pub suggested_components: Vec<String>,
    pub suggested_features: Vec<String>,
}

/// Scoring constants. Empirically chosen, hence configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Confidence added per matching pattern
    #[serde(default = "default_match_increment")]
    pub match_increment: f64,
    /// Minimum score for a rule to be used at all
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Bonus when the project type aligns with the rule
    #[serde(default = "default_project_type_bonus")]
    pub project_type_bonus: f64,
    /// Confidence reported for the complete-build fallback
    #[serde(default = "default_fallback_confidence")]
    pub fallback_confidence: f64,
    /// Cap on each suggestion list and on target files
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
}

fn default_match_increment() -> f64 {
    0.3
}

fn default_min_confidence() -> f64 {
    0.3
}

fn default_project_type_bonus() -> f64 {
    0.2
}

fn default_fallback_confidence() -> f64 {
    0.5
}

fn default_max_suggestions() -> usize {
    5
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            match_increment: default_match_increment(),
            min_confidence: default_min_confidence(),
            project_type_bonus: default_project_type_bonus(),
            fallback_confidence: default_fallback_confidence(),
            max_suggestions: default_max_suggestions(),
        }
    }
}

pub struct IntentClassifier {
    rules: Vec<IntentRule>,
    config: ClassifierConfig,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl IntentClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self::with_rules(default_rules(), config)
    }

    /// Use an external rule table instead of the built-in one.
    pub fn with_rules(rules: Vec<IntentRule>, config: ClassifierConfig) -> Self {
        Self { rules, config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn classify(&self, prompt: &str, manifest: Option<&ProjectManifest>) -> EditIntent {
        self.classify_with_history(prompt, manifest, &[])
    }

    /// Classify a prompt, letting recently edited files bias the targets.
    ///
    /// `recent_files` (most recent first) are appended to the target list only
    /// when the prompt refers back to earlier work.
    pub fn classify_with_history(
        &self,
        prompt: &str,
        manifest: Option<&ProjectManifest>,
        recent_files: &[String],
    ) -> EditIntent {
        let project_type = manifest
            .map(ProjectManifest::project_type)
            .unwrap_or(ProjectType::Unknown);

        let best = self.best_rule(prompt, project_type);
        let (kind, confidence, rule) = match best {
            Some((rule, score)) if score >= self.config.min_confidence => {
                (rule.kind, score, Some(rule))
            }
            _ => (IntentKind::CompleteBuild, self.config.fallback_confidence, None),
        };

        let lower = prompt.to_lowercase();
        let max = self.config.max_suggestions;

        let ui_matches: Vec<&str> = UI_VOCABULARY
            .iter()
            .filter(|(word, _)| contains_word(&lower, word))
            .map(|(_, name)| *name)
            .collect();
        let feature_matches: Vec<&str> = FEATURE_VOCABULARY
            .iter()
            .filter(|(word, _)| contains_word(&lower, word))
            .map(|(_, name)| *name)
            .collect();

        let mut keywords: Vec<String> = Vec::new();
        for (word, _) in UI_VOCABULARY.iter().chain(FEATURE_VOCABULARY) {
            if contains_word(&lower, word) && !keywords.iter().any(|k| k == word) {
                keywords.push(word.to_string());
            }
        }

        let rule_components = rule.map(|r| r.components.as_slice()).unwrap_or(&[]);
        let rule_features = rule.map(|r| r.features.as_slice()).unwrap_or(&[]);

        let suggested_components = merge_suggestions(
            rule_components.iter().map(String::as_str).chain(ui_matches.iter().copied()),
            max,
        );
        let suggested_features = merge_suggestions(
            rule_features.iter().map(String::as_str).chain(feature_matches.iter().copied()),
            max,
        );

        let target_files = self.target_files(&lower, kind, &ui_matches, manifest, recent_files);

        EditIntent {
            kind,
            confidence: clamp_confidence(confidence),
            target_files,
            keywords,
            suggested_components,
            suggested_features,
        }
    }

    /// Highest scoring rule with its score; ties keep the earlier rule.
    fn best_rule(&self, prompt: &str, project_type: ProjectType) -> Option<(&IntentRule, f64)> {
        if prompt.trim().is_empty() {
            return None;
        }

        let mut best: Option<(&IntentRule, f64)> = None;
        for rule in &self.rules {
            let matched = rule.matches(prompt);
            if matched == 0 {
                continue;
            }
            let mut score = matched as f64 * self.config.match_increment;
            if rule.aligns_with(project_type) {
                score += self.config.project_type_bonus;
            }
            let score = clamp_confidence(score);
            if best.is_none_or(|(_, current)| score > current) {
                best = Some((rule, score));
            }
        }
        best
    }

    fn target_files(
        &self,
        lower_prompt: &str,
        kind: IntentKind,
        ui_matches: &[&str],
        manifest: Option<&ProjectManifest>,
        recent_files: &[String],
    ) -> Vec<String> {
        let max = self.config.max_suggestions;
        let mut targets: Vec<String> = Vec::new();
        let push = |targets: &mut Vec<String>, path: String| {
            if targets.len() < max && !targets.contains(&path) {
                targets.push(path);
            }
        };

        if let Some(manifest) = manifest {
            // Files the prompt names directly
            for path in manifest.paths() {
                let stem = file_stem(path).to_lowercase();
                if stem.len() >= 3 && contains_word(lower_prompt, &stem) {
                    push(&mut targets, path.to_string());
                }
            }
            for name in ui_matches {
                let needle = name.to_lowercase();
                for path in manifest.paths() {
                    if file_name(path).to_lowercase().contains(&needle) {
                        push(&mut targets, path.to_string());
                    }
                }
            }
            if kind == IntentKind::StyleUpdate {
                for (path, file) in manifest.files() {
                    if file.kind == FileKind::Style {
                        push(&mut targets, path.clone());
                    }
                }
            }
        }

        // Conventional locations for anything the manifest did not resolve
        for name in ui_matches {
            let resolved = targets
                .iter()
                .any(|t| file_name(t).to_lowercase().contains(&name.to_lowercase()));
            if !resolved {
                let dir = if kind == IntentKind::AddPage {
                    "src/pages"
                } else {
                    "src/components"
                };
                push(&mut targets, format!("{}/{}.jsx", dir, name));
            }
        }

        if BACK_REFERENCE_REGEX.is_match(lower_prompt) {
            for path in recent_files {
                push(&mut targets, path.clone());
            }
        }

        targets
    }
}

/// Merge suggestion candidates in order, capped at `max`, skipping any that
/// overlap an earlier entry by case-insensitive substring containment.
fn merge_suggestions<'a>(candidates: impl Iterator<Item = &'a str>, max: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for candidate in candidates {
        if merged.len() >= max {
            break;
        }
        let lower = candidate.to_lowercase();
        let overlaps = merged.iter().any(|existing| {
            let existing = existing.to_lowercase();
            existing.contains(&lower) || lower.contains(&existing)
        });
        if !overlaps {
            merged.push(candidate.to_string());
        }
    }
    merged
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub(crate) fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub(crate) fn file_stem(path: &str) -> &str {
    let name = file_name(path);
    name.split_once('.').map(|(stem, _)| stem).unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandforge_common::ManifestFile;
    use std::collections::BTreeMap;

    fn manifest(paths: &[(&str, &str)]) -> ProjectManifest {
        let files: BTreeMap<String, ManifestFile> = paths
            .iter()
            .map(|(p, c)| (p.to_string(), ManifestFile::new(p, *c)))
            .collect();
        ProjectManifest::new("src/main.jsx", files, vec![])
    }

    #[test]
    fn test_login_form_scenario() {
        let classifier = IntentClassifier::default();
        let intent = classifier.classify("add a login form", Some(&ProjectManifest::empty()));

        assert!(matches!(
            intent.kind,
            IntentKind::AddFeature | IntentKind::InteractiveElement
        ));
        assert!(intent.confidence >= 0.3);
        assert!(
            intent
                .suggested_components
                .iter()
                .any(|c| c.to_lowercase().contains("form"))
        );
    }

    #[test]
    fn test_empty_prompt_falls_back_to_complete_build() {
        let intent = IntentClassifier::default().classify("", None);
        assert_eq!(intent.kind, IntentKind::CompleteBuild);
        assert_eq!(intent.confidence, 0.5);
        assert!(intent.target_files.is_empty());
    }

    #[test]
    fn test_unmatched_prompt_falls_back() {
        let intent = IntentClassifier::default().classify("hmm, surprise me", None);
        assert_eq!(intent.kind, IntentKind::CompleteBuild);
        assert_eq!(intent.confidence, 0.5);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let config = ClassifierConfig {
            match_increment: 0.9,
            ..Default::default()
        };
        let classifier = IntentClassifier::new(config);
        let intent = classifier.classify("submit the login form button on click", None);
        assert!(intent.confidence <= 1.0);
        assert!(intent.confidence >= 0.0);
    }

    #[test]
    fn test_confidence_in_range_for_varied_prompts() {
        let classifier = IntentClassifier::default();
        for prompt in [
            "",
            "   ",
            "make the header blue and bold with a gradient background",
            "fetch data from the api and show it in a table chart dashboard",
            "🚀🚀🚀",
            "build a complete website from scratch with a full layout",
        ] {
            let intent = classifier.classify(prompt, None);
            assert!((0.0..=1.0).contains(&intent.confidence), "{}", prompt);
        }
    }

    #[test]
    fn test_project_type_bonus_breaks_tie() {
        // "api" scores DataIntegration, "content" scores ContentUpdate
        let classifier = IntentClassifier::default();
        let dashboard = manifest(&[("src/pages/Dashboard.jsx", "analytics chart")]);
        let without = classifier.classify("show the content from the api", None);
        let with = classifier.classify("show the content from the api", Some(&dashboard));

        assert_eq!(without.kind, IntentKind::DataIntegration);
        assert_eq!(with.kind, IntentKind::DataIntegration);
        assert!(with.confidence > without.confidence);
    }

    #[test]
    fn test_ties_keep_first_rule() {
        // One match each for InteractiveElement ("button") and StyleUpdate ("bold")
        let intent = IntentClassifier::default().classify("bold button", None);
        assert_eq!(intent.kind, IntentKind::InteractiveElement);
    }

    #[test]
    fn test_only_best_rule_suggestions_surface() {
        let intent = IntentClassifier::default().classify("add a login form with a submit button", None);
        assert_eq!(intent.kind, IntentKind::InteractiveElement);
        // DataIntegration rule suggestions must not leak in
        assert!(!intent.suggested_components.contains(&"ApiClient".to_string()));
    }

    #[test]
    fn test_suggestions_capped_and_deduplicated() {
        let intent = IntentClassifier::default().classify(
            "add header footer navbar hero sidebar card table chart gallery menu form",
            None,
        );
        assert!(intent.suggested_components.len() <= 5);
        assert!(intent.target_files.len() <= 5);
        let lowered: Vec<String> = intent
            .suggested_components
            .iter()
            .map(|s| s.to_lowercase())
            .collect();
        for (i, a) in lowered.iter().enumerate() {
            for b in lowered.iter().skip(i + 1) {
                assert!(!a.contains(b.as_str()) && !b.contains(a.as_str()));
            }
        }
    }

    #[test]
    fn test_targets_resolve_against_manifest() {
        let m = manifest(&[
            ("src/components/Header.jsx", ""),
            ("src/components/Footer.jsx", ""),
            ("src/index.css", ""),
        ]);
        let intent = IntentClassifier::default().classify("change the header color to blue", Some(&m));
        assert_eq!(intent.kind, IntentKind::StyleUpdate);
        assert_eq!(intent.target_files[0], "src/components/Header.jsx");
        assert!(intent.target_files.contains(&"src/index.css".to_string()));
        assert!(!intent.target_files.contains(&"src/components/Footer.jsx".to_string()));
    }

    #[test]
    fn test_unresolved_targets_use_conventional_paths() {
        let intent = IntentClassifier::default().classify("add a pricing section", None);
        assert!(intent.target_files.contains(&"src/components/Pricing.jsx".to_string()));
    }

    #[test]
    fn test_history_bias_only_on_back_reference() {
        let classifier = IntentClassifier::default();
        let recent = vec!["src/components/Hero.jsx".to_string()];

        let biased = classifier.classify_with_history("make it bigger", None, &recent);
        assert!(biased.target_files.contains(&recent[0]));

        let unbiased = classifier.classify_with_history("add a footer", None, &recent);
        assert!(!unbiased.target_files.contains(&recent[0]));
    }

    #[test]
    fn test_external_rule_table() {
        let rules = vec![
            IntentRule::compile(&RuleSpec {
                kind: IntentKind::LayoutChange,
                patterns: &[r"\bshuffle\b"],
                components: &[],
                features: &[],
                project_types: &[],
            })
            .unwrap(),
        ];
        let classifier = IntentClassifier::with_rules(rules, ClassifierConfig::default());
        let intent = classifier.classify("shuffle everything", None);
        assert_eq!(intent.kind, IntentKind::LayoutChange);
        assert!((intent.confidence - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_intent_serializes_type_field() {
        let intent = IntentClassifier::default().classify("add a login form", None);
        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["type"], "interactive-element");
    }
}
