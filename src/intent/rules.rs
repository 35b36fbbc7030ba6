//! Declarative classification rules and keyword vocabularies.
//!
//! Rule order is priority order: when two rules score the same, the earlier
//! one wins, so more specific rules come first.

use regex::{Regex, RegexBuilder};
use sandforge_common::ProjectType;
use std::sync::LazyLock;

use super::IntentKind;

/// Static description of a rule, compiled into an [`IntentRule`].
#[derive(Debug, Clone, Copy)]
pub struct RuleSpec {
    pub kind: IntentKind,
    pub patterns: &'static [&'static str],
    pub components: &'static [&'static str],
    pub features: &'static [&'static str],
    /// Project types that earn the alignment bonus for this rule
    pub project_types: &'static [ProjectType],
}

pub const DEFAULT_RULES: &[RuleSpec] = &[
    RuleSpec {
        kind: IntentKind::AddPage,
        patterns: &[
            r"\b(new|add|create)\b.*\bpages?\b",
            r"\bpage\b.*\b(for|about|called|named)\b",
            r"\b(route|routing|navigate to)\b",
        ],
        components: &["Page"],
        features: &["routing"],
        project_types: &[ProjectType::Blog],
    },
    RuleSpec {
        kind: IntentKind::DataIntegration,
        patterns: &[
            r"\b(api|fetch|endpoint|backend|database)\b",
            r"\b(data|json|rest|graphql)\b",
            r"\b(integrate|connect|load)\b.*\b(data|api|service)\b",
        ],
        components: &["DataTable", "ApiClient"],
        features: &["data fetching", "loading states"],
        project_types: &[ProjectType::Dashboard],
    },
    RuleSpec {
        kind: IntentKind::InteractiveElement,
        patterns: &[
            r"\b(form|input|button|modal|dropdown|toggle|slider|tabs?|accordion)\b",
            r"\b(click|submit|hover|interactive|popup)\b",
            r"\b(login|log in|sign ?in|sign ?up|register|contact)\b",
        ],
        components: &["Form", "Button", "Modal"],
        features: &["form validation", "event handling"],
        project_types: &[ProjectType::Landing],
    },
    RuleSpec {
        kind: IntentKind::AddFeature,
        patterns: &[
            r"\b(add|implement|create|build)\b.*\b(feature|functionality|authentication|auth|search|filter|cart|wishlist)\b",
            r"\b(authentication|search|filtering|sorting|pagination|notifications?|checkout)\b",
        ],
        components: &["SearchBar", "AuthProvider"],
        features: &["authentication", "search"],
        project_types: &[ProjectType::Ecommerce],
    },
    RuleSpec {
        kind: IntentKind::AddComponent,
        patterns: &[
            r"\b(add|create|new|insert|include)\b.*\b(component|section|header|footer|navbar|sidebar|hero|card|gallery|banner)\b",
            r"\b(component|section|widget)\b",
        ],
        components: &["Section"],
        features: &[],
        project_types: &[ProjectType::Landing],
    },
    RuleSpec {
        kind: IntentKind::StyleUpdate,
        patterns: &[
            r"\b(colou?rs?|theme|font|style|styling|css|dark mode|light mode)\b",
            r"\b(bigger|smaller|bold|padding|margin|spacing|background|gradient|shadow|rounded)\b",
            r"\b(make|change)\b.*\b(look|prettier|modern|colorful|blue|red|green|purple|black|white)\b",
        ],
        components: &[],
        features: &["theming"],
        project_types: &[ProjectType::Landing],
    },
    RuleSpec {
        kind: IntentKind::LayoutChange,
        patterns: &[
            r"\b(layout|grid|flex|columns?|rows?|align|center|position)\b",
            r"\b(move|rearrange|reorder|swap)\b",
            r"\b(responsive|mobile|desktop)\b",
        ],
        components: &[],
        features: &["responsive layout"],
        project_types: &[],
    },
    RuleSpec {
        kind: IntentKind::ContentUpdate,
        patterns: &[
            r"\b(text|copy|title|heading|headline|wording|content)\b",
            r"\b(change|update|replace|edit|rename)\b.*\b(text|title|name|label|description)\b",
            r"\b(typo|spelling)\b",
        ],
        components: &[],
        features: &[],
        project_types: &[ProjectType::Blog],
    },
    RuleSpec {
        kind: IntentKind::CompleteBuild,
        patterns: &[
            r"\b(build|create|make)\b.*\b(app|application|website|site|clone|project)\b",
            r"\b(from scratch|entire|whole|complete|full)\b",
        ],
        components: &[],
        features: &[],
        project_types: &[],
    },
];

/// UI element words and the component name each suggests.
pub const UI_VOCABULARY: &[(&str, &str)] = &[
    ("header", "Header"),
    ("footer", "Footer"),
    ("navbar", "Navbar"),
    ("navigation", "Navbar"),
    ("nav", "Navbar"),
    ("hero", "Hero"),
    ("sidebar", "Sidebar"),
    ("login", "LoginForm"),
    ("contact", "ContactForm"),
    ("form", "Form"),
    ("button", "Button"),
    ("modal", "Modal"),
    ("card", "Card"),
    ("table", "Table"),
    ("chart", "Chart"),
    ("pricing", "Pricing"),
    ("testimonial", "Testimonials"),
    ("gallery", "Gallery"),
    ("menu", "Menu"),
    ("search", "SearchBar"),
    ("dashboard", "Dashboard"),
];

/// Feature words and the feature name each suggests.
pub const FEATURE_VOCABULARY: &[(&str, &str)] = &[
    ("dark mode", "dark mode"),
    ("login", "authentication"),
    ("authentication", "authentication"),
    ("auth", "authentication"),
    ("search", "search"),
    ("filter", "filtering"),
    ("pagination", "pagination"),
    ("animation", "animations"),
    ("animate", "animations"),
    ("responsive", "responsive layout"),
    ("validation", "form validation"),
    ("notification", "notifications"),
    ("cart", "shopping cart"),
];

/// A compiled classification rule.
#[derive(Debug, Clone)]
pub struct IntentRule {
    pub kind: IntentKind,
    pub patterns: Vec<Regex>,
    pub components: Vec<String>,
    pub features: Vec<String>,
    pub project_types: Vec<ProjectType>,
}

impl IntentRule {
    /// Compile a rule spec; patterns match case-insensitively.
    pub fn compile(spec: &RuleSpec) -> Result<Self, regex::Error> {
        let patterns = spec
            .patterns
            .iter()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            kind: spec.kind,
            patterns,
            components: spec.components.iter().map(|s| s.to_string()).collect(),
            features: spec.features.iter().map(|s| s.to_string()).collect(),
            project_types: spec.project_types.to_vec(),
        })
    }

    /// Number of patterns that match the prompt.
    pub fn matches(&self, prompt: &str) -> usize {
        self.patterns.iter().filter(|p| p.is_match(prompt)).count()
    }

    pub fn aligns_with(&self, project_type: ProjectType) -> bool {
        project_type != ProjectType::Unknown && self.project_types.contains(&project_type)
    }
}

static COMPILED_DEFAULT_RULES: LazyLock<Vec<IntentRule>> = LazyLock::new(|| {
    DEFAULT_RULES
        .iter()
        .map(|spec| IntentRule::compile(spec).unwrap())
        .collect()
});

/// The built-in rule table.
pub fn default_rules() -> Vec<IntentRule> {
    COMPILED_DEFAULT_RULES.clone()
}

/// Whether `word` occurs in `text` delimited by non-alphanumeric characters.
///
/// Both arguments are expected in lowercase.
pub fn contains_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    text.match_indices(word).any(|(start, _)| {
        let end = start + word.len();
        let before_ok = text[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let after_ok = text[end..].chars().next().is_none_or(|c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}
