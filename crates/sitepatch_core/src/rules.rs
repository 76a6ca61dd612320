use std::borrow::Cow;
use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;

/// How a rule treats multiple occurrences of its pattern. `All` (every
/// non-overlapping match) is the documented default for the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    First,
    #[default]
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    Literal,
    Regex,
    InsertAfter,
}

/// Declarative rule shape as written in `sitepatch.toml` under `[[rules]]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub name: String,
    pub kind: RuleKind,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub replace: Option<String>,
    #[serde(default)]
    pub anchor: Option<String>,
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub policy: MatchPolicy,
}

#[derive(Debug, Clone)]
pub enum RuleAction {
    ReplaceLiteral { pattern: String, replacement: String },
    ReplaceRegex { pattern: Regex, replacement: String },
    InsertAfter { anchor: String, payload: String },
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub policy: MatchPolicy,
    pub action: RuleAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Applied { replacements: usize },
    /// Precondition pattern/anchor absent; the document was not touched.
    NoMatch,
    /// Injection payload already present; insert rules are re-run safe.
    AlreadyApplied,
    /// Structural anchor missing; recorded as a per-document transform error.
    AnchorMissing,
}

/// Path-derived facts available to rule templates. `{path}`, `{brand}` and
/// `{stem}` expand in replacements and payloads; brand is the first path
/// segment when the document sits inside a brand subdirectory.
#[derive(Debug, Clone)]
pub struct RuleContext {
    pub relative_path: String,
    pub brand: Option<String>,
    pub stem: String,
}

impl RuleContext {
    pub fn from_relative_path(relative_path: &str) -> Self {
        let normalized = relative_path.replace('\\', "/");
        let brand = match normalized.split('/').collect::<Vec<_>>().as_slice() {
            [first, _, ..] => Some((*first).to_string()),
            _ => None,
        };
        let stem = Path::new(&normalized)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("")
            .to_string();
        Self {
            relative_path: normalized,
            brand,
            stem,
        }
    }

    pub fn expand(&self, template: &str) -> String {
        if !template.contains('{') {
            return template.to_string();
        }
        template
            .replace("{path}", &self.relative_path)
            .replace("{brand}", self.brand.as_deref().unwrap_or(""))
            .replace("{stem}", &self.stem)
    }
}

impl Rule {
    /// Compile a declarative spec into a runnable rule. Rejects shapes that
    /// cannot be idempotent: a replacement that still contains (or still
    /// matches) its own pattern would grow on every run.
    pub fn from_spec(spec: RuleSpec) -> Result<Self> {
        let name = spec.name.trim().to_string();
        if name.is_empty() {
            bail!("rule name cannot be empty");
        }

        let action = match spec.kind {
            RuleKind::Literal => {
                let pattern = required(&name, "pattern", spec.pattern)?;
                let replacement = required_field(&name, "replace", spec.replace)?;
                if replacement.contains(&pattern) {
                    bail!(
                        "rule `{name}`: replacement contains its own pattern; \
                         re-running would grow the document"
                    );
                }
                RuleAction::ReplaceLiteral {
                    pattern,
                    replacement,
                }
            }
            RuleKind::Regex => {
                let raw = required(&name, "pattern", spec.pattern)?;
                let replacement = required_field(&name, "replace", spec.replace)?;
                let pattern = Regex::new(&raw)
                    .with_context(|| format!("rule `{name}`: invalid regex pattern"))?;
                if pattern.is_match(&replacement) {
                    bail!(
                        "rule `{name}`: replacement still matches its own pattern; \
                         re-running would substitute again"
                    );
                }
                RuleAction::ReplaceRegex {
                    pattern,
                    replacement,
                }
            }
            RuleKind::InsertAfter => {
                let anchor = required(&name, "anchor", spec.anchor)?;
                let payload = required(&name, "payload", spec.payload)?;
                if payload.trim().is_empty() {
                    bail!("rule `{name}`: payload cannot be blank");
                }
                RuleAction::InsertAfter { anchor, payload }
            }
        };

        Ok(Self {
            name,
            policy: spec.policy,
            action,
        })
    }

    /// Apply the rule once. Returns borrowed text untouched when the
    /// precondition is absent, so clean documents cost no allocation.
    pub fn apply<'a>(&self, text: &'a str, context: &RuleContext) -> (Cow<'a, str>, RuleOutcome) {
        match &self.action {
            RuleAction::ReplaceLiteral {
                pattern,
                replacement,
            } => {
                if !text.contains(pattern.as_str()) {
                    return (Cow::Borrowed(text), RuleOutcome::NoMatch);
                }
                let replacement = context.expand(replacement);
                let (patched, replacements) = match self.policy {
                    MatchPolicy::First => (text.replacen(pattern.as_str(), &replacement, 1), 1),
                    MatchPolicy::All => {
                        let count = text.matches(pattern.as_str()).count();
                        (text.replace(pattern.as_str(), &replacement), count)
                    }
                };
                (Cow::Owned(patched), RuleOutcome::Applied { replacements })
            }
            RuleAction::ReplaceRegex {
                pattern,
                replacement,
            } => {
                if !pattern.is_match(text) {
                    return (Cow::Borrowed(text), RuleOutcome::NoMatch);
                }
                let replacement = context.expand(replacement);
                let (patched, replacements) = match self.policy {
                    MatchPolicy::First => {
                        (pattern.replace(text, replacement.as_str()).into_owned(), 1)
                    }
                    MatchPolicy::All => {
                        let count = pattern.find_iter(text).count();
                        (
                            pattern.replace_all(text, replacement.as_str()).into_owned(),
                            count,
                        )
                    }
                };
                (Cow::Owned(patched), RuleOutcome::Applied { replacements })
            }
            RuleAction::InsertAfter { anchor, payload } => {
                let payload = context.expand(payload);
                if text.contains(payload.as_str()) {
                    return (Cow::Borrowed(text), RuleOutcome::AlreadyApplied);
                }
                let Some(position) = text.find(anchor.as_str()) else {
                    return (Cow::Borrowed(text), RuleOutcome::AnchorMissing);
                };
                let insert_at = position + anchor.len();
                let mut patched = String::with_capacity(text.len() + payload.len() + 1);
                patched.push_str(&text[..insert_at]);
                patched.push('\n');
                patched.push_str(&payload);
                patched.push_str(&text[insert_at..]);
                (Cow::Owned(patched), RuleOutcome::Applied { replacements: 1 })
            }
        }
    }
}

fn required(rule: &str, field: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => bail!("rule `{rule}`: `{field}` is required"),
    }
}

// Like `required`, but an empty string is a legal value (deletion rules).
fn required_field(rule: &str, field: &str, value: Option<String>) -> Result<String> {
    value.ok_or_else(|| anyhow::anyhow!("rule `{rule}`: `{field}` is required"))
}

/// An ordered catalog of compiled rules. Order is the order of declaration
/// in the config; names must be unique so outcomes are attributable.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn from_specs(specs: Vec<RuleSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(specs.len());
        for spec in specs {
            let rule = Rule::from_spec(spec)?;
            if !seen.insert(rule.name.clone()) {
                bail!("duplicate rule name: {}", rule.name);
            }
            rules.push(rule);
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{MatchPolicy, Rule, RuleContext, RuleKind, RuleOutcome, RuleSet, RuleSpec};

    fn literal(name: &str, pattern: &str, replace: &str, policy: MatchPolicy) -> Rule {
        Rule::from_spec(RuleSpec {
            name: name.to_string(),
            kind: RuleKind::Literal,
            pattern: Some(pattern.to_string()),
            replace: Some(replace.to_string()),
            anchor: None,
            payload: None,
            policy,
        })
        .expect("compile rule")
    }

    fn context() -> RuleContext {
        RuleContext::from_relative_path("volvo/brakes/index.html")
    }

    #[test]
    fn literal_rule_replaces_broken_faq_link_once() {
        let rule = literal(
            "fix-faq-anchor",
            "../index.html#faq",
            "../../index.html#faq",
            MatchPolicy::All,
        );
        let text = r#"<a href="../index.html#faq">FAQ</a>"#;
        let (patched, outcome) = rule.apply(text, &context());
        assert_eq!(outcome, RuleOutcome::Applied { replacements: 1 });
        assert_eq!(patched, r#"<a href="../../index.html#faq">FAQ</a>"#);

        // Second application is a no-op: the pattern is gone.
        let (again, outcome) = rule.apply(&patched, &context());
        assert_eq!(outcome, RuleOutcome::NoMatch);
        assert_eq!(again, patched);
    }

    #[test]
    fn absent_pattern_leaves_text_borrowed() {
        let rule = literal("noop", "missing-marker", "anything", MatchPolicy::All);
        let text = "<p>clean document</p>";
        let (patched, outcome) = rule.apply(text, &context());
        assert_eq!(outcome, RuleOutcome::NoMatch);
        assert!(matches!(patched, std::borrow::Cow::Borrowed(_)));
    }

    #[test]
    fn policy_first_replaces_single_occurrence() {
        let rule = literal("once", "old.css", "new.css", MatchPolicy::First);
        let text = "old.css old.css old.css";
        let (patched, outcome) = rule.apply(text, &context());
        assert_eq!(outcome, RuleOutcome::Applied { replacements: 1 });
        assert_eq!(patched, "new.css old.css old.css");
    }

    #[test]
    fn policy_all_counts_every_match() {
        let rule = literal("everywhere", "old.css", "new.css", MatchPolicy::All);
        let text = "old.css old.css old.css";
        let (patched, outcome) = rule.apply(text, &context());
        assert_eq!(outcome, RuleOutcome::Applied { replacements: 3 });
        assert_eq!(patched, "new.css new.css new.css");
    }

    #[test]
    fn regex_rule_rewrites_all_matches() {
        let rule = Rule::from_spec(RuleSpec {
            name: "strip-cdn".to_string(),
            kind: RuleKind::Regex,
            pattern: Some(r#"<script src="https://cdn\.tailwindcss\.com[^"]*"></script>"#.to_string()),
            replace: Some(r#"<link rel="stylesheet" href="/assets/tailwind.css">"#.to_string()),
            anchor: None,
            payload: None,
            policy: MatchPolicy::All,
        })
        .expect("compile rule");

        let text = concat!(
            r#"<script src="https://cdn.tailwindcss.com"></script>"#,
            "\n",
            r#"<script src="https://cdn.tailwindcss.com?plugins=forms"></script>"#,
        );
        let (patched, outcome) = rule.apply(text, &context());
        assert_eq!(outcome, RuleOutcome::Applied { replacements: 2 });
        assert!(!patched.contains("cdn.tailwindcss.com"));
        assert_eq!(
            patched.matches("/assets/tailwind.css").count(),
            2
        );

        let (_, second) = rule.apply(&patched, &context());
        assert_eq!(second, RuleOutcome::NoMatch);
    }

    #[test]
    fn insert_after_is_payload_idempotent() {
        let rule = Rule::from_spec(RuleSpec {
            name: "inject-canonical".to_string(),
            kind: RuleKind::InsertAfter,
            pattern: None,
            replace: None,
            anchor: Some("<head>".to_string()),
            payload: Some(r#"<link rel="canonical" href="https://example.com/{path}">"#.to_string()),
            policy: MatchPolicy::default(),
        })
        .expect("compile rule");

        let text = "<html><head>\n<title>Brakes</title></head></html>";
        let (patched, outcome) = rule.apply(text, &context());
        assert_eq!(outcome, RuleOutcome::Applied { replacements: 1 });
        assert!(patched.contains("https://example.com/volvo/brakes/index.html"));

        let (again, outcome) = rule.apply(&patched, &context());
        assert_eq!(outcome, RuleOutcome::AlreadyApplied);
        assert_eq!(again, patched);
    }

    #[test]
    fn insert_after_reports_missing_anchor() {
        let rule = Rule::from_spec(RuleSpec {
            name: "inject-meta".to_string(),
            kind: RuleKind::InsertAfter,
            pattern: None,
            replace: None,
            anchor: Some("<head>".to_string()),
            payload: Some("<meta charset=\"utf-8\">".to_string()),
            policy: MatchPolicy::default(),
        })
        .expect("compile rule");

        let text = "<html><body>no head here</body></html>";
        let (unchanged, outcome) = rule.apply(text, &context());
        assert_eq!(outcome, RuleOutcome::AnchorMissing);
        assert_eq!(unchanged, text);
    }

    #[test]
    fn self_growing_literal_rule_is_rejected() {
        let error = Rule::from_spec(RuleSpec {
            name: "grower".to_string(),
            kind: RuleKind::Literal,
            pattern: Some("../index.html".to_string()),
            replace: Some("../../index.html".to_string()),
            anchor: None,
            payload: None,
            policy: MatchPolicy::All,
        })
        .expect_err("must reject");
        assert!(error.to_string().contains("contains its own pattern"));
    }

    #[test]
    fn self_matching_regex_rule_is_rejected() {
        let error = Rule::from_spec(RuleSpec {
            name: "regex-grower".to_string(),
            kind: RuleKind::Regex,
            pattern: Some(r"href=\S+".to_string()),
            replace: Some("href=/new".to_string()),
            anchor: None,
            payload: None,
            policy: MatchPolicy::All,
        })
        .expect_err("must reject");
        assert!(error.to_string().contains("still matches its own pattern"));
    }

    #[test]
    fn invalid_regex_is_a_config_error() {
        let error = Rule::from_spec(RuleSpec {
            name: "broken".to_string(),
            kind: RuleKind::Regex,
            pattern: Some("([unclosed".to_string()),
            replace: Some("x".to_string()),
            anchor: None,
            payload: None,
            policy: MatchPolicy::All,
        })
        .expect_err("must reject");
        assert!(error.to_string().contains("invalid regex pattern"));
    }

    #[test]
    fn ruleset_rejects_duplicate_names() {
        let spec = RuleSpec {
            name: "dup".to_string(),
            kind: RuleKind::Literal,
            pattern: Some("a".to_string()),
            replace: Some("b".to_string()),
            anchor: None,
            payload: None,
            policy: MatchPolicy::All,
        };
        let error = RuleSet::from_specs(vec![spec.clone(), spec]).expect_err("must reject");
        assert!(error.to_string().contains("duplicate rule name"));
    }

    #[test]
    fn context_derives_brand_and_stem() {
        let context = RuleContext::from_relative_path("bmw/filters/oil-filter.html");
        assert_eq!(context.brand.as_deref(), Some("bmw"));
        assert_eq!(context.stem, "oil-filter");
        assert_eq!(
            context.expand("{brand}: {stem} ({path})"),
            "bmw: oil-filter (bmw/filters/oil-filter.html)"
        );
    }

    #[test]
    fn top_level_document_has_no_brand() {
        let context = RuleContext::from_relative_path("index.html");
        assert_eq!(context.brand, None);
        assert_eq!(context.expand("{brand}"), "");
    }
}
