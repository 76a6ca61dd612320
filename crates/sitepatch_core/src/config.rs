use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::rules::RuleSpec;
use crate::walker::WalkOptions;

pub const DEFAULT_SITEMAP_OUTPUT: &str = "sitemap.xml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    #[serde(default)]
    pub site: SiteSection,
    #[serde(default)]
    pub walk: WalkSection,
    #[serde(default)]
    pub sitemap: SitemapSection,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SiteSection {
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WalkSection {
    #[serde(default = "default_roots")]
    pub roots: Vec<String>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
}

impl Default for WalkSection {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            extensions: default_extensions(),
            exclude_dirs: default_exclude_dirs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SitemapSection {
    #[serde(default = "default_sitemap_output")]
    pub output: String,
    pub changefreq: Option<String>,
    pub priority: Option<String>,
}

impl Default for SitemapSection {
    fn default() -> Self {
        Self {
            output: default_sitemap_output(),
            changefreq: None,
            priority: None,
        }
    }
}

fn default_roots() -> Vec<String> {
    vec![".".to_string()]
}

fn default_extensions() -> Vec<String> {
    vec!["html".to_string()]
}

fn default_exclude_dirs() -> Vec<String> {
    vec![
        ".git".to_string(),
        "node_modules".to_string(),
        "_backup".to_string(),
    ]
}

fn default_sitemap_output() -> String {
    DEFAULT_SITEMAP_OUTPUT.to_string()
}

impl SiteConfig {
    /// Resolve the sitemap base URL: env SITEPATCH_BASE_URL > config > None.
    pub fn base_url(&self) -> Option<String> {
        self.base_url_with_lookup(|key| env::var(key).ok())
    }

    pub fn base_url_with_lookup<F>(&self, lookup_env: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup_env("SITEPATCH_BASE_URL") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
        self.site.base_url.clone()
    }

    /// Walk options with configured roots resolved against the project root.
    pub fn walk_options(&self, project_root: &Path) -> WalkOptions {
        let roots = self
            .walk
            .roots
            .iter()
            .map(|root| {
                let path = Path::new(root);
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    project_root.join(path)
                }
            })
            .collect::<Vec<PathBuf>>();
        WalkOptions {
            roots,
            extensions: self.walk.extensions.clone(),
            exclude_dirs: self.walk.exclude_dirs.clone(),
        }
    }

    pub fn sitemap_output_path(&self, project_root: &Path) -> PathBuf {
        let output = Path::new(&self.sitemap.output);
        if output.is_absolute() {
            output.to_path_buf()
        } else {
            project_root.join(output)
        }
    }
}

/// Load and parse a SiteConfig from a TOML file. Returns defaults if the
/// file doesn't exist; a malformed file is a configuration error.
pub fn load_config(config_path: &Path) -> Result<SiteConfig> {
    if !config_path.exists() {
        return Ok(SiteConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SiteConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Load only a `[[rules]]` catalog from a standalone TOML file, for runs
/// that keep the rule catalog separate from the site configuration.
pub fn load_rules_file(rules_path: &Path) -> Result<Vec<RuleSpec>> {
    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct RulesFile {
        #[serde(default)]
        rules: Vec<RuleSpec>,
    }

    let content = fs::read_to_string(rules_path)
        .with_context(|| format!("failed to read {}", rules_path.display()))?;
    let parsed: RulesFile = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", rules_path.display()))?;
    Ok(parsed.rules)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{SiteConfig, load_config, load_rules_file};
    use crate::rules::{MatchPolicy, RuleKind};

    #[test]
    fn default_config_walks_html_under_root() {
        let config = SiteConfig::default();
        let options = config.walk_options(Path::new("/site"));
        assert_eq!(options.roots, vec![Path::new("/site").join(".")]);
        assert_eq!(options.extensions, vec!["html".to_string()]);
        assert!(options.exclude_dirs.contains(&".git".to_string()));
        assert!(config.site.base_url.is_none());
        assert!(config.rules.is_empty());
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/sitepatch.toml")).expect("load config");
        assert_eq!(config.sitemap.output, "sitemap.xml");
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("sitepatch.toml");
        fs::write(
            &config_path,
            r#"
[site]
base_url = "https://parts.example.com"

[walk]
roots = ["catalog", "brands"]
extensions = ["html", "htm"]
exclude_dirs = [".git", "old"]

[sitemap]
output = "public/sitemap.xml"
changefreq = "weekly"
priority = "0.8"

[[rules]]
name = "fix-faq-anchor"
kind = "literal"
pattern = "../index.html#faq"
replace = "../../index.html#faq"

[[rules]]
name = "inject-charset"
kind = "insert-after"
anchor = "<head>"
payload = "<meta charset=\"utf-8\">"
policy = "first"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.site.base_url.as_deref(),
            Some("https://parts.example.com")
        );
        assert_eq!(config.walk.roots, vec!["catalog", "brands"]);
        assert_eq!(config.walk.extensions.len(), 2);
        assert_eq!(config.sitemap.changefreq.as_deref(), Some("weekly"));
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].kind, RuleKind::Literal);
        assert_eq!(config.rules[0].policy, MatchPolicy::All);
        assert_eq!(config.rules[1].kind, RuleKind::InsertAfter);
        assert_eq!(config.rules[1].policy, MatchPolicy::First);

        let options = config.walk_options(temp.path());
        assert_eq!(options.roots[0], temp.path().join("catalog"));
        assert_eq!(
            config.sitemap_output_path(temp.path()),
            temp.path().join("public/sitemap.xml")
        );
    }

    #[test]
    fn env_base_url_beats_config() {
        let config = SiteConfig {
            site: super::SiteSection {
                base_url: Some("https://from-config.example.com".to_string()),
            },
            ..SiteConfig::default()
        };

        let resolved = config.base_url_with_lookup(|key| {
            assert_eq!(key, "SITEPATCH_BASE_URL");
            Some("https://from-env.example.com".to_string())
        });
        assert_eq!(resolved.as_deref(), Some("https://from-env.example.com"));
    }

    #[test]
    fn blank_env_base_url_falls_through_to_config() {
        let config = SiteConfig {
            site: super::SiteSection {
                base_url: Some("https://from-config.example.com".to_string()),
            },
            ..SiteConfig::default()
        };

        let resolved = config.base_url_with_lookup(|_| Some("   ".to_string()));
        assert_eq!(resolved.as_deref(), Some("https://from-config.example.com"));

        let unset = config.base_url_with_lookup(|_| None);
        assert_eq!(unset.as_deref(), Some("https://from-config.example.com"));

        let bare = SiteConfig::default();
        assert_eq!(bare.base_url_with_lookup(|_| None), None);
    }

    #[test]
    fn load_config_rejects_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("sitepatch.toml");
        fs::write(&config_path, "[site\nbase_url = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn load_rules_file_reads_standalone_catalog() {
        let temp = tempdir().expect("tempdir");
        let rules_path = temp.path().join("rules.toml");
        fs::write(
            &rules_path,
            r#"
[[rules]]
name = "strip-marker"
kind = "literal"
pattern = "<!-- draft -->"
replace = ""
"#,
        )
        .expect("write rules");

        let rules = load_rules_file(&rules_path).expect("load rules");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "strip-marker");
    }
}
