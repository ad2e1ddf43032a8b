use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPLATE_EXT: &str = ".php";
pub const DEFAULT_FILE_MODE: u32 = 0o666;
pub const DEFAULT_DIR_MODE: u32 = 0o777;
pub const DEFAULT_MAX_BODY_BYTES: usize = 64_000;
pub const DEFAULT_PHP_BINARY: &str = "php";
pub const DEFAULT_THEME: &str = "bc-front";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SyncConfig {
    #[serde(default)]
    pub pages: PagesSection,
    #[serde(default)]
    pub themes: ThemesSection,
    #[serde(default)]
    pub folder_titles: BTreeMap<String, FolderTitle>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PagesSection {
    pub template_ext: Option<String>,
    pub file_mode: Option<String>,
    pub dir_mode: Option<String>,
    pub max_body_bytes: Option<usize>,
    #[serde(default)]
    pub validate_syntax: bool,
    pub php_binary: Option<String>,
    #[serde(default)]
    pub allow_scripts: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ThemesSection {
    pub default: Option<String>,
}

/// Title override for a folder created by the importer, keyed by URL segment.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FolderTitle {
    pub title: Option<String>,
    #[serde(default)]
    pub children: BTreeMap<String, FolderTitle>,
}

impl SyncConfig {
    /// Template file extension including the leading dot.
    pub fn template_ext(&self) -> String {
        match self.pages.template_ext.as_deref().map(str::trim) {
            Some(ext) if !ext.is_empty() => {
                if ext.starts_with('.') {
                    ext.to_string()
                } else {
                    format!(".{ext}")
                }
            }
            _ => DEFAULT_TEMPLATE_EXT.to_string(),
        }
    }

    pub fn file_mode(&self) -> Result<u32> {
        parse_mode(self.pages.file_mode.as_deref(), DEFAULT_FILE_MODE)
            .context("invalid [pages] file_mode")
    }

    pub fn dir_mode(&self) -> Result<u32> {
        parse_mode(self.pages.dir_mode.as_deref(), DEFAULT_DIR_MODE)
            .context("invalid [pages] dir_mode")
    }

    pub fn max_body_bytes(&self) -> usize {
        self.pages.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES)
    }

    pub fn php_binary(&self) -> &str {
        self.pages.php_binary.as_deref().unwrap_or(DEFAULT_PHP_BINARY)
    }

    pub fn default_theme(&self) -> &str {
        self.themes.default.as_deref().unwrap_or(DEFAULT_THEME)
    }

    /// Look up the configured title for the folder at `url` (e.g. `/news/archive/`).
    ///
    /// Segments are matched level by level: a hit on the last segment yields
    /// its title, a hit on an inner segment descends into its children, and
    /// a miss stays on the current level.
    pub fn folder_title_for_url(&self, url: &str) -> Option<String> {
        let segments: Vec<&str> = url.split('/').filter(|segment| !segment.is_empty()).collect();
        let mut level = &self.folder_titles;
        for (index, segment) in segments.iter().enumerate() {
            let Some(entry) = level.get(*segment) else {
                continue;
            };
            if index + 1 == segments.len() {
                return entry.title.clone();
            }
            if !entry.children.is_empty() {
                level = &entry.children;
            }
        }
        None
    }
}

/// Load and parse a SyncConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<SyncConfig> {
    if !config_path.exists() {
        return Ok(SyncConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SyncConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn parse_mode(value: Option<&str>, default: u32) -> Result<u32> {
    let Some(raw) = value.map(str::trim) else {
        return Ok(default);
    };
    let digits = raw.strip_prefix("0o").unwrap_or(raw);
    let mode = u32::from_str_radix(digits, 8)
        .with_context(|| format!("`{raw}` is not an octal permission mode"))?;
    if mode > 0o7777 {
        bail!("`{raw}` is out of range for a permission mode");
    }
    Ok(mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_uses_php_templates() {
        let config = SyncConfig::default();
        assert_eq!(config.template_ext(), ".php");
        assert_eq!(config.file_mode().expect("mode"), 0o666);
        assert_eq!(config.dir_mode().expect("mode"), 0o777);
        assert_eq!(config.max_body_bytes(), 64_000);
        assert_eq!(config.default_theme(), "bc-front");
        assert!(!config.pages.validate_syntax);
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn load_config_parses_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[pages]
template_ext = "ctp"
file_mode = "0644"
validate_syntax = true

[themes]
default = "my-theme"

[folder_titles.news]
title = "Latest News"

[folder_titles.news.children.archive]
title = "News Archive"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.template_ext(), ".ctp");
        assert_eq!(config.file_mode().expect("mode"), 0o644);
        assert!(config.pages.validate_syntax);
        assert_eq!(config.default_theme(), "my-theme");
        assert_eq!(
            config.folder_title_for_url("/news/").as_deref(),
            Some("Latest News")
        );
        assert_eq!(
            config.folder_title_for_url("/news/archive/").as_deref(),
            Some("News Archive")
        );
        assert_eq!(config.folder_title_for_url("/blog/"), None);
    }

    #[test]
    fn folder_title_skips_unmatched_leading_segments() {
        let mut config = SyncConfig::default();
        config.folder_titles.insert(
            "news".to_string(),
            FolderTitle {
                title: Some("News".to_string()),
                children: BTreeMap::new(),
            },
        );
        assert_eq!(config.folder_title_for_url("/s/news/").as_deref(), Some("News"));
        assert_eq!(config.folder_title_for_url("/news/2024/"), None);
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[pages\ntemplate_ext = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn invalid_mode_is_rejected() {
        let mut config = SyncConfig::default();
        config.pages.file_mode = Some("0899".to_string());
        assert!(config.file_mode().is_err());
    }
}
