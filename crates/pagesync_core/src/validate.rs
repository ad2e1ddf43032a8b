use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use rusqlite::Connection;
use serde::Serialize;

use crate::config::SyncConfig;
use crate::content::find_child;
use crate::service::PageInput;

/// Per-field validation messages, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn messages(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.fields
            .iter()
            .map(|(field, messages)| (field.as_str(), messages.as_slice()))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.fields {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                first = false;
                write!(f, "{field}: {message}")?;
            }
        }
        Ok(())
    }
}

/// Check `input` against the page rules. `existing_id` is the content id
/// being edited, excluded from the sibling-name check.
pub fn validate_page(
    connection: &Connection,
    config: &SyncConfig,
    input: &PageInput,
    existing_id: Option<i64>,
) -> Result<ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let name = input.name.as_str();
    if name.trim().is_empty() {
        errors.add("name", "name must not be empty");
    } else if name.contains('/') {
        errors.add("name", "name must not contain `/`");
    } else if let Some(sibling) = find_child(connection, input.parent_id, name, None)?
        && Some(sibling.id) != existing_id
    {
        errors.add(
            "name",
            format!("`{name}` is already used by another content in this folder"),
        );
    }

    let limit = config.max_body_bytes();
    for (field, value) in [("contents", &input.contents), ("draft", &input.draft)] {
        if value.len() > limit {
            errors.add(
                field,
                format!("{field} exceeds the {limit} byte limit ({} bytes)", value.len()),
            );
        }
    }

    let script_fields = [
        ("contents", &input.contents),
        ("draft", &input.draft),
        ("code", &input.code),
    ];
    if !config.pages.allow_scripts {
        for (field, value) in script_fields {
            if contains_script(value) {
                errors.add(field, format!("{field} must not contain script"));
            }
        }
    }

    if config.pages.validate_syntax {
        for (field, value) in script_fields {
            if value.trim().is_empty() {
                continue;
            }
            if php_syntax_ok(config.php_binary(), value) == Some(false) {
                errors.add(field, format!("{field} has a PHP syntax error"));
            }
        }
    }

    Ok(errors)
}

/// Whether `value` embeds script: a `<script>` tag, PHP open tags, an
/// `on*=` event attribute or a `javascript:` link.
pub fn contains_script(value: &str) -> bool {
    static TAG: OnceLock<Regex> = OnceLock::new();
    static EVENT: OnceLock<Regex> = OnceLock::new();
    static HREF: OnceLock<Regex> = OnceLock::new();

    let tag = TAG.get_or_init(|| Regex::new(r"(?i)<\?=|<\?php|<script").expect("valid regex"));
    let event = EVENT.get_or_init(|| {
        Regex::new(r"(?is)<[^>]+?(?:\s|/)on[a-z]+\s*=[^>]*>").expect("valid regex")
    });
    let href = HREF.get_or_init(|| {
        Regex::new(r#"(?i)href\s*=\s*["']?\s*javascript\s*:"#).expect("valid regex")
    });

    tag.is_match(value) || event.is_match(value) || href.is_match(value)
}

/// Lint `source` with `php -l`. `None` when the binary cannot be run.
pub fn php_syntax_ok(php_binary: &str, source: &str) -> Option<bool> {
    let mut child = match Command::new(php_binary)
        .arg("-l")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(error) => {
            tracing::debug!(php_binary, "php syntax check skipped: {error}");
            return None;
        }
    };
    if let Some(mut stdin) = child.stdin.take()
        && let Err(error) = stdin.write_all(source.as_bytes())
    {
        tracing::debug!("failed to feed php -l: {error}");
    }
    match child.wait() {
        Ok(status) => Some(status.success()),
        Err(error) => {
            tracing::debug!("php -l did not finish: {error}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{MAIN_SITE_ID, NewContent, ROOT_CONTENT_ID, insert_content};
    use crate::store::test_support::migrated_project;

    fn input(name: &str) -> PageInput {
        PageInput {
            name: name.to_string(),
            title: "Title".to_string(),
            ..PageInput::new(ROOT_CONTENT_ID)
        }
    }

    #[test]
    fn script_detection_covers_tags_events_and_links() {
        assert!(contains_script("<SCRIPT>alert(1)</SCRIPT>"));
        assert!(contains_script("<?php echo 1; ?>"));
        assert!(contains_script("<?= $x ?>"));
        assert!(contains_script(r#"<img src="a.png" onerror="x()">"#));
        assert!(contains_script(r#"<a href="javascript:void(0)">x</a>"#));
        assert!(!contains_script("<p>Online events are listed here.</p>"));
        assert!(!contains_script(r#"<a href="/about">about</a>"#));
    }

    #[test]
    fn name_rules_fire() {
        let (_temp, _paths, connection) = migrated_project();
        let config = SyncConfig::default();
        insert_content(
            &connection,
            &NewContent::folder(ROOT_CONTENT_ID, MAIN_SITE_ID, "news", "News"),
        )
        .expect("folder");

        let empty = validate_page(&connection, &config, &input(" "), None).expect("validate");
        assert!(empty.has("name"));
        let slash = validate_page(&connection, &config, &input("a/b"), None).expect("validate");
        assert!(slash.messages("name")[0].contains('/'));
        let taken = validate_page(&connection, &config, &input("news"), None).expect("validate");
        assert!(taken.messages("name")[0].contains("already used"));
        let ok = validate_page(&connection, &config, &input("about"), None).expect("validate");
        assert!(ok.is_empty(), "{ok}");
    }

    #[test]
    fn editing_keeps_own_name() {
        let (_temp, _paths, connection) = migrated_project();
        let folder = insert_content(
            &connection,
            &NewContent::folder(ROOT_CONTENT_ID, MAIN_SITE_ID, "news", "News"),
        )
        .expect("folder");
        let errors = validate_page(&connection, &SyncConfig::default(), &input("news"), Some(folder.id))
            .expect("validate");
        assert!(errors.is_empty());
    }

    #[test]
    fn body_limit_and_scripts_are_enforced() {
        let (_temp, _paths, connection) = migrated_project();
        let mut config = SyncConfig::default();
        let mut page = input("big");
        page.contents = "x".repeat(64_001);
        page.code = "<script>x()</script>".to_string();

        let errors = validate_page(&connection, &config, &page, None).expect("validate");
        assert!(errors.has("contents"));
        assert!(errors.has("code"));
        assert!(!errors.has("draft"));
        assert!(errors.to_string().contains("64000 byte limit"));

        config.pages.allow_scripts = true;
        let errors = validate_page(&connection, &config, &page, None).expect("validate");
        assert!(!errors.has("code"));
    }

    #[test]
    fn missing_php_binary_skips_syntax_check() {
        assert_eq!(
            php_syntax_ok("/nonexistent/pagesync-php", "<?php echo 1;"),
            None
        );
    }
}
