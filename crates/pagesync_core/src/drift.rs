//! Compare page records with the template files on disk.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::page::list_pages;
use crate::page_file::{PageFileLayout, locate_page_file};
use crate::page_tag::{TemplateFields, render_page_template};

const IGNORED_DIRS: &[&str] = &["templates", "_notes", "admin"];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DriftChangeType {
    Missing,
    Modified,
    Untracked,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftChange {
    pub change_type: DriftChangeType,
    pub relative_path: String,
    pub url: Option<String>,
    pub expected_hash: Option<String>,
    pub file_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub pages: usize,
    pub in_sync: usize,
    pub missing: usize,
    pub modified: usize,
    pub untracked: usize,
    pub unresolvable: usize,
    pub changes: Vec<DriftChange>,
}

pub fn diff_page_files(connection: &Connection, layout: &PageFileLayout) -> Result<DriftReport> {
    let pages = list_pages(connection)?;
    let mut tracked = BTreeSet::new();
    let mut changes = Vec::new();
    let mut in_sync = 0usize;
    let mut unresolvable = 0usize;

    for entity in &pages {
        let content = &entity.content;
        let Some(parent_id) = content.parent_id else {
            unresolvable += 1;
            continue;
        };
        let Some(path) =
            locate_page_file(connection, layout, parent_id, content.site_id, &content.name)?
        else {
            unresolvable += 1;
            continue;
        };
        let relative_path = relative_path(&layout.pages_dir, &path);
        tracked.insert(relative_path.clone());

        let expected = render_page_template(&TemplateFields {
            title: &content.title,
            description: &content.description,
            edit_link_id: Some(content.id),
            code: &entity.page.code,
            contents: &entity.page.contents,
        });
        let expected_hash = compute_hash(expected.as_bytes());

        if !path.exists() {
            changes.push(DriftChange {
                change_type: DriftChangeType::Missing,
                relative_path,
                url: Some(content.url.clone()),
                expected_hash: Some(expected_hash),
                file_hash: None,
            });
            continue;
        }
        let on_disk =
            fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let file_hash = compute_hash(&on_disk);
        if file_hash == expected_hash {
            in_sync += 1;
        } else {
            changes.push(DriftChange {
                change_type: DriftChangeType::Modified,
                relative_path,
                url: Some(content.url.clone()),
                expected_hash: Some(expected_hash),
                file_hash: Some(file_hash),
            });
        }
    }

    if layout.pages_dir.is_dir() {
        let walker = WalkDir::new(&layout.pages_dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| IGNORED_DIRS.contains(&name))
            });
        for entry in walker {
            let entry = entry
                .with_context(|| format!("failed to walk {}", layout.pages_dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str() else {
                continue;
            };
            if !layout.is_template_file(file_name) {
                continue;
            }
            let relative_path = relative_path(&layout.pages_dir, entry.path());
            if tracked.contains(&relative_path) {
                continue;
            }
            let file_hash = fs::read(entry.path())
                .ok()
                .map(|content| compute_hash(&content));
            changes.push(DriftChange {
                change_type: DriftChangeType::Untracked,
                relative_path,
                url: None,
                expected_hash: None,
                file_hash,
            });
        }
    }

    changes.sort_by(|left, right| {
        left.change_type
            .cmp(&right.change_type)
            .then(left.relative_path.cmp(&right.relative_path))
    });
    let count = |change_type: DriftChangeType| {
        changes
            .iter()
            .filter(|item| item.change_type == change_type)
            .count()
    };

    Ok(DriftReport {
        pages: pages.len(),
        in_sync,
        missing: count(DriftChangeType::Missing),
        modified: count(DriftChangeType::Modified),
        untracked: count(DriftChangeType::Untracked),
        unresolvable,
        changes,
    })
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.to_string_lossy().replace('\\', "/")
}

fn compute_hash(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
