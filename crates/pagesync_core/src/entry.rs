//! Reverse sync: import template files under `View/Pages` into the content tree.

use std::borrow::Cow;
use std::fs;
use std::ops::AddAssign;
use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use serde::Serialize;
use walkdir::WalkDir;

use crate::config::SyncConfig;
use crate::content::{
    ContentKind, MAIN_SITE_ID, NewContent, ROOT_CONTENT_ID, find_content_by_url, find_site_by_name,
    insert_content, update_content,
};
use crate::page::{PageBody, PageEntity, find_page_by_name, insert_page, update_page};
use crate::page_file::PageFileLayout;
use crate::page_tag::{camelize, parse_page_template};
use crate::runtime::normalize_for_display;

const SKIPPED_DIRS: &[&str] = &["_notes", "admin"];
const TEMPLATES_DIR: &str = "templates";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntryReport {
    pub all: usize,
    pub insert: usize,
    pub update: usize,
    pub insert_folder: usize,
    pub update_folder: usize,
}

impl AddAssign for EntryReport {
    fn add_assign(&mut self, other: Self) {
        self.all += other.all;
        self.insert += other.insert;
        self.update += other.update;
        self.insert_folder += other.insert_folder;
        self.update_folder += other.update_folder;
    }
}

struct FolderTarget {
    id: i64,
    site_id: i64,
}

struct ImportedFile {
    name: String,
    title: String,
    description: String,
    body: String,
}

/// Import every template file below `dir` into the folder `parent_id`.
///
/// `dir` must be the pages root or one of its descendants. Folders are
/// created or retitled as needed; the walk never writes template files.
pub fn entry_page_files(
    connection: &mut Connection,
    layout: &PageFileLayout,
    config: &SyncConfig,
    dir: &Path,
    parent_id: i64,
) -> Result<EntryReport> {
    let mut report = EntryReport::default();
    if dir.file_name().and_then(|name| name.to_str()) == Some(TEMPLATES_DIR) {
        return Ok(report);
    }

    let Some(folder) = resolve_folder(connection, layout, config, dir, parent_id, &mut report)?
    else {
        return Ok(report);
    };

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        } else if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    for path in files {
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some(stem) = layout.template_stem(file_name) else {
            continue;
        };
        report.all += 1;

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(path = %normalize_for_display(&path), "failed to read template: {error}");
                continue;
            }
        };
        let source = String::from_utf8_lossy(&bytes);
        if matches!(source, Cow::Owned(_)) {
            tracing::warn!(
                path = %normalize_for_display(&path),
                "template is not valid UTF-8, invalid bytes were replaced"
            );
        }
        let imported = read_template(stem, &source);
        import_file(connection, &folder, &imported, &path, &mut report)?;
    }

    for child in dirs {
        let skipped = child
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| SKIPPED_DIRS.contains(&name));
        if skipped {
            continue;
        }
        report += entry_page_files(connection, layout, config, &child, folder.id)?;
    }

    Ok(report)
}

fn read_template(stem: &str, source: &str) -> ImportedFile {
    let parsed = parse_page_template(source);
    ImportedFile {
        name: stem.to_string(),
        title: parsed.title.unwrap_or_else(|| camelize(stem)),
        description: parsed.description.unwrap_or_default(),
        body: parsed.body,
    }
}

/// Map `dir` to its content folder, creating it when absent. `None` means
/// the folder could not be created and the subtree is skipped.
fn resolve_folder(
    connection: &Connection,
    layout: &PageFileLayout,
    config: &SyncConfig,
    dir: &Path,
    parent_id: i64,
    report: &mut EntryReport,
) -> Result<Option<FolderTarget>> {
    let relative = match dir.strip_prefix(&layout.pages_dir) {
        Ok(relative) => relative,
        Err(_) => bail!(
            "{} is outside the pages directory {}",
            normalize_for_display(dir),
            normalize_for_display(&layout.pages_dir)
        ),
    };
    let mut segments: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    if segments.is_empty() {
        return Ok(Some(FolderTarget {
            id: ROOT_CONTENT_ID,
            site_id: MAIN_SITE_ID,
        }));
    }

    let mut site_id = MAIN_SITE_ID;
    if let Some(site) = find_site_by_name(connection, &segments[0])? {
        if !site.alias.is_empty() {
            segments[0] = site.alias.clone();
        }
        site_id = site.id;
    }
    let url = format!("/{}/", segments.join("/"));
    let mapped_title = config.folder_title_for_url(&url);

    if let Some(mut folder) = find_content_by_url(connection, &url, &ContentKind::ContentFolder)? {
        if let Some(title) = mapped_title
            && title != folder.title
        {
            folder.title = title;
            match update_content(connection, &folder) {
                Ok(_) => report.update_folder += 1,
                Err(error) => tracing::warn!(url = %url, "failed to retitle folder: {error:#}"),
            }
        }
        return Ok(Some(FolderTarget {
            id: folder.id,
            site_id: folder.site_id,
        }));
    }

    let Some(name) = dir.file_name().map(|name| name.to_string_lossy().into_owned()) else {
        return Ok(None);
    };
    let title = mapped_title.unwrap_or_else(|| name.clone());
    match insert_content(
        connection,
        &NewContent::folder(parent_id, site_id, &name, &title),
    ) {
        Ok(folder) => {
            report.insert_folder += 1;
            tracing::info!(url = %folder.url, "imported folder");
            Ok(Some(FolderTarget {
                id: folder.id,
                site_id: folder.site_id,
            }))
        }
        Err(error) => {
            tracing::warn!(url = %url, "failed to create folder, skipping subtree: {error:#}");
            Ok(None)
        }
    }
}

fn import_file(
    connection: &mut Connection,
    folder: &FolderTarget,
    imported: &ImportedFile,
    path: &Path,
    report: &mut EntryReport,
) -> Result<()> {
    let shown = normalize_for_display(path);
    match find_page_by_name(connection, folder.id, &imported.name)? {
        Some(existing) => {
            if !is_dirty(&existing, imported) {
                return Ok(());
            }
            match save_update(connection, existing, imported) {
                Ok(()) => {
                    report.update += 1;
                    tracing::info!(path = %shown, "updated page from template");
                }
                Err(error) => tracing::warn!(path = %shown, "failed to update page: {error:#}"),
            }
        }
        None => match save_insert(connection, folder, imported) {
            Ok(()) => {
                report.insert += 1;
                tracing::info!(path = %shown, "imported page");
            }
            Err(error) => tracing::warn!(path = %shown, "failed to import page: {error:#}"),
        },
    }
    Ok(())
}

fn is_dirty(existing: &PageEntity, imported: &ImportedFile) -> bool {
    existing.content.title != imported.title
        || existing.content.description != imported.description
        || existing.page.contents.trim() != imported.body.trim()
}

fn save_update(
    connection: &mut Connection,
    existing: PageEntity,
    imported: &ImportedFile,
) -> Result<()> {
    let transaction = connection
        .transaction()
        .context("failed to start import transaction")?;
    let mut content = existing.content;
    content.title = imported.title.clone();
    content.description = imported.description.clone();
    update_content(&transaction, &content)?;
    update_page(
        &transaction,
        content.id,
        &PageBody {
            contents: imported.body.clone(),
            draft: existing.page.draft,
            code: existing.page.code,
            page_template: existing.page.page_template,
        },
    )?;
    transaction
        .commit()
        .context("failed to commit import transaction")
}

fn save_insert(
    connection: &mut Connection,
    folder: &FolderTarget,
    imported: &ImportedFile,
) -> Result<()> {
    let transaction = connection
        .transaction()
        .context("failed to start import transaction")?;
    let content = insert_content(
        &transaction,
        &NewContent {
            kind: ContentKind::Page,
            description: imported.description.clone(),
            ..NewContent::folder(folder.id, folder.site_id, &imported.name, &imported.title)
        },
    )?;
    insert_page(
        &transaction,
        content.id,
        &PageBody {
            contents: imported.body.clone(),
            ..PageBody::default()
        },
    )?;
    transaction
        .commit()
        .context("failed to commit import transaction")
}
