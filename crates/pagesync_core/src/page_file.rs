//! Page template files under `View/Pages`.
//!
//! Paths mirror the content tree: a page at `/news/archive/2024` lives at
//! `View/Pages/news/archive/2024.php`. Records on a sub-site are stored
//! under the site's `name` even though their URLs carry the site's `alias`.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;

use crate::config::SyncConfig;
use crate::content::{ContentRecord, MAIN_SITE_ID, find_site_by_url, folder_url, load_content};
use crate::page::PageEntity;
use crate::page_tag::{TemplateFields, render_page_template};
use crate::runtime::{ResolvedPaths, normalize_for_display};

/// Where and how template files are written.
#[derive(Debug, Clone)]
pub struct PageFileLayout {
    pub pages_dir: PathBuf,
    pub template_ext: String,
    pub file_mode: u32,
    pub dir_mode: u32,
}

impl PageFileLayout {
    pub fn new(paths: &ResolvedPaths, config: &SyncConfig) -> Result<Self> {
        Ok(Self {
            pages_dir: paths.pages_dir.clone(),
            template_ext: config.template_ext(),
            file_mode: config.file_mode()?,
            dir_mode: config.dir_mode()?,
        })
    }

    pub fn file_name(&self, name: &str) -> String {
        format!("{name}{}", self.template_ext)
    }

    /// Whether `file_name` carries the template extension. The match is
    /// exact so an imported page always maps back to the same file name.
    pub fn is_template_file(&self, file_name: &str) -> bool {
        self.template_stem(file_name).is_some()
    }

    /// `about.php` -> `about` when the extension matches.
    pub fn template_stem<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        let ext_len = self.template_ext.len();
        if file_name.len() <= ext_len {
            return None;
        }
        let split = file_name.len() - ext_len;
        if !file_name.is_char_boundary(split) {
            return None;
        }
        let (stem, ext) = file_name.split_at(split);
        (ext == self.template_ext).then_some(stem)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WriteOutcome {
    Written {
        path: PathBuf,
        removed_old: Option<PathBuf>,
    },
    Failed {
        message: String,
    },
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// Result of removing a page's template file. A failed removal carries the
/// message instead of an error so callers keep the record change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoveOutcome {
    Removed { path: PathBuf },
    Absent,
    Failed { path: PathBuf, message: String },
}

/// Open handle on a target path taken before a database commit.
#[derive(Debug)]
pub struct WriteProbe {
    path: PathBuf,
    created: bool,
}

impl WriteProbe {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file if the probe was the one that created it.
    pub fn discard(self) {
        if self.created
            && let Err(error) = fs::remove_file(&self.path)
        {
            tracing::warn!(
                path = %normalize_for_display(&self.path),
                "failed to remove probe file: {error}"
            );
        }
    }
}

/// Resolve the template path of a record with `(parent_id, site_id, name)`,
/// creating any missing directory level. `None` when the parent chain does
/// not reach the root.
pub fn page_file_path(
    connection: &Connection,
    layout: &PageFileLayout,
    parent_id: i64,
    site_id: i64,
    name: &str,
) -> Result<Option<PathBuf>> {
    create_dir_with_mode(&layout.pages_dir, layout.dir_mode)?;

    let Some(path) = locate_page_file(connection, layout, parent_id, site_id, name)? else {
        tracing::debug!(parent_id, name, "page path is unresolvable");
        return Ok(None);
    };
    if let Some(dir) = path.parent() {
        create_dir_with_mode(dir, layout.dir_mode)?;
    }
    Ok(Some(path))
}

/// Same as [`page_file_path`] without touching the filesystem.
pub fn locate_page_file(
    connection: &Connection,
    layout: &PageFileLayout,
    parent_id: i64,
    site_id: i64,
    name: &str,
) -> Result<Option<PathBuf>> {
    let Some(url) = folder_url(connection, parent_id)? else {
        return Ok(None);
    };
    let url = remap_site_alias(connection, &url, site_id)?;
    let path = url_dir(&layout.pages_dir, &url).join(layout.file_name(name));
    tracing::debug!(url = %url, path = %normalize_for_display(&path), "resolved page path");
    Ok(Some(path))
}

/// Directory of a content folder, without creating it.
pub fn content_folder_path(
    connection: &Connection,
    layout: &PageFileLayout,
    folder_id: i64,
) -> Result<Option<PathBuf>> {
    let Some(record) = load_content(connection, folder_id)? else {
        return Ok(None);
    };
    if !record.kind.is_folder() {
        return Ok(None);
    }
    let Some(url) = folder_url(connection, folder_id)? else {
        return Ok(None);
    };
    let url = remap_site_alias(connection, &url, record.site_id)?;
    Ok(Some(url_dir(&layout.pages_dir, &url)))
}

fn url_dir(pages_dir: &Path, url: &str) -> PathBuf {
    let mut dir = pages_dir.to_path_buf();
    for segment in url.split('/').filter(|segment| !segment.is_empty()) {
        dir.push(segment);
    }
    dir
}

/// Replace a leading `/<alias>/` by `/<site name>/` for sub-site records.
fn remap_site_alias(connection: &Connection, url: &str, site_id: i64) -> Result<String> {
    if url == "/" || site_id == MAIN_SITE_ID {
        return Ok(url.to_string());
    }
    let Some(site) = find_site_by_url(connection, url)? else {
        return Ok(url.to_string());
    };
    let prefix = format!("/{}/", site.alias);
    match url.strip_prefix(&prefix) {
        Some(rest) => Ok(format!("/{}/{rest}", site.name)),
        None => Ok(url.to_string()),
    }
}

/// Open `path` for writing without truncating it.
pub fn probe_writable(path: &Path) -> std::io::Result<WriteProbe> {
    let existed = path.exists();
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    Ok(WriteProbe {
        path: path.to_path_buf(),
        created: !existed,
    })
}

/// Render `entity` into its template file.
///
/// Filesystem failures are reported in the outcome rather than returned as
/// errors. When `old_path` differs from the new path it is removed after the
/// new file has been written.
pub fn write_page_template(
    connection: &Connection,
    layout: &PageFileLayout,
    entity: &PageEntity,
    old_path: Option<&Path>,
) -> Result<WriteOutcome> {
    let content = &entity.content;
    let Some(parent_id) = content.parent_id else {
        return Ok(WriteOutcome::Failed {
            message: format!("page {} has no parent folder", content.id),
        });
    };
    let path = match page_file_path(connection, layout, parent_id, content.site_id, &content.name)
    {
        Ok(Some(path)) => path,
        Ok(None) => {
            return Ok(WriteOutcome::Failed {
                message: format!("cannot resolve a template path for {}", content.url),
            });
        }
        Err(error) => {
            return Ok(WriteOutcome::Failed {
                message: format!("{error:#}"),
            });
        }
    };

    let rendered = render_page_template(&TemplateFields {
        title: &content.title,
        description: &content.description,
        edit_link_id: Some(content.id),
        code: &entity.page.code,
        contents: &entity.page.contents,
    });
    if let Err(error) = fs::write(&path, rendered) {
        tracing::warn!(path = %normalize_for_display(&path), "failed to write page template: {error}");
        return Ok(WriteOutcome::Failed {
            message: format!(
                "failed to write {}: {error}",
                normalize_for_display(&path)
            ),
        });
    }
    if let Err(error) = set_mode(&path, layout.file_mode) {
        tracing::warn!(path = %normalize_for_display(&path), "failed to set file mode: {error}");
    }

    let mut removed_old = None;
    if let Some(old_path) = old_path
        && old_path != path
        && old_path.exists()
    {
        match fs::remove_file(old_path) {
            Ok(()) => removed_old = Some(old_path.to_path_buf()),
            Err(error) => tracing::warn!(
                path = %normalize_for_display(old_path),
                "failed to remove stale page template: {error}"
            ),
        }
    }

    tracing::info!(url = %content.url, path = %normalize_for_display(&path), "wrote page template");
    Ok(WriteOutcome::Written { path, removed_old })
}

/// Remove the template file of `content`. Only lookups in the store raise
/// errors; filesystem failures come back as [`RemoveOutcome::Failed`].
pub fn delete_page_file(
    connection: &Connection,
    layout: &PageFileLayout,
    content: &ContentRecord,
) -> Result<RemoveOutcome> {
    let Some(parent_id) = content.parent_id else {
        return Ok(RemoveOutcome::Absent);
    };
    let Some(path) =
        locate_page_file(connection, layout, parent_id, content.site_id, &content.name)?
    else {
        return Ok(RemoveOutcome::Absent);
    };
    if !path.exists() {
        return Ok(RemoveOutcome::Absent);
    }
    let shown = normalize_for_display(&path);
    match fs::remove_file(&path) {
        Ok(()) => {
            tracing::info!(path = %shown, "removed page template");
            Ok(RemoveOutcome::Removed { path })
        }
        Err(error) => {
            let message = format!("failed to remove {shown}: {error}");
            tracing::warn!(path = %shown, "{message}");
            Ok(RemoveOutcome::Failed { path, message })
        }
    }
}

/// Create `dir` and any missing ancestors, applying `mode` to each new level.
fn create_dir_with_mode(dir: &Path, mode: u32) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    if let Some(parent) = dir.parent()
        && !parent.as_os_str().is_empty()
    {
        create_dir_with_mode(parent, mode)?;
    }
    fs::create_dir(dir)
        .with_context(|| format!("failed to create {}", normalize_for_display(dir)))?;
    set_mode(dir, mode)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to set mode on {}", normalize_for_display(path)))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
