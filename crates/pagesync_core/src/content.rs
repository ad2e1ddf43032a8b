//! Content tree and site records.
//!
//! Every node of a site (pages, folders, plugin content) is a row in
//! `contents`. The `url` column is a materialized path derived from the
//! parent chain; it is recomputed here on every insert and update and pushed
//! down to descendants when a folder moves or is renamed.

use std::collections::HashSet;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use crate::store::unix_timestamp;

pub const ROOT_CONTENT_ID: i64 = 1;
pub const MAIN_SITE_ID: i64 = 1;

const CONTENT_COLUMNS: &str = "id, parent_id, site_id, type, name, title, description, url, \
     status, site_root, publish_begin, publish_end";

const SITE_COLUMNS: &str = "id, name, alias, title, theme, use_subdomain, domain_type, status";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum ContentKind {
    Page,
    ContentFolder,
    Other(String),
}

impl ContentKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Page => "Page",
            Self::ContentFolder => "ContentFolder",
            Self::Other(value) => value,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "Page" => Self::Page,
            "ContentFolder" => Self::ContentFolder,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Self::ContentFolder)
    }
}

impl From<ContentKind> for String {
    fn from(kind: ContentKind) -> Self {
        kind.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentRecord {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub site_id: i64,
    pub kind: ContentKind,
    pub name: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub status: bool,
    pub site_root: bool,
    pub publish_begin: Option<i64>,
    pub publish_end: Option<i64>,
}

impl ContentRecord {
    /// Whether the record is visible at `now` (unix seconds).
    pub fn is_published_at(&self, now: i64) -> bool {
        self.status
            && self.publish_begin.is_none_or(|begin| begin <= now)
            && self.publish_end.is_none_or(|end| now <= end)
    }
}

#[derive(Debug, Clone)]
pub struct NewContent {
    pub parent_id: i64,
    pub site_id: i64,
    pub kind: ContentKind,
    pub name: String,
    pub title: String,
    pub description: String,
    pub status: bool,
    pub site_root: bool,
    pub publish_begin: Option<i64>,
    pub publish_end: Option<i64>,
}

impl NewContent {
    pub fn folder(parent_id: i64, site_id: i64, name: &str, title: &str) -> Self {
        Self {
            parent_id,
            site_id,
            kind: ContentKind::ContentFolder,
            name: name.to_string(),
            title: title.to_string(),
            description: String::new(),
            status: true,
            site_root: false,
            publish_begin: None,
            publish_end: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Site {
    pub id: i64,
    pub name: String,
    pub alias: String,
    pub title: String,
    pub theme: Option<String>,
    pub use_subdomain: bool,
    pub domain_type: i64,
    pub status: bool,
}

impl Site {
    pub fn is_main(&self) -> bool {
        self.id == MAIN_SITE_ID
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewSite {
    pub name: String,
    pub alias: Option<String>,
    pub title: String,
    pub theme: Option<String>,
    pub use_subdomain: bool,
    pub domain_type: i64,
}

pub fn load_content(connection: &Connection, id: i64) -> Result<Option<ContentRecord>> {
    connection
        .query_row(
            &format!("SELECT {CONTENT_COLUMNS} FROM contents WHERE id = ?1"),
            [id],
            content_from_row,
        )
        .optional()
        .with_context(|| format!("failed to load content {id}"))
}

/// Materialized URL of the folder `folder_id`, e.g. `/news/archive/`.
///
/// Returns `None` when the parent chain is dangling or cyclic.
pub fn folder_url(connection: &Connection, folder_id: i64) -> Result<Option<String>> {
    let mut names = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = Some(folder_id);

    while let Some(id) = cursor {
        if !seen.insert(id) {
            tracing::warn!(content_id = folder_id, "content tree cycle detected");
            return Ok(None);
        }
        let row: Option<(Option<i64>, String)> = connection
            .query_row(
                "SELECT parent_id, name FROM contents WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .with_context(|| format!("failed to walk content tree at {id}"))?;
        let Some((parent_id, name)) = row else {
            return Ok(None);
        };
        if parent_id.is_some() {
            names.push(name);
        }
        cursor = parent_id;
    }

    if names.is_empty() {
        return Ok(Some("/".to_string()));
    }
    names.reverse();
    Ok(Some(format!("/{}/", names.join("/"))))
}

/// URL a record named `name` of `kind` would have under `parent_id`.
pub fn child_url(
    connection: &Connection,
    parent_id: i64,
    name: &str,
    kind: &ContentKind,
) -> Result<Option<String>> {
    let Some(parent_url) = folder_url(connection, parent_id)? else {
        return Ok(None);
    };
    Ok(Some(join_child_url(&parent_url, name, kind)))
}

fn join_child_url(parent_url: &str, name: &str, kind: &ContentKind) -> String {
    if kind.is_folder() {
        format!("{parent_url}{name}/")
    } else {
        format!("{parent_url}{name}")
    }
}

pub fn find_content_by_url(
    connection: &Connection,
    url: &str,
    kind: &ContentKind,
) -> Result<Option<ContentRecord>> {
    connection
        .query_row(
            &format!(
                "SELECT {CONTENT_COLUMNS} FROM contents WHERE url = ?1 AND type = ?2 ORDER BY id LIMIT 1"
            ),
            params![url, kind.as_str()],
            content_from_row,
        )
        .optional()
        .with_context(|| format!("failed to look up content by url {url}"))
}

/// Sibling named `name` under `parent_id`, optionally restricted to `kind`.
pub fn find_child(
    connection: &Connection,
    parent_id: i64,
    name: &str,
    kind: Option<&ContentKind>,
) -> Result<Option<ContentRecord>> {
    let result = match kind {
        Some(kind) => connection.query_row(
            &format!(
                "SELECT {CONTENT_COLUMNS} FROM contents WHERE parent_id = ?1 AND name = ?2 AND type = ?3 LIMIT 1"
            ),
            params![parent_id, name, kind.as_str()],
            content_from_row,
        ),
        None => connection.query_row(
            &format!(
                "SELECT {CONTENT_COLUMNS} FROM contents WHERE parent_id = ?1 AND name = ?2 LIMIT 1"
            ),
            params![parent_id, name],
            content_from_row,
        ),
    };
    result
        .optional()
        .with_context(|| format!("failed to look up child {name} of {parent_id}"))
}

pub fn list_children(connection: &Connection, parent_id: i64) -> Result<Vec<ContentRecord>> {
    let mut statement = connection
        .prepare(&format!(
            "SELECT {CONTENT_COLUMNS} FROM contents WHERE parent_id = ?1 ORDER BY name ASC"
        ))
        .context("failed to prepare children query")?;
    let rows = statement
        .query_map([parent_id], content_from_row)
        .context("failed to run children query")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("failed to decode content row")?);
    }
    Ok(out)
}

pub fn insert_content(connection: &Connection, new: &NewContent) -> Result<ContentRecord> {
    let Some(url) = child_url(connection, new.parent_id, &new.name, &new.kind)? else {
        bail!(
            "cannot resolve url for {}: parent {} is not reachable from the root",
            new.name,
            new.parent_id
        );
    };
    if find_child(connection, new.parent_id, &new.name, None)?.is_some() {
        bail!(
            "a content named {} already exists under parent {}",
            new.name,
            new.parent_id
        );
    }

    let now = unix_timestamp()?;
    connection
        .execute(
            "INSERT INTO contents (
                parent_id, site_id, type, name, title, description, url, status, site_root,
                publish_begin, publish_end, created_at_unix, modified_at_unix
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                new.parent_id,
                new.site_id,
                new.kind.as_str(),
                new.name,
                new.title,
                new.description,
                url,
                new.status,
                new.site_root,
                new.publish_begin,
                new.publish_end,
                now,
            ],
        )
        .with_context(|| format!("failed to insert content {url}"))?;
    let id = connection.last_insert_rowid();

    load_content(connection, id)?
        .ok_or_else(|| anyhow::anyhow!("content {id} vanished after insert"))
}

/// Persist `record`, recomputing its url from the current parent chain.
pub fn update_content(connection: &Connection, record: &ContentRecord) -> Result<ContentRecord> {
    let url = match record.parent_id {
        Some(parent_id) => child_url(connection, parent_id, &record.name, &record.kind)?
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "cannot resolve url for {}: parent {parent_id} is not reachable from the root",
                    record.name
                )
            })?,
        None => "/".to_string(),
    };
    if let Some(parent_id) = record.parent_id
        && let Some(sibling) = find_child(connection, parent_id, &record.name, None)?
        && sibling.id != record.id
    {
        bail!(
            "a content named {} already exists under parent {parent_id}",
            record.name
        );
    }

    let previous_url: Option<String> = connection
        .query_row("SELECT url FROM contents WHERE id = ?1", [record.id], |row| {
            row.get(0)
        })
        .optional()
        .with_context(|| format!("failed to load content {}", record.id))?;
    if previous_url.is_none() {
        bail!("content {} does not exist", record.id);
    }

    connection
        .execute(
            "UPDATE contents SET
                parent_id = ?2, site_id = ?3, type = ?4, name = ?5, title = ?6,
                description = ?7, url = ?8, status = ?9, site_root = ?10,
                publish_begin = ?11, publish_end = ?12, modified_at_unix = ?13
             WHERE id = ?1",
            params![
                record.id,
                record.parent_id,
                record.site_id,
                record.kind.as_str(),
                record.name,
                record.title,
                record.description,
                url,
                record.status,
                record.site_root,
                record.publish_begin,
                record.publish_end,
                unix_timestamp()?,
            ],
        )
        .with_context(|| format!("failed to update content {}", record.id))?;

    if record.kind.is_folder() && previous_url.as_deref() != Some(url.as_str()) {
        refresh_descendant_urls(connection, record.id, &url)?;
    }

    load_content(connection, record.id)?
        .ok_or_else(|| anyhow::anyhow!("content {} vanished after update", record.id))
}

fn refresh_descendant_urls(connection: &Connection, folder_id: i64, folder_url: &str) -> Result<()> {
    for child in list_children(connection, folder_id)? {
        let url = join_child_url(folder_url, &child.name, &child.kind);
        connection
            .execute(
                "UPDATE contents SET url = ?2 WHERE id = ?1",
                params![child.id, url],
            )
            .with_context(|| format!("failed to refresh url of content {}", child.id))?;
        if child.kind.is_folder() {
            refresh_descendant_urls(connection, child.id, &url)?;
        }
    }
    Ok(())
}

/// Delete a content row; descendants and the page extension cascade.
pub fn delete_content(connection: &Connection, id: i64) -> Result<usize> {
    if id == ROOT_CONTENT_ID {
        bail!("the root content folder cannot be deleted");
    }
    connection
        .execute("DELETE FROM contents WHERE id = ?1", [id])
        .with_context(|| format!("failed to delete content {id}"))
}

/// `base`, or `base_2`, `base_3`, ... whichever is free under `parent_id`.
pub fn unique_child_name(connection: &Connection, parent_id: i64, base: &str) -> Result<String> {
    if find_child(connection, parent_id, base, None)?.is_none() {
        return Ok(base.to_string());
    }
    let mut suffix = 2usize;
    loop {
        let candidate = format!("{base}_{suffix}");
        if find_child(connection, parent_id, &candidate, None)?.is_none() {
            return Ok(candidate);
        }
        suffix += 1;
    }
}

pub fn load_site(connection: &Connection, id: i64) -> Result<Option<Site>> {
    connection
        .query_row(
            &format!("SELECT {SITE_COLUMNS} FROM sites WHERE id = ?1"),
            [id],
            site_from_row,
        )
        .optional()
        .with_context(|| format!("failed to load site {id}"))
}

pub fn find_site_by_name(connection: &Connection, name: &str) -> Result<Option<Site>> {
    if name.is_empty() {
        return Ok(None);
    }
    connection
        .query_row(
            &format!("SELECT {SITE_COLUMNS} FROM sites WHERE name = ?1 AND id != ?2"),
            params![name, MAIN_SITE_ID],
            site_from_row,
        )
        .optional()
        .with_context(|| format!("failed to look up site {name}"))
}

/// Sub-site whose alias is the leading segment of `url`.
pub fn find_site_by_url(connection: &Connection, url: &str) -> Result<Option<Site>> {
    let Some(first) = url.split('/').find(|segment| !segment.is_empty()) else {
        return Ok(None);
    };
    connection
        .query_row(
            &format!(
                "SELECT {SITE_COLUMNS} FROM sites WHERE alias = ?1 AND id != ?2 ORDER BY id LIMIT 1"
            ),
            params![first, MAIN_SITE_ID],
            site_from_row,
        )
        .optional()
        .with_context(|| format!("failed to look up site for url {url}"))
}

pub fn list_sites(connection: &Connection) -> Result<Vec<Site>> {
    let mut statement = connection
        .prepare(&format!("SELECT {SITE_COLUMNS} FROM sites ORDER BY id ASC"))
        .context("failed to prepare site query")?;
    let rows = statement
        .query_map([], site_from_row)
        .context("failed to run site query")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("failed to decode site row")?);
    }
    Ok(out)
}

/// Create a sub-site together with its root folder under the tree root.
pub fn insert_site(connection: &mut Connection, new: &NewSite) -> Result<(Site, ContentRecord)> {
    let name = new.name.trim();
    if name.is_empty() || name.contains('/') {
        bail!("site name must be a non-empty path segment");
    }
    let alias = new
        .alias
        .as_deref()
        .map(str::trim)
        .filter(|alias| !alias.is_empty())
        .unwrap_or(name)
        .to_string();
    if alias.contains('/') {
        bail!("site alias must be a single path segment");
    }

    let transaction = connection
        .transaction()
        .context("failed to start site transaction")?;
    transaction
        .execute(
            "INSERT INTO sites (name, alias, title, theme, use_subdomain, domain_type, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
            params![
                name,
                alias,
                new.title,
                new.theme,
                new.use_subdomain,
                new.domain_type
            ],
        )
        .with_context(|| format!("failed to insert site {name}"))?;
    let site_id = transaction.last_insert_rowid();

    let mut root = NewContent::folder(ROOT_CONTENT_ID, site_id, &alias, &new.title);
    root.site_root = true;
    let root = insert_content(&transaction, &root)?;

    transaction
        .commit()
        .context("failed to commit site transaction")?;

    let site = load_site(connection, site_id)?
        .ok_or_else(|| anyhow::anyhow!("site {site_id} vanished after insert"))?;
    Ok((site, root))
}

fn content_from_row(row: &Row<'_>) -> rusqlite::Result<ContentRecord> {
    let kind: String = row.get(3)?;
    Ok(ContentRecord {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        site_id: row.get(2)?,
        kind: ContentKind::parse(&kind),
        name: row.get(4)?,
        title: row.get(5)?,
        description: row.get(6)?,
        url: row.get(7)?,
        status: row.get(8)?,
        site_root: row.get(9)?,
        publish_begin: row.get(10)?,
        publish_end: row.get(11)?,
    })
}

fn site_from_row(row: &Row<'_>) -> rusqlite::Result<Site> {
    Ok(Site {
        id: row.get(0)?,
        name: row.get(1)?,
        alias: row.get(2)?,
        title: row.get(3)?,
        theme: row.get(4)?,
        use_subdomain: row.get(5)?,
        domain_type: row.get(6)?,
        status: row.get(7)?,
    })
}
