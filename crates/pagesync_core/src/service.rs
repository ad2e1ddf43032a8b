//! Page lifecycle: validated saves with a pre-flight file probe, bulk
//! export and import, and URL lookups.
//!
//! A save first checks that the template file can be opened, then commits
//! the content and page rows in one transaction, and only then renders the
//! file. A file write that fails after the commit is reported in the
//! returned [`WriteOutcome`]; the records are kept.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use walkdir::WalkDir;

use crate::config::SyncConfig;
use crate::content::{
    ContentKind, ContentRecord, NewContent, ROOT_CONTENT_ID, delete_content, find_content_by_url,
    insert_content, load_content, load_site, unique_child_name, update_content,
};
use crate::drift::{DriftReport, diff_page_files};
use crate::entry::{EntryReport, entry_page_files};
use crate::error::{SaveError, not_writable};
use crate::migrate::open_migrated;
use crate::page::{PageBody, PageEntity, insert_page, list_pages, load_page, update_page};
use crate::page_file::{
    PageFileLayout, RemoveOutcome, WriteOutcome, WriteProbe, delete_page_file, locate_page_file, page_file_path,
    probe_writable, write_page_template,
};
use crate::runtime::{ResolvedPaths, normalize_for_display};
use crate::store::unix_timestamp;
use crate::validate::validate_page;

/// Editable fields of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInput {
    pub parent_id: i64,
    /// Defaults to the parent folder's site.
    pub site_id: Option<i64>,
    pub name: String,
    pub title: String,
    pub description: String,
    pub contents: String,
    pub draft: String,
    pub code: String,
    pub page_template: Option<String>,
    pub status: bool,
    pub publish_begin: Option<i64>,
    pub publish_end: Option<i64>,
}

impl PageInput {
    pub fn new(parent_id: i64) -> Self {
        Self {
            parent_id,
            site_id: None,
            name: String::new(),
            title: String::new(),
            description: String::new(),
            contents: String::new(),
            draft: String::new(),
            code: String::new(),
            page_template: None,
            status: true,
            publish_begin: None,
            publish_end: None,
        }
    }

    fn body(&self) -> PageBody {
        PageBody {
            contents: self.contents.clone(),
            draft: self.draft.clone(),
            code: self.code.clone(),
            page_template: self.page_template.clone(),
        }
    }
}

impl From<&PageEntity> for PageInput {
    fn from(entity: &PageEntity) -> Self {
        Self {
            parent_id: entity.content.parent_id.unwrap_or(ROOT_CONTENT_ID),
            site_id: Some(entity.content.site_id),
            name: entity.content.name.clone(),
            title: entity.content.title.clone(),
            description: entity.content.description.clone(),
            contents: entity.page.contents.clone(),
            draft: entity.page.draft.clone(),
            code: entity.page.code.clone(),
            page_template: entity.page.page_template.clone(),
            status: entity.content.status,
            publish_begin: entity.content.publish_begin,
            publish_end: entity.content.publish_end,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedPage {
    pub entity: PageEntity,
    /// `None` when file saving is disabled.
    pub file: Option<WriteOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedPage {
    pub entity: PageEntity,
    pub removed_file: RemoveOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedWrite {
    pub url: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub total: usize,
    pub written: usize,
    pub failed: Vec<FailedWrite>,
    pub success: bool,
}

pub struct PageService {
    connection: Connection,
    config: SyncConfig,
    layout: PageFileLayout,
    themes_dir: PathBuf,
    file_save: bool,
    page_urls: Option<HashSet<String>>,
}

impl PageService {
    /// Open the migrated store under `paths`.
    pub fn open(paths: &ResolvedPaths, config: SyncConfig) -> Result<Self> {
        let connection = open_migrated(paths)?;
        Self::new(connection, paths, config)
    }

    pub fn new(connection: Connection, paths: &ResolvedPaths, config: SyncConfig) -> Result<Self> {
        let layout = PageFileLayout::new(paths, &config)?;
        Ok(Self {
            connection,
            config,
            layout,
            themes_dir: paths.themes_dir.clone(),
            file_save: true,
            page_urls: None,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    pub fn layout(&self) -> &PageFileLayout {
        &self.layout
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Toggle rendering of template files after a save.
    pub fn set_file_save(&mut self, enabled: bool) {
        self.file_save = enabled;
    }

    pub fn file_save(&self) -> bool {
        self.file_save
    }

    pub fn page(&self, id: i64) -> Result<Option<PageEntity>> {
        load_page(&self.connection, id)
    }

    pub fn add_page(&mut self, input: &PageInput) -> Result<SavedPage, SaveError> {
        let errors = validate_page(&self.connection, &self.config, input, None)?;
        if !errors.is_empty() {
            return Err(SaveError::Validation(errors));
        }
        let site_id = self.target_site(input)?;
        let probe = self.probe(input.parent_id, site_id, &input.name)?;

        let saved = (|| -> Result<PageEntity> {
            let transaction = self
                .connection
                .transaction()
                .context("failed to start page transaction")?;
            let content = insert_content(
                &transaction,
                &NewContent {
                    parent_id: input.parent_id,
                    site_id,
                    kind: ContentKind::Page,
                    name: input.name.clone(),
                    title: input.title.clone(),
                    description: input.description.clone(),
                    status: input.status,
                    site_root: false,
                    publish_begin: input.publish_begin,
                    publish_end: input.publish_end,
                },
            )?;
            let page = insert_page(&transaction, content.id, &input.body())?;
            transaction
                .commit()
                .context("failed to commit page transaction")?;
            Ok(PageEntity { content, page })
        })();
        let entity = match saved {
            Ok(entity) => entity,
            Err(error) => {
                if let Some(probe) = probe {
                    probe.discard();
                }
                return Err(error.into());
            }
        };

        self.page_urls = None;
        let file = self.write_file(&entity, None)?;
        tracing::info!(url = %entity.content.url, "added page");
        Ok(SavedPage { entity, file })
    }

    pub fn update_page(&mut self, id: i64, input: &PageInput) -> Result<SavedPage, SaveError> {
        let existing = load_page(&self.connection, id)?.ok_or(SaveError::NotFound { id })?;
        let errors = validate_page(&self.connection, &self.config, input, Some(id))?;
        if !errors.is_empty() {
            return Err(SaveError::Validation(errors));
        }

        let old_path = match existing.content.parent_id {
            Some(parent_id) => locate_page_file(
                &self.connection,
                &self.layout,
                parent_id,
                existing.content.site_id,
                &existing.content.name,
            )?,
            None => None,
        };
        let site_id = self.target_site(input)?;
        let probe = self.probe(input.parent_id, site_id, &input.name)?;

        let saved = (|| -> Result<PageEntity> {
            let transaction = self
                .connection
                .transaction()
                .context("failed to start page transaction")?;
            let content = update_content(
                &transaction,
                &ContentRecord {
                    parent_id: Some(input.parent_id),
                    site_id,
                    name: input.name.clone(),
                    title: input.title.clone(),
                    description: input.description.clone(),
                    status: input.status,
                    publish_begin: input.publish_begin,
                    publish_end: input.publish_end,
                    ..existing.content.clone()
                },
            )?;
            let page = update_page(&transaction, content.id, &input.body())?;
            transaction
                .commit()
                .context("failed to commit page transaction")?;
            Ok(PageEntity { content, page })
        })();
        let entity = match saved {
            Ok(entity) => entity,
            Err(error) => {
                if let Some(probe) = probe {
                    probe.discard();
                }
                return Err(error.into());
            }
        };

        self.page_urls = None;
        let file = self.write_file(&entity, old_path.as_deref())?;
        tracing::info!(url = %entity.content.url, "updated page");
        Ok(SavedPage { entity, file })
    }

    /// Remove the page rows, then its template file. A file that cannot be
    /// removed is reported in [`DeletedPage::removed_file`].
    pub fn delete_page(&mut self, id: i64) -> Result<DeletedPage, SaveError> {
        let entity = load_page(&self.connection, id)?.ok_or(SaveError::NotFound { id })?;
        delete_content(&self.connection, id)?;
        self.page_urls = None;
        let removed_file = delete_page_file(&self.connection, &self.layout, &entity.content)?;
        tracing::info!(url = %entity.content.url, "deleted page");
        Ok(DeletedPage {
            entity,
            removed_file,
        })
    }

    /// Copy a page under `new_parent_id` (default: the same folder). The copy
    /// starts unpublished and takes a `_N` suffix when its name is taken.
    pub fn copy_page(
        &mut self,
        id: i64,
        new_parent_id: Option<i64>,
        new_title: Option<&str>,
    ) -> Result<SavedPage, SaveError> {
        let source = load_page(&self.connection, id)?.ok_or(SaveError::NotFound { id })?;
        let parent_id = new_parent_id
            .or(source.content.parent_id)
            .unwrap_or(ROOT_CONTENT_ID);
        let name = unique_child_name(&self.connection, parent_id, &source.content.name)?;

        let mut input = PageInput::from(&source);
        input.parent_id = parent_id;
        input.site_id = None;
        input.name = name;
        input.status = false;
        if let Some(title) = new_title {
            input.title = title.to_string();
        }
        self.add_page(&input)
    }

    /// Render every page into its template file.
    pub fn write_all_page_templates(&mut self) -> Result<ExportReport> {
        let pages = list_pages(&self.connection)?;
        let mut written = 0usize;
        let mut failed = Vec::new();
        for entity in &pages {
            match write_page_template(&self.connection, &self.layout, entity, None)? {
                WriteOutcome::Written { .. } => written += 1,
                WriteOutcome::Failed { message } => {
                    tracing::warn!(url = %entity.content.url, "{message}");
                    failed.push(FailedWrite {
                        url: entity.content.url.clone(),
                        message,
                    });
                }
            }
        }
        Ok(ExportReport {
            total: pages.len(),
            written,
            success: failed.is_empty(),
            failed,
        })
    }

    /// Import template files under the pages root. Never writes files.
    pub fn import_page_files(&mut self) -> Result<EntryReport> {
        if !self.layout.pages_dir.is_dir() {
            return Ok(EntryReport::default());
        }
        let previous = self.file_save;
        self.file_save = false;
        let pages_dir = self.layout.pages_dir.clone();
        let report = entry_page_files(
            &mut self.connection,
            &self.layout,
            &self.config,
            &pages_dir,
            ROOT_CONTENT_ID,
        );
        self.file_save = previous;
        self.page_urls = None;
        report
    }

    pub fn diff_page_files(&self) -> Result<DriftReport> {
        diff_page_files(&self.connection, &self.layout)
    }

    /// Look up a page by URL on an active site. `/x/` also matches
    /// `/x/index` and `/x.html` matches `/x`.
    pub fn find_by_url(&self, url: &str, publish_only: bool) -> Result<Option<PageEntity>> {
        let now = unix_timestamp()?;
        for pattern in url_patterns(url) {
            let Some(content) =
                find_content_by_url(&self.connection, &pattern, &ContentKind::Page)?
            else {
                continue;
            };
            let site_active = load_site(&self.connection, content.site_id)?
                .is_some_and(|site| site.status);
            if !site_active {
                continue;
            }
            if publish_only && !content.is_published_at(now) {
                continue;
            }
            return load_page(&self.connection, content.id);
        }
        Ok(None)
    }

    /// Whether `url` names a page. Uses a cache of page URLs that is
    /// dropped on every save.
    pub fn is_page_url(&mut self, url: &str) -> Result<bool> {
        if self.page_urls.is_none() {
            self.page_urls = Some(load_page_urls(&self.connection)?);
        }
        let Some(urls) = self.page_urls.as_ref() else {
            return Ok(false);
        };

        let mut candidate = if url.starts_with('/') {
            url.to_string()
        } else {
            format!("/{url}")
        };
        if candidate.ends_with('/') {
            candidate.push_str("index");
        }
        if urls.contains(&candidate) {
            return Ok(true);
        }
        Ok(candidate
            .strip_suffix(".html")
            .is_some_and(|stripped| urls.contains(stripped)))
    }

    /// Template names available to a page: the default theme's, then the
    /// page's site theme when it differs.
    pub fn page_template_list(&self, content_id: i64) -> Result<Vec<String>> {
        let mut themes = vec![self.config.default_theme().to_string()];
        if let Some(content) = load_content(&self.connection, content_id)?
            && let Some(site) = load_site(&self.connection, content.site_id)?
            && let Some(theme) = site.theme.filter(|theme| !theme.is_empty())
            && !themes.contains(&theme)
        {
            themes.push(theme);
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for theme in themes {
            let dir = self
                .themes_dir
                .join(&theme)
                .join("templates")
                .join("Pages")
                .join("templates");
            if !dir.is_dir() {
                tracing::debug!(theme = %theme, "theme has no page templates");
                continue;
            }
            for entry in WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
            {
                let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(stem) = entry
                    .file_name()
                    .to_str()
                    .and_then(|name| self.layout.template_stem(name))
                else {
                    continue;
                };
                if seen.insert(stem.to_string()) {
                    out.push(stem.to_string());
                }
            }
        }
        Ok(out)
    }

    /// Site of the saved page. The parent must be a content folder.
    fn target_site(&self, input: &PageInput) -> Result<i64, SaveError> {
        let parent = load_content(&self.connection, input.parent_id)?
            .filter(|parent| parent.kind.is_folder())
            .ok_or(SaveError::Unresolvable {
                parent_id: input.parent_id,
            })?;
        Ok(input.site_id.unwrap_or(parent.site_id))
    }

    fn probe(
        &self,
        parent_id: i64,
        site_id: i64,
        name: &str,
    ) -> Result<Option<WriteProbe>, SaveError> {
        if !self.file_save {
            return Ok(None);
        }
        let path = page_file_path(&self.connection, &self.layout, parent_id, site_id, name)?
            .ok_or(SaveError::Unresolvable { parent_id })?;
        let probe = probe_writable(&path).map_err(|source| not_writable(&path, source))?;
        tracing::debug!(path = %normalize_for_display(probe.path()), "pre-flight probe ok");
        Ok(Some(probe))
    }

    fn write_file(
        &self,
        entity: &PageEntity,
        old_path: Option<&std::path::Path>,
    ) -> Result<Option<WriteOutcome>> {
        if !self.file_save {
            return Ok(None);
        }
        let outcome = write_page_template(&self.connection, &self.layout, entity, old_path)?;
        if let WriteOutcome::Failed { message } = &outcome {
            tracing::warn!(url = %entity.content.url, "{message}");
        }
        Ok(Some(outcome))
    }
}

fn url_patterns(url: &str) -> Vec<String> {
    let url = if url.starts_with('/') {
        url.to_string()
    } else {
        format!("/{url}")
    };
    let mut patterns = vec![url.clone()];
    if url.ends_with('/') {
        patterns.push(format!("{url}index"));
    }
    if let Some(stripped) = url.strip_suffix(".html") {
        patterns.push(stripped.to_string());
    }
    patterns
}

fn load_page_urls(connection: &Connection) -> Result<HashSet<String>> {
    let mut statement = connection
        .prepare("SELECT url FROM contents WHERE type = 'Page'")
        .context("failed to prepare page url query")?;
    let rows = statement
        .query_map([], |row| row.get::<_, String>(0))
        .context("failed to run page url query")?;
    let mut urls = HashSet::new();
    for row in rows {
        urls.insert(row.context("failed to decode page url")?);
    }
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::content::{MAIN_SITE_ID, NewSite, insert_site};
    use crate::store::test_support::migrated_project;
    use tempfile::TempDir;

    fn service() -> (TempDir, ResolvedPaths, PageService) {
        let (temp, paths, connection) = migrated_project();
        let service = PageService::new(connection, &paths, SyncConfig::default()).expect("service");
        (temp, paths, service)
    }

    fn page(parent_id: i64, name: &str, title: &str) -> PageInput {
        PageInput {
            name: name.to_string(),
            title: title.to_string(),
            contents: format!("<p>{title}</p>"),
            ..PageInput::new(parent_id)
        }
    }

    fn folder(service: &PageService, name: &str) -> ContentRecord {
        insert_content(
            service.connection(),
            &NewContent::folder(ROOT_CONTENT_ID, MAIN_SITE_ID, name, name),
        )
        .expect("folder")
    }

    #[test]
    fn add_page_commits_and_writes_template() {
        let (_temp, paths, mut service) = service();
        let saved = service
            .add_page(&page(ROOT_CONTENT_ID, "about", "About"))
            .expect("add");

        assert_eq!(saved.entity.content.url, "/about");
        let Some(WriteOutcome::Written { path, removed_old }) = saved.file else {
            panic!("expected a written file");
        };
        assert_eq!(path, paths.pages_dir.join("about.php"));
        assert_eq!(removed_old, None);
        let written = fs::read_to_string(path).expect("read");
        assert!(written.contains("setTitle('About')"));
        assert!(written.ends_with("<p>About</p>"));
    }

    #[test]
    fn rename_and_move_replace_exactly_the_old_file() {
        let (_temp, paths, mut service) = service();
        let news = folder(&service, "news");
        let saved = service
            .add_page(&page(ROOT_CONTENT_ID, "about", "About"))
            .expect("add");
        fs::write(paths.pages_dir.join("keep.php"), "keep").expect("bystander");

        let mut input = PageInput::from(&saved.entity);
        input.name = "company".to_string();
        input.parent_id = news.id;
        input.site_id = None;
        let updated = service
            .update_page(saved.entity.content.id, &input)
            .expect("update");

        assert_eq!(updated.entity.content.url, "/news/company");
        assert!(!paths.pages_dir.join("about.php").exists());
        assert!(paths.pages_dir.join("news/company.php").exists());
        assert!(paths.pages_dir.join("keep.php").exists());
        let Some(WriteOutcome::Written { removed_old, .. }) = updated.file else {
            panic!("expected a written file");
        };
        assert_eq!(removed_old, Some(paths.pages_dir.join("about.php")));
    }

    #[test]
    fn probe_failure_blocks_the_save() {
        let (_temp, paths, mut service) = service();
        fs::create_dir_all(paths.pages_dir.join("blocked.php")).expect("blocking dir");

        let error = service
            .add_page(&page(ROOT_CONTENT_ID, "blocked", "Blocked"))
            .expect_err("must fail");
        assert!(matches!(error, SaveError::NotWritable { .. }));
        let stored = find_content_by_url(service.connection(), "/blocked", &ContentKind::Page)
            .expect("lookup");
        assert!(stored.is_none());
    }

    #[test]
    fn unresolvable_parent_blocks_the_save() {
        let (_temp, _paths, mut service) = service();
        let error = service
            .add_page(&page(999, "orphan", "Orphan"))
            .expect_err("must fail");
        assert!(matches!(error, SaveError::Unresolvable { parent_id: 999 }));
    }

    #[test]
    fn page_cannot_be_saved_under_another_page() {
        let (_temp, paths, mut service) = service();
        let about = service
            .add_page(&page(ROOT_CONTENT_ID, "about", "About"))
            .expect("add");
        let about_id = about.entity.content.id;

        let error = service
            .add_page(&page(about_id, "child", "Child"))
            .expect_err("page parent must be rejected");
        assert!(matches!(error, SaveError::Unresolvable { parent_id } if parent_id == about_id));
        assert!(!paths.pages_dir.join("about").exists());
        let stored = find_content_by_url(service.connection(), "/about/child", &ContentKind::Page)
            .expect("lookup");
        assert!(stored.is_none());

        let news = folder(&service, "news");
        let saved = service
            .add_page(&page(news.id, "item", "Item"))
            .expect("add under folder");
        let mut moved = PageInput::from(&saved.entity);
        moved.parent_id = about_id;
        moved.site_id = None;
        assert!(matches!(
            service.update_page(saved.entity.content.id, &moved),
            Err(SaveError::Unresolvable { .. })
        ));
        assert!(matches!(
            service.copy_page(saved.entity.content.id, Some(about_id), None),
            Err(SaveError::Unresolvable { .. })
        ));
        assert!(paths.pages_dir.join("news/item.php").exists());
    }

    #[test]
    fn delete_keeps_going_when_file_cannot_be_removed() {
        let (_temp, paths, mut service) = service();
        let saved = service
            .add_page(&page(ROOT_CONTENT_ID, "about", "About"))
            .expect("add");
        fs::remove_file(paths.pages_dir.join("about.php")).expect("remove file");
        fs::create_dir_all(paths.pages_dir.join("about.php/inner")).expect("blocking dir");

        let deleted = service
            .delete_page(saved.entity.content.id)
            .expect("rows are deleted even if the file is stuck");
        assert!(matches!(deleted.removed_file, RemoveOutcome::Failed { .. }));
        assert!(service.page(saved.entity.content.id).expect("load").is_none());
    }

    #[test]
    fn failed_commit_discards_probe_file() {
        let (_temp, paths, mut service) = service();
        service
            .add_page(&page(ROOT_CONTENT_ID, "about", "About"))
            .expect("add");
        service
            .connection()
            .execute_batch(
                "CREATE TRIGGER reject_pages BEFORE INSERT ON pages
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .expect("trigger");

        let error = service
            .add_page(&page(ROOT_CONTENT_ID, "contact", "Contact"))
            .expect_err("must fail");
        assert!(matches!(error, SaveError::Store(_)));
        assert!(!paths.pages_dir.join("contact.php").exists());
        assert!(paths.pages_dir.join("about.php").exists());
    }

    #[test]
    fn validation_errors_are_returned() {
        let (_temp, _paths, mut service) = service();
        let mut input = page(ROOT_CONTENT_ID, "about", "About");
        input.contents = "<script>alert(1)</script>".to_string();
        let Err(SaveError::Validation(errors)) = service.add_page(&input) else {
            panic!("expected validation errors");
        };
        assert!(errors.has("contents"));
    }

    #[test]
    fn disabled_file_save_skips_probe_and_write() {
        let (_temp, paths, mut service) = service();
        service.set_file_save(false);
        let saved = service
            .add_page(&page(ROOT_CONTENT_ID, "quiet", "Quiet"))
            .expect("add");
        assert!(saved.file.is_none());
        assert!(!paths.pages_dir.join("quiet.php").exists());
    }

    #[test]
    fn delete_removes_rows_and_file() {
        let (_temp, paths, mut service) = service();
        let saved = service
            .add_page(&page(ROOT_CONTENT_ID, "about", "About"))
            .expect("add");
        let deleted = service
            .delete_page(saved.entity.content.id)
            .expect("delete");
        assert_eq!(
            deleted.removed_file,
            RemoveOutcome::Removed {
                path: paths.pages_dir.join("about.php")
            }
        );
        assert!(service.page(saved.entity.content.id).expect("load").is_none());
        assert!(matches!(
            service.delete_page(saved.entity.content.id),
            Err(SaveError::NotFound { .. })
        ));
    }

    #[test]
    fn copy_suffixes_name_and_starts_unpublished() {
        let (_temp, paths, mut service) = service();
        let saved = service
            .add_page(&page(ROOT_CONTENT_ID, "about", "About"))
            .expect("add");
        let first = service
            .copy_page(saved.entity.content.id, None, Some("About copy"))
            .expect("copy");
        let second = service
            .copy_page(saved.entity.content.id, None, None)
            .expect("copy again");

        assert_eq!(first.entity.content.name, "about_2");
        assert_eq!(first.entity.content.title, "About copy");
        assert!(!first.entity.content.status);
        assert_eq!(second.entity.content.name, "about_3");
        assert!(paths.pages_dir.join("about_2.php").exists());
        assert_eq!(first.entity.page.contents, "<p>About</p>");
    }

    #[test]
    fn write_all_reports_each_page() {
        let (_temp, paths, mut service) = service();
        service.set_file_save(false);
        service
            .add_page(&page(ROOT_CONTENT_ID, "about", "About"))
            .expect("add");
        service
            .add_page(&page(ROOT_CONTENT_ID, "contact", "Contact"))
            .expect("add");
        fs::create_dir_all(paths.pages_dir.join("contact.php")).expect("blocking dir");

        let report = service.write_all_page_templates().expect("export");
        assert_eq!(report.total, 2);
        assert_eq!(report.written, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].url, "/contact");
        assert!(!report.success);
    }

    #[test]
    fn import_reads_files_without_writing() {
        let (_temp, paths, mut service) = service();
        fs::create_dir_all(paths.pages_dir.join("news")).expect("dirs");
        fs::write(
            paths.pages_dir.join("news/index.php"),
            "<?php $this->BcBaser->setTitle('Latest News') ?>\n<p>news</p>",
        )
        .expect("write");

        let report = service.import_page_files().expect("import");
        assert_eq!(report.all, 1);
        assert_eq!(report.insert, 1);
        assert!(service.file_save());
        let content = fs::read_to_string(paths.pages_dir.join("news/index.php")).expect("read");
        assert!(!content.contains("BaserPageTagBegin"));
        assert!(service.is_page_url("/news/").expect("lookup"));
    }

    #[test]
    fn find_by_url_respects_patterns_and_publish_state() {
        let (_temp, _paths, mut service) = service();
        let news = folder(&service, "news");
        service
            .add_page(&page(news.id, "index", "News"))
            .expect("add");
        let mut draft = page(ROOT_CONTENT_ID, "draft", "Draft");
        draft.status = false;
        service.add_page(&draft).expect("add draft");

        let by_folder = service.find_by_url("/news/", false).expect("find");
        assert_eq!(
            by_folder.map(|entity| entity.content.url).as_deref(),
            Some("/news/index")
        );
        assert!(service.find_by_url("news/index.html", false).expect("find").is_some());
        assert!(service.find_by_url("/draft", false).expect("find").is_some());
        assert!(service.find_by_url("/draft", true).expect("find").is_none());
        assert!(service.find_by_url("/missing", false).expect("find").is_none());
    }

    #[test]
    fn inactive_site_pages_are_not_found() {
        let (_temp, _paths, mut service) = service();
        let (site, root) = insert_site(
            service.connection_mut(),
            &NewSite {
                name: "smartphone".to_string(),
                alias: Some("s".to_string()),
                title: "Smartphone".to_string(),
                ..NewSite::default()
            },
        )
        .expect("site");
        service.add_page(&page(root.id, "about", "About")).expect("add");
        assert!(service.find_by_url("/s/about", false).expect("find").is_some());

        service
            .connection()
            .execute("UPDATE sites SET status = 0 WHERE id = ?1", [site.id])
            .expect("disable site");
        assert!(service.find_by_url("/s/about", false).expect("find").is_none());
    }

    #[test]
    fn is_page_url_handles_index_and_html() {
        let (_temp, _paths, mut service) = service();
        service
            .add_page(&page(ROOT_CONTENT_ID, "index", "Home"))
            .expect("add");
        service
            .add_page(&page(ROOT_CONTENT_ID, "about", "About"))
            .expect("add");

        assert!(service.is_page_url("/").expect("lookup"));
        assert!(service.is_page_url("/about.html").expect("lookup"));
        assert!(service.is_page_url("about").expect("lookup"));
        assert!(!service.is_page_url("/contact").expect("lookup"));

        service
            .add_page(&page(ROOT_CONTENT_ID, "contact", "Contact"))
            .expect("add");
        assert!(service.is_page_url("/contact").expect("lookup"));
    }

    #[test]
    fn template_list_merges_default_and_site_themes() {
        let (_temp, paths, mut service) = service();
        let template_dir = |theme: &str| {
            paths
                .themes_dir
                .join(theme)
                .join("templates/Pages/templates")
        };
        fs::create_dir_all(template_dir("bc-front")).expect("default theme");
        fs::create_dir_all(template_dir("mobile")).expect("site theme");
        fs::write(template_dir("bc-front").join("default.php"), "").expect("write");
        fs::write(template_dir("bc-front").join("wide.php"), "").expect("write");
        fs::write(template_dir("mobile").join("default.php"), "").expect("write");
        fs::write(template_dir("mobile").join("compact.php"), "").expect("write");
        fs::write(template_dir("mobile").join("notes.txt"), "").expect("write");

        let (_site, root) = insert_site(
            service.connection_mut(),
            &NewSite {
                name: "smartphone".to_string(),
                title: "Smartphone".to_string(),
                theme: Some("mobile".to_string()),
                ..NewSite::default()
            },
        )
        .expect("site");
        let saved = service.add_page(&page(root.id, "about", "About")).expect("add");

        let names = service
            .page_template_list(saved.entity.content.id)
            .expect("list");
        assert_eq!(names, vec!["default", "wide", "compact"]);
        let main_only = service.page_template_list(ROOT_CONTENT_ID).expect("list");
        assert_eq!(main_only, vec!["default", "wide"]);
    }

    #[test]
    fn url_patterns_cover_index_and_html() {
        assert_eq!(url_patterns("/news/"), vec!["/news/", "/news/index"]);
        assert_eq!(url_patterns("about.html"), vec!["/about.html", "/about"]);
    }
}
