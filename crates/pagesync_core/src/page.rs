use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use crate::content::{ContentKind, ContentRecord, find_child, load_content};

/// Page extension row, 1:1 with a `Page` content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageRecord {
    pub id: i64,
    pub content_id: i64,
    pub contents: String,
    pub draft: String,
    pub code: String,
    pub page_template: Option<String>,
}

/// A page's content row joined with its page row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageEntity {
    pub content: ContentRecord,
    pub page: PageRecord,
}

#[derive(Debug, Clone, Default)]
pub struct PageBody {
    pub contents: String,
    pub draft: String,
    pub code: String,
    pub page_template: Option<String>,
}

pub fn load_page_by_content(connection: &Connection, content_id: i64) -> Result<Option<PageRecord>> {
    connection
        .query_row(
            "SELECT id, content_id, contents, draft, code, page_template
             FROM pages WHERE content_id = ?1",
            [content_id],
            page_from_row,
        )
        .optional()
        .with_context(|| format!("failed to load page for content {content_id}"))
}

/// Load the page entity whose content id is `content_id`.
pub fn load_page(connection: &Connection, content_id: i64) -> Result<Option<PageEntity>> {
    let Some(content) = load_content(connection, content_id)? else {
        return Ok(None);
    };
    if content.kind != ContentKind::Page {
        return Ok(None);
    }
    let Some(page) = load_page_by_content(connection, content_id)? else {
        return Ok(None);
    };
    Ok(Some(PageEntity { content, page }))
}

pub fn find_page_by_name(
    connection: &Connection,
    parent_id: i64,
    name: &str,
) -> Result<Option<PageEntity>> {
    let Some(content) = find_child(connection, parent_id, name, Some(&ContentKind::Page))? else {
        return Ok(None);
    };
    load_page(connection, content.id)
}

pub fn list_pages(connection: &Connection) -> Result<Vec<PageEntity>> {
    let mut statement = connection
        .prepare(
            "SELECT c.id FROM contents c JOIN pages p ON p.content_id = c.id
             WHERE c.type = 'Page' ORDER BY c.url ASC, c.id ASC",
        )
        .context("failed to prepare page listing")?;
    let ids = statement
        .query_map([], |row| row.get::<_, i64>(0))
        .context("failed to run page listing")?;

    let mut out = Vec::new();
    for id in ids {
        let id = id.context("failed to decode page id")?;
        if let Some(entity) = load_page(connection, id)? {
            out.push(entity);
        }
    }
    Ok(out)
}

pub fn insert_page(connection: &Connection, content_id: i64, body: &PageBody) -> Result<PageRecord> {
    connection
        .execute(
            "INSERT INTO pages (content_id, contents, draft, code, page_template)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                content_id,
                body.contents,
                body.draft,
                body.code,
                body.page_template
            ],
        )
        .with_context(|| format!("failed to insert page for content {content_id}"))?;
    load_page_by_content(connection, content_id)?
        .ok_or_else(|| anyhow::anyhow!("page for content {content_id} vanished after insert"))
}

pub fn update_page(connection: &Connection, content_id: i64, body: &PageBody) -> Result<PageRecord> {
    let changed = connection
        .execute(
            "UPDATE pages SET contents = ?2, draft = ?3, code = ?4, page_template = ?5
             WHERE content_id = ?1",
            params![
                content_id,
                body.contents,
                body.draft,
                body.code,
                body.page_template
            ],
        )
        .with_context(|| format!("failed to update page for content {content_id}"))?;
    if changed == 0 {
        return insert_page(connection, content_id, body);
    }
    load_page_by_content(connection, content_id)?
        .ok_or_else(|| anyhow::anyhow!("page for content {content_id} vanished after update"))
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<PageRecord> {
    Ok(PageRecord {
        id: row.get(0)?,
        content_id: row.get(1)?,
        contents: row.get(2)?,
        draft: row.get(3)?,
        code: row.get(4)?,
        page_template: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{MAIN_SITE_ID, NewContent, ROOT_CONTENT_ID, insert_content};
    use crate::store::test_support::migrated_project;

    fn page_content(name: &str) -> NewContent {
        NewContent {
            kind: ContentKind::Page,
            ..NewContent::folder(ROOT_CONTENT_ID, MAIN_SITE_ID, name, "About")
        }
    }

    #[test]
    fn insert_and_find_page() {
        let (_temp, _paths, connection) = migrated_project();
        let content = insert_content(&connection, &page_content("about")).expect("content");
        insert_page(
            &connection,
            content.id,
            &PageBody {
                contents: "<p>hi</p>".to_string(),
                ..PageBody::default()
            },
        )
        .expect("page");

        let found = find_page_by_name(&connection, ROOT_CONTENT_ID, "about")
            .expect("lookup")
            .expect("page exists");
        assert_eq!(found.content.url, "/about");
        assert_eq!(found.page.contents, "<p>hi</p>");
        assert_eq!(list_pages(&connection).expect("list").len(), 1);
    }

    #[test]
    fn folders_are_not_pages() {
        let (_temp, _paths, connection) = migrated_project();
        let folder = insert_content(
            &connection,
            &NewContent::folder(ROOT_CONTENT_ID, MAIN_SITE_ID, "news", "News"),
        )
        .expect("folder");
        assert!(load_page(&connection, folder.id).expect("load").is_none());
        assert!(
            find_page_by_name(&connection, ROOT_CONTENT_ID, "news")
                .expect("lookup")
                .is_none()
        );
    }

    #[test]
    fn update_page_replaces_body() {
        let (_temp, _paths, connection) = migrated_project();
        let content = insert_content(&connection, &page_content("about")).expect("content");
        insert_page(&connection, content.id, &PageBody::default()).expect("page");
        let updated = update_page(
            &connection,
            content.id,
            &PageBody {
                contents: "new".to_string(),
                code: "<?php echo 1 ?>".to_string(),
                ..PageBody::default()
            },
        )
        .expect("update");
        assert_eq!(updated.contents, "new");
        assert_eq!(updated.code, "<?php echo 1 ?>");
    }
}
