use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use pagesync_core::config::load_config;
use pagesync_core::content::{
    NewContent, NewSite, ROOT_CONTENT_ID, insert_content, insert_site, list_sites, load_content,
};
use pagesync_core::error::SaveError;
use pagesync_core::migrate::{current_version, open_migrated, pending_migration_count, run_migrations};
use pagesync_core::page::PageEntity;
use pagesync_core::page_file::{
    RemoveOutcome, WriteOutcome, content_folder_path, locate_page_file,
};
use pagesync_core::runtime::{
    InitOptions, MIGRATIONS_POLICY_MESSAGE, PathOverrides, ResolutionContext, ResolvedPaths,
    ensure_runtime_ready, init_layout, inspect_runtime, resolve_paths,
};
use pagesync_core::service::{PageInput, PageService, SavedPage};
use pagesync_core::store::count_query;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "pagesync",
    version,
    about = "Keep page template files and the content tree in agreement"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, global = true, help = "Print reports as JSON")]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
    json: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
            json: cli.json,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    Status,
    Db(DbArgs),
    Site(SiteArgs),
    Folder(FolderArgs),
    Page(PageArgs),
    Pages(PagesArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Create themes/ during initialization")]
    themes: bool,
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
    #[arg(long, help = "Skip writing .pagesync/config.toml")]
    no_config: bool,
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Migrate,
    Stats,
}

#[derive(Debug, Args)]
struct SiteArgs {
    #[command(subcommand)]
    command: SiteSubcommand,
}

#[derive(Debug, Subcommand)]
enum SiteSubcommand {
    Add(SiteAddArgs),
    List,
}

#[derive(Debug, Args)]
struct SiteAddArgs {
    name: String,
    #[arg(long, help = "URL prefix segment (defaults to the name)")]
    alias: Option<String>,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    theme: Option<String>,
    #[arg(long)]
    use_subdomain: bool,
}

#[derive(Debug, Args)]
struct FolderArgs {
    #[command(subcommand)]
    command: FolderSubcommand,
}

#[derive(Debug, Subcommand)]
enum FolderSubcommand {
    Add(FolderAddArgs),
}

#[derive(Debug, Args)]
struct FolderAddArgs {
    name: String,
    #[arg(long, default_value_t = ROOT_CONTENT_ID, help = "Parent folder content id")]
    parent: i64,
    #[arg(long)]
    title: Option<String>,
}

#[derive(Debug, Args)]
struct PageArgs {
    #[command(subcommand)]
    command: PageSubcommand,
}

#[derive(Debug, Subcommand)]
enum PageSubcommand {
    Add(PageAddArgs),
    Edit(PageEditArgs),
    Delete { id: i64 },
    Copy(PageCopyArgs),
    Show { id: i64 },
    Path { id: i64 },
}

#[derive(Debug, Args)]
struct PageBodyArgs {
    #[arg(long)]
    description: Option<String>,
    #[arg(long, conflicts_with = "contents_file")]
    contents: Option<String>,
    #[arg(long, value_name = "PATH", help = "Read the page body from a file")]
    contents_file: Option<PathBuf>,
    #[arg(long)]
    draft: Option<String>,
    #[arg(long, help = "Raw template code placed inside the marker block")]
    code: Option<String>,
    #[arg(long, value_name = "NAME")]
    page_template: Option<String>,
    #[arg(long, value_name = "UNIX", help = "Publish window start (unix seconds)")]
    publish_begin: Option<i64>,
    #[arg(long, value_name = "UNIX", help = "Publish window end (unix seconds)")]
    publish_end: Option<i64>,
    #[arg(long, help = "Save records without writing the template file")]
    no_file: bool,
}

#[derive(Debug, Args)]
struct PageAddArgs {
    name: String,
    #[arg(long, default_value_t = ROOT_CONTENT_ID, help = "Parent folder content id")]
    parent: i64,
    #[arg(long)]
    title: Option<String>,
    #[arg(long, help = "Create the page unpublished")]
    unpublished: bool,
    #[command(flatten)]
    body: PageBodyArgs,
}

#[derive(Debug, Args)]
struct PageEditArgs {
    id: i64,
    #[arg(long)]
    name: Option<String>,
    #[arg(long, help = "Move the page under another folder")]
    parent: Option<i64>,
    #[arg(long)]
    title: Option<String>,
    #[arg(long, conflicts_with = "unpublish")]
    publish: bool,
    #[arg(long)]
    unpublish: bool,
    #[command(flatten)]
    body: PageBodyArgs,
}

#[derive(Debug, Args)]
struct PageCopyArgs {
    id: i64,
    #[arg(long, help = "Target folder content id (defaults to the source folder)")]
    parent: Option<i64>,
    #[arg(long)]
    title: Option<String>,
}

#[derive(Debug, Args)]
struct PagesArgs {
    #[command(subcommand)]
    command: PagesSubcommand,
}

#[derive(Debug, Subcommand)]
enum PagesSubcommand {
    /// Render every page into its template file
    Write,
    /// Import template files under View/Pages into the content tree
    Import,
    /// Compare page records with the template files on disk
    Diff,
    /// List page templates available to a content
    Templates {
        #[arg(default_value_t = ROOT_CONTENT_ID)]
        content_id: i64,
    },
    /// Look up a page by URL
    Find {
        url: String,
        #[arg(long, help = "Only match published pages")]
        published: bool,
    },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Migrate => run_db_migrate(&runtime),
            DbSubcommand::Stats => run_db_stats(&runtime),
        },
        Some(Commands::Site(SiteArgs { command })) => match command {
            SiteSubcommand::Add(args) => run_site_add(&runtime, args),
            SiteSubcommand::List => run_site_list(&runtime),
        },
        Some(Commands::Folder(FolderArgs { command })) => match command {
            FolderSubcommand::Add(args) => run_folder_add(&runtime, args),
        },
        Some(Commands::Page(PageArgs { command })) => match command {
            PageSubcommand::Add(args) => run_page_add(&runtime, args),
            PageSubcommand::Edit(args) => run_page_edit(&runtime, args),
            PageSubcommand::Delete { id } => run_page_delete(&runtime, id),
            PageSubcommand::Copy(args) => run_page_copy(&runtime, args),
            PageSubcommand::Show { id } => run_page_show(&runtime, id),
            PageSubcommand::Path { id } => run_page_path(&runtime, id),
        },
        Some(Commands::Pages(PagesArgs { command })) => match command {
            PagesSubcommand::Write => run_pages_write(&runtime),
            PagesSubcommand::Import => run_pages_import(&runtime),
            PagesSubcommand::Diff => run_pages_diff(&runtime),
            PagesSubcommand::Templates { content_id } => run_pages_templates(&runtime, content_id),
            PagesSubcommand::Find { url, published } => run_pages_find(&runtime, &url, published),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_env("PAGESYNC_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            include_themes: args.themes,
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;
    let migrations = run_migrations(&paths)?;

    println!("Initialized pagesync runtime layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("pages_dir: {}", normalize_path(&paths.pages_dir));
    println!("themes_dir: {}", normalize_path(&paths.themes_dir));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("data_dir: {}", normalize_path(&paths.data_dir));
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("migrations.applied: {}", migrations.applied.len());
    println!("schema_version: {}", migrations.current_version);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    let pending = if status.db_exists {
        Some(pending_migration_count(&paths)?)
    } else {
        None
    };

    println!("runtime status");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!(
        "project_root_exists: {}",
        format_flag(status.project_root_exists)
    );
    println!("pages_dir_exists: {}", format_flag(status.pages_dir_exists));
    println!("themes_dir_exists: {}", format_flag(status.themes_dir_exists));
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("data_dir_exists: {}", format_flag(status.data_dir_exists));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("config_exists: {}", format_flag(status.config_exists));
    println!(
        "pending_migrations: {}",
        pending
            .map(|count| count.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    println!("policy: {MIGRATIONS_POLICY_MESSAGE}");
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_migrate(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = run_migrations(&paths)?;

    println!("db migrate");
    println!("db_path: {}", normalize_path(&paths.db_path));
    if report.applied.is_empty() {
        println!("applied: <none>");
    } else {
        for migration in &report.applied {
            println!("applied: v{:03}_{}", migration.version, migration.name);
        }
    }
    println!("schema_version: {}", report.current_version);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("db stats");
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    if status.db_exists {
        let connection = open_migrated(&paths)?;
        println!("schema_version: {}", current_version(&connection)?);
        println!(
            "sites: {}",
            count_query(&connection, "SELECT COUNT(*) FROM sites")?
        );
        println!(
            "contents: {}",
            count_query(&connection, "SELECT COUNT(*) FROM contents")?
        );
        println!(
            "folders: {}",
            count_query(
                &connection,
                "SELECT COUNT(*) FROM contents WHERE type = 'ContentFolder'"
            )?
        );
        println!(
            "pages: {}",
            count_query(&connection, "SELECT COUNT(*) FROM pages")?
        );
    }
    println!("policy: {MIGRATIONS_POLICY_MESSAGE}");
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_site_add(runtime: &RuntimeOptions, args: SiteAddArgs) -> Result<()> {
    let (paths, mut service) = open_service(runtime)?;
    let title = args.title.clone().unwrap_or_else(|| args.name.clone());
    let (site, root) = insert_site(
        service.connection_mut(),
        &NewSite {
            name: args.name,
            alias: args.alias,
            title,
            theme: args.theme,
            use_subdomain: args.use_subdomain,
            domain_type: 0,
        },
    )?;

    if runtime.json {
        return print_json(&site);
    }
    println!("site add");
    println!("site.id: {}", site.id);
    println!("site.name: {}", site.name);
    println!("site.alias: {}", site.alias);
    println!("site.theme: {}", site.theme.as_deref().unwrap_or("<default>"));
    println!("root.id: {}", root.id);
    println!("root.url: {}", root.url);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_site_list(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, service) = open_service(runtime)?;
    let sites = list_sites(service.connection())?;

    if runtime.json {
        return print_json(&sites);
    }
    println!("site list");
    println!("sites.count: {}", sites.len());
    for site in &sites {
        println!(
            "site: {} name={} alias={} status={} theme={}",
            site.id,
            if site.name.is_empty() { "<main>" } else { site.name.as_str() },
            if site.alias.is_empty() { "<none>" } else { site.alias.as_str() },
            format_flag(site.status),
            site.theme.as_deref().unwrap_or("<default>")
        );
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_folder_add(runtime: &RuntimeOptions, args: FolderAddArgs) -> Result<()> {
    let (paths, service) = open_service(runtime)?;
    let Some(parent) = load_content(service.connection(), args.parent)? else {
        bail!("parent folder {} does not exist", args.parent);
    };
    if !parent.kind.is_folder() {
        bail!("content {} is not a folder", args.parent);
    }
    let title = args.title.clone().unwrap_or_else(|| args.name.clone());
    let folder = insert_content(
        service.connection(),
        &NewContent::folder(parent.id, parent.site_id, &args.name, &title),
    )?;
    let dir = content_folder_path(service.connection(), service.layout(), folder.id)?;

    if runtime.json {
        return print_json(&folder);
    }
    println!("folder add");
    println!("folder.id: {}", folder.id);
    println!("folder.url: {}", folder.url);
    println!("folder.title: {}", folder.title);
    println!(
        "folder.path: {}",
        dir.as_deref()
            .map(normalize_path)
            .unwrap_or_else(|| "<unresolvable>".to_string())
    );
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_page_add(runtime: &RuntimeOptions, args: PageAddArgs) -> Result<()> {
    let (paths, mut service) = open_service(runtime)?;
    service.set_file_save(!args.body.no_file);

    let mut input = PageInput::new(args.parent);
    input.title = args.title.clone().unwrap_or_else(|| args.name.clone());
    input.name = args.name;
    input.status = !args.unpublished;
    apply_body_args(&mut input, &args.body)?;

    let saved = check_save(service.add_page(&input))?;
    print_saved(runtime, &paths, "page add", &saved)
}

fn run_page_edit(runtime: &RuntimeOptions, args: PageEditArgs) -> Result<()> {
    let (paths, mut service) = open_service(runtime)?;
    service.set_file_save(!args.body.no_file);
    let Some(existing) = service.page(args.id)? else {
        bail!("page {} not found", args.id);
    };

    let mut input = PageInput::from(&existing);
    if let Some(name) = args.name {
        input.name = name;
    }
    if let Some(parent) = args.parent {
        input.parent_id = parent;
        input.site_id = None;
    }
    if let Some(title) = args.title {
        input.title = title;
    }
    if args.publish {
        input.status = true;
    }
    if args.unpublish {
        input.status = false;
    }
    apply_body_args(&mut input, &args.body)?;

    let saved = check_save(service.update_page(args.id, &input))?;
    print_saved(runtime, &paths, "page edit", &saved)
}

fn run_page_delete(runtime: &RuntimeOptions, id: i64) -> Result<()> {
    let (paths, mut service) = open_service(runtime)?;
    let deleted = service.delete_page(id)?;

    if runtime.json {
        return print_json(&deleted);
    }
    println!("page delete");
    println!("page.id: {}", deleted.entity.content.id);
    println!("page.url: {}", deleted.entity.content.url);
    match &deleted.removed_file {
        RemoveOutcome::Removed { path } => println!("removed_file: {}", normalize_path(path)),
        RemoveOutcome::Absent => println!("removed_file: <none>"),
        RemoveOutcome::Failed { path, message } => {
            println!("removed_file: failed");
            println!("removed_file.path: {}", normalize_path(path));
            println!("removed_file.error: {message}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_page_copy(runtime: &RuntimeOptions, args: PageCopyArgs) -> Result<()> {
    let (paths, mut service) = open_service(runtime)?;
    let saved = check_save(service.copy_page(args.id, args.parent, args.title.as_deref()))?;
    print_saved(runtime, &paths, "page copy", &saved)
}

fn run_page_show(runtime: &RuntimeOptions, id: i64) -> Result<()> {
    let (paths, service) = open_service(runtime)?;
    let Some(entity) = service.page(id)? else {
        bail!("page {id} not found");
    };

    if runtime.json {
        return print_json(&entity);
    }
    println!("page show");
    print_entity(&entity);
    println!("page.contents_bytes: {}", entity.page.contents.len());
    println!("page.draft_bytes: {}", entity.page.draft.len());
    println!("page.code_bytes: {}", entity.page.code.len());
    println!(
        "page.template: {}",
        entity.page.page_template.as_deref().unwrap_or("<default>")
    );
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_page_path(runtime: &RuntimeOptions, id: i64) -> Result<()> {
    let (paths, service) = open_service(runtime)?;
    let Some(entity) = service.page(id)? else {
        bail!("page {id} not found");
    };
    let path = match entity.content.parent_id {
        Some(parent_id) => locate_page_file(
            service.connection(),
            service.layout(),
            parent_id,
            entity.content.site_id,
            &entity.content.name,
        )?,
        None => None,
    };

    println!("page path");
    println!("page.url: {}", entity.content.url);
    match path {
        Some(path) => {
            println!("path: {}", normalize_path(&path));
            println!("exists: {}", format_flag(path.exists()));
        }
        None => println!("path: <unresolvable>"),
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_pages_write(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, mut service) = open_service(runtime)?;
    let report = service.write_all_page_templates()?;

    if runtime.json {
        print_json(&report)?;
    } else {
        println!("pages write");
        println!("total: {}", report.total);
        println!("written: {}", report.written);
        println!("failed: {}", report.failed.len());
        for failure in &report.failed {
            println!("failed.page: {} ({})", failure.url, failure.message);
        }
        println!("success: {}", format_flag(report.success));
        print_diagnostics(runtime, &paths);
    }
    if !report.success {
        bail!(
            "{} of {} page templates could not be written",
            report.failed.len(),
            report.total
        );
    }
    Ok(())
}

fn run_pages_import(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, mut service) = open_service(runtime)?;
    let report = service.import_page_files()?;

    if runtime.json {
        return print_json(&report);
    }
    println!("pages import");
    println!("pages_dir: {}", normalize_path(&paths.pages_dir));
    println!("all: {}", report.all);
    println!("insert: {}", report.insert);
    println!("update: {}", report.update);
    println!("insert_folder: {}", report.insert_folder);
    println!("update_folder: {}", report.update_folder);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_pages_diff(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, service) = open_service(runtime)?;
    let report = service.diff_page_files()?;

    if runtime.json {
        return print_json(&report);
    }
    println!("pages diff");
    println!("pages: {}", report.pages);
    println!("in_sync: {}", report.in_sync);
    println!("missing: {}", report.missing);
    println!("modified: {}", report.modified);
    println!("untracked: {}", report.untracked);
    println!("unresolvable: {}", report.unresolvable);
    if report.changes.is_empty() {
        println!("changes: <none>");
    }
    for change in &report.changes {
        println!(
            "change: {:?} {}{}",
            change.change_type,
            change.relative_path,
            change
                .url
                .as_deref()
                .map(|url| format!(" ({url})"))
                .unwrap_or_default()
        );
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_pages_templates(runtime: &RuntimeOptions, content_id: i64) -> Result<()> {
    let (paths, service) = open_service(runtime)?;
    let names = service.page_template_list(content_id)?;

    if runtime.json {
        return print_json(&names);
    }
    println!("pages templates");
    println!("content_id: {content_id}");
    println!("default_theme: {}", service.config().default_theme());
    println!("templates.count: {}", names.len());
    if names.is_empty() {
        println!("templates: <none>");
    }
    for name in &names {
        println!("template: {name}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_pages_find(runtime: &RuntimeOptions, url: &str, published: bool) -> Result<()> {
    let (paths, mut service) = open_service(runtime)?;
    let found = service.find_by_url(url, published)?;
    let is_page_url = service.is_page_url(url)?;

    if runtime.json {
        return print_json(&found);
    }
    println!("pages find");
    println!("url: {url}");
    println!("is_page_url: {}", format_flag(is_page_url));
    match &found {
        Some(entity) => print_entity(entity),
        None => println!("page: <not found>"),
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn apply_body_args(input: &mut PageInput, body: &PageBodyArgs) -> Result<()> {
    if let Some(description) = &body.description {
        input.description = description.clone();
    }
    if let Some(contents) = &body.contents {
        input.contents = contents.clone();
    }
    if let Some(path) = &body.contents_file {
        input.contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", normalize_path(path)))?;
    }
    if let Some(draft) = &body.draft {
        input.draft = draft.clone();
    }
    if let Some(code) = &body.code {
        input.code = code.clone();
    }
    if let Some(template) = &body.page_template {
        input.page_template = Some(template.clone());
    }
    if body.publish_begin.is_some() {
        input.publish_begin = body.publish_begin;
    }
    if body.publish_end.is_some() {
        input.publish_end = body.publish_end;
    }
    Ok(())
}

fn check_save(result: Result<SavedPage, SaveError>) -> Result<SavedPage> {
    match result {
        Ok(saved) => Ok(saved),
        Err(SaveError::Validation(errors)) => {
            for (field, messages) in errors.iter() {
                for message in messages {
                    println!("validation.{field}: {message}");
                }
            }
            bail!("page was not saved: validation failed");
        }
        Err(error) => Err(error.into()),
    }
}

fn print_saved(
    runtime: &RuntimeOptions,
    paths: &ResolvedPaths,
    heading: &str,
    saved: &SavedPage,
) -> Result<()> {
    if runtime.json {
        return print_json(saved);
    }
    println!("{heading}");
    print_entity(&saved.entity);
    match &saved.file {
        None => println!("file: skipped"),
        Some(WriteOutcome::Written { path, removed_old }) => {
            println!("file: {}", normalize_path(path));
            if let Some(old) = removed_old {
                println!("file.removed_old: {}", normalize_path(old));
            }
        }
        Some(WriteOutcome::Failed { message }) => {
            println!("file: failed");
            println!("file.error: {message}");
        }
    }
    print_diagnostics(runtime, paths);
    Ok(())
}

fn print_entity(entity: &PageEntity) {
    println!("page.id: {}", entity.content.id);
    println!("page.url: {}", entity.content.url);
    println!("page.name: {}", entity.content.name);
    println!("page.title: {}", entity.content.title);
    println!("page.site_id: {}", entity.content.site_id);
    println!("page.published: {}", format_flag(entity.content.status));
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn open_service(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, PageService)> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    ensure_runtime_ready(&paths, &status)?;
    let config = load_config(&paths.config_path)?;
    let service = PageService::open(&paths, config)?;
    Ok((paths, service))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists()
        && let Err(error) = dotenvy::from_path_override(&project_env)
    {
        tracing::warn!(path = %normalize_path(&project_env), "failed to load project .env: {error}");
    }

    resolve_paths(&context, &overrides)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
