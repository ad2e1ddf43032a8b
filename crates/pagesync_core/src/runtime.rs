use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

pub const MIGRATIONS_POLICY_MESSAGE: &str =
    "Run `pagesync db migrate` to apply pending schema migrations.";

pub const STATE_DIR_NAME: &str = ".pagesync";
pub const DB_FILENAME: &str = "pagesync.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

/// Every location the synchronizer reads or writes, resolved once per
/// invocation.
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub view_dir: PathBuf,
    pub pages_dir: PathBuf,
    pub themes_dir: PathBuf,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub data_source: ValueSource,
    pub config_source: ValueSource,
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub pages_dir_exists: bool,
    pub themes_dir_exists: bool,
    pub state_dir_exists: bool,
    pub data_dir_exists: bool,
    pub db_exists: bool,
    pub db_size_bytes: Option<u64>,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

impl ResolvedPaths {
    /// Default layout rooted at `project_root`.
    pub fn for_project_root(project_root: &Path) -> Self {
        let state_dir = project_root.join(STATE_DIR_NAME);
        let data_dir = state_dir.join("data");
        let view_dir = project_root.join("View");
        Self {
            project_root: project_root.to_path_buf(),
            pages_dir: view_dir.join("Pages"),
            view_dir,
            themes_dir: project_root.join("themes"),
            db_path: data_dir.join(DB_FILENAME),
            config_path: state_dir.join("config.toml"),
            state_dir,
            data_dir,
            root_source: ValueSource::Flag,
            data_source: ValueSource::Default,
            config_source: ValueSource::Default,
        }
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nstate_dir={}\npages_dir={}\nthemes_dir={}\ndata_dir={} ({})\ndb_path={}\nconfig_path={} ({})\npolicy={}",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.pages_dir),
            normalize_for_display(&self.themes_dir),
            normalize_for_display(&self.data_dir),
            self.data_source.as_str(),
            normalize_for_display(&self.db_path),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            MIGRATIONS_POLICY_MESSAGE
        )
    }
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let project_root_exists = paths.project_root.exists();
    let pages_dir_exists = paths.pages_dir.exists();
    let themes_dir_exists = paths.themes_dir.exists();
    let state_dir_exists = paths.state_dir.exists();
    let data_dir_exists = paths.data_dir.exists();
    let config_exists = paths.config_path.exists();
    let db_exists = paths.db_path.exists();
    let db_size_bytes = if db_exists {
        let metadata = fs::metadata(&paths.db_path)
            .with_context(|| format!("failed to inspect {}", paths.db_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };

    let mut warnings = Vec::new();
    if !themes_dir_exists {
        warnings.push("themes/ is missing; page template lists will be empty".to_string());
    }
    if !pages_dir_exists {
        warnings.push("View/Pages/ is missing; run `pagesync init` before sync commands".to_string());
    }
    if !state_dir_exists {
        warnings.push(".pagesync/ is missing; run `pagesync init` before sync commands".to_string());
    }

    Ok(RuntimeStatus {
        project_root_exists,
        pages_dir_exists,
        themes_dir_exists,
        state_dir_exists,
        data_dir_exists,
        db_exists,
        db_size_bytes,
        config_exists,
        warnings,
    })
}

pub fn ensure_runtime_ready(paths: &ResolvedPaths, status: &RuntimeStatus) -> Result<()> {
    if !status.pages_dir_exists || !status.state_dir_exists {
        bail!(
            "Runtime layout is not initialized.\nMissing required paths:\n  - {}\n  - {}\nRun: pagesync init --project-root {}",
            if status.pages_dir_exists {
                "View/Pages/ (ok)"
            } else {
                "View/Pages/ (missing)"
            },
            if status.state_dir_exists {
                ".pagesync/ (ok)"
            } else {
                ".pagesync/ (missing)"
            },
            normalize_for_display(&paths.project_root)
        );
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub include_themes: bool,
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            include_themes: false,
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env)
        .context("failed to resolve project root")?;
    let mut paths = ResolvedPaths::for_project_root(&project_root);
    paths.root_source = root_source;

    if let Some(path) = overrides.data_dir.as_deref() {
        paths.data_dir = absolutize(path, &project_root);
        paths.data_source = ValueSource::Flag;
    } else if let Some(value) = lookup_env("PAGESYNC_DATA_DIR") {
        paths.data_dir = absolutize(Path::new(value.trim()), &project_root);
        paths.data_source = ValueSource::Env;
    }
    paths.db_path = paths.data_dir.join(DB_FILENAME);

    if let Some(path) = overrides.config.as_deref() {
        paths.config_path = absolutize(path, &project_root);
        paths.config_source = ValueSource::Flag;
    } else if let Some(value) = lookup_env("PAGESYNC_CONFIG") {
        paths.config_path = absolutize(Path::new(value.trim()), &project_root);
        paths.config_source = ValueSource::Env;
    }

    Ok(paths)
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();

    let mut required_dirs = vec![
        paths.pages_dir.clone(),
        paths.state_dir.clone(),
        paths.data_dir.clone(),
    ];
    if options.include_themes {
        required_dirs.push(paths.themes_dir.clone());
    }

    for dir in &required_dirs {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config = if options.materialize_config {
        write_text_file(&paths.config_path, &render_materialized_config(), options.force)?
    } else {
        false
    };

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

pub fn render_materialized_config() -> String {
    format!(
        "# pagesync configuration (materialized by `pagesync init`)\n# {MIGRATIONS_POLICY_MESSAGE}\n\n[pages]\ntemplate_ext = \".php\"\nfile_mode = \"0666\"\ndir_mode = \"0777\"\nmax_body_bytes = 64000\nvalidate_syntax = false\nphp_binary = \"php\"\nallow_scripts = false\n\n[themes]\ndefault = \"bc-front\"\n\n# Titles applied to folders created by `pagesync pages import`:\n# [folder_titles.news]\n# title = \"News\"\n# [folder_titles.news.children.archive]\n# title = \"News archive\"\n"
    )
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> Result<(PathBuf, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return Ok((absolutize(path, &context.cwd), ValueSource::Flag));
    }

    if let Some(value) = lookup_env("PAGESYNC_PROJECT_ROOT") {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            bail!("PAGESYNC_PROJECT_ROOT is set but empty");
        }
        return Ok((absolutize(Path::new(trimmed), &context.cwd), ValueSource::Env));
    }

    let root = detect_project_root_heuristic(&context.cwd, context.executable_dir.as_deref());
    Ok((root, ValueSource::Heuristic))
}

fn detect_project_root_heuristic(cwd: &Path, executable_dir: Option<&Path>) -> PathBuf {
    let mut seen = HashSet::new();
    for candidate in candidate_roots(cwd, executable_dir) {
        let key = normalize_for_display(&candidate);
        if !seen.insert(key) {
            continue;
        }
        if candidate.join("View").join("Pages").exists() || candidate.join(STATE_DIR_NAME).exists()
        {
            return candidate;
        }
    }
    cwd.to_path_buf()
}

fn candidate_roots(cwd: &Path, executable_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = cwd.ancestors().map(Path::to_path_buf).collect();
    if let Some(exe_dir) = executable_dir {
        out.extend(exe_dir.ancestors().map(Path::to_path_buf));
    }
    out
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::{
        InitOptions, PathOverrides, ResolutionContext, ValueSource, ensure_runtime_ready,
        init_layout, inspect_runtime, resolve_paths_with_lookup,
    };

    #[test]
    fn resolve_paths_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("cwd");
        let from_flag = temp.path().join("flag-root");
        fs::create_dir_all(&cwd).expect("create cwd");

        let overrides = PathOverrides {
            project_root: Some(from_flag.clone()),
            ..PathOverrides::default()
        };
        let context = ResolutionContext {
            cwd: cwd.clone(),
            executable_dir: None,
        };

        let env = HashMap::from([(
            "PAGESYNC_PROJECT_ROOT".to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.project_root, from_flag);
        assert_eq!(resolved.root_source, ValueSource::Flag);
        assert_eq!(resolved.pages_dir, from_flag.join("View").join("Pages"));
    }

    #[test]
    fn resolve_paths_uses_env_data_dir() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let context = ResolutionContext {
            cwd: root.clone(),
            executable_dir: None,
        };
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let env = HashMap::from([("PAGESYNC_DATA_DIR".to_string(), "var/db".to_string())]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.data_dir, root.join("var/db"));
        assert_eq!(resolved.data_source, ValueSource::Env);
        assert_eq!(resolved.db_path, root.join("var/db").join("pagesync.db"));
    }

    #[test]
    fn heuristic_finds_ancestor_with_pages_dir() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("site");
        let nested = root.join("View").join("Pages").join("news");
        fs::create_dir_all(&nested).expect("create nested");

        let context = ResolutionContext {
            cwd: nested,
            executable_dir: None,
        };
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve paths");
        assert_eq!(resolved.project_root, root);
        assert_eq!(resolved.root_source, ValueSource::Heuristic);
    }

    #[test]
    fn init_layout_creates_expected_dirs_and_files() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        fs::create_dir_all(&root).expect("create root");

        let context = ResolutionContext {
            cwd: root.clone(),
            executable_dir: None,
        };
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let paths = resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve");

        let report = init_layout(
            &paths,
            &InitOptions {
                include_themes: true,
                ..InitOptions::default()
            },
        )
        .expect("init");

        assert!(!report.created_dirs.is_empty());
        assert!(report.wrote_config);
        assert!(paths.pages_dir.exists());
        assert!(paths.themes_dir.exists());
        assert!(paths.state_dir.exists());
        assert!(paths.data_dir.exists());
        assert!(paths.config_path.exists());

        let config = crate::config::load_config(&paths.config_path).expect("load config");
        assert_eq!(config.template_ext(), ".php");
    }

    #[test]
    fn readiness_fails_without_init() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        fs::create_dir_all(&root).expect("create root");
        let context = ResolutionContext {
            cwd: root.clone(),
            executable_dir: None,
        };
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let paths = resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve");
        let status = inspect_runtime(&paths).expect("inspect");
        assert!(!status.warnings.is_empty());
        let err = ensure_runtime_ready(&paths, &status).expect_err("must fail");
        assert!(err.to_string().contains("Runtime layout is not initialized"));
    }
}
