//! Changed-line extraction from a local Git repository via `git2`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use git2::{DiffDelta, DiffHunk, DiffLine, DiffLineType, DiffOptions, ErrorCode, Repository, Tree};
use tracing::{debug, instrument, warn};

use crate::config::{BranchMode, RepoConfig};
use crate::errors::GitError;

/// Raw output of a diff provider: which lines differ from the base, per file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingDiff {
    /// Current branch, `None` when HEAD is detached or unborn.
    pub branch: Option<String>,
    pub files: BTreeMap<String, BTreeSet<u32>>,
}

/// Source of the local participant's changed lines.
pub trait DiffProvider: Send + Sync {
    fn changed_lines(&self) -> Result<WorkingDiff, GitError>;
}

/// [`DiffProvider`] backed by a repository on disk.
///
/// The repository is reopened on every call so branch switches and config
/// edits between cycles are picked up.
#[derive(Debug, Clone)]
pub struct GitDiffProvider {
    repo_path: PathBuf,
    base_branch: String,
    branch_mode: BranchMode,
    include_untracked: bool,
    ignore_paths: Vec<String>,
}

impl GitDiffProvider {
    pub fn new(repo_path: impl Into<PathBuf>, base_branch: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            base_branch: base_branch.into(),
            branch_mode: BranchMode::default(),
            include_untracked: false,
            ignore_paths: Vec::new(),
        }
    }

    pub fn from_config(config: &RepoConfig) -> Self {
        Self::new(&config.path, &config.base_branch)
            .with_branch_mode(config.branch_mode)
            .with_untracked(config.include_untracked)
            .with_ignore_paths(config.ignore_paths.clone())
    }

    pub fn with_branch_mode(mut self, mode: BranchMode) -> Self {
        self.branch_mode = mode;
        self
    }

    pub fn with_untracked(mut self, include: bool) -> Self {
        self.include_untracked = include;
        self
    }

    pub fn with_ignore_paths(mut self, patterns: Vec<String>) -> Self {
        self.ignore_paths = patterns;
        self
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn open(&self) -> Result<Repository, GitError> {
        Repository::open(&self.repo_path)
            .map_err(|_| GitError::RepositoryNotFound(self.repo_path.display().to_string()))
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.ignore_paths
            .iter()
            .any(|pattern| glob_match::glob_match(pattern, path))
    }
}

impl DiffProvider for GitDiffProvider {
    #[instrument(skip(self), fields(repo = %self.repo_path.display(), base = %self.base_branch))]
    fn changed_lines(&self) -> Result<WorkingDiff, GitError> {
        let repo = self.open()?;
        let branch = current_branch(&repo)?;
        let base_tree = tree_for(&repo, &self.base_branch)?;

        let mut opts = DiffOptions::new();
        if self.include_untracked {
            opts.include_untracked(true)
                .recurse_untracked_dirs(true)
                .show_untracked_content(true);
        }

        let diff = match (self.branch_mode, branch.as_deref()) {
            (BranchMode::BranchTip, Some(name)) if name != self.base_branch => {
                let tip_tree = tree_for(&repo, &format!("refs/heads/{}", name))?;
                repo.diff_tree_to_tree(Some(&base_tree), Some(&tip_tree), Some(&mut opts))?
            }
            _ => repo.diff_tree_to_workdir_with_index(Some(&base_tree), Some(&mut opts))?,
        };

        let mut files: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
        let mut on_line = |delta: DiffDelta<'_>, _hunk: Option<DiffHunk<'_>>, line: DiffLine<'_>| -> bool {
            // Additions are keyed by their new position, deletions by their old one.
            let line_number = match line.origin_value() {
                DiffLineType::Addition => line.new_lineno(),
                DiffLineType::Deletion => line.old_lineno(),
                _ => return true,
            };
            let Some(line_number) = line_number else {
                return true;
            };
            let Some(path) = delta.old_file().path().or_else(|| delta.new_file().path()) else {
                return true;
            };
            let path = path.to_string_lossy().into_owned();
            if !self.is_ignored(&path) {
                files.entry(path).or_default().insert(line_number);
            }
            true
        };
        diff.foreach(&mut |_delta, _progress| true, None, None, Some(&mut on_line))?;

        debug!(
            branch = branch.as_deref().unwrap_or("<detached>"),
            files = files.len(),
            "collected changed lines"
        );
        Ok(WorkingDiff { branch, files })
    }
}

/// Name of the checked-out branch, or `None` for a detached or unborn HEAD.
pub fn current_branch(repo: &Repository) -> Result<Option<String>, GitError> {
    match repo.head() {
        Ok(head) if head.is_branch() => Ok(head.shorthand().map(str::to_string)),
        Ok(_) => Ok(None),
        Err(e) if e.code() == ErrorCode::UnbornBranch => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn tree_for<'r>(repo: &'r Repository, refname: &str) -> Result<Tree<'r>, GitError> {
    let object = repo
        .revparse_single(&format!("{}^{{tree}}", refname))
        .map_err(|_| GitError::RefNotFound(refname.to_string()))?;
    object
        .peel_to_tree()
        .map_err(|_| GitError::RefNotFound(refname.to_string()))
}

/// Participant identity from the repository's git config: `user.email`,
/// falling back to `user.name`.
pub fn resolve_identity<P: AsRef<Path>>(repo_path: P) -> Result<String, GitError> {
    let path = repo_path.as_ref();
    let repo = Repository::open(path)
        .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
    let config = repo.config()?;

    for key in ["user.email", "user.name"] {
        match config.get_string(key) {
            Ok(value) if !value.trim().is_empty() => return Ok(value.trim().to_string()),
            Ok(_) => warn!(key, "git identity value is empty"),
            Err(_) => debug!(key, "git identity value not set"),
        }
    }
    Err(GitError::NoIdentity)
}
