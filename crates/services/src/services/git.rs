use std::path::Path;

use git2::{
    BranchType, ErrorCode, IndexAddOption, Repository, RepositoryInitOptions, Signature,
    StatusOptions,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use super::config::GitIdentity;

#[derive(Debug, Error)]
pub enum GitServiceError {
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error("Invalid repository: {0}")]
    InvalidRepository(String),
    #[error("Merge conflicts: {0}")]
    MergeConflicts(String),
    #[error("Branch not found: {0}")]
    BranchNotFound(String),
    #[error("Repository has no origin remote")]
    NoRemote,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum BranchAction {
    Create,
    Switch,
    Delete,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct RepoStatus {
    pub branch: String,
    pub ahead: i32,
    pub behind: i32,
    pub last_commit: Option<String>,
    pub modified: usize,
    pub created: usize,
    pub deleted: usize,
    pub conflicted: Vec<String>,
    pub clean: bool,
}

impl RepoStatus {
    /// What a freshly initialized (or unreadable) repository reports. The
    /// status endpoint is polled continuously, so it degrades instead of
    /// erroring.
    pub fn default_clean() -> Self {
        Self {
            branch: "main".to_string(),
            ahead: 0,
            behind: 0,
            last_commit: None,
            modified: 0,
            created: 0,
            deleted: 0,
            conflicted: Vec::new(),
            clean: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct CommitOutcome {
    pub commit: String,
    pub message: String,
    pub files: usize,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct PullOutcome {
    pub success: bool,
    pub updated: bool,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct PushOutcome {
    pub success: bool,
    pub branch: String,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct BranchOutcome {
    pub success: bool,
    pub current_branch: String,
    pub action: BranchAction,
    pub branch_name: String,
}

/// git2-backed adapter over a project's working directory. All methods are
/// blocking; callers hop through `spawn_blocking`.
#[derive(Clone)]
pub struct GitService {
    identity: GitIdentity,
}

impl GitService {
    pub fn new(identity: GitIdentity) -> Self {
        Self { identity }
    }

    fn signature(&self) -> Result<Signature<'static>, GitServiceError> {
        Ok(Signature::now(&self.identity.name, &self.identity.email)?)
    }

    pub fn initialize_repo_with_main_branch(&self, path: &Path) -> Result<(), GitServiceError> {
        std::fs::create_dir_all(path)?;
        let mut options = RepositoryInitOptions::new();
        options.initial_head("main");
        let repo = Repository::init_opts(path, &options)?;

        // An initial commit so the branch exists and status/ahead-behind
        // have something to anchor on.
        let signature = self.signature()?;
        let tree_id = repo.index()?.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        repo.commit(Some("HEAD"), &signature, &signature, "Initial commit", &tree, &[])?;
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<Repository, GitServiceError> {
        Repository::open(path)
            .map_err(|err| GitServiceError::InvalidRepository(err.message().to_string()))
    }

    fn open_or_init(&self, path: &Path) -> Result<Repository, GitServiceError> {
        match Repository::open(path) {
            Ok(repo) => Ok(repo),
            Err(_) => {
                self.initialize_repo_with_main_branch(path)?;
                self.open(path)
            }
        }
    }

    fn current_branch(repo: &Repository) -> String {
        match repo.head() {
            Ok(head) => head.shorthand().unwrap_or("main").to_string(),
            Err(_) => repo
                .find_reference("HEAD")
                .ok()
                .and_then(|head| {
                    head.symbolic_target()
                        .map(|target| target.trim_start_matches("refs/heads/").to_string())
                })
                .unwrap_or_else(|| "main".to_string()),
        }
    }

    fn ahead_behind(repo: &Repository, branch_name: &str) -> (i32, i32) {
        let result = (|| -> Result<(usize, usize), git2::Error> {
            let local = repo.find_branch(branch_name, BranchType::Local)?;
            let upstream = local.upstream()?;
            let local_oid = local.get().target().ok_or_else(|| {
                git2::Error::from_str("local branch has no target")
            })?;
            let upstream_oid = upstream.get().target().ok_or_else(|| {
                git2::Error::from_str("upstream branch has no target")
            })?;
            repo.graph_ahead_behind(local_oid, upstream_oid)
        })();

        match result {
            Ok((ahead, behind)) => (ahead as i32, behind as i32),
            Err(_) => (0, 0),
        }
    }

    fn head_commit_id(repo: &Repository) -> Option<String> {
        repo.head()
            .ok()
            .and_then(|head| head.target())
            .map(|oid| oid.to_string())
    }

    pub fn status(&self, path: &Path) -> Result<RepoStatus, GitServiceError> {
        let repo = self.open(path)?;
        let branch = Self::current_branch(&repo);

        let mut options = StatusOptions::new();
        options.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = repo.statuses(Some(&mut options))?;

        let mut modified = 0;
        let mut created = 0;
        let mut deleted = 0;
        let mut conflicted = Vec::new();
        for entry in statuses.iter() {
            let status = entry.status();
            if status.is_conflicted() {
                if let Some(entry_path) = entry.path() {
                    conflicted.push(entry_path.to_string());
                }
                continue;
            }
            if status.is_wt_new() || status.is_index_new() {
                created += 1;
            } else if status.is_wt_deleted() || status.is_index_deleted() {
                deleted += 1;
            } else if status.is_wt_modified() || status.is_index_modified() {
                modified += 1;
            }
        }

        let (ahead, behind) = Self::ahead_behind(&repo, &branch);
        let clean = statuses.is_empty();

        Ok(RepoStatus {
            branch,
            ahead,
            behind,
            last_commit: Self::head_commit_id(&repo),
            modified,
            created,
            deleted,
            conflicted,
            clean,
        })
    }

    /// Never fails: missing repositories are lazily initialized with the
    /// bot identity, and any residual error degrades to the default clean
    /// status.
    pub fn status_or_init(&self, path: &Path) -> RepoStatus {
        if Repository::open(path).is_err()
            && let Err(err) = self.initialize_repo_with_main_branch(path)
        {
            tracing::warn!(path = %path.display(), error = %err, "failed to initialize repository");
            return RepoStatus::default_clean();
        }

        match self.status(path) {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read repository status");
                RepoStatus::default_clean()
            }
        }
    }

    /// `stage_all=false` is accepted for the approved-hunks staging mode,
    /// which currently stages identically to `all`.
    pub fn commit(
        &self,
        path: &Path,
        message: &str,
        _stage_all: bool,
    ) -> Result<CommitOutcome, GitServiceError> {
        let repo = self.open_or_init(path)?;

        let pending = {
            let mut options = StatusOptions::new();
            options.include_untracked(true).recurse_untracked_dirs(true);
            repo.statuses(Some(&mut options))?.len()
        };

        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;

        let signature = self.signature()?;
        let parent = repo
            .head()
            .ok()
            .and_then(|head| head.target())
            .and_then(|oid| repo.find_commit(oid).ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        let commit_id = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;

        Ok(CommitOutcome {
            commit: commit_id.to_string(),
            message: message.to_string(),
            files: pending,
        })
    }

    /// Fetch + fast-forward. Anything that would need a real merge is
    /// surfaced as a conflict for the user to resolve out-of-band.
    pub fn pull(&self, path: &Path) -> Result<PullOutcome, GitServiceError> {
        let repo = self.open(path)?;
        let branch = Self::current_branch(&repo);

        let mut remote = repo
            .find_remote("origin")
            .map_err(|_| GitServiceError::NoRemote)?;
        remote.fetch(&[branch.as_str()], None, None)?;

        let fetch_head = repo.find_reference("FETCH_HEAD")?;
        let fetch_commit = repo.reference_to_annotated_commit(&fetch_head)?;
        let (analysis, _) = repo.merge_analysis(&[&fetch_commit])?;

        if analysis.is_up_to_date() {
            return Ok(PullOutcome {
                success: true,
                updated: false,
            });
        }

        if analysis.is_fast_forward() {
            let refname = format!("refs/heads/{branch}");
            let mut reference = repo.find_reference(&refname)?;
            reference.set_target(fetch_commit.id(), "pull: fast-forward")?;
            repo.set_head(&refname)?;
            let mut checkout = git2::build::CheckoutBuilder::default();
            checkout.force();
            repo.checkout_head(Some(&mut checkout))?;
            return Ok(PullOutcome {
                success: true,
                updated: true,
            });
        }

        Err(GitServiceError::MergeConflicts(format!(
            "Branch {branch} has diverged from origin; resolve manually"
        )))
    }

    pub fn push(&self, path: &Path) -> Result<PushOutcome, GitServiceError> {
        let repo = self.open(path)?;
        let branch = Self::current_branch(&repo);

        let mut remote = repo
            .find_remote("origin")
            .map_err(|_| GitServiceError::NoRemote)?;
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        remote.push(&[refspec.as_str()], None)?;

        Ok(PushOutcome {
            success: true,
            branch,
        })
    }

    pub fn manage_branch(
        &self,
        path: &Path,
        action: BranchAction,
        name: &str,
    ) -> Result<BranchOutcome, GitServiceError> {
        let repo = self.open_or_init(path)?;

        match action {
            BranchAction::Create => {
                let head_commit = repo
                    .head()
                    .ok()
                    .and_then(|head| head.target())
                    .and_then(|oid| repo.find_commit(oid).ok())
                    .ok_or_else(|| {
                        GitServiceError::InvalidRepository(
                            "cannot branch from an unborn HEAD".to_string(),
                        )
                    })?;
                repo.branch(name, &head_commit, false)?;
                repo.set_head(&format!("refs/heads/{name}"))?;
                let mut checkout = git2::build::CheckoutBuilder::default();
                checkout.safe();
                repo.checkout_head(Some(&mut checkout))?;
            }
            BranchAction::Switch => {
                match repo.find_branch(name, BranchType::Local) {
                    Ok(_) => {}
                    Err(err) if err.code() == ErrorCode::NotFound => {
                        return Err(GitServiceError::BranchNotFound(name.to_string()));
                    }
                    Err(err) => return Err(err.into()),
                }
                repo.set_head(&format!("refs/heads/{name}"))?;
                let mut checkout = git2::build::CheckoutBuilder::default();
                checkout.safe();
                repo.checkout_head(Some(&mut checkout))?;
            }
            BranchAction::Delete => {
                let mut branch = repo
                    .find_branch(name, BranchType::Local)
                    .map_err(|_| GitServiceError::BranchNotFound(name.to_string()))?;
                branch.delete()?;
            }
        }

        Ok(BranchOutcome {
            success: true,
            current_branch: Self::current_branch(&repo),
            action,
            branch_name: name.to_string(),
        })
    }
}
