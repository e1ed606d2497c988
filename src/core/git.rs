use anyhow::{Context, Result};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    Cred, Diff, DiffFormat, FetchOptions, IndexAddOption, PushOptions, RemoteCallbacks,
    Repository, Signature, Tree,
};
use std::path::Path;
use tracing::{debug, info, warn};

const COMMITTER_NAME: &str = "AI Code Reviewer";
const COMMITTER_EMAIL: &str = "ai-code-reviewer@users.noreply.github.com";

pub struct GitIntegration {
    repo: Repository,
    token: Option<String>,
}

impl GitIntegration {
    /// Clones `url` into `dest` and checks out `branch` as a local branch.
    pub fn clone_branch(
        url: &str,
        token: Option<&str>,
        branch: &str,
        dest: impl AsRef<Path>,
    ) -> Result<Self> {
        let dest = dest.as_ref();
        info!("Cloning repository to {}", dest.display());

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(credentials(token));

        let repo = RepoBuilder::new()
            .fetch_options(fetch_options)
            .clone(url, dest)
            .with_context(|| format!("Failed to clone {url}"))?;

        let integration = Self {
            repo,
            token: token.map(str::to_string),
        };
        integration.checkout_remote_branch(branch)?;
        Ok(integration)
    }

    fn checkout_remote_branch(&self, branch: &str) -> Result<()> {
        info!("Checking out branch: {}", branch);
        let remote_ref = format!("origin/{branch}");
        let commit = self
            .repo
            .revparse_single(&remote_ref)
            .with_context(|| format!("Branch {remote_ref} not found"))?
            .peel_to_commit()?;

        if self.repo.find_branch(branch, git2::BranchType::Local).is_err() {
            self.repo.branch(branch, &commit, false)?;
        }
        self.repo
            .checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
        self.repo.set_head(&format!("refs/heads/{branch}"))?;
        Ok(())
    }

    /// Diff of the working tree against `origin/<base>`, then `origin/master`,
    /// then the merge base of HEAD and `origin/<base>`. Empty when all fail.
    pub fn diff_against_base(&self, base_branch: &str) -> String {
        let mut candidates = vec![format!("origin/{base_branch}")];
        if base_branch != "master" {
            candidates.push("origin/master".to_string());
        }

        for candidate in &candidates {
            match self.diff_against_ref(candidate) {
                Ok(diff) => {
                    info!("Got diff against {}", candidate);
                    return diff;
                }
                Err(err) => warn!("Failed to diff against {}: {:#}", candidate, err),
            }
        }

        match self.diff_against_merge_base(base_branch) {
            Ok(diff) => {
                info!("Got diff against merge base");
                diff
            }
            Err(err) => {
                warn!("All diff attempts failed: {:#}", err);
                String::new()
            }
        }
    }

    fn diff_against_ref(&self, reference: &str) -> Result<String> {
        let tree = self.repo.revparse_single(reference)?.peel_to_tree()?;
        self.diff_tree_to_workdir(&tree)
    }

    fn diff_against_merge_base(&self, base_branch: &str) -> Result<String> {
        let head = self.repo.head()?.peel_to_commit()?;
        let base = self
            .repo
            .revparse_single(&format!("origin/{base_branch}"))?
            .peel_to_commit()?;
        let merge_base = self.repo.merge_base(head.id(), base.id())?;
        debug!("Found merge base: {}", merge_base);
        let tree = self.repo.find_commit(merge_base)?.tree()?;
        self.diff_tree_to_workdir(&tree)
    }

    fn diff_tree_to_workdir(&self, tree: &Tree<'_>) -> Result<String> {
        let diff = self.repo.diff_tree_to_workdir_with_index(Some(tree), None)?;
        render_patch(&diff)
    }

    /// Creates `branch` from HEAD, writes `files` (path relative to the
    /// workdir, new content), and commits them. Returns the commit id.
    pub fn commit_files(
        &self,
        branch: &str,
        files: &[(String, String)],
        message: &str,
    ) -> Result<String> {
        let workdir = self
            .repo
            .workdir()
            .context("Repository has no working directory")?;
        let head = self.repo.head()?.peel_to_commit()?;
        self.repo.branch(branch, &head, true)?;
        self.repo.set_head(&format!("refs/heads/{branch}"))?;

        for (path, content) in files {
            std::fs::write(workdir.join(path), content)
                .with_context(|| format!("Failed to write {path}"))?;
        }

        let mut index = self.repo.index()?;
        index.add_all(files.iter().map(|(path, _)| path.as_str()), IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree = self.repo.find_tree(index.write_tree()?)?;

        let signature = Signature::now(COMMITTER_NAME, COMMITTER_EMAIL)?;
        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &[&head])?;
        info!("Committed {} on {}", oid, branch);
        Ok(oid.to_string())
    }

    pub fn push_branch(&self, branch: &str) -> Result<()> {
        let mut remote = self.repo.find_remote("origin")?;
        let mut push_options = PushOptions::new();
        push_options.remote_callbacks(credentials(self.token.as_deref()));

        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        remote
            .push(&[refspec.as_str()], Some(&mut push_options))
            .with_context(|| format!("Failed to push {branch}"))?;
        info!("Pushed {}", branch);
        Ok(())
    }
}

fn credentials(token: Option<&str>) -> RemoteCallbacks<'static> {
    let mut callbacks = RemoteCallbacks::new();
    if let Some(token) = token.map(str::to_string) {
        callbacks.credentials(move |_url, _username, _allowed| {
            Cred::userpass_plaintext("x-access-token", &token)
        });
    }
    callbacks
}

fn render_patch(diff: &Diff<'_>) -> Result<String> {
    let mut diff_text = Vec::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if matches!(line.origin(), '+' | '-' | ' ') {
            diff_text.push(line.origin() as u8);
        }
        diff_text.extend_from_slice(line.content());
        true
    })?;
    Ok(String::from_utf8_lossy(&diff_text).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn init_repo(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        fs::write(dir.join("app.py"), "x = 1\n").unwrap();
        {
            let mut index = repo.index().unwrap();
            index.add_path(Path::new("app.py")).unwrap();
            index.write().unwrap();
            let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
            let sig = Signature::now("t", "t@example.com").unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
                .unwrap();
        }
        repo
    }

    fn open(dir: &Path) -> GitIntegration {
        GitIntegration {
            repo: Repository::open(dir).unwrap(),
            token: None,
        }
    }

    #[test]
    fn commit_files_creates_branch_with_changes() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());

        let git = open(dir.path());
        let files = vec![("app.py".to_string(), "x = 2\n".to_string())];
        git.commit_files("ai-fix/pr-1", &files, "Apply fixes").unwrap();

        assert_eq!(git.repo.head().unwrap().shorthand(), Some("ai-fix/pr-1"));
        assert_eq!(fs::read_to_string(dir.path().join("app.py")).unwrap(), "x = 2\n");
        let head = git.repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.message(), Some("Apply fixes"));
        assert_eq!(head.parent_count(), 1);
    }

    #[test]
    fn diff_against_missing_base_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        fs::write(dir.path().join("app.py"), "x = 3\n").unwrap();

        let git = open(dir.path());

        assert_eq!(git.diff_against_base("main"), "");
    }

    #[test]
    fn render_patch_includes_line_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        fs::write(dir.path().join("app.py"), "x = 3\n").unwrap();

        let tree = repo.head().unwrap().peel_to_tree().unwrap();
        let git = open(dir.path());
        let patch = git.diff_tree_to_workdir(&tree).unwrap();

        assert!(patch.contains("@@ -1 +1 @@"));
        assert!(patch.contains("-x = 1\n+x = 3\n"));
    }
}
