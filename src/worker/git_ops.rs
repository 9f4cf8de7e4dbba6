//! Synchronous Git plumbing for one branch worker's clone. `git2` is a
//! synchronous library; every function in this module is blocking and must
//! only be called from inside `tokio::task::spawn_blocking`, the same
//! discipline used for Git writes elsewhere in this codebase's history.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use git2::{
    build::RepoBuilder, Cred, FetchOptions, PushOptions, RemoteCallbacks, Repository, Signature,
};

/// Credentials for the remote, resolved once from the referenced secret by
/// the caller (credential-secret decoding is an external collaborator's
/// concern per the out-of-scope list).
#[derive(Debug, Clone)]
pub enum GitCredentials {
    Ssh { username: String, private_key: PathBuf, passphrase: Option<String> },
    HttpsToken { token: String },
}

fn remote_callbacks(creds: GitCredentials) -> RemoteCallbacks<'static> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username_from_url, _allowed| match &creds {
        GitCredentials::Ssh {
            username,
            private_key,
            passphrase,
        } => Cred::ssh_key(
            username_from_url.unwrap_or(username),
            None,
            private_key,
            passphrase.as_deref(),
        ),
        GitCredentials::HttpsToken { token } => Cred::userpass_plaintext(token, ""),
    });
    callbacks
}

/// One staged file change for a commit.
pub enum StagedChange {
    Write { relative_path: PathBuf, contents: Vec<u8> },
    Remove { relative_path: PathBuf },
}

/// A single grouped commit trailer line, one per event in the batch.
pub struct CommitTrailer {
    pub actor: String,
}

#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub name: String,
    pub email: String,
}

/// Ensures `path` holds a clone of `repo_url` with `branch` checked out.
/// Handles an empty remote (zero branches, zero commits) by initializing a
/// fresh repository rather than failing the clone.
pub fn ensure_clone(
    repo_url: &str,
    default_branch: &str,
    branch: &str,
    path: &Path,
    creds: GitCredentials,
) -> Result<Repository> {
    if path.join(".git").exists() {
        return Repository::open(path).context("failed to open existing clone");
    }
    std::fs::create_dir_all(path).context("failed to create clone directory")?;

    let mut builder = RepoBuilder::new();
    let mut fetch_options = FetchOptions::new();
    fetch_options.depth(1);
    fetch_options.remote_callbacks(remote_callbacks(creds.clone()));
    builder.fetch_options(fetch_options);
    builder.branch(default_branch);

    match builder.clone(repo_url, path) {
        Ok(repo) => {
            if branch != default_branch {
                checkout_or_create_branch(&repo, branch, creds)?;
            }
            Ok(repo)
        }
        Err(e) if is_empty_remote_error(&e) => {
            let repo = Repository::init(path).context("failed to init empty repository")?;
            repo.remote("origin", repo_url)
                .context("failed to add origin remote to freshly initialized repo")?;
            // `Repository::init` points HEAD at whatever default branch git2
            // was built with (often `refs/heads/master`), not necessarily
            // `branch`. Point it at the target branch up front so the first
            // orphan commit in `commit_batch` (which commits to `"HEAD"`)
            // lands on a ref the push refspec below actually matches.
            repo.set_head(&format!("refs/heads/{branch}"))
                .context("failed to point HEAD at target branch on freshly initialized repo")?;
            Ok(repo)
        }
        Err(e) => Err(e).context("failed to clone repository"),
    }
}

fn is_empty_remote_error(err: &git2::Error) -> bool {
    let msg = err.message().to_ascii_lowercase();
    msg.contains("could not find repository") || msg.contains("reference 'head' not found") || msg.contains("remote HEAD")
}

/// Checks out `branch`, creating it from the current `HEAD` if it does not
/// already exist locally or on the remote.
pub fn checkout_or_create_branch(repo: &Repository, branch: &str, creds: GitCredentials) -> Result<()> {
    let branch_ref = format!("refs/heads/{branch}");
    if repo.find_reference(&branch_ref).is_ok() {
        repo.set_head(&branch_ref)?;
        repo.checkout_head(None)?;
        return Ok(());
    }

    // Try the remote-tracking branch first, so we build on top of any
    // existing upstream history for this branch rather than forking it.
    let remote_ref = format!("refs/remotes/origin/{branch}");
    if let Ok(remote) = repo.find_reference(&remote_ref) {
        let commit = remote.peel_to_commit()?;
        repo.branch(branch, &commit, false)?;
        repo.set_head(&branch_ref)?;
        repo.checkout_head(None)?;
        return Ok(());
    }

    let _ = creds; // reserved for a future remote ls-remote probe before branching.
    if let Ok(head_commit) = repo.head().and_then(|h| h.peel_to_commit()) {
        repo.branch(branch, &head_commit, false)?;
        repo.set_head(&branch_ref)?;
        repo.checkout_head(None)?;
    }
    // Else: genuinely empty repository. The branch is created implicitly
    // by the first orphan commit in `commit_batch`.
    Ok(())
}

/// Connects to `repo_url` and immediately disconnects, without cloning
/// anything to disk. Used by the `GitRepoConfig` controller as a lightweight
/// reachability/credential check before any destination is allowed to
/// register a worker against it.
pub fn probe_remote(repo_url: &str, creds: GitCredentials) -> Result<()> {
    let mut remote = git2::Remote::create_detached(repo_url).context("failed to create detached remote")?;
    remote
        .connect_auth(git2::Direction::Fetch, Some(remote_callbacks(creds)), None)
        .context("failed to connect to remote")?;
    remote.disconnect().context("failed to disconnect from remote")?;
    Ok(())
}

/// Fetches `origin`, returning the new remote-tracking head SHA for
/// `branch` if the ref exists.
pub fn fetch(repo: &Repository, branch: &str, creds: GitCredentials) -> Result<Option<String>> {
    let mut remote = repo.find_remote("origin").context("no 'origin' remote configured")?;
    let mut fetch_options = FetchOptions::new();
    fetch_options.remote_callbacks(remote_callbacks(creds));
    remote
        .fetch(&[branch], Some(&mut fetch_options), None)
        .context("fetch from origin failed")?;
    let remote_ref = format!("refs/remotes/origin/{branch}");
    match repo.find_reference(&remote_ref) {
        Ok(r) => Ok(Some(r.peel_to_commit()?.id().to_string())),
        Err(_) => Ok(None),
    }
}

/// Resets the working tree and `branch` hard to the remote tip, discarding
/// any local commits not present upstream. Used only as part of the
/// replay-on-reject push strategy, never as a merge.
pub fn hard_reset_to_remote(repo: &Repository, branch: &str) -> Result<()> {
    let remote_ref = format!("refs/remotes/origin/{branch}");
    let remote_commit = repo
        .find_reference(&remote_ref)
        .context("remote branch missing during hard reset")?
        .peel_to_commit()?;
    repo.reset(remote_commit.as_object(), git2::ResetType::Hard, None)
        .context("hard reset to remote tip failed")?;
    let branch_ref = format!("refs/heads/{branch}");
    repo.reference(&branch_ref, remote_commit.id(), true, "replay: reset to remote tip")?;
    repo.set_head(&branch_ref)?;
    Ok(())
}

/// Applies staged changes to the working tree and index, then commits them
/// if the resulting tree differs from `HEAD`. Returns `None` when the
/// batch produced no net change (idempotent re-run against an already
/// synced remote).
pub fn commit_batch(
    repo: &Repository,
    base_path: &Path,
    changes: &[StagedChange],
    trailers: &[CommitTrailer],
    leading_line: &str,
    bot: &BotIdentity,
) -> Result<Option<String>> {
    for change in changes {
        match change {
            StagedChange::Write { relative_path, contents } => {
                let full_path = base_path.join(relative_path);
                if let Some(parent) = full_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&full_path, contents)?;
            }
            StagedChange::Remove { relative_path } => {
                let full_path = base_path.join(relative_path);
                if full_path.exists() {
                    std::fs::remove_file(&full_path)?;
                }
            }
        }
    }

    let mut index = repo.index().context("failed to open repository index")?;
    index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
    for change in changes {
        if let StagedChange::Remove { relative_path } = change {
            let _ = index.remove_path(relative_path);
        }
    }
    index.write()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    let parent_commit = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    if let Some(parent) = &parent_commit {
        if parent.tree_id() == tree_id {
            return Ok(None);
        }
    }

    let signature = Signature::now(&bot.name, &bot.email)?;
    let message = render_commit_message(leading_line, trailers);
    let parents: Vec<&git2::Commit> = parent_commit.iter().collect();
    let commit_id = repo.commit(Some("HEAD"), &signature, &signature, &message, &tree, &parents)?;
    Ok(Some(commit_id.to_string()))
}

fn render_commit_message(leading_line: &str, trailers: &[CommitTrailer]) -> String {
    let mut message = String::from(leading_line);
    message.push('\n');
    if !trailers.is_empty() {
        message.push('\n');
        for trailer in trailers {
            message.push_str(&format!("X-Actor: {}\n", trailer.actor));
        }
    }
    message
}

#[derive(Debug)]
pub enum PushOutcome {
    Accepted,
    NonFastForward,
}

/// Pushes `branch` to `origin`, reporting a non-fast-forward rejection
/// rather than treating it as a generic error so the worker can drive its
/// replay loop.
pub fn push(repo: &Repository, branch: &str, creds: GitCredentials) -> Result<PushOutcome> {
    let mut remote = repo.find_remote("origin").context("no 'origin' remote configured")?;
    let mut push_options = PushOptions::new();
    let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");

    let rejected = std::cell::Cell::new(false);
    let mut callbacks = remote_callbacks(creds);
    callbacks.push_update_reference(|_refname, status| {
        if status.is_some() {
            rejected.set(true);
        }
        Ok(())
    });
    push_options.remote_callbacks(callbacks);

    remote
        .push(&[refspec], Some(&mut push_options))
        .context("push to origin failed")?;

    if rejected.get() {
        Ok(PushOutcome::NonFastForward)
    } else {
        Ok(PushOutcome::Accepted)
    }
}

/// Scans the working tree under `base_folder`, decoding a
/// [`crate::model::ResourceIdentifier`] from each file's path.
pub fn list_identifiers_in_base_folder(
    repo_path: &Path,
    base_folder: &str,
) -> Vec<crate::model::ResourceIdentifier> {
    let root = repo_path.join(base_folder);
    if !root.exists() {
        return Vec::new();
    }
    walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(&root).ok()?;
            crate::model::ResourceIdentifier::from_canonical_path(&relative.to_string_lossy())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_message_single_event_has_actor_trailer() {
        let message = render_commit_message(
            "[CREATE] configmaps/settings in app-a by alice@example.com",
            &[CommitTrailer {
                actor: "alice@example.com".into(),
            }],
        );
        assert!(message.starts_with("[CREATE] configmaps/settings in app-a by alice@example.com"));
        assert!(message.contains("X-Actor: alice@example.com"));
    }

    #[test]
    fn commit_message_batch_has_one_trailer_per_event() {
        let message = render_commit_message(
            "[BATCH] 2 changes",
            &[
                CommitTrailer { actor: "alice".into() },
                CommitTrailer { actor: "bob".into() },
            ],
        );
        assert_eq!(message.matches("X-Actor:").count(), 2);
    }
}
