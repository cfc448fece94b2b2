use std::fs;
use std::path::PathBuf;

use git2::build::CheckoutBuilder;
use git2::{Repository, ResetType, StatusOptions};
use log::{debug, warn};

use crate::error::{GateLensError, Result};
use crate::model::{CommitDetail, ReviewKey};

/// Short-lived remote used to fetch one change ref; removed after every
/// enrichment so the clone keeps only its canonical origin between runs.
const REVIEW_REMOTE: &str = "gatelens-review";

#[derive(Debug, Clone)]
pub struct GitSettings {
    /// Directory the working copies live under, one per project path.
    pub clone_root: PathBuf,
    /// Base URL (or local path) projects are cloned from.
    pub upstream_host: String,
    /// Base URL changes are fetched from when the review carries no source
    /// URL of its own.
    pub review_host: String,
}

/// Fetches commit metadata for one review.
///
/// Validation failures (missing change id, empty project, non-numeric review
/// id) come back as `InvalidReview`; the caller classifies those as
/// permanently ignored rather than errored.
pub fn enrich(settings: &GitSettings, key: &ReviewKey, project: &str, url: Option<&str>) -> Result<CommitDetail> {
    if key.review_id.is_empty() {
        return Err(GateLensError::InvalidReview("missing review id".into()));
    }
    if project.is_empty() {
        return Err(GateLensError::InvalidReview("missing project".into()));
    }
    let change_id = key
        .change_id
        .as_deref()
        .ok_or_else(|| GateLensError::InvalidReview(format!("{}: missing change id", key.review_id)))?;
    let review_id: u64 = key.review_id.parse().map_err(|_| {
        GateLensError::InvalidReview(format!("{}: review id is not numeric", key.review_id))
    })?;

    let repo = ensure_clone(settings, project)?;
    reset_to_upstream(&repo)?;

    let source = match url {
        Some(url) => url.to_string(),
        None => format!("{}/{}", settings.review_host.trim_end_matches('/'), project),
    };
    fetch_change(&repo, &source, review_id, change_id)
}

/// Opens the working copy for `project`, cloning it first if absent.
///
/// The clone lands in a temp sibling and is renamed into place; losing the
/// rename race to a concurrent clone is not an error.
pub fn ensure_clone(settings: &GitSettings, project: &str) -> Result<Repository> {
    let dest = settings.clone_root.join(project);
    if dest.join(".git").exists() {
        return Ok(Repository::open(&dest)?);
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let url = format!("{}/{}", settings.upstream_host.trim_end_matches('/'), project);
    let tmp = settings.clone_root.join(format!(
        ".{}.clone-{}",
        project.replace('/', "-"),
        std::process::id()
    ));
    debug!("cloning {url} into {}", tmp.display());
    Repository::clone(&url, &tmp)?;

    match fs::rename(&tmp, &dest) {
        Ok(()) => {}
        Err(err) if dest.join(".git").exists() => {
            // Another worker run won the race; use its copy.
            debug!("clone of {project} already present: {err}");
            let _ = fs::remove_dir_all(&tmp);
        }
        Err(err) => {
            let _ = fs::remove_dir_all(&tmp);
            return Err(err.into());
        }
    }
    Ok(Repository::open(&dest)?)
}

/// Hard-resets the working copy to the upstream default branch head and
/// removes untracked files, discarding anything a previous enrichment left
/// behind.
pub fn reset_to_upstream(repo: &Repository) -> Result<()> {
    let mut origin = repo.find_remote("origin")?;
    origin.fetch(&[] as &[&str], None, None)?;

    let target = ["origin/HEAD", "origin/main", "origin/master", "HEAD"]
        .iter()
        .find_map(|name| repo.revparse_single(name).ok())
        .ok_or_else(|| git2::Error::from_str("no upstream head to reset to"))?;
    repo.reset(&target, ResetType::Hard, None)?;

    clean_untracked(repo)?;
    Ok(())
}

fn clean_untracked(repo: &Repository) -> Result<()> {
    let Some(workdir) = repo.workdir() else {
        return Ok(());
    };
    let mut options = StatusOptions::new();
    options.include_untracked(true).recurse_untracked_dirs(true);
    for entry in repo.statuses(Some(&mut options))?.iter() {
        if !entry.status().contains(git2::Status::WT_NEW) {
            continue;
        }
        let Some(path) = entry.path() else { continue };
        let full = workdir.join(path);
        if full.is_dir() {
            let _ = fs::remove_dir_all(&full);
        } else {
            let _ = fs::remove_file(&full);
        }
    }
    Ok(())
}

/// Fetches `refs/changes/<rid % 100>/<rid>/<cid>` from `source` through an
/// ephemeral remote, checks out the fetched head, and reads its commit.
pub fn fetch_change(repo: &Repository, source: &str, review_id: u64, change_id: &str) -> Result<CommitDetail> {
    // A crashed run may have left the remote behind.
    let _ = repo.remote_delete(REVIEW_REMOTE);
    let mut remote = repo.remote(REVIEW_REMOTE, source)?;

    let refname = format!("refs/changes/{:02}/{}/{}", review_id % 100, review_id, change_id);
    debug!("fetching {refname} from {source}");
    let fetched = fetch_once_retried(&mut remote, &refname);
    drop(remote);

    let detail = fetched.and_then(|()| {
        let head = repo.revparse_single("FETCH_HEAD")?;
        let commit = head.peel_to_commit()?;
        repo.checkout_tree(&head, Some(CheckoutBuilder::new().force()))?;
        repo.set_head_detached(commit.id())?;

        let message = commit.message().unwrap_or_default();
        let (summary, description) = split_message(message);
        let author = format_signature(&commit.author());
        let committer = format_signature(&commit.committer());
        Ok(CommitDetail {
            summary,
            description,
            author,
            committer,
        })
    });

    if let Err(err) = repo.remote_delete(REVIEW_REMOTE) {
        // Non-fatal; the next enrichment deletes it up front.
        warn!("could not remove review remote: {err}");
    }
    detail
}

/// The change fetch occasionally trips a transient server-side assertion;
/// one immediate retry clears it.
fn fetch_once_retried(remote: &mut git2::Remote<'_>, refname: &str) -> Result<()> {
    if let Err(err) = remote.fetch(&[refname], None, None) {
        debug!("retrying fetch of {refname}: {err}");
        remote.fetch(&[refname], None, None)?;
    }
    Ok(())
}

fn split_message(message: &str) -> (String, String) {
    match message.split_once('\n') {
        Some((summary, rest)) => (summary.trim_end().to_string(), rest.trim().to_string()),
        None => (message.trim_end().to_string(), String::new()),
    }
}

fn format_signature(signature: &git2::Signature<'_>) -> String {
    format!(
        "{} <{}>",
        signature.name().unwrap_or(""),
        signature.email().unwrap_or("")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use std::path::Path;
    use tempfile::TempDir;

    fn commit_file(repo: &Repository, name: &str, contents: &str, message: &str) -> git2::Oid {
        let workdir = repo.workdir().unwrap();
        fs::write(workdir.join(name), contents).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let signature = Signature::now("Test User", "test@example.com").unwrap();
        let parents: Vec<git2::Commit> = repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parent_refs)
            .unwrap()
    }

    fn upstream_with_change() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("widget");
        let repo = Repository::init(&path).unwrap();
        commit_file(&repo, "README", "widget\n", "Initial import");
        let change = commit_file(
            &repo,
            "lib.rs",
            "pub fn answer() -> u32 { 42 }\n",
            "Add the answer\n\nAlso document why it is 42.",
        );
        repo.reference("refs/changes/34/1234/5", change, true, "test change")
            .unwrap();
        // Leave the branch head at the first commit so the change is only
        // reachable through its change ref.
        let first = repo
            .find_reference("HEAD")
            .unwrap()
            .peel_to_commit()
            .unwrap()
            .parent(0)
            .unwrap();
        repo.reset(first.as_object(), ResetType::Hard, None).unwrap();
        (dir, path)
    }

    fn settings(upstream: &TempDir, clone_root: &TempDir) -> GitSettings {
        GitSettings {
            clone_root: clone_root.path().to_path_buf(),
            upstream_host: upstream.path().display().to_string(),
            review_host: upstream.path().display().to_string(),
        }
    }

    #[test]
    fn test_enrich_reads_commit_metadata() {
        let (upstream, _path) = upstream_with_change();
        let clone_root = TempDir::new().unwrap();
        let settings = settings(&upstream, &clone_root);

        let key = ReviewKey::parse("1234,5");
        let detail = enrich(&settings, &key, "widget", None).unwrap();

        assert_eq!(detail.summary, "Add the answer");
        assert_eq!(detail.description, "Also document why it is 42.");
        assert_eq!(detail.author, "Test User <test@example.com>");
        assert_eq!(detail.committer, "Test User <test@example.com>");

        // The ephemeral remote is gone, only origin remains.
        let repo = Repository::open(clone_root.path().join("widget")).unwrap();
        let remotes = repo.remotes().unwrap();
        let names: Vec<&str> = remotes.iter().flatten().collect();
        assert_eq!(names, vec!["origin"]);
    }

    #[test]
    fn test_enrich_rejects_missing_change_id() {
        let clone_root = TempDir::new().unwrap();
        let settings = GitSettings {
            clone_root: clone_root.path().to_path_buf(),
            upstream_host: "unused".into(),
            review_host: "unused".into(),
        };
        let key = ReviewKey::parse("1234");
        let err = enrich(&settings, &key, "widget", None).unwrap_err();
        assert!(matches!(err, GateLensError::InvalidReview(_)));
    }

    #[test]
    fn test_enrich_rejects_non_numeric_review_id() {
        let clone_root = TempDir::new().unwrap();
        let settings = GitSettings {
            clone_root: clone_root.path().to_path_buf(),
            upstream_host: "unused".into(),
            review_host: "unused".into(),
        };
        let key = ReviewKey::parse("not-a-number,5");
        let err = enrich(&settings, &key, "widget", None).unwrap_err();
        assert!(matches!(err, GateLensError::InvalidReview(_)));
    }

    #[test]
    fn test_ensure_clone_reuses_existing_copy() {
        let (upstream, _path) = upstream_with_change();
        let clone_root = TempDir::new().unwrap();
        let settings = settings(&upstream, &clone_root);

        ensure_clone(&settings, "widget").unwrap();
        let marker = clone_root.path().join("widget").join("MARKER");
        fs::write(&marker, "kept").unwrap();

        // A second call opens the existing copy instead of recloning.
        ensure_clone(&settings, "widget").unwrap();
        assert!(marker.exists());
    }

    #[test]
    fn test_split_message_without_body() {
        let (summary, description) = split_message("Only a title");
        assert_eq!(summary, "Only a title");
        assert_eq!(description, "");
    }
}
