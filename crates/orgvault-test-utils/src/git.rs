//! Local git repositories standing in for GitHub clone URLs.

use std::path::{Path, PathBuf};
use std::process::Command;

/// Whether a `git` binary is on `PATH`.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// A bare repository with one commit on `main`.
pub struct SourceRepo {
    pub name: String,
    pub path: PathBuf,
}

impl SourceRepo {
    /// Create `<root>/<name>.git`. Returns `None` when git is not installed.
    pub fn create(root: &Path, name: &str) -> Option<Self> {
        if !git_available() {
            return None;
        }
        let work = root.join(format!("{name}-work"));
        let bare = root.join(format!("{name}.git"));
        std::fs::create_dir_all(&work).expect("failed to create work dir");
        std::fs::write(work.join("README.md"), format!("# {name}\n")).expect("write README");

        git(&work, &["init", "--quiet", "--initial-branch=main"]);
        git(&work, &["add", "README.md"]);
        git(
            &work,
            &[
                "-c",
                "user.name=orgvault",
                "-c",
                "user.email=orgvault@example.com",
                "commit",
                "--quiet",
                "-m",
                "initial",
            ],
        );
        git(
            root,
            &[
                "clone",
                "--quiet",
                "--bare",
                work.to_str().expect("utf-8 path"),
                bare.to_str().expect("utf-8 path"),
            ],
        );

        Some(Self {
            name: name.to_string(),
            path: bare,
        })
    }

    /// The value to use as the repository's `clone_url`.
    pub fn url(&self) -> String {
        self.path.display().to_string()
    }
}

fn git(cwd: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .status()
        .expect("failed to run git");
    assert!(status.success(), "git {args:?} failed in {}", cwd.display());
}
