//! Project-name derivation from terminal working directories.
//!
//! A terminal usually sits somewhere inside a project tree, often deep inside
//! build output or dependency folders. This module walks the path from its
//! deepest segment upward to find the directory a human would call "the
//! project".
//!
//! # Rules
//!
//! 1. Segments in [`IGNORED_SEGMENTS`] and hidden directories are skipped.
//! 2. A segment whose parent is a container folder (see
//!    [`CONTAINER_SEGMENTS`]) wins outright.
//! 3. Otherwise the deepest non-ignored segment is used.
//! 4. Empty or root paths fall back to [`DEFAULT_PROJECT_NAME`].
//!
//! The chosen segment is title-cased.
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use taskpulse::utils::project_name::derive_project_name;
//!
//! let name = derive_project_name(Path::new("/home/ada/projects/rocket-engine/target/debug"));
//! assert_eq!(name, "Rocket Engine");
//!
//! assert_eq!(derive_project_name(Path::new("/")), "General Tasks");
//! ```

use std::path::{Component, Path, PathBuf};

/// Name used when no project can be derived.
pub const DEFAULT_PROJECT_NAME: &str = "General Tasks";

/// Directory names that never identify a project on their own.
pub const IGNORED_SEGMENTS: &[&str] = &[
    "node_modules",
    "target",
    "build",
    "dist",
    "out",
    "bin",
    "obj",
    "lib",
    "library",
    "vendor",
    "src",
    "tmp",
    "temp",
    "venv",
    "__pycache__",
    "deps",
    "debug",
    "release",
];

/// Folder names conventionally holding many projects side by side.
pub const CONTAINER_SEGMENTS: &[&str] = &[
    "projects",
    "project",
    "workspace",
    "workspaces",
    "repos",
    "repositories",
    "code",
    "dev",
    "github",
    "sites",
];

fn is_ignored(segment: &str) -> bool {
    segment.starts_with('.')
        || IGNORED_SEGMENTS
            .iter()
            .any(|ignored| segment.eq_ignore_ascii_case(ignored))
}

fn is_container(segment: &str) -> bool {
    CONTAINER_SEGMENTS
        .iter()
        .any(|container| segment.eq_ignore_ascii_case(container))
}

/// Derives a human project name from a working directory.
#[must_use]
pub fn derive_project_name(path: &Path) -> String {
    let segments: Vec<&str> = path
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => segment.to_str(),
            _ => None,
        })
        .collect();

    let under_container = (1..segments.len())
        .rev()
        .find(|&i| is_container(segments[i - 1]) && !is_ignored(segments[i]))
        .map(|i| segments[i]);

    let chosen = under_container.or_else(|| segments.iter().rev().copied().find(|s| !is_ignored(s)));

    chosen
        .map(title_case)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_PROJECT_NAME.to_string())
}

/// Title-cases a directory name, treating `-`, `_`, `.` and spaces as word breaks.
///
/// Only the first letter of each word is touched, so `myApp` stays `MyApp`.
#[must_use]
pub fn title_case(segment: &str) -> String {
    segment
        .split(['-', '_', '.', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Resolves a working-directory hint into a path.
///
/// A leading `~` is expanded against `home` when available. Blank hints
/// resolve to `None`.
#[must_use]
pub fn resolve_working_dir(hint: &str, home: Option<&Path>) -> Option<PathBuf> {
    let hint = hint.trim();
    if hint.is_empty() {
        return None;
    }

    if hint == "~" {
        return home.map(Path::to_path_buf);
    }

    match (hint.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => Some(home.join(rest)),
        _ => Some(PathBuf::from(hint)),
    }
}

/// Extracts a path-looking token from a window title.
///
/// Terminal titles frequently start with the shell's working directory, e.g.
/// `~/code/engine — zsh`. Returns the first whitespace-delimited token when it
/// starts with `/` or `~`.
#[must_use]
pub fn path_from_title(title: &str) -> Option<&str> {
    title
        .split_whitespace()
        .next()
        .filter(|token| token.starts_with('/') || token.starts_with('~'))
}
