//! Path helpers shared by the scheduler and the shell protocol.
//!
//! Folder paths are kept as `/` separated strings; local roots always end
//! with `/`, relative paths never start with one.

/// Lexically normalizes a path: collapses repeated separators, resolves `.`
/// and `..`, and drops a trailing separator (except for the root).
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let unified = path.replace('\\', "/");
    let absolute = unified.starts_with('/');

    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Ensures a single trailing `/`.
pub fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Path relative to `root` (which ends with `/`), or `None` when `path` is
/// outside it. The root itself maps to `""`.
pub fn relative_to<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    let root_trimmed = root.strip_suffix('/').unwrap_or(root);
    if path == root_trimmed || path == root {
        return Some("");
    }
    path.strip_prefix(root).filter(|rest| !rest.is_empty())
}

/// Directory part of a path, without the trailing separator.
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Whether `name` looks like a conflict copy created by the engine.
pub fn is_conflict_file(name: &str) -> bool {
    let base = name.rsplit('/').next().unwrap_or(name);
    base.contains("_conflict-") || base.contains("(conflicted copy")
}
