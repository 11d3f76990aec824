//! Path and attribute helpers shared by the file operations.

/// Convert a Unix epoch timestamp to an RFC 3339 string.
pub fn chrono_from_epoch(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// Three-digit octal permission string, e.g. `"755"`. Special bits are
/// kept, so a setuid binary shows as `"4755"`.
pub fn format_octal_permissions(mode: u32) -> String {
    format!("{:03o}", mode & 0o7777)
}

/// Owner read/write/execute bits.
pub fn owner_access(mode: u32) -> (bool, bool, bool) {
    (mode & 0o400 != 0, mode & 0o200 != 0, mode & 0o100 != 0)
}

/// Join a directory and an entry name without doubling the separator.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Everything before the last `/`, or `"/"` when the path has none.
///
/// `"/a/b/file.txt"` gives `"/a/b"` and `"/file.txt"` gives `""`.
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "/",
    }
}

/// Final path component, ignoring a trailing `/`.
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}
