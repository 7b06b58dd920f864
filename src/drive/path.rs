//! Drive path rules: every path handed to a `Drive` is absolute, `/`-separated,
//! NFC-normalized, free of `.`/`..` segments and without a trailing slash
//! (the root is `/`). `clean_path` is the only producer of such paths at the
//! transport boundary; the helpers below assume already-clean input.

use unicode_normalization::UnicodeNormalization;

pub const ROOT: &str = "/";

/// Normalize a UTF-8 string to NFC.
pub fn normalize_nfc(input: &str) -> String {
    input.nfc().collect::<String>()
}

/// Clean a caller-supplied path into drive form.
/// `..` never climbs above the root; backslashes are treated as separators.
pub fn clean_path(input: &str) -> String {
    let n = normalize_nfc(input);
    let mut segs: Vec<&str> = Vec::new();
    for seg in n.split(['/', '\\']) {
        match seg {
            "" | "." => {}
            ".." => { segs.pop(); }
            s => segs.push(s),
        }
    }
    if segs.is_empty() {
        return ROOT.to_string();
    }
    let mut out = String::with_capacity(n.len() + 1);
    for s in segs {
        out.push('/');
        out.push_str(s);
    }
    out
}

pub fn is_root(path: &str) -> bool {
    path == ROOT
}

/// Number of segments below the root: `/` is 0, `/a` is 1, `/a/b` is 2.
pub fn path_depth(path: &str) -> usize {
    if is_root(path) { 0 } else { path.matches('/').count() }
}

/// Last path segment; empty for the root.
pub fn path_name(path: &str) -> &str {
    if is_root(path) { return ""; }
    path.rsplit('/').next().unwrap_or("")
}

/// Parent directory, or `None` for the root.
pub fn path_parent(path: &str) -> Option<String> {
    if is_root(path) { return None; }
    match path.rfind('/') {
        Some(0) | None => Some(ROOT.to_string()),
        Some(i) => Some(path[..i].to_string()),
    }
}

pub fn path_join(base: &str, name: &str) -> String {
    if is_root(base) { format!("/{}", name) } else { format!("{}/{}", base, name) }
}

/// True when `ancestor` equals `path` or is one of its ancestors (segment-wise,
/// so `/ab` is not an ancestor of `/abc`).
pub fn is_ancestor_or_self(ancestor: &str, path: &str) -> bool {
    if is_root(ancestor) { return true; }
    match path.strip_prefix(ancestor) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Every path from the root down to and including `path`, shallowest first.
pub fn ancestors_and_self(path: &str) -> Vec<String> {
    let mut out = vec![ROOT.to_string()];
    if is_root(path) { return out; }
    let mut cur = String::with_capacity(path.len());
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        cur.push('/');
        cur.push_str(seg);
        out.push(cur.clone());
    }
    out
}

/// Re-root `path` (which lies under `from`) beneath `to`.
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    let rest = if is_root(from) { path } else { &path[from.len()..] };
    if rest.is_empty() || rest == ROOT {
        return to.to_string();
    }
    if is_root(to) { rest.to_string() } else { format!("{}{}", to, rest) }
}
