// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Node path addressing.
//!
//! A node path is a `/`-separated sequence of (optionally module-qualified)
//! schema names. Instances of repeatable schema nodes carry a trailing
//! predicate on their last segment: `[name='eth0']` for list instances,
//! `[.='10']` for leaf-list instances, and a provisional positional `[N]`
//! while a freshly created instance has no confirmed identity yet.
//!
//! Everything here is a pure string function. Malformed input is a caller
//! precondition and is not validated.

/// Byte offset where the trailing predicate(s) of the last segment start.
///
/// Brackets inside quoted predicate values are ignored.
fn predicate_start(path: &str) -> Option<usize> {
    if !path.ends_with(']') {
        return None;
    }
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = None;
    for (i, c) in path.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' if depth > 0 => quote = Some(c),
            '[' => {
                if depth == 0 && start.is_none() {
                    start = Some(i);
                }
                depth += 1;
            }
            ']' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => start = None,
            _ => {}
        }
    }
    start
}

/// Removes the trailing predicate(s) of the last path segment.
///
/// Idempotent on paths without a predicate. Multi-key predicates
/// (`[a='1'][b='2']`) are removed as a whole.
pub fn strip_predicate(path: &str) -> &str {
    match predicate_start(path) {
        Some(at) => &path[..at],
        None => path,
    }
}

/// Returns the trailing predicate(s) of the last segment, or `""`.
pub fn predicate_of(path: &str) -> &str {
    match predicate_start(path) {
        Some(at) => &path[at..],
        None => "",
    }
}

/// True when `path` carries an instance predicate on its last segment.
pub fn has_predicate(path: &str) -> bool {
    predicate_start(path).is_some()
}

fn quote_value(value: &str) -> String {
    if value.contains('\'') {
        format!("\"{value}\"")
    } else {
        format!("'{value}'")
    }
}

/// Builds `[name='value']...` from `(name, value)` pairs in the given order.
///
/// Callers pass the pairs in schema key order; names are used verbatim, so
/// module qualification (`mod:key`) is the caller's choice.
pub fn build_predicate<'a, I>(keys: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    keys.into_iter()
        .map(|(name, value)| format!("[{name}={}]", quote_value(value)))
        .collect()
}

/// Predicate identifying a leaf-list instance by its value: `[.='value']`.
pub fn leaf_list_predicate(value: &str) -> String {
    format!("[.={}]", quote_value(value))
}

/// True iff `candidate` lies strictly below `ancestor`.
pub fn is_descendant(candidate: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return candidate.len() > 1 && candidate.starts_with('/');
    }
    candidate
        .strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Joins a parent path and a child segment; the root path is `/`.
pub fn join(parent: &str, segment: &str) -> String {
    if parent == "/" {
        format!("/{segment}")
    } else {
        format!("{parent}/{segment}")
    }
}

/// Path segment for a child schema node: module-qualified only when the
/// child's module differs from its parent's.
pub fn segment_name(parent_module: &str, child_module: &str, child_name: &str) -> String {
    if parent_module == child_module {
        child_name.to_owned()
    } else {
        format!("{child_module}:{child_name}")
    }
}

/// Module name without a `@revision` suffix.
pub fn module_name(module: &str) -> &str {
    module.split_once('@').map_or(module, |(name, _)| name)
}

/// Parses the provisional positional suffix `N` of `base[N]`.
///
/// Returns `None` when `path` is not `base` followed by a numeric predicate.
pub fn positional_index(path: &str, base: &str) -> Option<usize> {
    let rest = path.strip_prefix(base)?.strip_prefix('[')?;
    let digits: &str = rest
        .find(|c: char| !c.is_ascii_digit())
        .map_or(rest, |end| &rest[..end]);
    digits.parse().ok()
}

/// Replaces the `old` prefix of `path` (itself or a descendant) with `new`.
pub fn rebase(path: &str, old: &str, new: &str) -> Option<String> {
    if path == old {
        return Some(new.to_owned());
    }
    if is_descendant(path, old) {
        return Some(format!("{new}{}", &path[old.len()..]));
    }
    None
}
