// ── Hyperlink and response-shape helpers ──

use serde_json::Value;
use url::Url;

use crate::error::CoreError;

/// Whether a string field looks like a hyperlink worth crawling.
pub(crate) fn is_link(s: &str) -> bool {
    s.contains("//") || s.starts_with('/')
}

/// Resolve `link` against the store's endpoint. Handles protocol-relative,
/// root-relative, relative and fully-qualified forms.
pub(crate) fn resolve(base: Option<&Url>, link: &str) -> Result<Url, CoreError> {
    let parsed = match base {
        Some(base) => base.join(link),
        None => Url::parse(link),
    };
    parsed.map_err(|e| CoreError::invalid(format!("cannot resolve link {link:?}: {e}")))
}

/// Last non-empty path segment of a URL, used as a fetched record's key.
pub(crate) fn last_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()
        .map(str::to_owned)
}

/// Append a record key to a collection endpoint: `{uri}/{key}`.
pub(crate) fn record_url(collection: &Url, key: &str) -> Result<Url, CoreError> {
    let mut url = collection.clone();
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|()| CoreError::invalid(format!("{collection} cannot hold a record path")))?
        .pop_if_empty()
        .push(key);
    Ok(url)
}

/// Walk a dot/bracket path (`data.items`, `data[0].items`, `data["items"]`)
/// into a response body.
pub(crate) fn walk_source(value: Value, path: &str) -> Result<Value, CoreError> {
    let mut current = value;
    for segment in path_segments(path) {
        let next = match (&mut current, segment.parse::<usize>()) {
            (Value::Array(items), Ok(i)) if i < items.len() => items.swap_remove(i),
            (Value::Object(map), _) => map.remove(&segment).unwrap_or(Value::Null),
            _ => Value::Null,
        };
        if next.is_null() {
            return Err(CoreError::InvalidData {
                message: format!("source path {path:?} not found at {segment:?}"),
            });
        }
        current = next;
    }
    Ok(current)
}

fn path_segments(path: &str) -> Vec<String> {
    path.replace('[', ".")
        .replace(']', "")
        .split('.')
        .map(|s| s.trim_matches(|c| c == '"' || c == '\''))
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Coerce a sync response into a list of rows. `null` is no rows; any
/// other non-array is a single row.
pub(crate) fn into_rows(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}
