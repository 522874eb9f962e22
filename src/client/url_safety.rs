//! Same-origin URL handling.
//!
//! Two distinct operations: the caller's callback URL is reduced to an
//! origin-relative path before it is ever sent to the backend, and the
//! backend's answer is validated as a full same-origin URL before the browser
//! is sent there. Neither ever yields a cross-origin target.

use tracing::warn;
use url::Url;

/// Path, query and fragment of `url`, e.g. `/page?x=1#top`.
pub fn path_and_after(url: &Url) -> String {
    let mut out = url.path().to_string();
    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        out.push('?');
        out.push_str(query);
    }
    if let Some(fragment) = url.fragment().filter(|f| !f.is_empty()) {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

fn is_same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

/// Reduce `href` to a path relative to the current origin.
///
/// Relative hrefs are resolved against `current`. Unparsable or cross-origin
/// hrefs are replaced by the current page's own path.
pub fn normalize_to_same_origin_path(href: &str, current: &Url) -> String {
    match current.join(href) {
        Ok(parsed) if is_same_origin(&parsed, current) => path_and_after(&parsed),
        Ok(_) => {
            warn!("Cross-origin callback URL replaced by the current page");
            path_and_after(current)
        }
        Err(_) => path_and_after(current),
    }
}

/// Validate a redirect target returned by the backend.
///
/// Returns the fully resolved URL when `candidate` is same-origin with
/// `current`, otherwise `fallback`.
pub fn resolve_safe_redirect(candidate: Option<&str>, fallback: &str, current: &Url) -> String {
    let Some(candidate) = candidate.filter(|c| !c.is_empty()) else {
        return fallback.to_string();
    };

    match current.join(candidate) {
        Ok(parsed) if is_same_origin(&parsed, current) => parsed.to_string(),
        Ok(parsed) => {
            warn!(
                target_origin = %parsed.origin().ascii_serialization(),
                "Cross-origin redirect target replaced by fallback"
            );
            fallback.to_string()
        }
        Err(_) => fallback.to_string(),
    }
}
