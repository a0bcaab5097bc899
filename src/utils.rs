//! Resource and file-name helpers for the host surface

use url::Url;

use crate::error::{Error, Result};
use crate::types::ResponseInfo;

/// File name used when neither the response nor the URL suggests one
pub const FALLBACK_FILENAME: &str = "download";

/// Resolve a resource identifier to an absolute URL
///
/// Absolute `http(s)` URLs are used as-is; anything else is joined onto `base`.
///
/// # Examples
///
/// ```
/// use fetchop::utils::resolve_resource;
/// use url::Url;
///
/// let base = Url::parse("https://cdn.example.com/assets/").unwrap();
/// let url = resolve_resource(Some(&base), "images/logo.png").unwrap();
/// assert_eq!(url.as_str(), "https://cdn.example.com/assets/images/logo.png");
/// ```
pub fn resolve_resource(base: Option<&Url>, resource: &str) -> Result<Url> {
    let resource = resource.trim();
    if resource.is_empty() {
        return Err(Error::InvalidRequest("resource identifier is empty".to_string()));
    }

    if let Ok(absolute) = Url::parse(resource) {
        return Ok(absolute);
    }

    let base = base.ok_or_else(|| {
        Error::InvalidRequest(format!(
            "'{}' is not an absolute URL and no base_url is configured",
            resource
        ))
    })?;
    base.join(resource)
        .map_err(|e| Error::InvalidRequest(format!("cannot resolve '{}': {}", resource, e)))
}

/// Reduce a name to a single safe path component
///
/// Returns `None` for names that would escape the target directory or are empty.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches('"');
    if last.is_empty() || last == "." || last == ".." || last.contains('\0') {
        return None;
    }
    Some(last.to_string())
}

/// Suggest a file name for a download
///
/// Tries the `Content-Disposition` header first (both `filename=` and the
/// RFC 5987 `filename*=` form), then the last URL path segment, then
/// [`FALLBACK_FILENAME`]. The extension is kept.
pub fn suggested_filename(response: Option<&ResponseInfo>, url: &Url) -> String {
    if let Some(name) = response
        .and_then(|r| r.header("content-disposition"))
        .and_then(filename_from_content_disposition)
    {
        return name;
    }

    filename_from_url(url).unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

fn filename_from_content_disposition(value: &str) -> Option<String> {
    // Format: attachment; filename="file.bin" or filename*=UTF-8''file%20name.bin
    let mut plain = None;
    for part in value.split(';') {
        let part = part.trim();
        if let Some(encoded) = part.strip_prefix("filename*=") {
            // charset'lang'encoded-filename
            let encoded = encoded.rsplit('\'').next().unwrap_or(encoded);
            if let Ok(decoded) = urlencoding::decode(encoded)
                && let Some(name) = sanitize_filename(&decoded)
            {
                // the extended form wins over the plain one
                return Some(name);
            }
        } else if let Some(name) = part.strip_prefix("filename=") {
            plain = sanitize_filename(name);
        }
    }
    plain
}

fn filename_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).ok()?;
    sanitize_filename(&decoded)
}
