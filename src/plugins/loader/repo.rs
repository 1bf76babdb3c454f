//! Repository reference handling

use crate::plugins::error::{PluginError, PluginResult};
use once_cell::sync::Lazy;
use regex::Regex;

static SHORTHAND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*/[A-Za-z0-9_.-]+$").expect("valid shorthand regex")
});

/// `git@host:owner/name(.git)`
static SCP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+@[A-Za-z0-9_.-]+:[A-Za-z0-9_./-]+$").expect("valid scp regex")
});

static COMMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{7,40}$").expect("valid commit regex"));

const URL_SCHEMES: [&str; 4] = ["https", "http", "ssh", "git"];

/// Turn `owner/name` or a full URL into something `git clone` accepts
pub fn normalize_repository(raw: &str, default_host: &str) -> PluginResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PluginError::InvalidRepository(raw.to_string()));
    }

    if SHORTHAND_RE.is_match(trimmed) && !trimmed.contains("..") {
        return Ok(format!(
            "{}/{}",
            default_host.trim_end_matches('/'),
            trimmed
        ));
    }

    if SCP_RE.is_match(trimmed) {
        return Ok(trimmed.to_string());
    }

    match url::Url::parse(trimmed) {
        Ok(url)
            if URL_SCHEMES.contains(&url.scheme())
                && url.host_str().is_some()
                && url.path().trim_matches('/').contains('/') =>
        {
            Ok(trimmed.to_string())
        }
        _ => Err(PluginError::InvalidRepository(raw.to_string())),
    }
}

/// Whether a clone ref looks like a commit rather than a branch or tag
pub fn is_commit_ref(git_ref: &str) -> bool {
    COMMIT_RE.is_match(git_ref)
}

/// Directory name for a clone: host, owner and name joined by `__`
pub fn checkout_dir_name(url: &str) -> String {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let without_user = without_scheme
        .split_once('@')
        .map_or(without_scheme, |(_, rest)| rest);
    let path = without_user.replace(':', "/");
    let path = path.trim_end_matches('/').trim_end_matches(".git");

    let segments: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty() && segment.chars().any(|c| c != '.'))
        .map(sanitize_segment)
        .collect();
    if segments.is_empty() {
        "plugin".to_string()
    } else {
        segments.join("__")
    }
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
