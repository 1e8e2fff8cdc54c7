//! Push URL rules.
//!
//! A push URL is both the tart's primary key and the relative location of
//! its deployment directory and bare repository, so it must be rooted and
//! must not escape the directories it is joined onto.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushUrlError {
    #[error("pushURLs must start with a '/' character.")]
    MissingLeadingSlash,

    #[error("pushURL must name something after the leading '/'.")]
    Empty,

    #[error("pushURL may not contain '.' or '..' segments.")]
    Traversal,

    #[error("pushURL may not end with '/' or contain empty segments.")]
    EmptySegment,
}

/// Check that `url` is usable as a push URL.
pub fn validate_push_url(url: &str) -> Result<(), PushUrlError> {
    let Some(rest) = url.strip_prefix('/') else {
        return Err(PushUrlError::MissingLeadingSlash);
    };
    if rest.trim_matches('/').is_empty() {
        return Err(PushUrlError::Empty);
    }
    for segment in rest.split('/') {
        match segment {
            "" => return Err(PushUrlError::EmptySegment),
            "." | ".." => return Err(PushUrlError::Traversal),
            _ => {}
        }
    }
    Ok(())
}

/// The push URL without its leading slash, for joining onto a base directory.
pub fn relative_path(url: &str) -> &str {
    url.trim_start_matches('/')
}

/// A flat file-name form of the push URL (`/team/blog` → `team%2Fblog`).
///
/// `%` is escaped too, so distinct push URLs never share a name.
pub fn flat_name(url: &str) -> String {
    relative_path(url).replace('%', "%25").replace('/', "%2F")
}
