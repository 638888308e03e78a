//! Request classification.

use strum::Display;

use super::messages::GetworkRequest;

/// What a getwork request is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum RequestKind {
    /// Return the session's current work.
    WorkFetch,
    /// Forward solved work to the backend.
    Submission,
    /// Wait for the next work update.
    LongPoll,
}

/// Classify a request.
///
/// Submitted data wins over the URI: a request carrying non-empty data is a
/// submission even on the long-poll path.
pub fn classify(path: &str, request: &GetworkRequest, long_poll_path: &str) -> RequestKind {
    if request.submitted_data().is_some() {
        RequestKind::Submission
    } else if path == long_poll_path {
        RequestKind::LongPoll
    } else {
        RequestKind::WorkFetch
    }
}
