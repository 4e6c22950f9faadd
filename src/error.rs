use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single renderer call.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer unreachable for {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("renderer returned status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("render of {url} timed out after {millis}ms")]
    Timeout { url: String, millis: u128 },
}

/// Failure of a single asset download. The destination file state is undefined
/// after any of these.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("GET {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("malformed url {url}: {reason}")]
    MalformedUrl { url: String, reason: String },

    #[error("invalid page range: first page {first} is after last page {last}")]
    InvalidRange { first: u32, last: u32 },

    #[error("invalid catalog id {0:?}: must be a single non-empty path segment")]
    InvalidCatalogId(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("no image found on {url}")]
    NoImageFound { url: String },

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("acquisition deadline exceeded before this step started")]
    DeadlineExceeded,

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AcquireError {
    pub fn malformed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Page-local errors omit a page; everything else aborts the run.
    pub fn is_page_local(&self) -> bool {
        matches!(
            self,
            Self::Render(_) | Self::NoImageFound { .. } | Self::Download(_) | Self::DeadlineExceeded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_local_errors_are_distinguished_from_fatal_ones() {
        let render = AcquireError::from(RenderError::Timeout {
            url: "https://example.com/page/1".to_string(),
            millis: 10,
        });
        assert!(render.is_page_local());
        assert!(
            AcquireError::NoImageFound {
                url: "https://example.com".to_string()
            }
            .is_page_local()
        );
        assert!(!AcquireError::malformed("https://example.com", "missing marker").is_page_local());
        assert!(!AcquireError::InvalidRange { first: 5, last: 1 }.is_page_local());
    }

    #[test]
    fn download_status_error_names_url_and_status() {
        let err = DownloadError::Status {
            url: "https://cdn.example.com/a.jpg".to_string(),
            status: 404,
        };
        let msg = err.to_string();
        assert!(msg.contains("404"));
        assert!(msg.contains("https://cdn.example.com/a.jpg"));
    }
}
