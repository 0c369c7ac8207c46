use thiserror::Error;

/// Terminal failure delivered to every waiter of a load.
///
/// Cache-tier misses never show up here; only the network tier and input
/// validation produce these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection-level failure, or a transfer that ended without a result.
    #[error("Network error: {0}")]
    Network(String),

    /// Status outside `200..=299`.
    #[error("Server error: HTTP {0}")]
    HttpStatus(u16),

    /// The response had no body.
    #[error("No image data received")]
    NoData,

    /// The body was zero bytes.
    #[error("Received empty data")]
    EmptyPayload,

    /// The body did not decode as an image.
    #[error("Unable to create image from received data: {0}")]
    InvalidImageData(String),

    /// Rejected before any I/O.
    #[error("Invalid resource id: {0}")]
    InvalidResourceId(String),

    /// Only produced by [`crate::ImageLoader::load_async`] when the request
    /// was cancelled before it resolved.
    #[error("Request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether this is exactly `HttpStatus(code)`.
    pub fn is_http_status(&self, code: u16) -> bool {
        matches!(self, FetchError::HttpStatus(c) if *c == code)
    }
}

/// What every load callback receives.
pub type FetchResult = std::result::Result<crate::CachedImage, FetchError>;

/// Setup failures for the loader and its collaborators.
#[derive(Error, Debug)]
pub enum LumenError {
    /// Filesystem failure while preparing the cache.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The reqwest client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Constructed outside a Tokio runtime.
    #[error("No Tokio runtime available; construct the loader inside a runtime")]
    NoRuntime,
}

/// Result of fallible setup.
pub type Result<T> = std::result::Result<T, LumenError>;
