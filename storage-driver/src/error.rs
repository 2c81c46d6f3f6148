use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use camino::Utf8Path;
use tracing_error::SpanTrace;

/// What went wrong, independent of which driver reported it.
///
/// Callers branch on this instead of error text. The registry relies on
/// [`StorageErrorKind::NotFound`] to tell a missing blob or upload from a
/// broken backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// No object or bucket at the requested location.
    NotFound,

    /// The backend refused access.
    PermissionDenied,

    /// Disk or transport failure. May be transient.
    Io,

    /// The request could not be expressed to the backend, e.g. a path that
    /// escapes the bucket.
    InvalidRequest,

    /// Anything else, such as a panicked blocking task.
    Other,
}

impl StorageErrorKind {
    /// Whether repeating the operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageErrorKind::Io)
    }
}

impl From<std::io::ErrorKind> for StorageErrorKind {
    fn from(kind: std::io::ErrorKind) -> Self {
        match kind {
            std::io::ErrorKind::NotFound => StorageErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            std::io::ErrorKind::InvalidInput => StorageErrorKind::InvalidRequest,
            _ => StorageErrorKind::Io,
        }
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StorageErrorKind::NotFound => "not found",
            StorageErrorKind::PermissionDenied => "permission denied",
            StorageErrorKind::Io => "I/O error",
            StorageErrorKind::InvalidRequest => "invalid request",
            StorageErrorKind::Other => "other error",
        };
        f.write_str(text)
    }
}

#[derive(Debug)]
struct ErrorTrace {
    // Only populated when RUST_BACKTRACE is set.
    backtrace: Backtrace,
    span_trace: SpanTrace,
}

impl ErrorTrace {
    #[track_caller]
    fn capture() -> Self {
        ErrorTrace {
            backtrace: Backtrace::capture(),
            span_trace: SpanTrace::capture(),
        }
    }
}

/// A failed storage operation.
///
/// Carries the [`StorageErrorKind`], the driver that failed, where it was
/// looking, and the span trace at the point of failure, so an error surfacing
/// from a registry handler still shows which upload or blob it was about.
///
/// ```rust
/// use storage_driver::{StorageError, StorageErrorKind};
///
/// let error = StorageError::builder(
///     "local",
///     StorageErrorKind::NotFound,
///     std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
/// )
/// .bucket("registry")
/// .path("_uploads/4b1d/data")
/// .context("append upload chunk")
/// .build();
///
/// assert!(error.is_not_found());
/// assert_eq!(error.path(), Some("_uploads/4b1d/data"));
/// ```
#[derive(Debug)]
pub struct StorageError {
    kind: StorageErrorKind,
    engine: &'static str,
    bucket: Option<String>,
    path: Option<String>,
    context: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
    traces: Box<ErrorTrace>,
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl StorageError {
    /// An error with no location attached.
    pub fn new<E>(engine: &'static str, kind: StorageErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::builder(engine, kind, error).build()
    }

    /// Start an error, adding location and context before [`build`](StorageErrorBuilder::build).
    pub fn builder<E>(engine: &'static str, kind: StorageErrorKind, error: E) -> StorageErrorBuilder
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        StorageErrorBuilder {
            engine,
            kind,
            source: error.into(),
            bucket: None,
            path: None,
            context: None,
        }
    }

    /// Wrap an I/O error, classified by its [`std::io::ErrorKind`].
    pub fn from_io(engine: &'static str, error: std::io::Error) -> Self {
        Self::new(engine, error.kind().into(), error)
    }

    /// Nothing stored at `remote` in `bucket`.
    pub fn not_found(engine: &'static str, bucket: &str, remote: &Utf8Path) -> Self {
        StorageError::builder(
            engine,
            StorageErrorKind::NotFound,
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("no object at {remote}")),
        )
        .bucket(bucket)
        .path(remote.as_str())
        .build()
    }

    /// Semantic category.
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// Name of the driver that failed.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// Bucket the operation addressed.
    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// Object path the operation addressed.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Free-form description of the operation.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Whether the object or bucket does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind == StorageErrorKind::NotFound
    }

    /// Whether repeating the operation could succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Backtrace captured when the error was built.
    pub fn backtrace(&self) -> &Backtrace {
        &self.traces.backtrace
    }

    /// Tracing spans active when the error was built.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.traces.span_trace
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} storage: {}", self.engine, self.kind)?;
        if let Some(bucket) = &self.bucket {
            write!(f, " in bucket {bucket}")?;
        }
        if let Some(path) = &self.path {
            write!(f, " at {path}")?;
        }
        if let Some(context) = &self.context {
            write!(f, " ({context})")?;
        }
        write!(f, ": {}", self.source)
    }
}

/// Adds location and context to a [`StorageError`].
#[derive(Debug)]
pub struct StorageErrorBuilder {
    kind: StorageErrorKind,
    engine: &'static str,
    source: Box<dyn StdError + Send + Sync + 'static>,
    bucket: Option<String>,
    path: Option<String>,
    context: Option<String>,
}

impl StorageErrorBuilder {
    /// Bucket the operation addressed.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Object path the operation addressed.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Describe the operation.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Finish the error, capturing traces here.
    #[track_caller]
    pub fn build(self) -> StorageError {
        StorageError {
            kind: self.kind,
            engine: self.engine,
            bucket: self.bucket,
            path: self.path,
            context: self.context,
            source: self.source,
            traces: Box::new(ErrorTrace::capture()),
        }
    }
}
