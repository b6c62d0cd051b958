//! Error types and result definitions for shuffle push operations.
//!
//! [`ShuffleError`] carries a classified [`ErrorKind`], a static description, optional dynamic
//! detail, an optional source error and the call site that created it. Retry decisions are taken
//! from the kinds found along the error's source chain, never from message text.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for shuffle operations using [`ShuffleError`] as the error type.
pub type ShuffleResult<T> = Result<T, ShuffleError>;

/// Detailed payload stored for each [`ShuffleError`].
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for shuffle push operations.
///
/// The error is cheap to clone so that a task's first recorded failure can be handed to every
/// caller that later consults it.
#[derive(Debug, Clone)]
pub struct ShuffleError {
    payload: Box<ErrorPayload>,
}

/// Categories of errors raised by the push client.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Transport Errors
    ConnectionFailed,
    RpcTimeout,
    IoError,
    TransportClosed,

    // Protocol Errors
    ProtocolError,
    ReviveFailed,

    // Push Errors
    PushDataFailed,
    RpcFailed,
    InFlightLimitTimeout,

    // Data & Configuration Errors
    InvalidData,
    ConfigError,

    // Lifecycle Errors
    Cancelled,

    // Unknown / Uncategorized
    Unknown,
}

impl ErrorKind {
    /// Returns `true` for transient transport failures that the retry executor may retry.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionFailed
                | ErrorKind::RpcTimeout
                | ErrorKind::IoError
                | ErrorKind::TransportClosed
        )
    }

    /// Returns `true` for failures that were already settled and must not be retried, whatever
    /// caused them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ErrorKind::PushDataFailed
                | ErrorKind::RpcFailed
                | ErrorKind::ReviveFailed
                | ErrorKind::Cancelled
        )
    }

    /// Returns `true` for kinds that already belong to the I/O failure class surfaced to callers.
    pub fn is_io(self) -> bool {
        self.is_retryable()
            || matches!(
                self,
                ErrorKind::PushDataFailed | ErrorKind::RpcFailed | ErrorKind::InFlightLimitTimeout
            )
    }
}

impl ShuffleError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.payload.kind
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        &self.payload.description
    }

    /// Returns the dynamic detail of this error, if any.
    pub fn detail(&self) -> Option<&str> {
        self.payload.detail.as_deref()
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> &Backtrace {
        self.payload.backtrace.as_ref()
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.payload.location
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.payload.source = Some(Arc::new(source));
        self
    }

    /// Returns `true` if this error or any error in its source chain is a transient failure.
    ///
    /// A [`ShuffleError`] counts when its kind is retryable; foreign errors count when they are
    /// [`std::io::Error`] or a tokio timeout. The walk stops at the first terminal kind, so a
    /// recorded push failure stays final even when a timeout caused it.
    pub fn is_retryable(&self) -> bool {
        for err in self.chain() {
            match err.downcast_ref::<ShuffleError>() {
                Some(shuffle_error) if shuffle_error.kind().is_terminal() => return false,
                Some(shuffle_error) if shuffle_error.kind().is_retryable() => return true,
                Some(_) => {}
                None => {
                    if err.is::<std::io::Error>() || err.is::<tokio::time::error::Elapsed>() {
                        return true;
                    }
                }
            }
        }

        false
    }

    /// Returns `true` if this error or any [`ShuffleError`] in its source chain has `kind`.
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.chain().any(|err| {
            err.downcast_ref::<ShuffleError>()
                .is_some_and(|shuffle_error| shuffle_error.kind() == kind)
        })
    }

    /// Iterates over this error followed by its transitive sources.
    fn chain(&self) -> impl Iterator<Item = &(dyn error::Error + 'static)> {
        let mut next: Option<&(dyn error::Error + 'static)> = Some(self);

        std::iter::from_fn(move || {
            let current = next?;
            next = current.source();
            Some(current)
        })
    }

    /// Creates a [`ShuffleError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        ShuffleError {
            payload: Box::new(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for ShuffleError {
    fn eq(&self, other: &ShuffleError) -> bool {
        self.kind() == other.kind()
    }
}

impl fmt::Display for ShuffleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let payload = &self.payload;
        let location = payload.location;
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            payload.kind,
            payload.description,
            location.file(),
            location.line(),
            location.column()
        )?;

        if let Some(detail) = payload.detail.as_deref() {
            write!(f, "\n  Detail:")?;
            for line in detail.lines() {
                write!(f, "\n    {line}")?;
            }
        }

        if payload.backtrace.status() == BacktraceStatus::Captured {
            write!(f, "\n  Backtrace:")?;
            for line in payload.backtrace.to_string().lines() {
                write!(f, "\n    {line}")?;
            }
        }

        Ok(())
    }
}

impl error::Error for ShuffleError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.payload
            .source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn error::Error + 'static))
    }
}

/// Creates a [`ShuffleError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for ShuffleError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> ShuffleError {
        ShuffleError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`ShuffleError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for ShuffleError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> ShuffleError {
        ShuffleError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Converts [`std::io::Error`] to [`ShuffleError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for ShuffleError {
    #[track_caller]
    fn from(err: std::io::Error) -> ShuffleError {
        let detail = err.to_string();
        ShuffleError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts an elapsed tokio timeout to [`ShuffleError`] with [`ErrorKind::RpcTimeout`].
impl From<tokio::time::error::Elapsed> for ShuffleError {
    #[track_caller]
    fn from(err: tokio::time::error::Elapsed) -> ShuffleError {
        ShuffleError::from_components(
            ErrorKind::RpcTimeout,
            Cow::Borrowed("RPC timed out"),
            None,
            Some(Arc::new(err)),
        )
    }
}

/// Converts a configuration [`config::shared::ValidationError`] to [`ErrorKind::ConfigError`].
impl From<config::shared::ValidationError> for ShuffleError {
    #[track_caller]
    fn from(err: config::shared::ValidationError) -> ShuffleError {
        let detail = err.to_string();
        ShuffleError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Invalid shuffle client configuration"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
