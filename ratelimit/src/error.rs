use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    result::Result as StdResult,
};

/// A result enum with the error type being the limiter's [`Error`] type.
pub type Result<T, E = Error> = StdResult<T, E>;

/// An error that occurred while acquiring a rate limit slot or executing a
/// rate-limited request.
#[derive(Debug)]
pub struct Error {
    pub(crate) source: Option<Box<dyn StdError + Send + Sync>>,
    pub(crate) kind: ErrorType,
}

impl Error {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &ErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn StdError + Send + Sync>> {
        self.source
    }

    /// Consume the error, returning the owned error type and the source error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (ErrorType, Option<Box<dyn StdError + Send + Sync>>) {
        (self.kind, self.source)
    }

    pub(crate) fn rate_limit_exhausted(route: impl Into<String>) -> Self {
        Self { kind: ErrorType::RateLimitExhausted { route: route.into() }, source: None }
    }

    pub(crate) fn transport(source: impl StdError + Send + Sync + 'static) -> Self {
        Self { kind: ErrorType::Transport, source: Some(Box::new(source)) }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ErrorType::RateLimitExhausted { route } => {
                write!(f, "exhausted retries after repeated 429s for route '{route}'")
            }
            ErrorType::Transport => f.write_str("the underlying request failed"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|source| &**source as &(dyn StdError + 'static))
    }
}

/// Type of [`Error`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorType {
    /// A request kept receiving 429 responses past the retry budget (5
    /// attempts).
    RateLimitExhausted {
        /// Route that exhausted its retries.
        route: String,
    },
    /// The caller-supplied request future itself failed; this is not a
    /// ratelimiting failure.
    Transport,
}
