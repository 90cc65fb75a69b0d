use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    result::Result as StdResult,
};

pub type Result<T, E = Error> = StdResult<T, E>;

/// Error type representing the possible reasons for errors to occur while
/// running a shard's gateway session or the [`ShardManager`] that owns it.
///
/// [`ShardManager`]: crate::manager::ShardManager
#[derive(Debug)]
pub struct Error {
    source: Option<Box<dyn StdError + Send + Sync>>,
    kind: ErrorType,
}

impl Error {
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &ErrorType {
        &self.kind
    }

    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn StdError + Send + Sync>> {
        self.source
    }

    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (ErrorType, Option<Box<dyn StdError + Send + Sync>>) {
        (self.kind, self.source)
    }

    pub(crate) fn already_running(id: u32) -> Self {
        Self { kind: ErrorType::AlreadyRunning { id }, source: None }
    }

    pub(crate) fn authentication(close_code: u16) -> Self {
        Self { kind: ErrorType::Authentication { close_code }, source: None }
    }

    pub(crate) fn connecting(source: impl StdError + Send + Sync + 'static) -> Self {
        Self { kind: ErrorType::Connecting, source: Some(Box::new(source)) }
    }

    pub(crate) fn invalid_url(url: impl Into<String>) -> Self {
        Self { kind: ErrorType::InvalidUrl { url: url.into() }, source: None }
    }

    pub(crate) fn sending_payload(source: impl StdError + Send + Sync + 'static) -> Self {
        Self { kind: ErrorType::SendingPayload, source: Some(Box::new(source)) }
    }

    pub(crate) fn serializing(source: serde_json::Error) -> Self {
        Self { kind: ErrorType::Serializing, source: Some(Box::new(source)) }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ErrorType::AlreadyRunning { id } => write!(f, "shard {id} is already running"),
            ErrorType::Authentication { close_code } => {
                write!(f, "gateway closed the connection with code {close_code} (authentication failure)")
            }
            ErrorType::Connecting => f.write_str("failed to establish the websocket connection"),
            ErrorType::InvalidUrl { url } => write!(f, "'{url}' is not a valid gateway url"),
            ErrorType::SendingPayload => f.write_str("failed to send a payload over the websocket"),
            ErrorType::Serializing => f.write_str("failed to serialize a payload to json"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|source| &**source as &(dyn StdError + 'static))
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorType {
    /// [`ShardManager::start`] was called with an id that already has a
    /// running runner.
    ///
    /// [`ShardManager::start`]: crate::manager::ShardManager::start
    AlreadyRunning { id: u32 },
    /// The gateway closed the connection with close code 4004 (Authentication
    /// failed, typically an invalid or revoked token). Fatal: the session
    /// stops instead of reconnecting.
    Authentication { close_code: u16 },
    /// The websocket handshake with the gateway failed.
    Connecting,
    /// The configured gateway URL could not be parsed.
    InvalidUrl { url: String },
    /// Sending a frame over the websocket failed; the connection is assumed
    /// dead and a reconnect will be scheduled.
    SendingPayload,
    /// A payload could not be serialized to JSON.
    Serializing,
}
