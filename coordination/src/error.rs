use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    result::Result as StdResult,
};

pub type Result<T, E = Error> = StdResult<T, E>;

/// Error type for the coordination protocol: peer calls, registry
/// mutations, and role-mismatch guards.
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

    pub(crate) fn peer_unreachable(process_id: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self { kind: ErrorType::PeerUnreachable { process_id: process_id.into() }, source: Some(Box::new(source)) }
    }

    pub(crate) fn malformed_response(process_id: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self { kind: ErrorType::MalformedResponse { process_id: process_id.into() }, source: Some(Box::new(source)) }
    }

    pub(crate) fn role_mismatch(expected: impl Into<String>) -> Self {
        Self { kind: ErrorType::RoleMismatch { expected: expected.into() }, source: None }
    }

    pub(crate) fn unknown_peer(process_id: impl Into<String>) -> Self {
        Self { kind: ErrorType::UnknownPeer { process_id: process_id.into() }, source: None }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ErrorType::PeerUnreachable { process_id } => write!(f, "peer '{process_id}' is unreachable"),
            ErrorType::MalformedResponse { process_id } => write!(f, "peer '{process_id}' sent a malformed response"),
            ErrorType::RoleMismatch { expected } => write!(f, "this node is not currently acting as {expected}"),
            ErrorType::UnknownPeer { process_id } => write!(f, "no peer registered with id '{process_id}'"),
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
    /// An HTTP call to a peer failed at the transport level.
    PeerUnreachable { process_id: String },
    /// A peer's response body didn't match the expected wire type.
    MalformedResponse { process_id: String },
    /// An operation requires a role (coordinator/temporary coordinator/
    /// original coordinator) this node doesn't currently hold.
    RoleMismatch { expected: String },
    /// Referenced a `process_id` the registry has no entry for.
    UnknownPeer { process_id: String },
}
