use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::message::ArgError;

/// Failure to turn bytes into a packet, or a packet into bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("invalid bundle tag: {0}")]
    InvalidBundleTag(String),
}

/// Misuse of the batch compiler. The compiler state is left untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("no recording session is active")]
    NoActiveSession,
    #[error("recording session for {0} is still open")]
    SessionAlreadyOpen(String),
    #[error("invalid session header: {0}")]
    InvalidSessionHeader(String),
    #[error("{0} cannot be recorded")]
    UnsupportedEventType(String),
}

/// Errors raised by the synth, sample and score collaborators.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Hound(#[from] hound::Error),
    #[error("sample {} has no frames", .0.display())]
    EmptySample(PathBuf),
    #[error("failed to serialise score: {0}")]
    Score(#[from] serde_json::Error),
    #[error("language host did not confirm the render of {name} within {waited:?}")]
    RenderTimeout { name: String, waited: Duration },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("no handler for address {0}")]
    UnknownAddress(String),
    #[error("invalid arguments for {address}: {reason}")]
    InvalidArguments { address: String, reason: String },
    #[error("no sample {index} in pack {pack:?}")]
    UnknownSample { pack: String, index: i32 },
}

impl DispatchError {
    pub fn invalid_arguments(address: impl Into<String>, reason: impl ToString) -> Self {
        DispatchError::InvalidArguments {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn from_args(address: &str, err: ArgError) -> Self {
        Self::invalid_arguments(address, err)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Codec(CodecError::MalformedEncoding(_)) => ErrorKind::MalformedEncoding,
            DispatchError::Classify(ClassifyError::InvalidBundleTag(_)) => {
                ErrorKind::InvalidBundleTag
            }
            DispatchError::Session(SessionError::NoActiveSession) => ErrorKind::NoActiveSession,
            DispatchError::Session(SessionError::SessionAlreadyOpen(_)) => {
                ErrorKind::SessionAlreadyOpen
            }
            DispatchError::Session(SessionError::InvalidSessionHeader(_)) => {
                ErrorKind::InvalidSessionHeader
            }
            DispatchError::Session(SessionError::UnsupportedEventType(_)) => {
                ErrorKind::UnsupportedEventType
            }
            DispatchError::Backend(_) => ErrorKind::Backend,
            DispatchError::UnknownAddress(_) => ErrorKind::UnknownAddress,
            DispatchError::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            DispatchError::UnknownSample { .. } => ErrorKind::UnknownSample,
        }
    }
}

/// Stable classification of a [`DispatchError`] for reports and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    MalformedEncoding,
    InvalidBundleTag,
    UnknownAddress,
    InvalidArguments,
    NoActiveSession,
    SessionAlreadyOpen,
    InvalidSessionHeader,
    UnsupportedEventType,
    UnknownSample,
    Backend,
}

pub type DispatchResult<T> = Result<T, DispatchError>;
