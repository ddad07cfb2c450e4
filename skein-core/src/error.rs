//! The fabric-wide error taxonomy.
//!
//! Errors carry a numeric kind from a closed set, a category tag, and an
//! optional context of either a bare description or an
//! `(endpoint_info, description)` pair. Every error has a canonical [`Data`]
//! encoding — the vector `["error", kind, context]` — and the encoding
//! round-trips faithfully, so errors can travel over topics like any other
//! value.

use crate::data::{Data, EnumValue};
use crate::types::{EndpointId, EndpointInfo, NetworkInfo};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category tag namespacing the error kinds of this fabric.
pub const CATEGORY: &str = "skein";

/// Result type alias for fabric operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of error kinds.
///
/// Codes are stable: the numeric value of a kind is its position in this
/// declaration and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ErrorKind {
    /// The valid-but-empty error.
    None = 0,
    /// An error not covered by any other kind.
    Unspecified,
    /// A peer spoke an incompatible protocol version.
    PeerIncompatible,
    /// A peer sent an invalid handshake.
    PeerInvalid,
    /// A peer could not be reached.
    PeerUnavailable,
    /// A peer disconnected mid-handshake.
    PeerDisconnectDuringHandshake,
    /// A peer did not respond in time.
    PeerTimeout,
    /// A master for the store already exists.
    MasterExists,
    /// No master exists for the store.
    NoSuchMaster,
    /// The key is not in the store.
    NoSuchKey,
    /// The request deadline passed before a response arrived.
    RequestTimeout,
    /// An operation was applied to a value of an incompatible type.
    TypeClash,
    /// A value failed validation.
    InvalidData,
    /// The storage backend reported a failure.
    BackendFailure,
    /// A clone served data known to lag its master.
    StaleData,
    /// A file could not be opened.
    CannotOpenFile,
    /// A file could not be written.
    CannotWriteFile,
    /// A topic name failed validation.
    InvalidTopicKey,
    /// Input ended prematurely.
    EndOfFile,
    /// An unknown tag was encountered while decoding.
    InvalidTag,
    /// An unknown status code was encountered while decoding.
    InvalidStatus,
}

const KIND_NAMES: [(&str, ErrorKind); 21] = [
    ("none", ErrorKind::None),
    ("unspecified", ErrorKind::Unspecified),
    ("peer_incompatible", ErrorKind::PeerIncompatible),
    ("peer_invalid", ErrorKind::PeerInvalid),
    ("peer_unavailable", ErrorKind::PeerUnavailable),
    ("peer_disconnect_during_handshake", ErrorKind::PeerDisconnectDuringHandshake),
    ("peer_timeout", ErrorKind::PeerTimeout),
    ("master_exists", ErrorKind::MasterExists),
    ("no_such_master", ErrorKind::NoSuchMaster),
    ("no_such_key", ErrorKind::NoSuchKey),
    ("request_timeout", ErrorKind::RequestTimeout),
    ("type_clash", ErrorKind::TypeClash),
    ("invalid_data", ErrorKind::InvalidData),
    ("backend_failure", ErrorKind::BackendFailure),
    ("stale_data", ErrorKind::StaleData),
    ("cannot_open_file", ErrorKind::CannotOpenFile),
    ("cannot_write_file", ErrorKind::CannotWriteFile),
    ("invalid_topic_key", ErrorKind::InvalidTopicKey),
    ("end_of_file", ErrorKind::EndOfFile),
    ("invalid_tag", ErrorKind::InvalidTag),
    ("invalid_status", ErrorKind::InvalidStatus),
];

impl ErrorKind {
    /// The stable numeric code of this kind.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// The kind's wire name.
    pub fn name(self) -> &'static str {
        KIND_NAMES[self as usize].0
    }

    /// Resolve a wire name back to a kind.
    pub fn from_name(name: &str) -> Option<Self> {
        KIND_NAMES.iter().find(|(n, _)| *n == name).map(|(_, k)| *k)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Optional context attached to an [`Error`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorContext {
    /// A bare description.
    Message(String),
    /// Endpoint information plus a description.
    Endpoint(EndpointInfo, String),
}

/// An error of the fabric: a kind plus optional context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Error {
    kind: ErrorKind,
    context: Option<ErrorContext>,
}

impl Error {
    /// Create a context-free error of the given kind.
    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind, context: None }
    }

    /// Create an error with a description.
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, context: Some(ErrorContext::Message(message.into())) }
    }

    /// Create an error with endpoint information and a description.
    pub fn with_endpoint(
        kind: ErrorKind,
        info: EndpointInfo,
        message: impl Into<String>,
    ) -> Self {
        Self { kind, context: Some(ErrorContext::Endpoint(info, message.into())) }
    }

    /// The error's kind.
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The category tag namespacing the kind.
    pub const fn category(&self) -> &'static str {
        CATEGORY
    }

    /// Whether this represents an actual error (kind other than `none`).
    pub const fn is_set(&self) -> bool {
        !matches!(self.kind, ErrorKind::None)
    }

    /// The attached description, if any.
    pub fn message(&self) -> Option<&str> {
        match &self.context {
            Some(ErrorContext::Message(msg)) => Some(msg),
            Some(ErrorContext::Endpoint(_, msg)) => Some(msg),
            None => None,
        }
    }

    /// The attached endpoint information, if any.
    pub fn endpoint(&self) -> Option<&EndpointInfo> {
        match &self.context {
            Some(ErrorContext::Endpoint(info, _)) => Some(info),
            _ => None,
        }
    }

    /// Encode this error as its canonical `["error", kind, context]` vector.
    pub fn to_data(&self) -> Data {
        let context = match &self.context {
            None => Data::None,
            Some(ErrorContext::Message(msg)) => Data::Vector(vec![Data::from(msg.clone())]),
            Some(ErrorContext::Endpoint(info, msg)) => {
                Data::Vector(vec![info.to_data(), Data::from(msg.clone())])
            }
        };
        Data::Vector(vec![
            Data::from("error"),
            Data::Enum(EnumValue::new(self.kind.name())),
            context,
        ])
    }

    /// Decode an error from its canonical vector encoding.
    ///
    /// Returns `None` when the value is not error-shaped.
    pub fn from_data(src: &Data) -> Option<Self> {
        let view = ErrorView::over(src)?;
        let kind = view.kind()?;
        if kind == ErrorKind::None {
            return Some(Self::new(ErrorKind::None));
        }
        let context = match (view.endpoint_info(), view.message()) {
            (Some(info), Some(msg)) => Some(ErrorContext::Endpoint(info, msg.to_owned())),
            (None, Some(msg)) => Some(ErrorContext::Message(msg.to_owned())),
            _ => None,
        };
        Some(Self { kind, context })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            None => write!(f, "{}", self.kind),
            Some(ErrorContext::Message(msg)) => write!(f, "{}: {}", self.kind, msg),
            Some(ErrorContext::Endpoint(info, msg)) => {
                write!(f, "{} [{}]: {}", self.kind, info, msg)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Whether a value carries the canonical error encoding.
pub fn is_error_data(src: &Data) -> bool {
    ErrorView::over(src).is_some_and(|v| v.kind().is_some())
}

/// A read-only view over an error-shaped [`Data`] vector.
///
/// Allows inspecting kind, message, and endpoint context without decoding
/// the whole value.
#[derive(Debug, Clone, Copy)]
pub struct ErrorView<'a> {
    xs: &'a [Data],
}

impl<'a> ErrorView<'a> {
    /// Construct a view if `src` has the `["error", kind, context]` shape.
    pub fn over(src: &'a Data) -> Option<Self> {
        let Data::Vector(xs) = src else { return None };
        if xs.len() != 3 {
            return None;
        }
        if !matches!(&xs[0], Data::String(tag) if tag == "error") {
            return None;
        }
        if !matches!(&xs[1], Data::Enum(_)) {
            return None;
        }
        match &xs[2] {
            Data::None => {}
            Data::Vector(ctx) => match ctx.as_slice() {
                [Data::String(_)] => {}
                [Data::Vector(_), Data::String(_)] => {}
                _ => return None,
            },
            _ => return None,
        }
        Some(Self { xs: xs.as_slice() })
    }

    /// The encoded kind, if its name is known.
    pub fn kind(&self) -> Option<ErrorKind> {
        match &self.xs[1] {
            Data::Enum(tag) => ErrorKind::from_name(&tag.name),
            _ => None,
        }
    }

    /// The encoded description, if any.
    pub fn message(&self) -> Option<&'a str> {
        match &self.xs[2] {
            Data::Vector(ctx) => match ctx.as_slice() {
                [Data::String(msg)] => Some(msg),
                [_, Data::String(msg)] => Some(msg),
                _ => None,
            },
            _ => None,
        }
    }

    /// The encoded endpoint information, if any.
    pub fn endpoint_info(&self) -> Option<EndpointInfo> {
        match &self.xs[2] {
            Data::Vector(ctx) => match ctx.as_slice() {
                [info @ Data::Vector(_), Data::String(_)] => EndpointInfo::from_data(info),
                _ => None,
            },
            _ => None,
        }
    }
}

impl EndpointInfo {
    /// Encode as `[id_or_nil, network_or_nil]`.
    pub fn to_data(&self) -> Data {
        let id = match &self.id {
            Some(id) => Data::from(id.to_string()),
            None => Data::None,
        };
        let network = match &self.network {
            Some(net) => Data::Vector(vec![
                Data::from(net.address.clone()),
                Data::Count(u64::from(net.port)),
            ]),
            None => Data::None,
        };
        Data::Vector(vec![id, network])
    }

    /// Decode from the `[id_or_nil, network_or_nil]` encoding.
    pub fn from_data(src: &Data) -> Option<Self> {
        let Data::Vector(xs) = src else { return None };
        if xs.len() != 2 {
            return None;
        }
        let id = match &xs[0] {
            Data::None => None,
            Data::String(text) => Some(EndpointId::from_uuid(text.parse().ok()?)),
            _ => return None,
        };
        let network = match &xs[1] {
            Data::None => None,
            Data::Vector(net) => match net.as_slice() {
                [Data::String(address), Data::Count(port)] => Some(NetworkInfo {
                    address: address.clone(),
                    port: u16::try_from(*port).ok()?,
                }),
                _ => return None,
            },
            _ => return None,
        };
        Some(Self { id, network })
    }
}
