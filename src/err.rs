use std::io;

use thiserror::Error;

use crate::locator::LocationData;

pub type Result<T> = std::result::Result<T, SaxError>;

/// Errors raised while encoding, decoding or persisting a tape.
#[derive(Debug, Error)]
pub enum TapeError {
    #[error("event {index}: `{value:#04x}` is not a valid event tag")]
    InvalidEventTag { value: u8, index: usize },

    #[error("tape section `{section}` is corrupt: {message}")]
    CorruptSection {
        section: &'static str,
        message: String,
    },

    #[error("tape section `{section}` holds {len} entries, more than the serialized form can carry")]
    SectionTooLarge { section: &'static str, len: usize },

    #[error("failed to grow a tape buffer by {additional} entries")]
    Allocation { additional: usize },

    #[error("string data in the tape is not valid UTF-8: {source}")]
    InvalidUtf8 {
        #[from]
        source: std::string::FromUtf8Error,
    },

    #[error("an I/O error has occurred: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl TapeError {
    pub(crate) fn corrupt(section: &'static str, message: impl Into<String>) -> Self {
        TapeError::CorruptSection {
            section,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SaxError {
    /// An error annotated with the source position of the event that was
    /// being processed when it was raised.
    #[error("{location}: {source}")]
    Located {
        location: LocationData,
        source: Box<SaxError>,
    },

    #[error("no handler is registered under id `{id}`")]
    UnknownHandler { id: String },

    #[error("`{operation}` called while no handler body is being processed")]
    NoActiveBody { operation: &'static str },

    #[error(transparent)]
    Tape(#[from] TapeError),

    /// Raised by the inspecting wrapper only; the core assumes well-formed
    /// input and never produces this itself.
    #[error("malformed event stream: {message}")]
    MalformedStream { message: String },

    #[error("failed to parse XML: {source}")]
    XmlParse {
        #[from]
        source: quick_xml::Error,
    },

    #[error("failed to parse XML attributes: {source}")]
    XmlAttr {
        #[from]
        source: quick_xml::events::attributes::AttrError,
    },

    #[error("failed to unescape XML text: {message}")]
    Unescape { message: String },

    #[error("markup is not valid UTF-8: {source}")]
    Utf8 {
        #[from]
        source: std::str::Utf8Error,
    },

    #[error("an I/O error has occurred: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Misc errors.
    #[error("{detail}")]
    Any { detail: String },
}

impl SaxError {
    /// Wraps the error with a source location, unless it already carries one.
    pub fn at(self, location: LocationData) -> SaxError {
        match self {
            located @ SaxError::Located { .. } => located,
            other => SaxError::Located {
                location,
                source: Box::new(other),
            },
        }
    }

    /// The location this error was wrapped with, if any.
    pub fn location(&self) -> Option<&LocationData> {
        match self {
            SaxError::Located { location, .. } => Some(location),
            _ => None,
        }
    }
}

/// Generic error handler for quick prototyping, inspired by anyhow's macro of
/// the same name. Expands to an `Err` value.
#[macro_export]
macro_rules! format_err {
   ($($arg:tt)*) => { Err($crate::err::SaxError::Any { detail: format!($($arg)*) }) }
}
