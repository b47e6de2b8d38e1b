use std::{fmt, string};

use thiserror::Error;

/// Wire dialect a stream error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Amf0,
    Amf3,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Amf0 => f.write_str("AMF0"),
            Dialect::Amf3 => f.write_str("AMF3"),
        }
    }
}

/// Which per-session reference table an index pointed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTableKind {
    Objects,
    Strings,
    Traits,
}

impl fmt::Display for RefTableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefTableKind::Objects => f.write_str("object"),
            RefTableKind::Strings => f.write_str("string"),
            RefTableKind::Traits => f.write_str("trait"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AmfError {
    #[error("reading {needed} bytes at offset {position} is beyond end of source")]
    UnexpectedEnd { position: usize, needed: usize },
    #[error("unknown {dialect} marker {marker:#04x} at offset {position}")]
    BadMarker {
        dialect: Dialect,
        marker: u8,
        position: usize,
    },
    #[error("{table} reference index {index} beyond end, table holds {size} entries")]
    BadReference {
        table: RefTableKind,
        index: usize,
        size: usize,
    },
    #[error("value {value} does not fit in a u29")]
    BadU29 { value: u64 },
    #[error("invalid utf8 data at offset {position}: {source}")]
    InvalidUtf8 {
        position: usize,
        #[source]
        source: string::FromUtf8Error,
    },
    #[error("value {value} out of range for a u{width} wire field")]
    IntegerOutOfRange { value: u64, width: u8 },
    #[error("reference index {index} exceeds the AMF0 u16 limit")]
    ReferenceIndexOverflow { index: usize },
    #[error("stream of {size} bytes would exceed MAX_STREAM_LENGTH")]
    StreamTooLarge { size: usize },
    #[error("class mapper rejected class name: {name}")]
    UnknownClass { name: String },
    #[error("externalizable handling failed for {name}: {reason}")]
    Externalizable { name: String, reason: String },
}

pub type AmfResult<T> = Result<T, AmfError>;
