//! Codec for the Action Message Format (AMF) wire dialects AMF0 and AMF3.
//!
//! Both dialects share one dynamically typed [`Value`] model and a
//! pluggable [`ClassMapper`] that resolves wire class names to host
//! records. Decoded container values are shared nodes, so back-references
//! in a stream resolve to the same node — including values that contain
//! themselves.
//!
//! ```
//! use amf_codec::{Value, Version, number};
//!
//! let bytes = number(1.23f64).write_as(Version::Amf0).unwrap();
//! let decoded = Value::read_from(&bytes, Version::Amf0).unwrap();
//! assert_eq!(decoded, number(1.23f64));
//! ```
//!
//! # References
//! - [AMF0 Specification](https://rtmp.veriskope.com/pdf/amf0-file-format-specification.pdf)
//! - [AMF3 Specification](https://rtmp.veriskope.com/pdf/amf3-file-format-spec.pdf)

pub mod amf0;
pub mod amf3;
pub mod cursor;
pub mod errors;
pub mod mapper;

mod cache;
mod value;

pub use self::errors::{AmfError, AmfResult, Dialect, RefTableKind};
pub use self::mapper::{ClassMapper, DefaultClassMapper, OPT_TRANSLATE_CASE};
pub use self::value::{
    MixedArray, Record, Shared, Traits, Value, Version, array, mapping, number, shared, string,
};
