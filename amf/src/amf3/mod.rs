//! AMF3 tagged value codec.
//!
//! @see: [Action Message Format -- AMF 3](https://rtmp.veriskope.com/pdf/amf3-file-format-spec.pdf)

mod reader;
mod writer;

pub use self::reader::Reader;
pub use self::writer::Writer;

use crate::errors::AmfResult;
use crate::mapper::{ClassMapper, DEFAULT_MAPPER};
use crate::value::Value;

/// @see: 3.1 Overview
pub(crate) mod amf3_marker {
    pub const UNDEFINED: u8 = 0x00;
    pub const NULL: u8 = 0x01;
    pub const FALSE: u8 = 0x02;
    pub const TRUE: u8 = 0x03;
    pub const INTEGER: u8 = 0x04;
    pub const DOUBLE: u8 = 0x05;
    pub const STRING: u8 = 0x06;
    pub const XML_DOCUMENT: u8 = 0x07;
    pub const DATE: u8 = 0x08;
    pub const ARRAY: u8 = 0x09;
    pub const OBJECT: u8 = 0x0A;
    pub const XML: u8 = 0x0B;
    pub const BYTE_ARRAY: u8 = 0x0C;
    pub const DICTIONARY: u8 = 0x11;
}

/// Smallest value of the I29 wire integer.
pub const MIN_INTEGER: i32 = -(1 << 28);
/// Largest value of the I29 wire integer.
pub const MAX_INTEGER: i32 = (1 << 28) - 1;

/// Wrapper class that is decoded transparently as its inner array.
pub(crate) const ARRAY_COLLECTION: &str = "flex.messaging.io.ArrayCollection";

/// Decode a single AMF3 value with the anonymous class mapper.
pub fn decode(bytes: &[u8]) -> AmfResult<Value> {
    Reader::new(bytes).read()
}

/// Decode a single AMF3 value, resolving typed objects through `mapper`.
pub fn decode_with_mapper(bytes: &[u8], mapper: &dyn ClassMapper) -> AmfResult<Value> {
    Reader::with_mapper(bytes, mapper).read()
}

/// Encode a single AMF3 value with the anonymous class mapper.
pub fn encode(value: &Value) -> AmfResult<Vec<u8>> {
    encode_with_mapper(value, &DEFAULT_MAPPER)
}

/// Encode a single AMF3 value, naming typed objects through `mapper`.
pub fn encode_with_mapper(value: &Value, mapper: &dyn ClassMapper) -> AmfResult<Vec<u8>> {
    let mut writer = Writer::with_mapper(mapper);
    writer.write(value)?;
    Ok(writer.finish())
}
