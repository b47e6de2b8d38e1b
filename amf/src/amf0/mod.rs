//! AMF0 tagged value codec.
//!
//! @see: [Action Message Format -- AMF 0](https://rtmp.veriskope.com/pdf/amf0-file-format-specification.pdf)

mod reader;
mod writer;

pub use self::reader::Reader;
pub use self::writer::Writer;

use crate::errors::AmfResult;
use crate::mapper::{ClassMapper, DEFAULT_MAPPER};
use crate::value::Value;

/// @see: 2.1 Types Overview
pub(crate) mod amf0_marker {
    pub const NUMBER: u8 = 0x00;
    pub const BOOLEAN: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const OBJECT: u8 = 0x03;
    pub const NULL: u8 = 0x05;
    pub const UNDEFINED: u8 = 0x06;
    pub const REFERENCE: u8 = 0x07;
    pub const ECMA_ARRAY: u8 = 0x08;
    pub const OBJECT_END: u8 = 0x09;
    pub const STRICT_ARRAY: u8 = 0x0A;
    pub const DATE: u8 = 0x0B;
    pub const LONG_STRING: u8 = 0x0C;
    pub const UNSUPPORTED: u8 = 0x0D;
    pub const XML_DOCUMENT: u8 = 0x0F;
    pub const TYPED_OBJECT: u8 = 0x10;
    pub const AVMPLUS_OBJECT: u8 = 0x11;
}

/// Decode a single AMF0 value with the anonymous class mapper.
pub fn decode(bytes: &[u8]) -> AmfResult<Value> {
    Reader::new(bytes).read()
}

/// Decode a single AMF0 value, resolving typed objects through `mapper`.
pub fn decode_with_mapper(bytes: &[u8], mapper: &dyn ClassMapper) -> AmfResult<Value> {
    Reader::with_mapper(bytes, mapper).read()
}

/// Encode a single AMF0 value with the anonymous class mapper.
pub fn encode(value: &Value) -> AmfResult<Vec<u8>> {
    encode_with_mapper(value, &DEFAULT_MAPPER)
}

/// Encode a single AMF0 value, naming typed objects through `mapper`.
pub fn encode_with_mapper(value: &Value, mapper: &dyn ClassMapper) -> AmfResult<Vec<u8>> {
    let mut writer = Writer::with_mapper(mapper);
    writer.write(value)?;
    Ok(writer.finish())
}
