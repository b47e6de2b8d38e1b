use std::rc::Rc;

use tracing::trace;

use super::amf0_marker;
use crate::amf3;
use crate::cache::RefTable;
use crate::cursor::ReadCursor;
use crate::errors::{AmfError, AmfResult, Dialect, RefTableKind};
use crate::mapper::{self, ClassMapper, DEFAULT_MAPPER};
use crate::value::{Value, shared};

/// AMF0 decoding session.
pub struct Reader<'a> {
    cursor: ReadCursor<'a>,
    mapper: &'a dyn ClassMapper,
    objects: RefTable<Value>,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self::with_mapper(bytes, &DEFAULT_MAPPER)
    }

    pub fn with_mapper(bytes: &'a [u8], mapper: &'a dyn ClassMapper) -> Self {
        Self {
            cursor: ReadCursor::new(bytes),
            mapper,
            objects: RefTable::new(RefTableKind::Objects),
        }
    }

    /// Byte offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.cursor.position()
    }

    /// Decode the next value from the stream.
    pub fn read(&mut self) -> AmfResult<Value> {
        let position = self.cursor.position();
        let marker = self.cursor.read_u8()?;
        match marker {
            amf0_marker::NUMBER => self.read_number(),
            amf0_marker::BOOLEAN => self.read_boolean(),
            amf0_marker::STRING => self.read_string(),
            amf0_marker::OBJECT => self.read_anonymous_object(),
            amf0_marker::NULL | amf0_marker::UNDEFINED | amf0_marker::UNSUPPORTED => Ok(Value::Null),
            amf0_marker::REFERENCE => self.read_reference(),
            amf0_marker::ECMA_ARRAY => self.read_ecma_array(),
            amf0_marker::STRICT_ARRAY => self.read_strict_array(),
            amf0_marker::DATE => self.read_date(),
            amf0_marker::LONG_STRING | amf0_marker::XML_DOCUMENT => self.read_long_string(),
            amf0_marker::TYPED_OBJECT => self.read_typed_object(),
            amf0_marker::AVMPLUS_OBJECT => self.read_avm_plus(),
            _ => Err(AmfError::BadMarker {
                dialect: Dialect::Amf0,
                marker,
                position,
            }),
        }
    }

    /// Drain the remaining stream as a sequence of values.
    pub fn read_all(&mut self) -> AmfResult<Vec<Value>> {
        let mut values = Vec::new();
        while !self.cursor.is_empty() {
            values.push(self.read()?);
        }
        Ok(values)
    }

    fn read_number(&mut self) -> AmfResult<Value> {
        Ok(Value::Number(self.cursor.read_f64()?))
    }

    fn read_boolean(&mut self) -> AmfResult<Value> {
        Ok(Value::Boolean(self.cursor.read_u8()? != 0))
    }

    fn read_utf8(&mut self, len: usize) -> AmfResult<String> {
        let position = self.cursor.position();
        let bytes = self.cursor.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|source| AmfError::InvalidUtf8 { position, source })
    }

    fn read_string(&mut self) -> AmfResult<Value> {
        let len = self.cursor.read_u16()? as usize;
        Ok(Value::String(self.read_utf8(len)?))
    }

    fn read_long_string(&mut self) -> AmfResult<Value> {
        let len = self.cursor.read_u32()? as usize;
        Ok(Value::String(self.read_utf8(len)?))
    }

    fn read_reference(&mut self) -> AmfResult<Value> {
        let index = self.cursor.read_u16()? as usize;
        self.objects.get(index)
    }

    fn read_date(&mut self) -> AmfResult<Value> {
        let unix_millis = self.cursor.read_f64()?;
        // Timezone field, read and discarded.
        self.cursor.read_u16()?;
        Ok(Value::Date { unix_millis })
    }

    fn read_strict_array(&mut self) -> AmfResult<Value> {
        let len = self.cursor.read_u32()? as usize;
        let entries = shared(Vec::new());
        self.objects.push(Value::Array(Rc::clone(&entries)));
        for _ in 0..len {
            let value = self.read()?;
            entries.borrow_mut().push(value);
        }
        Ok(Value::Array(entries))
    }

    fn read_pairs(&mut self, translate_case: bool) -> AmfResult<Vec<(String, Value)>> {
        let mut pairs = Vec::new();
        loop {
            let len = self.cursor.read_u16()? as usize;
            if len == 0 {
                let position = self.cursor.position();
                let marker = self.cursor.read_u8()?;
                if marker != amf0_marker::OBJECT_END {
                    return Err(AmfError::BadMarker {
                        dialect: Dialect::Amf0,
                        marker,
                        position,
                    });
                }
                return Ok(pairs);
            }
            let key = self.read_utf8(len)?;
            let key = if translate_case {
                mapper::snake_case(&key)
            } else {
                key
            };
            let value = self.read()?;
            pairs.push((key, value));
        }
    }

    fn read_anonymous_object(&mut self) -> AmfResult<Value> {
        let entries = shared(Vec::new());
        self.objects.push(Value::Mapping(Rc::clone(&entries)));
        let pairs = self.read_pairs(false)?;
        *entries.borrow_mut() = pairs;
        Ok(Value::Mapping(entries))
    }

    fn read_ecma_array(&mut self) -> AmfResult<Value> {
        // Entry count is informational only; the terminator ends the loop.
        self.cursor.read_u32()?;
        self.read_anonymous_object()
    }

    fn read_typed_object(&mut self) -> AmfResult<Value> {
        let len = self.cursor.read_u16()? as usize;
        let class_name = self.read_utf8(len)?;
        let record = self.mapper.instantiate(&class_name)?;
        self.objects.push(record.clone());
        let translate_case = self.mapper.option(&record, mapper::OPT_TRANSLATE_CASE);
        let pairs = self.read_pairs(translate_case)?;
        self.mapper.populate(&record, pairs, None)?;
        Ok(record)
    }

    /// Cross-dialect escape: one AMF3 value follows, decoded by a fresh
    /// AMF3 session over the same cursor.
    fn read_avm_plus(&mut self) -> AmfResult<Value> {
        trace!(position = self.cursor.position(), "switching to AMF3 for one value");
        let mut inner = amf3::Reader::from_cursor(self.cursor.clone(), self.mapper);
        let value = inner.read()?;
        self.cursor = inner.into_cursor();
        Ok(value)
    }
}
