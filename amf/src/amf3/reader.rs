use std::rc::Rc;

use tracing::trace;

use super::{ARRAY_COLLECTION, amf3_marker};
use crate::cache::RefTable;
use crate::cursor::ReadCursor;
use crate::errors::{AmfError, AmfResult, Dialect, RefTableKind};
use crate::mapper::{self, ClassMapper, DEFAULT_MAPPER};
use crate::value::{MixedArray, Traits, Value, shared};

enum SizeOrIndex {
    Size(usize),
    Index(usize),
}

/// AMF3 decoding session.
///
/// Reference tables span the lifetime of the session; the entry points in
/// the parent module build a fresh session per top-level value.
pub struct Reader<'a> {
    cursor: ReadCursor<'a>,
    mapper: &'a dyn ClassMapper,
    objects: RefTable<Value>,
    strings: RefTable<String>,
    traits: RefTable<Traits>,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self::with_mapper(bytes, &DEFAULT_MAPPER)
    }

    pub fn with_mapper(bytes: &'a [u8], mapper: &'a dyn ClassMapper) -> Self {
        Self::from_cursor(ReadCursor::new(bytes), mapper)
    }

    /// Continue an already positioned stream, as the AMF0 escape does.
    pub(crate) fn from_cursor(cursor: ReadCursor<'a>, mapper: &'a dyn ClassMapper) -> Self {
        Self {
            cursor,
            mapper,
            objects: RefTable::new(RefTableKind::Objects),
            strings: RefTable::new(RefTableKind::Strings),
            traits: RefTable::new(RefTableKind::Traits),
        }
    }

    pub(crate) fn into_cursor(self) -> ReadCursor<'a> {
        self.cursor
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
            amf3_marker::UNDEFINED | amf3_marker::NULL => Ok(Value::Null),
            amf3_marker::FALSE => Ok(Value::Boolean(false)),
            amf3_marker::TRUE => Ok(Value::Boolean(true)),
            amf3_marker::INTEGER => self.read_integer(),
            amf3_marker::DOUBLE => self.read_double(),
            amf3_marker::STRING => self.read_string(),
            amf3_marker::XML_DOCUMENT | amf3_marker::XML => self.read_xml(),
            amf3_marker::DATE => self.read_date(),
            amf3_marker::ARRAY => self.read_array(),
            amf3_marker::OBJECT => self.read_object(),
            amf3_marker::BYTE_ARRAY => self.read_byte_array(),
            amf3_marker::DICTIONARY => self.read_dictionary(),
            _ => Err(AmfError::BadMarker {
                dialect: Dialect::Amf3,
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

    fn read_u29(&mut self) -> AmfResult<u32> {
        // Up to three 7-bit continuation bytes, then a full 8-bit tail.
        let mut result: u32 = 0;
        for _ in 0..3 {
            let byte = self.cursor.read_u8()?;
            if byte & 0b1000_0000 == 0 {
                return Ok((result << 7) | byte as u32);
            }
            result = (result << 7) | (byte & 0b0111_1111) as u32;
        }
        let byte = self.cursor.read_u8()?;
        Ok((result << 8) | byte as u32)
    }

    fn read_i29(&mut self) -> AmfResult<i32> {
        let result = self.read_u29()?;
        if result & 0x1000_0000 != 0 {
            Ok(result as i32 - 0x2000_0000)
        } else {
            Ok(result as i32)
        }
    }

    fn read_size_or_index(&mut self) -> AmfResult<SizeOrIndex> {
        let u29 = self.read_u29()? as usize;
        if u29 & 0b1 == 0 {
            Ok(SizeOrIndex::Index(u29 >> 1))
        } else {
            Ok(SizeOrIndex::Size(u29 >> 1))
        }
    }

    fn read_utf8(&mut self, len: usize) -> AmfResult<String> {
        let position = self.cursor.position();
        let bytes = self.cursor.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|source| AmfError::InvalidUtf8 { position, source })
    }

    fn read_and_record_utf8(&mut self) -> AmfResult<String> {
        match self.read_size_or_index()? {
            SizeOrIndex::Index(index) => self.strings.get(index),
            SizeOrIndex::Size(len) => {
                let string = self.read_utf8(len)?;
                if !string.is_empty() {
                    self.strings.push(string.clone());
                }
                Ok(string)
            }
        }
    }

    fn read_integer(&mut self) -> AmfResult<Value> {
        Ok(Value::Integer(self.read_i29()?))
    }

    fn read_double(&mut self) -> AmfResult<Value> {
        Ok(Value::Number(self.cursor.read_f64()?))
    }

    fn read_string(&mut self) -> AmfResult<Value> {
        Ok(Value::String(self.read_and_record_utf8()?))
    }

    /// Both XML flavors; back-references go through the object table, not
    /// the string table.
    fn read_xml(&mut self) -> AmfResult<Value> {
        match self.read_size_or_index()? {
            SizeOrIndex::Index(index) => self.objects.get(index),
            SizeOrIndex::Size(len) => {
                let value = Value::Xml(Rc::from(self.read_utf8(len)?));
                self.objects.push(value.clone());
                Ok(value)
            }
        }
    }

    fn read_date(&mut self) -> AmfResult<Value> {
        match self.read_size_or_index()? {
            SizeOrIndex::Index(index) => self.objects.get(index),
            SizeOrIndex::Size(_) => {
                let value = Value::Date {
                    unix_millis: self.cursor.read_f64()?,
                };
                self.objects.push(value.clone());
                Ok(value)
            }
        }
    }

    fn read_byte_array(&mut self) -> AmfResult<Value> {
        match self.read_size_or_index()? {
            SizeOrIndex::Index(index) => self.objects.get(index),
            SizeOrIndex::Size(len) => {
                let bytes = shared(self.cursor.read_bytes(len)?.to_vec());
                let value = Value::ByteArray(bytes);
                self.objects.push(value.clone());
                Ok(value)
            }
        }
    }

    fn read_array(&mut self) -> AmfResult<Value> {
        let dense_count = match self.read_size_or_index()? {
            SizeOrIndex::Index(index) => return self.objects.get(index),
            SizeOrIndex::Size(count) => count,
        };
        let first_key = self.read_and_record_utf8()?;
        if first_key.is_empty() {
            let entries = shared(Vec::new());
            self.objects.push(Value::Array(Rc::clone(&entries)));
            for _ in 0..dense_count {
                let value = self.read()?;
                entries.borrow_mut().push(value);
            }
            return Ok(Value::Array(entries));
        }

        let inner = shared(MixedArray::default());
        self.objects.push(Value::MixedArray(Rc::clone(&inner)));
        let mut key = first_key;
        while !key.is_empty() {
            let value = self.read()?;
            inner.borrow_mut().assoc.push((key, value));
            key = self.read_and_record_utf8()?;
        }
        for _ in 0..dense_count {
            let value = self.read()?;
            inner.borrow_mut().dense.push(value);
        }
        Ok(Value::MixedArray(inner))
    }

    fn read_traits(&mut self, header: usize) -> AmfResult<Traits> {
        if header & 0b1 == 0 {
            return self.traits.get(header >> 1);
        }
        let externalizable = header & 0b10 != 0;
        let dynamic = header & 0b100 != 0;
        let members_count = header >> 3;
        let class_name = self.read_and_record_utf8()?;
        let members = (0..members_count)
            .map(|_| self.read_and_record_utf8())
            .collect::<AmfResult<_>>()?;
        let traits = Traits {
            class_name,
            externalizable,
            dynamic,
            members,
        };
        self.traits.push(traits.clone());
        Ok(traits)
    }

    fn read_object(&mut self) -> AmfResult<Value> {
        let header = match self.read_size_or_index()? {
            SizeOrIndex::Index(index) => return self.objects.get(index),
            SizeOrIndex::Size(header) => header,
        };
        let traits = self.read_traits(header)?;

        if traits.class_name == ARRAY_COLLECTION {
            // Transparent wrapper: the inner array takes a second object
            // table slot so references to either index resolve to it.
            trace!("flattening an ArrayCollection wrapper");
            let value = self.read()?;
            self.objects.push(value.clone());
            return Ok(value);
        }

        let record = self.mapper.instantiate(&traits.class_name)?;
        self.objects.push(record.clone());

        if traits.externalizable {
            trace!(class_name = %traits.class_name, "delegating externalizable body to the class mapper");
            let payload = self.mapper.read_external(&traits.class_name, &mut self.cursor)?;
            if let Value::Record(rc) = &record {
                rc.borrow_mut().external = Some(payload);
            }
            return Ok(record);
        }

        let translate_case = self.mapper.option(&record, mapper::OPT_TRANSLATE_CASE);
        let mut sealed = Vec::new();
        for name in &traits.members {
            let key = if translate_case {
                mapper::snake_case(name)
            } else {
                name.clone()
            };
            let value = self.read()?;
            sealed.push((key, value));
        }

        let dynamic = if traits.dynamic {
            let mut pairs = Vec::new();
            loop {
                let key = self.read_and_record_utf8()?;
                if key.is_empty() {
                    break;
                }
                let key = if translate_case {
                    mapper::snake_case(&key)
                } else {
                    key
                };
                let value = self.read()?;
                pairs.push((key, value));
            }
            Some(pairs)
        } else {
            None
        };

        self.mapper.populate(&record, sealed, dynamic)?;
        Ok(record)
    }

    fn read_dictionary(&mut self) -> AmfResult<Value> {
        let count = match self.read_size_or_index()? {
            SizeOrIndex::Index(index) => return self.objects.get(index),
            SizeOrIndex::Size(count) => count,
        };
        let entries = shared(Vec::new());
        self.objects.push(Value::Dictionary(Rc::clone(&entries)));
        // Weak-keys flag; read and discard.
        self.read_u29()?;
        for _ in 0..count {
            let key = self.read()?;
            let value = self.read()?;
            entries.borrow_mut().push((key, value));
        }
        Ok(Value::Dictionary(entries))
    }
}
