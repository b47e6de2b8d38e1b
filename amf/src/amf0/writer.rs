use std::mem;

use tracing::trace;

use super::amf0_marker;
use crate::amf3;
use crate::cache::IdentityCache;
use crate::cursor::WriteCursor;
use crate::errors::{AmfError, AmfResult};
use crate::mapper::{self, ClassMapper, DEFAULT_MAPPER};
use crate::value::{MixedArray, Record, Value};

/// AMF0 encoding session.
///
/// [`Writer::finish`] consumes the session, so it cannot be reused for a
/// second stream.
pub struct Writer<'a> {
    cursor: WriteCursor,
    mapper: &'a dyn ClassMapper,
    objects: IdentityCache,
}

impl<'a> Writer<'a> {
    pub fn new() -> Self {
        Self::with_mapper(&DEFAULT_MAPPER)
    }

    pub fn with_mapper(mapper: &'a dyn ClassMapper) -> Self {
        Self {
            cursor: WriteCursor::new(),
            mapper,
            objects: IdentityCache::default(),
        }
    }

    /// Encode one value onto the stream.
    pub fn write(&mut self, value: &Value) -> AmfResult<()> {
        if let Some(index) = value.identity().and_then(|id| self.objects.get(id)) {
            return self.write_reference(index);
        }
        match value {
            Value::Null => self.cursor.write_u8(amf0_marker::NULL),
            Value::Boolean(b) => self.write_boolean(*b),
            Value::Number(n) => self.write_number(*n),
            // AMF0 has no integer type.
            Value::Integer(i) => self.write_number(*i as f64),
            Value::String(s) => self.write_string(s),
            Value::Xml(xml) => self.write_xml(xml),
            Value::Date { unix_millis } => self.write_date(*unix_millis),
            Value::Array(entries) => self.write_strict_array(value, &entries.borrow()),
            Value::MixedArray(inner) => self.write_mixed_array(value, &inner.borrow()),
            Value::Mapping(entries) => self.write_hash(value, &entries.borrow()),
            Value::Record(record) => self.write_record(value, &record.borrow()),
            Value::ByteArray(_) | Value::Dictionary(_) => self.write_avm_plus(value),
        }
    }

    /// Consume the session and return the encoded bytes.
    pub fn finish(self) -> Vec<u8> {
        self.cursor.into_bytes()
    }

    fn write_reference(&mut self, index: usize) -> AmfResult<()> {
        if index > 0xFFFF {
            return Err(AmfError::ReferenceIndexOverflow { index });
        }
        self.cursor.write_u8(amf0_marker::REFERENCE)?;
        self.cursor.write_u16(index as u16)
    }

    fn write_number(&mut self, value: f64) -> AmfResult<()> {
        self.cursor.write_u8(amf0_marker::NUMBER)?;
        self.cursor.write_f64(value)
    }

    fn write_boolean(&mut self, value: bool) -> AmfResult<()> {
        self.cursor.write_u8(amf0_marker::BOOLEAN)?;
        self.cursor.write_u8(value as u8)
    }

    /// Bare u16-length string, the form object keys and class names use.
    fn write_short_utf8(&mut self, value: &str) -> AmfResult<()> {
        if value.len() > 0xFFFF {
            return Err(AmfError::IntegerOutOfRange {
                value: value.len() as u64,
                width: 16,
            });
        }
        self.cursor.write_u16(value.len() as u16)?;
        self.cursor.write_bytes(value.as_bytes())
    }

    fn write_long_utf8(&mut self, value: &str) -> AmfResult<()> {
        if value.len() > 0xFFFF_FFFF {
            return Err(AmfError::IntegerOutOfRange {
                value: value.len() as u64,
                width: 32,
            });
        }
        self.cursor.write_u32(value.len() as u32)?;
        self.cursor.write_bytes(value.as_bytes())
    }

    fn write_string(&mut self, value: &str) -> AmfResult<()> {
        if value.len() > 0xFFFF {
            self.cursor.write_u8(amf0_marker::LONG_STRING)?;
            self.write_long_utf8(value)
        } else {
            self.cursor.write_u8(amf0_marker::STRING)?;
            self.write_short_utf8(value)
        }
    }

    fn write_xml(&mut self, value: &str) -> AmfResult<()> {
        self.cursor.write_u8(amf0_marker::XML_DOCUMENT)?;
        self.write_long_utf8(value)
    }

    fn write_date(&mut self, unix_millis: f64) -> AmfResult<()> {
        self.cursor.write_u8(amf0_marker::DATE)?;
        self.cursor.write_f64(unix_millis)?;
        // Timezone, always zero.
        self.cursor.write_u16(0)
    }

    fn write_count(&mut self, count: usize) -> AmfResult<()> {
        if count > 0xFFFF_FFFF {
            return Err(AmfError::IntegerOutOfRange {
                value: count as u64,
                width: 32,
            });
        }
        self.cursor.write_u32(count as u32)
    }

    fn write_strict_array(&mut self, value: &Value, entries: &[Value]) -> AmfResult<()> {
        self.objects.insert(value.identity());
        self.cursor.write_u8(amf0_marker::STRICT_ARRAY)?;
        self.write_count(entries.len())?;
        for entry in entries {
            self.write(entry)?;
        }
        Ok(())
    }

    fn write_pairs(&mut self, pairs: &[(String, Value)], translate_case: bool) -> AmfResult<()> {
        for (key, entry) in pairs {
            if translate_case {
                self.write_short_utf8(&mapper::camel_case(key))?;
            } else {
                self.write_short_utf8(key)?;
            }
            self.write(entry)?;
        }
        self.cursor.write_u16(0)?;
        self.cursor.write_u8(amf0_marker::OBJECT_END)
    }

    fn write_hash(&mut self, value: &Value, entries: &[(String, Value)]) -> AmfResult<()> {
        self.objects.insert(value.identity());
        self.cursor.write_u8(amf0_marker::ECMA_ARRAY)?;
        self.write_count(entries.len())?;
        self.write_pairs(entries, false)
    }

    /// No AMF0 wire form of its own: dense entries ride along under their
    /// decimal index in an ECMA array.
    fn write_mixed_array(&mut self, value: &Value, inner: &MixedArray) -> AmfResult<()> {
        self.objects.insert(value.identity());
        self.cursor.write_u8(amf0_marker::ECMA_ARRAY)?;
        self.write_count(inner.assoc.len() + inner.dense.len())?;
        for (key, entry) in &inner.assoc {
            self.write_short_utf8(key)?;
            self.write(entry)?;
        }
        for (index, entry) in inner.dense.iter().enumerate() {
            self.write_short_utf8(&index.to_string())?;
            self.write(entry)?;
        }
        self.cursor.write_u16(0)?;
        self.cursor.write_u8(amf0_marker::OBJECT_END)
    }

    fn write_record(&mut self, value: &Value, record: &Record) -> AmfResult<()> {
        if record.external.is_some() {
            return Err(AmfError::Externalizable {
                name: record.class_name.clone(),
                reason: "AMF0 has no externalizable form".to_string(),
            });
        }
        self.objects.insert(value.identity());
        match self.mapper.class_name_for(value) {
            Some(class_name) => {
                self.cursor.write_u8(amf0_marker::TYPED_OBJECT)?;
                self.write_short_utf8(&class_name)?;
            }
            None => self.cursor.write_u8(amf0_marker::OBJECT)?,
        }
        let props = self.mapper.properties_for(value)?;
        let translate_case = self.mapper.option(value, mapper::OPT_TRANSLATE_CASE);
        self.write_pairs(&props, translate_case)
    }

    /// Cross-dialect escape for values with no AMF0 form: one AMF3 value
    /// written by a fresh AMF3 session over the same buffer.
    fn write_avm_plus(&mut self, value: &Value) -> AmfResult<()> {
        trace!("switching to AMF3 for a value with no AMF0 form");
        self.cursor.write_u8(amf0_marker::AVMPLUS_OBJECT)?;
        let mut inner = amf3::Writer::from_cursor(mem::take(&mut self.cursor), self.mapper);
        inner.write(value)?;
        self.cursor = inner.into_cursor();
        Ok(())
    }
}

impl Default for Writer<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Writer;
    use crate::errors::AmfError;
    use crate::value::{Record, Value, array, mapping, number, shared, string};

    macro_rules! encode {
        ($value:expr) => {{
            let mut writer = Writer::new();
            writer.write(&$value).unwrap();
            writer.finish()
        }};
    }

    #[test]
    fn scalars() {
        assert_eq!(
            encode!(number(3.5f64)),
            include_bytes!("../../test_data/amf0-number.bin")
        );
        assert_eq!(
            encode!(Value::Boolean(true)),
            include_bytes!("../../test_data/amf0-boolean-true.bin")
        );
        assert_eq!(
            encode!(Value::Boolean(false)),
            include_bytes!("../../test_data/amf0-boolean-false.bin")
        );
        assert_eq!(encode!(Value::Null), include_bytes!("../../test_data/amf0-null.bin"));
    }

    #[test]
    fn integers_take_the_number_form() {
        let bytes = encode!(Value::Integer(3));
        assert_eq!(bytes, include_bytes!("../../test_data/amf0-number-3.bin"));
    }

    #[test]
    fn strings_switch_to_the_long_form_past_u16() {
        assert_eq!(
            encode!(string("this is a テスト")),
            include_bytes!("../../test_data/amf0-string.bin")
        );
        assert_eq!(
            encode!(string("a".repeat(0x10013))),
            include_bytes!("../../test_data/amf0-long-string.bin")
        );
    }

    #[test]
    fn dates_carry_a_zero_timezone() {
        assert_eq!(
            encode!(Value::Date {
                unix_millis: 1_590_796_800_000.0
            }),
            include_bytes!("../../test_data/amf0-date.bin")
        );
    }

    #[test]
    fn strict_array() {
        assert_eq!(
            encode!(array([number(1.0f64), string("2"), number(3.0f64)])),
            include_bytes!("../../test_data/amf0-strict-array.bin")
        );
    }

    #[test]
    fn mappings_take_the_ecma_array_form() {
        assert_eq!(
            encode!(mapping([("c", string("d")), ("a", string("b"))])),
            include_bytes!("../../test_data/amf0-hash.bin")
        );
    }

    #[test]
    fn typed_records() {
        let record = Value::Record(shared(Record {
            class_name: "org.amf.ASClass".to_string(),
            sealed: vec![
                ("foo".to_string(), string("bar")),
                ("baz".to_string(), Value::Null),
            ],
            dynamic: None,
            external: None,
        }));
        assert_eq!(
            encode!(record),
            include_bytes!("../../test_data/amf0-typed-object.bin")
        );
    }

    #[test]
    fn anonymous_records_take_the_object_form() {
        let record = Value::Record(shared(Record {
            class_name: String::new(),
            sealed: vec![
                ("foo".to_string(), string("baz")),
                ("bar".to_string(), number(3.14f64)),
            ],
            dynamic: None,
            external: None,
        }));
        assert_eq!(
            encode!(record),
            include_bytes!("../../test_data/amf0-object.bin")
        );
    }

    #[test]
    fn repeated_nodes_become_references() {
        let inner = shared(vec![
            ("foo".to_string(), string("baz")),
            ("bar".to_string(), number(3.14f64)),
        ]);
        let outer = mapping([
            ("0", Value::Mapping(inner.clone())),
            ("1", Value::Mapping(inner)),
        ]);
        assert_eq!(
            encode!(outer),
            include_bytes!("../../test_data/amf0-ref-test.bin")
        );
    }

    #[test]
    fn circular_arrays_reference_their_own_slot() {
        let entries = shared(Vec::new());
        entries.borrow_mut().push(Value::Array(entries.clone()));
        assert_eq!(
            encode!(Value::Array(entries)),
            include_bytes!("../../test_data/amf0-circular-array.bin")
        );
    }

    #[test]
    fn amf3_only_values_escape_to_amf3() {
        let bytes = encode!(Value::ByteArray(shared(b"ASDF".to_vec())));
        assert_eq!(bytes[0], 0x11);
        assert_eq!(
            crate::amf0::decode(&bytes).unwrap(),
            Value::ByteArray(shared(b"ASDF".to_vec()))
        );
    }

    #[test]
    fn oversized_keys_are_rejected() {
        let value = mapping([("k".repeat(0x10000), Value::Null)]);
        let mut writer = Writer::new();
        assert!(matches!(
            writer.write(&value).unwrap_err(),
            AmfError::IntegerOutOfRange {
                value: 0x10000,
                width: 16
            }
        ));
    }

    #[test]
    fn reference_indices_are_capped_at_u16() {
        // Fill the object cache past the u16 range, then force a
        // back-reference to the last node.
        let filler: Vec<Value> = (0..=0x10000)
            .map(|_| Value::Array(shared(Vec::new())))
            .collect();
        let last = filler.last().unwrap().clone();
        let mut entries = filler;
        entries.push(last);
        let mut writer = Writer::new();
        let err = writer.write(&array(entries)).unwrap_err();
        assert!(matches!(
            err,
            AmfError::ReferenceIndexOverflow { index: 0x10001 }
        ));
    }

    #[test]
    fn externalizable_records_have_no_amf0_form() {
        let record = Value::Record(shared(Record {
            class_name: "Ext".to_string(),
            sealed: Vec::new(),
            dynamic: None,
            external: Some(vec![1, 2, 3]),
        }));
        let mut writer = Writer::new();
        assert!(matches!(
            writer.write(&record).unwrap_err(),
            AmfError::Externalizable { name, .. } if name == "Ext"
        ));
    }
}
