use tracing::trace;

use super::{MAX_INTEGER, MIN_INTEGER, amf3_marker};
use crate::cache::{IdentityCache, InternCache};
use crate::cursor::WriteCursor;
use crate::errors::{AmfError, AmfResult};
use crate::mapper::{self, ClassMapper, DEFAULT_MAPPER};
use crate::value::{MixedArray, Record, Value};

/// AMF3 encoding session.
///
/// Mirrors the reader: every cacheable value consults its table first and
/// emits a back-reference on a hit. [`Writer::finish`] consumes the
/// session, so it cannot be reused for a second stream.
pub struct Writer<'a> {
    cursor: WriteCursor,
    mapper: &'a dyn ClassMapper,
    objects: IdentityCache,
    strings: InternCache,
    traits: InternCache,
}

impl<'a> Writer<'a> {
    pub fn new() -> Self {
        Self::with_mapper(&DEFAULT_MAPPER)
    }

    pub fn with_mapper(mapper: &'a dyn ClassMapper) -> Self {
        Self::from_cursor(WriteCursor::new(), mapper)
    }

    /// Continue an already started stream, as the AMF0 escape does.
    pub(crate) fn from_cursor(cursor: WriteCursor, mapper: &'a dyn ClassMapper) -> Self {
        Self {
            cursor,
            mapper,
            objects: IdentityCache::default(),
            strings: InternCache::default(),
            traits: InternCache::default(),
        }
    }

    pub(crate) fn into_cursor(self) -> WriteCursor {
        self.cursor
    }

    /// Encode one value onto the stream.
    pub fn write(&mut self, value: &Value) -> AmfResult<()> {
        match value {
            Value::Null => self.cursor.write_u8(amf3_marker::NULL),
            Value::Boolean(true) => self.cursor.write_u8(amf3_marker::TRUE),
            Value::Boolean(false) => self.cursor.write_u8(amf3_marker::FALSE),
            Value::Integer(i) => self.write_integer(*i),
            Value::Number(n) => self.write_double(*n),
            Value::String(s) => {
                self.cursor.write_u8(amf3_marker::STRING)?;
                self.write_utf8(s)
            }
            Value::Xml(xml) => self.write_xml(value, xml),
            Value::Date { unix_millis } => self.write_date(value, *unix_millis),
            Value::Array(entries) => self.write_array(value, &entries.borrow()),
            Value::MixedArray(inner) => self.write_mixed_array(value, &inner.borrow()),
            Value::Mapping(entries) => self.write_mapping(value, &entries.borrow()),
            Value::Record(record) => self.write_record(value, &record.borrow()),
            Value::ByteArray(bytes) => self.write_byte_array(value, &bytes.borrow()),
            Value::Dictionary(entries) => self.write_dictionary(value, &entries.borrow()),
        }
    }

    /// Consume the session and return the encoded bytes.
    pub fn finish(self) -> Vec<u8> {
        self.cursor.into_bytes()
    }

    fn write_u29(&mut self, value: u32) -> AmfResult<()> {
        match value {
            v if v < 0x80 => self.cursor.write_u8(v as u8),
            v if v < 0x4000 => {
                self.cursor.write_u8((v >> 7 & 0x7F) as u8 | 0x80)?;
                self.cursor.write_u8((v & 0x7F) as u8)
            }
            v if v < 0x20_0000 => {
                self.cursor.write_u8((v >> 14 & 0x7F) as u8 | 0x80)?;
                self.cursor.write_u8((v >> 7 & 0x7F) as u8 | 0x80)?;
                self.cursor.write_u8((v & 0x7F) as u8)
            }
            v if v < 0x2000_0000 => {
                self.cursor.write_u8((v >> 22 & 0x7F) as u8 | 0x80)?;
                self.cursor.write_u8((v >> 15 & 0x7F) as u8 | 0x80)?;
                self.cursor.write_u8((v >> 8 & 0x7F) as u8 | 0x80)?;
                self.cursor.write_u8((v & 0xFF) as u8)
            }
            v => Err(AmfError::BadU29 { value: v as u64 }),
        }
    }

    /// Inline header: length or count in the upper bits, low bit set.
    fn write_size(&mut self, size: usize) -> AmfResult<()> {
        if size >= 1 << 28 {
            return Err(AmfError::BadU29 {
                value: size as u64,
            });
        }
        self.write_u29(((size << 1) | 1) as u32)
    }

    /// Back-reference header: index in the upper bits, low bit clear.
    fn write_reference(&mut self, index: usize) -> AmfResult<()> {
        if index >= 1 << 28 {
            return Err(AmfError::BadU29 {
                value: index as u64,
            });
        }
        self.write_u29((index << 1) as u32)
    }

    fn cached(&self, value: &Value) -> Option<usize> {
        value.identity().and_then(|id| self.objects.get(id))
    }

    fn write_integer(&mut self, value: i32) -> AmfResult<()> {
        if !(MIN_INTEGER..=MAX_INTEGER).contains(&value) {
            // No I29 form; fall back to the double encoding.
            return self.write_double(value as f64);
        }
        self.cursor.write_u8(amf3_marker::INTEGER)?;
        self.write_u29(value as u32 & 0x1FFF_FFFF)
    }

    fn write_double(&mut self, value: f64) -> AmfResult<()> {
        self.cursor.write_u8(amf3_marker::DOUBLE)?;
        self.cursor.write_f64(value)
    }

    /// UTF-8-vr form: interned by content, except the empty string which
    /// is always written inline.
    fn write_utf8(&mut self, value: &str) -> AmfResult<()> {
        if value.is_empty() {
            return self.write_size(0);
        }
        if let Some(index) = self.strings.get(value) {
            return self.write_reference(index);
        }
        self.strings.insert(value);
        self.write_size(value.len())?;
        self.cursor.write_bytes(value.as_bytes())
    }

    fn write_xml(&mut self, value: &Value, xml: &str) -> AmfResult<()> {
        self.cursor.write_u8(amf3_marker::XML)?;
        if let Some(index) = self.cached(value) {
            return self.write_reference(index);
        }
        self.objects.insert(value.identity());
        self.write_size(xml.len())?;
        self.cursor.write_bytes(xml.as_bytes())
    }

    fn write_date(&mut self, value: &Value, unix_millis: f64) -> AmfResult<()> {
        self.cursor.write_u8(amf3_marker::DATE)?;
        if let Some(index) = self.cached(value) {
            return self.write_reference(index);
        }
        self.objects.insert(value.identity());
        self.write_size(0)?;
        self.cursor.write_f64(unix_millis)
    }

    fn write_byte_array(&mut self, value: &Value, bytes: &[u8]) -> AmfResult<()> {
        self.cursor.write_u8(amf3_marker::BYTE_ARRAY)?;
        if let Some(index) = self.cached(value) {
            return self.write_reference(index);
        }
        self.objects.insert(value.identity());
        self.write_size(bytes.len())?;
        self.cursor.write_bytes(bytes)
    }

    fn write_array(&mut self, value: &Value, entries: &[Value]) -> AmfResult<()> {
        self.cursor.write_u8(amf3_marker::ARRAY)?;
        if let Some(index) = self.cached(value) {
            return self.write_reference(index);
        }
        self.objects.insert(value.identity());
        self.write_size(entries.len())?;
        self.write_utf8("")?;
        for entry in entries {
            self.write(entry)?;
        }
        Ok(())
    }

    fn write_mixed_array(&mut self, value: &Value, inner: &MixedArray) -> AmfResult<()> {
        self.cursor.write_u8(amf3_marker::ARRAY)?;
        if let Some(index) = self.cached(value) {
            return self.write_reference(index);
        }
        self.objects.insert(value.identity());
        self.write_size(inner.dense.len())?;
        for (key, entry) in &inner.assoc {
            self.write_utf8(key)?;
            self.write(entry)?;
        }
        self.write_utf8("")?;
        for entry in &inner.dense {
            self.write(entry)?;
        }
        Ok(())
    }

    fn write_mapping(&mut self, value: &Value, entries: &[(String, Value)]) -> AmfResult<()> {
        self.cursor.write_u8(amf3_marker::OBJECT)?;
        if let Some(index) = self.cached(value) {
            return self.write_reference(index);
        }
        self.objects.insert(value.identity());
        // Anonymous dynamic traits, no sealed members.
        self.write_u29(0x0B)?;
        self.write_utf8("")?;
        for (key, entry) in entries {
            self.write_utf8(key)?;
            self.write(entry)?;
        }
        self.write_utf8("")
    }

    fn write_record(&mut self, value: &Value, record: &Record) -> AmfResult<()> {
        self.cursor.write_u8(amf3_marker::OBJECT)?;
        if let Some(index) = self.cached(value) {
            return self.write_reference(index);
        }
        self.objects.insert(value.identity());

        let class_name = self.mapper.class_name_for(value).unwrap_or_default();
        let externalizable = record.external.is_some();
        let dynamic = record.dynamic.is_some();
        let translate_case = self.mapper.option(value, mapper::OPT_TRANSLATE_CASE);

        // Only named classes are interned; anonymous traits go inline
        // every time.
        let trait_index = if class_name.is_empty() {
            None
        } else {
            self.traits.get(&class_name)
        };
        match trait_index {
            Some(index) => {
                if index >= 1 << 27 {
                    return Err(AmfError::BadU29 {
                        value: index as u64,
                    });
                }
                self.write_u29(((index << 2) | 0b01) as u32)?;
            }
            None => {
                if !class_name.is_empty() {
                    self.traits.insert(&class_name);
                }
                let header = ((record.sealed.len() as u64) << 4)
                    | u64::from(dynamic) << 3
                    | u64::from(externalizable) << 2
                    | 0b11;
                if header > 0x1FFF_FFFF {
                    return Err(AmfError::BadU29 { value: header });
                }
                self.write_u29(header as u32)?;
                self.write_utf8(&class_name)?;
                for (name, _) in &record.sealed {
                    if translate_case {
                        self.write_utf8(&mapper::camel_case(name))?;
                    } else {
                        self.write_utf8(name)?;
                    }
                }
            }
        }

        if externalizable {
            trace!(class_name = %class_name, "delegating externalizable payload to the class mapper");
            let payload = record.external.as_deref().unwrap_or_default();
            return self.mapper.write_external(&class_name, payload, &mut self.cursor);
        }

        let props = self.mapper.properties_for(value)?;
        for (name, fallback) in &record.sealed {
            let sealed_value = props
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| fallback.clone());
            self.write(&sealed_value)?;
        }
        if dynamic {
            for (key, entry) in &props {
                if record.sealed.iter().any(|(name, _)| name == key) {
                    continue;
                }
                if translate_case {
                    self.write_utf8(&mapper::camel_case(key))?;
                } else {
                    self.write_utf8(key)?;
                }
                self.write(entry)?;
            }
            self.write_utf8("")?;
        }
        Ok(())
    }

    fn write_dictionary(&mut self, value: &Value, entries: &[(Value, Value)]) -> AmfResult<()> {
        self.cursor.write_u8(amf3_marker::DICTIONARY)?;
        if let Some(index) = self.cached(value) {
            return self.write_reference(index);
        }
        self.objects.insert(value.identity());
        self.write_size(entries.len())?;
        // Weak-keys flag, always strong.
        self.write_u29(0)?;
        for (key, entry) in entries {
            self.write(key)?;
            self.write(entry)?;
        }
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
        assert_eq!(encode!(Value::Null), include_bytes!("../../test_data/amf3-null.bin"));
        assert_eq!(
            encode!(Value::Boolean(true)),
            include_bytes!("../../test_data/amf3-true.bin")
        );
        assert_eq!(
            encode!(Value::Boolean(false)),
            include_bytes!("../../test_data/amf3-false.bin")
        );
        assert_eq!(
            encode!(number(3.5f64)),
            include_bytes!("../../test_data/amf3-float.bin")
        );
    }

    #[test]
    fn u29_boundary_widths() {
        // Payload width after the integer marker, per encoding ladder rung.
        let cases: &[(i32, usize)] = &[
            (0, 1),
            (1, 1),
            (127, 1),
            (128, 2),
            (16_383, 2),
            (16_384, 3),
            (2_097_151, 3),
            (2_097_152, 4),
            (268_435_455, 4),
            (-1, 4),
            (-268_435_456, 4),
        ];
        for &(value, width) in cases {
            let bytes = encode!(Value::Integer(value));
            assert_eq!(bytes.len(), width + 1, "integer {value}");
            let decoded = crate::amf3::decode(&bytes).unwrap();
            assert_eq!(decoded, Value::Integer(value), "integer {value}");
        }
    }

    #[test]
    fn integer_boundaries_hit_the_known_encodings() {
        assert_eq!(
            encode!(Value::Integer(0)),
            include_bytes!("../../test_data/amf3-0.bin")
        );
        assert_eq!(
            encode!(Value::Integer(-0x1000_0000)),
            include_bytes!("../../test_data/amf3-min.bin")
        );
        assert_eq!(
            encode!(Value::Integer(0x0FFF_FFFF)),
            include_bytes!("../../test_data/amf3-max.bin")
        );
        assert_eq!(
            encode!(Value::Integer(0b1000_0000)),
            include_bytes!("../../test_data/amf3-integer-2byte.bin")
        );
        assert_eq!(
            encode!(Value::Integer(0b100_0000_0000_0000)),
            include_bytes!("../../test_data/amf3-integer-3byte.bin")
        );
    }

    #[test]
    fn out_of_range_integers_become_doubles() {
        let bytes = encode!(Value::Integer(0x1000_0000));
        assert_eq!(bytes[0], 0x05);
        assert_eq!(
            crate::amf3::decode(&bytes).unwrap(),
            Value::Number(268_435_456.0)
        );
    }

    #[test]
    fn strings_are_interned_by_content() {
        assert_eq!(
            encode!(array([string("abc"), string("abc")])),
            include_bytes!("../../test_data/amf3-string-ref.bin")
        );
        assert_eq!(
            encode!(array([string(""), string("")])),
            include_bytes!("../../test_data/amf3-empty-string-ref.bin")
        );
    }

    #[test]
    fn repeated_nodes_become_object_references() {
        let entries = shared(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        let strings = shared(vec![string("a"), string("b"), string("c")]);
        let outer = array([
            Value::Array(entries.clone()),
            Value::Array(strings.clone()),
            Value::Array(entries),
            Value::Array(strings),
        ]);
        assert_eq!(
            encode!(outer),
            include_bytes!("../../test_data/amf3-array-ref.bin")
        );
    }

    #[test]
    fn equal_but_distinct_nodes_cache_independently() {
        let bytes = encode!(array([array([Value::Integer(1)]), array([Value::Integer(1)])]));
        // Three inline array headers, no reference headers.
        assert_eq!(bytes, [0x09, 0x05, 0x01, 0x09, 0x03, 0x01, 0x04, 0x01, 0x09, 0x03, 0x01, 0x04, 0x01]);
    }

    #[test]
    fn circular_arrays_reference_their_own_slot() {
        let entries = shared(Vec::new());
        entries.borrow_mut().push(Value::Array(entries.clone()));
        let mut writer = Writer::new();
        writer.write(&Value::Array(entries)).unwrap();
        assert_eq!(
            writer.finish(),
            *include_bytes!("../../test_data/amf3-circular-array.bin")
        );
    }

    #[test]
    fn mixed_arrays_write_assoc_then_dense() {
        let inner = crate::value::MixedArray {
            assoc: vec![
                ("2".to_string(), string("bar3")),
                ("foo".to_string(), string("bar")),
                ("asdf".to_string(), string("fdsa")),
            ],
            dense: vec![string("bar"), string("bar1"), string("bar2")],
        };
        assert_eq!(
            encode!(Value::MixedArray(shared(inner))),
            include_bytes!("../../test_data/amf3-associative-array.bin")
        );
    }

    #[test]
    fn mappings_are_anonymous_dynamic_objects() {
        assert_eq!(
            encode!(mapping([
                ("foo", string("bar")),
                ("answer", Value::Integer(42))
            ])),
            include_bytes!("../../test_data/amf3-hash.bin")
        );
    }

    #[test]
    fn records_write_sealed_members_and_trait_references() {
        let first = Value::Record(shared(Record {
            class_name: "org.amf.ASClass".to_string(),
            sealed: vec![
                ("foo".to_string(), string("foo")),
                ("baz".to_string(), Value::Null),
            ],
            dynamic: None,
            external: None,
        }));
        let second = Value::Record(shared(Record {
            class_name: "org.amf.ASClass".to_string(),
            sealed: vec![
                ("foo".to_string(), string("bar")),
                ("baz".to_string(), Value::Null),
            ],
            dynamic: None,
            external: None,
        }));
        assert_eq!(
            encode!(array([first, second])),
            include_bytes!("../../test_data/amf3-trait-ref.bin")
        );
    }

    #[test]
    fn dates_byte_arrays_and_dictionaries() {
        assert_eq!(
            encode!(Value::Date { unix_millis: 0.0 }),
            include_bytes!("../../test_data/amf3-date.bin")
        );
        assert_eq!(
            encode!(Value::ByteArray(shared(vec![
                0, 3, 227, 129, 147, 227, 130, 140, 116, 101, 115, 116, 64
            ]))),
            include_bytes!("../../test_data/amf3-byte-array.bin")
        );
        assert_eq!(
            encode!(Value::Dictionary(shared(vec![
                (string("bar"), string("asdf1")),
                (Value::Integer(42), string("asdf2")),
            ]))),
            include_bytes!("../../test_data/amf3-dictionary.bin")
        );
        assert_eq!(
            encode!(Value::Dictionary(shared(Vec::new()))),
            include_bytes!("../../test_data/amf3-empty-dictionary.bin")
        );
    }

    #[test]
    fn oversized_headers_are_rejected() {
        let mut writer = Writer::new();
        let err = writer.write_size(1 << 28).unwrap_err();
        assert!(matches!(err, AmfError::BadU29 { value } if value == 1 << 28));
    }
}
