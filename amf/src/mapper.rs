use tracing::trace;

use crate::cursor::{ReadCursor, WriteCursor};
use crate::errors::{AmfError, AmfResult};
use crate::value::{Record, Value, shared};

/// Option key for the snake_case/camelCase property key translation.
pub const OPT_TRANSLATE_CASE: &str = "translate_case";

/// Maps wire class names to host records and back.
///
/// Both codecs consult the mapper synchronously whenever a typed object
/// crosses the wire. Implementations must be re-entrant: populating one
/// record may encode or decode others through the same mapper.
pub trait ClassMapper {
    /// Construct an empty record for `class_name`. An unregistered name
    /// may map to a generic anonymous record.
    fn instantiate(&self, class_name: &str) -> AmfResult<Value>;

    /// Bulk-assign decoded properties to `record` at end of decode.
    fn populate(
        &self,
        record: &Value,
        sealed: Vec<(String, Value)>,
        dynamic: Option<Vec<(String, Value)>>,
    ) -> AmfResult<()>;

    /// Wire class name for a record being encoded; `None` encodes it as
    /// anonymous.
    fn class_name_for(&self, record: &Value) -> Option<String>;

    /// Ordered properties of a record being encoded.
    fn properties_for(&self, record: &Value) -> AmfResult<Vec<(String, Value)>>;

    /// Per-record boolean options, e.g. [`OPT_TRANSLATE_CASE`].
    fn option(&self, record: &Value, name: &str) -> bool {
        let _ = (record, name);
        false
    }

    /// Read the opaque body of an externalizable class from the shared
    /// cursor. The payload becomes the record body.
    fn read_external(&self, class_name: &str, cursor: &mut ReadCursor<'_>) -> AmfResult<Vec<u8>> {
        let _ = cursor;
        Err(AmfError::Externalizable {
            name: class_name.to_string(),
            reason: "no externalizable reader registered".to_string(),
        })
    }

    /// Write the opaque body of an externalizable class.
    fn write_external(
        &self,
        class_name: &str,
        payload: &[u8],
        cursor: &mut WriteCursor,
    ) -> AmfResult<()> {
        let _ = (payload, cursor);
        Err(AmfError::Externalizable {
            name: class_name.to_string(),
            reason: "no externalizable writer registered".to_string(),
        })
    }
}

/// Fallback mapper: anonymous class names become [`Value::Mapping`],
/// everything else a generic [`Record`] keeping the wire class name.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClassMapper;

pub(crate) static DEFAULT_MAPPER: DefaultClassMapper = DefaultClassMapper;

impl ClassMapper for DefaultClassMapper {
    fn instantiate(&self, class_name: &str) -> AmfResult<Value> {
        if class_name.is_empty() {
            return Ok(Value::Mapping(shared(Vec::new())));
        }
        trace!(class_name, "building a generic record");
        Ok(Value::Record(shared(Record::new(class_name))))
    }

    fn populate(
        &self,
        record: &Value,
        sealed: Vec<(String, Value)>,
        dynamic: Option<Vec<(String, Value)>>,
    ) -> AmfResult<()> {
        match record {
            Value::Record(rc) => {
                let mut record = rc.borrow_mut();
                record.sealed = sealed;
                record.dynamic = dynamic;
            }
            Value::Mapping(rc) => {
                let mut entries = rc.borrow_mut();
                entries.extend(sealed);
                entries.extend(dynamic.into_iter().flatten());
            }
            _ => {}
        }
        Ok(())
    }

    fn class_name_for(&self, record: &Value) -> Option<String> {
        match record {
            Value::Record(rc) => {
                let name = &rc.borrow().class_name;
                if name.is_empty() {
                    None
                } else {
                    Some(name.clone())
                }
            }
            _ => None,
        }
    }

    fn properties_for(&self, record: &Value) -> AmfResult<Vec<(String, Value)>> {
        match record {
            Value::Record(rc) => {
                let record = rc.borrow();
                let mut props = record.sealed.clone();
                if let Some(dynamic) = &record.dynamic {
                    props.extend(dynamic.iter().cloned());
                }
                Ok(props)
            }
            Value::Mapping(rc) => Ok(rc.borrow().clone()),
            _ => Ok(Vec::new()),
        }
    }
}

/// camelCase to snake_case: every ASCII uppercase letter gains a leading
/// underscore and is lowered.
pub(crate) fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() * 2);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// snake_case to camelCase: underscores are dropped and the following
/// character is raised.
pub(crate) fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut raise = false;
    for c in name.chars() {
        if c == '_' {
            raise = true;
            continue;
        }
        if raise {
            raise = false;
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}
