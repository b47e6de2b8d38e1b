use std::{cell::RefCell, collections::HashSet, fmt, rc::Rc};

use crate::errors::AmfResult;
use crate::{amf0, amf3};

/// Shared node in a decoded value graph.
///
/// Containers are reference counted so that back-references in a stream
/// resolve to the *same* node, including a value that refers to itself.
pub type Shared<T> = Rc<RefCell<T>>;

/// Wrap `t` in a fresh shared node.
pub fn shared<T>(t: T) -> Shared<T> {
    Rc::new(RefCell::new(t))
}

/// Wire dialect selector for the top-level entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Amf0,
    Amf3,
}

/// A dynamically typed AMF value, shared by both wire dialects.
///
/// `PartialEq` and `Debug` are hand-written: container nodes may be
/// self-referential, so both walk the graph with a visited set instead
/// of recursing blindly.
#[derive(Clone)]
pub enum Value {
    /// AMF0 `null`/`undefined`/`unsupported` and AMF3 `undefined`/`null`
    /// all decode here.
    Null,
    Boolean(bool),
    /// Every AMF0 number and AMF3 double.
    Number(f64),
    /// AMF3 only; the encoder falls back to [`Value::Number`] outside
    /// [`amf3::MIN_INTEGER`]`..=`[`amf3::MAX_INTEGER`].
    Integer(i32),
    String(String),
    /// Milliseconds since the Unix epoch, UTC. The AMF0 timezone field is
    /// read and discarded, and written as zero.
    Date { unix_millis: f64 },
    /// Dense array.
    Array(Shared<Vec<Value>>),
    /// AMF3 array carrying named entries next to its dense part.
    MixedArray(Shared<MixedArray>),
    /// Anonymous key-value object: AMF0 object/ECMA hash, AMF3 anonymous
    /// dynamic object. Insertion ordered.
    Mapping(Shared<Vec<(String, Value)>>),
    /// Class-mapped object, see [`crate::mapper::ClassMapper`].
    Record(Shared<Record>),
    /// AMF3 only.
    ByteArray(Shared<Vec<u8>>),
    /// AMF3 `xml`/`xml-doc` (the flavor distinction is dropped on decode).
    Xml(Rc<str>),
    /// AMF3 only; keys may be arbitrary values.
    Dictionary(Shared<Vec<(Value, Value)>>),
}

/// The two halves of an AMF3 array that carries named entries.
///
/// Cycles always pass through a [`Value`] node, so the derived impls
/// terminate.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MixedArray {
    pub assoc: Vec<(String, Value)>,
    pub dense: Vec<Value>,
}

/// A typed object: class name plus sealed, dynamic and externalizable
/// parts.
///
/// Cycles always pass through a [`Value`] node, so the derived impls
/// terminate.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Wire class name; empty means anonymous.
    pub class_name: String,
    /// Properties declared by the trait, in trait order.
    pub sealed: Vec<(String, Value)>,
    /// Extra named properties; `Some` marks the record as dynamic.
    pub dynamic: Option<Vec<(String, Value)>>,
    /// Opaque payload of an externalizable class.
    pub external: Option<Vec<u8>>,
}

impl Record {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            sealed: Vec::new(),
            dynamic: None,
            external: None,
        }
    }
}

/// An AMF3 trait descriptor: the shape of an object on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Traits {
    pub class_name: String,
    pub externalizable: bool,
    pub dynamic: bool,
    pub members: Vec<String>,
}

impl Value {
    /// Decode a single value with the anonymous class mapper.
    pub fn read_from(bytes: &[u8], version: Version) -> AmfResult<Self> {
        match version {
            Version::Amf0 => amf0::decode(bytes),
            Version::Amf3 => amf3::decode(bytes),
        }
    }

    /// Encode this value with the anonymous class mapper.
    pub fn write_as(&self, version: Version) -> AmfResult<Vec<u8>> {
        match version {
            Version::Amf0 => amf0::encode(self),
            Version::Amf3 => amf3::encode(self),
        }
    }

    pub fn try_as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Xml(xml) => Some(xml),
            _ => None,
        }
    }

    pub fn try_as_f64(&self) -> Option<f64> {
        match *self {
            Value::Number(n) => Some(n),
            Value::Integer(i) => Some(i as f64),
            _ => None,
        }
    }

    pub fn try_as_bool(&self) -> Option<bool> {
        match *self {
            Value::Boolean(b) => Some(b),
            _ => None,
        }
    }

    pub fn try_into_values(self) -> Result<Box<dyn Iterator<Item = Value>>, Self> {
        match self {
            Value::Array(entries) => Ok(Box::new(entries.borrow().clone().into_iter())),
            Value::MixedArray(inner) => Ok(Box::new(inner.borrow().dense.clone().into_iter())),
            _ => Err(self),
        }
    }

    pub fn try_into_pairs(self) -> Result<Box<dyn Iterator<Item = (String, Value)>>, Self> {
        match self {
            Value::Mapping(entries) => Ok(Box::new(entries.borrow().clone().into_iter())),
            Value::MixedArray(inner) => Ok(Box::new(inner.borrow().assoc.clone().into_iter())),
            Value::Record(record) => {
                let record = record.borrow();
                let mut pairs = record.sealed.clone();
                if let Some(dynamic) = &record.dynamic {
                    pairs.extend(dynamic.iter().cloned());
                }
                Ok(Box::new(pairs.into_iter()))
            }
            _ => Err(self),
        }
    }

    /// Node address for the encode-side object cache; `None` for values
    /// without identity.
    pub(crate) fn identity(&self) -> Option<usize> {
        match self {
            Value::Array(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::MixedArray(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::Mapping(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::Record(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::ByteArray(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::Dictionary(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::Xml(rc) => Some(Rc::as_ptr(rc) as *const u8 as usize),
            _ => None,
        }
    }
}

/// Equality is structural; a pair of nodes already being compared on the
/// current walk is taken as equal, so cyclic graphs terminate.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        eq_values(self, other, &mut HashSet::new())
    }
}

fn eq_values(a: &Value, b: &Value, visited: &mut HashSet<(usize, usize)>) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Integer(x), Value::Integer(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Date { unix_millis: x }, Value::Date { unix_millis: y }) => x == y,
        (Value::Xml(x), Value::Xml(y)) => x == y,
        (Value::ByteArray(x), Value::ByteArray(y)) => {
            Rc::ptr_eq(x, y) || *x.borrow() == *y.borrow()
        }
        (Value::Array(x), Value::Array(y)) => {
            let key = (Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
            if Rc::ptr_eq(x, y) || !visited.insert(key) {
                return true;
            }
            eq_slices(&x.borrow(), &y.borrow(), visited)
        }
        (Value::MixedArray(x), Value::MixedArray(y)) => {
            let key = (Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
            if Rc::ptr_eq(x, y) || !visited.insert(key) {
                return true;
            }
            let x = x.borrow();
            let y = y.borrow();
            eq_pairs(&x.assoc, &y.assoc, visited) && eq_slices(&x.dense, &y.dense, visited)
        }
        (Value::Mapping(x), Value::Mapping(y)) => {
            let key = (Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
            if Rc::ptr_eq(x, y) || !visited.insert(key) {
                return true;
            }
            eq_pairs(&x.borrow(), &y.borrow(), visited)
        }
        (Value::Record(x), Value::Record(y)) => {
            let key = (Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
            if Rc::ptr_eq(x, y) || !visited.insert(key) {
                return true;
            }
            let x = x.borrow();
            let y = y.borrow();
            x.class_name == y.class_name
                && x.external == y.external
                && eq_pairs(&x.sealed, &y.sealed, visited)
                && match (&x.dynamic, &y.dynamic) {
                    (None, None) => true,
                    (Some(xd), Some(yd)) => eq_pairs(xd, yd, visited),
                    _ => false,
                }
        }
        (Value::Dictionary(x), Value::Dictionary(y)) => {
            let key = (Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
            if Rc::ptr_eq(x, y) || !visited.insert(key) {
                return true;
            }
            let x = x.borrow();
            let y = y.borrow();
            x.len() == y.len()
                && x.iter().zip(y.iter()).all(|((xk, xv), (yk, yv))| {
                    eq_values(xk, yk, visited) && eq_values(xv, yv, visited)
                })
        }
        _ => false,
    }
}

fn eq_slices(a: &[Value], b: &[Value], visited: &mut HashSet<(usize, usize)>) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| eq_values(x, y, visited))
}

fn eq_pairs(
    a: &[(String, Value)],
    b: &[(String, Value)],
    visited: &mut HashSet<(usize, usize)>,
) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|((xk, xv), (yk, yv))| xk == yk && eq_values(xv, yv, visited))
}

/// A node already on the current formatting path prints as `<cycle>`.
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visited = RefCell::new(HashSet::new());
        fmt::Debug::fmt(
            &DebugNode {
                value: self,
                visited: &visited,
            },
            f,
        )
    }
}

struct DebugNode<'a> {
    value: &'a Value,
    visited: &'a RefCell<HashSet<usize>>,
}

struct DebugValues<'a> {
    entries: &'a [Value],
    visited: &'a RefCell<HashSet<usize>>,
}

struct DebugPairs<'a> {
    entries: &'a [(String, Value)],
    visited: &'a RefCell<HashSet<usize>>,
}

struct DebugKeyed<'a> {
    entries: &'a [(Value, Value)],
    visited: &'a RefCell<HashSet<usize>>,
}

impl fmt::Debug for DebugValues<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|value| DebugNode {
                value,
                visited: self.visited,
            }))
            .finish()
    }
}

impl fmt::Debug for DebugPairs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(key, value)| {
                (
                    key,
                    DebugNode {
                        value,
                        visited: self.visited,
                    },
                )
            }))
            .finish()
    }
}

impl fmt::Debug for DebugKeyed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(key, value)| {
                (
                    DebugNode {
                        value: key,
                        visited: self.visited,
                    },
                    DebugNode {
                        value,
                        visited: self.visited,
                    },
                )
            }))
            .finish()
    }
}

impl fmt::Debug for DebugNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Null => f.write_str("Null"),
            Value::Boolean(b) => f.debug_tuple("Boolean").field(b).finish(),
            Value::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Value::Integer(i) => f.debug_tuple("Integer").field(i).finish(),
            Value::String(s) => f.debug_tuple("String").field(s).finish(),
            Value::Date { unix_millis } => f
                .debug_struct("Date")
                .field("unix_millis", unix_millis)
                .finish(),
            Value::Xml(xml) => f.debug_tuple("Xml").field(xml).finish(),
            Value::ByteArray(bytes) => f.debug_tuple("ByteArray").field(&bytes.borrow()).finish(),
            Value::Array(rc) => {
                let key = Rc::as_ptr(rc) as usize;
                if !self.visited.borrow_mut().insert(key) {
                    return f.write_str("Array(<cycle>)");
                }
                let entries = rc.borrow();
                let result = f
                    .debug_tuple("Array")
                    .field(&DebugValues {
                        entries: &entries,
                        visited: self.visited,
                    })
                    .finish();
                self.visited.borrow_mut().remove(&key);
                result
            }
            Value::MixedArray(rc) => {
                let key = Rc::as_ptr(rc) as usize;
                if !self.visited.borrow_mut().insert(key) {
                    return f.write_str("MixedArray(<cycle>)");
                }
                let inner = rc.borrow();
                let result = f
                    .debug_struct("MixedArray")
                    .field(
                        "assoc",
                        &DebugPairs {
                            entries: &inner.assoc,
                            visited: self.visited,
                        },
                    )
                    .field(
                        "dense",
                        &DebugValues {
                            entries: &inner.dense,
                            visited: self.visited,
                        },
                    )
                    .finish();
                self.visited.borrow_mut().remove(&key);
                result
            }
            Value::Mapping(rc) => {
                let key = Rc::as_ptr(rc) as usize;
                if !self.visited.borrow_mut().insert(key) {
                    return f.write_str("Mapping(<cycle>)");
                }
                let entries = rc.borrow();
                let result = f
                    .debug_tuple("Mapping")
                    .field(&DebugPairs {
                        entries: &entries,
                        visited: self.visited,
                    })
                    .finish();
                self.visited.borrow_mut().remove(&key);
                result
            }
            Value::Record(rc) => {
                let key = Rc::as_ptr(rc) as usize;
                if !self.visited.borrow_mut().insert(key) {
                    return f.write_str("Record(<cycle>)");
                }
                let record = rc.borrow();
                let dynamic = record.dynamic.as_deref().map(|entries| DebugPairs {
                    entries,
                    visited: self.visited,
                });
                let result = f
                    .debug_struct("Record")
                    .field("class_name", &record.class_name)
                    .field(
                        "sealed",
                        &DebugPairs {
                            entries: &record.sealed,
                            visited: self.visited,
                        },
                    )
                    .field("dynamic", &dynamic)
                    .field("external", &record.external)
                    .finish();
                self.visited.borrow_mut().remove(&key);
                result
            }
            Value::Dictionary(rc) => {
                let key = Rc::as_ptr(rc) as usize;
                if !self.visited.borrow_mut().insert(key) {
                    return f.write_str("Dictionary(<cycle>)");
                }
                let entries = rc.borrow();
                let result = f
                    .debug_tuple("Dictionary")
                    .field(&DebugKeyed {
                        entries: &entries,
                        visited: self.visited,
                    })
                    .finish();
                self.visited.borrow_mut().remove(&key);
                result
            }
        }
    }
}

/// Makes a `String` value.
pub fn string<T>(t: T) -> Value
where
    String: From<T>,
{
    Value::String(From::from(t))
}

/// Makes a `Number` value.
pub fn number<T>(t: T) -> Value
where
    f64: From<T>,
{
    Value::Number(From::from(t))
}

/// Makes a dense `Array` value.
pub fn array<I>(entries: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    Value::Array(shared(entries.into_iter().collect()))
}

/// Makes an anonymous `Mapping` value.
pub fn mapping<I, K>(entries: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    String: From<K>,
{
    Value::Mapping(shared(
        entries
            .into_iter()
            .map(|(k, v)| (From::from(k), v))
            .collect(),
    ))
}
