//! Loosely-typed IIP payload values.
//!
//! Ports are declared with a concrete element type, but IIPs are usually
//! authored as literals: a number, a string, a key/value mapping. [`Payload`]
//! is the closed sum of everything an IIP can carry until delivery, when the
//! type reconciler either passes it through (pre-typed values) or reshapes it
//! into the channel's element type (see [`crate::decode`]).

use std::any::Any;
use std::fmt;

/// A loosely-typed value parked at an address until network start.
///
/// The variants fall into four groups: scalars, ordered sequences,
/// string-keyed mappings, and pre-typed opaque values that are delivered by
/// exact type match only.
///
/// Payloads are built with `From` conversions, [`Payload::opaque`], or from a
/// [`serde_json::Value`]:
///
/// ```rust
/// use millrace::Payload;
///
/// let scalar = Payload::from(5);
/// let mapping = Payload::from(serde_json::json!({ "a": "hello", "b": "world" }));
/// assert_eq!(scalar.kind(), "integer");
/// assert_eq!(mapping.kind(), "mapping");
/// ```
#[derive(Debug)]
pub enum Payload {
    /// Absence of a value; also what JSON `null` converts into.
    Unit,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Floating-point scalar.
    Float(f64),
    /// String scalar.
    Str(String),
    /// Ordered sequence of payloads.
    Seq(Vec<Payload>),
    /// String-keyed mapping, in authoring order.
    Map(Vec<(String, Payload)>),
    /// A pre-typed value; see [`Payload::opaque`].
    Opaque(OpaquePayload),
}

impl Payload {
    /// Wrap an already-typed value for exact-type delivery.
    ///
    /// An opaque payload is delivered unchanged when the target channel's
    /// element type matches exactly; it never structurally decodes into a
    /// different type.
    pub fn opaque<T: Send + 'static>(value: T) -> Self {
        Payload::Opaque(OpaquePayload {
            value: Box::new(value),
            type_name: std::any::type_name::<T>(),
        })
    }

    /// Build a mapping payload from key/value entries.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Payload)>) -> Self {
        Payload::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Short description of the payload shape, used in error messages.
    /// Opaque payloads report their captured type name.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Unit => "unit",
            Payload::Bool(_) => "boolean",
            Payload::Int(_) => "integer",
            Payload::Float(_) => "float",
            Payload::Str(_) => "string",
            Payload::Seq(_) => "sequence",
            Payload::Map(_) => "mapping",
            Payload::Opaque(op) => op.type_name,
        }
    }
}

/// A boxed value of a concrete Rust type, remembered by name for diagnostics.
pub struct OpaquePayload {
    pub(crate) value: Box<dyn Any + Send>,
    pub(crate) type_name: &'static str,
}

impl OpaquePayload {
    /// The `std::any::type_name` captured at construction.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Recover the typed value, or get the payload back on a type mismatch.
    pub(crate) fn downcast<T: 'static>(self) -> Result<T, OpaquePayload> {
        match self.value.downcast::<T>() {
            Ok(boxed) => Ok(*boxed),
            Err(value) => Err(OpaquePayload {
                value,
                type_name: self.type_name,
            }),
        }
    }
}

impl fmt::Debug for OpaquePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OpaquePayload").field(&self.type_name).finish()
    }
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Payload::Unit
    }
}

impl From<bool> for Payload {
    fn from(v: bool) -> Self {
        Payload::Bool(v)
    }
}

macro_rules! payload_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Payload {
            fn from(v: $ty) -> Self {
                Payload::Int(v as i64)
            }
        })*
    };
}

payload_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Payload {
    fn from(v: f32) -> Self {
        Payload::Float(f64::from(v))
    }
}

impl From<f64> for Payload {
    fn from(v: f64) -> Self {
        Payload::Float(v)
    }
}

impl From<&str> for Payload {
    fn from(v: &str) -> Self {
        Payload::Str(v.to_string())
    }
}

impl From<String> for Payload {
    fn from(v: String) -> Self {
        Payload::Str(v)
    }
}

impl From<Vec<Payload>> for Payload {
    fn from(v: Vec<Payload>) -> Self {
        Payload::Seq(v)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => Payload::Unit,
            Value::Bool(b) => Payload::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Payload::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Payload::Float(f)
                } else {
                    Payload::Unit
                }
            }
            Value::String(s) => Payload::Str(s),
            Value::Array(items) => Payload::Seq(items.into_iter().map(Payload::from).collect()),
            Value::Object(entries) => Payload::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Payload::from(v)))
                    .collect(),
            ),
        }
    }
}
