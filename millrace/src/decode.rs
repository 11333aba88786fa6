//! Structural coercion of payloads into typed packets.
//!
//! Ports declare a concrete element type while IIPs are authored as loose
//! literals, so delivery needs a bridge: a [`serde::Deserializer`] over the
//! [`Payload`] sum type. Two rules distinguish it from a plain value
//! deserializer:
//!
//! - struct fields match mapping keys **case-insensitively** (a payload key
//!   `"A"` fills a field `a`), recursively through nested structures;
//! - unit targets (`()` and unit structs) accept *any* payload. A port that
//!   only wants a presence signal is satisfied by whatever the IIP carried.
//!
//! Opaque (pre-typed) payloads never pass through here; they are handled by
//! exact type match before structural coercion is attempted.

use crate::payload::Payload;
use serde::de::{
    self, DeserializeOwned, DeserializeSeed, EnumAccess, IntoDeserializer, MapAccess, SeqAccess,
    VariantAccess, Visitor,
};
use std::fmt;

/// Error produced when a payload cannot be reshaped into the target type.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct DecodeError(String);

impl de::Error for DecodeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        DecodeError(msg.to_string())
    }
}

/// Decode a payload into `T` by structural matching.
pub(crate) fn from_payload<T: DeserializeOwned>(payload: &Payload) -> Result<T, DecodeError> {
    T::deserialize(PayloadDeserializer { payload })
}

struct PayloadDeserializer<'a> {
    payload: &'a Payload,
}

impl<'de> de::Deserializer<'de> for PayloadDeserializer<'_> {
    type Error = DecodeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.payload {
            Payload::Unit => visitor.visit_unit(),
            Payload::Bool(b) => visitor.visit_bool(*b),
            Payload::Int(n) => visitor.visit_i64(*n),
            Payload::Float(x) => visitor.visit_f64(*x),
            Payload::Str(s) => visitor.visit_str(s),
            Payload::Seq(items) => visitor.visit_seq(SeqDeserializer { iter: items.iter() }),
            Payload::Map(entries) => visitor.visit_map(MapDeserializer {
                iter: entries.iter(),
                fields: None,
                value: None,
            }),
            Payload::Opaque(op) => Err(de::Error::custom(format_args!(
                "pre-typed {} payload cannot be structurally decoded",
                op.type_name()
            ))),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.payload {
            Payload::Unit => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    // Presence-only targets swallow whatever the payload holds.
    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        match self.payload {
            Payload::Map(entries) => visitor.visit_map(MapDeserializer {
                iter: entries.iter(),
                fields: Some(fields),
                value: None,
            }),
            other => Err(de::Error::custom(format_args!(
                "expected a mapping for struct {name}, found {}",
                other.kind()
            ))),
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        match self.payload {
            Payload::Str(s) => visitor.visit_enum(s.as_str().into_deserializer()),
            Payload::Map(entries) if entries.len() == 1 => visitor.visit_enum(EnumDeserializer {
                variant: &entries[0].0,
                payload: &entries[0].1,
            }),
            other => Err(de::Error::custom(format_args!(
                "expected a string or single-entry mapping for enum {name}, found {}",
                other.kind()
            ))),
        }
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_unit()
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf seq tuple tuple_struct map identifier
    }
}

struct SeqDeserializer<'a> {
    iter: std::slice::Iter<'a, Payload>,
}

impl<'de> SeqAccess<'de> for SeqDeserializer<'_> {
    type Error = DecodeError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, DecodeError> {
        match self.iter.next() {
            Some(payload) => seed.deserialize(PayloadDeserializer { payload }).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct MapDeserializer<'a> {
    iter: std::slice::Iter<'a, (String, Payload)>,
    /// Declared field names when decoding into a struct; `None` for plain maps.
    fields: Option<&'static [&'static str]>,
    value: Option<&'a Payload>,
}

impl<'de, 'a> MapAccess<'de> for MapDeserializer<'a> {
    type Error = DecodeError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, DecodeError> {
        let Some((key, value)) = self.iter.next() else {
            return Ok(None);
        };
        self.value = Some(value);
        // Struct targets match keys to declared fields ignoring ASCII case;
        // unmatched keys pass through untouched and fall to serde's unknown
        // field handling.
        let name = self
            .fields
            .and_then(|fields| fields.iter().find(|f| f.eq_ignore_ascii_case(key)))
            .copied()
            .unwrap_or(key.as_str());
        seed.deserialize(name.into_deserializer()).map(Some)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, DecodeError> {
        let payload = self
            .value
            .take()
            .ok_or_else(|| de::Error::custom("value requested before key"))?;
        seed.deserialize(PayloadDeserializer { payload })
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct EnumDeserializer<'a> {
    variant: &'a str,
    payload: &'a Payload,
}

impl<'de, 'a> EnumAccess<'de> for EnumDeserializer<'a> {
    type Error = DecodeError;
    type Variant = VariantDeserializer<'a>;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, Self::Variant), DecodeError> {
        let variant = seed.deserialize(self.variant.into_deserializer())?;
        Ok((
            variant,
            VariantDeserializer {
                payload: self.payload,
            },
        ))
    }
}

struct VariantDeserializer<'a> {
    payload: &'a Payload,
}

impl<'de> VariantAccess<'de> for VariantDeserializer<'_> {
    type Error = DecodeError;

    fn unit_variant(self) -> Result<(), DecodeError> {
        match self.payload {
            Payload::Unit => Ok(()),
            other => Err(de::Error::custom(format_args!(
                "expected no data for unit variant, found {}",
                other.kind()
            ))),
        }
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value, DecodeError> {
        seed.deserialize(PayloadDeserializer {
            payload: self.payload,
        })
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, DecodeError> {
        match self.payload {
            Payload::Seq(items) => visitor.visit_seq(SeqDeserializer { iter: items.iter() }),
            other => Err(de::Error::custom(format_args!(
                "expected a sequence for tuple variant, found {}",
                other.kind()
            ))),
        }
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        match self.payload {
            Payload::Map(entries) => visitor.visit_map(MapDeserializer {
                iter: entries.iter(),
                fields: Some(fields),
                value: None,
            }),
            other => Err(de::Error::custom(format_args!(
                "expected a mapping for struct variant, found {}",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Greeting {
        a: String,
        b: String,
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct Job {
        name: String,
        retries: Option<u32>,
        greeting: Greeting,
    }

    #[derive(Debug, PartialEq, Deserialize)]
    enum Mode {
        Fast,
        Limited { per_second: u32 },
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct Tick;

    fn mapping(entries: &[(&str, Payload)]) -> Payload {
        Payload::Map(
            entries
                .iter()
                .map(|(k, v)| {
                    (
                        k.to_string(),
                        match v {
                            Payload::Int(n) => Payload::Int(*n),
                            Payload::Str(s) => Payload::Str(s.clone()),
                            _ => Payload::Unit,
                        },
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn decodes_struct_case_insensitively() {
        let payload = mapping(&[("A", Payload::from("hello")), ("B", Payload::from("world"))]);
        let greeting: Greeting = from_payload(&payload).unwrap();
        assert_eq!(
            greeting,
            Greeting {
                a: "hello".to_string(),
                b: "world".to_string(),
            }
        );
    }

    #[test]
    fn decodes_nested_structures() {
        let payload = Payload::from(serde_json::json!({
            "Name": "repeat",
            "Greeting": { "A": "hi", "b": "there" },
        }));
        let job: Job = from_payload(&payload).unwrap();
        assert_eq!(job.name, "repeat");
        assert_eq!(job.retries, None);
        assert_eq!(job.greeting.a, "hi");
        assert_eq!(job.greeting.b, "there");
    }

    #[test]
    fn missing_required_field_fails() {
        let payload = mapping(&[("a", Payload::from("hello"))]);
        assert!(from_payload::<Greeting>(&payload).is_err());
    }

    #[test]
    fn non_mapping_into_struct_fails() {
        assert!(from_payload::<Greeting>(&Payload::from("oops")).is_err());
    }

    #[test]
    fn unit_target_accepts_any_payload() {
        from_payload::<()>(&Payload::from(5)).unwrap();
        from_payload::<()>(&Payload::from("anything")).unwrap();
        from_payload::<Tick>(&Payload::from(serde_json::json!({ "x": 1 }))).unwrap();
    }

    #[test]
    fn decodes_scalars_and_sequences() {
        assert_eq!(from_payload::<i64>(&Payload::from(5)).unwrap(), 5);
        assert_eq!(from_payload::<u8>(&Payload::from(200)).unwrap(), 200);
        assert!(from_payload::<u8>(&Payload::from(300)).is_err());
        assert_eq!(from_payload::<f64>(&Payload::from(2.5)).unwrap(), 2.5);
        assert_eq!(
            from_payload::<Vec<i64>>(&Payload::Seq(vec![1.into(), 2.into()])).unwrap(),
            vec![1, 2]
        );
    }

    #[test]
    fn decodes_enums() {
        assert_eq!(from_payload::<Mode>(&Payload::from("Fast")).unwrap(), Mode::Fast);
        let payload = Payload::from(serde_json::json!({ "Limited": { "per_second": 10 } }));
        assert_eq!(
            from_payload::<Mode>(&payload).unwrap(),
            Mode::Limited { per_second: 10 }
        );
    }

    #[test]
    fn opaque_payload_never_structurally_decodes() {
        let payload = Payload::opaque(Greeting {
            a: String::new(),
            b: String::new(),
        });
        assert!(from_payload::<Greeting>(&payload).is_err());
    }
}
