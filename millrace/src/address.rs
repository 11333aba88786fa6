//! Addresses identify port endpoints within a network.
//!
//! An [`Address`] is the universal correlation key of the runtime: IIPs,
//! network inports and internal connections are all keyed by it. Equality is
//! structural over every field; there is no partial or fuzzy matching.

use crate::error::AddressError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Selects one element of an array-indexed or map-keyed port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selector {
    /// Element of an array port, zero-based.
    Index(usize),
    /// Element of a map port.
    Key(String),
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Index(i) => write!(f, "index {i}"),
            Selector::Key(k) => write!(f, "key '{k}'"),
        }
    }
}

/// Canonical `(process, port)` endpoint key, with an optional array index or
/// map key.
///
/// Parsed from a process name plus a port specifier such as `"Times"`,
/// `"In[3]"` or `"Options[mode]"`. A digit-only bracket body is an index,
/// anything else is a key. Immutable once constructed.
///
/// # Example
///
/// ```rust
/// use millrace::{Address, Selector};
///
/// let addr = Address::parse("repeat", "In[3]").unwrap();
/// assert_eq!(addr.process, "repeat");
/// assert_eq!(addr.port, "In");
/// assert_eq!(addr.selector, Some(Selector::Index(3)));
/// assert_eq!(addr.to_string(), "repeat.In[3]");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Name of the process owning the port.
    pub process: String,
    /// Name of the port on that process.
    pub port: String,
    /// Element selector for array and map ports.
    pub selector: Option<Selector>,
}

impl Address {
    /// Parse a process name and a port specifier into an address.
    ///
    /// # Errors
    ///
    /// Fails with [`AddressError`] on an empty port name, an unterminated or
    /// empty selector, an index that does not fit `usize`, or trailing input
    /// after the closing bracket.
    pub fn parse(process: impl Into<String>, port_spec: &str) -> Result<Self, AddressError> {
        let process = process.into();
        let Some(open) = port_spec.find('[') else {
            if port_spec.is_empty() {
                return Err(AddressError::EmptyPort(port_spec.to_string()));
            }
            return Ok(Self {
                process,
                port: port_spec.to_string(),
                selector: None,
            });
        };

        let (port, rest) = port_spec.split_at(open);
        if port.is_empty() {
            return Err(AddressError::EmptyPort(port_spec.to_string()));
        }
        let rest = &rest[1..];
        let Some(close) = rest.find(']') else {
            return Err(AddressError::UnterminatedSelector(port_spec.to_string()));
        };
        if close + 1 != rest.len() {
            return Err(AddressError::TrailingInput(port_spec.to_string()));
        }
        let body = &rest[..close];
        if body.is_empty() {
            return Err(AddressError::EmptySelector(port_spec.to_string()));
        }

        let selector = if body.bytes().all(|b| b.is_ascii_digit()) {
            let index = body
                .parse()
                .map_err(|_| AddressError::IndexOutOfRange(port_spec.to_string()))?;
            Selector::Index(index)
        } else {
            Selector::Key(body.to_string())
        };

        Ok(Self {
            process,
            port: port.to_string(),
            selector: Some(selector),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.process, self.port)?;
        match &self.selector {
            Some(Selector::Index(i)) => write!(f, "[{i}]"),
            Some(Selector::Key(k)) => write!(f, "[{k}]"),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_port() {
        let addr = Address::parse("proc", "Times").unwrap();
        assert_eq!(addr.process, "proc");
        assert_eq!(addr.port, "Times");
        assert_eq!(addr.selector, None);
    }

    #[test]
    fn parses_array_index() {
        let addr = Address::parse("proc", "In[12]").unwrap();
        assert_eq!(addr.selector, Some(Selector::Index(12)));
    }

    #[test]
    fn parses_map_key() {
        let addr = Address::parse("proc", "Options[mode]").unwrap();
        assert_eq!(addr.selector, Some(Selector::Key("mode".to_string())));
    }

    #[test]
    fn mixed_selector_body_is_a_key() {
        let addr = Address::parse("proc", "In[2b]").unwrap();
        assert_eq!(addr.selector, Some(Selector::Key("2b".to_string())));
    }

    #[test]
    fn rejects_malformed_specs() {
        assert!(matches!(
            Address::parse("p", ""),
            Err(AddressError::EmptyPort(_))
        ));
        assert!(matches!(
            Address::parse("p", "[0]"),
            Err(AddressError::EmptyPort(_))
        ));
        assert!(matches!(
            Address::parse("p", "In[0"),
            Err(AddressError::UnterminatedSelector(_))
        ));
        assert!(matches!(
            Address::parse("p", "In[]"),
            Err(AddressError::EmptySelector(_))
        ));
        assert!(matches!(
            Address::parse("p", "In[0]x"),
            Err(AddressError::TrailingInput(_))
        ));
    }

    #[test]
    fn equality_is_structural() {
        let a = Address::parse("p", "In[0]").unwrap();
        let b = Address::parse("p", "In[0]").unwrap();
        let c = Address::parse("p", "In[1]").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn displays_canonical_form() {
        assert_eq!(Address::parse("p", "In").unwrap().to_string(), "p.In");
        assert_eq!(Address::parse("p", "In[3]").unwrap().to_string(), "p.In[3]");
        assert_eq!(
            Address::parse("p", "In[key]").unwrap().to_string(),
            "p.In[key]"
        );
    }
}
