//! Error types for the millrace network runtime.

use crate::address::Address;
use thiserror::Error;

/// Errors raised while parsing a textual port specifier into an [`Address`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The port name before the selector is empty.
    #[error("empty port name in '{0}'")]
    EmptyPort(String),

    /// A `[` selector was opened but never closed.
    #[error("unterminated selector in '{0}'")]
    UnterminatedSelector(String),

    /// The selector brackets contain nothing.
    #[error("empty selector in '{0}'")]
    EmptySelector(String),

    /// A numeric selector does not fit in a machine index.
    #[error("selector index out of range in '{0}'")]
    IndexOutOfRange(String),

    /// Characters follow the closing `]`.
    #[error("unexpected characters after selector in '{0}'")]
    TrailingInput(String),
}

/// Errors raised by graph mutation: process registration, port declaration
/// and the IIP registry. These are local and recoverable; prior graph state
/// is left untouched.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The named process was never added to the graph.
    #[error("no process named '{0}' in the graph")]
    ProcessNotFound(String),

    /// A process with this name is already registered.
    #[error("process '{0}' is already registered")]
    DuplicateProcess(String),

    /// The process already declares a port with this name.
    #[error("process '{0}' already declares port '{1}'")]
    DuplicatePort(String, String),

    /// No IIP is registered for the address.
    #[error("no IIP registered for '{0}'")]
    IipNotFound(Address),

    /// No network inport was exposed under this public name.
    #[error("no network inport named '{0}'")]
    UnknownInport(String),

    /// The textual address could not be parsed.
    #[error("invalid address: {0}")]
    Address(#[from] AddressError),

    /// Port lookup or attachment failed during wiring.
    #[error(transparent)]
    Port(#[from] PortError),
}

/// Errors raised by the port-lookup and channel-attachment capability.
#[derive(Debug, Error)]
pub enum PortError {
    /// The address names a process the graph does not know.
    #[error("no process named '{0}'")]
    UnknownProcess(String),

    /// The process exists but declares no such input port.
    #[error("process '{process}' has no input port '{port}'")]
    UnknownPort {
        /// Process that was searched.
        process: String,
        /// Port name that was not found.
        port: String,
    },

    /// The address selector does not match the port's declared kind,
    /// e.g. an indexed address on a singular port.
    #[error("port '{port}' is a {kind} port but was addressed with {selector}")]
    KindMismatch {
        /// Name of the mismatched port.
        port: String,
        /// Declared kind label: `singular`, `array` or `map`.
        kind: &'static str,
        /// Human description of the selector that was used.
        selector: String,
    },

    /// An array port was addressed past its declared size.
    #[error("index {index} is out of range for array port '{port}' of size {size}")]
    IndexOutOfRange {
        /// Name of the array port.
        port: String,
        /// Requested element index.
        index: usize,
        /// Declared number of elements.
        size: usize,
    },

    /// A connection requested a different element type than the port carries.
    #[error("port '{port}' carries {expected}, not {requested}")]
    ElementType {
        /// Rendered address of the port.
        port: String,
        /// Element type the port was declared with.
        expected: &'static str,
        /// Element type the caller asked for.
        requested: &'static str,
    },

    /// The receiving half of the channel is gone.
    #[error("channel for '{0}' is closed")]
    Closed(Address),
}

/// Fatal errors aborting the IIP dispatch pass. A failed dispatch means a
/// failed network start; already-launched deliveries are not rolled back.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Tier-3 lookup could not resolve the target process or port.
    #[error("cannot resolve IIP target '{addr}': {source}")]
    PortResolution {
        /// Address the IIP was registered for.
        addr: Address,
        /// Underlying lookup or attachment failure.
        source: PortError,
    },

    /// A resolved channel handle has no live receiver behind it.
    #[error("channel resolved for '{0}' is closed")]
    InvalidChannel(Address),

    /// The payload is neither the exact element type nor structurally
    /// convertible into it.
    #[error("cannot deliver IIP at '{addr}': {found} does not fit into {expected}")]
    TypeMismatch {
        /// Address the IIP was registered for.
        addr: Address,
        /// Description of the payload that was offered.
        found: String,
        /// Element type of the receiving channel.
        expected: &'static str,
    },
}
