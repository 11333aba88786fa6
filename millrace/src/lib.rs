//! # Millrace
//!
//! A flow-based programming (FBP) network runtime: named processes joined by
//! typed channels, seeded at start time with Initial Information Packets
//! (IIPs): statically known values injected into the network before, or
//! independently of, any external input.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Graph                                                        │
//! │                                                              │
//! │  processes ──► declared input ports (singular / array / map) │
//! │  inports ────► tier-1 channel table (graph-level inputs)     │
//! │  connections ► tier-2 channel table (internal wiring)        │
//! │  iips ───────► pending (address, payload) registry           │
//! │                                                              │
//! │  start() ─► per IIP: resolve ─► reconcile ─► spawned send    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! IIP dispatch resolves each pending packet to a channel through a strict
//! three-tier lookup (inport table, connection table, on-demand attachment),
//! reconciles the loosely-typed payload against the channel's declared
//! element type (exact match first, structural coercion as the fallback),
//! and performs every send on its own task so a slow or absent receiver
//! cannot stall network startup. Channels attached on demand are closed
//! right after their one-shot send, so downstream processes observe
//! end-of-input correctly.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use millrace::{Graph, NetworkConfig};
//!
//! let mut net = Graph::new(NetworkConfig::default());
//! net.add_process("repeat")?;
//! let mut times = net.add_input::<i64>("repeat", "Times")?;
//!
//! net.add_iip("repeat", "Times", 5)?;
//! net.start()?;
//!
//! // Process body: reads the seeded value, then observes channel close.
//! tokio::spawn(async move {
//!     assert_eq!(times.recv().await, Some(5));
//!     assert_eq!(times.recv().await, None);
//! });
//! ```
//!
//! ## Scope
//!
//! The crate deliberately stops at the seeding boundary: process bodies are
//! plain Tokio tasks owned by the caller, there is no flow control beyond
//! channel buffering, no topology validation, and no distributed delivery.

#![deny(missing_docs)]

pub mod address;
pub mod decode;
pub mod error;
pub mod graph;
mod iip;
pub mod payload;
pub mod port;
pub mod prelude;

pub use address::{Address, Selector};
pub use decode::DecodeError;
pub use error::{AddressError, DispatchError, GraphError, PortError};
pub use graph::{Graph, NetworkConfig};
pub use payload::{OpaquePayload, Payload};
pub use port::{
    ArrayInputPort, ChannelHandle, InputPort, MapInputPort, NetworkSender, OutputPort, Packet,
    PortDescriptor, PortKind,
};
