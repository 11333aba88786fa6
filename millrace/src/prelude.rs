//! Common imports for building and running millrace networks.

pub use crate::address::{Address, Selector};
pub use crate::error::{AddressError, DispatchError, GraphError, PortError};
pub use crate::graph::{Graph, NetworkConfig};
pub use crate::payload::Payload;
pub use crate::port::{
    ArrayInputPort, InputPort, MapInputPort, NetworkSender, OutputPort, Packet,
};

// Commonly used external types
pub use serde::Deserialize;
