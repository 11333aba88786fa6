//! The network graph: processes, wiring tables, configuration, lifecycle.
//!
//! A [`Graph`] is assembled in three steps before it starts:
//!
//! 1. register processes with [`Graph::add_process`];
//! 2. declare their typed input ports ([`Graph::add_input`] and the array/map
//!    variants), keeping the returned receive handles for the process bodies;
//! 3. wire the static topology: [`Graph::expose_inport`] /
//!    [`Graph::open_inport`] for graph-level inports, [`Graph::connect`] for
//!    internal connections, [`Graph::add_iip`] for start-time seed values.
//!
//! [`Graph::start`] then dispatches every pending IIP and returns once all
//! deliveries are launched. Process bodies are plain tasks owned by the
//! caller; the graph does not schedule them.
//!
//! The graph is a single-writer structure: every mutation takes `&mut self`,
//! so wiring, IIP registration and dispatch are serialized by the borrow
//! checker. Configure everything before `start`, not after.

use crate::address::{Address, Selector};
use crate::error::{DispatchError, GraphError, PortError};
use crate::iip::Iip;
use crate::port::{
    ArrayInputPort, ChannelHandle, InputPort, MapInputPort, NetworkSender, OutputPort, Packet,
    PortAttach, PortSlot,
};
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Network-wide tunables.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Capacity of channels created by the graph, including on-demand IIP
    /// attachments. Tokio bounded channels have no rendezvous mode; a
    /// configured size of zero is treated as one.
    pub buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { buffer_size: 1 }
    }
}

pub(crate) struct ProcessEntry {
    pub(crate) ports: HashMap<String, Box<dyn PortAttach>>,
}

/// Tier-1 table entry: a graph-level inport mapped onto a process port.
pub(crate) struct NetworkInPort {
    pub(crate) name: String,
    pub(crate) addr: Address,
    pub(crate) channel: Option<ChannelHandle>,
}

/// Tier-2 table entry: an internal connection and its bound channel.
pub(crate) struct Connection {
    pub(crate) src: Address,
    pub(crate) tgt: Address,
    pub(crate) channel: Option<ChannelHandle>,
}

/// A flow-based-programming network graph.
pub struct Graph {
    pub(crate) config: NetworkConfig,
    pub(crate) procs: HashMap<String, ProcessEntry>,
    pub(crate) inports: Vec<NetworkInPort>,
    pub(crate) connections: Vec<Connection>,
    pub(crate) iips: Vec<Iip>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) deliveries: Vec<JoinHandle<()>>,
}

impl Graph {
    /// Create an empty graph with the given configuration.
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            procs: HashMap::new(),
            inports: Vec::new(),
            connections: Vec::new(),
            iips: Vec::new(),
            shutdown: CancellationToken::new(),
            deliveries: Vec::new(),
        }
    }

    /// Register a process under `name`.
    ///
    /// # Errors
    ///
    /// [`GraphError::DuplicateProcess`] if the name is taken.
    pub fn add_process(&mut self, name: impl Into<String>) -> Result<(), GraphError> {
        let name = name.into();
        if self.procs.contains_key(&name) {
            return Err(GraphError::DuplicateProcess(name));
        }
        tracing::debug!(process = %name, "process registered");
        self.procs.insert(
            name,
            ProcessEntry {
                ports: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Whether a process with this name is registered.
    pub fn has_process(&self, name: &str) -> bool {
        self.procs.contains_key(name)
    }

    /// Declare a singular input port of element type `T` on a process,
    /// returning the receive handle for the process body.
    ///
    /// # Errors
    ///
    /// [`GraphError::ProcessNotFound`] or [`GraphError::DuplicatePort`].
    pub fn add_input<T: Packet>(
        &mut self,
        process: &str,
        port: &str,
    ) -> Result<InputPort<T>, GraphError> {
        let (slot, handle) = PortSlot::<T>::singular(port);
        self.install_port(process, port, Box::new(slot))?;
        Ok(handle)
    }

    /// Declare an array input port with `size` elements.
    ///
    /// # Errors
    ///
    /// [`GraphError::ProcessNotFound`] or [`GraphError::DuplicatePort`].
    pub fn add_array_input<T: Packet>(
        &mut self,
        process: &str,
        port: &str,
        size: usize,
    ) -> Result<ArrayInputPort<T>, GraphError> {
        let (slot, handle) = PortSlot::<T>::array(port, size);
        self.install_port(process, port, Box::new(slot))?;
        Ok(handle)
    }

    /// Declare a map input port with string-keyed elements.
    ///
    /// # Errors
    ///
    /// [`GraphError::ProcessNotFound`] or [`GraphError::DuplicatePort`].
    pub fn add_map_input<T: Packet>(
        &mut self,
        process: &str,
        port: &str,
    ) -> Result<MapInputPort<T>, GraphError> {
        let (slot, handle) = PortSlot::<T>::map(port);
        self.install_port(process, port, Box::new(slot))?;
        Ok(handle)
    }

    fn install_port(
        &mut self,
        process: &str,
        port: &str,
        slot: Box<dyn PortAttach>,
    ) -> Result<(), GraphError> {
        let entry = self
            .procs
            .get_mut(process)
            .ok_or_else(|| GraphError::ProcessNotFound(process.to_string()))?;
        if entry.ports.contains_key(port) {
            return Err(GraphError::DuplicatePort(
                process.to_string(),
                port.to_string(),
            ));
        }
        entry.ports.insert(port.to_string(), slot);
        Ok(())
    }

    /// Expose a process port as a graph-level inport under a public name.
    /// The entry starts unwired; [`Graph::open_inport`] binds its channel.
    ///
    /// # Errors
    ///
    /// [`GraphError::ProcessNotFound`] or an address parse failure.
    pub fn expose_inport(
        &mut self,
        public: &str,
        process: &str,
        port_spec: &str,
    ) -> Result<(), GraphError> {
        let addr = Address::parse(process, port_spec)?;
        if !self.has_process(process) {
            return Err(GraphError::ProcessNotFound(process.to_string()));
        }
        self.inports.push(NetworkInPort {
            name: public.to_string(),
            addr,
            channel: None,
        });
        Ok(())
    }

    /// Attach a channel for an exposed inport and return the external sender
    /// feeding it. The channel handle is retained in the inport table, so the
    /// channel outlives the returned sender.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownInport`] or a port lookup/attachment failure.
    pub fn open_inport(&mut self, public: &str) -> Result<NetworkSender, GraphError> {
        let index = self
            .inports
            .iter()
            .position(|entry| entry.name == public)
            .ok_or_else(|| GraphError::UnknownInport(public.to_string()))?;
        let addr = self.inports[index].addr.clone();
        let buffer = self.config.buffer_size;
        let handle = {
            let (port, selector) = self.lookup_receive_port(&addr)?;
            port.attach(selector, buffer)?
        };
        tracing::debug!(inport = %public, addr = %addr, "inport opened");
        self.inports[index].channel = Some(handle.clone());
        Ok(NetworkSender::new(handle, addr))
    }

    /// Wire an internal connection from a process's output port to another
    /// process's input port, returning the typed sender for the source body.
    /// The channel handle is retained in the connection table.
    ///
    /// # Errors
    ///
    /// Fails if either process is unknown, the target port cannot be
    /// attached, or `T` is not the target port's element type.
    pub fn connect<T: Packet>(
        &mut self,
        src_process: &str,
        src_port: &str,
        tgt_process: &str,
        tgt_port_spec: &str,
    ) -> Result<OutputPort<T>, GraphError> {
        let src = Address::parse(src_process, src_port)?;
        let tgt = Address::parse(tgt_process, tgt_port_spec)?;
        if !self.has_process(src_process) {
            return Err(GraphError::ProcessNotFound(src_process.to_string()));
        }
        let buffer = self.config.buffer_size;
        let handle = {
            let (port, selector) = self.lookup_receive_port(&tgt)?;
            port.attach(selector, buffer)?
        };
        let Some(tx) = handle.typed::<T>() else {
            return Err(GraphError::Port(PortError::ElementType {
                port: tgt.to_string(),
                expected: handle.element_type(),
                requested: std::any::type_name::<T>(),
            }));
        };
        tracing::debug!(src = %src, tgt = %tgt, "connection wired");
        self.connections.push(Connection {
            src,
            tgt: tgt.clone(),
            channel: Some(handle),
        });
        Ok(OutputPort::new(tx, tgt))
    }

    /// Resolve a process port for receiving: the tier-3 lookup capability.
    pub(crate) fn lookup_receive_port<'a>(
        &'a mut self,
        addr: &'a Address,
    ) -> Result<(&'a mut dyn PortAttach, Option<&'a Selector>), PortError> {
        let entry = self
            .procs
            .get_mut(&addr.process)
            .ok_or_else(|| PortError::UnknownProcess(addr.process.clone()))?;
        let port = entry
            .ports
            .get_mut(&addr.port)
            .ok_or_else(|| PortError::UnknownPort {
                process: addr.process.clone(),
                port: addr.port.clone(),
            })?;
        Ok((port.as_mut(), addr.selector.as_ref()))
    }

    /// Start the network: dispatch every pending IIP.
    ///
    /// Returns once all deliveries are launched, not once they complete.
    /// Must be called from within a Tokio runtime; delivery tasks are spawned
    /// onto it.
    ///
    /// # Errors
    ///
    /// Any [`DispatchError`] aborts the pass and must be treated as a failed
    /// network start. Already-launched deliveries are not rolled back.
    pub fn start(&mut self) -> Result<(), DispatchError> {
        tracing::info!(
            processes = self.procs.len(),
            pending_iips = self.iips.len(),
            "starting network"
        );
        self.dispatch_iips()
    }

    /// Cancel in-flight deliveries and reclaim their tasks.
    ///
    /// A delivery parked on a port nobody reads would otherwise stay parked
    /// for the life of the process; shutdown bounds that.
    pub fn shutdown(&mut self) {
        self.shutdown.cancel();
        for task in self.deliveries.drain(..) {
            task.abort();
        }
        tracing::info!("network shut down");
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new(NetworkConfig::default())
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
