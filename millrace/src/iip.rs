//! Initial Information Packets: registry and start-time dispatch.
//!
//! An IIP parks a payload at an address until the network starts. Dispatch
//! resolves each pending IIP to a concrete channel through a strict
//! three-tier lookup, reconciles the payload against the channel's element
//! type, and launches an independent delivery task for the send:
//!
//! ```text
//! for each pending IIP (in registry order):
//!   1. inport table      — first wired entry with an equal address
//!   2. connection table  — first wired entry targeting the address
//!   3. on-demand attach  — fresh channel bound through the port lookup
//!   then: validity check → type reconciliation → spawned send
//! ```
//!
//! Sends run outside the dispatch loop because a send blocks until a
//! receiver is ready; one slow port must not stall the remaining IIPs or the
//! start call itself. Dispatch therefore returns once every delivery is
//! *launched*. Each task races its send against the graph's shutdown token,
//! so a delivery parked on a port nobody reads is reclaimed at shutdown
//! instead of leaking.
//!
//! Failures are fail-fast: the first unresolvable or unreconcilable IIP
//! aborts the pass and the network start, without rolling back deliveries
//! that were already launched.

use crate::address::Address;
use crate::error::{DispatchError, GraphError};
use crate::graph::Graph;
use crate::payload::Payload;
use crate::port::ChannelHandle;

/// A pending initial packet: a payload parked at an address.
#[derive(Debug)]
pub(crate) struct Iip {
    pub(crate) payload: Payload,
    pub(crate) addr: Address,
}

impl Graph {
    /// Register an IIP for `process.port_spec`, to be delivered at start.
    ///
    /// The process must already exist; the port is only resolved at
    /// dispatch. Registering a second IIP for the same address is permitted
    /// but only one receiver binding survives, so callers wanting single
    /// delivery must not double-register.
    ///
    /// # Errors
    ///
    /// [`GraphError::ProcessNotFound`] or an address parse failure.
    pub fn add_iip(
        &mut self,
        process: &str,
        port_spec: &str,
        payload: impl Into<Payload>,
    ) -> Result<(), GraphError> {
        let addr = Address::parse(process, port_spec)?;
        if !self.has_process(process) {
            return Err(GraphError::ProcessNotFound(process.to_string()));
        }
        tracing::debug!(addr = %addr, "IIP registered");
        self.iips.push(Iip {
            payload: payload.into(),
            addr,
        });
        Ok(())
    }

    /// Remove the first IIP registered for `process.port_spec`.
    ///
    /// Removal swaps the last entry into the vacated position, so the
    /// relative order of the remaining IIPs is not preserved.
    ///
    /// # Errors
    ///
    /// [`GraphError::IipNotFound`] or an address parse failure.
    pub fn remove_iip(&mut self, process: &str, port_spec: &str) -> Result<(), GraphError> {
        let addr = Address::parse(process, port_spec)?;
        match self.iips.iter().position(|iip| iip.addr == addr) {
            Some(index) => {
                self.iips.swap_remove(index);
                tracing::debug!(addr = %addr, "IIP removed");
                Ok(())
            }
            None => Err(GraphError::IipNotFound(addr)),
        }
    }

    /// Drain the registry and launch a delivery for every pending IIP.
    pub(crate) fn dispatch_iips(&mut self) -> Result<(), DispatchError> {
        let pending = std::mem::take(&mut self.iips);
        for Iip { payload, addr } in pending {
            let (channel, owned) = self.resolve_channel(&addr)?;
            if channel.is_closed() {
                return Err(DispatchError::InvalidChannel(addr));
            }

            // Reconciliation is synchronous: a type mismatch surfaces here,
            // before any task is launched. On failure a freshly attached
            // `channel` is dropped with its only sender, closing it.
            let send = channel.deliver(payload, &addr)?;

            let token = self.shutdown.clone();
            let task_addr = addr.clone();
            self.deliveries.push(tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!(addr = %task_addr, "delivery cancelled by shutdown");
                    }
                    _ = send => {}
                }
            }));
            tracing::debug!(addr = %addr, owned_channel = owned, "delivery launched");

            // For a tier-3 channel this handle is the last dispatcher-held
            // sender; dropping it here leaves the in-flight send as the sole
            // owner, so the channel closes as soon as the send completes.
            drop(channel);
        }
        Ok(())
    }

    /// Three-tier channel resolution for one address. The boolean is true
    /// when the channel was freshly attached and is therefore owned by the
    /// dispatcher for closing.
    fn resolve_channel(&mut self, addr: &Address) -> Result<(ChannelHandle, bool), DispatchError> {
        // Tier 1: a graph inport already wired to this address. Unwired
        // entries are skipped, not errors.
        if let Some(handle) = self
            .inports
            .iter()
            .filter(|entry| &entry.addr == addr)
            .find_map(|entry| entry.channel.clone())
        {
            tracing::trace!(addr = %addr, "resolved via inport table");
            return Ok((handle, false));
        }

        // Tier 2: an internal connection targeting this address.
        if let Some((src, handle)) = self
            .connections
            .iter()
            .filter(|conn| &conn.tgt == addr)
            .find_map(|conn| conn.channel.clone().map(|handle| (&conn.src, handle)))
        {
            tracing::trace!(addr = %addr, src = %src, "resolved via connection table");
            return Ok((handle, false));
        }

        // Tier 3: attach a fresh channel through the port lookup.
        let buffer = self.config.buffer_size;
        let (port, selector) = self
            .lookup_receive_port(addr)
            .map_err(|source| DispatchError::PortResolution {
                addr: addr.clone(),
                source,
            })?;
        let descriptor = port.descriptor();
        tracing::trace!(
            addr = %addr,
            port_kind = descriptor.kind.label(),
            element = descriptor.element,
            "resolved process port"
        );
        let handle = port
            .attach(selector, buffer)
            .map_err(|source| DispatchError::PortResolution {
                addr: addr.clone(),
                source,
            })?;
        tracing::debug!(addr = %addr, element = handle.element_type(), "attached on-demand channel");
        Ok((handle, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PortError;

    fn graph_with_process(name: &str) -> Graph {
        let mut graph = Graph::default();
        graph.add_process(name).unwrap();
        graph
    }

    #[test]
    fn add_requires_existing_process() {
        let mut graph = graph_with_process("echo");
        graph.add_iip("echo", "In", 5).unwrap();
        assert!(matches!(
            graph.add_iip("ghost", "In", 404),
            Err(GraphError::ProcessNotFound(_))
        ));
        assert_eq!(graph.iips.len(), 1);
    }

    #[test]
    fn remove_twice_fails_the_second_time() {
        let mut graph = graph_with_process("echo");
        graph.add_iip("echo", "In", 5).unwrap();
        graph.remove_iip("echo", "In").unwrap();
        assert!(matches!(
            graph.remove_iip("echo", "In"),
            Err(GraphError::IipNotFound(_))
        ));
    }

    #[test]
    fn remove_does_not_preserve_order() {
        let mut graph = graph_with_process("p");
        for port in ["A", "B", "C", "D"] {
            graph.add_iip("p", port, 0).unwrap();
        }
        graph.remove_iip("p", "B").unwrap();

        let remaining: Vec<&str> = graph.iips.iter().map(|iip| iip.addr.port.as_str()).collect();
        assert_eq!(remaining, ["A", "D", "C"]);
    }

    #[test]
    fn removal_matches_full_address() {
        let mut graph = graph_with_process("p");
        graph.add_iip("p", "In[0]", 1).unwrap();
        assert!(matches!(
            graph.remove_iip("p", "In[1]"),
            Err(GraphError::IipNotFound(_))
        ));
        graph.remove_iip("p", "In[0]").unwrap();
    }

    #[test]
    fn dispatch_fails_on_unknown_port() {
        let mut graph = graph_with_process("echo");
        graph.add_iip("echo", "Nope", 1).unwrap();
        let err = graph.dispatch_iips().unwrap_err();
        assert!(matches!(
            err,
            DispatchError::PortResolution {
                source: PortError::UnknownPort { .. },
                ..
            }
        ));
    }

    #[test]
    fn dispatch_fails_on_selector_kind_mismatch() {
        let mut graph = graph_with_process("p");
        let _in = graph.add_input::<i64>("p", "In").unwrap();
        graph.add_iip("p", "In[3]", 1).unwrap();
        let err = graph.dispatch_iips().unwrap_err();
        assert!(matches!(
            err,
            DispatchError::PortResolution {
                source: PortError::KindMismatch { .. },
                ..
            }
        ));
    }

    #[test]
    fn dispatch_fails_fast_on_type_mismatch() {
        let mut graph = graph_with_process("p");
        let _a = graph.add_input::<i64>("p", "A").unwrap();
        let _b = graph.add_input::<i64>("p", "B").unwrap();
        graph.add_iip("p", "A", "not a number").unwrap();
        graph.add_iip("p", "B", 2).unwrap();
        let err = graph.dispatch_iips().unwrap_err();
        assert!(matches!(err, DispatchError::TypeMismatch { .. }));
        // Fail-fast: nothing was launched for the second IIP either.
        assert!(graph.deliveries.is_empty());
    }
}
