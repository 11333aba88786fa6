//! Typed ports, channel handles, and the attachment capability.
//!
//! A port channel is a bounded [`tokio::sync::mpsc`] channel of the port's
//! declared element type. The dispatcher never sees that type: it works
//! through [`ChannelHandle`], a type-erased sender that reconciles a loose
//! [`Payload`] against the element type before producing the send future.
//!
//! Channel close semantics ride Rust ownership. A channel is closed once
//! every sender is dropped, so:
//!
//! - a channel attached on demand for a single IIP is closed right after the
//!   send, because the dispatcher held the only retained sender;
//! - a channel recorded in the inport or connection tables stays open, because
//!   the table keeps its own sender clone alive.

use crate::address::{Address, Selector};
use crate::decode;
use crate::error::{DispatchError, PortError};
use crate::payload::Payload;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Element type bound for values travelling through port channels.
///
/// Blanket-implemented for every `DeserializeOwned + Send + 'static` type;
/// the `Deserialize` half is what powers structural coercion of loose IIP
/// payloads.
pub trait Packet: DeserializeOwned + Send + 'static {}

impl<T: DeserializeOwned + Send + 'static> Packet for T {}

/// Discriminates the three port shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// One channel per port.
    Singular,
    /// A fixed number of independently addressable elements.
    Array {
        /// Number of elements.
        size: usize,
    },
    /// String-keyed elements, created as they are addressed.
    Map,
}

impl PortKind {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            PortKind::Singular => "singular",
            PortKind::Array { .. } => "array",
            PortKind::Map => "map",
        }
    }
}

/// Static metadata for a declared input port.
#[derive(Debug, Clone)]
pub struct PortDescriptor {
    /// Port name as declared on the process.
    pub name: String,
    /// Declared shape.
    pub kind: PortKind,
    /// Element type name. Diagnostics only; compatibility decisions are made
    /// by the typed channel itself.
    pub element: &'static str,
}

/// Boxed send future returned by [`ChannelHandle::deliver`].
pub(crate) type DeliveryFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Type-erased, cheaply clonable sender half of a port channel.
///
/// Obtained from one of three sources: the network inport table, the
/// connection table, or a fresh on-demand attachment. The handle does not
/// know which; ownership of the underlying sender decides what dropping it
/// does (see the module docs).
#[derive(Clone)]
pub struct ChannelHandle {
    inner: Arc<dyn ErasedSender>,
}

impl ChannelHandle {
    pub(crate) fn new<T: Packet>(tx: mpsc::Sender<T>) -> Self {
        Self {
            inner: Arc::new(TypedSender { tx }),
        }
    }

    /// Name of the channel's declared element type.
    pub fn element_type(&self) -> &'static str {
        self.inner.element_type()
    }

    /// Whether the receiving half of the channel is gone.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Reconcile `payload` against the element type and produce the send
    /// future. Reconciliation is synchronous; nothing is sent until the
    /// returned future runs.
    ///
    /// # Errors
    ///
    /// [`DispatchError::TypeMismatch`] when the payload is neither the exact
    /// element type nor structurally convertible into it.
    pub(crate) fn deliver(
        &self,
        payload: Payload,
        addr: &Address,
    ) -> Result<DeliveryFuture, DispatchError> {
        self.inner.deliver(payload, addr)
    }

    /// Recover the typed sender, if `T` is the channel's element type.
    pub(crate) fn typed<T: Packet>(&self) -> Option<mpsc::Sender<T>> {
        self.inner
            .as_any()
            .downcast_ref::<TypedSender<T>>()
            .map(|sender| sender.tx.clone())
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("element", &self.element_type())
            .field("closed", &self.is_closed())
            .finish()
    }
}

trait ErasedSender: Send + Sync {
    fn element_type(&self) -> &'static str;
    fn is_closed(&self) -> bool;
    fn deliver(&self, payload: Payload, addr: &Address) -> Result<DeliveryFuture, DispatchError>;
    fn as_any(&self) -> &dyn Any;
}

struct TypedSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T: Packet> ErasedSender for TypedSender<T> {
    fn element_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn deliver(&self, payload: Payload, addr: &Address) -> Result<DeliveryFuture, DispatchError> {
        let value = reconcile::<T>(payload, addr)?;
        let tx = self.tx.clone();
        let addr = addr.clone();
        Ok(Box::pin(async move {
            if tx.send(value).await.is_err() {
                tracing::warn!(addr = %addr, "receiver dropped before delivery");
            } else {
                tracing::trace!(addr = %addr, "packet delivered");
            }
        }))
    }
}

/// Reconcile a payload against the channel element type.
///
/// Pre-typed payloads are matched exactly first. Everything else goes through
/// structural coercion, which also grants presence-only targets (types that
/// decode from the empty payload) the right to absorb any value.
fn reconcile<T: Packet>(payload: Payload, addr: &Address) -> Result<T, DispatchError> {
    match payload {
        Payload::Opaque(op) => match op.downcast::<T>() {
            Ok(value) => Ok(value),
            Err(op) => decode::from_payload::<T>(&Payload::Unit).map_err(|_| {
                DispatchError::TypeMismatch {
                    addr: addr.clone(),
                    found: op.type_name().to_string(),
                    expected: std::any::type_name::<T>(),
                }
            }),
        },
        other => decode::from_payload::<T>(&other).map_err(|err| {
            tracing::debug!(addr = %addr, %err, "structural coercion failed");
            DispatchError::TypeMismatch {
                addr: addr.clone(),
                found: other.kind().to_string(),
                expected: std::any::type_name::<T>(),
            }
        }),
    }
}

/// Capability used to create and bind a channel on demand.
///
/// One implementor exists per declared input port; the dispatcher reaches it
/// through the graph's port lookup when neither wiring table has a channel
/// for an address.
pub(crate) trait PortAttach: Send {
    fn descriptor(&self) -> &PortDescriptor;

    /// Create a bounded channel of the element type, bind the receiving half
    /// where the process body will collect it, and hand back the sender.
    fn attach(
        &mut self,
        selector: Option<&Selector>,
        buffer: usize,
    ) -> Result<ChannelHandle, PortError>;
}

type SharedSlot<T> = Arc<Mutex<Option<mpsc::Receiver<T>>>>;
type SharedSlots<K, T> = Arc<Mutex<HashMap<K, mpsc::Receiver<T>>>>;

enum Bindings<T> {
    Singular(SharedSlot<T>),
    Array {
        size: usize,
        slots: SharedSlots<usize, T>,
    },
    Map {
        slots: SharedSlots<String, T>,
    },
}

/// Per-port state held in the graph's process table.
pub(crate) struct PortSlot<T> {
    descriptor: PortDescriptor,
    bindings: Bindings<T>,
}

impl<T: Packet> PortSlot<T> {
    pub(crate) fn singular(name: &str) -> (Self, InputPort<T>) {
        let slot: SharedSlot<T> = Arc::default();
        let port = InputPort {
            slot: Arc::clone(&slot),
            taken: None,
            closed: false,
        };
        (
            Self {
                descriptor: PortDescriptor {
                    name: name.to_string(),
                    kind: PortKind::Singular,
                    element: std::any::type_name::<T>(),
                },
                bindings: Bindings::Singular(slot),
            },
            port,
        )
    }

    pub(crate) fn array(name: &str, size: usize) -> (Self, ArrayInputPort<T>) {
        let slots: SharedSlots<usize, T> = Arc::default();
        let port = ArrayInputPort {
            slots: Arc::clone(&slots),
            taken: HashMap::new(),
        };
        (
            Self {
                descriptor: PortDescriptor {
                    name: name.to_string(),
                    kind: PortKind::Array { size },
                    element: std::any::type_name::<T>(),
                },
                bindings: Bindings::Array { size, slots },
            },
            port,
        )
    }

    pub(crate) fn map(name: &str) -> (Self, MapInputPort<T>) {
        let slots: SharedSlots<String, T> = Arc::default();
        let port = MapInputPort {
            slots: Arc::clone(&slots),
            taken: HashMap::new(),
        };
        (
            Self {
                descriptor: PortDescriptor {
                    name: name.to_string(),
                    kind: PortKind::Map,
                    element: std::any::type_name::<T>(),
                },
                bindings: Bindings::Map { slots },
            },
            port,
        )
    }
}

impl<T: Packet> PortAttach for PortSlot<T> {
    fn descriptor(&self) -> &PortDescriptor {
        &self.descriptor
    }

    fn attach(
        &mut self,
        selector: Option<&Selector>,
        buffer: usize,
    ) -> Result<ChannelHandle, PortError> {
        // Tokio bounded channels have no rendezvous capacity.
        let buffer = buffer.max(1);
        match (&self.bindings, selector) {
            (Bindings::Singular(slot), None) => {
                let (tx, rx) = mpsc::channel(buffer);
                *slot.lock().expect("port slot lock poisoned") = Some(rx);
                Ok(ChannelHandle::new(tx))
            }
            (Bindings::Array { size, slots }, Some(Selector::Index(index))) => {
                if *index >= *size {
                    return Err(PortError::IndexOutOfRange {
                        port: self.descriptor.name.clone(),
                        index: *index,
                        size: *size,
                    });
                }
                let (tx, rx) = mpsc::channel(buffer);
                slots
                    .lock()
                    .expect("port slot lock poisoned")
                    .insert(*index, rx);
                Ok(ChannelHandle::new(tx))
            }
            (Bindings::Map { slots }, Some(Selector::Key(key))) => {
                let (tx, rx) = mpsc::channel(buffer);
                slots
                    .lock()
                    .expect("port slot lock poisoned")
                    .insert(key.clone(), rx);
                Ok(ChannelHandle::new(tx))
            }
            (_, selector) => Err(PortError::KindMismatch {
                port: self.descriptor.name.clone(),
                kind: self.descriptor.kind.label(),
                selector: match selector {
                    Some(s) => s.to_string(),
                    None => "no selector".to_string(),
                },
            }),
        }
    }
}

/// Receive handle for a singular input port.
///
/// Held by the process body. `recv` yields packets until the channel closes;
/// a port that was never wired observes end-of-input immediately.
pub struct InputPort<T> {
    slot: SharedSlot<T>,
    taken: Option<mpsc::Receiver<T>>,
    closed: bool,
}

impl<T: Packet> InputPort<T> {
    /// Receive the next packet, or `None` once the channel is closed or the
    /// port was never wired.
    pub async fn recv(&mut self) -> Option<T> {
        if self.closed {
            return None;
        }
        if self.taken.is_none() {
            self.taken = self.slot.lock().expect("port slot lock poisoned").take();
        }
        match self.taken.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Drop the receiving half. Retained senders observe a closed channel.
    pub fn close(&mut self) {
        self.closed = true;
        self.taken = None;
        self.slot.lock().expect("port slot lock poisoned").take();
    }
}

/// Receive handle for an array input port; elements are addressed by index.
pub struct ArrayInputPort<T> {
    slots: SharedSlots<usize, T>,
    taken: HashMap<usize, mpsc::Receiver<T>>,
}

impl<T: Packet> ArrayInputPort<T> {
    /// Receive the next packet on element `index`, or `None` once that
    /// element's channel is closed or was never wired.
    pub async fn recv(&mut self, index: usize) -> Option<T> {
        if !self.taken.contains_key(&index) {
            let rx = self
                .slots
                .lock()
                .expect("port slot lock poisoned")
                .remove(&index);
            if let Some(rx) = rx {
                self.taken.insert(index, rx);
            }
        }
        match self.taken.get_mut(&index) {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

/// Receive handle for a map input port; elements are addressed by key.
pub struct MapInputPort<T> {
    slots: SharedSlots<String, T>,
    taken: HashMap<String, mpsc::Receiver<T>>,
}

impl<T: Packet> MapInputPort<T> {
    /// Receive the next packet on element `key`, or `None` once that
    /// element's channel is closed or was never wired.
    pub async fn recv(&mut self, key: &str) -> Option<T> {
        if !self.taken.contains_key(key) {
            let rx = self
                .slots
                .lock()
                .expect("port slot lock poisoned")
                .remove(key);
            if let Some(rx) = rx {
                self.taken.insert(key.to_string(), rx);
            }
        }
        match self.taken.get_mut(key) {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

/// Typed sender for the source side of an internal connection.
#[derive(Debug)]
pub struct OutputPort<T> {
    tx: mpsc::Sender<T>,
    target: Address,
}

impl<T: Packet> OutputPort<T> {
    pub(crate) fn new(tx: mpsc::Sender<T>, target: Address) -> Self {
        Self { tx, target }
    }

    /// Send a packet downstream, waiting for buffer space.
    ///
    /// # Errors
    ///
    /// [`PortError::Closed`] when the receiving process dropped its port.
    pub async fn send(&self, value: T) -> Result<(), PortError> {
        self.tx
            .send(value)
            .await
            .map_err(|_| PortError::Closed(self.target.clone()))
    }
}

/// External feeder for an opened network inport.
///
/// Payloads sent here go through the same type reconciliation as IIPs.
/// Dropping the sender releases this clone of the channel; the inport table
/// keeps its own, so the channel stays open for the life of the graph.
pub struct NetworkSender {
    handle: ChannelHandle,
    addr: Address,
}

impl NetworkSender {
    pub(crate) fn new(handle: ChannelHandle, addr: Address) -> Self {
        Self { handle, addr }
    }

    /// Reconcile and deliver a payload to the inport's target.
    ///
    /// # Errors
    ///
    /// [`DispatchError::InvalidChannel`] when the receiver is gone,
    /// [`DispatchError::TypeMismatch`] when the payload does not fit.
    pub async fn send(&self, payload: impl Into<Payload>) -> Result<(), DispatchError> {
        if self.handle.is_closed() {
            return Err(DispatchError::InvalidChannel(self.addr.clone()));
        }
        self.handle.deliver(payload.into(), &self.addr)?.await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port_spec: &str) -> Address {
        Address::parse("proc", port_spec).unwrap()
    }

    #[tokio::test]
    async fn singular_attach_binds_receiver() {
        let (mut slot, mut port) = PortSlot::<i64>::singular("In");
        let handle = slot.attach(None, 1).unwrap();
        handle.deliver(Payload::from(7), &addr("In")).unwrap().await;
        drop(handle);
        assert_eq!(port.recv().await, Some(7));
        assert_eq!(port.recv().await, None);
    }

    #[tokio::test]
    async fn array_attach_respects_bounds() {
        let (mut slot, mut port) = PortSlot::<String>::array("In", 2);
        let err = slot.attach(Some(&Selector::Index(5)), 1).unwrap_err();
        assert!(matches!(err, PortError::IndexOutOfRange { index: 5, .. }));

        let handle = slot.attach(Some(&Selector::Index(1)), 1).unwrap();
        handle
            .deliver(Payload::from("x"), &addr("In[1]"))
            .unwrap()
            .await;
        drop(handle);
        assert_eq!(port.recv(1).await, Some("x".to_string()));
        assert_eq!(port.recv(1).await, None);
        assert_eq!(port.recv(0).await, None);
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let (mut slot, _port) = PortSlot::<i64>::singular("In");
        let err = slot.attach(Some(&Selector::Index(0)), 1).unwrap_err();
        assert!(matches!(err, PortError::KindMismatch { .. }));

        let (mut slot, _port) = PortSlot::<i64>::array("In", 2);
        let err = slot.attach(None, 1).unwrap_err();
        assert!(matches!(err, PortError::KindMismatch { .. }));
    }

    #[test]
    fn deliver_rejects_mismatched_payload() {
        let (mut slot, _port) = PortSlot::<i64>::singular("In");
        let handle = slot.attach(None, 1).unwrap();
        let err = handle
            .deliver(Payload::from("not a number"), &addr("In"))
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, DispatchError::TypeMismatch { .. }));
    }

    #[test]
    fn typed_recovers_matching_sender_only() {
        let (mut slot, _port) = PortSlot::<i64>::singular("In");
        let handle = slot.attach(None, 1).unwrap();
        assert!(handle.typed::<i64>().is_some());
        assert!(handle.typed::<String>().is_none());
    }

    #[test]
    fn closed_port_invalidates_handle() {
        let (mut slot, mut port) = PortSlot::<i64>::singular("In");
        let handle = slot.attach(None, 1).unwrap();
        assert!(!handle.is_closed());
        port.close();
        assert!(handle.is_closed());
    }
}
