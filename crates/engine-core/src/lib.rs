//! Concurrent dispatcher core for the execution engine.
//!
//! This crate owns the threads. `engine-types` supplies the value types and
//! external-collaborator traits; this crate supplies the queues, events,
//! futures, notification bus, data pipeline, device proxy generator, and
//! the `Engine` that wires them together.

mod data_handler;
mod detector_event;
mod event;
mod future;
mod notification_bus;
mod proxy;
mod queue;
mod worker;

pub mod engine;

pub use data_handler::{DataHandler, Processor};
pub use detector_event::AcquireFrameEvent;
pub use engine::{Engine, EngineConfig};
pub use event::{AnonymousCallableEvent, Event, EventContext, EventDeclaration};
pub use future::Future;
pub use notification_bus::NotificationBus;
pub use proxy::{
    mark_current_thread_as_executor, Device, DeviceCapabilities, DeviceProxy, GetAttrEvent, MethodCallEvent,
    SetAttrEvent,
};
pub use queue::{PriorityQueue, Queue};
pub use worker::ThreadManager;
