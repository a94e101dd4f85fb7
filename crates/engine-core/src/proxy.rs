use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use engine_types::EngineError;

use crate::engine::Engine;
use crate::event::{Event, EventContext, EventDeclaration};

thread_local! {
    /// Marks the current OS thread as "inside the executor" — set once by
    /// `ThreadManager`'s worker loop at thread start, via
    /// `mark_current_thread_as_executor`.
    static WITHIN_EXECUTOR: RefCell<bool> = const { RefCell::new(false) };
    /// The name of the worker this thread is, if it is one — set alongside
    /// `WITHIN_EXECUTOR`, used to compare against a device's
    /// `preferred_thread()` for re-dispatch exemption (a).
    static CURRENT_WORKER_NAME: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Marks the calling thread as an engine-owned worker thread, so that
/// `DeviceProxy` calls made from it are re-dispatch exempt (executed
/// inline rather than round-tripped through the engine again).
pub fn mark_current_thread_as_executor() {
    WITHIN_EXECUTOR.with(|flag| *flag.borrow_mut() = true);
}

/// Called once by `ThreadManager`'s worker loop at thread start, so calls
/// made from this thread are both within-executor exempt and comparable
/// against a device's `preferred_thread()`.
pub(crate) fn mark_current_thread_as_worker(name: impl Into<String>) {
    mark_current_thread_as_executor();
    CURRENT_WORKER_NAME.with(|cell| *cell.borrow_mut() = Some(name.into()));
}

fn current_thread_is_within_executor() -> bool {
    WITHIN_EXECUTOR.with(|flag| *flag.borrow())
}

fn current_worker_name() -> Option<String> {
    CURRENT_WORKER_NAME.with(|cell| cell.borrow().clone())
}

/// The set of members a [`Device`] exposes through its proxy: method names
/// dispatched as [`MethodCallEvent`]s, attribute names readable via
/// [`GetAttrEvent`], attribute names writable via [`SetAttrEvent`], and a
/// no-executor allowlist of attribute names that bypass the engine
/// entirely (cheap, thread-safe reads that don't need serialization).
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    pub methods: HashSet<String>,
    pub readable_attributes: HashSet<String>,
    pub writable_attributes: HashSet<String>,
    pub no_executor_attributes: HashSet<String>,
}

/// A user-implemented instrument/device, registered with a [`DeviceProxy`]
/// to route its method calls and attribute accesses through the engine.
/// `capabilities()` stands in for runtime member reflection.
pub trait Device: Send + Sync {
    fn capabilities(&self) -> DeviceCapabilities;
    fn call_method(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value, EngineError>;
    fn get_attribute(&self, name: &str) -> Result<serde_json::Value, EngineError>;
    fn set_attribute(&self, name: &str, value: serde_json::Value) -> Result<(), EngineError>;
    /// The worker thread name this device's calls should be routed to, if
    /// it has a preferred/affine thread (see re-dispatch exemption (a)).
    fn preferred_thread(&self) -> Option<String> {
        None
    }
}

/// Submitted as a `MethodCallEvent`, dispatching `device.call_method`.
pub struct MethodCallEvent<Dev> {
    device: Arc<Dev>,
    name: String,
    args: serde_json::Value,
}

impl<Dev, D, M> Event<D, M> for MethodCallEvent<Dev>
where
    Dev: Device + 'static,
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    fn execute(&mut self, _ctx: &EventContext<D, M>) -> Result<serde_json::Value, EngineError> {
        self.device.call_method(&self.name, self.args.clone())
    }

    fn declaration(&self) -> EventDeclaration {
        EventDeclaration { thread_name: self.device.preferred_thread(), ..EventDeclaration::default() }
    }
}

/// Submitted as a `GetAttrEvent`, always awaited synchronously by the
/// generated proxy accessor so the call site sees a plain value.
pub struct GetAttrEvent<Dev> {
    device: Arc<Dev>,
    name: String,
}

impl<Dev, D, M> Event<D, M> for GetAttrEvent<Dev>
where
    Dev: Device + 'static,
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    fn execute(&mut self, _ctx: &EventContext<D, M>) -> Result<serde_json::Value, EngineError> {
        self.device.get_attribute(&self.name)
    }

    fn declaration(&self) -> EventDeclaration {
        EventDeclaration { thread_name: self.device.preferred_thread(), ..EventDeclaration::default() }
    }
}

/// Submitted as a `SetAttrEvent`, always awaited synchronously.
pub struct SetAttrEvent<Dev> {
    device: Arc<Dev>,
    name: String,
    value: serde_json::Value,
}

impl<Dev, D, M> Event<D, M> for SetAttrEvent<Dev>
where
    Dev: Device + 'static,
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    fn execute(&mut self, _ctx: &EventContext<D, M>) -> Result<serde_json::Value, EngineError> {
        self.device.set_attribute(&self.name, self.value.clone())?;
        Ok(serde_json::Value::Null)
    }

    fn declaration(&self) -> EventDeclaration {
        EventDeclaration { thread_name: self.device.preferred_thread(), ..EventDeclaration::default() }
    }
}

/// Wraps a registered [`Device`] and routes every method call and
/// attribute access through the engine as an event, so a device's own
/// internal state is only ever touched from its affine worker thread.
///
/// Re-dispatch exemptions (executed inline instead of an engine
/// round-trip): the current thread is already the device's preferred
/// worker; the current thread has been marked
/// [`mark_current_thread_as_executor`]; or the member name is in the
/// device's `no_executor_attributes` allowlist.
pub struct DeviceProxy<Dev, D, M> {
    device: Arc<Dev>,
    engine: Arc<Engine<D, M>>,
    capabilities: DeviceCapabilities,
}

impl<Dev, D, M> DeviceProxy<Dev, D, M>
where
    Dev: Device + 'static,
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    pub fn new(device: Arc<Dev>, engine: Arc<Engine<D, M>>) -> Self {
        let capabilities = device.capabilities();
        Self { device, engine, capabilities }
    }

    fn exempt_from_dispatch(&self, attribute: &str) -> bool {
        if let Some(preferred) = self.device.preferred_thread() {
            if current_worker_name().as_deref() == Some(preferred.as_str()) {
                return true;
            }
        }
        current_thread_is_within_executor() || self.capabilities.no_executor_attributes.contains(attribute)
    }

    pub fn call_method(&self, name: &str, args: serde_json::Value, timeout: Option<Duration>) -> Result<serde_json::Value, EngineError> {
        if !self.capabilities.methods.contains(name) {
            return Err(EngineError::NotFound(format!("device has no method named {name:?}")));
        }
        if self.exempt_from_dispatch(name) {
            return self.device.call_method(name, args);
        }
        let event = MethodCallEvent { device: Arc::clone(&self.device), name: name.to_string(), args };
        let future = self.engine.submit(Box::new(event), None, false)?;
        future.await_execution(timeout)
    }

    pub fn get_attribute(&self, name: &str) -> Result<serde_json::Value, EngineError> {
        if !self.capabilities.readable_attributes.contains(name) {
            return Err(EngineError::NotFound(format!("device has no readable attribute named {name:?}")));
        }
        if self.exempt_from_dispatch(name) {
            return self.device.get_attribute(name);
        }
        let event = GetAttrEvent { device: Arc::clone(&self.device), name: name.to_string() };
        let future = self.engine.submit(Box::new(event), None, false)?;
        future.await_execution(None)
    }

    pub fn set_attribute(&self, name: &str, value: serde_json::Value) -> Result<(), EngineError> {
        if !self.capabilities.writable_attributes.contains(name) {
            return Err(EngineError::NotFound(format!("device has no writable attribute named {name:?}")));
        }
        if self.exempt_from_dispatch(name) {
            return self.device.set_attribute(name, value);
        }
        let event = SetAttrEvent { device: Arc::clone(&self.device), name: name.to_string(), value };
        let future = self.engine.submit(Box::new(event), None, false)?;
        future.await_execution(None).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Thermometer {
        celsius: Mutex<f64>,
    }

    impl Device for Thermometer {
        fn capabilities(&self) -> DeviceCapabilities {
            DeviceCapabilities {
                methods: ["reset".to_string()].into_iter().collect(),
                readable_attributes: ["celsius".to_string()].into_iter().collect(),
                writable_attributes: ["celsius".to_string()].into_iter().collect(),
                no_executor_attributes: ["celsius".to_string()].into_iter().collect(),
            }
        }

        fn call_method(&self, name: &str, _args: serde_json::Value) -> Result<serde_json::Value, EngineError> {
            match name {
                "reset" => {
                    *self.celsius.lock().unwrap() = 0.0;
                    Ok(serde_json::Value::Null)
                }
                other => Err(EngineError::NotFound(other.to_string())),
            }
        }

        fn get_attribute(&self, name: &str) -> Result<serde_json::Value, EngineError> {
            match name {
                "celsius" => Ok(serde_json::json!(*self.celsius.lock().unwrap())),
                other => Err(EngineError::NotFound(other.to_string())),
            }
        }

        fn set_attribute(&self, name: &str, value: serde_json::Value) -> Result<(), EngineError> {
            match name {
                "celsius" => {
                    *self.celsius.lock().unwrap() = value.as_f64().unwrap_or_default();
                    Ok(())
                }
                other => Err(EngineError::NotFound(other.to_string())),
            }
        }
    }

    #[test]
    fn no_executor_attribute_bypasses_the_engine_entirely() {
        let device = Arc::new(Thermometer { celsius: Mutex::new(21.5) });
        let engine: Arc<Engine<i32, String>> = Engine::new(crate::engine::EngineConfig::default());
        let proxy = DeviceProxy::new(Arc::clone(&device), Arc::clone(&engine));
        // No engine submission happens here: `celsius` is in the no-executor
        // allowlist, so this must succeed even before any worker exists.
        assert_eq!(proxy.get_attribute("celsius").unwrap(), serde_json::json!(21.5));
        proxy.set_attribute("celsius", serde_json::json!(100.0)).unwrap();
        assert_eq!(*device.celsius.lock().unwrap(), 100.0);
    }

    #[test]
    fn unknown_member_is_rejected_before_dispatch() {
        let device = Arc::new(Thermometer { celsius: Mutex::new(0.0) });
        let engine: Arc<Engine<i32, String>> = Engine::new(crate::engine::EngineConfig::default());
        let proxy = DeviceProxy::new(device, engine);
        assert!(matches!(proxy.get_attribute("kelvin"), Err(EngineError::NotFound(_))));
    }
}
