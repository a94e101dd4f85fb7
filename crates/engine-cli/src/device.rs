use std::sync::Mutex;

use engine_core::{Device, DeviceCapabilities};
use engine_types::EngineError;

/// A mock motorized stage, standing in for a real instrument driver in this
/// demo: `position_um` is read/write, `move_to` is the one method, and
/// `position_um` is also reachable with no executor round-trip at all
/// (a cheap volatile read a real driver would expose the same way).
pub struct Stage {
    position_um: Mutex<f64>,
}

impl Stage {
    pub fn new() -> Self {
        Self { position_um: Mutex::new(0.0) }
    }
}

impl Default for Stage {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Stage {
    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            methods: ["move_to".to_string()].into_iter().collect(),
            readable_attributes: ["position_um".to_string()].into_iter().collect(),
            writable_attributes: std::collections::HashSet::new(),
            no_executor_attributes: ["position_um".to_string()].into_iter().collect(),
        }
    }

    fn call_method(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value, EngineError> {
        match name {
            "move_to" => {
                let target = args
                    .get("position_um")
                    .and_then(|v| v.as_f64())
                    .ok_or_else(|| EngineError::Device("move_to requires a position_um argument".to_string()))?;
                *self.position_um.lock().expect("stage mutex poisoned") = target;
                Ok(serde_json::json!({"position_um": target}))
            }
            other => Err(EngineError::NotFound(other.to_string())),
        }
    }

    fn get_attribute(&self, name: &str) -> Result<serde_json::Value, EngineError> {
        match name {
            "position_um" => Ok(serde_json::json!(*self.position_um.lock().expect("stage mutex poisoned"))),
            other => Err(EngineError::NotFound(other.to_string())),
        }
    }

    fn set_attribute(&self, name: &str, _value: serde_json::Value) -> Result<(), EngineError> {
        Err(EngineError::NotFound(name.to_string()))
    }
}
