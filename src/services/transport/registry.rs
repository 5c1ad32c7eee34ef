use super::Transport;
use crate::error::TransportError;
use std::collections::HashMap;
use std::sync::Arc;

/// Transports available to the database layer, keyed by name.
///
/// Built once at startup, before the first connection is opened, then handed
/// to whoever opens connections.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Result<(), TransportError> {
        let name = name.into();
        if self.transports.contains_key(&name) {
            return Err(TransportError::Duplicate(name));
        }
        tracing::debug!("Registered transport {}", name);
        self.transports.insert(name, transport);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Transport>, TransportError> {
        self.transports
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::Unknown(name.to_string()))
    }
}
