//! Build lifecycle events
//!
//! Every orchestrator owns one [`EventBus`]. Listeners subscribe before
//! calling `build` and receive each [`BuildEvent`] together with the
//! in-progress [`DefinitionResource`].

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BoxError, ConfigError, Result};
use crate::resource::DefinitionResource;

/// The four lifecycle notifications of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildEvent {
    BeginBuild,
    LoadingDefinitions,
    LoadedDefinitions,
    EndBuild,
}

impl BuildEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildEvent::BeginBuild => "begin-build",
            BuildEvent::LoadingDefinitions => "loading-definitions",
            BuildEvent::LoadedDefinitions => "loaded-definitions",
            BuildEvent::EndBuild => "end-build",
        }
    }
}

impl fmt::Display for BuildEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives lifecycle events.
///
/// A listener may inspect or extend the resource. Returning an error aborts
/// the build at the current state.
pub trait BuildListener: Send + Sync {
    fn on_event(
        &self,
        event: BuildEvent,
        resource: &mut DefinitionResource,
    ) -> std::result::Result<(), BoxError>;
}

impl<F> BuildListener for F
where
    F: Fn(BuildEvent, &mut DefinitionResource) -> std::result::Result<(), BoxError> + Send + Sync,
{
    fn on_event(
        &self,
        event: BuildEvent,
        resource: &mut DefinitionResource,
    ) -> std::result::Result<(), BoxError> {
        self(event, resource)
    }
}

/// Process-local publisher for build events
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn BuildListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl BuildListener + 'static) {
        self.subscribe_arc(Arc::new(listener));
    }

    /// Subscribe a closure
    pub fn on<F>(&self, f: F)
    where
        F: Fn(BuildEvent, &mut DefinitionResource) -> std::result::Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.subscribe_arc(Arc::new(f));
    }

    pub fn subscribe_arc(&self, listener: Arc<dyn BuildListener>) {
        let mut listeners = self.listeners.write();
        listeners.push(listener);
        debug!(listeners = listeners.len(), "Build listener subscribed");
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver `event` to every listener in subscription order.
    ///
    /// The listener list is snapshotted first, so a listener may subscribe
    /// further listeners; they see the next event, not this one.
    pub fn fire(&self, event: BuildEvent, resource: &mut DefinitionResource) -> Result<()> {
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        debug!(event = %event, listeners = listeners.len(), "Firing build event");
        for listener in listeners {
            listener
                .on_event(event, resource)
                .map_err(|cause| ConfigError::Listener { event, cause })?;
        }
        Ok(())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Logs every event at `info`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

impl BuildListener for TracingListener {
    fn on_event(
        &self,
        event: BuildEvent,
        resource: &mut DefinitionResource,
    ) -> std::result::Result<(), BoxError> {
        info!(
            event = %event,
            source_name = %resource.source_name(),
            definitions = resource.len(),
            "Build event"
        );
        Ok(())
    }
}
