//! Build orchestration
//!
//! [`BuildOrchestrator`] collects sources and turns them into a
//! [`DefinitionResource`]:
//!
//! ```text
//! Created ──BeginBuild──▶ Building ──bootstrap──▶ BootstrapLoaded
//!    ──LoadingDefinitions──▶ Loading ──sources──▶ Loaded
//!    ──LoadedDefinitions / EndBuild──▶ Built
//! ```
//!
//! A fatal error halts the build in its current state. Nothing is retried
//! and nothing already merged is rolled back.

use std::io::BufReader;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::HyphaConfig;
use crate::error::{BuildFailure, Result};
use crate::event::{BuildEvent, BuildListener, EventBus};
use crate::loader::LoaderHandle;
use crate::namespace::{NamespaceBootstrap, NamespaceRegistry};
use crate::reader::{ParseContext, XmlReader};
use crate::registry::SourceRegistry;
use crate::resource::{BuildState, DefinitionResource};
use crate::source::{ResolvedStream, SourceHandle};

/// Coordinates a build over the registered sources
pub struct BuildOrchestrator {
    sources: SourceRegistry,
    event_bus: Arc<EventBus>,
    bootstrap: Arc<dyn NamespaceBootstrap>,
    default_loader: LoaderHandle,
    reader: XmlReader,
    /// Held for the whole of each load
    load_lock: Mutex<()>,
}

impl Default for BuildOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildOrchestrator {
    /// Orchestrator with the default configuration and no sources
    pub fn new() -> Self {
        Self::from_config(&HyphaConfig::default())
    }

    pub fn from_config(config: &HyphaConfig) -> Self {
        Self {
            sources: SourceRegistry::new(),
            event_bus: Arc::new(EventBus::new()),
            bootstrap: Arc::new(config.bootstrap()),
            default_loader: config.loader(),
            reader: XmlReader::new(),
            load_lock: Mutex::new(()),
        }
    }

    /// Orchestrator pre-seeded with `sources`, in order
    pub fn with_sources<I, S>(sources: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<SourceHandle>,
    {
        let mut orchestrator = Self::new();
        orchestrator.add_sources(sources)?;
        Ok(orchestrator)
    }

    /// Replace the namespace bootstrap
    pub fn with_bootstrap(mut self, bootstrap: impl NamespaceBootstrap + 'static) -> Self {
        self.bootstrap = Arc::new(bootstrap);
        self
    }

    /// Loader used when `build` is not given one
    pub fn with_default_loader(mut self, loader: LoaderHandle) -> Self {
        self.default_loader = loader;
        self
    }

    /// Publish on a caller-provided bus instead of a private one
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Register a source; duplicates are ignored and reported as `Ok(false)`
    pub fn add_source(&mut self, handle: impl Into<SourceHandle>) -> Result<bool> {
        self.sources.add(handle.into())
    }

    pub fn add_sources<I, S>(&mut self, sources: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<SourceHandle>,
    {
        for source in sources {
            self.add_source(source)?;
        }
        Ok(())
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn default_loader(&self) -> &LoaderHandle {
        &self.default_loader
    }

    pub fn subscribe(&self, listener: impl BuildListener + 'static) {
        self.event_bus.subscribe(listener);
    }

    /// Build a new resource from every registered source.
    ///
    /// `loader` is the lookup mechanism for bootstrap descriptors and
    /// classpath names; the orchestrator's default loader is used when it is
    /// `None`. On failure the partially populated resource is returned inside
    /// the [`BuildFailure`].
    pub fn build(
        &self,
        source_name: &str,
        loader: Option<LoaderHandle>,
    ) -> std::result::Result<DefinitionResource, BuildFailure> {
        let mut resource = DefinitionResource::new(self.event_bus.clone());
        match self.run_build(&mut resource, source_name, loader) {
            Ok(()) => {
                info!(source_name = %source_name, definitions = resource.len(), "Build complete");
                Ok(resource)
            }
            Err(error) => {
                warn!(source_name = %source_name, state = %resource.state(), error = %error, "Build halted");
                Err(BuildFailure::new(error, resource))
            }
        }
    }

    /// Re-apply the registered sources to an existing resource.
    ///
    /// Fires LoadingDefinitions and LoadedDefinitions around the load. Uses
    /// the namespaces and loader stored on the resource by its build.
    pub fn load(&self, resource: &mut DefinitionResource) -> Result<()> {
        let _guard = self.load_lock.lock();
        let prior = resource.state();
        self.load_sources(resource)?;
        if prior == BuildState::Built {
            resource.set_state(BuildState::Built);
        }
        Ok(())
    }

    fn run_build(
        &self,
        resource: &mut DefinitionResource,
        source_name: &str,
        loader: Option<LoaderHandle>,
    ) -> Result<()> {
        let bus = resource.event_bus().clone();
        let loader = loader.unwrap_or_else(|| self.default_loader.clone());

        resource.set_state(BuildState::Building);
        resource.set_loader(loader.clone());
        resource.set_source_name(source_name);
        info!(
            source_name = %source_name,
            sources = self.sources.len(),
            loader = %loader.describe(),
            "Build started"
        );
        bus.fire(BuildEvent::BeginBuild, resource)?;

        let namespaces = self.bootstrap.bootstrap(loader.as_ref())?;
        resource.set_namespaces(namespaces);
        resource.set_state(BuildState::BootstrapLoaded);

        {
            let _guard = self.load_lock.lock();
            self.load_sources(resource)?;
        }

        bus.fire(BuildEvent::EndBuild, resource)?;
        resource.set_state(BuildState::Built);
        Ok(())
    }

    /// Loading → Loaded; the caller holds `load_lock`
    fn load_sources(&self, resource: &mut DefinitionResource) -> Result<()> {
        let bus = resource.event_bus().clone();
        resource.set_state(BuildState::Loading);
        bus.fire(BuildEvent::LoadingDefinitions, resource)?;

        let loader = resource
            .loader()
            .cloned()
            .unwrap_or_else(|| self.default_loader.clone());
        let namespaces = resource.namespaces().clone();

        for handle in &self.sources {
            let streams = handle.resolve(loader.as_ref())?;
            debug!(source = %handle, streams = streams.len(), "Source resolved");
            for stream in streams {
                self.parse_stream(stream, &namespaces, resource)?;
            }
        }

        resource.set_state(BuildState::Loaded);
        bus.fire(BuildEvent::LoadedDefinitions, resource)?;
        Ok(())
    }

    /// Parse one stream and merge its definitions; owned streams are closed on return
    fn parse_stream(
        &self,
        stream: ResolvedStream,
        namespaces: &NamespaceRegistry,
        resource: &mut DefinitionResource,
    ) -> Result<usize> {
        let label = stream.label().to_string();
        let entries = {
            let mut ctx = ParseContext::new(resource, &label);
            match stream {
                ResolvedStream::Caller { stream, .. } => {
                    let mut guard = stream.lock();
                    self.reader.read(BufReader::new(&mut *guard), namespaces, &mut ctx)?;
                }
                ResolvedStream::Owned { reader, .. } => {
                    self.reader.read(BufReader::new(reader), namespaces, &mut ctx)?;
                }
            }
            ctx.into_entries()
        };
        let merged = resource.merge_from(entries);
        debug!(source = %label, merged, total = resource.len(), "Definitions merged");
        Ok(merged)
    }
}
