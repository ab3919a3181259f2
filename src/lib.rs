//! Hypha Configuration
//!
//! Collects XML configuration sources of any kind (caller streams, URLs,
//! URIs, files and classpath names) and builds them into one
//! [`DefinitionResource`], firing lifecycle events so listeners can observe
//! or extend the build.
//!
//! ## Features
//!
//! - **Deduplicated Sources**: Handles are compared by value and kept in insertion order
//! - **Lazy Resolution**: Sources are opened only when a build runs
//! - **Namespace Dispatch**: Elements are routed to handlers bound by bootstrap descriptors
//! - **Lifecycle Events**: BeginBuild, LoadingDefinitions, LoadedDefinitions, EndBuild
//!
//! ## Example
//!
//! ```no_run
//! use hypha_config::{BuildOrchestrator, SourceHandle, TracingListener};
//!
//! let mut orchestrator = BuildOrchestrator::new();
//! orchestrator.add_source(SourceHandle::classpath("conf/app.xml")?)?;
//! orchestrator.add_source(SourceHandle::file("local.xml")?)?;
//! orchestrator.subscribe(TracingListener);
//!
//! let resource = orchestrator.build("app", None)?;
//! for definition in resource.definitions() {
//!     println!("{} ({})", definition.id, definition.origin);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Build sequence
//!
//! ```text
//! build(name, loader)
//! ├── BeginBuild
//! ├── bootstrap: <loader>/META-INF/resource/hypha/register.xml → NamespaceRegistry
//! ├── LoadingDefinitions
//! ├── for each source, in order: resolve → read → dispatch → merge
//! ├── LoadedDefinitions
//! └── EndBuild
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod handlers;
pub mod loader;
pub mod namespace;
pub mod orchestrator;
pub mod reader;
pub mod registry;
pub mod resource;
pub mod source;

pub use config::HyphaConfig;
pub use error::{BuildFailure, ConfigError, Result};
pub use event::{BuildEvent, BuildListener, EventBus, TracingListener};
pub use handlers::{BeansHandler, BEANS_NAMESPACE};
pub use loader::{ChainLoader, ClasspathLoader, EmbeddedLoader, LoaderHandle, MemoryLoader, ResourceLoader};
pub use namespace::{
    DescriptorBootstrap, HandlerCatalog, NamespaceBootstrap, NamespaceHandler, NamespaceRegistry,
    DEFAULT_DESCRIPTOR_PATH,
};
pub use orchestrator::BuildOrchestrator;
pub use reader::{Element, ElementDispatcher, ParseContext, XmlReader};
pub use registry::SourceRegistry;
pub use resource::{BuildState, Definition, DefinitionResource};
pub use source::{InputStream, SharedStream, SourceHandle};
