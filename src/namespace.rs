//! Namespace handlers and their bootstrap
//!
//! Every build starts by resolving the bootstrap descriptor path through the
//! lookup mechanism. Each descriptor binds namespace URIs to handlers from a
//! [`HandlerCatalog`]:
//!
//! ```xml
//! <register xmlns="urn:hypha:register">
//!     <namespace uri="urn:hypha:beans" handler="beans"/>
//! </register>
//! ```
//!
//! Descriptors are read before any user source, so every source sees the
//! complete [`NamespaceRegistry`].

use std::collections::BTreeMap;
use std::fmt;
use std::io::BufReader;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{ConfigError, Result};
use crate::handlers::BeansHandler;
use crate::loader::ResourceLoader;
use crate::reader::{Element, ElementDispatcher, ParseContext, XmlReader};

/// Well-known location of bootstrap descriptors
pub const DEFAULT_DESCRIPTOR_PATH: &str = "META-INF/resource/hypha/register.xml";

/// Namespace of the descriptor format itself
pub const REGISTER_NAMESPACE: &str = "urn:hypha:register";

/// Interprets elements of one namespace
pub trait NamespaceHandler: Send + Sync {
    /// Whether this handler understands `namespace`
    fn can_parse(&self, namespace: &str) -> bool {
        let _ = namespace;
        true
    }

    /// Interpret `element` and its same-namespace subtree
    fn parse_element(&self, ctx: &mut ParseContext<'_>, element: &Element) -> Result<()>;
}

/// Namespace URI to handler bindings
#[derive(Clone, Default)]
pub struct NamespaceRegistry {
    handlers: BTreeMap<String, Arc<dyn NamespaceHandler>>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `namespace` to `handler`, returning the handler it replaced
    pub fn register(
        &mut self,
        namespace: impl Into<String>,
        handler: Arc<dyn NamespaceHandler>,
    ) -> Result<Option<Arc<dyn NamespaceHandler>>> {
        let namespace = namespace.into();
        if !handler.can_parse(&namespace) {
            return Err(ConfigError::InvalidArgument(format!(
                "handler cannot parse namespace '{}'",
                namespace
            )));
        }
        debug!(namespace = %namespace, "Namespace handler bound");
        Ok(self.handlers.insert(namespace, handler))
    }

    pub fn with_handler(
        mut self,
        namespace: impl Into<String>,
        handler: impl NamespaceHandler + 'static,
    ) -> Result<Self> {
        self.register(namespace, Arc::new(handler))?;
        Ok(self)
    }

    pub fn get(&self, namespace: &str) -> Option<&Arc<dyn NamespaceHandler>> {
        self.handlers.get(namespace)
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.handlers.contains_key(namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl ElementDispatcher for NamespaceRegistry {
    fn handler_for(&self, namespace: &str) -> Option<&dyn NamespaceHandler> {
        self.handlers.get(namespace).map(|h| h.as_ref())
    }
}

impl fmt::Debug for NamespaceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// Creates a handler instance
pub type HandlerFactory = Arc<dyn Fn() -> Arc<dyn NamespaceHandler> + Send + Sync>;

/// Handler implementations that descriptors may refer to by name
#[derive(Clone, Default)]
pub struct HandlerCatalog {
    factories: BTreeMap<String, HandlerFactory>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the handlers shipped in this crate
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register("beans", || Arc::new(BeansHandler::new()) as Arc<dyn NamespaceHandler>);
        catalog
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn NamespaceHandler> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn NamespaceHandler> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    /// Instantiate the handler registered as `name`
    pub fn create(&self, name: &str) -> Option<Arc<dyn NamespaceHandler>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl fmt::Debug for HandlerCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

/// Produces the namespace registry for one build
pub trait NamespaceBootstrap: Send + Sync {
    fn bootstrap(&self, loader: &dyn ResourceLoader) -> Result<NamespaceRegistry>;
}

/// A fixed registry, used as-is without consulting the loader
impl NamespaceBootstrap for NamespaceRegistry {
    fn bootstrap(&self, _loader: &dyn ResourceLoader) -> Result<NamespaceRegistry> {
        Ok(self.clone())
    }
}

/// Reads descriptors from a well-known path through the loader
#[derive(Debug, Clone)]
pub struct DescriptorBootstrap {
    descriptor_path: String,
    catalog: HandlerCatalog,
}

impl Default for DescriptorBootstrap {
    fn default() -> Self {
        Self::new(DEFAULT_DESCRIPTOR_PATH, HandlerCatalog::builtin())
    }
}

impl DescriptorBootstrap {
    pub fn new(descriptor_path: impl Into<String>, catalog: HandlerCatalog) -> Self {
        Self {
            descriptor_path: descriptor_path.into(),
            catalog,
        }
    }

    pub fn descriptor_path(&self) -> &str {
        &self.descriptor_path
    }

    pub fn catalog(&self) -> &HandlerCatalog {
        &self.catalog
    }

    /// Apply one parsed descriptor to `registry`
    fn apply(&self, root: &Element, label: &str, registry: &mut NamespaceRegistry) -> Result<()> {
        let invalid = |message: String| ConfigError::InvalidDescriptor {
            source_label: label.to_string(),
            message,
        };

        if root.namespace() != REGISTER_NAMESPACE || root.name() != "register" {
            return Err(invalid(format!(
                "expected <register xmlns=\"{}\">, found <{}> in '{}'",
                REGISTER_NAMESPACE,
                root.name(),
                root.namespace()
            )));
        }

        for binding in root.children() {
            if binding.namespace() != REGISTER_NAMESPACE || binding.name() != "namespace" {
                return Err(invalid(format!("unexpected element <{}>", binding.name())));
            }
            let uri = binding
                .attr("uri")
                .ok_or_else(|| invalid("<namespace> is missing the 'uri' attribute".to_string()))?;
            let name = binding
                .attr("handler")
                .ok_or_else(|| invalid(format!("<namespace uri=\"{}\"> is missing the 'handler' attribute", uri)))?;
            let handler = self
                .catalog
                .create(name)
                .ok_or_else(|| invalid(format!("no handler named '{}' for namespace '{}'", name, uri)))?;
            if !handler.can_parse(uri) {
                return Err(invalid(format!("handler '{}' cannot parse namespace '{}'", name, uri)));
            }
            if registry.register(uri, handler)?.is_some() {
                warn!(namespace = %uri, handler = %name, descriptor = %label, "Namespace rebound by later descriptor");
            }
        }
        Ok(())
    }
}

impl NamespaceBootstrap for DescriptorBootstrap {
    fn bootstrap(&self, loader: &dyn ResourceLoader) -> Result<NamespaceRegistry> {
        let base_label = format!("classpath:{}", self.descriptor_path);
        let descriptors = loader
            .resolve(&self.descriptor_path)
            .map_err(|e| ConfigError::open_failure(base_label.clone(), e))?;
        let count = descriptors.len();

        let reader = XmlReader::new();
        let mut registry = NamespaceRegistry::new();
        for (i, stream) in descriptors.into_iter().enumerate() {
            let label = if count > 1 {
                format!("{}[{}]", base_label, i)
            } else {
                base_label.clone()
            };
            let root = reader.parse_tree(BufReader::new(stream), &label)?;
            self.apply(&root, &label, &mut registry)?;
        }

        info!(
            descriptors = count,
            namespaces = registry.len(),
            loader = %loader.describe(),
            "Namespace registry bootstrapped"
        );
        Ok(registry)
    }
}
