//! Definition storage
//!
//! [`DefinitionResource`] accumulates the definitions parsed from every
//! source of a build. Entries are keyed by id; a later source replaces an
//! earlier entry with the same id but keeps its position.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::event::EventBus;
use crate::loader::LoaderHandle;
use crate::namespace::NamespaceRegistry;

/// Where a build currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Created,
    Building,
    BootstrapLoaded,
    Loading,
    Loaded,
    Built,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildState::Created => "created",
            BuildState::Building => "building",
            BuildState::BootstrapLoaded => "bootstrap-loaded",
            BuildState::Loading => "loading",
            BuildState::Loaded => "loaded",
            BuildState::Built => "built",
        };
        f.write_str(name)
    }
}

/// One parsed configuration entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    /// Unique id within the resource
    pub id: String,
    /// Kind of entry, as named by the handler (e.g. "bean", "alias")
    pub kind: String,
    /// Namespace of the element the entry came from
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    /// Label of the source that produced this entry
    pub origin: String,
}

impl Definition {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            class: None,
            attributes: BTreeMap::new(),
            properties: BTreeMap::new(),
            origin: String::new(),
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }
}

/// The aggregate produced by a build
pub struct DefinitionResource {
    source_name: String,
    loader: Option<LoaderHandle>,
    event_bus: Arc<EventBus>,
    namespaces: NamespaceRegistry,
    definitions: Vec<Definition>,
    index: HashMap<String, usize>,
    state: BuildState,
    created_at: DateTime<Utc>,
}

impl DefinitionResource {
    /// Create an empty resource publishing on `event_bus`
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            source_name: String::new(),
            loader: None,
            event_bus,
            namespaces: NamespaceRegistry::new(),
            definitions: Vec::new(),
            index: HashMap::new(),
            state: BuildState::Created,
            created_at: Utc::now(),
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn set_source_name(&mut self, name: impl Into<String>) {
        self.source_name = name.into();
    }

    pub fn loader(&self) -> Option<&LoaderHandle> {
        self.loader.as_ref()
    }

    pub fn set_loader(&mut self, loader: LoaderHandle) {
        self.loader = Some(loader);
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    pub(crate) fn set_namespaces(&mut self, namespaces: NamespaceRegistry) {
        self.namespaces = namespaces;
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: BuildState) {
        debug!(from = %self.state, to = %state, "Build state transition");
        self.state = state;
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Merge a batch of entries, in order.
    ///
    /// Returns the number of entries merged.
    pub fn merge_from(&mut self, entries: impl IntoIterator<Item = Definition>) -> usize {
        let mut merged = 0;
        for entry in entries {
            let existing = self.index.get(&entry.id).copied();
            match existing {
                Some(slot) => {
                    debug!(id = %entry.id, origin = %entry.origin, previous = %self.definitions[slot].origin, "Overriding definition");
                    self.definitions[slot] = entry;
                }
                None => {
                    self.index.insert(entry.id.clone(), self.definitions.len());
                    self.definitions.push(entry);
                }
            }
            merged += 1;
        }
        merged
    }

    pub fn get(&self, id: &str) -> Option<&Definition> {
        self.index.get(id).map(|&slot| &self.definitions[slot])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All definitions in first-registration order
    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|d| d.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl fmt::Debug for DefinitionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefinitionResource")
            .field("source_name", &self.source_name)
            .field("loader", &self.loader.as_ref().map(|l| l.describe()))
            .field("namespaces", &self.namespaces)
            .field("definitions", &self.definitions.len())
            .field("state", &self.state)
            .field("created_at", &self.created_at)
            .finish()
    }
}
