//! Resource lookup
//!
//! A [`ResourceLoader`] resolves a relative resource name to every matching
//! resource it can see, in a stable order. The same relative path may live in
//! several roots, so a lookup returns zero or more streams.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use include_dir::{include_dir, Dir};
use tracing::debug;

/// Built-in resources shipped with the crate (bootstrap descriptors)
static BUILTIN_RESOURCES: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/resources");

/// Shared handle on a loader
pub type LoaderHandle = Arc<dyn ResourceLoader>;

/// Classpath-equivalent resource resolver
pub trait ResourceLoader: Send + Sync {
    /// Open every resource matching `name`, in lookup order
    fn resolve(&self, name: &str) -> io::Result<Vec<Box<dyn Read + Send>>>;

    /// Short description for log lines
    fn describe(&self) -> String;
}

fn normalize(name: &str) -> &str {
    name.trim_start_matches('/')
}

/// Resolves names against an ordered list of directory roots
#[derive(Debug, Clone, Default)]
pub struct ClasspathLoader {
    roots: Vec<PathBuf>,
}

impl ClasspathLoader {
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn push_root(&mut self, root: impl Into<PathBuf>) {
        self.roots.push(root.into());
    }

    /// Paths that exist for `name`, one per root at most
    pub fn locate(&self, name: &str) -> Vec<PathBuf> {
        let relative = Path::new(normalize(name));
        self.roots
            .iter()
            .map(|root| root.join(relative))
            .filter(|p| p.is_file())
            .collect()
    }
}

impl ResourceLoader for ClasspathLoader {
    fn resolve(&self, name: &str) -> io::Result<Vec<Box<dyn Read + Send>>> {
        let mut streams: Vec<Box<dyn Read + Send>> = Vec::new();
        for path in self.locate(name) {
            debug!(path = %path.display(), "Resolved classpath resource");
            streams.push(Box::new(File::open(&path)?));
        }
        Ok(streams)
    }

    fn describe(&self) -> String {
        let roots: Vec<_> = self.roots.iter().map(|r| r.display().to_string()).collect();
        format!("classpath[{}]", roots.join(", "))
    }
}

/// Resolves names against a directory embedded at compile time
#[derive(Clone, Copy)]
pub struct EmbeddedLoader {
    dir: &'static Dir<'static>,
}

impl EmbeddedLoader {
    pub fn new(dir: &'static Dir<'static>) -> Self {
        Self { dir }
    }

    /// Resources bundled with this crate
    pub fn builtin() -> Self {
        Self::new(&BUILTIN_RESOURCES)
    }
}

impl ResourceLoader for EmbeddedLoader {
    fn resolve(&self, name: &str) -> io::Result<Vec<Box<dyn Read + Send>>> {
        Ok(self
            .dir
            .get_file(normalize(name))
            .map(|f| Box::new(Cursor::new(f.contents())) as Box<dyn Read + Send>)
            .into_iter()
            .collect())
    }

    fn describe(&self) -> String {
        "embedded".to_string()
    }
}

impl fmt::Debug for EmbeddedLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedLoader")
            .field("path", &self.dir.path())
            .finish()
    }
}

/// In-memory resources, mostly for tests and programmatic setups
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    resources: BTreeMap<String, Vec<Vec<u8>>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource under `name`; repeated names resolve to several streams
    pub fn with_resource(mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(name, content);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) {
        let name = name.into();
        self.resources
            .entry(normalize(&name).to_string())
            .or_default()
            .push(content.into());
    }
}

impl ResourceLoader for MemoryLoader {
    fn resolve(&self, name: &str) -> io::Result<Vec<Box<dyn Read + Send>>> {
        Ok(self
            .resources
            .get(normalize(name))
            .map(|all| {
                all.iter()
                    .map(|c| Box::new(Cursor::new(c.clone())) as Box<dyn Read + Send>)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn describe(&self) -> String {
        format!("memory[{} names]", self.resources.len())
    }
}

/// Concatenates the matches of several loaders, in order
#[derive(Clone, Default)]
pub struct ChainLoader {
    loaders: Vec<LoaderHandle>,
}

impl ChainLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, loader: impl ResourceLoader + 'static) -> Self {
        self.loaders.push(Arc::new(loader));
        self
    }

    pub fn push(&mut self, loader: LoaderHandle) {
        self.loaders.push(loader);
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl ResourceLoader for ChainLoader {
    fn resolve(&self, name: &str) -> io::Result<Vec<Box<dyn Read + Send>>> {
        let mut all = Vec::new();
        for loader in &self.loaders {
            all.extend(loader.resolve(name)?);
        }
        Ok(all)
    }

    fn describe(&self) -> String {
        let parts: Vec<_> = self.loaders.iter().map(|l| l.describe()).collect();
        format!("chain({})", parts.join(" -> "))
    }
}

impl fmt::Debug for ChainLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
