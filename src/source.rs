//! Source handles
//!
//! A [`SourceHandle`] names one configuration input. Handles are immutable
//! and compared by value; a caller-supplied stream is compared by identity of
//! the shared stream it wraps.

use std::fmt;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;
use url::Url;

use crate::error::{ConfigError, Result};
use crate::loader::ResourceLoader;

trait SeekRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekRead for T {}

enum StreamInner {
    Seekable(Box<dyn SeekRead>),
    ForwardOnly(Box<dyn Read + Send>),
}

/// A caller-supplied byte stream.
///
/// Streams built with [`InputStream::seekable`] can be rewound to the start
/// before each parse; [`InputStream::forward_only`] streams cannot, and are
/// read from wherever their cursor currently is.
pub struct InputStream {
    inner: StreamInner,
}

impl InputStream {
    pub fn seekable<R: Read + Seek + Send + 'static>(reader: R) -> Self {
        Self {
            inner: StreamInner::Seekable(Box::new(reader)),
        }
    }

    pub fn forward_only<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            inner: StreamInner::ForwardOnly(Box::new(reader)),
        }
    }

    /// Seek back to the start of the stream
    pub fn rewind(&mut self) -> io::Result<()> {
        match &mut self.inner {
            StreamInner::Seekable(r) => r.seek(SeekFrom::Start(0)).map(|_| ()),
            StreamInner::ForwardOnly(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream does not support rewinding",
            )),
        }
    }

    pub fn is_seekable(&self) -> bool {
        matches!(self.inner, StreamInner::Seekable(_))
    }
}

impl Read for InputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            StreamInner::Seekable(r) => r.read(buf),
            StreamInner::ForwardOnly(r) => r.read(buf),
        }
    }
}

impl fmt::Debug for InputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputStream")
            .field("seekable", &self.is_seekable())
            .finish()
    }
}

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// A reference-counted handle on a caller's [`InputStream`].
///
/// Clones share the same stream and compare equal. The caller keeps its own
/// clone; the orchestrator never closes the stream.
#[derive(Clone)]
pub struct SharedStream {
    id: u64,
    stream: Arc<Mutex<InputStream>>,
}

impl SharedStream {
    pub fn new(stream: InputStream) -> Self {
        Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            stream: Arc::new(Mutex::new(stream)),
        }
    }

    pub fn seekable<R: Read + Seek + Send + 'static>(reader: R) -> Self {
        Self::new(InputStream::seekable(reader))
    }

    pub fn forward_only<R: Read + Send + 'static>(reader: R) -> Self {
        Self::new(InputStream::forward_only(reader))
    }

    /// Lock the stream for reading
    pub fn lock(&self) -> MutexGuard<'_, InputStream> {
        self.stream.lock()
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl PartialEq for SharedStream {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.stream, &other.stream)
    }
}

impl Eq for SharedStream {}

impl Hash for SharedStream {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.stream) as *const () as usize).hash(state);
    }
}

impl fmt::Debug for SharedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedStream#{}", self.id)
    }
}

/// One configuration input
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceHandle {
    /// An already open, caller-owned stream
    Stream(SharedStream),
    /// An absolute URL (`file:`, `http:`, `https:`)
    Url(Url),
    /// A URI, converted to a URL when the source is opened
    Uri(String),
    /// A filesystem path
    File(PathBuf),
    /// A name resolved through the lookup mechanism, possibly to several resources
    Classpath(String),
}

impl SourceHandle {
    pub fn stream(stream: SharedStream) -> Self {
        Self::Stream(stream)
    }

    pub fn url(url: Url) -> Self {
        Self::Url(url)
    }

    pub fn uri(uri: impl Into<String>) -> Result<Self> {
        let uri = uri.into();
        if uri.trim().is_empty() {
            return Err(ConfigError::InvalidArgument("URI source must not be empty".to_string()));
        }
        Ok(Self::Uri(uri))
    }

    pub fn file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidArgument("file source must not be empty".to_string()));
        }
        Ok(Self::File(path.to_path_buf()))
    }

    pub fn classpath(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::InvalidArgument(
                "classpath source must not be empty".to_string(),
            ));
        }
        Ok(Self::Classpath(name))
    }

    /// Check that the handle names something
    pub fn validate(&self) -> Result<()> {
        let empty = match self {
            Self::Stream(_) | Self::Url(_) => false,
            Self::Uri(uri) => uri.trim().is_empty(),
            Self::File(path) => path.as_os_str().is_empty(),
            Self::Classpath(name) => name.trim().is_empty(),
        };
        if empty {
            return Err(ConfigError::InvalidArgument(format!("empty {} source", self.kind())));
        }
        Ok(())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stream(_) => "stream",
            Self::Url(_) => "url",
            Self::Uri(_) => "uri",
            Self::File(_) => "file",
            Self::Classpath(_) => "classpath",
        }
    }

    /// Open every stream this handle names.
    ///
    /// Classpath names may resolve to zero or more streams; every other kind
    /// resolves to exactly one or fails.
    pub fn resolve(&self, loader: &dyn ResourceLoader) -> Result<Vec<ResolvedStream>> {
        match self {
            Self::Stream(shared) => {
                {
                    let mut stream = shared.lock();
                    if let Err(e) = stream.rewind() {
                        debug!(source = %self, error = %e, "Stream rewind failed, reading from current position");
                    }
                }
                Ok(vec![ResolvedStream::Caller {
                    label: self.to_string(),
                    stream: shared.clone(),
                }])
            }
            Self::Url(url) => Ok(vec![open_url(url)?]),
            Self::Uri(uri) => {
                let url = Url::parse(uri).map_err(|e| ConfigError::open_failure(uri.clone(), e))?;
                let mut resolved = open_url(&url)?;
                resolved.relabel(uri.clone());
                Ok(vec![resolved])
            }
            Self::File(path) => {
                let file = File::open(path).map_err(|e| ConfigError::open_failure(self.to_string(), e))?;
                Ok(vec![ResolvedStream::owned(self.to_string(), file)])
            }
            Self::Classpath(name) => {
                let streams = loader
                    .resolve(name)
                    .map_err(|e| ConfigError::open_failure(self.to_string(), e))?;
                if streams.is_empty() {
                    debug!(source = %self, loader = %loader.describe(), "Classpath name matched no resources");
                }
                let count = streams.len();
                Ok(streams
                    .into_iter()
                    .enumerate()
                    .map(|(i, reader)| {
                        let label = if count > 1 {
                            format!("{}[{}]", self, i)
                        } else {
                            self.to_string()
                        };
                        ResolvedStream::Owned { label, reader }
                    })
                    .collect())
            }
        }
    }
}

fn open_url(url: &Url) -> Result<ResolvedStream> {
    match url.scheme() {
        "file" => {
            let path = url.to_file_path().map_err(|_| {
                ConfigError::open_failure(url.as_str(), format!("not a local file URL: {}", url))
            })?;
            let file = File::open(&path).map_err(|e| ConfigError::open_failure(url.as_str(), e))?;
            Ok(ResolvedStream::owned(url.as_str(), file))
        }
        #[cfg(feature = "http")]
        "http" | "https" => {
            let response = reqwest::blocking::get(url.clone())
                .and_then(|r| r.error_for_status())
                .map_err(|e| ConfigError::open_failure(url.as_str(), e))?;
            Ok(ResolvedStream::owned(url.as_str(), response))
        }
        scheme => Err(ConfigError::open_failure(
            url.as_str(),
            format!("unsupported URL scheme '{}'", scheme),
        )),
    }
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(s) => write!(f, "stream#{}", s.id()),
            Self::Url(url) => write!(f, "{}", url),
            Self::Uri(uri) => write!(f, "{}", uri),
            Self::File(path) => write!(f, "file:{}", path.display()),
            Self::Classpath(name) => write!(f, "classpath:{}", name),
        }
    }
}

impl From<SharedStream> for SourceHandle {
    fn from(stream: SharedStream) -> Self {
        Self::Stream(stream)
    }
}

impl From<Url> for SourceHandle {
    fn from(url: Url) -> Self {
        Self::Url(url)
    }
}

impl From<PathBuf> for SourceHandle {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<&Path> for SourceHandle {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

/// A stream opened for one parse.
///
/// `Owned` streams are closed when dropped; `Caller` streams stay open and
/// belong to whoever supplied them.
pub enum ResolvedStream {
    Caller { label: String, stream: SharedStream },
    Owned { label: String, reader: Box<dyn Read + Send> },
}

impl ResolvedStream {
    fn owned(label: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self::Owned {
            label: label.into(),
            reader: Box::new(reader),
        }
    }

    fn relabel(&mut self, new_label: String) {
        match self {
            Self::Caller { label, .. } | Self::Owned { label, .. } => *label = new_label,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Caller { label, .. } | Self::Owned { label, .. } => label,
        }
    }
}

impl fmt::Debug for ResolvedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Caller { label, .. } => write!(f, "ResolvedStream::Caller({})", label),
            Self::Owned { label, .. } => write!(f, "ResolvedStream::Owned({})", label),
        }
    }
}
