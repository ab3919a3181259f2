//! Build Pipeline Tests
//!
//! End-to-end builds over file, URL, stream and classpath sources.

use std::fs;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hypha_config::{
    BuildEvent, BuildOrchestrator, BuildState, ChainLoader, ClasspathLoader, ConfigError, Definition,
    DescriptorBootstrap, EmbeddedLoader, Element, HandlerCatalog, LoaderHandle, MemoryLoader,
    NamespaceHandler, NamespaceRegistry, ParseContext, ResourceLoader, SharedStream, SourceHandle,
    BEANS_NAMESPACE, DEFAULT_DESCRIPTOR_PATH,
};
use parking_lot::Mutex;
use tempfile::tempdir;
use url::Url;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn builtin() -> LoaderHandle {
    Arc::new(EmbeddedLoader::builtin())
}

fn beans(ids: &[&str]) -> String {
    let body: String = ids.iter().map(|id| format!(r#"<bean id="{}"/>"#, id)).collect();
    format!(r#"<beans xmlns="{}">{}</beans>"#, BEANS_NAMESPACE, body)
}

fn record_events(orchestrator: &BuildOrchestrator) -> Arc<Mutex<Vec<BuildEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    orchestrator.event_bus().on(move |event, _| {
        sink.lock().push(event);
        Ok(())
    });
    events
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_lifecycle_event_order() {
    let orchestrator = BuildOrchestrator::with_sources([fixture("services.xml")]).unwrap();
    let events = record_events(&orchestrator);

    let resource = orchestrator.build("services", Some(builtin())).unwrap();

    assert_eq!(
        *events.lock(),
        vec![
            BuildEvent::BeginBuild,
            BuildEvent::LoadingDefinitions,
            BuildEvent::LoadedDefinitions,
            BuildEvent::EndBuild,
        ]
    );
    assert_eq!(resource.state(), BuildState::Built);
    assert_eq!(resource.ids().collect::<Vec<_>>(), vec!["store", "cache", "defaultStore"]);
    assert!(Arc::ptr_eq(resource.event_bus(), orchestrator.event_bus()));
}

#[test]
fn test_listener_sees_resource_state() {
    let orchestrator = BuildOrchestrator::with_sources([fixture("services.xml")]).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    orchestrator.event_bus().on(move |event, resource| {
        sink.lock().push((event, resource.state(), resource.len()));
        Ok(())
    });

    orchestrator.build("services", Some(builtin())).unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            (BuildEvent::BeginBuild, BuildState::Building, 0),
            (BuildEvent::LoadingDefinitions, BuildState::Loading, 0),
            (BuildEvent::LoadedDefinitions, BuildState::Loaded, 3),
            (BuildEvent::EndBuild, BuildState::Loaded, 3),
        ]
    );
}

#[test]
fn test_listener_can_extend_build() {
    let orchestrator = BuildOrchestrator::with_sources([fixture("a.xml")]).unwrap();
    orchestrator.event_bus().on(|event, resource| {
        if event == BuildEvent::LoadedDefinitions {
            resource.merge_from([Definition::new("injected", "bean", BEANS_NAMESPACE).with_origin("listener")]);
        }
        Ok(())
    });

    let resource = orchestrator.build("extended", Some(builtin())).unwrap();
    assert_eq!(resource.ids().collect::<Vec<_>>(), vec!["alpha", "injected"]);
}

#[test]
fn test_listener_error_halts_build() {
    let orchestrator = BuildOrchestrator::with_sources([fixture("a.xml")]).unwrap();
    let events = record_events(&orchestrator);
    orchestrator.event_bus().on(|event, _| {
        if event == BuildEvent::LoadedDefinitions {
            return Err("rejected by policy".into());
        }
        Ok(())
    });

    let failure = orchestrator.build("vetoed", Some(builtin())).unwrap_err();
    assert_eq!(failure.state(), BuildState::Loaded);
    assert!(matches!(
        failure.error(),
        ConfigError::Listener { event: BuildEvent::LoadedDefinitions, .. }
    ));
    assert!(!events.lock().contains(&BuildEvent::EndBuild));
    assert!(failure.partial().contains("alpha"));
}

// =============================================================================
// Namespace handling
// =============================================================================

#[test]
fn test_unknown_namespace_keeps_earlier_sources() {
    let orchestrator = BuildOrchestrator::with_sources([fixture("a.xml"), fixture("b.xml")]).unwrap();
    let events = record_events(&orchestrator);

    let failure = orchestrator.build("scenario", Some(builtin())).unwrap_err();

    match failure.error() {
        ConfigError::UnknownNamespace { source_label, namespace, element } => {
            assert!(source_label.ends_with("b.xml"), "unexpected label {}", source_label);
            assert_eq!(namespace, "urn:acme:settings");
            assert_eq!(element, "settings");
        }
        other => panic!("Expected UnknownNamespace, got {:?}", other),
    }
    assert!(failure.to_string().contains("b.xml"));
    assert_eq!(failure.state(), BuildState::Loading);
    assert_eq!(*events.lock(), vec![BuildEvent::BeginBuild, BuildEvent::LoadingDefinitions]);

    let partial = failure.into_partial();
    assert!(partial.contains("alpha"));
    assert_eq!(partial.len(), 1);
}

#[test]
fn test_empty_bootstrap_fails_closed() {
    let orchestrator = BuildOrchestrator::with_sources([fixture("a.xml")]).unwrap();
    let failure = orchestrator
        .build("no-descriptors", Some(Arc::new(MemoryLoader::new())))
        .unwrap_err();

    assert!(failure.partial().namespaces().is_empty());
    assert!(matches!(failure.error(), ConfigError::UnknownNamespace { .. }));
}

#[test]
fn test_injected_registry_skips_lookup() {
    let registry = NamespaceRegistry::new()
        .with_handler(BEANS_NAMESPACE, hypha_config::BeansHandler::new())
        .unwrap();
    let orchestrator = BuildOrchestrator::with_sources([fixture("a.xml")])
        .unwrap()
        .with_bootstrap(registry);

    let resource = orchestrator
        .build("injected", Some(Arc::new(MemoryLoader::new())))
        .unwrap();
    assert!(resource.contains("alpha"));
}

/// Turns `<x:tuning level=".."/>` into a setting definition
struct TuningHandler;

impl NamespaceHandler for TuningHandler {
    fn parse_element(&self, ctx: &mut ParseContext<'_>, element: &Element) -> hypha_config::Result<()> {
        let level = element.attr("level").unwrap_or("normal");
        ctx.define(Definition::new("tuning", "setting", element.namespace()).with_attribute("level", level));
        Ok(())
    }
}

#[test]
fn test_plugin_handler_discovered_from_classpath() {
    let root = tempdir().unwrap();
    let descriptor_dir = root.path().join("META-INF/resource/hypha");
    fs::create_dir_all(&descriptor_dir).unwrap();
    fs::write(
        descriptor_dir.join("register.xml"),
        r#"<register xmlns="urn:hypha:register"><namespace uri="urn:acme:extra" handler="tuning"/></register>"#,
    )
    .unwrap();

    let loader: LoaderHandle = Arc::new(
        ChainLoader::new()
            .with(ClasspathLoader::new([root.path()]))
            .with(EmbeddedLoader::builtin()),
    );
    let catalog = HandlerCatalog::builtin().with("tuning", || Arc::new(TuningHandler) as Arc<dyn NamespaceHandler>);
    let orchestrator = BuildOrchestrator::with_sources([fixture("mixed.xml")])
        .unwrap()
        .with_bootstrap(DescriptorBootstrap::new(DEFAULT_DESCRIPTOR_PATH, catalog));

    let resource = orchestrator.build("plugins", Some(loader)).unwrap();
    assert_eq!(resource.ids().collect::<Vec<_>>(), vec!["worker", "tuning"]);
    assert_eq!(
        resource.get("tuning").unwrap().attributes.get("level").map(String::as_str),
        Some("high")
    );
    assert_eq!(
        resource.namespaces().namespaces().collect::<Vec<_>>(),
        vec!["urn:acme:extra", "urn:hypha:beans"]
    );
}

#[test]
fn test_malformed_source_names_it() {
    let orchestrator = BuildOrchestrator::with_sources([fixture("a.xml"), fixture("broken.xml")]).unwrap();
    let failure = orchestrator.build("broken", Some(builtin())).unwrap_err();

    assert!(matches!(failure.error(), ConfigError::MalformedSource { .. }));
    assert!(failure.error().source_label().unwrap().ends_with("broken.xml"));
    assert!(failure.partial().contains("alpha"));
    assert!(!failure.partial().contains("half"));
}

// =============================================================================
// Source resolution
// =============================================================================

#[test]
fn test_classpath_fan_out_in_loader_order() {
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();
    for (root, ids) in [(&first, ["one", "shared"]), (&second, ["two", "shared"])] {
        fs::create_dir_all(root.path().join("conf")).unwrap();
        fs::write(root.path().join("conf/app.xml"), beans(&ids)).unwrap();
    }
    let loader: LoaderHandle = Arc::new(
        ChainLoader::new()
            .with(ClasspathLoader::new([first.path(), second.path()]))
            .with(EmbeddedLoader::builtin()),
    );

    let mut orchestrator = BuildOrchestrator::new();
    orchestrator.add_source(SourceHandle::classpath("conf/app.xml").unwrap()).unwrap();
    orchestrator.add_source(SourceHandle::classpath("conf/missing.xml").unwrap()).unwrap();

    let resource = orchestrator.build("fan-out", Some(loader)).unwrap();
    assert_eq!(resource.ids().collect::<Vec<_>>(), vec!["one", "shared", "two"]);
    assert_eq!(resource.get("one").unwrap().origin, "classpath:conf/app.xml[0]");
    assert_eq!(resource.get("shared").unwrap().origin, "classpath:conf/app.xml[1]");
}

#[test]
fn test_classpath_zero_matches_is_noop() {
    let mut orchestrator = BuildOrchestrator::new();
    orchestrator.add_source(SourceHandle::classpath("nowhere.xml").unwrap()).unwrap();

    let resource = orchestrator.build("empty", Some(builtin())).unwrap();
    assert!(resource.is_empty());
    assert_eq!(resource.state(), BuildState::Built);
}

#[test]
fn test_url_and_uri_sources() {
    let url = Url::from_file_path(fixture("a.xml")).unwrap();
    let uri = Url::from_file_path(fixture("services.xml")).unwrap().to_string();

    let mut orchestrator = BuildOrchestrator::new();
    orchestrator.add_source(SourceHandle::url(url.clone())).unwrap();
    orchestrator.add_source(SourceHandle::uri(uri.clone()).unwrap()).unwrap();

    let resource = orchestrator.build("locators", Some(builtin())).unwrap();
    assert_eq!(resource.get("alpha").unwrap().origin, url.as_str());
    assert_eq!(resource.get("store").unwrap().origin, uri);
}

#[test]
fn test_missing_file_aborts_build() {
    let dir = tempdir().unwrap();
    let orchestrator =
        BuildOrchestrator::with_sources([fixture("a.xml"), dir.path().join("absent.xml"), fixture("services.xml")])
            .unwrap();

    let failure = orchestrator.build("missing", Some(builtin())).unwrap_err();
    assert!(matches!(failure.error(), ConfigError::ResourceOpenFailure { .. }));
    let partial = failure.into_partial();
    assert!(partial.contains("alpha"));
    assert!(!partial.contains("store"));
}

#[test]
fn test_caller_stream_stays_open() {
    let shared = SharedStream::seekable(Cursor::new(beans(&["streamed"]).into_bytes()));
    let mut orchestrator = BuildOrchestrator::new();
    orchestrator.add_source(shared.clone()).unwrap();
    assert!(!orchestrator.add_source(shared.clone()).unwrap());

    let resource = orchestrator.build("stream", Some(builtin())).unwrap();
    assert!(resource.contains("streamed"));

    let mut stream = shared.lock();
    stream.rewind().unwrap();
    let mut content = String::new();
    stream.read_to_string(&mut content).unwrap();
    assert!(content.contains("streamed"));
}

#[test]
fn test_seekable_stream_rewound_on_rebuild() {
    let shared = SharedStream::seekable(Cursor::new(beans(&["again"]).into_bytes()));
    let mut orchestrator = BuildOrchestrator::new();
    orchestrator.add_source(shared).unwrap();

    assert!(orchestrator.build("first", Some(builtin())).unwrap().contains("again"));
    assert!(orchestrator.build("second", Some(builtin())).unwrap().contains("again"));
}

#[test]
fn test_forward_only_stream_read_from_cursor() {
    let shared = SharedStream::forward_only(Cursor::new(beans(&["once"]).into_bytes()));
    let mut orchestrator = BuildOrchestrator::new();
    orchestrator.add_source(shared).unwrap();

    let mut resource = orchestrator.build("first", Some(builtin())).unwrap();
    assert!(resource.contains("once"));

    // Rewind is unsupported, so the reload sees an exhausted stream
    let err = orchestrator.load(&mut resource).unwrap_err();
    assert!(matches!(err, ConfigError::MalformedSource { .. }));
    assert!(resource.contains("once"));
}

/// Counts how many streams it handed out were dropped
struct CountingLoader {
    content: &'static str,
    closed: Arc<AtomicUsize>,
}

struct TrackedReader {
    inner: Cursor<&'static [u8]>,
    closed: Arc<AtomicUsize>,
}

impl Read for TrackedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Drop for TrackedReader {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl ResourceLoader for CountingLoader {
    fn resolve(&self, name: &str) -> io::Result<Vec<Box<dyn Read + Send>>> {
        if name == DEFAULT_DESCRIPTOR_PATH {
            return EmbeddedLoader::builtin().resolve(name);
        }
        Ok((0..2)
            .map(|_| {
                Box::new(TrackedReader {
                    inner: Cursor::new(self.content.as_bytes()),
                    closed: self.closed.clone(),
                }) as Box<dyn Read + Send>
            })
            .collect())
    }

    fn describe(&self) -> String {
        "counting".to_string()
    }
}

#[test]
fn test_owned_streams_closed_after_use() {
    let closed = Arc::new(AtomicUsize::new(0));
    let loader = CountingLoader {
        content: r#"<beans xmlns="urn:hypha:beans"><bean id="ok"/></beans>"#,
        closed: closed.clone(),
    };
    let mut orchestrator = BuildOrchestrator::new();
    orchestrator.add_source(SourceHandle::classpath("app.xml").unwrap()).unwrap();

    orchestrator.build("closed", Some(Arc::new(loader))).unwrap();
    assert_eq!(closed.load(Ordering::SeqCst), 2);
}

#[test]
fn test_owned_streams_closed_when_parse_fails() {
    let closed = Arc::new(AtomicUsize::new(0));
    let loader = CountingLoader {
        content: r#"<beans xmlns="urn:hypha:beans"><bean id="ok">"#,
        closed: closed.clone(),
    };
    let mut orchestrator = BuildOrchestrator::new();
    orchestrator.add_source(SourceHandle::classpath("app.xml").unwrap()).unwrap();

    let failure = orchestrator.build("closed", Some(Arc::new(loader))).unwrap_err();
    assert!(matches!(failure.error(), ConfigError::MalformedSource { .. }));
    // The first stream failed and was dropped; the second was dropped unread
    assert_eq!(closed.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Re-entrant load
// =============================================================================

#[test]
fn test_load_reapplies_current_sources() {
    let dir = tempdir().unwrap();
    let extra = dir.path().join("extra.xml");
    fs::write(&extra, beans(&["late"])).unwrap();

    let mut orchestrator = BuildOrchestrator::with_sources([fixture("a.xml")]).unwrap();
    let mut resource = orchestrator.build("reload", Some(builtin())).unwrap();
    assert!(!resource.contains("late"));

    orchestrator.add_source(extra).unwrap();
    let events = record_events(&orchestrator);
    orchestrator.load(&mut resource).unwrap();

    assert_eq!(*events.lock(), vec![BuildEvent::LoadingDefinitions, BuildEvent::LoadedDefinitions]);
    assert_eq!(resource.ids().collect::<Vec<_>>(), vec!["alpha", "late"]);
    assert_eq!(resource.state(), BuildState::Built);
}

#[test]
fn test_concurrent_builds_share_orchestrator() {
    let orchestrator = BuildOrchestrator::with_sources([fixture("services.xml"), fixture("a.xml")]).unwrap();

    let lengths: Vec<usize> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let orchestrator = &orchestrator;
                scope.spawn(move || {
                    orchestrator
                        .build(&format!("thread-{}", i), Some(builtin()))
                        .map(|r| r.len())
                        .unwrap_or(0)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(lengths, vec![4, 4, 4, 4]);
}

#[test]
fn test_stream_position_after_partial_read() {
    let mut data = b"garbage".to_vec();
    data.extend_from_slice(beans(&["positioned"]).as_bytes());
    let mut cursor = Cursor::new(data);
    cursor.seek(SeekFrom::Start(7)).unwrap();

    let shared = SharedStream::forward_only(cursor);
    let mut orchestrator = BuildOrchestrator::new();
    orchestrator.add_source(shared).unwrap();

    let resource = orchestrator.build("positioned", Some(builtin())).unwrap();
    assert!(resource.contains("positioned"));
}
