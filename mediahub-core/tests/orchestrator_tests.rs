//! End-to-end orchestrator tests with recording mock modules.
//!
//! Every mock appends to a shared event log, so the tests can assert not
//! just what the orchestrator called but in which order.
//!
//! Run with: cargo test --test orchestrator_tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use url::Url;

use mediahub_core::{
    AppId, ApplicationConfig, ApplicationInfo, CreateResult, Error, HostConfig, MediaRouter,
    Module, ModuleHandle, ModuleKind, OrchestratorConfig, Orchestrator, OriginConfig, PassConfig,
    ProviderType, PullProvider, StreamId, StreamInfo, StreamObserver,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Create(String, String),
    Delete(String, String),
    Pull {
        module: String,
        app: String,
        stream: String,
        url: String,
        offset: u64,
    },
}

type EventLog = Arc<Mutex<Vec<Event>>>;

/// Base recording module; publishers and transcoders use it directly,
/// providers and routers embed it.
struct RecordingModule {
    label: String,
    kind: ModuleKind,
    log: EventLog,
    held: Mutex<HashSet<String>>,
    create_ok: AtomicBool,
    delete_ok: AtomicBool,
}

impl RecordingModule {
    fn new(label: &str, kind: ModuleKind, log: &EventLog) -> Self {
        Self {
            label: label.to_string(),
            kind,
            log: log.clone(),
            held: Mutex::new(HashSet::new()),
            create_ok: AtomicBool::new(true),
            delete_ok: AtomicBool::new(true),
        }
    }

    fn refuse_creates(&self) {
        self.create_ok.store(false, Ordering::SeqCst);
    }

    fn fail_deletes(&self) {
        self.delete_ok.store(false, Ordering::SeqCst);
    }

    fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

impl Module for RecordingModule {
    fn kind(&self) -> ModuleKind {
        self.kind
    }

    fn on_create_application(&self, app: &ApplicationInfo) -> bool {
        self.log
            .lock()
            .push(Event::Create(self.label.clone(), app.name().to_string()));
        if !self.create_ok.load(Ordering::SeqCst) {
            return false;
        }
        self.held.lock().insert(app.name().to_string());
        true
    }

    fn on_delete_application(&self, app: &ApplicationInfo) -> bool {
        self.log
            .lock()
            .push(Event::Delete(self.label.clone(), app.name().to_string()));
        self.held.lock().remove(app.name());
        self.delete_ok.load(Ordering::SeqCst)
    }

    fn name(&self) -> String {
        self.label.clone()
    }
}

struct RecordingProvider {
    core: RecordingModule,
    provider_type: ProviderType,
    pull_ok: AtomicBool,
}

impl RecordingProvider {
    fn new(label: &str, provider_type: ProviderType, log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            core: RecordingModule::new(label, ModuleKind::Provider, log),
            provider_type,
            pull_ok: AtomicBool::new(true),
        })
    }

    fn refuse_pulls(&self) {
        self.pull_ok.store(false, Ordering::SeqCst);
    }
}

impl Module for RecordingProvider {
    fn kind(&self) -> ModuleKind {
        self.core.kind()
    }

    fn on_create_application(&self, app: &ApplicationInfo) -> bool {
        self.core.on_create_application(app)
    }

    fn on_delete_application(&self, app: &ApplicationInfo) -> bool {
        self.core.on_delete_application(app)
    }

    fn name(&self) -> String {
        self.core.name()
    }
}

impl PullProvider for RecordingProvider {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    fn pull_stream(
        &self,
        app: &ApplicationInfo,
        stream_name: &str,
        url: &Url,
        offset_ms: u64,
    ) -> bool {
        self.core.log.lock().push(Event::Pull {
            module: self.core.name(),
            app: app.name().to_string(),
            stream: stream_name.to_string(),
            url: url.to_string(),
            offset: offset_ms,
        });
        self.pull_ok.load(Ordering::SeqCst)
    }
}

struct RecordingRouter {
    core: RecordingModule,
    observers: Mutex<Vec<(ApplicationInfo, Weak<dyn StreamObserver>)>>,
}

impl RecordingRouter {
    fn new(label: &str, log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            core: RecordingModule::new(label, ModuleKind::MediaRouter, log),
            observers: Mutex::new(Vec::new()),
        })
    }

    fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    fn report_stream_created(&self, app_name: &str, stream: &StreamInfo) {
        let entry = self
            .observers
            .lock()
            .iter()
            .find(|(info, _)| info.name() == app_name)
            .map(|(info, weak)| (info.clone(), weak.clone()));
        if let Some((info, weak)) = entry {
            if let Some(observer) = weak.upgrade() {
                observer.on_stream_created(&info, stream);
            }
        }
    }

    fn report_stream_deleted(&self, app_name: &str, stream: &StreamInfo) {
        let entry = self
            .observers
            .lock()
            .iter()
            .find(|(info, _)| info.name() == app_name)
            .map(|(info, weak)| (info.clone(), weak.clone()));
        if let Some((info, weak)) = entry {
            if let Some(observer) = weak.upgrade() {
                observer.on_stream_deleted(&info, stream);
            }
        }
    }
}

impl Module for RecordingRouter {
    fn kind(&self) -> ModuleKind {
        self.core.kind()
    }

    fn on_create_application(&self, app: &ApplicationInfo) -> bool {
        self.core.on_create_application(app)
    }

    fn on_delete_application(&self, app: &ApplicationInfo) -> bool {
        self.core.on_delete_application(app)
    }

    fn name(&self) -> String {
        self.core.name()
    }
}

impl MediaRouter for RecordingRouter {
    fn register_observer(
        &self,
        app: &ApplicationInfo,
        observer: Weak<dyn StreamObserver>,
    ) -> bool {
        self.observers.lock().push((app.clone(), observer));
        true
    }

    fn unregister_observer(&self, app_id: AppId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(info, _)| info.id() != app_id);
        observers.len() != before
    }
}

// ---- helpers --------------------------------------------------------------

fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

fn events(log: &EventLog) -> Vec<Event> {
    log.lock().clone()
}

fn clear(log: &EventLog) {
    log.lock().clear();
}

fn orchestrator() -> Arc<Orchestrator> {
    Orchestrator::new(&OrchestratorConfig::default())
}

fn origin(location: &str, scheme: &str, urls: &[&str]) -> OriginConfig {
    OriginConfig {
        location: location.to_string(),
        pass: PassConfig {
            scheme: scheme.to_string(),
            urls: urls.iter().map(ToString::to_string).collect(),
        },
        application: ApplicationConfig::default(),
    }
}

fn host(name: &str, domains: &[&str], origins: Vec<OriginConfig>) -> HostConfig {
    HostConfig {
        name: name.to_string(),
        domains: domains.iter().map(ToString::to_string).collect(),
        origins,
    }
}

// ---- scenarios ------------------------------------------------------------

#[test]
fn pull_by_location_reaches_the_matching_provider() {
    let log = new_log();
    let orch = orchestrator();
    let provider = RecordingProvider::new("rtmp-src", ProviderType::Rtmp, &log);
    orch.register_module(ModuleHandle::Provider(provider)).unwrap();

    orch.apply_origin_map(&[host(
        "h1",
        &["*.example.com"],
        vec![origin("/live", "rtmp", &["rtmp://src/app"])],
    )])
    .unwrap();

    let (urls, location) = orch.url_list_for_location("h1#live", "stream1").unwrap();
    assert_eq!(location, "/live");
    assert_eq!(
        urls.iter().map(|url| url.to_string()).collect::<Vec<_>>(),
        vec!["rtmp://src/app/stream1".to_string()]
    );

    orch.request_pull_stream("h1#live", "stream1", 0).unwrap();

    assert!(events(&log).contains(&Event::Pull {
        module: "rtmp-src".to_string(),
        app: "h1#live".to_string(),
        stream: "stream1".to_string(),
        url: "rtmp://src/app/stream1".to_string(),
        offset: 0,
    }));
}

#[test]
fn domain_resolution_scans_patterns_in_order() {
    let orch = orchestrator();
    orch.apply_origin_map(&[host(
        "h1",
        &["*.example.com"],
        vec![origin("/live", "rtmp", &["rtmp://src/app"])],
    )])
    .unwrap();

    assert_eq!(
        orch.vhost_name_from_domain("a.example.com"),
        Some("h1".to_string())
    );
    assert_eq!(orch.vhost_name_from_domain("other.org"), None);

    assert_eq!(
        orch.resolve_application_name_from_domain("a.example.com", "live")
            .unwrap(),
        "h1#live"
    );
    assert!(matches!(
        orch.resolve_application_name_from_domain("other.org", "live"),
        Err(Error::NameUnresolved(_))
    ));
}

#[test]
fn rejected_create_rolls_back_in_reverse_order() {
    let log = new_log();
    let orch = orchestrator();
    let router = RecordingRouter::new("router", &log);
    let pub1 = Arc::new(RecordingModule::new("pub1", ModuleKind::Publisher, &log));
    let pub2 = Arc::new(RecordingModule::new("pub2", ModuleKind::Publisher, &log));
    pub2.refuse_creates();

    orch.register_module(ModuleHandle::MediaRouter(router.clone())).unwrap();
    orch.register_module(ModuleHandle::Publisher(pub1.clone())).unwrap();
    orch.register_module(ModuleHandle::Publisher(pub2.clone())).unwrap();

    let result = orch.apply_origin_map(&[host(
        "h1",
        &[],
        vec![origin("/live", "rtmp", &["rtmp://src/app"])],
    )]);
    assert!(matches!(result, Err(Error::ReconcileFailed(1))));

    let app = "h1#live".to_string();
    assert_eq!(
        events(&log),
        vec![
            Event::Create("router".to_string(), app.clone()),
            Event::Create("pub1".to_string(), app.clone()),
            Event::Create("pub2".to_string(), app.clone()),
            Event::Delete("pub1".to_string(), app.clone()),
            Event::Delete("router".to_string(), app),
        ]
    );

    // No module holds the application, nothing landed in the vhost, and no
    // observer registration survived.
    assert_eq!(router.core.held_count(), 0);
    assert_eq!(pub1.held_count(), 0);
    assert_eq!(pub2.held_count(), 0);
    assert!(orch.application_names("h1").is_empty());
    assert_eq!(router.observer_count(), 0);
}

#[test]
fn reconcile_diff_deletes_before_creates() {
    let log = new_log();
    let orch = orchestrator();
    let publisher = Arc::new(RecordingModule::new("pub", ModuleKind::Publisher, &log));
    orch.register_module(ModuleHandle::Publisher(publisher)).unwrap();

    orch.apply_origin_map(&[host("h", &[], vec![origin("/a", "rtmp", &["rtmp://x/1"])])])
        .unwrap();
    clear(&log);

    orch.apply_origin_map(&[host(
        "h",
        &[],
        vec![
            origin("/a", "rtmp", &["rtmp://x/2"]),
            origin("/b", "rtmp", &["rtmp://y/1"]),
        ],
    )])
    .unwrap();

    assert_eq!(
        events(&log),
        vec![
            Event::Delete("pub".to_string(), "h#a".to_string()),
            Event::Create("pub".to_string(), "h#a".to_string()),
            Event::Create("pub".to_string(), "h#b".to_string()),
        ]
    );
    assert_eq!(
        orch.application_names("h"),
        vec!["h#a".to_string(), "h#b".to_string()]
    );
}

#[test]
fn explicit_url_pull_is_dispatched_by_scheme() {
    let log = new_log();
    let orch = orchestrator();
    let rtmp = RecordingProvider::new("rtmp-src", ProviderType::Rtmp, &log);
    let rtsp = RecordingProvider::new("rtsp-src", ProviderType::RtspPull, &log);
    orch.register_module(ModuleHandle::Provider(rtmp)).unwrap();
    orch.register_module(ModuleHandle::Provider(rtsp)).unwrap();

    orch.apply_origin_map(&[host("h", &[], vec![origin("/a", "rtmp", &["rtmp://x/a"])])])
        .unwrap();
    clear(&log);

    orch.request_pull_stream_from_url("h#a", "s", "rtsp://src/s", 0)
        .unwrap();

    let pulls: Vec<Event> = events(&log)
        .into_iter()
        .filter(|event| matches!(event, Event::Pull { .. }))
        .collect();
    assert_eq!(
        pulls,
        vec![Event::Pull {
            module: "rtsp-src".to_string(),
            app: "h#a".to_string(),
            stream: "s".to_string(),
            url: "rtsp://src/s".to_string(),
            offset: 0,
        }]
    );
}

#[test]
fn pulled_stream_is_attributed_to_the_matched_origin() {
    let log = new_log();
    let orch = orchestrator();
    let provider = RecordingProvider::new("rtmp-src", ProviderType::Rtmp, &log);
    let router = RecordingRouter::new("router", &log);
    orch.register_module(ModuleHandle::Provider(provider)).unwrap();
    orch.register_module(ModuleHandle::MediaRouter(router.clone())).unwrap();

    orch.apply_origin_map(&[host(
        "h1",
        &["*.example.com"],
        vec![origin("/live", "rtmp", &["rtmp://src/app"])],
    )])
    .unwrap();

    orch.request_pull_stream("h1#live", "stream1", 0).unwrap();

    let stream = StreamInfo::new(StreamId(7), "stream1");
    router.report_stream_created("h1#live", &stream);

    assert_eq!(
        orch.origin_stream_names("h1", "/live"),
        vec!["stream1".to_string()]
    );
    assert!(orch.domain_stream_names("h1", "*.example.com").is_empty());
    assert_eq!(orch.stream_count("h1"), 1);

    router.report_stream_deleted("h1#live", &stream);
    assert_eq!(orch.stream_count("h1"), 0);
}

// ---- properties -----------------------------------------------------------

#[test]
fn registry_keeps_set_semantics() {
    let log = new_log();
    let orch = orchestrator();
    let provider = RecordingProvider::new("p", ProviderType::Rtmp, &log);

    orch.register_module(ModuleHandle::Provider(provider.clone())).unwrap();
    assert!(matches!(
        orch.register_module(ModuleHandle::Provider(provider.clone())),
        Err(Error::ModuleAlreadyRegistered)
    ));
    assert_eq!(orch.module_count(), 1);

    orch.unregister_module(&ModuleHandle::Provider(provider.clone())).unwrap();
    assert_eq!(orch.module_count(), 0);
    assert!(matches!(
        orch.unregister_module(&ModuleHandle::Provider(provider)),
        Err(Error::ModuleNotFound)
    ));
}

#[test]
fn identical_snapshots_are_idempotent() {
    let log = new_log();
    let orch = orchestrator();
    let publisher = Arc::new(RecordingModule::new("pub", ModuleKind::Publisher, &log));
    orch.register_module(ModuleHandle::Publisher(publisher)).unwrap();

    let snapshot = vec![host(
        "h1",
        &["*.example.com"],
        vec![
            origin("/live", "rtmp", &["rtmp://src/app"]),
            origin("/vod", "file", &["file://media"]),
        ],
    )];
    orch.apply_origin_map(&snapshot).unwrap();
    clear(&log);

    orch.apply_origin_map(&snapshot).unwrap();
    assert!(events(&log).is_empty());
}

#[test]
fn empty_snapshot_tears_everything_down() {
    let log = new_log();
    let orch = orchestrator();
    let provider = RecordingProvider::new("rtmp-src", ProviderType::Rtmp, &log);
    let router = RecordingRouter::new("router", &log);
    orch.register_module(ModuleHandle::Provider(provider.clone())).unwrap();
    orch.register_module(ModuleHandle::MediaRouter(router.clone())).unwrap();

    orch.apply_origin_map(&[host(
        "h1",
        &["*.example.com"],
        vec![origin("/live", "rtmp", &["rtmp://src/app"])],
    )])
    .unwrap();
    orch.request_pull_stream("h1#live", "stream1", 0).unwrap();
    router.report_stream_created("h1#live", &StreamInfo::new(StreamId(1), "stream1"));
    assert_eq!(orch.stream_count("h1"), 1);

    orch.apply_origin_map(&[]).unwrap();

    assert!(orch.virtual_host_names().is_empty());
    assert_eq!(provider.core.held_count(), 0);
    assert_eq!(router.core.held_count(), 0);
    assert_eq!(router.observer_count(), 0);
    assert_eq!(orch.stream_count("h1"), 0);
}

#[test]
fn app_ids_increase_monotonically() {
    let orch = orchestrator();
    orch.apply_origin_map(&[host("h", &[], vec![])]).unwrap();

    let config = ApplicationConfig::default();
    let first = orch.create_application("h", "one", &config).unwrap();
    let second = orch.create_application("h", "two", &config).unwrap();
    assert!(second.app_id() > first.app_id());

    // Re-creating an existing application is an untouched `Exists`.
    assert_eq!(
        orch.create_application("h", "two", &config).unwrap(),
        CreateResult::Exists(second.app_id())
    );

    orch.delete_application("h", "one").unwrap();
    let third = orch.create_application("h", "three", &config).unwrap();
    assert!(third.app_id() > second.app_id());
}

/// Publisher that re-enters the orchestrator's name resolution from inside
/// its create callback, the way real modules resolve names on their own
/// I/O threads.
struct ReentrantPublisher {
    core: RecordingModule,
    orchestrator: Mutex<Weak<Orchestrator>>,
    resolved: Mutex<Option<String>>,
}

impl ReentrantPublisher {
    fn new(log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            core: RecordingModule::new("reentrant-pub", ModuleKind::Publisher, log),
            orchestrator: Mutex::new(Weak::new()),
            resolved: Mutex::new(None),
        })
    }
}

impl Module for ReentrantPublisher {
    fn kind(&self) -> ModuleKind {
        self.core.kind()
    }

    fn on_create_application(&self, app: &ApplicationInfo) -> bool {
        if let Some(orchestrator) = self.orchestrator.lock().upgrade() {
            *self.resolved.lock() = orchestrator.vhost_name_from_domain("a.example.com");
        }
        self.core.on_create_application(app)
    }

    fn on_delete_application(&self, app: &ApplicationInfo) -> bool {
        self.core.on_delete_application(app)
    }

    fn name(&self) -> String {
        self.core.name()
    }
}

#[test]
fn module_callbacks_may_reenter_name_resolution() {
    let log = new_log();
    let orch = orchestrator();
    let publisher = ReentrantPublisher::new(&log);
    *publisher.orchestrator.lock() = Arc::downgrade(&orch);
    orch.register_module(ModuleHandle::Publisher(publisher.clone())).unwrap();

    orch.apply_origin_map(&[host(
        "h1",
        &["*.example.com"],
        vec![origin("/live", "rtmp", &["rtmp://src/app"])],
    )])
    .unwrap();

    // The callback ran during the fan-out and resolved against the tree
    // being applied, without deadlocking or panicking.
    assert_eq!(publisher.resolved.lock().clone(), Some("h1".to_string()));
    assert_eq!(publisher.core.held_count(), 1);
}

#[test]
fn public_api_is_usable_across_threads() {
    let orch = orchestrator();
    let snapshot = vec![host("h1", &["*.example.com"], vec![])];
    orch.apply_origin_map(&snapshot).unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let orch = Arc::clone(&orch);
        handles.push(std::thread::spawn(move || {
            for _ in 0..200 {
                let _ = orch.vhost_name_from_domain("a.example.com");
                let _ = orch.virtual_host_names();
            }
        }));
    }
    for _ in 0..20 {
        orch.apply_origin_map(&snapshot).unwrap();
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(orch.virtual_host_names(), vec!["h1".to_string()]);
}

// ---- error paths ----------------------------------------------------------

#[test]
fn delete_failure_still_removes_the_application() {
    let log = new_log();
    let orch = orchestrator();
    let publisher = Arc::new(RecordingModule::new("pub", ModuleKind::Publisher, &log));
    orch.register_module(ModuleHandle::Publisher(publisher.clone())).unwrap();

    orch.apply_origin_map(&[host("h", &[], vec![origin("/a", "rtmp", &["rtmp://x/a"])])])
        .unwrap();

    publisher.fail_deletes();
    let result = orch.delete_application("h", "a");
    assert!(matches!(
        result,
        Err(Error::ApplicationDeleteFailed { failures: 1, .. })
    ));
    assert!(orch.application_names("h").is_empty());
}

#[test]
fn unsupported_scheme_is_reported() {
    let log = new_log();
    let orch = orchestrator();
    let provider = RecordingProvider::new("rtmp-src", ProviderType::Rtmp, &log);
    orch.register_module(ModuleHandle::Provider(provider)).unwrap();

    orch.apply_origin_map(&[host("h", &[], vec![origin("/a", "rtmp", &["rtmp://x/a"])])])
        .unwrap();

    assert!(matches!(
        orch.request_pull_stream_from_url("h#a", "s", "gopher://src/s", 0),
        Err(Error::SchemeUnsupported(_))
    ));
}

#[test]
fn pull_requires_a_resolvable_application() {
    let log = new_log();
    let orch = orchestrator();
    let provider = RecordingProvider::new("rtmp-src", ProviderType::Rtmp, &log);
    orch.register_module(ModuleHandle::Provider(provider.clone())).unwrap();

    orch.apply_origin_map(&[host("h", &[], vec![origin("/a", "rtmp", &["rtmp://x/a"])])])
        .unwrap();

    assert!(matches!(
        orch.request_pull_stream("h#missing", "s", 0),
        Err(Error::ApplicationNotFound(_))
    ));
    assert!(matches!(
        orch.request_pull_stream("not-canonical", "s", 0),
        Err(Error::NameUnresolved(_))
    ));
    assert!(matches!(
        orch.request_pull_stream("nowhere#a", "s", 0),
        Err(Error::VirtualHostNotFound(_))
    ));

    // All providers rejecting the pull surfaces a failure, not a panic.
    provider.refuse_pulls();
    assert!(matches!(
        orch.request_pull_stream("h#a", "s", 0),
        Err(Error::PullFailed { .. })
    ));
}
