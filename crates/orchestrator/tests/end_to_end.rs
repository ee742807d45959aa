#![forbid(unsafe_code)]

use config::{Config, MatchStrategy};
use kernel::{Protection, SyntheticMemory};
use orchestrator::CaptureError;
use orchestrator::clock::SystemClock;
use orchestrator::domain::ProbeEvent;
use orchestrator::interceptor::SoftwareInterceptor;
use orchestrator::locator::{ModuleTable, WaitOptions, wait_until_resolvable};
use orchestrator::probe::ChannelSink;
use orchestrator::session::{ProbeSession, Services, SessionPlan};
use orchestrator::watcher::{LoadEventWatcher, WatchState};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const DLOPEN: usize = 0x5000;
const PATHS: usize = 0x6000_0000;
const DECOY_PATH: usize = PATHS + 0x100;
const BASE: usize = 0x4000_0000;
const DATA: usize = 0x7000_0000;
const LOADED_PATH: &str = "/data/app/lib/target.so";
const DECOY: &str = "/data/app/lib/nottarget.so";

/// Far longer than any test may take, so only load detection can finish a
/// wait in time.
const POLL_INTERVAL: Duration = Duration::from_secs(10);
const TIMEOUT: Duration = Duration::from_secs(5);

struct Process {
    table: Arc<ModuleTable>,
    interceptor: Arc<SoftwareInterceptor>,
    memory: Arc<SyntheticMemory>,
}

impl Process {
    fn new() -> Self {
        let table = ModuleTable::new(MatchStrategy::Basename);
        table.define_export("libdl.so", "dlopen", DLOPEN);

        let memory = SyntheticMemory::new();
        memory.map(PATHS, c_string(LOADED_PATH), Protection::READ);
        memory.map(DECOY_PATH, c_string(DECOY), Protection::READ);
        memory.map_zeroed(BASE, 0x1000, Protection::READ | Protection::EXECUTE);
        memory.map(DATA, [0xde, 0xad, 0xbe, 0xef], Protection::READ);

        Self {
            table: Arc::new(table),
            interceptor: Arc::new(SoftwareInterceptor::new()),
            memory: Arc::new(memory),
        }
    }

    /// Call `dlopen(path, RTLD_NOW)`, which maps `path` at `BASE`.
    fn dlopen(&self, path_ptr: usize, path: &str) -> usize {
        self.interceptor.invoke(DLOPEN, &[path_ptr, 2], |_| {
            self.table.load(path, BASE);
            0x1234
        })
    }

    fn call_target(&self, args: &[usize]) -> usize {
        self.interceptor.invoke(BASE + 0x100, args, |_| 0xbeef)
    }
}

fn c_string(s: &str) -> Vec<u8> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

fn plan(strategy: MatchStrategy) -> SessionPlan {
    let mut config = Config::new();
    config.target.module = "target.so".into();
    config.target.offset = 0x100;
    config.target.match_strategy = strategy;
    config.watch.poll_interval = POLL_INTERVAL;
    SessionPlan::from_config(&config).unwrap()
}

fn wait_for(what: &str, mut ready: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !ready() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn probe_captures_after_module_loads() {
    let process = Process::new();
    let (sink, events) = ChannelSink::new();
    let services = Services {
        locator: Box::new(Arc::clone(&process.table)),
        interceptor: process.interceptor.clone(),
        memory: process.memory.clone(),
        clock: Box::new(SystemClock),
        sink: Arc::new(sink),
    };
    let session = ProbeSession::new(plan(MatchStrategy::Basename), services);
    let handle = session.spawn(CancellationToken::new()).unwrap();

    wait_for("the loader hook", || process.interceptor.is_attached(DLOPEN));
    assert!(!handle.is_finished());

    let loaded_at = Instant::now();
    assert_eq!(process.dlopen(PATHS, LOADED_PATH), 0x1234);
    let probe = handle.join().unwrap().unwrap();
    assert!(loaded_at.elapsed() < TIMEOUT);

    assert_eq!(probe.address(), BASE + 0x100);
    assert!(!process.interceptor.is_attached(DLOPEN));

    assert_eq!(process.call_target(&[DATA, 4, 0]), 0xbeef);
    match events.try_recv().unwrap() {
        ProbeEvent::Captured {
            record,
            return_value,
        } => {
            assert_eq!(record.arguments(), &[DATA, 4, 0]);
            assert_eq!(record.hex_digest(), "deadbeef");
            assert_eq!(return_value, 0xbeef);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // A bad pointer is reported and the next call is captured again.
    process.call_target(&[0x10, 4, 0]);
    let event = events.try_recv().unwrap();
    assert!(matches!(
        event.error(),
        Some(CaptureError::OutOfBoundsRead { address: 0x10, .. })
    ));
    process.call_target(&[DATA, 0, 0]);
    assert_eq!(events.try_recv().unwrap().record().map(|r| r.hex_digest()), Some(""));

    probe.uninstall().unwrap();
    process.call_target(&[DATA, 4, 0]);
    assert!(events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn loose_match_rearms_after_unrelated_load() {
    let process = Process::new();
    let watcher = Arc::new(LoadEventWatcher::new(
        "target.so",
        MatchStrategy::Substring,
        process.memory.clone(),
    ));
    let watch = watcher
        .watch_loader_entry(process.interceptor.clone(), DLOPEN)
        .unwrap();

    let table = Arc::clone(&process.table);
    let waiting = tokio::spawn(async move {
        let options = WaitOptions {
            poll_interval: POLL_INTERVAL,
            max_attempts: None,
        };
        wait_until_resolvable(
            table.as_ref(),
            &SystemClock,
            "target.so",
            &options,
            &CancellationToken::new(),
            Some(&watch),
        )
        .await
    });

    let started = Instant::now();
    // Matches the substring but maps a module the locator won't accept.
    process.dlopen(DECOY_PATH, DECOY);
    while watcher.state() != WatchState::Armed {
        assert!(started.elapsed() < TIMEOUT, "watcher was not re-armed");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(!waiting.is_finished());

    process.dlopen(PATHS, LOADED_PATH);
    let module = tokio::time::timeout(TIMEOUT, waiting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(module.base_address(), Some(BASE));
    assert!(started.elapsed() < TIMEOUT);
}
