//! Periodic reconciliation of docker sources against running containers.
//!
//! Every scan lists the running containers, matches them against the
//! configured docker sources and converges the set of tailers: new matches
//! get a tailer, tailers that reported they should stop are recreated, and
//! tailers of containers that no longer match are stopped.
mod error;
mod matcher;
mod runtime;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

pub use error::{Error, Result};
pub use matcher::source_should_monitor_container;
pub use runtime::{ContainerRuntime, Tailer};

use crate::auditor::Auditor;
use crate::config::LogSource;
use crate::container::{Container, ContainerID};
use crate::pipeline::PipelineProvider;

pub const DEFAULT_SCAN_PERIOD: Duration = Duration::from_secs(10);

/// Where a new tailer starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailMode {
    FromBeginning,
    /// Continue from the offset recorded by the auditor.
    Resume,
}

type Connect<R> =
    Box<dyn Fn() -> std::result::Result<R, <R as ContainerRuntime>::Error> + Send + Sync>;

#[derive(Debug)]
struct Registry<T> {
    tailers: HashMap<ContainerID, T>,
    stopping: bool,
}

pub struct Scanner<R: ContainerRuntime, P, A> {
    sources: Vec<Arc<LogSource>>,
    pipeline: P,
    auditor: Arc<A>,
    connect: Connect<R>,
    runtime: OnceLock<R>,
    scan_period: Duration,
    registry: Mutex<Registry<R::Tailer>>,
    done: watch::Sender<bool>,
}

impl<R, P, A> Scanner<R, P, A>
where
    R: ContainerRuntime,
    P: PipelineProvider,
    A: Auditor,
{
    /// Creates an idle scanner for the docker sources among `sources`.
    ///
    /// `connect` builds the runtime client when the scanner is started.
    pub fn new(
        sources: &[Arc<LogSource>],
        pipeline: P,
        auditor: Arc<A>,
        connect: impl Fn() -> std::result::Result<R, R::Error> + Send + Sync + 'static,
    ) -> Self {
        let sources = sources
            .iter()
            .filter(|source| source.is_docker())
            .map(Arc::clone)
            .collect();
        let (done, _) = watch::channel(false);

        Self {
            sources,
            pipeline,
            auditor,
            connect: Box::new(connect),
            runtime: OnceLock::new(),
            scan_period: DEFAULT_SCAN_PERIOD,
            registry: Mutex::new(Registry {
                tailers: HashMap::new(),
                stopping: false,
            }),
            done,
        }
    }

    /// Sets the period between two scans. A zero period falls back to
    /// [`DEFAULT_SCAN_PERIOD`].
    pub fn with_scan_period(mut self, scan_period: Duration) -> Self {
        if scan_period.is_zero() {
            log::warn!(
                "scan period can't be zero, using {:?} instead",
                DEFAULT_SCAN_PERIOD
            );
            self.scan_period = DEFAULT_SCAN_PERIOD;
        } else {
            self.scan_period = scan_period;
        }
        self
    }

    /// Connects to the runtime, resumes tailing the matching containers and
    /// schedules the periodic scans.
    ///
    /// Setup failures are logged and leave the scanner idle.
    pub async fn start(self: &Arc<Self>) {
        match self.setup().await {
            Ok(()) => {
                tokio::spawn(Arc::clone(self).run());
            }
            Err(err) => log::error!("Can't tail containers: {}", err),
        }
    }

    /// Whether the runtime client was initialized by [`start`](Self::start).
    pub fn is_started(&self) -> bool {
        self.runtime.get().is_some()
    }

    /// Stops the periodic scans and every tailer. Returns once all tailers
    /// have stopped.
    pub async fn stop(&self) {
        let mut registry = self.registry.lock().await;
        self.done.send_replace(true);
        registry.stopping = true;

        let mut stops = JoinSet::new();
        for (_, mut tailer) in registry.tailers.drain() {
            stops.spawn(async move { tailer.stop().await });
        }
        while let Some(res) = stops.join_next().await {
            if let Err(err) = res {
                log::error!("failed to stop tailer: {}", err);
            }
        }
        log::debug!("Stopped container scanner");
    }

    /// Ids of the containers currently tailed.
    pub async fn tailed_containers(&self) -> Vec<ContainerID> {
        let registry = self.registry.lock().await;
        let mut ids: Vec<ContainerID> = registry.tailers.keys().cloned().collect();
        ids.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));
        ids
    }

    async fn setup(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::NoContainerSource);
        }
        if self.is_started() {
            return Err(Error::AlreadyStarted);
        }
        let runtime = (self.connect)().map_err(|err| Error::ClientInit(Box::new(err)))?;
        if self.runtime.set(runtime).is_err() {
            return Err(Error::AlreadyStarted);
        }

        self.scan(TailMode::Resume).await;
        Ok(())
    }

    async fn run(self: Arc<Self>) {
        let mut done = self.done.subscribe();
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.scan_period, self.scan_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *done.borrow_and_update() {
                break;
            }
            tokio::select! {
                res = done.changed() => if res.is_err() {
                    break;
                },
                _ = ticker.tick() => self.scan(TailMode::FromBeginning).await,
            }
        }
        log::trace!("Container scan loop exited");
    }

    /// Converges the tailers to the containers matching a source.
    async fn scan(&self, mode: TailMode) {
        let mut registry = self.registry.lock().await;
        if registry.stopping {
            return;
        }
        let Some(runtime) = self.runtime.get() else {
            return;
        };

        let containers = self.list_containers(runtime).await;
        let mut monitored = HashSet::with_capacity(containers.len());
        for container in &containers {
            let Some(source) = self
                .sources
                .iter()
                .find(|source| source_should_monitor_container(source, container))
            else {
                continue;
            };
            monitored.insert(container.id.clone());

            if registry
                .tailers
                .get(&container.id)
                .is_some_and(|tailer| tailer.should_stop())
            {
                stop_tailer(&mut registry.tailers, &container.id).await;
            }
            if !registry.tailers.contains_key(&container.id) {
                let tailer = self.setup_tailer(runtime, container, source, mode).await;
                registry.tailers.insert(container.id.clone(), tailer);
            }
        }

        let stale: Vec<ContainerID> = registry
            .tailers
            .keys()
            .filter(|id| !monitored.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            log::info!("Stopped tailing container {}", id.short());
            stop_tailer(&mut registry.tailers, &id).await;
        }
        log::trace!(
            "Scanned {} containers, tailing {}",
            containers.len(),
            registry.tailers.len()
        );
    }

    // A failed listing is handled as if no container was running.
    async fn list_containers(&self, runtime: &R) -> Vec<Container> {
        match runtime.list_containers().await {
            Ok(containers) => containers,
            Err(err) => {
                log::error!("Can't list containers: {}", err);
                log::error!("Is the agent part of the docker group?");
                for source in &self.sources {
                    source.status().error(&err);
                }
                Vec::new()
            }
        }
    }

    async fn setup_tailer(
        &self,
        runtime: &R,
        container: &Container,
        source: &Arc<LogSource>,
        mode: TailMode,
    ) -> R::Tailer {
        log::info!(
            "Detected container {} - {}",
            container.image,
            container.id.short()
        );
        let mut tailer = runtime.new_tailer(
            container,
            Arc::clone(source),
            self.pipeline.next_pipeline_chan(),
        );
        let res = match mode {
            TailMode::FromBeginning => tailer.tail_from_beginning().await,
            TailMode::Resume => tailer.recover_tailing(self.auditor.as_ref()).await,
        };
        match res {
            Ok(()) => source.status().success(),
            Err(err) => {
                log::warn!(
                    "failed to start tailing container {}: {}",
                    container.id.short(),
                    err
                );
                source.status().error(&err);
            }
        }

        tailer
    }
}

async fn stop_tailer<T: Tailer>(tailers: &mut HashMap<ContainerID, T>, id: &ContainerID) {
    if let Some(tailer) = tailers.get_mut(id) {
        tailer.stop().await;
    }
    tailers.remove(id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auditor::MemoryAuditor;
    use crate::pipeline::{Message, Provider};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    #[derive(Debug, thiserror::Error)]
    #[error("runtime unavailable")]
    struct Unavailable;

    /// Shared view on everything the fake runtime and its tailers did.
    #[derive(Debug, Default)]
    struct Probe {
        // `None` makes the listing fail.
        containers: StdMutex<Option<Vec<Container>>>,
        exited: StdMutex<HashSet<String>>,
        started: StdMutex<Vec<(String, TailMode)>>,
        stopped: StdMutex<Vec<String>>,
    }

    impl Probe {
        fn set_containers(&self, containers: Option<Vec<Container>>) {
            *self.containers.lock().unwrap() = containers;
        }

        fn started(&self) -> Vec<(String, TailMode)> {
            self.started.lock().unwrap().clone()
        }

        fn stopped(&self) -> Vec<String> {
            let mut stopped = self.stopped.lock().unwrap().clone();
            stopped.sort();
            stopped
        }
    }

    struct FakeRuntime {
        probe: Arc<Probe>,
        stop_delay: Duration,
    }

    struct FakeTailer {
        id: String,
        probe: Arc<Probe>,
        stop_delay: Duration,
    }

    impl Tailer for FakeTailer {
        type Error = Unavailable;

        async fn tail_from_beginning(&mut self) -> std::result::Result<(), Unavailable> {
            self.probe
                .started
                .lock()
                .unwrap()
                .push((self.id.clone(), TailMode::FromBeginning));
            Ok(())
        }

        async fn recover_tailing<A: Auditor>(
            &mut self,
            _auditor: &A,
        ) -> std::result::Result<(), Unavailable> {
            self.probe
                .started
                .lock()
                .unwrap()
                .push((self.id.clone(), TailMode::Resume));
            Ok(())
        }

        fn should_stop(&self) -> bool {
            self.probe.exited.lock().unwrap().contains(&self.id)
        }

        async fn stop(&mut self) {
            tokio::time::sleep(self.stop_delay).await;
            self.probe.stopped.lock().unwrap().push(self.id.clone());
        }
    }

    impl ContainerRuntime for FakeRuntime {
        type Error = Unavailable;
        type Tailer = FakeTailer;

        async fn list_containers(&self) -> std::result::Result<Vec<Container>, Unavailable> {
            self.probe.containers.lock().unwrap().clone().ok_or(Unavailable)
        }

        fn new_tailer(
            &self,
            container: &Container,
            _source: Arc<LogSource>,
            _output: mpsc::Sender<Message>,
        ) -> FakeTailer {
            FakeTailer {
                id: container.id.to_string(),
                probe: Arc::clone(&self.probe),
                stop_delay: self.stop_delay,
            }
        }
    }

    type TestScanner = Scanner<FakeRuntime, Provider, MemoryAuditor>;

    fn container(id: &str, image: &str, labels: &[(&str, &str)]) -> Container {
        labels.iter().fold(
            Container::new(ContainerID::new(id).unwrap(), image),
            |container, (key, value)| container.with_label(*key, *value),
        )
    }

    fn scanner(sources: &[Arc<LogSource>], probe: &Arc<Probe>) -> Arc<TestScanner> {
        scanner_with_delay(sources, probe, Duration::ZERO)
    }

    fn scanner_with_delay(
        sources: &[Arc<LogSource>],
        probe: &Arc<Probe>,
        stop_delay: Duration,
    ) -> Arc<TestScanner> {
        let (provider, _inputs) = Provider::new(2, 8);
        let probe = Arc::clone(probe);
        Arc::new(Scanner::new(
            sources,
            provider,
            Arc::new(MemoryAuditor::default()),
            move || {
                Ok(FakeRuntime {
                    probe: Arc::clone(&probe),
                    stop_delay,
                })
            },
        ))
    }

    fn ids(ids: &[&str]) -> Vec<ContainerID> {
        ids.iter().map(|id| ContainerID::new(id).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_start_without_container_sources() {
        let probe = Arc::new(Probe::default());
        let sources = vec![Arc::new(LogSource::file("syslog", "/var/log/syslog"))];
        let scanner = scanner(&sources, &probe);

        scanner.start().await;
        assert!(!scanner.is_started());
        assert!(scanner.tailed_containers().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_with_failing_client() {
        let sources = vec![Arc::new(LogSource::docker("all", None, None))];
        let (provider, _inputs) = Provider::new(1, 1);
        let scanner: Arc<TestScanner> = Arc::new(Scanner::new(
            &sources,
            provider,
            Arc::new(MemoryAuditor::default()),
            || Err(Unavailable),
        ));

        scanner.start().await;
        assert!(!scanner.is_started());
    }

    #[tokio::test]
    async fn test_start_resumes_matching_containers() {
        let probe = Arc::new(Probe::default());
        probe.set_containers(Some(vec![
            container("aaaa", "nginx", &[]),
            container("bbbb", "redis", &[]),
        ]));
        let sources = vec![Arc::new(LogSource::docker("web", Some("nginx"), None))];
        let scanner = scanner(&sources, &probe);

        scanner.start().await;
        assert!(scanner.is_started());
        assert_eq!(scanner.tailed_containers().await, ids(&["aaaa"]));
        assert_eq!(probe.started(), vec![("aaaa".to_owned(), TailMode::Resume)]);
        assert!(!sources[0].status().is_error());

        scanner.start().await;
        assert_eq!(probe.started().len(), 1);
        scanner.stop().await;
    }

    #[tokio::test]
    async fn test_scan_converges_to_matching_containers() {
        let probe = Arc::new(Probe::default());
        let sources = vec![
            Arc::new(LogSource::docker("web", Some("nginx"), None)),
            Arc::new(LogSource::docker("prod", None, Some("env:prod, critical"))),
        ];
        let scanner = scanner(&sources, &probe);
        probe.set_containers(Some(Vec::new()));
        scanner.start().await;

        probe.set_containers(Some(vec![
            container("aaaa", "nginx", &[]),
            container("bbbb", "app", &[("env", "prod")]),
            container("cccc", "app", &[("env", "staging")]),
            container("dddd", "app", &[("critical", "")]),
        ]));
        scanner.scan(TailMode::FromBeginning).await;
        assert_eq!(scanner.tailed_containers().await, ids(&["aaaa", "bbbb", "dddd"]));

        // unchanged input does not create duplicates
        scanner.scan(TailMode::FromBeginning).await;
        assert_eq!(scanner.tailed_containers().await, ids(&["aaaa", "bbbb", "dddd"]));
        assert_eq!(probe.started().len(), 3);
        assert!(
            probe
                .started()
                .iter()
                .all(|(_, mode)| *mode == TailMode::FromBeginning)
        );

        probe.set_containers(Some(vec![
            container("bbbb", "app", &[("env", "prod")]),
            container("cccc", "app", &[("env", "prod")]),
        ]));
        scanner.scan(TailMode::FromBeginning).await;
        assert_eq!(scanner.tailed_containers().await, ids(&["bbbb", "cccc"]));
        assert_eq!(probe.stopped(), vec!["aaaa".to_owned(), "dddd".to_owned()]);

        scanner.stop().await;
    }

    #[tokio::test]
    async fn test_scan_restarts_tailers_that_should_stop() {
        let probe = Arc::new(Probe::default());
        probe.set_containers(Some(vec![container("aaaa", "nginx", &[])]));
        let sources = vec![Arc::new(LogSource::docker("all", None, None))];
        let scanner = scanner(&sources, &probe);
        scanner.start().await;

        probe.exited.lock().unwrap().insert("aaaa".to_owned());
        scanner.scan(TailMode::FromBeginning).await;
        probe.exited.lock().unwrap().clear();

        assert_eq!(probe.stopped(), vec!["aaaa".to_owned()]);
        assert_eq!(
            probe.started(),
            vec![
                ("aaaa".to_owned(), TailMode::Resume),
                ("aaaa".to_owned(), TailMode::FromBeginning)
            ]
        );
        assert_eq!(scanner.tailed_containers().await, ids(&["aaaa"]));
        scanner.stop().await;
    }

    #[tokio::test]
    async fn test_failed_listing_is_an_empty_snapshot() {
        let probe = Arc::new(Probe::default());
        probe.set_containers(Some(vec![container("aaaa", "nginx", &[])]));
        let sources = vec![Arc::new(LogSource::docker("all", None, None))];
        let scanner = scanner(&sources, &probe);
        scanner.start().await;
        assert_eq!(scanner.tailed_containers().await.len(), 1);

        probe.set_containers(None);
        scanner.scan(TailMode::FromBeginning).await;
        assert!(scanner.tailed_containers().await.is_empty());
        assert_eq!(probe.stopped(), vec!["aaaa".to_owned()]);
        assert_eq!(sources[0].status().error_count(), 1);
        assert_eq!(
            sources[0].status().last_error().as_deref(),
            Some("runtime unavailable")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_scan_tails_new_containers_from_beginning() {
        let probe = Arc::new(Probe::default());
        probe.set_containers(Some(Vec::new()));
        let sources = vec![Arc::new(LogSource::docker("all", None, None))];
        let scanner = scanner(&sources, &probe);
        scanner.start().await;

        probe.set_containers(Some(vec![container("aaaa", "nginx", &[])]));
        tokio::time::sleep(DEFAULT_SCAN_PERIOD + Duration::from_secs(1)).await;

        assert_eq!(
            probe.started(),
            vec![("aaaa".to_owned(), TailMode::FromBeginning)]
        );
        scanner.stop().await;

        probe.set_containers(Some(vec![container("bbbb", "nginx", &[])]));
        tokio::time::sleep(DEFAULT_SCAN_PERIOD * 2).await;
        assert_eq!(probe.started().len(), 1);
        assert!(scanner.tailed_containers().await.is_empty());
    }

    #[test]
    fn test_zero_scan_period_falls_back_to_default() {
        let sources = vec![Arc::new(LogSource::docker("all", None, None))];
        let (provider, _inputs) = Provider::new(1, 1);
        let scanner: TestScanner = Scanner::new(
            &sources,
            provider,
            Arc::new(MemoryAuditor::default()),
            || Err(Unavailable),
        );

        let scanner = scanner.with_scan_period(Duration::ZERO);
        assert_eq!(scanner.scan_period, DEFAULT_SCAN_PERIOD);

        let scanner = scanner.with_scan_period(Duration::from_secs(3));
        assert_eq!(scanner.scan_period, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_every_tailer() {
        let probe = Arc::new(Probe::default());
        probe.set_containers(Some(vec![
            container("aaaa", "nginx", &[]),
            container("bbbb", "nginx", &[]),
            container("cccc", "nginx", &[]),
        ]));
        let sources = vec![Arc::new(LogSource::docker("all", None, None))];
        let scanner = scanner_with_delay(&sources, &probe, Duration::from_secs(1));
        scanner.start().await;

        let before = Instant::now();
        scanner.stop().await;

        // tailers are stopped concurrently
        assert!(before.elapsed() < Duration::from_secs(2));
        assert_eq!(
            probe.stopped(),
            vec!["aaaa".to_owned(), "bbbb".to_owned(), "cccc".to_owned()]
        );
        assert!(scanner.tailed_containers().await.is_empty());

        scanner.scan(TailMode::FromBeginning).await;
        assert!(scanner.tailed_containers().await.is_empty());
    }
}
