use ciwatch_core::{
    parse_description, BuildSource, MatchOutcome, ParsedDescription, ResultTable, RunStatus,
    SourceError,
};
use ciwatch_storage::{BuildCacheStore, StorageError};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("build source error: {0}")]
    Source(#[from] SourceError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Executor job whose build history is scanned.
    pub job: String,
    /// Executor run whose subcomponent results are reported.
    pub target_build: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub builds_seen: usize,
    pub served_from_cache: usize,
    pub fetched_live: usize,
    pub newly_cached: usize,
    pub running: usize,
    pub parse_failures: usize,
    pub other_target: usize,
    pub taxonomy_misses: usize,
    pub duplicate_matches: usize,
    pub running_matches: usize,
    pub applied: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Cached,
    Live,
}

#[derive(Debug, Clone)]
struct AcquiredBuild {
    number: u64,
    origin: Origin,
    run_status: RunStatus,
    description: String,
}

pub struct ReconcileEngine<S> {
    source: S,
    config: ReconcileConfig,
}

impl<S: BuildSource> ReconcileEngine<S> {
    pub fn new(source: S, config: ReconcileConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Walks the executor's build history once, in source order.
    ///
    /// Finished builds fetched live are appended to `cache`; `results` is updated for builds
    /// tagged with the target run. The first failing live fetch aborts the walk.
    pub fn reconcile(
        &self,
        cache: &mut BuildCacheStore,
        results: &mut ResultTable,
    ) -> Result<ReconcileSummary, ReconcileError> {
        let job_status = self.source.fetch_job_status(&self.config.job)?;
        info!(
            job = %self.config.job,
            builds = job_status.builds.len(),
            target = %self.config.target_build,
            "reconciling executor builds"
        );

        let mut summary = ReconcileSummary::default();
        for build in job_status.builds {
            summary.builds_seen += 1;
            let acquired = self.acquire(cache, build.number)?;
            match acquired.origin {
                Origin::Cached => summary.served_from_cache += 1,
                Origin::Live => summary.fetched_live += 1,
            }
            if acquired.run_status.is_running() {
                summary.running += 1;
            }

            if acquired.origin == Origin::Live && !acquired.run_status.is_running() {
                cache.append(
                    acquired.number,
                    acquired.run_status.clone(),
                    acquired.description.clone(),
                )?;
                summary.newly_cached += 1;
            }

            self.apply(&acquired, results, &mut summary);
        }

        Ok(summary)
    }

    fn acquire(
        &self,
        cache: &BuildCacheStore,
        number: u64,
    ) -> Result<AcquiredBuild, ReconcileError> {
        if cache.has(number) {
            let entry = cache.get(number)?;
            debug!(build = number, "build found in cache");
            return Ok(AcquiredBuild {
                number,
                origin: Origin::Cached,
                run_status: entry.run_status.clone(),
                description: entry.description.clone(),
            });
        }

        debug!(build = number, "fetching build");
        let status = self.source.fetch_build_status(&self.config.job, number)?;
        Ok(AcquiredBuild {
            number,
            origin: Origin::Live,
            run_status: RunStatus::classify(status.building, status.result.as_deref()),
            description: status.description().to_string(),
        })
    }

    fn apply(
        &self,
        build: &AcquiredBuild,
        results: &mut ResultTable,
        summary: &mut ReconcileSummary,
    ) {
        let parsed = match parse_description(&build.description) {
            Ok(parsed) => parsed,
            Err(err) => {
                summary.parse_failures += 1;
                warn!(
                    build = build.number,
                    error = %err,
                    "skipping build with unreadable description"
                );
                return;
            }
        };
        log_parsed(build, &parsed);

        if parsed.origin_build != self.config.target_build {
            summary.other_target += 1;
            return;
        }
        if build.run_status.is_running() {
            summary.running_matches += 1;
            debug!(
                build = build.number,
                component = %parsed.component,
                subcomponent = %parsed.subcomponent,
                "build for target run is still running"
            );
            return;
        }

        if let Some(token) = &parsed.unreadable_counts {
            warn!(
                build = build.number,
                token = %token,
                "counts token unreadable, recording zero passed"
            );
        }

        match results.resolve(
            &parsed.component,
            &parsed.subcomponent,
            build.run_status.clone(),
            parsed.counts.passed,
        ) {
            MatchOutcome::Applied => {
                summary.applied += 1;
                debug!(
                    build = build.number,
                    passed = parsed.counts.passed,
                    total = parsed.counts.total,
                    "updated subcomponent result"
                );
            }
            MatchOutcome::UnknownComponent | MatchOutcome::UnknownSubcomponent => {
                summary.taxonomy_misses += 1;
                warn!(
                    build = build.number,
                    component = %parsed.component,
                    subcomponent = %parsed.subcomponent,
                    "build does not match any configured subcomponent"
                );
            }
            MatchOutcome::AlreadyResolved => {
                summary.duplicate_matches += 1;
                debug!(
                    build = build.number,
                    component = %parsed.component,
                    subcomponent = %parsed.subcomponent,
                    "subcomponent already resolved by an earlier build"
                );
            }
        }
    }
}

fn log_parsed(build: &AcquiredBuild, parsed: &ParsedDescription) {
    debug!(
        build = build.number,
        origin = %parsed.origin_build,
        component = %parsed.component,
        subcomponent = %parsed.subcomponent,
        status = %build.run_status,
        passed = parsed.counts.passed,
        total = parsed.counts.total,
        "decoded build description"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciwatch_core::{BuildRef, BuildStatus, JobStatus, Taxonomy};
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct FakeSource {
        builds: BTreeMap<u64, BuildStatus>,
        order: Vec<u64>,
        fetched: RefCell<Vec<u64>>,
    }

    impl FakeSource {
        fn with(mut self, number: u64, building: bool, result: &str, description: &str) -> Self {
            self.order.push(number);
            self.builds.insert(
                number,
                BuildStatus {
                    building,
                    result: (!building).then(|| result.to_string()),
                    description: Some(description.to_string()),
                },
            );
            self
        }
    }

    impl BuildSource for FakeSource {
        fn fetch_job_status(&self, _job: &str) -> Result<JobStatus, SourceError> {
            Ok(JobStatus {
                builds: self
                    .order
                    .iter()
                    .map(|number| BuildRef { number: *number })
                    .collect(),
            })
        }

        fn fetch_build_status(
            &self,
            job: &str,
            build_number: u64,
        ) -> Result<BuildStatus, SourceError> {
            self.fetched.borrow_mut().push(build_number);
            self.builds
                .get(&build_number)
                .cloned()
                .ok_or_else(|| SourceError::Status {
                    url: format!("{job}/{build_number}"),
                    status: 404,
                })
        }
    }

    fn table() -> ResultTable {
        let mut taxonomy = Taxonomy::default();
        taxonomy
            .push_component(
                "core",
                vec![("unit".to_string(), 20), ("lint".to_string(), 4)],
            )
            .expect("push");
        ResultTable::seed(&taxonomy)
    }

    fn engine(source: FakeSource) -> ReconcileEngine<FakeSource> {
        ReconcileEngine::new(
            source,
            ReconcileConfig {
                job: "executor".to_string(),
                target_build: "42".to_string(),
            },
        )
    }

    #[test]
    fn first_matching_build_wins() {
        let engine = engine(
            FakeSource::default()
                .with(9, false, "FAILURE", "42 x core unit y z [2/20]")
                .with(8, false, "SUCCESS", "42 x core unit y z [20/20]"),
        );
        let mut cache = BuildCacheStore::open_in_memory();
        let mut results = table();

        let summary = engine.reconcile(&mut cache, &mut results).expect("reconcile");
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.duplicate_matches, 1);
        let unit = results.get("core", "unit").expect("unit");
        assert_eq!(unit.run_status.as_str(), "FAILURE");
        assert_eq!(unit.passed, 2);
    }

    #[test]
    fn unreadable_counts_still_resolve_the_status() {
        let engine = engine(
            FakeSource::default()
                .with(4, false, "FAILURE", "42 x core unit y z [crashed]")
                .with(3, false, "UNSTABLE", "42 x core lint y z [3/?]"),
        );
        let mut cache = BuildCacheStore::open_in_memory();
        let mut results = table();

        let summary = engine.reconcile(&mut cache, &mut results).expect("reconcile");
        assert_eq!(summary.applied, 2);
        assert_eq!(summary.parse_failures, 0);
        let unit = results.get("core", "unit").expect("unit");
        assert_eq!(unit.run_status.as_str(), "FAILURE");
        assert_eq!(unit.passed, 0);
        let lint = results.get("core", "lint").expect("lint");
        assert_eq!(lint.run_status.as_str(), "UNSTABLE");
        assert_eq!(lint.passed, 3);
    }

    #[test]
    fn cached_result_named_like_a_reserved_status_counts_as_finished() {
        let source = FakeSource::default().with(6, false, "SUCCESS", "42 x core unit a b [20/20]");
        let mut cache = BuildCacheStore::open_in_memory();
        cache
            .append(6, RunStatus::terminal("RUNNING"), "42 x core unit a b [7/20]")
            .expect("seed cache");
        let engine = engine(source);
        let mut results = table();

        let summary = engine.reconcile(&mut cache, &mut results).expect("reconcile");
        assert_eq!(summary.running, 0);
        assert_eq!(summary.applied, 1);
        assert!(engine.source.fetched.borrow().is_empty());
        let unit = results.get("core", "unit").expect("unit");
        assert_eq!(unit.run_status, RunStatus::Terminal("RUNNING".to_string()));
        assert_eq!(unit.passed, 7);
    }

    #[test]
    fn running_build_is_neither_cached_nor_applied() {
        let engine = engine(FakeSource::default().with(5, true, "", "42 x core unit y z [1/20]"));
        let mut cache = BuildCacheStore::open_in_memory();
        let mut results = table();

        let summary = engine.reconcile(&mut cache, &mut results).expect("reconcile");
        assert_eq!(summary.running, 1);
        assert_eq!(summary.running_matches, 1);
        assert!(!cache.has(5));
        assert_eq!(
            results.get("core", "unit").expect("unit").run_status,
            RunStatus::NotAvailable
        );
    }

    #[test]
    fn cached_builds_are_not_fetched_again() {
        let source = FakeSource::default().with(3, false, "SUCCESS", "42 x core lint a b [4/4]");
        let mut cache = BuildCacheStore::open_in_memory();
        cache
            .append(3, RunStatus::terminal("UNSTABLE"), "42 x core lint a b [3/4]")
            .expect("seed cache");
        let engine = engine(source);
        let mut results = table();

        let summary = engine.reconcile(&mut cache, &mut results).expect("reconcile");
        assert_eq!(summary.served_from_cache, 1);
        assert_eq!(summary.newly_cached, 0);
        assert!(engine.source.fetched.borrow().is_empty());
        let lint = results.get("core", "lint").expect("lint");
        assert_eq!(lint.run_status.as_str(), "UNSTABLE");
        assert_eq!(lint.passed, 3);
    }

    #[test]
    fn non_matching_builds_are_still_cached() {
        let engine = engine(
            FakeSource::default()
                .with(1, false, "SUCCESS", "41 x core unit y z [20/20]")
                .with(2, false, "SUCCESS", "42 x storage disk y z [1/1]")
                .with(3, false, "ABORTED", "bad"),
        );
        let mut cache = BuildCacheStore::open_in_memory();
        let mut results = table();

        let summary = engine.reconcile(&mut cache, &mut results).expect("reconcile");
        assert_eq!(summary.other_target, 1);
        assert_eq!(summary.taxonomy_misses, 1);
        assert_eq!(summary.parse_failures, 1);
        assert_eq!(summary.newly_cached, 3);
        assert_eq!(results.resolved_count(), 0);
        assert_eq!(cache.get(3).expect("entry").description, "bad");
    }

    #[test]
    fn fetch_failure_aborts_the_walk() {
        let mut source = FakeSource::default().with(1, false, "SUCCESS", "42 x core unit");
        source.order.push(99);
        let engine = engine(source);
        let mut cache = BuildCacheStore::open_in_memory();
        let mut results = table();

        let err = engine
            .reconcile(&mut cache, &mut results)
            .expect_err("missing build");
        assert!(matches!(
            err,
            ReconcileError::Source(SourceError::Status { status: 404, .. })
        ));
    }
}
