//! Pipeline DAO
//!
//! Cached pipeline reads: run histories, latest ids, build causes, the
//! runs triggered by a material revision, the active-pipeline set and pause
//! state.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use crate::cache::{KeyBuilder, KeySegment};
use crate::dao::DaoSupport;
use crate::domain::{
    ActivePipelines, BuildCause, MaterialRevision, PauseInfo, PipelineHistory, PipelineIdentifier, StageIdentifier,
};
use crate::error::{CoreError, QueryFailure, Result};
use crate::history::HistoryCursor;
use crate::persistence::rows_affected;

const KEYS: KeyBuilder = KeyBuilder::new("PipelineDao");

#[derive(Debug, Clone)]
pub struct PipelineDao {
    support: DaoSupport,
}

impl PipelineDao {
    pub fn new(support: DaoSupport) -> Self {
        Self { support }
    }

    // == Keys ==

    pub fn key_for_latest_pipeline_id(pipeline_name: &str) -> String {
        KEYS.build("latestPipelineIdByPipelineName", &[KeySegment::name(pipeline_name)])
    }

    pub fn key_for_pipeline_history(pipeline_id: i64) -> String {
        KEYS.build("pipelineHistory", &[KeySegment::Number(pipeline_id)])
    }

    pub fn key_for_pipeline_history_by_counter(pipeline_name: &str, counter: i32) -> String {
        KEYS.build(
            "pipelineHistoryByNameAndCounter",
            &[KeySegment::name(pipeline_name), counter.into()],
        )
    }

    pub fn key_for_pipeline_id(pipeline_name: &str, counter: i32) -> String {
        KEYS.build("pipelineIdByNameAndCounter", &[KeySegment::name(pipeline_name), counter.into()])
    }

    /// Parent key of the Latest history pages of a pipeline, one sub-key per
    /// page size.
    pub fn key_for_history_pages(pipeline_name: &str) -> String {
        KEYS.build("pipelineHistoryPages", &[KeySegment::name(pipeline_name)])
    }

    /// Key of one settled Before/After page. Holds the ids of its runs and
    /// is never invalidated.
    pub fn key_for_history_page(pipeline_name: &str, cursor: &HistoryCursor) -> String {
        let mut segments = vec![KeySegment::name(pipeline_name)];
        segments.extend(cursor.key_segments());
        KEYS.build("pipelineHistoryPage", &segments)
    }

    pub fn key_for_build_cause(pipeline_name: &str, counter: i32) -> String {
        KEYS.build("buildCauseByNameAndCounter", &[KeySegment::name(pipeline_name), counter.into()])
    }

    pub fn key_for_runs_triggered_by_upstream(pipeline_name: &str, upstream_name: &str, upstream_counter: i32) -> String {
        KEYS.build(
            "runsTriggeredByUpstream",
            &[
                KeySegment::name(pipeline_name),
                KeySegment::name(upstream_name),
                upstream_counter.into(),
            ],
        )
    }

    /// Fingerprints and revisions are compared exactly.
    pub fn key_for_runs_triggered_by_revision(pipeline_name: &str, fingerprint: &str, revision: &str) -> String {
        KEYS.build(
            "runsTriggeredByRevision",
            &[
                KeySegment::name(pipeline_name),
                KeySegment::text(fingerprint),
                KeySegment::text(revision),
            ],
        )
    }

    pub fn key_for_active_pipelines() -> String {
        KEYS.build("activePipelines", &[])
    }

    pub fn key_for_pause_state(pipeline_name: &str) -> String {
        KEYS.build("pauseState", &[KeySegment::name(pipeline_name)])
    }

    pub fn key_for_latest_passed_stage(pipeline_id: i64, stage_name: &str) -> String {
        KEYS.build(
            "latestPassedStage",
            &[KeySegment::Number(pipeline_id), KeySegment::name(stage_name)],
        )
    }

    // == Writes ==

    /// Records a new forced run of a pipeline and returns its id.
    pub fn save(&self, identifier: &PipelineIdentifier) -> Result<i64> {
        self.save_with_build_cause(identifier, &BuildCause::default())
    }

    /// Records a new run built from `cause` and returns its id. The trigger
    /// lists of each revision in `cause` are evicted after commit.
    pub fn save_with_build_cause(&self, identifier: &PipelineIdentifier, cause: &BuildCause) -> Result<i64> {
        let cache = Arc::clone(self.support.cache());
        self.support.transactions().execute(|scope| -> Result<i64> {
            let created: serde_json::Value = self.support.query_in(
                scope,
                "insertPipeline",
                json!({
                    "pipelineName": identifier.name,
                    "counter": identifier.counter,
                    "label": identifier.label,
                    "buildCause": cause,
                }),
            )?;
            let id = created
                .get("id")
                .and_then(serde_json::Value::as_i64)
                .ok_or_else(|| QueryFailure::failed("insertPipeline", "no id returned"))?;

            let mut keys = vec![
                Self::key_for_latest_pipeline_id(&identifier.name),
                Self::key_for_history_pages(&identifier.name),
                Self::key_for_pipeline_id(&identifier.name, identifier.counter),
                Self::key_for_pipeline_history_by_counter(&identifier.name, identifier.counter),
            ];
            keys.extend(Self::keys_for_triggers(&identifier.name, cause));
            scope.remove_after_commit(&cache, keys);
            Ok(id)
        })
    }

    fn keys_for_triggers(pipeline_name: &str, cause: &BuildCause) -> Vec<String> {
        cause
            .revisions
            .iter()
            .map(|revision| match revision {
                MaterialRevision::Dependency {
                    pipeline_name: upstream,
                    pipeline_counter,
                } => Self::key_for_runs_triggered_by_upstream(pipeline_name, upstream, *pipeline_counter),
                MaterialRevision::Scm { fingerprint, revision } => {
                    Self::key_for_runs_triggered_by_revision(pipeline_name, fingerprint, revision)
                }
            })
            .collect()
    }

    pub fn update_comment(&self, pipeline_name: &str, counter: i32, comment: &str) -> Result<()> {
        let cache = Arc::clone(self.support.cache());
        let reads = self.support.reads().clone();
        self.support.transactions().execute(|scope| -> Result<()> {
            let key = Self::key_for_pipeline_id(pipeline_name, counter);
            let pipeline_id = reads.fetch_in(scope, &key, |scope| {
                self.support.query_in::<Option<i64>>(
                    scope,
                    "findPipelineByNameAndCounter",
                    json!({ "pipelineName": pipeline_name, "counter": counter }),
                )
            })?;

            let result = self.support.update_in(
                scope,
                "updatePipelineComment",
                json!({ "pipelineName": pipeline_name, "counter": counter, "comment": comment }),
            )?;
            if rows_affected("updatePipelineComment", &result)? == 0 {
                debug!("No run {}/{} to comment on", pipeline_name, counter);
                return Ok(());
            }

            let mut keys = vec![
                Self::key_for_pipeline_history_by_counter(pipeline_name, counter),
                Self::key_for_history_pages(pipeline_name),
            ];
            if let Some(id) = *pipeline_id {
                keys.push(Self::key_for_pipeline_history(id));
            }
            scope.remove_after_commit(&cache, keys);
            Ok(())
        })
    }

    pub fn pause(&self, pipeline_name: &str, cause: &str, paused_by: &str) -> Result<()> {
        let info = PauseInfo {
            paused: true,
            pause_cause: Some(cause.to_string()),
            paused_by: Some(paused_by.to_string()),
            paused_at: Some(Utc::now()),
        };
        self.save_pause_state(pipeline_name, info)
    }

    pub fn unpause(&self, pipeline_name: &str) -> Result<()> {
        self.save_pause_state(pipeline_name, PauseInfo::not_paused())
    }

    fn save_pause_state(&self, pipeline_name: &str, info: PauseInfo) -> Result<()> {
        let cache = Arc::clone(self.support.cache());
        self.support.transactions().execute(|scope| -> Result<()> {
            self.support.update_in(
                scope,
                "upsertPipelinePauseState",
                json!({
                    "pipelineName": pipeline_name,
                    "paused": info.paused,
                    "pauseCause": info.pause_cause,
                    "pausedBy": info.paused_by,
                    "pausedAt": info.paused_at,
                }),
            )?;
            scope.remove_after_commit(&cache, vec![Self::key_for_pause_state(pipeline_name)]);
            Ok(())
        })
    }

    // == Reads ==

    pub fn latest_pipeline_id(&self, pipeline_name: &str) -> Result<Option<i64>> {
        let key = Self::key_for_latest_pipeline_id(pipeline_name);
        let id = self.support.reads().fetch_exclusive(&key, || {
            self.support
                .query::<Option<i64>>("getLatestPipelineId", json!({ "pipelineName": pipeline_name }))
        })?;
        Ok(*id)
    }

    pub fn history_by_id(&self, pipeline_id: i64) -> Result<Arc<Option<PipelineHistory>>> {
        let key = Self::key_for_pipeline_history(pipeline_id);
        let history = self.support.reads().fetch_exclusive(&key, || {
            self.support.query("getPipelineHistoryById", json!({ "id": pipeline_id }))
        })?;
        Ok(history)
    }

    pub fn history_by_counter(&self, pipeline_name: &str, counter: i32) -> Result<Arc<Option<PipelineHistory>>> {
        let key = Self::key_for_pipeline_history_by_counter(pipeline_name, counter);
        let history = self.support.reads().fetch_exclusive(&key, || {
            self.support.query(
                "getPipelineHistoryByNameAndCounter",
                json!({ "pipelineName": pipeline_name, "counter": counter }),
            )
        })?;
        Ok(history)
    }

    pub fn pipeline_id_for(&self, pipeline_name: &str, counter: i32) -> Result<Option<i64>> {
        let key = Self::key_for_pipeline_id(pipeline_name, counter);
        let id = self.support.reads().fetch(&key, || {
            self.support.query::<Option<i64>>(
                "findPipelineByNameAndCounter",
                json!({ "pipelineName": pipeline_name, "counter": counter }),
            )
        })?;
        Ok(*id)
    }

    /// Build cause of one run. An unknown run is an error and nothing is
    /// cached for it.
    pub fn build_cause(&self, pipeline_name: &str, counter: i32) -> Result<Arc<BuildCause>> {
        let key = Self::key_for_build_cause(pipeline_name, counter);
        self.support.reads().fetch_exclusive(&key, || -> Result<BuildCause> {
            let cause: Option<BuildCause> = self.support.query(
                "findBuildCauseByNameAndCounter",
                json!({ "pipelineName": pipeline_name, "counter": counter }),
            )?;
            cause.ok_or_else(|| {
                CoreError::RecordNotFound(format!("Pipeline {} with counter {} was not found", pipeline_name, counter))
            })
        })
    }

    /// Runs of `pipeline_name` built from the upstream run `upstream`, oldest
    /// first.
    pub fn runs_triggered_by_upstream(
        &self,
        pipeline_name: &str,
        upstream: &PipelineIdentifier,
    ) -> Result<Arc<Vec<PipelineIdentifier>>> {
        let key = Self::key_for_runs_triggered_by_upstream(pipeline_name, &upstream.name, upstream.counter);
        let runs = self.support.reads().fetch_exclusive(&key, || {
            self.support.query(
                "pipelineInstancesTriggeredOutOfDependencyMaterial",
                json!({
                    "pipelineName": pipeline_name,
                    "dependencyPipelineName": upstream.name,
                    "dependencyPipelineCounter": upstream.counter,
                }),
            )
        })?;
        Ok(runs)
    }

    /// Runs of `pipeline_name` built from `revision` of the material with
    /// `fingerprint`, oldest first.
    pub fn runs_triggered_by_revision(
        &self,
        pipeline_name: &str,
        fingerprint: &str,
        revision: &str,
    ) -> Result<Arc<Vec<PipelineIdentifier>>> {
        let key = Self::key_for_runs_triggered_by_revision(pipeline_name, fingerprint, revision);
        let runs = self.support.reads().fetch_exclusive(&key, || {
            self.support.query(
                "pipelineInstancesTriggeredOffOfMaterialRevision",
                json!({ "pipelineName": pipeline_name, "fingerprint": fingerprint, "revision": revision }),
            )
        })?;
        Ok(runs)
    }

    /// One cursor page of a pipeline's runs, newest first. Before/After
    /// pages are cached as run ids once settled and read back through
    /// [`PipelineDao::history_by_id`].
    pub fn load_history(&self, pipeline_name: &str, cursor: HistoryCursor) -> Result<Arc<Vec<PipelineHistory>>> {
        let query = cursor.query_name("getPipelineHistoryPage");
        let load = || {
            self.support.query::<Vec<PipelineHistory>>(
                &query,
                json!({
                    "pipelineName": pipeline_name,
                    "anchor": cursor.anchor(),
                    "pageSize": cursor.page_size(),
                }),
            )
        };

        let reads = self.support.reads();
        if cursor.is_latest() {
            let parent = Self::key_for_history_pages(pipeline_name);
            return Ok(reads.fetch_page(&parent, &cursor.page_size().to_string(), load)?);
        }

        let newest = self.latest_pipeline_id(pipeline_name)?;
        reads.fetch_ids(
            &Self::key_for_history_page(pipeline_name, &cursor),
            |history: &PipelineHistory| history.id,
            || load().map_err(CoreError::from),
            |page| cursor.is_settled(page.len(), newest),
            |id| Ok(self.history_by_id(id)?.as_ref().clone()),
        )
    }

    /// Pipeline runs with at least one active stage.
    pub fn active_pipelines(&self) -> Result<Arc<ActivePipelines>> {
        let key = Self::key_for_active_pipelines();
        let active = self.support.reads().fetch_exclusive(&key, || {
            let rows: Vec<(String, i64)> = self.support.query("getActivePipelines", json!({}))?;
            Ok::<_, QueryFailure>(ActivePipelines::from_rows(rows))
        })?;
        Ok(active)
    }

    /// Pause state of a pipeline; never-paused pipelines report not paused.
    pub fn pause_state(&self, pipeline_name: &str) -> Result<Arc<PauseInfo>> {
        let key = Self::key_for_pause_state(pipeline_name);
        let info = self.support.reads().fetch_exclusive(&key, || {
            let stored: Option<PauseInfo> = self
                .support
                .query("getPipelinePauseState", json!({ "pipelineName": pipeline_name }))?;
            Ok::<_, QueryFailure>(stored.unwrap_or_default())
        })?;
        Ok(info)
    }

    /// Newest passed run of `stage_name` within pipeline run `pipeline_id`.
    /// "Not passed yet" is cached too.
    pub fn latest_passed_stage(&self, pipeline_id: i64, stage_name: &str) -> Result<Arc<Option<StageIdentifier>>> {
        let key = Self::key_for_latest_passed_stage(pipeline_id, stage_name);
        let identifier = self.support.reads().fetch_exclusive(&key, || {
            self.support.query(
                "latestPassedStageForPipelineId",
                json!({ "pipelineId": pipeline_id, "stageName": stage_name }),
            )
        })?;
        Ok(identifier)
    }

    // == Invalidation ==

    pub fn invalidate_pause_state(&self, pipeline_name: &str) {
        self.support.cache().remove(&Self::key_for_pause_state(pipeline_name));
    }

    pub fn invalidate_active_pipelines(&self) {
        self.support.cache().remove(&Self::key_for_active_pipelines());
    }

    // == Warm Up ==

    /// Loads the active-pipeline set and the history of each active run into
    /// the cache. Returns the number of runs primed.
    pub fn warm_up(&self) -> Result<usize> {
        let active = self.active_pipelines()?;
        let mut primed = 0;
        for name in active.pipeline_names() {
            for id in active.ids_for(name) {
                self.history_by_id(id)?;
                primed += 1;
            }
        }
        info!("Primed {} active pipeline runs across {} pipelines", primed, active.len());
        Ok(primed)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::fixtures::Fixture;
    use crate::dao::StageDao;
    use crate::domain::{StageResult, StageState};

    fn dao() -> (Fixture, PipelineDao) {
        let fixture = Fixture::new();
        let dao = PipelineDao::new(fixture.support.clone());
        (fixture, dao)
    }

    #[test]
    fn test_save_evicts_latest_id() {
        let (fixture, dao) = dao();
        assert_eq!(dao.latest_pipeline_id("up42").unwrap(), None);

        let id = dao.save(&PipelineIdentifier::new("up42", 1, "1")).unwrap();
        assert_eq!(dao.latest_pipeline_id("UP42").unwrap(), Some(id));
        assert_eq!(fixture.db.executions("getLatestPipelineId"), 2);
    }

    #[test]
    fn test_absent_pipeline_id_is_evicted_by_save() {
        let (_fixture, dao) = dao();
        assert_eq!(dao.pipeline_id_for("up42", 1).unwrap(), None);

        let id = dao.save(&PipelineIdentifier::new("up42", 1, "1")).unwrap();
        assert_eq!(dao.pipeline_id_for("up42", 1).unwrap(), Some(id));
    }

    #[test]
    fn test_pause_round_trip_through_cache() {
        let (fixture, dao) = dao();
        assert!(!dao.pause_state("up42").unwrap().paused);

        dao.pause("up42", "maintenance", "admin").unwrap();
        let paused = dao.pause_state("up42").unwrap();
        assert!(paused.paused);
        assert_eq!(paused.paused_by.as_deref(), Some("admin"));

        dao.unpause("up42").unwrap();
        assert!(!dao.pause_state("up42").unwrap().paused);
        assert_eq!(fixture.db.executions("getPipelinePauseState"), 3);
    }

    #[test]
    fn test_failed_pause_keeps_cached_state() {
        let (fixture, dao) = dao();
        assert!(!dao.pause_state("up42").unwrap().paused);

        fixture.db.fail_next("upsertPipelinePauseState");
        assert!(dao.pause("up42", "maintenance", "admin").is_err());

        assert!(!dao.pause_state("up42").unwrap().paused);
        assert_eq!(fixture.db.executions("getPipelinePauseState"), 1);
    }

    #[test]
    fn test_update_comment_evicts_history() {
        let (_fixture, dao) = dao();
        let id = dao.save(&PipelineIdentifier::new("up42", 1, "1")).unwrap();
        assert!(dao.history_by_id(id).unwrap().as_ref().as_ref().unwrap().comment.is_none());

        dao.update_comment("up42", 1, "hotfix").unwrap();

        let history = dao.history_by_id(id).unwrap();
        assert_eq!(history.as_ref().as_ref().unwrap().comment.as_deref(), Some("hotfix"));
        let by_counter = dao.history_by_counter("up42", 1).unwrap();
        assert_eq!(by_counter.as_ref().as_ref().unwrap().comment.as_deref(), Some("hotfix"));
    }

    #[test]
    fn test_update_comment_publishes_pipeline_id_after_commit() {
        let (fixture, dao) = dao();
        let id = dao.save(&PipelineIdentifier::new("up42", 1, "1")).unwrap();

        dao.update_comment("up42", 1, "hotfix").unwrap();
        assert_eq!(dao.pipeline_id_for("up42", 1).unwrap(), Some(id));
        assert_eq!(fixture.db.executions("findPipelineByNameAndCounter"), 1);
    }

    #[test]
    fn test_latest_history_pages_of_every_size_are_evicted_together() {
        let (fixture, dao) = dao();
        dao.save(&PipelineIdentifier::new("up42", 1, "1")).unwrap();
        dao.load_history("up42", HistoryCursor::latest(1)).unwrap();
        dao.load_history("up42", HistoryCursor::latest(10)).unwrap();

        dao.save(&PipelineIdentifier::new("up42", 2, "2")).unwrap();
        let small = dao.load_history("up42", HistoryCursor::latest(1)).unwrap();
        let large = dao.load_history("up42", HistoryCursor::latest(10)).unwrap();

        assert_eq!(small[0].identifier.counter, 2);
        assert_eq!(large.len(), 2);
        assert_eq!(fixture.db.executions("getPipelineHistoryPageLatest"), 4);
    }

    #[test]
    fn test_pause_state_folds_only_ascii_case() {
        let (_fixture, dao) = dao();
        dao.pause("Ébauche", "maintenance", "admin").unwrap();

        assert!(dao.pause_state("ÉBAUCHE").unwrap().paused);
        assert!(!dao.pause_state("ébauche").unwrap().paused);
    }

    #[test]
    fn test_short_after_page_picks_up_later_runs() {
        let (fixture, dao) = dao();
        let first = dao.save(&PipelineIdentifier::new("up42", 1, "1")).unwrap();
        assert!(dao.load_history("up42", HistoryCursor::after(first, 10)).unwrap().is_empty());

        let second = dao.save(&PipelineIdentifier::new("up42", 2, "2")).unwrap();

        let page = dao.load_history("up42", HistoryCursor::after(first, 10)).unwrap();
        assert_eq!(page.iter().map(|history| history.id).collect::<Vec<_>>(), vec![second]);
        assert_eq!(fixture.db.executions("getPipelineHistoryPageAfter"), 2);
    }

    #[test]
    fn test_cached_before_page_follows_comment() {
        let (fixture, dao) = dao();
        let first = dao.save(&PipelineIdentifier::new("up42", 1, "1")).unwrap();
        let second = dao.save(&PipelineIdentifier::new("up42", 2, "2")).unwrap();
        let cursor = HistoryCursor::before(second, 5);
        assert!(dao.load_history("up42", cursor).unwrap()[0].comment.is_none());

        dao.update_comment("up42", 1, "hotfix").unwrap();

        let page = dao.load_history("up42", cursor).unwrap();
        assert_eq!(page[0].id, first);
        assert_eq!(page[0].comment.as_deref(), Some("hotfix"));
        assert_eq!(fixture.db.executions("getPipelineHistoryPageBefore"), 1);
    }

    #[test]
    fn test_build_cause_is_cached() {
        let (fixture, dao) = dao();
        let cause = BuildCause::with_revisions(vec![MaterialRevision::scm("git-abc", "f00d")]);
        dao.save_with_build_cause(&PipelineIdentifier::new("up42", 1, "1"), &cause).unwrap();

        assert_eq!(*dao.build_cause("UP42", 1).unwrap(), cause);
        assert_eq!(*dao.build_cause("up42", 1).unwrap(), cause);
        assert_eq!(fixture.db.executions("findBuildCauseByNameAndCounter"), 1);
    }

    #[test]
    fn test_build_cause_of_unknown_run_is_not_cached() {
        let (fixture, dao) = dao();
        assert!(matches!(dao.build_cause("up42", 1), Err(CoreError::RecordNotFound(_))));

        dao.save_with_build_cause(&PipelineIdentifier::new("up42", 1, "1"), &BuildCause::manual("admin"))
            .unwrap();

        assert_eq!(dao.build_cause("up42", 1).unwrap().approved_by.as_deref(), Some("admin"));
        assert_eq!(fixture.db.executions("findBuildCauseByNameAndCounter"), 2);
    }

    #[test]
    fn test_save_evicts_only_matching_upstream_list() {
        let (fixture, dao) = dao();
        let upstream_one = PipelineIdentifier::new("upstream", 1, "1");
        let upstream_two = PipelineIdentifier::new("upstream", 2, "2");
        assert!(dao.runs_triggered_by_upstream("down", &upstream_one).unwrap().is_empty());
        assert!(dao.runs_triggered_by_upstream("down", &upstream_two).unwrap().is_empty());

        let cause = BuildCause::with_revisions(vec![MaterialRevision::dependency("UPSTREAM", 1)]);
        dao.save_with_build_cause(&PipelineIdentifier::new("down", 1, "1"), &cause).unwrap();

        let triggered = dao.runs_triggered_by_upstream("down", &upstream_one).unwrap();
        assert_eq!(*triggered, vec![PipelineIdentifier::new("down", 1, "1")]);
        assert!(dao.runs_triggered_by_upstream("down", &upstream_two).unwrap().is_empty());
        assert_eq!(fixture.db.executions("pipelineInstancesTriggeredOutOfDependencyMaterial"), 3);
    }

    #[test]
    fn test_save_evicts_matching_revision_list() {
        let (fixture, dao) = dao();
        assert!(dao.runs_triggered_by_revision("down", "git-abc", "f00d").unwrap().is_empty());
        assert!(dao.runs_triggered_by_revision("down", "git-abc", "beef").unwrap().is_empty());

        let cause = BuildCause::with_revisions(vec![MaterialRevision::scm("git-abc", "f00d")]);
        dao.save_with_build_cause(&PipelineIdentifier::new("down", 1, "1"), &cause).unwrap();

        assert_eq!(dao.runs_triggered_by_revision("down", "git-abc", "f00d").unwrap().len(), 1);
        assert!(dao.runs_triggered_by_revision("down", "git-abc", "beef").unwrap().is_empty());
        assert_eq!(fixture.db.executions("pipelineInstancesTriggeredOffOfMaterialRevision"), 3);
    }

    #[test]
    fn test_failed_save_keeps_trigger_list() {
        let (fixture, dao) = dao();
        let upstream = PipelineIdentifier::new("upstream", 1, "1");
        dao.runs_triggered_by_upstream("down", &upstream).unwrap();

        fixture.db.fail_next("insertPipeline");
        let cause = BuildCause::with_revisions(vec![MaterialRevision::dependency("upstream", 1)]);
        assert!(dao.save_with_build_cause(&PipelineIdentifier::new("down", 1, "1"), &cause).is_err());

        assert!(dao.runs_triggered_by_upstream("down", &upstream).unwrap().is_empty());
        assert_eq!(fixture.db.executions("pipelineInstancesTriggeredOutOfDependencyMaterial"), 1);
    }

    #[test]
    fn test_warm_up_primes_active_runs() {
        let (fixture, dao) = dao();
        let stages = StageDao::new(fixture.support.clone());
        let id = dao.save(&PipelineIdentifier::new("up42", 1, "1")).unwrap();
        stages.save(id, "dev", StageState::Building, StageResult::Unknown).unwrap();

        assert_eq!(dao.warm_up().unwrap(), 1);
        dao.history_by_id(id).unwrap();
        assert_eq!(fixture.db.executions("getPipelineHistoryById"), 1);
        assert_eq!(dao.active_pipelines().unwrap().ids_for("up42"), vec![id]);
        assert_eq!(fixture.db.executions("getActivePipelines"), 1);
    }
}
