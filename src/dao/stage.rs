//! Stage DAO
//!
//! Cached stage reads: single runs, most-recent ids, activity flags and the
//! paged stage history.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::cache::{KeyBuilder, KeySegment};
use crate::dao::DaoSupport;
use crate::domain::{Stage, StageHistoryPage, StageIdentifier, StageIdentity, StageResult, StageState};
use crate::error::{CoreError, QueryFailure, Result};
use crate::history::{HistoryCursor, Pagination};

const KEYS: KeyBuilder = KeyBuilder::new("StageDao");

#[derive(Debug, Clone)]
pub struct StageDao {
    support: DaoSupport,
}

impl StageDao {
    pub fn new(support: DaoSupport) -> Self {
        Self { support }
    }

    // == Keys ==

    pub fn key_for_stage_by_id(stage_id: i64) -> String {
        KEYS.build("stageById", &[KeySegment::Number(stage_id)])
    }

    pub fn key_for_most_recent_id(pipeline_name: &str, stage_name: &str) -> String {
        KEYS.build("mostRecentId", &names(pipeline_name, stage_name))
    }

    pub fn key_for_is_stage_active(pipeline_name: &str, stage_name: &str) -> String {
        KEYS.build("isStageActive", &names(pipeline_name, stage_name))
    }

    pub fn key_for_all_stages(pipeline_name: &str, pipeline_counter: i32, stage_name: &str) -> String {
        KEYS.build(
            "allStageOfPipeline",
            &[
                KeySegment::name(pipeline_name),
                pipeline_counter.into(),
                KeySegment::name(stage_name),
            ],
        )
    }

    /// Parent key of the runs of one stage within one pipeline run, one
    /// sub-key per stage counter.
    pub fn key_for_stage_runs(pipeline_name: &str, pipeline_counter: i32, stage_name: &str) -> String {
        KEYS.build(
            "stageRunIdentifier",
            &[
                KeySegment::name(pipeline_name),
                pipeline_counter.into(),
                KeySegment::name(stage_name),
            ],
        )
    }

    pub fn key_for_latest_stage_instances() -> String {
        KEYS.build("latestStageInstances", &[])
    }

    pub fn key_for_stage_count(pipeline_name: &str, stage_name: &str) -> String {
        KEYS.build("numberOfStages", &names(pipeline_name, stage_name))
    }

    pub fn key_for_stage_count_for_chart(pipeline_name: &str, stage_name: &str) -> String {
        KEYS.build("totalStageCountForChart", &names(pipeline_name, stage_name))
    }

    /// Parent key of every Latest and offset history page of a stage.
    pub fn key_for_stage_histories(pipeline_name: &str, stage_name: &str) -> String {
        KEYS.build("stageHistories", &names(pipeline_name, stage_name))
    }

    /// Key of one settled Before/After page. Holds the ids of its runs and is
    /// never invalidated.
    pub fn key_for_stage_history_page(pipeline_name: &str, stage_name: &str, cursor: &HistoryCursor) -> String {
        let mut segments = names(pipeline_name, stage_name).to_vec();
        segments.extend(cursor.key_segments());
        KEYS.build("stageHistoryPage", &segments)
    }

    /// Parent key of the cached offsets of each run within its history.
    pub fn key_for_stage_offsets(pipeline_name: &str, stage_name: &str) -> String {
        KEYS.build("stageOffsetMap", &names(pipeline_name, stage_name))
    }

    // == Writes ==

    /// Appends a new run of `stage_name` to pipeline run `pipeline_id`.
    pub fn save(&self, pipeline_id: i64, stage_name: &str, state: StageState, result: StageResult) -> Result<Stage> {
        let cache = Arc::clone(self.support.cache());
        self.support.transactions().execute(|scope| -> Result<Stage> {
            let stage: Stage = self.support.query_in(
                scope,
                "insertStage",
                json!({
                    "pipelineId": pipeline_id,
                    "stageName": stage_name,
                    "state": state,
                    "result": result,
                }),
            )?;
            let id = &stage.identifier;
            let runs: Vec<Stage> = self.support.query_in(
                scope,
                "getAllRunsOfStageForPipelineInstance",
                json!({
                    "pipelineName": id.pipeline_name,
                    "counter": id.pipeline_counter,
                    "stageName": id.stage_name,
                }),
            )?;

            let mut keys = Self::keys_for_new_run(&stage);
            // Earlier runs are no longer the latest run
            keys.extend(
                runs.iter()
                    .filter(|run| run.id != stage.id)
                    .map(|run| Self::key_for_stage_by_id(run.id)),
            );
            scope.remove_after_commit(&cache, keys);
            Ok(stage)
        })
    }

    /// Moves a stage run to `state`. Returns `None` for an unknown id.
    pub fn update_status(&self, stage_id: i64, state: StageState, result: StageResult) -> Result<Option<Stage>> {
        let cache = Arc::clone(self.support.cache());
        self.support.transactions().execute(|scope| -> Result<Option<Stage>> {
            let updated: Option<Stage> = self.support.query_in(
                scope,
                "updateStageStatus",
                json!({ "stageId": stage_id, "state": state, "result": result }),
            )?;
            if let Some(stage) = &updated {
                scope.remove_after_commit(&cache, Self::keys_for_status_change(stage));
            }
            Ok(updated)
        })
    }

    fn keys_for_new_run(stage: &Stage) -> Vec<String> {
        let id = &stage.identifier;
        vec![
            Self::key_for_stage_histories(&id.pipeline_name, &id.stage_name),
            Self::key_for_stage_count(&id.pipeline_name, &id.stage_name),
            Self::key_for_stage_offsets(&id.pipeline_name, &id.stage_name),
            Self::key_for_all_stages(&id.pipeline_name, id.pipeline_counter, &id.stage_name),
            Self::key_for_stage_runs(&id.pipeline_name, id.pipeline_counter, &id.stage_name),
            Self::key_for_stage_count_for_chart(&id.pipeline_name, &id.stage_name),
            Self::key_for_most_recent_id(&id.pipeline_name, &id.stage_name),
            Self::key_for_is_stage_active(&id.pipeline_name, &id.stage_name),
            Self::key_for_latest_stage_instances(),
        ]
    }

    fn keys_for_status_change(stage: &Stage) -> Vec<String> {
        let id = &stage.identifier;
        vec![
            Self::key_for_stage_by_id(stage.id),
            Self::key_for_is_stage_active(&id.pipeline_name, &id.stage_name),
            Self::key_for_all_stages(&id.pipeline_name, id.pipeline_counter, &id.stage_name),
            Self::key_for_stage_runs(&id.pipeline_name, id.pipeline_counter, &id.stage_name),
            Self::key_for_stage_histories(&id.pipeline_name, &id.stage_name),
            Self::key_for_stage_count_for_chart(&id.pipeline_name, &id.stage_name),
        ]
    }

    // == Reads ==

    pub fn stage_by_id(&self, stage_id: i64) -> Result<Arc<Option<Stage>>> {
        let key = Self::key_for_stage_by_id(stage_id);
        let stage = self
            .support
            .reads()
            .fetch_exclusive(&key, || self.support.query("getStageById", json!({ "stageId": stage_id })))?;
        Ok(stage)
    }

    /// A stage run by its identifier; the pipeline label is not compared.
    /// Runs of one stage within one pipeline run share a cache family.
    pub fn stage_with_identifier(&self, identifier: &StageIdentifier) -> Result<Arc<Option<Stage>>> {
        let parent = Self::key_for_stage_runs(
            &identifier.pipeline_name,
            identifier.pipeline_counter,
            &identifier.stage_name,
        );
        let stage = self
            .support
            .reads()
            .fetch_page(&parent, &identifier.stage_counter.to_string(), || {
                self.support.query(
                    "findStageByIdentifier",
                    json!({
                        "pipelineName": identifier.pipeline_name,
                        "pipelineCounter": identifier.pipeline_counter,
                        "stageName": identifier.stage_name,
                        "stageCounter": identifier.stage_counter,
                    }),
                )
            })?;
        Ok(stage)
    }

    /// Id of the newest run of the stage, across pipeline runs.
    pub fn most_recent_id(&self, pipeline_name: &str, stage_name: &str) -> Result<Option<i64>> {
        let key = Self::key_for_most_recent_id(pipeline_name, stage_name);
        let id = self.support.reads().fetch_exclusive(&key, || {
            self.support.query::<Option<i64>>("getMostRecentId", pipeline_and_stage(pipeline_name, stage_name))
        })?;
        Ok(*id)
    }

    pub fn is_stage_active(&self, pipeline_name: &str, stage_name: &str) -> Result<bool> {
        let key = Self::key_for_is_stage_active(pipeline_name, stage_name);
        let active = self.support.reads().fetch_exclusive(&key, || {
            self.support.query::<bool>("isStageActive", pipeline_and_stage(pipeline_name, stage_name))
        })?;
        Ok(*active)
    }

    /// Every run of `stage_name` within one pipeline run, oldest first.
    pub fn all_stages_for(&self, pipeline_name: &str, pipeline_counter: i32, stage_name: &str) -> Result<Arc<Vec<Stage>>> {
        let key = Self::key_for_all_stages(pipeline_name, pipeline_counter, stage_name);
        let stages = self.support.reads().fetch_exclusive(&key, || {
            self.support.query(
                "getAllRunsOfStageForPipelineInstance",
                json!({
                    "pipelineName": pipeline_name,
                    "counter": pipeline_counter,
                    "stageName": stage_name,
                }),
            )
        })?;
        Ok(stages)
    }

    pub fn latest_stage_instances(&self) -> Result<Arc<Vec<StageIdentity>>> {
        let key = Self::key_for_latest_stage_instances();
        let identities = self
            .support
            .reads()
            .fetch_exclusive(&key, || self.support.query("latestStageInstances", json!({})))?;
        Ok(identities)
    }

    /// Number of runs of the stage across all pipeline runs.
    pub fn stage_count(&self, pipeline_name: &str, stage_name: &str) -> Result<u32> {
        let key = Self::key_for_stage_count(pipeline_name, stage_name);
        let count = self.support.reads().fetch_exclusive(&key, || {
            self.support.query::<u32>("getStageHistoryCount", pipeline_and_stage(pipeline_name, stage_name))
        })?;
        Ok(*count)
    }

    /// Number of completed runs, as plotted by the stage duration chart.
    pub fn total_stage_count_for_chart(&self, pipeline_name: &str, stage_name: &str) -> Result<u32> {
        let key = Self::key_for_stage_count_for_chart(pipeline_name, stage_name);
        let count = self.support.reads().fetch_exclusive(&key, || {
            self.support.query::<u32>("getTotalStageCountForChart", pipeline_and_stage(pipeline_name, stage_name))
        })?;
        Ok(*count)
    }

    // == History ==

    /// One cursor page of the stage's runs, newest first.
    ///
    /// Latest pages live in the stage's history family. Before/After pages
    /// are cached as run ids once settled, and their runs are read through
    /// [`StageDao::stage_by_id`].
    pub fn stage_history(&self, pipeline_name: &str, stage_name: &str, cursor: HistoryCursor) -> Result<Arc<Vec<Stage>>> {
        let query = cursor.query_name("findStageHistory");
        let load = || {
            self.support.query::<Vec<Stage>>(
                &query,
                json!({
                    "pipelineName": pipeline_name,
                    "stageName": stage_name,
                    "anchor": cursor.anchor(),
                    "pageSize": cursor.page_size(),
                }),
            )
        };

        let reads = self.support.reads();
        if cursor.is_latest() {
            let parent = Self::key_for_stage_histories(pipeline_name, stage_name);
            return Ok(reads.fetch_page(&parent, &format!("latest:{}", cursor.page_size()), load)?);
        }

        let newest = self.most_recent_id(pipeline_name, stage_name)?;
        let key = Self::key_for_stage_history_page(pipeline_name, stage_name, &cursor);
        reads.fetch_ids(
            &key,
            |stage: &Stage| stage.id,
            || load().map_err(CoreError::from),
            |page| cursor.is_settled(page.len(), newest),
            |id| Ok(self.stage_by_id(id)?.as_ref().clone()),
        )
    }

    /// One offset page of the stage's runs, with the nearest newer run.
    pub fn stage_history_by_offset(
        &self,
        pipeline_name: &str,
        stage_name: &str,
        pagination: Pagination,
    ) -> Result<Arc<StageHistoryPage>> {
        let parent = Self::key_for_stage_histories(pipeline_name, stage_name);
        let sub_key = format!("{}-{}", pagination.current_page(), pagination.page_size());

        let page = self.support.reads().fetch_page(&parent, &sub_key, || {
            debug!("Assembling stage history page {} for {}/{}", sub_key, pipeline_name, stage_name);
            let stages: Vec<Stage> = self.support.query(
                "findStageHistoryPage",
                json!({
                    "pipelineName": pipeline_name,
                    "stageName": stage_name,
                    "offset": pagination.offset(),
                    "pageSize": pagination.page_size(),
                }),
            )?;
            let forward_entry = match stages.first() {
                Some(newest) if pagination.offset() > 0 => self
                    .support
                    .query::<Vec<Stage>>(
                        "findStageHistoryAfter",
                        json!({
                            "pipelineName": pipeline_name,
                            "stageName": stage_name,
                            "anchor": newest.id,
                            "pageSize": 1,
                        }),
                    )?
                    .into_iter()
                    .next(),
                _ => None,
            };
            Ok::<_, QueryFailure>(StageHistoryPage {
                stages,
                pagination,
                forward_entry,
            })
        })?;
        Ok(page)
    }

    pub fn stage_history_page_by_number(
        &self,
        pipeline_name: &str,
        stage_name: &str,
        page_number: u32,
        page_size: u32,
    ) -> Result<Arc<StageHistoryPage>> {
        let total = self.stage_count(pipeline_name, stage_name)?;
        let pagination = Pagination::page_by_number(page_number, total, page_size);
        self.stage_history_by_offset(pipeline_name, stage_name, pagination)
    }

    /// The history page that contains `stage`.
    pub fn stage_history_page_for(&self, stage: &Stage, page_size: u32) -> Result<Arc<StageHistoryPage>> {
        let pipeline_name = stage.pipeline_name();
        let stage_name = stage.name();
        let total = self.stage_count(pipeline_name, stage_name)?;

        let parent = Self::key_for_stage_offsets(pipeline_name, stage_name);
        let offset = self.support.reads().fetch_page(&parent, &stage.id.to_string(), || {
            self.support.query::<u32>(
                "findOffsetForStage",
                json!({
                    "pipelineName": pipeline_name,
                    "stageName": stage_name,
                    "stageId": stage.id,
                }),
            )
        })?;

        let pagination = Pagination::page_for_offset(*offset, total, page_size);
        self.stage_history_by_offset(pipeline_name, stage_name, pagination)
    }

    // == Invalidation ==

    /// Drops every cached Latest and offset history page of the stage.
    pub fn invalidate_stage_history(&self, pipeline_name: &str, stage_name: &str) {
        self.support
            .cache()
            .remove(&Self::key_for_stage_histories(pipeline_name, stage_name));
    }
}

fn names(pipeline_name: &str, stage_name: &str) -> [KeySegment; 2] {
    [KeySegment::name(pipeline_name), KeySegment::name(stage_name)]
}

fn pipeline_and_stage(pipeline_name: &str, stage_name: &str) -> serde_json::Value {
    json!({ "pipelineName": pipeline_name, "stageName": stage_name })
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::fixtures::Fixture;

    fn stage_dao_with_runs(runs: usize) -> (Fixture, StageDao, i64) {
        let fixture = Fixture::new();
        let dao = StageDao::new(fixture.support.clone());
        let pipeline_id = fixture.pipeline("up42", 1);
        for _ in 0..runs {
            dao.save(pipeline_id, "dev", StageState::Passed, StageResult::Passed).unwrap();
        }
        (fixture, dao, pipeline_id)
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        assert_eq!(
            StageDao::key_for_most_recent_id("UP42", "Dev"),
            StageDao::key_for_most_recent_id("up42", "dev")
        );
        assert_ne!(
            StageDao::key_for_most_recent_id("up42", "dev"),
            StageDao::key_for_is_stage_active("up42", "dev")
        );
    }

    #[test]
    fn test_most_recent_id_is_cached() {
        let (fixture, dao, _) = stage_dao_with_runs(2);

        let first = dao.most_recent_id("up42", "dev").unwrap();
        let second = dao.most_recent_id("UP42", "DEV").unwrap();

        assert_eq!(first, second);
        assert_eq!(fixture.db.executions("getMostRecentId"), 1);
    }

    #[test]
    fn test_save_evicts_most_recent_id() {
        let (fixture, dao, pipeline_id) = stage_dao_with_runs(1);
        let before = dao.most_recent_id("up42", "dev").unwrap();

        let rerun = dao.save(pipeline_id, "dev", StageState::Building, StageResult::Unknown).unwrap();
        let after = dao.most_recent_id("up42", "dev").unwrap();

        assert_ne!(before, after);
        assert_eq!(after, Some(rerun.id));
        assert_eq!(fixture.db.executions("getMostRecentId"), 2);
    }

    #[test]
    fn test_update_status_evicts_is_active() {
        let (_fixture, dao, pipeline_id) = stage_dao_with_runs(0);
        let stage = dao.save(pipeline_id, "dev", StageState::Building, StageResult::Unknown).unwrap();
        assert!(dao.is_stage_active("up42", "dev").unwrap());

        dao.update_status(stage.id, StageState::Passed, StageResult::Passed).unwrap();
        assert!(!dao.is_stage_active("up42", "dev").unwrap());
    }

    #[test]
    fn test_update_status_of_unknown_stage() {
        let (_fixture, dao, _) = stage_dao_with_runs(0);
        assert!(dao.update_status(404, StageState::Passed, StageResult::Passed).unwrap().is_none());
    }

    #[test]
    fn test_latest_history_page_cached_until_new_run() {
        let (fixture, dao, pipeline_id) = stage_dao_with_runs(3);

        let page = dao.stage_history("up42", "dev", HistoryCursor::latest(2)).unwrap();
        assert_eq!(page.len(), 2);
        dao.stage_history("up42", "dev", HistoryCursor::latest(2)).unwrap();
        assert_eq!(fixture.db.executions("findStageHistoryLatest"), 1);

        dao.save(pipeline_id, "dev", StageState::Building, StageResult::Unknown).unwrap();
        let refreshed = dao.stage_history("up42", "dev", HistoryCursor::latest(2)).unwrap();
        assert_eq!(fixture.db.executions("findStageHistoryLatest"), 2);
        assert_ne!(page[0].id, refreshed[0].id);
    }

    #[test]
    fn test_short_after_page_picks_up_later_runs() {
        let (fixture, dao, pipeline_id) = stage_dao_with_runs(1);
        let first = dao.most_recent_id("up42", "dev").unwrap().unwrap();
        assert!(dao.stage_history("up42", "dev", HistoryCursor::after(first, 10)).unwrap().is_empty());

        let second = dao.save(pipeline_id, "dev", StageState::Passed, StageResult::Passed).unwrap();

        let page = dao.stage_history("up42", "dev", HistoryCursor::after(first, 10)).unwrap();
        let ids: Vec<i64> = page.iter().map(|stage| stage.id).collect();
        assert_eq!(ids, vec![second.id]);
        assert_eq!(fixture.db.executions("findStageHistoryAfter"), 2);
    }

    #[test]
    fn test_full_after_page_is_cached() {
        let (fixture, dao, pipeline_id) = stage_dao_with_runs(3);
        let runs = dao.all_stages_for("up42", 1, "dev").unwrap();
        let cursor = HistoryCursor::after(runs[0].id, 2);
        let first = dao.stage_history("up42", "dev", cursor).unwrap();

        dao.save(pipeline_id, "dev", StageState::Passed, StageResult::Passed).unwrap();

        let second = dao.stage_history("up42", "dev", cursor).unwrap();
        assert_eq!(first, second);
        assert_eq!(fixture.db.executions("findStageHistoryAfter"), 1);
    }

    #[test]
    fn test_before_page_with_unknown_anchor_is_not_cached() {
        let (fixture, dao, pipeline_id) = stage_dao_with_runs(1);
        let cursor = HistoryCursor::before(1_000, 5);
        assert_eq!(dao.stage_history("up42", "dev", cursor).unwrap().len(), 1);

        dao.save(pipeline_id, "dev", StageState::Passed, StageResult::Passed).unwrap();

        assert_eq!(dao.stage_history("up42", "dev", cursor).unwrap().len(), 2);
        assert_eq!(fixture.db.executions("findStageHistoryBefore"), 2);
    }

    #[test]
    fn test_cached_before_page_follows_run_status() {
        let (fixture, dao, pipeline_id) = stage_dao_with_runs(0);
        let building = dao.save(pipeline_id, "dev", StageState::Building, StageResult::Unknown).unwrap();
        let newest = dao.save(pipeline_id, "dev", StageState::Passed, StageResult::Passed).unwrap();
        let cursor = HistoryCursor::before(newest.id, 5);
        assert_eq!(dao.stage_history("up42", "dev", cursor).unwrap()[0].state, StageState::Building);

        dao.update_status(building.id, StageState::Passed, StageResult::Passed).unwrap();

        let page = dao.stage_history("up42", "dev", cursor).unwrap();
        assert_eq!(page[0].id, building.id);
        assert_eq!(page[0].state, StageState::Passed);
        assert_eq!(fixture.db.executions("findStageHistoryBefore"), 1);
    }

    #[test]
    fn test_rerun_evicts_superseded_run() {
        let (_fixture, dao, pipeline_id) = stage_dao_with_runs(1);
        let first = dao.most_recent_id("up42", "dev").unwrap().unwrap();
        assert!(dao.stage_by_id(first).unwrap().as_ref().as_ref().unwrap().latest_run);

        dao.save(pipeline_id, "dev", StageState::Building, StageResult::Unknown).unwrap();

        assert!(!dao.stage_by_id(first).unwrap().as_ref().as_ref().unwrap().latest_run);
    }

    #[test]
    fn test_stage_with_identifier_is_cached_per_counter() {
        let (fixture, dao, pipeline_id) = stage_dao_with_runs(1);
        let first = dao.all_stages_for("up42", 1, "dev").unwrap()[0].clone();
        let mut next = first.identifier.clone();
        next.stage_counter = 2;

        let found = dao.stage_with_identifier(&first.identifier).unwrap();
        assert_eq!(found.as_ref().as_ref().map(|stage| stage.id), Some(first.id));
        assert!(dao.stage_with_identifier(&next).unwrap().is_none());
        dao.stage_with_identifier(&first.identifier).unwrap();
        assert_eq!(fixture.db.executions("findStageByIdentifier"), 2);

        let rerun = dao.save(pipeline_id, "dev", StageState::Building, StageResult::Unknown).unwrap();

        let found = dao.stage_with_identifier(&next).unwrap();
        assert_eq!(found.as_ref().as_ref().map(|stage| stage.id), Some(rerun.id));
        let earlier = dao.stage_with_identifier(&first.identifier).unwrap();
        assert!(!earlier.as_ref().as_ref().unwrap().latest_run);
        assert_eq!(fixture.db.executions("findStageByIdentifier"), 4);
    }

    #[test]
    fn test_status_change_is_visible_by_identifier() {
        let (_fixture, dao, pipeline_id) = stage_dao_with_runs(0);
        let stage = dao.save(pipeline_id, "dev", StageState::Building, StageResult::Unknown).unwrap();
        let cached = dao.stage_with_identifier(&stage.identifier).unwrap();
        assert_eq!(cached.as_ref().as_ref().unwrap().state, StageState::Building);

        dao.update_status(stage.id, StageState::Failed, StageResult::Failed).unwrap();

        let updated = dao.stage_with_identifier(&stage.identifier).unwrap();
        assert_eq!(updated.as_ref().as_ref().unwrap().result, StageResult::Failed);
    }

    #[test]
    fn test_page_by_number() {
        let (_fixture, dao, _) = stage_dao_with_runs(5);

        let page = dao.stage_history_page_by_number("up42", "dev", 2, 2).unwrap();
        let counters: Vec<i32> = page.stages.iter().map(|stage| stage.identifier.stage_counter).collect();
        assert_eq!(counters, vec![3, 2]);
        assert_eq!(page.pagination.total_pages(), 3);
        assert_eq!(page.forward_entry.as_ref().map(|stage| stage.identifier.stage_counter), Some(4));
    }

    #[test]
    fn test_first_page_has_no_forward_entry() {
        let (_fixture, dao, _) = stage_dao_with_runs(3);
        let page = dao.stage_history_page_by_number("up42", "dev", 1, 2).unwrap();
        assert!(page.forward_entry.is_none());
    }

    #[test]
    fn test_page_for_stage_contains_it() {
        let (_fixture, dao, pipeline_id) = stage_dao_with_runs(4);
        let oldest = dao.all_stages_for("up42", 1, "dev").unwrap()[0].clone();
        assert_eq!(oldest.pipeline_id, pipeline_id);

        let page = dao.stage_history_page_for(&oldest, 3).unwrap();
        assert!(page.stages.iter().any(|stage| stage.id == oldest.id));
        assert_eq!(page.pagination.current_page(), 2);
    }

    #[test]
    fn test_chart_count_only_counts_completed_runs() {
        let (_fixture, dao, pipeline_id) = stage_dao_with_runs(2);
        dao.save(pipeline_id, "dev", StageState::Building, StageResult::Unknown).unwrap();

        assert_eq!(dao.stage_count("up42", "dev").unwrap(), 3);
        assert_eq!(dao.total_stage_count_for_chart("up42", "dev").unwrap(), 2);
    }
}
