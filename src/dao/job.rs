//! Job DAO

use std::sync::Arc;

use serde_json::json;

use crate::cache::{KeyBuilder, KeySegment};
use crate::dao::DaoSupport;
use crate::domain::{JobIdentifier, JobInstance, JobResult, JobState, StageIdentifier};
use crate::error::Result;

const KEYS: KeyBuilder = KeyBuilder::new("JobDao");

#[derive(Debug, Clone)]
pub struct JobDao {
    support: DaoSupport,
}

impl JobDao {
    pub fn new(support: DaoSupport) -> Self {
        Self { support }
    }

    // == Keys ==

    pub fn key_for_job_by_id(job_id: i64) -> String {
        KEYS.build("jobById", &[KeySegment::Number(job_id)])
    }

    pub fn key_for_active_job_ids() -> String {
        KEYS.build("activeJobIds", &[])
    }

    pub fn key_for_original_job_identifier(stage: &StageIdentifier, job_name: &str) -> String {
        job_key(&stage.pipeline_name, stage.pipeline_counter, &stage.stage_name, stage.stage_counter, job_name)
    }

    fn key_for_job_identifier(id: &JobIdentifier) -> String {
        job_key(&id.pipeline_name, id.pipeline_counter, &id.stage_name, id.stage_counter, &id.job_name)
    }

    /// Parent key of the completed-job lists of a job, one sub-key per limit.
    pub fn key_for_latest_completed_jobs(pipeline_name: &str, stage_name: &str, job_name: &str) -> String {
        KEYS.build("latestCompletedJobs", &names(pipeline_name, stage_name, job_name))
    }

    pub fn key_for_job_history_count(pipeline_name: &str, stage_name: &str, job_name: &str) -> String {
        KEYS.build("jobHistoryCount", &names(pipeline_name, stage_name, job_name))
    }

    // == Writes ==

    /// Schedules a job inside stage run `stage_id`.
    pub fn save(&self, stage_id: i64, job_name: &str, state: JobState) -> Result<JobInstance> {
        let cache = Arc::clone(self.support.cache());
        self.support.transactions().execute(|scope| -> Result<JobInstance> {
            let job: JobInstance = self.support.query_in(
                scope,
                "insertJob",
                json!({ "stageId": stage_id, "jobName": job_name, "state": state }),
            )?;
            let id = &job.identifier;
            scope.remove_after_commit(
                &cache,
                vec![
                    Self::key_for_active_job_ids(),
                    Self::key_for_job_history_count(&id.pipeline_name, &id.stage_name, &id.job_name),
                    Self::key_for_job_identifier(id),
                ],
            );
            Ok(job)
        })
    }

    /// Moves a job to `state`. Returns `None` for an unknown id.
    pub fn update_state(&self, job_id: i64, state: JobState, result: JobResult) -> Result<Option<JobInstance>> {
        let cache = Arc::clone(self.support.cache());
        self.support.transactions().execute(|scope| -> Result<Option<JobInstance>> {
            let updated: Option<JobInstance> = self.support.query_in(
                scope,
                "updateJobStatus",
                json!({ "jobId": job_id, "state": state, "result": result }),
            )?;
            if updated.is_some() {
                scope.remove_after_commit(
                    &cache,
                    vec![Self::key_for_job_by_id(job_id), Self::key_for_active_job_ids()],
                );
            }
            Ok(updated)
        })
    }

    // == Reads ==

    pub fn job_by_id(&self, job_id: i64) -> Result<Arc<Option<JobInstance>>> {
        let key = Self::key_for_job_by_id(job_id);
        let job = self
            .support
            .reads()
            .fetch_exclusive(&key, || self.support.query("getJobById", json!({ "jobId": job_id })))?;
        Ok(job)
    }

    /// Ids of jobs that have not reached a terminal state.
    pub fn active_job_ids(&self) -> Result<Arc<Vec<i64>>> {
        let key = Self::key_for_active_job_ids();
        let ids = self
            .support
            .reads()
            .fetch_exclusive(&key, || self.support.query("getActiveJobIds", json!({})))?;
        Ok(ids)
    }

    /// Identifier of `job_name` within a stage run. A job copied into a
    /// rerun keeps pointing at the run it originally built in.
    pub fn find_original_job_identifier(
        &self,
        stage: &StageIdentifier,
        job_name: &str,
    ) -> Result<Arc<Option<JobIdentifier>>> {
        let key = Self::key_for_original_job_identifier(stage, job_name);
        let identifier = self.support.reads().fetch(&key, || {
            self.support.query(
                "findJobId",
                json!({
                    "pipelineName": stage.pipeline_name,
                    "pipelineCounter": stage.pipeline_counter,
                    "stageName": stage.stage_name,
                    "stageCounter": stage.stage_counter,
                    "jobName": job_name,
                }),
            )
        })?;
        Ok(identifier)
    }

    /// The newest `limit` completed runs of a job, newest first.
    pub fn latest_completed_jobs(
        &self,
        pipeline_name: &str,
        stage_name: &str,
        job_name: &str,
        limit: usize,
    ) -> Result<Arc<Vec<JobInstance>>> {
        let parent = Self::key_for_latest_completed_jobs(pipeline_name, stage_name, job_name);
        let jobs = self.support.reads().fetch_page(&parent, &limit.to_string(), || {
            self.support.query(
                "latestCompletedJobs",
                json!({
                    "pipelineName": pipeline_name,
                    "stageName": stage_name,
                    "jobName": job_name,
                    "limit": limit,
                }),
            )
        })?;
        Ok(jobs)
    }

    pub fn job_history_count(&self, pipeline_name: &str, stage_name: &str, job_name: &str) -> Result<u32> {
        let key = Self::key_for_job_history_count(pipeline_name, stage_name, job_name);
        let count = self.support.reads().fetch_exclusive(&key, || {
            self.support.query::<u32>(
                "getJobHistoryCount",
                json!({ "pipelineName": pipeline_name, "stageName": stage_name, "jobName": job_name }),
            )
        })?;
        Ok(*count)
    }
}

fn job_key(pipeline_name: &str, pipeline_counter: i32, stage_name: &str, stage_counter: i32, job_name: &str) -> String {
    KEYS.build(
        "originalJobIdentifier",
        &[
            KeySegment::name(pipeline_name),
            pipeline_counter.into(),
            KeySegment::name(stage_name),
            stage_counter.into(),
            KeySegment::name(job_name),
        ],
    )
}

fn names(pipeline_name: &str, stage_name: &str, job_name: &str) -> [KeySegment; 3] {
    [
        KeySegment::name(pipeline_name),
        KeySegment::name(stage_name),
        KeySegment::name(job_name),
    ]
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::fixtures::Fixture;
    use crate::dao::StageDao;
    use crate::domain::{Stage, StageResult, StageState};

    fn job_dao() -> (Fixture, JobDao, Stage) {
        let fixture = Fixture::new();
        let pipeline_id = fixture.pipeline("up42", 1);
        let stage = StageDao::new(fixture.support.clone())
            .save(pipeline_id, "dev", StageState::Building, StageResult::Unknown)
            .unwrap();
        let dao = JobDao::new(fixture.support.clone());
        (fixture, dao, stage)
    }

    #[test]
    fn test_update_state_evicts_job_and_active_ids() {
        let (fixture, dao, stage) = job_dao();
        let job = dao.save(stage.id, "unit", JobState::Scheduled).unwrap();
        assert_eq!(*dao.active_job_ids().unwrap(), vec![job.id]);
        assert_eq!(dao.job_by_id(job.id).unwrap().as_ref().as_ref().unwrap().state, JobState::Scheduled);

        dao.update_state(job.id, JobState::Completed, JobResult::Passed).unwrap();

        assert!(dao.active_job_ids().unwrap().is_empty());
        assert_eq!(dao.job_by_id(job.id).unwrap().as_ref().as_ref().unwrap().state, JobState::Completed);
        assert_eq!(fixture.db.executions("getJobById"), 2);
    }

    #[test]
    fn test_update_state_of_unknown_job() {
        let (_fixture, dao, _) = job_dao();
        assert!(dao.update_state(404, JobState::Completed, JobResult::Passed).unwrap().is_none());
    }

    #[test]
    fn test_original_identifier_lookup_is_case_insensitive() {
        let (fixture, dao, stage) = job_dao();
        let job = dao.save(stage.id, "unit", JobState::Scheduled).unwrap();

        let found = dao.find_original_job_identifier(&stage.identifier, "UNIT").unwrap();
        assert_eq!(found.as_ref().as_ref().map(|id| id.job_id), Some(job.id));
        dao.find_original_job_identifier(&stage.identifier, "unit").unwrap();
        assert_eq!(fixture.db.executions("findJobId"), 1);
    }

    #[test]
    fn test_missing_job_identifier_is_evicted_by_save() {
        let (fixture, dao, stage) = job_dao();
        assert!(dao.find_original_job_identifier(&stage.identifier, "unit").unwrap().is_none());

        let job = dao.save(stage.id, "UNIT", JobState::Scheduled).unwrap();

        let found = dao.find_original_job_identifier(&stage.identifier, "unit").unwrap();
        assert_eq!(found.as_ref().as_ref().map(|id| id.job_id), Some(job.id));
        assert_eq!(fixture.db.executions("findJobId"), 2);
    }

    #[test]
    fn test_failed_job_save_keeps_cached_identifier() {
        let (fixture, dao, stage) = job_dao();
        assert!(dao.find_original_job_identifier(&stage.identifier, "unit").unwrap().is_none());

        fixture.db.fail_next("insertJob");
        assert!(dao.save(stage.id, "unit", JobState::Scheduled).is_err());

        assert!(dao.find_original_job_identifier(&stage.identifier, "unit").unwrap().is_none());
        assert_eq!(fixture.db.executions("findJobId"), 1);
    }

    #[test]
    fn test_latest_completed_jobs_respects_limit() {
        let (_fixture, dao, stage) = job_dao();
        for _ in 0..3 {
            let job = dao.save(stage.id, "unit", JobState::Scheduled).unwrap();
            dao.update_state(job.id, JobState::Completed, JobResult::Passed).unwrap();
        }

        assert_eq!(dao.latest_completed_jobs("up42", "dev", "unit", 2).unwrap().len(), 2);
        assert_eq!(dao.latest_completed_jobs("up42", "dev", "unit", 10).unwrap().len(), 3);
        assert_eq!(dao.job_history_count("up42", "dev", "unit").unwrap(), 3);
    }

    #[test]
    fn test_save_evicts_history_count() {
        let (_fixture, dao, stage) = job_dao();
        assert_eq!(dao.job_history_count("up42", "dev", "unit").unwrap(), 0);

        dao.save(stage.id, "unit", JobState::Scheduled).unwrap();
        assert_eq!(dao.job_history_count("up42", "dev", "unit").unwrap(), 1);
    }
}
