//! In-memory tables and the named queries that read and write them.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::{
    BuildCause, JobIdentifier, JobInstance, JobResult, JobState, MaterialRevision, PauseInfo, PipelineHistory,
    PipelineIdentifier, Stage, StageIdentifier, StageIdentity, StageResult, StageState, User,
};
use crate::error::QueryFailure;
use crate::persistence::executor::{decode, encode};

/// Queries that modify tables. Everything else is a read.
const WRITE_QUERIES: &[&str] = &[
    "insertPipeline",
    "upsertPipelinePauseState",
    "updatePipelineComment",
    "lockPipeline",
    "unlockLockedPipeline",
    "insertStage",
    "updateStageStatus",
    "insertJob",
    "updateJobStatus",
    "saveUser",
    "setUsersEnabled",
    "deleteUser",
];

pub(crate) fn is_write(query: &str) -> bool {
    WRITE_QUERIES.contains(&query)
}

// == Parameters ==

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipelineName {
    pipeline_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipelineRun {
    pipeline_name: String,
    counter: i32,
    label: Option<String>,
    #[serde(default)]
    build_cause: BuildCause,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamRun {
    pipeline_name: String,
    dependency_pipeline_name: String,
    dependency_pipeline_counter: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceRevision {
    pipeline_name: String,
    fingerprint: String,
    revision: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NameAndCounter {
    pipeline_name: String,
    counter: i32,
}

#[derive(Deserialize)]
struct ById {
    id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryPage {
    pipeline_name: String,
    stage_name: Option<String>,
    anchor: Option<i64>,
    page_size: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PauseParams {
    pipeline_name: String,
    paused: bool,
    pause_cause: Option<String>,
    paused_by: Option<String>,
    paused_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentParams {
    pipeline_name: String,
    counter: i32,
    comment: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PassedStageParams {
    pipeline_id: i64,
    stage_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewStage {
    pipeline_id: i64,
    stage_name: String,
    state: StageState,
    result: StageResult,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageStatus {
    stage_id: i64,
    state: StageState,
    result: StageResult,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageId {
    stage_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipelineAndStage {
    pipeline_name: String,
    stage_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageRunsParams {
    pipeline_name: String,
    counter: i32,
    stage_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageLocator {
    pipeline_name: String,
    pipeline_counter: i32,
    stage_name: String,
    stage_counter: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageOffsetPage {
    pipeline_name: String,
    stage_name: String,
    offset: usize,
    page_size: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageOffsetParams {
    pipeline_name: String,
    stage_name: String,
    stage_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewJob {
    stage_id: i64,
    job_name: String,
    state: JobState,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    job_id: i64,
    state: JobState,
    result: JobResult,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobId {
    job_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FindJobParams {
    pipeline_name: String,
    pipeline_counter: i32,
    stage_name: String,
    stage_counter: i32,
    job_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobHistoryParams {
    pipeline_name: String,
    stage_name: String,
    job_name: String,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct UserParams {
    name: String,
    enabled: bool,
}

#[derive(Deserialize)]
struct UsersEnabled {
    names: Vec<String>,
    enabled: bool,
}

#[derive(Deserialize)]
struct UserName {
    name: String,
}

fn args<T: DeserializeOwned>(query: &str, params: &Value) -> Result<T, QueryFailure> {
    decode(query, params.clone())
}

fn rows(count: usize) -> Value {
    json!({ "rowsAffected": count })
}

// == Tables ==

#[derive(Debug, Clone)]
struct PipelineRow {
    id: i64,
    identifier: PipelineIdentifier,
    comment: Option<String>,
    build_cause: BuildCause,
}

/// Every table of the store. Cloned whole to snapshot committed state.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pipelines: BTreeMap<i64, PipelineRow>,
    stages: BTreeMap<i64, Stage>,
    jobs: BTreeMap<i64, JobInstance>,
    /// Keyed by lower-cased pipeline name
    pauses: HashMap<String, PauseInfo>,
    /// Keyed by lower-cased pipeline name
    locks: HashMap<String, PipelineIdentifier>,
    /// Keyed by lower-cased user name
    users: BTreeMap<String, User>,
    last_id: i64,
}

impl Tables {
    // == Writes ==
    pub(crate) fn write(&mut self, query: &str, params: &Value) -> Result<Value, QueryFailure> {
        match query {
            "insertPipeline" => {
                let p: PipelineRun = args(query, params)?;
                let id = self.next_id();
                let label = p.label.unwrap_or_else(|| p.counter.to_string());
                let identifier = PipelineIdentifier::new(p.pipeline_name, p.counter, label);
                self.pipelines.insert(
                    id,
                    PipelineRow {
                        id,
                        identifier,
                        comment: None,
                        build_cause: p.build_cause,
                    },
                );
                Ok(json!({ "id": id }))
            }
            "upsertPipelinePauseState" => {
                let p: PauseParams = args(query, params)?;
                let info = PauseInfo {
                    paused: p.paused,
                    pause_cause: p.pause_cause,
                    paused_by: p.paused_by,
                    paused_at: p.paused_at,
                };
                self.pauses.insert(p.pipeline_name.to_ascii_lowercase(), info);
                Ok(rows(1))
            }
            "updatePipelineComment" => {
                let p: CommentParams = args(query, params)?;
                let row = self
                    .pipelines
                    .values_mut()
                    .find(|row| row.identifier.counter == p.counter && row.identifier.name.eq_ignore_ascii_case(&p.pipeline_name));
                match row {
                    Some(row) => {
                        row.comment = Some(p.comment);
                        Ok(rows(1))
                    }
                    None => Ok(rows(0)),
                }
            }
            "lockPipeline" => {
                // Conditional: only succeeds when unlocked or already held by this run
                let p: PipelineRun = args(query, params)?;
                let label = p.label.unwrap_or_else(|| p.counter.to_string());
                let requested = PipelineIdentifier::new(p.pipeline_name, p.counter, label);
                let key = requested.name.to_ascii_lowercase();
                match self.locks.get(&key) {
                    None => {
                        self.locks.insert(key, requested);
                        Ok(rows(1))
                    }
                    Some(holder) if holder.same_run(&requested) => Ok(rows(1)),
                    Some(_) => Ok(rows(0)),
                }
            }
            "unlockLockedPipeline" => {
                let p: PipelineName = args(query, params)?;
                let removed = self.locks.remove(&p.pipeline_name.to_ascii_lowercase());
                Ok(rows(usize::from(removed.is_some())))
            }
            "insertStage" => {
                let p: NewStage = args(query, params)?;
                let pipeline = self
                    .pipelines
                    .get(&p.pipeline_id)
                    .map(|row| row.identifier.clone())
                    .ok_or_else(|| QueryFailure::failed(query, format!("no pipeline with id {}", p.pipeline_id)))?;

                let mut counter = 0;
                for stage in self.stages.values_mut() {
                    if stage.pipeline_id == p.pipeline_id && stage.name().eq_ignore_ascii_case(&p.stage_name) {
                        counter = counter.max(stage.identifier.stage_counter);
                        stage.latest_run = false;
                    }
                }

                let id = self.next_id();
                let stage = Stage {
                    id,
                    pipeline_id: p.pipeline_id,
                    identifier: StageIdentifier {
                        pipeline_name: pipeline.name,
                        pipeline_counter: pipeline.counter,
                        pipeline_label: pipeline.label,
                        stage_name: p.stage_name,
                        stage_counter: counter + 1,
                    },
                    state: p.state,
                    result: p.result,
                    latest_run: true,
                };
                let value = encode(query, &stage)?;
                self.stages.insert(id, stage);
                Ok(value)
            }
            "updateStageStatus" => {
                let p: StageStatus = args(query, params)?;
                match self.stages.get_mut(&p.stage_id) {
                    Some(stage) => {
                        stage.state = p.state;
                        stage.result = p.result;
                        encode(query, &*stage)
                    }
                    None => Ok(Value::Null),
                }
            }
            "insertJob" => {
                let p: NewJob = args(query, params)?;
                let stage = self
                    .stages
                    .get(&p.stage_id)
                    .map(|stage| stage.identifier.clone())
                    .ok_or_else(|| QueryFailure::failed(query, format!("no stage with id {}", p.stage_id)))?;

                let id = self.next_id();
                let job = JobInstance {
                    id,
                    stage_id: p.stage_id,
                    identifier: JobIdentifier {
                        pipeline_name: stage.pipeline_name,
                        pipeline_counter: stage.pipeline_counter,
                        stage_name: stage.stage_name,
                        stage_counter: stage.stage_counter,
                        job_name: p.job_name,
                        job_id: id,
                    },
                    state: p.state,
                    result: JobResult::Unknown,
                };
                let value = encode(query, &job)?;
                self.jobs.insert(id, job);
                Ok(value)
            }
            "updateJobStatus" => {
                let p: JobStatus = args(query, params)?;
                match self.jobs.get_mut(&p.job_id) {
                    Some(job) => {
                        job.state = p.state;
                        job.result = p.result;
                        encode(query, &*job)
                    }
                    None => Ok(Value::Null),
                }
            }
            "saveUser" => {
                let p: UserParams = args(query, params)?;
                self.users.insert(
                    p.name.to_ascii_lowercase(),
                    User {
                        name: p.name,
                        enabled: p.enabled,
                    },
                );
                Ok(rows(1))
            }
            "setUsersEnabled" => {
                let p: UsersEnabled = args(query, params)?;
                let mut changed = 0;
                for name in &p.names {
                    if let Some(user) = self.users.get_mut(&name.to_ascii_lowercase()) {
                        user.enabled = p.enabled;
                        changed += 1;
                    }
                }
                Ok(rows(changed))
            }
            "deleteUser" => {
                let p: UserName = args(query, params)?;
                let removed = self.users.remove(&p.name.to_ascii_lowercase());
                Ok(rows(usize::from(removed.is_some())))
            }
            _ => Err(QueryFailure::UnknownQuery(query.to_string())),
        }
    }

    // == Reads ==
    pub(crate) fn read(&self, query: &str, params: &Value) -> Result<Value, QueryFailure> {
        match query {
            // Pipelines
            "getLatestPipelineId" => {
                let p: PipelineName = args(query, params)?;
                let id = self.pipelines_named(&p.pipeline_name).map(|row| row.id).max();
                Ok(json!(id))
            }
            "getPipelineHistoryById" => {
                let p: ById = args(query, params)?;
                self.pipelines
                    .get(&p.id)
                    .map(|row| encode(query, &self.history(row)))
                    .unwrap_or(Ok(Value::Null))
            }
            "getPipelineHistoryByNameAndCounter" => {
                let p: NameAndCounter = args(query, params)?;
                self.find_pipeline(&p.pipeline_name, p.counter)
                    .map(|row| encode(query, &self.history(row)))
                    .unwrap_or(Ok(Value::Null))
            }
            "findPipelineByNameAndCounter" => {
                let p: NameAndCounter = args(query, params)?;
                Ok(json!(self.find_pipeline(&p.pipeline_name, p.counter).map(|row| row.id)))
            }
            "findBuildCauseByNameAndCounter" => {
                let p: NameAndCounter = args(query, params)?;
                encode(query, &self.find_pipeline(&p.pipeline_name, p.counter).map(|row| &row.build_cause))
            }
            "pipelineInstancesTriggeredOutOfDependencyMaterial" => {
                let p: UpstreamRun = args(query, params)?;
                let triggered = self.pipelines_triggered_by(&p.pipeline_name, |revision| match revision {
                    MaterialRevision::Dependency {
                        pipeline_name,
                        pipeline_counter,
                    } => {
                        *pipeline_counter == p.dependency_pipeline_counter
                            && pipeline_name.eq_ignore_ascii_case(&p.dependency_pipeline_name)
                    }
                    MaterialRevision::Scm { .. } => false,
                });
                encode(query, &triggered)
            }
            "pipelineInstancesTriggeredOffOfMaterialRevision" => {
                let p: SourceRevision = args(query, params)?;
                let triggered = self.pipelines_triggered_by(&p.pipeline_name, |revision| match revision {
                    MaterialRevision::Scm { fingerprint, revision } => {
                        *fingerprint == p.fingerprint && *revision == p.revision
                    }
                    MaterialRevision::Dependency { .. } => false,
                });
                encode(query, &triggered)
            }
            "getPipelineHistoryPageLatest" | "getPipelineHistoryPageBefore" | "getPipelineHistoryPageAfter" => {
                let p: HistoryPage = args(query, params)?;
                let ids: Vec<i64> = self.pipelines_named(&p.pipeline_name).map(|row| row.id).collect();
                let page: Vec<PipelineHistory> = page_ids(query, &ids, p.anchor, p.page_size)
                    .into_iter()
                    .filter_map(|id| self.pipelines.get(&id))
                    .map(|row| self.history(row))
                    .collect();
                encode(query, &page)
            }
            "getActivePipelines" => {
                let active: Vec<(String, i64)> = self
                    .pipelines
                    .values()
                    .filter(|row| self.history(row).is_any_stage_active())
                    .map(|row| (row.identifier.name.clone(), row.id))
                    .collect();
                encode(query, &active)
            }
            "getPipelinePauseState" => {
                let p: PipelineName = args(query, params)?;
                match self.pauses.get(&p.pipeline_name.to_ascii_lowercase()) {
                    Some(info) => encode(query, info),
                    None => Ok(Value::Null),
                }
            }
            "latestPassedStageForPipelineId" => {
                let p: PassedStageParams = args(query, params)?;
                let passed = self
                    .stages
                    .values()
                    .rev()
                    .find(|stage| {
                        stage.pipeline_id == p.pipeline_id
                            && stage.name().eq_ignore_ascii_case(&p.stage_name)
                            && stage.result == StageResult::Passed
                    })
                    .map(|stage| stage.identifier.clone());
                encode(query, &passed)
            }
            "lockedPipeline" => {
                let p: PipelineName = args(query, params)?;
                encode(query, &self.locks.get(&p.pipeline_name.to_ascii_lowercase()))
            }
            "allLockedPipelines" => {
                let mut holders: Vec<&PipelineIdentifier> = self.locks.values().collect();
                holders.sort_by_key(|holder| holder.name.to_ascii_lowercase());
                encode(query, &holders)
            }

            // Stages
            "getStageById" => {
                let p: StageId = args(query, params)?;
                encode(query, &self.stages.get(&p.stage_id))
            }
            "getMostRecentId" => {
                let p: PipelineAndStage = args(query, params)?;
                let id = self.stages_named(&p.pipeline_name, &p.stage_name).map(|stage| stage.id).max();
                Ok(json!(id))
            }
            "isStageActive" => {
                let p: PipelineAndStage = args(query, params)?;
                let active = self
                    .stages_named(&p.pipeline_name, &p.stage_name)
                    .any(|stage| stage.latest_run && stage.state.is_active());
                Ok(json!(active))
            }
            "getAllRunsOfStageForPipelineInstance" => {
                let p: StageRunsParams = args(query, params)?;
                let runs: Vec<&Stage> = self
                    .stages_named(&p.pipeline_name, &p.stage_name)
                    .filter(|stage| stage.identifier.pipeline_counter == p.counter)
                    .collect();
                encode(query, &runs)
            }
            "findStageByIdentifier" => {
                let p: StageLocator = args(query, params)?;
                let found = self.stages_named(&p.pipeline_name, &p.stage_name).find(|stage| {
                    stage.identifier.pipeline_counter == p.pipeline_counter
                        && stage.identifier.stage_counter == p.stage_counter
                });
                encode(query, &found)
            }
            "latestStageInstances" => {
                let mut latest: BTreeMap<(String, String), &Stage> = BTreeMap::new();
                for stage in self.stages.values() {
                    let key = (stage.pipeline_name().to_ascii_lowercase(), stage.name().to_ascii_lowercase());
                    latest.insert(key, stage);
                }
                let identities: Vec<StageIdentity> = latest
                    .into_values()
                    .map(|stage| StageIdentity {
                        pipeline_name: stage.pipeline_name().to_string(),
                        stage_name: stage.name().to_string(),
                        stage_id: stage.id,
                    })
                    .collect();
                encode(query, &identities)
            }
            "getTotalStageCountForChart" => {
                let p: PipelineAndStage = args(query, params)?;
                let count = self
                    .stages_named(&p.pipeline_name, &p.stage_name)
                    .filter(|stage| stage.state.is_completed())
                    .count();
                Ok(json!(count))
            }
            "getStageHistoryCount" => {
                let p: PipelineAndStage = args(query, params)?;
                Ok(json!(self.stages_named(&p.pipeline_name, &p.stage_name).count()))
            }
            "findStageHistoryLatest" | "findStageHistoryBefore" | "findStageHistoryAfter" => {
                let p: HistoryPage = args(query, params)?;
                let stage_name = p.stage_name.unwrap_or_default();
                let ids: Vec<i64> = self.stages_named(&p.pipeline_name, &stage_name).map(|stage| stage.id).collect();
                let page: Vec<&Stage> = page_ids(query, &ids, p.anchor, p.page_size)
                    .into_iter()
                    .filter_map(|id| self.stages.get(&id))
                    .collect();
                encode(query, &page)
            }
            "findStageHistoryPage" => {
                let p: StageOffsetPage = args(query, params)?;
                let page: Vec<&Stage> = self
                    .stages_named(&p.pipeline_name, &p.stage_name)
                    .rev()
                    .skip(p.offset)
                    .take(p.page_size)
                    .collect();
                encode(query, &page)
            }
            "findOffsetForStage" => {
                let p: StageOffsetParams = args(query, params)?;
                let newer = self
                    .stages_named(&p.pipeline_name, &p.stage_name)
                    .filter(|stage| stage.id > p.stage_id)
                    .count();
                Ok(json!(newer))
            }

            // Jobs
            "getJobById" => {
                let p: JobId = args(query, params)?;
                encode(query, &self.jobs.get(&p.job_id))
            }
            "getActiveJobIds" => {
                let ids: Vec<i64> = self
                    .jobs
                    .values()
                    .filter(|job| !job.state.is_terminal())
                    .map(|job| job.id)
                    .collect();
                Ok(json!(ids))
            }
            "findJobId" => {
                let p: FindJobParams = args(query, params)?;
                let found = self
                    .jobs
                    .values()
                    .rev()
                    .map(|job| &job.identifier)
                    .find(|id| {
                        id.pipeline_counter == p.pipeline_counter
                            && id.stage_counter == p.stage_counter
                            && id.pipeline_name.eq_ignore_ascii_case(&p.pipeline_name)
                            && id.stage_name.eq_ignore_ascii_case(&p.stage_name)
                            && id.job_name.eq_ignore_ascii_case(&p.job_name)
                    });
                encode(query, &found)
            }
            "latestCompletedJobs" => {
                let p: JobHistoryParams = args(query, params)?;
                let jobs: Vec<&JobInstance> = self
                    .jobs_named(&p.pipeline_name, &p.stage_name, &p.job_name)
                    .rev()
                    .filter(|job| job.state == JobState::Completed)
                    .take(p.limit.unwrap_or(usize::MAX))
                    .collect();
                encode(query, &jobs)
            }
            "getJobHistoryCount" => {
                let p: JobHistoryParams = args(query, params)?;
                Ok(json!(self.jobs_named(&p.pipeline_name, &p.stage_name, &p.job_name).count()))
            }

            // Users
            "enabledUserCount" => Ok(json!(self.users.values().filter(|user| user.enabled).count())),

            _ => Err(QueryFailure::UnknownQuery(query.to_string())),
        }
    }

    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn pipelines_named<'a>(&'a self, name: &'a str) -> impl DoubleEndedIterator<Item = &'a PipelineRow> + 'a {
        self.pipelines
            .values()
            .filter(move |row| row.identifier.name.eq_ignore_ascii_case(name))
    }

    fn find_pipeline(&self, name: &str, counter: i32) -> Option<&PipelineRow> {
        self.pipelines
            .values()
            .find(|row| row.identifier.counter == counter && row.identifier.name.eq_ignore_ascii_case(name))
    }

    /// Runs of `pipeline_name` built from a revision accepted by `matches`,
    /// oldest first.
    fn pipelines_triggered_by(
        &self,
        pipeline_name: &str,
        matches: impl Fn(&MaterialRevision) -> bool,
    ) -> Vec<PipelineIdentifier> {
        self.pipelines_named(pipeline_name)
            .filter(|row| row.build_cause.revisions.iter().any(&matches))
            .map(|row| row.identifier.clone())
            .collect()
    }

    fn stages_named<'a>(&'a self, pipeline: &'a str, stage: &'a str) -> impl DoubleEndedIterator<Item = &'a Stage> + 'a {
        self.stages.values().filter(move |candidate| {
            candidate.pipeline_name().eq_ignore_ascii_case(pipeline) && candidate.name().eq_ignore_ascii_case(stage)
        })
    }

    fn jobs_named<'a>(
        &'a self,
        pipeline: &'a str,
        stage: &'a str,
        job: &'a str,
    ) -> impl DoubleEndedIterator<Item = &'a JobInstance> + 'a {
        self.jobs.values().filter(move |candidate| {
            let id = &candidate.identifier;
            id.pipeline_name.eq_ignore_ascii_case(pipeline)
                && id.stage_name.eq_ignore_ascii_case(stage)
                && id.job_name.eq_ignore_ascii_case(job)
        })
    }

    fn history(&self, row: &PipelineRow) -> PipelineHistory {
        PipelineHistory {
            id: row.id,
            identifier: row.identifier.clone(),
            comment: row.comment.clone(),
            stages: self
                .stages
                .values()
                .filter(|stage| stage.pipeline_id == row.id && stage.latest_run)
                .cloned()
                .collect(),
        }
    }
}

/// Selects one page of `ids` (ascending) for a `...Latest`, `...Before` or
/// `...After` query. Pages are returned newest first.
fn page_ids(query: &str, ids: &[i64], anchor: Option<i64>, page_size: usize) -> Vec<i64> {
    let anchor = anchor.unwrap_or(0);
    if query.ends_with("Before") {
        ids.iter().rev().filter(|id| **id < anchor).take(page_size).copied().collect()
    } else if query.ends_with("After") {
        let mut page: Vec<i64> = ids.iter().filter(|id| **id > anchor).take(page_size).copied().collect();
        page.reverse();
        page
    } else {
        ids.iter().rev().take(page_size).copied().collect()
    }
}
