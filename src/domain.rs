//! Domain Model
//!
//! Identifiers and records of the orchestration store that the caching layer
//! reads and invalidates. These are plain values; all persistence goes
//! through [`crate::persistence::QueryExecutor`].

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::history::Pagination;

// == Identifiers ==

/// One run of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineIdentifier {
    pub name: String,
    pub counter: i32,
    pub label: String,
}

impl PipelineIdentifier {
    pub fn new(name: impl Into<String>, counter: i32, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counter,
            label: label.into(),
        }
    }

    /// True when both identify the same run. Pipeline names are
    /// case-insensitive; labels are ignored.
    pub fn same_run(&self, other: &PipelineIdentifier) -> bool {
        self.counter == other.counter && self.name.eq_ignore_ascii_case(&other.name)
    }
}

/// One run of a stage inside a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageIdentifier {
    pub pipeline_name: String,
    pub pipeline_counter: i32,
    pub pipeline_label: String,
    pub stage_name: String,
    pub stage_counter: i32,
}

impl StageIdentifier {
    pub fn pipeline_identifier(&self) -> PipelineIdentifier {
        PipelineIdentifier::new(&self.pipeline_name, self.pipeline_counter, &self.pipeline_label)
    }
}

/// One job inside a stage run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobIdentifier {
    pub pipeline_name: String,
    pub pipeline_counter: i32,
    pub stage_name: String,
    pub stage_counter: i32,
    pub job_name: String,
    pub job_id: i64,
}

// == Stage ==

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageState {
    Building,
    Failing,
    Passed,
    Failed,
    Cancelled,
    Unknown,
}

impl StageState {
    pub fn is_active(self) -> bool {
        matches!(self, StageState::Building | StageState::Failing)
    }

    pub fn is_completed(self) -> bool {
        matches!(self, StageState::Passed | StageState::Failed | StageState::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageResult {
    Passed,
    Failed,
    Cancelled,
    Unknown,
}

/// A stage run as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: i64,
    pub pipeline_id: i64,
    pub identifier: StageIdentifier,
    pub state: StageState,
    pub result: StageResult,
    /// False once a rerun of the same stage exists in the pipeline run
    pub latest_run: bool,
}

impl Stage {
    pub fn name(&self) -> &str {
        &self.identifier.stage_name
    }

    pub fn pipeline_name(&self) -> &str {
        &self.identifier.pipeline_name
    }
}

/// Latest run of a stage, across all pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageIdentity {
    pub pipeline_name: String,
    pub stage_name: String,
    pub stage_id: i64,
}

/// One offset page of a stage's run history, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageHistoryPage {
    pub stages: Vec<Stage>,
    pub pagination: Pagination,
    /// Oldest run newer than this page, if the page is not the first
    pub forward_entry: Option<Stage>,
}

// == Job ==

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Scheduled,
    Assigned,
    Preparing,
    Building,
    Completing,
    Completed,
    Rescheduled,
}

impl JobState {
    /// Completed and Rescheduled end a job instance's life.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Rescheduled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobResult {
    Passed,
    Failed,
    Cancelled,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInstance {
    pub id: i64,
    pub stage_id: i64,
    pub identifier: JobIdentifier,
    pub state: JobState,
    pub result: JobResult,
}

// == Pipeline ==

/// A pipeline run with the latest run of each of its stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineHistory {
    pub id: i64,
    pub identifier: PipelineIdentifier,
    pub comment: Option<String>,
    pub stages: Vec<Stage>,
}

impl PipelineHistory {
    pub fn is_any_stage_active(&self) -> bool {
        self.stages.iter().any(|stage| stage.state.is_active())
    }
}

/// Revision of one material a pipeline run was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MaterialRevision {
    /// A run of an upstream pipeline
    #[serde(rename_all = "camelCase")]
    Dependency { pipeline_name: String, pipeline_counter: i32 },
    /// A commit of a source repository, named by the material fingerprint
    Scm { fingerprint: String, revision: String },
}

impl MaterialRevision {
    pub fn dependency(pipeline_name: impl Into<String>, pipeline_counter: i32) -> Self {
        MaterialRevision::Dependency {
            pipeline_name: pipeline_name.into(),
            pipeline_counter,
        }
    }

    pub fn scm(fingerprint: impl Into<String>, revision: impl Into<String>) -> Self {
        MaterialRevision::Scm {
            fingerprint: fingerprint.into(),
            revision: revision.into(),
        }
    }
}

/// Why a pipeline run was scheduled. Fixed once the run is saved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildCause {
    /// Set for runs forced by a user
    pub approved_by: Option<String>,
    pub revisions: Vec<MaterialRevision>,
}

impl BuildCause {
    pub fn manual(approved_by: impl Into<String>) -> Self {
        Self {
            approved_by: Some(approved_by.into()),
            revisions: Vec::new(),
        }
    }

    pub fn with_revisions(revisions: Vec<MaterialRevision>) -> Self {
        Self {
            approved_by: None,
            revisions,
        }
    }
}

/// Pause state of a pipeline. An unpaused pipeline has every field empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseInfo {
    pub paused: bool,
    pub pause_cause: Option<String>,
    pub paused_by: Option<String>,
    pub paused_at: Option<DateTime<Utc>>,
}

impl PauseInfo {
    pub fn not_paused() -> Self {
        Self::default()
    }
}

/// Pipeline runs that still have an active stage, grouped by lower-cased
/// pipeline name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivePipelines(BTreeMap<String, BTreeSet<i64>>);

impl ActivePipelines {
    pub fn from_rows(rows: impl IntoIterator<Item = (String, i64)>) -> Self {
        let mut grouped: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();
        for (name, id) in rows {
            grouped.entry(name.to_ascii_lowercase()).or_default().insert(id);
        }
        Self(grouped)
    }

    /// Active run ids of `pipeline_name`, oldest first.
    pub fn ids_for(&self, pipeline_name: &str) -> Vec<i64> {
        self.0
            .get(&pipeline_name.to_ascii_lowercase())
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn pipeline_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// == User ==

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub enabled: bool,
}
