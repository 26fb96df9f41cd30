//! Invalidation Listeners
//!
//! Status-change events mapped to the cache keys they make stale. Each rule
//! derives its keys with the same `key_for_*` functions the read paths use,
//! so a rule can never miss the entry it is meant to drop.

use std::sync::Arc;

use tracing::debug;

use crate::cache::CacheStore;
use crate::dao::{JobDao, PipelineDao, StageDao};
use crate::domain::{JobInstance, Stage};

// == Status Event ==
#[derive(Debug, Clone)]
pub enum StatusEvent {
    /// A stage run was scheduled or changed state
    StageStatusChanged(Stage),
    /// A job changed state
    JobStatusChanged(JobInstance),
    PipelinePauseChanged { pipeline_name: String },
}

struct InvalidationRule {
    name: &'static str,
    /// Keys to remove; empty when the event is not one the rule handles
    derive: fn(&StatusEvent) -> Vec<String>,
}

const RULES: &[InvalidationRule] = &[
    // Stage lifecycle
    InvalidationRule {
        name: "stage.mostRecentId",
        derive: |event| on_stage(event, |stage| vec![StageDao::key_for_most_recent_id(stage.pipeline_name(), stage.name())]),
    },
    InvalidationRule {
        name: "stage.isStageActive",
        derive: |event| on_stage(event, |stage| vec![StageDao::key_for_is_stage_active(stage.pipeline_name(), stage.name())]),
    },
    InvalidationRule {
        name: "stage.allStagesOfPipeline",
        derive: |event| {
            on_stage(event, |stage| {
                let id = &stage.identifier;
                vec![StageDao::key_for_all_stages(&id.pipeline_name, id.pipeline_counter, &id.stage_name)]
            })
        },
    },
    InvalidationRule {
        name: "stage.stageRunIdentifier",
        derive: |event| {
            on_stage(event, |stage| {
                let id = &stage.identifier;
                vec![StageDao::key_for_stage_runs(&id.pipeline_name, id.pipeline_counter, &id.stage_name)]
            })
        },
    },
    InvalidationRule {
        name: "stage.stageById",
        derive: |event| on_stage(event, |stage| vec![StageDao::key_for_stage_by_id(stage.id)]),
    },
    InvalidationRule {
        name: "stage.latestStageInstances",
        derive: |event| on_stage(event, |_| vec![StageDao::key_for_latest_stage_instances()]),
    },
    InvalidationRule {
        name: "stage.history",
        derive: |event| {
            on_stage(event, |stage| {
                vec![
                    StageDao::key_for_stage_histories(stage.pipeline_name(), stage.name()),
                    StageDao::key_for_stage_count(stage.pipeline_name(), stage.name()),
                    StageDao::key_for_stage_offsets(stage.pipeline_name(), stage.name()),
                ]
            })
        },
    },
    InvalidationRule {
        name: "stage.totalStageCountForChart",
        derive: |event| match event {
            StatusEvent::StageStatusChanged(stage) if stage.state.is_completed() => {
                vec![StageDao::key_for_stage_count_for_chart(stage.pipeline_name(), stage.name())]
            }
            _ => Vec::new(),
        },
    },
    // Pipeline views over stages
    InvalidationRule {
        name: "pipeline.historyById",
        derive: |event| on_stage(event, |stage| vec![PipelineDao::key_for_pipeline_history(stage.pipeline_id)]),
    },
    InvalidationRule {
        name: "pipeline.historyByCounter",
        derive: |event| {
            on_stage(event, |stage| {
                vec![PipelineDao::key_for_pipeline_history_by_counter(
                    stage.pipeline_name(),
                    stage.identifier.pipeline_counter,
                )]
            })
        },
    },
    InvalidationRule {
        name: "pipeline.historyPages",
        derive: |event| on_stage(event, |stage| vec![PipelineDao::key_for_history_pages(stage.pipeline_name())]),
    },
    InvalidationRule {
        name: "pipeline.latestPassedStage",
        derive: |event| {
            on_stage(event, |stage| vec![PipelineDao::key_for_latest_passed_stage(stage.pipeline_id, stage.name())])
        },
    },
    InvalidationRule {
        name: "pipeline.activePipelines",
        derive: |event| on_stage(event, |_| vec![PipelineDao::key_for_active_pipelines()]),
    },
    // Job lifecycle, terminal states only
    InvalidationRule {
        name: "job.jobById",
        derive: |event| on_finished_job(event, |job| vec![JobDao::key_for_job_by_id(job.id)]),
    },
    InvalidationRule {
        name: "job.stageById",
        derive: |event| on_finished_job(event, |job| vec![StageDao::key_for_stage_by_id(job.stage_id)]),
    },
    InvalidationRule {
        name: "job.allStagesOfPipeline",
        derive: |event| {
            on_finished_job(event, |job| {
                let id = &job.identifier;
                vec![StageDao::key_for_all_stages(&id.pipeline_name, id.pipeline_counter, &id.stage_name)]
            })
        },
    },
    InvalidationRule {
        name: "job.stageRunIdentifier",
        derive: |event| {
            on_finished_job(event, |job| {
                let id = &job.identifier;
                vec![StageDao::key_for_stage_runs(&id.pipeline_name, id.pipeline_counter, &id.stage_name)]
            })
        },
    },
    InvalidationRule {
        name: "job.latestCompletedJobs",
        derive: |event| {
            on_finished_job(event, |job| {
                let id = &job.identifier;
                vec![JobDao::key_for_latest_completed_jobs(&id.pipeline_name, &id.stage_name, &id.job_name)]
            })
        },
    },
    InvalidationRule {
        name: "job.historyCount",
        derive: |event| {
            on_finished_job(event, |job| {
                let id = &job.identifier;
                vec![JobDao::key_for_job_history_count(&id.pipeline_name, &id.stage_name, &id.job_name)]
            })
        },
    },
    // Pause state
    InvalidationRule {
        name: "pipeline.pauseState",
        derive: |event| match event {
            StatusEvent::PipelinePauseChanged { pipeline_name } => vec![PipelineDao::key_for_pause_state(pipeline_name)],
            _ => Vec::new(),
        },
    },
];

fn on_stage(event: &StatusEvent, keys: impl FnOnce(&Stage) -> Vec<String>) -> Vec<String> {
    match event {
        StatusEvent::StageStatusChanged(stage) => keys(stage),
        _ => Vec::new(),
    }
}

fn on_finished_job(event: &StatusEvent, keys: impl FnOnce(&JobInstance) -> Vec<String>) -> Vec<String> {
    match event {
        StatusEvent::JobStatusChanged(job) if job.state.is_terminal() => keys(job),
        _ => Vec::new(),
    }
}

// == Invalidation Listeners ==
#[derive(Debug, Clone)]
pub struct InvalidationListeners {
    cache: Arc<CacheStore>,
}

impl InvalidationListeners {
    pub fn new(cache: Arc<CacheStore>) -> Self {
        Self { cache }
    }

    /// Runs every rule against `event` and removes the keys they derive.
    /// Returns the number of entries actually removed.
    pub fn dispatch(&self, event: &StatusEvent) -> usize {
        let mut removed = 0;
        for rule in RULES {
            for key in (rule.derive)(event) {
                if self.cache.remove(&key) {
                    debug!("{} evicted {}", rule.name, key);
                    removed += 1;
                }
            }
        }
        removed
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        RULES.iter().map(|rule| rule.name).collect()
    }
}
