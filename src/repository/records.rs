//! Diesel row records for database tables.
//!
//! These models provide compile-time type checking for database operations
//! and convert into the domain models in `crate::models`.

use diesel::prelude::*;

use super::{parse_datetime, parse_datetime_opt};
use crate::models::{
    Job, JobError, JobLink, JobStatus, UserWork, WorkItem, WorkItemStatus, WorkflowStep,
};
use crate::schema;

/// Job record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::jobs)]
#[diesel(primary_key(job_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobRecord {
    pub job_id: String,
    pub request_id: String,
    pub username: String,
    pub status: String,
    pub progress: i32,
    pub message: Option<String>,
    pub is_async: i32,
    pub ignore_errors: i32,
    pub num_input_granules: i32,
    pub granule_limit: i32,
    pub granules_produced: i32,
    pub failed_item_count: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl From<JobRecord> for Job {
    fn from(record: JobRecord) -> Self {
        Job {
            job_id: record.job_id,
            request_id: record.request_id,
            username: record.username,
            status: JobStatus::from_str(&record.status).unwrap_or(JobStatus::Failed),
            progress: record.progress,
            message: record.message,
            is_async: record.is_async != 0,
            ignore_errors: record.ignore_errors != 0,
            num_input_granules: record.num_input_granules,
            granule_limit: record.granule_limit,
            granules_produced: record.granules_produced,
            failed_item_count: record.failed_item_count,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

/// Workflow step record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::workflow_steps)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StepRecord {
    pub id: i32,
    pub job_id: String,
    pub step_index: i32,
    pub service_id: String,
    pub work_item_count: i32,
    pub has_aggregated_output: i32,
    pub is_producer: i32,
    pub is_complete: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl From<StepRecord> for WorkflowStep {
    fn from(record: StepRecord) -> Self {
        WorkflowStep {
            id: record.id,
            job_id: record.job_id,
            step_index: record.step_index,
            service_id: record.service_id,
            work_item_count: record.work_item_count,
            has_aggregated_output: record.has_aggregated_output != 0,
            is_producer: record.is_producer != 0,
            is_complete: record.is_complete != 0,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

/// Work item record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::work_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ItemRecord {
    pub id: i32,
    pub job_id: String,
    pub step_index: i32,
    pub service_id: String,
    pub status: String,
    pub scroll_id: Option<String>,
    pub catalog_location: Option<String>,
    pub results: String,
    pub retries: i32,
    pub message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ItemRecord> for WorkItem {
    fn from(record: ItemRecord) -> Self {
        WorkItem {
            id: record.id,
            job_id: record.job_id,
            step_index: record.step_index,
            service_id: record.service_id,
            status: WorkItemStatus::from_str(&record.status).unwrap_or(WorkItemStatus::Canceled),
            scroll_id: record.scroll_id,
            catalog_location: record.catalog_location,
            results: serde_json::from_str(&record.results).unwrap_or_default(),
            retries: record.retries,
            message: record.message,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

/// User work record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::user_work)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserWorkRecord {
    pub id: i32,
    pub username: String,
    pub job_id: String,
    pub service_id: String,
    pub is_async: i32,
    pub ready_count: i32,
    pub running_count: i32,
    pub last_worked: String,
}

impl From<UserWorkRecord> for UserWork {
    fn from(record: UserWorkRecord) -> Self {
        UserWork {
            id: record.id,
            username: record.username,
            job_id: record.job_id,
            service_id: record.service_id,
            is_async: record.is_async != 0,
            ready_count: record.ready_count,
            running_count: record.running_count,
            last_worked: parse_datetime(&record.last_worked),
        }
    }
}

/// Job link record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::job_links)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LinkRecord {
    pub id: i32,
    pub job_id: String,
    pub item_id: i32,
    pub href: String,
    pub title: Option<String>,
    pub rel: String,
    pub mime_type: Option<String>,
    pub bbox: Option<String>,
    pub temporal_start: Option<String>,
    pub temporal_end: Option<String>,
    pub created_at: String,
}

impl From<LinkRecord> for JobLink {
    fn from(record: LinkRecord) -> Self {
        JobLink {
            id: record.id,
            job_id: record.job_id,
            item_id: record.item_id,
            href: record.href,
            title: record.title,
            rel: record.rel,
            mime_type: record.mime_type,
            bbox: record
                .bbox
                .and_then(|raw| serde_json::from_str::<[f64; 4]>(&raw).ok()),
            temporal_start: parse_datetime_opt(record.temporal_start),
            temporal_end: parse_datetime_opt(record.temporal_end),
            created_at: parse_datetime(&record.created_at),
        }
    }
}

/// Job error record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::job_errors)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ErrorRecord {
    pub id: i32,
    pub job_id: String,
    pub url: Option<String>,
    pub message: String,
    pub created_at: String,
}

impl From<ErrorRecord> for JobError {
    fn from(record: ErrorRecord) -> Self {
        JobError {
            id: record.id,
            job_id: record.job_id,
            url: record.url,
            message: record.message,
            created_at: parse_datetime(&record.created_at),
        }
    }
}
