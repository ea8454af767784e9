//! Workflow step model: one stage in a job's processing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stage of a job's pipeline, bound to a logical backend service.
///
/// Steps are dense and ordered: `step_index` runs from 1 to N. Step 1 is the
/// catalog producer unless the configured chain marks it otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: i32,
    pub job_id: String,
    pub step_index: i32,
    pub service_id: String,
    /// Number of work items materialized for this step so far.
    pub work_item_count: i32,
    /// When true, the step consumes every prior-step output as one catalog.
    pub has_aggregated_output: bool,
    /// When true, the step's items paginate over an external granule source
    /// under the job's granule budget.
    pub is_producer: bool,
    /// True once no further items will be created and all items are terminal.
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
