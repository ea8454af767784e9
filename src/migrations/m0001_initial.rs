use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0001_initial")
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE jobs (
    job_id TEXT PRIMARY KEY NOT NULL,
    request_id TEXT NOT NULL,
    username TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'accepted',
    progress INTEGER NOT NULL DEFAULT 0,
    message TEXT,
    is_async INTEGER NOT NULL DEFAULT 1,
    ignore_errors INTEGER NOT NULL DEFAULT 0,
    num_input_granules INTEGER NOT NULL DEFAULT 0,
    granule_limit INTEGER NOT NULL DEFAULT 0,
    granules_produced INTEGER NOT NULL DEFAULT 0,
    failed_item_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE workflow_steps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
    step_index INTEGER NOT NULL,
    service_id TEXT NOT NULL,
    work_item_count INTEGER NOT NULL DEFAULT 0,
    has_aggregated_output INTEGER NOT NULL DEFAULT 0,
    is_producer INTEGER NOT NULL DEFAULT 0,
    is_complete INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (job_id, step_index)
)"#,
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE work_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
    step_index INTEGER NOT NULL,
    service_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'ready',
    scroll_id TEXT,
    catalog_location TEXT,
    results TEXT NOT NULL DEFAULT '[]',
    retries INTEGER NOT NULL DEFAULT 0,
    message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE user_work (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL,
    job_id TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
    service_id TEXT NOT NULL,
    is_async INTEGER NOT NULL DEFAULT 1,
    ready_count INTEGER NOT NULL DEFAULT 0,
    running_count INTEGER NOT NULL DEFAULT 0,
    last_worked TEXT NOT NULL,
    UNIQUE (job_id, service_id)
)"#,
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE job_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
    item_id INTEGER NOT NULL,
    href TEXT NOT NULL,
    title TEXT,
    rel TEXT NOT NULL DEFAULT 'data',
    mime_type TEXT,
    bbox TEXT,
    temporal_start TEXT,
    temporal_end TEXT,
    created_at TEXT NOT NULL
)"#,
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE job_errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
    url TEXT,
    message TEXT NOT NULL,
    created_at TEXT NOT NULL
)"#,
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            "CREATE INDEX idx_work_items_job_step_status ON work_items(job_id, step_index, status)",
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            "CREATE INDEX idx_work_items_service_status ON work_items(service_id, status)",
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            "CREATE INDEX idx_work_items_status_updated ON work_items(status, updated_at)",
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            "CREATE INDEX idx_user_work_service_ready ON user_work(service_id, ready_count)",
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            "CREATE INDEX idx_user_work_job ON user_work(job_id)",
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            "CREATE INDEX idx_job_links_job ON job_links(job_id)",
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            "CREATE INDEX idx_job_errors_job ON job_errors(job_id)",
        ))
}
