use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0002_maintenance_locks")
        .depends_on(&["0001_initial"])
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE maintenance_locks (
    name TEXT PRIMARY KEY NOT NULL,
    locked_by TEXT NOT NULL,
    locked_until TEXT NOT NULL
)"#,
        ))
}
