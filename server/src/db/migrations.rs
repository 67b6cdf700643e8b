use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: Subscription sets and broker outbox

CREATE TABLE set_members (
    set_key TEXT NOT NULL,
    member TEXT NOT NULL,
    added_at TEXT NOT NULL,
    PRIMARY KEY (set_key, member)
);

CREATE TABLE broker_outbox (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    payload BLOB NOT NULL,
    enqueued_at TEXT NOT NULL
);

CREATE INDEX idx_broker_outbox_queue ON broker_outbox(queue, id);
CREATE INDEX idx_broker_outbox_enqueued ON broker_outbox(enqueued_at);
",
        ),
    ])
}
