use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS projects (
            id                      TEXT PRIMARY KEY,
            title                   TEXT NOT NULL,
            description             TEXT NOT NULL,
            category                TEXT NOT NULL,
            budget                  REAL NOT NULL CHECK (budget > 0),
            deadline                TEXT,
            skills                  TEXT NOT NULL DEFAULT '[]',
            client_id               TEXT NOT NULL,
            status                  TEXT NOT NULL DEFAULT 'open',
            selected_bid_id         TEXT,
            selected_developer_id   TEXT,
            bid_count               INTEGER NOT NULL DEFAULT 0,
            created_at              TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS bids (
            id              TEXT PRIMARY KEY,
            project_id      TEXT NOT NULL REFERENCES projects(id),
            developer_id    TEXT NOT NULL,
            amount          REAL NOT NULL CHECK (amount > 0),
            delivery_days   INTEGER NOT NULL CHECK (delivery_days > 0),
            proposal        TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'pending',
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (project_id, developer_id)
        );

        CREATE INDEX IF NOT EXISTS idx_bids_project
            ON bids(project_id, status);

        CREATE TABLE IF NOT EXISTS contracts (
            id              TEXT PRIMARY KEY,
            project_id      TEXT NOT NULL REFERENCES projects(id),
            bid_id          TEXT NOT NULL UNIQUE REFERENCES bids(id),
            client_id       TEXT NOT NULL,
            developer_id    TEXT NOT NULL,
            agreed_amount   REAL NOT NULL,
            delivery_days   INTEGER NOT NULL,
            status          TEXT NOT NULL DEFAULT 'active',
            escrow_status   TEXT NOT NULL DEFAULT 'pending',
            payment_ref     TEXT,
            room_id         TEXT NOT NULL,
            completed_at    TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_contracts_room
            ON contracts(room_id);

        CREATE TABLE IF NOT EXISTS timeline_entries (
            id              TEXT PRIMARY KEY,
            contract_id     TEXT NOT NULL REFERENCES contracts(id),
            author_id       TEXT NOT NULL,
            entry           TEXT NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_timeline_contract
            ON timeline_entries(contract_id, created_at);

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            room_id     TEXT NOT NULL,
            sender_id   TEXT NOT NULL,
            content     TEXT NOT NULL,
            kind        TEXT NOT NULL DEFAULT 'text',
            edited      INTEGER NOT NULL DEFAULT 0,
            deleted     INTEGER NOT NULL DEFAULT 0,
            seq         INTEGER NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (room_id, seq)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, seq);

        CREATE TABLE IF NOT EXISTS notifications (
            id              TEXT PRIMARY KEY,
            recipient_id    TEXT NOT NULL,
            kind            TEXT NOT NULL,
            message         TEXT NOT NULL,
            link            TEXT,
            read            INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_recipient
            ON notifications(recipient_id, read);

        CREATE TABLE IF NOT EXISTS earnings (
            developer_id    TEXT PRIMARY KEY,
            total           REAL NOT NULL DEFAULT 0
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
