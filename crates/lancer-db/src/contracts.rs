use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::models::{ContractRow, TimelineRow};
use crate::{Database, OptionalExt};
use lancer_types::models::{Contract, TimelineEntry};

impl Database {
    pub fn get_contract(&self, id: &str) -> Result<Option<Contract>> {
        let row = self.with_conn(|conn| query_contract(conn, "id", id))?;
        row.map(ContractRow::into_model).transpose()
    }

    pub fn get_contract_by_room(&self, room_id: &str) -> Result<Option<Contract>> {
        let row = self.with_conn(|conn| query_contract(conn, "room_id", room_id))?;
        row.map(ContractRow::into_model).transpose()
    }

    /// Conditional escrow transition. The WHERE clause on the expected
    /// current state is the serialization point: of two concurrent callers
    /// holding the same precheck, only one sees a row affected. The escrow
    /// additionally only moves while the contract status is one of
    /// `contract_statuses`, so a frozen (disputed, cancelled) contract
    /// cannot have its money moved.
    pub fn transition_escrow(
        &self,
        id: &str,
        from: &str,
        to: &str,
        payment_ref: Option<&str>,
        contract_statuses: &[&str],
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let placeholders: Vec<String> = (5..5 + contract_statuses.len())
                .map(|i| format!("?{}", i))
                .collect();
            let sql = format!(
                "UPDATE contracts
                 SET escrow_status = ?1, payment_ref = COALESCE(?2, payment_ref)
                 WHERE id = ?3 AND escrow_status = ?4 AND status IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<&dyn rusqlite::types::ToSql> =
                vec![&to, &payment_ref, &id, &from];
            params.extend(
                contract_statuses
                    .iter()
                    .map(|s| s as &dyn rusqlite::types::ToSql),
            );

            let n = stmt.execute(params.as_slice())?;
            Ok(n == 1)
        })
    }

    /// Refund the escrow and cancel the contract in one transaction, both
    /// conditional on the contract still being active. All-or-nothing: an
    /// interleaved dispute makes the whole call a no-op, so a refunded
    /// escrow can never be observed on a non-cancelled contract.
    pub fn cancel_contract_tx(&self, id: &str, escrow_from: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let refunded = tx.execute(
                "UPDATE contracts SET escrow_status = 'refunded'
                 WHERE id = ?1 AND escrow_status = ?2 AND status = 'active'",
                rusqlite::params![id, escrow_from],
            )?;
            if refunded == 0 {
                return Ok(false);
            }

            let cancelled = tx.execute(
                "UPDATE contracts SET status = 'cancelled'
                 WHERE id = ?1 AND status = 'active'",
                [id],
            )?;
            if cancelled == 0 {
                // Dropping the uncommitted transaction rolls the refund back
                return Ok(false);
            }

            tx.commit()?;
            Ok(true)
        })
    }

    /// active -> completed, guarded on escrow being funded or released.
    pub fn complete_contract(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE contracts SET status = 'completed', completed_at = ?1
                 WHERE id = ?2 AND status = 'active'
                   AND escrow_status IN ('funded', 'released')",
                rusqlite::params![now.to_rfc3339(), id],
            )?;
            Ok(n == 1)
        })
    }

    /// Conditional status change used for dispute and cancellation.
    pub fn transition_contract(&self, id: &str, from: &str, to: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE contracts SET status = ?1 WHERE id = ?2 AND status = ?3",
                rusqlite::params![to, id, from],
            )?;
            Ok(n == 1)
        })
    }

    pub fn count_contracts_for_project(&self, project_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM contracts WHERE project_id = ?1",
                [project_id],
                |row| row.get(0),
            )?;
            Ok(n)
        })
    }

    // -- Timeline --

    pub fn insert_timeline_entry(&self, entry: &TimelineEntry) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO timeline_entries (id, contract_id, author_id, entry, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    entry.id,
                    entry.contract_id,
                    entry.author_id,
                    entry.entry,
                    entry.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_timeline(&self, contract_id: &str) -> Result<Vec<TimelineEntry>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, contract_id, author_id, entry, created_at
                 FROM timeline_entries WHERE contract_id = ?1
                 ORDER BY created_at, rowid",
            )?;

            let rows = stmt
                .query_map([contract_id], |row| {
                    Ok(TimelineRow {
                        id: row.get(0)?,
                        contract_id: row.get(1)?,
                        author_id: row.get(2)?,
                        entry: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(TimelineRow::into_model).collect()
    }

    // -- Earnings --

    /// Upsert increment on the developer's lifetime earnings. Atomic at the
    /// statement level, safe to retry.
    pub fn add_earnings(&self, developer_id: &str, amount: f64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO earnings (developer_id, total) VALUES (?1, ?2)
                 ON CONFLICT(developer_id) DO UPDATE SET total = total + excluded.total",
                rusqlite::params![developer_id, amount],
            )?;
            Ok(())
        })
    }

    pub fn get_earnings(&self, developer_id: &str) -> Result<f64> {
        self.with_conn(|conn| {
            let total = conn
                .query_row(
                    "SELECT total FROM earnings WHERE developer_id = ?1",
                    [developer_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(total.unwrap_or(0.0))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lancer_types::models::{ContractStatus, EscrowStatus};

    fn seed_contract(db: &Database, id: &str) {
        db.with_conn(|conn| {
            conn.execute_batch(
                "INSERT INTO projects (id, title, description, category, budget, client_id)
                     VALUES ('p1', 't', 'd', 'web', 500.0, 'client');
                 INSERT INTO bids (id, project_id, developer_id, amount, delivery_days, proposal)
                     VALUES ('b1', 'p1', 'dev', 450.0, 5, 'x');",
            )?;
            conn.execute(
                "INSERT INTO contracts (id, project_id, bid_id, client_id, developer_id,
                                        agreed_amount, delivery_days, room_id)
                 VALUES (?1, 'p1', 'b1', 'client', 'dev', 450.0, 5, 'room-1')",
                [id],
            )?;
            Ok(())
        })
        .unwrap();
    }

    const ACTIVE: &[&str] = &["active"];

    #[test]
    fn escrow_status_never_regresses() {
        let db = Database::open_in_memory().unwrap();
        seed_contract(&db, "c1");

        assert!(db.transition_escrow("c1", "pending", "funded", Some("ref"), ACTIVE).unwrap());
        assert!(db.transition_escrow("c1", "funded", "released", None, ACTIVE).unwrap());

        // No path leads back out of released
        assert!(!db.transition_escrow("c1", "released", "funded", None, ACTIVE).unwrap());
        assert!(!db.transition_escrow("c1", "pending", "funded", None, ACTIVE).unwrap());
        assert!(!db.transition_escrow("c1", "funded", "refunded", None, ACTIVE).unwrap());

        let contract = db.get_contract("c1").unwrap().unwrap();
        assert_eq!(contract.escrow_status, EscrowStatus::Released);
        assert_eq!(contract.payment_ref.as_deref(), Some("ref"));
    }

    #[test]
    fn escrow_is_frozen_with_the_contract() {
        let db = Database::open_in_memory().unwrap();
        seed_contract(&db, "c1");
        db.transition_escrow("c1", "pending", "funded", Some("ref"), ACTIVE).unwrap();

        assert!(db.transition_contract("c1", "active", "disputed").unwrap());

        // A disputed contract's escrow cannot move, in either direction
        assert!(!db
            .transition_escrow("c1", "funded", "released", None, &["active", "completed"])
            .unwrap());
        assert!(!db.transition_escrow("c1", "funded", "refunded", None, ACTIVE).unwrap());

        let contract = db.get_contract("c1").unwrap().unwrap();
        assert_eq!(contract.escrow_status, EscrowStatus::Funded);
    }

    #[test]
    fn cancellation_refunds_and_cancels_atomically() {
        let db = Database::open_in_memory().unwrap();
        seed_contract(&db, "c1");

        assert!(db.cancel_contract_tx("c1", "pending").unwrap());
        let contract = db.get_contract("c1").unwrap().unwrap();
        assert_eq!(contract.status, ContractStatus::Cancelled);
        assert_eq!(contract.escrow_status, EscrowStatus::Refunded);

        // Already cancelled; a retry is a no-op
        assert!(!db.cancel_contract_tx("c1", "refunded").unwrap());
    }

    #[test]
    fn cancellation_is_a_noop_on_a_disputed_contract() {
        let db = Database::open_in_memory().unwrap();
        seed_contract(&db, "c1");
        db.transition_escrow("c1", "pending", "funded", Some("ref"), ACTIVE).unwrap();
        db.transition_contract("c1", "active", "disputed").unwrap();

        assert!(!db.cancel_contract_tx("c1", "funded").unwrap());

        // Neither half of the cancellation took effect
        let contract = db.get_contract("c1").unwrap().unwrap();
        assert_eq!(contract.status, ContractStatus::Disputed);
        assert_eq!(contract.escrow_status, EscrowStatus::Funded);
    }

    #[test]
    fn completion_requires_funded_escrow_at_the_store() {
        let db = Database::open_in_memory().unwrap();
        seed_contract(&db, "c1");

        let now = chrono::Utc::now();
        assert!(!db.complete_contract("c1", now).unwrap());

        db.transition_escrow("c1", "pending", "funded", None, ACTIVE).unwrap();
        assert!(db.complete_contract("c1", now).unwrap());
        // Already completed; a retry affects nothing
        assert!(!db.complete_contract("c1", now).unwrap());
    }
}

fn query_contract(conn: &Connection, column: &str, value: &str) -> Result<Option<ContractRow>> {
    // `column` is a compile-time constant at both call sites, never user input
    let sql = format!(
        "SELECT id, project_id, bid_id, client_id, developer_id, agreed_amount,
                delivery_days, status, escrow_status, payment_ref, room_id,
                completed_at, created_at
         FROM contracts WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(ContractRow {
                id: row.get(0)?,
                project_id: row.get(1)?,
                bid_id: row.get(2)?,
                client_id: row.get(3)?,
                developer_id: row.get(4)?,
                agreed_amount: row.get(5)?,
                delivery_days: row.get(6)?,
                status: row.get(7)?,
                escrow_status: row.get(8)?,
                payment_ref: row.get(9)?,
                room_id: row.get(10)?,
                completed_at: row.get(11)?,
                created_at: row.get(12)?,
            })
        })
        .optional()?;

    Ok(row)
}
