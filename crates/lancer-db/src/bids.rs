use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::models::BidRow;
use crate::{Database, OptionalExt, is_unique_violation, projects::query_project};
use lancer_types::models::{Bid, Contract, ContractStatus, EscrowStatus};

/// Result of the accept-bid transaction. The caller pre-checks ownership;
/// the non-`Accepted` variants close the race window between that check and
/// the conditional writes here.
pub enum AcceptOutcome {
    Accepted(Contract),
    BidNotFound,
    BidNotPending,
    ProjectNotOpen,
}

impl Database {
    /// Insert a bid and bump the project's denormalized bid counter in one
    /// transaction. Returns false if the (project, developer) pair already
    /// has a bid; the UNIQUE constraint is the authoritative check, the
    /// engine's pre-read only exists for a friendlier fast path.
    pub fn insert_bid(&self, bid: &Bid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let inserted = tx.execute(
                "INSERT INTO bids
                    (id, project_id, developer_id, amount, delivery_days,
                     proposal, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    bid.id,
                    bid.project_id,
                    bid.developer_id,
                    bid.amount,
                    bid.delivery_days,
                    bid.proposal,
                    bid.status.as_str(),
                    bid.created_at.to_rfc3339(),
                ],
            );

            match inserted {
                Ok(_) => {}
                Err(ref e) if is_unique_violation(e) => return Ok(false),
                Err(e) => return Err(e.into()),
            }

            // Atomic increment, never read-modify-write
            tx.execute(
                "UPDATE projects SET bid_count = bid_count + 1 WHERE id = ?1",
                [&bid.project_id],
            )?;

            tx.commit()?;
            Ok(true)
        })
    }

    pub fn get_bid(&self, id: &str) -> Result<Option<Bid>> {
        let row = self.with_conn(|conn| query_bid(conn, id))?;
        row.map(BidRow::into_model).transpose()
    }

    pub fn list_bids(&self, project_id: &str) -> Result<Vec<Bid>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, developer_id, amount, delivery_days,
                        proposal, status, created_at
                 FROM bids WHERE project_id = ?1 ORDER BY created_at",
            )?;

            let rows = stmt
                .query_map([project_id], map_bid_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(BidRow::into_model).collect()
    }

    /// The single logical transaction behind bid acceptance: mark the winner,
    /// reject its siblings, move the project to in_progress and create the
    /// contract row. All-or-nothing; the conditional project update is what
    /// serializes concurrent accepts (the loser sees zero rows affected).
    pub fn accept_bid_tx(
        &self,
        bid_id: &str,
        contract_id: &str,
        now: DateTime<Utc>,
        derive_room: impl FnOnce(&str, &str, &str) -> String,
    ) -> Result<AcceptOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let bid = match query_bid(&tx, bid_id)? {
                Some(row) => row.into_model()?,
                None => return Ok(AcceptOutcome::BidNotFound),
            };

            let project = match query_project(&tx, &bid.project_id)? {
                Some(row) => row.into_model()?,
                None => return Ok(AcceptOutcome::BidNotFound),
            };

            let moved = tx.execute(
                "UPDATE projects
                 SET status = 'in_progress', selected_bid_id = ?1, selected_developer_id = ?2
                 WHERE id = ?3 AND status = 'open'",
                rusqlite::params![bid.id, bid.developer_id, project.id],
            )?;
            if moved == 0 {
                return Ok(AcceptOutcome::ProjectNotOpen);
            }

            let accepted = tx.execute(
                "UPDATE bids SET status = 'accepted' WHERE id = ?1 AND status = 'pending'",
                [&bid.id],
            )?;
            if accepted == 0 {
                // Dropping the uncommitted transaction rolls the project back
                return Ok(AcceptOutcome::BidNotPending);
            }

            tx.execute(
                "UPDATE bids SET status = 'rejected'
                 WHERE project_id = ?1 AND id <> ?2 AND status = 'pending'",
                rusqlite::params![bid.project_id, bid.id],
            )?;

            let room_id = derive_room(&project.client_id, &bid.developer_id, &project.id);

            tx.execute(
                "INSERT INTO contracts
                    (id, project_id, bid_id, client_id, developer_id, agreed_amount,
                     delivery_days, status, escrow_status, room_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', 'pending', ?8, ?9)",
                rusqlite::params![
                    contract_id,
                    bid.project_id,
                    bid.id,
                    project.client_id,
                    bid.developer_id,
                    bid.amount,
                    bid.delivery_days,
                    room_id,
                    now.to_rfc3339(),
                ],
            )?;

            tx.commit()?;

            Ok(AcceptOutcome::Accepted(Contract {
                id: contract_id.to_string(),
                project_id: bid.project_id,
                bid_id: bid.id,
                client_id: project.client_id,
                developer_id: bid.developer_id,
                agreed_amount: bid.amount,
                delivery_days: bid.delivery_days,
                status: ContractStatus::Active,
                escrow_status: EscrowStatus::Pending,
                payment_ref: None,
                room_id,
                completed_at: None,
                created_at: now,
            }))
        })
    }

    /// Conditional pending -> rejected. Returns the rows affected so the
    /// engine can distinguish "already rejected" (no-op) from a real change.
    pub fn reject_bid(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE bids SET status = 'rejected' WHERE id = ?1 AND status = 'pending'",
                [id],
            )?;
            Ok(n == 1)
        })
    }

    pub fn count_accepted_bids(&self, project_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM bids WHERE project_id = ?1 AND status = 'accepted'",
                [project_id],
                |row| row.get(0),
            )?;
            Ok(n)
        })
    }
}

fn map_bid_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BidRow> {
    Ok(BidRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        developer_id: row.get(2)?,
        amount: row.get(3)?,
        delivery_days: row.get(4)?,
        proposal: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub(crate) fn query_bid(conn: &Connection, id: &str) -> Result<Option<BidRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, project_id, developer_id, amount, delivery_days,
                proposal, status, created_at
         FROM bids WHERE id = ?1",
    )?;

    let row = stmt.query_row([id], map_bid_row).optional()?;
    Ok(row)
}
