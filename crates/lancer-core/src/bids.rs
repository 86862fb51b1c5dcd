use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use lancer_db::Database;
use lancer_db::bids::AcceptOutcome;
use lancer_types::models::{Bid, BidStatus, Contract, NotificationKind, ProjectStatus};

use crate::mailer::Mailer;
use crate::notify::Notifier;
use crate::{Error, Result, rooms, run_blocking};

/// The state machine governing a project's bids: submission,
/// single-acceptance, rejection cascade and contract creation.
#[derive(Clone)]
pub struct BidEngine {
    db: Arc<Database>,
    notifier: Notifier,
    mailer: Arc<dyn Mailer>,
}

impl BidEngine {
    pub fn new(db: Arc<Database>, notifier: Notifier, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            db,
            notifier,
            mailer,
        }
    }

    pub async fn submit_bid(
        &self,
        project_id: &str,
        developer_id: &str,
        amount: f64,
        delivery_days: i64,
        proposal: String,
    ) -> Result<Bid> {
        if !(amount > 0.0) {
            return Err(Error::Validation("amount must be positive"));
        }
        if delivery_days <= 0 {
            return Err(Error::Validation("delivery_days must be positive"));
        }
        if proposal.trim().is_empty() {
            return Err(Error::Validation("proposal must not be empty"));
        }

        let db = self.db.clone();
        let pid = project_id.to_string();
        let project = run_blocking(move || Ok(db.get_project(&pid)?))
            .await?
            .ok_or(Error::NotFound)?;

        if project.status != ProjectStatus::Open {
            return Err(Error::InvalidState("project is not open for bids"));
        }
        if project.client_id == developer_id {
            return Err(Error::Forbidden);
        }

        let bid = Bid {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            developer_id: developer_id.to_string(),
            amount,
            delivery_days,
            proposal,
            status: BidStatus::Pending,
            created_at: Utc::now(),
        };

        let db = self.db.clone();
        let row = bid.clone();
        // Insert + bid_count increment are one transaction; the UNIQUE
        // constraint closes the duplicate race behind the precheck
        let inserted = run_blocking(move || Ok(db.insert_bid(&row)?)).await?;
        if !inserted {
            return Err(Error::DuplicateBid);
        }

        self.notifier
            .notify(
                &project.client_id,
                NotificationKind::Bid,
                format!("New bid of ${:.2} on \"{}\"", amount, project.title),
                Some(format!("/projects/{}", project.id)),
            )
            .await;

        Ok(bid)
    }

    /// Accept one bid: reject every sibling, move the project to
    /// in_progress and create the contract, all in a single store
    /// transaction. Of two concurrent accepts on the same project, exactly
    /// one commits; the other observes the project no longer open.
    pub async fn accept_bid(&self, bid_id: &str, acting_id: &str) -> Result<(Bid, Contract)> {
        let db = self.db.clone();
        let id = bid_id.to_string();
        let bid = run_blocking(move || Ok(db.get_bid(&id)?))
            .await?
            .ok_or(Error::NotFound)?;

        let db = self.db.clone();
        let pid = bid.project_id.clone();
        let project = run_blocking(move || Ok(db.get_project(&pid)?))
            .await?
            .ok_or(Error::NotFound)?;

        if project.client_id != acting_id {
            return Err(Error::Forbidden);
        }
        if project.status != ProjectStatus::Open {
            return Err(Error::InvalidState("project is not open"));
        }

        let db = self.db.clone();
        let id = bid_id.to_string();
        let contract_id = Uuid::new_v4().to_string();
        let cid = contract_id.clone();
        let outcome = run_blocking(move || {
            Ok(db.accept_bid_tx(&id, &cid, Utc::now(), rooms::room_id)?)
        })
        .await?;

        let contract = match outcome {
            AcceptOutcome::Accepted(contract) => contract,
            AcceptOutcome::BidNotFound => return Err(Error::NotFound),
            AcceptOutcome::BidNotPending => {
                return Err(Error::InvalidState("bid is no longer pending"));
            }
            AcceptOutcome::ProjectNotOpen => {
                return Err(Error::InvalidState("project is not open"));
            }
        };

        info!(
            bid = bid_id,
            contract = %contract.id,
            project = %contract.project_id,
            "bid accepted"
        );

        self.notifier
            .notify(
                &contract.developer_id,
                NotificationKind::BidAccepted,
                format!("Your bid on \"{}\" was accepted", project.title),
                Some(format!("/contracts/{}", contract.id)),
            )
            .await;

        self.mailer.send(
            &contract.developer_id,
            "Your bid was accepted",
            &format!(
                "<p>Your bid of ${:.2} on \"{}\" was accepted.</p>",
                contract.agreed_amount, project.title
            ),
        );

        let accepted = Bid {
            status: BidStatus::Accepted,
            ..bid
        };
        Ok((accepted, contract))
    }

    /// Reject a pending bid. Rejecting an already-rejected bid is a no-op
    /// so client retries stay safe.
    pub async fn reject_bid(&self, bid_id: &str, acting_id: &str) -> Result<()> {
        let db = self.db.clone();
        let id = bid_id.to_string();
        let bid = run_blocking(move || Ok(db.get_bid(&id)?))
            .await?
            .ok_or(Error::NotFound)?;

        let db = self.db.clone();
        let pid = bid.project_id.clone();
        let project = run_blocking(move || Ok(db.get_project(&pid)?))
            .await?
            .ok_or(Error::NotFound)?;

        if project.client_id != acting_id {
            return Err(Error::Forbidden);
        }

        match bid.status {
            BidStatus::Rejected => return Ok(()),
            BidStatus::Accepted => {
                return Err(Error::InvalidState("bid was already accepted"));
            }
            BidStatus::Pending => {}
        }

        let db = self.db.clone();
        let id = bid_id.to_string();
        let changed = run_blocking(move || Ok(db.reject_bid(&id)?)).await?;
        if !changed {
            // Raced with another transition; a concurrent reject is fine,
            // a concurrent accept is not
            let db = self.db.clone();
            let id = bid_id.to_string();
            let bid = run_blocking(move || Ok(db.get_bid(&id)?))
                .await?
                .ok_or(Error::NotFound)?;
            if bid.status != BidStatus::Rejected {
                return Err(Error::InvalidState("bid was already accepted"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{env, seed_project};
    use lancer_types::models::EscrowStatus;

    #[tokio::test]
    async fn submit_creates_pending_bid_and_increments_count() {
        let env = env();
        let project = seed_project(&env, "client").await;

        let bid = env
            .bids
            .submit_bid(&project.id, "dev1", 450.0, 5, "I can build this".into())
            .await
            .unwrap();
        assert_eq!(bid.status, BidStatus::Pending);

        let (project, bids) = env.projects.get_project(&project.id).await.unwrap();
        assert_eq!(project.bid_count, 1);
        assert_eq!(bids.len(), 1);
    }

    #[tokio::test]
    async fn owner_cannot_bid_on_own_project() {
        let env = env();
        let project = seed_project(&env, "client").await;

        let err = env
            .bids
            .submit_bid(&project.id, "client", 450.0, 5, "myself".into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden));
    }

    #[tokio::test]
    async fn duplicate_bid_is_rejected_and_count_stays_consistent() {
        let env = env();
        let project = seed_project(&env, "client").await;

        env.bids
            .submit_bid(&project.id, "dev1", 450.0, 5, "first".into())
            .await
            .unwrap();
        let err = env
            .bids
            .submit_bid(&project.id, "dev1", 400.0, 4, "second".into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateBid));

        let (project, bids) = env.projects.get_project(&project.id).await.unwrap();
        assert_eq!(bids.len(), 1);
        assert_eq!(project.bid_count, 1);
    }

    #[tokio::test]
    async fn accept_rejects_siblings_and_creates_one_contract() {
        let env = env();
        let project = seed_project(&env, "client").await;

        let b1 = env
            .bids
            .submit_bid(&project.id, "dev1", 450.0, 5, "offer 1".into())
            .await
            .unwrap();
        let b2 = env
            .bids
            .submit_bid(&project.id, "dev2", 500.0, 3, "offer 2".into())
            .await
            .unwrap();

        let (accepted, contract) = env.bids.accept_bid(&b1.id, "client").await.unwrap();
        assert_eq!(accepted.status, BidStatus::Accepted);
        assert_eq!(contract.agreed_amount, 450.0);
        assert_eq!(contract.escrow_status, EscrowStatus::Pending);

        let (project, bids) = env.projects.get_project(&project.id).await.unwrap();
        assert_eq!(project.status, ProjectStatus::InProgress);
        assert_eq!(project.selected_bid_id.as_deref(), Some(b1.id.as_str()));
        let rejected = bids.iter().find(|b| b.id == b2.id).unwrap();
        assert_eq!(rejected.status, BidStatus::Rejected);

        assert_eq!(env.db.count_accepted_bids(&project.id).unwrap(), 1);
        assert_eq!(env.db.count_contracts_for_project(&project.id).unwrap(), 1);
    }

    #[tokio::test]
    async fn only_the_owning_client_can_accept() {
        let env = env();
        let project = seed_project(&env, "client").await;
        let bid = env
            .bids
            .submit_bid(&project.id, "dev1", 450.0, 5, "offer".into())
            .await
            .unwrap();

        let err = env.bids.accept_bid(&bid.id, "dev1").await.unwrap_err();
        assert!(matches!(err, Error::Forbidden));
    }

    #[tokio::test]
    async fn concurrent_accepts_on_same_project_serialize() {
        let env = env();
        let project = seed_project(&env, "client").await;

        let b1 = env
            .bids
            .submit_bid(&project.id, "dev1", 450.0, 5, "offer 1".into())
            .await
            .unwrap();
        let b2 = env
            .bids
            .submit_bid(&project.id, "dev2", 500.0, 3, "offer 2".into())
            .await
            .unwrap();

        let engine_a = env.bids.clone();
        let engine_b = env.bids.clone();
        let (id1, id2) = (b1.id.clone(), b2.id.clone());
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { engine_a.accept_bid(&id1, "client").await }),
            tokio::spawn(async move { engine_b.accept_bid(&id2, "client").await }),
        );
        let (r1, r2) = (r1.unwrap(), r2.unwrap());

        let successes = [&r1, &r2].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        let loser = if r1.is_err() { r1 } else { r2 };
        assert!(matches!(loser.unwrap_err(), Error::InvalidState(_)));

        assert_eq!(env.db.count_accepted_bids(&project.id).unwrap(), 1);
        assert_eq!(env.db.count_contracts_for_project(&project.id).unwrap(), 1);
    }

    #[tokio::test]
    async fn reject_is_idempotent() {
        let env = env();
        let project = seed_project(&env, "client").await;
        let bid = env
            .bids
            .submit_bid(&project.id, "dev1", 450.0, 5, "offer".into())
            .await
            .unwrap();

        env.bids.reject_bid(&bid.id, "client").await.unwrap();
        // A retry of the same reject is a no-op, not an error
        env.bids.reject_bid(&bid.id, "client").await.unwrap();

        let (_, bids) = env.projects.get_project(&project.id).await.unwrap();
        assert_eq!(bids[0].status, BidStatus::Rejected);
    }

    #[tokio::test]
    async fn submit_after_acceptance_is_invalid_state() {
        let env = env();
        let project = seed_project(&env, "client").await;
        let bid = env
            .bids
            .submit_bid(&project.id, "dev1", 450.0, 5, "offer".into())
            .await
            .unwrap();
        env.bids.accept_bid(&bid.id, "client").await.unwrap();

        let err = env
            .bids
            .submit_bid(&project.id, "dev3", 300.0, 2, "late".into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }
}
