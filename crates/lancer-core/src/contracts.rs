use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lancer_db::Database;
use lancer_escrow::{EscrowAdapter, HoldMetadata};
use lancer_types::models::{
    Contract, ContractStatus, EscrowStatus, NotificationKind, TimelineEntry,
};

use crate::mailer::Mailer;
use crate::notify::Notifier;
use crate::{Error, Result, load_contract, run_blocking};

const EARNINGS_RETRY_ATTEMPTS: u32 = 3;
const EARNINGS_RETRY_DELAY: Duration = Duration::from_millis(200);

/// The (status, escrow_status) state machine over contracts. Every escrow
/// transition pairs one adapter call with one conditional store update;
/// the adapter's idempotent per-contract reference guarantees a lost race
/// never double-charges.
#[derive(Clone)]
pub struct ContractEngine {
    db: Arc<Database>,
    escrow: EscrowAdapter,
    notifier: Notifier,
    mailer: Arc<dyn Mailer>,
}

impl ContractEngine {
    pub fn new(
        db: Arc<Database>,
        escrow: EscrowAdapter,
        notifier: Notifier,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            db,
            escrow,
            notifier,
            mailer,
        }
    }

    pub async fn get_contract(
        &self,
        contract_id: &str,
        acting_id: &str,
    ) -> Result<(Contract, Vec<TimelineEntry>)> {
        let contract = load_contract(&self.db, contract_id).await?;
        require_participant(&contract, acting_id)?;

        let db = self.db.clone();
        let id = contract_id.to_string();
        let timeline = run_blocking(move || Ok(db.get_timeline(&id)?)).await?;
        Ok((contract, timeline))
    }

    /// Place the escrow hold for the agreed amount. Client-only; requires
    /// escrow pending. On adapter failure the contract row is untouched.
    pub async fn fund_escrow(&self, contract_id: &str, acting_id: &str) -> Result<Contract> {
        let mut contract = load_contract(&self.db, contract_id).await?;

        if contract.client_id != acting_id {
            return Err(Error::Forbidden);
        }
        if contract.status != ContractStatus::Active {
            return Err(Error::InvalidState("contract is not active"));
        }
        if contract.escrow_status != EscrowStatus::Pending {
            return Err(Error::InvalidState("escrow is not pending"));
        }

        let metadata = HoldMetadata {
            contract_id: contract.id.clone(),
            client_id: contract.client_id.clone(),
            developer_id: contract.developer_id.clone(),
        };
        let reference = self
            .escrow
            .hold(&contract.id, contract.agreed_amount, &metadata)
            .await?;

        let db = self.db.clone();
        let id = contract.id.clone();
        let reference_row = reference.clone();
        let moved = run_blocking(move || {
            Ok(db.transition_escrow(&id, "pending", "funded", Some(&reference_row), &["active"])?)
        })
        .await?;
        if !moved {
            // A concurrent fund won after our precheck. It used the same
            // idempotent reference, so no second charge exists.
            return Err(Error::InvalidState("escrow is not pending"));
        }

        info!(contract = %contract.id, "escrow funded");

        self.notifier
            .notify(
                &contract.developer_id,
                NotificationKind::Payment,
                "Escrow has been funded for your contract",
                Some(format!("/contracts/{}", contract.id)),
            )
            .await;

        contract.escrow_status = EscrowStatus::Funded;
        contract.payment_ref = Some(reference);
        Ok(contract)
    }

    /// Capture the hold and credit the developer. Client-only; requires
    /// escrow funded on an active or completed contract. A disputed or
    /// cancelled contract is frozen and cannot have its escrow captured.
    /// The earnings increment is best-effort and retried in the background;
    /// it never blocks or fails the release.
    pub async fn release_payment(&self, contract_id: &str, acting_id: &str) -> Result<Contract> {
        let mut contract = load_contract(&self.db, contract_id).await?;

        if contract.client_id != acting_id {
            return Err(Error::Forbidden);
        }
        if !matches!(
            contract.status,
            ContractStatus::Active | ContractStatus::Completed
        ) {
            return Err(Error::InvalidState("contract is disputed or cancelled"));
        }
        if contract.escrow_status != EscrowStatus::Funded {
            return Err(Error::InvalidState("escrow is not funded"));
        }

        self.escrow.capture(&contract.id).await?;

        let db = self.db.clone();
        let id = contract.id.clone();
        let moved = run_blocking(move || {
            Ok(db.transition_escrow(&id, "funded", "released", None, &["active", "completed"])?)
        })
        .await?;
        if !moved {
            return Err(Error::InvalidState("escrow is not funded"));
        }

        info!(contract = %contract.id, "payment released");

        self.spawn_earnings_credit(contract.developer_id.clone(), contract.agreed_amount);

        self.notifier
            .notify(
                &contract.developer_id,
                NotificationKind::Payment,
                format!("Payment of ${:.2} has been released", contract.agreed_amount),
                Some(format!("/contracts/{}", contract.id)),
            )
            .await;

        self.mailer.send(
            &contract.developer_id,
            "Payment released",
            &format!(
                "<p>${:.2} has been released from escrow.</p>",
                contract.agreed_amount
            ),
        );

        contract.escrow_status = EscrowStatus::Released;
        Ok(contract)
    }

    /// Either participant may mark the work complete once the escrow is
    /// funded or released. Cascades the project to completed.
    pub async fn mark_complete(&self, contract_id: &str, acting_id: &str) -> Result<Contract> {
        let mut contract = load_contract(&self.db, contract_id).await?;
        require_participant(&contract, acting_id)?;

        if contract.status != ContractStatus::Active {
            return Err(Error::InvalidState("contract is not active"));
        }
        if !matches!(
            contract.escrow_status,
            EscrowStatus::Funded | EscrowStatus::Released
        ) {
            return Err(Error::InvalidState("escrow has not been funded"));
        }

        let now = Utc::now();
        let db = self.db.clone();
        let id = contract.id.clone();
        let moved = run_blocking(move || Ok(db.complete_contract(&id, now)?)).await?;
        if !moved {
            return Err(Error::InvalidState("contract is not active"));
        }

        let db = self.db.clone();
        let pid = contract.project_id.clone();
        let cascaded = run_blocking(move || {
            Ok(db.transition_project(&pid, "in_progress", "completed")?)
        })
        .await?;
        if !cascaded {
            debug!(
                project = %contract.project_id,
                "project was not in_progress at completion cascade"
            );
        }

        info!(contract = %contract.id, "contract completed");

        let counterparty = other_participant(&contract, acting_id);
        self.notifier
            .notify(
                counterparty,
                NotificationKind::Review,
                "Your contract was marked complete. Leave a review",
                Some(format!("/contracts/{}", contract.id)),
            )
            .await;

        contract.status = ContractStatus::Completed;
        contract.completed_at = Some(now);
        Ok(contract)
    }

    /// Freeze an active contract pending manual resolution. No automatic
    /// resolution exists; disputed contracts are handled out of band.
    pub async fn raise_dispute(&self, contract_id: &str, acting_id: &str) -> Result<Contract> {
        let mut contract = load_contract(&self.db, contract_id).await?;
        require_participant(&contract, acting_id)?;

        if contract.status != ContractStatus::Active {
            return Err(Error::InvalidState("contract is not active"));
        }

        let db = self.db.clone();
        let id = contract.id.clone();
        let moved =
            run_blocking(move || Ok(db.transition_contract(&id, "active", "disputed")?)).await?;
        if !moved {
            return Err(Error::InvalidState("contract is not active"));
        }

        let db = self.db.clone();
        let pid = contract.project_id.clone();
        run_blocking(move || Ok(db.transition_project(&pid, "in_progress", "disputed")?)).await?;

        warn!(
            contract = %contract.id,
            by = acting_id,
            "dispute raised, manual intervention required"
        );

        let counterparty = other_participant(&contract, acting_id).to_string();
        self.notifier
            .notify(
                &counterparty,
                NotificationKind::Payment,
                "A dispute was raised on your contract",
                Some(format!("/contracts/{}", contract.id)),
            )
            .await;

        contract.status = ContractStatus::Disputed;
        Ok(contract)
    }

    /// Reverse a contract that has not been released: cancel the hold (if
    /// one was placed) and mark the escrow refunded. The project record is
    /// left as-is; its lifecycle has no edge out of in_progress for a
    /// cancelled contract.
    pub async fn cancel(&self, contract_id: &str, acting_id: &str) -> Result<Contract> {
        let mut contract = load_contract(&self.db, contract_id).await?;

        if contract.client_id != acting_id {
            return Err(Error::Forbidden);
        }
        if contract.status != ContractStatus::Active {
            return Err(Error::InvalidState("contract is not active"));
        }
        let escrow_from = match contract.escrow_status {
            EscrowStatus::Pending => "pending",
            EscrowStatus::Funded => "funded",
            _ => return Err(Error::InvalidState("escrow was already released")),
        };

        // Nothing is held for a pending escrow; only funded needs the
        // processor involved
        if contract.escrow_status == EscrowStatus::Funded {
            self.escrow.cancel(&contract.id).await?;
        }

        // Refund and cancellation commit together; a dispute racing in
        // between makes the whole call a no-op
        let db = self.db.clone();
        let id = contract.id.clone();
        let from = escrow_from;
        let moved = run_blocking(move || Ok(db.cancel_contract_tx(&id, from)?)).await?;
        if !moved {
            return Err(Error::InvalidState("contract state changed concurrently"));
        }

        info!(contract = %contract.id, "contract cancelled and refunded");

        self.notifier
            .notify(
                &contract.developer_id,
                NotificationKind::Payment,
                "Your contract was cancelled and the escrow refunded",
                Some(format!("/contracts/{}", contract.id)),
            )
            .await;

        contract.status = ContractStatus::Cancelled;
        contract.escrow_status = EscrowStatus::Refunded;
        Ok(contract)
    }

    /// Append a dated progress entry to the contract's timeline. Timeline
    /// entries are always written here; they are never reconstructed from
    /// notification history.
    pub async fn add_timeline_entry(
        &self,
        contract_id: &str,
        acting_id: &str,
        text: String,
    ) -> Result<TimelineEntry> {
        if text.trim().is_empty() {
            return Err(Error::Validation("entry must not be empty"));
        }

        let contract = load_contract(&self.db, contract_id).await?;
        require_participant(&contract, acting_id)?;

        let entry = TimelineEntry {
            id: Uuid::new_v4().to_string(),
            contract_id: contract.id.clone(),
            author_id: acting_id.to_string(),
            entry: text,
            created_at: Utc::now(),
        };

        let db = self.db.clone();
        let row = entry.clone();
        run_blocking(move || Ok(db.insert_timeline_entry(&row)?)).await?;

        let counterparty = other_participant(&contract, acting_id).to_string();
        self.notifier
            .notify(
                &counterparty,
                NotificationKind::Timeline,
                "New progress update on your contract",
                Some(format!("/contracts/{}", contract.id)),
            )
            .await;

        Ok(entry)
    }

    /// Eventually-consistent earnings credit: retried off the request path,
    /// final failure is logged for reconciliation.
    fn spawn_earnings_credit(&self, developer_id: String, amount: f64) {
        let db = self.db.clone();
        tokio::spawn(async move {
            for attempt in 1..=EARNINGS_RETRY_ATTEMPTS {
                let db = db.clone();
                let dev = developer_id.clone();
                let result =
                    tokio::task::spawn_blocking(move || db.add_earnings(&dev, amount)).await;

                match result {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => {
                        warn!(
                            developer = %developer_id,
                            attempt, "earnings credit failed: {}", e
                        );
                    }
                    Err(e) => {
                        warn!(
                            developer = %developer_id,
                            attempt, "earnings credit join error: {}", e
                        );
                    }
                }

                if attempt < EARNINGS_RETRY_ATTEMPTS {
                    tokio::time::sleep(EARNINGS_RETRY_DELAY).await;
                }
            }
            warn!(
                developer = %developer_id,
                amount, "earnings credit exhausted retries, needs reconciliation"
            );
        });
    }
}

fn require_participant(contract: &Contract, acting_id: &str) -> Result<()> {
    if contract.client_id == acting_id || contract.developer_id == acting_id {
        Ok(())
    } else {
        Err(Error::Forbidden)
    }
}

fn other_participant<'a>(contract: &'a Contract, acting_id: &str) -> &'a str {
    if contract.client_id == acting_id {
        &contract.developer_id
    } else {
        &contract.client_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{TestEnv, env, seed_project};
    use lancer_escrow::processor::mock::InjectedFailure;
    use lancer_types::models::ProjectStatus;

    async fn seed_contract(env: &TestEnv) -> Contract {
        let project = seed_project(env, "client").await;
        let bid = env
            .bids
            .submit_bid(&project.id, "dev1", 450.0, 5, "offer".into())
            .await
            .unwrap();
        let (_, contract) = env.bids.accept_bid(&bid.id, "client").await.unwrap();
        contract
    }

    #[tokio::test]
    async fn full_lifecycle_scenario() {
        let env = env();
        let project = seed_project(&env, "client").await;

        let b1 = env
            .bids
            .submit_bid(&project.id, "dev1", 450.0, 5, "offer 1".into())
            .await
            .unwrap();
        env.bids
            .submit_bid(&project.id, "dev2", 500.0, 3, "offer 2".into())
            .await
            .unwrap();

        let (_, contract) = env.bids.accept_bid(&b1.id, "client").await.unwrap();
        assert_eq!(contract.agreed_amount, 450.0);
        assert_eq!(contract.escrow_status, EscrowStatus::Pending);

        let contract = env.contracts.fund_escrow(&contract.id, "client").await.unwrap();
        assert_eq!(contract.escrow_status, EscrowStatus::Funded);

        let contract = env
            .contracts
            .release_payment(&contract.id, "client")
            .await
            .unwrap();
        assert_eq!(contract.escrow_status, EscrowStatus::Released);

        let contract = env
            .contracts
            .mark_complete(&contract.id, "client")
            .await
            .unwrap();
        assert_eq!(contract.status, ContractStatus::Completed);
        assert!(contract.completed_at.is_some());

        let (project, _) = env.projects.get_project(&project.id).await.unwrap();
        assert_eq!(project.status, ProjectStatus::Completed);
    }

    #[tokio::test]
    async fn fund_twice_fails_without_second_processor_charge() {
        let env = env();
        let contract = seed_contract(&env).await;

        env.contracts.fund_escrow(&contract.id, "client").await.unwrap();
        let calls_after_first = env.processor.call_count();

        let err = env
            .contracts
            .fund_escrow(&contract.id, "client")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        // The precheck rejects before the adapter is ever invoked again
        assert_eq!(env.processor.call_count(), calls_after_first);
    }

    #[tokio::test]
    async fn only_the_client_can_fund() {
        let env = env();
        let contract = seed_contract(&env).await;

        let err = env
            .contracts
            .fund_escrow(&contract.id, "dev1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden));
    }

    #[tokio::test]
    async fn declined_hold_leaves_contract_unchanged() {
        let env = env();
        let contract = seed_contract(&env).await;

        env.processor.fail_next(InjectedFailure::Decline);
        let err = env
            .contracts
            .fund_escrow(&contract.id, "client")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Adapter(_)));

        let stored = env.db.get_contract(&contract.id).unwrap().unwrap();
        assert_eq!(stored.escrow_status, EscrowStatus::Pending);
        assert!(stored.payment_ref.is_none());
    }

    #[tokio::test]
    async fn release_requires_funded_escrow() {
        let env = env();
        let contract = seed_contract(&env).await;

        let err = env
            .contracts
            .release_payment(&contract.id, "client")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        env.contracts.fund_escrow(&contract.id, "client").await.unwrap();
        env.contracts
            .release_payment(&contract.id, "client")
            .await
            .unwrap();

        // Released is terminal on this path
        let err = env
            .contracts
            .release_payment(&contract.id, "client")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        let stored = env.db.get_contract(&contract.id).unwrap().unwrap();
        assert_eq!(stored.escrow_status, EscrowStatus::Released);
    }

    #[tokio::test]
    async fn release_credits_developer_earnings() {
        let env = env();
        let contract = seed_contract(&env).await;

        env.contracts.fund_escrow(&contract.id, "client").await.unwrap();
        env.contracts
            .release_payment(&contract.id, "client")
            .await
            .unwrap();

        // The credit is async and retried; poll briefly
        for _ in 0..50 {
            if env.db.get_earnings("dev1").unwrap() > 0.0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(env.db.get_earnings("dev1").unwrap(), 450.0);
    }

    #[tokio::test]
    async fn release_on_disputed_contract_is_invalid() {
        let env = env();
        let contract = seed_contract(&env).await;

        env.contracts.fund_escrow(&contract.id, "client").await.unwrap();
        env.contracts
            .raise_dispute(&contract.id, "dev1")
            .await
            .unwrap();

        let calls_before = env.processor.call_count();
        let err = env
            .contracts
            .release_payment(&contract.id, "client")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        // No capture reached the processor; the held funds stayed frozen
        assert_eq!(env.processor.call_count(), calls_before);
        let stored = env.db.get_contract(&contract.id).unwrap().unwrap();
        assert_eq!(stored.status, ContractStatus::Disputed);
        assert_eq!(stored.escrow_status, EscrowStatus::Funded);
    }

    #[tokio::test]
    async fn release_after_completion_is_allowed() {
        let env = env();
        let contract = seed_contract(&env).await;

        env.contracts.fund_escrow(&contract.id, "client").await.unwrap();
        env.contracts
            .mark_complete(&contract.id, "dev1")
            .await
            .unwrap();

        let released = env
            .contracts
            .release_payment(&contract.id, "client")
            .await
            .unwrap();
        assert_eq!(released.escrow_status, EscrowStatus::Released);
    }

    #[tokio::test]
    async fn complete_requires_funded_escrow() {
        let env = env();
        let contract = seed_contract(&env).await;

        let err = env
            .contracts
            .mark_complete(&contract.id, "dev1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn developer_can_mark_complete_after_funding() {
        let env = env();
        let contract = seed_contract(&env).await;

        env.contracts.fund_escrow(&contract.id, "client").await.unwrap();
        let contract = env
            .contracts
            .mark_complete(&contract.id, "dev1")
            .await
            .unwrap();
        assert_eq!(contract.status, ContractStatus::Completed);
    }

    #[tokio::test]
    async fn outsiders_cannot_touch_the_contract() {
        let env = env();
        let contract = seed_contract(&env).await;

        let err = env
            .contracts
            .raise_dispute(&contract.id, "stranger")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden));

        let err = env
            .contracts
            .get_contract(&contract.id, "stranger")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden));
    }

    #[tokio::test]
    async fn dispute_freezes_contract_and_project() {
        let env = env();
        let contract = seed_contract(&env).await;

        let disputed = env
            .contracts
            .raise_dispute(&contract.id, "dev1")
            .await
            .unwrap();
        assert_eq!(disputed.status, ContractStatus::Disputed);

        let (project, _) = env.projects.get_project(&contract.project_id).await.unwrap();
        assert_eq!(project.status, ProjectStatus::Disputed);

        // No further lifecycle operations on a disputed contract
        let err = env
            .contracts
            .fund_escrow(&contract.id, "client")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn cancel_funded_contract_refunds_escrow() {
        let env = env();
        let contract = seed_contract(&env).await;

        env.contracts.fund_escrow(&contract.id, "client").await.unwrap();
        let cancelled = env.contracts.cancel(&contract.id, "client").await.unwrap();
        assert_eq!(cancelled.status, ContractStatus::Cancelled);
        assert_eq!(cancelled.escrow_status, EscrowStatus::Refunded);
    }

    #[tokio::test]
    async fn cancel_after_release_is_invalid() {
        let env = env();
        let contract = seed_contract(&env).await;

        env.contracts.fund_escrow(&contract.id, "client").await.unwrap();
        env.contracts
            .release_payment(&contract.id, "client")
            .await
            .unwrap();

        let err = env.contracts.cancel(&contract.id, "client").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn timeline_entries_are_persisted_in_order() {
        let env = env();
        let contract = seed_contract(&env).await;

        env.contracts
            .add_timeline_entry(&contract.id, "dev1", "Started work".into())
            .await
            .unwrap();
        env.contracts
            .add_timeline_entry(&contract.id, "client", "Looks good".into())
            .await
            .unwrap();

        let (_, timeline) = env
            .contracts
            .get_contract(&contract.id, "client")
            .await
            .unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].entry, "Started work");
        assert_eq!(timeline[1].author_id, "client");
    }
}
