pub mod bids;
pub mod chat;
pub mod contracts;
pub mod error;
pub mod mailer;
pub mod notify;
pub mod projects;
pub mod rooms;

pub use error::{Error, Result};

use std::sync::Arc;

use lancer_db::Database;

/// Run blocking persistence work off the async runtime. Engines call this
/// around every `Database` access so route handlers never stall a worker.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(anyhow::anyhow!("blocking task join error: {}", e)))?
}

/// Load helper shared by the engines: fetch-or-NotFound.
pub(crate) async fn load_contract(
    db: &Arc<Database>,
    contract_id: &str,
) -> Result<lancer_types::models::Contract> {
    let db = db.clone();
    let id = contract_id.to_string();
    run_blocking(move || Ok(db.get_contract(&id)?)).await?.ok_or(Error::NotFound)
}
