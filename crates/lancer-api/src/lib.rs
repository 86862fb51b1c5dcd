pub mod bids;
pub mod contracts;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod projects;

use std::sync::Arc;

use lancer_core::bids::BidEngine;
use lancer_core::chat::ChatEngine;
use lancer_core::contracts::ContractEngine;
use lancer_core::projects::ProjectEngine;
use lancer_db::Database;
use lancer_gateway::Hub;

pub type AppState = Arc<AppStateInner>;

/// Everything a route handler needs: the engines (which own the business
/// rules) plus the store and hub for the read-only surfaces. Engines are
/// injected, never reached through globals.
pub struct AppStateInner {
    pub db: Arc<Database>,
    pub hub: Hub,
    pub projects: ProjectEngine,
    pub bids: BidEngine,
    pub contracts: ContractEngine,
    pub chat: ChatEngine,
}
