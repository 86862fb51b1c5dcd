use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Bid, ChatMessage, Contract, Notification, Project, TimelineEntry};

// -- JWT Claims --

/// Claims carried in the identity provider's token. Canonical definition
/// lives here so lancer-api (REST middleware) and lancer-gateway (WebSocket
/// upgrade) share one shape. The core never issues or refreshes tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Opaque caller identity
    pub sub: String,
    /// Role claim supplied by the provider ("client" or "developer")
    pub role: String,
    pub exp: usize,
}

// -- Projects --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateProjectRequest {
    pub title: String,
    pub description: String,
    pub category: String,
    pub budget: f64,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skills: Vec<String>,
}

// -- Bids --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitBidRequest {
    pub amount: f64,
    pub delivery_days: i64,
    pub proposal: String,
}

/// Returned by accept-bid: the accepted bid plus the contract it created.
#[derive(Debug, Serialize)]
pub struct AcceptBidResponse {
    pub bid: Bid,
    pub contract: Contract,
}

// -- Contracts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddTimelineEntryRequest {
    pub entry: String,
}

#[derive(Debug, Serialize)]
pub struct ContractResponse {
    pub contract: Contract,
    pub timeline: Vec<TimelineEntry>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub kind: Option<crate::models::MessageKind>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct MessageHistoryResponse {
    pub messages: Vec<ChatMessage>,
}

// -- Notifications --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkNotificationsReadRequest {
    /// Specific notification ids to mark; empty means "all unread".
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct NotificationListResponse {
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub project: Project,
    pub bids: Vec<Bid>,
}
