//! Database row types. These map directly to SQLite rows. Enum and
//! timestamp parsing happens here, at the persistence boundary, so the
//! engines only ever see typed `lancer_types` models.

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDateTime, Utc};
use lancer_types::models::{
    Bid, BidStatus, ChatMessage, Contract, ContractStatus, EscrowStatus, MessageKind,
    Notification, NotificationKind, Project, ProjectStatus, TimelineEntry,
};

/// SQLite stores timestamps either as RFC 3339 (explicit inserts) or as
/// "YYYY-MM-DD HH:MM:SS" (datetime('now') defaults). Accept both.
pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|e| anyhow!("bad timestamp '{}': {}", s, e))
}

pub struct ProjectRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub budget: f64,
    pub deadline: Option<String>,
    pub skills: String,
    pub client_id: String,
    pub status: String,
    pub selected_bid_id: Option<String>,
    pub selected_developer_id: Option<String>,
    pub bid_count: i64,
    pub created_at: String,
}

impl ProjectRow {
    pub fn into_model(self) -> Result<Project> {
        Ok(Project {
            status: ProjectStatus::parse(&self.status)
                .ok_or_else(|| anyhow!("bad project status '{}'", self.status))?,
            skills: serde_json::from_str(&self.skills)
                .map_err(|e| anyhow!("bad skills on project '{}': {}", self.id, e))?,
            deadline: self.deadline.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&self.created_at)?,
            id: self.id,
            title: self.title,
            description: self.description,
            category: self.category,
            budget: self.budget,
            client_id: self.client_id,
            selected_bid_id: self.selected_bid_id,
            selected_developer_id: self.selected_developer_id,
            bid_count: self.bid_count,
        })
    }
}

pub struct BidRow {
    pub id: String,
    pub project_id: String,
    pub developer_id: String,
    pub amount: f64,
    pub delivery_days: i64,
    pub proposal: String,
    pub status: String,
    pub created_at: String,
}

impl BidRow {
    pub fn into_model(self) -> Result<Bid> {
        Ok(Bid {
            status: BidStatus::parse(&self.status)
                .ok_or_else(|| anyhow!("bad bid status '{}'", self.status))?,
            created_at: parse_ts(&self.created_at)?,
            id: self.id,
            project_id: self.project_id,
            developer_id: self.developer_id,
            amount: self.amount,
            delivery_days: self.delivery_days,
            proposal: self.proposal,
        })
    }
}

pub struct ContractRow {
    pub id: String,
    pub project_id: String,
    pub bid_id: String,
    pub client_id: String,
    pub developer_id: String,
    pub agreed_amount: f64,
    pub delivery_days: i64,
    pub status: String,
    pub escrow_status: String,
    pub payment_ref: Option<String>,
    pub room_id: String,
    pub completed_at: Option<String>,
    pub created_at: String,
}

impl ContractRow {
    pub fn into_model(self) -> Result<Contract> {
        Ok(Contract {
            status: ContractStatus::parse(&self.status)
                .ok_or_else(|| anyhow!("bad contract status '{}'", self.status))?,
            escrow_status: EscrowStatus::parse(&self.escrow_status)
                .ok_or_else(|| anyhow!("bad escrow status '{}'", self.escrow_status))?,
            completed_at: self.completed_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&self.created_at)?,
            id: self.id,
            project_id: self.project_id,
            bid_id: self.bid_id,
            client_id: self.client_id,
            developer_id: self.developer_id,
            agreed_amount: self.agreed_amount,
            delivery_days: self.delivery_days,
            payment_ref: self.payment_ref,
            room_id: self.room_id,
        })
    }
}

pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    pub kind: String,
    pub edited: bool,
    pub seq: i64,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_model(self) -> Result<ChatMessage> {
        Ok(ChatMessage {
            kind: MessageKind::parse(&self.kind)
                .ok_or_else(|| anyhow!("bad message kind '{}'", self.kind))?,
            created_at: parse_ts(&self.created_at)?,
            id: self.id,
            room_id: self.room_id,
            sender_id: self.sender_id,
            content: self.content,
            edited: self.edited,
            seq: self.seq,
        })
    }
}

pub struct NotificationRow {
    pub id: String,
    pub recipient_id: String,
    pub kind: String,
    pub message: String,
    pub link: Option<String>,
    pub read: bool,
    pub created_at: String,
}

impl NotificationRow {
    pub fn into_model(self) -> Result<Notification> {
        Ok(Notification {
            kind: NotificationKind::parse(&self.kind)
                .ok_or_else(|| anyhow!("bad notification kind '{}'", self.kind))?,
            created_at: parse_ts(&self.created_at)?,
            id: self.id,
            recipient_id: self.recipient_id,
            message: self.message,
            link: self.link,
            read: self.read,
        })
    }
}

pub struct TimelineRow {
    pub id: String,
    pub contract_id: String,
    pub author_id: String,
    pub entry: String,
    pub created_at: String,
}

impl TimelineRow {
    pub fn into_model(self) -> Result<TimelineEntry> {
        Ok(TimelineEntry {
            created_at: parse_ts(&self.created_at)?,
            id: self.id,
            contract_id: self.contract_id,
            author_id: self.author_id,
            entry: self.entry,
        })
    }
}
