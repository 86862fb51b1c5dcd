use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::MessageRow;
use crate::{Database, OptionalExt};
use lancer_types::models::{ChatMessage, MessageKind};

impl Database {
    /// Insert a message with the next per-room sequence number. The seq
    /// assignment and the insert run in one transaction, so replay order
    /// equals commit order and `UNIQUE(room_id, seq)` can never fire under
    /// the single-connection discipline.
    ///
    /// `committed` runs after the commit while the connection lock is still
    /// held. Live fan-out goes through it so that of two concurrent sends
    /// to the same room, the one that committed first also broadcasts
    /// first.
    pub fn insert_message(
        &self,
        id: &str,
        room_id: &str,
        sender_id: &str,
        content: &str,
        kind: MessageKind,
        now: DateTime<Utc>,
        committed: impl FnOnce(&ChatMessage),
    ) -> Result<ChatMessage> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let seq: i64 = tx.query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE room_id = ?1",
                [room_id],
                |row| row.get(0),
            )?;

            tx.execute(
                "INSERT INTO messages (id, room_id, sender_id, content, kind, seq, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id,
                    room_id,
                    sender_id,
                    content,
                    kind.as_str(),
                    seq,
                    now.to_rfc3339(),
                ],
            )?;

            tx.commit()?;

            let message = ChatMessage {
                id: id.to_string(),
                room_id: room_id.to_string(),
                sender_id: sender_id.to_string(),
                content: content.to_string(),
                kind,
                edited: false,
                seq,
                created_at: now,
            };
            committed(&message);
            Ok(message)
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<ChatMessage>> {
        let row = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, room_id, sender_id, content, kind, edited, seq, created_at
                 FROM messages WHERE id = ?1 AND deleted = 0",
            )?;

            let row = stmt.query_row([id], map_message_row).optional()?;
            Ok(row)
        })?;

        row.map(MessageRow::into_model).transpose()
    }

    /// Room history in replay order (ascending seq). `before` is the cursor
    /// from the previous page: pass the smallest seq seen to fetch older
    /// messages. Deleted messages are excluded.
    pub fn get_messages(
        &self,
        room_id: &str,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<ChatMessage>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, room_id, sender_id, content, kind, edited, seq, created_at
                 FROM messages
                 WHERE room_id = ?1 AND deleted = 0 AND seq < ?2
                 ORDER BY seq DESC
                 LIMIT ?3",
            )?;

            let cursor = before.unwrap_or(i64::MAX);
            let rows = stmt
                .query_map(rusqlite::params![room_id, cursor, limit], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut messages = rows
            .into_iter()
            .map(MessageRow::into_model)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Conditional content update; false when the message is gone.
    /// Sender-only authorization happens in the chat engine before this.
    pub fn edit_message(&self, id: &str, content: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET content = ?1, edited = 1 WHERE id = ?2 AND deleted = 0",
                rusqlite::params![content, id],
            )?;
            Ok(n == 1)
        })
    }

    /// Soft delete; history reads skip deleted rows.
    pub fn delete_message(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET deleted = 1 WHERE id = ?1 AND deleted = 0",
                [id],
            )?;
            Ok(n == 1)
        })
    }
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        kind: row.get(4)?,
        edited: row.get(5)?,
        seq: row.get(6)?,
        created_at: row.get(7)?,
    })
}
