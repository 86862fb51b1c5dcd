use anyhow::Result;

use crate::Database;
use crate::models::NotificationRow;
use lancer_types::models::Notification;

impl Database {
    pub fn insert_notification(&self, n: &Notification) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, recipient_id, kind, message, link, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    n.id,
                    n.recipient_id,
                    n.kind.as_str(),
                    n.message,
                    n.link,
                    n.read,
                    n.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_notifications(&self, recipient_id: &str, limit: u32) -> Result<Vec<Notification>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recipient_id, kind, message, link, read, created_at
                 FROM notifications WHERE recipient_id = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![recipient_id, limit], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        recipient_id: row.get(1)?,
                        kind: row.get(2)?,
                        message: row.get(3)?,
                        link: row.get(4)?,
                        read: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(NotificationRow::into_model).collect()
    }

    /// Flip the read flag. Empty `ids` means "all unread for this
    /// recipient". Scoped to the recipient so one user can never mark
    /// another's notifications.
    pub fn mark_notifications_read(&self, recipient_id: &str, ids: &[String]) -> Result<usize> {
        self.with_conn(|conn| {
            if ids.is_empty() {
                let n = conn.execute(
                    "UPDATE notifications SET read = 1 WHERE recipient_id = ?1 AND read = 0",
                    [recipient_id],
                )?;
                return Ok(n);
            }

            let placeholders: Vec<String> =
                (2..=ids.len() + 1).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "UPDATE notifications SET read = 1
                 WHERE recipient_id = ?1 AND id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&recipient_id];
            params.extend(ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));

            let n = stmt.execute(params.as_slice())?;
            Ok(n)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lancer_types::models::NotificationKind;

    fn notification(id: &str, recipient: &str) -> Notification {
        Notification {
            id: id.to_string(),
            recipient_id: recipient.to_string(),
            kind: NotificationKind::Bid,
            message: "hello".into(),
            link: None,
            read: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn mark_read_is_scoped_to_the_recipient() {
        let db = Database::open_in_memory().unwrap();
        db.insert_notification(&notification("n1", "alice")).unwrap();
        db.insert_notification(&notification("n2", "bob")).unwrap();

        // Alice cannot flip Bob's notification even by id
        let updated = db
            .mark_notifications_read("alice", &["n2".to_string()])
            .unwrap();
        assert_eq!(updated, 0);

        let bobs = db.list_notifications("bob", 50).unwrap();
        assert!(!bobs[0].read);
    }

    #[test]
    fn empty_ids_marks_all_unread() {
        let db = Database::open_in_memory().unwrap();
        db.insert_notification(&notification("n1", "alice")).unwrap();
        db.insert_notification(&notification("n2", "alice")).unwrap();

        let updated = db.mark_notifications_read("alice", &[]).unwrap();
        assert_eq!(updated, 2);
        // Idempotent on retry
        let updated = db.mark_notifications_read("alice", &[]).unwrap();
        assert_eq!(updated, 0);

        assert!(db.list_notifications("alice", 50).unwrap().iter().all(|n| n.read));
    }
}
