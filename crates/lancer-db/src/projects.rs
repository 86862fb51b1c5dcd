use anyhow::Result;
use rusqlite::Connection;

use crate::models::ProjectRow;
use crate::{Database, OptionalExt};
use lancer_types::models::Project;

impl Database {
    pub fn insert_project(&self, project: &Project) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects
                    (id, title, description, category, budget, deadline, skills,
                     client_id, status, bid_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    project.id,
                    project.title,
                    project.description,
                    project.category,
                    project.budget,
                    project.deadline.map(|d| d.to_rfc3339()),
                    serde_json::to_string(&project.skills)?,
                    project.client_id,
                    project.status.as_str(),
                    project.bid_count,
                    project.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let row = self.with_conn(|conn| query_project(conn, id))?;
        row.map(ProjectRow::into_model).transpose()
    }

    /// Cascade used by contract completion and dispute. Conditional on the
    /// current status so a concurrent transition cannot be overwritten.
    pub fn transition_project(&self, id: &str, from: &str, to: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE projects SET status = ?1 WHERE id = ?2 AND status = ?3",
                rusqlite::params![to, id, from],
            )?;
            Ok(n == 1)
        })
    }
}

pub(crate) fn query_project(conn: &Connection, id: &str) -> Result<Option<ProjectRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, description, category, budget, deadline, skills,
                client_id, status, selected_bid_id, selected_developer_id,
                bid_count, created_at
         FROM projects WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(ProjectRow {
                id: row.get(0)?,
                title: row.get(1)?,
                description: row.get(2)?,
                category: row.get(3)?,
                budget: row.get(4)?,
                deadline: row.get(5)?,
                skills: row.get(6)?,
                client_id: row.get(7)?,
                status: row.get(8)?,
                selected_bid_id: row.get(9)?,
                selected_developer_id: row.get(10)?,
                bid_count: row.get(11)?,
                created_at: row.get(12)?,
            })
        })
        .optional()?;

    Ok(row)
}
