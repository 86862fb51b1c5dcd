use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use lancer_db::Database;
use lancer_types::models::{Bid, Project, ProjectStatus};

use crate::{Error, Result, run_blocking};

pub struct NewProject {
    pub title: String,
    pub description: String,
    pub category: String,
    pub budget: f64,
    pub deadline: Option<DateTime<Utc>>,
    pub skills: Vec<String>,
}

/// Project creation and reads. Status transitions are owned by the bid and
/// contract engines; this engine only ever creates `open` projects.
#[derive(Clone)]
pub struct ProjectEngine {
    db: Arc<Database>,
}

impl ProjectEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn create_project(&self, client_id: &str, new: NewProject) -> Result<Project> {
        if new.title.trim().is_empty() {
            return Err(Error::Validation("title must not be empty"));
        }
        if new.description.trim().is_empty() {
            return Err(Error::Validation("description must not be empty"));
        }
        if !(new.budget > 0.0) {
            return Err(Error::Validation("budget must be positive"));
        }

        let project = Project {
            id: Uuid::new_v4().to_string(),
            title: new.title,
            description: new.description,
            category: new.category,
            budget: new.budget,
            deadline: new.deadline,
            skills: new.skills,
            client_id: client_id.to_string(),
            status: ProjectStatus::Open,
            selected_bid_id: None,
            selected_developer_id: None,
            bid_count: 0,
            created_at: Utc::now(),
        };

        let db = self.db.clone();
        let row = project.clone();
        run_blocking(move || Ok(db.insert_project(&row)?)).await?;

        Ok(project)
    }

    pub async fn get_project(&self, project_id: &str) -> Result<(Project, Vec<Bid>)> {
        let db = self.db.clone();
        let id = project_id.to_string();
        run_blocking(move || {
            let project = db.get_project(&id)?.ok_or(Error::NotFound)?;
            let bids = db.list_bids(&id)?;
            Ok((project, bids))
        })
        .await
    }
}
