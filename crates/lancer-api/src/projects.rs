use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use lancer_core::projects::NewProject;
use lancer_types::api::{Claims, CreateProjectRequest, ProjectResponse};

use crate::AppState;
use crate::error::ApiError;

pub async fn create_project(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .projects
        .create_project(
            &claims.sub,
            NewProject {
                title: req.title,
                description: req.description,
                category: req.category,
                budget: req.budget,
                deadline: req.deadline,
                skills: req.skills,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let (project, bids) = state.projects.get_project(&project_id).await?;
    Ok(Json(ProjectResponse { project, bids }))
}
