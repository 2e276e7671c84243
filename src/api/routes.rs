//! API route definitions.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::report::{self, ReportData, ReportFormat};
use crate::storage::{self, executions};

const DEFAULT_EXECUTION_LIMIT: usize = 50;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/projects", get(list_projects))
        .route("/schedules", get(list_schedules))
        .route("/schedules/dry-run", get(schedule_dry_run))
        .route("/executions", get(list_executions))
        .route("/executions/{id}", get(get_execution))
        .route("/executions/{id}/report", get(execution_report))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let projects = storage::list_projects(&state.pool)?;
    Ok(Json(json!({ "data": projects, "meta": { "total": projects.len() } })))
}

#[derive(Debug, Deserialize)]
struct ProjectFilter {
    project: Option<String>,
}

async fn list_schedules(
    State(state): State<AppState>,
    Query(filter): Query<ProjectFilter>,
) -> ApiResult<Json<Value>> {
    let tasks = state.scheduler.list(filter.project.as_deref())?;
    Ok(Json(json!({ "data": tasks, "meta": { "total": tasks.len() } })))
}

#[derive(Debug, Deserialize)]
struct DryRunParams {
    #[serde(default = "default_hours")]
    hours: u64,
}

fn default_hours() -> u64 {
    24
}

async fn schedule_dry_run(
    State(state): State<AppState>,
    Query(params): Query<DryRunParams>,
) -> ApiResult<Json<Value>> {
    let upcoming = state.scheduler.preview_next_runs(params.hours, Utc::now())?;
    Ok(Json(json!({ "data": { "hours": params.hours, "upcoming": upcoming } })))
}

#[derive(Debug, Deserialize)]
struct ExecutionFilter {
    project: Option<String>,
    limit: Option<usize>,
}

async fn list_executions(
    State(state): State<AppState>,
    Query(filter): Query<ExecutionFilter>,
) -> ApiResult<Json<Value>> {
    let limit = filter.limit.unwrap_or(DEFAULT_EXECUTION_LIMIT);
    let list = executions::list_executions(&state.pool, filter.project.as_deref(), limit)?;
    Ok(Json(json!({ "data": list, "meta": { "total": list.len(), "limit": limit } })))
}

async fn get_execution(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let data = ReportData::load(&state.pool, &id)?;
    let summary = report::summarize(&data);
    Ok(Json(json!({ "data": { "execution": data.execution, "summary": summary } })))
}

#[derive(Debug, Deserialize)]
struct ReportParams {
    format: Option<String>,
}

async fn execution_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ReportParams>,
) -> ApiResult<impl IntoResponse> {
    let format: ReportFormat = match params.format.as_deref() {
        Some(f) => f.parse()?,
        None => ReportFormat::Json,
    };
    let data = ReportData::load(&state.pool, &id)?;
    let body = report::generate(&data, format, Utc::now()).map_err(ApiError::from)?;
    Ok(([(header::CONTENT_TYPE, format.content_type())], body))
}

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::api::state::AppState;
    use crate::report::fixtures;
    use crate::scheduler::Scheduler;
    use crate::storage::{temp_pool, upsert_project, Project};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use tower::ServiceExt; // for `oneshot`

    fn app(pool: crate::storage::Pool) -> Router {
        let scheduler = Scheduler::new(pool.clone());
        router(AppState::new(pool, scheduler))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(response.into_body(), 1_000_000)
            .await
            .unwrap();
        (status, content_type, body.to_vec())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_dir, pool) = temp_pool();
        let (status, _, body) = get(app(pool), "/api/v1/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"]["status"], "ok");
        assert!(json["meta"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_schedules_are_listed_per_project() {
        let (_dir, pool) = temp_pool();
        let scheduler = Scheduler::new(pool.clone());
        scheduler.add_schedule("shop", "nightly", "0 2 * * *").unwrap();
        scheduler.add_schedule("blog", "hourly", "0 * * * *").unwrap();

        let (status, _, body) = get(app(pool.clone()), "/api/v1/schedules?project=shop").await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["meta"]["total"], 1);
        assert_eq!(json["data"][0]["name"], "nightly");

        let (_, _, body) = get(app(pool), "/api/v1/schedules").await;
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["meta"]["total"], 2);
    }

    #[tokio::test]
    async fn test_report_formats_and_content_types() {
        let (_dir, pool) = temp_pool();
        let id = fixtures::seed(&pool, 2);

        let (status, ct, body) = get(app(pool.clone()), &format!("/api/v1/executions/{}/report", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ct.as_deref(), Some("application/json"));
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["execution_summary"]["execution_id"], id.as_str());

        let (status, ct, body) =
            get(app(pool.clone()), &format!("/api/v1/executions/{}/report?format=html", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ct.as_deref(), Some("text/html; charset=utf-8"));
        assert!(String::from_utf8(body).unwrap().contains("<html"));

        let (status, ct, _) = get(app(pool), &format!("/api/v1/executions/{}/report?format=md", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ct.as_deref(), Some("text/markdown; charset=utf-8"));
    }

    #[tokio::test]
    async fn test_missing_execution_is_404_and_bad_format_is_400() {
        let (_dir, pool) = temp_pool();
        let id = fixtures::seed(&pool, 0);

        let (status, _, body) = get(app(pool.clone()), "/api/v1/executions/nope/report").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["status"], 404);

        let (status, _, _) = get(app(pool), &format!("/api/v1/executions/{}/report?format=pdf", id)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_executions_and_projects_are_listed() {
        let (_dir, pool) = temp_pool();
        upsert_project(
            &pool,
            &Project {
                id: "shop".to_string(),
                name: "Shop".to_string(),
                base_url: "https://shop.example/".to_string(),
            },
        )
        .unwrap();
        let id = fixtures::seed(&pool, 1);

        let (_, _, body) = get(app(pool.clone()), "/api/v1/executions?limit=5").await;
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"][0]["id"], id.as_str());

        let (_, _, body) = get(app(pool.clone()), &format!("/api/v1/executions/{}", id)).await;
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"]["summary"]["bugs"]["total_bugs"], 1);

        let (_, _, body) = get(app(pool), "/api/v1/projects").await;
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"][0]["base_url"], "https://shop.example/");
    }
}
