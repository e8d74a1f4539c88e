use crate::config::SessionScope;
use crate::roster::Roster;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rollcall_core::{AttendanceMarker, Encoding, MarkError, MarkRequest, MatchReport, StoreError};
use rollcall_store::{AttendanceRecord, SqliteStore, Subject};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub marker: AttendanceMarker,
    pub store: Arc<SqliteStore>,
    pub roster: Arc<Roster>,
    pub session_scope: SessionScope,
    pub max_encodings_per_student: usize,
}

/// JSON error body with an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "validation_error",
            message: message.into(),
        }
    }

    fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code,
            message: message.into(),
        }
    }
}

impl From<MarkError> for ApiError {
    fn from(err: MarkError) -> Self {
        let status = match &err {
            MarkError::Validation(_) => StatusCode::BAD_REQUEST,
            MarkError::UnknownSubject(_) => StatusCode::NOT_FOUND,
            MarkError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        MarkError::Store(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, error = %self.message, "request failed");
        } else {
            tracing::debug!(code = self.code, error = %self.message, "request rejected");
        }
        let body = serde_json::json!({ "error": self.message, "code": self.code });
        (self.status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/mark-attendance", post(mark_attendance))
        .route("/students/:student_id/encodings", post(enroll_encoding))
        .route("/students/:student_id/attendance", get(student_attendance))
        .route("/subjects", get(list_subjects))
        .route("/subjects/:code/attendance", get(subject_attendance))
        .route("/teachers/:username/attendance", get(teacher_attendance))
        .route("/status", get(status))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}

/// Match a captured batch and mark attendance.
async fn mark_attendance(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MatchReport>, ApiError> {
    let request = MarkRequest::from_slice(&body)?;
    let scope = state.session_scope;
    let report = state
        .marker
        .mark(&request, move || scope.new_session_id())
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct EnrollBody {
    encoding: Vec<f32>,
}

/// Store an encoding for a student. An empty array enrolls a placeholder.
async fn enroll_encoding(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let body: EnrollBody = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid enrollment body: {e}")))?;
    if body.encoding.iter().any(|v| !v.is_finite()) {
        return Err(ApiError::bad_request("encoding must contain finite numbers"));
    }
    let student_id = student_id.trim();
    if student_id.is_empty() {
        return Err(ApiError::bad_request("student id must not be empty"));
    }

    let enrolled = state.store.enrolled_count(student_id).await?;
    if enrolled >= state.max_encodings_per_student {
        return Err(ApiError::bad_request(format!(
            "student {student_id} already has {enrolled} encodings (limit {})",
            state.max_encodings_per_student
        )));
    }

    let encoding = Encoding::new(body.encoding);
    let id = state.store.enroll(student_id, &encoding).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": id,
            "studentId": student_id,
            "dimensions": encoding.len(),
            "enrolled": enrolled + 1,
            "limit": state.max_encodings_per_student,
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct StudentAttendanceQuery {
    subject: Option<String>,
}

/// A student's attendance marks, optionally for one subject code.
async fn student_attendance(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    Query(query): Query<StudentAttendanceQuery>,
) -> Result<Json<Vec<AttendanceRecord>>, ApiError> {
    let subject_id = match query.subject.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => Some(
            state
                .store
                .subject_by_code(code)
                .await?
                .ok_or_else(|| ApiError::from(MarkError::UnknownSubject(code.to_string())))?
                .id,
        ),
        _ => None,
    };
    let records = state
        .store
        .attendance_for_student(&student_id, subject_id.as_deref())
        .await?;
    Ok(Json(records))
}

async fn list_subjects(State(state): State<AppState>) -> Result<Json<Vec<Subject>>, ApiError> {
    Ok(Json(state.store.list_subjects().await?))
}

async fn subject_attendance(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Vec<AttendanceRecord>>, ApiError> {
    attendance_for_code(&state, &code).await.map(Json)
}

async fn teacher_attendance(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Vec<AttendanceRecord>>, ApiError> {
    let code = state
        .roster
        .subject_for(&username)
        .ok_or_else(|| ApiError::not_found("unknown_teacher", format!("unknown teacher: {username}")))?
        .to_string();
    attendance_for_code(&state, &code).await.map(Json)
}

async fn attendance_for_code(state: &AppState, code: &str) -> Result<Vec<AttendanceRecord>, ApiError> {
    let subject = state
        .store
        .subject_by_code(code)
        .await?
        .ok_or_else(|| ApiError::from(MarkError::UnknownSubject(code.to_string())))?;
    Ok(state.store.attendance_for_subject(&subject.id).await?)
}

/// Return daemon status information.
async fn status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let config = state.marker.config();
    Ok(Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "galleryEncodings": state.store.gallery_size().await?,
        "metric": config.metric.to_string(),
        "threshold": config.threshold,
        "duplicatePolicy": config.duplicate_policy.to_string(),
        "sessionScope": state.session_scope.to_string(),
        "teachers": state.roster.teacher_count(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use rollcall_core::MatchConfig;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const ROSTER: &str = r#"
        [[teacher]]
        username = "dsa"
        subject_code = "DSA"
    "#;

    async fn app() -> (Router, Arc<SqliteStore>) {
        app_with_limit(10).await
    }

    async fn app_with_limit(max_encodings_per_student: usize) -> (Router, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        store.upsert_subject("DSA", "Data Structures").await.unwrap();
        store.enroll("alice", &Encoding::new(vec![0.0, 0.0])).await.unwrap();
        store.enroll("bob", &Encoding::new(vec![1.0, 1.0])).await.unwrap();

        let state = AppState {
            marker: AttendanceMarker::with_backend(store.clone(), MatchConfig::default()),
            store: store.clone(),
            roster: Arc::new(Roster::parse(ROSTER).unwrap()),
            session_scope: SessionScope::Batch,
            max_encodings_per_student,
        };
        (router(state), store)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_mark_attendance() {
        let (app, _) = app().await;
        let (status, body) = send(
            &app,
            "POST",
            "/mark-attendance",
            Some(json!({
                "subject_code": "DSA",
                "encodings": [[0.1, 0.0], [0.2, 0.0], [0.95, 1.0], [9.0, 9.0]],
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["marked"], 2);
        assert_eq!(body["unknown"], 1);
        assert_eq!(body["markedStudents"], json!(["alice", "bob"]));
        assert_eq!(body["unknownFaces"], json!([3]));

        let (status, records) = send(&app, "GET", "/subjects/DSA/attendance", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(records.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (app, _) = app().await;

        let (status, body) = send(&app, "POST", "/mark-attendance", Some(json!({"encodings": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");

        let (status, body) = send(
            &app,
            "POST",
            "/mark-attendance",
            Some(json!({"subject_code": "nosuchsubject", "encodings": [[0.0, 0.0]]})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "unknown_subject");
    }

    #[test]
    fn test_store_error_maps_to_500() {
        let err = ApiError::from(StoreError::Unavailable("down".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "store_error");
    }

    #[tokio::test]
    async fn test_enroll_then_match() {
        let (app, store) = app().await;
        let (status, body) = send(
            &app,
            "POST",
            "/students/carol/encodings",
            Some(json!({"encoding": [5.0, 5.0]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["dimensions"], 2);
        assert_eq!(store.gallery_size().await.unwrap(), 3);

        let (status, _) = send(
            &app,
            "POST",
            "/students/carol/encodings",
            Some(json!({"encoding": ["x"]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(
            &app,
            "POST",
            "/mark-attendance",
            Some(json!({"subject_code": "DSA", "encodings": [[5.1, 5.0]]})),
        )
        .await;
        assert_eq!(body["markedStudents"], json!(["carol"]));
    }

    #[tokio::test]
    async fn test_enrollment_cap() {
        let (app, store) = app_with_limit(2).await;

        let (status, body) = send(
            &app,
            "POST",
            "/students/alice/encodings",
            Some(json!({"encoding": [0.1, 0.0]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["enrolled"], 2);
        assert_eq!(body["limit"], 2);

        let (status, body) = send(
            &app,
            "POST",
            "/students/alice/encodings",
            Some(json!({"encoding": []})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
        assert_eq!(store.enrolled_count("alice").await.unwrap(), 2);

        let (status, body) = send(
            &app,
            "POST",
            "/students/bob/encodings",
            Some(json!({"encoding": [1.0, 0.9]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["enrolled"], 2);
    }

    #[tokio::test]
    async fn test_student_attendance() {
        let (app, store) = app().await;
        store.upsert_subject("OS", "Operating Systems").await.unwrap();

        for subject in ["DSA", "OS"] {
            let (status, _) = send(
                &app,
                "POST",
                "/mark-attendance",
                Some(json!({"subject_code": subject, "encodings": [[0.0, 0.05]]})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(&app, "GET", "/students/alice/attendance", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, body) = send(&app, "GET", "/students/alice/attendance?subject=OS", None).await;
        assert_eq!(status, StatusCode::OK);
        let records = body.as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["student_id"], "alice");

        let (_, body) = send(&app, "GET", "/students/bob/attendance", None).await;
        assert!(body.as_array().unwrap().is_empty());

        let (status, body) = send(&app, "GET", "/students/alice/attendance?subject=nosuchsubject", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "unknown_subject");
    }

    #[tokio::test]
    async fn test_teacher_attendance() {
        let (app, _) = app().await;
        let (status, body) = send(&app, "GET", "/teachers/DSA/attendance", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());

        let (status, body) = send(&app, "GET", "/teachers/basket/attendance", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "unknown_teacher");
    }

    #[tokio::test]
    async fn test_status_and_subjects() {
        let (app, _) = app().await;
        let (status, body) = send(&app, "GET", "/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["galleryEncodings"], 2);
        assert_eq!(body["metric"], "euclidean");
        assert_eq!(body["teachers"], 1);

        let (_, subjects) = send(&app, "GET", "/subjects", None).await;
        assert_eq!(subjects[0]["code"], "DSA");
    }
}
