use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// RFC 7807 style error response used by every API handler.
pub struct ProblemResponse {
    status: StatusCode,
    problem_type: &'static str,
    detail: String,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            problem_type,
            detail: detail.into(),
        }
    }

    pub fn not_found(problem_type: &'static str, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, problem_type, detail)
    }
}

#[derive(Serialize)]
struct ProblemBody {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let body = ProblemBody {
            problem_type: self.problem_type,
            title: self.status.canonical_reason().unwrap_or("error"),
            detail: self.detail,
        };

        let mut response = Json(body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}
