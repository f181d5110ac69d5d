use log::error;
use mention_monitor::Error;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::{catch, Request};
use serde::{Deserialize, Serialize};

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub detail: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: Status,
    err: Error,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::NotFound(_) => Status::NotFound,
            Error::Validation(_) => Status::UnprocessableEntity,
            _ => Status::InternalServerError,
        };
        Self { status, err }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        if self.status.class().is_server_error() {
            error!("{} {} failed: {}", request.method(), request.uri(), self.err);
        }
        let body = ApiErrorResponse {
            detail: self.err.to_string(),
        };
        Custom(self.status, Json(body)).respond_to(request)
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Keeps errors raised by Rocket itself (bad query, bad body, no route) in the
/// same JSON shape.
#[catch(default)]
pub fn default_catcher(status: Status, _request: &Request) -> Custom<Json<ApiErrorResponse>> {
    let detail = status.reason().unwrap_or("Unknown error").to_string();
    Custom(status, Json(ApiErrorResponse { detail }))
}
