//! HTTP surface: routing plus the resource handlers that create and
//! render tasks.

pub mod crashdump;
pub mod dumps;
pub mod routes;
pub mod tasks;
pub mod update;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::messages::{self, Message};

/// A Redfish error-object response.
pub(crate) fn redfish_error(status: StatusCode, message: Message) -> Response {
    (status, Json(messages::error_body(&message))).into_response()
}
