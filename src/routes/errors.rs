use std::convert::Infallible;

use serde_json::json;
use tracing::error;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use crate::error::BalancerError;

#[derive(Debug)]
pub struct ApiError(pub BalancerError);

impl warp::reject::Reject for ApiError {}

pub fn reject(err: BalancerError) -> Rejection {
  warp::reject::custom(ApiError(err))
}

pub fn status_for(err: &BalancerError) -> StatusCode {
  match err {
    BalancerError::NoNodesAvailable | BalancerError::NoHealthyNodes => StatusCode::SERVICE_UNAVAILABLE,
    BalancerError::Forward { .. } => StatusCode::BAD_GATEWAY,
    BalancerError::TaskNotFound(_) => StatusCode::NOT_FOUND,
    BalancerError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
    BalancerError::InvalidInput(_) | BalancerError::InvalidSettings(_) => StatusCode::BAD_REQUEST,
    BalancerError::MalformedRecord { .. }
    | BalancerError::Store(_)
    | BalancerError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

/// Renders every rejection as `{"detail": ...}` with the matching status code.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
  let (code, detail) = if let Some(ApiError(e)) = err.find::<ApiError>() {
    let code = status_for(e);
    if code == StatusCode::INTERNAL_SERVER_ERROR {
      error!("Request failed: {:?}", e);
    }
    (code, e.to_string())
  } else if err.is_not_found() {
    (StatusCode::NOT_FOUND, "Not Found".to_string())
  } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
    (StatusCode::BAD_REQUEST, e.to_string())
  } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
    (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large".to_string())
  } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
    (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
  } else if let Some(e) = err.find::<warp::filters::cors::CorsForbidden>() {
    (StatusCode::FORBIDDEN, e.to_string())
  } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
    (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Unsupported media type".to_string())
  } else if err.find::<warp::reject::LengthRequired>().is_some() {
    (StatusCode::LENGTH_REQUIRED, "Content-Length required".to_string())
  } else if let Some(e) = err.find::<warp::reject::InvalidHeader>() {
    (StatusCode::BAD_REQUEST, e.to_string())
  } else if let Some(e) = err.find::<warp::reject::MissingHeader>() {
    (StatusCode::BAD_REQUEST, e.to_string())
  } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
    (StatusCode::BAD_REQUEST, e.to_string())
  } else {
    error!("Unhandled rejection: {:?}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
  };

  Ok(warp::reply::with_status(
    warp::reply::json(&json!({ "detail": detail })),
    code,
  ))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_boundary_mapping() {
    assert_eq!(status_for(&BalancerError::NoNodesAvailable), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(status_for(&BalancerError::NoHealthyNodes), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(status_for(&BalancerError::forward("u", "refused")), StatusCode::BAD_GATEWAY);
    assert_eq!(status_for(&BalancerError::TaskNotFound("t".into())), StatusCode::NOT_FOUND);
    assert_eq!(status_for(&BalancerError::MethodNotAllowed("PUT".into())), StatusCode::METHOD_NOT_ALLOWED);
  }
}
