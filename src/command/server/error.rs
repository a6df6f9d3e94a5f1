use std::fmt;

use hyper::StatusCode;
use serde_json::json;

#[derive(Debug, PartialEq)]
pub enum Error {
    Initialization(String),
    Execution(String),
    // mappable to classical HTTP responses
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Initialization(err) | Error::Execution(err) => write!(f, "{err}"),
            Error::BadRequest(err) => write!(f, "Bad Request: {err}"),
            Error::NotFound(err) => write!(f, "Not Found: {err}"),
            Error::Internal(err) => write!(f, "Internal Server Error: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Initialization(_) | Error::Execution(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn as_json(&self, request_id: Option<&String>) -> serde_json::Value {
        let (code, message) = match self {
            Error::BadRequest(msg) => ("BAD_REQUEST", msg.as_str()),
            Error::NotFound(msg) => ("NOT_FOUND", msg.as_str()),
            Error::Initialization(msg) | Error::Execution(msg) | Error::Internal(msg) => {
                ("INTERNAL_SERVER_ERROR", msg.as_str())
            }
        };

        if let Some(request_id) = request_id {
            json!({
                "errors": [{
                    "code": code,
                    "message": message,
                    "detail": { "request_id": request_id }
                }]
            })
        } else {
            json!({
                "errors": [{
                    "code": code,
                    "message": message,
                }]
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = Error::Initialization("Failed to bind to 0.0.0.0:8000".to_string());
        assert_eq!(format!("{error}"), "Failed to bind to 0.0.0.0:8000");

        let error = Error::Execution("Failed to accept incoming connection".to_string());
        assert_eq!(format!("{error}"), "Failed to accept incoming connection");

        let error = Error::BadRequest("unsupported route: POST /login".to_string());
        assert_eq!(
            format!("{error}"),
            "Bad Request: unsupported route: POST /login"
        );

        let error = Error::NotFound("unknown route: GET /nope".to_string());
        assert_eq!(format!("{error}"), "Not Found: unknown route: GET /nope");

        let error = Error::Internal("Unable to encode metrics".to_string());
        assert_eq!(
            format!("{error}"),
            "Internal Server Error: Unable to encode metrics"
        );
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            Error::BadRequest("test".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::NotFound("test".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::Initialization("test".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::Execution("test".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::Internal("test".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_as_json_without_request_id() {
        let error = Error::NotFound("unknown route: GET /nope".to_string());
        let json = error.as_json(None);

        assert_eq!(json["errors"][0]["code"], "NOT_FOUND");
        assert_eq!(json["errors"][0]["message"], "unknown route: GET /nope");
        assert!(json["errors"][0].get("detail").is_none());
    }

    #[test]
    fn test_as_json_with_request_id() {
        let error = Error::BadRequest("unsupported route: PUT /login".to_string());
        let request_id = Some("4bf92f3577b34da6a3ce929d0e0e4736".to_string());
        let json = error.as_json(request_id.as_ref());

        assert_eq!(json["errors"][0]["code"], "BAD_REQUEST");
        assert_eq!(
            json["errors"][0]["detail"]["request_id"],
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
    }

    #[test]
    fn test_as_json_internal_variants_share_code() {
        for error in [
            Error::Initialization("init".to_string()),
            Error::Execution("exec".to_string()),
            Error::Internal("internal".to_string()),
        ] {
            let json = error.as_json(None);
            assert_eq!(json["errors"][0]["code"], "INTERNAL_SERVER_ERROR");
        }
    }
}
