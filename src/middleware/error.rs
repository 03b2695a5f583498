use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};

/// Authentication errors for the middleware layer.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No session, or it could not be read or refreshed.
    #[error("Unauthorized: User not authenticated or session expired.")]
    Unauthenticated,

    /// A session was presented but the backend no longer accepts it.
    #[error("Unauthorized: Session expired.")]
    SessionExpired,

    /// Callback failure. Carries the error page location, reason included.
    #[error("Callback failed, redirecting to {0}")]
    Callback(String),

    /// Developer directory lookup failed.
    #[error("Failed to fetch developer data: {0}")]
    Directory(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated | Self::SessionExpired => (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": self.to_string() })),
            )
                .into_response(),
            Self::Callback(ref location) => Redirect::to(location).into_response(),
            Self::Directory(_) => {
                tracing::error!(error = %self, "Auth internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": self.to_string() })),
                )
                    .into_response()
            }
        }
    }
}

impl From<crate::error::Error> for AuthError {
    fn from(e: crate::error::Error) -> Self {
        match e {
            crate::error::Error::SessionExpired => Self::SessionExpired,
            _ => Self::Unauthenticated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unauthenticated_is_401_json() {
        let response = AuthError::Unauthenticated.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await["error"],
            "Unauthorized: User not authenticated or session expired."
        );
    }

    #[tokio::test]
    async fn test_directory_failure_is_500_json() {
        let response = AuthError::Directory("rpc down".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await["error"],
            "Failed to fetch developer data: rpc down"
        );
    }

    #[test]
    fn test_callback_failure_redirects() {
        let response = AuthError::Callback("/error?message=x".into()).into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()["location"], "/error?message=x");
    }

    #[test]
    fn test_crate_errors_fail_closed() {
        assert!(matches!(
            AuthError::from(crate::error::Error::TransientBackend("x".into())),
            AuthError::Unauthenticated
        ));
        assert!(matches!(
            AuthError::from(crate::error::Error::SessionExpired),
            AuthError::SessionExpired
        ));
    }
}
