#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum DrugBaseError {
    #[error("HTTP client initialization failed: {0}")]
    HttpClientInit(reqwest::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    #[error("HTTP {status} from {api}: {message}")]
    HttpStatus {
        api: String,
        status: u16,
        message: String,
    },

    #[error("API error from {api}: {message}")]
    Api { api: String, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DrugBaseError {
    /// Short, single-line description suitable for a non-blocking notice.
    pub fn notice(&self) -> String {
        let transport = match self {
            Self::Http(err) | Self::HttpMiddleware(reqwest_middleware::Error::Reqwest(err)) => {
                Some(err)
            }
            _ => None,
        };
        match self {
            _ if transport.is_some_and(reqwest::Error::is_timeout) => {
                "Backend timed out".to_string()
            }
            _ if transport.is_some_and(reqwest::Error::is_connect) => {
                "Backend unreachable".to_string()
            }
            Self::Http(_) | Self::HttpMiddleware(_) => "Network error".to_string(),
            Self::HttpStatus { status, .. } => format!("Backend returned HTTP {status}"),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DrugBaseError;

    #[test]
    fn http_status_display_includes_status_and_api() {
        let err = DrugBaseError::HttpStatus {
            api: "drugbase".to_string(),
            status: 500,
            message: "Internal Server Error".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("HTTP 500"));
        assert!(msg.contains("drugbase"));
        assert!(msg.contains("Internal Server Error"));
    }

    #[test]
    fn http_status_notice_omits_body() {
        let err = DrugBaseError::HttpStatus {
            api: "drugbase".to_string(),
            status: 503,
            message: "<html>maintenance</html>".to_string(),
        };

        assert_eq!(err.notice(), "Backend returned HTTP 503");
    }

    #[test]
    fn invalid_argument_notice_is_display() {
        let err = DrugBaseError::InvalidArgument("--page must be at least 1".into());
        assert_eq!(err.notice(), "Invalid argument: --page must be at least 1");
    }
}
