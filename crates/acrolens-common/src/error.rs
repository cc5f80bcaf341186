//! Error types for the network clients.

use acrolens_core::LookupError;
use miette::Diagnostic;

/// Failure talking to a remote service.
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum NetError {
    /// Transport failure
    #[error(transparent)]
    #[diagnostic(code(acrolens::net::http))]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("{service} returned {status}: {message}")]
    #[diagnostic(code(acrolens::net::status))]
    Status {
        service: &'static str,
        status: u16,
        message: String,
    },

    /// Body did not decode
    #[error(transparent)]
    #[diagnostic(code(acrolens::net::decode))]
    Decode(#[from] serde_json::Error),

    /// The service reported an error inside an otherwise successful reply.
    #[error("{service} error: {message}")]
    #[diagnostic(code(acrolens::net::remote))]
    Remote {
        service: &'static str,
        message: String,
    },

    /// A completion came back without any choice.
    #[error("completion has no choices")]
    #[diagnostic(
        code(acrolens::net::empty),
        help("the selected model may not support this request")
    )]
    EmptyCompletion,
}

impl NetError {
    /// Error for a service's failure object, if it carries a message.
    pub(crate) fn remote(service: &'static str, message: impl Into<String>) -> Self {
        NetError::Remote {
            service,
            message: message.into(),
        }
    }

    pub fn into_model_error(self) -> LookupError {
        LookupError::Model(self.to_string().into())
    }

    pub fn into_encyclopedia_error(self) -> LookupError {
        LookupError::Encyclopedia(self.to_string().into())
    }
}

/// Turn a non-success response into `NetError::Status`, reading the
/// service's own message from the body when there is one.
pub(crate) async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, NetError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(NetError::Status {
        service,
        status: status.as_u16(),
        message: error_message(&body).unwrap_or(body),
    })
}

/// `{"error": {"message": ...}}` or `{"error": "..."}`, as both services use.
pub(crate) fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .get("message")
        .or_else(|| error.get("info"))
        .unwrap_or(error)
        .as_str()
        .map(str::to_string)
}
