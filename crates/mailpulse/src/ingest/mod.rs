//! Push notification ingress: decoding, authentication, admission and HTTP.

pub mod gate;
pub mod payload;
pub mod verify;
pub mod webhook;

use thiserror::Error;

pub use gate::{Admission, NotificationGate};
pub use payload::{PayloadError, PushEnvelope, PushNotification};
pub use verify::{PushTokenClaims, PushTokenVerifier, TokenInfoVerifier, VerifyError, WebhookAuthenticator};
pub use webhook::{router, AppState, IngestResponse};

/// Request-level failures of the webhook, one per response class.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(#[from] PayloadError),

    #[error("Internal error: {0}")]
    Internal(String),
}
