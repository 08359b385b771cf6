//! Error types for the booking client.

use thiserror::Error;

/// Errors returned by the booking platform or the transport.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Login was rejected.
    #[error("invalid login or password")]
    InvalidLoginOrPassword,

    /// The account already holds a booking for this activity.
    #[error("activity booking already exists")]
    AlreadyBooked,

    /// The booking window for this activity has not opened yet.
    #[error("too early to book the activity")]
    BookingTooEarly,

    /// Any other error reported by the platform.
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },

    /// Response carried neither an error nor an ok result.
    #[error("unexpected result: {0:?}")]
    UnexpectedResult(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    /// Whether this error means the desired booking is already in place.
    pub fn is_already_booked(&self) -> bool {
        matches!(self, ApiError::AlreadyBooked)
    }

    /// Map a platform error code to a typed error.
    pub(crate) fn from_code(code: &str, message: &str) -> Self {
        match code {
            "USER_ALREADY_BOOKED" => ApiError::AlreadyBooked,
            "ACTIVITY_BOOKING_TO_EARLY" => ApiError::BookingTooEarly,
            _ => ApiError::Rejected {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }
}
