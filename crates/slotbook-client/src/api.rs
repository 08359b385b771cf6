//! The booking platform contract.

use async_trait::async_trait;

use crate::{ActivityBooking, ApiError, Event, ListEventsInput, LoginData, Session, SessionCookie};

/// Side-effecting calls against the booking platform.
#[async_trait]
pub trait BookingApi: Send + Sync {
    /// Exchange a login and password for a session cookie.
    async fn login(&self, data: &LoginData) -> Result<SessionCookie, ApiError>;

    /// Activities on the calendar within the given window, each annotated
    /// with the account's own booking.
    async fn list_events(
        &self,
        session: &Session,
        input: &ListEventsInput,
    ) -> Result<Vec<Event>, ApiError>;

    /// Book a slot on an activity.
    ///
    /// Booking an activity the account already holds fails with
    /// [`ApiError::AlreadyBooked`].
    async fn book_activity(
        &self,
        session: &Session,
        activity_id: &str,
    ) -> Result<ActivityBooking, ApiError>;

    /// Cancel an existing booking.
    async fn cancel_booking(&self, session: &Session, booking_id: &str) -> Result<(), ApiError>;
}
