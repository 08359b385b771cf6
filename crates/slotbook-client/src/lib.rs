//! Client for the third-party booking platform.
//!
//! The scheduler only ever talks to the platform through the [`BookingApi`]
//! trait, so tests can substitute a fake. [`HttpBookingClient`] is the real
//! implementation.

mod api;
mod client;
mod cookie;
mod error;
mod types;

pub use api::BookingApi;
pub use client::{DEFAULT_BASE_URL, HttpBookingClient};
pub use cookie::SessionCookie;
pub use error::ApiError;
pub use types::{ActivityBooking, Event, ListEventsInput, LoginData, Session};
