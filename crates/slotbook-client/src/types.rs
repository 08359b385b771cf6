//! Request and response types.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};

use crate::ApiError;

/// Timestamp layout the platform uses, in its own local time.
const PLATFORM_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Login form fields.
#[derive(Debug, Clone)]
pub struct LoginData {
    pub login: String,
    pub password: String,
}

/// A live platform session: the cookie value sent with authenticated calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
}

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

/// A booking held by the account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityBooking {
    /// Booking ID, used for cancellation.
    #[serde(rename = "id", default)]
    pub booking_id: String,
    /// `ok`, `reserved`, `missed` or `checked`.
    #[serde(default)]
    pub status: String,
}

/// A bookable activity on the platform's calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Activity ID, the target of a booking.
    pub id: String,
    pub name: String,
    pub location: String,
    pub trainer: String,
    pub notice: String,
    /// Start in the platform's local time.
    pub start: NaiveDateTime,
    pub length_minutes: u32,
    /// When booking opens: 07:00:01 on the start day, moved back by the
    /// activity type's booking horizon.
    pub bookable_from: NaiveDateTime,
    pub places_total: u32,
    pub places_taken: u32,
    pub reserves_total: u32,
    pub reserves_taken: u32,
    /// The account's own booking, if it holds one.
    pub booking: Option<ActivityBooking>,
}

impl Event {
    pub fn end(&self) -> NaiveDateTime {
        self.start + Duration::minutes(i64::from(self.length_minutes))
    }

    pub fn is_booked(&self) -> bool {
        self.booking.is_some()
    }

    pub fn is_bookable(&self) -> bool {
        self.places_taken < self.places_total
    }

    pub fn is_reservable(&self) -> bool {
        self.reserves_taken < self.reserves_total
    }

    /// No place and no reserve spot left.
    pub fn is_fully_booked(&self) -> bool {
        !self.is_bookable() && !self.is_reservable()
    }
}

/// Date window for [`crate::BookingApi::list_events`]. Open ends use the
/// platform's default range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListEventsInput {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl ListEventsInput {
    pub(crate) fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(from) = self.from {
            query.push(("from", from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = self.to {
            query.push(("to", to.format("%Y-%m-%d").to_string()));
        }
        query
    }
}

/// Envelope shared by every JSON response.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiResponse {
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub message: String,
}

impl ApiResponse {
    pub(crate) fn check(&self) -> Result<(), ApiError> {
        if self.result == "error" {
            return Err(ApiError::from_code(&self.error_code, &self.message));
        }
        if self.result != "ok" {
            return Err(ApiError::UnexpectedResult(self.result.clone()));
        }
        Ok(())
    }
}

/// Response from the participate endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct ParticipateResponse {
    #[serde(flatten)]
    pub envelope: ApiResponse,
    #[serde(rename = "ActivityBooking", default)]
    pub booking: ActivityBooking,
}

/// Response from the activity list endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct ActivitiesResponse {
    #[serde(flatten)]
    pub envelope: ApiResponse,
    #[serde(default)]
    pub activities: Vec<ActivityEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActivityEntry {
    #[serde(rename = "Activity")]
    activity: Activity,
    #[serde(rename = "ActivityType", default)]
    activity_type: ActivityType,
    #[serde(rename = "ActivityLocation", default)]
    location: Named,
    #[serde(rename = "User", default)]
    users: Vec<Trainer>,
    #[serde(rename = "MyActivityBooking", default)]
    booking: Option<ActivityBooking>,
}

#[derive(Debug, Deserialize)]
struct Activity {
    id: String,
    #[serde(deserialize_with = "platform_time")]
    start: NaiveDateTime,
    #[serde(default, deserialize_with = "count")]
    length: u32,
    #[serde(default, deserialize_with = "count")]
    places: u32,
    #[serde(default, deserialize_with = "count")]
    booking_places_count: u32,
    #[serde(default, deserialize_with = "count")]
    reserves: u32,
    #[serde(default, deserialize_with = "count")]
    booking_reserves_count: u32,
    #[serde(default)]
    notice: String,
}

#[derive(Debug, Default, Deserialize)]
struct ActivityType {
    #[serde(default)]
    name: String,
    /// Days ahead of the start that booking opens; empty means same day.
    #[serde(default, deserialize_with = "count")]
    days_in_future_book: u32,
}

#[derive(Debug, Default, Deserialize)]
struct Named {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Trainer {
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
}

impl ActivityEntry {
    pub(crate) fn into_event(self) -> Event {
        let horizon = Duration::days(i64::from(self.activity_type.days_in_future_book));
        let opening_day = self.activity.start.date() - horizon;
        let trainer = self
            .users
            .iter()
            .flat_map(|u| {
                u.first_name
                    .split_whitespace()
                    .chain(u.last_name.split_whitespace())
            })
            .collect::<Vec<_>>()
            .join(" ");

        Event {
            id: self.activity.id,
            name: self.activity_type.name,
            location: self.location.name,
            trainer,
            notice: self.activity.notice,
            start: self.activity.start,
            length_minutes: self.activity.length,
            bookable_from: opening_day.and_time(booking_opens_at()),
            places_total: self.activity.places,
            places_taken: self.activity.booking_places_count,
            reserves_total: self.activity.reserves,
            reserves_taken: self.activity.booking_reserves_count,
            booking: self.booking.filter(|b| !b.booking_id.is_empty()),
        }
    }
}

/// Time of day booking opens.
fn booking_opens_at() -> NaiveTime {
    NaiveTime::from_hms_opt(7, 0, 1).unwrap_or_default()
}

/// The platform sends counts as numbers, numeric strings, `""` or `null`.
fn count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
        Null,
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Null => Ok(0),
        Raw::Text(text) if text.trim().is_empty() => Ok(0),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn platform_time<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
    let text = String::deserialize(deserializer)?;
    NaiveDateTime::parse_from_str(&text, PLATFORM_TIME_FORMAT).map_err(serde::de::Error::custom)
}
