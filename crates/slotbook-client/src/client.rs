//! HTTP implementation of the booking platform API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, COOKIE, SET_COOKIE, USER_AGENT};
use reqwest::{Client, redirect};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::types::{ActivitiesResponse, ActivityEntry, ApiResponse, ParticipateResponse};
use crate::{
    ActivityBooking, ApiError, BookingApi, Event, ListEventsInput, LoginData, Session, SessionCookie,
};

/// Production platform URL.
pub const DEFAULT_BASE_URL: &str = "https://pilatescomplete.wondr.se";

/// Name of the session cookie.
const COOKIE_NAME: &str = "CAKEPHP";

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:129.0) Gecko/20100101 Firefox/129.0";

/// Body sent with participate and cancel requests.
const BOOKING_BODY: &str = r#"{"ActivityBooking":{"extras":{},"resources":{},"participants":1}}"#;

/// Client for the booking platform.
pub struct HttpBookingClient {
    http: Client,
    base_url: String,
}

impl HttpBookingClient {
    /// Create a client for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        // Login answers with a redirect; the cookie is on that first response.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_authenticated<T: DeserializeOwned>(
        &self,
        session: &Session,
        path: &str,
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        info!(method = "POST", url = %url, "booking platform request");

        let response = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(COOKIE, format!("{}={}", COOKIE_NAME, session.token))
            .body(BOOKING_BODY)
            .send()
            .await?;

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get_authenticated<T: DeserializeOwned>(
        &self,
        session: &Session,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        info!(method = "GET", url = %url, "booking platform request");

        let response = self
            .http
            .get(&url)
            .query(query)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(COOKIE, format!("{}={}", COOKIE_NAME, session.token))
            .send()
            .await?;

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl BookingApi for HttpBookingClient {
    async fn login(&self, data: &LoginData) -> Result<SessionCookie, ApiError> {
        info!(login = %data.login, "booking platform login");

        let url = format!("{}/", self.base_url);
        let form = [
            ("_method", "POST"),
            ("data[User][email]", data.login.as_str()),
            ("data[User][password]", data.password.as_str()),
        ];

        let response = self
            .http
            .post(&url)
            .header(ACCEPT, "text/html")
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .form(&form)
            .send()
            .await?;

        let cookie = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(SessionCookie::parse);

        match cookie {
            Some(cookie) => {
                debug!(expires = ?cookie.expires, "received session cookie");
                Ok(cookie)
            }
            None => Err(ApiError::InvalidLoginOrPassword),
        }
    }

    async fn list_events(
        &self,
        session: &Session,
        input: &ListEventsInput,
    ) -> Result<Vec<Event>, ApiError> {
        let response: ActivitiesResponse = self
            .get_authenticated(session, "/w_booking/activities/list", &input.query())
            .await?;
        // The list answers without a result field when it succeeds
        if response.envelope.result == "error" {
            return Err(ApiError::from_code(
                &response.envelope.error_code,
                &response.envelope.message,
            ));
        }
        let events: Vec<Event> = response
            .activities
            .into_iter()
            .map(ActivityEntry::into_event)
            .collect();
        debug!(count = events.len(), "listed events");
        Ok(events)
    }

    async fn book_activity(
        &self,
        session: &Session,
        activity_id: &str,
    ) -> Result<ActivityBooking, ApiError> {
        let path = format!("/w_booking/activities/participate/{}/?force=1", activity_id);
        let response: ParticipateResponse = self.post_authenticated(session, &path).await?;
        response.envelope.check()?;
        Ok(response.booking)
    }

    async fn cancel_booking(&self, session: &Session, booking_id: &str) -> Result<(), ApiError> {
        let path = format!("/w_booking/activities/cancel/{}/1?force=1", booking_id);
        let response: ApiResponse = self.post_authenticated(session, &path).await?;
        response.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = HttpBookingClient::new("https://example.com/").unwrap();
        assert_eq!(client.base_url(), "https://example.com");
    }

    #[tokio::test]
    async fn test_login_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("alice%40example.com"))
            .respond_with(ResponseTemplate::new(302).insert_header(
                "set-cookie",
                "CAKEPHP=session-token; expires=Tue, 03-Sep-2024 19:51:39 GMT; path=/",
            ))
            .mount(&mock_server)
            .await;

        let client = HttpBookingClient::new(mock_server.uri()).unwrap();
        let cookie = client
            .login(&LoginData {
                login: "alice@example.com".to_string(),
                password: "hunter2".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(cookie.name, "CAKEPHP");
        assert_eq!(cookie.value, "session-token");
        assert!(cookie.expires.is_some());
    }

    #[tokio::test]
    async fn test_login_without_cookie_is_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>bad login</html>"))
            .mount(&mock_server)
            .await;

        let client = HttpBookingClient::new(mock_server.uri()).unwrap();
        let result = client
            .login(&LoginData {
                login: "alice@example.com".to_string(),
                password: "wrong".to_string(),
            })
            .await;

        assert!(matches!(result, Err(ApiError::InvalidLoginOrPassword)));
    }

    #[tokio::test]
    async fn test_book_activity_sends_session_cookie() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/w_booking/activities/participate/4242/"))
            .and(header("cookie", "CAKEPHP=tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": "ok",
                "ActivityBooking": {"id": "77", "status": "ok"}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = HttpBookingClient::new(mock_server.uri()).unwrap();
        let booking = client
            .book_activity(&Session::new("tok"), "4242")
            .await
            .unwrap();

        assert_eq!(booking.booking_id, "77");
    }

    #[tokio::test]
    async fn test_list_events_sends_window_and_cookie() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/w_booking/activities/list"))
            .and(query_param("from", "2024-09-01"))
            .and(query_param("to", "2024-09-07"))
            .and(header("cookie", "CAKEPHP=tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "activities": [
                    {
                        "Activity": {
                            "id": "4242",
                            "start": "2024-09-03 18:00:00",
                            "length": "55",
                            "places": "12",
                            "booking_places_count": "4"
                        },
                        "ActivityType": {"name": "Reformer", "days_in_future_book": "1"},
                        "MyActivityBooking": {"id": "77", "status": "ok"}
                    },
                    {
                        "Activity": {
                            "id": "4243",
                            "start": "2024-09-04 07:30:00",
                            "length": 45
                        },
                        "ActivityType": {"name": "Mat"}
                    }
                ]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = HttpBookingClient::new(mock_server.uri()).unwrap();
        let input = ListEventsInput {
            from: chrono::NaiveDate::from_ymd_opt(2024, 9, 1),
            to: chrono::NaiveDate::from_ymd_opt(2024, 9, 7),
        };
        let events = client
            .list_events(&Session::new("tok"), &input)
            .await
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "4242");
        assert_eq!(events[0].name, "Reformer");
        assert_eq!(
            events[0].booking.as_ref().map(|b| b.booking_id.as_str()),
            Some("77")
        );
        assert_eq!(events[1].id, "4243");
        assert_eq!(events[1].length_minutes, 45);
        assert!(events[1].booking.is_none());
    }

    #[tokio::test]
    async fn test_list_events_error_envelope() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/w_booking/activities/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": "error",
                "error_code": "NOT_LOGGED_IN",
                "message": "Please log in"
            })))
            .mount(&mock_server)
            .await;

        let client = HttpBookingClient::new(mock_server.uri()).unwrap();
        let err = client
            .list_events(&Session::new("stale"), &ListEventsInput::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Rejected { code, .. } if code == "NOT_LOGGED_IN"));
    }

    #[tokio::test]
    async fn test_book_activity_already_booked() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/w_booking/activities/participate/4242/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": "error",
                "error_code": "USER_ALREADY_BOOKED",
                "message": "You are already booked"
            })))
            .mount(&mock_server)
            .await;

        let client = HttpBookingClient::new(mock_server.uri()).unwrap();
        let err = client
            .book_activity(&Session::new("tok"), "4242")
            .await
            .unwrap_err();

        assert!(err.is_already_booked());
    }

    #[tokio::test]
    async fn test_cancel_booking_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/w_booking/activities/cancel/77/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": "error",
                "error_code": "CANCEL_TOO_LATE",
                "message": "Too late to cancel"
            })))
            .mount(&mock_server)
            .await;

        let client = HttpBookingClient::new(mock_server.uri()).unwrap();
        let err = client
            .cancel_booking(&Session::new("tok"), "77")
            .await
            .unwrap_err();

        match err {
            ApiError::Rejected { code, message } => {
                assert_eq!(code, "CANCEL_TOO_LATE");
                assert_eq!(message, "Too late to cancel");
            }
            other => panic!("Expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_json_response_is_json_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/w_booking/activities/cancel/77/1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&mock_server)
            .await;

        let client = HttpBookingClient::new(mock_server.uri()).unwrap();
        let err = client
            .cancel_booking(&Session::new("tok"), "77")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Json(_)));
    }
}
