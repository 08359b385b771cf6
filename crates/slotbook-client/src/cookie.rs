//! `Set-Cookie` parsing for the login response.

use chrono::{DateTime, NaiveDateTime, Utc};

/// The session cookie issued on login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    /// `None` when the server sent no parseable expiry.
    pub expires: Option<DateTime<Utc>>,
}

/// Expiry format used by the platform, e.g. `Mon, 02-Jan-2006 15:04:05 GMT`.
const EXPIRES_FORMAT: &str = "%a, %d-%b-%Y %H:%M:%S GMT";

impl SessionCookie {
    /// Parse a raw `Set-Cookie` header value.
    ///
    /// Returns `None` if no `name=value` pair is present.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut cookie: Option<(String, String)> = None;
        let mut expires = None;

        for part in raw.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = match part.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (part, ""),
            };

            match key.to_ascii_lowercase().as_str() {
                "expires" => expires = parse_expires(value),
                "max-age" | "path" | "domain" | "secure" | "httponly" | "samesite" => {}
                _ => {
                    if cookie.is_none() && !value.is_empty() {
                        cookie = Some((key.to_string(), value.to_string()));
                    }
                }
            }
        }

        cookie.map(|(name, value)| Self {
            name,
            value,
            expires,
        })
    }
}

fn parse_expires(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, EXPIRES_FORMAT)
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc2822(value)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        })
}
