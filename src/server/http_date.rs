use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::time::SystemTime;

/// RFC 1123 date format, the one flavor of HTTP-date we emit and accept.
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

pub fn format_http_date(timestamp: SystemTime) -> String {
    let datetime: DateTime<Utc> = timestamp.into();
    datetime.format(HTTP_DATE_FORMAT).to_string()
}

/// Returns None for anything that is not a well-formed RFC 1123 date;
/// callers treat an unparseable conditional header as absent.
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    NaiveDateTime::parse_from_str(value, HTTP_DATE_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive).into())
}
