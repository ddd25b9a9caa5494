//! Response header building.

use http::{HeaderMap, HeaderValue};

/// The JSON:API media type, required on every response body this crate
/// produces (§6 "wire format").
pub const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";

/// Build the header set for a document or write-outcome response.
///
/// `location` is set on 201 Created responses for POST (§6 HTTP surface);
/// every other response carries only the JSON:API content type.
pub fn build_response_headers(location: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Ok(v) = HeaderValue::from_str(JSON_API_CONTENT_TYPE) {
        headers.insert(http::header::CONTENT_TYPE, v);
    }

    if let Some(loc) = location {
        if let Ok(v) = HeaderValue::from_str(loc) {
            headers.insert(http::header::LOCATION, v);
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_response_headers_sets_content_type() {
        let headers = build_response_headers(None);
        assert_eq!(headers.get(http::header::CONTENT_TYPE).unwrap(), JSON_API_CONTENT_TYPE);
        assert!(headers.get(http::header::LOCATION).is_none());
    }

    #[test]
    fn test_build_response_headers_sets_location() {
        let headers = build_response_headers(Some("/articles/9"));
        assert_eq!(headers.get(http::header::LOCATION).unwrap(), "/articles/9");
    }
}
