//! Adapts the sync protocol's field codec (spec §4.11) to axum: request
//! and response bodies are the protocol's own two-letter-keyed,
//! newline-separated wire format, not JSON, so existing clients speaking
//! the wire protocol don't need to change.

use axum::body::Bytes;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use scriptura_core::sync::decode;
use scriptura_core::sync::encode;
use scriptura_core::sync::Fields;

pub fn parse_request_body(body: &Bytes) -> Fields {
    decode(&String::from_utf8_lossy(body))
}

pub fn wire_response(fields: &Fields) -> Response {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8.as_ref())],
        encode(fields),
    )
        .into_response()
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let mut fields = Fields::new();
    fields.insert("er".to_string(), message.into());
    (
        status,
        [(CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8.as_ref())],
        encode(&fields),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_urlencoded_style_wire_body() {
        let body = Bytes::from_static(b"bi=KJV\nbk=40\nch=1");
        let fields = parse_request_body(&body);
        assert_eq!(fields.get("bi").unwrap(), "KJV");
        assert_eq!(fields.get("ch").unwrap(), "1");
    }
}
