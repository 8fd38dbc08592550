//! netgate-api: Shared types for the netgate boundary protocol
//!
//! This crate defines what crosses the boundary between a sandboxed guest
//! (wasm plugin) and its host. Structured values are encoded with MessagePack;
//! text handed to the capability query travels as raw UTF-8 bytes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The one capability this layer checks before any network operation
pub const NETWORK_CAPABILITY: &str = "network";

/// Import module the host functions are registered under
pub const IMPORT_MODULE: &str = "env";

/// `sk_has_capability(name_ptr: i32, name_len: i32) -> i32`
pub const HAS_CAPABILITY_IMPORT: &str = "sk_has_capability";

/// `sk_http_request(req_ptr: i32, req_len: i32) -> i64`
pub const HTTP_REQUEST_IMPORT: &str = "sk_http_request";

/// Guest exports the host relies on
pub const MEMORY_EXPORT: &str = "memory";
pub const ALLOC_EXPORT: &str = "plugin_alloc";
pub const DEALLOC_EXPORT: &str = "plugin_dealloc";

/// Value returned by `sk_has_capability` when the capability is granted
pub const CAPABILITY_GRANTED: i32 = 1;

/// Status returned by status-returning operations that could not be attempted
pub const STATUS_NOT_ATTEMPTED: i32 = -1;

/// The only status `http_get` accepts as success
pub const STATUS_OK: i32 = 200;

/// Content type used for the JSON bodies of POST and PUT
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Fixed HTTP verb set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request handed to a transport
///
/// `body` and `content_type` are optional: `None` means "not provided" and is
/// encoded distinctly from `Some(String::new())`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    /// Target URL
    pub url: String,

    /// HTTP method (free-form for the generalized request)
    pub method: String,

    /// Request body
    #[serde(default)]
    pub body: Option<String>,

    /// Content-Type header
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Reasons a request is not well-formed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Request URL is empty")]
    EmptyUrl,

    #[error("Request method is empty")]
    EmptyMethod,
}

impl HttpRequest {
    /// Create a request without body or content type
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            body: None,
            content_type: None,
        }
    }

    /// Create a GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get.as_str(), url)
    }

    /// Create a DELETE request
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete.as_str(), url)
    }

    /// Create a POST request carrying a JSON body
    pub fn post_json(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post.as_str(), url)
            .body(body)
            .content_type(JSON_CONTENT_TYPE)
    }

    /// Create a PUT request carrying a JSON body
    pub fn put_json(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put.as_str(), url)
            .body(body)
            .content_type(JSON_CONTENT_TYPE)
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the content type
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Check that url and method are present
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.url.trim().is_empty() {
            return Err(RequestError::EmptyUrl);
        }
        if self.method.trim().is_empty() {
            return Err(RequestError::EmptyMethod);
        }
        Ok(())
    }
}

/// Response produced by a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: i32,

    /// Response body
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: i32, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is a real HTTP status (100..=599)
    pub fn has_valid_status(&self) -> bool {
        (100..=599).contains(&self.status)
    }
}

/// Transport-level failures
///
/// These cross the boundary inside a [`TransportReply`], so they carry
/// messages rather than source errors.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TransportError {
    /// No transport is wired for this deployment
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// The host refused the request (capability not granted host-side)
    #[error("Request denied by host")]
    Denied,

    /// The request did not complete in time
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Connection or protocol failure
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Request or response could not be encoded/decoded or violated limits
    #[error("Malformed message: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Create an unavailable error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    /// Create a malformed message error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }

    /// Whether no transport exists, as opposed to a transport that failed
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Short label for logs and audit records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Denied => "denied",
            Self::Timeout(_) => "timeout",
            Self::Connection(_) => "connection",
            Self::Malformed(_) => "malformed",
        }
    }
}

/// Outcome of a transport call, as written back to the guest
pub type TransportReply = Result<HttpResponse, TransportError>;

/// MessagePack codec failures
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Deserialization failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode a boundary value as MessagePack
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec(value)?)
}

/// Decode a boundary value from MessagePack
pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Pack a pointer and length into a single i64 value
///
/// wasm32-unknown-unknown exports cannot return two values, so buffers are
/// returned as `ptr << 32 | len`. `0` means "no buffer".
#[inline]
pub fn pack_ptr_len(ptr: i32, len: i32) -> i64 {
    ((ptr as i64) << 32) | (len as i64 & 0xFFFFFFFF)
}

/// Unpack ptr and len from a packed i64
#[inline]
pub fn unpack_ptr_len(packed: i64) -> (i32, i32) {
    let ptr = (packed >> 32) as i32;
    let len = (packed & 0xFFFFFFFF) as i32;
    (ptr, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_body_differs_from_empty_body() {
        let absent = HttpRequest::get("https://example.com");
        let empty = HttpRequest::get("https://example.com")
            .body("")
            .content_type("");

        let absent_bytes = encode(&absent).unwrap();
        let empty_bytes = encode(&empty).unwrap();
        assert_ne!(absent_bytes, empty_bytes);

        let decoded: HttpRequest = decode(&absent_bytes).unwrap();
        assert_eq!(decoded.body, None);
        assert_eq!(decoded.content_type, None);

        let decoded: HttpRequest = decode(&empty_bytes).unwrap();
        assert_eq!(decoded.body.as_deref(), Some(""));
        assert_eq!(decoded.content_type.as_deref(), Some(""));
    }

    #[test]
    fn test_reply_serialization() {
        let reply: TransportReply = Err(TransportError::Timeout(5_000));
        let bytes = encode(&reply).unwrap();
        let decoded: TransportReply = decode(&bytes).unwrap();
        assert_eq!(decoded, Err(TransportError::Timeout(5_000)));

        let reply: TransportReply = Ok(HttpResponse::new(201, "created"));
        let decoded: TransportReply = decode(&encode(&reply).unwrap()).unwrap();
        assert_eq!(decoded, Ok(HttpResponse::new(201, "created")));
    }

    #[test]
    fn test_validate() {
        assert!(HttpRequest::get("https://example.com").validate().is_ok());
        assert_eq!(
            HttpRequest::get("").validate(),
            Err(RequestError::EmptyUrl)
        );
        assert_eq!(
            HttpRequest::new(" ", "https://example.com").validate(),
            Err(RequestError::EmptyMethod)
        );
    }

    #[test]
    fn test_json_constructors() {
        let req = HttpRequest::post_json("https://example.com", "{}");
        assert_eq!(req.method, "POST");
        assert_eq!(req.body.as_deref(), Some("{}"));
        assert_eq!(req.content_type.as_deref(), Some(JSON_CONTENT_TYPE));

        let req = HttpRequest::delete("https://example.com/1");
        assert_eq!(req.body, None);
        assert_eq!(req.content_type, None);
    }

    #[test]
    fn test_method_names() {
        assert_eq!(HttpRequest::get("u").method, HttpMethod::Get.to_string());
        assert_eq!(HttpRequest::put_json("u", "{}").method, "PUT");
        assert_eq!(HttpRequest::delete("u").method, HttpMethod::Delete.as_str());
    }

    #[test]
    fn test_status_validity() {
        for status in [100, 200, 404, 500, 599] {
            assert!(HttpResponse::new(status, "").has_valid_status());
        }
        for status in [STATUS_NOT_ATTEMPTED, 0, 99, 600] {
            assert!(!HttpResponse::new(status, "").has_valid_status());
        }
    }

    #[test]
    fn test_pack_unpack() {
        let packed = pack_ptr_len(0x12345678, 0x100);
        assert_eq!(unpack_ptr_len(packed), (0x12345678, 0x100));
        assert_eq!(unpack_ptr_len(0), (0, 0));
    }

    #[test]
    fn test_error_kind() {
        assert!(TransportError::unavailable("stub").is_unavailable());
        assert_eq!(TransportError::Denied.kind(), "denied");
        assert_eq!(TransportError::malformed("x").kind(), "malformed");
    }
}
