//! Response serialization.
//!
//! # Responsibilities
//! - Status line with default status selection
//! - Header block serialization (pseudo-fields and framing headers skipped)
//! - Fixed-length (HTTP/1.0) and chunked (HTTP/1.1+) body framing
//!
//! # Design Decisions
//! - Pure functions over `Vec<u8>`; the adapter decides when to write
//! - A one-shot body is framed as exactly one chunk plus the terminator

use std::io::Write;

use crate::http::request::{HeaderValue, Headers, Version, PSEUDO_MARKER};

pub const CHUNK_TERMINATOR: &[u8] = b"0\r\n\r\n";

/// How the body following a head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// No body follows.
    Empty,
    /// Chunked transfer encoding.
    Chunked,
    /// Raw bytes until the connection closes (HTTP/1.0 streaming).
    UntilClose,
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        426 => "Upgrade Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "",
    }
}

fn write_status_line(out: &mut Vec<u8>, version: Version, status: u16) {
    // writing into a Vec cannot fail
    let _ = write!(out, "{} {} {}\r\n", version, status, reason_phrase(status));
}

/// Serialize headers and the terminating blank line.
pub fn write_headers(out: &mut Vec<u8>, headers: &Headers) {
    for (name, value) in headers.iter() {
        if name.starts_with(PSEUDO_MARKER)
            || name.eq_ignore_ascii_case("Content-Length")
            || name.eq_ignore_ascii_case("Transfer-Encoding")
        {
            continue;
        }

        match value {
            HeaderValue::Single(v) => write_header_line(out, name, v),
            HeaderValue::List(vs) => {
                for v in vs {
                    write_header_line(out, name, v);
                }
            }
        }
    }

    out.extend_from_slice(b"\r\n");
}

fn write_header_line(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Append one chunk. An empty `data` writes nothing unless `done`, since a
/// zero-length chunk ends the stream.
pub fn write_chunk(out: &mut Vec<u8>, data: &[u8], done: bool) {
    if !data.is_empty() {
        let _ = write!(out, "{:x}\r\n", data.len());
        out.extend_from_slice(data);
        out.extend_from_slice(b"\r\n");
    }

    if done {
        out.extend_from_slice(CHUNK_TERMINATOR);
    }
}

/// Encode a complete response: head and body in one buffer.
///
/// Without an explicit status, a non-empty body gets 200 and an empty one 204.
pub fn encode_response(version: Version, headers: &Headers, body: &[u8]) -> Vec<u8> {
    let status = headers
        .status()
        .unwrap_or(if body.is_empty() { 204 } else { 200 });

    let mut out = Vec::with_capacity(128 + body.len());
    write_status_line(&mut out, version, status);

    if body.is_empty() {
        if status != 204 {
            out.extend_from_slice(b"Content-Length: 0\r\n");
        }
        write_headers(&mut out, headers);
    } else if version.minor == 0 {
        let _ = write!(out, "Content-Length: {}\r\n", body.len());
        write_headers(&mut out, headers);
        out.extend_from_slice(body);
    } else {
        out.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
        write_headers(&mut out, headers);
        write_chunk(&mut out, body, true);
    }

    out
}

/// Encode a head for a streamed response.
///
/// `empty_response` selects 204 framing with no body; otherwise the status
/// defaults to 200 and the body is chunked (HTTP/1.1+) or runs until close
/// (HTTP/1.0).
pub fn encode_head(version: Version, headers: &Headers, empty_response: bool) -> (Vec<u8>, BodyMode) {
    let status = headers
        .status()
        .unwrap_or(if empty_response { 204 } else { 200 });

    let mut out = Vec::with_capacity(128);
    write_status_line(&mut out, version, status);

    let mode = if empty_response {
        if status != 204 {
            out.extend_from_slice(b"Content-Length: 0\r\n");
        }
        BodyMode::Empty
    } else if version.minor == 0 {
        BodyMode::UntilClose
    } else {
        out.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
        BodyMode::Chunked
    };

    write_headers(&mut out, headers);

    (out, mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(buf: &[u8]) -> &str {
        std::str::from_utf8(buf).unwrap()
    }

    #[test]
    fn chunked_by_default_on_http11() {
        let headers = Headers::new().with("Content-Type", "text/plain");
        let out = encode_response(Version::HTTP_11, &headers, b"hello");

        assert_eq!(
            text(&out),
            "HTTP/1.1 200 OK\r\n\
             Transfer-Encoding: chunked\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             5\r\nhello\r\n0\r\n\r\n"
        );
    }

    #[test]
    fn content_length_on_http10() {
        let out = encode_response(Version::HTTP_10, &Headers::new(), b"hello");
        let s = text(&out);

        assert!(s.starts_with("HTTP/1.0 200 OK\r\nContent-Length: 5\r\n"));
        assert!(!s.contains("Transfer-Encoding"));
        assert!(s.ends_with("\r\n\r\nhello"));
        assert_eq!(s.matches("hello").count(), 1);
    }

    #[test]
    fn empty_body_framing() {
        let out = encode_response(Version::HTTP_11, &Headers::new(), b"");
        assert_eq!(text(&out), "HTTP/1.1 204 No Content\r\n\r\n");

        let headers = Headers::new().with_status(404);
        let out = encode_response(Version::HTTP_11, &headers, b"");
        assert_eq!(text(&out), "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
    }

    #[test]
    fn explicit_status_wins() {
        let headers = Headers::new().with_status(201);
        let out = encode_response(Version::HTTP_11, &headers, b"x");
        assert!(text(&out).starts_with("HTTP/1.1 201 Created\r\n"));

        let headers = Headers::new().with_status(299);
        let out = encode_response(Version::HTTP_11, &headers, b"x");
        assert!(text(&out).starts_with("HTTP/1.1 299 \r\n"));
    }

    #[test]
    fn header_serialization_rules() {
        let mut headers = Headers::new()
            .with("Content-Length", "999")
            .with("transfer-encoding", "gzip")
            .with(":internal", "secret")
            .with("Vary", "Accept");
        headers.append("Set-Cookie", "a=1");
        headers.append("Set-Cookie", "b=2");

        let mut out = Vec::new();
        write_headers(&mut out, &headers);

        assert_eq!(
            text(&out),
            "Vary: Accept\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n"
        );
    }

    #[test]
    fn chunk_encoding() {
        let mut out = Vec::new();
        write_chunk(&mut out, &[b'a'; 26], false);
        write_chunk(&mut out, b"", false);
        write_chunk(&mut out, b"z", true);

        let mut expected = b"1a\r\n".to_vec();
        expected.extend_from_slice(&[b'a'; 26]);
        expected.extend_from_slice(b"\r\n1\r\nz\r\n0\r\n\r\n");
        assert_eq!(out, expected);
    }

    #[test]
    fn streamed_heads() {
        let (out, mode) = encode_head(Version::HTTP_11, &Headers::new(), false);
        assert_eq!(text(&out), "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert_eq!(mode, BodyMode::Chunked);

        let (out, mode) = encode_head(Version::HTTP_11, &Headers::new(), true);
        assert_eq!(text(&out), "HTTP/1.1 204 No Content\r\n\r\n");
        assert_eq!(mode, BodyMode::Empty);

        let (out, mode) = encode_head(Version::HTTP_10, &Headers::new(), false);
        assert_eq!(text(&out), "HTTP/1.0 200 OK\r\n\r\n");
        assert_eq!(mode, BodyMode::UntilClose);
    }
}
