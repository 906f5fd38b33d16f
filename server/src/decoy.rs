//! Answers stray HTTP requests with a harmless image so port scanners see
//! an ordinary web server.

use regex::bytes::Regex;
use std::sync::OnceLock;

const IMAGE: &[u8] = include_bytes!("../assets/decoy.gif");

/// Largest request the decoy reads before answering.
pub const MAX_REQUEST_SIZE: usize = 65536;

/// Cheap first check on the bytes a failed packet read consumed.
pub fn looks_like_http(data: &[u8]) -> bool {
    data.starts_with(b"GET ")
}

/// True if `data` starts with a complete HTTP GET request line.
pub fn is_http_request(data: &[u8]) -> bool {
    static REQUEST_LINE: OnceLock<Regex> = OnceLock::new();
    REQUEST_LINE
        .get_or_init(|| {
            Regex::new(r"(?-u)^GET .*? HTTP/[0-9]+(?:\.[0-9]+)*\r\n")
                .expect("request line pattern is valid")
        })
        .is_match(data)
}

/// Complete HTTP response carrying the image.
pub fn response() -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: image/gif\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        IMAGE.len()
    )
    .into_bytes();
    response.extend_from_slice(IMAGE);
    response
}
