//! Request head parsing on top of [`httparse`].

use std::{borrow::Cow, collections::HashMap};

use thiserror::Error;

use super::Method;

const MAX_HEADERS: usize = 64;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request head is incomplete")]
    Incomplete,

    #[error("malformed request: {0}")]
    Malformed(#[from] httparse::Error),
}

/// A parsed request head.
///
/// The query string is kept raw for [`full_url`](Self::full_url) and also
/// decoded into parameters for handlers.
///
/// ```
/// use querylog::http::Request;
///
/// let raw = b"GET /search?q=a%20b HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _head_len) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.path(), "/search");
/// assert_eq!(request.query_param("q"), Some("a b"));
/// assert_eq!(request.full_url(), "http://localhost/search?q=a%20b");
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    params: HashMap<String, String>,
    headers: Vec<(String, String)>,
    http11: bool,
}

impl Request {
    /// Parses the head at the start of `buf`.
    ///
    /// Returns the request and the head length; any body follows at that offset.
    ///
    /// # Errors
    ///
    /// [`RequestError::Incomplete`] until the blank line ending the head has
    /// arrived, [`RequestError::Malformed`] when it never will parse.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut head = httparse::Request::new(&mut slots);
        let httparse::Status::Complete(head_len) = head.parse(buf)? else {
            return Err(RequestError::Incomplete);
        };
        let (Some(method), Some(target), Some(version)) = (head.method, head.path, head.version)
        else {
            return Err(RequestError::Incomplete);
        };

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_owned())),
            None => (target, None),
        };
        let headers = head
            .headers
            .iter()
            .filter_map(|h| Some((h.name.to_owned(), std::str::from_utf8(h.value).ok()?.to_owned())))
            .collect();

        let request = Self {
            method: method.parse().unwrap_or_else(|never| match never {}),
            path: path.to_owned(),
            params: query.as_deref().map(decode_query).unwrap_or_default(),
            query,
            headers,
            http11: version == 1,
        };
        Ok((request, head_len))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path without the query string, as received.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Decoded query parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Absolute URL, still percent-encoded.
    ///
    /// The authority is the `Host` header, or `localhost` without one. The
    /// server speaks plain HTTP only, so the scheme is always `http`.
    pub fn full_url(&self) -> String {
        let host = self.header("host").unwrap_or("localhost");
        match self.query.as_deref() {
            Some(query) if !query.is_empty() => format!("http://{host}{}?{query}", self.path),
            _ => format!("http://{host}{}", self.path),
        }
    }

    /// Whether the connection stays open after the response.
    pub fn keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(value) if value.eq_ignore_ascii_case("close") => false,
            Some(value) if value.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.http11,
        }
    }

    pub fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|len| len.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Decodes a form-style percent-encoded string.
///
/// `+` becomes a space and `%XX` escapes are decoded. Invalid UTF-8 in the
/// decoded bytes is replaced with U+FFFD rather than rejected.
///
/// ```
/// use querylog::http::url_decode;
///
/// assert_eq!(url_decode("/search?q=a%20b"), "/search?q=a b");
/// assert_eq!(url_decode("q=a+b%25"), "q=a b%");
/// ```
pub fn url_decode(input: &str) -> Cow<'_, str> {
    if !input.contains(['%', '+']) {
        return Cow::Borrowed(input);
    }
    let spaced = input.replace('+', " ");
    let decoded = urlencoding::decode_binary(spaced.as_bytes());
    Cow::Owned(String::from_utf8_lossy(&decoded).into_owned())
}

fn decode_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (url_decode(key).into_owned(), url_decode(value).into_owned())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Request {
        Request::parse(raw.as_bytes()).unwrap().0
    }

    #[test]
    fn head_length_points_at_body() {
        let raw = b"POST /users HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
        let (request, head_len) = Request::parse(raw).unwrap();
        assert_eq!(request.method(), &Method::Post);
        assert_eq!(request.content_length(), 5);
        assert_eq!(&raw[head_len..], b"hello");
    }

    #[test]
    fn query_is_decoded_for_handlers() {
        let request = parse("GET /search?q=rust+lang&tag=a%26b&flag HTTP/1.1\r\n\r\n");
        assert_eq!(request.path(), "/search");
        assert_eq!(request.query_param("q"), Some("rust lang"));
        assert_eq!(request.query_param("tag"), Some("a&b"));
        assert_eq!(request.query_param("flag"), Some(""));
    }

    #[test]
    fn incomplete_and_malformed_heads() {
        assert!(matches!(
            Request::parse(b"GET / HTTP/1.1\r\nHost:"),
            Err(RequestError::Incomplete)
        ));
        assert!(matches!(
            Request::parse(b"GET / HTTP/2.0\r\n\r\n"),
            Err(RequestError::Malformed(_))
        ));
    }

    #[test]
    fn keep_alive_follows_version_and_header() {
        assert!(parse("GET / HTTP/1.1\r\n\r\n").keep_alive());
        assert!(!parse("GET / HTTP/1.1\r\nConnection: Close\r\n\r\n").keep_alive());
        assert!(!parse("GET / HTTP/1.0\r\n\r\n").keep_alive());
        assert!(parse("GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").keep_alive());
    }

    #[test]
    fn full_url_uses_host_header() {
        let request = parse("GET /users/7?tab=posts HTTP/1.1\r\nHost: example.com:8080\r\n\r\n");
        assert_eq!(request.full_url(), "http://example.com:8080/users/7?tab=posts");
    }

    #[test]
    fn full_url_without_host_or_query() {
        assert_eq!(parse("GET /health? HTTP/1.0\r\n\r\n").full_url(), "http://localhost/health");
    }

    #[test]
    fn url_decode_passthrough_borrows() {
        assert!(matches!(url_decode("/plain/path"), Cow::Borrowed("/plain/path")));
    }

    #[test]
    fn url_decode_invalid_utf8_is_lossy() {
        assert_eq!(url_decode("a%FFb"), "a\u{FFFD}b");
    }
}
