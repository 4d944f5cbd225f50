//! Handler responses and their HTTP/1.1 wire encoding.

use bytes::{BufMut, BytesMut};

use super::StatusCode;

/// What a handler answers with.
///
/// The `Connection` header is not part of the response: the server decides it
/// per connection when it calls [`encode`](Self::encode).
///
/// ```
/// use querylog::http::{Response, StatusCode};
///
/// let wire = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"ok":true}"#)
///     .encode(true);
///
/// let text = std::str::from_utf8(&wire).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.ends_with("Content-Length: 11\r\n\r\n{\"ok\":true}"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: String,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body_text(&self) -> &str {
        &self.body
    }

    /// Encodes status line, headers and body.
    ///
    /// A plain-text `Content-Type` is added for a non-empty body that has none.
    /// `Connection` and `Content-Length` always come last.
    pub fn encode(&self, keep_alive: bool) -> BytesMut {
        let mut head = format!("HTTP/1.1 {}\r\n", self.status);
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        let typed = self
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
        if !typed && !self.body.is_empty() {
            head.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        }
        head.push_str(if keep_alive {
            "Connection: keep-alive\r\n"
        } else {
            "Connection: close\r\n"
        });
        head.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));

        let mut wire = BytesMut::with_capacity(head.len() + self.body.len());
        wire.put_slice(head.as_bytes());
        wire.put_slice(self.body.as_bytes());
        wire
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(response: &Response, keep_alive: bool) -> String {
        String::from_utf8(response.encode(keep_alive).to_vec()).unwrap()
    }

    #[test]
    fn text_body_gets_default_type_and_length() {
        let response = Response::new(StatusCode::Ok).body("héllo");
        assert_eq!(
            wire(&response, true),
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             Connection: keep-alive\r\n\
             Content-Length: 6\r\n\r\nhéllo"
        );
    }

    #[test]
    fn empty_body_is_untyped() {
        let text = wire(&Response::new(StatusCode::NotFound), false);
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(!text.contains("Content-Type"));
        assert!(text.ends_with("Connection: close\r\nContent-Length: 0\r\n\r\n"));
    }

    #[test]
    fn explicit_content_type_wins() {
        let response = Response::new(StatusCode::Created)
            .header("content-type", "application/json")
            .body("{}");
        let text = wire(&response, true);
        assert!(text.contains("content-type: application/json\r\n"));
        assert!(!text.contains("text/plain"));
    }
}
