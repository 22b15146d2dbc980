use std::fmt;

/// Sub-state machine outcome for one `parse_line` scan of the read buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum LineOutcome {
    /// A complete CRLF-terminated line was found; its CRLF was rewritten to `\0\0` and
    /// `checked` advanced past it.
    Ok,
    /// No complete line yet; caller must read more from the socket.
    Open,
    /// Malformed line framing (e.g. a lone `\r` or `\n`).
    Bad,
}

/// Main HTTP parsing state, driven over the lines `parse_line` yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainState {
    RequestLine,
    Header,
    Body,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
        })
    }
}

/// Driving-loop result of `process_read`, one per call to `Request::advance`. Every path
/// through the loop — including falling off a `LineOutcome::Open` — returns one of these;
/// there is no silent fallthrough.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Not enough data yet; caller should keep reading.
    NoRequest,
    /// A full request was parsed; request fulfillment should run next.
    GetRequest,
    BadRequest,
    NoResource,
    Forbidden,
    InternalError,
}

/// Per-connection HTTP/1.1 request parser state, driven incrementally over a connection's
/// read buffer as bytes arrive. Holds no buffer of its own — it scans the slice handed to it.
#[derive(Debug)]
pub struct Request {
    pub state: MainState,
    pub method: Option<Method>,
    pub url: String,
    pub version: String,
    pub host: String,
    pub linger: bool,
    pub content_length: usize,
    pub has_body: bool,
    pub body_start: usize,
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl Request {
    pub fn new() -> Self {
        Self {
            state: MainState::RequestLine,
            method: None,
            url: String::new(),
            version: String::new(),
            host: String::new(),
            linger: false,
            content_length: 0,
            has_body: false,
            body_start: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Scans `buf[checked..read_end]` for a CRLF, rewriting it to `\0\0` in place. Returns
    /// the new `checked` cursor on success.
    pub fn parse_line(buf: &mut [u8], checked: usize, read_end: usize) -> (LineOutcome, usize) {
        let mut i = checked;
        while i + 1 < read_end {
            if buf[i] == b'\r' {
                if buf[i + 1] == b'\n' {
                    buf[i] = 0;
                    buf[i + 1] = 0;
                    return (LineOutcome::Ok, i + 2);
                }
                return (LineOutcome::Bad, checked);
            }
            if buf[i] == b'\n' {
                return (LineOutcome::Bad, checked);
            }
            i += 1;
        }
        (LineOutcome::Open, checked)
    }

    /// Drives the main state machine over whatever complete lines are available in
    /// `buf[..read_end]`, advancing `checked` as it consumes them. `max_body` bounds
    /// `Content-Length`. Never returns without a terminal [`ReadOutcome`].
    pub fn advance(
        &mut self,
        buf: &mut [u8],
        checked: &mut usize,
        read_end: usize,
        max_body: usize,
    ) -> ReadOutcome {
        loop {
            match self.state {
                MainState::Body => {
                    if read_end - self.body_start >= self.content_length {
                        *checked = self.body_start + self.content_length;
                        self.state = MainState::Done;
                        return ReadOutcome::GetRequest;
                    }
                    return ReadOutcome::NoRequest;
                }
                MainState::Done => return ReadOutcome::GetRequest,
                MainState::RequestLine | MainState::Header => {
                    let (outcome, next) = Self::parse_line(buf, *checked, read_end);
                    match outcome {
                        LineOutcome::Open => return ReadOutcome::NoRequest,
                        LineOutcome::Bad => return ReadOutcome::BadRequest,
                        LineOutcome::Ok => {
                            let line = &buf[*checked..next - 2];
                            let result = match self.state {
                                MainState::RequestLine => self.parse_request_line(line),
                                MainState::Header => self.parse_header_line(line),
                                _ => unreachable!(),
                            };
                            *checked = next;
                            match result {
                                Ok(HeaderStep::Continue) => continue,
                                Ok(HeaderStep::EndOfHeaders) => {
                                    if self.content_length > max_body {
                                        return ReadOutcome::BadRequest;
                                    }
                                    if self.content_length > 0 {
                                        self.has_body = true;
                                        self.body_start = *checked;
                                        self.state = MainState::Body;
                                    } else {
                                        self.state = MainState::Done;
                                        return ReadOutcome::GetRequest;
                                    }
                                }
                                Err(()) => return ReadOutcome::BadRequest,
                            }
                        }
                    }
                }
            }
        }
    }

    fn parse_request_line(&mut self, line: &[u8]) -> Result<HeaderStep, ()> {
        let line = std::str::from_utf8(line).map_err(|_| ())?;
        let mut parts = line.split_whitespace();
        let method = parts.next().ok_or(())?;
        let mut url = parts.next().ok_or(())?.to_string();
        let version = parts.next().ok_or(())?;
        if parts.next().is_some() {
            return Err(());
        }
        if version != "HTTP/1.1" {
            return Err(());
        }
        self.method = Some(match method.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            _ => return Err(()),
        });

        if let Some(rest) = url.strip_prefix("http://") {
            url = rest
                .find('/')
                .map(|i| rest[i..].to_string())
                .unwrap_or_else(|| "/".to_string());
        }
        if url == "/" {
            url = "/judge.html".to_string();
        }
        self.url = url;
        self.version = version.to_string();
        self.state = MainState::Header;
        Ok(HeaderStep::Continue)
    }

    fn parse_header_line(&mut self, line: &[u8]) -> Result<HeaderStep, ()> {
        if line.is_empty() {
            return Ok(HeaderStep::EndOfHeaders);
        }
        let line = std::str::from_utf8(line).map_err(|_| ())?;
        if let Some(rest) = strip_prefix_ci(line, "Connection:") {
            if rest.trim().eq_ignore_ascii_case("keep-alive") {
                self.linger = true;
            }
        } else if let Some(rest) = strip_prefix_ci(line, "Content-Length:") {
            self.content_length = rest.trim().parse().map_err(|_| ())?;
        } else if let Some(rest) = strip_prefix_ci(line, "Host:") {
            self.host = rest.trim().to_string();
        }
        // Unknown headers are ignored.
        Ok(HeaderStep::Continue)
    }
}

enum HeaderStep {
    Continue,
    EndOfHeaders,
}

fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(req: &mut Request, buf: &mut Vec<u8>, checked: &mut usize, max_body: usize) -> ReadOutcome {
        let read_end = buf.len();
        req.advance(buf, checked, read_end, max_body)
    }

    #[test]
    fn parses_simple_get_with_no_body() {
        let mut buf = b"GET /judge.html HTTP/1.1\r\nHost: x\r\n\r\n".to_vec();
        let mut req = Request::new();
        let mut checked = 0;
        let outcome = feed(&mut req, &mut buf, &mut checked, 1024);
        assert_eq!(outcome, ReadOutcome::GetRequest);
        assert_eq!(req.method, Some(Method::Get));
        assert_eq!(req.url, "/judge.html");
        assert_eq!(req.host, "x");
    }

    #[test]
    fn root_url_rewrites_to_judge_html() {
        let mut buf = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n".to_vec();
        let mut req = Request::new();
        let mut checked = 0;
        feed(&mut req, &mut buf, &mut checked, 1024);
        assert_eq!(req.url, "/judge.html");
    }

    #[test]
    fn strips_literal_http_prefix_only() {
        let mut buf = b"GET http://host/foo.html HTTP/1.1\r\nHost: x\r\n\r\n".to_vec();
        let mut req = Request::new();
        let mut checked = 0;
        feed(&mut req, &mut buf, &mut checked, 1024);
        assert_eq!(req.url, "/foo.html");
    }

    #[test]
    fn rejects_non_http_1_1_version() {
        let mut buf = b"GET / HTTP/1.0\r\nHost: x\r\n\r\n".to_vec();
        let mut req = Request::new();
        let mut checked = 0;
        assert_eq!(feed(&mut req, &mut buf, &mut checked, 1024), ReadOutcome::BadRequest);
    }

    #[test]
    fn incomplete_request_line_yields_no_request_not_a_fallthrough() {
        let mut buf = b"GET /judge.html HTTP/1.1\r\n".to_vec();
        let mut req = Request::new();
        let mut checked = 0;
        assert_eq!(feed(&mut req, &mut buf, &mut checked, 1024), ReadOutcome::NoRequest);
    }

    #[test]
    fn waits_for_full_body_before_completing() {
        let mut buf = b"POST /2CGISQL.cgi HTTP/1.1\r\nContent-Length: 10\r\n\r\nuser=a&pw=".to_vec();
        let mut req = Request::new();
        let mut checked = 0;
        assert_eq!(feed(&mut req, &mut buf, &mut checked, 1024), ReadOutcome::NoRequest);
        buf.extend_from_slice(b"1");
        assert_eq!(feed(&mut req, &mut buf, &mut checked, 1024), ReadOutcome::GetRequest);
    }

    #[test]
    fn checked_advances_past_the_body_on_completion() {
        // `checked` must land exactly at the end of the body, not at `body_start`, or a
        // keep-alive connection's next request line gets parsed starting inside the
        // previous request's already-consumed body.
        let mut buf = b"POST /a2 HTTP/1.1\r\nContent-Length: 10\r\n\r\nuser=a&pw=1".to_vec();
        let mut req = Request::new();
        let mut checked = 0;
        assert_eq!(feed(&mut req, &mut buf, &mut checked, 1024), ReadOutcome::GetRequest);
        assert_eq!(checked, req.body_start + req.content_length);
        assert_eq!(checked, buf.len());
    }

    #[test]
    fn content_length_over_max_is_bad_request() {
        let mut buf = b"POST /2CGISQL.cgi HTTP/1.1\r\nContent-Length: 99999\r\n\r\n".to_vec();
        let mut req = Request::new();
        let mut checked = 0;
        assert_eq!(feed(&mut req, &mut buf, &mut checked, 1024), ReadOutcome::BadRequest);
    }

    #[test]
    fn host_header_uses_correct_five_byte_prefix() {
        // A header whose first 5 bytes are "Host:" but not the source's defective 15-byte
        // match must still be recognized.
        let mut buf = b"GET /judge.html HTTP/1.1\r\nHost:short\r\n\r\n".to_vec();
        let mut req = Request::new();
        let mut checked = 0;
        feed(&mut req, &mut buf, &mut checked, 1024);
        assert_eq!(req.host, "short");
    }
}
