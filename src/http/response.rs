/// Outcome of request fulfillment, mapped to a status line and canned or mapped-file body.
#[derive(Debug)]
pub enum FulfillOutcome {
    BadRequest,
    NoResource,
    Forbidden,
    InternalError,
    /// A regular, world-readable file was `stat`+`open`+`mmap`'d for zero-copy response.
    FileRequest { fd: std::os::fd::RawFd, size: usize },
}

pub const BAD_REQUEST_BODY: &[u8] =
    b"Your request has bad syntax or is inherently impossible to staisfy.\n";
pub const FORBIDDEN_BODY: &[u8] =
    b"You do not have permission to get file form this server.\n";
pub const NOT_FOUND_BODY: &[u8] = b"The requested file was not found on this server.\n";
pub const INTERNAL_ERROR_BODY: &[u8] =
    b"There was an unusual problem serving the request file.\n";

fn status_line(code: u16, reason: &str) -> Vec<u8> {
    format!("HTTP/1.1 {} {}\r\n", code, reason).into_bytes()
}

/// Writes a canned-body response (status line, `Content-Length`, `Connection`, blank line,
/// body) into `out`. Returns the code actually written, for logging.
pub fn write_canned(out: &mut Vec<u8>, outcome: &FulfillOutcome, linger: bool) -> u16 {
    let (code, reason, body): (u16, &str, &[u8]) = match outcome {
        FulfillOutcome::BadRequest => (400, "Bad Request", BAD_REQUEST_BODY),
        FulfillOutcome::Forbidden => (403, "Forbidden", FORBIDDEN_BODY),
        FulfillOutcome::NoResource => (404, "Not Found", NOT_FOUND_BODY),
        FulfillOutcome::InternalError => (500, "Internal Server Error", INTERNAL_ERROR_BODY),
        FulfillOutcome::FileRequest { .. } => unreachable!("file responses use write_file_header"),
    };
    write_header_block(out, code, reason, body.len(), linger);
    out.extend_from_slice(body);
    code
}

/// Writes only the header block for a mapped-file response; the body is supplied
/// separately via the second iovec (the mmap'd region), never copied into `out`.
pub fn write_file_header(out: &mut Vec<u8>, size: usize, linger: bool) {
    write_header_block(out, 200, "OK", size, linger);
}

fn write_header_block(out: &mut Vec<u8>, code: u16, reason: &str, body_len: usize, linger: bool) {
    out.extend_from_slice(&status_line(code, reason));
    out.extend_from_slice(format!("Content-Length: {}\r\n", body_len).as_bytes());
    out.extend_from_slice(
        format!(
            "Connection: {}\r\n",
            if linger { "keep-alive" } else { "close" }
        )
        .as_bytes(),
    );
    out.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canned_not_found_has_exact_body() {
        let mut out = Vec::new();
        let code = write_canned(&mut out, &FulfillOutcome::NoResource, false);
        assert_eq!(code, 404);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.ends_with("The requested file was not found on this server.\n"));
        assert!(text.contains("Connection: close\r\n"));
    }

    #[test]
    fn file_header_carries_linger() {
        let mut out = Vec::new();
        write_file_header(&mut out, 1234, true);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Content-Length: 1234\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
    }
}
