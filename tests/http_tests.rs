//! End-to-end exercises across request parsing, path-code routing, and static file
//! resolution, the way a real request actually flows through fulfillment.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use server_proxy::config::types::AppConfig;
use server_proxy::db::DbPool;
use server_proxy::http::request::{Method, ReadOutcome, Request};
use server_proxy::http::response::FulfillOutcome;
use server_proxy::http::Connection;
use server_proxy::routing::{self, Resolved, UserCache};

fn dummy_pool() -> Arc<DbPool> {
    DbPool::new(&AppConfig::default()).expect("mutex/condvar construction is infallible here")
}

fn parse(raw: &[u8], max_body: usize) -> (ReadOutcome, Request) {
    let mut buf = raw.to_vec();
    let mut req = Request::new();
    let mut checked = 0;
    let read_end = buf.len();
    let outcome = req.advance(&mut buf, &mut checked, read_end, max_body);
    (outcome, req)
}

#[test]
fn get_judge_page_resolves_through_code_eight() {
    let (outcome, req) = parse(b"GET /8 HTTP/1.1\r\nHost: x\r\n\r\n", 4096);
    assert_eq!(outcome, ReadOutcome::GetRequest);
    assert_eq!(req.method, Some(Method::Get));

    let cache = UserCache::new();
    match routing::fulfill(&req.url, req.method.unwrap(), &[], &cache, &dummy_pool()) {
        Resolved::ServeFile(p) => assert_eq!(p, PathBuf::from("judge.html")),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn root_path_rewrites_and_resolves_to_judge_page_too() {
    let (outcome, req) = parse(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", 4096);
    assert_eq!(outcome, ReadOutcome::GetRequest);
    assert_eq!(req.url, "/judge.html");

    let cache = UserCache::new();
    match routing::fulfill(&req.url, req.method.unwrap(), &[], &cache, &dummy_pool()) {
        Resolved::ServeFile(p) => assert_eq!(p, PathBuf::from("judge.html")),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn post_login_reads_body_then_routes_through_fulfill() {
    let raw = b"POST /2CGISQL.cgi HTTP/1.1\r\nContent-Length: 26\r\n\r\nuser=alice&password=s3cret";
    let (outcome, req) = parse(raw, 4096);
    assert_eq!(outcome, ReadOutcome::GetRequest);
    assert_eq!(req.method, Some(Method::Post));

    let cache = UserCache::new();
    cache.insert("alice".to_string(), "s3cret".to_string());
    let body = &raw[req.body_start..];
    match routing::fulfill(&req.url, req.method.unwrap(), body, &cache, &dummy_pool()) {
        Resolved::ServeFile(p) => assert_eq!(p, PathBuf::from("welcome.html")),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn unresolved_get_falls_through_to_static_file_lookup() {
    let dir = std::env::temp_dir().join(format!("http_tests_static_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("style.css"), b"body{}").unwrap();

    let (outcome, req) = parse(b"GET /style.css HTTP/1.1\r\nHost: x\r\n\r\n", 4096);
    assert_eq!(outcome, ReadOutcome::GetRequest);

    let cache = UserCache::new();
    let resolved = routing::fulfill(&req.url, req.method.unwrap(), &[], &cache, &dummy_pool());
    let rel = match resolved {
        Resolved::ServeFile(p) => p,
        other => panic!("unexpected: {other:?}"),
    };
    assert_eq!(rel, PathBuf::from("style.css"));

    match Connection::open_static_file(&dir, &rel) {
        FulfillOutcome::FileRequest { fd, size } => {
            assert_eq!(size, 6);
            // SAFETY: fd was just handed back by open_static_file and nothing else holds it.
            unsafe {
                libc::close(fd);
            }
        }
        other => panic!("unexpected: {other:?}"),
    }
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn traversal_attempt_is_rejected_as_bad_request_by_filename_length() {
    let long_segment = "a".repeat(250);
    let raw = format!("GET /{long_segment} HTTP/1.1\r\nHost: x\r\n\r\n");
    let (outcome, req) = parse(raw.as_bytes(), 4096);
    assert_eq!(outcome, ReadOutcome::GetRequest);

    let dir = std::env::temp_dir().join(format!("http_tests_long_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let rel = Path::new(&req.url[1..]);
    assert!(matches!(
        Connection::open_static_file(&dir, rel),
        FulfillOutcome::BadRequest
    ));
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn malformed_request_line_is_a_bad_request() {
    let (outcome, _req) = parse(b"G\nE\n", 4096);
    assert_eq!(outcome, ReadOutcome::BadRequest);
}

#[test]
fn body_arriving_across_two_reads_completes_on_the_second() {
    let mut buf = b"POST /3CGISQL.cgi HTTP/1.1\r\nContent-Length: 20\r\n\r\nuser=bob&password=p".to_vec();
    let mut req = Request::new();
    let mut checked = 0;
    let read_end = buf.len();
    assert_eq!(
        req.advance(&mut buf, &mut checked, read_end, 4096),
        ReadOutcome::NoRequest
    );

    buf.extend_from_slice(b"wd");
    let read_end = buf.len();
    assert_eq!(
        req.advance(&mut buf, &mut checked, read_end, 4096),
        ReadOutcome::GetRequest
    );

    let cache = UserCache::new();
    let body = &buf[req.body_start..read_end];
    match routing::fulfill(&req.url, req.method.unwrap(), body, &cache, &dummy_pool()) {
        Resolved::ServeFile(p) => assert_eq!(p, PathBuf::from("log.html")),
        other => panic!("unexpected: {other:?}"),
    }
}
