//! CGI path codes (spec §4.7 "request fulfillment"): the single character that begins the
//! last URL segment acts as a poor-man's router in front of a handful of static pages and
//! two POST-only auth actions, backed by an in-memory username cache mirrored from the
//! `user` table.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::db::DbPool;
use crate::http::request::Method;

/// What the reactor/worker should serve once fulfillment decides.
#[derive(Debug)]
pub enum Resolved {
    /// Serve the file at this path relative to the document root.
    ServeFile(PathBuf),
    BadRequest,
    Forbidden,
    NotFound,
    InternalError,
}

/// In-memory `username -> password` cache, loaded once at startup and kept in sync with
/// registrations. Guarded by a single mutex (spec §3 "User table cache").
pub struct UserCache {
    users: Mutex<HashMap<String, String>>,
}

impl UserCache {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
        }
    }

    /// Loads every `(username, passwd)` row from the `user` table.
    pub fn load_from_db(&self, pool: &Arc<DbPool>) -> Result<(), crate::error::ServerError> {
        let mut conn = pool
            .get()
            .map_err(|e| crate::error::ServerError::ResourceInitFailed(e.to_string()))?;

        let mut handler = UserRowCollector::default();
        conn.query("SELECT username, passwd FROM user", &mut handler)
            .map_err(|e| crate::error::ServerError::ResourceInitFailed(e.to_string()))?;

        let mut users = self.users.lock().unwrap();
        for (username, passwd) in handler.rows {
            users.insert(username, passwd);
        }
        Ok(())
    }

    fn check(&self, username: &str, password: &str) -> bool {
        self.users
            .lock()
            .unwrap()
            .get(username)
            .is_some_and(|p| p == password)
    }

    fn contains(&self, username: &str) -> bool {
        self.users.lock().unwrap().contains_key(username)
    }

    fn insert(&self, username: String, password: String) {
        self.users.lock().unwrap().insert(username, password);
    }
}

impl Default for UserCache {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct UserRowCollector {
    rows: Vec<(String, String)>,
}

impl zero_mysql::protocol::r#trait::TextResultSetHandler for UserRowCollector {
    fn no_result_set(
        &mut self,
        _: zero_mysql::protocol::response::OkPayloadBytes,
    ) -> zero_mysql::error::Result<()> {
        Ok(())
    }

    fn resultset_start(
        &mut self,
        _: &[zero_mysql::protocol::command::ColumnDefinition<'_>],
    ) -> zero_mysql::error::Result<()> {
        Ok(())
    }

    fn row(
        &mut self,
        _: &[zero_mysql::protocol::command::ColumnDefinition<'_>],
        row: &zero_mysql::protocol::TextRowPayload<'_>,
    ) -> zero_mysql::error::Result<()> {
        use zero_mysql::protocol::primitive::read_string_lenenc;
        let (username, rest) = read_string_lenenc(row.0)?;
        let (passwd, _) = read_string_lenenc(rest)?;
        self.rows.push((
            String::from_utf8_lossy(username).into_owned(),
            String::from_utf8_lossy(passwd).into_owned(),
        ));
        Ok(())
    }

    fn resultset_end(
        &mut self,
        _: zero_mysql::protocol::response::OkPayloadBytes,
    ) -> zero_mysql::error::Result<()> {
        Ok(())
    }
}

fn last_segment(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or("")
}

/// Parses a `user=<u>&password=<p>` POST body. Values are not URL-decoded: the original
/// credential scheme never contained reserved characters, and decoding is outside scope.
fn parse_login_body(body: &[u8]) -> Option<(String, String)> {
    let body = std::str::from_utf8(body).ok()?;
    let mut user = None;
    let mut password = None;
    for pair in body.split('&') {
        let mut kv = pair.splitn(2, '=');
        let key = kv.next()?;
        let val = kv.next().unwrap_or("");
        match key {
            "user" => user = Some(val.to_string()),
            "password" => password = Some(val.to_string()),
            _ => {}
        }
    }
    Some((user?, password?))
}

/// Maps a request onto a filesystem path or an inline outcome. `body` is the request body
/// bytes, present for `POST` fulfillment of codes `2`/`3`.
pub fn fulfill(
    url: &str,
    method: Method,
    body: &[u8],
    cache: &UserCache,
    pool: &Arc<DbPool>,
) -> Resolved {
    let segment = last_segment(url);
    let code = segment.chars().next();

    match code {
        Some('0') => Resolved::ServeFile(PathBuf::from("registor.html")),
        Some('1') => Resolved::ServeFile(PathBuf::from("log.html")),
        Some('5') => Resolved::ServeFile(PathBuf::from("picture.html")),
        Some('6') => Resolved::ServeFile(PathBuf::from("video.html")),
        Some('7') => Resolved::ServeFile(PathBuf::from("fans.html")),
        Some('8') => Resolved::ServeFile(PathBuf::from("judge.html")),
        Some('2') if method == Method::Post => match parse_login_body(body) {
            Some((user, password)) if cache.check(&user, &password) => {
                Resolved::ServeFile(PathBuf::from("welcome.html"))
            }
            Some(_) => Resolved::ServeFile(PathBuf::from("logError.html")),
            None => Resolved::BadRequest,
        },
        Some('3') if method == Method::Post => match parse_login_body(body) {
            Some((user, password)) => {
                if cache.contains(&user) {
                    Resolved::ServeFile(PathBuf::from("registerError.html"))
                } else {
                    match register(pool, &user, &password) {
                        Ok(()) => {
                            cache.insert(user, password);
                            Resolved::ServeFile(PathBuf::from("log.html"))
                        }
                        Err(_) => Resolved::InternalError,
                    }
                }
            }
            None => Resolved::BadRequest,
        },
        _ => Resolved::ServeFile(PathBuf::from(url.trim_start_matches('/'))),
    }
}

fn register(pool: &Arc<DbPool>, username: &str, password: &str) -> Result<(), crate::error::ServerError> {
    let mut conn = pool
        .get()
        .map_err(|e| crate::error::ServerError::ResourceInitFailed(e.to_string()))?;
    let mut stmt = conn
        .prepare("INSERT INTO user(username, passwd) VALUES (?, ?)")
        .map_err(|e| crate::error::ServerError::ResourceInitFailed(e.to_string()))?;
    conn.exec_drop(&mut stmt, (username, password))
        .map_err(|e| crate::error::ServerError::ResourceInitFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_registration_form() {
        match fulfill("/0", Method::Get, b"", &UserCache::new(), &dummy_pool()) {
            Resolved::ServeFile(p) => assert_eq!(p, PathBuf::from("registor.html")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unrecognized_code_falls_back_to_static_path() {
        match fulfill(
            "/styles/main.css",
            Method::Get,
            b"",
            &UserCache::new(),
            &dummy_pool(),
        ) {
            Resolved::ServeFile(p) => assert_eq!(p, PathBuf::from("styles/main.css")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn login_failure_routes_to_log_error() {
        let cache = UserCache::new();
        match fulfill(
            "/2CGISQL.cgi",
            Method::Post,
            b"user=nobody&password=wrong",
            &cache,
            &dummy_pool(),
        ) {
            Resolved::ServeFile(p) => assert_eq!(p, PathBuf::from("logError.html")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn login_success_routes_to_welcome() {
        let cache = UserCache::new();
        cache.insert("alice".to_string(), "s3cret".to_string());
        match fulfill(
            "/2CGISQL.cgi",
            Method::Post,
            b"user=alice&password=s3cret",
            &cache,
            &dummy_pool(),
        ) {
            Resolved::ServeFile(p) => assert_eq!(p, PathBuf::from("welcome.html")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    fn dummy_pool() -> Arc<DbPool> {
        // Tests that need a live pool build one from config; routing tests that never touch
        // the DB (GET static paths, login against the in-process cache) don't execute this.
        DbPool::new(&crate::config::types::AppConfig::default())
            .expect("mutex/condvar construction is infallible on this platform")
    }
}
