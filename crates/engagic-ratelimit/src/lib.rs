// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persistent sliding-window rate limiter.
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Backed by its own SQLite file (`rate_limits.db`), separate from the main
//! database, so a long-running write on the main DB never blocks request
//! throttling. Rows are `(client_id, timestamp)` pairs; a check deletes rows
//! older than the window, counts what remains, and either denies or inserts
//! `now` and allows.

use rusqlite::Connection;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Errors from the rate limiter's storage layer.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// The underlying SQLite connection or query failed.
    #[error("rate limiter storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request is allowed to proceed.
    pub allowed: bool,
    /// Remaining requests permitted in the current window after this check.
    pub remaining: u32,
}

/// A persistent, sliding-window rate limiter keyed by client identifier
/// (client IP or derived admin-token key).
pub struct RateLimiter {
    conn: Connection,
    limit: u32,
    window_secs: u64,
}

impl RateLimiter {
    /// Open (creating if needed) the rate limiter's SQLite file at `path`,
    /// enforcing `limit` requests per `window_secs`-second sliding window.
    pub fn open(path: &Path, limit: u32, window_secs: u64) -> Result<Self, RateLimitError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS rate_limit_hits (
                client_id TEXT NOT NULL,
                ts        INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_rate_limit_hits_client ON rate_limit_hits(client_id, ts)",
            [],
        )?;
        Ok(Self {
            conn,
            limit,
            window_secs,
        })
    }

    /// Open an in-memory limiter, useful for tests.
    pub fn open_in_memory(limit: u32, window_secs: u64) -> Result<Self, RateLimitError> {
        let conn = Connection::open_in_memory()?;
        conn.execute(
            "CREATE TABLE rate_limit_hits (client_id TEXT NOT NULL, ts INTEGER NOT NULL)",
            [],
        )?;
        Ok(Self {
            conn,
            limit,
            window_secs,
        })
    }

    /// Check (and record, if allowed) a request from `client_id` against the
    /// sliding window, evaluated at `now` (unix seconds).
    pub fn check_at(&self, client_id: &str, now: u64) -> Result<RateLimitDecision, RateLimitError> {
        let window_start = now.saturating_sub(self.window_secs);

        self.conn.execute(
            "DELETE FROM rate_limit_hits WHERE client_id = ?1 AND ts < ?2",
            rusqlite::params![client_id, window_start as i64],
        )?;

        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM rate_limit_hits WHERE client_id = ?1",
            rusqlite::params![client_id],
            |row| row.get(0),
        )?;
        let count = count.max(0) as u32;

        if count >= self.limit {
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
            });
        }

        self.conn.execute(
            "INSERT INTO rate_limit_hits (client_id, ts) VALUES (?1, ?2)",
            rusqlite::params![client_id, now as i64],
        )?;

        Ok(RateLimitDecision {
            allowed: true,
            remaining: self.limit - count - 1,
        })
    }

    /// Check (and record, if allowed) a request from `client_id` against the
    /// sliding window, using the current wall-clock time.
    pub fn check(&self, client_id: &str) -> Result<RateLimitDecision, RateLimitError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.check_at(client_id, now)
    }

    /// Number of non-expired hits currently recorded for `client_id`.
    pub fn current_count(&self, client_id: &str, now: u64) -> Result<u32, RateLimitError> {
        let window_start = now.saturating_sub(self.window_secs);
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM rate_limit_hits WHERE client_id = ?1 AND ts >= ?2",
            rusqlite::params![client_id, window_start as i64],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_under_limit() {
        let limiter = RateLimiter::open_in_memory(3, 60).unwrap();
        for _ in 0..3 {
            let d = limiter.check_at("client-a", 1_000).unwrap();
            assert!(d.allowed);
        }
    }

    #[test]
    fn denies_request_over_limit() {
        let limiter = RateLimiter::open_in_memory(2, 60).unwrap();
        assert!(limiter.check_at("client-a", 1_000).unwrap().allowed);
        assert!(limiter.check_at("client-a", 1_001).unwrap().allowed);
        let decision = limiter.check_at("client-a", 1_002).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn remaining_counts_down() {
        let limiter = RateLimiter::open_in_memory(3, 60).unwrap();
        assert_eq!(limiter.check_at("c", 0).unwrap().remaining, 2);
        assert_eq!(limiter.check_at("c", 1).unwrap().remaining, 1);
        assert_eq!(limiter.check_at("c", 2).unwrap().remaining, 0);
    }

    #[test]
    fn window_slides_and_expires_old_hits() {
        let limiter = RateLimiter::open_in_memory(1, 10).unwrap();
        assert!(limiter.check_at("c", 0).unwrap().allowed);
        assert!(!limiter.check_at("c", 5).unwrap().allowed);
        // 11 seconds later the original hit has slid out of the window.
        assert!(limiter.check_at("c", 11).unwrap().allowed);
    }

    #[test]
    fn different_clients_have_independent_counters() {
        let limiter = RateLimiter::open_in_memory(1, 60).unwrap();
        assert!(limiter.check_at("a", 0).unwrap().allowed);
        assert!(limiter.check_at("b", 0).unwrap().allowed);
        assert!(!limiter.check_at("a", 1).unwrap().allowed);
    }

    #[test]
    fn current_count_reflects_window() {
        let limiter = RateLimiter::open_in_memory(10, 10).unwrap();
        limiter.check_at("c", 0).unwrap();
        limiter.check_at("c", 1).unwrap();
        assert_eq!(limiter.current_count("c", 1).unwrap(), 2);
        assert_eq!(limiter.current_count("c", 15).unwrap(), 0);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rate_limits.db");
        {
            let limiter = RateLimiter::open(&path, 2, 60).unwrap();
            assert!(limiter.check_at("c", 0).unwrap().allowed);
            assert!(limiter.check_at("c", 1).unwrap().allowed);
        }
        {
            let limiter = RateLimiter::open(&path, 2, 60).unwrap();
            let decision = limiter.check_at("c", 2).unwrap();
            assert!(!decision.allowed);
        }
    }
}
