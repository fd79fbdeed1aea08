//! Token Store
//!
//! Durable holder of the current access/refresh pair. The pair is replaced
//! as a unit on login and on every refresh, and cleared as a unit on
//! teardown; readers never observe one half of an old pair next to one
//! half of a new one.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rusqlite::OptionalExtension;
use std::sync::Arc;

use portal_storage::Database;

use crate::token::{fingerprint, TokenLifetimes, TokenPair};
use crate::Result;

#[derive(Debug, Clone)]
struct StoredTokens {
    pair: TokenPair,
    access_expires_at: DateTime<Utc>,
    refresh_expires_at: DateTime<Utc>,
}

impl StoredTokens {
    fn access_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.access_expires_at
    }

    fn refresh_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.refresh_expires_at
    }
}

pub struct TokenStore {
    /// In-memory copy of the persisted row
    cache: Arc<RwLock<Option<StoredTokens>>>,
    /// Database for persistence
    db: Database,
    lifetimes: TokenLifetimes,
}

impl TokenStore {
    pub fn new(db: Database, lifetimes: TokenLifetimes) -> Self {
        Self {
            cache: Arc::new(RwLock::new(None)),
            db,
            lifetimes,
        }
    }

    /// Load the persisted pair, dropping it when both halves have expired
    pub fn load(&self) -> Result<()> {
        let row = self.db.with_connection(|conn| {
            let row = conn
                .query_row(
                    "SELECT access_token, refresh_token, access_expires_at, refresh_expires_at
                     FROM auth_tokens WHERE slot = 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;
            Ok(row)
        })?;

        let now = Utc::now();
        let stored = row.and_then(|(access, refresh, access_exp, refresh_exp)| {
            // Unparseable expiry means the row is unusable, not that it lives forever
            let access_expires_at = parse_timestamp(&access_exp)?;
            let refresh_expires_at = parse_timestamp(&refresh_exp)?;
            Some(StoredTokens {
                pair: TokenPair {
                    access_token: access,
                    refresh_token: refresh,
                },
                access_expires_at,
                refresh_expires_at,
            })
        });

        match stored {
            Some(tokens) if tokens.access_valid(now) || tokens.refresh_valid(now) => {
                tracing::info!(
                    access = %fingerprint(&tokens.pair.access_token),
                    access_valid = tokens.access_valid(now),
                    "Loaded persisted token pair"
                );
                *self.cache.write() = Some(tokens);
            }
            Some(_) => {
                tracing::info!("Persisted token pair has expired, discarding");
                self.clear()?;
            }
            None => {
                *self.cache.write() = None;
            }
        }

        Ok(())
    }

    /// Current access token, if present and not expired
    pub fn access_token(&self) -> Option<String> {
        let now = Utc::now();
        self.cache
            .read()
            .as_ref()
            .filter(|t| t.access_valid(now))
            .map(|t| t.pair.access_token.clone())
    }

    /// Current refresh token, if present and not expired
    pub fn refresh_token(&self) -> Option<String> {
        let now = Utc::now();
        self.cache
            .read()
            .as_ref()
            .filter(|t| t.refresh_valid(now))
            .map(|t| t.pair.refresh_token.clone())
    }

    pub fn has_access_token(&self) -> bool {
        self.access_token().is_some()
    }

    /// Snapshot of the full pair as stored, regardless of expiry
    pub fn pair(&self) -> Option<TokenPair> {
        self.cache.read().as_ref().map(|t| t.pair.clone())
    }

    /// Atomically replace the stored pair (login and refresh)
    pub fn replace(&self, pair: TokenPair) -> Result<()> {
        // Holding the write lock across the transaction serializes writers
        // and keeps the cache and the row in the same order
        let mut cache = self.cache.write();
        self.write_pair(&mut cache, pair)
    }

    /// Replace the pair only while `expected_refresh` is still the stored
    /// refresh token. Returns `false` and leaves the store untouched when the
    /// pair was replaced or cleared in the meantime.
    pub fn rotate(&self, expected_refresh: &str, pair: TokenPair) -> Result<bool> {
        let mut cache = self.cache.write();
        let current = cache.as_ref().map(|t| t.pair.refresh_token.as_str());
        if current != Some(expected_refresh) {
            tracing::debug!(
                expected = %fingerprint(expected_refresh),
                "Stored pair changed during rotation, keeping it"
            );
            return Ok(false);
        }

        self.write_pair(&mut cache, pair)?;
        Ok(true)
    }

    fn write_pair(&self, cache: &mut Option<StoredTokens>, pair: TokenPair) -> Result<()> {
        let now = Utc::now();
        let stored = StoredTokens {
            access_expires_at: now + self.lifetimes.access,
            refresh_expires_at: now + self.lifetimes.refresh,
            pair,
        };

        self.db.transaction(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO auth_tokens (
                     slot, access_token, refresh_token,
                     access_expires_at, refresh_expires_at, updated_at
                 ) VALUES (1, ?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    stored.pair.access_token,
                    stored.pair.refresh_token,
                    stored.access_expires_at.to_rfc3339(),
                    stored.refresh_expires_at.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;

        tracing::info!(
            access = %fingerprint(&stored.pair.access_token),
            "Replaced token pair"
        );
        *cache = Some(stored);

        Ok(())
    }

    /// Atomically drop both tokens
    pub fn clear(&self) -> Result<()> {
        let mut cache = self.cache.write();
        self.db.transaction(|conn| {
            conn.execute("DELETE FROM auth_tokens", [])?;
            Ok(())
        })?;
        *cache = None;

        tracing::info!("Cleared token pair");
        Ok(())
    }
}

impl Clone for TokenStore {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            db: self.db.clone(),
            lifetimes: self.lifetimes,
        }
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
