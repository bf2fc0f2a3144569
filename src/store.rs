// smap-relay - sMAP to pub/sub translation bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Credential store with hot reload
//!
//! Credentials live in a single SQLite file (table `entity`, keyed by the raw
//! verifying-key bytes). Every stored credential is brought up as a live
//! identity at load time and cached by its encoded key.
//!
//! New credentials are written by another process while the server keeps
//! running, so the store follows a two-phase reload:
//!
//! ```text
//!   Open ──signal──▶ Draining ──▶ Closed ──signal──▶ Reopening ──▶ Open
//!          (close the file)                 (reopen, rebuild cache)
//! ```
//!
//! Store operations wait while the store is not `Open`. Cache lookups never
//! wait: the cache is a snapshot that is swapped wholesale once the rebuild
//! finishes.

use crate::error::StoreError;
use crate::identity::{IdentityFactory, RawCredential, VerifyingKey};
use arc_swap::ArcSwap;
use log::{error, info, warn};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Live identities keyed by encoded verifying key
pub type IdentityCache<I> = HashMap<String, Arc<I>>;

/// Lifecycle of the durable handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// File open, operations proceed
    Open,
    /// First reload signal received, file being closed
    Draining,
    /// File closed, waiting for the second signal
    Closed,
    /// File being reopened and cache rebuilt
    Reopening,
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreState::Open => "open",
            StoreState::Draining => "draining",
            StoreState::Closed => "closed",
            StoreState::Reopening => "reopening",
        };
        f.write_str(name)
    }
}

/// Outcome of one bulk load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Records turned into live identities
    pub loaded: usize,
    /// Records skipped (factory failure or key mismatch)
    pub skipped: usize,
}

struct Handle {
    state: StoreState,
    conn: Option<Connection>,
}

/// Durable credential map plus the cache of live identities
pub struct CredentialStore<F: IdentityFactory> {
    path: PathBuf,
    factory: F,
    handle: Mutex<Handle>,
    reopened: Condvar,
    identities: ArcSwap<IdentityCache<F::Identity>>,
}

impl<F: IdentityFactory> CredentialStore<F> {
    /// Open (or create) the store at `path` and load every credential
    pub fn open(path: impl AsRef<Path>, factory: F) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = open_connection(&path)?;
        let (cache, report) = scan_and_load(&factory, &conn)?;
        info!(
            "Credential store {} open: {} loaded, {} skipped",
            path.display(),
            report.loaded,
            report.skipped
        );
        Ok(Self {
            path,
            factory,
            handle: Mutex::new(Handle {
                state: StoreState::Open,
                conn: Some(conn),
            }),
            reopened: Condvar::new(),
            identities: ArcSwap::from_pointee(cache),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lifecycle state
    pub fn state(&self) -> Result<StoreState, StoreError> {
        Ok(self.lock()?.state)
    }

    /// Live identity for an encoded verifying key.
    ///
    /// Never blocks; during a reload this answers from the previous cache.
    pub fn identity(&self, vk: &str) -> Option<Arc<F::Identity>> {
        self.identities.load().get(vk).cloned()
    }

    /// Number of live identities in the current cache
    pub fn identity_count(&self) -> usize {
        self.identities.load().len()
    }

    /// Encoded keys of the live identities, sorted
    pub fn identity_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.identities.load().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Store a credential and return its encoded verifying key.
    ///
    /// An existing record for the same key is overwritten. The live cache is
    /// not touched: the credential becomes usable after the next reload.
    pub fn register(&self, credential: &[u8]) -> Result<String, StoreError> {
        let raw = RawCredential::parse(credential)?;
        let vk = self.factory.verifying_key(raw.type_tag, &raw.payload)?;
        let guard = self.wait_open()?;
        let conn = guard.conn.as_ref().ok_or(StoreError::InvalidTransition {
            state: guard.state.to_string(),
            action: "register".to_string(),
        })?;
        upsert(conn, &vk, &raw)?;
        info!("Stored vk {}", vk);
        Ok(vk.encode())
    }

    /// Encoded keys of every stored record, sorted
    pub fn stored_keys(&self) -> Result<Vec<String>, StoreError> {
        let guard = self.wait_open()?;
        let conn = guard.conn.as_ref().ok_or(StoreError::InvalidTransition {
            state: guard.state.to_string(),
            action: "list".to_string(),
        })?;
        let mut stmt = conn.prepare("SELECT vk FROM entity ORDER BY vk")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, Vec<u8>>(0))?
            .map(|vk| vk.map(|vk| VerifyingKey::new(vk).encode()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// First reload phase: close the backing file.
    ///
    /// Until [`CredentialStore::resume`] runs, store operations wait.
    pub fn drain(&self) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        self.drain_locked(&mut guard)
    }

    /// Second reload phase: reopen the file and rebuild the cache wholesale.
    ///
    /// If reopening fails the store stays `Closed` and the call can be retried.
    pub fn resume(&self) -> Result<LoadReport, StoreError> {
        let mut guard = self.lock()?;
        self.resume_locked(&mut guard)
    }

    /// Advance the two-phase reload by one step.
    ///
    /// `Open` drains to `Closed`; `Closed` resumes to `Open`. Returns the
    /// state reached. The state is read and advanced under one lock, so
    /// concurrent callers each take the next step in turn.
    pub fn signal(&self) -> Result<StoreState, StoreError> {
        let mut guard = self.lock()?;
        let state = guard.state;
        match state {
            StoreState::Open => self.drain_locked(&mut guard)?,
            StoreState::Closed => {
                self.resume_locked(&mut guard)?;
            }
            busy => {
                return Err(StoreError::InvalidTransition {
                    state: busy.to_string(),
                    action: "signal".to_string(),
                })
            }
        }
        Ok(guard.state)
    }

    fn drain_locked(&self, guard: &mut MutexGuard<'_, Handle>) -> Result<(), StoreError> {
        if guard.state != StoreState::Open {
            return Err(StoreError::InvalidTransition {
                state: guard.state.to_string(),
                action: "drain".to_string(),
            });
        }
        guard.state = StoreState::Draining;
        warn!("Reload signal (lock): closing {}", self.path.display());
        if let Some(conn) = guard.conn.take() {
            if let Err((conn, err)) = conn.close() {
                guard.conn = Some(conn);
                guard.state = StoreState::Open;
                return Err(err.into());
            }
        }
        guard.state = StoreState::Closed;
        Ok(())
    }

    fn resume_locked(&self, guard: &mut MutexGuard<'_, Handle>) -> Result<LoadReport, StoreError> {
        if guard.state != StoreState::Closed {
            return Err(StoreError::InvalidTransition {
                state: guard.state.to_string(),
                action: "resume".to_string(),
            });
        }
        guard.state = StoreState::Reopening;
        warn!("Reload signal (unlock): reopening {}", self.path.display());

        let loaded = open_connection(&self.path)
            .and_then(|conn| scan_and_load(&self.factory, &conn).map(|loaded| (conn, loaded)));
        let (conn, (cache, report)) = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                error!("Could not reopen {}: {}", self.path.display(), err);
                guard.state = StoreState::Closed;
                return Err(err);
            }
        };

        self.identities.store(Arc::new(cache));
        guard.conn = Some(conn);
        guard.state = StoreState::Open;
        // waiters wake once the caller releases the guard
        self.reopened.notify_all();
        info!(
            "Credential store reloaded: {} loaded, {} skipped",
            report.loaded, report.skipped
        );
        Ok(report)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Handle>, StoreError> {
        self.handle.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn wait_open(&self) -> Result<MutexGuard<'_, Handle>, StoreError> {
        let mut guard = self.lock()?;
        while guard.state != StoreState::Open {
            guard = self
                .reopened
                .wait(guard)
                .map_err(|_| StoreError::LockPoisoned)?;
        }
        Ok(guard)
    }
}

/// Write one credential into the store file without loading any identity.
///
/// Used by the administrative command while the server has the file closed.
pub fn write_credential<F: IdentityFactory>(
    path: impl AsRef<Path>,
    factory: &F,
    credential: &[u8],
) -> Result<String, StoreError> {
    let raw = RawCredential::parse(credential)?;
    let vk = factory.verifying_key(raw.type_tag, &raw.payload)?;
    let conn = open_connection(path.as_ref())?;
    upsert(&conn, &vk, &raw)?;
    conn.close().map_err(|(_, err)| err)?;
    Ok(vk.encode())
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)
        .map_err(|e| StoreError::Database(format!("Could not open {}: {}", path.display(), e)))?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS entity (
            vk BLOB PRIMARY KEY,
            type_tag INTEGER NOT NULL,
            contents BLOB NOT NULL
        )",
        [],
    )?;
    Ok(conn)
}

fn upsert(conn: &Connection, vk: &VerifyingKey, raw: &RawCredential) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR REPLACE INTO entity (vk, type_tag, contents) VALUES (?1, ?2, ?3)",
        params![vk.as_bytes(), raw.type_tag, raw.payload],
    )?;
    Ok(())
}

/// Bring every stored record up through the factory.
///
/// A record whose factory-reported key differs from its stored key is
/// logged and skipped; so is a record the factory rejects.
fn scan_and_load<F: IdentityFactory>(
    factory: &F,
    conn: &Connection,
) -> Result<(IdentityCache<F::Identity>, LoadReport), StoreError> {
    let mut stmt = conn.prepare("SELECT vk, type_tag, contents FROM entity")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, Vec<u8>>(0)?,
            row.get::<_, u8>(1)?,
            row.get::<_, Vec<u8>>(2)?,
        ))
    })?;

    let mut cache = IdentityCache::new();
    let mut report = LoadReport::default();
    for row in rows {
        let (vk, type_tag, contents) = match row {
            Ok(row) => row,
            Err(err) => {
                error!("Unreadable entity record: {}", err);
                report.skipped += 1;
                continue;
            }
        };
        let stored = VerifyingKey::new(vk).encode();
        match factory.create(type_tag, &contents) {
            Ok((identity, derived)) if derived.encode() == stored => {
                info!("Loaded vk {}", stored);
                cache.insert(stored, Arc::new(identity));
                report.loaded += 1;
            }
            Ok((_, derived)) => {
                let err = StoreError::Corruption {
                    stored,
                    derived: derived.encode(),
                };
                error!("{}", err);
                report.skipped += 1;
            }
            Err(err) => {
                error!("Could not set entity for vk {}: {}", stored, err);
                report.skipped += 1;
            }
        }
    }
    Ok((cache, report))
}
