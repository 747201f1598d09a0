//! Lineage store
//!
//! SQLite-backed single source of truth for lineages, their two tracks and
//! every track's history. Track state is the only mutable column; events,
//! contents, intents and validation results are append-only. Every mutating
//! call commits before it returns, and [`LineageStore::commit`] writes a
//! state change together with the artifacts it depends on in one
//! transaction, so readers never see one without the other.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{Result, StoreContext, TwinTrackError};
use crate::intent::IntentRepresentation;
use crate::lineage::{GeneratedContent, Lineage, LineageOverview, LineageStatus, Retirement, Track};
use crate::spec_record::SpecificationRecord;
use crate::types::{EventKind, LineageId, MaturityState, TrackEvent, TrackKey, TrackRole};
use crate::validator::{ValidationResult, ValidationStatus};

/// Embedded schema SQL from LINEAGE_SCHEMA.sql
const SCHEMA_SQL: &str = include_str!("../../LINEAGE_SCHEMA.sql");

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A state change plus everything that must land with it.
#[derive(Debug, Clone)]
pub struct Commit {
    pub to: MaturityState,
    pub detail: String,
    pub content: Option<GeneratedContent>,
    pub intent: Option<IntentRepresentation>,
    pub validation: Option<ValidationResult>,
    /// Extra events recorded after the transition event
    pub events: Vec<(EventKind, String)>,
}

impl Commit {
    pub fn to(state: MaturityState, detail: impl Into<String>) -> Self {
        Self {
            to: state,
            detail: detail.into(),
            content: None,
            intent: None,
            validation: None,
            events: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: GeneratedContent) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_intent(mut self, intent: IntentRepresentation) -> Self {
        self.intent = Some(intent);
        self
    }

    pub fn with_validation(mut self, validation: ValidationResult) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn with_event(mut self, kind: EventKind, detail: impl Into<String>) -> Self {
        self.events.push((kind, detail.into()));
        self
    }
}

/// Counts for the operator surface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub total: usize,
    pub in_progress: usize,
    pub stable: usize,
    pub stalled: usize,
    pub diverged: usize,
    pub retired: usize,
    pub specifications: usize,
}

pub struct LineageStore {
    conn: Mutex<Connection>,
}

impl LineageStore {
    /// Open (or create) a store file and apply the schema
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| TwinTrackError::Store {
                message: format!("failed to create store directory {}: {e}", parent.display()),
                source: None,
            })?;
        }

        let conn = Connection::open(path).context("failed to open lineage store")?;
        // journal_mode returns the resulting mode as a row
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .context("failed to enable WAL")?;
        Self::init(&conn)?;

        tracing::debug!(path = %path.display(), journal_mode = %mode, "Lineage store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store; contents vanish when it is dropped
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory store")?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "foreign_keys", true)
            .context("failed to enable foreign keys")?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("failed to set busy timeout")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply schema")?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lineages
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist `spec` (idempotently) and a fresh lineage with both tracks in
    /// `Specified`.
    pub fn create_lineage(&self, spec: &SpecificationRecord) -> Result<Lineage> {
        spec.validate()?;
        let digest = spec.digest()?;
        let body = to_json("specification record", spec)?;

        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let recorded: Option<String> = tx
            .query_row(
                "SELECT digest FROM specifications WHERE namespace = ?1 AND name = ?2 AND generation = ?3",
                params![spec.namespace(), spec.name(), spec.generation()],
                |row| row.get(0),
            )
            .optional()
            .context("failed to look up specification")?;
        match recorded {
            Some(existing) if existing != digest => {
                return Err(TwinTrackError::SpecificationConflict { spec: spec.key() });
            }
            Some(_) => {}
            None => {
                tx.execute(
                    r#"
                    INSERT INTO specifications (namespace, name, generation, digest, body, recorded_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    params![
                        spec.namespace(),
                        spec.name(),
                        spec.generation(),
                        digest,
                        body,
                        Utc::now().to_rfc3339()
                    ],
                )
                .context("failed to record specification")?;
            }
        }

        // One active lineage per identity, whatever its generation.
        let active: Option<(String, u32)> = tx
            .query_row(
                r#"
                SELECT id, generation FROM lineages
                WHERE namespace = ?1 AND name = ?2 AND retired_at IS NULL
                "#,
                params![spec.namespace(), spec.name()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("failed to look up active lineage")?;
        if let Some((existing, generation)) = active {
            return Err(TwinTrackError::DuplicateLineage {
                spec: format!("{}/{}@g{generation}", spec.namespace(), spec.name()),
                existing: parse_lineage_id(&existing)?,
            });
        }

        let id = LineageId::new();
        let now = Utc::now();
        tx.execute(
            r#"
            INSERT INTO lineages (id, namespace, name, generation, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                id.to_string(),
                spec.namespace(),
                spec.name(),
                spec.generation(),
                now.to_rfc3339()
            ],
        )
        .context("failed to insert lineage")?;

        for role in TrackRole::all() {
            let key = TrackKey::new(id, role);
            tx.execute(
                "INSERT INTO tracks (lineage_id, role, state, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.to_string(),
                    role.as_str(),
                    MaturityState::Specified.as_str(),
                    now.to_rfc3339()
                ],
            )
            .context("failed to insert track")?;
            insert_event(
                &tx,
                key,
                &TrackEvent {
                    timestamp: now,
                    kind: EventKind::Created,
                    detail: format!("created for {}", spec.key()),
                },
            )?;
        }

        let lineage = load_lineage(&tx, id)?;
        tx.commit().context("failed to commit lineage")?;

        tracing::debug!(lineage = %id, spec = %spec.key(), "Created lineage");
        Ok(lineage)
    }

    pub fn get_lineage(&self, id: LineageId) -> Result<Lineage> {
        let conn = self.conn();
        load_lineage(&conn, id)
    }

    pub fn get_track(&self, key: TrackKey) -> Result<Track> {
        let conn = self.conn();
        load_track(&conn, key)
    }

    pub fn track_state(&self, key: TrackKey) -> Result<MaturityState> {
        let conn = self.conn();
        current_state(&conn, key).map(|(state, _)| state)
    }

    pub fn list_lineages(&self) -> Result<Vec<LineageOverview>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT l.id, l.namespace, l.name, l.generation, l.created_at,
                       l.retired_at IS NOT NULL, r.state, p.state
                FROM lineages l
                JOIN tracks r ON r.lineage_id = l.id AND r.role = 'rapid-iteration'
                JOIN tracks p ON p.lineage_id = l.id AND p.role = 'performance-oriented'
                ORDER BY l.created_at, l.id
                "#,
            )
            .context("failed to prepare lineage listing")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .context("failed to list lineages")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read lineage row")?;

        rows.into_iter()
            .map(
                |(id, namespace, name, generation, created_at, retired, primary, sibling)| {
                    let primary_state = parse_state(&primary)?;
                    let sibling_state = parse_state(&sibling)?;
                    Ok(LineageOverview {
                        id: parse_lineage_id(&id)?,
                        spec_key: format!("{namespace}/{name}@g{generation}"),
                        primary_state,
                        sibling_state,
                        status: LineageStatus::from_states(retired, primary_state, sibling_state),
                        created_at: parse_timestamp(&created_at)?,
                    })
                },
            )
            .collect()
    }

    pub fn summary(&self) -> Result<StoreSummary> {
        let specifications: i64 = {
            let conn = self.conn();
            conn.query_row("SELECT COUNT(*) FROM specifications", [], |row| row.get(0))
                .context("failed to count specifications")?
        };

        let mut summary = StoreSummary {
            specifications: usize::try_from(specifications).unwrap_or(0),
            ..StoreSummary::default()
        };
        for overview in self.list_lineages()? {
            summary.total += 1;
            match overview.status {
                LineageStatus::InProgress => summary.in_progress += 1,
                LineageStatus::Stable => summary.stable += 1,
                LineageStatus::Stalled => summary.stalled += 1,
                LineageStatus::Diverged => summary.diverged += 1,
                LineageStatus::Retired => summary.retired += 1,
            }
        }
        Ok(summary)
    }

    /// Mark a lineage as taken out of service. Tracks and history are kept;
    /// the identity+generation becomes free for a new lineage.
    pub fn retire_lineage(&self, id: LineageId, reason: &str) -> Result<Retirement> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let retired: Option<Option<String>> = tx
            .query_row(
                "SELECT retired_at FROM lineages WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .context("failed to look up lineage")?;
        match retired {
            None => return Err(TwinTrackError::LineageNotFound(id)),
            Some(Some(_)) => {
                return Err(TwinTrackError::not_ready(
                    TrackKey::new(id, TrackRole::RapidIteration),
                    "lineage is already retired",
                ));
            }
            Some(None) => {}
        }

        let retirement = Retirement {
            at: Utc::now(),
            reason: reason.to_string(),
        };
        tx.execute(
            "UPDATE lineages SET retired_at = ?2, retired_reason = ?3 WHERE id = ?1",
            params![id.to_string(), retirement.at.to_rfc3339(), reason],
        )
        .context("failed to retire lineage")?;
        for role in TrackRole::all() {
            insert_event(
                &tx,
                TrackKey::new(id, role),
                &TrackEvent {
                    timestamp: retirement.at,
                    kind: EventKind::Retired,
                    detail: reason.to_string(),
                },
            )?;
        }
        tx.commit().context("failed to commit retirement")?;

        tracing::debug!(lineage = %id, reason, "Retired lineage");
        Ok(retirement)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Append-only history
    // ─────────────────────────────────────────────────────────────────────────

    pub fn append_event(&self, key: TrackKey, kind: EventKind, detail: impl Into<String>) -> Result<()> {
        let conn = self.conn();
        ensure_track(&conn, key)?;
        insert_event(&conn, key, &TrackEvent::now(kind, detail))
    }

    pub fn record_content(&self, key: TrackKey, content: &GeneratedContent) -> Result<()> {
        let conn = self.conn();
        ensure_track(&conn, key)?;
        insert_content(&conn, key, content)
    }

    pub fn record_intent(&self, key: TrackKey, intent: &IntentRepresentation) -> Result<()> {
        let conn = self.conn();
        ensure_track(&conn, key)?;
        insert_intent(&conn, key, intent)
    }

    pub fn record_validation(&self, key: TrackKey, result: &ValidationResult) -> Result<()> {
        let conn = self.conn();
        ensure_track(&conn, key)?;
        insert_validation(&conn, key, result)
    }

    pub fn events(&self, key: TrackKey) -> Result<Vec<TrackEvent>> {
        let conn = self.conn();
        ensure_track(&conn, key)?;
        load_events(&conn, key)
    }

    pub fn content_history(&self, key: TrackKey) -> Result<Vec<GeneratedContent>> {
        self.history(key, "track_contents", "generated content")
    }

    pub fn intent_history(&self, key: TrackKey) -> Result<Vec<IntentRepresentation>> {
        self.history(key, "track_intents", "intent representation")
    }

    pub fn validation_history(&self, key: TrackKey) -> Result<Vec<ValidationResult>> {
        self.history(key, "track_validations", "validation result")
    }

    fn history<T: DeserializeOwned>(
        &self,
        key: TrackKey,
        table: &'static str,
        what: &'static str,
    ) -> Result<Vec<T>> {
        let conn = self.conn();
        ensure_track(&conn, key)?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT body FROM {table} WHERE lineage_id = ?1 AND role = ?2 ORDER BY seq"
            ))
            .context("failed to prepare history query")?;
        let bodies = stmt
            .query_map(params![key.lineage.to_string(), key.role.as_str()], |row| {
                row.get::<_, String>(0)
            })
            .context("failed to query history")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read history row")?;
        bodies.iter().map(|body| from_json(what, body)).collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply one validated transition atomically. Returns the prior state.
    pub fn commit(&self, key: TrackKey, commit: Commit) -> Result<MaturityState> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        let from = apply_commit(&tx, key, &commit)?;
        tx.commit().context("failed to commit transition")?;
        Ok(from)
    }

    /// Apply several transitions in one transaction; all or nothing.
    ///
    /// Entries are applied in order, so the same track may appear twice to
    /// walk two edges.
    pub fn commit_all(&self, commits: Vec<(TrackKey, Commit)>) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        for (key, commit) in &commits {
            apply_commit(&tx, *key, commit)?;
        }
        tx.commit().context("failed to commit transitions")?;
        Ok(())
    }
}

fn apply_commit(tx: &Transaction<'_>, key: TrackKey, commit: &Commit) -> Result<MaturityState> {
    let (from, retired) = current_state(tx, key)?;
    if retired {
        return Err(TwinTrackError::not_ready(key, "lineage is retired"));
    }
    if !from.can_transition(key.role, commit.to) {
        return Err(TwinTrackError::IllegalTransition {
            track: key,
            from,
            to: commit.to,
        });
    }

    if let Some(content) = &commit.content {
        insert_content(tx, key, content)?;
    }
    if let Some(intent) = &commit.intent {
        insert_intent(tx, key, intent)?;
    }
    if let Some(validation) = &commit.validation {
        insert_validation(tx, key, validation)?;
    }

    let now = Utc::now();
    tx.execute(
        "UPDATE tracks SET state = ?3, updated_at = ?4 WHERE lineage_id = ?1 AND role = ?2",
        params![
            key.lineage.to_string(),
            key.role.as_str(),
            commit.to.as_str(),
            now.to_rfc3339()
        ],
    )
    .context("failed to update track state")?;

    let detail = if commit.detail.is_empty() {
        format!("{from} -> {}", commit.to)
    } else {
        format!("{from} -> {}: {}", commit.to, commit.detail)
    };
    insert_event(
        tx,
        key,
        &TrackEvent {
            timestamp: now,
            kind: EventKind::Transition,
            detail,
        },
    )?;
    for (kind, detail) in &commit.events {
        insert_event(
            tx,
            key,
            &TrackEvent {
                timestamp: now,
                kind: *kind,
                detail: detail.clone(),
            },
        )?;
    }

    tracing::debug!(track = %key, %from, to = %commit.to, "Committed transition");
    Ok(from)
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

fn current_state(conn: &Connection, key: TrackKey) -> Result<(MaturityState, bool)> {
    let row: Option<(String, bool)> = conn
        .query_row(
            r#"
            SELECT t.state, l.retired_at IS NOT NULL
            FROM tracks t JOIN lineages l ON l.id = t.lineage_id
            WHERE t.lineage_id = ?1 AND t.role = ?2
            "#,
            params![key.lineage.to_string(), key.role.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .context("failed to read track state")?;
    let (state, retired) = row.ok_or(TwinTrackError::LineageNotFound(key.lineage))?;
    Ok((parse_state(&state)?, retired))
}

fn ensure_track(conn: &Connection, key: TrackKey) -> Result<()> {
    current_state(conn, key).map(|_| ())
}

fn load_lineage(conn: &Connection, id: LineageId) -> Result<Lineage> {
    let row: Option<(String, String, Option<String>, Option<String>)> = conn
        .query_row(
            r#"
            SELECT s.body, l.created_at, l.retired_at, l.retired_reason
            FROM lineages l
            JOIN specifications s
              ON s.namespace = l.namespace AND s.name = l.name AND s.generation = l.generation
            WHERE l.id = ?1
            "#,
            params![id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()
        .context("failed to read lineage")?;
    let (spec_body, created_at, retired_at, retired_reason) =
        row.ok_or(TwinTrackError::LineageNotFound(id))?;

    let retired = match retired_at {
        Some(at) => Some(Retirement {
            at: parse_timestamp(&at)?,
            reason: retired_reason.unwrap_or_default(),
        }),
        None => None,
    };

    Ok(Lineage {
        id,
        spec: from_json("specification record", &spec_body)?,
        created_at: parse_timestamp(&created_at)?,
        retired,
        tracks: [
            load_track(conn, TrackKey::new(id, TrackRole::RapidIteration))?,
            load_track(conn, TrackKey::new(id, TrackRole::PerformanceOriented))?,
        ],
    })
}

fn load_track(conn: &Connection, key: TrackKey) -> Result<Track> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT state, updated_at FROM tracks WHERE lineage_id = ?1 AND role = ?2",
            params![key.lineage.to_string(), key.role.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .context("failed to read track")?;
    let (state, updated_at) = row.ok_or(TwinTrackError::LineageNotFound(key.lineage))?;

    Ok(Track {
        role: key.role,
        state: parse_state(&state)?,
        events: load_events(conn, key)?,
        content: latest(conn, key, "track_contents", "generated content")?,
        intent: latest(conn, key, "track_intents", "intent representation")?,
        validation: latest(conn, key, "track_validations", "validation result")?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn load_events(conn: &Connection, key: TrackKey) -> Result<Vec<TrackEvent>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT recorded_at, kind, detail FROM track_events
            WHERE lineage_id = ?1 AND role = ?2
            ORDER BY seq
            "#,
        )
        .context("failed to prepare event query")?;
    let rows = stmt
        .query_map(params![key.lineage.to_string(), key.role.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .context("failed to query events")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to read event row")?;

    rows.into_iter()
        .map(|(at, kind, detail)| {
            Ok(TrackEvent {
                timestamp: parse_timestamp(&at)?,
                kind: EventKind::parse(&kind)
                    .ok_or_else(|| TwinTrackError::CorruptRecord(format!("unknown event kind '{kind}'")))?,
                detail,
            })
        })
        .collect()
}

fn latest<T: DeserializeOwned>(
    conn: &Connection,
    key: TrackKey,
    table: &'static str,
    what: &'static str,
) -> Result<Option<T>> {
    let body: Option<String> = conn
        .query_row(
            &format!(
                "SELECT body FROM {table} WHERE lineage_id = ?1 AND role = ?2 ORDER BY seq DESC LIMIT 1"
            ),
            params![key.lineage.to_string(), key.role.as_str()],
            |row| row.get(0),
        )
        .optional()
        .context("failed to read latest artifact")?;
    body.map(|body| from_json(what, &body)).transpose()
}

fn insert_event(conn: &Connection, key: TrackKey, event: &TrackEvent) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO track_events (lineage_id, role, kind, detail, recorded_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            key.lineage.to_string(),
            key.role.as_str(),
            event.kind.as_str(),
            event.detail,
            event.timestamp.to_rfc3339()
        ],
    )
    .context("failed to append event")?;
    Ok(())
}

fn insert_content(conn: &Connection, key: TrackKey, content: &GeneratedContent) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO track_contents (lineage_id, role, digest, body, recorded_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            key.lineage.to_string(),
            key.role.as_str(),
            content.digest(),
            to_json("generated content", content)?,
            Utc::now().to_rfc3339()
        ],
    )
    .context("failed to record content")?;
    Ok(())
}

fn insert_intent(conn: &Connection, key: TrackKey, intent: &IntentRepresentation) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO track_intents (lineage_id, role, fingerprint, body, recorded_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            key.lineage.to_string(),
            key.role.as_str(),
            intent.fingerprint,
            to_json("intent representation", intent)?,
            Utc::now().to_rfc3339()
        ],
    )
    .context("failed to record intent")?;
    Ok(())
}

fn insert_validation(conn: &Connection, key: TrackKey, result: &ValidationResult) -> Result<()> {
    let status = match result.status {
        ValidationStatus::Pass => "pass",
        ValidationStatus::Fail => "fail",
        ValidationStatus::Partial => "partial",
    };
    conn.execute(
        r#"
        INSERT INTO track_validations (lineage_id, role, status, body, recorded_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            key.lineage.to_string(),
            key.role.as_str(),
            status,
            to_json("validation result", result)?,
            Utc::now().to_rfc3339()
        ],
    )
    .context("failed to record validation")?;
    Ok(())
}

fn to_json<T: Serialize>(what: &'static str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|source| TwinTrackError::Serialization { what, source })
}

fn from_json<T: DeserializeOwned>(what: &'static str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|source| TwinTrackError::Serialization { what, source })
}

fn parse_state(value: &str) -> Result<MaturityState> {
    MaturityState::parse(value)
        .ok_or_else(|| TwinTrackError::CorruptRecord(format!("unknown maturity state '{value}'")))
}

fn parse_lineage_id(value: &str) -> Result<LineageId> {
    LineageId::parse(value)
        .ok_or_else(|| TwinTrackError::CorruptRecord(format!("malformed lineage id '{value}'")))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TwinTrackError::CorruptRecord(format!("bad timestamp '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spec(name: &str) -> SpecificationRecord {
        SpecificationRecord::builder(name, "test module")
            .criterion("C1", "first")
            .criterion("C2", "second")
            .build()
            .expect("spec")
    }

    #[test]
    fn test_schema_applies() {
        let store = LineageStore::open_in_memory().expect("store");
        assert_eq!(store.summary().expect("summary"), StoreSummary::default());
    }

    #[test]
    fn test_create_lineage_has_two_specified_tracks() {
        let store = LineageStore::open_in_memory().expect("store");

        let lineage = store.create_lineage(&spec("tokenizer")).expect("create");

        assert_eq!(lineage.primary().role, TrackRole::RapidIteration);
        assert_eq!(lineage.sibling().role, TrackRole::PerformanceOriented);
        for track in lineage.tracks() {
            assert_eq!(track.state, MaturityState::Specified);
            assert_eq!(track.events.len(), 1);
            assert_eq!(track.events[0].kind, EventKind::Created);
        }
        assert_eq!(lineage.spec, spec("tokenizer"));
    }

    #[test]
    fn test_duplicate_lineage_rejected_until_retired() {
        let store = LineageStore::open_in_memory().expect("store");
        let first = store.create_lineage(&spec("tokenizer")).expect("create");

        let err = store
            .create_lineage(&spec("tokenizer"))
            .expect_err("duplicate");
        assert!(
            matches!(err, TwinTrackError::DuplicateLineage { existing, .. } if existing == first.id)
        );

        store.retire_lineage(first.id, "superseded").expect("retire");
        let second = store.create_lineage(&spec("tokenizer")).expect("recreate");
        assert_ne!(second.id, first.id);
    }

    #[test]
    fn test_next_generation_waits_for_retirement() {
        let store = LineageStore::open_in_memory().expect("store");
        let base = spec("tokenizer");
        let first = store.create_lineage(&base).expect("create");

        let next = base.respecify().build().expect("next");
        let err = store.create_lineage(&next).expect_err("g1 still active");
        match err {
            TwinTrackError::DuplicateLineage { spec, existing } => {
                assert_eq!(spec, "default/tokenizer@g1");
                assert_eq!(existing, first.id);
            }
            other => panic!("expected DuplicateLineage, got {other}"),
        }

        store.retire_lineage(first.id, "respecified").expect("retire");
        let successor = store.create_lineage(&next).expect("g2 after retirement");
        assert_eq!(successor.spec.generation(), 2);
    }

    #[test]
    fn test_other_identity_in_same_namespace_is_independent() {
        let store = LineageStore::open_in_memory().expect("store");
        store.create_lineage(&spec("tokenizer")).expect("create");
        assert!(store.create_lineage(&spec("splitter")).is_ok());
    }

    #[test]
    fn test_conflicting_spec_body_rejected() {
        let store = LineageStore::open_in_memory().expect("store");
        let original = store.create_lineage(&spec("tokenizer")).expect("create");
        store.retire_lineage(original.id, "reset").expect("retire");

        let altered = SpecificationRecord::builder("tokenizer", "different purpose")
            .criterion("C1", "first")
            .build()
            .expect("spec");
        let err = store.create_lineage(&altered).expect_err("conflict");

        assert!(matches!(err, TwinTrackError::SpecificationConflict { .. }));
    }

    #[test]
    fn test_commit_applies_state_and_artifacts_together() {
        let store = LineageStore::open_in_memory().expect("store");
        let lineage = store.create_lineage(&spec("tokenizer")).expect("create");
        let key = lineage.key(TrackRole::RapidIteration);
        let content = GeneratedContent::new("def f(): pass", "python", "test");

        let from = store
            .commit(
                key,
                Commit::to(MaturityState::InDevelopment, "generated").with_content(content.clone()),
            )
            .expect("commit");

        assert_eq!(from, MaturityState::Specified);
        let track = store.get_track(key).expect("track");
        assert_eq!(track.state, MaturityState::InDevelopment);
        assert_eq!(track.content, Some(content));
        let last = track.events.last().expect("transition event");
        assert_eq!(last.kind, EventKind::Transition);
        assert_eq!(last.detail, "specified -> in_development: generated");
    }

    #[test]
    fn test_illegal_transition_writes_nothing() {
        let store = LineageStore::open_in_memory().expect("store");
        let lineage = store.create_lineage(&spec("tokenizer")).expect("create");
        let key = lineage.key(TrackRole::PerformanceOriented);

        let err = store
            .commit(
                key,
                Commit::to(MaturityState::InDevelopment, "")
                    .with_content(GeneratedContent::new("x", "rust", "test")),
            )
            .expect_err("sibling cannot develop on its own");

        assert!(matches!(err, TwinTrackError::IllegalTransition { .. }));
        let track = store.get_track(key).expect("track");
        assert_eq!(track.state, MaturityState::Specified);
        assert_eq!(track.content, None);
        assert_eq!(track.events.len(), 1);
    }

    #[test]
    fn test_commit_all_rolls_back_on_any_illegal_entry() {
        let store = LineageStore::open_in_memory().expect("store");
        let lineage = store.create_lineage(&spec("tokenizer")).expect("create");
        let rapid = lineage.key(TrackRole::RapidIteration);
        let perf = lineage.key(TrackRole::PerformanceOriented);

        let err = store
            .commit_all(vec![
                (rapid, Commit::to(MaturityState::InDevelopment, "")),
                (perf, Commit::to(MaturityState::Stable, "")),
            ])
            .expect_err("second entry illegal");

        assert!(matches!(err, TwinTrackError::IllegalTransition { .. }));
        assert_eq!(
            store.track_state(rapid).expect("state"),
            MaturityState::Specified
        );
    }

    #[test]
    fn test_history_is_preserved() {
        let store = LineageStore::open_in_memory().expect("store");
        let lineage = store.create_lineage(&spec("tokenizer")).expect("create");
        let key = lineage.key(TrackRole::RapidIteration);

        store
            .record_content(key, &GeneratedContent::new("v1", "python", "test"))
            .expect("v1");
        store
            .record_content(key, &GeneratedContent::new("v2", "python", "test"))
            .expect("v2");

        let bodies: Vec<String> = store
            .content_history(key)
            .expect("history")
            .into_iter()
            .map(|c| c.body)
            .collect();
        assert_eq!(bodies, vec!["v1".to_string(), "v2".to_string()]);
        assert_eq!(
            store.get_track(key).expect("track").content.map(|c| c.body),
            Some("v2".to_string())
        );
    }

    #[test]
    fn test_events_cannot_be_rewritten() {
        let store = LineageStore::open_in_memory().expect("store");
        store.create_lineage(&spec("tokenizer")).expect("create");

        let conn = store.conn();
        let result = conn.execute("UPDATE track_events SET detail = 'forged'", []);

        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_lineage_is_not_found() {
        let store = LineageStore::open_in_memory().expect("store");
        let id = LineageId::new();

        assert!(matches!(
            store.get_lineage(id),
            Err(TwinTrackError::LineageNotFound(missing)) if missing == id
        ));
        assert!(matches!(
            store.append_event(TrackKey::new(id, TrackRole::RapidIteration), EventKind::Created, "x"),
            Err(TwinTrackError::LineageNotFound(_))
        ));
    }

    #[test]
    fn test_retired_lineage_refuses_transitions() {
        let store = LineageStore::open_in_memory().expect("store");
        let lineage = store.create_lineage(&spec("tokenizer")).expect("create");
        store.retire_lineage(lineage.id, "abandoned").expect("retire");

        let err = store
            .commit(
                lineage.key(TrackRole::RapidIteration),
                Commit::to(MaturityState::InDevelopment, ""),
            )
            .expect_err("retired");

        assert!(matches!(err, TwinTrackError::NotReady { .. }));
        let reloaded = store.get_lineage(lineage.id).expect("lineage");
        assert_eq!(reloaded.status(), LineageStatus::Retired);
        assert_eq!(
            reloaded.retired.map(|r| r.reason),
            Some("abandoned".to_string())
        );
    }

    #[test]
    fn test_listing_and_summary() {
        let store = LineageStore::open_in_memory().expect("store");
        let a = store.create_lineage(&spec("a")).expect("a");
        store.create_lineage(&spec("b")).expect("b");
        store.retire_lineage(a.id, "done").expect("retire");

        let listing = store.list_lineages().expect("list");
        assert_eq!(listing.len(), 2);
        assert!(listing.iter().any(|o| o.spec_key == "default/b@g1"));

        let summary = store.summary().expect("summary");
        assert_eq!(summary.total, 2);
        assert_eq!(summary.retired, 1);
        assert_eq!(summary.in_progress, 1);
        assert_eq!(summary.specifications, 2);
    }
}
