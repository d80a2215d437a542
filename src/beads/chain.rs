// =============================================================================
// Bead chain — append-only SQLite store with hash linkage and Merkle batches
// =============================================================================
//
// Storage rules:
//   - WAL mode; this process is the single writer.
//   - Beads are append-only.  The only post-hoc mutation is backfilling
//     `merkle_batch_id` when a batch seals (excluded from the hash).
//   - `hash_prev` links each bead to the previous bead of the same type
//     (one stream per bead type); genesis beads carry NULL.
//
// Write protocol per bead: validate draft → stamp knowledge time →
// set hash_prev from the stream head → compute hash_self over canonical
// JSON → ECDSA-sign hash_self → insert bead + lineage edges in one
// transaction.
// =============================================================================

use std::path::Path;
use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::attest::{verify_signature, NodeIdentity};
use super::merkle::{
    merkle_root, MerkleBatch, MerkleTrigger, MAX_ANCHOR_AGE_SECS, MAX_UNANCHORED_BEADS,
};
use super::model::{
    Attestation, Bead, BeadContent, BeadDraft, BeadError, BeadStatus, BeadType, SourceRef,
    TemporalClass,
};
use crate::types::RejectionCategory;

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// Outcome of a chain verification walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainVerdict {
    /// Every hash recomputes, every link holds, every signature verifies.
    Clean,
    /// Something does not add up; the reason names the first bad bead.
    Tampered(String),
    /// Chain is intact but nothing has been anchored yet.
    Unanchored,
}

// ---------------------------------------------------------------------------
// BeadChain
// ---------------------------------------------------------------------------

/// Open handle to the flight recorder.  One per cycle; single writer.
pub struct BeadChain {
    conn: Connection,
    identity: NodeIdentity,
}

impl BeadChain {
    /// Open (creating if needed) the chain database at `path`.
    pub fn open(path: impl AsRef<Path>, identity: NodeIdentity) -> Result<Self, BeadError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BeadError::Attestation(format!("mkdir for chain db {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let chain = Self { conn, identity };
        chain.init_schema()?;
        debug!(path = %path.display(), "bead chain opened");
        Ok(chain)
    }

    /// In-memory chain for tests.
    pub fn open_in_memory(identity: NodeIdentity) -> Result<Self, BeadError> {
        let conn = Connection::open_in_memory()?;
        let chain = Self { conn, identity };
        chain.init_schema()?;
        Ok(chain)
    }

    fn init_schema(&self) -> Result<(), BeadError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS beads (
                rowid_ord                   INTEGER PRIMARY KEY AUTOINCREMENT,
                bead_id                     TEXT NOT NULL UNIQUE,
                bead_type                   TEXT NOT NULL,
                temporal_class              TEXT NOT NULL,
                world_time_valid_from       INTEGER,
                world_time_valid_to         INTEGER,
                knowledge_time_recorded_at  INTEGER NOT NULL,
                source_type                 TEXT NOT NULL,
                source_id                   TEXT NOT NULL,
                source_version              TEXT NOT NULL,
                token_mint                  TEXT,
                tags                        TEXT NOT NULL DEFAULT '[]',
                lineage                     TEXT NOT NULL DEFAULT '[]',
                content                     TEXT NOT NULL,
                hash_self                   TEXT NOT NULL,
                hash_prev                   TEXT,
                merkle_batch_id             TEXT,
                air_node_id                 TEXT NOT NULL,
                code_hash                   TEXT NOT NULL,
                model_hash                  TEXT,
                ecdsa_sig                   TEXT NOT NULL,
                pqc_sig                     TEXT,
                status                      TEXT NOT NULL DEFAULT 'ACTIVE'
            );
            CREATE TABLE IF NOT EXISTS bead_lineage (
                bead_id    TEXT NOT NULL,
                parent_id  TEXT NOT NULL,
                position   INTEGER NOT NULL,
                PRIMARY KEY (bead_id, position)
            );
            CREATE TABLE IF NOT EXISTS merkle_batches (
                batch_id        TEXT PRIMARY KEY,
                merkle_root     TEXT NOT NULL,
                bead_count      INTEGER NOT NULL,
                trigger_type    TEXT NOT NULL,
                trigger_bead_id TEXT,
                created_at      INTEGER NOT NULL,
                anchor_tx       TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_beads_type       ON beads (bead_type);
            CREATE INDEX IF NOT EXISTS idx_beads_mint       ON beads (token_mint);
            CREATE INDEX IF NOT EXISTS idx_beads_world_from ON beads (world_time_valid_from);
            CREATE INDEX IF NOT EXISTS idx_beads_world_to   ON beads (world_time_valid_to);
            CREATE INDEX IF NOT EXISTS idx_beads_ktime      ON beads (knowledge_time_recorded_at);
            CREATE INDEX IF NOT EXISTS idx_beads_class      ON beads (temporal_class);
            CREATE INDEX IF NOT EXISTS idx_beads_status     ON beads (status);
            CREATE INDEX IF NOT EXISTS idx_beads_batch      ON beads (merkle_batch_id);
            CREATE INDEX IF NOT EXISTS idx_lineage_parent   ON bead_lineage (parent_id);",
        )?;
        Ok(())
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    // -------------------------------------------------------------------------
    // Write path
    // -------------------------------------------------------------------------

    /// Validate, stamp, hash, sign, and insert a bead.  Returns the stored
    /// bead with all chain fields populated.
    pub fn append(&mut self, draft: BeadDraft, now: i64) -> Result<Bead, BeadError> {
        let mut bead = Bead::draft(draft, now)?;

        // Link into the per-type stream.
        bead.hash_prev = self.stream_head_hash(bead.bead_type)?;

        let hash_self = bead.compute_hash()?;
        let attestation = self.identity.attest(&hash_self)?;
        bead.hash_self = Some(hash_self);
        bead.attestation = Some(attestation);

        let tx = self.conn.transaction()?;
        insert_bead(&tx, &bead)?;
        for (position, parent_id) in bead.lineage.iter().enumerate() {
            tx.execute(
                "INSERT INTO bead_lineage (bead_id, parent_id, position) VALUES (?1, ?2, ?3)",
                params![bead.bead_id, parent_id, position as i64],
            )?;
        }
        tx.commit()?;

        debug!(
            bead_id = %bead.bead_id,
            bead_type = %bead.bead_type,
            "bead appended"
        );
        Ok(bead)
    }

    fn stream_head_hash(&self, bead_type: BeadType) -> Result<Option<String>, BeadError> {
        let hash = self
            .conn
            .query_row(
                "SELECT hash_self FROM beads WHERE bead_type = ?1
                 ORDER BY rowid_ord DESC LIMIT 1",
                params![bead_type.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// Most recent bead of a type (HEARTBEAT lineage linking, POLICY dedup).
    pub fn head(&self, bead_type: BeadType) -> Result<Option<Bead>, BeadError> {
        let bead = self
            .conn
            .query_row(
                &format!("SELECT {BEAD_COLUMNS} FROM beads WHERE bead_type = ?1
                 ORDER BY rowid_ord DESC LIMIT 1"),
                params![bead_type.to_string()],
                row_to_bead,
            )
            .optional()?;
        Ok(bead)
    }

    pub fn get(&self, bead_id: &str) -> Result<Option<Bead>, BeadError> {
        let bead = self
            .conn
            .query_row(
                &format!("SELECT {BEAD_COLUMNS} FROM beads WHERE bead_id = ?1"),
                params![bead_id],
                row_to_bead,
            )
            .optional()?;
        Ok(bead)
    }

    pub fn count(&self) -> Result<u64, BeadError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM beads", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    // -------------------------------------------------------------------------
    // Merkle batching
    // -------------------------------------------------------------------------

    /// Evaluate the three anchor triggers in priority order.
    pub fn check_anchor_trigger(&self, now: i64) -> Result<Option<MerkleTrigger>, BeadError> {
        let unanchored: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM beads WHERE merkle_batch_id IS NULL",
            [],
            |row| row.get(0),
        )?;
        if unanchored == 0 {
            return Ok(None);
        }

        let decision_beads: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM beads WHERE merkle_batch_id IS NULL
             AND bead_type IN ('SIGNAL', 'PROPOSAL')",
            [],
            |row| row.get(0),
        )?;
        if decision_beads > 0 {
            return Ok(Some(MerkleTrigger::DecisionBoundary));
        }

        if unanchored as usize >= MAX_UNANCHORED_BEADS {
            return Ok(Some(MerkleTrigger::MaxBeads));
        }

        let last_anchor: Option<i64> = self
            .conn
            .query_row(
                "SELECT MAX(created_at) FROM merkle_batches",
                [],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let elapsed = now - last_anchor.unwrap_or(0);
        if last_anchor.is_some() && elapsed >= MAX_ANCHOR_AGE_SECS {
            return Ok(Some(MerkleTrigger::MaxTime));
        }

        Ok(None)
    }

    /// Seal a batch over every unanchored bead: build the Merkle tree, insert
    /// the batch row, backfill `merkle_batch_id`.
    pub fn seal_batch(
        &mut self,
        trigger: MerkleTrigger,
        trigger_bead_id: Option<&str>,
        now: i64,
    ) -> Result<Option<MerkleBatch>, BeadError> {
        let tx = self.conn.transaction()?;

        let mut hashes: Vec<(String, String)> = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT bead_id, hash_self FROM beads
                 WHERE merkle_batch_id IS NULL ORDER BY rowid_ord ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                hashes.push(row?);
            }
        }

        let leaves: Vec<String> = hashes.iter().map(|(_, h)| h.clone()).collect();
        let root = match merkle_root(&leaves) {
            Some(root) => root,
            None => return Ok(None),
        };

        let batch = MerkleBatch {
            batch_id: Uuid::now_v7().to_string(),
            merkle_root: root,
            bead_count: hashes.len() as u32,
            trigger_type: trigger,
            trigger_bead_id: trigger_bead_id.map(str::to_string),
            created_at: now,
            anchor_tx: None,
        };

        tx.execute(
            "INSERT INTO merkle_batches
             (batch_id, merkle_root, bead_count, trigger_type, trigger_bead_id, created_at, anchor_tx)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
            params![
                batch.batch_id,
                batch.merkle_root,
                batch.bead_count,
                batch.trigger_type.to_string(),
                batch.trigger_bead_id,
                batch.created_at,
            ],
        )?;
        tx.execute(
            "UPDATE beads SET merkle_batch_id = ?1 WHERE merkle_batch_id IS NULL",
            params![batch.batch_id],
        )?;
        tx.commit()?;

        info!(
            batch_id = %batch.batch_id,
            bead_count = batch.bead_count,
            trigger = %batch.trigger_type,
            "merkle batch sealed"
        );
        Ok(Some(batch))
    }

    /// Record the on-chain anchor transaction for a sealed batch.
    pub fn record_anchor_tx(&self, batch_id: &str, anchor_tx: &str) -> Result<(), BeadError> {
        self.conn.execute(
            "UPDATE merkle_batches SET anchor_tx = ?1 WHERE batch_id = ?2",
            params![anchor_tx, batch_id],
        )?;
        Ok(())
    }

    pub fn latest_batch(&self) -> Result<Option<MerkleBatch>, BeadError> {
        let batch = self
            .conn
            .query_row(
                "SELECT batch_id, merkle_root, bead_count, trigger_type, trigger_bead_id,
                        created_at, anchor_tx
                 FROM merkle_batches ORDER BY created_at DESC, batch_id DESC LIMIT 1",
                [],
                |row| {
                    Ok(MerkleBatch {
                        batch_id: row.get(0)?,
                        merkle_root: row.get(1)?,
                        bead_count: row.get::<_, i64>(2)? as u32,
                        trigger_type: MerkleTrigger::from_str(&row.get::<_, String>(3)?)
                            .unwrap_or(MerkleTrigger::MaxTime),
                        trigger_bead_id: row.get(4)?,
                        created_at: row.get(5)?,
                        anchor_tx: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(batch)
    }

    // -------------------------------------------------------------------------
    // Verification
    // -------------------------------------------------------------------------

    /// Walk from the last anchor forward, recomputing every hash, checking
    /// per-stream linkage and signatures.  TAMPERED is reported, never
    /// panicked — availability beats safety here.
    pub fn verify_chain(&self) -> Result<ChainVerdict, BeadError> {
        let anchored: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM merkle_batches",
            [],
            |row| row.get(0),
        )?;

        // Boundary rowid: beads strictly after the last sealed batch, plus the
        // beads of the last batch itself (spot-check the anchor's own span).
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {BEAD_COLUMNS} FROM beads
             WHERE merkle_batch_id IS NULL
                OR merkle_batch_id = (SELECT batch_id FROM merkle_batches
                                      ORDER BY created_at DESC, batch_id DESC LIMIT 1)
             ORDER BY rowid_ord ASC"
        ))?;
        let beads: Vec<Bead> = stmt
            .query_map([], row_to_bead)?
            .collect::<Result<Vec<_>, _>>()?;

        let verifying_key = self.identity.verifying_key();
        let mut stream_prev: std::collections::HashMap<String, Option<String>> =
            std::collections::HashMap::new();

        for bead in &beads {
            let stored_hash = match &bead.hash_self {
                Some(h) => h.clone(),
                None => {
                    return Ok(ChainVerdict::Tampered(format!(
                        "bead {} has no hash_self",
                        bead.bead_id
                    )))
                }
            };

            let recomputed = bead.compute_hash()?;
            if recomputed != stored_hash {
                return Ok(ChainVerdict::Tampered(format!(
                    "bead {} hash mismatch",
                    bead.bead_id
                )));
            }

            // Per-stream linkage.  The first bead we see per stream inherits
            // whatever hash_prev it recorded (its predecessor may be anchored
            // away behind the walk boundary).
            let stream = bead.bead_type.to_string();
            if let Some(expected_prev) = stream_prev.get(&stream) {
                if bead.hash_prev != *expected_prev {
                    return Ok(ChainVerdict::Tampered(format!(
                        "bead {} hash_prev linkage broken",
                        bead.bead_id
                    )));
                }
            }
            stream_prev.insert(stream, Some(stored_hash.clone()));

            let attestation = match &bead.attestation {
                Some(a) => a,
                None => {
                    return Ok(ChainVerdict::Tampered(format!(
                        "bead {} is unsigned",
                        bead.bead_id
                    )))
                }
            };
            if !verify_signature(&verifying_key, &stored_hash, &attestation.ecdsa_sig) {
                return Ok(ChainVerdict::Tampered(format!(
                    "bead {} signature invalid",
                    bead.bead_id
                )));
            }
        }

        if anchored == 0 {
            if beads.is_empty() {
                return Ok(ChainVerdict::Clean);
            }
            warn!(beads = beads.len(), "chain verified but nothing anchored yet");
            return Ok(ChainVerdict::Unanchored);
        }
        Ok(ChainVerdict::Clean)
    }

    // -------------------------------------------------------------------------
    // Query surface
    // -------------------------------------------------------------------------

    pub fn by_type(&self, bead_type: BeadType, limit: u32) -> Result<Vec<Bead>, BeadError> {
        self.query_beads(
            "bead_type = ?1",
            params![bead_type.to_string(), limit],
        )
    }

    pub fn by_mint(&self, mint: &str, limit: u32) -> Result<Vec<Bead>, BeadError> {
        self.query_beads("token_mint = ?1", params![mint, limit])
    }

    pub fn by_temporal_class(
        &self,
        class: TemporalClass,
        limit: u32,
    ) -> Result<Vec<Bead>, BeadError> {
        self.query_beads("temporal_class = ?1", params![class.to_string(), limit])
    }

    pub fn by_status(&self, status: BeadStatus, limit: u32) -> Result<Vec<Bead>, BeadError> {
        self.query_beads("status = ?1", params![status.to_string(), limit])
    }

    /// Tag match against the JSON-encoded tags column.
    pub fn by_tag(&self, tag: &str, limit: u32) -> Result<Vec<Bead>, BeadError> {
        let needle = format!("%{}%", serde_json::to_string(tag).unwrap_or_default());
        self.query_beads("tags LIKE ?1", params![needle, limit])
    }

    /// Beads whose world-time validity intersects `[from, to]`.
    pub fn world_time_range(&self, from: i64, to: i64, limit: u32) -> Result<Vec<Bead>, BeadError> {
        self.query_beads(
            "world_time_valid_from IS NOT NULL AND world_time_valid_to IS NOT NULL
             AND world_time_valid_from <= ?2 AND world_time_valid_to >= ?1",
            params![from, to, limit],
        )
    }

    /// What was known at time `t` (knowledge-time cut).
    pub fn knowledge_time_at(&self, t: i64, limit: u32) -> Result<Vec<Bead>, BeadError> {
        self.query_beads("knowledge_time_recorded_at <= ?1", params![t, limit])
    }

    /// Every PROPOSAL_REJECTED, optionally filtered by category and a
    /// knowledge-time floor.  Fuel for skill distillation.
    pub fn shadow_field(
        &self,
        category: Option<RejectionCategory>,
        since: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Bead>, BeadError> {
        let rejected = self.query_beads(
            "bead_type = 'PROPOSAL_REJECTED' AND knowledge_time_recorded_at >= ?1",
            params![since.unwrap_or(0), limit],
        )?;
        Ok(rejected
            .into_iter()
            .filter(|bead| match (&category, &bead.content) {
                (None, _) => true,
                (
                    Some(wanted),
                    BeadContent::ProposalRejected {
                        rejection_category, ..
                    },
                ) => rejection_category == wanted,
                _ => false,
            })
            .collect())
    }

    /// Walk parents up to `max_depth` levels.  Breadth-first, deduplicated.
    pub fn ancestors(&self, bead_id: &str, max_depth: u32) -> Result<Vec<Bead>, BeadError> {
        self.walk_lineage(bead_id, max_depth, true)
    }

    /// Walk children up to `max_depth` levels.
    pub fn descendants(&self, bead_id: &str, max_depth: u32) -> Result<Vec<Bead>, BeadError> {
        self.walk_lineage(bead_id, max_depth, false)
    }

    fn walk_lineage(
        &self,
        bead_id: &str,
        max_depth: u32,
        up: bool,
    ) -> Result<Vec<Bead>, BeadError> {
        let mut seen = std::collections::HashSet::new();
        let mut frontier = vec![bead_id.to_string()];
        let mut result = Vec::new();

        for _ in 0..max_depth {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for id in frontier.drain(..) {
                let sql = if up {
                    "SELECT parent_id FROM bead_lineage WHERE bead_id = ?1 ORDER BY position"
                } else {
                    "SELECT bead_id FROM bead_lineage WHERE parent_id = ?1"
                };
                let mut stmt = self.conn.prepare(sql)?;
                let ids: Vec<String> = stmt
                    .query_map(params![id], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                for linked in ids {
                    if seen.insert(linked.clone()) {
                        if let Some(bead) = self.get(&linked)? {
                            result.push(bead);
                        }
                        next.push(linked);
                    }
                }
            }
            frontier = next;
        }
        Ok(result)
    }

    /// Distribution of `knowledge_time − world_time_valid_to` for
    /// OBSERVATION beads, seconds.  How stale is our view of the world?
    pub fn refinery_latency(&self, limit: u32) -> Result<Vec<i64>, BeadError> {
        let mut stmt = self.conn.prepare(
            "SELECT knowledge_time_recorded_at - world_time_valid_to FROM beads
             WHERE temporal_class = 'OBSERVATION' AND world_time_valid_to IS NOT NULL
             ORDER BY rowid_ord DESC LIMIT ?1",
        )?;
        let latencies: Vec<i64> = stmt
            .query_map(params![limit], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(latencies)
    }

    fn query_beads(
        &self,
        where_clause: &str,
        query_params: impl rusqlite::Params,
    ) -> Result<Vec<Bead>, BeadError> {
        // The limit is always the final bound parameter.
        let param_count = where_clause.matches('?').count() + 1;
        let sql = format!(
            "SELECT {BEAD_COLUMNS} FROM beads WHERE {where_clause}
             ORDER BY rowid_ord DESC LIMIT ?{param_count}"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let beads = stmt
            .query_map(query_params, row_to_bead)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(beads)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const BEAD_COLUMNS: &str = "bead_id, bead_type, temporal_class, world_time_valid_from,
    world_time_valid_to, knowledge_time_recorded_at, source_type, source_id,
    source_version, tags, lineage, content, hash_self, hash_prev,
    merkle_batch_id, air_node_id, code_hash, model_hash, ecdsa_sig, pqc_sig, status";

fn insert_bead(tx: &rusqlite::Transaction<'_>, bead: &Bead) -> Result<(), BeadError> {
    let attestation = bead
        .attestation
        .as_ref()
        .ok_or_else(|| BeadError::Attestation("insert of unsigned bead".to_string()))?;
    tx.execute(
        "INSERT INTO beads (
            bead_id, bead_type, temporal_class, world_time_valid_from,
            world_time_valid_to, knowledge_time_recorded_at, source_type,
            source_id, source_version, token_mint, tags, lineage, content,
            hash_self, hash_prev, merkle_batch_id, air_node_id, code_hash,
            model_hash, ecdsa_sig, pqc_sig, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                 ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
        params![
            bead.bead_id,
            bead.bead_type.to_string(),
            bead.temporal_class.to_string(),
            bead.world_time_valid_from,
            bead.world_time_valid_to,
            bead.knowledge_time_recorded_at,
            bead.source_ref.source_type,
            bead.source_ref.source_id,
            bead.source_ref.source_version,
            bead.content.token_mint(),
            serde_json::to_string(&bead.tags)?,
            serde_json::to_string(&bead.lineage)?,
            serde_json::to_string(&bead.content)?,
            bead.hash_self,
            bead.hash_prev,
            bead.merkle_batch_id,
            attestation.air_node_id,
            attestation.code_hash,
            attestation.model_hash,
            attestation.ecdsa_sig,
            attestation.pqc_sig,
            bead.status.to_string(),
        ],
    )?;
    Ok(())
}

fn row_to_bead(row: &Row<'_>) -> rusqlite::Result<Bead> {
    let parse = |idx: usize, what: &str, raw: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("{what}: {raw}").into(),
        )
    };

    let bead_type_raw: String = row.get(1)?;
    let temporal_raw: String = row.get(2)?;
    let tags_raw: String = row.get(9)?;
    let lineage_raw: String = row.get(10)?;
    let content_raw: String = row.get(11)?;
    let status_raw: String = row.get(20)?;

    Ok(Bead {
        bead_id: row.get(0)?,
        bead_type: BeadType::from_str(&bead_type_raw)
            .map_err(|_| parse(1, "bead_type", bead_type_raw))?,
        temporal_class: TemporalClass::from_str(&temporal_raw)
            .map_err(|_| parse(2, "temporal_class", temporal_raw))?,
        world_time_valid_from: row.get(3)?,
        world_time_valid_to: row.get(4)?,
        knowledge_time_recorded_at: row.get(5)?,
        source_ref: SourceRef {
            source_type: row.get(6)?,
            source_id: row.get(7)?,
            source_version: row.get(8)?,
        },
        tags: serde_json::from_str(&tags_raw).map_err(|_| parse(9, "tags", tags_raw))?,
        lineage: serde_json::from_str(&lineage_raw)
            .map_err(|_| parse(10, "lineage", lineage_raw))?,
        content: serde_json::from_str(&content_raw)
            .map_err(|_| parse(11, "content", content_raw))?,
        hash_self: row.get(12)?,
        hash_prev: row.get(13)?,
        merkle_batch_id: row.get(14)?,
        attestation: Some(Attestation {
            air_node_id: row.get(15)?,
            code_hash: row.get(16)?,
            model_hash: row.get(17)?,
            ecdsa_sig: row.get(18)?,
            pqc_sig: row.get(19)?,
        }),
        status: BeadStatus::from_str(&status_raw)
            .map_err(|_| parse(20, "status", status_raw))?,
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlayType, Recommendation};

    fn chain() -> BeadChain {
        BeadChain::open_in_memory(NodeIdentity::ephemeral("test-node")).unwrap()
    }

    fn fact_draft(source: &str) -> BeadDraft {
        BeadDraft {
            temporal_class: TemporalClass::Observation,
            world_time_valid_from: Some(1_700_000_000),
            world_time_valid_to: Some(1_700_000_060),
            knowledge_time_recorded_at: None,
            source_ref: SourceRef::provider(source),
            lineage: Vec::new(),
            tags: vec![source.to_string()],
            content: BeadContent::Fact {
                source: source.to_string(),
                summary: format!("{source} summary"),
                metrics: serde_json::Value::Null,
            },
        }
    }

    fn signal_draft(parent: &str, mint: &str) -> BeadDraft {
        BeadDraft {
            temporal_class: TemporalClass::Derived,
            world_time_valid_from: None,
            world_time_valid_to: None,
            knowledge_time_recorded_at: None,
            source_ref: SourceRef::internal("scorer"),
            lineage: vec![parent.to_string()],
            tags: vec!["signal".to_string()],
            content: BeadContent::Signal {
                token_mint: mint.to_string(),
                token_symbol: "TST".to_string(),
                play_type: PlayType::Graduation,
                ordering_score: 62,
                permission_score: 55,
                recommendation: Recommendation::AutoExecute,
            },
        }
    }

    #[test]
    fn append_links_per_type_stream() {
        let mut chain = chain();
        let a = chain.append(fact_draft("whale"), 1_700_000_100).unwrap();
        let b = chain.append(fact_draft("volume"), 1_700_000_101).unwrap();
        let s = chain
            .append(signal_draft(&a.bead_id, "Mint1"), 1_700_000_102)
            .unwrap();

        assert!(a.hash_prev.is_none());
        // Same stream (FACT): b links to a.
        assert_eq!(b.hash_prev, a.hash_self);
        // Different stream (SIGNAL): genesis of its own stream.
        assert!(s.hash_prev.is_none());
    }

    #[test]
    fn stored_hash_recomputes_identically() {
        let mut chain = chain();
        let a = chain.append(fact_draft("whale"), 1_700_000_100).unwrap();
        let loaded = chain.get(&a.bead_id).unwrap().unwrap();
        assert_eq!(loaded.compute_hash().unwrap(), loaded.hash_self.unwrap());
    }

    #[test]
    fn lineage_edges_round_trip() {
        let mut chain = chain();
        let fact = chain.append(fact_draft("whale"), 1_700_000_100).unwrap();
        let signal = chain
            .append(signal_draft(&fact.bead_id, "Mint1"), 1_700_000_101)
            .unwrap();

        let parents = chain.ancestors(&signal.bead_id, 4).unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].bead_id, fact.bead_id);

        let children = chain.descendants(&fact.bead_id, 4).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].bead_id, signal.bead_id);
    }

    #[test]
    fn decision_boundary_trigger_and_seal() {
        let mut chain = chain();
        let fact = chain.append(fact_draft("whale"), 1_700_000_100).unwrap();
        assert!(chain.check_anchor_trigger(1_700_000_200).unwrap().is_none());

        let signal = chain
            .append(signal_draft(&fact.bead_id, "Mint1"), 1_700_000_101)
            .unwrap();
        assert_eq!(
            chain.check_anchor_trigger(1_700_000_200).unwrap(),
            Some(MerkleTrigger::DecisionBoundary)
        );

        let batch = chain
            .seal_batch(MerkleTrigger::DecisionBoundary, Some(&signal.bead_id), 1_700_000_201)
            .unwrap()
            .unwrap();
        assert_eq!(batch.bead_count, 2);
        assert!(batch.anchor_tx.is_none());

        // Everything is anchored now.
        assert!(chain.check_anchor_trigger(1_700_000_300).unwrap().is_none());
        let stored = chain.get(&signal.bead_id).unwrap().unwrap();
        assert_eq!(stored.merkle_batch_id, Some(batch.batch_id.clone()));
        // Backfill must not disturb the hash.
        assert_eq!(stored.compute_hash().unwrap(), stored.hash_self.unwrap());
    }

    #[test]
    fn max_time_trigger_fires_without_decisions() {
        let mut chain = chain();
        let fact = chain.append(fact_draft("whale"), 1_700_000_000).unwrap();
        let signal = chain
            .append(signal_draft(&fact.bead_id, "Mint1"), 1_700_000_001)
            .unwrap();
        chain
            .seal_batch(MerkleTrigger::DecisionBoundary, Some(&signal.bead_id), 1_700_000_002)
            .unwrap();

        // A lone FACT one hour later trips the time trigger.
        chain.append(fact_draft("price"), 1_700_004_000).unwrap();
        assert_eq!(
            chain.check_anchor_trigger(1_700_004_000).unwrap(),
            Some(MerkleTrigger::MaxTime)
        );
    }

    #[test]
    fn verify_chain_clean_and_unanchored() {
        let mut chain = chain();
        assert_eq!(chain.verify_chain().unwrap(), ChainVerdict::Clean);

        let fact = chain.append(fact_draft("whale"), 1_700_000_100).unwrap();
        assert_eq!(chain.verify_chain().unwrap(), ChainVerdict::Unanchored);

        let signal = chain
            .append(signal_draft(&fact.bead_id, "Mint1"), 1_700_000_101)
            .unwrap();
        chain
            .seal_batch(MerkleTrigger::DecisionBoundary, Some(&signal.bead_id), 1_700_000_102)
            .unwrap();
        assert_eq!(chain.verify_chain().unwrap(), ChainVerdict::Clean);
    }

    #[test]
    fn verify_chain_detects_content_tamper() {
        let mut chain = chain();
        let bead = chain.append(fact_draft("whale"), 1_700_000_100).unwrap();

        chain
            .conn
            .execute(
                "UPDATE beads SET content = ?1 WHERE bead_id = ?2",
                params![
                    serde_json::to_string(&BeadContent::Fact {
                        source: "whale".to_string(),
                        summary: "doctored".to_string(),
                        metrics: serde_json::Value::Null,
                    })
                    .unwrap(),
                    bead.bead_id
                ],
            )
            .unwrap();

        match chain.verify_chain().unwrap() {
            ChainVerdict::Tampered(reason) => assert!(reason.contains("hash mismatch")),
            other => panic!("expected TAMPERED, got {other:?}"),
        }
    }

    #[test]
    fn query_surface_filters() {
        let mut chain = chain();
        let fact = chain.append(fact_draft("whale"), 1_700_000_100).unwrap();
        chain
            .append(signal_draft(&fact.bead_id, "MintA"), 1_700_000_101)
            .unwrap();
        chain
            .append(signal_draft(&fact.bead_id, "MintB"), 1_700_000_102)
            .unwrap();

        assert_eq!(chain.by_type(BeadType::Signal, 10).unwrap().len(), 2);
        assert_eq!(chain.by_mint("MintA", 10).unwrap().len(), 1);
        assert_eq!(
            chain.by_temporal_class(TemporalClass::Observation, 10).unwrap().len(),
            1
        );
        assert_eq!(chain.by_tag("whale", 10).unwrap().len(), 1);
        assert_eq!(chain.by_status(BeadStatus::Active, 10).unwrap().len(), 3);
        assert_eq!(chain.knowledge_time_at(1_700_000_101, 10).unwrap().len(), 2);
    }

    #[test]
    fn shadow_field_filters_by_category() {
        let mut chain = chain();
        let fact = chain.append(fact_draft("whale"), 1_700_000_100).unwrap();

        for (category, policy_ref) in [
            (RejectionCategory::WardenVeto, None),
            (RejectionCategory::RiskBreach, Some("daily_exposure_cap_sol".to_string())),
        ] {
            chain
                .append(
                    BeadDraft {
                        temporal_class: TemporalClass::Derived,
                        world_time_valid_from: None,
                        world_time_valid_to: None,
                        knowledge_time_recorded_at: None,
                        source_ref: SourceRef::internal("decision"),
                        lineage: vec![fact.bead_id.clone()],
                        tags: Vec::new(),
                        content: BeadContent::ProposalRejected {
                            token_mint: "MintA".to_string(),
                            token_symbol: "TST".to_string(),
                            rejection_category: category,
                            rejection_reason: "test".to_string(),
                            rejection_policy_ref: policy_ref,
                            rejection_source: "scoring".to_string(),
                            ordering_score: 50,
                            permission_score: 40,
                        },
                    },
                    1_700_000_150,
                )
                .unwrap();
        }

        assert_eq!(chain.shadow_field(None, None, 10).unwrap().len(), 2);
        assert_eq!(
            chain
                .shadow_field(Some(RejectionCategory::RiskBreach), None, 10)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            chain
                .shadow_field(None, Some(1_700_000_151), 10)
                .unwrap()
                .len(),
            0
        );
    }

    #[test]
    fn refinery_latency_distribution() {
        let mut chain = chain();
        chain.append(fact_draft("whale"), 1_700_000_100).unwrap();
        chain.append(fact_draft("price"), 1_700_000_200).unwrap();

        let latencies = chain.refinery_latency(10).unwrap();
        assert_eq!(latencies.len(), 2);
        // knowledge 1_700_000_200 - world_to 1_700_000_060 = 140
        assert!(latencies.contains(&140));
        assert!(latencies.contains(&40));
    }

    #[test]
    fn world_time_range_intersection() {
        let mut chain = chain();
        chain.append(fact_draft("whale"), 1_700_000_100).unwrap();
        let hits = chain
            .world_time_range(1_700_000_030, 1_700_000_090, 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        let misses = chain
            .world_time_range(1_700_000_061, 1_700_000_090, 10)
            .unwrap();
        assert!(misses.is_empty());
    }
}
