use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::market_info::{
    normalize_tag, Analysis, ContentFormat, Importance, InfoFilter, InfoStatus, MarketInformation,
    ProcessingState, Sentiment, SourceRef, SourceType,
};

use super::database::{is_unique_violation, parse_uuid, Database};

const INFO_COLUMNS: &str = "m.id, m.source_type, m.source_name, m.source_url, m.title, m.content,
    m.content_format, m.fingerprint, m.tags, m.status, m.summary, m.sentiment, m.sentiment_score,
    m.importance, m.market_impact, m.processed_at, m.failure_reason, m.attempt_of,
    m.created_at, m.updated_at";

/// Column values as stored; converted to a [`MarketInformation`] outside the row callback.
struct InfoRow {
    id: String,
    source_type: String,
    source_name: String,
    source_url: Option<String>,
    title: String,
    content: String,
    content_format: String,
    fingerprint: String,
    tags: String,
    status: String,
    summary: Option<String>,
    sentiment: Option<String>,
    sentiment_score: Option<f64>,
    importance: Option<String>,
    market_impact: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    attempt_of: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InfoRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_type: row.get(1)?,
            source_name: row.get(2)?,
            source_url: row.get(3)?,
            title: row.get(4)?,
            content: row.get(5)?,
            content_format: row.get(6)?,
            fingerprint: row.get(7)?,
            tags: row.get(8)?,
            status: row.get(9)?,
            summary: row.get(10)?,
            sentiment: row.get(11)?,
            sentiment_score: row.get(12)?,
            importance: row.get(13)?,
            market_impact: row.get(14)?,
            processed_at: row.get(15)?,
            failure_reason: row.get(16)?,
            attempt_of: row.get(17)?,
            created_at: row.get(18)?,
            updated_at: row.get(19)?,
        })
    }

    fn into_model(self, linked_assets: Vec<i64>) -> Result<MarketInformation, CoreError> {
        let state = match InfoStatus::parse(&self.status)? {
            InfoStatus::Pending => ProcessingState::Pending,
            InfoStatus::Failed => ProcessingState::Failed {
                reason: self.failure_reason.unwrap_or_default(),
            },
            InfoStatus::Processed => {
                let missing = || CoreError::Deserialization(format!("Record {} is PROCESSED but incomplete", self.id));
                ProcessingState::Processed(Analysis {
                    summary: self.summary.clone().ok_or_else(missing)?,
                    sentiment: Sentiment::parse(self.sentiment.as_deref().ok_or_else(missing)?)
                        .map_err(|e| CoreError::Deserialization(e.to_string()))?,
                    sentiment_score: self.sentiment_score.ok_or_else(missing)?,
                    importance: Importance::parse(self.importance.as_deref().ok_or_else(missing)?)
                        .map_err(|e| CoreError::Deserialization(e.to_string()))?,
                    market_impact: self.market_impact.clone().ok_or_else(missing)?,
                    processed_at: self.processed_at.ok_or_else(missing)?,
                })
            }
        };

        Ok(MarketInformation {
            id: parse_uuid(&self.id)?,
            source: SourceRef {
                source_type: SourceType::parse(&self.source_type)?,
                name: self.source_name,
                url: self.source_url,
            },
            title: self.title,
            content: self.content,
            content_format: ContentFormat::parse(&self.content_format)?,
            fingerprint: self.fingerprint,
            tags: serde_json::from_str(&self.tags)?,
            linked_assets,
            state,
            attempt_of: self.attempt_of.as_deref().map(parse_uuid).transpose()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn linked_assets_in(conn: &Connection, id: &str) -> Result<Vec<i64>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT asset_id FROM market_information_assets WHERE info_id = ?1 ORDER BY asset_id",
    )?;
    let ids = stmt
        .query_map([id], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

fn load_in(conn: &Connection, where_clause: &str, args: &[String]) -> Result<Vec<MarketInformation>, CoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INFO_COLUMNS} FROM market_information m {where_clause}"
    ))?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), InfoRow::read)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|row| {
            let links = linked_assets_in(conn, &row.id)?;
            row.into_model(links)
        })
        .collect()
}

/// Ingested content items with their processing state and asset links.
///
/// State transitions are conditional on `status = 'PENDING'`, so each record
/// leaves PENDING exactly once even under concurrent writers.
#[derive(Debug, Clone)]
pub struct MarketInfoRepository {
    db: Arc<Database>,
}

impl MarketInfoRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new record with its links.
    ///
    /// Returns `false` (and writes nothing) when a non-FAILED record with the
    /// same source key and fingerprint already exists.
    pub fn insert(&self, info: &MarketInformation) -> Result<bool, CoreError> {
        let tags = serde_json::to_string(&info.tags)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        let analysis = info.state.analysis();
        let failure_reason = match &info.state {
            ProcessingState::Failed { reason } => Some(reason.as_str()),
            _ => None,
        };

        self.db.with_transaction(|tx| {
            let inserted = tx.execute(
                "INSERT INTO market_information
                    (id, source_type, source_name, source_url, source_key, title, content,
                     content_format, fingerprint, tags, status, summary, sentiment, sentiment_score,
                     importance, market_impact, processed_at, failure_reason, attempt_of,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18, ?19, ?20, ?21)",
                params![
                    info.id.to_string(),
                    info.source.source_type.as_str(),
                    info.source.name,
                    info.source.url,
                    info.source.dedup_key(),
                    info.title,
                    info.content,
                    info.content_format.as_str(),
                    info.fingerprint,
                    tags,
                    info.status().as_str(),
                    analysis.map(|a| a.summary.as_str()),
                    analysis.map(|a| a.sentiment.as_str()),
                    analysis.map(|a| a.sentiment_score),
                    analysis.map(|a| a.importance.as_str()),
                    analysis.map(|a| a.market_impact.as_str()),
                    analysis.map(|a| a.processed_at),
                    failure_reason,
                    info.attempt_of.map(|id| id.to_string()),
                    info.created_at,
                    info.updated_at
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    debug!(id = %info.id, "Insert hit dedup index");
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
            for asset_id in &info.linked_assets {
                tx.execute(
                    "INSERT OR IGNORE INTO market_information_assets (info_id, asset_id) VALUES (?1, ?2)",
                    params![info.id.to_string(), asset_id],
                )?;
            }
            Ok(true)
        })
    }

    pub fn get(&self, id: Uuid) -> Result<Option<MarketInformation>, CoreError> {
        self.db.with_conn(|conn| {
            let mut found = load_in(conn, "WHERE m.id = ?1", &[id.to_string()])?;
            Ok(found.pop())
        })
    }

    /// The live (non-FAILED) record for `(source_key, fingerprint)`, if any.
    pub fn find_duplicate(
        &self,
        source_key: &str,
        fingerprint: &str,
    ) -> Result<Option<MarketInformation>, CoreError> {
        self.db.with_conn(|conn| {
            let mut found = load_in(
                conn,
                "WHERE m.source_key = ?1 AND m.fingerprint = ?2 AND m.status != 'FAILED'",
                &[source_key.to_string(), fingerprint.to_string()],
            )?;
            Ok(found.pop())
        })
    }

    /// Records matching `filter`, newest first.
    pub fn list(&self, filter: &InfoFilter) -> Result<Vec<MarketInformation>, CoreError> {
        let mut clauses = Vec::new();
        let mut args = Vec::new();
        if let Some(tag) = &filter.tag {
            args.push(normalize_tag(tag));
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM json_each(m.tags) t WHERE t.value = ?{})",
                args.len()
            ));
        }
        if let Some(status) = filter.status {
            args.push(status.as_str().to_string());
            clauses.push(format!("m.status = ?{}", args.len()));
        }
        if let Some(symbol) = &filter.symbol {
            args.push(symbol.trim().to_uppercase());
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM market_information_assets l JOIN assets a ON a.id = l.asset_id
                         WHERE l.info_id = m.id AND a.symbol = ?{})",
                args.len()
            ));
        }

        let mut sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        sql.push_str(" ORDER BY m.created_at DESC, m.rowid DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        self.db.with_conn(|conn| load_in(conn, &sql, &args))
    }

    /// Replace the tag list of a record.
    pub fn set_tags(&self, id: Uuid, tags: &[String]) -> Result<(), CoreError> {
        let json = serde_json::to_string(tags).map_err(|e| CoreError::Serialization(e.to_string()))?;
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE market_information SET tags = ?1, updated_at = ?2 WHERE id = ?3",
                params![json, Utc::now(), id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Add asset links; existing links are kept. Returns the number of new links.
    pub fn link_assets(&self, id: Uuid, asset_ids: &[i64]) -> Result<usize, CoreError> {
        self.db.with_transaction(|tx| {
            let mut added = 0;
            for asset_id in asset_ids {
                added += tx.execute(
                    "INSERT OR IGNORE INTO market_information_assets (info_id, asset_id) VALUES (?1, ?2)",
                    params![id.to_string(), asset_id],
                )?;
            }
            Ok(added)
        })
    }

    /// PENDING → PROCESSED. Returns `false` if the record was not PENDING.
    pub fn mark_processed(&self, id: Uuid, analysis: &Analysis) -> Result<bool, CoreError> {
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE market_information SET
                    status = 'PROCESSED', summary = ?1, sentiment = ?2, sentiment_score = ?3,
                    importance = ?4, market_impact = ?5, processed_at = ?6, updated_at = ?6
                 WHERE id = ?7 AND status = 'PENDING'",
                params![
                    analysis.summary,
                    analysis.sentiment.as_str(),
                    analysis.sentiment_score,
                    analysis.importance.as_str(),
                    analysis.market_impact,
                    analysis.processed_at,
                    id.to_string()
                ],
            )?;
            Ok(updated == 1)
        })
    }

    /// PENDING → FAILED. Returns `false` if the record was not PENDING.
    pub fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool, CoreError> {
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE market_information SET status = 'FAILED', failure_reason = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'PENDING'",
                params![reason, Utc::now(), id.to_string()],
            )?;
            Ok(updated == 1)
        })
    }

    /// Ids of PENDING records, oldest first.
    pub fn pending_ids(&self, limit: usize) -> Result<Vec<Uuid>, CoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM market_information WHERE status = 'PENDING'
                 ORDER BY created_at, rowid LIMIT ?1",
            )?;
            let raw = stmt
                .query_map([limit as i64], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            raw.iter().map(|id| parse_uuid(id)).collect()
        })
    }

    pub fn delete(&self, id: Uuid) -> Result<bool, CoreError> {
        self.db.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM market_information WHERE id = ?1", [id.to_string()])?;
            Ok(deleted == 1)
        })
    }

    /// Delete every record carrying `tag`; returns how many were removed.
    pub fn delete_by_tag(&self, tag: &str) -> Result<usize, CoreError> {
        let tag = normalize_tag(tag);
        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM market_information
                 WHERE EXISTS (SELECT 1 FROM json_each(market_information.tags) t WHERE t.value = ?1)",
                [&tag],
            )?;
            info!(tag = %tag, deleted, "Deleted market information by tag");
            Ok(deleted)
        })
    }

    /// `(count, mean sentiment score)` over PROCESSED records linked to `asset_id`.
    pub fn sentiment_stats(&self, asset_id: i64) -> Result<(usize, Option<f64>), CoreError> {
        self.db.with_conn(|conn| {
            let (count, mean): (i64, Option<f64>) = conn.query_row(
                "SELECT COUNT(*), AVG(m.sentiment_score)
                 FROM market_information m
                 JOIN market_information_assets l ON l.info_id = m.id
                 WHERE l.asset_id = ?1 AND m.status = 'PROCESSED'",
                [asset_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok((count as usize, mean))
        })
    }

    pub fn status_of(&self, id: Uuid) -> Result<Option<InfoStatus>, CoreError> {
        self.db.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT status FROM market_information WHERE id = ?1",
                    [id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            raw.as_deref().map(InfoStatus::parse).transpose()
        })
    }
}
