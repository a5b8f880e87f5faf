//! Secondary index maintenance and lookups.
//!
//! Index rows are derived from the object row and written only after the
//! row itself. Families (equality, geo, time, text) live in disjoint tables
//! and are maintained concurrently.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde_json::Value;
use uuid::Uuid;

use trellis_core::error::{ErrorContext, Result, TrellisError};
use trellis_core::fieldtype::date_millis;
use trellis_core::registry::{ObjectTypeConfig, TextIndex, TimeField};
use trellis_core::types::{Data, GeoPoint, ObjectRow, TypeCode};
use trellis_core::viewer::Viewer;

use crate::client::{column, placeholders, Statement};
use crate::store::GraphStore;

const EARTH_RADIUS_M: f64 = 6_371_008.8;
const METERS_PER_DEGREE: f64 = 111_320.0;

// ── Value helpers ─────────────────────────────────────────────────

/// Index key for one `(type, field, value)` triple.
pub(crate) fn index_key(object_type: TypeCode, field: &str, value: &str) -> Vec<u8> {
    blake3::hash(format!("{object_type}:{field}:{value}").as_bytes())
        .as_bytes()
        .to_vec()
}

/// Text form of a scalar or composite value; `None` for null and empty strings.
pub(crate) fn stringify(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Indexed values of one field: each element of an array (or each value of a
/// map), otherwise the value itself.
pub(crate) fn index_values(value: Option<&Value>) -> BTreeSet<String> {
    match value {
        None => BTreeSet::new(),
        Some(Value::Array(items)) => items.iter().filter_map(stringify).collect(),
        Some(Value::Object(entries)) => entries.values().filter_map(stringify).collect(),
        Some(scalar) => stringify(scalar).into_iter().collect(),
    }
}

/// Great-circle distance in meters.
pub(crate) fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlng = (b.lng - a.lng).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

fn search_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Relevance of `document` for the query words: one point per word that
/// prefixes a document word, plus a bonus when the whole phrase occurs.
pub(crate) fn text_score(document: &str, words: &[String], phrase: &str) -> f64 {
    let doc_words = search_words(document);
    let matched = words
        .iter()
        .filter(|w| doc_words.iter().any(|d| d.starts_with(w.as_str())))
        .count();
    if matched == 0 {
        return 0.0;
    }
    let mut score = matched as f64;
    if words.len() > 1 && document.to_lowercase().contains(&phrase.to_lowercase()) {
        score += words.len() as f64;
    }
    score
}

fn like_pattern(word: &str) -> String {
    let escaped = word
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Concatenated text of `index.fields`.
pub(crate) fn text_document(index: &TextIndex, data: &Data) -> String {
    index
        .fields
        .iter()
        .filter_map(|f| data.get(f).and_then(stringify))
        .collect::<Vec<_>>()
        .join(" ")
}

fn time_value(field: &TimeField, row: &ObjectRow) -> Option<i64> {
    match field {
        TimeField::Data(name) => row.data.get(name).and_then(date_millis),
        TimeField::Created => Some(row.time_created.timestamp_millis()),
        TimeField::Updated => Some(row.time_updated.timestamp_millis()),
    }
}

fn ids(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Uuid>> {
    rows.iter().map(|row| column(row, "id")).collect()
}

impl GraphStore {
    // ── Equality / unique ────────────────────────────────────────

    /// Ids indexed under `(object_type, field, value)`. Array values match any element.
    pub async fn lookup_index(
        &self,
        object_type: TypeCode,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Uuid>> {
        let mut found = Vec::new();
        for text in index_values(Some(value)) {
            let stmt = Statement::new("SELECT value AS id FROM indices WHERE key = ?")
                .bind(index_key(object_type, field, &text));
            for id in ids(&self.client().query_rows(&stmt).await?)? {
                if !found.contains(&id) {
                    found.push(id);
                }
            }
        }
        Ok(found)
    }

    async fn insert_index(
        &self,
        id: Uuid,
        object_type: TypeCode,
        field: &str,
        values: &BTreeSet<String>,
    ) -> Result<()> {
        for text in values {
            let stmt = Statement::new("INSERT OR IGNORE INTO indices (key, value) VALUES (?, ?)")
                .bind(index_key(object_type, field, text))
                .bind(id);
            if self.client().run(&stmt).await? == 0 {
                tracing::warn!(object_id = %id, object_type, field, "Index row already present, skipped");
            }
        }
        Ok(())
    }

    async fn delete_index(
        &self,
        id: Uuid,
        object_type: TypeCode,
        field: &str,
        values: &BTreeSet<String>,
    ) -> Result<()> {
        for text in values {
            let stmt = Statement::new("DELETE FROM indices WHERE key = ? AND value = ?")
                .bind(index_key(object_type, field, text))
                .bind(id);
            self.client().run(&stmt).await?;
        }
        Ok(())
    }

    /// Fail with a conflict if another live object already owns any value of
    /// `value` on the unique `field`. Index rows whose owner is gone are
    /// removed on the way.
    pub(crate) async fn check_unique(
        &self,
        object_type: TypeCode,
        field: &str,
        value: &Value,
        owner: Uuid,
    ) -> Result<()> {
        let reader = Viewer::read_all();
        for text in index_values(Some(value)) {
            let key = index_key(object_type, field, &text);
            let stmt = Statement::new("SELECT value AS id FROM indices WHERE key = ?").bind(key.clone());
            for existing in ids(&self.client().query_rows(&stmt).await?)? {
                if existing == owner {
                    continue;
                }
                if self.get_object(&reader, existing).await?.is_some() {
                    return Err(TrellisError::conflict(
                        "Duplicate index entry attempted",
                        ErrorContext::new()
                            .with("id", owner.to_string())
                            .with("type", object_type)
                            .with("field", field)
                            .with("value", text.clone()),
                    ));
                }
                tracing::warn!(object_id = %existing, field, "Removing orphaned index row");
                let orphan = Statement::new("DELETE FROM indices WHERE key = ? AND value = ?")
                    .bind(key.clone())
                    .bind(existing);
                self.client().run(&orphan).await?;
            }
        }
        Ok(())
    }

    // ── Geo ──────────────────────────────────────────────────────

    /// Ids of objects of `types` within `distance_m` meters of `point`, nearest first.
    pub async fn lookup_geo_index(
        &self,
        point: GeoPoint,
        types: &[TypeCode],
        distance_m: f64,
    ) -> Result<Vec<Uuid>> {
        if types.is_empty() || !distance_m.is_finite() || distance_m < 0.0 {
            return Ok(Vec::new());
        }
        let dlat = distance_m / METERS_PER_DEGREE;
        let dlng = dlat / point.lat.to_radians().cos().abs().max(1e-6);

        let mut sql = format!(
            "SELECT id, lat, lng FROM geoindices WHERE type IN ({}) AND lat BETWEEN ? AND ?",
            placeholders(types.len())
        );
        let wraps = point.lng - dlng < -180.0 || point.lng + dlng > 180.0;
        if !wraps {
            sql.push_str(" AND lng BETWEEN ? AND ?");
        }
        let mut stmt = Statement::new(sql)
            .bind_all(types.iter().copied())
            .bind(point.lat - dlat)
            .bind(point.lat + dlat);
        if !wraps {
            stmt = stmt.bind(point.lng - dlng).bind(point.lng + dlng);
        }

        let mut hits = Vec::new();
        for row in self.client().query_rows(&stmt).await? {
            let candidate = GeoPoint::new(column(&row, "lat")?, column(&row, "lng")?);
            let distance = haversine_m(point, candidate);
            if distance <= distance_m {
                hits.push((distance, column::<Uuid>(&row, "id")?));
            }
        }
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(hits.into_iter().map(|(_, id)| id).collect())
    }

    async fn insert_geo_index(&self, id: Uuid, object_type: TypeCode, value: Option<&Value>) -> Result<bool> {
        let Some(point) = value.and_then(GeoPoint::from_value) else {
            return Ok(false);
        };
        let stmt = Statement::new(
            "INSERT OR REPLACE INTO geoindices (id, type, lat, lng) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(object_type)
        .bind(point.lat)
        .bind(point.lng);
        self.client().run(&stmt).await?;
        Ok(true)
    }

    async fn delete_geo_index(&self, id: Uuid) -> Result<()> {
        self.client()
            .run(&Statement::new("DELETE FROM geoindices WHERE id = ?").bind(id))
            .await?;
        Ok(())
    }

    // ── Time ─────────────────────────────────────────────────────

    /// Ids whose `field` falls in `[start, end]`, or equals `start` when `end`
    /// is absent. Row timestamps are addressed as `object.time_created` and
    /// `object.time_updated`.
    pub async fn lookup_time_index(
        &self,
        object_type: TypeCode,
        field: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Uuid>> {
        let stmt = match end {
            Some(end) => Statement::new(
                "SELECT id FROM dateindices
                 WHERE type = ? AND field = ? AND index_time >= ? AND index_time <= ?
                 ORDER BY index_time",
            )
            .bind(object_type)
            .bind(field)
            .bind(start.timestamp_millis())
            .bind(end.timestamp_millis()),
            None => Statement::new(
                "SELECT id FROM dateindices WHERE type = ? AND field = ? AND index_time = ?",
            )
            .bind(object_type)
            .bind(field)
            .bind(start.timestamp_millis()),
        };
        ids(&self.client().query_rows(&stmt).await?)
    }

    async fn upsert_time_index(&self, row: &ObjectRow, field: &TimeField) -> Result<()> {
        let Some(millis) = time_value(field, row) else {
            return self.delete_time_field(row.id, field).await;
        };
        let stmt = Statement::new(
            "INSERT INTO dateindices (id, type, field, index_time) VALUES (?, ?, ?, ?)
             ON CONFLICT (id, field) DO UPDATE SET index_time = excluded.index_time",
        )
        .bind(row.id)
        .bind(row.object_type)
        .bind(field.storage_name())
        .bind(millis);
        self.client().run(&stmt).await?;
        Ok(())
    }

    async fn delete_time_field(&self, id: Uuid, field: &TimeField) -> Result<()> {
        let stmt = Statement::new("DELETE FROM dateindices WHERE id = ? AND field = ?")
            .bind(id)
            .bind(field.storage_name());
        self.client().run(&stmt).await?;
        Ok(())
    }

    // ── Full text ────────────────────────────────────────────────

    /// Ids indexed under `index_type` matching `text`, best match first.
    pub async fn lookup_text_index(&self, index_type: TypeCode, text: &str) -> Result<Vec<Uuid>> {
        let words = search_words(text);
        if words.is_empty() {
            return Ok(Vec::new());
        }
        let clauses = vec!["data LIKE ? ESCAPE '\\'"; words.len()].join(" OR ");
        let stmt = Statement::new(format!(
            "SELECT id, data FROM ftsindices WHERE type = ? AND ({clauses})"
        ))
        .bind(index_type)
        .bind_all(words.iter().map(|w| like_pattern(w)));

        let mut scored = Vec::new();
        for row in self.client().query_rows(&stmt).await? {
            let document: String = column(&row, "data")?;
            let score = text_score(&document, &words, text.trim());
            if score > 0.0 {
                scored.push((score, column::<Uuid>(&row, "id")?));
            }
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored.into_iter().map(|(_, id)| id).collect())
    }

    async fn upsert_text_index(&self, id: Uuid, index: &TextIndex, document: &str) -> Result<()> {
        let stmt = if document.is_empty() {
            Statement::new("DELETE FROM ftsindices WHERE id = ? AND type = ?")
                .bind(id)
                .bind(index.index_type)
        } else {
            Statement::new(
                "INSERT INTO ftsindices (id, type, data) VALUES (?, ?, ?)
                 ON CONFLICT (id, type) DO UPDATE SET data = excluded.data",
            )
            .bind(id)
            .bind(index.index_type)
            .bind(document)
        };
        self.client().run(&stmt).await?;
        Ok(())
    }

    // ── Deferred work ────────────────────────────────────────────

    /// Schedule follow-up work of `defer_type` for `id` at `at`. Existing
    /// schedules are kept.
    pub async fn insert_defer_index(&self, id: Uuid, defer_type: TypeCode, at: DateTime<Utc>) -> Result<()> {
        let stmt = Statement::new(
            "INSERT OR IGNORE INTO deferindices (id, type, defer_time) VALUES (?, ?, ?)",
        )
        .bind(id)
        .bind(defer_type)
        .bind(at.timestamp_millis());
        self.client().run(&stmt).await?;
        Ok(())
    }

    /// Up to `limit` ids of `defer_type` due at or before `due_before`, earliest first.
    pub async fn lookup_defer_index(
        &self,
        defer_type: TypeCode,
        due_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Uuid>> {
        let stmt = Statement::new(
            "SELECT id FROM deferindices WHERE type = ? AND defer_time <= ?
             ORDER BY defer_time LIMIT ?",
        )
        .bind(defer_type)
        .bind(due_before.timestamp_millis())
        .bind(i64::from(limit));
        ids(&self.client().query_rows(&stmt).await?)
    }

    pub async fn delete_defer_index(&self, id: Uuid, defer_type: TypeCode) -> Result<()> {
        let stmt = Statement::new("DELETE FROM deferindices WHERE id = ? AND type = ?")
            .bind(id)
            .bind(defer_type);
        self.client().run(&stmt).await?;
        Ok(())
    }

    // ── Whole-object maintenance ─────────────────────────────────

    /// Write every index row declared for a freshly stored object.
    pub(crate) async fn index_object(&self, config: &ObjectTypeConfig, row: &ObjectRow) -> Result<()> {
        let equality = async {
            for field in config.index.iter().chain(&config.unique_index) {
                let values = index_values(row.data.get(field));
                self.insert_index(row.id, row.object_type, field, &values).await?;
            }
            Ok::<_, TrellisError>(())
        };
        let geo = async {
            if let Some(field) = &config.geo_index {
                self.insert_geo_index(row.id, row.object_type, row.data.get(field))
                    .await?;
            }
            Ok::<_, TrellisError>(())
        };
        let time = try_join_all(
            config
                .time_index
                .iter()
                .map(|field| self.upsert_time_index(row, field)),
        );
        let text = try_join_all(config.text_index.iter().map(|index| {
            let document = text_document(index, &row.data);
            async move { self.upsert_text_index(row.id, index, &document).await }
        }));
        futures::try_join!(equality, geo, time, text)?;
        Ok(())
    }

    /// Bring index rows from `old` to `new`, touching only changed fields.
    /// The last-modified time index is always refreshed.
    pub(crate) async fn reindex_object(
        &self,
        config: &ObjectTypeConfig,
        old: &ObjectRow,
        new: &ObjectRow,
    ) -> Result<()> {
        let equality = async {
            for field in config.index.iter().chain(&config.unique_index) {
                let before = index_values(old.data.get(field));
                let after = index_values(new.data.get(field));
                if before == after {
                    continue;
                }
                let stale = before.difference(&after).cloned().collect();
                let fresh = after.difference(&before).cloned().collect();
                self.delete_index(new.id, new.object_type, field, &stale).await?;
                self.insert_index(new.id, new.object_type, field, &fresh).await?;
            }
            Ok::<_, TrellisError>(())
        };
        let geo = async {
            if let Some(field) = &config.geo_index {
                let before = old.data.get(field).and_then(GeoPoint::from_value);
                let after = new.data.get(field).and_then(GeoPoint::from_value);
                if before != after {
                    self.delete_geo_index(new.id).await?;
                    self.insert_geo_index(new.id, new.object_type, new.data.get(field))
                        .await?;
                }
            }
            Ok::<_, TrellisError>(())
        };
        let time = try_join_all(
            config
                .time_index
                .iter()
                .filter(|field| {
                    matches!(field, TimeField::Updated) || time_value(field, old) != time_value(field, new)
                })
                .map(|field| self.upsert_time_index(new, field)),
        );
        let text = try_join_all(config.text_index.iter().filter_map(|index| {
            let document = text_document(index, &new.data);
            if document == text_document(index, &old.data) {
                return None;
            }
            Some(async move { self.upsert_text_index(new.id, index, &document).await })
        }));
        futures::try_join!(equality, geo, time, text)?;
        Ok(())
    }

    /// Remove every index row that references the object.
    pub(crate) async fn unindex_object(&self, id: Uuid) -> Result<()> {
        let tables = ["geoindices", "dateindices", "ftsindices", "deferindices"];
        let by_id = tables.iter().map(|table| async move {
            let stmt = Statement::new(format!("DELETE FROM {table} WHERE id = ?")).bind(id);
            self.client().run(&stmt).await
        });
        let equality = Statement::new("DELETE FROM indices WHERE value = ?").bind(id);
        futures::try_join!(try_join_all(by_id), self.client().run(&equality))?;
        Ok(())
    }
}
