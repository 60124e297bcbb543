use std::path::Path;
use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::TryStreamExt;
use lancedb::Table;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CortexError, Result};
use crate::memory::types::{MemoryKind, MemoryRecord, UserProfile};
use crate::storage::filter::{Liveness, MemoryFilter, id_list_condition, sql_quote};
use crate::storage::{
    DeleteReport, MemoryStore, NEW_USER_BIO, UserDirectory, placeholder_username,
};

const MEMORIES_TABLE: &str = "memories";
const USERS_TABLE: &str = "users";

/// LanceDB-backed memory store and user directory
pub struct LanceStore {
    connection: Connection,
    memories: Table,
    users: Table,
    dimension: usize,
}

impl LanceStore {
    /// Connect to `path`, creating both tables if they don't exist yet.
    ///
    /// An existing memories table must have been created with the same
    /// embedding `dimension`.
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(CortexError::Storage(
                "embedding dimension must be greater than 0".to_string(),
            ));
        }

        let uri = path
            .to_str()
            .ok_or_else(|| CortexError::Storage("Invalid path encoding".to_string()))?;

        let connection = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| CortexError::Storage(format!("Failed to connect to LanceDB: {e}")))?;

        let names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| CortexError::Storage(format!("Failed to list tables: {e}")))?;

        let memories = if names.iter().any(|n| n == MEMORIES_TABLE) {
            let table = open_table(&connection, MEMORIES_TABLE).await?;
            check_dimension(&table, dimension).await?;
            table
        } else {
            info!("Creating {} table ({} dims)", MEMORIES_TABLE, dimension);
            let batch = memories_to_batch(&[], dimension)?;
            create_table(&connection, MEMORIES_TABLE, batch).await?
        };

        let users = if names.iter().any(|n| n == USERS_TABLE) {
            open_table(&connection, USERS_TABLE).await?
        } else {
            info!("Creating {} table", USERS_TABLE);
            create_table(&connection, USERS_TABLE, users_to_batch(&[])?).await?
        };

        Ok(Self {
            connection,
            memories,
            users,
            dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn table_names(&self) -> Result<Vec<String>> {
        self.connection
            .table_names()
            .execute()
            .await
            .map_err(|e| CortexError::Storage(format!("Failed to list tables: {e}")))
    }

    /// Insert a prebuilt record
    pub async fn insert(&self, record: &MemoryRecord) -> Result<()> {
        self.check_vector(record.embedding())?;

        let batch = memories_to_batch(std::slice::from_ref(record), self.dimension)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        self.memories
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| CortexError::Storage(format!("Failed to insert memory: {e}")))?;

        Ok(())
    }

    /// Fetch one record by id, superseded or not
    pub async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        let filter = MemoryFilter::new()
            .with_ids(&[id])
            .with_liveness(Liveness::Any);
        Ok(self.query_records(&filter).await?.into_iter().next())
    }

    async fn query_records(&self, filter: &MemoryFilter) -> Result<Vec<MemoryRecord>> {
        let mut query = self.memories.query();
        if let Some(sql) = filter.to_sql_clause() {
            query = query.only_if(sql);
        }

        let stream = query
            .execute()
            .await
            .map_err(|e| CortexError::Storage(format!("Failed to query memories: {e}")))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| CortexError::Storage(format!("Failed to collect query results: {e}")))?;

        decode_batches(&batches)
    }

    /// `(id, created_at micros)` of matching rows, without content or vectors
    async fn query_ages(&self, filter: &MemoryFilter) -> Result<Vec<(Uuid, i64)>> {
        let mut query = self
            .memories
            .query()
            .select(Select::columns(&["id", "created_at"]));
        if let Some(sql) = filter.to_sql_clause() {
            query = query.only_if(sql);
        }

        let batches: Vec<RecordBatch> = query
            .execute()
            .await
            .map_err(|e| CortexError::Storage(format!("Failed to query memories: {e}")))?
            .try_collect()
            .await
            .map_err(|e| CortexError::Storage(format!("Failed to collect query results: {e}")))?;

        decode_ages(&batches)
    }

    async fn count(&self, filter: &MemoryFilter) -> Result<usize> {
        self.memories
            .count_rows(filter.to_sql_clause())
            .await
            .map_err(|e| CortexError::Storage(format!("Failed to count memories: {e}")))
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(CortexError::Storage(format!(
                "embedding has {} dimensions, store expects {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    async fn find_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let stream = self
            .users
            .query()
            .only_if(format!("user_id = {}", sql_quote(user_id)))
            .execute()
            .await
            .map_err(|e| CortexError::Storage(format!("Failed to query users: {e}")))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| CortexError::Storage(format!("Failed to collect users: {e}")))?;

        for batch in &batches {
            if batch.num_rows() > 0 {
                return UserColumns::from_batch(batch)?.profile(0).map(Some);
            }
        }
        Ok(None)
    }

    async fn insert_profile(&self, profile: &UserProfile) -> Result<()> {
        let batch = users_to_batch(std::slice::from_ref(profile))?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        self.users
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| CortexError::Storage(format!("Failed to insert user: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for LanceStore {
    async fn save(&self, user_id: &str, text: &str, vector: Vec<f32>) -> Result<Uuid> {
        let record = MemoryRecord::raw(user_id, text, vector);
        self.insert(&record).await?;
        debug!("Saved memory {} for user {}", record.id(), user_id);
        Ok(record.id())
    }

    async fn search(&self, vector: &[f32], user_id: &str, k: usize) -> Result<Vec<MemoryRecord>> {
        self.check_vector(vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut query = self
            .memories
            .query()
            .nearest_to(vector)
            .map_err(|e| CortexError::Storage(format!("Failed to create vector query: {e}")))?
            .limit(k);

        if let Some(sql) = MemoryFilter::for_user(user_id).to_sql_clause() {
            query = query.only_if(sql);
        }

        let stream = query
            .execute()
            .await
            .map_err(|e| CortexError::Storage(format!("Failed to execute search: {e}")))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| CortexError::Storage(format!("Failed to collect search results: {e}")))?;

        decode_batches(&batches)
    }

    async fn get_memory_count(&self, user_id: &str) -> Result<usize> {
        self.count(&MemoryFilter::for_user(user_id).with_kind(MemoryKind::Raw))
            .await
    }

    async fn get_old_memories(
        &self,
        user_id: &str,
        max_age_days: u32,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let mut filter = MemoryFilter::for_user(user_id).with_kind(MemoryKind::Raw);
        if max_age_days > 0 {
            filter = filter.created_before(Utc::now() - Duration::days(i64::from(max_age_days)));
        }

        // Order on the two narrow columns, then load full rows for the
        // chosen ids only; LanceDB has no ORDER BY.
        let mut candidates = self.query_ages(&filter).await?;
        candidates.sort_by_key(|(_, created_at)| *created_at);
        candidates.truncate(limit);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = candidates.iter().map(|(id, _)| *id).collect();
        let mut records = self.query_records(&filter.with_ids(&ids)).await?;
        records.sort_by_key(|r| r.created_at());
        Ok(records)
    }

    async fn save_summary(
        &self,
        summary: &str,
        user_id: &str,
        original_ids: &[Uuid],
        vector: Vec<f32>,
    ) -> Result<Uuid> {
        let record = MemoryRecord::summary(user_id, summary, original_ids.to_vec(), vector);
        self.insert(&record).await?;
        info!(
            "Saved summary {} for user {} replacing {} memories",
            record.id(),
            user_id,
            original_ids.len()
        );
        Ok(record.id())
    }

    async fn mark_superseded(&self, ids: &[Uuid], summary_id: Uuid) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = self
            .memories
            .update()
            .only_if(id_list_condition(ids))
            .column("superseded_by", format!("'{summary_id}'"))
            .execute()
            .await
            .map_err(|e| CortexError::Storage(format!("Failed to mark superseded: {e}")))?;

        Ok(result.rows_updated as usize)
    }

    async fn superseded_ids(&self, user_id: &str) -> Result<Vec<Uuid>> {
        let filter = MemoryFilter::for_user(user_id).with_liveness(Liveness::Superseded);
        Ok(self
            .query_records(&filter)
            .await?
            .into_iter()
            .map(|r| r.id())
            .collect())
    }

    async fn delete_memories(&self, ids: &[Uuid]) -> DeleteReport {
        let mut report = DeleteReport::default();

        for id in ids {
            match self.memories.delete(&format!("id = '{id}'")).await {
                Ok(_) => report.deleted.push(*id),
                Err(e) => {
                    warn!("Failed to delete memory {}: {}", id, e);
                    report.failed.push((*id, e.to_string()));
                }
            }
        }

        report
    }

    async fn count_by_kind(&self, user_id: &str, kind: MemoryKind) -> Result<usize> {
        self.count(&MemoryFilter::for_user(user_id).with_kind(kind))
            .await
    }
}

#[async_trait]
impl UserDirectory for LanceStore {
    async fn get_user_bio(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self
            .find_profile(user_id)
            .await?
            .map(|p| p.bio)
            .filter(|bio| !bio.trim().is_empty()))
    }

    async fn ensure_user(&self, user_id: &str) -> Result<bool> {
        if self.find_profile(user_id).await?.is_some() {
            return Ok(false);
        }

        let profile = UserProfile::new(user_id, placeholder_username(user_id), NEW_USER_BIO);
        self.insert_profile(&profile).await?;
        info!("Created placeholder profile for user {}", user_id);
        Ok(true)
    }

    async fn register_user(&self, profile: &UserProfile) -> Result<()> {
        if self.find_profile(&profile.user_id).await?.is_some() {
            return Err(CortexError::Memory(format!(
                "user {} already exists",
                profile.user_id
            )));
        }
        self.insert_profile(profile).await
    }
}

async fn open_table(connection: &Connection, name: &str) -> Result<Table> {
    connection
        .open_table(name)
        .execute()
        .await
        .map_err(|e| CortexError::Storage(format!("Failed to open {name} table: {e}")))
}

async fn create_table(connection: &Connection, name: &str, batch: RecordBatch) -> Result<Table> {
    let schema = batch.schema();
    let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

    connection
        .create_table(name, Box::new(batches))
        .execute()
        .await
        .map_err(|e| CortexError::Storage(format!("Failed to create {name} table: {e}")))
}

async fn check_dimension(table: &Table, dimension: usize) -> Result<()> {
    let schema = table
        .schema()
        .await
        .map_err(|e| CortexError::Storage(format!("Failed to read schema: {e}")))?;

    let field = schema
        .field_with_name("embedding")
        .map_err(|e| CortexError::Storage(format!("memories table has no embedding: {e}")))?;

    match field.data_type() {
        DataType::FixedSizeList(_, size) if *size as usize == dimension => Ok(()),
        DataType::FixedSizeList(_, size) => Err(CortexError::Storage(format!(
            "memories table stores {size}-dimensional embeddings, configured for {dimension}"
        ))),
        other => Err(CortexError::Storage(format!(
            "embedding column has unexpected type {other}"
        ))),
    }
}

fn memories_schema(dimension: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("user_id", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new(
            "embedding",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension as i32,
            ),
            false,
        ),
        Field::new("kind", DataType::Utf8, false),
        Field::new("original_ids", DataType::Utf8, false),
        // Microseconds since epoch, UTC
        Field::new("created_at", DataType::Int64, false),
        Field::new("superseded_by", DataType::Utf8, true),
    ]))
}

fn users_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("user_id", DataType::Utf8, false),
        Field::new("username", DataType::Utf8, false),
        Field::new("bio", DataType::Utf8, true),
        Field::new("created_at", DataType::Int64, false),
    ]))
}

fn memories_to_batch(records: &[MemoryRecord], dimension: usize) -> Result<RecordBatch> {
    let ids: Vec<String> = records.iter().map(|r| r.id().to_string()).collect();
    let user_ids: Vec<&str> = records.iter().map(|r| r.user_id()).collect();
    let contents: Vec<&str> = records.iter().map(|r| r.content()).collect();

    let embeddings: Vec<Option<Vec<Option<f32>>>> = records
        .iter()
        .map(|r| Some(r.embedding().iter().map(|&v| Some(v)).collect()))
        .collect();

    let kinds: Vec<&str> = records.iter().map(|r| r.kind().as_str()).collect();

    let original_ids: Vec<String> = records
        .iter()
        .map(|r| {
            r.original_ids()
                .iter()
                .map(Uuid::to_string)
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect();

    let created_at: Vec<i64> = records
        .iter()
        .map(|r| r.created_at().timestamp_micros())
        .collect();

    let superseded_by: Vec<Option<String>> = records
        .iter()
        .map(|r| r.superseded_by().map(|id| id.to_string()))
        .collect();

    RecordBatch::try_new(
        memories_schema(dimension),
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(user_ids)),
            Arc::new(StringArray::from(contents)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
                embeddings,
                dimension as i32,
            )),
            Arc::new(StringArray::from(kinds)),
            Arc::new(StringArray::from(original_ids)),
            Arc::new(Int64Array::from(created_at)),
            Arc::new(StringArray::from(superseded_by)),
        ],
    )
    .map_err(|e| CortexError::Storage(format!("Failed to create RecordBatch: {e}")))
}

fn users_to_batch(profiles: &[UserProfile]) -> Result<RecordBatch> {
    let user_ids: Vec<&str> = profiles.iter().map(|p| p.user_id.as_str()).collect();
    let usernames: Vec<&str> = profiles.iter().map(|p| p.username.as_str()).collect();
    let bios: Vec<Option<&str>> = profiles.iter().map(|p| Some(p.bio.as_str())).collect();
    let created_at: Vec<i64> = profiles
        .iter()
        .map(|p| p.created_at.timestamp_micros())
        .collect();

    RecordBatch::try_new(
        users_schema(),
        vec![
            Arc::new(StringArray::from(user_ids)),
            Arc::new(StringArray::from(usernames)),
            Arc::new(StringArray::from(bios)),
            Arc::new(Int64Array::from(created_at)),
        ],
    )
    .map_err(|e| CortexError::Storage(format!("Failed to create user RecordBatch: {e}")))
}

fn decode_batches(batches: &[RecordBatch]) -> Result<Vec<MemoryRecord>> {
    let mut records = Vec::new();
    for batch in batches {
        let columns = MemoryColumns::from_batch(batch)?;
        for row in 0..batch.num_rows() {
            records.push(columns.record(row)?);
        }
    }
    Ok(records)
}

fn decode_ages(batches: &[RecordBatch]) -> Result<Vec<(Uuid, i64)>> {
    let mut ages = Vec::new();
    for batch in batches {
        let ids = column::<StringArray>(batch, "id")?;
        let created = column::<Int64Array>(batch, "created_at")?;
        for row in 0..batch.num_rows() {
            ages.push((parse_uuid(required(ids, "id", row)?, "id")?, created.value(row)));
        }
    }
    Ok(ages)
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| CortexError::Storage(format!("missing column: {name}")))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| CortexError::Storage(format!("column {name} has unexpected type")))
}

fn required<'a>(array: &'a StringArray, name: &str, row: usize) -> Result<&'a str> {
    if array.is_null(row) {
        return Err(CortexError::Storage(format!("null {name} at row {row}")));
    }
    Ok(array.value(row))
}

fn parse_uuid(value: &str, name: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| CortexError::Storage(format!("invalid {name} {value:?}: {e}")))
}

fn parse_micros(value: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_micros(value)
        .single()
        .ok_or_else(|| CortexError::Storage(format!("invalid timestamp: {value}")))
}

/// Typed view over one memories batch; column lookups happen once per batch
struct MemoryColumns<'a> {
    id: &'a StringArray,
    user_id: &'a StringArray,
    content: &'a StringArray,
    embedding: &'a FixedSizeListArray,
    kind: &'a StringArray,
    original_ids: &'a StringArray,
    created_at: &'a Int64Array,
    superseded_by: &'a StringArray,
}

impl<'a> MemoryColumns<'a> {
    fn from_batch(batch: &'a RecordBatch) -> Result<Self> {
        Ok(Self {
            id: column(batch, "id")?,
            user_id: column(batch, "user_id")?,
            content: column(batch, "content")?,
            embedding: column(batch, "embedding")?,
            kind: column(batch, "kind")?,
            original_ids: column(batch, "original_ids")?,
            created_at: column(batch, "created_at")?,
            superseded_by: column(batch, "superseded_by")?,
        })
    }

    fn record(&self, row: usize) -> Result<MemoryRecord> {
        let id = parse_uuid(required(self.id, "id", row)?, "id")?;
        let kind: MemoryKind = required(self.kind, "kind", row)?
            .parse()
            .map_err(|e: CortexError| CortexError::Storage(e.to_string()))?;

        let embedding_list = self.embedding.value(row);
        let embedding = embedding_list
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| CortexError::Storage("embedding values are not f32".to_string()))?
            .values()
            .to_vec();

        let original_ids = required(self.original_ids, "original_ids", row)?
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| parse_uuid(s, "original id"))
            .collect::<Result<Vec<_>>>()?;

        if self.created_at.is_null(row) {
            return Err(CortexError::Storage(format!("null created_at at row {row}")));
        }
        let created_at = parse_micros(self.created_at.value(row))?;

        let superseded_by = if self.superseded_by.is_null(row) {
            None
        } else {
            Some(parse_uuid(self.superseded_by.value(row), "superseded_by")?)
        };

        MemoryRecord::restore(
            id,
            required(self.user_id, "user_id", row)?.to_string(),
            required(self.content, "content", row)?.to_string(),
            created_at,
            kind,
            original_ids,
            embedding,
            superseded_by,
        )
    }
}

struct UserColumns<'a> {
    user_id: &'a StringArray,
    username: &'a StringArray,
    bio: &'a StringArray,
    created_at: &'a Int64Array,
}

impl<'a> UserColumns<'a> {
    fn from_batch(batch: &'a RecordBatch) -> Result<Self> {
        Ok(Self {
            user_id: column(batch, "user_id")?,
            username: column(batch, "username")?,
            bio: column(batch, "bio")?,
            created_at: column(batch, "created_at")?,
        })
    }

    fn profile(&self, row: usize) -> Result<UserProfile> {
        Ok(UserProfile {
            user_id: required(self.user_id, "user_id", row)?.to_string(),
            username: required(self.username, "username", row)?.to_string(),
            bio: if self.bio.is_null(row) {
                String::new()
            } else {
                self.bio.value(row).to_string()
            },
            created_at: parse_micros(self.created_at.value(row))?,
        })
    }
}
