//! SurrealDB-backed store.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use surrealdb::RecordId;

use crate::store::{Command, Reply, Store, count_reply};
use crate::{Database, DbConfig, DbError, connect, init_schema};

/// How often `blpop` re-checks an empty list.
const BLPOP_POLL: Duration = Duration::from_millis(100);

/// [`Store`] over a SurrealDB connection.
///
/// Each primitive maps onto one table (`kv`, `hash`, `zset`, `list`,
/// `set_member`); records that belong to a composite key get deterministic ids
/// so single-record operations stay atomic.
#[derive(Clone)]
pub struct SurrealStore {
    db: Database,
}

#[derive(Debug, Serialize, Deserialize)]
struct CounterRecord {
    value: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HashRecord {
    #[serde(default)]
    fields: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct KeyedHashRecord {
    key: String,
    #[serde(default)]
    fields: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ZsetRecord {
    key: String,
    member: String,
    score: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ListRecord {
    key: String,
    seq: i64,
    value: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SetRecord {
    key: String,
    member: String,
}

#[derive(Deserialize)]
struct CountRow {
    count: i64,
}

/// Record id for an element of a composite key. The length prefix keeps
/// `("a:", "b")` and `("a", ":b")` apart.
fn element_id(key: &str, element: &str) -> String {
    format!("{}:{}{}", key.len(), key, element)
}

fn list_id(key: &str, seq: i64) -> String {
    element_id(key, &format!("{seq:020}"))
}

fn list_seq_key(key: &str) -> String {
    format!("{key}:list-seq")
}

impl SurrealStore {
    /// Wrap an existing connection. The schema must already be initialized.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Connect, initialize the schema and wrap the connection.
    pub async fn open(config: &DbConfig) -> Result<Self, DbError> {
        let db = connect(config).await?;
        init_schema(&db).await?;
        Ok(Self::new(db))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn count(&self, table: &'static str, key: &str) -> Result<u64, DbError> {
        let mut result = self
            .db
            .query(format!(
                "SELECT count() AS count FROM {table} WHERE key = $key GROUP ALL"
            ))
            .bind(("key", key.to_string()))
            .await?;
        let rows: Vec<CountRow> = result.take(0)?;
        Ok(rows
            .first()
            .map_or(0, |row| u64::try_from(row.count).unwrap_or(0)))
    }

    async fn zset_entries(&self, key: &str, limit: Option<usize>) -> Result<Vec<ZsetRecord>, DbError> {
        let limit_clause = limit.map(|l| format!("LIMIT {l}")).unwrap_or_default();
        let mut result = self
            .db
            .query(format!(
                "SELECT key, member, score FROM zset WHERE key = $key ORDER BY score ASC, member ASC {limit_clause}"
            ))
            .bind(("key", key.to_string()))
            .await?;
        Ok(result.take(0)?)
    }
}

impl Store for SurrealStore {
    async fn get_counter(&self, key: &str) -> Result<Option<i64>, DbError> {
        let record: Option<CounterRecord> = self.db.select(("kv", key)).await?;
        Ok(record.map(|r| r.value))
    }

    async fn set_counter(&self, key: &str, value: i64) -> Result<(), DbError> {
        let _: Option<CounterRecord> = self
            .db
            .upsert(("kv", key))
            .content(CounterRecord { value })
            .await?;
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, DbError> {
        let mut result = self
            .db
            .query("UPSERT type::thing('kv', $key) SET value = (value ?? 0) + $delta RETURN `value`")
            .bind(("key", key.to_string()))
            .bind(("delta", delta))
            .await?;
        let rows: Vec<CounterRecord> = result.take(0)?;
        rows.first()
            .map(|r| r.value)
            .ok_or_else(|| DbError::Query(format!("Failed to increment {key}")))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, DbError> {
        let record: Option<HashRecord> = self.db.select(("hash", key)).await?;
        Ok(record.and_then(|mut r| r.fields.remove(field)))
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<(), DbError> {
        let fields: HashMap<String, String> = fields
            .iter()
            .map(|(field, value)| (field.to_string(), value.clone()))
            .collect();
        self.db
            .query("UPSERT type::thing('hash', $key) MERGE { fields: $fields }")
            .bind(("key", key.to_string()))
            .bind(("fields", fields))
            .await?
            .check()?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<Option<HashMap<String, String>>, DbError> {
        let record: Option<HashRecord> = self.db.select(("hash", key)).await?;
        Ok(record.map(|r| r.fields))
    }

    async fn del(&self, key: &str) -> Result<(), DbError> {
        self.db
            .query(
                r#"
                DELETE type::thing('kv', $key);
                DELETE type::thing('hash', $key);
                DELETE zset WHERE key = $key;
                DELETE list WHERE key = $key;
                DELETE set_member WHERE key = $key;
                "#,
            )
            .bind(("key", key.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<(), DbError> {
        let _: Option<ZsetRecord> = self
            .db
            .upsert(("zset", element_id(key, member)))
            .content(ZsetRecord {
                key: key.to_string(),
                member: member.to_string(),
                score,
            })
            .await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, DbError> {
        let removed: Option<ZsetRecord> = self.db.delete(("zset", element_id(key, member))).await?;
        Ok(removed.is_some())
    }

    async fn zcard(&self, key: &str) -> Result<u64, DbError> {
        self.count("zset", key).await
    }

    async fn zrange(
        &self,
        key: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<String>, DbError> {
        let entries = self.zset_entries(key, None).await?;
        Ok(entries
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .map(|e| e.member)
            .collect())
    }

    async fn zpopmin(&self, key: &str) -> Result<Option<String>, DbError> {
        // The delete is the claim: a concurrent popper that loses it retries.
        loop {
            let Some(head) = self.zset_entries(key, Some(1)).await?.into_iter().next() else {
                return Ok(None);
            };
            let removed: Option<ZsetRecord> = self
                .db
                .delete(("zset", element_id(key, &head.member)))
                .await?;
            if removed.is_some() {
                return Ok(Some(head.member));
            }
        }
    }

    async fn sort_by_field(
        &self,
        key: &str,
        hash_prefix: &str,
        field: &str,
        limit: usize,
    ) -> Result<Vec<(String, Option<String>)>, DbError> {
        let members = self.zset_entries(key, None).await?;
        if members.is_empty() {
            return Ok(Vec::new());
        }

        // Fetch every member's hash in one statement
        let ids: Vec<RecordId> = members
            .iter()
            .map(|entry| RecordId::from(("hash", format!("{hash_prefix}{}", entry.member))))
            .collect();
        let mut result = self
            .db
            .query("SELECT record::id(id) AS key, fields FROM $ids")
            .bind(("ids", ids))
            .await?;
        let hashes: Vec<KeyedHashRecord> = result.take(0)?;
        let mut values: HashMap<String, String> = hashes
            .into_iter()
            .filter_map(|mut h| h.fields.remove(field).map(|value| (h.key, value)))
            .collect();

        let mut rows: Vec<_> = members
            .into_iter()
            .map(|entry| {
                let raw = values.remove(&format!("{hash_prefix}{}", entry.member));
                let weight = raw.as_deref().and_then(|v| v.parse::<i64>().ok());
                (weight, entry.member, raw)
            })
            .collect();
        rows.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        Ok(rows
            .into_iter()
            .take(limit)
            .map(|(_, member, raw)| (member, raw))
            .collect())
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<u64, DbError> {
        if values.is_empty() {
            return self.llen(key).await;
        }
        let count = i64::try_from(values.len()).unwrap_or(i64::MAX);
        let last = self.incr_by(&list_seq_key(key), count).await?;
        let first = last - count + 1;

        for (seq, value) in (first..=last).zip(values) {
            let _: Option<ListRecord> = self
                .db
                .create(("list", list_id(key, seq)))
                .content(ListRecord {
                    key: key.to_string(),
                    seq,
                    value: value.clone(),
                })
                .await?;
        }

        self.llen(key).await
    }

    async fn llen(&self, key: &str) -> Result<u64, DbError> {
        self.count("list", key).await
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, DbError> {
        loop {
            let mut result = self
                .db
                .query("SELECT key, seq, value FROM list WHERE key = $key ORDER BY seq ASC LIMIT 1")
                .bind(("key", key.to_string()))
                .await?;
            let heads: Vec<ListRecord> = result.take(0)?;
            let Some(head) = heads.into_iter().next() else {
                return Ok(None);
            };
            let removed: Option<ListRecord> = self.db.delete(("list", list_id(key, head.seq))).await?;
            if removed.is_some() {
                return Ok(Some(head.value));
            }
        }
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>, DbError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(head) = self.lpop(key).await? {
                return Ok(Some(head));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(BLPOP_POLL.min(deadline - now)).await;
        }
    }

    async fn batch(&self, commands: &[Command]) -> Result<Vec<Reply>, DbError> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        // One transaction so every read sees the same snapshot. BEGIN and
        // COMMIT produce no results, so statement `i` is result `i`.
        let mut sql = String::from("BEGIN TRANSACTION;\n");
        for (i, command) in commands.iter().enumerate() {
            let statement = match command {
                Command::Get(_) => format!("SELECT VALUE value FROM type::thing('kv', $k{i});"),
                Command::LLen(_) => {
                    format!("SELECT count() AS count FROM list WHERE key = $k{i} GROUP ALL;")
                }
                Command::ZCard(_) => {
                    format!("SELECT count() AS count FROM zset WHERE key = $k{i} GROUP ALL;")
                }
            };
            sql.push_str(&statement);
            sql.push('\n');
        }
        sql.push_str("COMMIT TRANSACTION;");

        let mut query = self.db.query(sql);
        for (i, command) in commands.iter().enumerate() {
            let key = match command {
                Command::Get(key) | Command::LLen(key) | Command::ZCard(key) => key.clone(),
            };
            query = query.bind((format!("k{i}"), key));
        }
        let mut response = query.await?.check()?;

        let mut replies = Vec::with_capacity(commands.len());
        for (i, command) in commands.iter().enumerate() {
            let reply = match command {
                Command::Get(_) => {
                    let values: Vec<i64> = response.take(i)?;
                    values.first().copied().map_or(Reply::Nil, Reply::Int)
                }
                Command::LLen(_) | Command::ZCard(_) => {
                    let rows: Vec<CountRow> = response.take(i)?;
                    let count = rows
                        .first()
                        .map_or(0, |row| u64::try_from(row.count).unwrap_or(0));
                    Reply::Int(count_reply(count))
                }
            };
            replies.push(reply);
        }
        Ok(replies)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, DbError> {
        let id = element_id(key, member);
        let existing: Option<SetRecord> = self.db.select(("set_member", id.as_str())).await?;
        if existing.is_some() {
            return Ok(false);
        }
        let _: Option<SetRecord> = self
            .db
            .upsert(("set_member", id.as_str()))
            .content(SetRecord {
                key: key.to_string(),
                member: member.to_string(),
            })
            .await?;
        Ok(true)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, DbError> {
        let mut result = self
            .db
            .query("SELECT key, member FROM set_member WHERE key = $key ORDER BY member ASC")
            .bind(("key", key.to_string()))
            .await?;
        let records: Vec<SetRecord> = result.take(0)?;
        Ok(records.into_iter().map(|r| r.member).collect())
    }
}
