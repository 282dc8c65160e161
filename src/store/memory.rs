//! In-process stores for tests and dry runs
//!
//! Both stores keep exact state. The key/value store answers sketch commands
//! exactly (zero error is within every one-sided bound the sketches promise)
//! and reports sizes derived from the reserved parameters, so runs without
//! live servers still exercise the whole harness. Rejections mirror what the
//! live backends answer for the same misuse.

use crate::store::{KeyValueStore, RowStore};
use crate::{BenchError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;

/// Size of a dense HyperLogLog in Redis
const HLL_DENSE_BYTES: u64 = 12_304;
/// Per-key bookkeeping overhead
const KEY_OVERHEAD_BYTES: u64 = 64;

struct TokenTable {
    rows: Vec<(i64, String)>,
    /// Secondary index: token -> occurrence count
    index: Option<BTreeMap<String, u64>>,
}

impl TokenTable {
    fn frequencies(&self) -> HashMap<&str, u64> {
        match &self.index {
            Some(index) => index.iter().map(|(t, c)| (t.as_str(), *c)).collect(),
            None => {
                let mut counts = HashMap::new();
                for (_, token) in &self.rows {
                    *counts.entry(token.as_str()).or_insert(0) += 1;
                }
                counts
            }
        }
    }
}

/// Row store keeping every table in memory
#[derive(Default)]
pub struct MemoryRowStore {
    tables: Mutex<HashMap<String, TokenTable>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing_relation(table: &str) -> BenchError {
    BenchError::BackendRejected(format!("relation \"{}\" does not exist", table))
}

#[async_trait]
impl RowStore for MemoryRowStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn reset(&self) -> Result<()> {
        self.tables.lock().await.clear();
        Ok(())
    }

    async fn create_token_table(&self, table: &str, indexed: bool) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.contains_key(table) {
            return Err(BenchError::BackendRejected(format!(
                "relation \"{}\" already exists",
                table
            )));
        }

        tables.insert(
            table.to_string(),
            TokenTable {
                rows: Vec::new(),
                index: indexed.then(BTreeMap::new),
            },
        );
        Ok(())
    }

    async fn bulk_load(&self, table: &str, tokens: &[String]) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let target = tables.get_mut(table).ok_or_else(|| missing_relation(table))?;

        let first_id = target.rows.len() as i64;
        target.rows.reserve(tokens.len());
        for (offset, token) in tokens.iter().enumerate() {
            target.rows.push((first_id + offset as i64, token.clone()));
            if let Some(index) = target.index.as_mut() {
                *index.entry(token.clone()).or_insert(0) += 1;
            }
        }

        Ok(tokens.len() as u64)
    }

    async fn count_occurrences(&self, table: &str, token: &str) -> Result<u64> {
        let tables = self.tables.lock().await;
        let target = tables.get(table).ok_or_else(|| missing_relation(table))?;

        Ok(match &target.index {
            Some(index) => index.get(token).copied().unwrap_or(0),
            None => target.rows.iter().filter(|(_, t)| t == token).count() as u64,
        })
    }

    async fn count_distinct(&self, table: &str) -> Result<u64> {
        let tables = self.tables.lock().await;
        let target = tables.get(table).ok_or_else(|| missing_relation(table))?;

        Ok(match &target.index {
            Some(index) => index.len() as u64,
            None => target
                .rows
                .iter()
                .map(|(_, t)| t.as_str())
                .collect::<HashSet<_>>()
                .len() as u64,
        })
    }

    async fn most_frequent(&self, table: &str, limit: usize) -> Result<Vec<String>> {
        let tables = self.tables.lock().await;
        let target = tables.get(table).ok_or_else(|| missing_relation(table))?;

        let mut ranked: Vec<(&str, u64)> = target.frequencies().into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(token, _)| token.to_string())
            .collect())
    }

    async fn relation_size(&self, table: &str) -> Result<u64> {
        let tables = self.tables.lock().await;
        let target = tables.get(table).ok_or_else(|| missing_relation(table))?;

        // Tuple header + id + varlena header + text.
        let heap: u64 = target
            .rows
            .iter()
            .map(|(_, token)| 24 + 8 + 4 + token.len() as u64)
            .sum();
        // B-tree entries: one per row, plus the page overhead of each distinct key.
        let index: u64 = match &target.index {
            Some(index) => {
                let entries: u64 = target
                    .rows
                    .iter()
                    .map(|(_, token)| 16 + token.len() as u64)
                    .sum();
                entries + 8 * index.len() as u64
            }
            None => 0,
        };
        Ok(heap + index)
    }
}

enum Entry {
    SortedSet(HashMap<String, f64>),
    Bloom {
        error_rate: f64,
        capacity: u64,
        items: HashSet<String>,
    },
    CountMin {
        width: u64,
        depth: u64,
        counts: HashMap<String, u64>,
    },
    HyperLogLog(HashSet<String>),
    TopK {
        capacity: usize,
        counts: HashMap<String, u64>,
    },
}

impl Entry {
    fn estimated_bytes(&self) -> u64 {
        KEY_OVERHEAD_BYTES
            + match self {
                Entry::SortedSet(members) => members
                    .keys()
                    .map(|member| member.len() as u64 + 24)
                    .sum(),
                Entry::Bloom {
                    error_rate,
                    capacity,
                    ..
                } => {
                    let ln2 = std::f64::consts::LN_2;
                    let bits = (-(*capacity as f64) * error_rate.ln() / (ln2 * ln2)).ceil();
                    (bits / 8.0).ceil() as u64
                }
                Entry::CountMin { width, depth, .. } => width * depth * 4,
                Entry::HyperLogLog(items) => {
                    let sparse = 16 + 4 * items.len() as u64;
                    sparse.min(HLL_DENSE_BYTES)
                }
                Entry::TopK { capacity, counts } => {
                    let tracked: u64 = counts
                        .keys()
                        .take(*capacity)
                        .map(|item| item.len() as u64)
                        .sum();
                    *capacity as u64 * 16 + tracked
                }
            }
    }
}

fn wrong_type() -> BenchError {
    BenchError::BackendRejected(
        "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
    )
}

fn missing_key(structure: &str) -> BenchError {
    BenchError::BackendRejected(format!("{}: key does not exist", structure))
}

/// Key/value store keeping every structure in memory
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn reserve(&self, key: &str, entry: Entry) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(key) {
            return Err(BenchError::BackendRejected("ERR item exists".to_string()));
        }
        entries.insert(key.to_string(), entry);
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn flush(&self) -> Result<()> {
        self.entries.lock().await.clear();
        Ok(())
    }

    async fn memory_usage(&self, key: &str) -> Result<u64> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).map(Entry::estimated_bytes).unwrap_or(0))
    }

    async fn zincrby(&self, key: &str, member: &str, by: f64) -> Result<f64> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::SortedSet(HashMap::new()));

        match entry {
            Entry::SortedSet(members) => {
                let score = members.entry(member.to_string()).or_insert(0.0);
                *score += by;
                Ok(*score)
            }
            _ => Err(wrong_type()),
        }
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let entries = self.entries.lock().await;
        match entries.get(key) {
            None => Ok(None),
            Some(Entry::SortedSet(members)) => Ok(members.get(member).copied()),
            Some(_) => Err(wrong_type()),
        }
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let entries = self.entries.lock().await;
        match entries.get(key) {
            None => Ok(0),
            Some(Entry::SortedSet(members)) => Ok(members.len() as u64),
            Some(_) => Err(wrong_type()),
        }
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let entries = self.entries.lock().await;
        let members = match entries.get(key) {
            None => return Ok(Vec::new()),
            Some(Entry::SortedSet(members)) => members,
            Some(_) => return Err(wrong_type()),
        };

        // Descending score, equal scores in reverse lexicographic order.
        let mut ranked: Vec<(&String, f64)> = members.iter().map(|(m, s)| (m, *s)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(a.0)));

        let len = ranked.len() as isize;
        let start = if start < 0 { (start + len).max(0) } else { start };
        let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
        if len == 0 || start > stop || start >= len {
            return Ok(Vec::new());
        }

        Ok(ranked[start as usize..=stop as usize]
            .iter()
            .map(|(member, _)| (*member).clone())
            .collect())
    }

    async fn bf_reserve(&self, key: &str, error_rate: f64, capacity: u64) -> Result<()> {
        self.reserve(
            key,
            Entry::Bloom {
                error_rate,
                capacity,
                items: HashSet::new(),
            },
        )
        .await
    }

    async fn bf_madd(&self, key: &str, items: &[String]) -> Result<()> {
        let mut entries = self.entries.lock().await;
        // BF.MADD creates a filter with module defaults when the key is absent.
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry::Bloom {
            error_rate: 0.01,
            capacity: 100,
            items: HashSet::new(),
        });

        match entry {
            Entry::Bloom { items: stored, .. } => {
                stored.extend(items.iter().cloned());
                Ok(())
            }
            _ => Err(wrong_type()),
        }
    }

    async fn bf_exists(&self, key: &str, item: &str) -> Result<bool> {
        let entries = self.entries.lock().await;
        match entries.get(key) {
            None => Ok(false),
            Some(Entry::Bloom { items, .. }) => Ok(items.contains(item)),
            Some(_) => Err(wrong_type()),
        }
    }

    async fn cms_init_by_prob(&self, key: &str, error: f64, probability: f64) -> Result<()> {
        let width = (2.0 / error).ceil() as u64;
        let depth = (probability.ln() / 0.5f64.ln()).ceil().max(1.0) as u64;
        self.reserve(
            key,
            Entry::CountMin {
                width,
                depth,
                counts: HashMap::new(),
            },
        )
        .await
    }

    async fn cms_incrby(&self, key: &str, items: &[String]) -> Result<()> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            None => Err(missing_key("CMS")),
            Some(Entry::CountMin { counts, .. }) => {
                for item in items {
                    *counts.entry(item.clone()).or_insert(0) += 1;
                }
                Ok(())
            }
            Some(_) => Err(wrong_type()),
        }
    }

    async fn cms_query(&self, key: &str, item: &str) -> Result<u64> {
        let entries = self.entries.lock().await;
        match entries.get(key) {
            None => Err(missing_key("CMS")),
            Some(Entry::CountMin { counts, .. }) => Ok(counts.get(item).copied().unwrap_or(0)),
            Some(_) => Err(wrong_type()),
        }
    }

    async fn pfadd(&self, key: &str, items: &[String]) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::HyperLogLog(HashSet::new()));

        match entry {
            Entry::HyperLogLog(stored) => {
                stored.extend(items.iter().cloned());
                Ok(())
            }
            _ => Err(wrong_type()),
        }
    }

    async fn pfcount(&self, key: &str) -> Result<u64> {
        let entries = self.entries.lock().await;
        match entries.get(key) {
            None => Ok(0),
            Some(Entry::HyperLogLog(items)) => Ok(items.len() as u64),
            Some(_) => Err(wrong_type()),
        }
    }

    async fn topk_reserve(&self, key: &str, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(BenchError::BackendRejected(
                "TopK: invalid k".to_string(),
            ));
        }
        self.reserve(
            key,
            Entry::TopK {
                capacity,
                counts: HashMap::new(),
            },
        )
        .await
    }

    async fn topk_add(&self, key: &str, items: &[String]) -> Result<()> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            None => Err(missing_key("TopK")),
            Some(Entry::TopK { counts, .. }) => {
                for item in items {
                    *counts.entry(item.clone()).or_insert(0) += 1;
                }
                Ok(())
            }
            Some(_) => Err(wrong_type()),
        }
    }

    async fn topk_list(&self, key: &str) -> Result<Vec<(String, u64)>> {
        let entries = self.entries.lock().await;
        match entries.get(key) {
            None => Err(missing_key("TopK")),
            Some(Entry::TopK { capacity, counts }) => {
                let mut ranked: Vec<(String, u64)> =
                    counts.iter().map(|(item, count)| (item.clone(), *count)).collect();
                ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                ranked.truncate(*capacity);
                Ok(ranked)
            }
            Some(_) => Err(wrong_type()),
        }
    }
}
