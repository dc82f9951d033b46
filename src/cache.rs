// The MIT License (MIT)
// Copyright © 2021 Aukbit Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

use crate::client::{ChainClient, QueryMapOptions};
use crate::config::Config;
use crate::errors::{CacheError, SubstakeError};

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// Every parameter is stringified before it reaches the cache key, so a
/// value and its string representation collide on purpose. This mirrors
/// the plain string canonicalization the storage layer has always used
/// and is a deliberate simplification.
pub(crate) fn stringify_params(params: &[Value]) -> String {
    params
        .iter()
        .map(|p| match p {
            Value::String(s) => s.clone(),
            v => v.to_string(),
        })
        .collect::<Vec<String>>()
        .join(",")
}

fn stringify_options(options: &QueryMapOptions) -> String {
    let max_results = match options.max_results {
        Some(n) => n.to_string(),
        None => "all".to_string(),
    };
    let start_key = options.start_key.clone().unwrap_or("-".to_string());
    format!(
        "{}:{}:{}:{}",
        max_results, start_key, options.page_size, options.ignore_decoding_errors
    )
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheKey {
    Query {
        module: String,
        function: String,
        params: String,
        block: String,
    },
    QueryMap {
        module: String,
        function: String,
        params: String,
        block: String,
        pagination: String,
    },
}

impl CacheKey {
    pub fn query(module: &str, function: &str, params: &[Value], block: Option<&str>) -> Self {
        Self::Query {
            module: module.to_string(),
            function: function.to_string(),
            params: stringify_params(params),
            block: block.unwrap_or("none").to_string(),
        }
    }

    pub fn query_map(
        module: &str,
        function: &str,
        params: &[Value],
        block: Option<&str>,
        options: &QueryMapOptions,
    ) -> Self {
        Self::QueryMap {
            module: module.to_string(),
            function: function.to_string(),
            params: stringify_params(params),
            block: block.unwrap_or("none").to_string(),
            pagination: stringify_options(options),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query {
                module,
                function,
                params,
                block,
            } => write!(f, "q:{}:{}:[{}]:{}", module, function, params, block),
            Self::QueryMap {
                module,
                function,
                params,
                block,
                pagination,
            } => write!(
                f,
                "qm:{}:{}:[{}]:{}:{}",
                module, function, params, block, pagination
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    pub inserted_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheOptions {
    /// Time-to-live in seconds shared by every entry. Zero means entries
    /// never expire.
    pub ttl: u64,
    /// Optional snapshot file. When unset the cache is in-memory only.
    pub storage: Option<PathBuf>,
    /// Minimum seconds between snapshot writes. Zero syncs on every write.
    pub sync_interval: u64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: 0,
            storage: None,
            sync_interval: 60,
        }
    }
}

impl CacheOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ttl: config.cache_ttl_seconds,
            storage: config.cache_storage_path.clone().map(PathBuf::from),
            sync_interval: config.cache_storage_sync_seconds,
        }
    }
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    next_sync_at: i64,
}

/// Deduplicates expensive chain reads behind a TTL keyed table, with
/// optional best-effort persistence of the full table to disk.
pub struct QueryCache<C: ChainClient> {
    client: C,
    options: CacheOptions,
    inner: Mutex<CacheInner>,
}

fn unix_now() -> i64 {
    Utc::now().timestamp()
}

impl<C: ChainClient> QueryCache<C> {
    pub fn new(client: C, options: CacheOptions) -> Self {
        let entries = match &options.storage {
            Some(path) => load_snapshot(path),
            None => HashMap::new(),
        };
        Self {
            client,
            options,
            inner: Mutex::new(CacheInner {
                entries,
                next_sync_at: unix_now(),
            }),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Single-item storage read through the cache.
    pub fn cached_query(
        &self,
        module: &str,
        function: &str,
        params: &[Value],
        block_hash: Option<&str>,
    ) -> Result<Value, SubstakeError> {
        let key = CacheKey::query(module, function, params, block_hash).to_string();
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        debug!("Query > {} {} [{}]", module, function, stringify_params(params));
        let value = self.client.query(module, function, params, block_hash)?;
        self.store(key, value.clone());
        Ok(value)
    }

    /// Paginated storage read through the cache, materialized eagerly into
    /// a key to value mapping. The first occurrence of a key wins.
    pub fn cached_query_map(
        &self,
        module: &str,
        function: &str,
        params: &[Value],
        block_hash: Option<&str>,
        options: &QueryMapOptions,
    ) -> Result<Map<String, Value>, SubstakeError> {
        let key = CacheKey::query_map(module, function, params, block_hash, options).to_string();
        if let Some(Value::Object(map)) = self.get(&key) {
            return Ok(map);
        }
        debug!(
            "QueryMap > {} {} [{}]",
            module,
            function,
            stringify_params(params)
        );
        let mut map = Map::new();
        let pairs = self
            .client
            .query_map(module, function, params, block_hash, options)?;
        for pair in pairs {
            match pair {
                Ok((Some(k), v)) => {
                    if !map.contains_key(&k) {
                        map.insert(k, v);
                    }
                }
                Ok((None, _)) => {
                    debug!("{} {} undecodable key skipped", module, function);
                }
                Err(e) => {
                    if options.ignore_decoding_errors {
                        // Keep whatever was read up to the failing pair.
                        warn!("{} {} map read aborted: {}", module, function, e);
                        break;
                    }
                    return Err(e);
                }
            }
        }
        self.store(key, Value::Object(map.clone()));
        Ok(map)
    }

    /// Drops all entries, truncates the snapshot file and rearms the sync
    /// deadline.
    pub fn invalidate(&self) {
        {
            let mut inner = self.inner.lock().expect("cache lock poisoned");
            inner.entries.clear();
            inner.next_sync_at = unix_now();
        }
        if let Some(path) = &self.options.storage {
            if let Err(e) = fs::File::create(path) {
                warn!("Failed to truncate cache snapshot {}: {}", path.display(), e);
            }
        }
        info!("Cache invalidated");
    }

    fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let expired = match inner.entries.get(key) {
            Some(entry) => {
                if self.options.ttl == 0 || unix_now() - entry.inserted_at <= self.options.ttl as i64
                {
                    return Some(entry.value.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            inner.entries.remove(key);
        }
        None
    }

    fn store(&self, key: String, value: Value) {
        let due = {
            let mut inner = self.inner.lock().expect("cache lock poisoned");
            inner.entries.insert(
                key,
                CacheEntry {
                    value,
                    inserted_at: unix_now(),
                },
            );
            if self.options.storage.is_some() && unix_now() >= inner.next_sync_at {
                inner.next_sync_at = unix_now() + self.options.sync_interval as i64;
                Some(inner.entries.clone())
            } else {
                None
            }
        };
        // Snapshot bytes are built from a clone and written outside the
        // lock. A broken disk must never break a live query.
        if let Some(entries) = due {
            if let Some(path) = &self.options.storage {
                match write_snapshot(path, &entries) {
                    Ok(_) => info!("Cache snapshot synced to {}", path.display()),
                    Err(e) => warn!("Cache snapshot sync failed: {}", e),
                }
            }
        }
    }

    #[cfg(test)]
    fn backdate(&self, seconds: i64) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        for entry in inner.entries.values_mut() {
            entry.inserted_at -= seconds;
        }
    }
}

fn load_snapshot(path: &PathBuf) -> HashMap<String, CacheEntry> {
    match fs::read(path) {
        Ok(bytes) => match serde_json::from_slice::<HashMap<String, CacheEntry>>(&bytes) {
            Ok(entries) => {
                info!(
                    "Loaded {} cached entries from {}",
                    entries.len(),
                    path.display()
                );
                entries
            }
            Err(e) => {
                warn!(
                    "Discarding unreadable cache snapshot {}: {}",
                    path.display(),
                    e
                );
                HashMap::new()
            }
        },
        Err(e) => {
            // A missing snapshot is the normal first run; anything else
            // still degrades to an empty cache.
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "{} ({})",
                    CacheError::SnapshotReadError(e),
                    path.display()
                );
            }
            HashMap::new()
        }
    }
}

fn write_snapshot(path: &PathBuf, entries: &HashMap<String, CacheEntry>) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec(entries)?;
    fs::write(path, bytes).map_err(CacheError::SnapshotWriteError)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use crate::client::MapItem;
    use serde_json::json;

    fn snapshot_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("substake_{}_{}.json", name, std::process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn repeated_queries_hit_the_cache() {
        let client = MockClient::new()
            .with_query("Staking", "ActiveEra", &[], json!({"index": 100}))
            .with_map("Staking", "Bonded", &[], vec![("A", json!("B"))]);
        let cache = QueryCache::new(client, CacheOptions::default());

        let first = cache.cached_query("Staking", "ActiveEra", &[], None).unwrap();
        let second = cache.cached_query("Staking", "ActiveEra", &[], None).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.client().call_count("Staking", "ActiveEra", &[]), 1);

        let opts = QueryMapOptions::default();
        let first = cache
            .cached_query_map("Staking", "Bonded", &[], None, &opts)
            .unwrap();
        let second = cache
            .cached_query_map("Staking", "Bonded", &[], None, &opts)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.get("A"), Some(&json!("B")));
        assert_eq!(cache.client().call_count("Staking", "Bonded", &[]), 1);
    }

    #[test]
    fn expired_entries_are_refetched() {
        let client = MockClient::new().with_query("Staking", "ActiveEra", &[], json!({"index": 7}));
        let options = CacheOptions {
            ttl: 30,
            ..Default::default()
        };
        let cache = QueryCache::new(client, options);

        cache.cached_query("Staking", "ActiveEra", &[], None).unwrap();
        cache.backdate(10);
        cache.cached_query("Staking", "ActiveEra", &[], None).unwrap();
        assert_eq!(cache.client().call_count("Staking", "ActiveEra", &[]), 1);

        cache.backdate(31);
        cache.cached_query("Staking", "ActiveEra", &[], None).unwrap();
        assert_eq!(cache.client().call_count("Staking", "ActiveEra", &[]), 2);
    }

    #[test]
    fn snapshot_round_trips_between_instances() {
        let path = snapshot_path("round_trip");
        let options = CacheOptions {
            storage: Some(path.clone()),
            sync_interval: 0,
            ..Default::default()
        };

        let client = MockClient::new()
            .with_query("Staking", "ActiveEra", &[], json!({"index": 9}))
            .with_map("Staking", "Ledger", &[], vec![("A", json!({"total": 1}))]);
        let cache = QueryCache::new(client, options.clone());
        cache.cached_query("Staking", "ActiveEra", &[], None).unwrap();
        cache
            .cached_query_map("Staking", "Ledger", &[], None, &QueryMapOptions::default())
            .unwrap();
        drop(cache);

        // A fresh instance over the same snapshot serves both reads
        // without touching the collaborator.
        let cache = QueryCache::new(MockClient::new(), options);
        assert_eq!(cache.len(), 2);
        let value = cache.cached_query("Staking", "ActiveEra", &[], None).unwrap();
        assert_eq!(value, json!({"index": 9}));
        let map = cache
            .cached_query_map("Staking", "Ledger", &[], None, &QueryMapOptions::default())
            .unwrap();
        assert_eq!(map.get("A"), Some(&json!({"total": 1})));
        assert_eq!(cache.client().total_calls(), 0);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_snapshot_starts_empty() {
        let path = snapshot_path("corrupt");
        fs::write(&path, b"not json at all").unwrap();

        let client = MockClient::new().with_query("Staking", "ActiveEra", &[], json!(1));
        let options = CacheOptions {
            storage: Some(path.clone()),
            ..Default::default()
        };
        let cache = QueryCache::new(client, options);
        assert!(cache.is_empty());
        assert_eq!(
            cache.cached_query("Staking", "ActiveEra", &[], None).unwrap(),
            json!(1)
        );

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn unreadable_snapshot_starts_empty() {
        // A directory cannot be read as a snapshot file; the cache must
        // still come up empty and serve queries.
        let client = MockClient::new().with_query("Staking", "ActiveEra", &[], json!(2));
        let options = CacheOptions {
            storage: Some(std::env::temp_dir()),
            sync_interval: 3600,
            ..Default::default()
        };
        let cache = QueryCache::new(client, options);
        assert!(cache.is_empty());
        assert_eq!(
            cache.cached_query("Staking", "ActiveEra", &[], None).unwrap(),
            json!(2)
        );
    }

    #[test]
    fn invalidate_drops_entries_and_truncates_snapshot() {
        let path = snapshot_path("invalidate");
        let options = CacheOptions {
            storage: Some(path.clone()),
            sync_interval: 0,
            ..Default::default()
        };
        let client = MockClient::new().with_query("Staking", "ActiveEra", &[], json!(1));
        let cache = QueryCache::new(client, options);

        cache.cached_query("Staking", "ActiveEra", &[], None).unwrap();
        assert!(fs::metadata(&path).unwrap().len() > 0);

        cache.invalidate();
        assert!(cache.is_empty());
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);

        cache.cached_query("Staking", "ActiveEra", &[], None).unwrap();
        assert_eq!(cache.client().call_count("Staking", "ActiveEra", &[]), 2);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn first_occurrence_of_a_map_key_wins() {
        let client = MockClient::new().with_raw_map(
            "Staking",
            "Bonded",
            &[],
            vec![
                (Some("A".to_string()), json!(1)),
                (Some("A".to_string()), json!(2)),
                (None, json!(99)),
                (Some("B".to_string()), json!(3)),
            ],
        );
        let cache = QueryCache::new(client, CacheOptions::default());
        let map = cache
            .cached_query_map("Staking", "Bonded", &[], None, &QueryMapOptions::default())
            .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("A"), Some(&json!(1)));
        assert_eq!(map.get("B"), Some(&json!(3)));
    }

    struct HalfBrokenClient;

    impl ChainClient for HalfBrokenClient {
        fn query(
            &self,
            _module: &str,
            _function: &str,
            _params: &[Value],
            _block_hash: Option<&str>,
        ) -> Result<Value, SubstakeError> {
            Ok(Value::Null)
        }

        fn query_map<'a>(
            &'a self,
            _module: &str,
            _function: &str,
            _params: &[Value],
            _block_hash: Option<&str>,
            _options: &QueryMapOptions,
        ) -> Result<Box<dyn Iterator<Item = MapItem> + 'a>, SubstakeError> {
            let pairs = vec![
                Ok((Some("A".to_string()), json!(1))),
                Err(SubstakeError::TransportError("decode failed".to_string())),
                Ok((Some("B".to_string()), json!(2))),
            ];
            Ok(Box::new(pairs.into_iter()))
        }
    }

    #[test]
    fn map_read_failure_keeps_partial_or_aborts() {
        let cache = QueryCache::new(HalfBrokenClient, CacheOptions::default());

        let strict = QueryMapOptions {
            ignore_decoding_errors: false,
            ..Default::default()
        };
        assert!(cache
            .cached_query_map("Staking", "Ledger", &[], None, &strict)
            .is_err());
        assert!(cache.is_empty());

        let lenient = QueryMapOptions::default();
        let map = cache
            .cached_query_map("Staking", "Ledger", &[], None, &lenient)
            .unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("A"), Some(&json!(1)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn params_collide_on_string_representation() {
        let a = CacheKey::query("Staking", "Ledger", &[json!(5)], None);
        let b = CacheKey::query("Staking", "Ledger", &[json!("5")], None);
        assert_eq!(a.to_string(), b.to_string());
    }
}
