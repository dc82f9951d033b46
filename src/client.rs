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

use crate::errors::SubstakeError;
use serde_json::Value;

/// A single (key, value) pair produced by a paginated storage read.
/// The key is `None` when the storage key could not be decoded.
pub type MapItem = Result<(Option<String>, Value), SubstakeError>;

/// Pagination and decoding options for a paginated storage read.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMapOptions {
    pub max_results: Option<u32>,
    pub start_key: Option<String>,
    pub page_size: u32,
    pub ignore_decoding_errors: bool,
}

impl Default for QueryMapOptions {
    fn default() -> Self {
        Self {
            max_results: None,
            start_key: None,
            page_size: 100,
            ignore_decoding_errors: true,
        }
    }
}

impl QueryMapOptions {
    pub fn paged(page_size: u32, max_results: u32) -> Self {
        Self {
            max_results: Some(max_results),
            page_size,
            ..Default::default()
        }
    }
}

/// Storage access to a Substrate node. Implementations own the wire
/// protocol and SCALE decoding; values cross this boundary as JSON.
/// Both reads are blocking at this layer.
pub trait ChainClient {
    /// Single-item storage read. An absent storage value is `Value::Null`.
    fn query(
        &self,
        module: &str,
        storage_function: &str,
        params: &[Value],
        block_hash: Option<&str>,
    ) -> Result<Value, SubstakeError>;

    /// Paginated storage read, produced lazily as a finite sequence of
    /// (key, value) pairs.
    fn query_map<'a>(
        &'a self,
        module: &str,
        storage_function: &str,
        params: &[Value],
        block_hash: Option<&str>,
        options: &QueryMapOptions,
    ) -> Result<Box<dyn Iterator<Item = MapItem> + 'a>, SubstakeError>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::cache::stringify_params;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory ChainClient with per-call counters, shared by the
    /// cache and rewards test modules.
    #[derive(Default)]
    pub struct MockClient {
        queries: HashMap<String, Value>,
        maps: HashMap<String, Vec<(Option<String>, Value)>>,
        failing: Vec<String>,
        pub calls: Mutex<HashMap<String, u32>>,
    }

    fn mock_key(module: &str, storage_function: &str, params: &[Value]) -> String {
        format!("{}:{}:{}", module, storage_function, stringify_params(params))
    }

    impl MockClient {
        pub fn new() -> Self {
            Default::default()
        }

        pub fn with_query(mut self, module: &str, function: &str, params: &[Value], value: Value) -> Self {
            self.queries.insert(mock_key(module, function, params), value);
            self
        }

        pub fn with_map(
            mut self,
            module: &str,
            function: &str,
            params: &[Value],
            pairs: Vec<(&str, Value)>,
        ) -> Self {
            let pairs = pairs
                .into_iter()
                .map(|(k, v)| (Some(k.to_string()), v))
                .collect();
            self.maps.insert(mock_key(module, function, params), pairs);
            self
        }

        pub fn with_raw_map(
            mut self,
            module: &str,
            function: &str,
            params: &[Value],
            pairs: Vec<(Option<String>, Value)>,
        ) -> Self {
            self.maps.insert(mock_key(module, function, params), pairs);
            self
        }

        /// Make a specific single-item query fail with a transport error.
        pub fn with_failing_query(mut self, module: &str, function: &str, params: &[Value]) -> Self {
            self.failing.push(mock_key(module, function, params));
            self
        }

        pub fn call_count(&self, module: &str, function: &str, params: &[Value]) -> u32 {
            let calls = self.calls.lock().unwrap();
            *calls.get(&mock_key(module, function, params)).unwrap_or(&0)
        }

        pub fn total_calls(&self) -> u32 {
            let calls = self.calls.lock().unwrap();
            calls.values().sum()
        }

        fn count(&self, key: &str) {
            let mut calls = self.calls.lock().unwrap();
            *calls.entry(key.to_string()).or_insert(0) += 1;
        }
    }

    impl ChainClient for MockClient {
        fn query(
            &self,
            module: &str,
            storage_function: &str,
            params: &[Value],
            _block_hash: Option<&str>,
        ) -> Result<Value, SubstakeError> {
            let key = mock_key(module, storage_function, params);
            self.count(&key);
            if self.failing.contains(&key) {
                return Err(SubstakeError::TransportError(format!(
                    "mock failure on {}",
                    key
                )));
            }
            Ok(self.queries.get(&key).cloned().unwrap_or(Value::Null))
        }

        fn query_map<'a>(
            &'a self,
            module: &str,
            storage_function: &str,
            params: &[Value],
            _block_hash: Option<&str>,
            _options: &QueryMapOptions,
        ) -> Result<Box<dyn Iterator<Item = MapItem> + 'a>, SubstakeError> {
            let key = mock_key(module, storage_function, params);
            self.count(&key);
            if self.failing.contains(&key) {
                return Err(SubstakeError::TransportError(format!(
                    "mock failure on {}",
                    key
                )));
            }
            let pairs = self.maps.get(&key).cloned().unwrap_or_default();
            Ok(Box::new(pairs.into_iter().map(Ok)))
        }
    }
}
