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

//! Cached Substrate staking queries and per-era reward aggregation.
//!
//! The crate has two layers: a [`cache::QueryCache`] that deduplicates the
//! expensive paginated storage reads behind a TTL table with optional disk
//! persistence, and a [`rewards::RewardsAggregator`] that joins the cached
//! staking maps into era, validator and nominator reports. The chain RPC
//! client itself stays behind the [`client::ChainClient`] trait.

pub mod cache;
pub mod client;
pub mod config;
pub mod errors;
pub mod records;
pub mod rewards;

pub use cache::{CacheKey, CacheOptions, QueryCache};
pub use client::{ChainClient, QueryMapOptions};
pub use config::{Config, CONFIG};
pub use errors::{CacheError, SubstakeError};
pub use records::{
    EraInfo, Filters, LedgerRecord, NominatorReport, ValidatorReport,
};
pub use rewards::{AggregatorOptions, RewardsAggregator};
