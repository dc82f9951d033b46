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

// Load environment variables into a Config struct
//
// Envy is a library for deserializing environment variables into
// typesafe structs
//
// Dotenv loads environment variables from a .env file, if available,
// and mashes those with the actual environment variables provided by
// the operative system.
//
// Set Config struct into a CONFIG lazy_static to avoid multiple processing.
//
use dotenv;
use lazy_static::lazy_static;
use log::info;
use serde::Deserialize;
use std::env;

// Set Config struct into a CONFIG lazy_static to avoid multiple processing
lazy_static! {
    pub static ref CONFIG: Config = get_config();
}

/// provides default value for substrate_ws_url if SUBSTAKE_SUBSTRATE_WS_URL env var is not set
fn default_substrate_ws_url() -> String {
    "ws://127.0.0.1:9944".into()
}

/// provides default value for cache_ttl_seconds if SUBSTAKE_CACHE_TTL_SECONDS env var is not set
fn default_cache_ttl_seconds() -> u64 {
    0
}

/// provides default value for cache_storage_sync_seconds if SUBSTAKE_CACHE_STORAGE_SYNC_SECONDS env var is not set
fn default_cache_storage_sync_seconds() -> u64 {
    60
}

/// provides default value for maximum_history_eras if SUBSTAKE_MAXIMUM_HISTORY_ERAS env var is not set
fn default_maximum_history_eras() -> u32 {
    84
}

/// provides default value for eras_per_day if SUBSTAKE_ERAS_PER_DAY env var is not set
fn default_eras_per_day() -> f64 {
    1.0
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_substrate_ws_url")]
    pub substrate_ws_url: String,
    // A cache_ttl_seconds of zero means entries never expire
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    // When unset the cache is in-memory only
    #[serde(default)]
    pub cache_storage_path: Option<String>,
    #[serde(default = "default_cache_storage_sync_seconds")]
    pub cache_storage_sync_seconds: u64,
    #[serde(default = "default_maximum_history_eras")]
    pub maximum_history_eras: u32,
    #[serde(default = "default_eras_per_day")]
    pub eras_per_day: f64,
}

/// Inject dotenv and env vars into the Config struct
fn get_config() -> Config {
    let config_path = env::var("SUBSTAKE_CONFIG_FILENAME").unwrap_or(".env".to_string());
    if let Some(_) = dotenv::from_filename(&config_path).ok() {
        info!("Loading configuration from {} file", &config_path);
    }

    match envy::prefixed("SUBSTAKE_").from_env::<Config>() {
        Ok(config) => config,
        Err(error) => panic!("Configuration error: {:#?}", error),
    }
}
