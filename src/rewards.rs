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

use crate::cache::QueryCache;
use crate::client::{ChainClient, QueryMapOptions};
use crate::config::Config;
use crate::errors::SubstakeError;
use crate::records::{
    ActiveEraInfo, Balance, CurrentStake, EraIndex, EraInfo, EraRewardPoints, EraRewards,
    EraStakeStats, Exposure, Filters, LedgerRecord, NominatorEraReward, NominatorEraSlice,
    NominatorEraStake, NominatorReport, Nominations, Points, StakingLedger, ValidatorEraRecord,
    ValidatorEraRewards, ValidatorEraStake, ValidatorPrefs, ValidatorReport,
    ValidatorTotalRewards, PERBILL, SS58,
};

use log::{debug, warn};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

const STAKING: &str = "Staking";

fn era_map_options() -> QueryMapOptions {
    QueryMapOptions::paged(1000, 10000)
}

fn roster_map_options() -> QueryMapOptions {
    QueryMapOptions::paged(1000, 10000)
}

// Ledger and Bonded are read with the default small page. Accounts can
// still be absent from the cached view (expired entry, race on first
// population); smart_ledger falls back to direct reads for those.
fn ledger_map_options() -> QueryMapOptions {
    QueryMapOptions::default()
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorOptions {
    /// Fallback when the HistoryDepth storage item cannot be read.
    pub history_depth: u32,
    /// Used to annualize era rates of return.
    pub eras_per_day: f64,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            history_depth: 84,
            eras_per_day: 1.0,
        }
    }
}

impl AggregatorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            history_depth: config.maximum_history_eras,
            eras_per_day: config.eras_per_day,
        }
    }
}

/// Turns cached raw staking maps into validator, nominator and era
/// reports. Every call is a synchronous pipeline of cache-backed reads
/// followed by in-memory joins; the aggregator holds no state of its own
/// beyond the cache handle.
pub struct RewardsAggregator<C: ChainClient> {
    cache: QueryCache<C>,
    options: AggregatorOptions,
}

impl<C: ChainClient> RewardsAggregator<C> {
    pub fn new(cache: QueryCache<C>) -> Self {
        Self::with_options(cache, AggregatorOptions::default())
    }

    pub fn with_options(cache: QueryCache<C>, options: AggregatorOptions) -> Self {
        Self { cache, options }
    }

    pub fn cache(&self) -> &QueryCache<C> {
        &self.cache
    }

    /// Resolves an account's staking ledger, following the stash to
    /// controller indirection. A visited set makes cycle-safety an
    /// invariant rather than an accident of chain semantics; an account
    /// bonded to itself is never treated as its own controller. Not-found
    /// is a normal outcome, callers substitute zero-stake records.
    pub fn smart_ledger(&self, account: &str) -> Result<Option<LedgerRecord>, SubstakeError> {
        let ledgers =
            self.cache
                .cached_query_map(STAKING, "Ledger", &[], None, &ledger_map_options())?;
        let bonded =
            self.cache
                .cached_query_map(STAKING, "Bonded", &[], None, &ledger_map_options())?;

        let mut visited: HashSet<SS58> = HashSet::new();
        let mut current = account.to_string();
        let mut indirect = false;
        loop {
            if !visited.insert(current.clone()) {
                warn!("bonded cycle detected at {}", current);
                return Ok(None);
            }
            if let Some(raw) = ledgers.get(&current) {
                if !raw.is_null() {
                    let ledger: StakingLedger = serde_json::from_value(raw.clone())?;
                    return Ok(Some(LedgerRecord::from_ledger(ledger, indirect)));
                }
            }
            let param = [Value::String(current.clone())];
            if let Some(controller) = bonded.get(&current).and_then(Value::as_str) {
                if controller != current {
                    current = controller.to_string();
                    indirect = true;
                    continue;
                }
                // Self-bonded; the ledger may still live beyond the paged
                // window, so read it directly before giving up.
                let raw = self.cache.cached_query(STAKING, "Ledger", &param, None)?;
                if raw.is_null() {
                    return Ok(None);
                }
                let ledger: StakingLedger = serde_json::from_value(raw)?;
                return Ok(Some(LedgerRecord::from_ledger(ledger, indirect)));
            }
            // Neither paged map retains the account; fall back to direct
            // single-item reads, populating the cache incrementally.
            let raw = self.cache.cached_query(STAKING, "Ledger", &param, None)?;
            if !raw.is_null() {
                let ledger: StakingLedger = serde_json::from_value(raw)?;
                return Ok(Some(LedgerRecord::from_ledger(ledger, indirect)));
            }
            let raw = self.cache.cached_query(STAKING, "Bonded", &param, None)?;
            match raw.as_str() {
                Some(controller) if controller != current => {
                    current = controller.to_string();
                    indirect = true;
                }
                _ => return Ok(None),
            }
        }
    }

    /// Joins reward points, reward amounts, stakers and validator
    /// preferences for a single era. Not-found when the era dropped out
    /// of the chain's retained history.
    pub fn era_info(
        &self,
        era: EraIndex,
        filters: &Filters,
    ) -> Result<Option<EraInfo>, SubstakeError> {
        let points_map = self.cache.cached_query_map(
            STAKING,
            "ErasRewardPoints",
            &[],
            None,
            &era_map_options(),
        )?;
        let era_points: EraRewardPoints = match points_map.get(&era.to_string()) {
            Some(raw) => serde_json::from_value(raw.clone())?,
            None => return Ok(None),
        };

        let rewards_map = self.cache.cached_query_map(
            STAKING,
            "ErasValidatorReward",
            &[],
            None,
            &era_map_options(),
        )?;
        let amount: Balance = match rewards_map.get(&era.to_string()) {
            Some(raw) if !raw.is_null() => serde_json::from_value(raw.clone())?,
            _ => return Ok(None),
        };

        let era_param = [json!(era)];
        let stakers = self.cache.cached_query_map(
            STAKING,
            "ErasStakers",
            &era_param,
            None,
            &era_map_options(),
        )?;
        let prefs = self.cache.cached_query_map(
            STAKING,
            "ErasValidatorPrefs",
            &era_param,
            None,
            &era_map_options(),
        )?;

        let individual: HashMap<SS58, Points> = era_points.individual.iter().cloned().collect();

        let mut validators: BTreeMap<SS58, ValidatorEraRecord> = BTreeMap::new();
        let mut stakes = EraStakeStats::default();
        let mut era_claimed = true;

        for (stash, raw_exposure) in stakers.iter() {
            if !filters.allows_account(stash) {
                continue;
            }
            let exposure: Exposure = serde_json::from_value(raw_exposure.clone())?;
            // Every staked validator must carry preferences for the era.
            let raw_prefs = prefs.get(stash).ok_or_else(|| {
                SubstakeError::MalformedData(format!(
                    "validator preferences missing for {} at era {}",
                    stash, era
                ))
            })?;
            let preferences: ValidatorPrefs = serde_json::from_value(raw_prefs.clone())?;

            let points = individual.get(stash).copied().unwrap_or(0);
            let share = if era_points.total > 0 {
                (amount as f64 / era_points.total as f64) * points as f64
            } else {
                0.0
            };
            let commission_rate = preferences.commission as f64 / PERBILL;
            let commission = share * commission_rate;

            let claimed = match self.smart_ledger(stash)? {
                Some(ledger) => ledger.claimed.contains(&era),
                None => false,
            };
            if points > 0 && !claimed {
                era_claimed = false;
            }

            let mut nominators: BTreeMap<SS58, NominatorEraStake> = BTreeMap::new();
            for other in exposure.others.iter() {
                let nominator_reward = if exposure.total > 0 {
                    other.value as f64 * (share / exposure.total as f64)
                } else {
                    0.0
                };
                nominators.insert(
                    other.who.clone(),
                    NominatorEraStake {
                        value: other.value,
                        reward: NominatorEraReward {
                            amount: nominator_reward,
                            commission: nominator_reward * commission_rate,
                        },
                    },
                );
            }

            let epr = if exposure.total > 0 {
                share / exposure.total as f64
            } else {
                0.0
            };
            let apr = epr * self.options.eras_per_day * 365.0;

            stakes.observe(exposure.total);
            validators.insert(
                stash.clone(),
                ValidatorEraRecord {
                    rewards: ValidatorEraRewards {
                        amount: share,
                        points,
                        commission,
                        claimed,
                        epr,
                        apr,
                    },
                    preferences,
                    stake: ValidatorEraStake {
                        own: exposure.own,
                        total: exposure.total,
                        nominators,
                    },
                },
            );
        }

        let era_epr = if stakes.total > 0 {
            amount as f64 / stakes.total as f64
        } else {
            0.0
        };
        let era_apr = era_epr * self.options.eras_per_day * 365.0;

        Ok(Some(EraInfo {
            rewards: EraRewards {
                amount,
                points: era_points.total,
                claimed: era_claimed,
                epr: era_epr,
                apr: era_apr,
            },
            stakes,
            validators,
        }))
    }

    /// Per-era reports for an explicit era set or for the chain's retained
    /// window `[active_era - history_depth, active_era)`. Eras outside the
    /// retained history are omitted, malformed eras are skipped with a
    /// warning.
    pub fn eras_info(&self, filters: &Filters) -> Result<BTreeMap<EraIndex, EraInfo>, SubstakeError> {
        let eras: BTreeSet<EraIndex> = match &filters.eras {
            Some(eras) => eras.iter().cloned().collect(),
            None => {
                let raw = self.cache.cached_query(STAKING, "ActiveEra", &[], None)?;
                if raw.is_null() {
                    return Err(SubstakeError::Other("active era not available".into()));
                }
                let active: ActiveEraInfo = serde_json::from_value(raw)?;
                let depth = self.history_depth();
                (active.index.saturating_sub(depth)..active.index).collect()
            }
        };

        let mut data: BTreeMap<EraIndex, EraInfo> = BTreeMap::new();
        for era in eras {
            match self.era_info(era, filters) {
                Ok(Some(info)) => {
                    data.insert(era, info);
                }
                Ok(None) => debug!("era {} outside retained history", era),
                Err(SubstakeError::MalformedData(e)) => warn!("era {} skipped: {}", era, e),
                Err(e) => return Err(e),
            }
        }
        Ok(data)
    }

    fn history_depth(&self) -> u32 {
        match self.cache.cached_query(STAKING, "HistoryDepth", &[], None) {
            Ok(raw) if !raw.is_null() => {
                serde_json::from_value(raw).unwrap_or(self.options.history_depth)
            }
            _ => self.options.history_depth,
        }
    }

    /// One report per validator in the current Validators preferences map,
    /// carrying its per-era records, folded reward totals, and today's
    /// nominator stakes. A supplied eras map is read, never annotated in
    /// place.
    pub fn validators_info(
        &self,
        filters: &Filters,
        eras_info: Option<&BTreeMap<EraIndex, EraInfo>>,
    ) -> Result<BTreeMap<SS58, ValidatorReport>, SubstakeError> {
        let computed;
        let eras_info = match eras_info {
            Some(supplied) => supplied,
            None => {
                computed = self.eras_info(filters)?;
                &computed
            }
        };

        let roster =
            self.cache
                .cached_query_map(STAKING, "Validators", &[], None, &roster_map_options())?;

        let mut data: BTreeMap<SS58, ValidatorReport> = BTreeMap::new();
        for (stash, _prefs) in roster.iter() {
            if !filters.allows_account(stash) {
                continue;
            }
            let own = match self.smart_ledger(stash)? {
                Some(ledger) => ledger.active,
                None => 0,
            };
            data.insert(
                stash.clone(),
                ValidatorReport {
                    stake: CurrentStake { own, total: own },
                    rewards: ValidatorTotalRewards::default(),
                    eras: BTreeMap::new(),
                    nominators: BTreeMap::new(),
                },
            );
        }

        for (era, info) in eras_info.iter() {
            for (stash, record) in info.validators.iter() {
                if let Some(report) = data.get_mut(stash) {
                    report.rewards.amount += record.rewards.amount;
                    report.rewards.points += record.rewards.points;
                    report.eras.insert(*era, record.clone());
                }
            }
        }

        let nominators =
            self.cache
                .cached_query_map(STAKING, "Nominators", &[], None, &roster_map_options())?;
        let mut resolved: HashMap<SS58, Balance> = HashMap::new();
        for (nominator, raw) in nominators.iter() {
            if raw.is_null() {
                continue;
            }
            let nominations: Nominations = serde_json::from_value(raw.clone())?;
            for target in nominations.targets.iter() {
                if let Some(report) = data.get_mut(target) {
                    let stake = match resolved.get(nominator) {
                        Some(stake) => *stake,
                        None => {
                            let stake = match self.smart_ledger(nominator)? {
                                Some(ledger) => ledger.active,
                                None => 0,
                            };
                            resolved.insert(nominator.clone(), stake);
                            stake
                        }
                    };
                    if report.nominators.insert(nominator.clone(), stake).is_none() {
                        report.stake.total += stake;
                    }
                }
            }
        }

        Ok(data)
    }

    /// The nominator-centric dual of `validators_info`: current stake and
    /// targets for every nominator, plus one era slice per (era, validator)
    /// exposure it appears in.
    pub fn nominators_info(
        &self,
        filters: &Filters,
        eras_info: Option<&BTreeMap<EraIndex, EraInfo>>,
    ) -> Result<BTreeMap<SS58, NominatorReport>, SubstakeError> {
        let validators = self.validators_info(filters, eras_info)?;

        let nominators =
            self.cache
                .cached_query_map(STAKING, "Nominators", &[], None, &roster_map_options())?;
        let mut data: BTreeMap<SS58, NominatorReport> = BTreeMap::new();
        for (nominator, raw) in nominators.iter() {
            if raw.is_null() {
                continue;
            }
            let nominations: Nominations = serde_json::from_value(raw.clone())?;
            let stake = match self.smart_ledger(nominator)? {
                Some(ledger) => ledger.active,
                None => 0,
            };
            data.insert(
                nominator.clone(),
                NominatorReport {
                    stake,
                    targets: nominations.targets,
                    eras: BTreeMap::new(),
                },
            );
            debug!("nominator {} loaded", nominator);
        }

        for (stash, report) in validators.iter() {
            for (era, record) in report.eras.iter() {
                let commission_rate = record.preferences.commission as f64 / PERBILL;
                for (nominator, stake) in record.stake.nominators.iter() {
                    if !data.contains_key(nominator) {
                        // Appears only in historical exposures; resolve the
                        // stake now, current targets stay empty.
                        let current = match self.smart_ledger(nominator)? {
                            Some(ledger) => ledger.active,
                            None => 0,
                        };
                        data.insert(
                            nominator.clone(),
                            NominatorReport {
                                stake: current,
                                targets: Vec::new(),
                                eras: BTreeMap::new(),
                            },
                        );
                    }
                    if let Some(entry) = data.get_mut(nominator) {
                        let reward = if record.stake.total > 0 {
                            stake.value as f64
                                * (record.rewards.amount / record.stake.total as f64)
                        } else {
                            0.0
                        };
                        entry
                            .eras
                            .entry(*era)
                            .or_insert_with(Vec::new)
                            .push(NominatorEraSlice {
                                validator: stash.clone(),
                                value: stake.value,
                                reward,
                                commission: reward * commission_rate,
                            });
                    }
                }
            }
        }

        Ok(data)
    }

    /// Refreshes claim flags over a previously built eras map. An era is
    /// fully claimed only when every validator with nonzero points in it is
    /// individually claimed. Accounts whose ledger resolution fails go into
    /// a skip list, returned to the caller, so the error is attempted once
    /// per pass rather than once per era.
    pub fn eras_update_claimed(&self, data: &mut BTreeMap<EraIndex, EraInfo>) -> Vec<SS58> {
        let mut skip: HashSet<SS58> = HashSet::new();

        for (era, info) in data.iter_mut() {
            if info.rewards.claimed {
                continue;
            }
            info.rewards.claimed = true;

            for (stash, record) in info.validators.iter_mut() {
                if record.rewards.claimed {
                    continue;
                }
                if record.rewards.points == 0 {
                    record.rewards.claimed = true;
                    continue;
                }
                if skip.contains(stash) {
                    info.rewards.claimed = false;
                    continue;
                }

                match self.smart_ledger(stash) {
                    Ok(Some(ledger)) if ledger.claimed.contains(era) => {
                        record.rewards.claimed = true;
                    }
                    Ok(_) => {
                        record.rewards.claimed = false;
                        info.rewards.claimed = false;
                    }
                    Err(e) => {
                        warn!("claim lookup failed for {}: {}", stash, e);
                        record.rewards.claimed = false;
                        info.rewards.claimed = false;
                        skip.insert(stash.clone());
                    }
                }
            }
        }

        let mut skipped: Vec<SS58> = skip.into_iter().collect();
        skipped.sort();
        skipped
    }
}
