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

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type EraIndex = u32;
pub type Points = u32;
pub type Balance = u128;
pub type SS58 = String;

/// Commission rates are expressed in parts per billion on chain.
pub const PERBILL: f64 = 1_000_000_000.0;

// -- Chain-shaped storage values -------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ActiveEraInfo {
    pub index: EraIndex,
    #[serde(default)]
    pub start: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EraRewardPoints {
    pub total: Points,
    #[serde(default)]
    pub individual: Vec<(SS58, Points)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exposure {
    pub total: Balance,
    pub own: Balance,
    #[serde(default)]
    pub others: Vec<IndividualExposure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndividualExposure {
    pub who: SS58,
    pub value: Balance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorPrefs {
    pub commission: u64,
    #[serde(default)]
    pub blocked: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakingLedger {
    pub stash: SS58,
    pub total: Balance,
    pub active: Balance,
    #[serde(default)]
    pub claimed_rewards: Vec<EraIndex>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nominations {
    pub targets: Vec<SS58>,
    #[serde(default)]
    pub submitted_in: EraIndex,
    #[serde(default)]
    pub suppressed: bool,
}

// -- Derived records --------------------------------------------------------

/// Result of a `smart_ledger` resolution. `bonded` flags that the lookup
/// went through a stash to controller indirection.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerRecord {
    pub total: Balance,
    pub active: Balance,
    pub claimed: Vec<EraIndex>,
    pub bonded: bool,
}

impl LedgerRecord {
    pub fn from_ledger(ledger: StakingLedger, bonded: bool) -> Self {
        Self {
            total: ledger.total,
            active: ledger.active,
            claimed: ledger.claimed_rewards,
            bonded,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EraInfo {
    pub rewards: EraRewards,
    pub stakes: EraStakeStats,
    pub validators: BTreeMap<SS58, ValidatorEraRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EraRewards {
    pub amount: Balance,
    pub points: Points,
    pub claimed: bool,
    pub epr: f64,
    pub apr: f64,
}

/// Min, max and total of validator exposures within one era.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EraStakeStats {
    pub min: Balance,
    pub max: Balance,
    pub total: Balance,
    pub count: u32,
}

impl EraStakeStats {
    pub fn observe(&mut self, stake: Balance) {
        if self.count == 0 || stake < self.min {
            self.min = stake;
        }
        if stake > self.max {
            self.max = stake;
        }
        self.total += stake;
        self.count += 1;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidatorEraRecord {
    pub rewards: ValidatorEraRewards,
    pub preferences: ValidatorPrefs,
    pub stake: ValidatorEraStake,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidatorEraRewards {
    pub amount: f64,
    pub points: Points,
    pub commission: f64,
    pub claimed: bool,
    pub epr: f64,
    pub apr: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidatorEraStake {
    pub own: Balance,
    pub total: Balance,
    pub nominators: BTreeMap<SS58, NominatorEraStake>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NominatorEraStake {
    pub value: Balance,
    pub reward: NominatorEraReward,
}

#[derive(Debug, Clone, Serialize)]
pub struct NominatorEraReward {
    pub amount: f64,
    pub commission: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidatorReport {
    pub stake: CurrentStake,
    pub rewards: ValidatorTotalRewards,
    pub eras: BTreeMap<EraIndex, ValidatorEraRecord>,
    pub nominators: BTreeMap<SS58, Balance>,
}

/// Today's stake snapshot, deliberately decoupled from any single era's
/// historical exposure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CurrentStake {
    pub own: Balance,
    pub total: Balance,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidatorTotalRewards {
    pub amount: f64,
    pub points: Points,
}

#[derive(Debug, Clone, Serialize)]
pub struct NominatorReport {
    pub stake: Balance,
    pub targets: Vec<SS58>,
    pub eras: BTreeMap<EraIndex, Vec<NominatorEraSlice>>,
}

/// One era's stake and reward of a nominator behind a single validator.
#[derive(Debug, Clone, Serialize)]
pub struct NominatorEraSlice {
    pub validator: SS58,
    pub value: Balance,
    pub reward: f64,
    pub commission: f64,
}

/// Era and account selection for the aggregation calls. An empty filter
/// means "everything the chain retains".
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub eras: Option<Vec<EraIndex>>,
    pub accounts: Option<Vec<SS58>>,
}

impl Filters {
    pub fn allows_account(&self, account: &str) -> bool {
        match &self.accounts {
            Some(accounts) => accounts.iter().any(|a| a == account),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_a_camel_case_ledger() {
        let ledger: StakingLedger = serde_json::from_value(json!({
            "stash": "STASH",
            "total": 100,
            "active": 90,
            "claimedRewards": [1, 2, 3]
        }))
        .unwrap();
        assert_eq!(ledger.active, 90);
        assert_eq!(ledger.claimed_rewards, vec![1, 2, 3]);
    }

    #[test]
    fn decodes_reward_points_pairs() {
        let points: EraRewardPoints = serde_json::from_value(json!({
            "total": 100,
            "individual": [["VAL", 60], ["OTHER", 40]]
        }))
        .unwrap();
        assert_eq!(points.total, 100);
        assert_eq!(points.individual[0], ("VAL".to_string(), 60));
    }

    #[test]
    fn stake_stats_track_min_max_total() {
        let mut stats = EraStakeStats::default();
        stats.observe(50);
        stats.observe(10);
        stats.observe(40);
        assert_eq!(stats.min, 10);
        assert_eq!(stats.max, 50);
        assert_eq!(stats.total, 100);
        assert_eq!(stats.count, 3);
    }
}
