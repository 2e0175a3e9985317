//! The cluster state machine (§4.4) and per-mode quorum rules (DESIGN.md
//! Open Question 3).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::node::StateTotals;

/// A cluster's reconciliation mode (§3).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClusterMode {
    Backup,
    Failover,
    Balance,
}

impl fmt::Display for ClusterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Backup => "BACKUP",
            Self::Failover => "FAILOVER",
            Self::Balance => "BALANCE",
        })
    }
}

/// A cluster's runtime state (§3, §4.4).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClusterState {
    Initializing,
    Operational,
    Degraded,
    Disfunctional,
    Failure,
    Disabled,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initializing => "INITIALIZING",
            Self::Operational => "OPERATIONAL",
            Self::Degraded => "DEGRADED",
            Self::Disfunctional => "DISFUNCTIONAL",
            Self::Failure => "FAILURE",
            Self::Disabled => "DISABLED",
        })
    }
}

/// Evaluate the mode-specific quorum rule for a cluster that P6 found to
/// be neither cleanly `OPERATIONAL` nor simply `DEGRADED` (§4.4 P6, last
/// bullet). These rules are DESIGN.md's Open Question 3 decision, not
/// named by the distilled spec:
///
/// - `BACKUP` needs exactly one online `PRIMARY` node.
/// - `FAILOVER` needs at least one online node, of either mode.
/// - `BALANCE` needs at least half (rounded up) of its configured nodes
///   online.
pub fn evaluate_quorum(mode: ClusterMode, totals: StateTotals, online_primaries: usize) -> ClusterState {
    let quorum_met = match mode {
        ClusterMode::Backup => online_primaries == 1,
        ClusterMode::Failover => totals.online > 0,
        ClusterMode::Balance => totals.online * 2 >= totals.total,
    };

    if quorum_met {
        ClusterState::Disfunctional
    } else {
        ClusterState::Failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_requires_exactly_one_online_primary() {
        let totals = StateTotals { total: 2, online: 1, ..Default::default() };
        assert_eq!(
            evaluate_quorum(ClusterMode::Backup, totals, 1),
            ClusterState::Disfunctional
        );
        assert_eq!(
            evaluate_quorum(ClusterMode::Backup, totals, 0),
            ClusterState::Failure
        );
    }

    #[test]
    fn balance_requires_half_online() {
        let totals = StateTotals { total: 4, online: 2, ..Default::default() };
        assert_eq!(
            evaluate_quorum(ClusterMode::Balance, totals, 0),
            ClusterState::Disfunctional
        );
        let totals = StateTotals { total: 4, online: 1, ..Default::default() };
        assert_eq!(
            evaluate_quorum(ClusterMode::Balance, totals, 0),
            ClusterState::Failure
        );
    }
}
