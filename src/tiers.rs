//! Cumulative tier deployment.
//!
//! Tiers deploy strictly in order. Between tiers the sequencer polls the
//! shared warmup scope, so a warmup failure stops the run at the next
//! boundary rather than mid-tier. Tier 3 additionally waits for warmup to
//! finish.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cancel::CancellationScope;
use crate::collab::TierDeployer;
use crate::config::{ChartRelease, LabConfig, TierCharts};
use crate::warmup::{WarmupOrchestrator, WarmupResult, WarmupState};
use crate::{klog, klog_error, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// The cluster itself.
    Cluster = 0,
    Infrastructure = 1,
    Platform = 2,
    Applications = 3,
}

impl Tier {
    pub const ALL: [Tier; 4] = [
        Tier::Cluster,
        Tier::Infrastructure,
        Tier::Platform,
        Tier::Applications,
    ];

    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn from_ordinal(n: usize) -> Option<Tier> {
        Self::ALL.get(n).copied()
    }

    pub fn previous(self) -> Option<Tier> {
        self.ordinal().checked_sub(1).and_then(Self::from_ordinal)
    }

    /// Tiers `0..=self`.
    pub fn through(self) -> impl Iterator<Item = Tier> {
        Self::ALL.into_iter().take(self.ordinal() + 1)
    }

    /// Helm releases that belong to this tier.
    pub fn charts(self, charts: &TierCharts) -> &[ChartRelease] {
        match self {
            Tier::Cluster => &[],
            Tier::Infrastructure => &charts.infrastructure,
            Tier::Platform => &charts.platform,
            Tier::Applications => &charts.applications,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Cluster => "cluster",
            Tier::Infrastructure => "infrastructure",
            Tier::Platform => "platform",
            Tier::Applications => "applications",
        };
        write!(f, "tier {} ({})", self.ordinal(), name)
    }
}

impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<usize>()
            .ok()
            .and_then(Tier::from_ordinal)
            .ok_or_else(|| Error::Validation(format!("tier must be 0-3, got '{}'", s)))
    }
}

/// Identifies one sequencer run in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters of the UUID.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Progress through the tiers of one run.
#[derive(Debug, Clone)]
pub struct DeploymentTierState {
    pub tier: Option<Tier>,
    pub completed: Vec<Tier>,
    scope: CancellationScope,
}

impl DeploymentTierState {
    pub fn new(scope: CancellationScope) -> Self {
        Self {
            tier: None,
            completed: Vec::new(),
            scope,
        }
    }

    pub fn scope(&self) -> &CancellationScope {
        &self.scope
    }

    pub fn is_completed(&self, tier: Tier) -> bool {
        self.completed.contains(&tier)
    }

    /// Allow `tier` to start only after its predecessor and while the scope
    /// is live.
    pub fn gate(&mut self, tier: Tier) -> Result<()> {
        self.scope.check()?;
        if let Some(prev) = tier.previous() {
            if !self.is_completed(prev) {
                return Err(Error::Validation(format!(
                    "{} cannot start before {} completes",
                    tier, prev
                )));
            }
        }
        self.tier = Some(tier);
        Ok(())
    }

    pub fn complete(&mut self, tier: Tier) {
        if !self.is_completed(tier) {
            self.completed.push(tier);
        }
    }
}

/// What a sequencer run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: RunId,
    pub completed: Vec<Tier>,
    pub warmup: Option<WarmupResult>,
}

pub struct TierSequencer {
    run_id: RunId,
    deployers: [Arc<dyn TierDeployer>; 4],
    warmup: WarmupOrchestrator,
}

impl TierSequencer {
    pub fn new(deployers: [Arc<dyn TierDeployer>; 4], warmup: WarmupOrchestrator) -> Self {
        Self {
            run_id: RunId::new(),
            deployers,
            warmup,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn warmup(&self) -> &WarmupOrchestrator {
        &self.warmup
    }

    /// Deploy tiers `0..=target`.
    ///
    /// A tier failure cancels the warmup scope and waits for warmup tasks to
    /// wind down before returning the tier's error.
    pub async fn run(
        &mut self,
        scope: &CancellationScope,
        target: Tier,
        config: &LabConfig,
    ) -> Result<RunSummary> {
        klog!("Run {}: deploying through {}", self.run_id.short(), target);
        let shared = if target >= Tier::Applications {
            self.warmup.start(scope)?
        } else {
            scope.child()
        };
        let mut state = DeploymentTierState::new(shared.clone());

        for tier in target.through() {
            if let Err(e) = self.step(&mut state, tier, config).await {
                return Err(self.abandon(tier, e).await);
            }
        }

        klog!("Deployed through {}", target);
        Ok(RunSummary {
            run_id: self.run_id,
            completed: state.completed,
            warmup: self.warmup.result().cloned(),
        })
    }

    async fn step(
        &mut self,
        state: &mut DeploymentTierState,
        tier: Tier,
        config: &LabConfig,
    ) -> Result<()> {
        state.gate(tier)?;

        if tier == Tier::Applications {
            klog!("Waiting for warmup before {}", tier);
            self.warmup.join().await?;
            state.scope().check()?;
        }

        klog!("Deploying {}", tier);
        let deployer = Arc::clone(&self.deployers[tier.ordinal()]);
        deployer.deploy(state.scope(), config).await?;
        state.complete(tier);
        klog!("Completed {}", tier);
        Ok(())
    }

    async fn abandon(&mut self, tier: Tier, err: Error) -> Error {
        if err.is_aborted() {
            klog!("{} aborted: {}", tier, err);
        } else {
            klog_error!("{} failed: {}", tier, err);
            self.warmup.cancel(format!("{} failed: {}", tier, err));
        }
        // Tasks watch the scope, so this returns promptly.
        if self.warmup.state() == WarmupState::Started {
            let _ = self.warmup.join().await;
        }
        err
    }
}
