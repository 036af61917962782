// Apply the rule store's bandwidth table to one device

use crate::address::{AddressRange, HostAddress};
use crate::backends::{CommandRunner, SystemRunner};
use crate::backends::store::{JsonRuleStore, RuleStore};
use crate::rate::Rate;
use crate::shaping::{self, Direction, ShapingIntent};
use crate::tc::{TcSettings, TrafficControl};
use anyhow::{Context, Result, anyhow};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub applied: usize,
    /// Rules for addresses outside the managed range
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} applied, {} skipped, {} failed",
            self.applied, self.skipped, self.failed
        )
    }
}

/// Reconcile every in-range rule as an egress intent on `device`
///
/// A failing rule is logged and counted; the remaining rules are still applied.
/// Once `cancel` is set no further rule is started.
pub fn sync_rules(
    tc: &TrafficControl,
    store: &dyn RuleStore,
    range: &AddressRange,
    device: &str,
    cancel: &AtomicBool,
) -> Result<SyncReport> {
    let rules = store
        .get_bandwidths()
        .context(format!("Failed to read rules from {}", store.name()))?;

    let mut report = SyncReport::default();

    for (index, rule) in rules.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            log::warn!(
                "Sync cancelled, {} rule(s) not applied",
                rules.len() - index
            );
            break;
        }

        let address: HostAddress = match rule.ip.parse() {
            Ok(address) => address,
            Err(e) => {
                log::warn!("Skipping rule: {}", e);
                report.failed += 1;
                continue;
            }
        };

        if !range.contains(address.to_ipv4()) {
            log::debug!("{} is outside {}, skipping", address, range);
            report.skipped += 1;
            continue;
        }

        let rate = Rate::from_mbit(rule.bandwidth);
        let result = ShapingIntent::new(
            device,
            Direction::Egress,
            &rule.ip,
            rate.as_str(),
            None,
        )
        .and_then(|intent| shaping::reconcile(tc, &intent));

        match result {
            Ok(_) => report.applied += 1,
            Err(e) => {
                log::error!("Failed to shape {} at {}: {}", address, rate, e);
                report.failed += 1;
            }
        }
    }

    log::info!("Sync of {} on {}: {}", range, device, report);
    Ok(report)
}

/// Run a full sync pass against the system `tc` under an overall deadline
///
/// The pass runs on a blocking worker. When the deadline expires the pass is
/// reported as failed and the worker stops before its next rule; commands
/// already issued stay in effect.
pub async fn run_sync(
    settings: TcSettings,
    rules_path: PathBuf,
    range: AddressRange,
    device: String,
    deadline: Duration,
) -> Result<SyncReport> {
    let store = Box::new(JsonRuleStore::new(rules_path));
    run_sync_with(SystemRunner, store, settings, range, device, deadline).await
}

async fn run_sync_with<R>(
    runner: R,
    store: Box<dyn RuleStore + Send>,
    settings: TcSettings,
    range: AddressRange,
    device: String,
    deadline: Duration,
) -> Result<SyncReport>
where
    R: CommandRunner + Send + 'static,
{
    let cancel = Arc::new(AtomicBool::new(false));
    let worker_cancel = Arc::clone(&cancel);

    let handle = tokio::task::spawn_blocking(move || -> Result<SyncReport> {
        let tc = TrafficControl::new(&runner, settings)?;
        sync_rules(&tc, store.as_ref(), &range, &device, &worker_cancel)
    });

    match tokio::time::timeout(deadline, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(anyhow!("Sync worker panicked: {}", e)),
        Err(_) => {
            cancel.store(true, Ordering::Relaxed);
            log::warn!("Sync timed out after {:?}", deadline);
            Err(anyhow!("Sync timed out after {:?}", deadline))
        }
    }
}
