// Shaping workflows: the operations behind each CLI subcommand

use crate::address::HostAddress;
use crate::error::ShapeError;
use crate::rate::Rate;
use crate::tc::command::{ClassScope, MatchField};
use crate::tc::handle::Handle;
use crate::tc::ifb::IngressRedirector;
use crate::tc::{Change, TrafficControl};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Shape traffic leaving the device, matched on source address
    Egress,
    /// Shape traffic arriving on the device via its IFB device, matched on destination
    Ingress,
}

impl Direction {
    fn match_field(&self) -> MatchField {
        match self {
            Direction::Egress => MatchField::Src,
            Direction::Ingress => MatchField::Dst,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Egress => write!(f, "egress"),
            Direction::Ingress => write!(f, "ingress"),
        }
    }
}

/// A validated request to shape one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapingIntent {
    pub device: String,
    pub direction: Direction,
    pub address: HostAddress,
    pub rate: Rate,
    pub ceil: Rate,
}

impl ShapingIntent {
    /// Validate caller input; the ceiling defaults to the rate
    pub fn new(
        device: &str,
        direction: Direction,
        address: &str,
        rate: &str,
        ceil: Option<&str>,
    ) -> Result<Self, ShapeError> {
        let address: HostAddress = address.parse()?;
        let rate: Rate = rate.parse()?;
        let ceil = match ceil {
            Some(ceil) => ceil.parse()?,
            None => rate.clone(),
        };

        Ok(Self {
            device: device.to_string(),
            direction,
            address,
            rate,
            ceil,
        })
    }
}

/// What a reconcile pass changed, step by step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapingReport {
    /// Device the HTB hierarchy lives on (the IFB device for ingress)
    pub device: String,
    pub root: Change,
    pub class: Change,
    pub filter: Change,
}

impl fmt::Display for ShapingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: root {}, class {}, filter {}",
            self.device, self.root, self.class, self.filter
        )
    }
}

/// Bring the kernel in line with `intent`, stopping at the first failing step
pub fn reconcile(tc: &TrafficControl, intent: &ShapingIntent) -> Result<ShapingReport, ShapeError> {
    let device = match intent.direction {
        Direction::Egress => intent.device.clone(),
        Direction::Ingress => IngressRedirector::new(tc).activate(&intent.device)?,
    };

    let root = tc.ensure_root_hierarchy(&device, &tc.settings().max_rate)?;
    let class = tc.ensure_host_class(&device, &intent.address, &intent.rate, &intent.ceil)?;
    let filter = tc.ensure_host_filter(&device, &intent.address, intent.direction.match_field())?;

    let report = ShapingReport {
        device,
        root,
        class,
        filter,
    };
    log::info!(
        "{} {} (flow {}): {}",
        intent.direction,
        intent.address,
        intent.address.flow_id(),
        report
    );
    Ok(report)
}

/// Remove shaping for one host
pub fn unset(
    tc: &TrafficControl,
    device: &str,
    direction: Direction,
    address: &HostAddress,
) -> Result<Change, ShapeError> {
    match direction {
        Direction::Egress => tc.remove_host_shaping(device, address),
        Direction::Ingress => {
            tc.check_device(device)?;
            let ifb = IngressRedirector::new(tc).ifb_device_for(device);
            tc.remove_host_shaping(&ifb, address)
        }
    }
}

/// Remove every shaping rule tied to `device`
pub fn clear(tc: &TrafficControl, device: &str, direction: Direction) -> Result<Change, ShapeError> {
    match direction {
        Direction::Egress => tc.clear_root(device),
        Direction::Ingress => IngressRedirector::new(tc).deactivate(device),
    }
}

/// Text report of everything tc shows for `device`
pub fn stat(tc: &TrafficControl, device: &str, parent: Option<Handle>) -> Result<String, ShapeError> {
    let snapshot = match parent {
        Some(parent) => tc.query_state_scoped(device, ClassScope::Parent(parent))?,
        None => tc.query_state(device)?,
    };
    Ok(snapshot.to_string())
}
