// IFB ingress redirection
//
// HTB only shapes traffic leaving a device, so inbound packets on the real
// device are redirected by a mirred action to a paired IFB device and shaped
// there as its egress. Host filters on the IFB device match on destination
// address.

use super::command;
use super::handle::Handle;
use super::{Change, TC, TrafficControl};
use crate::error::ShapeError;

/// IFB device paired with `device` when no override is configured
pub fn default_ifb_device(device: &str) -> &'static str {
    match device {
        "eth1" => "ifb1",
        _ => "ifb0",
    }
}

pub struct IngressRedirector<'t, 'a> {
    tc: &'t TrafficControl<'a>,
}

impl<'t, 'a> IngressRedirector<'t, 'a> {
    pub fn new(tc: &'t TrafficControl<'a>) -> Self {
        Self { tc }
    }

    pub fn ifb_device_for(&self, device: &str) -> String {
        self.tc
            .settings()
            .ifb_devices
            .get(device)
            .cloned()
            .unwrap_or_else(|| default_ifb_device(device).to_string())
    }

    /// Redirect ingress on `device` to its IFB device and return the IFB name
    pub fn activate(&self, device: &str) -> Result<String, ShapeError> {
        let ifb = self.ifb_device_for(device);
        self.tc.check_device(device)?;

        // Best-effort: shaping setup continues even if the link stays down
        match self.tc.set_link_up(&ifb) {
            Ok(()) => log::debug!("✅ {} is UP", ifb),
            Err(e) => log::warn!("Failed to bring up {}: {}", ifb, e),
        }

        if self.tc.qdiscs(device)?.iter().any(|q| q.is_kind("ingress")) {
            log::debug!("{}: ingress qdisc already present", device);
        } else {
            self.tc.exec(TC, command::add_ingress(device))?;
            log::info!("{}: added ingress qdisc", device);
        }

        let redirected = self
            .tc
            .filters(device, Some(Handle::INGRESS))?
            .iter()
            .any(|f| f.redirect.as_deref() == Some(ifb.as_str()));

        if redirected {
            log::debug!("{}: ingress already redirected to {}", device, ifb);
        } else {
            self.tc.exec(
                TC,
                command::add_redirect(device, &self.tc.settings().protocol, &ifb),
            )?;
            log::info!("{}: redirecting ingress to {}", device, ifb);
        }

        Ok(ifb)
    }

    /// Undo `activate`: drop the IFB root and the ingress qdisc, if present
    pub fn deactivate(&self, device: &str) -> Result<Change, ShapeError> {
        let ifb = self.ifb_device_for(device);
        self.tc.check_device(device)?;

        let mut change = Change::Unchanged;

        if self.tc.list_devices()?.contains(&ifb) && self.tc.has_htb_root(&ifb)? {
            self.tc.exec(TC, command::del_root(&ifb))?;
            log::info!("{}: removed htb root", ifb);
            change = Change::Removed;
        }

        if self.tc.qdiscs(device)?.iter().any(|q| q.is_kind("ingress")) {
            self.tc.exec(TC, command::del_ingress(device))?;
            log::info!("{}: removed ingress qdisc", device);
            change = Change::Removed;
        }

        Ok(change)
    }
}
