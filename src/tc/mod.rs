//! `tc` facade: observe the kernel's qdisc/class/filter graph, then issue
//! only the commands needed to reach the desired state.
//!
//! Layout managed on every shaped device:
//!
//! ```text
//! qdisc htb 1: root (default 300)
//! └── class 1:1 (link ceiling)
//!     └── class 1:<host> ── qdisc sfq <host>:
//! filter parent 1: u32 match ip src|dst <address> flowid 1:<host>
//! ```
//!
//! Nothing is cached between calls; every operation re-reads kernel state.

pub mod command;
pub mod handle;
pub mod ifb;
pub mod parse;

use crate::address::HostAddress;
use crate::backends::{CommandOutput, CommandRunner, command_line};
use crate::error::ShapeError;
use crate::rate::Rate;
use command::{ClassScope, HtbClass, MatchField, Verb};
use handle::Handle;
use parse::{Class, Filter, Qdisc};
use std::collections::HashMap;
use std::fmt;

const TC: &str = "tc";
const IP: &str = "ip";

/// Outcome of a single reconcile step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Created,
    Updated,
    Removed,
    Unchanged,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::Created => write!(f, "created"),
            Change::Updated => write!(f, "updated"),
            Change::Removed => write!(f, "removed"),
            Change::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Knobs for the commands the controller builds
#[derive(Debug, Clone, PartialEq)]
pub struct TcSettings {
    /// Ceiling of the top-level class, normally the link speed
    pub max_rate: Rate,
    /// Minor number (hex, as tc reads it) unclassified traffic is sent to
    pub default_class: u32,
    pub filter_prio: u32,
    /// SFQ hash perturbation interval in seconds
    pub sfq_perturb: u32,
    pub protocol: String,
    /// Device -> IFB device overrides for ingress redirection
    pub ifb_devices: HashMap<String, String>,
}

impl Default for TcSettings {
    fn default() -> Self {
        Self {
            max_rate: Rate::from_gbit(10),
            default_class: 0x300,
            filter_prio: 10,
            sfq_perturb: 10,
            protocol: "ip".to_string(),
            ifb_devices: HashMap::new(),
        }
    }
}

/// Everything tc reports for one device
#[derive(Debug, Clone, Default)]
pub struct TcSnapshot {
    pub device: String,
    pub qdiscs: Vec<Qdisc>,
    pub classes: Vec<Class>,
    pub filters: Vec<Filter>,
}

impl fmt::Display for TcSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dev: {}", self.device)?;
        for qdisc in &self.qdiscs {
            writeln!(f, "qdisc: {}", qdisc.raw)?;
        }
        for class in &self.classes {
            writeln!(f, "class: {}", class.raw)?;
        }
        for filter in &self.filters {
            writeln!(f, "filter: {}", filter.raw)?;
        }
        Ok(())
    }
}

pub struct TrafficControl<'a> {
    runner: &'a dyn CommandRunner,
    settings: TcSettings,
}

impl<'a> TrafficControl<'a> {
    /// Create the facade, failing if `tc` cannot be run on this host
    pub fn new(runner: &'a dyn CommandRunner, settings: TcSettings) -> Result<Self, ShapeError> {
        let version_args = command::version();
        match runner.run(TC, &version_args) {
            Ok(output) if output.success() => {
                log::debug!("tc available: {}", output.stdout.trim());
            }
            Ok(output) => {
                return Err(ShapeError::DependencyMissing(format!(
                    "`{}` exited with {:?}",
                    command_line(TC, &version_args),
                    output.status
                )));
            }
            Err(e) => return Err(ShapeError::DependencyMissing(e.to_string())),
        }

        Ok(Self { runner, settings })
    }

    pub fn settings(&self) -> &TcSettings {
        &self.settings
    }

    /// Run a state-changing command; non-zero exit is an error
    fn exec(&self, program: &str, args: Vec<String>) -> Result<CommandOutput, ShapeError> {
        let command = command_line(program, &args);

        let output = self
            .runner
            .run(program, &args)
            .map_err(|source| ShapeError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.success() {
            return Err(ShapeError::CommandFailed {
                command,
                status: output.status,
                stderr: output.stderr,
            });
        }

        Ok(output)
    }

    /// Run a listing command; a failing listing reads as empty
    fn query(&self, program: &str, args: Vec<String>) -> Result<CommandOutput, ShapeError> {
        let command = command_line(program, &args);
        let output = self
            .runner
            .run(program, &args)
            .map_err(|source| ShapeError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.success() {
            log::debug!(
                "`{}` exited with {:?}, treating as empty: {}",
                command,
                output.status,
                output.stderr
            );
            return Ok(CommandOutput::default());
        }

        Ok(output)
    }

    /// Interfaces known to the kernel
    pub fn list_devices(&self) -> Result<Vec<String>, ShapeError> {
        let output = self.query(IP, command::list_links())?;
        Ok(parse::parse_links(output.lines()))
    }

    pub fn check_device(&self, device: &str) -> Result<(), ShapeError> {
        if self.list_devices()?.iter().any(|d| d == device) {
            Ok(())
        } else {
            Err(ShapeError::UnknownDevice(device.to_string()))
        }
    }

    pub fn qdiscs(&self, device: &str) -> Result<Vec<Qdisc>, ShapeError> {
        let output = self.query(TC, command::qdisc_show(device))?;
        Ok(parse::parse_qdiscs(output.lines()))
    }

    pub fn classes(&self, device: &str, scope: ClassScope) -> Result<Vec<Class>, ShapeError> {
        let output = self.query(TC, command::class_show(device, scope))?;
        Ok(parse::parse_classes(output.lines()))
    }

    pub fn filters(&self, device: &str, parent: Option<Handle>) -> Result<Vec<Filter>, ShapeError> {
        let output = self.query(TC, command::filter_show(device, parent))?;
        Ok(parse::parse_filters(output.lines()))
    }

    /// Snapshot of everything attached to `device`
    pub fn query_state(&self, device: &str) -> Result<TcSnapshot, ShapeError> {
        self.query_state_scoped(device, ClassScope::All)
    }

    pub fn query_state_scoped(
        &self,
        device: &str,
        scope: ClassScope,
    ) -> Result<TcSnapshot, ShapeError> {
        self.check_device(device)?;

        Ok(TcSnapshot {
            device: device.to_string(),
            qdiscs: self.qdiscs(device)?,
            classes: self.classes(device, scope)?,
            filters: self.filters(device, None)?,
        })
    }

    pub fn has_htb_root(&self, device: &str) -> Result<bool, ShapeError> {
        Ok(self.qdiscs(device)?.iter().any(Qdisc::is_htb_root))
    }

    /// Ensure `1:` htb root and the `1:1` top class exist on `device`
    pub fn ensure_root_hierarchy(
        &self,
        device: &str,
        max_rate: &Rate,
    ) -> Result<Change, ShapeError> {
        self.check_device(device)?;

        if self.has_htb_root(device)? {
            log::debug!("{}: htb root already present", device);
            return Ok(Change::Unchanged);
        }

        self.exec(
            TC,
            command::add_htb_root(device, self.settings.default_class),
        )?;

        let top = HtbClass {
            parent: Handle::ROOT,
            classid: Handle::TOP_CLASS,
            rate: max_rate.clone(),
            ceil: max_rate.clone(),
        };
        self.exec(TC, command::htb_class(Verb::Add, device, &top))?;

        log::info!("{}: created htb root with ceiling {}", device, max_rate);
        Ok(Change::Created)
    }

    /// Create or update the `1:<host>` class for `address`
    ///
    /// New classes get an SFQ leaf qdisc. Existing classes are changed in
    /// place with `class replace` so shaping never lapses.
    pub fn ensure_host_class(
        &self,
        device: &str,
        address: &HostAddress,
        rate: &Rate,
        ceil: &Rate,
    ) -> Result<Change, ShapeError> {
        let classid = host_class_id(address)?;
        self.check_device(device)?;

        // TODO: nest hosts under a per-net class 1:<net> instead of the shared 1:1
        let class = HtbClass {
            parent: Handle::TOP_CLASS,
            classid,
            rate: rate.clone(),
            ceil: ceil.clone(),
        };

        let existing = self
            .classes(device, ClassScope::Parent(Handle::TOP_CLASS))?
            .into_iter()
            .find(|c| c.id == classid);

        if let Some(previous) = existing {
            self.exec(TC, command::htb_class(Verb::Replace, device, &class))?;
            log::info!(
                "{}: updated class {} ({:?} / {:?} -> {} / {})",
                device,
                classid,
                previous.rate,
                previous.ceil,
                rate,
                ceil
            );
            return Ok(Change::Updated);
        }

        self.exec(TC, command::htb_class(Verb::Add, device, &class))?;
        self.exec(
            TC,
            command::add_sfq_leaf(
                device,
                classid,
                Handle::host_leaf(address.host()),
                self.settings.sfq_perturb,
            ),
        )?;

        log::info!("{}: created class {} ({} / {})", device, classid, rate, ceil);
        Ok(Change::Created)
    }

    /// Add the u32 filter steering `address` into its class, once
    pub fn ensure_host_filter(
        &self,
        device: &str,
        address: &HostAddress,
        field: MatchField,
    ) -> Result<Change, ShapeError> {
        let classid = host_class_id(address)?;
        self.check_device(device)?;

        let filters = self.filters(device, Some(Handle::ROOT))?;

        for other in filters
            .iter()
            .filter(|f| f.flow_id != Some(classid) && f.matches_address(field, address.to_ipv4()))
        {
            log::warn!(
                "{}: {} is already matched by a filter to {:?}",
                device,
                address,
                other.flow_id
            );
        }

        if filters.iter().any(|f| f.flow_id == Some(classid)) {
            log::debug!("{}: filter for flowid {} already present", device, classid);
            return Ok(Change::Unchanged);
        }

        self.exec(
            TC,
            command::add_address_filter(
                device,
                Handle::ROOT,
                &self.settings.protocol,
                self.settings.filter_prio,
                field,
                address,
                classid,
            ),
        )?;

        log::info!(
            "{}: filter {} {} -> flowid {}",
            device,
            field.as_str(),
            address,
            classid
        );
        Ok(Change::Created)
    }

    /// Delete the filter(s) and class belonging to `address`
    pub fn remove_host_shaping(
        &self,
        device: &str,
        address: &HostAddress,
    ) -> Result<Change, ShapeError> {
        let classid = host_class_id(address)?;
        self.check_device(device)?;
        if !self.has_htb_root(device)? {
            return Err(ShapeError::NoRootQdisc(device.to_string()));
        }

        let mut change = Change::Unchanged;

        let filters = self.filters(device, Some(Handle::ROOT))?;
        for filter in filters.iter().filter(|f| f.flow_id == Some(classid)) {
            let Some(fh) = filter.handle.as_deref() else {
                continue;
            };
            let prio = filter.pref.unwrap_or(self.settings.filter_prio);
            let protocol = filter
                .protocol
                .as_deref()
                .unwrap_or(&self.settings.protocol);

            self.exec(
                TC,
                command::del_u32_filter(device, Handle::ROOT, protocol, prio, fh),
            )?;
            change = Change::Removed;
        }

        let class_exists = self
            .classes(device, ClassScope::Parent(Handle::TOP_CLASS))?
            .iter()
            .any(|c| c.id == classid);

        if class_exists {
            self.exec(
                TC,
                command::del_class(device, Handle::TOP_CLASS, classid),
            )?;
            change = Change::Removed;
        }

        match change {
            Change::Removed => log::info!("{}: removed shaping for {}", device, address),
            _ => log::debug!("{}: nothing to remove for {}", device, address),
        }

        Ok(change)
    }

    /// Drop the htb root, and with it every class and filter below it
    pub fn clear_root(&self, device: &str) -> Result<Change, ShapeError> {
        self.check_device(device)?;
        if !self.has_htb_root(device)? {
            return Err(ShapeError::NoRootQdisc(device.to_string()));
        }

        self.exec(TC, command::del_root(device))?;
        log::info!("{}: removed htb root", device);
        Ok(Change::Removed)
    }

    /// `ip link set dev <device> up`
    pub fn set_link_up(&self, device: &str) -> Result<(), ShapeError> {
        self.exec(IP, command::link_up(device)).map(|_| ())
    }
}

/// Class id for a host, rejecting octets that collide with `1:` and `1:1`
fn host_class_id(address: &HostAddress) -> Result<Handle, ShapeError> {
    match address.host() {
        host @ (0 | 1) => Err(ShapeError::ReservedHost(host)),
        host => Ok(Handle::host_class(host)),
    }
}
