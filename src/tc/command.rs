// Argument lists for the tc and ip commands the controller issues

use super::handle::Handle;
use crate::address::HostAddress;
use crate::rate::Rate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Add,
    Replace,
    Del,
    Show,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Add => "add",
            Verb::Replace => "replace",
            Verb::Del => "del",
            Verb::Show => "show",
        }
    }
}

/// Which address field a u32 filter matches on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    /// Source address, used for egress shaping
    Src,
    /// Destination address, used for ingress shaping on the IFB device
    Dst,
}

impl MatchField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchField::Src => "src",
            MatchField::Dst => "dst",
        }
    }

    /// Byte offset of the field in the IPv4 header, as printed by `tc filter show`
    pub fn header_offset(&self) -> u32 {
        match self {
            MatchField::Src => 12,
            MatchField::Dst => 16,
        }
    }
}

/// Scope of a `tc class show` listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassScope {
    All,
    Parent(Handle),
}

/// An HTB class with its guaranteed rate and ceiling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtbClass {
    pub parent: Handle,
    pub classid: Handle,
    pub rate: Rate,
    pub ceil: Rate,
}

struct Args(Vec<String>);

impl Args {
    fn new(object: &str, verb: Verb, device: &str) -> Self {
        Args(vec![
            object.to_string(),
            verb.as_str().to_string(),
            "dev".to_string(),
            device.to_string(),
        ])
    }

    fn words(mut self, words: &[&str]) -> Self {
        self.0.extend(words.iter().map(|w| w.to_string()));
        self
    }

    fn handle(mut self, keyword: &str, handle: Handle) -> Self {
        self.0.push(keyword.to_string());
        self.0.push(handle.to_string());
        self
    }

    fn value(mut self, keyword: &str, value: impl ToString) -> Self {
        self.0.push(keyword.to_string());
        self.0.push(value.to_string());
        self
    }

    fn finish(self) -> Vec<String> {
        self.0
    }
}

/// `ip -o link show`
pub fn list_links() -> Vec<String> {
    vec!["-o".to_string(), "link".to_string(), "show".to_string()]
}

/// `ip link set dev <device> up`
pub fn link_up(device: &str) -> Vec<String> {
    ["link", "set", "dev", device, "up"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// `tc -V`
pub fn version() -> Vec<String> {
    vec!["-V".to_string()]
}

pub fn qdisc_show(device: &str) -> Vec<String> {
    Args::new("qdisc", Verb::Show, device).finish()
}

pub fn class_show(device: &str, scope: ClassScope) -> Vec<String> {
    let args = Args::new("class", Verb::Show, device);
    match scope {
        ClassScope::All => args.finish(),
        ClassScope::Parent(parent) => args.handle("parent", parent).finish(),
    }
}

pub fn filter_show(device: &str, parent: Option<Handle>) -> Vec<String> {
    let args = Args::new("filter", Verb::Show, device);
    match parent {
        Some(parent) => args.handle("parent", parent).finish(),
        None => args.finish(),
    }
}

/// `tc qdisc add dev D root handle 1: htb default <class>`
pub fn add_htb_root(device: &str, default_class: u32) -> Vec<String> {
    Args::new("qdisc", Verb::Add, device)
        .words(&["root"])
        .handle("handle", Handle::ROOT)
        .words(&["htb"])
        .value("default", format!("{:x}", default_class))
        .finish()
}

/// `tc qdisc add dev D parent <class> handle <leaf> sfq perturb <secs>`
pub fn add_sfq_leaf(device: &str, parent: Handle, handle: Handle, perturb: u32) -> Vec<String> {
    Args::new("qdisc", Verb::Add, device)
        .handle("parent", parent)
        .handle("handle", handle)
        .words(&["sfq"])
        .value("perturb", perturb)
        .finish()
}

/// `tc qdisc add dev D handle ffff: ingress`
pub fn add_ingress(device: &str) -> Vec<String> {
    Args::new("qdisc", Verb::Add, device)
        .handle("handle", Handle::INGRESS)
        .words(&["ingress"])
        .finish()
}

/// `tc qdisc del dev D root`
pub fn del_root(device: &str) -> Vec<String> {
    Args::new("qdisc", Verb::Del, device)
        .words(&["root"])
        .finish()
}

/// `tc qdisc del dev D ingress`
pub fn del_ingress(device: &str) -> Vec<String> {
    Args::new("qdisc", Verb::Del, device)
        .words(&["ingress"])
        .finish()
}

/// `tc class add|replace dev D parent P classid C htb rate R ceil C`
pub fn htb_class(verb: Verb, device: &str, class: &HtbClass) -> Vec<String> {
    Args::new("class", verb, device)
        .handle("parent", class.parent)
        .handle("classid", class.classid)
        .words(&["htb"])
        .value("rate", &class.rate)
        .value("ceil", &class.ceil)
        .finish()
}

/// `tc class del dev D parent P classid C`
pub fn del_class(device: &str, parent: Handle, classid: Handle) -> Vec<String> {
    Args::new("class", Verb::Del, device)
        .handle("parent", parent)
        .handle("classid", classid)
        .finish()
}

/// `tc filter add dev D parent P protocol ip prio N u32 match ip src|dst A flowid F`
pub fn add_address_filter(
    device: &str,
    parent: Handle,
    protocol: &str,
    prio: u32,
    field: MatchField,
    address: &HostAddress,
    flowid: Handle,
) -> Vec<String> {
    Args::new("filter", Verb::Add, device)
        .handle("parent", parent)
        .value("protocol", protocol)
        .value("prio", prio)
        .words(&["u32", "match", "ip", field.as_str()])
        .words(&[address.to_string().as_str()])
        .handle("flowid", flowid)
        .finish()
}

/// `tc filter del dev D parent P protocol ip prio N handle FH u32`
pub fn del_u32_filter(
    device: &str,
    parent: Handle,
    protocol: &str,
    prio: u32,
    filter_handle: &str,
) -> Vec<String> {
    Args::new("filter", Verb::Del, device)
        .handle("parent", parent)
        .value("protocol", protocol)
        .value("prio", prio)
        .value("handle", filter_handle)
        .words(&["u32"])
        .finish()
}

/// Redirect everything arriving on the ingress qdisc to `target`
///
/// `tc filter add dev D parent ffff: protocol ip u32 match u32 0 0 action mirred egress redirect dev T`
pub fn add_redirect(device: &str, protocol: &str, target: &str) -> Vec<String> {
    Args::new("filter", Verb::Add, device)
        .handle("parent", Handle::INGRESS)
        .value("protocol", protocol)
        .words(&["u32", "match", "u32", "0", "0"])
        .words(&["action", "mirred", "egress", "redirect", "dev", target])
        .finish()
}
