//! Typed views over `tc ... show` and `ip -o link show` output
//!
//! iproute2 has no structured query mode we can rely on everywhere, so the
//! controller reads its human-readable listings. All of that text handling
//! lives here; callers only see `Qdisc`, `Class` and `Filter` records.
//! Unknown words are skipped so newer iproute2 releases that add fields keep
//! parsing.

use super::command::MatchField;
use super::handle::Handle;
use std::net::Ipv4Addr;

/// One line of `tc qdisc show`
///
/// `qdisc htb 1: root refcnt 2 r2q 10 default 0x300 direct_packets_stat 0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qdisc {
    pub kind: String,
    pub handle: Option<Handle>,
    pub root: bool,
    pub parent: Option<Handle>,
    pub raw: String,
}

impl Qdisc {
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind.eq_ignore_ascii_case(kind)
    }

    pub fn is_htb_root(&self) -> bool {
        self.is_kind("htb") && self.root
    }
}

/// One line of `tc class show`
///
/// `class htb 1:10 parent 1:1 leaf 10: prio 0 rate 1Mbit ceil 1Mbit burst 1600b cburst 1600b`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Class {
    pub kind: String,
    pub id: Handle,
    pub root: bool,
    pub parent: Option<Handle>,
    pub leaf: Option<Handle>,
    pub rate: Option<String>,
    pub ceil: Option<String>,
    pub raw: String,
}

/// A `match VALUE/MASK at OFFSET` selector of a u32 filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U32Match {
    pub value: u32,
    pub mask: u32,
    pub offset: u32,
}

impl U32Match {
    /// The exact address this selector matches in `field`, if any
    pub fn address(&self, field: MatchField) -> Option<Ipv4Addr> {
        (self.mask == u32::MAX && self.offset == field.header_offset())
            .then(|| Ipv4Addr::from(self.value))
    }
}

/// A filter record from `tc filter show`, with its indented detail lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub parent: Option<Handle>,
    pub protocol: Option<String>,
    pub pref: Option<u32>,
    pub kind: Option<String>,
    /// Filter handle (`fh`), e.g. `800::800`
    pub handle: Option<String>,
    pub flow_id: Option<Handle>,
    pub matches: Vec<U32Match>,
    /// Device named by a `mirred ... Redirect to device X` action
    pub redirect: Option<String>,
    pub raw: String,
}

impl Filter {
    fn new(raw: &str) -> Self {
        Self {
            parent: None,
            protocol: None,
            pref: None,
            kind: None,
            handle: None,
            flow_id: None,
            matches: Vec::new(),
            redirect: None,
            raw: raw.to_string(),
        }
    }

    pub fn matches_address(&self, field: MatchField, addr: Ipv4Addr) -> bool {
        self.matches.iter().any(|m| m.address(field) == Some(addr))
    }
}

/// Interface names from `ip -o link show`
///
/// `2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 ...`
/// `5: veth1@if4: <...>` yields `veth1`
pub fn parse_links<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    lines
        .into_iter()
        .filter_map(|line| {
            let mut parts = line.splitn(3, ": ");
            let index = parts.next()?;
            if !index.trim().bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let name = parts.next()?.trim();
            let name = name.split('@').next().unwrap_or(name);
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

pub fn parse_qdiscs<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<Qdisc> {
    lines.into_iter().filter_map(parse_qdisc).collect()
}

fn parse_qdisc(line: &str) -> Option<Qdisc> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if !tokens.first()?.eq_ignore_ascii_case("qdisc") {
        return None;
    }

    let mut qdisc = Qdisc {
        kind: tokens.get(1)?.to_string(),
        handle: tokens.get(2).and_then(|t| t.parse().ok()),
        root: false,
        parent: None,
        raw: line.trim_end().to_string(),
    };

    let mut rest = tokens.iter().skip(3);
    while let Some(token) = rest.next() {
        match *token {
            "root" => qdisc.root = true,
            "parent" => qdisc.parent = rest.next().and_then(|t| t.parse().ok()),
            _ => {}
        }
    }

    Some(qdisc)
}

pub fn parse_classes<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<Class> {
    lines.into_iter().filter_map(parse_class).collect()
}

fn parse_class(line: &str) -> Option<Class> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if !tokens.first()?.eq_ignore_ascii_case("class") {
        return None;
    }

    let mut class = Class {
        kind: tokens.get(1)?.to_string(),
        id: tokens.get(2)?.parse().ok()?,
        root: false,
        parent: None,
        leaf: None,
        rate: None,
        ceil: None,
        raw: line.trim_end().to_string(),
    };

    let mut rest = tokens.iter().skip(3);
    while let Some(token) = rest.next() {
        match *token {
            "root" => class.root = true,
            "parent" => class.parent = rest.next().and_then(|t| t.parse().ok()),
            "leaf" => class.leaf = rest.next().and_then(|t| t.parse().ok()),
            "rate" => class.rate = rest.next().map(|t| t.to_string()),
            "ceil" => class.ceil = rest.next().map(|t| t.to_string()),
            _ => {}
        }
    }

    Some(class)
}

/// Group `tc filter show` output into filter records
///
/// A record starts at a line beginning with `filter`; indented `match` and
/// `action` lines belong to the record above them.
pub fn parse_filters<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<Filter> {
    let mut filters: Vec<Filter> = Vec::new();

    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with("filter ") && !line.starts_with(char::is_whitespace) {
            filters.push(parse_filter_header(line));
            continue;
        }

        let Some(current) = filters.last_mut() else {
            continue;
        };
        current.raw.push('\n');
        current.raw.push_str(line.trim_end());

        if let Some(selector) = trimmed.strip_prefix("match ") {
            if let Some(m) = parse_u32_match(selector) {
                current.matches.push(m);
            }
        } else if trimmed.contains("mirred") {
            current.redirect = parse_redirect_target(trimmed).or(current.redirect.take());
        }
    }

    filters
}

fn parse_filter_header(line: &str) -> Filter {
    let mut filter = Filter::new(line.trim_end());
    let mut rest = line.split_whitespace().skip(1);

    while let Some(token) = rest.next() {
        match token {
            "parent" => filter.parent = rest.next().and_then(|t| t.parse().ok()),
            "protocol" => filter.protocol = rest.next().map(|t| t.to_string()),
            "pref" | "prio" => {
                filter.pref = rest.next().and_then(|t| t.parse().ok());
                filter.kind = rest.next().map(|t| t.to_string());
            }
            "fh" => filter.handle = rest.next().map(|t| t.to_string()),
            "flowid" | "classid" => filter.flow_id = rest.next().and_then(|t| t.parse().ok()),
            _ => {}
        }
    }

    filter
}

/// `0a0a0a0a/ffffffff at 12`
fn parse_u32_match(selector: &str) -> Option<U32Match> {
    let mut words = selector.split_whitespace();
    let (value, mask) = words.next()?.split_once('/')?;
    if words.next()? != "at" {
        return None;
    }
    let offset = words.next()?.parse().ok()?;

    Some(U32Match {
        value: u32::from_str_radix(value, 16).ok()?,
        mask: u32::from_str_radix(mask, 16).ok()?,
        offset,
    })
}

/// `action order 1: mirred (Egress Redirect to device ifb0) stolen`
fn parse_redirect_target(line: &str) -> Option<String> {
    let mut words = line.split_whitespace();
    words.find(|w| *w == "device")?;
    let target = words.next()?.trim_end_matches(')');
    (!target.is_empty()).then(|| target.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const QDISCS: &str = "\
qdisc htb 1: root refcnt 2 r2q 10 default 0x300 direct_packets_stat 3 direct_qlen 1000
qdisc sfq 10: parent 1:10 limit 127p quantum 1514b depth 127 divisor 1024 perturb 10sec
qdisc ingress ffff: parent ffff:fff1 ----------------
";

    const CLASSES: &str = "\
class htb 1:1 root rate 10Gbit ceil 10Gbit burst 0b cburst 0b
class htb 1:10 parent 1:1 leaf 10: prio 0 rate 1Mbit ceil 2Mbit burst 1600b cburst 1600b
";

    const FILTERS: &str = "\
filter parent 1: protocol ip pref 10 u32 chain 0
filter parent 1: protocol ip pref 10 u32 chain 0 fh 800: ht divisor 1
filter parent 1: protocol ip pref 10 u32 chain 0 fh 800::800 order 2048 key ht 800 bkt 0 flowid 1:10 not_in_hw
  match 0a0a0a0a/ffffffff at 12
filter parent 1: protocol ip pref 10 u32 chain 0 fh 800::801 order 2049 key ht 800 bkt 0 flowid 1:20 not_in_hw
  match 0a0a0a14/ffffffff at 16
";

    const REDIRECT: &str = "\
filter parent ffff: protocol ip pref 49152 u32 chain 0
filter parent ffff: protocol ip pref 49152 u32 chain 0 fh 800: ht divisor 1
filter parent ffff: protocol ip pref 49152 u32 chain 0 fh 800::800 order 2048 key ht 800 bkt 0 terminal flowid ??? not_in_hw
  match 00000000/00000000 at 0
\taction order 1: mirred (Egress Redirect to device ifb0) stolen
 \tindex 1 ref 1 bind 1
";

    #[test]
    fn test_parse_qdiscs() {
        let qdiscs = parse_qdiscs(QDISCS.lines());
        assert_eq!(qdiscs.len(), 3);

        assert!(qdiscs[0].is_htb_root());
        assert_eq!(qdiscs[0].handle, Some(Handle::ROOT));

        assert!(qdiscs[1].is_kind("sfq"));
        assert!(!qdiscs[1].root);
        assert_eq!(qdiscs[1].parent, Some(Handle::host_class(10)));

        assert!(qdiscs[2].is_kind("INGRESS"));
        assert_eq!(qdiscs[2].handle, Some(Handle::INGRESS));
        assert_eq!(qdiscs[2].parent, Some(Handle::new(0xffff, 0xfff1)));
    }

    #[test]
    fn test_htb_root_is_case_insensitive() {
        let qdiscs = parse_qdiscs(["QDISC HTB 1: root refcnt 2"]);
        assert!(qdiscs[0].is_htb_root());
    }

    #[test]
    fn test_non_htb_root() {
        let qdiscs = parse_qdiscs([
            "qdisc noqueue 0: root refcnt 2",
            "qdisc fq_codel 0: root refcnt 2 limit 10240p flows 1024",
        ]);
        assert_eq!(qdiscs.len(), 2);
        assert!(qdiscs.iter().all(|q| !q.is_htb_root()));
    }

    #[test]
    fn test_parse_classes() {
        let classes = parse_classes(CLASSES.lines());
        assert_eq!(classes.len(), 2);

        assert_eq!(classes[0].id, Handle::TOP_CLASS);
        assert!(classes[0].root);
        assert_eq!(classes[0].rate.as_deref(), Some("10Gbit"));

        assert_eq!(classes[1].id, Handle::host_class(10));
        assert_eq!(classes[1].parent, Some(Handle::TOP_CLASS));
        assert_eq!(classes[1].leaf, Some(Handle::host_leaf(10)));
        assert_eq!(classes[1].ceil.as_deref(), Some("2Mbit"));
    }

    #[test]
    fn test_parse_filters() {
        let filters = parse_filters(FILTERS.lines());
        assert_eq!(filters.len(), 4);

        let src = &filters[2];
        assert_eq!(src.parent, Some(Handle::ROOT));
        assert_eq!(src.protocol.as_deref(), Some("ip"));
        assert_eq!(src.pref, Some(10));
        assert_eq!(src.kind.as_deref(), Some("u32"));
        assert_eq!(src.handle.as_deref(), Some("800::800"));
        assert_eq!(src.flow_id, Some(Handle::host_class(10)));
        assert!(src.matches_address(MatchField::Src, Ipv4Addr::new(10, 10, 10, 10)));
        assert!(!src.matches_address(MatchField::Dst, Ipv4Addr::new(10, 10, 10, 10)));

        let dst = &filters[3];
        assert_eq!(dst.flow_id, Some(Handle::host_class(20)));
        assert!(dst.matches_address(MatchField::Dst, Ipv4Addr::new(10, 10, 10, 20)));

        assert_eq!(filters[0].flow_id, None);
        assert_eq!(filters[1].handle.as_deref(), Some("800:"));
    }

    #[test]
    fn test_parse_redirect_filter() {
        let filters = parse_filters(REDIRECT.lines());
        assert_eq!(filters.len(), 3);

        let mirred = &filters[2];
        assert_eq!(mirred.parent, Some(Handle::INGRESS));
        assert_eq!(mirred.flow_id, None);
        assert_eq!(mirred.redirect.as_deref(), Some("ifb0"));
        assert_eq!(
            mirred.matches,
            vec![U32Match {
                value: 0,
                mask: 0,
                offset: 0
            }]
        );
        assert!(mirred.raw.contains("index 1 ref 1 bind 1"));
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_qdiscs("".lines()).is_empty());
        assert!(parse_classes("".lines()).is_empty());
        assert!(parse_filters("\n\n".lines()).is_empty());
    }

    #[test]
    fn test_parse_links() {
        let out = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN mode DEFAULT group default qlen 1000\\    link/loopback 00:00:00:00:00:00 brd 00:00:00:00:00:00
2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc htb state UP mode DEFAULT group default qlen 1000\\    link/ether 52:54:00:12:34:56 brd ff:ff:ff:ff:ff:ff
7: veth1@if6: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc noqueue state UP\\    link/ether 0a:58:0a:f4:00:01 brd ff:ff:ff:ff:ff:ff
garbage line
";
        assert_eq!(parse_links(out.lines()), vec!["lo", "eth0", "veth1"]);
    }
}
