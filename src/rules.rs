use crate::error::Result;
use crate::mac::MacAddress;
use crate::network::compose_interface;
use crate::platform::FilterEngine;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

pub const FORWARD_CHAIN: &str = "FORWARD";

/// Upper bound on `-D` passes for one rule; stops a misbehaving engine from
/// looping forever.
const MAX_DELETE_PASSES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Only listed MACs pass
    #[value(alias = "allow")]
    Whitelist,
    /// Listed MACs are dropped
    #[value(alias = "deny")]
    Blacklist,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Whitelist, Mode::Blacklist];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Whitelist => "whitelist",
            Mode::Blacklist => "blacklist",
        }
    }

    /// Target of the per-address rules.
    pub fn member_target(self) -> Target {
        match self {
            Mode::Whitelist => Target::Accept,
            Mode::Blacklist => Target::Drop,
        }
    }

    /// Target of the catch-all rule.
    pub fn default_target(self) -> Target {
        self.member_target().inverse()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whitelist" | "allow" => Ok(Mode::Whitelist),
            "blacklist" | "deny" => Ok(Mode::Blacklist),
            other => Err(format!("unknown mode '{}', expected whitelist or blacklist", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Accept,
    Drop,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Target::Accept => "ACCEPT",
            Target::Drop => "DROP",
        }
    }

    pub fn inverse(self) -> Target {
        match self {
            Target::Accept => Target::Drop,
            Target::Drop => Target::Accept,
        }
    }

    fn parse(s: &str) -> Option<Target> {
        match s {
            "ACCEPT" => Some(Target::Accept),
            "DROP" => Some(Target::Drop),
            _ => None,
        }
    }
}

/// Match part of a forwarding rule: input interface, optional source MAC,
/// and jump target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleSpec {
    pub interface: String,
    pub source: Option<MacAddress>,
    pub target: Target,
}

impl RuleSpec {
    pub fn catch_all(interface: &str, target: Target) -> Self {
        Self {
            interface: interface.to_string(),
            source: None,
            target,
        }
    }

    pub fn for_mac(interface: &str, mac: MacAddress, target: Target) -> Self {
        Self {
            interface: interface.to_string(),
            source: Some(mac),
            target,
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["-i".to_string(), self.interface.clone()];
        if let Some(mac) = &self.source {
            args.extend([
                "-m".to_string(),
                "mac".to_string(),
                "--mac-source".to_string(),
                mac.to_string(),
            ]);
        }
        args.extend(["-j".to_string(), self.target.as_str().to_string()]);
        args
    }

    /// Parses one line of `iptables -S <chain>` output. Only rules with
    /// exactly the shape this tool installs are recognised.
    pub fn parse_listing(line: &str, chain: &str) -> Option<RuleSpec> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["-A", c, "-i", iface, "-j", target] if *c == chain => {
                Some(RuleSpec::catch_all(iface, Target::parse(target)?))
            }
            ["-A", c, "-i", iface, "-m", "mac", "--mac-source", mac, "-j", target]
                if *c == chain =>
            {
                Some(RuleSpec::for_mac(
                    iface,
                    mac.parse().ok()?,
                    Target::parse(target)?,
                ))
            }
            _ => None,
        }
    }
}

impl fmt::Display for RuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args().join(" "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Delete,
    Insert,
    Append,
}

impl Op {
    pub fn flag(self) -> &'static str {
        match self {
            Op::Delete => "-D",
            Op::Insert => "-I",
            Op::Append => "-A",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub op: Op,
    pub rule: RuleSpec,
}

#[derive(Debug, Clone)]
pub struct RulePlan {
    pub chain: String,
    pub interface: String,
    pub mode: Mode,
    pub steps: Vec<Step>,
}

impl RulePlan {
    /// Shell-ready command lines equivalent to executing the plan.
    pub fn commands(&self, binary: &str) -> Vec<String> {
        self.steps
            .iter()
            .map(|step| format!("{} {} {} {}", binary, step.op.flag(), self.chain, step.rule))
            .collect()
    }

    fn planned_members(&self) -> impl Iterator<Item = &RuleSpec> {
        self.steps
            .iter()
            .filter(|s| s.op == Op::Insert)
            .map(|s| &s.rule)
    }

    pub fn address_count(&self) -> usize {
        self.planned_members().count()
    }
}

/// Computes the rule sequence for `addresses` on `interface[.vlan]`:
/// drop both old defaults, insert one rule per address, append the
/// inverse catch-all.
pub fn project<'a>(
    mode: Mode,
    interface: &str,
    vlan: Option<u16>,
    addresses: impl IntoIterator<Item = &'a MacAddress>,
) -> Result<RulePlan> {
    let ifname = compose_interface(interface, vlan)?;
    let addresses: BTreeSet<&MacAddress> = addresses.into_iter().collect();

    let mut steps = vec![
        Step {
            op: Op::Delete,
            rule: RuleSpec::catch_all(&ifname, Target::Accept),
        },
        Step {
            op: Op::Delete,
            rule: RuleSpec::catch_all(&ifname, Target::Drop),
        },
    ];

    steps.extend(addresses.into_iter().map(|mac| Step {
        op: Op::Insert,
        rule: RuleSpec::for_mac(&ifname, *mac, mode.member_target()),
    }));

    steps.push(Step {
        op: Op::Append,
        rule: RuleSpec::catch_all(&ifname, mode.default_target()),
    });

    debug!("Projected {} steps for {} ({})", steps.len(), ifname, mode);

    Ok(RulePlan {
        chain: FORWARD_CHAIN.to_string(),
        interface: ifname,
        mode,
        steps,
    })
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub defaults_removed: usize,
    pub swept: usize,
    pub inserted: usize,
    pub already_present: usize,
}

/// Per-MAC rules installed on the plan's interface that the plan does not
/// want, plus surplus copies of the ones it does.
fn unwanted_member_rules(plan: &RulePlan, listing: &[String]) -> Vec<RuleSpec> {
    let wanted: BTreeSet<String> = plan.planned_members().map(ToString::to_string).collect();
    let mut seen: HashMap<String, usize> = HashMap::new();

    listing
        .iter()
        .filter_map(|line| RuleSpec::parse_listing(line, &plan.chain))
        .filter(|rule| rule.interface == plan.interface && rule.source.is_some())
        .filter(|rule| {
            let key = rule.to_string();
            let count = seen.entry(key.clone()).or_insert(0);
            *count += 1;
            !wanted.contains(&key) || *count > 1
        })
        .collect()
}

fn purge(engine: &mut dyn FilterEngine, chain: &str, rule: &RuleSpec) -> Result<usize> {
    let mut removed = 0;
    while removed < MAX_DELETE_PASSES && engine.exists(chain, rule)? {
        engine.delete(chain, rule)?;
        removed += 1;
    }
    Ok(removed)
}

/// Executes `plan` against `engine`. Safe to repeat: existing rules are
/// kept rather than duplicated, and stale or conflicting per-MAC rules on
/// the same interface are removed first.
pub fn apply_plan(engine: &mut dyn FilterEngine, plan: &RulePlan) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();

    let listing = engine.list(&plan.chain)?;
    for rule in unwanted_member_rules(plan, &listing) {
        debug!("Sweeping stale rule: {}", rule);
        engine.delete(&plan.chain, &rule)?;
        report.swept += 1;
    }

    for step in &plan.steps {
        match step.op {
            Op::Delete => {
                report.defaults_removed += purge(engine, &plan.chain, &step.rule)?;
            }
            Op::Insert | Op::Append => {
                if engine.exists(&plan.chain, &step.rule)? {
                    debug!("Already present: {}", step.rule);
                    report.already_present += 1;
                    continue;
                }
                if step.op == Op::Insert {
                    engine.insert(&plan.chain, &step.rule)?;
                } else {
                    engine.append(&plan.chain, &step.rule)?;
                }
                report.inserted += 1;
            }
        }
    }

    info!(
        "Applied {} rules to {} on {} ({} already present, {} defaults and {} stale rules removed)",
        report.inserted,
        plan.chain,
        plan.interface,
        report.already_present,
        report.defaults_removed,
        report.swept
    );

    Ok(report)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub present: Vec<RuleSpec>,
    pub missing: Vec<RuleSpec>,
    pub unexpected: Vec<RuleSpec>,
}

impl VerifyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// Compares the installed chain with what `plan` would produce.
pub fn verify_plan(engine: &mut dyn FilterEngine, plan: &RulePlan) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();
    let reinstalled: Vec<&RuleSpec> = plan
        .steps
        .iter()
        .filter(|s| s.op != Op::Delete)
        .map(|s| &s.rule)
        .collect();

    for step in &plan.steps {
        let present = engine.exists(&plan.chain, &step.rule)?;
        match step.op {
            Op::Insert | Op::Append if present => report.present.push(step.rule.clone()),
            Op::Insert | Op::Append => report.missing.push(step.rule.clone()),
            Op::Delete if present && !reinstalled.contains(&&step.rule) => {
                report.unexpected.push(step.rule.clone());
            }
            Op::Delete => {}
        }
    }

    let listing = engine.list(&plan.chain)?;
    report.unexpected.extend(unwanted_member_rules(plan, &listing));
    report.unexpected.extend(misplaced_catch_alls(plan, &listing));

    Ok(report)
}

/// Copies of the plan's catch-all that shadow a per-MAC rule on the same
/// interface, or that duplicate the one kept at the end.
fn misplaced_catch_alls(plan: &RulePlan, listing: &[String]) -> Vec<RuleSpec> {
    let catch_all = RuleSpec::catch_all(&plan.interface, plan.mode.default_target());
    let installed: Vec<RuleSpec> = listing
        .iter()
        .filter_map(|line| RuleSpec::parse_listing(line, &plan.chain))
        .filter(|rule| rule.interface == plan.interface)
        .collect();
    let last_member = installed.iter().rposition(|rule| rule.source.is_some());

    let mut kept = false;
    let mut misplaced = Vec::new();
    for (index, rule) in installed.iter().enumerate() {
        if *rule != catch_all {
            continue;
        }
        let shadows = last_member.is_some_and(|last| index < last);
        if shadows || kept {
            misplaced.push(rule.clone());
        } else {
            kept = true;
        }
    }
    misplaced
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_whitelist_on_vlan_sequence() {
        let a = mac("aa:aa:aa:aa:aa:01");
        let b = mac("aa:aa:aa:aa:aa:02");
        let plan = project(Mode::Whitelist, "eth0", Some(10), [&b, &a]).unwrap();

        assert_eq!(plan.interface, "eth0.10");
        assert_eq!(
            plan.steps,
            vec![
                Step { op: Op::Delete, rule: RuleSpec::catch_all("eth0.10", Target::Accept) },
                Step { op: Op::Delete, rule: RuleSpec::catch_all("eth0.10", Target::Drop) },
                Step { op: Op::Insert, rule: RuleSpec::for_mac("eth0.10", a, Target::Accept) },
                Step { op: Op::Insert, rule: RuleSpec::for_mac("eth0.10", b, Target::Accept) },
                Step { op: Op::Append, rule: RuleSpec::catch_all("eth0.10", Target::Drop) },
            ]
        );
    }

    #[test]
    fn test_blacklist_inverts_targets() {
        let a = mac("00:11:22:33:44:55");
        let plan = project(Mode::Blacklist, "eth1", None, [&a]).unwrap();

        assert_eq!(plan.steps[2].rule.target, Target::Drop);
        assert_eq!(plan.steps[3].op, Op::Append);
        assert_eq!(plan.steps[3].rule.target, Target::Accept);
    }

    #[test]
    fn test_empty_list_still_installs_catch_all() {
        let plan = project(Mode::Whitelist, "eth0", None, []).unwrap();
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.address_count(), 0);
        assert_eq!(plan.steps[2].rule, RuleSpec::catch_all("eth0", Target::Drop));
    }

    #[test]
    fn test_rendered_commands() {
        let a = mac("aa-bb-cc-dd-ee-ff");
        let plan = project(Mode::Whitelist, "eth0", Some(10), [&a]).unwrap();
        assert_eq!(
            plan.commands("iptables"),
            vec![
                "iptables -D FORWARD -i eth0.10 -j ACCEPT",
                "iptables -D FORWARD -i eth0.10 -j DROP",
                "iptables -I FORWARD -i eth0.10 -m mac --mac-source AA:BB:CC:DD:EE:FF -j ACCEPT",
                "iptables -A FORWARD -i eth0.10 -j DROP",
            ]
        );
    }

    #[test]
    fn test_invalid_interface_is_rejected() {
        assert!(project(Mode::Whitelist, "eth0; rm -rf /", None, []).is_err());
    }

    #[test]
    fn test_parse_listing() {
        let line = "-A FORWARD -i eth0 -m mac --mac-source AA:BB:CC:DD:EE:FF -j ACCEPT";
        assert_eq!(
            RuleSpec::parse_listing(line, "FORWARD"),
            Some(RuleSpec::for_mac("eth0", mac("AA:BB:CC:DD:EE:FF"), Target::Accept))
        );
        assert_eq!(
            RuleSpec::parse_listing("-A FORWARD -i eth0 -j DROP", "FORWARD"),
            Some(RuleSpec::catch_all("eth0", Target::Drop))
        );
        assert_eq!(RuleSpec::parse_listing("-P FORWARD ACCEPT", "FORWARD"), None);
        assert_eq!(RuleSpec::parse_listing("-A INPUT -i eth0 -j DROP", "FORWARD"), None);
        assert_eq!(
            RuleSpec::parse_listing("-A FORWARD -i eth0 -p tcp -j DROP", "FORWARD"),
            None
        );
    }

    /// Chain held as `-S` lines; `-I` inserts at the top.
    #[derive(Default)]
    struct ChainEngine {
        rules: Vec<String>,
    }

    impl ChainEngine {
        fn seeded(lines: &[&str]) -> Self {
            Self {
                rules: lines.iter().map(|l| l.to_string()).collect(),
            }
        }

        fn line(chain: &str, rule: &RuleSpec) -> String {
            format!("-A {} {}", chain, rule)
        }
    }

    impl FilterEngine for ChainEngine {
        fn exists(&mut self, chain: &str, rule: &RuleSpec) -> Result<bool> {
            Ok(self.rules.contains(&Self::line(chain, rule)))
        }

        fn insert(&mut self, chain: &str, rule: &RuleSpec) -> Result<()> {
            self.rules.insert(0, Self::line(chain, rule));
            Ok(())
        }

        fn append(&mut self, chain: &str, rule: &RuleSpec) -> Result<()> {
            self.rules.push(Self::line(chain, rule));
            Ok(())
        }

        fn delete(&mut self, chain: &str, rule: &RuleSpec) -> Result<()> {
            let line = Self::line(chain, rule);
            if let Some(index) = self.rules.iter().position(|r| *r == line) {
                self.rules.remove(index);
            }
            Ok(())
        }

        fn list(&mut self, _chain: &str) -> Result<Vec<String>> {
            Ok(self.rules.clone())
        }
    }

    /// Reports every rule as present and never removes anything.
    #[derive(Default)]
    struct StuckEngine {
        deletes: usize,
    }

    impl FilterEngine for StuckEngine {
        fn exists(&mut self, _chain: &str, _rule: &RuleSpec) -> Result<bool> {
            Ok(true)
        }

        fn insert(&mut self, _chain: &str, _rule: &RuleSpec) -> Result<()> {
            Ok(())
        }

        fn append(&mut self, _chain: &str, _rule: &RuleSpec) -> Result<()> {
            Ok(())
        }

        fn delete(&mut self, _chain: &str, _rule: &RuleSpec) -> Result<()> {
            self.deletes += 1;
            Ok(())
        }

        fn list(&mut self, _chain: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    const ACCEPT_A: &str = "-A FORWARD -i eth0 -m mac --mac-source AA:AA:AA:AA:AA:01 -j ACCEPT";
    const DROP_ALL: &str = "-A FORWARD -i eth0 -j DROP";
    const ACCEPT_ALL: &str = "-A FORWARD -i eth0 -j ACCEPT";

    fn whitelist_a() -> RulePlan {
        let a = mac("AA:AA:AA:AA:AA:01");
        project(Mode::Whitelist, "eth0", None, [&a]).unwrap()
    }

    #[test]
    fn test_apply_collapses_duplicates() {
        let mut engine =
            ChainEngine::seeded(&[ACCEPT_A, DROP_ALL, ACCEPT_A, ACCEPT_ALL, DROP_ALL]);

        let report = apply_plan(&mut engine, &whitelist_a()).unwrap();

        assert_eq!(report.swept, 1);
        assert_eq!(report.defaults_removed, 3);
        assert_eq!(report.already_present, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(engine.rules, vec![ACCEPT_A, DROP_ALL]);
    }

    #[test]
    fn test_delete_passes_are_bounded() {
        let mut engine = StuckEngine::default();
        let rule = RuleSpec::catch_all("eth0", Target::Drop);

        let removed = purge(&mut engine, FORWARD_CHAIN, &rule).unwrap();

        assert_eq!(removed, MAX_DELETE_PASSES);
        assert_eq!(engine.deletes, MAX_DELETE_PASSES);
    }

    #[test]
    fn test_verify_flags_shadowing_catch_all() {
        let mut engine = ChainEngine::seeded(&[DROP_ALL, ACCEPT_A, DROP_ALL]);

        let report = verify_plan(&mut engine, &whitelist_a()).unwrap();

        assert!(!report.is_consistent());
        assert!(report.missing.is_empty());
        assert_eq!(report.unexpected, vec![RuleSpec::catch_all("eth0", Target::Drop)]);
    }

    #[test]
    fn test_verify_flags_duplicate_catch_all() {
        let mut engine = ChainEngine::seeded(&[ACCEPT_A, DROP_ALL, DROP_ALL]);

        let report = verify_plan(&mut engine, &whitelist_a()).unwrap();

        assert_eq!(report.unexpected, vec![RuleSpec::catch_all("eth0", Target::Drop)]);
    }

    #[test]
    fn test_verify_accepts_applied_chain() {
        let mut engine = ChainEngine::default();
        let plan = whitelist_a();
        apply_plan(&mut engine, &plan).unwrap();

        let report = verify_plan(&mut engine, &plan).unwrap();

        assert!(report.is_consistent(), "{:?}", report);
        assert_eq!(report.present.len(), 2);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("Whitelist".parse::<Mode>().unwrap(), Mode::Whitelist);
        assert_eq!("deny".parse::<Mode>().unwrap(), Mode::Blacklist);
        assert!("greylist".parse::<Mode>().is_err());
    }
}
