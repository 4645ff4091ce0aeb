//! Runs the operations requested on the command line, in a fixed order:
//! import files, add, remove, list, apply, verify, history.

use crate::cli::Cli;
use crate::config::{AppliedConfig, load_config, save_config};
use crate::error::{FilterError, Result};
use crate::logger::{ApplyLog, ApplyRecord};
use crate::mac::MacAddress;
use crate::network;
use crate::platform::FilterEngine;
use crate::rules::{self, Mode, RulePlan};
use crate::store::{AddOutcome, ListStore, RemoveOutcome};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// Name shown in dry-run output.
const DISPLAY_BINARY: &str = "iptables";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// `--verify` found missing or unexpected rules.
    VerifyFailed,
}

/// Parameters resolved from flags and, with `--existing`, the saved config.
struct Resolved {
    list_mode: Option<Mode>,
    target: Option<AppliedConfig>,
}

fn resolve(cli: &Cli, dir: &Path) -> Result<Resolved> {
    if !cli.has_operation() {
        return Err(FilterError::MissingParameter(
            "an operation (--add, --remove, --file, --list, --apply, --verify or --history)".into(),
        ));
    }

    let saved = if cli.existing {
        Some(load_config(dir)?.ok_or_else(|| {
            FilterError::MissingParameter(
                "saved configuration for --existing (apply once with --interface and --mode)"
                    .into(),
            )
        })?)
    } else {
        None
    };

    let list_mode = cli.mode.or(saved.as_ref().map(|c| c.mode));
    if cli.edits_list() && list_mode.is_none() {
        return Err(FilterError::MissingParameter(
            "--mode (which list to change)".into(),
        ));
    }

    let target = if cli.apply || cli.verify {
        let interface = cli
            .interface
            .clone()
            .or_else(|| saved.as_ref().map(|c| c.interface.clone()))
            .ok_or_else(|| FilterError::MissingParameter("--interface".into()))?;
        let mode = list_mode.ok_or_else(|| FilterError::MissingParameter("--mode".into()))?;
        let vlan = cli.vlan.or(saved.as_ref().and_then(|c| c.vlan));
        let config = AppliedConfig {
            interface,
            vlan,
            mode,
        };
        config.composed_interface()?;
        Some(config)
    } else {
        None
    };

    Ok(Resolved { list_mode, target })
}

/// Connects on first use so that list-only runs never need the packet
/// filter or root.
fn engine_for<'a, E, F>(slot: &'a mut Option<E>, connect: &mut Option<F>) -> Result<&'a mut E>
where
    F: FnOnce() -> Result<E>,
{
    let engine = match (slot.take(), connect.take()) {
        (Some(engine), _) => engine,
        (None, Some(connect)) => connect()?,
        (None, None) => {
            return Err(FilterError::SystemError(
                "packet filter is unavailable".into(),
            ));
        }
    };
    Ok(slot.insert(engine))
}

fn parse_each<W: Write>(raw: &[String], out: &mut W) -> Result<Vec<MacAddress>> {
    let mut macs = Vec::with_capacity(raw.len());
    for item in raw {
        match item.parse::<MacAddress>() {
            Ok(mac) => macs.push(mac),
            Err(e) => {
                warn!("{}", e);
                writeln!(out, "Skipped: {}", e)?;
            }
        }
    }
    Ok(macs)
}

fn import_files<W: Write>(cli: &Cli, store: &mut ListStore, mode: Mode, out: &mut W) -> Result<()> {
    for path in &cli.files {
        match store.import_file(mode, path) {
            Ok(report) => {
                writeln!(
                    out,
                    "Imported {} into {}: {} added, {} already present, {} invalid",
                    path.display(),
                    mode,
                    report.added,
                    report.duplicates,
                    report.invalid.len()
                )?;
                for (line, text) in &report.invalid {
                    writeln!(out, "  {}:{}: invalid MAC '{}', skipped", path.display(), line, text)?;
                }
            }
            Err(e @ FilterError::ReadFile { .. }) => {
                warn!("{}", e);
                writeln!(out, "Skipped: {}", e)?;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn edit_lists<W: Write>(cli: &Cli, store: &mut ListStore, mode: Mode, out: &mut W) -> Result<()> {
    import_files(cli, store, mode, out)?;

    for mac in parse_each(&cli.add, out)? {
        match store.add(mode, mac)? {
            AddOutcome::Added => writeln!(out, "Added {} to {}", mac, mode)?,
            AddOutcome::AlreadyPresent => writeln!(out, "{} is already in {}", mac, mode)?,
        }
    }

    for mac in parse_each(&cli.remove, out)? {
        match store.remove(mode, &mac)? {
            RemoveOutcome::Removed => writeln!(out, "Removed {} from {}", mac, mode)?,
            RemoveOutcome::NotPresent => writeln!(out, "{} is not in {}", mac, mode)?,
        }
    }

    Ok(())
}

fn print_lists<W: Write>(store: &ListStore, mode: Option<Mode>, out: &mut W) -> Result<()> {
    let modes = match mode {
        Some(mode) => vec![mode],
        None => Mode::ALL.to_vec(),
    };

    for mode in modes {
        writeln!(out, "# {} ({} entries)", mode, store.len(mode))?;
        for mac in store.list(mode) {
            writeln!(out, "{}", mac)?;
        }
    }
    Ok(())
}

fn plan_for(store: &ListStore, config: &AppliedConfig) -> Result<RulePlan> {
    rules::project(
        config.mode,
        &config.interface,
        config.vlan,
        store.list(config.mode),
    )
}

fn apply<E: FilterEngine, W: Write>(
    engine: &mut E,
    store: &ListStore,
    config: &AppliedConfig,
    out: &mut W,
) -> Result<()> {
    let plan = plan_for(store, config)?;
    network::warn_if_missing(&plan.interface);

    let report = rules::apply_plan(engine, &plan)?;
    save_config(store.dir(), config)?;

    let record = ApplyRecord {
        timestamp: chrono::Utc::now(),
        interface: plan.interface.clone(),
        mode: plan.mode,
        addresses: plan.address_count(),
        inserted: report.inserted,
        removed: report.defaults_removed + report.swept,
    };
    if let Err(e) = ApplyLog::new(store.dir()).log_apply(&record) {
        warn!("Could not record apply history: {}", e);
    }

    writeln!(
        out,
        "Applied {} {} rules on {}: {} inserted, {} already present, {} removed",
        plan.address_count(),
        plan.mode,
        plan.interface,
        report.inserted,
        report.already_present,
        record.removed
    )?;
    Ok(())
}

fn verify<E: FilterEngine, W: Write>(
    engine: &mut E,
    store: &ListStore,
    config: &AppliedConfig,
    out: &mut W,
) -> Result<bool> {
    let plan = plan_for(store, config)?;
    let report = rules::verify_plan(engine, &plan)?;

    for rule in &report.present {
        writeln!(out, "ok          {} {}", plan.chain, rule)?;
    }
    for rule in &report.missing {
        writeln!(out, "MISSING     {} {}", plan.chain, rule)?;
    }
    for rule in &report.unexpected {
        writeln!(out, "UNEXPECTED  {} {}", plan.chain, rule)?;
    }

    let consistent = report.is_consistent();
    if consistent {
        writeln!(out, "{} matches the {} for {}", plan.chain, plan.mode, plan.interface)?;
    } else {
        writeln!(
            out,
            "{} differs from the {} for {}: {} missing, {} unexpected",
            plan.chain,
            plan.mode,
            plan.interface,
            report.missing.len(),
            report.unexpected.len()
        )?;
    }
    Ok(consistent)
}

fn print_history<W: Write>(dir: &Path, out: &mut W) -> Result<()> {
    let history = ApplyLog::new(dir).history()?;
    if history.is_empty() {
        writeln!(out, "No applies recorded")?;
    }
    for record in history {
        writeln!(
            out,
            "{} {} {}: {} addresses, {} inserted, {} removed",
            record.timestamp.to_rfc3339(),
            record.interface,
            record.mode,
            record.addresses,
            record.inserted,
            record.removed
        )?;
    }
    Ok(())
}

/// Executes everything `cli` asks for against the store in `dir`.
/// `connect` is called at most once, and only when rules are executed or
/// verified.
pub fn run<E, F, W>(cli: &Cli, dir: &Path, connect: F, out: &mut W) -> Result<RunStatus>
where
    E: FilterEngine,
    F: FnOnce() -> Result<E>,
    W: Write,
{
    let resolved = resolve(cli, dir)?;
    let mut store = ListStore::open(dir)?;
    let mut connect = Some(connect);
    let mut engine = None;
    let mut status = RunStatus::Success;

    if let Some(mode) = resolved.list_mode.filter(|_| cli.edits_list()) {
        edit_lists(cli, &mut store, mode, out)?;
    }

    if cli.list {
        print_lists(&store, resolved.list_mode, out)?;
    }

    if let Some(config) = resolved.target.as_ref() {
        if cli.apply && cli.dry_run {
            let plan = plan_for(&store, config)?;
            info!("Dry run: {} commands for {}", plan.steps.len(), plan.interface);
            for line in plan.commands(DISPLAY_BINARY) {
                writeln!(out, "{}", line)?;
            }
        } else if cli.apply {
            apply(engine_for(&mut engine, &mut connect)?, &store, config, out)?;
        }

        if cli.verify && !verify(engine_for(&mut engine, &mut connect)?, &store, config, out)? {
            status = RunStatus::VerifyFailed;
        }
    }

    if cli.history {
        print_history(dir, out)?;
    }

    Ok(status)
}
