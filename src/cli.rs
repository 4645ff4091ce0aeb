use crate::config::DIR_ENV;
use crate::rules::Mode;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(
    name = "mac-filter",
    about = "Maintain MAC whitelists/blacklists and project them onto the iptables FORWARD chain",
    version,
    long_about = None
)]
pub struct Cli {
    /// Network interface the rules match on
    #[arg(
        short = 'i',
        long = "interface",
        value_name = "IFACE",
        help = "Network interface (e.g., eth0, br-lan)"
    )]
    pub interface: Option<String>,

    /// VLAN sub-interface
    #[arg(
        short = 'v',
        long = "vlan",
        value_name = "ID",
        value_parser = clap::value_parser!(u16).range(1..=4094),
        help = "VLAN id; rules match on <IFACE>.<ID>"
    )]
    pub vlan: Option<u16>,

    /// Which list to edit, and how to project it
    #[arg(short = 'm', long = "mode", value_enum)]
    pub mode: Option<Mode>,

    /// MACs to add to the list selected by --mode
    #[arg(
        short = 'a',
        long = "add",
        value_name = "MAC",
        value_delimiter = ',',
        help = "Add MAC address(es) to the list (repeatable, comma separated)"
    )]
    pub add: Vec<String>,

    /// MACs to remove from the list selected by --mode
    #[arg(
        short = 'r',
        long = "remove",
        value_name = "MAC",
        value_delimiter = ',',
        help = "Remove MAC address(es) from the list (repeatable, comma separated)"
    )]
    pub remove: Vec<String>,

    /// Bulk import, one MAC per line
    #[arg(short = 'f', long = "file", value_name = "PATH", help = "Import MAC addresses from a file")]
    pub files: Vec<PathBuf>,

    #[arg(short = 'l', long = "list", help = "Show the list for --mode, or both lists")]
    pub list: bool,

    #[arg(long = "apply", help = "Install the rules for the selected list")]
    pub apply: bool,

    #[arg(
        short = 'e',
        long = "existing",
        help = "Use interface, VLAN and mode from the last successful apply"
    )]
    pub existing: bool,

    #[arg(long = "verify", help = "Check installed rules against the selected list")]
    pub verify: bool,

    #[arg(
        short = 'n',
        long = "dry-run",
        requires = "apply",
        conflicts_with = "verify",
        help = "With --apply, print the iptables commands instead of running them"
    )]
    pub dry_run: bool,

    #[arg(long = "history", help = "Show previous applies")]
    pub history: bool,

    /// Where the lists, config and history live
    #[arg(short = 'd', long = "dir", value_name = "DIR", env = DIR_ENV)]
    pub dir: Option<PathBuf>,

    #[arg(long = "verbose", help = "Enable debug logging")]
    pub verbose: bool,
}

impl Cli {
    pub fn edits_list(&self) -> bool {
        !self.add.is_empty() || !self.remove.is_empty() || !self.files.is_empty()
    }

    pub fn has_operation(&self) -> bool {
        self.edits_list() || self.list || self.apply || self.verify || self.history
    }
}
