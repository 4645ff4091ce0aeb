use crate::error::{FilterError, Result};
use crate::rules::RuleSpec;
use std::path::PathBuf;
use std::process::{Command, Output};
use tracing::debug;

/// Overrides the packet filter binary used by [`Iptables::locate`].
pub const IPTABLES_ENV: &str = "MAC_FILTER_IPTABLES";

const IPTABLES: &str = "iptables";

const SEARCH_PATHS: [&str; 6] = [
    "/sbin",
    "/usr/sbin",
    "/bin",
    "/usr/bin",
    "/usr/local/sbin",
    "/usr/local/bin",
];

/// Rule-management operations against one chain of the packet filter.
pub trait FilterEngine {
    fn exists(&mut self, chain: &str, rule: &RuleSpec) -> Result<bool>;
    fn insert(&mut self, chain: &str, rule: &RuleSpec) -> Result<()>;
    fn append(&mut self, chain: &str, rule: &RuleSpec) -> Result<()>;
    fn delete(&mut self, chain: &str, rule: &RuleSpec) -> Result<()>;
    /// Chain contents in `-S` syntax, one rule per line.
    fn list(&mut self, chain: &str) -> Result<Vec<String>>;
}

impl<T: FilterEngine + ?Sized> FilterEngine for &mut T {
    fn exists(&mut self, chain: &str, rule: &RuleSpec) -> Result<bool> {
        (**self).exists(chain, rule)
    }

    fn insert(&mut self, chain: &str, rule: &RuleSpec) -> Result<()> {
        (**self).insert(chain, rule)
    }

    fn append(&mut self, chain: &str, rule: &RuleSpec) -> Result<()> {
        (**self).append(chain, rule)
    }

    fn delete(&mut self, chain: &str, rule: &RuleSpec) -> Result<()> {
        (**self).delete(chain, rule)
    }

    fn list(&mut self, chain: &str) -> Result<Vec<String>> {
        (**self).list(chain)
    }
}

pub fn find_command(cmd: &str) -> Option<PathBuf> {
    let from_env = std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).collect::<Vec<_>>())
        .unwrap_or_default();

    SEARCH_PATHS
        .iter()
        .map(PathBuf::from)
        .chain(from_env)
        .map(|dir| dir.join(cmd))
        .find(|path| path.is_file())
}

pub fn check_permissions() -> Result<()> {
    if !nix::unistd::Uid::effective().is_root() {
        return Err(FilterError::PermissionDenied(
            "Changing firewall rules requires root privileges. Please use sudo, or --dry-run."
                .into(),
        ));
    }

    Ok(())
}

#[derive(Debug, Clone)]
pub struct Iptables {
    binary: PathBuf,
}

impl Iptables {
    /// Uses `$MAC_FILTER_IPTABLES` when set, otherwise searches the usual
    /// system directories and `$PATH`.
    pub fn locate() -> Result<Self> {
        let binary = match std::env::var_os(IPTABLES_ENV) {
            Some(value) => {
                let path = PathBuf::from(&value);
                let found = if path.components().count() > 1 {
                    path.is_file().then_some(path)
                } else {
                    find_command(&path.to_string_lossy())
                };
                found.ok_or_else(|| FilterError::EngineNotFound(value.to_string_lossy().into_owned()))?
            }
            None => find_command(IPTABLES)
                .ok_or_else(|| FilterError::EngineNotFound(IPTABLES.to_string()))?,
        };

        debug!("Using packet filter binary {}", binary.display());
        Ok(Self { binary })
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command_line(&self, args: &[String]) -> String {
        format!("{} {}", self.binary.display(), args.join(" "))
    }

    fn run(&self, args: &[String]) -> Result<Output> {
        debug!("Running: {}", self.command_line(args));
        Command::new(&self.binary).args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FilterError::EngineNotFound(self.binary.display().to_string())
            } else {
                FilterError::SystemError(format!("Failed to run {}: {}", self.binary.display(), e))
            }
        })
    }

    fn failure(&self, args: &[String], output: &Output) -> FilterError {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = if !stderr.trim().is_empty() {
            stderr.trim().to_string()
        } else if !stdout.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            "Unknown error".to_string()
        };

        FilterError::Engine {
            command: self.command_line(args),
            status: output.status.to_string(),
            stderr: message,
        }
    }

    fn execute(&self, args: &[String]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(self.failure(args, &output));
        }
        Ok(output)
    }

    fn rule_args(flag: &str, chain: &str, rule: &RuleSpec) -> Vec<String> {
        let mut args = vec![flag.to_string(), chain.to_string()];
        args.extend(rule.args());
        args
    }
}

impl FilterEngine for Iptables {
    fn exists(&mut self, chain: &str, rule: &RuleSpec) -> Result<bool> {
        let args = Self::rule_args("-C", chain, rule);
        let output = self.run(&args)?;
        // -C exits 1 when the rule is absent; anything else is a real failure
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(self.failure(&args, &output)),
        }
    }

    fn insert(&mut self, chain: &str, rule: &RuleSpec) -> Result<()> {
        self.execute(&Self::rule_args("-I", chain, rule)).map(drop)
    }

    fn append(&mut self, chain: &str, rule: &RuleSpec) -> Result<()> {
        self.execute(&Self::rule_args("-A", chain, rule)).map(drop)
    }

    fn delete(&mut self, chain: &str, rule: &RuleSpec) -> Result<()> {
        self.execute(&Self::rule_args("-D", chain, rule)).map(drop)
    }

    fn list(&mut self, chain: &str) -> Result<Vec<String>> {
        let output = self.execute(&["-S".to_string(), chain.to_string()])?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

/// Finds the packet filter and checks privileges before anything touches it.
pub fn connect() -> Result<Iptables> {
    let engine = Iptables::locate()?;
    check_permissions()?;
    Ok(engine)
}
