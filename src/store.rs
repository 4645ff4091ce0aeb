use crate::error::{FilterError, Result};
use crate::mac::MacAddress;
use crate::rules::Mode;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

impl Mode {
    pub fn list_file(self) -> &'static str {
        match self {
            Mode::Whitelist => "whitelist.txt",
            Mode::Blacklist => "blacklist.txt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotPresent,
}

/// Result of a bulk import. Bad lines are collected, never fatal.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub added: usize,
    pub duplicates: usize,
    pub invalid: Vec<(usize, String)>,
}

/// Whitelist and blacklist, each persisted as one MAC per line.
#[derive(Debug)]
pub struct ListStore {
    dir: PathBuf,
    whitelist: BTreeSet<MacAddress>,
    blacklist: BTreeSet<MacAddress>,
}

/// Writes via a temp file in the same directory so readers never observe a
/// half-written file.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| FilterError::SystemError(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(contents.as_bytes())?;
    temp.flush()?;
    temp.persist(path)?;
    Ok(())
}

/// Strips comments and whitespace; `None` for lines with no content.
fn entry_text(line: &str) -> Option<&str> {
    let text = line.split('#').next().unwrap_or_default().trim();
    (!text.is_empty()).then_some(text)
}

fn read_list(path: &Path) -> Result<BTreeSet<MacAddress>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(source) => {
            return Err(FilterError::ReadFile {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut set = BTreeSet::new();
    for (index, line) in content.lines().enumerate() {
        let Some(text) = entry_text(line) else {
            continue;
        };
        match text.parse::<MacAddress>() {
            Ok(mac) => {
                set.insert(mac);
            }
            Err(_) => warn!("{}:{}: skipping invalid entry '{}'", path.display(), index + 1, text),
        }
    }

    debug!("Loaded {} entries from {}", set.len(), path.display());
    Ok(set)
}

impl ListStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let whitelist = read_list(&dir.join(Mode::Whitelist.list_file()))?;
        let blacklist = read_list(&dir.join(Mode::Blacklist.list_file()))?;

        Ok(Self {
            dir,
            whitelist,
            blacklist,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn set(&self, mode: Mode) -> &BTreeSet<MacAddress> {
        match mode {
            Mode::Whitelist => &self.whitelist,
            Mode::Blacklist => &self.blacklist,
        }
    }

    fn set_mut(&mut self, mode: Mode) -> &mut BTreeSet<MacAddress> {
        match mode {
            Mode::Whitelist => &mut self.whitelist,
            Mode::Blacklist => &mut self.blacklist,
        }
    }

    fn save(&self, mode: Mode) -> Result<()> {
        let content: String = self
            .set(mode)
            .iter()
            .map(|mac| format!("{}\n", mac))
            .collect();
        write_atomic(&self.dir.join(mode.list_file()), &content)
    }

    pub fn add(&mut self, mode: Mode, mac: MacAddress) -> Result<AddOutcome> {
        if !self.set_mut(mode).insert(mac) {
            return Ok(AddOutcome::AlreadyPresent);
        }
        self.save(mode)?;
        info!("Added {} to {}", mac, mode);
        Ok(AddOutcome::Added)
    }

    pub fn remove(&mut self, mode: Mode, mac: &MacAddress) -> Result<RemoveOutcome> {
        if !self.set_mut(mode).remove(mac) {
            return Ok(RemoveOutcome::NotPresent);
        }
        self.save(mode)?;
        info!("Removed {} from {}", mac, mode);
        Ok(RemoveOutcome::Removed)
    }

    pub fn contains(&self, mode: Mode, mac: &MacAddress) -> bool {
        self.set(mode).contains(mac)
    }

    /// Sorted by address.
    pub fn list(&self, mode: Mode) -> impl Iterator<Item = &MacAddress> {
        self.set(mode).iter()
    }

    pub fn len(&self, mode: Mode) -> usize {
        self.set(mode).len()
    }

    pub fn is_empty(&self, mode: Mode) -> bool {
        self.set(mode).is_empty()
    }

    /// Adds every valid MAC in `path`, one per line. The list is saved once
    /// at the end.
    pub fn import_file(&mut self, mode: Mode, path: &Path) -> Result<ImportReport> {
        let content = fs::read_to_string(path).map_err(|source| FilterError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;

        let mut report = ImportReport::default();
        for (index, line) in content.lines().enumerate() {
            let Some(text) = entry_text(line) else {
                continue;
            };
            match text.parse::<MacAddress>() {
                Ok(mac) if self.set_mut(mode).insert(mac) => report.added += 1,
                Ok(_) => report.duplicates += 1,
                Err(_) => report.invalid.push((index + 1, text.to_string())),
            }
        }

        if report.added > 0 {
            self.save(mode)?;
        }
        info!(
            "Imported {} into {}: {} added, {} duplicates, {} invalid",
            path.display(),
            mode,
            report.added,
            report.duplicates,
            report.invalid.len()
        );
        Ok(report)
    }
}
