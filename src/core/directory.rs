//! Process discovery and relationship queries.
//!
//! Every call rescans the snapshot source; nothing is cached between calls.
//! A pid that disappears between enumeration and its identity read is
//! dropped from the result, never reported as a failure of the scan.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::process_tree::{build_process_tree, ProcessIndex, ProcessTreeNode};
use super::source::{ProcessIdentity, SnapshotSource};

/// Which name to show for a process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamePreference {
    /// Full command line, the way `ps -ef` shows it
    #[default]
    Cmdline,
    /// Short executable name from `stat`
    Comm,
}

impl NamePreference {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "cmdline" => Some(Self::Cmdline),
            "comm" => Some(Self::Comm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Name contains the keyword
    Contains,
    /// Name equals the keyword
    Exact,
}

impl SearchMode {
    fn matches(self, name: &str, keyword: &str) -> bool {
        match self {
            SearchMode::Contains => name.contains(keyword),
            SearchMode::Exact => name == keyword,
        }
    }
}

pub struct ProcessDirectory {
    source: Arc<dyn SnapshotSource>,
}

impl ProcessDirectory {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self { source }
    }

    pub fn list_pids(&self) -> Result<Vec<u32>> {
        self.source.list_pids()
    }

    pub fn identity(&self, pid: u32) -> Result<ProcessIdentity> {
        self.source.identity(pid)
    }

    /// Identity of every live process, ascending by pid
    pub fn identities(&self) -> Result<Vec<ProcessIdentity>> {
        let mut identities = Vec::new();
        for pid in self.source.list_pids()? {
            match self.source.identity(pid) {
                Ok(identity) => identities.push(identity),
                Err(e) => log::trace!("skipping pid {}: {}", pid, e),
            }
        }
        Ok(identities)
    }

    /// Index built from a single identity scan
    pub fn index(&self) -> Result<ProcessIndex> {
        Ok(ProcessIndex::from_identities(self.identities()?))
    }

    fn scan<F>(&self, keep: F) -> Result<Vec<u32>>
    where
        F: Fn(&ProcessIdentity) -> bool,
    {
        Ok(self
            .identities()?
            .into_iter()
            .filter(|identity| keep(identity))
            .map(|identity| identity.pid)
            .collect())
    }

    /// Direct children of `pid`, ascending
    pub fn children_of(&self, pid: u32) -> Result<Vec<u32>> {
        self.scan(|identity| identity.parent_pid == pid && identity.pid != pid)
    }

    /// Every process sharing `pid`'s group, `pid` included, ascending.
    ///
    /// Fails only if `pid` itself cannot be read.
    pub fn group_peers_of(&self, pid: u32) -> Result<Vec<u32>> {
        let group_id = self.source.identity(pid)?.group_id;
        self.group_members(group_id)
    }

    pub fn group_members(&self, group_id: u32) -> Result<Vec<u32>> {
        self.scan(|identity| identity.group_id == group_id)
    }

    /// Preferred name of `pid`, falling back to the short command name when
    /// the preferred one is blank (kernel threads, zombies).
    pub fn resolve_name(&self, pid: u32, preference: NamePreference) -> Result<String> {
        let identity = self.source.identity(pid)?;
        self.name_for(&identity, preference)
    }

    fn name_for(&self, identity: &ProcessIdentity, preference: NamePreference) -> Result<String> {
        if preference == NamePreference::Cmdline {
            let cmdline = self.source.cmdline(identity.pid)?;
            let trimmed = cmdline.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }
        Ok(identity.command_name.clone())
    }

    /// Name of every live process
    pub fn all_names(&self, preference: NamePreference) -> Result<BTreeMap<u32, String>> {
        let mut names = BTreeMap::new();
        for identity in self.identities()? {
            match self.name_for(&identity, preference) {
                Ok(name) => {
                    names.insert(identity.pid, name);
                }
                Err(e) => log::trace!("skipping pid {}: {}", identity.pid, e),
            }
        }
        Ok(names)
    }

    /// `(pid, name)` of every process whose name matches `keyword`
    pub fn search(
        &self,
        keyword: &str,
        mode: SearchMode,
        preference: NamePreference,
    ) -> Result<Vec<(u32, String)>> {
        Ok(self
            .all_names(preference)?
            .into_iter()
            .filter(|(_, name)| mode.matches(name, keyword))
            .collect())
    }

    pub fn exe_path(&self, pid: u32) -> Result<PathBuf> {
        self.source.exe_path(pid)
    }

    pub fn cwd(&self, pid: u32) -> Result<PathBuf> {
        self.source.cwd(pid)
    }

    pub fn tree(&self) -> Result<Vec<ProcessTreeNode>> {
        Ok(build_process_tree(&self.index()?))
    }
}
