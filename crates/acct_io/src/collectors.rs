//! Schedd → collector host map.
//!
//! Jobs without a `LastRemotePool` are attributed to a pool through the
//! collectors their schedd reports to. Lookups are cached in a JSON file
//! and only repeated for schedds not seen before, or for every schedd on a
//! refresh run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::cache::{read_json, write_json_atomic};
use crate::{IoError, IoResult};

pub const DEFAULT_CACHE_FILE: &str = "ospool-host-map.json";

/// OSPool central managers.
pub const OSPOOL_COLLECTORS: [&str; 3] =
    ["cm-1.ospool.osg-htc.org", "cm-2.ospool.osg-htc.org", "flock.opensciencegrid.org"];

/// Managers that count for membership but are never queried.
const UNQUERIED_COLLECTORS: [&str; 1] = ["flock.opensciencegrid.org"];

const CUSTOM_MAPPINGS: [(&str, &[&str]); 8] = [
    ("osg-login2.pace.gatech.edu", &["osg-login2.pace.gatech.edu"]),
    ("ce1.opensciencegrid.org", &["cm-1.ospool.osg-htc.org", "cm-2.ospool.osg-htc.org"]),
    ("scosg16.jlab.org", &["scicollector.jlab.org", "osg-jlab-1.t2.ucsd.edu"]),
    ("scosgdev16.jlab.org", &["scicollector.jlab.org", "osg-jlab-1.t2.ucsd.edu"]),
    ("submit6.chtc.wisc.edu", &["htcondor-cm-path.osg.chtc.io"]),
    ("login-el7.xenon.ci-connect.net", &["cm-1.ospool.osg-htc.org", "cm-2.ospool.osg-htc.org"]),
    ("login.collab.ci-connect.net", &["cm-1.ospool.osg-htc.org", "cm-2.ospool.osg-htc.org"]),
    ("uclhc-2.ps.uci.edu", &["uclhc-2.ps.uci.edu"]),
];

pub fn is_ospool_collector(host: &str) -> bool {
    OSPOOL_COLLECTORS.contains(&host)
}

/// Split a `CollectorHost` attribute on commas and spaces, dropping ports.
pub fn parse_collector_host_attr(raw: &str) -> BTreeSet<String> {
    raw.split([',', ' '])
        .map(|h| h.trim().split(':').next().unwrap_or_default())
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolves the raw `CollectorHost` attribute of a schedd as seen by one
/// central manager. `Ok(None)` means the manager has no ad for it.
pub trait CollectorLookup {
    fn collector_host_attr(&self, central_manager: &str, schedd_machine: &str) -> IoResult<Option<String>>;
}

/// Queries central managers with the `condor_status` tool.
#[derive(Clone, Debug)]
pub struct CondorStatusLookup {
    pub program: PathBuf,
}

impl Default for CondorStatusLookup {
    fn default() -> Self {
        Self { program: PathBuf::from("condor_status") }
    }
}

impl CollectorLookup for CondorStatusLookup {
    fn collector_host_attr(&self, central_manager: &str, schedd_machine: &str) -> IoResult<Option<String>> {
        let out = Command::new(&self.program)
            .arg("-pool")
            .arg(central_manager)
            .arg("-schedd")
            .arg("-constraint")
            .arg(format!("Machine == \"{schedd_machine}\""))
            .arg("-af")
            .arg("CollectorHost")
            .output()
            .map_err(|e| IoError::Command(format!("{}: {e}", self.program.display())))?;
        if !out.status.success() {
            return Err(IoError::Command(format!(
                "{} -pool {central_manager} exited with {}: {}",
                self.program.display(),
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&out.stdout);
        let lines: Vec<&str> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if lines.len() > 1 {
            tracing::warn!(schedd = schedd_machine, ads = lines.len(), "multiple schedd ads for machine");
        }
        Ok(lines.first().filter(|l| **l != "undefined").map(|l| (*l).to_string()))
    }
}

#[derive(Clone, Debug, Default)]
pub struct CollectorHostMap {
    hosts: BTreeMap<String, BTreeSet<String>>,
    /// Schedds whose entry is trusted for this run.
    checked: BTreeSet<String>,
    cache_path: Option<PathBuf>,
    dirty: bool,
}

impl CollectorHostMap {
    /// Only the built-in mappings, with no backing file.
    pub fn with_custom_mappings() -> Self {
        let mut m = Self::default();
        m.overlay_custom();
        m
    }

    /// Load the cache file if present. With `refresh`, cached entries are
    /// looked up again on first use.
    pub fn load(path: &Path, refresh: bool) -> Self {
        let mut m = Self { cache_path: Some(path.to_path_buf()), ..Self::default() };
        if path.exists() {
            match read_json::<BTreeMap<String, BTreeSet<String>>>(path) {
                Ok(hosts) => m.hosts = hosts,
                Err(e) => tracing::warn!(error = %e, "ignoring unreadable collector host map"),
            }
        }
        if !refresh {
            m.checked = m.hosts.keys().cloned().collect();
        }
        m.overlay_custom();
        tracing::debug!(path = %path.display(), entries = m.hosts.len(), refresh, "collector host map loaded");
        m
    }

    fn overlay_custom(&mut self) {
        for (schedd, hosts) in CUSTOM_MAPPINGS {
            self.hosts.insert(schedd.to_string(), hosts.iter().map(|h| h.to_string()).collect());
            self.checked.insert(schedd.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Cached hosts without any lookup.
    pub fn cached(&self, schedd: &str) -> Option<&BTreeSet<String>> {
        self.hosts.get(schedd)
    }

    /// Collector hosts for `schedd`, asking each central manager in turn
    /// when the entry is unchecked. Each schedd is looked up at most once.
    pub fn hosts_for(&mut self, schedd: &str, lookup: Option<&dyn CollectorLookup>) -> BTreeSet<String> {
        if self.checked.contains(schedd) {
            return self.hosts.get(schedd).cloned().unwrap_or_default();
        }
        self.checked.insert(schedd.to_string());

        let Some(lookup) = lookup else {
            return self.hosts.get(schedd).cloned().unwrap_or_default();
        };

        tracing::debug!(schedd, "schedd not in collector host map, querying collectors");
        let machine = schedd.rsplit('@').next().unwrap_or(schedd);
        let mut queried = Vec::new();
        let mut found = BTreeSet::new();
        for cm in OSPOOL_COLLECTORS.iter().filter(|c| !UNQUERIED_COLLECTORS.contains(c)) {
            match lookup.collector_host_attr(cm, machine) {
                Ok(Some(raw)) => {
                    queried.push(*cm);
                    found = parse_collector_host_attr(&raw);
                    if !found.is_empty() {
                        break;
                    }
                }
                Ok(None) => queried.push(*cm),
                Err(e) => tracing::debug!(collector = cm, error = %e, "collector query failed"),
            }
        }

        if found.is_empty() {
            tracing::warn!(schedd, queried = %queried.join(", "), "schedd not found in collectors");
        } else {
            self.dirty = true;
        }
        self.hosts.insert(schedd.to_string(), found.clone());
        found
    }

    /// Write new entries back, merged over whatever the file holds now.
    pub fn save(&self) -> IoResult<()> {
        let Some(path) = self.cache_path.as_deref() else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        let mut on_disk: BTreeMap<String, BTreeSet<String>> = if path.exists() {
            read_json(path).unwrap_or_default()
        } else {
            BTreeMap::new()
        };
        for (schedd, hosts) in &self.hosts {
            if !hosts.is_empty() {
                on_disk.insert(schedd.clone(), hosts.clone());
            }
        }
        write_json_atomic(path, &on_disk)?;
        tracing::debug!(path = %path.display(), entries = on_disk.len(), "collector host map saved");
        Ok(())
    }
}
