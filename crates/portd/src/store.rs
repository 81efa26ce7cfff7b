//! Desired-state store
//!
//! The L3 core reads VRF and port rows and writes route and next-hop rows
//! through [`DesiredStateStore`]. It never commits: writers call
//! `mark_dirty` and the owner of the transaction commits.
//!
//! [`MemoryStore`] is the in-process implementation, persisted as a JSON
//! snapshot.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PortdError, Result};
use crate::tables::{NEXTHOP_TABLE, ROUTE_TABLE};
use crate::types::AddressFamily;

/// Route row id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(pub u64);

/// Next-hop row id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NextHopId(pub u64);

/// Port configuration row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRow {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip4_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip6_address: Option<String>,
    #[serde(default)]
    pub ip4_address_secondary: Vec<String>,
    #[serde(default)]
    pub ip6_address_secondary: Vec<String>,
    #[serde(default)]
    pub hw_config: BTreeMap<String, String>,
}

impl PortRow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// True if any address column is populated
    pub fn has_l3(&self) -> bool {
        self.ip4_address.is_some()
            || self.ip6_address.is_some()
            || !self.ip4_address_secondary.is_empty()
            || !self.ip6_address_secondary.is_empty()
    }
}

/// VRF row with its ordered port list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfRow {
    pub name: String,
    #[serde(default)]
    pub ports: Vec<PortRow>,
}

/// Route row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRow {
    pub vrf: String,
    pub prefix: String,
    #[serde(default)]
    pub address_family: Option<AddressFamily>,
    #[serde(default)]
    pub sub_address_family: Option<String>,
    pub from: String,
    pub distance: u32,
    pub selected: bool,
    #[serde(default)]
    pub nexthops: Vec<NextHopId>,
}

/// Next-hop row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextHopRow {
    /// Egress ports; connected routes carry exactly one
    #[serde(default)]
    pub ports: Vec<String>,
}

/// Access the L3 core needs to the desired state
pub trait DesiredStateStore {
    fn vrfs(&self) -> &[VrfRow];

    fn routes(&self) -> Vec<(RouteId, &RouteRow)>;

    fn nexthop(&self, id: NextHopId) -> Option<&NextHopRow>;

    fn insert_nexthop(&mut self, row: NextHopRow) -> NextHopId;

    fn insert_route(&mut self, row: RouteRow) -> RouteId;

    fn delete_route(&mut self, id: RouteId) -> Result<()>;

    fn delete_nexthop(&mut self, id: NextHopId) -> Result<()>;

    /// Flag the surrounding transaction as needing a commit
    fn mark_dirty(&mut self);

    /// Every (vrf, port) pair in store order
    fn ports(&self) -> Vec<(&str, &PortRow)> {
        self.vrfs()
            .iter()
            .flat_map(|vrf| vrf.ports.iter().map(move |p| (vrf.name.as_str(), p)))
            .collect()
    }

    fn find_port(&self, name: &str) -> Option<(&str, &PortRow)> {
        self.ports().into_iter().find(|(_, p)| p.name == name)
    }
}

/// On-disk form of a [`MemoryStore`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub vrfs: Vec<VrfRow>,
    #[serde(default)]
    pub routes: BTreeMap<u64, RouteRow>,
    #[serde(default)]
    pub nexthops: BTreeMap<u64, NextHopRow>,
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// In-memory desired-state store
#[derive(Debug, Default)]
pub struct MemoryStore {
    vrfs: Vec<VrfRow>,
    routes: BTreeMap<RouteId, RouteRow>,
    nexthops: BTreeMap<NextHopId, NextHopRow>,
    next_id: u64,
    dirty: bool,
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vrfs(vrfs: Vec<VrfRow>) -> Self {
        Self {
            vrfs,
            ..Default::default()
        }
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let next_id = snapshot
            .routes
            .keys()
            .chain(snapshot.nexthops.keys())
            .max()
            .copied()
            .unwrap_or(0);
        Self {
            vrfs: snapshot.vrfs,
            routes: snapshot
                .routes
                .into_iter()
                .map(|(id, row)| (RouteId(id), row))
                .collect(),
            nexthops: snapshot
                .nexthops
                .into_iter()
                .map(|(id, row)| (NextHopId(id), row))
                .collect(),
            next_id,
            dirty: false,
            path: None,
        }
    }

    /// Load a JSON snapshot and remember the path for commits
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut store = Self::from_snapshot(Snapshot::load(path)?);
        store.path = Some(path.to_path_buf());
        info!(
            path = %path.display(),
            vrfs = store.vrfs.len(),
            routes = store.routes.len(),
            "Loaded desired-state snapshot"
        );
        Ok(store)
    }

    /// Like [`MemoryStore::load`], but a missing file yields an empty store
    /// bound to that path.
    pub fn load_or_empty(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No desired-state snapshot, starting empty");
            let mut store = Self::new();
            store.path = Some(path.to_path_buf());
            return Ok(store);
        }
        Self::load(path)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            vrfs: self.vrfs.clone(),
            routes: self.routes.iter().map(|(id, r)| (id.0, r.clone())).collect(),
            nexthops: self
                .nexthops
                .iter()
                .map(|(id, n)| (id.0, n.clone()))
                .collect(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Commit the open transaction. Writes the snapshot back when the store
    /// is file-backed. Returns whether anything was committed.
    pub fn commit(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        if let Some(path) = &self.path {
            self.save(path)?;
            debug!(path = %path.display(), "Committed desired-state snapshot");
        }
        self.dirty = false;
        Ok(true)
    }

    /// Swap in a new set of VRF/port rows, keeping routes and next-hops
    pub fn replace_vrfs(&mut self, vrfs: Vec<VrfRow>) -> Vec<VrfRow> {
        std::mem::replace(&mut self.vrfs, vrfs)
    }

    /// Insert or replace a port row under `vrf`, creating the VRF if needed
    pub fn upsert_port(&mut self, vrf: &str, row: PortRow) {
        let index = match self.vrfs.iter().position(|v| v.name == vrf) {
            Some(i) => i,
            None => {
                self.vrfs.push(VrfRow {
                    name: vrf.to_string(),
                    ports: Vec::new(),
                });
                self.vrfs.len() - 1
            }
        };
        let ports = &mut self.vrfs[index].ports;
        match ports.iter_mut().find(|p| p.name == row.name) {
            Some(existing) => *existing = row,
            None => ports.push(row),
        }
    }

    /// Remove a port row from whichever VRF holds it
    pub fn remove_port(&mut self, name: &str) -> Option<PortRow> {
        for vrf in &mut self.vrfs {
            if let Some(i) = vrf.ports.iter().position(|p| p.name == name) {
                return Some(vrf.ports.remove(i));
            }
        }
        None
    }

    pub fn nexthop_count(&self) -> usize {
        self.nexthops.len()
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl DesiredStateStore for MemoryStore {
    fn vrfs(&self) -> &[VrfRow] {
        &self.vrfs
    }

    fn routes(&self) -> Vec<(RouteId, &RouteRow)> {
        self.routes.iter().map(|(id, row)| (*id, row)).collect()
    }

    fn nexthop(&self, id: NextHopId) -> Option<&NextHopRow> {
        self.nexthops.get(&id)
    }

    fn insert_nexthop(&mut self, row: NextHopRow) -> NextHopId {
        let id = NextHopId(self.allocate_id());
        self.nexthops.insert(id, row);
        id
    }

    fn insert_route(&mut self, row: RouteRow) -> RouteId {
        let id = RouteId(self.allocate_id());
        self.routes.insert(id, row);
        id
    }

    fn delete_route(&mut self, id: RouteId) -> Result<()> {
        self.routes
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| PortdError::not_found(ROUTE_TABLE, id.0.to_string()))
    }

    fn delete_nexthop(&mut self, id: NextHopId) -> Result<()> {
        self.nexthops
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| PortdError::not_found(NEXTHOP_TABLE, id.0.to_string()))
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

/// Which secondary-address columns of a port row changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnChanges {
    pub ip4_address_secondary: bool,
    pub ip6_address_secondary: bool,
}

impl ColumnChanges {
    pub fn all() -> Self {
        Self {
            ip4_address_secondary: true,
            ip6_address_secondary: true,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// Compare two revisions of a row; a new row has every column modified
    pub fn between(old: Option<&PortRow>, new: &PortRow) -> Self {
        match old {
            None => Self::all(),
            Some(old) => Self {
                ip4_address_secondary: old.ip4_address_secondary != new.ip4_address_secondary,
                ip6_address_secondary: old.ip6_address_secondary != new.ip6_address_secondary,
            },
        }
    }

    pub fn secondary(&self, family: AddressFamily) -> bool {
        match family {
            AddressFamily::Ipv4 => self.ip4_address_secondary,
            AddressFamily::Ipv6 => self.ip6_address_secondary,
        }
    }
}

/// A port-level difference between two desired-state revisions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortChange {
    /// Row added or modified
    Updated {
        vrf: String,
        row: PortRow,
        changes: ColumnChanges,
    },
    /// Row no longer present
    Removed { name: String },
}

/// Ports that differ between two VRF row sets, in new-store order with
/// removals last.
pub fn diff_ports(old: &[VrfRow], new: &[VrfRow]) -> Vec<PortChange> {
    let old_rows: BTreeMap<&str, &PortRow> = old
        .iter()
        .flat_map(|v| v.ports.iter())
        .map(|p| (p.name.as_str(), p))
        .collect();
    let mut seen = std::collections::BTreeSet::new();
    let mut changes = Vec::new();

    for vrf in new {
        for row in &vrf.ports {
            seen.insert(row.name.as_str());
            let previous = old_rows.get(row.name.as_str()).copied();
            if previous == Some(row) {
                continue;
            }
            changes.push(PortChange::Updated {
                vrf: vrf.name.clone(),
                row: row.clone(),
                changes: ColumnChanges::between(previous, row),
            });
        }
    }

    for name in old_rows.keys() {
        if !seen.contains(name) {
            changes.push(PortChange::Removed {
                name: name.to_string(),
            });
        }
    }
    changes
}
