//! Graph and stack configuration surface.
//!
//! Only the data shapes the runtime entities must be constructible from
//! are in scope here — file loading (TOML/YAML parsing, search-path
//! resolution, env overrides) is a CLI/binary concern kept out of this
//! crate entirely; these are plain `serde` structs with no file-loading
//! methods attached.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// One `{src_name, dst_name}` edge in a [`GraphConfig`]'s link list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub src_name: String,
    pub dst_name: String,
}

/// An index-list defining one mutex or equal filter group, keyed by
/// position in [`GraphConfig::modules`].
pub type FilterGroupConfig = Vec<usize>;

/// The declarative shape of one graph: the module names to instantiate,
/// the links between them, and the mutex/equal filter groupings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphConfig {
    pub modules: Vec<String>,
    pub links: Vec<LinkConfig>,
    #[serde(default)]
    pub mutex_groups: Vec<FilterGroupConfig>,
    #[serde(default)]
    pub equal_groups: Vec<FilterGroupConfig>,
}

/// One named graph assigned to a set of CPU cores, as aggregated by a
/// [`StackConfig`]'s `{name, structure, cpus}` entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEntry {
    pub name: String,
    pub structure: GraphConfig,
    pub cpus: Vec<u32>,
}

impl GraphEntry {
    /// Validate `cpus` against the cores actually available on this
    /// machine, surfacing a [`crate::error::OmniError::Contract`] at
    /// stack-construction time rather than letting
    /// [`core_affinity::set_for_current`] fail silently once the engine
    /// thread is already running.
    pub fn validate_cpus(&self) -> crate::error::OmniResult<()> {
        let available = num_cpus::get() as u32;
        if let Some(&bad) = self.cpus.iter().find(|&&c| c >= available) {
            return Err(crate::error::OmniError::Contract(format!(
                "graph '{}' assigns cpu {} but only {} cores are available",
                self.name, bad, available
            )));
        }
        Ok(())
    }
}

/// A NIC's `{driver_name, port, ipv4, netmask}` configuration record,
/// consumed by [`crate::nic::IoAdapterFactory`] to construct and bind the
/// named driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NicConfig {
    pub driver_name: String,
    pub port: String,
    pub ipv4: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// One static ARP entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ArpEntry {
    pub ipv4: Ipv4Addr,
    pub mac: [u8; 6],
}

/// One static route: `destination/prefix_len` via `gateway` on `nic`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination: Ipv4Addr,
    pub prefix_len: u8,
    pub gateway: Ipv4Addr,
    pub nic: String,
}

/// The top-level "stack" record aggregating everything an engine process
/// needs to bring its graphs up: per-core graph entries, NIC bindings,
/// and the ARP/route tables modules consult when resolving next hops.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackConfig {
    pub graphs: Vec<GraphEntry>,
    #[serde(default)]
    pub nics: Vec<NicConfig>,
    #[serde(default)]
    pub arp_table: Vec<ArpEntry>,
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

impl StackConfig {
    pub fn validate(&self) -> crate::error::OmniResult<()> {
        for graph in &self.graphs {
            graph.validate_cpus()?;
        }
        Ok(())
    }
}
