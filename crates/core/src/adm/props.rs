//! Base and working properties of a directory's nodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::store::{read_json, write_json_atomic};
use super::AdmPaths;
use crate::errors::WcError;
use crate::models::Props;

/// Property sets of one node: as last seen in the repository, and as now.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeProps {
    #[serde(default)]
    pub base: Props,
    #[serde(default)]
    pub working: Props,
}

impl NodeProps {
    pub fn is_modified(&self) -> bool {
        self.base != self.working
    }
}

/// All nodes' properties of one directory, keyed like the entry table.
pub type PropsTable = BTreeMap<String, NodeProps>;

pub fn read_props(adm: &AdmPaths) -> Result<PropsTable, WcError> {
    if !adm.props_file().exists() {
        return Ok(PropsTable::new());
    }
    read_json(adm, &adm.props_file())
}

pub fn write_props(adm: &AdmPaths, table: &PropsTable) -> Result<(), WcError> {
    write_json_atomic(adm, &adm.props_file(), table)
}
