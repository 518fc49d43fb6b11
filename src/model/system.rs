//! Database systems and their physical nodes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Supported database vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Oracle,
    Mysql,
    Postgresql,
    Dm,
}

impl DatabaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oracle => "oracle",
            Self::Mysql => "mysql",
            Self::Postgresql => "postgresql",
            Self::Dm => "dm",
        }
    }

    /// Listener port used when neither the node nor the system declares one.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Oracle => 1521,
            Self::Mysql => 3306,
            Self::Postgresql => 5432,
            Self::Dm => 5236,
        }
    }

    /// Parse a type name or one of its common aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oracle" | "ora" => Some(Self::Oracle),
            "mysql" => Some(Self::Mysql),
            "postgresql" | "postgres" | "pg" => Some(Self::Postgresql),
            "dm" | "dameng" => Some(Self::Dm),
            _ => None,
        }
    }

    /// Infer the type from a file name such as `pg-metrics.yml`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (prefix, _) = name.split_once('-')?;
        Self::parse(prefix)
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replication role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Standby,
    #[default]
    Unset,
}

impl NodeRole {
    /// Map a configured role string onto a role.
    ///
    /// `primary`/`master` become master, anything mentioning standby (and
    /// `slave`) becomes standby. Other values are dropped with a warning.
    pub fn normalize(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return Self::Unset;
        };

        let lower = raw.to_ascii_lowercase();
        if lower == "primary" || lower == "master" {
            Self::Master
        } else if lower.contains("standby") || lower == "slave" {
            Self::Standby
        } else {
            tracing::warn!(
                "Unknown node role '{}', only master/standby are supported; role left unset",
                raw
            );
            Self::Unset
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Standby => "standby",
            Self::Unset => "unset",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One physical database endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseNode {
    pub host: String,
    pub port: u16,
    /// Oracle service name, or the database/schema name for other vendors.
    pub service_name: Option<String>,
    /// Oracle SID, used when no service name is given.
    pub sid_name: Option<String>,
    pub role: NodeRole,
}

impl DatabaseNode {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            service_name: None,
            sid_name: None,
            role: NodeRole::Unset,
        }
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    /// Service name if present, otherwise the SID.
    pub fn database_name(&self) -> Option<&str> {
        self.service_name
            .as_deref()
            .or(self.sid_name.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// A named logical deployment made of one or more nodes.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseSystem {
    pub name: String,
    pub db_type: DatabaseType,
    pub enabled: bool,
    pub username: String,
    pub password: String,
    pub nodes: Vec<DatabaseNode>,
}

impl DatabaseSystem {
    pub fn new(name: impl Into<String>, db_type: DatabaseType) -> Self {
        Self {
            name: name.into(),
            db_type,
            enabled: true,
            username: String::new(),
            password: String::new(),
            nodes: Vec::new(),
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_node(mut self, node: DatabaseNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn nodes_with_role(&self, role: NodeRole) -> impl Iterator<Item = &DatabaseNode> {
        self.nodes.iter().filter(move |n| n.role == role)
    }
}

// Hand-written so credentials never reach a log line.
impl fmt::Debug for DatabaseSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSystem")
            .field("name", &self.name)
            .field("db_type", &self.db_type)
            .field("enabled", &self.enabled)
            .field("username", &"<redacted>")
            .field("password", &"<redacted>")
            .field("nodes", &self.nodes)
            .finish()
    }
}

/// All configured systems keyed by system name.
pub type SystemCatalog = BTreeMap<String, Arc<DatabaseSystem>>;

/// Systems grouped as type -> system name -> system.
pub type GroupedSystems = BTreeMap<DatabaseType, BTreeMap<String, Arc<DatabaseSystem>>>;

pub fn group_by_type(systems: &SystemCatalog) -> GroupedSystems {
    let mut grouped = GroupedSystems::new();
    for (name, system) in systems {
        grouped
            .entry(system.db_type)
            .or_default()
            .insert(name.clone(), Arc::clone(system));
    }
    grouped
}
