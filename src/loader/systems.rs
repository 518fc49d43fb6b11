use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::{ConfigError, CredentialDecoder, Parsed};
use crate::model::{DatabaseNode, DatabaseSystem, DatabaseType, NodeRole};

#[derive(Debug, Deserialize)]
struct RawSystem {
    #[serde(default, alias = "enabled")]
    enable: bool,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    #[serde(default)]
    nodes: Vec<RawNode>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    host: Option<String>,
    port: Option<u16>,
    #[serde(alias = "service_name")]
    svc_name: Option<String>,
    sid_name: Option<String>,
    role: Option<String>,
}

/// Parse one `<type>-config.yml` document: system name -> system.
pub(super) fn parse(
    path: &Path,
    content: &str,
    db_type: DatabaseType,
    decoder: &dyn CredentialDecoder,
) -> Result<Parsed<DatabaseSystem>, ConfigError> {
    let mut parsed = Parsed {
        items: Vec::new(),
        problems: Vec::new(),
    };

    if content.trim().is_empty() {
        tracing::warn!("{} is empty", path.display());
        return Ok(parsed);
    }

    let raw: Option<BTreeMap<String, RawSystem>> =
        serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;

    for (name, raw) in raw.unwrap_or_default() {
        // Disabled systems are never contacted, so their credentials may stay undecodable.
        let enabled = raw.enable;
        let mut decode = |field: &str, value: Option<String>| -> String {
            let value = value.unwrap_or_default();
            match decoder.decode(&value) {
                Ok(v) => v,
                Err(e) if !enabled => {
                    let shown = path.display();
                    tracing::debug!("{}: disabled system '{}' {}: {}", shown, name, field, e);
                    String::new()
                }
                Err(e) => {
                    let problem = format!("{}: system '{}' {}: {}", path.display(), name, field, e);
                    parsed.problems.push(problem);
                    String::new()
                }
            }
        };

        let username = decode("username", raw.username);
        let password = decode("password", raw.password);

        let mut nodes = Vec::with_capacity(raw.nodes.len());
        for node in raw.nodes {
            let host = decode("host", node.host).trim().to_string();
            let port = node.port.or(raw.port).unwrap_or_else(|| db_type.default_port());
            nodes.push(DatabaseNode {
                host,
                port,
                service_name: node.svc_name.filter(|s| !s.trim().is_empty()),
                sid_name: node.sid_name.filter(|s| !s.trim().is_empty()),
                role: NodeRole::normalize(node.role.as_deref()),
            });
        }

        parsed.items.push(DatabaseSystem {
            name,
            db_type,
            enabled: raw.enable,
            username,
            password,
            nodes,
        });
    }

    Ok(parsed)
}
