//! `snmpboost-agent cache <config> <command>`: operator access to the device cache.

use anyhow::{bail, Context, Result};
use snmpboost_storage::admin::CacheAdmin;
use snmpboost_storage::DeviceStore;

pub const USAGE: &str = "usage: snmpboost-agent cache <config.toml> \
list | search [host-glob] [service-glob] | delete-host <host> | \
delete-service <host> <service-id> | clear-mapping <host> [service-glob] | \
force <host> [interval]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheCommand {
    List,
    Search {
        host: Option<String>,
        service: Option<String>,
    },
    DeleteHost {
        host: String,
    },
    DeleteService {
        host: String,
        service_id: String,
    },
    ClearMapping {
        host: String,
        service: Option<String>,
    },
    Force {
        host: String,
        interval: Option<u32>,
    },
}

impl CacheCommand {
    pub fn parse(args: &[String]) -> Result<Self> {
        let arg = |i: usize| args.get(i).cloned();
        let required = |i: usize, what: &str| -> Result<String> {
            args.get(i).cloned().with_context(|| format!("missing {what}\n{USAGE}"))
        };
        let command = match args.first().map(String::as_str) {
            Some("list") => CacheCommand::List,
            Some("search") => CacheCommand::Search {
                host: arg(1),
                service: arg(2),
            },
            Some("delete-host") => CacheCommand::DeleteHost {
                host: required(1, "host")?,
            },
            Some("delete-service") => CacheCommand::DeleteService {
                host: required(1, "host")?,
                service_id: required(2, "service id")?,
            },
            Some("clear-mapping") => CacheCommand::ClearMapping {
                host: required(1, "host")?,
                service: arg(2),
            },
            Some("force") => CacheCommand::Force {
                host: required(1, "host")?,
                interval: arg(2)
                    .map(|s| s.parse::<u32>())
                    .transpose()
                    .context("interval must be a number")?,
            },
            Some(other) => bail!("unknown cache command: {other}\n{USAGE}"),
            None => bail!("{USAGE}"),
        };
        Ok(command)
    }

    /// Runs the command and returns the lines to print.
    pub async fn execute(&self, store: &dyn DeviceStore) -> Result<Vec<String>> {
        let admin = CacheAdmin::new(store);
        let lines = match self {
            CacheCommand::List => admin.list_hosts().await?,
            CacheCommand::Search { host, service } => {
                let hits = admin.search(host.as_deref(), service.as_deref()).await?;
                hits.iter()
                    .map(serde_json::to_string)
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
            CacheCommand::DeleteHost { host } => {
                let deleted = admin.delete_host(host).await?;
                vec![format!("{host}: {}", if deleted { "deleted" } else { "not found" })]
            }
            CacheCommand::DeleteService { host, service_id } => {
                let deleted = admin.delete_service(host, service_id).await?;
                vec![format!(
                    "{host} {service_id}: {}",
                    if deleted { "deleted" } else { "not found" }
                )]
            }
            CacheCommand::ClearMapping { host, service } => {
                let cleared = admin.clear_mapping(host, service.as_deref()).await?;
                vec![format!("{host}: {cleared} mapping(s) cleared")]
            }
            CacheCommand::Force { host, interval } => {
                let flagged = admin.force(host, *interval).await?;
                vec![format!("{host}: {flagged} group(s) forced")]
            }
        };
        Ok(lines)
    }
}
