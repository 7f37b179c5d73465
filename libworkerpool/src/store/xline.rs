use async_trait::async_trait;
use etcd_client::{Client, GetOptions};
use tracing::{debug, warn};

use super::{CapacityRegistry, DesiredStateSource, desired_state_key, field_key, hosts_key};
use crate::error::Result;
use crate::models::DesiredState;

/// Desired state and capacity registry kept in Xline (or any etcd compatible store).
///
/// like etcd, k:plugins:<namespace>:<hostname>/<queue> v:desired worker count
/// k:plugins:<namespace>:hosts/<hostname> v:max children of that host
pub struct XlineStore {
    endpoints: Vec<String>,
    namespace: String,
    hostname: String,
    client: Option<Client>,
}

impl XlineStore {
    /// Does not connect. The connection is made on first use and re-made after a failure.
    pub fn new(endpoints: Vec<String>, namespace: &str, hostname: &str) -> Self {
        Self {
            endpoints,
            namespace: namespace.to_string(),
            hostname: hostname.to_string(),
            client: None,
        }
    }

    async fn client(&mut self) -> Result<&mut Client> {
        let client = match self.client.take() {
            Some(client) => client,
            None => {
                debug!("connecting to xline at {:?}", self.endpoints);
                Client::connect(&self.endpoints, None).await?
            }
        };
        Ok(self.client.insert(client))
    }

    async fn fetch_desired(&mut self) -> Result<DesiredState> {
        let prefix = field_key(&desired_state_key(&self.namespace, &self.hostname), "");
        let client = self.client().await?;
        let resp = client
            .get(prefix.clone(), Some(GetOptions::new().with_prefix()))
            .await?;
        let entries = resp.kvs().iter().filter_map(|kv| {
            match (kv.key_str(), kv.value_str()) {
                (Ok(k), Ok(v)) => Some((k.to_string(), v.to_string())),
                _ => {
                    warn!("skipping non utf8 entry under {prefix}");
                    None
                }
            }
        });
        Ok(parse_desired_state(&prefix, entries))
    }

    async fn put_capacity(&mut self, max_children: usize) -> Result<()> {
        let key = field_key(&hosts_key(&self.namespace), &self.hostname);
        let client = self.client().await?;
        client.put(key, max_children.to_string(), None).await?;
        Ok(())
    }

    async fn delete_capacity(&mut self) -> Result<()> {
        let key = field_key(&hosts_key(&self.namespace), &self.hostname);
        let client = self.client().await?;
        client.delete(key, None).await?;
        Ok(())
    }

    /// Drop the connection after a failed request so the next call reconnects.
    fn reset_on_err<T>(&mut self, res: Result<T>) -> Result<T> {
        if res.is_err() {
            self.client = None;
        }
        res
    }
}

#[async_trait]
impl DesiredStateSource for XlineStore {
    async fn desired_state(&mut self) -> Result<DesiredState> {
        let res = self.fetch_desired().await;
        self.reset_on_err(res)
    }
}

#[async_trait]
impl CapacityRegistry for XlineStore {
    async fn register(&mut self, max_children: usize) -> Result<()> {
        let res = self.put_capacity(max_children).await;
        self.reset_on_err(res)
    }

    async fn deregister(&mut self) -> Result<()> {
        let res = self.delete_capacity().await;
        self.reset_on_err(res)
    }
}

/// Turn `<prefix><queue> => <count>` entries into desired state.
/// Counts that are not non-negative integers are ignored with a warning.
pub fn parse_desired_state<I>(prefix: &str, entries: I) -> DesiredState
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut desired = DesiredState::new();
    for (key, value) in entries {
        let Some(queue) = key.strip_prefix(prefix) else {
            continue;
        };
        if queue.is_empty() {
            continue;
        }
        match value.trim().parse::<usize>() {
            Ok(count) => {
                desired.insert(queue.to_string(), count);
            }
            Err(e) => warn!("invalid worker count {value:?} for queue {queue}: {e}, ignored"),
        }
    }
    desired
}
