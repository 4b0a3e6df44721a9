//! In-memory coordinator store: the fast shared-cache substrate, and the
//! test double.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{CoordinatorStore, HostJobStatus};
use crate::batch::signature::Signature;
use crate::errors::Result;

#[derive(Default)]
struct Inner {
    // (task, signature) -> host -> status
    members: HashMap<(String, String), HashMap<String, HostJobStatus>>,
    last_polled: HashMap<String, DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn key(task: &str, signature: &Signature) -> (String, String) {
        (task.to_string(), signature.as_str().to_string())
    }
}

#[async_trait]
impl CoordinatorStore for MemoryStore {
    async fn register_waiting(&self, task: &str, signature: &Signature, host: &str) -> Result<()> {
        let mut g = self.inner.lock().await;
        g.members
            .entry(Self::key(task, signature))
            .or_default()
            .entry(host.to_string())
            .or_insert(HostJobStatus::Waiting);
        Ok(())
    }

    async fn waiting_hosts(&self, task: &str, signature: &Signature) -> Result<Vec<String>> {
        let g = self.inner.lock().await;
        let mut hosts: Vec<String> = g
            .members
            .get(&Self::key(task, signature))
            .map(|m| {
                m.iter()
                    .filter(|(_, s)| **s == HostJobStatus::Waiting)
                    .map(|(h, _)| h.clone())
                    .collect()
            })
            .unwrap_or_default();
        hosts.sort_unstable();
        Ok(hosts)
    }

    async fn mark_pending(&self, task: &str, signature: &Signature, hosts: &[String], job_id: &str) -> Result<()> {
        let mut g = self.inner.lock().await;
        if let Some(members) = g.members.get_mut(&Self::key(task, signature)) {
            for host in hosts {
                if let Some(status) = members.get_mut(host) {
                    if *status == HostJobStatus::Waiting {
                        *status = HostJobStatus::Pending {
                            job_id: job_id.to_string(),
                        };
                    }
                }
            }
        }
        Ok(())
    }

    async fn host_status(&self, task: &str, signature: &Signature, host: &str) -> Result<Option<HostJobStatus>> {
        let g = self.inner.lock().await;
        Ok(g.members
            .get(&Self::key(task, signature))
            .and_then(|m| m.get(host))
            .cloned())
    }

    async fn apply_terminal(&self, job_id: &str, statuses: &[(String, HostJobStatus)]) -> Result<()> {
        let mut g = self.inner.lock().await;
        for members in g.members.values_mut() {
            for (host, new_status) in statuses {
                if let Some(status) = members.get_mut(host) {
                    if matches!(status, HostJobStatus::Pending { job_id: j } if j == job_id) {
                        *status = new_status.clone();
                    }
                }
            }
        }
        Ok(())
    }

    async fn last_polled(&self, job_id: &str) -> Result<Option<DateTime<Utc>>> {
        let g = self.inner.lock().await;
        Ok(g.last_polled.get(job_id).copied())
    }

    async fn touch_last_polled(&self, job_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut g = self.inner.lock().await;
        g.last_polled.insert(job_id.to_string(), at);
        Ok(())
    }
}
