//! The pod router: a pure domain -> pod hash plus a lazily populated cache
//! of the per-pod `Frontier` handles a parser uses to enqueue a link that
//! belongs to someone else's pod.

use crate::crawler::frontier::Frontier;
use dashmap::DashMap;
use std::sync::Arc;

/// `pod_for_domain(domain) = first_8_hex(md5(domain)) mod num_pods`.
/// Stable across processes since every pod computes the same hash for the
/// same domain string.
pub fn pod_for_domain(domain: &str, num_pods: usize) -> usize {
    let digest = md5::compute(domain.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) % num_pods.max(1) as u64) as usize
}

/// Constructs the `Frontier` handle for a pod other than our own, the first
/// time it's needed. Handles are kept for the lifetime of the process since
/// pods don't come and go during a run.
pub type PodHandleBuilder = Arc<dyn Fn(usize) -> Arc<Frontier> + Send + Sync>;

pub struct PodRouter {
    own_pod_id: usize,
    num_pods: usize,
    own_frontier: Arc<Frontier>,
    build_handle: PodHandleBuilder,
    handles: DashMap<usize, Arc<Frontier>>,
}

impl PodRouter {
    pub fn new(
        own_pod_id: usize,
        num_pods: usize,
        own_frontier: Arc<Frontier>,
        build_handle: PodHandleBuilder,
    ) -> Self {
        Self {
            own_pod_id,
            num_pods,
            own_frontier,
            build_handle,
            handles: DashMap::new(),
        }
    }

    pub fn pod_for(&self, domain: &str) -> usize {
        pod_for_domain(domain, self.num_pods)
    }

    /// Returns the `Frontier` handle that owns `domain` -- our own pod's
    /// frontier if the hash lands locally, otherwise the cached (or freshly
    /// built) handle for the remote pod.
    pub fn frontier_for(&self, domain: &str) -> Arc<Frontier> {
        let pod_id = self.pod_for(domain);
        if pod_id == self.own_pod_id {
            return self.own_frontier.clone();
        }

        if let Some(handle) = self.handles.get(&pod_id) {
            return handle.clone();
        }

        let handle = (self.build_handle)(pod_id);
        self.handles.insert(pod_id, handle.clone());
        handle
    }
}
