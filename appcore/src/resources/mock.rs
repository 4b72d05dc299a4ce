use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{CloseError, ProbeError};
use crate::resources::{Close, Probe};

/// Scriptable resource that counts how often it was probed and closed.
/// Clones share the same counters.
#[derive(Clone, Debug)]
pub struct MockResource {
    probe_ret: Result<(), ProbeError>,
    close_ret: Result<(), CloseError>,
    probe_calls: Arc<AtomicUsize>,
    close_calls: Arc<AtomicUsize>,
}

impl MockResource {
    pub fn healthy() -> Self {
        Self {
            probe_ret: Ok(()),
            close_ret: Ok(()),
            probe_calls: Arc::new(AtomicUsize::new(0)),
            close_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unreachable() -> Self {
        Self::healthy().probe_ret(Err(ProbeError::Unreachable("connection refused".to_owned())))
    }

    pub fn probe_ret(mut self, ret: Result<(), ProbeError>) -> Self {
        self.probe_ret = ret;
        self
    }

    pub fn close_ret(mut self, ret: Result<(), CloseError>) -> Self {
        self.close_ret = ret;
        self
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for MockResource {
    async fn probe(&self) -> Result<(), ProbeError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.probe_ret.clone()
    }
}

#[async_trait]
impl Close for MockResource {
    async fn close(&self) -> Result<(), CloseError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.close_ret.clone()
    }
}
