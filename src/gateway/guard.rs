// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Guarded rail gateway.
//!
//! Decorates any [`RailGateway`] with a token bucket and a circuit
//! breaker, both per rail. The orchestrator stays oblivious: a throttled
//! or circuit-open call surfaces as an ordinary gateway failure, which
//! degrades on the read path and surfaces on the write path.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::limiter::TokenBucket;
use super::{FetchError, RailGateway, RemoteWriteError};
use crate::config::MirrorSyncConfig;
use crate::record::RawRecord;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};

pub struct GuardedGateway {
    inner: Arc<dyn RailGateway>,
    limiter: TokenBucket,
    breaker: CircuitBreaker,
}

impl GuardedGateway {
    pub fn new(inner: Arc<dyn RailGateway>, limiter: TokenBucket, breaker: CircuitBreaker) -> Self {
        Self {
            inner,
            limiter,
            breaker,
        }
    }

    /// Build from config with a default breaker named after the rail.
    pub fn from_config(inner: Arc<dyn RailGateway>, config: &MirrorSyncConfig) -> Self {
        let limiter = TokenBucket::new(config.rail_rate_capacity, config.rail_rate_refill_per_sec);
        let breaker = CircuitBreaker::new(inner.rail().to_string(), CircuitConfig::default());
        Self::new(inner, limiter, breaker)
    }
}

#[async_trait]
impl RailGateway for GuardedGateway {
    fn rail(&self) -> &str {
        self.inner.rail()
    }

    async fn fetch_remote(&self) -> Result<(Vec<RawRecord>, String), FetchError> {
        if !self.limiter.try_acquire() {
            crate::metrics::record_throttle(self.rail());
            return Err(FetchError::Throttled);
        }

        self.breaker
            .call(|| self.inner.fetch_remote())
            .await
            .map_err(|e| match e {
                CircuitError::Rejected => FetchError::CircuitOpen,
                CircuitError::Inner(inner) => inner,
            })
    }

    async fn call_remote(
        &self,
        operation: &str,
        payload: &Value,
    ) -> Result<RawRecord, RemoteWriteError> {
        if !self.limiter.try_acquire() {
            crate::metrics::record_throttle(self.rail());
            return Err(RemoteWriteError::Throttled);
        }

        self.breaker
            .call(|| self.inner.call_remote(operation, payload))
            .await
            .map_err(|e| match e {
                CircuitError::Rejected => RemoteWriteError::CircuitOpen,
                CircuitError::Inner(inner) => inner,
            })
    }
}
