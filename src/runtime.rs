// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Composition root for the sync layer.
//!
//! [`SyncRuntime`] is constructed once at process startup, validates the
//! policy table, connects the configured stores (a shared SQL pool when
//! `sql_url` is set, in-memory otherwise), and hands out the orchestrator
//! behind an `Arc`. Request handlers receive that reference explicitly —
//! there is no global mutable state anywhere in the crate.
//!
//! # Lifecycle
//!
//! ```text
//! Created → Connecting → Ready → ShuttingDown
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use mirror_sync::{MirrorSyncConfig, SyncRuntime};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut runtime = SyncRuntime::new(MirrorSyncConfig::default());
//! runtime.start().await.expect("start failed");
//!
//! let orchestrator = runtime.orchestrator().expect("runtime is ready");
//! // hand `orchestrator` to request handlers
//! # let _ = orchestrator;
//! # }
//! ```

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

use crate::audit::{AuditError, AuditLog, MemoryAuditLog, SqlAuditLog};
use crate::config::MirrorSyncConfig;
use crate::idempotency::{IdemError, IdempotencyStore, MemoryIdempotencyStore, SqlIdempotencyStore};
use crate::mirror::{MemoryMirrorStore, MirrorStore, SqlMirrorStore, StoreError};
use crate::orchestrator::SyncOrchestrator;
use crate::policy::{PolicyError, PolicyTable};

/// Runtime lifecycle state, broadcast to watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Just created, not yet started
    Created,
    /// Connecting stores
    Connecting,
    /// Orchestrator available
    Ready,
    /// Graceful shutdown in progress
    ShuttingDown,
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Ready => write!(f, "Ready"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("mirror store init: {0}")]
    Store(#[from] StoreError),
    #[error("audit log init: {0}")]
    Audit(#[from] AuditError),
    #[error("idempotency store init: {0}")]
    Idempotency(#[from] IdemError),
}

/// Dependency-injection container owning the orchestrator and its stores.
pub struct SyncRuntime {
    config: MirrorSyncConfig,
    state: watch::Sender<RuntimeState>,
    state_rx: watch::Receiver<RuntimeState>,
    orchestrator: Option<Arc<SyncOrchestrator>>,
}

impl SyncRuntime {
    /// Create an unstarted runtime. Call [`start`](Self::start) to
    /// validate config and connect stores.
    #[must_use]
    pub fn new(config: MirrorSyncConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(RuntimeState::Created);
        Self {
            config,
            state: state_tx,
            state_rx,
            orchestrator: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> RuntimeState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<RuntimeState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == RuntimeState::Ready
    }

    #[must_use]
    pub fn config(&self) -> &MirrorSyncConfig {
        &self.config
    }

    /// Validate policies, connect stores, and build the orchestrator.
    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        let policies = PolicyTable::from_config(&self.config)?;
        let _ = self.state.send_replace(RuntimeState::Connecting);

        let (mirror, audit, idempotency): (
            Arc<dyn MirrorStore>,
            Arc<dyn AuditLog>,
            Arc<dyn IdempotencyStore>,
        ) = match &self.config.sql_url {
            Some(url) => {
                info!(url = %url, "Connecting SQL stores");
                let mirror = SqlMirrorStore::new(url, self.config.sql_max_connections).await?;
                let pool = mirror.pool();
                let is_sqlite = mirror.is_sqlite();

                let audit = SqlAuditLog::with_pool(pool.clone(), is_sqlite);
                audit.init_schema().await?;

                let idempotency = SqlIdempotencyStore::with_pool(pool, is_sqlite);
                idempotency.init_schema().await?;

                (
                    Arc::new(mirror) as Arc<dyn MirrorStore>,
                    Arc::new(audit) as Arc<dyn AuditLog>,
                    Arc::new(idempotency) as Arc<dyn IdempotencyStore>,
                )
            }
            None => {
                info!("No sql_url configured, using in-memory stores");
                (
                    Arc::new(MemoryMirrorStore::new()) as Arc<dyn MirrorStore>,
                    Arc::new(MemoryAuditLog::new()) as Arc<dyn AuditLog>,
                    Arc::new(MemoryIdempotencyStore::new()) as Arc<dyn IdempotencyStore>,
                )
            }
        };

        self.orchestrator = Some(Arc::new(SyncOrchestrator::new(
            policies,
            mirror,
            audit,
            idempotency,
            &self.config,
        )));

        let _ = self.state.send_replace(RuntimeState::Ready);
        info!("Sync runtime ready");
        Ok(())
    }

    /// The orchestrator, once [`start`](Self::start) has succeeded.
    #[must_use]
    pub fn orchestrator(&self) -> Option<Arc<SyncOrchestrator>> {
        self.orchestrator.clone()
    }

    /// Mark the runtime as shutting down. Stores close when the last
    /// orchestrator reference drops.
    pub fn shutdown(&mut self) {
        let _ = self.state.send_replace(RuntimeState::ShuttingDown);
        self.orchestrator = None;
        info!("Sync runtime shut down");
    }
}
