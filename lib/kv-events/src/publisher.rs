// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Publisher of *stored* / *removed* KV-cache events.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;

use crate::config::KvPublisherConfig;
use crate::protocols::{
    ExternalSequenceBlockHash, KvCacheEvent, KvCacheEventData, KvCacheRemoveData, KvCacheStoreData,
};
use crate::sink::{CacheEventSink, NativeEventSink, SinkStatus};

/// Unrecoverable publisher errors. Every variant aborts construction; once a
/// publisher exists, nothing it does can fail to the caller.
#[derive(Debug, thiserror::Error)]
pub enum KvPublisherError {
    #[error(
        "KV C-API library path not set (pass lib_path or set {})",
        crate::config::env::KV_CAPI_PATH
    )]
    MissingLibraryPath,
    #[error("invalid publisher configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to load KV C-API library {path}")]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("symbol `{symbol}` missing from KV C-API library")]
    MissingSymbol {
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },
    #[error("KV C-API init handshake failed with status {0}")]
    InitFailed(SinkStatus),
}

/// A publisher of KV events to the native sink.
///
/// Both publish operations are fire-and-forget: the caller's cache has
/// already committed its store/evict decision, so a sink-side failure is an
/// availability degradation of cache-aware routing, never an error the cache
/// manager should see. Failures are logged at debug level and dropped; no
/// retries at this layer.
pub struct KvEventPublisher {
    config: KvPublisherConfig,
    sink: Box<dyn CacheEventSink>,
    /// Internal monotonic event ID counter - ensures each event gets a
    /// unique, incrementing ID, advanced on every publish attempt whether or
    /// not the sink accepts the event.
    next_event_id: AtomicU64,
}

impl KvEventPublisher {
    /// Load the sink library named by `config` and perform the init
    /// handshake. Fails if the library cannot be loaded, lacks the KV C-API
    /// entry points, or rejects the handshake.
    pub fn new(config: KvPublisherConfig) -> anyhow::Result<Self> {
        let sink = NativeEventSink::load(&config.lib_path)?;
        Self::with_sink(Box::new(sink), config).context("initializing KV event publisher")
    }

    /// Handshake against an already-constructed sink.
    pub fn with_sink(
        sink: Box<dyn CacheEventSink>,
        config: KvPublisherConfig,
    ) -> Result<Self, KvPublisherError> {
        let config = config.validate()?;
        let status = sink.init(
            &config.namespace,
            &config.component,
            config.worker_id,
            config.kv_block_size,
        );
        if !status.is_ok() {
            return Err(KvPublisherError::InitFailed(status));
        }
        tracing::info!(
            namespace = %config.namespace,
            component = %config.component,
            worker_id = config.worker_id,
            kv_block_size = config.kv_block_size,
            "KV event publishing initialized"
        );
        Ok(Self {
            config,
            sink,
            next_event_id: AtomicU64::new(0),
        })
    }

    /// Notify the sink that a chain of one or more contiguous blocks was
    /// stored.
    ///
    /// `token_ids` is the flattened token sequence across the chain and
    /// `block_hashes` carries one hash per block; `block_size` lets the sink
    /// re-split the flattened sequence when a chain spans several blocks.
    /// Cache managers emit one block per event today; the encoding stays
    /// general.
    pub fn publish_stored(
        &self,
        token_ids: &[u32],
        block_hashes: &[u64],
        parent_hash: Option<u64>,
        block_size: u32,
        lora_id: Option<u64>,
    ) {
        let event_id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
        if block_hashes.is_empty() {
            tracing::warn!(event_id, "dropping stored KV event with no blocks");
            return;
        }
        let event = KvCacheEvent {
            event_id,
            data: KvCacheEventData::Stored(KvCacheStoreData::new(
                parent_hash,
                token_ids.to_vec(),
                block_hashes.to_vec(),
                lora_id,
                block_size,
            )),
        };
        self.publish(&event);
    }

    /// Notify the sink that previously stored blocks were evicted,
    /// identified by content hash alone.
    pub fn publish_removed(&self, block_hashes: &[u64]) {
        let event_id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
        if block_hashes.is_empty() {
            tracing::warn!(event_id, "dropping removed KV event with no blocks");
            return;
        }
        let event = KvCacheEvent {
            event_id,
            data: KvCacheEventData::Removed(KvCacheRemoveData {
                block_hashes: block_hashes
                    .iter()
                    .copied()
                    .map(ExternalSequenceBlockHash)
                    .collect(),
            }),
        };
        self.publish(&event);
    }

    /// Encode `event` into the sink's fixed layout and hand it off. A
    /// non-success status is diagnostic only.
    fn publish(&self, event: &KvCacheEvent) {
        let status = match &event.data {
            KvCacheEventData::Stored(data) => {
                let block_hashes: Vec<u64> = data.block_hashes.iter().map(|h| h.0).collect();
                self.sink.publish_stored(
                    event.event_id,
                    &data.token_ids,
                    &data.block_token_counts,
                    &block_hashes,
                    data.parent_hash.map(|h| h.0),
                    data.lora_id.unwrap_or(0),
                )
            }
            KvCacheEventData::Removed(data) => {
                let block_hashes: Vec<u64> = data.block_hashes.iter().map(|h| h.0).collect();
                self.sink.publish_removed(event.event_id, &block_hashes)
            }
        };
        if !status.is_ok() {
            tracing::debug!(
                event_id = event.event_id,
                %status,
                "KV event not accepted by sink"
            );
        }
    }

    pub fn kv_block_size(&self) -> u32 {
        self.config.kv_block_size
    }

    /// The id the next publish call will carry; equals the number of publish
    /// attempts so far.
    pub fn next_event_id(&self) -> u64 {
        self.next_event_id.load(Ordering::Relaxed)
    }
}

// Manual impl: the boxed sink has no Debug surface.
impl fmt::Debug for KvEventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvEventPublisher")
            .field("config", &self.config)
            .field("next_event_id", &self.next_event_id)
            .finish_non_exhaustive()
    }
}
