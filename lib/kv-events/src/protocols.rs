// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Value types for KV-cache stored/removed events.
//!
//! Events are ephemeral: the publisher builds one per notification, encodes it
//! into the sink's call layout, and drops it. The sink reconstructs prefix
//! chains from the parent hashes; nothing here dereferences or validates them.

use serde::{Deserialize, Serialize};

/// Content hash of a KV-cache block, as computed by the cache manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalSequenceBlockHash(pub u64);

/// A single notification, stamped with its publisher-local sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvCacheEvent {
    pub event_id: u64,
    pub data: KvCacheEventData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvCacheEventData {
    Stored(KvCacheStoreData),
    Removed(KvCacheRemoveData),
}

/// One or more contiguous blocks entering the cache, carrying the parallel
/// array representation the sink consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvCacheStoreData {
    /// Hash of the block immediately preceding this chain, if any.
    ///
    /// `Some(0)` is a legitimate parent hash and must stay distinguishable
    /// from `None`; at the ABI the absent case becomes a null pointer, never
    /// a zero value.
    pub parent_hash: Option<ExternalSequenceBlockHash>,
    /// Token ids across all blocks in the event, flattened in block order.
    pub token_ids: Vec<u32>,
    /// Token count per block, used by the sink to re-split `token_ids`.
    /// Always sums to `token_ids.len()`.
    pub block_token_counts: Vec<usize>,
    /// One content hash per block.
    pub block_hashes: Vec<ExternalSequenceBlockHash>,
    /// LoRA adapter owning these blocks. Encoded as the sink's sentinel 0
    /// when absent; the sink defines adapter id 0 to mean "no adapter".
    pub lora_id: Option<u64>,
}

impl KvCacheStoreData {
    /// Build store data for a chain of blocks, deriving the per-block token
    /// counts.
    ///
    /// Cache managers emit one block per event today, in which case the whole
    /// flattened sequence belongs to that block. Longer chains take up to
    /// `kv_block_size` tokens per leading block, remainder on the final one;
    /// the counts never total more tokens than `token_ids` holds, so the sink
    /// cannot be told to read past the array.
    pub fn new(
        parent_hash: Option<u64>,
        token_ids: Vec<u32>,
        block_hashes: Vec<u64>,
        lora_id: Option<u64>,
        kv_block_size: u32,
    ) -> Self {
        let block_token_counts =
            block_token_counts(token_ids.len(), block_hashes.len(), kv_block_size);
        Self {
            parent_hash: parent_hash.map(ExternalSequenceBlockHash),
            token_ids,
            block_token_counts,
            block_hashes: block_hashes
                .into_iter()
                .map(ExternalSequenceBlockHash)
                .collect(),
            lora_id,
        }
    }
}

/// Previously stored blocks leaving the cache, identified by hash alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvCacheRemoveData {
    pub block_hashes: Vec<ExternalSequenceBlockHash>,
}

fn block_token_counts(num_tokens: usize, num_blocks: usize, kv_block_size: u32) -> Vec<usize> {
    match num_blocks {
        0 => Vec::new(),
        1 => vec![num_tokens],
        n => {
            let full = kv_block_size as usize;
            let mut remaining = num_tokens;
            let mut counts = Vec::with_capacity(n);
            for _ in 0..n - 1 {
                let take = remaining.min(full);
                counts.push(take);
                remaining -= take;
            }
            counts.push(remaining);
            counts
        }
    }
}
