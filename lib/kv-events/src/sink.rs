// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Boundary to the native event sink.
//!
//! [`CacheEventSink`] is the narrow surface the publisher drives: the init
//! handshake plus the two publish calls, already flattened into the sink's
//! fixed layout. [`NativeEventSink`] is the production implementation, backed
//! by the KV C-API shared library; tests substitute in-memory fakes so the
//! sequencing and encoding logic stays independent of the unsafe marshalling.

use std::ffi::CString;
use std::fmt;
use std::os::raw::c_char;
use std::path::Path;
use std::ptr;

use libloading::Library;

use crate::publisher::KvPublisherError;

/// Status code returned by every sink call. Zero is success; any other value
/// is a sink-defined failure code.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkStatus(pub u32);

impl SinkStatus {
    pub const OK: SinkStatus = SinkStatus(0);

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three operations the event sink exposes.
pub trait CacheEventSink: Send + Sync {
    /// Register the worker identity with the sink. Called exactly once,
    /// before any publish.
    fn init(
        &self,
        namespace: &str,
        component: &str,
        worker_id: i64,
        kv_block_size: u32,
    ) -> SinkStatus;

    /// Report stored blocks. `block_token_counts[i]` tokens of the flattened
    /// `token_ids` array belong to the block hashed by `block_hashes[i]`; the
    /// block count is `block_hashes.len()`. `parent_hash` is `None` when the
    /// chain has no predecessor (`Some(0)` is a real hash, not "absent");
    /// `lora_id` 0 means no adapter.
    #[allow(clippy::too_many_arguments)]
    fn publish_stored(
        &self,
        event_id: u64,
        token_ids: &[u32],
        block_token_counts: &[usize],
        block_hashes: &[u64],
        parent_hash: Option<u64>,
        lora_id: u64,
    ) -> SinkStatus;

    /// Report evicted blocks, identified by content hash alone.
    fn publish_removed(&self, event_id: u64, block_hashes: &[u64]) -> SinkStatus;
}

type InitFn = unsafe extern "C" fn(*const c_char, *const c_char, i64, u32) -> u32;
type PublishStoredFn = unsafe extern "C" fn(
    u64,          // event_id
    *const u32,   // token_ids
    *const usize, // tokens per block
    *const u64,   // block_hashes
    usize,        // num_blocks
    *const u64,   // parent_hash, null when absent
    u64,          // lora_id, 0 when absent
) -> u32;
type PublishRemovedFn = unsafe extern "C" fn(u64, *const u64, usize) -> u32;

const INIT_SYMBOL: &str = "dynamo_llm_init";
const PUBLISH_STORED_SYMBOL: &str = "dynamo_kv_event_publish_stored";
const PUBLISH_REMOVED_SYMBOL: &str = "dynamo_kv_event_publish_removed";

/// [`CacheEventSink`] backed by the KV C-API shared library.
#[derive(Debug)]
pub struct NativeEventSink {
    init_fn: InitFn,
    publish_stored_fn: PublishStoredFn,
    publish_removed_fn: PublishRemovedFn,
    // Unmapped when dropped; must outlive the fn pointers above.
    _lib: Library,
}

impl NativeEventSink {
    /// Load the sink library and resolve all three entry points.
    ///
    /// `path` must name a trusted library implementing the KV C-API with the
    /// signatures above; loading runs its initializers.
    pub fn load(path: &Path) -> Result<Self, KvPublisherError> {
        let lib = unsafe { Library::new(path) }.map_err(|source| {
            KvPublisherError::LibraryLoad {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let init_fn = resolve::<InitFn>(&lib, INIT_SYMBOL)?;
        let publish_stored_fn = resolve::<PublishStoredFn>(&lib, PUBLISH_STORED_SYMBOL)?;
        let publish_removed_fn = resolve::<PublishRemovedFn>(&lib, PUBLISH_REMOVED_SYMBOL)?;
        Ok(Self {
            init_fn,
            publish_stored_fn,
            publish_removed_fn,
            _lib: lib,
        })
    }
}

fn resolve<T: Copy>(lib: &Library, name: &'static str) -> Result<T, KvPublisherError> {
    let symbol = unsafe { lib.get::<T>(name.as_bytes()) }
        .map_err(|source| KvPublisherError::MissingSymbol {
            symbol: name,
            source,
        })?;
    Ok(*symbol)
}

impl CacheEventSink for NativeEventSink {
    fn init(
        &self,
        namespace: &str,
        component: &str,
        worker_id: i64,
        kv_block_size: u32,
    ) -> SinkStatus {
        // Interior NULs are rejected by config validation before we get here.
        let (Ok(namespace), Ok(component)) =
            (CString::new(namespace), CString::new(component))
        else {
            tracing::error!("identity strings must not contain NUL bytes");
            return SinkStatus(u32::MAX);
        };
        let status = unsafe {
            (self.init_fn)(
                namespace.as_ptr(),
                component.as_ptr(),
                worker_id,
                kv_block_size,
            )
        };
        SinkStatus(status)
    }

    fn publish_stored(
        &self,
        event_id: u64,
        token_ids: &[u32],
        block_token_counts: &[usize],
        block_hashes: &[u64],
        parent_hash: Option<u64>,
        lora_id: u64,
    ) -> SinkStatus {
        // A null pointer, not a zero value, signals "no parent": hash 0 is a
        // legitimate parent. `parent_hash` outlives the call, so the pointer
        // into it stays valid.
        let parent_ptr = parent_hash
            .as_ref()
            .map_or(ptr::null(), |hash| hash as *const u64);
        let status = unsafe {
            (self.publish_stored_fn)(
                event_id,
                token_ids.as_ptr(),
                block_token_counts.as_ptr(),
                block_hashes.as_ptr(),
                block_hashes.len(),
                parent_ptr,
                lora_id,
            )
        };
        SinkStatus(status)
    }

    fn publish_removed(&self, event_id: u64, block_hashes: &[u64]) -> SinkStatus {
        let status = unsafe {
            (self.publish_removed_fn)(event_id, block_hashes.as_ptr(), block_hashes.len())
        };
        SinkStatus(status)
    }
}
