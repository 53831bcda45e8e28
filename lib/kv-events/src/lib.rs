// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Worker-side publishing of KV-cache *stored* / *removed* events.
//!
//! A backend worker that manages its own prefix cache uses [`KvEventPublisher`]
//! to notify the Dynamo runtime whenever a block of KV-cache data is stored or
//! evicted. The runtime indexes those events so the router can steer future
//! requests toward workers that already hold a matching token prefix.
//!
//! The runtime is consumed as a native shared library (the KV C-API). The
//! publisher registers the worker's identity with the library once at
//! construction, then encodes each event into the library's fixed call layout,
//! stamped with a monotonic event id. Publish failures are logged and
//! swallowed: the caller's cache has already committed its transition, and a
//! lost notification only degrades routing quality.

pub mod config;
pub mod protocols;
pub mod publisher;
pub mod sink;

pub use config::KvPublisherConfig;
pub use publisher::{KvEventPublisher, KvPublisherError};
pub use sink::{CacheEventSink, NativeEventSink, SinkStatus};
