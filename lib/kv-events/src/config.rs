// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Configuration for the KV event publisher.
//!
//! Identity is resolved once, at construction, from explicit parameters with
//! environment-variable fallbacks. The sink library path has no default;
//! leaving it unset is a configuration error.

use std::path::PathBuf;

use crate::publisher::KvPublisherError;

/// Environment variables honored by [`KvPublisherConfig::from_settings`].
pub mod env {
    /// Namespace the worker registers under.
    pub const KV_NAMESPACE: &str = "DYN_KV_NAMESPACE";
    /// Component name within the namespace.
    pub const KV_COMPONENT: &str = "DYN_KV_COMPONENT";
    /// Numeric worker identifier.
    pub const KV_WORKER_ID: &str = "DYN_KV_WORKER_ID";
    /// Filesystem path of the KV C-API shared library.
    pub const KV_CAPI_PATH: &str = "DYN_KV_CAPI_PATH";
}

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_COMPONENT: &str = "backend";

/// Identity registered with the event sink, plus the sink library location.
///
/// Fixed for the lifetime of a [`crate::KvEventPublisher`]; the identity
/// fields are sent to the sink once during the init handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPublisherConfig {
    pub namespace: String,
    pub component: String,
    pub worker_id: i64,
    /// Tokens per KV-cache block.
    pub kv_block_size: u32,
    /// Path of the native sink library.
    pub lib_path: PathBuf,
}

impl KvPublisherConfig {
    /// Resolve a config from explicit parameters, falling back to the
    /// [`env`] variables and finally to defaults (`"default"` namespace,
    /// `"backend"` component, worker id 0).
    pub fn from_settings(
        namespace: Option<String>,
        component: Option<String>,
        worker_id: Option<i64>,
        lib_path: Option<PathBuf>,
        kv_block_size: u32,
    ) -> Result<Self, KvPublisherError> {
        let namespace = namespace
            .or_else(|| env_non_empty(env::KV_NAMESPACE))
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let component = component
            .or_else(|| env_non_empty(env::KV_COMPONENT))
            .unwrap_or_else(|| DEFAULT_COMPONENT.to_string());
        let worker_id = match worker_id {
            Some(id) => id,
            None => match env_non_empty(env::KV_WORKER_ID) {
                Some(raw) => raw.parse().map_err(|_| {
                    KvPublisherError::InvalidConfig(format!(
                        "{} must be an integer, got {raw:?}",
                        env::KV_WORKER_ID
                    ))
                })?,
                None => 0,
            },
        };
        let lib_path = lib_path
            .or_else(|| env_non_empty(env::KV_CAPI_PATH).map(PathBuf::from))
            .ok_or(KvPublisherError::MissingLibraryPath)?;

        Self {
            namespace,
            component,
            worker_id,
            kv_block_size,
            lib_path,
        }
        .validate()
    }

    /// Check the handshake input constraints: identifiers are non-empty and
    /// NUL-free, block size is positive.
    pub fn validate(self) -> Result<Self, KvPublisherError> {
        for (field, value) in [("namespace", &self.namespace), ("component", &self.component)] {
            if value.trim().is_empty() || value.contains('\0') {
                return Err(KvPublisherError::InvalidConfig(format!(
                    "{field} must be a non-empty identifier"
                )));
            }
        }
        if self.kv_block_size == 0 {
            return Err(KvPublisherError::InvalidConfig(
                "kv_block_size must be positive".to_string(),
            ));
        }
        Ok(self)
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explicit(kv_block_size: u32) -> Result<KvPublisherConfig, KvPublisherError> {
        KvPublisherConfig::from_settings(
            Some("dynamo".to_string()),
            Some("decode".to_string()),
            Some(3),
            Some(PathBuf::from("/tmp/libdynamo_llm.so")),
            kv_block_size,
        )
    }

    // All environment manipulation lives in this one test to keep the
    // process-global env race-free under the parallel test runner.
    #[test]
    fn test_settings_resolution() {
        unsafe {
            std::env::remove_var(env::KV_NAMESPACE);
            std::env::remove_var(env::KV_COMPONENT);
            std::env::remove_var(env::KV_WORKER_ID);
            std::env::remove_var(env::KV_CAPI_PATH);
        }
        let err = KvPublisherConfig::from_settings(None, None, None, None, 16).unwrap_err();
        assert!(matches!(err, KvPublisherError::MissingLibraryPath));

        unsafe {
            std::env::set_var(env::KV_NAMESPACE, "prod");
            std::env::set_var(env::KV_WORKER_ID, "7");
            std::env::set_var(env::KV_CAPI_PATH, "/opt/dynamo/libdynamo_llm.so");
        }
        let config = KvPublisherConfig::from_settings(None, None, None, None, 32).unwrap();
        assert_eq!(config.namespace, "prod");
        assert_eq!(config.component, "backend");
        assert_eq!(config.worker_id, 7);
        assert_eq!(config.kv_block_size, 32);
        assert_eq!(config.lib_path, PathBuf::from("/opt/dynamo/libdynamo_llm.so"));

        // Explicit parameters win over the environment.
        let config = explicit(16).unwrap();
        assert_eq!(config.namespace, "dynamo");
        assert_eq!(config.component, "decode");
        assert_eq!(config.worker_id, 3);
        assert_eq!(config.lib_path, PathBuf::from("/tmp/libdynamo_llm.so"));

        unsafe {
            std::env::remove_var(env::KV_NAMESPACE);
            std::env::remove_var(env::KV_WORKER_ID);
            std::env::remove_var(env::KV_CAPI_PATH);
        }
    }

    #[test]
    fn test_rejects_zero_block_size() {
        let err = explicit(0).unwrap_err();
        assert!(matches!(err, KvPublisherError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_empty_namespace() {
        let err = KvPublisherConfig::from_settings(
            Some("  ".to_string()),
            Some("decode".to_string()),
            Some(0),
            Some(PathBuf::from("/tmp/libdynamo_llm.so")),
            16,
        )
        .unwrap_err();
        assert!(matches!(err, KvPublisherError::InvalidConfig(_)));
    }
}
