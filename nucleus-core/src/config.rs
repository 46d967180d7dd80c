//! Ambient configuration: pool sizing, shard-mutex dimensions, and the logging sink, grouped
//! into plain structs with `Default` impls carrying the literal tunables named in
//! `SPEC_FULL.md` §4.7.7. No config-file format is parsed here - that's a CLI/embedder concern -
//! but every struct derives `Deserialize` so one can be loaded from whatever format the
//! embedder prefers.

use crate::logging::LoggingConfig;
use crate::selector::PoolConfig;
use crate::service::ServiceConfig;
use serde_derive::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub service: ServiceConfig,
    pub object_pool: PoolConfig,
    pub tcp_pool: PoolConfig,
    pub listener_pool: PoolConfig,
    pub talker_pool: PoolConfig,
    pub identity: IdentityConfig,
    pub serializer: SerializerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging: LoggingConfig::default(),
            service: ServiceConfig::default(),
            object_pool: PoolConfig::default(),
            tcp_pool: PoolConfig::default(),
            listener_pool: PoolConfig {
                capacity: 1,
                max_workers: 1,
                time_read_interval: 128,
            },
            talker_pool: PoolConfig::default(),
            identity: IdentityConfig::default(),
            serializer: SerializerConfig::default(),
        }
    }
}

/// Mirrors `crate::identity::{SERVICE_BITS, INDEX_BITS}` for documentation/serialization
/// purposes; the bit split itself stays a compile-time const per the teacher's `object_id!`
/// overflow-panic idiom, so this struct is informational rather than load-bearing.
#[derive(Clone, Debug, Deserialize)]
pub struct IdentityConfig {
    pub service_bits: u32,
    pub index_bits: u32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        IdentityConfig {
            service_bits: crate::identity::SERVICE_BITS,
            index_bits: crate::identity::INDEX_BITS,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SerializerConfig {
    pub max_nesting: usize,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        SerializerConfig { max_nesting: 32 }
    }
}
