//! # Published API tables.
//!
//! Components find each other through the registry: each one publishes a
//! table under [`Class::API`] with its API id as the type and a date-coded
//! version as the id.
//!
//! ```text
//! (API, REGISTRY,   2024_01_15) ─► Arc<Registry>
//! (API, DISPATCHER, 2024_01_15) ─► Arc<Dispatcher>
//! (API, TIMELINE,   2024_01_15) ─► Arc<Timelines>
//! ```
//!
//! Lookups ask for an exact version; a consumer built against an older table
//! keeps working as long as the provider still publishes that version too.

use std::any::Any;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::registry::{Class, Id, Key, Payload, Registry, Type};

pub const REGISTRY: Type = Type(0x5244_5200);
pub const DISPATCHER: Type = Type(0x4450_5300);
pub const TIMELINE: Type = Type(0x544c_4d00);

pub const REGISTRY_VERSION: Id = Id(20240115);
pub const DISPATCHER_VERSION: Id = Id(20240115);
pub const TIMELINE_VERSION: Id = Id(20240115);

#[inline]
fn key(api: Type, version: Id) -> Key {
    Key::new(Class::API, api, version)
}

/// Publishes `table` as `api`/`version`; returns the payload to withdraw it with.
pub fn publish<T: Any + Send + Sync>(
    registry: &Registry,
    api: Type,
    version: Id,
    table: Arc<T>,
) -> Result<Payload> {
    let payload = Payload::new(table);
    registry.register(key(api, version), payload.clone(), 0)?;
    Ok(payload)
}

/// Finds the table published as `api`/`version`.
///
/// Fails with [`Error::UnknownKey`] when nothing is published there, or when
/// the published table is not a `T`.
pub fn lookup<T: Any + Send + Sync>(registry: &Registry, api: Type, version: Id) -> Result<Arc<T>> {
    registry
        .find_exact(key(api, version))?
        .downcast::<T>()
        .ok_or(Error::UnknownKey)
}

/// Withdraws a table published with [`publish`].
pub fn withdraw(registry: &Registry, api: Type, version: Id, payload: &Payload) -> Result<()> {
    registry.deregister(key(api, version), payload)
}
