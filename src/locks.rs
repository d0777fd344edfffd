// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Poison-recovering lock helpers.
//!
//! A panic inside an event subscriber callback must not take the whole
//! supervisor down with a poisoned lock. These helpers log the poisoning
//! and hand back the guard anyway.
//!
//! ```no_run
//! use std::sync::RwLock;
//! use ariaflow::locks::{resilient_read, resilient_write};
//!
//! let lock = RwLock::new(42);
//! let value = *resilient_read(&lock);
//! *resilient_write(&lock) = value + 1;
//! ```

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "ariaflow::locks",
                event = "LOCK_POISONED_READ",
                "RwLock was poisoned during read acquisition, recovering"
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a write lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "ariaflow::locks",
                event = "LOCK_POISONED_WRITE",
                "RwLock was poisoned during write acquisition, recovering"
            );
            poisoned.into_inner()
        }
    }
}
