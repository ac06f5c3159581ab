// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Poison-tolerant lock acquisition.
//!
//! A handler that panics while holding the registry lock must not take every
//! other session down with it. These helpers log the poisoning and hand back
//! the guard, so the registry map stays usable.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "security::locks",
            event = "LOCK_POISONED_READ",
            "RwLock poisoned during read; recovering guard"
        );
        poisoned.into_inner()
    })
}

#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "security::locks",
            event = "LOCK_POISONED_WRITE",
            "RwLock poisoned during write; recovering guard"
        );
        poisoned.into_inner()
    })
}
