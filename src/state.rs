//! The shared, typed key-value state that gates operation admission.
//!
//! [`State`] is a plain map from string keys to tagged scalar [`Value`]s.
//! The borrow system expresses the two interfaces the engine needs: guards
//! receive `&State` (the immutable view) and mutators receive `&mut State`.
//! [`SharedState`] adds the single lock the dispatcher holds across guard
//! evaluation and pre-execution mutation, plus locked convenience accessors
//! for code outside that critical section.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

/// A tagged scalar stored in the engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    /// Boolean flag.
    Bool(bool),
    /// 32-bit signed integer.
    Int32(i32),
    /// 32-bit unsigned integer.
    UInt32(u32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit unsigned integer.
    UInt64(u64),
}

/// The engine state: a mapping from string keys to typed scalars.
///
/// Mutation happens through `&mut State` — inside the dispatcher's
/// admission critical section or a post-execute hook — so the type itself
/// carries no locking.
#[derive(Debug, Default)]
pub struct State {
    map: HashMap<String, Value>,
}

impl State {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.map.insert(key.into(), value);
    }

    /// Add a signed delta to the integer stored at `key`.
    ///
    /// Saturates at the bounds of the stored integer type. A missing key or
    /// a boolean value is left untouched and `false` is returned.
    pub fn adjust(&mut self, key: &str, delta: i64) -> bool {
        match self.map.get_mut(key) {
            Some(Value::Int32(v)) => {
                *v = v.saturating_add_signed_i64(delta);
                true
            }
            Some(Value::UInt32(v)) => {
                *v = v.saturating_add_signed_i64(delta);
                true
            }
            Some(Value::Int64(v)) => {
                *v = v.saturating_add(delta);
                true
            }
            Some(Value::UInt64(v)) => {
                *v = if delta >= 0 {
                    v.saturating_add(delta as u64)
                } else {
                    v.saturating_sub(delta.unsigned_abs())
                };
                true
            }
            _ => false,
        }
    }

    /// Remove `key`, returning the previous value if any.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.map.remove(key)
    }

    /// Number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the state holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Look up `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.map.get(key).copied()
    }

    /// Look up `key` as a boolean.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(Value::Bool(v)) => Some(v),
            _ => None,
        }
    }

    /// Look up `key` as a 32-bit signed integer.
    #[must_use]
    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.get(key) {
            Some(Value::Int32(v)) => Some(v),
            _ => None,
        }
    }

    /// Look up `key` as a 32-bit unsigned integer.
    #[must_use]
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        match self.get(key) {
            Some(Value::UInt32(v)) => Some(v),
            _ => None,
        }
    }

    /// Look up `key` as a 64-bit signed integer.
    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(Value::Int64(v)) => Some(v),
            _ => None,
        }
    }

    /// Look up `key` as a 64-bit unsigned integer.
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key) {
            Some(Value::UInt64(v)) => Some(v),
            _ => None,
        }
    }
}

trait SaturatingAddSignedI64 {
    fn saturating_add_signed_i64(self, delta: i64) -> Self;
}

impl SaturatingAddSignedI64 for i32 {
    fn saturating_add_signed_i64(self, delta: i64) -> Self {
        i64::from(self)
            .saturating_add(delta)
            .clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }
}

impl SaturatingAddSignedI64 for u32 {
    fn saturating_add_signed_i64(self, delta: i64) -> Self {
        i64::from(self)
            .saturating_add(delta)
            .clamp(0, i64::from(u32::MAX)) as u32
    }
}

/// The engine state behind its single lock.
///
/// The dispatcher locks it once per dispatch cycle and holds the guard
/// across guard checks, victim extraction and pre-execution mutation; the
/// locked convenience methods below serve external collaborators that
/// read or seed state outside that window.
#[derive(Debug, Default)]
pub struct SharedState {
    inner: Mutex<State>,
}

impl SharedState {
    /// Create an empty shared state.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Lock the state for a critical section.
    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.lock()
    }

    /// Set `key` to `value` under the lock.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.lock().set(key, value);
    }

    /// Add a signed delta to the integer at `key` under the lock.
    pub fn adjust(&self, key: &str, delta: i64) -> bool {
        self.inner.lock().adjust(key, delta)
    }

    /// Remove `key` under the lock.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.lock().remove(key)
    }

    /// Look up `key` under the lock.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().get(key)
    }

    /// Look up `key` as a boolean under the lock.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.inner.lock().get_bool(key)
    }

    /// Look up `key` as a 64-bit unsigned integer under the lock.
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.inner.lock().get_u64(key)
    }
}
