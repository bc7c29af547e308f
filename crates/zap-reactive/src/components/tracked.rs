use std::fmt;
use std::ops::{Add, AddAssign, Deref, Div, DivAssign, Mul, MulAssign, Rem, RemAssign, Sub, SubAssign};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A value cell that remembers whether it was written since the last
/// [`reset`](ChangeTracked::reset) and what it held before the latest write.
///
/// Writes always mark the cell changed, even when the new value equals the
/// old one; use [`update_if_different`](ChangeTracked::update_if_different)
/// for equality-gated writes. The owner calls `reset` once per tick after
/// consuming the change; otherwise `changed` stays set across ticks.
#[derive(Clone, Default, PartialEq)]
pub struct ChangeTracked<T> {
    current: T,
    /// Value before the most recent write; `None` exactly when unchanged.
    previous: Option<T>,
    changed: bool,
}

impl<T> ChangeTracked<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: value,
            previous: None,
            changed: false,
        }
    }

    pub fn get(&self) -> &T {
        &self.current
    }

    /// Store a new value, keeping the old one as `previous`.
    pub fn set(&mut self, value: T) {
        let old = std::mem::replace(&mut self.current, value);
        self.previous = Some(old);
        self.changed = true;
    }

    /// Transform the value in place.
    pub fn modify<F: FnOnce(&mut T)>(&mut self, transform: F)
    where
        T: Clone,
    {
        self.previous = Some(self.current.clone());
        transform(&mut self.current);
        self.changed = true;
    }

    /// Write only when `value` differs. Returns whether a write happened.
    pub fn update_if_different(&mut self, value: T) -> bool
    where
        T: PartialEq,
    {
        if self.current == value {
            return false;
        }
        self.set(value);
        true
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn previous(&self) -> Option<&T> {
        self.previous.as_ref()
    }

    /// Clear the change flag and the previous value. Idempotent.
    pub fn reset(&mut self) {
        self.changed = false;
        self.previous = None;
    }

    /// Take `(previous, current)` if the cell changed, resetting it.
    pub fn take_change(&mut self) -> Option<(T, &T)> {
        if !self.changed {
            return None;
        }
        self.changed = false;
        let previous = self.previous.take()?;
        Some((previous, &self.current))
    }

    pub fn into_inner(self) -> T {
        self.current
    }
}

impl<T> ChangeTracked<T>
where
    T: Clone + Add<Output = T> + Sub<Output = T> + From<u8>,
{
    pub fn increment(&mut self) {
        self.set(self.current.clone() + T::from(1u8));
    }

    pub fn decrement(&mut self) {
        self.set(self.current.clone() - T::from(1u8));
    }
}

impl ChangeTracked<bool> {
    pub fn toggle(&mut self) {
        self.set(!self.current);
    }
}

impl<T> Deref for ChangeTracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.current
    }
}

impl<T> From<T> for ChangeTracked<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for ChangeTracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeTracked")
            .field("current", &self.current)
            .field("previous", &self.previous)
            .field("changed", &self.changed)
            .finish()
    }
}

macro_rules! impl_compound_assign {
    ($($assign:ident :: $method:ident => $op:ident :: $op_method:ident),* $(,)?) => {
        $(
            impl<T> $assign<T> for ChangeTracked<T>
            where
                T: Clone + $op<Output = T>,
            {
                fn $method(&mut self, rhs: T) {
                    let value = self.current.clone().$op_method(rhs);
                    self.set(value);
                }
            }
        )*
    };
}

impl_compound_assign!(
    AddAssign::add_assign => Add::add,
    SubAssign::sub_assign => Sub::sub,
    MulAssign::mul_assign => Mul::mul,
    DivAssign::div_assign => Div::div,
    RemAssign::rem_assign => Rem::rem,
);

/// Only the current value is persisted.
impl<T: Serialize> Serialize for ChangeTracked<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.current.serialize(serializer)
    }
}

/// Loads into a clean (unchanged) cell.
impl<'de, T: Deserialize<'de>> Deserialize<'de> for ChangeTracked<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Self::new)
    }
}
