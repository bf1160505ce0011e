//! Explicit-presence wrapper for partial updates.

/// A field in a partial update.
///
/// Distinguishes "not provided" from "cleared", so omitting `assigned_to`
/// from an update never unassigns a task.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Patch<T> {
    /// Leave the current value untouched.
    #[default]
    Keep,
    /// Clear the value (the field becomes absent).
    Clear,
    /// Replace the value.
    Set(T),
}

impl<T> Patch<T> {
    /// Returns `true` if this patch leaves the field untouched.
    #[must_use]
    pub const fn is_keep(&self) -> bool {
        matches!(self, Self::Keep)
    }

    /// Builds a patch that sets `Some` values and clears on `None`.
    pub fn from_option(value: Option<T>) -> Self {
        value.map_or(Self::Clear, Self::Set)
    }

    /// Applies this patch to an optional field.
    pub fn apply_to(&self, field: &mut Option<T>)
    where
        T: Clone,
    {
        match self {
            Self::Keep => {}
            Self::Clear => *field = None,
            Self::Set(value) => *field = Some(value.clone()),
        }
    }

    /// Borrows the patch contents.
    pub const fn as_ref(&self) -> Patch<&T> {
        match self {
            Self::Keep => Patch::Keep,
            Self::Clear => Patch::Clear,
            Self::Set(value) => Patch::Set(value),
        }
    }
}
