//! Translation between opaque host timer handles and internal timer ids.
//!
//! Hosts differ in what their set-timer primitives hand back: an integer on
//! POSIX-like hosts, a stateful handle object on browser-like ones. The
//! scheduler speaks [`TimerId`] internally and consults a [`RefBridge`] only
//! at the boundary of the set/clear primitive families.

use std::fmt;

/// A stable identifier for work scheduled inside the fake scheduler.
///
/// Minted from a strictly increasing counter, so ascending id order equals
/// insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    /// Wrap a raw id value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer:{}", self.0)
    }
}

/// Converts between the host's opaque timer handle and [`TimerId`].
pub trait RefBridge<R> {
    /// Mint the host-visible handle for a freshly scheduled timer.
    fn id_to_ref(&self, id: TimerId) -> R;

    /// Recover the internal id from a host handle.
    ///
    /// Returns `None` when the handle could not have been produced by
    /// [`id_to_ref`](Self::id_to_ref).
    fn ref_to_id(&self, handle: &R) -> Option<TimerId>;
}

/// Identity bridge for hosts with plain integer handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntRefBridge;

impl RefBridge<u64> for IntRefBridge {
    fn id_to_ref(&self, id: TimerId) -> u64 {
        id.value()
    }

    fn ref_to_id(&self, handle: &u64) -> Option<TimerId> {
        Some(TimerId::from_raw(*handle))
    }
}

/// A browser-like stateful timer handle.
///
/// Opaque to the code holding it; only the paired [`OpaqueRefBridge`] looks
/// inside.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpaqueRef {
    id: u64,
}

impl OpaqueRef {
    /// The wrapped id value.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

/// Bridge for hosts that hand out [`OpaqueRef`] objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpaqueRefBridge;

impl RefBridge<OpaqueRef> for OpaqueRefBridge {
    fn id_to_ref(&self, id: TimerId) -> OpaqueRef {
        OpaqueRef { id: id.value() }
    }

    fn ref_to_id(&self, handle: &OpaqueRef) -> Option<TimerId> {
        Some(TimerId::from_raw(handle.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_id_ordering_follows_mint_order() {
        let a = TimerId::from_raw(1);
        let b = TimerId::from_raw(2);
        assert!(a < b);
        assert_eq!(a.value(), 1);
        assert_eq!(a.to_string(), "timer:1");
    }

    #[test]
    fn int_bridge_round_trips() {
        let bridge = IntRefBridge;
        let id = TimerId::from_raw(42);
        let handle = bridge.id_to_ref(id);
        assert_eq!(handle, 42);
        assert_eq!(bridge.ref_to_id(&handle), Some(id));
    }

    #[test]
    fn opaque_bridge_round_trips() {
        let bridge = OpaqueRefBridge;
        let id = TimerId::from_raw(7);
        let handle = bridge.id_to_ref(id);
        assert_eq!(handle.id(), 7);
        assert_eq!(bridge.ref_to_id(&handle), Some(id));
    }
}
