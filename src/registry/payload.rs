//! Opaque registration payloads.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Shared, type-erased payload data.
pub type Data = Arc<dyn Any + Send + Sync>;

/// Payload of a registry entry: shared data plus a declared length.
///
/// Two payloads are the same registration when they point at the same
/// allocation and declare the same length; the data itself is never compared.
/// A payload without data and with zero length is a tombstone.
#[derive(Clone)]
pub struct Payload {
    data: Option<Data>,
    len: usize,
}

impl Payload {
    /// Wraps shared data; the length is the size of `T`.
    pub fn new<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            data: Some(value),
            len: std::mem::size_of::<T>(),
        }
    }

    /// Wraps already type-erased data with an explicit length.
    pub fn with_len(data: Data, len: usize) -> Self {
        Self {
            data: Some(data),
            len,
        }
    }

    /// Null payload that hides lower registrations at the same key.
    pub const fn tombstone() -> Self {
        Self { data: None, len: 0 }
    }

    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.data.is_none()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn data(&self) -> Option<&Data> {
        self.data.as_ref()
    }

    /// Returns the data as `Arc<T>` when it has that type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.data.clone()?.downcast::<T>().ok()
    }

    /// Identity comparison used by reprioritisation and deregistration.
    pub fn same_as(&self, other: &Payload) -> bool {
        if self.len != other.len {
            return false;
        }
        match (&self.data, &other.data) {
            (None, None) => true,
            (Some(a), Some(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            _ => false,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            None => f.write_str("Payload(tombstone)"),
            Some(d) => write!(f, "Payload({:p}, len={})", Arc::as_ptr(d), self.len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_by_allocation() {
        let a = Arc::new(7u32);
        let b = Arc::new(7u32);
        assert!(Payload::new(a.clone()).same_as(&Payload::new(a.clone())));
        assert!(!Payload::new(a.clone()).same_as(&Payload::new(b)));
        assert!(!Payload::new(a.clone()).same_as(&Payload::with_len(a, 1)));
    }

    #[test]
    fn test_tombstone_and_downcast() {
        assert!(Payload::tombstone().is_tombstone());
        assert!(Payload::tombstone().same_as(&Payload::tombstone()));

        let p = Payload::new(Arc::new(String::from("table")));
        assert_eq!(
            p.downcast::<String>().as_deref().map(String::as_str),
            Some("table")
        );
        assert!(p.downcast::<u32>().is_none());
    }
}
