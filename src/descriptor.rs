use crate::error::InvalidType;
use crate::raw::SlotLayout;

/// Hashes the bytes of a key.
pub type HashFn = fn(&[u8]) -> u64;

/// Compares the bytes of two keys for equality.
pub type KeyEqualFn = fn(&[u8], &[u8]) -> bool;

/// Releases whatever a key or value refers to. Called with the stored bytes,
/// which the table frees afterwards.
pub type DestroyFn = fn(&[u8]);

const PTR_SIZE: usize = core::mem::size_of::<usize>();

/// Describes the fixed-size keys and values of a type-erased table.
///
/// Keys and values are opaque byte strings of exactly `key_size` and
/// `value_size` bytes. `hash` is required. Without `key_equal` keys are
/// compared bytewise, and without the destroy hooks nothing runs when an
/// entry leaves the table.
///
/// The table borrows its descriptor for its whole lifetime, so one descriptor
/// can be shared by any number of tables.
///
/// # Examples
///
/// ```rust
/// use vmap::TypeDescriptor;
///
/// fn hash(key: &[u8]) -> u64 {
///     key.iter().fold(5381u64, |h, &b| h.wrapping_mul(33).wrapping_add(b as u64))
/// }
///
/// let descriptor = TypeDescriptor::new(4, 8).with_hash(hash);
/// assert_eq!(descriptor.key_size(), 4);
/// assert_eq!((descriptor.key_size() + descriptor.padding()) % size_of::<usize>(), 0);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TypeDescriptor {
    key_size: usize,
    value_size: usize,
    hash: Option<HashFn>,
    key_equal: Option<KeyEqualFn>,
    key_destroy: Option<DestroyFn>,
    value_destroy: Option<DestroyFn>,
}

impl TypeDescriptor {
    /// A descriptor for `key_size`-byte keys and `value_size`-byte values with
    /// no callbacks set.
    pub const fn new(key_size: usize, value_size: usize) -> Self {
        Self {
            key_size,
            value_size,
            hash: None,
            key_equal: None,
            key_destroy: None,
            value_destroy: None,
        }
    }

    /// Sets the hash function.
    pub const fn with_hash(mut self, hash: HashFn) -> Self {
        self.hash = Some(hash);
        self
    }

    /// Sets the key equality predicate. It must agree with the hash: keys
    /// that compare equal must hash equal.
    pub const fn with_key_equal(mut self, key_equal: KeyEqualFn) -> Self {
        self.key_equal = Some(key_equal);
        self
    }

    /// Sets the hook run on a key leaving the table.
    pub const fn with_key_destroy(mut self, key_destroy: DestroyFn) -> Self {
        self.key_destroy = Some(key_destroy);
        self
    }

    /// Sets the hook run on a value leaving the table.
    pub const fn with_value_destroy(mut self, value_destroy: DestroyFn) -> Self {
        self.value_destroy = Some(value_destroy);
        self
    }

    /// Key width in bytes.
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Value width in bytes.
    pub fn value_size(&self) -> usize {
        self.value_size
    }

    /// Bytes inserted after the key so the value starts on a pointer-size
    /// boundary.
    pub fn padding(&self) -> usize {
        (PTR_SIZE - self.key_size % PTR_SIZE) % PTR_SIZE
    }

    /// Offset of the value within a slot record.
    pub(crate) fn value_offset(&self) -> usize {
        self.key_size + self.padding()
    }

    /// Slot record layout: key, padding, value, rounded up to pointer
    /// alignment.
    pub(crate) fn slot_layout(&self) -> SlotLayout {
        let size = (self.value_offset() + self.value_size).next_multiple_of(PTR_SIZE);
        SlotLayout::new(size, PTR_SIZE)
    }

    pub(crate) fn validate(&self) -> Result<HashFn, InvalidType> {
        let hash = self.hash.ok_or(InvalidType::MissingHash)?;
        if self.key_size == 0 {
            return Err(InvalidType::ZeroKeySize);
        }
        if self.value_size == 0 {
            return Err(InvalidType::ZeroValueSize);
        }
        Ok(hash)
    }

    #[inline]
    pub(crate) fn keys_equal(&self, a: &[u8], b: &[u8]) -> bool {
        match self.key_equal {
            Some(key_equal) => key_equal(a, b),
            None => a == b,
        }
    }

    #[inline]
    pub(crate) fn destroy_key(&self, key: &[u8]) {
        if let Some(key_destroy) = self.key_destroy {
            key_destroy(key);
        }
    }

    #[inline]
    pub(crate) fn destroy_value(&self, value: &[u8]) {
        if let Some(value_destroy) = self.value_destroy {
            value_destroy(value);
        }
    }

    pub(crate) fn has_destructors(&self) -> bool {
        self.key_destroy.is_some() || self.value_destroy.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_hash(_: &[u8]) -> u64 {
        0
    }

    #[test]
    fn padding_aligns_values() {
        let cases = [
            (1, PTR_SIZE - 1),
            (4, (PTR_SIZE - 4) % PTR_SIZE),
            (PTR_SIZE, 0),
            (PTR_SIZE + 1, PTR_SIZE - 1),
        ];
        for (key_size, padding) in cases {
            let descriptor = TypeDescriptor::new(key_size, 1);
            assert_eq!(descriptor.padding(), padding, "key_size = {key_size}");
            assert_eq!(descriptor.value_offset() % PTR_SIZE, 0);
        }
    }

    #[test]
    fn slot_layout_is_pointer_aligned() {
        let descriptor = TypeDescriptor::new(3, 5);
        let slot = descriptor.slot_layout();
        assert_eq!(slot.size() % PTR_SIZE, 0);
        assert!(slot.size() >= descriptor.value_offset() + 5);
        assert_eq!(descriptor.value_offset(), PTR_SIZE);
    }

    #[test]
    fn validation() {
        assert_eq!(TypeDescriptor::new(4, 4).validate().err(), Some(InvalidType::MissingHash));
        assert_eq!(
            TypeDescriptor::new(0, 4).with_hash(zero_hash).validate().err(),
            Some(InvalidType::ZeroKeySize)
        );
        assert_eq!(
            TypeDescriptor::new(4, 0).with_hash(zero_hash).validate().err(),
            Some(InvalidType::ZeroValueSize)
        );
        assert!(TypeDescriptor::new(4, 4).with_hash(zero_hash).validate().is_ok());
    }

    #[test]
    fn bytewise_equality_by_default() {
        fn case_insensitive(a: &[u8], b: &[u8]) -> bool {
            a.eq_ignore_ascii_case(b)
        }

        let plain = TypeDescriptor::new(3, 1).with_hash(zero_hash);
        assert!(plain.keys_equal(b"abc", b"abc"));
        assert!(!plain.keys_equal(b"abc", b"ABC"));

        let folded = plain.with_key_equal(case_insensitive);
        assert!(folded.keys_equal(b"abc", b"ABC"));
    }
}
