use core::fmt;
use core::ptr::NonNull;

use crate::config::Config;
use crate::descriptor::HashFn;
use crate::descriptor::TypeDescriptor;
use crate::error::CreateError;
use crate::error::NoSuchKey;
use crate::error::OutOfMemory;
use crate::raw::Fallibility;
use crate::raw::Probe;
use crate::raw::RawTable;

/// # Safety
///
/// `ptr` must address `len` initialized bytes that stay valid and unmodified
/// for `'a`.
#[inline(always)]
unsafe fn bytes<'a>(ptr: NonNull<u8>, len: usize) -> &'a [u8] {
    // SAFETY: Forwarded to the caller.
    unsafe { core::slice::from_raw_parts(ptr.as_ptr(), len) }
}

/// An open-addressing hash map whose keys and values are byte strings of the
/// widths given by a [`TypeDescriptor`].
///
/// Each slot holds the key bytes, padding up to a pointer-size boundary, and
/// the value bytes. The table copies keys and values in on insert and hands
/// them to the descriptor's destroy hooks when they leave: on overwrite, on
/// erase, on [`clear`](Self::clear), and when the map is dropped.
///
/// The map borrows its descriptor, which must outlive it.
///
/// # Examples
///
/// ```rust
/// use vmap::ErasedMap;
/// use vmap::TypeDescriptor;
///
/// fn hash(key: &[u8]) -> u64 {
///     key.iter().fold(5381u64, |h, &b| h.wrapping_mul(33).wrapping_add(b as u64))
/// }
///
/// let descriptor = TypeDescriptor::new(4, 4).with_hash(hash);
/// let mut map = ErasedMap::new(&descriptor)?;
///
/// map.insert(b"foo\0", &1u32.to_ne_bytes())?;
/// map.insert(b"bar\0", &2u32.to_ne_bytes())?;
/// assert_eq!(map.find(b"foo\0"), Some(&1u32.to_ne_bytes()[..]));
///
/// map.erase(b"foo\0")?;
/// assert_eq!(map.find(b"foo\0"), None);
/// # Ok::<(), vmap::Error>(())
/// ```
pub struct ErasedMap<'d> {
    raw: RawTable,
    descriptor: &'d TypeDescriptor,
    hash: HashFn,
}

impl<'d> ErasedMap<'d> {
    /// Creates an empty map with the default [`Config`].
    ///
    /// # Errors
    ///
    /// Returns [`CreateError::InvalidType`] if the descriptor has no hash
    /// function or a zero key or value size, and
    /// [`CreateError::OutOfMemory`] if the initial storage cannot be
    /// allocated.
    pub fn new(descriptor: &'d TypeDescriptor) -> Result<Self, CreateError> {
        Self::with_config(descriptor, Config::new())
    }

    /// Creates an empty map with the given sizing policy.
    ///
    /// # Errors
    ///
    /// As for [`new`](Self::new).
    pub fn with_config(descriptor: &'d TypeDescriptor, config: Config) -> Result<Self, CreateError> {
        let hash = descriptor.validate()?;
        let raw = RawTable::new(descriptor.slot_layout(), config, 0, Fallibility::Fallible)?;
        Ok(Self {
            raw,
            descriptor,
            hash,
        })
    }

    /// The descriptor this map was created with.
    pub fn descriptor(&self) -> &'d TypeDescriptor {
        self.descriptor
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.raw.len() == 0
    }

    /// Number of slots, always `2^power()`.
    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    /// Power of two of the slot count.
    pub fn power(&self) -> u32 {
        self.raw.power()
    }

    /// Number of slots holding a tombstone.
    pub fn tombstones(&self) -> usize {
        self.raw.tombstones()
    }

    /// Live entries over slots.
    pub fn load_factor(&self) -> f64 {
        self.raw.len() as f64 / self.raw.capacity() as f64
    }

    #[inline]
    fn check_key(&self, key: &[u8]) {
        assert_eq!(
            key.len(),
            self.descriptor.key_size(),
            "key length does not match the descriptor's key size"
        );
    }

    #[inline]
    fn key_of(&self, entry: NonNull<u8>) -> &[u8] {
        // SAFETY: Entry pointers handed out by the table address a whole slot
        // record, which starts with `key_size` initialized key bytes.
        unsafe { bytes(entry, self.descriptor.key_size()) }
    }

    #[inline]
    fn value_ptr(&self, entry: NonNull<u8>) -> NonNull<u8> {
        // SAFETY: The value lies inside the slot record at `value_offset`.
        unsafe { entry.add(self.descriptor.value_offset()) }
    }

    #[inline]
    fn value_of(&self, entry: NonNull<u8>) -> &[u8] {
        // SAFETY: Live slots hold `value_size` initialized value bytes at
        // `value_offset`.
        unsafe { bytes(self.value_ptr(entry), self.descriptor.value_size()) }
    }

    fn find_index(&self, key: &[u8]) -> Option<usize> {
        self.check_key(key);
        let hash = (self.hash)(key);
        self.raw.find(hash, |entry| {
            self.descriptor.keys_equal(self.key_of(entry), key)
        })
    }

    /// Inserts `value` under `key`, copying both into the table.
    ///
    /// If the key is already present its value is replaced in place: the
    /// descriptor's `key_destroy` runs on the caller's `key` (the stored key
    /// is kept) and `value_destroy` on the old value. The table takes
    /// ownership of whatever the bytes refer to either way.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfMemory::TableFull`] without inserting if every slot is
    /// live or tombstoned. Returns another [`OutOfMemory`] if the entry was
    /// inserted but the growth it triggered could not allocate; the entry
    /// stays in the table at the old capacity.
    ///
    /// # Panics
    ///
    /// Panics if `key` or `value` is not exactly as wide as the descriptor
    /// says.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), OutOfMemory> {
        self.check_key(key);
        assert_eq!(
            value.len(),
            self.descriptor.value_size(),
            "value length does not match the descriptor's value size"
        );

        let hash = (self.hash)(key);
        let descriptor = self.descriptor;
        let key_size = descriptor.key_size();
        let probe = self.raw.find_or_vacant(hash, |entry| {
            // SAFETY: Probing only hands out live slot records.
            descriptor.keys_equal(unsafe { bytes(entry, key_size) }, key)
        })?;

        match probe {
            Probe::Occupied(index) => {
                let entry = self.raw.entry(index);
                descriptor.destroy_key(key);
                descriptor.destroy_value(self.value_of(entry));
                // SAFETY: The value region is `value_size` bytes inside a live
                // slot record and `value` is exactly that long. The caller's
                // slice cannot alias table storage while we hold `&mut self`.
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        value.as_ptr(),
                        self.value_ptr(entry).as_ptr(),
                        value.len(),
                    );
                }
                Ok(())
            }
            Probe::Vacant(index) => {
                let entry = self.raw.entry(index);
                // SAFETY: The vacant slot record has room for the key at
                // offset 0 and the value at `value_offset`. Then the slot is
                // committed for the same hash it was probed with.
                unsafe {
                    core::ptr::copy_nonoverlapping(key.as_ptr(), entry.as_ptr(), key.len());
                    core::ptr::copy_nonoverlapping(
                        value.as_ptr(),
                        self.value_ptr(entry).as_ptr(),
                        value.len(),
                    );
                    self.raw.commit_insert(index, hash)
                }
            }
        }
    }

    /// Returns the value stored under `key`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not exactly `key_size` bytes.
    pub fn find(&self, key: &[u8]) -> Option<&[u8]> {
        let index = self.find_index(key)?;
        Some(self.value_of(self.raw.entry(index)))
    }

    /// Returns the value stored under `key` for in-place modification.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not exactly `key_size` bytes.
    pub fn find_mut(&mut self, key: &[u8]) -> Option<&mut [u8]> {
        let index = self.find_index(key)?;
        let value = self.value_ptr(self.raw.entry(index));
        // SAFETY: The value bytes of a live slot, borrowed mutably through
        // `&mut self`.
        Some(unsafe { core::slice::from_raw_parts_mut(value.as_ptr(), self.descriptor.value_size()) })
    }

    /// `true` if `key` is present.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not exactly `key_size` bytes.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.find_index(key).is_some()
    }

    /// Removes `key`, running the destroy hooks on the stored key and value.
    ///
    /// May halve the table if it becomes sparse.
    ///
    /// # Errors
    ///
    /// Returns [`NoSuchKey`] and leaves the map unchanged if `key` is absent.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not exactly `key_size` bytes.
    pub fn erase(&mut self, key: &[u8]) -> Result<(), NoSuchKey> {
        let index = self.find_index(key).ok_or(NoSuchKey)?;

        self.raw.tombstone(index);
        let entry = self.raw.entry(index);
        self.descriptor.destroy_key(self.key_of(entry));
        self.descriptor.destroy_value(self.value_of(entry));

        self.raw.shrink_if_sparse();
        Ok(())
    }

    /// Rebuilds the table at `2^power` slots, dropping tombstones.
    ///
    /// `power` is raised as needed so the live entries fit under the grow
    /// threshold and the table stays at or above its initial or reserved
    /// size. Entries are
    /// moved by their stored hash fragments, so no descriptor callback runs.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfMemory`] if the new storage cannot be allocated; the
    /// map keeps its current storage.
    pub fn resize(&mut self, power: u32) -> Result<(), OutOfMemory> {
        self.raw.resize(power)
    }

    /// Grows ahead of time so `additional` more entries fit without a resize.
    /// The map will not shrink below that size afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfMemory`] if the new storage cannot be allocated.
    pub fn reserve(&mut self, additional: usize) -> Result<(), OutOfMemory> {
        self.raw.reserve(additional)
    }

    /// Shrinks to the smallest size that holds the live entries, down to the
    /// initial or reserved size.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfMemory`] if the new storage cannot be allocated.
    pub fn shrink_to_fit(&mut self) -> Result<(), OutOfMemory> {
        self.raw.shrink_to_fit()
    }

    /// Removes every entry, running the destroy hooks, and keeps the
    /// capacity.
    pub fn clear(&mut self) {
        let descriptor = self.descriptor;
        let key_size = descriptor.key_size();
        let value_offset = descriptor.value_offset();
        let value_size = descriptor.value_size();
        self.raw.clear_with(|entry| {
            // SAFETY: `clear_with` hands out each live slot record once.
            unsafe {
                descriptor.destroy_key(bytes(entry, key_size));
                descriptor.destroy_value(bytes(entry.add(value_offset), value_size));
            }
        });
    }

    /// An iterator over `(key, value)` byte slices in slot order.
    pub fn iter(&self) -> Iter<'_, 'd> {
        Iter {
            map: self,
            index: 0,
            remaining: self.len(),
        }
    }

    /// Probe-length histogram over the live entries.
    #[cfg(feature = "stats")]
    pub fn probe_histogram(&self) -> crate::stats::ProbeHistogram {
        crate::stats::ProbeHistogram::of(&self.raw)
    }

    /// Occupancy and memory statistics.
    #[cfg(feature = "stats")]
    pub fn debug_stats(&self) -> crate::stats::DebugStats {
        crate::stats::DebugStats::of(&self.raw)
    }
}

impl Drop for ErasedMap<'_> {
    fn drop(&mut self) {
        if self.descriptor.has_destructors() {
            self.clear();
        }
    }
}

impl fmt::Debug for ErasedMap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, 'd> IntoIterator for &'a ErasedMap<'d> {
    type Item = (&'a [u8], &'a [u8]);
    type IntoIter = Iter<'a, 'd>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the entries of an [`ErasedMap`].
///
/// Created by [`ErasedMap::iter`].
pub struct Iter<'a, 'd> {
    map: &'a ErasedMap<'d>,
    index: usize,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a, '_> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.map.raw.next_full(self.index)?;
        self.index = index + 1;
        self.remaining -= 1;

        let map: &'a ErasedMap<'_> = self.map;
        let entry = map.raw.entry(index);
        Some((map.key_of(entry), map.value_of(entry)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_, '_> {}

impl core::iter::FusedIterator for Iter<'_, '_> {}
