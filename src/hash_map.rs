use core::borrow::Borrow;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::mem;
use core::ptr::NonNull;

use crate::DefaultHashBuilder;
use crate::config::Config;
use crate::error::NoSuchKey;
use crate::error::OutOfMemory;
use crate::raw::Fallibility;
use crate::raw::Probe;
use crate::raw::RawTable;
use crate::raw::SlotLayout;

/// One slot record: the key, then the value, laid out by the compiler.
#[repr(C)]
struct Bucket<K, V> {
    key: K,
    value: V,
}

/// # Safety
///
/// `entry` must point to an initialized `Bucket<K, V>` that stays valid for
/// `'a` and is not mutated through another path meanwhile.
#[inline(always)]
unsafe fn bucket<'a, K, V>(entry: NonNull<u8>) -> &'a Bucket<K, V> {
    // SAFETY: Forwarded to the caller.
    unsafe { entry.cast::<Bucket<K, V>>().as_ref() }
}

/// # Safety
///
/// As for [`bucket`], and no other reference to the bucket may exist for
/// `'a`.
#[inline(always)]
unsafe fn bucket_mut<'a, K, V>(entry: NonNull<u8>) -> &'a mut Bucket<K, V> {
    // SAFETY: Forwarded to the caller.
    unsafe { entry.cast::<Bucket<K, V>>().as_mut() }
}

/// A hash map using linear probing over packed 64-bit slot metadata.
///
/// `HashMap<K, V, S>` stores key-value pairs where keys implement `Hash + Eq`
/// and hashes them with a configurable hasher builder `S`.
///
/// # Memory
///
/// One `u64` of metadata per slot plus the size of a `#[repr(C)] { K, V }`
/// record. The slot count is always a power of two, kept between the
/// [`Config`] load factors (by default 0.3 and 0.7).
///
/// # Fallibility
///
/// Operations that may allocate return `Result<_, OutOfMemory>`. When an
/// insert succeeds but the growth it triggers fails, the entry is kept and the
/// map stays usable at its old capacity. Constructors come in both
/// infallible (`new`, `with_hasher`) and fallible (`try_*`) flavors.
///
/// # Examples
///
/// ```rust
/// use vmap::HashMap;
///
/// let mut map: HashMap<&str, i32> = HashMap::new();
/// map.insert("a", 1)?;
/// map.insert("b", 2)?;
/// assert_eq!(map.insert("a", 10)?, Some(1));
///
/// assert_eq!(map.get("a"), Some(&10));
/// map.erase("b")?;
/// assert_eq!(map.len(), 1);
/// # Ok::<(), vmap::Error>(())
/// ```
pub struct HashMap<K, V, S = DefaultHashBuilder> {
    raw: RawTable,
    hash_builder: S,
    marker: PhantomData<Bucket<K, V>>,
}

// SAFETY: The map owns its `K` and `V` values like a `Vec<(K, V)>` does; the
// raw pointers inside `RawTable` are never shared outside of `&self`/`&mut
// self` borrows.
unsafe impl<K: Send, V: Send, S: Send> Send for HashMap<K, V, S> {}

// SAFETY: `&HashMap` only gives out `&K` and `&V`.
unsafe impl<K: Sync, V: Sync, S: Sync> Sync for HashMap<K, V, S> {}

impl<K, V, S> Debug for HashMap<K, V, S>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> HashMap<K, V, S> {
    #[inline]
    fn slot() -> SlotLayout {
        SlotLayout::of::<Bucket<K, V>>()
    }

    fn from_raw(raw: RawTable, hash_builder: S) -> Self {
        Self {
            raw,
            hash_builder,
            marker: PhantomData,
        }
    }

    /// Creates an empty map with the given hasher builder.
    ///
    /// # Panics
    ///
    /// Aborts through [`handle_alloc_error`](alloc::alloc::handle_alloc_error)
    /// if the initial storage cannot be allocated.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::hash::RandomState;
    ///
    /// use vmap::HashMap;
    ///
    /// let map: HashMap<i32, String, _> = HashMap::with_hasher(RandomState::new());
    /// assert!(map.is_empty());
    /// assert_eq!(map.capacity(), 32);
    /// ```
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates an empty map that holds `capacity` entries without growing.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` entries cannot be addressed, and aborts if the
    /// storage cannot be allocated.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::hash::RandomState;
    ///
    /// use vmap::HashMap;
    ///
    /// let map: HashMap<i32, String, _> = HashMap::with_capacity_and_hasher(100, RandomState::new());
    /// assert!(map.capacity() as f64 * 0.7 >= 100.0);
    /// ```
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self::from_raw(
            RawTable::new_infallible(Self::slot(), Config::new(), capacity),
            hash_builder,
        )
    }

    /// Creates an empty map with the given sizing policy and hasher builder.
    ///
    /// # Panics
    ///
    /// Aborts if the initial storage cannot be allocated.
    pub fn with_config_and_hasher(config: Config, hash_builder: S) -> Self {
        Self::from_raw(
            RawTable::new_infallible(Self::slot(), config, 0),
            hash_builder,
        )
    }

    /// Creates an empty map with the given hasher builder, reporting
    /// allocation failure.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfMemory`] if the initial storage cannot be allocated.
    pub fn try_with_hasher(hash_builder: S) -> Result<Self, OutOfMemory> {
        Self::try_with_config_and_hasher(Config::new(), hash_builder)
    }

    /// Creates an empty map with the given sizing policy and hasher builder,
    /// reporting allocation failure.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfMemory`] if the initial storage cannot be allocated.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::hash::RandomState;
    ///
    /// use vmap::Config;
    /// use vmap::HashMap;
    ///
    /// let config = Config::new().with_initial_power(10);
    /// let map: HashMap<u64, u64, _> = HashMap::try_with_config_and_hasher(config, RandomState::new())?;
    /// assert_eq!(map.capacity(), 1024);
    /// # Ok::<(), vmap::OutOfMemory>(())
    /// ```
    pub fn try_with_config_and_hasher(config: Config, hash_builder: S) -> Result<Self, OutOfMemory> {
        let raw = RawTable::new(Self::slot(), config, 0, Fallibility::Fallible)?;
        Ok(Self::from_raw(raw, hash_builder))
    }

    /// The map's hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// The map's sizing policy.
    pub fn config(&self) -> Config {
        self.raw.config()
    }

    /// Returns the number of elements in the map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use vmap::HashMap;
    ///
    /// let mut map: HashMap<i32, &str> = HashMap::new();
    /// assert_eq!(map.len(), 0);
    /// map.insert(1, "a")?;
    /// assert_eq!(map.len(), 1);
    /// # Ok::<(), vmap::OutOfMemory>(())
    /// ```
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if the map contains no elements.
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

    /// Removes all elements from the map, keeping the allocated storage.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use vmap::HashMap;
    ///
    /// let mut map: HashMap<i32, i32> = HashMap::new();
    /// for i in 0..100 {
    ///     map.insert(i, i)?;
    /// }
    /// let capacity = map.capacity();
    /// map.clear();
    /// assert!(map.is_empty());
    /// assert_eq!(map.capacity(), capacity);
    /// # Ok::<(), vmap::OutOfMemory>(())
    /// ```
    pub fn clear(&mut self) {
        self.raw.clear_with(|entry| {
            // SAFETY: `clear_with` hands each live bucket out exactly once,
            // after marking its slot empty.
            unsafe { entry.cast::<Bucket<K, V>>().drop_in_place() }
        });
    }

    /// Rebuilds the table at `2^power` slots, dropping tombstones.
    ///
    /// `power` is raised as needed so the live entries fit under the grow
    /// threshold and the table stays at or above its creation size (or the
    /// size [`reserve`](Self::reserve) asked for). Entries move by their
    /// stored hash fragments; keys are not hashed again.
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

    /// Shrinks the map as much as possible, down to its creation or reserved
    /// size, and drops tombstones.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfMemory`] if the new storage cannot be allocated.
    pub fn shrink_to_fit(&mut self) -> Result<(), OutOfMemory> {
        self.raw.shrink_to_fit()
    }

    /// An iterator visiting all key-value pairs in arbitrary order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use vmap::HashMap;
    ///
    /// let mut map: HashMap<i32, &str> = HashMap::new();
    /// map.insert(1, "a")?;
    /// map.insert(2, "b")?;
    ///
    /// let mut pairs: Vec<_> = map.iter().collect();
    /// pairs.sort();
    /// assert_eq!(pairs, [(&1, &"a"), (&2, &"b")]);
    /// # Ok::<(), vmap::OutOfMemory>(())
    /// ```
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            raw: &self.raw,
            index: 0,
            remaining: self.raw.len(),
            marker: PhantomData,
        }
    }

    /// An iterator visiting all key-value pairs in arbitrary order, with
    /// mutable references to the values.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            raw: &self.raw,
            index: 0,
            remaining: self.raw.len(),
            marker: PhantomData,
        }
    }

    /// An iterator visiting all keys in arbitrary order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// An iterator visiting all values in arbitrary order.
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// An iterator visiting all values mutably in arbitrary order.
    pub fn values_mut(&mut self) -> ValuesMut<'_, K, V> {
        ValuesMut {
            inner: self.iter_mut(),
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

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    fn find_index<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_builder.hash_one(key);
        self.raw.find(hash, |entry| {
            // SAFETY: Probing only hands out live buckets.
            <K as Borrow<Q>>::borrow(&unsafe { bucket::<K, V>(entry) }.key) == key
        })
    }

    /// Inserts a key-value pair into the map.
    ///
    /// If the key was already present its value is replaced and the old value
    /// returned; the stored key is kept and `key` is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfMemory::TableFull`] without inserting (dropping `key`
    /// and `value`) if every slot is live or tombstoned. Returns another
    /// [`OutOfMemory`] if the pair was inserted but the growth it triggered
    /// could not allocate; the pair stays in the map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use vmap::HashMap;
    ///
    /// let mut map: HashMap<i32, &str> = HashMap::new();
    /// assert_eq!(map.insert(37, "a")?, None);
    /// assert_eq!(map.insert(37, "b")?, Some("a"));
    /// assert_eq!(map.get(&37), Some(&"b"));
    /// # Ok::<(), vmap::OutOfMemory>(())
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>, OutOfMemory> {
        let hash = self.hash_builder.hash_one(&key);
        let probe = self.raw.find_or_vacant(hash, |entry| {
            // SAFETY: Probing only hands out live buckets.
            unsafe { bucket::<K, V>(entry) }.key == key
        })?;

        match probe {
            Probe::Occupied(index) => {
                // SAFETY: A live bucket, borrowed mutably through `&mut self`.
                let bucket = unsafe { bucket_mut::<K, V>(self.raw.entry(index)) };
                Ok(Some(mem::replace(&mut bucket.value, value)))
            }
            Probe::Vacant(index) => {
                // SAFETY: The vacant slot has room for one bucket, which is
                // written before the slot is committed for the probed hash.
                unsafe {
                    self.raw
                        .entry(index)
                        .cast::<Bucket<K, V>>()
                        .write(Bucket { key, value });
                    self.raw.commit_insert(index, hash)?;
                }
                Ok(None)
            }
        }
    }

    /// Returns a reference to the value corresponding to the key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use vmap::HashMap;
    ///
    /// let mut map: HashMap<i32, &str> = HashMap::new();
    /// map.insert(1, "a")?;
    /// assert_eq!(map.get(&1), Some(&"a"));
    /// assert_eq!(map.get(&2), None);
    /// # Ok::<(), vmap::OutOfMemory>(())
    /// ```
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.find_index(key)?;
        // SAFETY: A live bucket, borrowed for the lifetime of `&self`.
        Some(&unsafe { bucket::<K, V>(self.raw.entry(index)) }.value)
    }

    /// Returns the stored key and its value.
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.find_index(key)?;
        // SAFETY: A live bucket, borrowed for the lifetime of `&self`.
        let bucket = unsafe { bucket::<K, V>(self.raw.entry(index)) };
        Some((&bucket.key, &bucket.value))
    }

    /// Returns a mutable reference to the value corresponding to the key.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.find_index(key)?;
        // SAFETY: A live bucket, borrowed for the lifetime of `&mut self`.
        Some(&mut unsafe { bucket_mut::<K, V>(self.raw.entry(index)) }.value)
    }

    /// Returns `true` if the map contains the key.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_index(key).is_some()
    }

    /// Removes a key from the map, dropping the stored key and value.
    ///
    /// May halve the table if it becomes sparse.
    ///
    /// # Errors
    ///
    /// Returns [`NoSuchKey`] and leaves the map unchanged if the key is
    /// absent.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use vmap::HashMap;
    /// use vmap::NoSuchKey;
    ///
    /// let mut map: HashMap<i32, &str> = HashMap::new();
    /// map.insert(1, "a")?;
    /// assert_eq!(map.erase(&1), Ok(()));
    /// assert_eq!(map.erase(&1), Err(NoSuchKey));
    /// # Ok::<(), vmap::OutOfMemory>(())
    /// ```
    pub fn erase<Q>(&mut self, key: &Q) -> Result<(), NoSuchKey>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.find_index(key).ok_or(NoSuchKey)?;

        self.raw.tombstone(index);
        // SAFETY: The slot was just tombstoned, so this is the only drop of
        // its bucket.
        unsafe { self.raw.entry(index).cast::<Bucket<K, V>>().drop_in_place() };

        self.raw.shrink_if_sparse();
        Ok(())
    }

    /// Removes a key from the map, returning the stored value.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_entry(key).map(|(_, value)| value)
    }

    /// Removes a key from the map, returning the stored key and value.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.find_index(key)?;

        self.raw.tombstone(index);
        // SAFETY: The slot was just tombstoned, so the bucket is moved out
        // exactly once.
        let Bucket { key, value } = unsafe { self.raw.entry(index).cast::<Bucket<K, V>>().read() };

        self.raw.shrink_if_sparse();
        Some((key, value))
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    S: Default,
{
    /// Creates an empty map with a default hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use vmap::HashMap;
    ///
    /// let map: HashMap<i32, String> = HashMap::new();
    /// assert!(map.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::with_hasher(S::default())
    }

    /// Creates an empty map that holds `capacity` entries without growing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, S::default())
    }

    /// Creates an empty map with the given sizing policy.
    pub fn with_config(config: Config) -> Self {
        Self::with_config_and_hasher(config, S::default())
    }

    /// Creates an empty map, reporting allocation failure.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfMemory`] if the initial storage cannot be allocated.
    pub fn try_new() -> Result<Self, OutOfMemory> {
        Self::try_with_hasher(S::default())
    }
}

impl<K, V, S> Default for HashMap<K, V, S>
where
    S: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> Clone for HashMap<K, V, S>
where
    K: Clone,
    V: Clone,
    S: Clone,
{
    /// Clones every entry into the same slot, tombstones included.
    fn clone(&self) -> Self {
        let raw = self.raw.clone_with(|src, dst| {
            // SAFETY: `src` is a live bucket and `dst` the matching
            // uninitialized slot of the copy.
            unsafe {
                let src = bucket::<K, V>(src);
                dst.cast::<Bucket<K, V>>().write(Bucket {
                    key: src.key.clone(),
                    value: src.value.clone(),
                });
            }
        });
        Self::from_raw(raw, self.hash_builder.clone())
    }
}

impl<K, V, S> Drop for HashMap<K, V, S> {
    fn drop(&mut self) {
        if mem::needs_drop::<Bucket<K, V>>() {
            self.clear();
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a HashMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, S> IntoIterator for &'a mut HashMap<K, V, S> {
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// An iterator over the entries of a `HashMap`.
pub struct Iter<'a, K, V> {
    raw: &'a RawTable,
    index: usize,
    remaining: usize,
    marker: PhantomData<&'a (K, V)>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.raw.next_full(self.index)?;
        self.index = index + 1;
        self.remaining -= 1;

        // SAFETY: A live bucket; the map is borrowed shared for `'a`.
        let bucket = unsafe { bucket::<K, V>(self.raw.entry(index)) };
        Some((&bucket.key, &bucket.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V> FusedIterator for Iter<'_, K, V> {}

/// A mutable iterator over the entries of a `HashMap`.
pub struct IterMut<'a, K, V> {
    raw: &'a RawTable,
    index: usize,
    remaining: usize,
    marker: PhantomData<&'a mut (K, V)>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.raw.next_full(self.index)?;
        self.index = index + 1;
        self.remaining -= 1;

        // SAFETY: A live bucket; the map is borrowed mutably for `'a` and
        // each slot is yielded once.
        let bucket = unsafe { bucket_mut::<K, V>(self.raw.entry(index)) };
        Some((&bucket.key, &mut bucket.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}

impl<K, V> FusedIterator for IterMut<'_, K, V> {}

/// An iterator over the keys of a `HashMap`.
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}

/// An iterator over the values of a `HashMap`.
pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {}

/// A mutable iterator over the values of a `HashMap`.
pub struct ValuesMut<'a, K, V> {
    inner: IterMut<'a, K, V>,
}

impl<'a, K, V> Iterator for ValuesMut<'a, K, V> {
    type Item = &'a mut V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for ValuesMut<'_, K, V> {}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use core::hash::BuildHasher;
    use core::hash::BuildHasherDefault;
    use core::hash::Hasher;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher;

    use super::*;

    #[derive(Clone)]
    struct SipHashBuilder {
        k1: u64,
        k2: u64,
    }

    impl BuildHasher for SipHashBuilder {
        type Hasher = SipHasher;

        fn build_hasher(&self) -> Self::Hasher {
            SipHasher::new_with_keys(self.k1, self.k2)
        }
    }

    impl Default for SipHashBuilder {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k1: rng.try_next_u64().unwrap_or(0),
                k2: rng.try_next_u64().unwrap_or(0),
            }
        }
    }

    /// Sends every key to the same home slot.
    #[derive(Default)]
    struct CollidingHasher;

    impl Hasher for CollidingHasher {
        fn finish(&self) -> u64 {
            0
        }

        fn write(&mut self, _: &[u8]) {}
    }

    type Colliding = BuildHasherDefault<CollidingHasher>;

    #[test]
    fn test_new_and_with_hasher() {
        let map: HashMap<i32, String, SipHashBuilder> = HashMap::new();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
        assert_eq!(map.capacity(), 32);
        assert_eq!(map.power(), 5);

        let map2 = HashMap::<i32, String, _>::try_with_hasher(SipHashBuilder::default()).unwrap();
        assert!(map2.is_empty());
    }

    #[test]
    fn test_with_capacity() {
        let map: HashMap<i32, String, SipHashBuilder> = HashMap::with_capacity(100);
        assert_eq!(map.capacity(), 256);
        assert!(map.is_empty());

        let map2 = HashMap::<i32, String, _>::with_capacity_and_hasher(0, SipHashBuilder::default());
        assert_eq!(map2.capacity(), 32);
    }

    #[test]
    fn test_insert_and_get() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());

        assert_eq!(map.insert(1, "hello".to_string()), Ok(None));
        assert_eq!(map.len(), 1);
        assert!(!map.is_empty());

        assert_eq!(map.get(&1), Some(&"hello".to_string()));
        assert_eq!(map.get(&2), None);

        assert_eq!(
            map.insert(1, "world".to_string()),
            Ok(Some("hello".to_string()))
        );
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&1), Some(&"world".to_string()));
        assert_eq!(map.get_key_value(&1), Some((&1, &"world".to_string())));
    }

    #[test]
    fn test_get_mut() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        map.insert(1, "hello".to_string()).unwrap();

        if let Some(value) = map.get_mut(&1) {
            value.push_str(" world");
        }

        assert_eq!(map.get(&1), Some(&"hello world".to_string()));
        assert_eq!(map.get_mut(&2), None);
    }

    #[test]
    fn test_erase() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        map.insert(1, "hello".to_string()).unwrap();
        map.insert(2, "world".to_string()).unwrap();

        assert_eq!(map.erase(&1), Ok(()));
        assert_eq!(map.len(), 1);
        assert_eq!(map.tombstones(), 1);
        assert!(!map.contains_key(&1));
        assert!(map.contains_key(&2));

        assert_eq!(map.erase(&1), Err(NoSuchKey));
        assert_eq!(map.erase(&3), Err(NoSuchKey));
        assert_eq!(map.len(), 1);
        assert_eq!(map.tombstones(), 1);
    }

    #[test]
    fn test_remove() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        map.insert(1, "hello".to_string()).unwrap();
        map.insert(2, "world".to_string()).unwrap();

        assert_eq!(map.remove(&1), Some("hello".to_string()));
        assert_eq!(map.remove_entry(&2), Some((2, "world".to_string())));
        assert_eq!(map.remove(&1), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_borrowed_lookups() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());

        map.insert("hello".to_string(), 1).unwrap();
        map.insert("world".to_string(), 2).unwrap();

        assert_eq!(map.get("hello"), Some(&1));
        assert_eq!(map.get("world"), Some(&2));
        assert_eq!(map.get("missing"), None);
        assert_eq!(map.erase("hello"), Ok(()));
        assert_eq!(map.remove("world"), Some(2));
    }

    #[test]
    fn test_clear() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        for i in 0..100 {
            map.insert(i, i.to_string()).unwrap();
        }
        map.erase(&7).unwrap();

        let capacity = map.capacity();
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.tombstones(), 0);
        assert_eq!(map.capacity(), capacity);
        assert_eq!(map.get(&1), None);

        map.insert(1, "again".to_string()).unwrap();
        assert_eq!(map.get(&1), Some(&"again".to_string()));
    }

    #[test]
    fn test_iterators() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        for i in 0..10 {
            map.insert(i, i * 10).unwrap();
        }
        map.erase(&3).unwrap();

        assert_eq!(map.iter().len(), 9);

        let mut keys: Vec<_> = map.keys().copied().collect();
        keys.sort();
        assert_eq!(keys, [0, 1, 2, 4, 5, 6, 7, 8, 9]);

        let mut values: Vec<_> = map.values().copied().collect();
        values.sort();
        assert_eq!(values, [0, 10, 20, 40, 50, 60, 70, 80, 90]);

        for (_, v) in map.iter_mut() {
            *v += 1;
        }
        for v in map.values_mut() {
            *v *= 2;
        }
        for (k, v) in &map {
            assert_eq!(*v, (k * 10 + 1) * 2);
        }
    }

    #[test]
    fn test_collision_handling() {
        let mut map: HashMap<i32, i32, Colliding> = HashMap::new();

        for i in 0..200 {
            map.insert(i, i * 2).unwrap();
        }
        assert_eq!(map.len(), 200);

        for i in (0..200).step_by(2) {
            assert_eq!(map.remove(&i), Some(i * 2));
        }
        assert_eq!(map.len(), 100);

        for i in 0..200 {
            let expected = (i % 2 == 1).then_some(i * 2);
            assert_eq!(map.get(&i).copied(), expected, "key {i}");
        }

        for i in (0..200).step_by(2) {
            assert_eq!(map.insert(i, -i), Ok(None));
        }
        for i in 0..200 {
            let expected = if i % 2 == 1 { i * 2 } else { -i };
            assert_eq!(map.get(&i), Some(&expected));
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_load_bound_and_round_trip() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());

        for round in 0..3u64 {
            for i in 0..2000u64 {
                map.insert(i, i + round).unwrap();
                assert!((map.len() + map.tombstones()) as f64 <= 0.7 * map.capacity() as f64);
            }
            assert_eq!(map.len(), 2000);
            assert!(map.capacity() >= 4096);

            for i in 0..2000u64 {
                assert_eq!(map.get(&i), Some(&(i + round)));
                assert_eq!(map.erase(&i), Ok(()));
            }
            assert!(map.is_empty());
            assert_eq!(map.capacity(), 32);
        }
    }

    #[test]
    fn test_resize_is_transparent() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        for i in 0..20 {
            map.insert(i, i).unwrap();
        }
        for i in 0..5 {
            map.erase(&i).unwrap();
        }

        map.resize(12).unwrap();
        assert_eq!(map.capacity(), 4096);
        assert_eq!(map.tombstones(), 0);

        map.resize(0).unwrap();
        assert_eq!(map.capacity(), 32);

        map.reserve(1000).unwrap();
        assert!(map.capacity() as f64 * 0.7 >= 1015.0);
        map.shrink_to_fit().unwrap();
        assert_eq!(map.capacity(), 2048);

        for i in 5..20 {
            assert_eq!(map.get(&i), Some(&i));
        }
    }

    #[test]
    fn test_keeps_presized_capacity() {
        let mut map: HashMap<i32, i32, SipHashBuilder> = HashMap::with_capacity(1000);
        assert_eq!(map.capacity(), 2048);
        map.insert(1, 1).unwrap();
        map.erase(&1).unwrap();
        assert_eq!(map.capacity(), 2048);

        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        map.reserve(1000).unwrap();
        map.insert(1, 1).unwrap();
        map.erase(&1).unwrap();
        assert_eq!(map.capacity(), 2048);

        map.resize(0).unwrap();
        assert_eq!(map.capacity(), 2048);
    }

    #[test]
    fn test_failed_resize_keeps_map_usable() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        for i in 0..10 {
            map.insert(i, i).unwrap();
        }

        assert_eq!(map.resize(usize::BITS), Err(OutOfMemory::CapacityOverflow));
        assert_eq!(map.reserve(usize::MAX), Err(OutOfMemory::CapacityOverflow));
        assert_eq!(map.capacity(), 32);

        map.insert(10, 10).unwrap();
        for i in 0..11 {
            assert_eq!(map.get(&i), Some(&i));
        }
    }

    #[test]
    fn test_drops_each_value_once() {
        let tracker = Rc::new(());
        {
            let mut map = HashMap::with_hasher(SipHashBuilder::default());
            for i in 0..100 {
                map.insert(i, Rc::clone(&tracker)).unwrap();
            }
            assert_eq!(Rc::strong_count(&tracker), 101);

            let old = map.insert(0, Rc::clone(&tracker)).unwrap();
            assert!(old.is_some());
            drop(old);
            assert_eq!(Rc::strong_count(&tracker), 101);

            for i in 0..50 {
                map.erase(&i).unwrap();
            }
            assert_eq!(Rc::strong_count(&tracker), 51);

            let copy = map.clone();
            assert_eq!(Rc::strong_count(&tracker), 101);
            drop(copy);

            map.shrink_to_fit().unwrap();
            assert_eq!(Rc::strong_count(&tracker), 51);
        }
        assert_eq!(Rc::strong_count(&tracker), 1);
    }

    #[test]
    fn test_clone_keeps_layout() {
        let mut map: HashMap<i32, String, Colliding> = HashMap::new();
        for i in 0..10 {
            map.insert(i, i.to_string()).unwrap();
        }
        map.erase(&4).unwrap();

        let mut copy = map.clone();
        assert_eq!(copy.len(), 9);
        assert_eq!(copy.tombstones(), 1);
        for i in 0..10 {
            assert_eq!(copy.get(&i), map.get(&i));
        }

        copy.insert(4, "four".to_string()).unwrap();
        assert_eq!(map.get(&4), None);
        assert_eq!(copy.get(&4), Some(&"four".to_string()));
    }

    #[test]
    fn test_zero_sized_entries() {
        let mut map: HashMap<(), (), SipHashBuilder> = HashMap::new();
        assert_eq!(map.insert((), ()), Ok(None));
        assert_eq!(map.insert((), ()), Ok(Some(())));
        assert_eq!(map.len(), 1);
        assert_eq!(map.remove(&()), Some(()));
        assert!(map.is_empty());
    }

    #[test]
    fn test_custom_config() {
        let config = Config::new().with_initial_power(3).with_load_factors(0.1, 0.5);
        let mut map: HashMap<u32, u32, SipHashBuilder> = HashMap::with_config(config);
        assert_eq!(map.capacity(), 8);

        for i in 0..4 {
            map.insert(i, i).unwrap();
        }
        assert_eq!(map.capacity(), 8);
        map.insert(4, 4).unwrap();
        assert_eq!(map.capacity(), 16);
        assert_eq!(map.config(), config);
    }

    #[test]
    fn test_debug_format() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        map.insert(1, "a").unwrap();
        assert_eq!(format!("{map:?}"), r#"{1: "a"}"#);
    }

    #[test]
    fn test_default_trait() {
        let map: HashMap<i32, String, SipHashBuilder> = HashMap::default();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
    }
}
