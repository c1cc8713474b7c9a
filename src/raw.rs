//! The open-addressing engine behind both map front-ends.
//!
//! `RawTable` knows nothing about keys or values beyond the size and
//! alignment of one slot record. Callers supply the hash and an equality
//! predicate over a pointer to the slot record; the engine owns the metadata
//! words, the storage allocation, the probe sequence, tombstone accounting,
//! and the grow/shrink policy.
//!
//! Storage is a single allocation: `2^power` metadata words followed by
//! `2^power` slot records. A metadata word packs the top 62 bits of the
//! slot's hash with a two-bit state, and an all-zero word is `EMPTY`, so
//! freshly zeroed storage is an empty table.

use alloc::alloc::alloc_zeroed;
use alloc::alloc::dealloc;
use alloc::alloc::handle_alloc_error;
use core::alloc::Layout;
use core::mem;
use core::ptr::NonNull;

use crate::config::Config;
use crate::error::OutOfMemory;

const EMPTY: u64 = 0b00;
const DELETED: u64 = 0b01;
const FULL: u64 = 0b10;

const STATE_BITS: u32 = 2;
const STATE_MASK: u64 = (1 << STATE_BITS) - 1;

#[inline(always)]
fn fragment(hash: u64) -> u64 {
    hash >> STATE_BITS
}

#[inline(always)]
fn prefetch<T>(ptr: *const T) {
    cfg_if::cfg_if! {
        if #[cfg(all(target_arch = "x86_64", target_feature = "sse"))] {
            // SAFETY: prefetching is a hint and never faults, even on an
            // address outside the allocation.
            unsafe {
                use core::arch::x86_64::*;
                _mm_prefetch(ptr as *const i8, _MM_HINT_T0);
            }
        } else {
            let _ = ptr;
        }
    }
}

/// Per-slot metadata word: `fragment << 2 | state`.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct Metadata(u64);

impl Metadata {
    const EMPTY: Self = Self(EMPTY);
    const DELETED: Self = Self(DELETED);

    #[inline(always)]
    fn full(hash: u64) -> Self {
        Self((fragment(hash) << STATE_BITS) | FULL)
    }

    #[inline(always)]
    fn is_empty(self) -> bool {
        self.0 & STATE_MASK == EMPTY
    }

    #[cfg(test)]
    fn is_deleted(self) -> bool {
        self.0 & STATE_MASK == DELETED
    }

    #[inline(always)]
    fn is_full(self) -> bool {
        self.0 & STATE_MASK == FULL
    }

    #[inline(always)]
    fn fragment(self) -> u64 {
        self.0 >> STATE_BITS
    }

    /// A live slot whose stored fragment equals the fragment of `hash`.
    #[inline(always)]
    fn matches(self, hash: u64) -> bool {
        self.is_full() && self.fragment() == fragment(hash)
    }

    /// Slot index the fragment probes from in a table of `mask + 1` slots.
    #[inline(always)]
    fn home(self, mask: usize) -> usize {
        self.fragment() as usize & mask
    }
}

/// Size and alignment of one slot record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotLayout {
    size: usize,
    align: usize,
}

impl SlotLayout {
    pub(crate) fn of<T>() -> Self {
        Self {
            size: mem::size_of::<T>(),
            align: mem::align_of::<T>(),
        }
    }

    /// # Panics
    ///
    /// Panics if `align` is not a power of two or `size` is not a multiple of
    /// it.
    pub(crate) fn new(size: usize, align: usize) -> Self {
        assert!(align.is_power_of_two(), "slot alignment must be a power of two");
        assert_eq!(size % align, 0, "slot size must be a multiple of its alignment");
        Self { size, align }
    }

    #[cfg(test)]
    pub(crate) fn size(&self) -> usize {
        self.size
    }
}

/// Whether allocation failures are reported or abort the process.
#[derive(Clone, Copy)]
pub(crate) enum Fallibility {
    Fallible,
    Infallible,
}

impl Fallibility {
    fn capacity_overflow(self) -> OutOfMemory {
        match self {
            Fallibility::Fallible => OutOfMemory::CapacityOverflow,
            Fallibility::Infallible => panic!("hash table capacity overflow"),
        }
    }

    fn alloc_err(self, layout: Layout) -> OutOfMemory {
        match self {
            Fallibility::Fallible => OutOfMemory::AllocFailed {
                size: layout.size(),
            },
            Fallibility::Infallible => handle_alloc_error(layout),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DataLayout {
    layout: Layout,
    entries_offset: usize,
}

impl DataLayout {
    fn new(slot: SlotLayout, capacity: usize) -> Option<Self> {
        let metadata = Layout::array::<Metadata>(capacity).ok()?;
        let entries = Layout::from_size_align(slot.size.checked_mul(capacity)?, slot.align).ok()?;
        let (layout, entries_offset) = metadata.extend(entries).ok()?;

        Some(Self {
            layout: layout.pad_to_align(),
            entries_offset,
        })
    }
}

/// One zero-initialized allocation holding the metadata and slot arrays.
///
/// Dropping it frees the memory without touching the slot records; whoever
/// owns the records must have moved or dropped them first.
struct Storage {
    alloc: NonNull<u8>,
    layout: DataLayout,
    power: u32,
}

impl Storage {
    fn allocate(slot: SlotLayout, power: u32, fallibility: Fallibility) -> Result<Self, OutOfMemory> {
        if power >= usize::BITS - 1 {
            return Err(fallibility.capacity_overflow());
        }
        let layout = DataLayout::new(slot, 1 << power).ok_or_else(|| fallibility.capacity_overflow())?;

        // SAFETY: The layout holds at least one metadata word, so its size is
        // non-zero.
        let raw = unsafe { alloc_zeroed(layout.layout) };
        let alloc = NonNull::new(raw).ok_or_else(|| fallibility.alloc_err(layout.layout))?;

        Ok(Self {
            alloc,
            layout,
            power,
        })
    }

    #[inline(always)]
    fn capacity(&self) -> usize {
        1 << self.power
    }

    #[inline(always)]
    fn metadata(&self) -> &[Metadata] {
        // SAFETY: The allocation starts with `capacity` metadata words, all
        // initialized by the zeroing allocation or by later writes.
        unsafe { core::slice::from_raw_parts(self.alloc.as_ptr().cast(), self.capacity()) }
    }

    #[inline(always)]
    fn metadata_mut(&mut self) -> &mut [Metadata] {
        // SAFETY: As in `metadata`, and `&mut self` guarantees exclusivity.
        unsafe { core::slice::from_raw_parts_mut(self.alloc.as_ptr().cast(), self.capacity()) }
    }

    /// Pointer to the slot record at `index`.
    #[inline(always)]
    fn entry(&self, slot: SlotLayout, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.capacity());
        // SAFETY: `index < capacity`, so the offset stays inside the entry
        // array that `DataLayout` placed at `entries_offset`.
        unsafe { self.alloc.add(self.layout.entries_offset + index * slot.size) }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        // SAFETY: `alloc` was returned by `alloc_zeroed` with this layout.
        unsafe { dealloc(self.alloc.as_ptr(), self.layout.layout) }
    }
}

/// Outcome of probing for an insertion point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    /// A live slot whose key compared equal.
    Occupied(usize),
    /// The first empty slot of the probe run.
    Vacant(usize),
}

/// Type-erased linear-probing table.
///
/// Dropping a `RawTable` releases its storage but does not drop the records
/// in live slots: the front-end owning the records does that in its own
/// `Drop` before this one runs.
pub(crate) struct RawTable {
    storage: Storage,
    slot: SlotLayout,
    config: Config,

    occupied: usize,
    occupied_or_tombstoned: usize,

    /// Smallest power the table shrinks to: the creation size, raised by
    /// `reserve`.
    floor_power: u32,

    #[cfg(test)]
    fail_allocations: bool,
}

impl RawTable {
    /// Creates an empty table sized so `capacity` entries fit without
    /// growing, and never smaller than the configured initial power.
    ///
    /// The table never shrinks below this starting size.
    pub(crate) fn new(
        slot: SlotLayout,
        config: Config,
        capacity: usize,
        fallibility: Fallibility,
    ) -> Result<Self, OutOfMemory> {
        let power = config
            .power_for(capacity)
            .ok_or_else(|| fallibility.capacity_overflow())?;

        Ok(Self {
            storage: Storage::allocate(slot, power, fallibility)?,
            slot,
            config,
            occupied: 0,
            occupied_or_tombstoned: 0,
            floor_power: power,
            #[cfg(test)]
            fail_allocations: false,
        })
    }

    /// As [`new`](Self::new), aborting on allocation failure and panicking on
    /// capacity overflow.
    pub(crate) fn new_infallible(slot: SlotLayout, config: Config, capacity: usize) -> Self {
        match Self::new(slot, config, capacity, Fallibility::Infallible) {
            Ok(table) => table,
            Err(_) => unreachable!("infallible allocation returned an error"),
        }
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.occupied
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    #[inline(always)]
    pub(crate) fn power(&self) -> u32 {
        self.storage.power
    }

    #[inline(always)]
    pub(crate) fn tombstones(&self) -> usize {
        self.occupied_or_tombstoned - self.occupied
    }

    pub(crate) fn config(&self) -> Config {
        self.config
    }

    /// Pointer to the slot record at `index`. Only meaningful for live slots,
    /// or for a vacant slot about to be committed.
    #[inline(always)]
    pub(crate) fn entry(&self, index: usize) -> NonNull<u8> {
        self.storage.entry(self.slot, index)
    }

    /// Slot indices in probe order for `hash`: every slot exactly once,
    /// starting from the home slot and wrapping around.
    #[inline(always)]
    fn probe_seq(&self, hash: u64) -> impl Iterator<Item = usize> + use<> {
        let mask = self.capacity() - 1;
        let home = fragment(hash) as usize & mask;
        (0..=mask).map(move |step| (home + step) & mask)
    }

    /// Finds the live slot holding the key `eq` accepts.
    ///
    /// Stops at the first `EMPTY` slot; tombstones are stepped over because
    /// the key may have been inserted after the slot was occupied.
    #[inline]
    pub(crate) fn find(&self, hash: u64, mut eq: impl FnMut(NonNull<u8>) -> bool) -> Option<usize> {
        if self.occupied == 0 {
            return None;
        }

        let metadata = self.storage.metadata();
        for index in self.probe_seq(hash) {
            // SAFETY: `probe_seq` yields indices masked to the capacity.
            let meta = unsafe { *metadata.get_unchecked(index) };
            if meta.is_empty() {
                return None;
            }
            if meta.matches(hash) {
                let entry = self.entry(index);
                prefetch(entry.as_ptr());
                if eq(entry) {
                    return Some(index);
                }
            }
        }

        None
    }

    /// Finds either the live slot holding the key `eq` accepts, or the empty
    /// slot a new key with this hash belongs in.
    ///
    /// Refuses outright when no slot is empty.
    #[inline]
    pub(crate) fn find_or_vacant(
        &self,
        hash: u64,
        mut eq: impl FnMut(NonNull<u8>) -> bool,
    ) -> Result<Probe, OutOfMemory> {
        if self.occupied_or_tombstoned >= self.capacity() {
            log::debug!(
                "refusing insert: {} live entries and {} tombstones fill {} slots",
                self.occupied,
                self.tombstones(),
                self.capacity()
            );
            return Err(OutOfMemory::TableFull);
        }

        let metadata = self.storage.metadata();
        for index in self.probe_seq(hash) {
            // SAFETY: `probe_seq` yields indices masked to the capacity.
            let meta = unsafe { *metadata.get_unchecked(index) };
            if meta.is_empty() {
                return Ok(Probe::Vacant(index));
            }
            if meta.matches(hash) && eq(self.entry(index)) {
                return Ok(Probe::Occupied(index));
            }
        }

        Err(OutOfMemory::TableFull)
    }

    /// Marks the vacant slot at `index` live for `hash`, then grows if the
    /// table crossed its grow threshold.
    ///
    /// A growth failure is returned, but the entry stays committed at the
    /// current capacity.
    ///
    /// # Safety
    ///
    /// `index` must come from a `Probe::Vacant` for `hash` with no mutation in
    /// between, and the caller must have written a complete slot record to
    /// `self.entry(index)`.
    #[inline]
    pub(crate) unsafe fn commit_insert(&mut self, index: usize, hash: u64) -> Result<(), OutOfMemory> {
        debug_assert!(self.storage.metadata()[index].is_empty());

        self.storage.metadata_mut()[index] = Metadata::full(hash);
        self.occupied += 1;
        self.occupied_or_tombstoned += 1;

        if self
            .config
            .exceeds_max_load(self.occupied_or_tombstoned, self.capacity())
        {
            return self.resize_exact(self.power() + 1);
        }

        Ok(())
    }

    /// Turns the live slot at `index` into a tombstone.
    ///
    /// The slot record is left untouched: the caller now owns it and must
    /// read or drop it before the next resize.
    #[inline]
    pub(crate) fn tombstone(&mut self, index: usize) {
        debug_assert!(self.storage.metadata()[index].is_full());

        self.storage.metadata_mut()[index] = Metadata::DELETED;
        self.occupied -= 1;
    }

    /// Halves the table if live entries fell below the shrink threshold and
    /// the table is above its floor.
    ///
    /// The shrink is opportunistic: if the smaller storage cannot be
    /// allocated the table keeps its current storage.
    pub(crate) fn shrink_if_sparse(&mut self) {
        if self.power() <= self.floor_power
            || !self.config.below_min_load(self.occupied, self.capacity())
        {
            return;
        }

        if let Err(err) = self.resize_exact(self.power() - 1) {
            log::warn!("keeping {} slots after failed shrink: {err}", self.capacity());
        }
    }

    /// Smallest power that holds the live entries without dropping below
    /// the floor.
    fn fitting_power(&self) -> Result<u32, OutOfMemory> {
        let power = self
            .config
            .power_for(self.occupied)
            .ok_or(OutOfMemory::CapacityOverflow)?;
        Ok(power.max(self.floor_power))
    }

    /// Rebuilds the table at `2^power` slots, raising `power` to the smallest
    /// value that holds the live entries and is at least the floor. Resizing
    /// to the current power drops every tombstone.
    pub(crate) fn resize(&mut self, power: u32) -> Result<(), OutOfMemory> {
        let minimum = self.fitting_power()?;
        self.resize_exact(power.max(minimum))
    }

    /// Makes room for `additional` more entries without further growth, and
    /// keeps that room through later shrinks.
    pub(crate) fn reserve(&mut self, additional: usize) -> Result<(), OutOfMemory> {
        let power = self
            .occupied
            .checked_add(additional)
            .and_then(|required| self.config.power_for(required))
            .ok_or(OutOfMemory::CapacityOverflow)?;

        if power > self.power() {
            self.resize_exact(power)?;
        }
        self.floor_power = self.floor_power.max(power);
        Ok(())
    }

    /// Shrinks to the smallest power that holds the live entries, down to
    /// the floor, dropping tombstones on the way.
    pub(crate) fn shrink_to_fit(&mut self) -> Result<(), OutOfMemory> {
        let power = self.fitting_power()?;

        if power < self.power() || self.tombstones() > 0 {
            self.resize_exact(power.min(self.power()))
        } else {
            Ok(())
        }
    }

    /// Moves every live record into fresh storage of `2^power` slots.
    ///
    /// Home slots are recomputed from the stored fragments, so no key is
    /// hashed again and no caller code runs. On failure the table is left
    /// exactly as it was.
    fn resize_exact(&mut self, power: u32) -> Result<(), OutOfMemory> {
        debug_assert!(self.occupied < (1usize << power.min(usize::BITS - 2)));

        #[cfg(test)]
        if self.fail_allocations {
            return Err(OutOfMemory::AllocFailed { size: 0 });
        }

        let new_storage = Storage::allocate(self.slot, power, Fallibility::Fallible)?;
        let old_storage = mem::replace(&mut self.storage, new_storage);
        let old_capacity = old_storage.capacity();
        let reclaimed = self.tombstones();

        let mask = self.capacity() - 1;
        for (old_index, &meta) in old_storage.metadata().iter().enumerate() {
            if !meta.is_full() {
                continue;
            }

            let mut index = meta.home(mask);
            // SAFETY: Indices are masked to the new capacity, and the new
            // table has more slots than live records so an empty one exists.
            while unsafe { self.storage.metadata().get_unchecked(index).is_full() } {
                index = (index + 1) & mask;
            }

            // SAFETY: Both pointers address a whole slot record in distinct
            // allocations. Ownership of the record moves to the new storage;
            // the old storage is freed below without dropping it.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    old_storage.entry(self.slot, old_index).as_ptr(),
                    self.storage.entry(self.slot, index).as_ptr(),
                    self.slot.size,
                );
                *self.storage.metadata_mut().get_unchecked_mut(index) = meta;
            }
        }
        self.occupied_or_tombstoned = self.occupied;

        log::trace!(
            "resized {} -> {} slots ({} live, {} tombstones reclaimed)",
            old_capacity,
            self.capacity(),
            self.occupied,
            reclaimed
        );

        drop(old_storage);
        Ok(())
    }

    /// Index of the first live slot at or after `start`.
    #[inline]
    pub(crate) fn next_full(&self, start: usize) -> Option<usize> {
        self.storage
            .metadata()
            .get(start..)?
            .iter()
            .position(|meta| meta.is_full())
            .map(|offset| start + offset)
    }

    /// Empties every slot, handing each live record to `drop_entry`.
    ///
    /// Counters are reset first, so a panicking `drop_entry` leaves the table
    /// usable (the remaining records leak).
    pub(crate) fn clear_with(&mut self, mut drop_entry: impl FnMut(NonNull<u8>)) {
        self.occupied = 0;
        self.occupied_or_tombstoned = 0;

        for index in 0..self.capacity() {
            let meta = self.storage.metadata()[index];
            if meta.is_empty() {
                continue;
            }
            self.storage.metadata_mut()[index] = Metadata::EMPTY;
            if meta.is_full() {
                drop_entry(self.entry(index));
            }
        }
    }

    /// Builds a table of the same shape, tombstones included, with each live
    /// record produced by `clone_entry(source, destination)`.
    ///
    /// Slot states are copied one at a time after the record is written, so a
    /// panicking `clone_entry` leaves a partially filled but consistent copy.
    pub(crate) fn clone_with(&self, mut clone_entry: impl FnMut(NonNull<u8>, NonNull<u8>)) -> Self {
        let storage = match Storage::allocate(self.slot, self.power(), Fallibility::Infallible) {
            Ok(storage) => storage,
            Err(_) => unreachable!("infallible allocation returned an error"),
        };
        let mut table = Self {
            storage,
            slot: self.slot,
            config: self.config,
            occupied: 0,
            occupied_or_tombstoned: 0,
            floor_power: self.floor_power,
            #[cfg(test)]
            fail_allocations: false,
        };

        for (index, &meta) in self.storage.metadata().iter().enumerate() {
            if meta.is_empty() {
                continue;
            }
            if meta.is_full() {
                clone_entry(self.entry(index), table.entry(index));
                table.occupied += 1;
            }
            table.storage.metadata_mut()[index] = meta;
            table.occupied_or_tombstoned += 1;
        }

        table
    }

    /// Counts live entries per probe distance from their home slot.
    #[cfg(any(test, feature = "stats"))]
    pub(crate) fn probe_lengths(&self) -> alloc::vec::Vec<usize> {
        let mask = self.capacity() - 1;
        let mut hist = alloc::vec::Vec::new();
        for (index, &meta) in self.storage.metadata().iter().enumerate() {
            if !meta.is_full() {
                continue;
            }
            let distance = index.wrapping_sub(meta.home(mask)) & mask;
            if hist.len() <= distance {
                hist.resize(distance + 1, 0);
            }
            hist[distance] += 1;
        }
        hist
    }

    /// Bytes held by the storage allocation.
    #[cfg(any(test, feature = "stats"))]
    pub(crate) fn allocated_bytes(&self) -> usize {
        self.storage.layout.layout.size()
    }

    /// Bytes of slot records not holding a live entry.
    #[cfg(any(test, feature = "stats"))]
    pub(crate) fn unused_entry_bytes(&self) -> usize {
        (self.capacity() - self.occupied) * self.slot.size
    }

    #[cfg(test)]
    fn count_states(&self) -> (usize, usize, usize) {
        let metadata = self.storage.metadata();
        (
            metadata.iter().filter(|meta| meta.is_empty()).count(),
            metadata.iter().filter(|meta| meta.is_deleted()).count(),
            metadata.iter().filter(|meta| meta.is_full()).count(),
        )
    }
}
