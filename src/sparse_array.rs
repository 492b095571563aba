use std::fmt;
use std::ops::{Index, IndexMut};

/// Slot-stable keyed container.
///
/// `SparseArray` hands out [`SparseId`]s for the values it stores. Storage is a
/// list of boxed chunks whose cumulative capacity doubles with every new chunk,
/// so growing the container never moves an existing element and removing one
/// never moves its neighbours. This is what lets the slab heap keep page ids
/// inside live blocks and lets the sink registry hand out long-lived ids.

/// Number of slots in the first chunk.
pub const MIN_CHUNK_SIZE: usize = 4;
const MIN_CHUNK_SHIFT: u32 = MIN_CHUNK_SIZE.trailing_zeros();

/// Highest index a slot can ever have.
pub const MAX_INDEX: u32 = u32::MAX - 1;
const NO_SLOT: u32 = u32::MAX;

/// Handle to a slot of a [`SparseArray`].
///
/// An id only resolves while the slot's generation still matches. Removing the
/// value bumps the generation, so an id never aliases whatever is stored in
/// that slot later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SparseId {
    index: u32,
    generation: u16,
}

impl SparseId {
    /// Slot index inside the container.
    #[inline]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Generation the slot had when this id was issued.
    #[inline]
    pub const fn generation(&self) -> u16 {
        self.generation
    }
}

impl fmt::Display for SparseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

enum Entry<T> {
    Occupied(T),
    Vacant { next_free: u32 },
}

struct Slot<T> {
    generation: u16,
    entry: Entry<T>,
}

/// Chunk holding the slot at `index`: `ceil(log2(max(index + 1, 4))) - 2`.
#[inline]
fn chunk_class(index: usize) -> usize {
    let n = (index + 1).max(MIN_CHUNK_SIZE);
    let ceil_log2 = usize::BITS - (n - 1).leading_zeros();
    (ceil_log2 - MIN_CHUNK_SHIFT) as usize
}

#[inline]
fn chunk_start(class: usize) -> usize {
    if class == 0 {
        0
    } else {
        1 << (class as u32 + MIN_CHUNK_SHIFT - 1)
    }
}

#[inline]
fn chunk_len(class: usize) -> usize {
    if class == 0 {
        MIN_CHUNK_SIZE
    } else {
        1 << (class as u32 + MIN_CHUNK_SHIFT - 1)
    }
}

/// Growable container with stable slots.
///
/// # Examples
///
/// ```
/// # use slab_logger::sparse_array::SparseArray;
/// let mut names = SparseArray::new();
/// let a = names.emplace("console");
/// let b = names.emplace("file");
///
/// assert_eq!(names.find(a), Some(&"console"));
/// assert_eq!(names.remove(a), Some("console"));
///
/// // The freed slot is reused but the old id stays dead.
/// let c = names.emplace("json");
/// assert_eq!(c.index(), a.index());
/// assert_eq!(names.find(a), None);
/// assert_eq!(names[b], "file");
/// ```
pub struct SparseArray<T> {
    chunks: Vec<Box<[Slot<T>]>>,
    len: usize,
    high_water: usize,
    free_head: u32,
    fresh_generation: u16,
}

impl<T> SparseArray<T> {
    pub const fn new() -> Self {
        Self {
            chunks: Vec::new(),
            len: 0,
            high_water: 0,
            free_head: NO_SLOT,
            fresh_generation: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut array = Self::new();
        array.reserve(capacity);
        array
    }

    /// Number of live values.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the highest slot index ever handed out.
    #[inline]
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Total number of slots across all chunks.
    #[inline]
    pub fn capacity(&self) -> usize {
        match self.chunks.len() {
            0 => 0,
            n => chunk_start(n - 1) + chunk_len(n - 1),
        }
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Grows the chunk list until at least `capacity` slots exist.
    ///
    /// New chunks are appended; chunks already allocated are left where they
    /// are, so references into the container stay valid.
    pub fn reserve(&mut self, capacity: usize) {
        assert!(
            capacity <= MAX_INDEX as usize + 1,
            "SparseArray capacity {capacity} exceeds the index space"
        );
        while self.capacity() < capacity {
            self.push_chunk();
        }
    }

    fn push_chunk(&mut self) {
        let class = self.chunks.len();
        let generation = self.fresh_generation;
        let chunk: Box<[Slot<T>]> = (0..chunk_len(class))
            .map(|_| Slot {
                generation,
                entry: Entry::Vacant { next_free: NO_SLOT },
            })
            .collect();
        self.chunks.push(chunk);
    }

    #[inline]
    fn slot(&self, index: usize) -> &Slot<T> {
        let class = chunk_class(index);
        &self.chunks[class][index - chunk_start(class)]
    }

    #[inline]
    fn slot_mut(&mut self, index: usize) -> &mut Slot<T> {
        let class = chunk_class(index);
        &mut self.chunks[class][index - chunk_start(class)]
    }

    fn take_free_index(&mut self) -> usize {
        if self.free_head != NO_SLOT {
            let index = self.free_head as usize;
            let next = match self.slot(index).entry {
                Entry::Vacant { next_free } => next_free,
                Entry::Occupied(_) => unreachable!("free list points at an occupied slot"),
            };
            self.free_head = next;
            return index;
        }

        let index = self.high_water;
        assert!(
            index <= MAX_INDEX as usize,
            "SparseArray exhausted its index space"
        );
        if index == self.capacity() {
            self.push_chunk();
        }
        self.high_water += 1;
        index
    }

    /// Stores `value` and returns its id together with a reference to it.
    pub fn add(&mut self, value: T) -> (SparseId, &mut T) {
        let index = self.take_free_index();
        self.len += 1;
        let slot = self.slot_mut(index);
        slot.entry = Entry::Occupied(value);
        let id = SparseId {
            index: index as u32,
            generation: slot.generation,
        };
        match &mut slot.entry {
            Entry::Occupied(value) => (id, value),
            Entry::Vacant { .. } => unreachable!(),
        }
    }

    /// Stores `value` and returns its id.
    pub fn emplace(&mut self, value: T) -> SparseId {
        self.add(value).0
    }

    #[inline]
    fn is_live(&self, id: SparseId) -> bool {
        (id.index as usize) < self.high_water && self.slot(id.index as usize).generation == id.generation
    }

    /// Resolves `id`, or `None` when the slot was removed or reused since.
    pub fn find(&self, id: SparseId) -> Option<&T> {
        if !self.is_live(id) {
            return None;
        }
        match &self.slot(id.index as usize).entry {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant { .. } => None,
        }
    }

    pub fn find_mut(&mut self, id: SparseId) -> Option<&mut T> {
        if !self.is_live(id) {
            return None;
        }
        match &mut self.slot_mut(id.index as usize).entry {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant { .. } => None,
        }
    }

    #[inline]
    pub fn contains(&self, id: SparseId) -> bool {
        self.find(id).is_some()
    }

    /// Removes and returns the value behind `id`.
    ///
    /// The vacated index goes on the free list. Smaller indices are kept near
    /// the head so reuse stays roughly packed, but no strict order is kept.
    pub fn remove(&mut self, id: SparseId) -> Option<T> {
        if !self.is_live(id) {
            return None;
        }
        let index = id.index as usize;
        let head = self.free_head;
        let next_free = if head == NO_SLOT || id.index < head {
            head
        } else {
            match self.slot(head as usize).entry {
                Entry::Vacant { next_free } => next_free,
                Entry::Occupied(_) => unreachable!("free list points at an occupied slot"),
            }
        };

        let slot = self.slot_mut(index);
        if matches!(slot.entry, Entry::Vacant { .. }) {
            return None;
        }
        let previous = std::mem::replace(&mut slot.entry, Entry::Vacant { next_free });
        slot.generation = slot.generation.wrapping_add(1);

        if head == NO_SLOT || id.index < head {
            self.free_head = id.index;
        } else if let Entry::Vacant { next_free } = &mut self.slot_mut(head as usize).entry {
            *next_free = id.index;
        }
        self.len -= 1;

        match previous {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant { .. } => unreachable!(),
        }
    }

    /// Finds the id of a value by its address.
    pub fn id_of(&self, value: &T) -> Option<SparseId> {
        let target = value as *const T as usize;
        let stride = std::mem::size_of::<Slot<T>>();
        for (class, chunk) in self.chunks.iter().enumerate() {
            let base = chunk.as_ptr() as usize;
            let end = base + chunk.len() * stride;
            if target < base || target >= end {
                continue;
            }
            let local = (target - base) / stride;
            let slot = &chunk[local];
            return match &slot.entry {
                Entry::Occupied(stored) if std::ptr::eq(stored, value) => Some(SparseId {
                    index: (chunk_start(class) + local) as u32,
                    generation: slot.generation,
                }),
                _ => None,
            };
        }
        None
    }

    /// Keeps only the values for which `keep` returns true.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(SparseId, &mut T) -> bool,
    {
        for index in 0..self.high_water {
            let slot = self.slot_mut(index);
            let id = SparseId {
                index: index as u32,
                generation: slot.generation,
            };
            let drop_it = match &mut slot.entry {
                Entry::Occupied(value) => !keep(id, value),
                Entry::Vacant { .. } => false,
            };
            if drop_it {
                self.remove(id);
            }
        }
    }

    /// Iterates live values in index order.
    pub fn iter(&self) -> impl Iterator<Item = (SparseId, &T)> + '_ {
        let high_water = self.high_water;
        self.chunks
            .iter()
            .enumerate()
            .flat_map(|(class, chunk)| {
                let start = chunk_start(class);
                chunk.iter().enumerate().map(move |(i, slot)| (start + i, slot))
            })
            .take_while(move |(index, _)| *index < high_water)
            .filter_map(|(index, slot)| match &slot.entry {
                Entry::Occupied(value) => Some((
                    SparseId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )),
                Entry::Vacant { .. } => None,
            })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SparseId, &mut T)> + '_ {
        let high_water = self.high_water;
        self.chunks
            .iter_mut()
            .enumerate()
            .flat_map(|(class, chunk)| {
                let start = chunk_start(class);
                chunk.iter_mut().enumerate().map(move |(i, slot)| (start + i, slot))
            })
            .take_while(move |(index, _)| *index < high_water)
            .filter_map(|(index, slot)| {
                let generation = slot.generation;
                match &mut slot.entry {
                    Entry::Occupied(value) => Some((
                        SparseId {
                            index: index as u32,
                            generation,
                        },
                        value,
                    )),
                    Entry::Vacant { .. } => None,
                }
            })
    }

    /// Drops every value but keeps the chunks for reuse.
    pub fn clear(&mut self) {
        for index in 0..self.high_water {
            let slot = self.slot_mut(index);
            if let Entry::Occupied(_) = slot.entry {
                slot.generation = slot.generation.wrapping_add(1);
            }
            slot.entry = Entry::Vacant { next_free: NO_SLOT };
        }
        self.len = 0;
        self.high_water = 0;
        self.free_head = NO_SLOT;
    }

    /// Drops every value and frees all chunks.
    pub fn clear_release_memory(&mut self) {
        self.clear();
        // Fresh chunks start above every generation seen so far, so ids issued
        // before the release still fail to resolve.
        let highest = self
            .chunks
            .iter()
            .flat_map(|chunk| chunk.iter())
            .map(|slot| slot.generation)
            .max();
        if let Some(highest) = highest {
            self.fresh_generation = highest.max(self.fresh_generation).wrapping_add(1);
        }
        self.chunks = Vec::new();
    }
}

impl<T> Default for SparseArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<SparseId> for SparseArray<T> {
    type Output = T;

    fn index(&self, id: SparseId) -> &T {
        match self.find(id) {
            Some(value) => value,
            None => panic!("stale SparseId {id}"),
        }
    }
}

impl<T> IndexMut<SparseId> for SparseArray<T> {
    fn index_mut(&mut self, id: SparseId) -> &mut T {
        match self.find_mut(id) {
            Some(value) => value,
            None => panic!("stale SparseId {id}"),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SparseArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
