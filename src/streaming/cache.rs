//! Residency cache for GPU brick textures
//!
//! Keeps the working set of resident (brick, component) textures within a
//! fixed byte budget. When a new brick does not fit, resident bricks are
//! evicted farthest-first from the incoming brick's box in a single pass.
//! A failed admission is backpressure, not an error: the caller skips the
//! brick and retries it in a later slice.

use std::collections::HashMap;

use serde::Serialize;

use crate::math::Aabb;
use crate::volume::{BrickId, ComponentKind, VolumeId};
use super::backend::{SampleFilter, TextureAllocator, TextureDesc};
use super::budget::MemoryBudget;

/// Identity of a resident texture
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResidentKey {
    pub volume: VolumeId,
    pub brick: BrickId,
    /// Component index within the volume
    pub component: u8,
}

impl ResidentKey {
    pub fn new(volume: VolumeId, brick: BrickId, component: u8) -> Self {
        Self { volume, brick, component }
    }
}

/// One resident texture
struct ResidentResource<H> {
    /// Box of the brick, used as the eviction distance key
    bbox: Aabb,
    desc: TextureDesc,
    handle: H,
}

/// Request to make a brick component resident
#[derive(Clone, Copy, Debug)]
pub struct AdmitRequest<'a> {
    pub key: ResidentKey,
    pub bbox: Aabb,
    pub desc: TextureDesc,
    /// Texel data to upload on creation
    pub data: Option<&'a [u8]>,
}

/// Why an admission was refused
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// Larger than the whole budget; undrawable until the ceiling is raised
    TooLarge,
    /// Evicting every eligible resident would still not free enough
    Insufficient,
    /// The allocator could not create the texture
    AllocationFailed,
}

/// Outcome of `ResidencyCache::admit`
#[derive(Clone, Debug, PartialEq)]
pub enum Admission<H> {
    /// Already resident
    Hit(H),
    /// Newly created, after evicting `evicted` residents
    Admitted { handle: H, evicted: usize },
    Rejected(RejectReason),
}

impl<H> Admission<H> {
    pub fn handle(&self) -> Option<&H> {
        match self {
            Admission::Hit(h) | Admission::Admitted { handle: h, .. } => Some(h),
            Admission::Rejected(_) => None,
        }
    }

    pub fn is_resident(&self) -> bool {
        !matches!(self, Admission::Rejected(_))
    }
}

/// Cache counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub admissions: u64,
    pub evictions: u64,
    pub rejections: u64,
    /// Resident textures right now
    pub resident: usize,
    /// Bytes reserved right now
    pub used_bytes: u64,
}

/// Bounded pool of GPU-resident brick textures
///
/// One instance per rendering context; the scheduler admits through it and
/// volume teardown releases through it.
pub struct ResidencyCache<A: TextureAllocator> {
    allocator: A,
    budget: MemoryBudget,
    entries: HashMap<ResidentKey, ResidentResource<A::Handle>>,
    stats: CacheStats,
}

impl<A: TextureAllocator> ResidencyCache<A> {
    /// Create a cache with a `ceiling_bytes` budget
    pub fn new(allocator: A, ceiling_bytes: u64) -> Self {
        Self {
            allocator,
            budget: MemoryBudget::new(ceiling_bytes),
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    /// Change the ceiling; residents above it are evicted lazily by later admissions
    pub fn set_ceiling(&mut self, ceiling_bytes: u64) {
        self.budget.set_ceiling(ceiling_bytes);
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.allocator
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &ResidentKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Resident handle of `key`, never allocates
    pub fn lookup(&self, key: &ResidentKey) -> Option<&A::Handle> {
        self.entries.get(key).map(|e| &e.handle)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            resident: self.entries.len(),
            used_bytes: self.budget.used(),
            ..self.stats
        }
    }

    /// Make a brick component resident, evicting far bricks if needed
    pub fn admit(&mut self, request: AdmitRequest<'_>) -> Admission<A::Handle> {
        let AdmitRequest { key, bbox, desc, data } = request;

        if let Some(entry) = self.entries.get_mut(&key) {
            if entry.desc.same_storage(&desc) {
                if entry.desc.filter != desc.filter {
                    self.allocator.set_filter(&mut entry.handle, desc.filter);
                    entry.desc.filter = desc.filter;
                }
                self.stats.hits += 1;
                return Admission::Hit(entry.handle.clone());
            }
            // Dimensions or format changed: the old texture is stale
            log::debug!("Replacing stale resident texture {:?}", key);
            self.release(&key);
        }
        self.stats.misses += 1;

        let size = desc.size_bytes();
        if size > self.budget.ceiling() {
            log::warn!(
                "Brick {:?} needs {} bytes, more than the {} byte budget",
                key, size, self.budget.ceiling()
            );
            return self.reject(RejectReason::TooLarge);
        }

        let mut evicted = 0;
        if !self.budget.can_fit(size) {
            match self.evict_for(&key, &bbox, size) {
                Some(n) => evicted = n,
                None => return self.reject(RejectReason::Insufficient),
            }
        }

        let handle = match self.allocator.create(&desc, data) {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("Failed to allocate texture for {:?}: {}", key, e);
                return self.reject(RejectReason::AllocationFailed);
            }
        };

        // can_fit held after eviction, so the reservation succeeds
        self.budget.reserve(size);
        self.entries.insert(key, ResidentResource { bbox, desc, handle: handle.clone() });
        self.stats.admissions += 1;
        log::trace!("Admitted {:?} ({} bytes, {} available)", key, size, self.budget.available());

        Admission::Admitted { handle, evicted }
    }

    fn reject(&mut self, reason: RejectReason) -> Admission<A::Handle> {
        self.stats.rejections += 1;
        Admission::Rejected(reason)
    }

    /// Free at least `size` bytes for `key`, farthest residents first
    ///
    /// Returns the number of evicted entries, or None (evicting nothing)
    /// when every eligible resident together would not free enough.
    fn evict_for(&mut self, key: &ResidentKey, bbox: &Aabb, size: u64) -> Option<usize> {
        let mut candidates: Vec<(f32, ResidentKey, u64)> = self.entries.iter()
            .filter(|(k, _)| !(k.volume == key.volume && k.brick == key.brick))
            .map(|(k, e)| (e.bbox.distance_to(bbox), *k, e.desc.size_bytes()))
            .collect();

        let reclaimable: u64 = candidates.iter().map(|c| c.2).sum();
        if self.budget.available().saturating_add(reclaimable) < size {
            return None;
        }

        // Farthest first; ties by key so eviction is deterministic
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let mut evicted = 0;
        for (distance, victim, _) in candidates {
            if self.budget.can_fit(size) {
                break;
            }
            log::trace!("Evicting {:?} at distance {:.3}", victim, distance);
            self.release(&victim);
            evicted += 1;
        }
        self.stats.evictions += evicted as u64;

        log::debug!(
            "Evicted {} bricks for {:?} ({} bytes available)",
            evicted, key, self.budget.available()
        );
        Some(evicted)
    }

    /// Destroy one resident texture; returns false if it was not resident
    pub fn release(&mut self, key: &ResidentKey) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.budget.restore(entry.desc.size_bytes());
                self.allocator.destroy(entry.handle);
                true
            }
            None => false,
        }
    }

    /// Release every entry matching `pred`; returns how many were released
    fn release_where(&mut self, pred: impl Fn(&ResidentKey, &TextureDesc) -> bool) -> usize {
        let keys: Vec<ResidentKey> = self.entries.iter()
            .filter(|(k, e)| pred(*k, &e.desc))
            .map(|(k, _)| *k)
            .collect();
        for key in &keys {
            self.release(key);
        }
        keys.len()
    }

    /// Release every component of one brick
    pub fn release_brick(&mut self, volume: VolumeId, brick: BrickId) -> usize {
        self.release_where(|k, _| k.volume == volume && k.brick == brick)
    }

    /// Release one component of every brick of a volume
    pub fn release_component(&mut self, volume: VolumeId, component: u8) -> usize {
        self.release_where(|k, _| k.volume == volume && k.component == component)
    }

    /// Release every texture of one kind (e.g. all masks after a mask edit)
    pub fn release_kind(&mut self, kind: ComponentKind) -> usize {
        self.release_where(|_, d| d.format.kind == kind)
    }

    /// Release everything belonging to a volume
    pub fn release_volume(&mut self, volume: VolumeId) -> usize {
        let released = self.release_where(|k, _| k.volume == volume);
        if released > 0 {
            log::info!("Released {} resident textures of {:?}", released, volume);
        }
        released
    }

    /// Release every resident texture
    pub fn clear_all(&mut self) {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            self.allocator.destroy(entry.handle);
        }
        self.budget.restore(self.budget.used());
        log::info!("Cleared residency cache ({} textures)", count);
    }

    /// Change the filter of a resident texture without reallocating
    pub fn set_filter(&mut self, key: &ResidentKey, filter: SampleFilter) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                self.allocator.set_filter(&mut entry.handle, filter);
                entry.desc.filter = filter;
                true
            }
            None => false,
        }
    }

    /// Bytes held by resident textures (equals `budget().used()`)
    pub fn resident_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.desc.size_bytes()).sum()
    }
}
