//! Paged bump allocator backing states, set nodes and state vectors.
//!
//! Memory is handed out from fixed-size pages. Allocation only ever bumps
//! the free pointer of the current page; nothing is freed individually.
//! The only ways to give memory back are:
//!
//! - `undo_last`: discard the most recent allocation (speculative work)
//! - `restore`: roll back to an earlier `snapshot`
//! - `decr_use`: when the last user releases the arena all pages move to
//!   the page cache (or are freed, see `ArenaConfig::keep_cache`)
//!
//! An `Addr` is `page_index * slots_per_page + offset`, so addresses stay
//! valid as long as the page holding them is in use.

use log::trace;

use crate::error::{Error, Result};

/// Default page size in bytes.
pub const PAGE_SIZE: usize = 256 * 1024;

/// Addresses stay below `u32::MAX`, which `StateId::NONE` occupies.
const MAX_SLOTS: usize = u32::MAX as usize;

/// Configuration shared by an arena and every scratch arena derived from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Size of one page in bytes. Rounded down to whole slots, at least one.
    pub page_size: usize,
    /// Upper bound for the number of pages in use. `None` means unbounded.
    pub max_pages: Option<usize>,
    /// Keep released pages for reuse instead of freeing them.
    pub keep_cache: bool,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            max_pages: None,
            keep_cache: true,
        }
    }
}

impl ArenaConfig {
    /// Config with pages of `page_size` bytes and at most `max_pages` of them.
    pub fn bounded(page_size: usize, max_pages: usize) -> Self {
        Self {
            page_size,
            max_pages: Some(max_pages),
            keep_cache: true,
        }
    }
}

/// Address of a slot inside an arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Addr(u32);

impl Addr {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn from_index(index: usize) -> Addr {
        Addr(index as u32)
    }
}

/// Checkpoint returned by `Arena::snapshot`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pages: usize,
    used: usize,
    allocated: usize,
}

/// A paged bump allocator for values of type `T`.
pub struct Arena<T> {
    config: ArenaConfig,
    slots_per_page: usize,
    pages: Vec<Vec<T>>,
    cache: Vec<Vec<T>>,
    use_count: usize,
    allocated: usize,
    wasted: usize,
    last: Option<(Addr, usize)>,
}

impl<T> std::fmt::Debug for Arena<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("pages", &self.pages.len())
            .field("cached_pages", &self.cache.len())
            .field("capacity", &self.capacity())
            .field("use_count", &self.use_count)
            .field("allocated", &self.allocated)
            .field("wasted", &self.wasted)
            .finish()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::with_config(ArenaConfig::default())
    }

    pub fn with_config(config: ArenaConfig) -> Self {
        let slot_size = std::mem::size_of::<T>().max(1);
        let slots_per_page = (config.page_size / slot_size).max(1);
        Self {
            config,
            slots_per_page,
            pages: Vec::new(),
            cache: Vec::new(),
            use_count: 0,
            allocated: 0,
            wasted: 0,
            last: None,
        }
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Number of slots of type `T` on one page.
    #[cfg(test)]
    pub fn slots_per_page(&self) -> usize {
        self.slots_per_page
    }

    /// Bytes handed out by `alloc` and not yet given back.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Bytes charged as wasted by `add_wasted` since the arena was last reset.
    #[inline]
    pub fn wasted(&self) -> usize {
        self.wasted
    }

    #[inline]
    pub fn use_count(&self) -> usize {
        self.use_count
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    pub fn cached_page_count(&self) -> usize {
        self.cache.len()
    }

    /// One past the highest address that can currently be valid.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.pages.len() * self.slots_per_page
    }

    fn free_slots(&self) -> usize {
        match self.pages.last() {
            Some(page) => self.slots_per_page - page.len(),
            None => 0,
        }
    }

    /// Returns true if `count` consecutive allocations of `slots` slots each
    /// would all succeed.
    pub fn can_alloc(&self, slots: usize, count: usize) -> bool {
        if count == 0 {
            return true;
        }
        if slots == 0 || slots > self.slots_per_page {
            return false;
        }
        let in_current = self.free_slots() / slots;
        if in_current >= count {
            return true;
        }
        let per_page = self.slots_per_page / slots;
        let pages_needed = (count - in_current).div_ceil(per_page);
        self.pages.len() + pages_needed <= self.page_limit()
    }

    /// Most pages in use at once: the configured bound or the address range.
    fn page_limit(&self) -> usize {
        let addressable = MAX_SLOTS / self.slots_per_page;
        match self.config.max_pages {
            Some(max) => max.min(addressable),
            None => addressable,
        }
    }

    fn acquire_page(&mut self) -> Result<()> {
        if let Some(max) = self.config.max_pages {
            if self.pages.len() >= max {
                return Err(Error::OutOfMemory);
            }
        }
        if self.pages.len() >= MAX_SLOTS / self.slots_per_page {
            return Err(Error::Overflow("arena address space exhausted"));
        }
        let page = match self.cache.pop() {
            Some(page) => page,
            None => {
                let mut page = Vec::new();
                page.try_reserve_exact(self.slots_per_page)
                    .map_err(|_| Error::OutOfMemory)?;
                page
            }
        };
        self.pages.push(page);
        trace!(
            "arena acquired page {} ({} cached)",
            self.pages.len() - 1,
            self.cache.len()
        );
        Ok(())
    }

    /// Make sure `n` slots fit into the current page.
    fn prepare(&mut self, n: usize) -> Result<()> {
        if n == 0 {
            return Err(Error::InvalidArgument("zero sized allocation"));
        }
        if n > self.slots_per_page {
            return Err(Error::OutOfMemory);
        }
        if self.free_slots() < n {
            self.acquire_page()?;
        }
        Ok(())
    }

    fn commit(&mut self, n: usize) -> Addr {
        let page_index = self.pages.len() - 1;
        let offset = self.pages[page_index].len() - n;
        let addr = Addr::from_index(page_index * self.slots_per_page + offset);
        self.allocated += n * std::mem::size_of::<T>();
        self.last = Some((addr, n));
        addr
    }

    /// Allocate `items.len()` consecutive slots holding a copy of `items`.
    pub fn alloc(&mut self, items: &[T]) -> Result<Addr>
    where
        T: Copy,
    {
        self.prepare(items.len())?;
        if let Some(page) = self.pages.last_mut() {
            page.extend_from_slice(items);
        }
        Ok(self.commit(items.len()))
    }

    /// Allocate `n` consecutive slots filled from `items`.
    ///
    /// `items` must yield exactly `n` values.
    pub fn alloc_iter<I>(&mut self, n: usize, items: I) -> Result<Addr>
    where
        I: IntoIterator<Item = T>,
    {
        self.prepare(n)?;
        if let Some(page) = self.pages.last_mut() {
            let before = page.len();
            page.extend(items.into_iter().take(n));
            if page.len() - before != n {
                page.truncate(before);
                return Err(Error::InvalidArgument("iterator yielded too few items"));
            }
        }
        Ok(self.commit(n))
    }

    /// Discard the most recent allocation.
    ///
    /// Only valid directly after `alloc`; any other call in between
    /// (`undo_last`, `restore`, `decr_use`) makes it fail.
    pub fn undo_last(&mut self) -> Result<()> {
        let (addr, n) = self
            .last
            .take()
            .ok_or(Error::InvalidArgument("no allocation to undo"))?;
        let (page_index, offset) = self.locate(addr);
        let is_last_page = page_index + 1 == self.pages.len();
        match self.pages.get_mut(page_index) {
            Some(page) if is_last_page && page.len() == offset + n => {
                page.truncate(offset);
                self.allocated -= n * std::mem::size_of::<T>();
                Ok(())
            }
            _ => Err(Error::InvalidArgument("allocation is not the last one")),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            pages: self.pages.len(),
            used: self.pages.last().map_or(0, Vec::len),
            allocated: self.allocated,
        }
    }

    /// Release everything allocated since `snapshot` was taken.
    pub fn restore(&mut self, snapshot: Snapshot) -> Result<()> {
        if snapshot.pages > self.pages.len() || snapshot.allocated > self.allocated {
            return Err(Error::InvalidArgument("snapshot is newer than arena"));
        }
        if snapshot.pages == self.pages.len()
            && snapshot.used > self.pages.last().map_or(0, Vec::len)
        {
            return Err(Error::InvalidArgument("snapshot is newer than arena"));
        }
        while self.pages.len() > snapshot.pages {
            if let Some(page) = self.pages.pop() {
                self.release_page(page);
            }
        }
        if let Some(page) = self.pages.last_mut() {
            page.truncate(snapshot.used);
        }
        self.allocated = snapshot.allocated;
        self.last = None;
        Ok(())
    }

    fn release_page(&mut self, mut page: Vec<T>) {
        if self.config.keep_cache {
            page.clear();
            self.cache.push(page);
        }
    }

    /// Charge `bytes` of already allocated memory as no longer used.
    pub fn add_wasted(&mut self, bytes: usize) {
        self.wasted = (self.wasted + bytes).min(self.allocated);
    }

    /// Register one more user.
    pub fn incr_use(&mut self) {
        self.use_count += 1;
    }

    /// Unregister one user and return the remaining use count.
    ///
    /// When the count drops to zero every page is released and the arena
    /// starts over empty. Addresses handed out before become invalid.
    pub fn decr_use(&mut self) -> usize {
        debug_assert!(self.use_count > 0, "decr_use without incr_use");
        self.use_count = self.use_count.saturating_sub(1);
        if self.use_count == 0 {
            let released = self.pages.len();
            let pages = std::mem::take(&mut self.pages);
            for page in pages {
                self.release_page(page);
            }
            self.allocated = 0;
            self.wasted = 0;
            self.last = None;
            trace!(
                "arena released {} pages ({} cached)",
                released,
                self.cache.len()
            );
        }
        self.use_count
    }

    /// Free all cached pages.
    pub fn free_cache(&mut self) {
        self.cache = Vec::new();
    }

    #[inline]
    fn locate(&self, addr: Addr) -> (usize, usize) {
        (
            addr.index() / self.slots_per_page,
            addr.index() % self.slots_per_page,
        )
    }

    /// `n` consecutive slots starting at `addr`.
    pub fn slice(&self, addr: Addr, n: usize) -> &[T] {
        let (page, offset) = self.locate(addr);
        &self.pages[page][offset..offset + n]
    }
}

impl<T> std::ops::Index<Addr> for Arena<T> {
    type Output = T;

    #[inline]
    fn index(&self, addr: Addr) -> &Self::Output {
        let (page, offset) = self.locate(addr);
        &self.pages[page][offset]
    }
}

impl<T> std::ops::IndexMut<Addr> for Arena<T> {
    #[inline]
    fn index_mut(&mut self, addr: Addr) -> &mut Self::Output {
        let (page, offset) = self.locate(addr);
        &mut self.pages[page][offset]
    }
}
