/// What the allocator currently knows about a page
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PageState {
    /// The page is part of a block but not its first page, or it is not managed at all
    #[default]
    Tail,
    /// The page is the first page of a block that is on a free list
    FreeHead,
    /// The page is the first page of an allocated block
    AllocatedHead,
}

/// Bookkeeping record kept for every page managed by a [`BuddyAllocator`](super::BuddyAllocator)
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PageInfo {
    refcount: u8,
    order: u8,
    state: PageState,
}

impl PageInfo {
    /// The number of owners currently holding this page
    pub fn refcount(&self) -> u8 {
        self.refcount
    }

    /// The order of the block this page heads.
    ///
    /// Only meaningful if [`state`](Self::state) is not [`PageState::Tail`].
    pub fn order(&self) -> usize {
        self.order as usize
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    pub(super) fn set_refcount(&mut self, refcount: u8) {
        self.refcount = refcount;
    }

    pub(super) fn mark_free_head(&mut self, order: usize) {
        self.order = order as u8;
        self.state = PageState::FreeHead;
    }

    pub(super) fn mark_allocated_head(&mut self, order: usize) {
        self.order = order as u8;
        self.state = PageState::AllocatedHead;
    }

    /// Forget the page's order and state while keeping its reference count
    pub(super) fn clear(&mut self) {
        self.order = 0;
        self.state = PageState::Tail;
    }
}
