use std::collections::VecDeque;

/// One retained block identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLink {
    pub height: u64,
    pub hash: [u8; 32],
    pub parent_hash: [u8; 32],
}

/// The last `capacity` canonical blocks, contiguous and ordered by height.
///
/// Owned by the live update loop; nothing else mutates it.
#[derive(Debug, Clone)]
pub struct HeadWindow {
    links: VecDeque<BlockLink>,
    capacity: usize,
}

impl HeadWindow {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { links: VecDeque::with_capacity(capacity), capacity }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn tip(&self) -> Option<&BlockLink> {
        self.links.back()
    }

    #[must_use]
    pub fn lowest(&self) -> Option<&BlockLink> {
        self.links.front()
    }

    #[must_use]
    pub fn get(&self, height: u64) -> Option<&BlockLink> {
        let lowest = self.links.front()?.height;
        let offset = usize::try_from(height.checked_sub(lowest)?).ok()?;
        self.links.get(offset)
    }

    #[must_use]
    pub fn hash_at(&self, height: u64) -> Option<[u8; 32]> {
        self.get(height).map(|l| l.hash)
    }

    /// Appends the next block. Returns false (and leaves the window untouched) if `link` does
    /// not extend the current tip.
    pub fn push(&mut self, link: BlockLink) -> bool {
        if let Some(tip) = self.links.back() {
            if link.height != tip.height + 1 || link.parent_hash != tip.hash {
                return false;
            }
        }
        self.links.push_back(link);
        while self.links.len() > self.capacity {
            self.links.pop_front();
        }
        true
    }

    /// Removes every block above `height`, returning them in ascending order.
    pub fn truncate_above(&mut self, height: u64) -> Vec<BlockLink> {
        let keep = self.links.iter().take_while(|l| l.height <= height).count();
        self.links.drain(keep..).collect()
    }

    /// Removes everything, returning the old contents in ascending order.
    pub fn clear(&mut self) -> Vec<BlockLink> {
        self.links.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockLink> {
        self.links.iter()
    }
}
