use crate::coherence::line::CacheLine;

/// An associativity-N group of lines with per-line LRU counters.
///
/// Counters follow the convention higher = less recently used. Touching a
/// line bumps every counter and zeroes the touched one, which keeps a
/// strict recency order inside the set.
#[derive(Debug)]
pub struct CacheSet {
    lines: Vec<CacheLine>,
    lru: Vec<u64>,
}

impl CacheSet {
    pub fn new(associativity: usize, block_bytes: usize) -> Self {
        let associativity = associativity.max(1);
        Self {
            lines: (0..associativity).map(|_| CacheLine::new(block_bytes)).collect(),
            lru: vec![0; associativity],
        }
    }

    pub fn associativity(&self) -> usize {
        self.lines.len()
    }

    pub fn line(&self, way: usize) -> &CacheLine {
        &self.lines[way]
    }

    pub fn line_mut(&mut self, way: usize) -> &mut CacheLine {
        &mut self.lines[way]
    }

    pub fn lines(&self) -> &[CacheLine] {
        &self.lines
    }

    /// Linear scan for a valid line with a matching tag. Invalid entries
    /// never match even if their stale tag agrees.
    pub fn find_line(&self, tag: u32) -> Option<usize> {
        self.lines
            .iter()
            .position(|l| l.is_valid() && l.tag() == tag)
    }

    /// Picks the slot a new tag will occupy: an invalid slot if one exists,
    /// otherwise the LRU victim. The chosen slot gets the tag and becomes
    /// most recently used. Eviction side effects on a valid victim are the
    /// caller's responsibility and must happen before this call.
    pub fn allocate_line(&mut self, tag: u32) -> usize {
        let way = self
            .lines
            .iter()
            .position(|l| !l.is_valid())
            .unwrap_or_else(|| self.lru_way());
        self.lines[way].set_tag(tag);
        self.touch(way);
        way
    }

    /// The victim slot under LRU: maximum counter, lowest index on ties.
    pub fn lru_way(&self) -> usize {
        let mut victim = 0;
        for (way, &count) in self.lru.iter().enumerate() {
            if count > self.lru[victim] {
                victim = way;
            }
        }
        victim
    }

    pub fn lru_value(&self, way: usize) -> u64 {
        self.lru[way]
    }

    /// Marks `way` most recently used.
    pub fn touch(&mut self, way: usize) {
        for count in &mut self.lru {
            *count = count.saturating_add(1);
        }
        self.lru[way] = 0;
    }

    /// Flips a line to Invalid. The LRU counter is deliberately left
    /// alone; a freshly invalidated slot only becomes the preferred victim
    /// through the invalid-first rule in `allocate_line`.
    pub fn invalidate_line(&mut self, way: usize) {
        self.lines[way].invalidate();
    }

    pub fn invalidate_tag(&mut self, tag: u32) {
        if let Some(way) = self.find_line(tag) {
            self.invalidate_line(way);
        }
    }

    pub fn is_full(&self) -> bool {
        self.lines.iter().all(|l| l.is_valid())
    }
}
