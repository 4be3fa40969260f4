const WORD_BITS: usize = 64;

/// Fixed-length bit vector addressed by task index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    /// Create a bitmap of `len` bits, all unset.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set bit `index`. Indices past the end are ignored.
    pub fn set(&mut self, index: usize) {
        if index < self.len {
            self.words[index / WORD_BITS] |= 1u64 << (index % WORD_BITS);
        }
    }

    /// Returns false for indices past the end.
    pub fn get(&self, index: usize) -> bool {
        index < self.len && self.words[index / WORD_BITS] & (1u64 << (index % WORD_BITS)) != 0
    }

    /// Population count.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// In-place bitwise AND with another bitmap of the same length.
    pub fn and_assign(&mut self, other: &Bitmap) {
        debug_assert_eq!(self.len, other.len, "bitmap length mismatch");
        for (word, rhs) in self.words.iter_mut().zip(&other.words) {
            *word &= rhs;
        }
    }
}
