use thiserror::Error;

const WORD_BITS: usize = 128;

// Fixed size bit set backed by 128 bit words.
// Index starts from 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BitSet {
    inner: Vec<u128>,
    size: usize,
}

impl BitSet {
    pub(crate) fn new(size: usize) -> BitSet {
        BitSet {
            inner: vec![0; (size + WORD_BITS - 1) / WORD_BITS],
            size,
        }
    }

    #[cfg(test)]
    fn with_value(value: u128, size: usize) -> BitSet {
        let mut b = BitSet::new(size);
        if let Some(w) = b.inner.first_mut() {
            *w = value;
        }
        b
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn set(&mut self, index: usize, value: bool) -> Result<(), BitSetError> {
        if index >= self.size {
            return Err(BitSetError::InvalidIndex);
        }
        let (word, bit) = (index / WORD_BITS, index % WORD_BITS);
        match value {
            true => self.inner[word] |= 1u128 << bit,
            false => self.inner[word] &= !(1u128 << bit),
        }
        Ok(())
    }

    pub(crate) fn get(&self, index: usize) -> Result<bool, BitSetError> {
        if index >= self.size {
            return Err(BitSetError::InvalidIndex);
        }
        let (word, bit) = (index / WORD_BITS, index % WORD_BITS);
        Ok(self.inner[word] & (1u128 << bit) != 0)
    }

    pub(crate) fn count_set(&self) -> usize {
        self.inner.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub(crate) fn count_unset(&self) -> usize {
        self.size - self.count_set()
    }

    // Returns the lowest `count` unset indices in ascending order.
    pub(crate) fn min_unset_indices(&self, count: usize) -> Result<Vec<usize>, BitSetError> {
        let mut res = Vec::with_capacity(count);
        for (w, word) in self.inner.iter().enumerate() {
            if *word == u128::MAX {
                continue;
            }
            let mut b = *word;
            for bit in 0..WORD_BITS {
                let index = w * WORD_BITS + bit;
                if index >= self.size || res.len() == count {
                    break;
                }
                if b % 2 == 0 {
                    res.push(index);
                }
                b >>= 1;
            }
            if res.len() == count {
                return Ok(res);
            }
        }
        if res.len() == count {
            Ok(res)
        } else {
            Err(BitSetError::Full)
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BitSetError {
    #[error("Invalid index")]
    InvalidIndex,
    #[error("BitSet is full")]
    Full,
}
