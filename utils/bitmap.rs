//! CPU set bitmap and kernel affinity-mask codec
//!
//! A [`CpuSet`] is a fixed array of 32-bit words covering `CPU_SET_MAX`
//! logical CPUs. Its hex rendering is the format the kernel uses in
//! `/proc/irq/<n>/smp_affinity`: 32-bit words, most significant first,
//! separated by commas, every word but the leading one zero-padded to
//! eight digits.

use std::fmt::{self, Write};

/// Upper bound (exclusive) on CPU ids, matching glibc's `CPU_SETSIZE`
pub const CPU_SET_MAX: usize = 1024;

/// Bits per mask word
pub const WORD_BITS: usize = 32;

/// Number of 32-bit words in a mask
pub const MASK_WORDS: usize = (CPU_SET_MAX + WORD_BITS - 1) / WORD_BITS;

/// Set of logical CPU ids
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuSet {
    words: [u32; MASK_WORDS],
}

impl CpuSet {
    /// Create an empty set
    pub const fn new() -> Self {
        Self {
            words: [0; MASK_WORDS],
        }
    }

    /// Add a CPU. Returns false when `cpu` is outside `[0, CPU_SET_MAX)`.
    pub fn set(&mut self, cpu: usize) -> bool {
        if cpu >= CPU_SET_MAX {
            return false;
        }
        self.words[cpu / WORD_BITS] |= 1 << (cpu % WORD_BITS);
        true
    }

    /// Remove a CPU
    pub fn clear(&mut self, cpu: usize) {
        if cpu < CPU_SET_MAX {
            self.words[cpu / WORD_BITS] &= !(1 << (cpu % WORD_BITS));
        }
    }

    /// Test if a CPU is in the set
    pub fn test(&self, cpu: usize) -> bool {
        if cpu >= CPU_SET_MAX {
            return false;
        }
        (self.words[cpu / WORD_BITS] >> (cpu % WORD_BITS)) & 1 == 1
    }

    /// Count the CPUs in the set
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Check if no CPU is set
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Index of the most significant non-zero word, 0 for an empty set
    pub fn highest_set_word(&self) -> usize {
        self.words.iter().rposition(|&w| w != 0).unwrap_or(0)
    }

    /// Raw mask words, least significant first
    pub fn words(&self) -> &[u32; MASK_WORDS] {
        &self.words
    }

    /// Union with another set
    pub fn union(&self, other: &CpuSet) -> CpuSet {
        let mut out = *self;
        for (word, other) in out.words.iter_mut().zip(other.words.iter()) {
            *word |= other;
        }
        out
    }

    /// Check whether the two sets share any CPU
    pub fn intersects(&self, other: &CpuSet) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Iterate over CPU ids in ascending order
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            set: self,
            word: 0,
            bits: self.words[0],
        }
    }

    /// Render in the kernel's `smp_affinity` format
    pub fn to_kernel_hex(&self) -> String {
        let top = self.highest_set_word();
        let mut out = String::with_capacity((top + 1) * 9);
        // Writing into a String cannot fail.
        let _ = write!(out, "{:x}", self.words[top]);
        for word in self.words[..top].iter().rev() {
            let _ = write!(out, ",{:08x}", word);
        }
        out
    }

    /// Render as a range list such as `0-7,16-23`
    pub fn to_cpu_list(&self) -> String {
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for cpu in self.iter() {
            match ranges.last_mut() {
                Some((_, end)) if *end + 1 == cpu => *end = cpu,
                _ => ranges.push((cpu, cpu)),
            }
        }
        ranges
            .iter()
            .map(|&(start, end)| {
                if start == end {
                    start.to_string()
                } else {
                    format!("{}-{}", start, end)
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for CpuSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_kernel_hex())
    }
}

impl fmt::Debug for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = CpuSet::new();
        for cpu in iter {
            set.set(cpu);
        }
        set
    }
}

/// Iterator over CPU ids in a set
pub struct Iter<'a> {
    set: &'a CpuSet,
    word: usize,
    bits: u32,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.bits != 0 {
                let bit = self.bits.trailing_zeros() as usize;
                self.bits &= self.bits - 1; // Clear the lowest set bit
                return Some(self.word * WORD_BITS + bit);
            }
            self.word += 1;
            if self.word >= MASK_WORDS {
                return None;
            }
            self.bits = self.set.words[self.word];
        }
    }
}

/// Encode a collection of CPU ids as a kernel affinity string
///
/// Ids at or above `CPU_SET_MAX` are ignored.
pub fn encode_mask(cpus: impl IntoIterator<Item = usize>) -> String {
    cpus.into_iter().collect::<CpuSet>().to_kernel_hex()
}

/// Compare two affinity strings the way the kernel would treat them
///
/// Case-insensitive. Surrounding whitespace and leading zero digits or
/// zero words are ignored: the kernel pads the leading word to the width
/// of `nr_cpu_ids`, while [`CpuSet::to_kernel_hex`] does not.
pub fn masks_equal(a: &str, b: &str) -> bool {
    fn canonical(mask: &str) -> String {
        mask.trim()
            .trim_start_matches(|c| c == '0' || c == ',')
            .to_ascii_lowercase()
    }
    canonical(a) == canonical(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    /// Parse a mask string with the kernel's word and bit convention
    fn decode(mask: &str) -> CpuSet {
        let mut set = CpuSet::new();
        for (index, word) in mask.rsplit(',').enumerate() {
            let word = u32::from_str_radix(word, 16).unwrap();
            for bit in 0..WORD_BITS {
                if word & (1 << bit) != 0 {
                    set.set(index * WORD_BITS + bit);
                }
            }
        }
        set
    }

    #[test]
    fn test_cpuset_basic() {
        let mut set = CpuSet::new();
        assert!(set.is_empty());
        assert_eq!(set.count(), 0);

        assert!(set.set(0));
        assert!(set.set(33));
        assert!(set.set(1023));
        assert!(!set.set(1024));

        assert_eq!(set.count(), 3);
        assert!(set.test(0));
        assert!(set.test(33));
        assert!(!set.test(1));
        assert!(!set.test(4096));
        assert_eq!(set.highest_set_word(), 31);

        set.clear(1023);
        assert_eq!(set.highest_set_word(), 1);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 33]);
    }

    #[test]
    fn test_empty_set_encodes_as_single_zero() {
        assert_eq!(CpuSet::new().to_kernel_hex(), "0");
        assert_eq!(encode_mask([]), "0");
        assert_eq!(CpuSet::new().highest_set_word(), 0);
    }

    #[test_case(&[0], "1" ; "first cpu")]
    #[test_case(&[0, 1, 2, 3, 4, 5, 6, 7], "ff" ; "first ccd of eight")]
    #[test_case(&[8, 9, 10, 11, 12, 13, 14, 15], "ff00" ; "second ccd of eight")]
    #[test_case(&[31], "80000000" ; "top bit of word zero")]
    #[test_case(&[32], "1,00000000" ; "first bit of word one")]
    #[test_case(&[0, 32], "1,00000001" ; "both words")]
    #[test_case(&[64], "1,00000000,00000000" ; "third word")]
    fn test_encode(cpus: &[usize], expected: &str) {
        assert_eq!(encode_mask(cpus.iter().copied()), expected);
    }

    #[test]
    fn test_non_leading_words_are_eight_digits() {
        let set: CpuSet = [4, 40, 70].into_iter().collect();
        let hex = set.to_kernel_hex();
        let words: Vec<&str> = hex.split(',').collect();
        assert_eq!(words.len(), 3);
        for word in &words[1..] {
            assert_eq!(word.len(), 8, "word {:?} of {:?}", word, hex);
        }
    }

    #[test]
    fn test_round_trip_through_kernel_decoding() {
        let sets: Vec<CpuSet> = vec![
            CpuSet::new(),
            [0].into_iter().collect(),
            (0..16).collect(),
            (8..16).chain(24..32).collect(),
            (0..64).step_by(3).collect(),
            [31, 32, 63, 64, 1023].into_iter().collect(),
            (0..CPU_SET_MAX).collect(),
        ];
        for set in sets {
            assert_eq!(decode(&set.to_kernel_hex()), set);
        }
    }

    #[test]
    fn test_union_and_intersects() {
        let cache: CpuSet = (0..8).collect();
        let freq: CpuSet = (8..16).collect();
        let all = cache.union(&freq);
        assert_eq!(all.count(), 16);
        assert_eq!(all.to_kernel_hex(), "ffff");
        assert!(!cache.intersects(&freq));
        assert!(all.intersects(&cache));
    }

    #[test]
    fn test_cpu_list() {
        let set: CpuSet = (0..8).chain(16..24).chain([30]).collect();
        assert_eq!(set.to_cpu_list(), "0-7,16-23,30");
        assert_eq!(CpuSet::new().to_cpu_list(), "");
    }

    #[test_case("ffff", "ffff", true ; "identical")]
    #[test_case("FFFF0000", "ffff0000", true ; "case insensitive")]
    #[test_case("0000ffff\n", "ffff", true ; "kernel pads leading word")]
    #[test_case("00000000,0000ffff", "ffff", true ; "kernel pads leading zero word")]
    #[test_case("00000000", "0", true ; "both empty")]
    #[test_case("ffff0000", "ffff", false ; "different cpus")]
    #[test_case("1,00000000", "1", false ; "different word")]
    fn test_masks_equal(a: &str, b: &str, expected: bool) {
        assert_eq!(masks_equal(a, b), expected);
    }
}
