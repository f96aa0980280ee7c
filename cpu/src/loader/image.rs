use std::collections::BTreeMap;

/// A sparse set of memory words to be loaded, keyed by (even) byte
/// address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeImage {
    words: BTreeMap<u16, u16>,
}

/// A run of words at consecutive addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub address: u16,
    pub words: Vec<u16>,
}

impl CodeImage {
    #[must_use]
    pub fn new() -> CodeImage {
        CodeImage::default()
    }

    pub fn put_word(&mut self, address: u16, value: u16) {
        self.words.insert(address & !1, value);
    }

    /// Store one byte.  The odd byte of a word is its high byte.
    pub fn put_byte(&mut self, address: u16, value: u8) {
        let word = self.words.entry(address & !1).or_insert(0);
        *word = if address & 1 != 0 {
            (u16::from(value) << 8) | (*word & 0x00ff)
        } else {
            (*word & 0xff00) | u16::from(value)
        };
    }

    #[must_use]
    pub fn get(&self, address: u16) -> Option<u16> {
        self.words.get(&(address & !1)).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.words.iter().map(|(a, w)| (*a, *w))
    }

    /// Split the image into runs of consecutive words, none longer
    /// than `max_words`.
    #[must_use]
    pub fn chunks(&self, max_words: usize) -> Vec<Chunk> {
        let max_words = max_words.max(1);
        let mut result: Vec<Chunk> = Vec::new();
        let mut next: Option<u32> = None;
        for (&address, &word) in self.words.iter() {
            let extend = next == Some(u32::from(address))
                && result
                    .last()
                    .is_some_and(|chunk| chunk.words.len() < max_words);
            match result.last_mut() {
                Some(chunk) if extend => chunk.words.push(word),
                _ => result.push(Chunk {
                    address,
                    words: vec![word],
                }),
            }
            next = Some(u32::from(address) + 2);
        }
        result
    }
}

#[test]
fn test_bytes_merge_into_words() {
    let mut image = CodeImage::new();
    image.put_byte(0o1000, 0o12);
    image.put_byte(0o1001, 0o34);
    image.put_byte(0o1003, 0o377);
    assert_eq!(image.get(0o1000), Some(0o34 << 8 | 0o12));
    assert_eq!(image.get(0o1002), Some(0o377 << 8));
    image.put_word(0o1001, 7);
    assert_eq!(image.get(0o1000), Some(7));
}

#[test]
fn test_chunks_split_on_gaps_and_size() {
    let mut image = CodeImage::new();
    for (i, address) in (0o1000u16..0o1012).step_by(2).enumerate() {
        image.put_word(address, i as u16);
    }
    image.put_word(0o2000, 0o777);
    let chunks = image.chunks(3);
    assert_eq!(
        chunks,
        vec![
            Chunk {
                address: 0o1000,
                words: vec![0, 1, 2]
            },
            Chunk {
                address: 0o1006,
                words: vec![3, 4]
            },
            Chunk {
                address: 0o2000,
                words: vec![0o777]
            },
        ]
    );
    assert!(CodeImage::new().chunks(256).is_empty());
}
