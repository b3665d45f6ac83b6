//! Prefix-indexed frequency table.

use std::collections::{BTreeMap, HashMap};

/// Match hash → occurrence count.
pub type Frequencies = HashMap<String, u32>;

#[derive(Debug, Default)]
struct Node {
    children: BTreeMap<u8, Node>,
    /// Present only on nodes that terminate a recorded query.
    frequencies: Option<Frequencies>,
}

/// Trie keyed by the UTF-8 bytes of each query string.
///
/// Walking down to a prefix costs its length, and enumerating below it costs
/// the size of that subtree, independent of how many other queries exist.
#[derive(Debug, Default)]
pub struct PrefixFrequencyIndex {
    root: Node,
    len: usize,
}

impl PrefixFrequencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct query strings.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds `count` occurrences of `hash` under `query`.
    ///
    /// A zero count is ignored so that stored counts are always positive.
    pub fn insert_or_merge(&mut self, query: &str, hash: &str, count: u32) {
        if count == 0 {
            return;
        }

        let Self { root, len } = self;
        let mut node = root;
        for byte in query.bytes() {
            node = node.children.entry(byte).or_default();
        }

        if node.frequencies.is_none() {
            *len += 1;
        }
        let frequencies = node.frequencies.get_or_insert_with(Frequencies::new);

        match frequencies.get_mut(hash) {
            Some(existing) => *existing = existing.saturating_add(count),
            None => {
                frequencies.insert(hash.to_owned(), count);
            }
        }
    }

    /// Frequencies recorded for exactly `query`.
    pub fn get(&self, query: &str) -> Option<&Frequencies> {
        self.find(query)?.frequencies.as_ref()
    }

    /// Sums the frequencies of every query starting with `prefix`.
    ///
    /// The empty prefix covers the whole index.
    pub fn prefix_search(&self, prefix: &str) -> Frequencies {
        let mut merged = Frequencies::new();
        let Some(start) = self.find(prefix) else {
            return merged;
        };

        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if let Some(frequencies) = &node.frequencies {
                for (hash, count) in frequencies {
                    let total = merged.entry(hash.clone()).or_insert(0);
                    *total = total.saturating_add(*count);
                }
            }
            stack.extend(node.children.values());
        }

        merged
    }

    /// Iterates `(query, frequencies)` for every query starting with `prefix`,
    /// in lexicographic byte order.
    pub fn prefix_range(&self, prefix: &str) -> PrefixRange<'_> {
        let stack = match self.find(prefix) {
            Some(node) => vec![(prefix.as_bytes().to_vec(), node)],
            None => Vec::new(),
        };
        PrefixRange { stack }
    }

    fn find(&self, prefix: &str) -> Option<&Node> {
        let mut node = &self.root;
        for byte in prefix.bytes() {
            node = node.children.get(&byte)?;
        }
        Some(node)
    }
}

/// Depth-first walk below a prefix node.
pub struct PrefixRange<'a> {
    stack: Vec<(Vec<u8>, &'a Node)>,
}

impl<'a> Iterator for PrefixRange<'a> {
    type Item = (String, &'a Frequencies);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((key, node)) = self.stack.pop() {
            // Push in reverse so the smallest child is visited first.
            for (byte, child) in node.children.iter().rev() {
                let mut child_key = key.clone();
                child_key.push(*byte);
                self.stack.push((child_key, child));
            }

            if let Some(frequencies) = &node.frequencies {
                // Keys that carry frequencies were inserted from `&str`, so the bytes are UTF-8.
                return Some((String::from_utf8_lossy(&key).into_owned(), frequencies));
            }
        }
        None
    }
}
