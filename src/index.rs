//! # Index Module
//!
//! An inverted index from words to the values (document keys) that contain them,
//! built as a character trie.
//!
//! ## Key Concepts
//! - **Node**: one per character position, with a fixed-width table of child links
//!   indexed by ASCII code and the list of values whose word ends at the node.
//! - **Exact match**: the values stored at the node reached by following a word.
//! - **Prefix match**: every value stored at or below the node reached by a prefix.
//! - **Pruning**: a node left with no values and no children is unlinked from its
//!   parent as soon as a deletion empties it, all the way up to the root.
//!
//! Lookups are case-sensitive. Words containing characters outside ASCII can never
//! be indexed, so they match nothing.
//!
//! The bulk deletes clear whole words or prefixes at once. A document store
//! instead unlinks one key from each of its words, since a key listed under a
//! word may still be reachable through others.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::hash::Hash;

/// Number of child links per node
pub const ALPHABET_SIZE: usize = 128;

type Link<V> = Option<Box<Node<V>>>;

#[derive(Debug)]
struct Node<V> {
    links: [Link<V>; ALPHABET_SIZE],
    values: Vec<V>,
}

impl<V> Node<V> {
    fn new() -> Self {
        Self {
            links: std::array::from_fn(|_| None),
            values: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty() && self.links.iter().all(Option::is_none)
    }
}

/// A trie mapping words to sets of values
#[derive(Debug)]
pub struct Trie<V> {
    root: Link<V>,
}

impl<V> Default for Trie<V> {
    fn default() -> Self {
        Self { root: None }
    }
}

impl<V> Trie<V>
where
    V: Clone + Eq + Hash,
{
    /// Creates an empty trie
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the trie holds no associations
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Associates `value` with `word`
    ///
    /// Returns `false` if the association already existed or the word contains a
    /// character outside the ASCII range.
    ///
    /// # Examples
    /// ```
    /// use docstore::index::Trie;
    ///
    /// let mut trie = Trie::new();
    /// assert!(trie.put("cat", 1));
    /// assert!(!trie.put("cat", 1));
    /// assert_eq!(trie.exact_match("cat"), vec![1]);
    /// ```
    pub fn put(&mut self, word: &str, value: V) -> bool {
        let Some(path) = path_of(word) else {
            log::debug!("not indexing non-ASCII word {:?}", word);
            return false;
        };

        let mut node = self.root.get_or_insert_with(|| Box::new(Node::new()));
        for c in path {
            node = node.links[c].get_or_insert_with(|| Box::new(Node::new()));
        }

        if node.values.contains(&value) {
            return false;
        }
        node.values.push(value);
        true
    }

    /// Values associated with exactly `word`, in insertion order
    pub fn exact_match(&self, word: &str) -> Vec<V> {
        self.find(word)
            .map(|node| node.values.clone())
            .unwrap_or_default()
    }

    /// Values associated with exactly `word`, sorted with `compare`
    ///
    /// The sort is stable: values the comparator considers equal keep their
    /// insertion order.
    pub fn exact_match_sorted<F>(&self, word: &str, compare: F) -> Vec<V>
    where
        F: FnMut(&V, &V) -> Ordering,
    {
        let mut values = self.exact_match(word);
        values.sort_by(compare);
        values
    }

    /// Distinct values associated with any word starting with `prefix`
    ///
    /// Values are returned in depth-first order of the words they were found under.
    pub fn prefix_match(&self, prefix: &str) -> Vec<V> {
        let mut values = Vec::new();
        if let Some(node) = self.find(prefix) {
            collect_values(node, &mut HashSet::new(), &mut values);
        }
        values
    }

    /// Distinct values associated with any word starting with `prefix`, sorted
    /// stably with `compare`
    pub fn prefix_match_sorted<F>(&self, prefix: &str, compare: F) -> Vec<V>
    where
        F: FnMut(&V, &V) -> Ordering,
    {
        let mut values = self.prefix_match(prefix);
        values.sort_by(compare);
        values
    }

    /// Removes the association between `word` and `value`
    ///
    /// Returns the removed value, or `None` if the association did not exist.
    pub fn delete(&mut self, word: &str, value: &V) -> Option<V> {
        let path = path_of(word)?;
        edit_and_prune(&mut self.root, &path, |node| {
            let pos = node.values.iter().position(|v| v == value)?;
            Some(node.values.remove(pos))
        })
        .flatten()
    }

    /// Removes every value associated with exactly `word`
    ///
    /// Values stored under longer words sharing the prefix are untouched.
    pub fn delete_all(&mut self, word: &str) -> Vec<V> {
        let Some(path) = path_of(word) else {
            return Vec::new();
        };
        edit_and_prune(&mut self.root, &path, |node| std::mem::take(&mut node.values))
            .unwrap_or_default()
    }

    /// Removes every word starting with `prefix`, returning the distinct values
    /// that were associated with them
    pub fn delete_all_with_prefix(&mut self, prefix: &str) -> Vec<V> {
        let Some(path) = path_of(prefix) else {
            return Vec::new();
        };
        edit_and_prune(&mut self.root, &path, |node| {
            let mut values = Vec::new();
            collect_values(node, &mut HashSet::new(), &mut values);
            *node = Node::new();
            values
        })
        .unwrap_or_default()
    }

    fn find(&self, word: &str) -> Option<&Node<V>> {
        let path = path_of(word)?;
        let mut node = self.root.as_deref()?;
        for c in path {
            node = node.links[c].as_deref()?;
        }
        Some(node)
    }
}

/// Maps a word to its sequence of link indices, or `None` if it leaves the alphabet
fn path_of(word: &str) -> Option<Vec<usize>> {
    word.chars()
        .map(|c| c.is_ascii().then_some(c as usize))
        .collect()
}

/// Follows `path` from `link`, applies `edit` to the node found there, then prunes
/// every node on the way back up that the edit left empty
///
/// Returns `None` if the path does not exist.
fn edit_and_prune<V, R>(
    link: &mut Link<V>,
    path: &[usize],
    edit: impl FnOnce(&mut Node<V>) -> R,
) -> Option<R> {
    let node = link.as_mut()?;
    let result = match path.split_first() {
        None => edit(&mut **node),
        Some((&c, rest)) => edit_and_prune(&mut node.links[c], rest, edit)?,
    };

    if node.is_empty() {
        *link = None;
    }
    Some(result)
}

fn collect_values<V: Clone + Eq + Hash>(node: &Node<V>, seen: &mut HashSet<V>, out: &mut Vec<V>) {
    for value in &node.values {
        if seen.insert(value.clone()) {
            out.push(value.clone());
        }
    }
    for child in node.links.iter().flatten() {
        collect_values(child, seen, out);
    }
}

#[cfg(test)]
impl<V> Trie<V> {
    /// Number of nodes with neither values nor children
    fn empty_nodes(&self) -> usize {
        fn count<V>(node: &Node<V>) -> usize {
            let own = usize::from(node.is_empty());
            own + node.links.iter().flatten().map(|child| count(child)).sum::<usize>()
        }
        self.root.as_deref().map_or(0, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trie_with(entries: &[(&str, u32)]) -> Trie<u32> {
        let mut trie = Trie::new();
        for (word, value) in entries {
            trie.put(word, *value);
        }
        trie
    }

    #[test]
    fn test_exact_match_is_case_sensitive() {
        let trie = trie_with(&[("Hello", 1), ("hello", 2)]);

        assert_eq!(trie.exact_match("Hello"), vec![1]);
        assert_eq!(trie.exact_match("hello"), vec![2]);
        assert!(trie.exact_match("HELLO").is_empty());
        assert!(trie.exact_match("hell").is_empty());
    }

    #[test]
    fn test_put_is_idempotent() {
        let mut trie = trie_with(&[("cat", 1)]);

        assert!(!trie.put("cat", 1));
        assert_eq!(trie.exact_match("cat"), vec![1]);
    }

    #[test]
    fn test_prefix_match_unions_subtree() {
        let trie = trie_with(&[("too", 1), ("tool", 2), ("tooth", 1), ("toad", 3), ("tea", 4)]);

        let mut values = trie.prefix_match("too");
        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);

        let mut values = trie.prefix_match("t");
        values.sort_unstable();
        assert_eq!(values, vec![1, 2, 3, 4]);

        assert!(trie.prefix_match("x").is_empty());
    }

    #[test]
    fn test_sorted_match_is_stable() {
        let trie = trie_with(&[("w", 5), ("w", 3), ("w", 9), ("w", 1)]);

        // Every value compares equal, so insertion order is kept
        assert_eq!(trie.exact_match_sorted("w", |_, _| Ordering::Equal), vec![5, 3, 9, 1]);
        assert_eq!(trie.exact_match_sorted("w", |a, b| b.cmp(a)), vec![9, 5, 3, 1]);
        assert_eq!(trie.prefix_match_sorted("", |a, b| a.cmp(b)), vec![1, 3, 5, 9]);
    }

    #[test]
    fn test_delete_one_prunes() {
        let mut trie = trie_with(&[("cat", 1), ("cat", 2), ("catalog", 1)]);

        assert_eq!(trie.delete("cat", &1), Some(1));
        assert_eq!(trie.exact_match("cat"), vec![2]);
        assert_eq!(trie.delete("cat", &1), None);
        assert_eq!(trie.delete("dog", &1), None);

        assert_eq!(trie.delete("catalog", &1), Some(1));
        assert_eq!(trie.empty_nodes(), 0);
        assert!(trie.prefix_match("cata").is_empty());

        assert_eq!(trie.delete("cat", &2), Some(2));
        assert!(trie.is_empty());
    }

    #[test]
    fn test_delete_all_leaves_longer_words() {
        let mut trie = trie_with(&[("to", 1), ("to", 2), ("tool", 3)]);

        let mut removed = trie.delete_all("to");
        removed.sort_unstable();
        assert_eq!(removed, vec![1, 2]);
        assert!(trie.exact_match("to").is_empty());
        assert_eq!(trie.exact_match("tool"), vec![3]);
        assert_eq!(trie.empty_nodes(), 0);

        assert!(trie.delete_all("missing").is_empty());
    }

    #[test]
    fn test_delete_all_with_prefix() {
        let mut trie = trie_with(&[("too", 1), ("tool", 2), ("tooth", 3), ("tea", 4), ("to", 5)]);

        let mut removed = trie.delete_all_with_prefix("too");
        removed.sort_unstable();
        assert_eq!(removed, vec![1, 2, 3]);

        assert!(trie.prefix_match("too").is_empty());
        assert_eq!(trie.exact_match("to"), vec![5]);
        assert_eq!(trie.exact_match("tea"), vec![4]);
        assert_eq!(trie.empty_nodes(), 0);

        let mut removed = trie.delete_all_with_prefix("");
        removed.sort_unstable();
        assert_eq!(removed, vec![4, 5]);
        assert!(trie.is_empty());
    }

    #[test]
    fn test_non_ascii_words_match_nothing() {
        let mut trie = trie_with(&[("cafe", 1)]);

        assert!(!trie.put("café", 2));
        assert!(trie.exact_match("café").is_empty());
        assert!(trie.prefix_match("caf\u{e9}").is_empty());
        assert!(trie.delete_all("café").is_empty());
        assert_eq!(trie.exact_match("cafe"), vec![1]);
    }
}
