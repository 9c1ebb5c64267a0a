//! # Snippet Chains
//!
//! Operations on singly linked snippet chains. The functions only relink
//! nodes and sum sizes; they never allocate and never follow a missing node.

use crate::snip::PktSize;

/// Storage that links nodes of a snippet chain.
pub trait SnipChain {
    type Node: Copy + Eq;

    /// Successor of `node`, if any.
    fn next(&self, node: Self::Node) -> Option<Self::Node>;

    fn set_next(&mut self, node: Self::Node, next: Option<Self::Node>);

    /// Size of the bytes `node` refers to.
    fn size(&self, node: Self::Node) -> PktSize;
}

/// Move `cursor` to its successor and return it.
///
/// A cursor at the end of the chain (or already `None`) ends up `None`.
pub fn advance<C: SnipChain + ?Sized>(chain: &C, cursor: &mut Option<C::Node>) -> Option<C::Node> {
    *cursor = cursor.and_then(|node| chain.next(node));
    *cursor
}

/// Total number of bytes in the chain starting at `head`.
///
/// The sum is computed in `usize`, so a chain longer than [`PktSize::MAX`]
/// reports its real length instead of wrapping.
pub fn length<C: SnipChain + ?Sized>(chain: &C, head: Option<C::Node>) -> usize {
    let mut total = 0usize;
    let mut cursor = head;
    while let Some(node) = cursor {
        total += usize::from(chain.size(node));
        advance(chain, &mut cursor);
    }
    total
}

/// Number of snippets in the chain starting at `head`.
pub fn count<C: SnipChain + ?Sized>(chain: &C, head: Option<C::Node>) -> usize {
    let mut n = 0;
    let mut cursor = head;
    while cursor.is_some() {
        n += 1;
        advance(chain, &mut cursor);
    }
    n
}

/// Splice `node` in directly after the head of the chain.
///
/// An empty chain becomes `node`. Whatever followed the head now follows `node`.
pub fn add<C: SnipChain + ?Sized>(chain: &mut C, head: &mut Option<C::Node>, node: C::Node) {
    match *head {
        None => *head = Some(node),
        Some(first) => {
            let rest = chain.next(first);
            chain.set_next(node, rest);
            chain.set_next(first, Some(node));
        }
    }
}

/// Unlink `node` from the chain, wherever it is.
///
/// The removed node is detached (its successor cleared). Nothing happens if
/// `node` is not part of the chain.
pub fn remove<C: SnipChain + ?Sized>(chain: &mut C, head: &mut Option<C::Node>, node: C::Node) {
    let Some(first) = *head else {
        return;
    };

    if first == node {
        *head = chain.next(node);
        chain.set_next(node, None);
        return;
    }

    let mut prev = first;
    while let Some(current) = chain.next(prev) {
        if current == node {
            let rest = chain.next(current);
            chain.set_next(prev, rest);
            chain.set_next(current, None);
            return;
        }
        prev = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Chain over plain vectors: node `i` has `next[i]` and `sizes[i]`.
    struct VecChain {
        next: Vec<Option<usize>>,
        sizes: Vec<PktSize>,
    }

    impl VecChain {
        fn new(sizes: &[PktSize]) -> Self {
            Self {
                next: vec![None; sizes.len()],
                sizes: sizes.to_vec(),
            }
        }
    }

    impl SnipChain for VecChain {
        type Node = usize;

        fn next(&self, node: usize) -> Option<usize> {
            self.next[node]
        }

        fn set_next(&mut self, node: usize, next: Option<usize>) {
            self.next[node] = next;
        }

        fn size(&self, node: usize) -> PktSize {
            self.sizes[node]
        }
    }

    fn collect(chain: &VecChain, head: Option<usize>) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cursor = head;
        while let Some(node) = cursor {
            out.push(node);
            advance(chain, &mut cursor);
        }
        out
    }

    #[test]
    fn advance_stops_at_end() {
        let mut chain = VecChain::new(&[1, 2]);
        chain.set_next(0, Some(1));
        let mut cursor = Some(0);
        assert_eq!(advance(&chain, &mut cursor), Some(1));
        assert_eq!(advance(&chain, &mut cursor), None);
        assert_eq!(advance(&chain, &mut cursor), None);
        assert_eq!(cursor, None);
    }

    #[test]
    fn add_to_empty_chain_sets_head() {
        let mut chain = VecChain::new(&[4]);
        let mut head = None;
        add(&mut chain, &mut head, 0);
        assert_eq!(head, Some(0));
        assert_eq!(count(&chain, head), 1);
    }

    #[test]
    fn add_splices_after_head() {
        let mut chain = VecChain::new(&[1, 2, 3]);
        let mut head = None;
        add(&mut chain, &mut head, 0);
        add(&mut chain, &mut head, 1);
        add(&mut chain, &mut head, 2);
        assert_eq!(collect(&chain, head), vec![0, 2, 1]);
        assert_eq!(length(&chain, head), 6);
    }

    #[test]
    fn remove_head_middle_and_missing() {
        let mut chain = VecChain::new(&[1, 2, 3, 4]);
        chain.set_next(0, Some(1));
        chain.set_next(1, Some(2));
        let mut head = Some(0);

        remove(&mut chain, &mut head, 1);
        assert_eq!(collect(&chain, head), vec![0, 2]);
        assert_eq!(chain.next(1), None);

        remove(&mut chain, &mut head, 3);
        assert_eq!(collect(&chain, head), vec![0, 2]);

        remove(&mut chain, &mut head, 0);
        assert_eq!(head, Some(2));
        assert_eq!(chain.next(0), None);

        remove(&mut chain, &mut head, 2);
        assert_eq!(head, None);
        remove(&mut chain, &mut head, 2);
        assert_eq!(head, None);
    }

    #[test]
    fn length_does_not_wrap() {
        let mut chain = VecChain::new(&[PktSize::MAX, PktSize::MAX, 2]);
        chain.set_next(0, Some(1));
        chain.set_next(1, Some(2));
        assert_eq!(length(&chain, Some(0)), 2 * 65_535 + 2);
        assert_eq!(length(&chain, None), 0);
        assert_eq!(count(&chain, Some(0)), 3);
    }
}
