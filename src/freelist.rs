use std::ptr::NonNull;

use crate::{
    block::Block,
    classes::{class_of, CLASS_COUNT},
    Pointer,
};

/// Node of a circular doubly linked free list. Nodes are never allocated
/// separately (WE ARE THE ALLOCATOR!), they are written straight into the
/// payload of free blocks, which is guaranteed to have room for them by
/// [`crate::block::MIN_BLOCK_SIZE`]:
///
/// ```text
/// +--------------------+
/// |       header       |
/// +--------------------+ <--- node address = payload address
/// | next free block    |
/// +--------------------+
/// | prev free block    |
/// +--------------------+
/// |   leftover bytes   |
/// +--------------------+
/// |       footer       |
/// +--------------------+
/// ```
///
/// The links are plain [`NonNull`] instead of [`Pointer`] because in a
/// circular list there is no null: a node alone in its list points at itself
/// both ways.
pub(crate) struct FreeNode {
    pub next: NonNull<FreeNode>,
    pub prev: NonNull<FreeNode>,
}

/// The segregated free list registry: one circular doubly linked list per
/// size class. Each head is either empty or points at an arbitrary member of
/// the circle; insertion always makes the new node the head.
///
/// ```text
/// heads[0]  ->  32B   <->  32B   <->  32B   (circle closes back)
/// heads[1]  ->  48B   <->  48B
/// heads[2]  ->  (empty)
///   ...
/// heads[15] ->  1MB
/// ```
pub(crate) struct FreeLists {
    heads: [Pointer<FreeNode>; CLASS_COUNT],
}

impl FreeLists {
    /// All lists start empty. No allocations happen here, this is `const` so
    /// the allocator can live in a `static`.
    pub const fn new() -> Self {
        Self {
            heads: [None; CLASS_COUNT],
        }
    }

    /// Links `block` into the list of its size class, in O(1), becoming the
    /// new head.
    ///
    /// # Safety
    ///
    /// The block's header must already carry its final size and the free
    /// state, because the class is derived from the size and the node is
    /// written over the payload.
    pub unsafe fn insert(&mut self, block: Block) {
        debug_assert!(!block.tag().is_allocated());

        let node = block.free_node();
        let class = class_of(block.size());

        match self.heads[class] {
            // The only node in a circle points at itself both ways.
            None => node.as_ptr().write(FreeNode {
                next: node,
                prev: node,
            }),
            Some(mut head) => {
                let mut tail = head.as_ref().prev;
                node.as_ptr().write(FreeNode {
                    next: head,
                    prev: tail,
                });
                tail.as_mut().next = node;
                head.as_mut().prev = node;
            }
        }

        self.heads[class] = Some(node);
    }

    /// Unlinks `node` from the list of `class` in O(1). If the node was the
    /// head, a neighbor takes over; if it was alone, the head is cleared.
    ///
    /// # Safety
    ///
    /// `node` must be linked in exactly the list of `class`. Callers that
    /// are about to change a block's size must derive the class from the
    /// size *before* mutating it.
    pub unsafe fn remove(&mut self, node: NonNull<FreeNode>, class: usize) {
        debug_assert!(self.heads[class].is_some());

        if node.as_ref().next == node {
            debug_assert_eq!(self.heads[class], Some(node));
            self.heads[class] = None;
            return;
        }

        if self.heads[class] == Some(node) {
            self.heads[class] = Some(node.as_ref().next);
        }

        let mut prev = node.as_ref().prev;
        let mut next = node.as_ref().next;
        prev.as_mut().next = next;
        next.as_mut().prev = prev;
    }

    /// First fit search: starting at the class of `size` and moving up,
    /// walks each nonempty circle and takes the first block that can hold
    /// `size` bytes. The returned node is already unlinked.
    ///
    /// # Safety
    ///
    /// Every linked node must sit in a free block with a valid header, which
    /// this registry maintains by construction.
    pub unsafe fn take_fit(&mut self, size: usize) -> Pointer<FreeNode> {
        for class in class_of(size)..CLASS_COUNT {
            let Some(head) = self.heads[class] else {
                continue;
            };

            let mut node = head;
            loop {
                if Block::from_free_node(node).size() >= size {
                    self.remove(node, class);
                    return Some(node);
                }

                node = node.as_ref().next;
                if node == head {
                    break;
                }
            }
        }

        None
    }

    /// Calls `visit` for every node in the list of `class`. Deliberately
    /// allocation free so the consistency checker can run inside the global
    /// allocator without reentering it.
    #[cfg(any(debug_assertions, test))]
    pub unsafe fn for_each_node(&self, class: usize, mut visit: impl FnMut(NonNull<FreeNode>)) {
        let Some(head) = self.heads[class] else {
            return;
        };

        let mut node = head;
        loop {
            visit(node);
            node = node.as_ref().next;
            if node == head {
                break;
            }
        }
    }

    /// Whether `node` is linked in the list of `class`. Only the checker and
    /// tests care; real operations always know where a node is.
    #[cfg(any(debug_assertions, test))]
    pub unsafe fn contains(&self, node: NonNull<FreeNode>, class: usize) -> bool {
        let mut found = false;
        self.for_each_node(class, |candidate| found |= candidate == node);
        found
    }

    /// Number of nodes in the list of `class`.
    #[cfg(test)]
    pub unsafe fn len_of(&self, class: usize) -> usize {
        let mut len = 0;
        self.for_each_node(class, |_| len += 1);
        len
    }
}
