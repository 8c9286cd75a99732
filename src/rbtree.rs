// Axel '0vercl0k' Souchet - October 16 2026
//! Walk a kernel red-black tree (`struct rb_root`) without knowing anything
//! about the type of its entries.
//!
//! The `rb_node`s are embedded inside the structures the tree indexes, so the
//! walker only deals with addresses: it follows `rb_left` / `rb_right` through
//! the memory image and hands the visitor the address of the containing
//! structure, recovered by subtracting the offset of the embedded node (the
//! `container_of` / `rb_entry` dance).
//!
//! # Examples
//!
//! ```no_run
//! # use std::ops::ControlFlow;
//! # use ramdump_walker::{Kva, MemberCache, RbTree, Resolver, Snapshot};
//! # fn main() -> ramdump_walker::Result<()> {
//! # let host = Snapshot::default();
//! # let cache = MemberCache::default();
//! let resolver = Resolver::new(&host, &cache);
//! let node_offset = resolver.member_offset("ion_client", "node")?;
//! let tree = RbTree::new(&resolver, Kva::new(0xffffff80_08001000), node_offset)?;
//! let mut clients = Vec::new();
//! tree.walk(resolver.reader(), &mut |client: Kva| -> ramdump_walker::Result<ControlFlow<()>> {
//!     clients.push(client);
//!     Ok(ControlFlow::Continue(()))
//! })?;
//! # Ok(())
//! # }
//! ```
use std::ops::ControlFlow;

use log::{debug, warn};

use crate::error::{PageReadError, Result, WalkerError};
use crate::host::{DumpHost, MemoryImage};
use crate::layout::Resolver;
use crate::virt::Reader;
use crate::Kva;

/// Upper bound on the number of nodes a single walk looks at. A corrupted
/// tree can have a cycle in it; this makes sure we eventually stop.
pub const DEFAULT_MAX_NODES: usize = 1 << 20;

/// Callbacks invoked while walking a tree.
pub trait NodeVisitor {
    /// Called once per entry, with the address of the structure the node is
    /// embedded in.
    fn visit(&mut self, owner: Kva) -> Result<ControlFlow<()>>;

    /// Called when the node at `node` couldn't be read; the subtree under it
    /// is skipped.
    fn invalid(&mut self, _node: Kva, _reason: &WalkerError) -> Result<ControlFlow<()>> {
        Ok(ControlFlow::Continue(()))
    }
}

impl<F> NodeVisitor for F
where
    F: FnMut(Kva) -> Result<ControlFlow<()>>,
{
    fn visit(&mut self, owner: Kva) -> Result<ControlFlow<()>> {
        self(owner)
    }
}

/// What happened during a walk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkSummary {
    /// Number of entries handed to [`NodeVisitor::visit`].
    pub visited: usize,
    /// Number of nodes that couldn't be read (their subtrees are skipped).
    pub pruned: usize,
    /// The visitor asked to stop.
    pub stopped: bool,
    /// The walk gave up after reaching the node limit.
    pub truncated: bool,
}

/// Offsets of the `rb_root` / `rb_node` members for the analyzed kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RbLayout {
    pub root_node: u64,
    pub left: u64,
    pub right: u64,
}

impl RbLayout {
    pub fn resolve<H: DumpHost + ?Sized>(resolver: &Resolver<'_, H>) -> Result<Self> {
        Ok(Self {
            root_node: resolver.member_offset("rb_root", "rb_node")?,
            left: resolver.member_offset("rb_node", "rb_left")?,
            right: resolver.member_offset("rb_node", "rb_right")?,
        })
    }
}

/// The children of a node we managed to read.
struct Children {
    left: Kva,
    right: Kva,
}

/// A tree rooted at an `rb_root`, whose nodes are embedded `node_offset` bytes
/// into their owning structures.
#[derive(Debug, Clone, Copy)]
pub struct RbTree {
    root: Kva,
    node_offset: u64,
    layout: RbLayout,
    max_nodes: usize,
}

impl RbTree {
    /// `root` is the address of the `struct rb_root`.
    pub fn new<H: DumpHost + ?Sized>(
        resolver: &Resolver<'_, H>,
        root: Kva,
        node_offset: u64,
    ) -> Result<Self> {
        Ok(Self::with_layout(RbLayout::resolve(resolver)?, root, node_offset))
    }

    #[must_use]
    pub fn with_layout(layout: RbLayout, root: Kva, node_offset: u64) -> Self {
        Self {
            root,
            node_offset,
            layout,
            max_nodes: DEFAULT_MAX_NODES,
        }
    }

    #[must_use]
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    #[must_use]
    pub fn root(&self) -> Kva {
        self.root
    }

    fn read_children<H: MemoryImage + ?Sized>(
        &self,
        reader: Reader<'_, H>,
        node: Kva,
    ) -> Result<Children> {
        let left = node.field(self.layout.left)?;
        let right = node.field(self.layout.right)?;

        Ok(Children {
            left: reader.read_ptr(left)?,
            right: reader.read_ptr(right)?,
        })
    }

    /// Visit every entry of the tree in order. Nodes that can't be read are
    /// reported to [`NodeVisitor::invalid`] and their subtrees are skipped;
    /// only errors returned by the visitor stop the walk early.
    pub fn walk<H, V>(&self, reader: Reader<'_, H>, visitor: &mut V) -> Result<WalkSummary>
    where
        H: MemoryImage + ?Sized,
        V: NodeVisitor + ?Sized,
    {
        let mut summary = WalkSummary::default();
        // An unreadable root is the same as an empty tree as far as the
        // visitor is concerned, but it is still worth a diagnostic.
        let root_node = self
            .root
            .field(self.layout.root_node)
            .map_err(WalkerError::from)
            .and_then(|root_node| reader.read_ptr(root_node));
        let mut current = match root_node {
            Ok(node) => node,
            Err(e) if e.is_memory_fault() => {
                summary.pruned += 1;
                warn!("cannot read the rb_root at {:#x}: {e}", self.root);
                summary.stopped = visitor.invalid(self.root, &e)?.is_break();
                return Ok(summary);
            }
            Err(e) => return Err(e),
        };

        // Nodes whose left subtree has been pushed, with their right child.
        let mut stack: Vec<(Kva, Kva)> = Vec::new();
        let mut seen = 0usize;
        loop {
            // Go down the left spine of the current subtree.
            while !current.is_null() {
                seen += 1;
                if seen > self.max_nodes {
                    warn!(
                        "the tree at {:#x} has more than {} nodes, giving up",
                        self.root, self.max_nodes
                    );
                    summary.truncated = true;
                    return Ok(summary);
                }

                match self.read_children(reader, current) {
                    Ok(children) => {
                        stack.push((current, children.right));
                        current = children.left;
                    }
                    Err(e) if e.is_memory_fault() => {
                        summary.pruned += 1;
                        warn!("skipping the rb_node at {current:#x}: {e}");
                        if visitor.invalid(current, &e)?.is_break() {
                            summary.stopped = true;
                            return Ok(summary);
                        }

                        current = Kva::NULL;
                    }
                    Err(e) => return Err(e),
                }
            }

            let Some((node, right)) = stack.pop() else {
                break;
            };

            let flow = match node.checked_sub(self.node_offset) {
                Some(owner) => {
                    summary.visited += 1;
                    visitor.visit(owner)?
                }
                None => {
                    // The node can't be embedded in anything.
                    summary.pruned += 1;
                    let e = WalkerError::PageRead(PageReadError::AddressWrap {
                        kva: node,
                        offset: self.node_offset.wrapping_neg(),
                    });
                    warn!("skipping the rb_node at {node:#x}: {e}");
                    visitor.invalid(node, &e)?
                }
            };

            if flow.is_break() {
                summary.stopped = true;
                return Ok(summary);
            }

            current = right;
        }

        debug!(
            "walked the tree at {:#x}: {} entries, {} pruned",
            self.root, summary.visited, summary.pruned
        );

        Ok(summary)
    }

    /// Collect the addresses of all the entries of the tree.
    pub fn owners<H: MemoryImage + ?Sized>(&self, reader: Reader<'_, H>) -> Result<Vec<Kva>> {
        let mut owners = Vec::new();
        self.walk(reader, &mut |owner: Kva| -> Result<ControlFlow<()>> {
            owners.push(owner);
            Ok(ControlFlow::Continue(()))
        })?;

        Ok(owners)
    }
}
