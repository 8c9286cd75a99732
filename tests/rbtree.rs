// Axel '0vercl0k' Souchet - October 16 2026
mod common;

use std::ops::ControlFlow;

use common::{at, kva, rb_layout, write_tree, RB_LEFT, RB_RIGHT};
use ramdump_walker::{
    Kva, MemberCache, NodeVisitor, RbTree, Resolver, Result, Snapshot, WalkSummary, WalkerError,
};

/// Offset of the `rb_node` inside the entries of the test trees.
const NODE_OFFSET: u64 = 0x28;

/// Where the tree's `rb_root` lives.
fn root() -> Kva {
    kva(0x10)
}

/// `count` entries, one per page, with their tree linked in `rb_root`.
fn tree_snapshot(count: u64) -> (Snapshot, Vec<Kva>) {
    let mut snapshot = Snapshot::new();
    rb_layout(&mut snapshot);
    let owners = (0..count)
        .map(|i| kva(0x1000 * (i + 1)))
        .collect::<Vec<_>>();
    let nodes = owners
        .iter()
        .map(|o| at(*o, NODE_OFFSET))
        .collect::<Vec<_>>();
    write_tree(&mut snapshot, root(), &nodes);

    (snapshot, owners)
}

/// Records everything the walker tells it.
#[derive(Default)]
struct Recorder {
    visited: Vec<Kva>,
    invalid: Vec<Kva>,
    stop_after: Option<usize>,
}

impl NodeVisitor for Recorder {
    fn visit(&mut self, owner: Kva) -> Result<ControlFlow<()>> {
        self.visited.push(owner);
        if self.stop_after == Some(self.visited.len()) {
            return Ok(ControlFlow::Break(()));
        }

        Ok(ControlFlow::Continue(()))
    }

    fn invalid(&mut self, node: Kva, reason: &WalkerError) -> Result<ControlFlow<()>> {
        assert!(reason.is_memory_fault());
        self.invalid.push(node);

        Ok(ControlFlow::Continue(()))
    }
}

fn walk(snapshot: &Snapshot, visitor: &mut Recorder) -> WalkSummary {
    let cache = MemberCache::default();
    let resolver = Resolver::new(snapshot, &cache);
    let tree = RbTree::new(&resolver, root(), NODE_OFFSET).unwrap();

    tree.walk(resolver.reader(), visitor).unwrap()
}

#[test]
fn empty_tree() {
    let (snapshot, _) = tree_snapshot(0);
    let mut visitor = Recorder::default();
    let summary = walk(&snapshot, &mut visitor);
    assert_eq!(summary, WalkSummary::default());
    assert!(visitor.visited.is_empty());
    assert!(visitor.invalid.is_empty());
}

#[test]
fn in_order() {
    for count in [1, 2, 3, 7, 100] {
        let (snapshot, owners) = tree_snapshot(count);
        let mut visitor = Recorder::default();
        let summary = walk(&snapshot, &mut visitor);
        assert_eq!(visitor.visited, owners);
        assert_eq!(summary.visited, owners.len());
        assert_eq!(summary.pruned, 0);
        assert!(!summary.stopped);
        assert!(!summary.truncated);
    }
}

#[test]
fn owners() {
    let (snapshot, owners) = tree_snapshot(5);
    let cache = MemberCache::default();
    let resolver = Resolver::new(&snapshot, &cache);
    let tree = RbTree::new(&resolver, root(), NODE_OFFSET).unwrap();
    assert_eq!(tree.owners(resolver.reader()).unwrap(), owners);
}

#[test]
fn faulting_subtree_is_pruned() {
    // 7 entries: 3 is on top, 1 and 5 below it, 0 / 2 / 4 / 6 are leaves.
    let (mut snapshot, owners) = tree_snapshot(7);
    snapshot.unmap_page(owners[1]);

    let mut visitor = Recorder::default();
    let summary = walk(&snapshot, &mut visitor);
    assert_eq!(visitor.visited, &owners[3..]);
    assert_eq!(visitor.invalid, [at(owners[1], NODE_OFFSET)]);
    assert_eq!(summary.visited, 4);
    assert_eq!(summary.pruned, 1);

    // A missing leaf only costs the leaf.
    let (mut snapshot, owners) = tree_snapshot(7);
    snapshot.unmap_page(owners[6]);
    let mut visitor = Recorder::default();
    walk(&snapshot, &mut visitor);
    assert_eq!(visitor.visited, &owners[..6]);
    assert_eq!(visitor.invalid, [at(owners[6], NODE_OFFSET)]);
}

#[test]
fn child_pointing_outside_the_kernel() {
    let (mut snapshot, owners) = tree_snapshot(3);
    // owners[0] is the left child of owners[1].
    let bogus = Kva::new(0x4141_4141);
    snapshot.write_ptr(at(at(owners[1], NODE_OFFSET), RB_LEFT), bogus);

    let mut visitor = Recorder::default();
    let summary = walk(&snapshot, &mut visitor);
    assert_eq!(visitor.visited, &owners[1..]);
    assert_eq!(visitor.invalid, [bogus]);
    assert_eq!(summary.pruned, 1);
}

#[test]
fn child_wrapping_around_the_address_space() {
    // Reading the children of those would go past the top of the address
    // space.
    for bogus in [Kva::new(u64::MAX - 4), Kva::new(u64::MAX - RB_LEFT + 1)] {
        let (mut snapshot, owners) = tree_snapshot(3);
        snapshot.write_ptr(at(at(owners[1], NODE_OFFSET), RB_LEFT), bogus);

        let mut visitor = Recorder::default();
        let summary = walk(&snapshot, &mut visitor);
        assert_eq!(visitor.visited, &owners[1..]);
        assert_eq!(visitor.invalid, [bogus]);
        assert_eq!(summary.visited, 2);
        assert_eq!(summary.pruned, 1);
    }
}

#[test]
fn node_below_its_container_offset() {
    // Low addresses are mapped here, so the node reads fine but it can't be
    // embedded `NODE_OFFSET` bytes into anything.
    let mut snapshot = Snapshot::new().with_kva_start(0);
    rb_layout(&mut snapshot);
    let root = Kva::new(0x2000);
    let owner = Kva::new(0x3000);
    let top = at(owner, NODE_OFFSET);
    let low = Kva::new(0x8);
    snapshot
        .map_page(low)
        .write_ptr(root, top)
        .write_ptr(at(top, RB_LEFT), low)
        .write_ptr(at(top, RB_RIGHT), Kva::NULL);

    let cache = MemberCache::default();
    let resolver = Resolver::new(&snapshot, &cache);
    let tree = RbTree::new(&resolver, root, NODE_OFFSET).unwrap();
    let mut visitor = Recorder::default();
    let summary = tree.walk(resolver.reader(), &mut visitor).unwrap();
    assert_eq!(visitor.visited, [owner]);
    assert_eq!(visitor.invalid, [low]);
    assert_eq!(summary.visited, 1);
    assert_eq!(summary.pruned, 1);
}

#[test]
fn unreadable_root() {
    let (mut snapshot, _) = tree_snapshot(3);
    snapshot.unmap_page(root());

    let mut visitor = Recorder::default();
    let summary = walk(&snapshot, &mut visitor);
    assert!(visitor.visited.is_empty());
    assert_eq!(visitor.invalid, [root()]);
    assert_eq!(summary.pruned, 1);
}

#[test]
fn visitor_stops_the_walk() {
    let (snapshot, owners) = tree_snapshot(7);
    let mut visitor = Recorder {
        stop_after: Some(2),
        ..Default::default()
    };

    let summary = walk(&snapshot, &mut visitor);
    assert_eq!(visitor.visited, &owners[..2]);
    assert!(summary.stopped);
    assert_eq!(summary.visited, 2);
}

#[test]
fn visitor_errors_bubble_up() {
    let (snapshot, _) = tree_snapshot(3);
    let cache = MemberCache::default();
    let resolver = Resolver::new(&snapshot, &cache);
    let tree = RbTree::new(&resolver, root(), NODE_OFFSET).unwrap();
    let mut seen = 0;
    let r = tree.walk(resolver.reader(), &mut |_: Kva| -> Result<ControlFlow<()>> {
        seen += 1;
        Err(WalkerError::InvalidData("nope"))
    });

    assert!(matches!(r, Err(WalkerError::InvalidData("nope"))));
    assert_eq!(seen, 1);
}

#[test]
fn cycles_are_cut_short() {
    let (mut snapshot, owners) = tree_snapshot(1);
    let node = at(owners[0], NODE_OFFSET);
    // The only node is its own left child.
    snapshot.write_ptr(at(node, RB_LEFT), node);

    let cache = MemberCache::default();
    let resolver = Resolver::new(&snapshot, &cache);
    let tree = RbTree::new(&resolver, root(), NODE_OFFSET)
        .unwrap()
        .with_max_nodes(64);
    let mut visitor = Recorder::default();
    let summary = tree.walk(resolver.reader(), &mut visitor).unwrap();
    assert!(summary.truncated);
    assert!(visitor.visited.is_empty());
}

#[test]
fn missing_layout_is_fatal() {
    let snapshot = Snapshot::new();
    let cache = MemberCache::default();
    let resolver = Resolver::new(&snapshot, &cache);
    let r = RbTree::new(&resolver, root(), NODE_OFFSET);
    assert!(matches!(
        r,
        Err(WalkerError::UnknownMember { ref struct_name, ref member })
            if struct_name == "rb_root" && member == "rb_node"
    ));
}
