// Axel '0vercl0k' Souchet - October 16 2026
#![allow(dead_code)]
use ramdump_walker::{Kva, Snapshot};

/// Where the fixtures put their structures.
pub const KBASE: u64 = 0xffffff80_08000000;

pub const RB_RIGHT: u64 = 8;
pub const RB_LEFT: u64 = 16;

pub const HEAP_DEV: u64 = 0x0;
pub const HEAP_NAME: u64 = 0x18;
pub const HEAP_TOTAL_ALLOCATED: u64 = 0x40;
pub const HEAP_TOTAL_HANDLES: u64 = 0x44;
pub const DEVICE_CLIENTS: u64 = 0x40;
pub const CLIENT_NODE: u64 = 0x10;
pub const CLIENT_HANDLES: u64 = 0x30;
pub const CLIENT_NAME: u64 = 0x40;
pub const CLIENT_DISPLAY_NAME: u64 = 0x48;
pub const CLIENT_PID: u64 = 0x50;
pub const HANDLE_BUFFER: u64 = 0x10;
pub const HANDLE_NODE: u64 = 0x18;
pub const BUFFER_SIZE: u64 = 0x20;

pub fn kva(offset: u64) -> Kva {
    Kva::new(KBASE + offset)
}

pub fn at(base: Kva, offset: u64) -> Kva {
    Kva::new(base.u64() + offset)
}

pub fn rb_layout(snapshot: &mut Snapshot) {
    snapshot
        .add_member("rb_root", "rb_node", 0, Some(8))
        .add_member("rb_node", "__rb_parent_color", 0, Some(8))
        .add_member("rb_node", "rb_right", RB_RIGHT, Some(8))
        .add_member("rb_node", "rb_left", RB_LEFT, Some(8));
}

/// Link `nodes`, sorted, into a balanced tree and return the top node.
pub fn link_balanced(snapshot: &mut Snapshot, nodes: &[Kva]) -> Kva {
    if nodes.is_empty() {
        return Kva::NULL;
    }

    let mid = nodes.len() / 2;
    let node = nodes[mid];
    let left = link_balanced(snapshot, &nodes[..mid]);
    let right = link_balanced(snapshot, &nodes[mid + 1..]);
    snapshot
        .write_ptr(at(node, RB_LEFT), left)
        .write_ptr(at(node, RB_RIGHT), right);

    node
}

/// Store a balanced tree made of `nodes` in the `rb_root` at `root`.
pub fn write_tree(snapshot: &mut Snapshot, root: Kva, nodes: &[Kva]) {
    let top = link_balanced(snapshot, nodes);
    snapshot.write_ptr(root, top);
}

pub fn ion_layout(snapshot: &mut Snapshot) {
    rb_layout(snapshot);
    snapshot
        .add_member("atomic_t", "counter", 0, Some(4))
        .add_member("ion_heap", "dev", HEAP_DEV, Some(8))
        .add_member("ion_heap", "name", HEAP_NAME, Some(8))
        .add_member("ion_heap", "total_allocated", HEAP_TOTAL_ALLOCATED, Some(4))
        .add_member("ion_heap", "total_handles", HEAP_TOTAL_HANDLES, Some(4))
        .add_member("ion_device", "clients", DEVICE_CLIENTS, Some(8))
        .add_member("ion_client", "node", CLIENT_NODE, Some(24))
        .add_member("ion_client", "handles", CLIENT_HANDLES, Some(8))
        .add_member("ion_client", "name", CLIENT_NAME, Some(8))
        .add_member("ion_client", "display_name", CLIENT_DISPLAY_NAME, Some(8))
        .add_member("ion_client", "pid", CLIENT_PID, Some(4))
        .add_member("ion_handle", "buffer", HANDLE_BUFFER, Some(8))
        .add_member("ion_handle", "node", HANDLE_NODE, Some(24))
        .add_member("ion_buffer", "size", BUFFER_SIZE, Some(8));
}

pub struct ClientSpec {
    pub name: &'static str,
    pub pid: u32,
    pub buffers: Vec<u64>,
}

pub struct IonFixture {
    pub snapshot: Snapshot,
    pub heaps_array: Kva,
    pub heap: Kva,
    pub device: Kva,
    pub clients: Vec<Kva>,
    pub handles: Vec<Vec<Kva>>,
    pub buffers: Vec<Vec<Kva>>,
}

impl IonFixture {
    /// One `system` heap whose device has `clients`. Every client, handle and
    /// buffer sits in its own page so that tests can take them away.
    pub fn new(clients: &[ClientSpec]) -> Self {
        let mut snapshot = Snapshot::new();
        snapshot.set_cpu_count(4);
        ion_layout(&mut snapshot);

        let num_heaps = kva(0);
        let heaps = kva(8);
        let heaps_array = kva(0x100);
        let heap = kva(0x1_0000);
        let device = kva(0x2_0000);
        let total_allocated: u64 = clients.iter().flat_map(|c| c.buffers.iter()).sum();
        let total_handles = clients.iter().map(|c| c.buffers.len()).sum::<usize>();
        snapshot
            .add_symbol("num_heaps", num_heaps)
            .add_symbol("heaps", heaps)
            .write_u32(num_heaps, 1)
            .write_ptr(heaps, heaps_array)
            .write_ptr(heaps_array, heap)
            .write_ptr(at(heap, HEAP_DEV), device)
            .write_ptr(at(heap, HEAP_NAME), at(heap, 0x100))
            .write_cstring(at(heap, 0x100), "system")
            .write_u32(at(heap, HEAP_TOTAL_ALLOCATED), total_allocated as u32)
            .write_u32(at(heap, HEAP_TOTAL_HANDLES), total_handles as u32);

        let mut client_addrs = Vec::new();
        let mut handle_addrs = Vec::new();
        let mut buffer_addrs = Vec::new();
        for (i, wanted) in clients.iter().enumerate() {
            let i = i as u64;
            let client = kva(0x10_0000 + i * 0x1000);
            let display_name = format!("{}:{}", wanted.name, wanted.pid);
            snapshot
                .write_ptr(at(client, CLIENT_NAME), at(client, 0x100))
                .write_cstring(at(client, 0x100), wanted.name)
                .write_ptr(at(client, CLIENT_DISPLAY_NAME), at(client, 0x200))
                .write_cstring(at(client, 0x200), &display_name)
                .write_u32(at(client, CLIENT_PID), wanted.pid);

            let mut handles = Vec::new();
            let mut buffers = Vec::new();
            for (j, size) in wanted.buffers.iter().enumerate() {
                let j = j as u64;
                let handle = kva(0x100_0000 + i * 0x10_0000 + j * 0x1000);
                let buffer = kva(0x200_0000 + i * 0x10_0000 + j * 0x1000);
                snapshot
                    .write_ptr(at(handle, HANDLE_BUFFER), buffer)
                    .write_u64(at(buffer, BUFFER_SIZE), *size);
                handles.push(handle);
                buffers.push(buffer);
            }

            let nodes = handles
                .iter()
                .map(|h| at(*h, HANDLE_NODE))
                .collect::<Vec<_>>();
            write_tree(&mut snapshot, at(client, CLIENT_HANDLES), &nodes);

            client_addrs.push(client);
            handle_addrs.push(handles);
            buffer_addrs.push(buffers);
        }

        let nodes = client_addrs
            .iter()
            .map(|c| at(*c, CLIENT_NODE))
            .collect::<Vec<_>>();
        write_tree(&mut snapshot, at(device, DEVICE_CLIENTS), &nodes);

        Self {
            snapshot,
            heaps_array,
            heap,
            device,
            clients: client_addrs,
            handles: handle_addrs,
            buffers: buffer_addrs,
        }
    }
}

/// The two clients most tests use: 2KB + 3KB, then 1KB.
pub fn two_clients() -> Vec<ClientSpec> {
    vec![
        ClientSpec {
            name: "surfaceflinger",
            pid: 501,
            buffers: vec![2_048, 3_072],
        },
        ClientSpec {
            name: "mediaserver",
            pid: 1_013,
            buffers: vec![1_024],
        },
    ]
}
