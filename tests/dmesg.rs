// Axel '0vercl0k' Souchet - October 16 2026
use std::fs;
use std::io::Cursor;

use ramdump_walker::{
    apply_register_dump, dispatch, parse_kernel_log, write_register_dump, LoggedRegs,
    RegisterTable, Session, Snapshot, WalkerError,
};

const LOG: &str = "\
<6>[  100.000000] random: crng init done
[  101.100000] CPU: 3 PID: 1234 Comm: kworker/3:1 Tainted: G        W       4.9.112 #1
[  101.100000] pc : [<ffffff8008085c3c>] lr : [<ffffff8008085c38>] pstate: 60000145
[  101.100000] sp : ffffffc0f3e4bd30
[  101.100000] x29: ffffffc0f3e4bd30 x28: ffffffc0f3e48000
[  101.200000] CPU: 1 PID: 0 Comm: swapper/1
[  101.200000] x1 : 0000000000000001
[  101.300000] CPU: 0 PID: 1 Comm: init
[  101.300000] pc : [<ffffff8008001000>] lr : [<ffffff8008001004>] pstate: 20000005
[  101.300000] sp : ffffffc000a0bd10
[  101.300000] x0 : 1ffffffffffffffff
";

const CPU0_DUMP: &str = "\
## ========= begin arm64 core regs =========
cpu=0x0
lr=0xffffff8008001004
pc=0xffffff8008001000
pstate=0x0000000020000005
sp=0xffffffc000a0bd10
## ========= end arm64 core regs =========
";

#[test]
fn records_follow_the_banners() {
    let records = parse_kernel_log(Cursor::new(LOG)).unwrap();
    // cpu1 never logged a pc / sp so it's dropped.
    assert_eq!(
        records.iter().map(|r| r.cpu).collect::<Vec<_>>(),
        [3, 0]
    );

    let cpu3 = &records[0];
    assert!(cpu3.is_complete());
    assert_eq!(cpu3.regs["pc"], 0xffffff80_08085c3c);
    assert_eq!(cpu3.regs["lr"], 0xffffff80_08085c38);
    assert_eq!(cpu3.regs["sp"], 0xffffffc0_f3e4bd30);
    assert_eq!(cpu3.regs["x29"], 0xffffffc0_f3e4bd30);
    assert_eq!(cpu3.regs["x28"], 0xffffffc0_f3e48000);
    assert_eq!(cpu3.regs["pstate"], 0x60000145);

    // Values that don't fit in a register are left out.
    assert!(!records[1].regs.contains_key("x0"));
    assert_eq!(records[1].to_string(), CPU0_DUMP);
}

#[test]
fn nothing_to_extract() {
    let log = "[    0.000000] Booting Linux on physical CPU 0x0\nsp : ffffffc000a0bd10\n";
    assert!(parse_kernel_log(Cursor::new(log)).unwrap().is_empty());

    let mut incomplete = LoggedRegs::new(2);
    incomplete.regs.insert("pc".to_string(), 0x1000);
    assert!(!incomplete.is_complete());
}

#[test]
fn dumps_load_back() {
    let records = parse_kernel_log(Cursor::new(LOG)).unwrap();
    let mut dump = Vec::new();
    write_register_dump(&records, &mut dump).unwrap();

    let mut table = RegisterTable::zeroed(4).unwrap();
    let stats = apply_register_dump(Cursor::new(dump), &mut table).unwrap();
    // pstate isn't part of what the loader knows about.
    assert_eq!(stats.applied, 8);
    assert_eq!(stats.ignored, 2);
    assert_eq!(stats.malformed, 0);

    let cpu3 = table.get(3).unwrap();
    assert_eq!(cpu3.pc, 0xffffff80_08085c3c);
    assert_eq!(cpu3.lr(), 0xffffff80_08085c38);
    assert_eq!(cpu3.sp, 0xffffffc0_f3e4bd30);
    assert_eq!(cpu3.fp(), 0xffffffc0_f3e4bd30);
    assert_eq!(cpu3.regs[28], 0xffffffc0_f3e48000);
    assert_eq!(table.get(0).unwrap().pc, 0xffffff80_08001000);
    assert_eq!(table.get(1).unwrap().pc, 0);
}

#[test]
fn dmesg_regs_command() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("dmesg.txt");
    fs::write(&log, LOG).unwrap();
    let log = log.to_str().unwrap();
    let outfile = dir.path().join("regs.txt");
    let outfile = outfile.to_str().unwrap();

    let mut session = Session::new(Snapshot::new());
    let mut out: Vec<u8> = Vec::new();
    dispatch(&mut session, &["dmesg_regs", "-f", log, "-o", outfile], &mut out).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        format!("wrote 2 cpu core regs to {outfile}\n")
    );

    let written = fs::read_to_string(outfile).unwrap();
    assert!(written.ends_with(CPU0_DUMP));
    assert!(written.starts_with("## ========= begin arm64 core regs =========\ncpu=0x3\n"));

    // Without an output file the dump goes to the command output.
    let mut out: Vec<u8> = Vec::new();
    dispatch(&mut session, &["dmesg_regs", "--infile", log], &mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), written);

    // And it is what `arm64_core_set --load` expects.
    let mut out: Vec<u8> = Vec::new();
    dispatch(&mut session, &["arm64_core_set", "-l", outfile], &mut out).unwrap();
    assert_eq!(session.registers().unwrap().get(0).unwrap().sp, 0xffffffc0_00a0bd10);
}

#[test]
fn dmesg_regs_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.txt");
    let missing = missing.to_str().unwrap();

    let mut session = Session::new(Snapshot::new());
    let r = dispatch(&mut session, &["dmesg_regs", "-f", missing], &mut Vec::<u8>::new());
    assert!(matches!(r, Err(WalkerError::Io(_))));

    let r = dispatch(&mut session, &["dmesg_regs"], &mut Vec::<u8>::new());
    assert!(matches!(r, Err(WalkerError::Usage(_))));

    let r = dispatch(&mut session, &["dmesg"], &mut Vec::<u8>::new());
    match r {
        Err(WalkerError::Usage(msg)) => {
            assert!(msg.starts_with("unknown command dmesg"));
            assert!(msg.contains("dmesg_regs"));
        }
        r => panic!("unexpected {r:?}"),
    }
}
