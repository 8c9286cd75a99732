// Axel '0vercl0k' Souchet - October 16 2026
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ramdump_walker::{dispatch, Session, Snapshot, SnapshotDesc};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON description of the snapshot to analyze.
    snapshot: PathBuf,
    /// Log what the walkers are doing.
    #[arg(short, long)]
    verbose: bool,
    /// Print the per-cpu registers once the command is done.
    #[arg(long)]
    show_regs: bool,
    /// The command to run and its arguments, e.g. `ion -a`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )?;

    let file = File::open(&args.snapshot)
        .with_context(|| format!("failed to open {}", args.snapshot.display()))?;
    let desc: SnapshotDesc = serde_json::from_reader(BufReader::new(file))
        .context("failed to parse the snapshot description")?;
    let mut session = Session::new(Snapshot::from(desc));

    let command = args.command.iter().map(String::as_str).collect::<Vec<_>>();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    dispatch(&mut session, &command, &mut out)?;

    if args.show_regs {
        match session.registers() {
            Some(regs) => {
                for (cpu, regs) in regs.iter().enumerate() {
                    writeln!(
                        out,
                        "cpu{cpu}: pc={:#x} lr={:#x} sp={:#x} fp={:#x}",
                        regs.pc,
                        regs.lr(),
                        regs.sp,
                        regs.fp()
                    )?;
                }
            }
            None => writeln!(out, "no cpu core regs loaded")?,
        }
    }

    Ok(())
}
