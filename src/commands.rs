// Axel '0vercl0k' Souchet - October 16 2026
//! The commands a dump-analysis shell exposes, with their flags.
//!
//! The host registers them once by calling [`command_table`] and runs them
//! with [`dispatch`]; every command writes its report or a status line to the
//! output it is given.
use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::Parser;
use log::debug;

use crate::dmesg;
use crate::error::{Result, WalkerError};
use crate::host::DumpHost;
use crate::ion::{DumpFlags, HeapsOutcome};
use crate::session::Session;

/// Signature of a command: the session, the arguments (the command name
/// first) and where to write.
pub type RunFn<H> = fn(&mut Session<H>, &[&str], &mut dyn Write) -> Result<()>;

pub struct Command<H> {
    pub name: &'static str,
    pub about: &'static str,
    pub run: RunFn<H>,
}

#[derive(Parser, Debug)]
#[command(name = "ion", about = "dump ion heap information")]
struct IonArgs {
    /// Displays all information of the ion heaps.
    #[arg(short = 'a')]
    all: bool,
    /// Displays ion buffer information, along with the clients holding them.
    #[arg(short = 'b')]
    buffers: bool,
    /// Displays ion_client information of existing ion heaps.
    #[arg(short = 'c')]
    clients: bool,
}

impl IonArgs {
    fn flags(&self) -> DumpFlags {
        let mut flags = DumpFlags::empty();
        flags.set(DumpFlags::BUFFER, self.all || self.buffers);
        flags.set(DumpFlags::CLIENT, self.all || self.clients);

        flags
    }
}

#[derive(Parser, Debug)]
#[command(name = "arm64_core_set", about = "set cpu core regs for arm64")]
struct CoreSetArgs {
    /// Load the cpu core regs from a register dump (can be repeated).
    #[arg(short, long = "load", value_name = "PATH")]
    load: Vec<PathBuf>,
    /// Automatically load the cpu core regs saved in the dump.
    #[arg(short, long)]
    atomic: bool,
}

#[derive(Parser, Debug)]
#[command(
    name = "dmesg_regs",
    about = "extract the arm64 core regs printed in a kernel log"
)]
struct DmesgRegsArgs {
    /// Input log containing the regs.
    #[arg(short = 'f', long = "infile", value_name = "LOG")]
    infile: PathBuf,
    /// Write the register dump here instead of the command output.
    #[arg(short = 'o', long = "outfile", value_name = "PATH")]
    outfile: Option<PathBuf>,
}

/// Parse `args`; `None` means clap printed the help and there's nothing else
/// to do.
fn parse_args<T: Parser>(args: &[&str], out: &mut dyn Write) -> Result<Option<T>> {
    match T::try_parse_from(args) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            write!(out, "{}", e.render())?;
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn cmd_ion<H: DumpHost>(session: &mut Session<H>, args: &[&str], out: &mut dyn Write) -> Result<()> {
    let Some(args) = parse_args::<IonArgs>(args, out)? else {
        return Ok(());
    };

    let outcome = session.ion_report(args.flags(), &mut *out).dump_heaps()?;
    if outcome == HeapsOutcome::Unsupported {
        writeln!(out, "ion heaps are not supported by this dump")?;
    }

    Ok(())
}

fn cmd_arm64_core_set<H: DumpHost>(
    session: &mut Session<H>,
    args: &[&str],
    out: &mut dyn Write,
) -> Result<()> {
    let Some(args) = parse_args::<CoreSetArgs>(args, out)? else {
        return Ok(());
    };

    if !args.atomic && args.load.is_empty() {
        return Err(WalkerError::Usage(
            "arm64_core_set needs --load <PATH> or --atomic".to_string(),
        ));
    }

    // The image goes first so that the files can patch what it got wrong.
    if args.atomic {
        let found = match session.load_registers_from_image() {
            Ok(stats) => {
                debug!("regs_before_stop: {stats:?}");
                stats.succeeded()
            }
            Err(e) if matches!(e, WalkerError::Unsupported(_)) || e.is_memory_fault() => {
                writeln!(out, "{e}")?;
                false
            }
            Err(e) => return Err(e),
        };

        let status = if found { "success" } else { "failed" };
        writeln!(out, "find cpu core from ramdump {status}")?;
    }

    for path in &args.load {
        writeln!(out, "loading cpu core regs from {}", path.display())?;
        match session.load_registers_from_file(path) {
            Ok(stats) => {
                debug!("{}: {stats:?}", path.display());
                writeln!(out, "loading cpu core regs from {} done", path.display())?;
            }
            Err(WalkerError::Io(e)) => {
                writeln!(out, "can not load file {}: {e}", path.display())?;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

fn cmd_dmesg_regs<H: DumpHost>(
    _session: &mut Session<H>,
    args: &[&str],
    out: &mut dyn Write,
) -> Result<()> {
    let Some(args) = parse_args::<DmesgRegsArgs>(args, out)? else {
        return Ok(());
    };

    match &args.outfile {
        Some(path) => {
            let mut file = File::create(path)?;
            let records = dmesg::convert_log(&args.infile, &mut file)?;
            writeln!(
                out,
                "wrote {records} cpu core regs to {}",
                path.display()
            )?;
        }
        None => {
            dmesg::convert_log(&args.infile, out)?;
        }
    }

    Ok(())
}

/// Every command, in the order a help listing shows them.
#[must_use]
pub fn command_table<H: DumpHost>() -> Vec<Command<H>> {
    vec![
        Command {
            name: "ion",
            about: "dump ion heap information",
            run: cmd_ion::<H>,
        },
        Command {
            name: "arm64_core_set",
            about: "set cpu core regs for arm64",
            run: cmd_arm64_core_set::<H>,
        },
        Command {
            name: "dmesg_regs",
            about: "extract the arm64 core regs printed in a kernel log",
            run: cmd_dmesg_regs::<H>,
        },
    ]
}

/// Run the command named by `args[0]`.
pub fn dispatch<H: DumpHost>(
    session: &mut Session<H>,
    args: &[&str],
    out: &mut dyn Write,
) -> Result<()> {
    let Some(name) = args.first() else {
        return Err(WalkerError::Usage("no command given".to_string()));
    };

    let table = command_table::<H>();
    let Some(command) = table.iter().find(|c| c.name == *name) else {
        let mut msg = format!("unknown command {name}, available commands:");
        for c in &table {
            let _ = write!(msg, "\n  {:<16}{}", c.name, c.about);
        }

        return Err(WalkerError::Usage(msg));
    };

    (command.run)(session, args, out)
}
