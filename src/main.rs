use std::io::BufRead;
use std::path::PathBuf;
use std::thread;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use common::cli::GlobalOpts;
use common::ControlHandle;
use r4300::{Core, CoreConfig, Reason, Strategy, UndefinedInstruction, RDRAM_SIZE, RDRAM_SIZE_EXPANDED};

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum CoreKind {
    Interpreter,
    Dynarec,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Rdram {
    #[value(name = "4")]
    Base,
    /// With the expansion pak
    #[value(name = "8")]
    Expanded,
}

#[derive(Debug, Parser)]
#[clap(name = "r4300-run", version, disable_help_flag = true, disable_version_flag = true)]
/// Run a raw big-endian MIPS program on the VR4300 core and dump the registers
struct Cli {
    /// Program image
    image: PathBuf,

    #[arg(long, value_enum, default_value_t = CoreKind::Interpreter)]
    core: CoreKind,

    /// Count increments per retired instruction
    #[arg(long, default_value_t = 2)]
    count_per_op: u64,

    /// Raise floating point exceptions enabled in FCR31
    #[arg(long)]
    float_traps: bool,

    /// Stop on undefined instructions instead of raising Reserved Instruction
    #[arg(long)]
    abort_on_undefined: bool,

    /// RDRAM size in MB
    #[arg(long, value_enum, default_value_t = Rdram::Expanded)]
    rdram: Rdram,

    /// Truncate in CVT.S.D like the Wii Virtual Console
    #[arg(long)]
    wii_vc: bool,

    /// Load the image as cartridge ROM instead of into RDRAM
    #[arg(long)]
    rom: bool,

    /// Optional PIF boot ROM
    #[arg(long, value_name = "PATH")]
    pif: Option<PathBuf>,

    /// Physical RDRAM address the image is copied to
    #[arg(long, value_parser = parse_address, default_value = "0x1000")]
    load_address: u32,

    /// Initial PC (default: KSEG0 alias of the load address, or the start of ROM)
    #[arg(long, value_parser = parse_address)]
    entry: Option<u32>,

    /// Cycle budget; runs until stopped when omitted
    #[arg(long)]
    cycles: Option<u64>,

    #[command(flatten)]
    global: GlobalOpts,
}

fn parse_address(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("bad address {:?}: {}", s, e))
}

impl Cli {
    fn config(&self) -> CoreConfig {
        CoreConfig {
            strategy: match self.core {
                CoreKind::Interpreter => Strategy::Interpreter,
                CoreKind::Dynarec => Strategy::Dynarec,
            },
            count_per_op: self.count_per_op,
            float_traps: self.float_traps,
            undefined_instruction: if self.abort_on_undefined {
                UndefinedInstruction::Abort
            } else {
                UndefinedInstruction::Exception
            },
            rdram_size: match self.rdram {
                Rdram::Base => RDRAM_SIZE,
                Rdram::Expanded => RDRAM_SIZE_EXPANDED,
            },
            wii_vc: self.wii_vc,
        }
    }

    fn entry(&self) -> u32 {
        match self.entry {
            Some(entry) => entry,
            None if self.rom => 0xb000_0000,
            None => 0x8000_0000 | self.load_address,
        }
    }
}

/// Debugger commands on stdin: s(tep), c(ontinue), p(ause), q(uit)
fn spawn_console(handle: ControlHandle) {
    thread::spawn(move || {
        eprintln!("paused; commands: s (step), c (continue), p (pause), q (quit)");
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let result = match line.trim() {
                "s" | "" => handle.step(),
                "c" => handle.resume(),
                "p" => handle.pause(),
                "q" => handle.stop(),
                other => {
                    eprintln!("unknown command {:?}", other);
                    Ok(())
                }
            };
            if result.is_err() {
                break;
            }
        }
    });
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.global.log_filter()))
        .format_timestamp(None)
        .init();

    let image = std::fs::read(&cli.image).with_context(|| format!("reading {}", cli.image.display()))?;
    let mut core = Core::new(cli.config());

    if let Some(path) = &cli.pif {
        let pif = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        core.load_pif_rom(&pif);
    }
    if cli.rom {
        core.load_rom(image);
    } else {
        let written = core.load_rdram(cli.load_address, &image);
        if written < image.len() {
            log::warn!("only {} of {} bytes fit in memory", written, image.len());
        }
    }
    core.regs.pc = cli.entry();
    log::info!("starting at {:08x} with the {:?}", core.regs.pc, cli.core);

    if cli.global.paused {
        let (handle, controller) = common::control_channel(true);
        core.attach_controller(controller);
        spawn_console(handle);
    }

    let result = core.run(cli.cycles.unwrap_or(u64::MAX));
    print!("{}", core.regs.dump());
    println!("ran {} cycles", result.cycles);

    match result.reason {
        Reason::Limited | Reason::Stopped => Ok(()),
        Reason::Halted(err) => Err(err.into()),
    }
}
