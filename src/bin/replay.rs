//! Trace replayer: drives the trace decoder end to end and prints a
//! textual log of every instruction-retirement boundary.
//!
//! Narrow traits let a caller plug in an instruction stream or symbol
//! resolver; the bundled default just prints addresses, since
//! disassembly and symbolization are out of scope here.

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;

use nexus_rv::decoder::MsgDecoder;
use nexus_rv::error::Error;
use nexus_rv::hwconfig::HwConfig;
use nexus_rv::text::format_msg;
use nexus_rv::trace::{Event, TraceDecoder};

/// Looks up the mnemonic/operands at a retired address. The bundled
/// [`NullSource`] always reports "unknown", which is enough to drive
/// the replay loop without a real disassembler.
pub trait InstructionSource {
    fn describe(&self, addr: u64) -> Option<String>;
}

/// Maps an `Ownership` context/address to a symbol name.
pub trait SymbolResolver {
    fn resolve(&self, addr: u64) -> Option<String>;
}

pub struct NullSource;

impl InstructionSource for NullSource {
    fn describe(&self, _addr: u64) -> Option<String> {
        None
    }
}

impl SymbolResolver for NullSource {
    fn resolve(&self, _addr: u64) -> Option<String> {
        None
    }
}

#[derive(StructOpt, Debug)]
#[structopt(about = "Replay a Nexus-RV trace stream as a textual retirement log")]
struct Opt {
    #[structopt(short, long, help = "Bits of TIMESTAMP field", default_value = "0")]
    tsbits: u8,

    #[structopt(short, long, help = "Bits of SRC field", default_value = "0")]
    srcbits: u8,

    #[structopt(short, long, help = "Decode buffer size", default_value = "4096")]
    buffersz: usize,

    #[structopt(name = "FILE", parse(from_os_str), help = "Trace input file. If \"-\" or omitted, reads stdin instead.")]
    file: Option<PathBuf>,
}

fn open_input(file: &Option<PathBuf>) -> Result<Box<dyn Read>> {
    match file {
        Some(path) if path.to_str() != Some("-") => Ok(Box::new(
            File::open(path).with_context(|| format!("failed to open {:?}", path))?,
        )),
        _ => Ok(Box::new(io::stdin())),
    }
}

fn replay(mut dec: TraceDecoder<Box<dyn Read>>, src: &dyn InstructionSource) -> Result<()> {
    let mut last_time = 0u64;
    loop {
        let (n, event) = match dec.try_retire(u32::MAX) {
            Ok(r) => r,
            Err(Error::TraceEof) => break,
            Err(Error::MsgUnsupported { tcode }) => {
                tracing::warn!("unsupported message tcode={}, skipping", tcode);
                // try_retire rewound the offending message; consume it
                // directly at the raw decoder level so the stream
                // actually advances instead of re-hitting it forever.
                match dec.msg_decoder_mut().next() {
                    Ok(Some(raw)) => {
                        if raw.has_timestamp {
                            dec.add_timestamp(raw.timestamp);
                        }
                        println!("\n[{}] UNKNOWN MSG {}", dec.time(), format_msg(&raw));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("failed to skip unsupported message: {}", e);
                        return Err(e.into());
                    }
                }
                continue;
            }
            Err(e) => {
                tracing::error!("try_retire failed: {}", e);
                return Err(e.into());
            }
        };
        if n > 0 {
            println!("\n[{}] +{} I-CNT {}", dec.time(), dec.msg_decoder().offset(), n);
        }
        match event {
            Event::None => {}
            Event::Direct => {
                let bit = dec.next_tnt()?;
                print!("{}", if bit != 0 { '!' } else { '.' });
            }
            Event::DirectSync => {}
            Event::Indirect | Event::IndirectSync | Event::Trap => {
                let indir = dec.next_indirect()?;
                print!(
                    "\n[{}] +{} INDIRECT {:x}{}{}",
                    dec.time(),
                    dec.msg_decoder().offset(),
                    indir.target,
                    if indir.interrupt { " interrupt" } else { "" },
                    if indir.exception { " exception" } else { "" },
                );
                if let Some(ctx) = &indir.context {
                    print!(
                        " fmt={} priv={} v={} context={:x}",
                        ctx.format, ctx.prv, ctx.v, ctx.context
                    );
                }
                if let Some(desc) = src.describe(indir.target) {
                    print!(" {}", desc);
                }
            }
            Event::Sync => {
                let sync = dec.next_sync()?;
                print!(
                    "\n[{}] +{} SYNC {:x} sync={}",
                    dec.time(),
                    dec.msg_decoder().offset(),
                    sync.addr,
                    sync.sync
                );
            }
            Event::Stop => {
                let stop = dec.next_stop()?;
                print!(
                    "\n[{}] +{} STOP evcode={}",
                    dec.time(),
                    dec.msg_decoder().offset(),
                    stop.evcode
                );
            }
            Event::Error => {
                let err = dec.next_error()?;
                print!(
                    "\n[{}] +{} ERROR etype={} ecode={}",
                    dec.time(),
                    dec.msg_decoder().offset(),
                    err.etype,
                    err.ecode
                );
            }
        }
        let now = dec.time();
        if last_time != 0 && last_time > now {
            eprintln!("WARN: time goes backward, {} vs {}", last_time, now);
        }
        last_time = now;
    }
    println!();
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();

    let cfg = HwConfig {
        ts_bits: opt.tsbits,
        src_bits: opt.srcbits,
        ..HwConfig::default()
    };
    let input = open_input(&opt.file)?;
    let msg_decoder = MsgDecoder::new(cfg, input, opt.buffersz, None)
        .context("failed to create message decoder")?;
    let dec = TraceDecoder::new(msg_decoder, cfg);

    replay(dec, &NullSource)
}
