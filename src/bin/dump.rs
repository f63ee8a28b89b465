//! Message dumper: drives the message decoder and prints every message
//! in text form, one per line, prefixed with its index and byte offset.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;

use nexus_rv::decoder::MsgDecoder;
use nexus_rv::hwconfig::HwConfig;
use nexus_rv::text::format_msg;

#[derive(StructOpt, Debug)]
#[structopt(about = "Dump a Nexus-RV trace stream as text, one message per line")]
struct Opt {
    #[structopt(short, long, help = "Hardware configuration string", default_value = "model=generic64")]
    hwcfg: String,

    #[structopt(short, long, help = "Only print messages from this SRC (hart)")]
    filter: Option<u32>,

    #[structopt(
        short,
        long,
        help = "Decode buffer size",
        default_value = "4096"
    )]
    buffersz: usize,

    #[structopt(
        name = "FILE",
        parse(from_os_str),
        help = "Trace input file. If \"-\" or omitted, reads stdin instead."
    )]
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

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();

    let cfg = HwConfig::parse(&opt.hwcfg).context("invalid hardware configuration string")?;
    let input = open_input(&opt.file)?;
    let mut decoder = MsgDecoder::new(cfg, input, opt.buffersz, opt.filter)
        .context("failed to create message decoder")?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let mut msgid = 0usize;
    let mut decoded_bytes = 0usize;
    loop {
        let next = decoder.next().map_err(|e| {
            tracing::error!("decode failed at offset {}: {}", decoder.offset(), e);
            e
        })?;
        match next {
            None => break,
            Some(msg) => {
                let offset = decoder.offset();
                let len = decoder.lastmsg().len();
                writeln!(out, "Msg #{} +{} {}", msgid, offset, format_msg(&msg))?;
                decoded_bytes = offset + len;
                msgid += 1;
            }
        }
    }
    out.flush()?;
    eprintln!("\n Total: {} Msg, Decoded {} bytes", msgid, decoded_bytes);
    Ok(())
}
