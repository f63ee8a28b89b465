//! Split a trace stream into one raw file per SRC value.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;

use nexus_rv::decoder::MsgDecoder;
use nexus_rv::hwconfig::HwConfig;

#[derive(StructOpt, Debug)]
#[structopt(about = "Split a Nexus-RV trace stream into one raw file per SRC")]
struct Opt {
    #[structopt(short, long, help = "Bits of TIMESTAMP field", default_value = "0")]
    tsbits: u8,

    #[structopt(short, long, help = "Bits of SRC field", default_value = "0")]
    srcbits: u8,

    #[structopt(short, long, help = "Decode buffer size", default_value = "4096")]
    buffersz: usize,

    #[structopt(short, long, help = "Output filename prefix (defaults to the input filename)")]
    prefix: Option<String>,

    #[structopt(
        name = "FILE",
        parse(from_os_str),
        help = "Trace input file. If \"-\", reads stdin instead (a prefix is then required)."
    )]
    file: PathBuf,
}

struct PerSrc {
    file: File,
    msgs: usize,
    bytes: usize,
}

fn open_input(path: &PathBuf) -> Result<Box<dyn Read>> {
    if path.to_str() == Some("-") {
        Ok(Box::new(io::stdin()))
    } else {
        Ok(Box::new(
            File::open(path).with_context(|| format!("failed to open {:?}", path))?,
        ))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();

    let cfg = HwConfig {
        ts_bits: opt.tsbits,
        src_bits: opt.srcbits,
        ..HwConfig::default()
    };

    let prefix = match &opt.prefix {
        Some(p) => p.clone(),
        None => {
            if opt.file.to_str() == Some("-") {
                anyhow::bail!("prefix must be specified when reading from stdin");
            }
            opt.file.to_string_lossy().into_owned()
        }
    };

    let input = open_input(&opt.file)?;
    let mut decoder = MsgDecoder::new(cfg, input, opt.buffersz, None)
        .context("failed to create message decoder")?;

    let mut per_src: HashMap<u32, PerSrc> = HashMap::new();
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
                let len = decoder.lastmsg().len();
                decoded_bytes += len;
                msgid += 1;
                if !msg.known() || msg.idle() {
                    continue;
                }
                let entry = match per_src.get_mut(&msg.src) {
                    Some(e) => e,
                    None => {
                        let filename = format!("{}.{}", prefix, msg.src);
                        let file = File::create(&filename)
                            .with_context(|| format!("unable to open {}", filename))?;
                        per_src.insert(
                            msg.src,
                            PerSrc {
                                file,
                                msgs: 0,
                                bytes: 0,
                            },
                        );
                        per_src.get_mut(&msg.src).unwrap()
                    }
                };
                entry.file.write_all(decoder.lastmsg())?;
                entry.msgs += 1;
                entry.bytes += len;
            }
        }
    }

    eprintln!("\n Total: {} Msg, Decoded {} bytes", msgid, decoded_bytes);
    let mut srcs: Vec<_> = per_src.keys().copied().collect();
    srcs.sort_unstable();
    for src in srcs {
        let entry = &per_src[&src];
        eprintln!("  SRC {}: {} Msg, Decoded {} bytes", src, entry.msgs, entry.bytes);
    }
    Ok(())
}
