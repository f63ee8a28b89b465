//! Message assembler: reads text-format messages (as printed by `dump`)
//! from stdin and encodes them back onto the wire, or as a hex dump in
//! text mode.

use std::fs::File;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;

use nexus_rv::hwconfig::{HwConfig, MSG_MAX_BYTES};
use nexus_rv::text::read_msg;
use nexus_rv::wire::encode_msg;

#[derive(StructOpt, Debug)]
#[structopt(about = "Re-encode text-format Nexus-RV messages read from stdin")]
struct Opt {
    #[structopt(short, long, help = "Hardware configuration string", default_value = "model=generic64")]
    hwcfg: String,

    #[structopt(short = "x", long, help = "Write a hex dump instead of raw bytes")]
    text: bool,

    #[structopt(
        name = "FILE",
        parse(from_os_str),
        help = "Output trace file. Writes to stdout if omitted."
    )]
    file: Option<PathBuf>,
}

/// Pull the `"Msg #<n> <MNEMONIC> "` prefix a single text message line
/// starts with, returning the parsed id and leaving the `Time=...`
/// tail for [`read_msg`].
fn strip_prefix(line: &str) -> Result<(usize, &str)> {
    let rest = line
        .trim_start()
        .strip_prefix("Msg")
        .ok_or_else(|| anyhow::anyhow!("unexpected msg prefix"))?
        .trim_start()
        .strip_prefix('#')
        .ok_or_else(|| anyhow::anyhow!("unexpected msg prefix"))?;
    let (id, rest) = rest
        .split_once(char::is_whitespace)
        .ok_or_else(|| anyhow::anyhow!("unexpected msg prefix"))?;
    let id: usize = id.parse().context("unexpected msg prefix")?;
    let rest = rest.trim_start();
    let (_mnemonic, rest) = rest
        .split_once(char::is_whitespace)
        .ok_or_else(|| anyhow::anyhow!("unexpected msg prefix"))?;
    Ok((id, rest))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();

    let cfg = HwConfig::parse(&opt.hwcfg).context("invalid hardware configuration string")?;

    let mut out: Box<dyn Write> = match &opt.file {
        Some(path) => Box::new(File::create(path).with_context(|| format!("failed to open {:?}", path))?),
        None => Box::new(io::stdout()),
    };
    let text = opt.text || (opt.file.is_none() && io::stdout().is_terminal());

    let stdin = io::stdin();
    let mut msgid = 0usize;
    let mut emitted = 0usize;
    let mut buf = [0u8; MSG_MAX_BYTES];

    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let (id, tail) = strip_prefix(&line)?;
        msgid = id;
        let msg = read_msg(tail).map_err(|e| {
            tracing::error!("failed to parse msg #{}: {}", id, e);
            e
        })?;
        buf.fill(0);
        let n = encode_msg(&cfg, &msg, &mut buf).map_err(|e| {
            tracing::error!("failed to encode msg #{}: {}", id, e);
            e
        })?;
        emitted += n;
        if text {
            write!(out, "[{}]", n)?;
            for b in &buf[..n] {
                write!(out, " {:02x}", b)?;
            }
            writeln!(out)?;
        } else {
            out.write_all(&buf[..n])?;
        }
    }
    out.flush()?;
    eprintln!("\n Last Msg {}, Emitted {} bytes", msgid, emitted);
    Ok(())
}
