//! Patch a trace stream in place: seek to an offset, inspect messages,
//! and rewrite a message's ICNT field without disturbing its length.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;

use nexus_rv::decoder::MsgDecoder;
use nexus_rv::hwconfig::HwConfig;
use nexus_rv::text::format_msg;
use nexus_rv::wire::encode_msg;

#[derive(StructOpt, Debug)]
#[structopt(about = "Inspect and patch a Nexus-RV trace file in place")]
struct Opt {
    #[structopt(short, long, help = "Hardware configuration string", default_value = "model=generic64")]
    hwcfg: String,

    #[structopt(short, long, help = "Decode buffer size", default_value = "4096")]
    buffersz: usize,

    #[structopt(name = "FILE", parse(from_os_str), help = "Trace file to patch")]
    file: PathBuf,

    #[structopt(
        name = "CMD",
        help = "Comma-separated sub-commands: seek=<off>, show, next, icnt=<val>"
    )]
    cmd: String,
}

/// A handle re-opened (re-`seek`ed) after every sub-command that
/// mutates the file, mirroring the source tool's full decoder
/// re-initialization on every seek.
struct Reopened {
    path: PathBuf,
    cfg: HwConfig,
    bufsz: usize,
    fileoff: u64,
}

impl Reopened {
    fn decoder_at(&self, off: u64) -> Result<MsgDecoder<std::io::Take<std::fs::File>>> {
        let mut f = OpenOptions::new().read(true).write(true).open(&self.path)?;
        f.seek(SeekFrom::Start(off))?;
        let len = f.metadata()?.len();
        let remaining = len.saturating_sub(off);
        let reader = f.take(remaining);
        Ok(MsgDecoder::new(self.cfg, reader, self.bufsz, None)?)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();

    let cfg = HwConfig::parse(&opt.hwcfg).context("invalid hardware configuration string")?;
    let mut state = Reopened {
        path: opt.file.clone(),
        cfg,
        bufsz: opt.buffersz,
        fileoff: 0,
    };

    let mut decoder = state.decoder_at(0)?;

    for sub in opt.cmd.split(',') {
        if let Some(off) = sub.strip_prefix("seek=") {
            state.fileoff = off.parse().context("invalid seek offset")?;
            decoder = state.decoder_at(state.fileoff)?;
            continue;
        }

        let msg = decoder
            .next()
            .map_err(|e| {
                tracing::error!("decode failed at offset {}: {}", decoder.offset(), e);
                e
            })?
            .ok_or_else(|| anyhow::anyhow!("EOF on read"))?;
        if sub == "next" {
            continue;
        }

        let cur_off = decoder.offset() as u64;
        let msg_len = decoder.lastmsg().len() as u64;
        if sub == "show" {
            println!("Msg +{} {}", cur_off + state.fileoff, format_msg(&msg));
        } else if let Some(val) = sub.strip_prefix("icnt=") {
            if !msg.has_icnt() {
                anyhow::bail!("msg has no i-cnt field");
            }
            let mut msg = msg;
            msg.icnt = val.parse().context("invalid icnt value")?;
            let len = msg_len as usize;
            let mut bytes = vec![0xffu8; len];
            let n = encode_msg(&state.cfg, &msg, &mut bytes).context("failed to encode msg")?;
            anyhow::ensure!(n == len, "patched message changed length");
            let file = OpenOptions::new().write(true).open(&state.path)?;
            file.write_at(&bytes, cur_off + state.fileoff)
                .context("pwrite failed")?;
        } else {
            anyhow::bail!("unknown command {}", sub);
        }

        state.fileoff += cur_off + msg_len;
        decoder = state.decoder_at(state.fileoff)?;
    }
    Ok(())
}
