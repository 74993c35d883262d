use anyhow::{bail, Context, Result};
use clap::Parser;
use libmtext_coding::{coding_by_name, Converter};
use libmtext_core::{utils, Config};
use std::io::{Read, Write};

/// Convert text between coding systems.
#[derive(Parser)]
#[command(name = "mconv", about = "Decode bytes with one coding system and re-encode with another")]
struct Args {
    /// Source coding system (e.g. utf-8, sjis, iso-2022-jp)
    #[arg(short, long, default_value = "utf-8")]
    from: String,

    /// Destination coding system
    #[arg(short, long, default_value = "utf-8")]
    to: String,

    /// Pass invalid input through instead of failing
    #[arg(short, long)]
    lenient: bool,

    /// TOML configuration file (database directories, leniency default)
    #[arg(short, long)]
    config: Option<String>,

    /// Print output as space-separated hex instead of raw bytes
    #[arg(short = 'x', long)]
    hex: bool,

    /// List known coding systems and exit
    #[arg(long)]
    list: bool,

    /// Input file (stdin when omitted)
    input: Option<String>,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    output: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut lenient = args.lenient;
    if let Some(path) = &args.config {
        let cfg = Config::load_toml(path)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("loading {}", path))?;
        cfg.apply_database_dirs();
        lenient = lenient || cfg.lenient;
    }

    if args.list {
        for cs in libmtext_coding::list() {
            let aliases: Vec<String> = cs.aliases.iter().map(|a| a.name()).collect();
            if aliases.is_empty() {
                println!("{}", cs.name);
            } else {
                println!("{} ({})", cs.name, aliases.join(", "));
            }
        }
        return Ok(());
    }

    let Some(from) = coding_by_name(&args.from) else {
        bail!("unknown coding system {:?}", args.from);
    };
    let Some(to) = coding_by_name(&args.to) else {
        bail!("unknown coding system {:?}", args.to);
    };

    let bytes = match &args.input {
        Some(path) => std::fs::read(path).with_context(|| format!("reading {}", path))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("reading stdin")?;
            buf
        }
    };

    let text = Converter::decode_bytes(from, &bytes, lenient)
        .with_context(|| format!("decoding as {}", args.from))?;
    let out = Converter::encode_mtext(to, &text, lenient)
        .with_context(|| format!("encoding as {}", args.to))?;
    let out = if args.hex {
        let mut s = utils::hex(&out);
        s.push('\n');
        s.into_bytes()
    } else {
        out
    };

    match &args.output {
        Some(path) => std::fs::write(path, &out).with_context(|| format!("writing {}", path))?,
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            handle.write_all(&out).context("writing stdout")?;
        }
    }
    Ok(())
}
