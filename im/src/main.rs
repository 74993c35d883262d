use anyhow::{bail, Context, Result};
use clap::Parser;
use libmtext_core::database;
use libmtext_im::keysym;
use std::io::BufRead;

/// Feed key sequences to an input method and print the results.
#[derive(Parser)]
#[command(name = "mimtest", about = "Interactive input-method tester")]
struct Args {
    /// Language tag of the input method (e.g. ja, zh, t)
    #[arg(short, long)]
    language: String,

    /// Name of the input method
    #[arg(short, long)]
    name: String,

    /// Extra database directory to scan
    #[arg(short, long)]
    dir: Vec<String>,

    /// Keys to feed (space-separated key names); interactive when omitted
    #[arg(short, long)]
    keys: Option<String>,
}

fn feed(ic: &mut libmtext_im::InputContext, keys: &str) -> Result<()> {
    for name in keys.split_whitespace() {
        let key = keysym::parse_key(name)?;
        let handled = ic.filter(key)?;
        println!(
            "  {} -> handled={} preedit={:?} produced={:?}",
            name,
            handled,
            ic.preedit().to_string_lossy(),
            ic.produced().to_string_lossy()
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    for dir in &args.dir {
        database::add_directory(dir);
    }

    let im = libmtext_im::open_im_by_name(&args.language, &args.name)
        .with_context(|| format!("opening input method {}-{}", args.language, args.name))?;
    println!("Input method: {} ({})", im.title(), im.name);
    if let Some(desc) = im.description() {
        println!("{}", desc);
    }

    let mut ic = im.create_ic();
    if let Some(keys) = &args.keys {
        feed(&mut ic, keys)?;
        let produced = ic.take_produced();
        println!("final: {:?}", produced.to_string_lossy());
        if !ic.preedit().is_empty() {
            bail!("pre-edit left uncommitted: {:?}", ic.preedit().to_string_lossy());
        }
        return Ok(());
    }

    println!("Type key names separated by spaces; Ctrl+C to exit.");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if let Err(e) = feed(&mut ic, input) {
            eprintln!("error: {}", e);
        }
    }
    Ok(())
}
