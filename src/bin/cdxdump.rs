use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use warc_replay::cdx::field_order_to_line;
use warc_replay::CdxReader;

/// Parse a CDX index file and report (or re-serialize) its entries.
#[derive(Debug, Parser)]
#[command(name = "cdxdump")]
struct CdxCli {
    /// CDX file to read.
    #[arg(short, long, default_value = "out.cdx.gz")]
    file: PathBuf,

    /// Force gzip decompression regardless of file extension.
    #[arg(long)]
    gz: bool,

    /// Re-serialize every entry to stdout instead of just counting.
    #[arg(long)]
    dump: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = CdxCli::parse();

    let mut reader = CdxReader::new();
    reader
        .parse_file(&cli.file, cli.gz)
        .with_context(|| format!("failed to parse {}", cli.file.display()))?;

    let order = reader
        .field_order()
        .map(<[String]>::to_vec)
        .context("file contained no CDX header line")?;

    if cli.dump {
        println!("{}", field_order_to_line(&order));
        for entry in &reader.entries {
            println!("{}", entry.to_line(&order));
        }
    } else {
        println!(
            "{}: {} entries, fields: {}",
            cli.file.display(),
            reader.entries.len(),
            order.join(" ")
        );
    }
    Ok(())
}
