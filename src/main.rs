use clap::{Parser, Subcommand};
use ebook2txt::codec::CompressionKind;
use ebook2txt::container::Container;
use ebook2txt::convert::{default_output_path, Capabilities, ConvertOptions, Converter};
use ebook2txt::markup::MarkupBackend;
use ebook2txt::writer::{ContainerBuilder, MobiOptions};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ebook2txt", about = "Extract plain text from MOBI/PalmDOC and EPUB books")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a .mobi/.prc/.azw/.epub book to UTF-8 text
    Convert {
        input: PathBuf,
        /// Output path (default: input with a .txt extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Markup stripper: dom (default when compiled in) or regex
        #[arg(short, long)]
        markup: Option<String>,
        /// Leave MOBI trailing entries attached to text records
        #[arg(long)]
        keep_trailing_entries: bool,
        /// Poll interval while paused, in milliseconds
        #[arg(long, default_value = "100")]
        poll_ms: u64,
    },
    /// Show container header, record geometry and format metadata
    Info {
        input: PathBuf,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Pack a UTF-8 text file into a PalmDOC/MOBI container
    Pack {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Compression: palmdoc (default) or none
        #[arg(short, long, default_value = "palmdoc")]
        compression: String,
        /// Database name (default: input file stem)
        #[arg(short, long)]
        name: Option<String>,
        /// Write a MOBI header (BOOKMOBI) instead of plain PalmDOC
        #[arg(long)]
        mobi: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match cli.command {

        // ── Convert ──────────────────────────────────────────────────────────
        Commands::Convert { input, output, markup, keep_trailing_entries, poll_ms } => {
            let mut capabilities = Capabilities::detect();
            if let Some(name) = markup {
                capabilities.markup = parse_markup(&name);
            }
            let options = ConvertOptions {
                poll_interval:          Duration::from_millis(poll_ms),
                strip_trailing_entries: !keep_trailing_entries,
                ..ConvertOptions::default()
            };
            let output = output.unwrap_or_else(|| default_output_path(&input));

            let job = Converter::new(capabilities, options).job();
            let mut progress = |pct: f64, status: &str| println!("  {pct:5.1}%  {status}");
            let summary = job.run(&input, &output, Some(&mut progress))?;

            println!("Converted: {} → {}", input.display(), summary.output.display());
            println!("  Units     {}", summary.units);
            println!("  Written   {} B", summary.bytes_written);
            if let Some(encoding) = summary.encoding {
                println!("  Encoding  {encoding}");
            }
            if summary.zero_filled > 0 {
                println!("  Repaired  {} zero-filled byte(s)", summary.zero_filled);
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json } => {
            let bytes = std::fs::read(&input)?;
            let info  = Container::parse(&bytes)?.info();
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
                return Ok(());
            }

            let meta = &info.metadata;
            println!("── PDB container ────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Name           {}", info.name);
            println!("  Type/creator   {}", info.type_creator);
            println!("  Created        {}", info.created.as_deref().unwrap_or("—"));
            println!("  Modified       {}", info.modified.as_deref().unwrap_or("—"));
            println!("  Records        {}", info.records);
            println!("  Text records   {} (declared {})", info.text_records, meta.record_count);
            println!("  Record size    {} B", meta.record_size);
            println!("  Text length    {} B", meta.text_length);
            println!("  Compression    {} ({})", meta.compression.raw(), meta.compression.name());
            println!("  Encryption     {}", meta.encryption);
            if let Some(mobi) = &meta.mobi {
                println!("  MOBI header    {} B, type {}, version {}",
                         mobi.header_length, mobi.mobi_type, mobi.file_version);
                println!("  Text encoding  {}", mobi.text_encoding);
                println!("  Extra flags    {:#06x}", mobi.extra_flags);
                if let Some(title) = &mobi.full_name {
                    println!("  Title          {title}");
                }
            }
        }

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { input, output, compression, name, mobi } => {
            let text = std::fs::read(&input)?;
            let name = name.unwrap_or_else(|| {
                input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
            });
            let mut builder = ContainerBuilder::new(name.clone())
                .compression(parse_compression(&compression));
            if mobi {
                builder = builder.mobi(MobiOptions { full_name: Some(name), ..MobiOptions::default() });
            }
            let bytes = builder.build(&text)?;
            std::fs::write(&output, &bytes)?;
            println!("Created: {} ({} B from {} B of text)", output.display(), bytes.len(), text.len());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_markup(s: &str) -> MarkupBackend {
    MarkupBackend::from_name(s).unwrap_or_else(|| {
        eprintln!("Unknown markup backend '{}', using {}", s, MarkupBackend::preferred().name());
        MarkupBackend::preferred()
    })
}

fn parse_compression(s: &str) -> CompressionKind {
    CompressionKind::from_name(s).unwrap_or_else(|| {
        eprintln!("Unknown compression '{}', defaulting to palmdoc", s);
        CompressionKind::PalmDoc
    })
}
