mod db;
mod error;
mod extract;
mod fetch;
mod pagination;
mod pipeline;
mod record;
mod schema;
mod settings;
mod sink;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::extract::Extractors;
use crate::settings::{Settings, SinkKind};

#[derive(Parser)]
#[command(name = "avito_scraper", about = "Avito car listings scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl listing pages and save every card
    Run {
        /// Number of listing pages (default: from settings)
        #[arg(short = 'n', long)]
        pages: Option<usize>,
        /// Region slug, e.g. "perm"
        #[arg(short, long)]
        region: Option<String>,
        /// Search radius in km
        #[arg(long)]
        radius: Option<u32>,
        /// Category slug, e.g. "avtomobili"
        #[arg(long)]
        category: Option<String>,
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output format
        #[arg(long, value_enum)]
        format: Option<SinkKind>,
        /// Listing pages crawled in parallel, one session each
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Print the listing page URLs a run would visit
    Pages {
        #[arg(short = 'n', long)]
        pages: Option<usize>,
        #[arg(short, long)]
        region: Option<String>,
        #[arg(long)]
        radius: Option<u32>,
    },
    /// Run one extractor against a saved HTML page
    Parse {
        #[arg(value_enum)]
        kind: PageKind,
        file: PathBuf,
        /// Source URL recorded as the card link
        #[arg(long, default_value = "about:blank")]
        url: String,
    },
    /// Summarize a SQLite output file
    Stats {
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Brands to list
        #[arg(short = 'n', long, default_value = "10")]
        top: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PageKind {
    Listing,
    Detail,
    Specs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load()?;

    let result = match cli.command {
        Commands::Run {
            pages,
            region,
            radius,
            category,
            output,
            format,
            workers,
        } => {
            if let Some(c) = category {
                settings.category = c;
            }
            if let Some(o) = output {
                settings.output = o;
            }
            if let Some(f) = format {
                settings.sink = f;
            }
            if let Some(w) = workers {
                settings.page_workers = w;
            }
            let pages = pages.unwrap_or(settings.pages);
            let region = region.unwrap_or_else(|| settings.region.clone());
            let radius = radius.unwrap_or(settings.radius);

            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupted, finishing in-flight cards...");
                        cancel.cancel();
                    }
                });
            }

            let pb = ProgressBar::new(pages as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40} {pos}/{len} pages ({msg})")?
                    .progress_chars("=> "),
            );

            println!(
                "Crawling {} pages of {}/{} (radius {} km) into {}...",
                pages,
                region,
                settings.category,
                radius,
                settings.output.display()
            );
            let summary = pipeline::run_crawl(&settings, pages, &region, radius, &cancel, &pb).await;
            pb.finish_and_clear();
            let summary = summary?;

            println!(
                "Pages: {} crawled, {} interrupted, {} abandoned",
                summary.pages_crawled, summary.pages_interrupted, summary.pages_abandoned
            );
            println!(
                "Cards: {} seen, {} saved, {} abandoned",
                summary.cards_seen, summary.cards_persisted, summary.cards_abandoned
            );
            Ok(())
        }
        Commands::Pages {
            pages,
            region,
            radius,
        } => {
            let urls = pagination::page_urls(
                &settings.base_url,
                region.as_deref().unwrap_or(&settings.region),
                &settings.category,
                radius.unwrap_or(settings.radius),
                pages.unwrap_or(settings.pages),
            );
            for url in urls {
                println!("{}", url);
            }
            Ok(())
        }
        Commands::Parse { kind, file, url } => {
            let markup = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let extractors = Extractors::avito(&settings.base_url)?;
            let json = match kind {
                PageKind::Listing => {
                    serde_json::to_string_pretty(&extractors.listing.extract_card_urls(&markup))?
                }
                PageKind::Detail => {
                    let page = extractors.detail.extract_detail(&markup, &url)?;
                    serde_json::to_string_pretty(&serde_json::json!({
                        "record": page.record,
                        "specs_url": page.specs_url,
                    }))?
                }
                PageKind::Specs => {
                    serde_json::to_string_pretty(&extractors.specs.extract_specs(&markup))?
                }
            };
            println!("{}", json);
            Ok(())
        }
        Commands::Stats { output, top } => {
            let path = output.unwrap_or_else(|| settings.output.clone());
            anyhow::ensure!(path.exists(), "No output at {}. Run 'run' first.", path.display());
            let conn = db::connect(&path)?;
            let s = db::get_stats(&conn, top)?;
            println!("Records:    {}", s.total);
            println!("With specs: {}", s.with_specs);
            println!("Brands:     {}", s.brands);
            if let (Some(first), Some(last)) = (&s.first_scraped, &s.last_scraped) {
                println!("Scraped:    {} .. {}", first, last);
            }
            if !s.top_brands.is_empty() {
                println!("\n{:>3} | {:<20} | {:>6}", "#", "Brand", "Cards");
                println!("{}", "-".repeat(35));
                for (i, (brand, n)) in s.top_brands.iter().enumerate() {
                    println!("{:>3} | {:<20} | {:>6}", i + 1, truncate(brand, 20), n);
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
