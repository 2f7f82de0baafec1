use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::info;

use tuonella_groupsort::codec::{DelimitedFileSource, FieldOrder, LineRecord};
use tuonella_groupsort::constants::BYTES_PER_GB;
use tuonella_groupsort::grouping::sanitize_key;
use tuonella_groupsort::logging::setup_logging;
use tuonella_groupsort::{ChunkBudget, GroupSortConfig, GroupSortStats, GroupedSort, ShutdownSignal};

#[derive(Parser, Debug, Clone)]
#[command(name = "tuonella-groupsort")]
#[command(about = "🧹 Tuonella Groupsort - split a delimited file into sorted per-key groups")]
#[command(version)]
struct Args {
    #[arg(short, long, help = "Input delimited file")]
    input: PathBuf,

    #[arg(short, long, help = "Output directory, one file per group")]
    output: PathBuf,

    #[arg(short, long, default_value = "groupsort_config.json", help = "Configuration file")]
    config: PathBuf,

    #[arg(short = 'k', long, help = "Zero-based column holding the group key")]
    key_column: usize,

    #[arg(
        short = 's',
        long,
        help = "Zero-based column to sort each group by (raw line order if omitted)"
    )]
    sort_column: Option<usize>,

    #[arg(long, help = "Compare the sort column as a number")]
    numeric: bool,

    #[arg(long, help = "Sort descending")]
    descending: bool,

    #[arg(long, help = "Input has a header line")]
    header: bool,

    #[arg(long, help = "Override the chunk budget with a line count")]
    chunk_lines: Option<usize>,

    #[arg(long, help = "Write run statistics as JSON to this file")]
    stats_json: Option<PathBuf>,

    #[arg(short, long, help = "Verbose output")]
    verbose: bool,
}

/// A row of arbitrary width, all columns as text.
#[derive(Debug, Default, Clone, PartialEq)]
struct TextRow {
    fields: Vec<String>,
}

impl LineRecord for TextRow {
    fn field_order() -> &'static FieldOrder<Self> {
        static ORDER: OnceLock<FieldOrder<TextRow>> = OnceLock::new();
        ORDER.get_or_init(|| {
            FieldOrder::<TextRow>::builder()
                .rest("fields", |r| r.fields.as_slice(), |r, v| r.fields = v)
                .build()
        })
    }
}

impl TextRow {
    fn column(&self, index: usize) -> Result<&str> {
        self.fields
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| {
                anyhow!("row has {} columns, column {} requested", self.fields.len(), index)
            })
    }
}

fn compare_rows(a: &TextRow, b: &TextRow, column: usize, numeric: bool) -> Result<Ordering> {
    let (left, right) = (a.column(column)?, b.column(column)?);
    if !numeric {
        return Ok(left.cmp(right));
    }

    let left: f64 = left
        .trim()
        .parse()
        .with_context(|| format!("not a number: {:?}", left))?;
    let right: f64 = right
        .trim()
        .parse()
        .with_context(|| format!("not a number: {:?}", right))?;
    left.partial_cmp(&right)
        .ok_or_else(|| anyhow!("cannot order {} and {}", left, right))
}

fn run_pipeline(
    args: Args,
    config: GroupSortConfig,
    shutdown: ShutdownSignal,
) -> Result<GroupSortStats> {
    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory {}", args.output.display()))?;

    let key_column = args.key_column;
    let mut grouped = GroupedSort::<TextRow>::new(config.clone())
        .group_by(move |row| row.fields.get(key_column).cloned().unwrap_or_default())
        .with_shutdown_signal(shutdown);

    if let Some(column) = args.sort_column {
        let (numeric, descending) = (args.numeric, args.descending);
        grouped = grouped.sort_by(move |a, b| {
            let ordering = compare_rows(a, b, column, numeric)?;
            Ok(if descending { ordering.reverse() } else { ordering })
        });
    }

    let codec = grouped.codec();
    let source = DelimitedFileSource::open(&args.input, codec, config.sort.io_buffer_size_bytes())?
        .with_header(args.header);

    let output_dir = args.output.clone();
    let mut group_ordinal = 0;
    let stats = grouped.process(source, |key, records| {
        let path = output_dir.join(format!("{:04}_{}.csv", group_ordinal, sanitize_key(key)));
        group_ordinal += 1;
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let mut count = 0;
        for row in records {
            writeln!(writer, "{}", codec.encode(&row))?;
            count += 1;
        }
        writer.flush()?;
        info!("Group '{}': {} rows -> {}", key, count, path.display());
        Ok(())
    })?;

    Ok(stats)
}

fn load_config(args: &Args) -> Result<GroupSortConfig> {
    let mut config = if args.config.exists() {
        GroupSortConfig::from_file(&args.config)?
    } else {
        println!("📄 Config file not found, creating default: {}", args.config.display());
        let default_config = GroupSortConfig::default();
        default_config.to_file(&args.config)?;
        default_config
    };

    if let Some(lines) = args.chunk_lines {
        config = config.with_chunk_budget(ChunkBudget::Lines(lines));
    }
    config.validate()?;
    Ok(config)
}

fn write_stats(path: &Path, stats: &GroupSortStats) -> Result<()> {
    let content = serde_json::to_string_pretty(stats)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write stats {}", path.display()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(if args.verbose { "verbose" } else { "normal" })?;

    println!("🧙 Tuonella Groupsort");
    println!("🔍 Input: {}", args.input.display());
    println!("📝 Output: {}", args.output.display());

    if !args.input.exists() {
        return Err(anyhow!("Input file does not exist: {}", args.input.display()));
    }

    let config = load_config(&args)?;
    let input_size = std::fs::metadata(&args.input)?.len();
    println!("📊 Input size: {:.2} GB", input_size as f64 / BYTES_PER_GB);
    println!("🧠 Chunk budget: {}", config.sort.describe_budget());

    let shutdown = ShutdownSignal::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n🛑 Shutdown signal received. Stopping and cleaning up...");
            signal.request();
        }
    });

    let start_time = Instant::now();
    let stats_path = args.stats_json.clone();
    let stats = tokio::task::spawn_blocking(move || run_pipeline(args, config, shutdown)).await??;
    let total_time = start_time.elapsed();

    println!("\n🎉 Grouping completed successfully! 🎉");
    println!("=======================================");
    println!("📊 Records: {}", stats.records_partitioned);
    println!("🗂️ Groups: {}", stats.groups);
    println!("📦 Runs created: {}", stats.sort.runs_created);
    println!("🔗 Merge levels: {}", stats.sort.merge_levels);
    println!("⏱️ Total time: {:.2}s", total_time.as_secs_f64());

    let throughput = stats.records_partitioned as f64 / total_time.as_secs_f64().max(f64::EPSILON);
    println!("🔄 Throughput: {:.0} records/sec", throughput);

    if let Some(path) = stats_path {
        write_stats(&path, &stats)?;
        println!("💾 Stats written to {}", path.display());
    }

    Ok(())
}
