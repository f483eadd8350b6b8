use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use tracing::info;

use imgload::config::megabytes_to_bytes;
use imgload::scanner::{self, ScanConfig};
use imgload::{DecodedImage, Destination, ImageLoader, LoaderConfig, OrderPolicy, SizeHints};

const USAGE: &str = "usage: imgload <root> [--workers N] [--fifo|--lifo] [--target WxH] \
                     [--max WxH] [--memory-mb M]";

/// How long the delivery loop waits for a single completion.
const DELIVERY_POLL: Duration = Duration::from_millis(50);

struct Args {
    root: PathBuf,
    config: LoaderConfig,
    hints: SizeHints,
}

fn parse_dimensions(flag: &str, value: &str) -> Result<(i32, i32)> {
    let (w, h) = value
        .split_once('x')
        .with_context(|| format!("Expected {} as WIDTHxHEIGHT", flag))?;
    Ok((
        w.parse::<i32>()
            .with_context(|| format!("Failed to parse {} width", flag))?,
        h.parse::<i32>()
            .with_context(|| format!("Failed to parse {} height", flag))?,
    ))
}

fn parse_args() -> Result<Args> {
    let mut root: Option<PathBuf> = None;
    let mut config = LoaderConfig::from_env();
    let mut target = (0, 0);
    let mut max: Option<(i32, i32)> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--workers" => {
                let value = args.next().context("Missing value for --workers")?;
                config.workers = value
                    .parse::<usize>()
                    .context("Failed to parse --workers as a positive integer")?;
            }
            "--fifo" => config.policy = OrderPolicy::Fifo,
            "--lifo" => config.policy = OrderPolicy::Lifo,
            "--target" => {
                let value = args.next().context("Missing value for --target")?;
                target = parse_dimensions("--target", &value)?;
            }
            "--max" => {
                let value = args.next().context("Missing value for --max")?;
                max = Some(parse_dimensions("--max", &value)?);
            }
            "--memory-mb" => {
                let value = args.next().context("Missing value for --memory-mb")?;
                let mb = value
                    .parse::<usize>()
                    .context("Failed to parse --memory-mb as a positive integer")?;
                config.memory_budget_bytes =
                    megabytes_to_bytes(mb).context("--memory-mb is too large")?;
            }
            "-h" | "--help" => bail!(USAGE),
            _ if !arg.starts_with('-') && root.is_none() => root = Some(PathBuf::from(arg)),
            _ => bail!("Unknown argument: {}\n{}", arg, USAGE),
        }
    }

    // Console slots have no layout; an unknown target falls back to the cap, then the display.
    let mut hints = SizeHints::explicit(target.0, target.1);
    if let Some((w, h)) = max {
        hints = hints.with_max(w, h);
    }

    Ok(Args {
        root: root.context(USAGE)?,
        config,
        hints,
    })
}

/// A destination that records what it was given.
struct ConsoleSlot {
    tag: String,
    hints: SizeHints,
    shown: Mutex<Option<(u32, u32)>>,
}

impl Destination for ConsoleSlot {
    fn identity_tag(&self) -> String {
        self.tag.clone()
    }

    fn target_size(&self) -> (i32, i32) {
        self.hints.hint()
    }

    fn apply_decoded_image(&self, image: DecodedImage) {
        *self.shown.lock() = Some(image.dimensions());
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("imgload=info".parse()?),
        )
        .init();

    let args = parse_args()?;

    let Some(directory) = scanner::densest_directory(&args.root, &ScanConfig::default())? else {
        info!(root = ?args.root, "No images found");
        return Ok(());
    };
    info!(path = ?directory.path, images = directory.len(), "Loading images");

    let loader = ImageLoader::new(args.config)?;
    let mut deliveries = loader
        .take_deliveries()
        .context("Delivery consumer already taken")?;

    let slots: Vec<Arc<ConsoleSlot>> = directory
        .resource_ids()
        .into_iter()
        .map(|tag| {
            Arc::new(ConsoleSlot {
                tag,
                hints: args.hints,
                shown: Mutex::new(None),
            })
        })
        .collect();

    for slot in &slots {
        loader.request_load(&slot.tag, slot.clone());
    }

    // Act as the consumer context until every load has settled.
    while !loader.is_idle() || deliveries.pending() > 0 {
        deliveries.recv_timeout(DELIVERY_POLL);
    }

    for slot in &slots {
        match *slot.shown.lock() {
            Some((w, h)) => info!(resource = %slot.tag, width = w, height = h, "Loaded"),
            None => info!(resource = %slot.tag, "Not loaded"),
        }
    }

    let stats = loader.stats();
    info!(
        workers = stats.workers,
        policy = %loader.policy(),
        completed = stats.completed,
        failed = stats.failed,
        peak_in_flight = stats.peak_in_flight,
        applied = deliveries.applied_count(),
        stale = deliveries.stale_count(),
        cache_bytes = loader.cache().size_bytes(),
        "Finished"
    );

    Ok(())
}
