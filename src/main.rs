//! Shelf Audit - command-line front end
//!
//! Keeps a JSON product catalog, registers reference photos and audits
//! shelf photos against it.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use shelf_audit::catalog::{next_id, CatalogEntry, ProductId};
use shelf_audit::config::{self, AppConfig};
use shelf_audit::recognition::{decide_by_name, label_text};
use shelf_audit::storage::catalog::{load_catalog, save_catalog};
use shelf_audit::storage;
use shelf_audit::{OnnxBackend, ShelfAuditor, VisionBackend};

/// Shelf Audit - recognize products on shelf photos
#[derive(Parser, Debug)]
#[command(name = "shelf-audit")]
#[command(about = "Detect products on shelf photos and decide restocks")]
struct Args {
    /// Configuration file (defaults to <config dir>/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Catalog file (defaults to <data dir>/catalog.json)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a product and register its reference photo
    Add {
        #[arg(long)]
        name: String,
        /// Minimum acceptable on-shelf count
        #[arg(long, default_value = "0")]
        threshold: i32,
        /// Units in the backroom
        #[arg(long, default_value = "0")]
        stock: i32,
        /// Reference photo
        #[arg(long)]
        image: PathBuf,
    },
    /// Recompute the reference descriptor of a product
    Register {
        #[arg(long)]
        id: ProductId,
        /// New reference photo (defaults to the stored one)
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Recognize the products on a shelf photo
    Scan {
        #[arg(long)]
        image: PathBuf,
        /// Where to write the annotated photo
        #[arg(short, long, default_value = "annotated.png")]
        output: PathBuf,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stock decision for a product
    Decide {
        #[arg(long)]
        name: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_app_config(args.config.as_deref())?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let catalog_path = match args.catalog {
        Some(path) => path,
        None => storage::get_data_dir()?.join("catalog.json"),
    };

    match args.command {
        Command::Add {
            name,
            threshold,
            stock,
            image,
        } => add_product(&config, &catalog_path, &name, threshold, stock, image),
        Command::Register { id, image } => register_product(&config, &catalog_path, id, image),
        Command::Scan { image, output, json } => scan_shelf(&config, &catalog_path, &image, &output, json),
        Command::Decide { name } => {
            let catalog = load_catalog(&catalog_path)?;
            match decide_by_name(&catalog, &name) {
                Some(decision) => {
                    println!("{}: {}", name, decision);
                    Ok(())
                }
                None => bail!("No product named '{}' in {:?}", name, catalog_path),
            }
        }
    }
}

/// Load the given configuration file, or the default one (created if missing)
fn load_app_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => config::load_config(path),
        None => config::load_or_create_config(&storage::get_config_dir()?.join("config.toml")),
    }
}

fn auditor(config: &AppConfig) -> Result<ShelfAuditor> {
    let backend: Arc<dyn VisionBackend> = OnnxBackend::shared(config)?;
    Ok(ShelfAuditor::new(backend, config))
}

fn add_product(
    config: &AppConfig,
    catalog_path: &Path,
    name: &str,
    threshold: i32,
    stock: i32,
    image: PathBuf,
) -> Result<()> {
    let mut catalog = load_catalog(catalog_path)?;
    if catalog.iter().any(|e| e.name == name) {
        warn!("A product named '{}' already exists", name);
    }

    let bytes = std::fs::read(&image).with_context(|| format!("Failed to read {:?}", image))?;

    let mut entry = CatalogEntry::new(next_id(&catalog), name, threshold, stock);
    entry.reference_image = Some(image);

    // The entry is kept even when registration fails
    let auditor = auditor(config)?;
    let registered = auditor.register(&mut entry, &bytes).is_ok();

    let id = entry.id;
    catalog.push(entry);
    save_catalog(&catalog, catalog_path)?;

    if registered {
        println!("Added product {} '{}'", id, name);
    } else {
        println!("Added product {} '{}' without a descriptor; retry with `register --id {}`", id, name, id);
    }
    Ok(())
}

fn register_product(config: &AppConfig, catalog_path: &Path, id: ProductId, image: Option<PathBuf>) -> Result<()> {
    let mut catalog = load_catalog(catalog_path)?;
    let Some(entry) = catalog.iter_mut().find(|e| e.id == id) else {
        bail!("No product with id {} in {:?}", id, catalog_path);
    };

    if let Some(image) = image {
        entry.reference_image = Some(image);
    }
    let Some(image) = entry.reference_image.clone() else {
        bail!("Product {} has no reference photo; pass --image", id);
    };

    let bytes = std::fs::read(&image).with_context(|| format!("Failed to read {:?}", image))?;
    let result = auditor(config)?.register(entry, &bytes);

    save_catalog(&catalog, catalog_path)?;

    match result {
        Ok(descriptor) => {
            println!("Registered product {} ({} dimensions)", id, descriptor.dim());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn scan_shelf(config: &AppConfig, catalog_path: &Path, image: &Path, output: &Path, json: bool) -> Result<()> {
    let catalog = load_catalog(catalog_path)?;
    let bytes = std::fs::read(image).with_context(|| format!("Failed to read {:?}", image))?;

    let backend = OnnxBackend::shared(config)?;
    // Model downloads run their own runtime, so load before entering ours
    backend.preload()?;

    let auditor = ShelfAuditor::new(backend, config);
    let timeout = Duration::from_secs(config.matching.scan_timeout_secs);

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    let outcome = rt.block_on(async move {
        let scan = tokio::task::spawn_blocking(move || auditor.scan(&bytes, &catalog));
        match tokio::time::timeout(timeout, scan).await {
            Ok(joined) => joined
                .context("Scan task failed")
                .and_then(|scanned| scanned.map_err(anyhow::Error::from)),
            Err(_) => {
                error!("Scan exceeded {:?}", timeout);
                Err(anyhow::anyhow!("Scan timed out after {:?}", timeout))
            }
        }
    });
    // A timed-out scan keeps its blocking thread; do not wait for it
    rt.shutdown_background();
    let outcome = outcome?;

    std::fs::write(output, outcome.annotated_png()?).with_context(|| format!("Failed to write {:?}", output))?;
    info!("Annotated image written to {:?}", output);

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    for result in &outcome.matches {
        let b = result.bbox;
        println!("[{}, {}, {}, {}] {}", b.x1, b.y1, b.x2, b.y2, label_text(result));
    }
    if outcome.products.is_empty() {
        println!("No catalog products recognized");
    }
    for product in &outcome.products {
        println!("{} x{}", product.name, product.count);
    }
    Ok(())
}
