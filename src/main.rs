mod classify;
mod config;
mod http;
mod images;
mod merge;
mod metrics;
mod models;
mod odoo;
mod publish;
mod scrape;
mod store;

use clap::{ArgAction, Args, Parser, Subcommand};
use config::Settings;
use eyre::WrapErr;
use images::{HttpImageFetcher, ImageCache, ImagePipeline};
use odoo::{OdooClient, ReferenceCache};
use publish::{PublishOptions, Publisher};
use reqwest::Client;
use scrape::{Browser, ScrapeOptions, WebDriverBrowser};
use std::path::PathBuf;
use tracing::{Instrument, info, info_span, warn};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

/// Mirrors a seller's marketplace listings into the Odoo product catalog.
#[derive(Parser, Debug)]
#[command(name = "lbc-sync", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape the seller profile and refresh the local snapshot.
    Scrape,
    /// Push the local snapshot to the catalog.
    Publish(PublishArgs),
    /// Scrape, then publish.
    Sync(PublishArgs),
}

#[derive(Args, Debug, Clone)]
struct PublishArgs {
    /// Leave products that already exist in the catalog untouched
    #[arg(long)]
    no_overwrite_products: bool,

    #[arg(
        long,
        env = "LBC_OVERWRITE_PRODUCTS",
        default_value_t = true,
        action = ArgAction::Set,
        hide = true
    )]
    overwrite_products: bool,

    /// Rewrite gallery images that already exist in the catalog
    #[arg(long, env = "LBC_OVERWRITE_IMAGES")]
    overwrite_images: bool,

    /// Directory holding downloaded photos and resized variants
    #[arg(long, env = "LBC_IMAGES_DIR", default_value = "images")]
    images_dir: PathBuf,
}

impl PublishArgs {
    fn options(&self, settings: &Settings) -> PublishOptions {
        PublishOptions {
            overwrite_products: self.overwrite_products && !self.no_overwrite_products,
            overwrite_images: self.overwrite_images,
            tax_name: settings.tax_name.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::from_env().wrap_err("configuration incomplete")?;
    let http = http::build_client();

    let span = info_span!("run", run_id = %Uuid::new_v4());
    async move {
        match cli.command {
            Command::Scrape => run_scrape(&settings, &http).await,
            Command::Publish(args) => run_publish(&settings, &http, &args).await,
            Command::Sync(args) => {
                run_scrape(&settings, &http).await?;
                run_publish(&settings, &http, &args).await
            }
        }
    }
    .instrument(span)
    .await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

async fn run_scrape(settings: &Settings, http: &Client) -> eyre::Result<()> {
    let browser = WebDriverBrowser::start(
        http.clone(),
        &settings.webdriver_url,
        scrape::webdriver::CHROME_ARGS,
    )
    .await
    .wrap_err_with(|| format!("cannot open a browser session at {}", settings.webdriver_url))?;

    let result = scrape_into_snapshot(&browser, settings).await;
    if let Err(err) = browser.quit().await {
        warn!(target = "lbc.scrape", error = %err, "webdriver_quit_failed");
    }
    result
}

async fn scrape_into_snapshot<B: Browser + ?Sized>(
    browser: &B,
    settings: &Settings,
) -> eyre::Result<()> {
    let _timer = metrics::StageTimer::start("scrape");
    let path = settings.snapshot_path();
    let stored = store::load_or_default(&path).await?;
    let options = ScrapeOptions::new(settings.marketplace_url.as_str());

    info!(
        target = "lbc.scrape",
        identifier = %settings.leboncoin_identifier,
        stored = stored.len(),
        "profile_scrape_started"
    );
    let scraped = scrape::scrape_profile(browser, &options, &settings.leboncoin_identifier)
        .await
        .wrap_err("profile scrape failed")?;

    let mut listings = merge::merge(stored, scraped);
    scrape::scrape_details(browser, &options, &mut listings).await;
    store::save(&path, &mut listings).await?;

    info!(
        target = "lbc.scrape",
        path = %path.display(),
        listings = listings.len(),
        "snapshot_saved"
    );
    Ok(())
}

async fn run_publish(settings: &Settings, http: &Client, args: &PublishArgs) -> eyre::Result<()> {
    let _timer = metrics::StageTimer::start("publish");
    let listings = store::load(&settings.snapshot_path()).await?;

    let cache = ImageCache::open(args.images_dir.clone()).await?;
    let pipeline = ImagePipeline::new(cache, HttpImageFetcher::new(http.clone()));
    let catalog = OdooClient::from_settings(settings, http.clone());

    info!(
        target = "lbc.publish",
        username = %settings.odoo_username,
        database = %settings.odoo_database,
        images_dir = %pipeline.cache().dir().display(),
        listings = listings.len(),
        "publish_started"
    );

    let mut publisher = Publisher::new(
        &catalog,
        &pipeline,
        ReferenceCache::new(),
        args.options(settings),
    );
    let summary = publisher
        .publish_all(&listings)
        .await
        .wrap_err("catalog rejected the credentials")?;

    if summary.failed > 0 {
        warn!(
            target = "lbc.publish",
            failed = summary.failed,
            "some listings were not published; they are retried on the next run"
        );
    }
    Ok(())
}
