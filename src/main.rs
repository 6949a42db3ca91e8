//! Harvester entry point.
//!
//! Runs one link with the given offset/depth/failures. If a self URL is
//! configured the next link is POSTed there and this process exits;
//! otherwise the chain is driven in-process, link after link, until it
//! finishes or hits the depth limit.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use nwis_harvester::config::HarvestConfig;
use nwis_harvester::harvest::FeedWorker;
use nwis_harvester::ingest::nwis::NwisClient;
use nwis_harvester::logging::{DataSource, init_logging};
use nwis_harvester::model::HarvestError;
use nwis_harvester::pipeline::{
    Continuer, Harvester, HttpContinuer, LinkRequest, LinkSettings, LinkStatus, LocalContinuer,
};
use nwis_harvester::store::postgres::PgCacheStore;
use nwis_harvester::store::{CacheStore, MemoryCacheStore};
use nwis_harvester::units::{all_unit_codes, find_unit};

#[derive(Parser, Debug)]
#[command(name = "nwis_harvester", version, about = "Time-budgeted NWIS harvest chain")]
struct Args {
    /// Position in the unit universe to resume from.
    #[arg(long, default_value_t = 0)]
    offset: usize,

    /// Continuation hops so far.
    #[arg(long, default_value_t = 0)]
    depth: u32,

    /// Units to retry, comma separated.
    #[arg(long, value_delimiter = ',')]
    failed: Vec<String>,

    /// Configuration file.
    #[arg(long, default_value = "harvest.toml")]
    config: PathBuf,

    /// Only harvest these units (comma separated) instead of every state.
    #[arg(long, value_delimiter = ',')]
    units: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match HarvestConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging.level, config.logging.file.as_deref(), config.logging.timestamps) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(args, config).await {
        Ok(LinkStatus::Error) => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(source = %DataSource::System, "{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, config: HarvestConfig) -> Result<LinkStatus, HarvestError> {
    let store: Arc<dyn CacheStore> = match &config.store.database_url {
        Some(url) => Arc::new(PgCacheStore::connect(url, &config.store.key).await?),
        None => {
            warn!(source = %DataSource::Store, "no DATABASE_URL, snapshot kept in memory only");
            Arc::new(MemoryCacheStore::new())
        }
    };

    let client = NwisClient::new(&config.nwis)?;
    let fetcher = Arc::new(FeedWorker::new(Arc::new(client), config.nwis.feeds.clone()));

    let universe = if args.units.is_empty() { all_unit_codes() } else { args.units };
    for code in universe.iter().filter(|c| find_unit(c).is_none()) {
        warn!(source = %DataSource::System, unit = %code, "not a known state code, NWIS will likely reject it");
    }
    let settings = LinkSettings::from_config(&config);
    let first = LinkRequest { offset: args.offset, depth: args.depth, failed_units: args.failed };

    info!(
        source = %DataSource::System,
        units = universe.len(),
        offset = first.offset,
        depth = first.depth,
        "starting link"
    );

    if let Some(url) = &config.continuation.self_url {
        let continuer: Arc<dyn Continuer> = Arc::new(HttpContinuer::new(url.clone(), &config.continuation)?);
        let harvester = Harvester::new(universe, fetcher, store, continuer, settings);
        let response = harvester.run_link(first).await;
        print_response(&response)?;
        return Ok(response.status);
    }

    // No self URL: drive the chain here, one link at a time.
    let (local, mut next_links) = LocalContinuer::channel();
    let harvester = Harvester::new(universe, fetcher, store, Arc::new(local), settings);

    let mut request = first;
    loop {
        let response = harvester.run_link(request).await;
        print_response(&response)?;
        match next_links.try_recv() {
            Ok(next) => request = next,
            Err(_) => return Ok(response.status),
        }
    }
}

fn print_response(response: &nwis_harvester::pipeline::LinkResponse) -> Result<(), HarvestError> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}
