// scour-node: exercise the replica scrubber end to end.
//
// Seeds a store, runs the scour command, and prints the resulting health
// log. With --replica it also builds a second node from the same data
// (optionally with one divergent document), replays the published batch
// records against it, and reports digest mismatches the way a secondary's
// applier would.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;

use scour_store::{
    hash_batch, run_scour_command, Catalog, CheckRecord, CollectionOptions, FileOplog, IndexSpec,
    Namespace, NodeState, RecordKey, WriteLog,
};

#[derive(Parser)]
#[command(name = "scour-node", about = "Replicated store consistency scrub demo")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seed collections, scrub them, and print the health log.
    Demo {
        /// Database name to seed.
        #[arg(long, default_value = "app")]
        db: String,
        /// Number of collections to seed.
        #[arg(long, default_value_t = 3)]
        collections: usize,
        /// Documents per collection.
        #[arg(long, default_value_t = 500)]
        docs: u64,
        /// Persist the store and oplog under this directory instead of
        /// running in memory.
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Replay the published batches against a second replica.
        #[arg(long)]
        replica: bool,
        /// Plant one divergent document on the replica before replaying.
        #[arg(long)]
        divergent: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Demo {
            db,
            collections,
            docs,
            data_dir,
            replica,
            divergent,
        } => run_demo(&db, collections, docs, data_dir, replica || divergent, divergent),
    }
}

fn run_demo(
    db: &str,
    collections: usize,
    docs: u64,
    data_dir: Option<PathBuf>,
    replica: bool,
    divergent: bool,
) -> anyhow::Result<()> {
    let state = match &data_dir {
        Some(dir) => {
            let catalog = Catalog::open_disk(dir.join("storage")).context("open catalog")?;
            let oplog = FileOplog::open_dir(dir.join("oplog")).context("open oplog")?;
            NodeState::new(
                Arc::new(catalog),
                Arc::new(oplog),
                Arc::new(scour_store::HealthLog::new()),
                Arc::new(scour_store::ReplicationCoordinator::new_primary()),
                Arc::new(scour_store::AllowAll),
            )
        }
        None => NodeState::in_memory(),
    };

    seed(&state.catalog, db, collections, docs, None).context("seed primary")?;
    tracing::info!(db, collections, docs, "seeded primary");

    let launch = run_scour_command(&state, db, &json!({ "scour": 1 }));
    if !launch.response.ok {
        anyhow::bail!(
            "scour command rejected: {}",
            launch.response.err.unwrap_or_default()
        );
    }
    let Some(job) = launch.job else {
        anyhow::bail!("scour command replied ok without launching a worker");
    };
    job.join().context("scrub worker")?;

    println!("{}", state.health.export_json().context("export health log")?);

    let records = state.oplog.read_all().context("read oplog")?;
    tracing::info!(records = records.len(), "records published to the write log");

    if replica {
        let replica_catalog = Catalog::in_memory();
        let divergence = divergent.then(|| (collections / 2, docs / 2));
        seed(&replica_catalog, db, collections, docs, divergence).context("seed replica")?;

        let mut mismatches = 0usize;
        for entry in &records {
            let CheckRecord::Batch {
                nss,
                md5,
                min_key,
                max_key,
            } = &entry.record
            else {
                continue;
            };
            let outcome = replay_batch(&replica_catalog, nss, min_key, max_key)?;
            if outcome != *md5 {
                mismatches += 1;
                println!(
                    "digest mismatch on {nss} [{min_key}, {max_key}]: primary {md5}, replica {outcome}"
                );
            }
        }
        if mismatches == 0 {
            println!("replica digests match across {} batch records", records.len());
        } else {
            println!("{mismatches} divergent batch(es) detected");
        }
    }

    Ok(())
}

/// Re-run one published batch on another node's data, as a secondary would.
fn replay_batch(
    catalog: &Catalog,
    nss: &Namespace,
    min_key: &RecordKey,
    max_key: &RecordKey,
) -> anyhow::Result<String> {
    let collection = catalog
        .get(nss)
        .with_context(|| format!("replica is missing {nss}"))?;
    let stats = hash_batch(&collection, min_key, max_key, u64::MAX, u64::MAX)
        .map_err(|err| anyhow::anyhow!("replay hash failed: {err}"))?;
    Ok(stats.md5)
}

fn seed(
    catalog: &Catalog,
    db: &str,
    collections: usize,
    docs: u64,
    divergence: Option<(usize, u64)>,
) -> anyhow::Result<()> {
    for c in 0..collections {
        let ns = Namespace::new(db, format!("c{c}"));
        let coll = catalog.create_collection(
            ns,
            CollectionOptions::default(),
            vec![IndexSpec::primary()],
        )?;
        for i in 0..docs {
            let mut body = json!({ "seq": i, "payload": format!("payload-{c}-{i}") });
            if divergence == Some((c, i)) {
                body["payload"] = json!("divergent");
            }
            coll.insert(
                format!("k{i:08}").into_bytes(),
                serde_json::to_vec(&body)?,
            )?;
        }
    }
    Ok(())
}
