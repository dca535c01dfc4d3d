//! Prints the entities held in a server's store.
//!
//! The per-entity records are always listed. `--snapshot` also summarises the
//! last saved map snapshot. The server must not be running against the same
//! path, since the store takes an exclusive lock.

use clap::Parser;
use server::config::StoreConfig;
use server::persistence::{PersistenceGateway, SNAPSHOT_KEY};
use shared::Entity;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path of the on-disk store
    #[arg(long, default_value = "proximity-db")]
    db: PathBuf,

    /// Also list the contents of the map snapshot
    #[arg(long)]
    snapshot: bool,
}

fn print_entities(entities: &[Entity]) {
    for entity in entities {
        println!("ID: {}, X: {}, Y: {}", entity.id, entity.x, entity.y);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let gateway = PersistenceGateway::open(&StoreConfig::Sled(args.db))?;

    let records = gateway.load_entity_records()?;
    print_entities(&records);
    println!("{} entity records", records.len());

    if args.snapshot {
        match gateway.load_snapshot()? {
            Some(mut entities) => {
                entities.sort_by_key(|entity| entity.id);
                println!("--- {} ---", SNAPSHOT_KEY);
                print_entities(&entities);
                println!("{} entities in snapshot", entities.len());
            }
            None => println!("No map snapshot stored"),
        }
    }

    Ok(())
}
