//! CLI entry point for operating a Trellis store.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use trellis_core::config::StoreConfig;
use trellis_core::types::{GeoPoint, TypeCode};
use trellis_core::Schema;
use trellis_graph::{GraphStore, StoreClient};

#[derive(Parser)]
#[command(name = "trellis-admin")]
#[command(about = "Operator tools for the Trellis graph store")]
struct Cli {
    /// Config file prefix (default: trellis).
    #[arg(short, long, default_value = "trellis")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations.
    Migrate,

    /// Create a root object and print its id.
    RootId {
        #[arg(long)]
        name: String,
    },

    /// Ids indexed under an equality or unique index.
    Lookup {
        #[arg(long = "type")]
        object_type: TypeCode,

        #[arg(long)]
        field: String,

        /// Parsed as JSON when possible, otherwise taken as a string.
        #[arg(long)]
        value: String,
    },

    /// Ranked full-text search.
    Search {
        #[arg(long)]
        index_type: TypeCode,

        #[arg(long)]
        text: String,
    },

    /// Ids within a radius of a point, nearest first.
    Nearby {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Radius in meters.
        #[arg(long)]
        distance: f64,

        #[arg(long, value_delimiter = ',', required = true)]
        types: Vec<TypeCode>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let config = StoreConfig::load(&cli.config)?;

    if let Command::Migrate = cli.command {
        let client = StoreClient::connect(&config.database, config.retry.clone()).await?;
        client.migrate().await?;
        return Ok(());
    }

    // Index lookups and root creation only touch reserved types.
    let schema = Arc::new(Schema::builder().build()?);
    let store = GraphStore::connect(&config, schema).await?;

    let ids: Vec<Uuid> = match cli.command {
        Command::Migrate => Vec::new(),
        Command::RootId { name } => vec![store.generate_root_id(&name).await?],
        Command::Lookup {
            object_type,
            field,
            value,
        } => {
            store
                .lookup_index(object_type, &field, &parse_value(&value))
                .await?
        }
        Command::Search { index_type, text } => store.lookup_text_index(index_type, &text).await?,
        Command::Nearby {
            lat,
            lng,
            distance,
            types,
        } => {
            if lat.abs() > 90.0 || lng.abs() > 180.0 {
                anyhow::bail!("Invalid point: lat must be within ±90 and lng within ±180");
            }
            store
                .lookup_geo_index(GeoPoint::new(lat, lng), &types, distance)
                .await?
        }
    };

    tracing::info!(results = ids.len(), "Done");
    println!("{}", serde_json::to_string(&ids)?);
    Ok(())
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
