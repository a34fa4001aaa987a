use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use serde_json::Value;
use tuple_store::{sdk, SafeStrTuple, StoreParams};

#[derive(Parser)]
#[command(author, version, about = "Inspect and edit a Tuple Store", long_about = None)]
struct Cli {
    /// Local data directory (staging directory when an object server is used).
    #[arg(short, long, env = "TUPLE_STORE_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// JSON file with store parameters, as printed by `params`.
    #[arg(long)]
    params: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Keys are written as `a/b/c`.
#[derive(Subcommand, Clone)]
enum Commands {
    Get { key: SafeStrTuple },
    Set { key: SafeStrTuple, value: String },
    Del { key: SafeStrTuple },
    Keys,
    Len,
    Oldest { n: Option<usize> },
    Newest { n: Option<usize> },
    Sample { n: usize },
    Clear,
    /// Prints the parameters that rebuild this store.
    Params,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let store = match &cli.params {
        Some(path) => sdk::open(StoreParams::from_json_file(path)?).await?,
        None => sdk::from_env(&cli.data_dir).await?,
    };

    match cli.command {
        Commands::Get { key } => {
            let val = store.get(&key).await?;
            println!("{}", serde_json::to_string_pretty(&val)?);
        }
        Commands::Set { key, value } => {
            let val: Value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            store.set(&key, val).await?;
            println!("OK");
        }
        Commands::Del { key } => {
            store.delete(&key).await?;
            println!("OK");
        }
        Commands::Keys => {
            let mut keys = store.keys();
            while let Some(key) = keys.try_next().await? {
                println!("{}", key);
            }
        }
        Commands::Len => {
            println!("{}", store.len().await?);
        }
        Commands::Oldest { n } => print_keys(&store.oldest_keys(n).await?),
        Commands::Newest { n } => print_keys(&store.newest_keys(n).await?),
        Commands::Sample { n } => print_keys(&store.random_sample(n).await?),
        Commands::Clear => {
            store.clear().await?;
            println!("OK");
        }
        Commands::Params => {
            println!("{}", store.params().to_json()?);
        }
    }

    Ok(())
}

fn print_keys(keys: &[SafeStrTuple]) {
    for key in keys {
        println!("{}", key);
    }
}
