use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tuple_store::engine::DirBuckets;
use tuple_store::server::Router;

#[derive(Parser, Debug)]
#[command(author, version, about = "Tuple Store object server", long_about = None)]
struct Args {
    /// Directory holding one subdirectory per bucket.
    #[arg(short, long, env = "TUPLE_STORE_DATA_DIR", default_value = "data")]
    data_dir: String,

    #[arg(short, long, env = "TUPLE_STORE_PORT", default_value = "7001")]
    port: String,

    /// Maximum number of concurrent client connections.
    #[arg(long, default_value_t = 100)]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    std::fs::create_dir_all(&args.data_dir)?;
    let buckets = Arc::new(DirBuckets::new(&args.data_dir));
    let router = Router::new(buckets).with_max_connections(args.max_connections);

    println!("Starting Tuple Store object server...");
    println!("Serving buckets from {}", args.data_dir);
    println!("Listening on :{} (TCP)", args.port);

    tokio::select! {
        res = router.listen(&args.port) => {
            if let Err(e) = res {
                eprintln!("TCP Server failed: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            println!("\nShutdown signal received. Exiting.");
        }
    }

    Ok(())
}
