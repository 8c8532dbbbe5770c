use std::path::PathBuf;

use tracing_subscriber::Layer as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use easel::{AppState, Env, ImageStore, ProviderRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut listen = "127.0.0.1:8080".to_string();
    let mut db_path: Option<PathBuf> = None;
    let mut image_dir: Option<PathBuf> = None;
    let mut dotenv_path: Option<PathBuf> = None;
    let mut json_logs = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--listen" | "--addr" => {
                listen = args.next().ok_or("missing value for --listen/--addr")?;
            }
            "--db" => {
                db_path = Some(args.next().ok_or("missing value for --db")?.into());
            }
            "--images-dir" => {
                image_dir = Some(args.next().ok_or("missing value for --images-dir")?.into());
            }
            "--dotenv" => {
                dotenv_path = Some(args.next().ok_or("missing value for --dotenv")?.into());
            }
            "--json-logs" => {
                json_logs = true;
            }
            other => {
                return Err(format!(
                    "unknown argument '{other}'; usage: easel-server [--listen HOST:PORT] [--db PATH] [--images-dir PATH] [--dotenv PATH] [--json-logs]"
                )
                .into());
            }
        }
    }

    init_tracing(json_logs)?;

    let env = match dotenv_path {
        Some(path) => Env::parse_dotenv(&std::fs::read_to_string(path)?),
        None => Env::default(),
    };

    let db_path = db_path
        .or_else(|| env.get("IMAGE_STORE_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("data/images.db"));
    let image_dir = image_dir
        .or_else(|| env.get("IMAGE_STORE_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("data/images"));

    let store = ImageStore::new(db_path, image_dir);
    store.init().await?;

    let state = AppState::new(ProviderRegistry::new(), store, env);
    let app = easel::router(state);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(%listen, "easel server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing(json_logs: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = if json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}
