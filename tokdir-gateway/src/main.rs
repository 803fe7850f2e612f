use envconfig::Envconfig;
use tokdir_directory::DirectoryConfig;
use tokdir_gateway::{Config, start_server};

fn main() {
    let cpus = num_cpus::get();
    let worker_threads = std::cmp::max(1, cpus);
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to build tokio runtime: {e}");
            std::process::exit(1);
        }
    };
    runtime.block_on(async { start().await });
}

async fn start() {
    let loaded = Config::init_from_env()
        .and_then(|conf| Ok((conf, DirectoryConfig::init_from_env()?)));
    match loaded {
        Ok((conf, directory_conf)) => {
            if let Err(e) = start_server(conf, directory_conf).await {
                eprintln!("Error starting server: {e}");
                tracing::error!("Error starting server: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Failed to load config from env: {e}");
            std::process::exit(1);
        }
    }
}
