use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use respkv::{
    cli::{Cli, Command},
    client::Client,
    server::{Server, ServerConfig},
};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            // Bind failure is the only fatal startup error.
            let listener = TcpListener::bind(args.listen).await?;
            let server = Server::new(listener, ServerConfig::default());
            info!("server listening on {}", server.local_addr()?);
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("server exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Set(args) => {
            let mut client = Client::connect(args.server.addr).await?;
            client.set(args.key, args.value).await?;
            println!("OK");
        }
        Command::Get(args) => {
            let mut client = Client::connect(args.server.addr).await?;
            match client.get(args.key).await? {
                Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                None => println!("(nil)"),
            }
        }
        Command::Del(args) => {
            let mut client = Client::connect(args.server.addr).await?;
            let removed = client.del(args.key).await?;
            println!("{}", u8::from(removed));
        }
    }

    Ok(())
}
