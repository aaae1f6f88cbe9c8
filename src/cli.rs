use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the key-value server.
    Serve(ServeArgs),
    /// Store a value under a key on a running server.
    Set(SetArgs),
    /// Fetch the value stored under a key.
    Get(GetArgs),
    /// Remove a key, printing 1 if it was present and 0 otherwise.
    Del(DelArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, default_value = crate::DEFAULT_LISTEN_ADDR)]
    pub listen: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct ServerAddr {
    /// Address of the server to connect to.
    #[arg(long = "server", default_value = crate::DEFAULT_LISTEN_ADDR)]
    pub addr: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct SetArgs {
    #[command(flatten)]
    pub server: ServerAddr,
    pub key: String,
    pub value: String,
}

#[derive(Args, Debug, Clone)]
pub struct GetArgs {
    #[command(flatten)]
    pub server: ServerAddr,
    pub key: String,
}

#[derive(Args, Debug, Clone)]
pub struct DelArgs {
    #[command(flatten)]
    pub server: ServerAddr,
    pub key: String,
}
