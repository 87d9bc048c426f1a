use crate::commands::{cat::CatArgs, prefetch::PrefetchArgs, stat::StatArgs};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "lazypull",
    version,
    about = "Pull OCI image blobs on demand into a local content-addressable cache"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Blob cache root directory
    #[arg(long, global = true, env = "LAZYPULL_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Talk to the registry over plain HTTP
    #[arg(long, global = true, env = "LAZYPULL_INSECURE")]
    pub insecure: bool,

    /// Registry connect timeout in seconds
    #[arg(
        long,
        global = true,
        env = "LAZYPULL_TIMEOUT_SECS",
        default_value_t = 30
    )]
    pub timeout_secs: u64,

    /// Turn verbose logging on
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pull the config and every layer blob of an image into the cache
    Prefetch(PrefetchArgs),
    /// Lazily read a byte range of a blob and write it to stdout
    Cat(CatArgs),
    /// Print file attributes of a resource list without pulling any content
    Stat(StatArgs),
}
