use crate::args::GlobalArgs;
use anyhow::{Context, Result};
use libblobcache::{BlobCacher, RegistryPuller};
use std::{fs, path::PathBuf, sync::Arc, time::Duration};

static CACHE_PATH: &str = "/var/lib/lazypull/blobs";

#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub insecure: bool,
    pub timeout: Duration,
}

impl Config {
    pub fn from_args(args: &GlobalArgs) -> Result<Self> {
        let cache_dir = match &args.cache_dir {
            Some(dir) => dir.clone(),
            None => default_cache_dir()?,
        };
        Ok(Self {
            cache_dir,
            insecure: args.insecure,
            timeout: Duration::from_secs(args.timeout_secs),
        })
    }

    /// Creates the cache directory if needed and opens a cacher pulling from
    /// OCI registries.
    pub async fn open_cacher(&self) -> Result<Arc<BlobCacher>> {
        fs::create_dir_all(&self.cache_dir).with_context(|| {
            format!("Failed to create cache directory at {:?}", self.cache_dir)
        })?;
        let puller = RegistryPuller::new(self.insecure, self.timeout)
            .context("Failed to build registry client")?;
        let cacher = BlobCacher::new(&self.cache_dir, Arc::new(puller))
            .await
            .with_context(|| format!("Failed to open blob cache at {:?}", self.cache_dir))?;
        Ok(Arc::new(cacher))
    }
}

fn default_cache_dir() -> Result<PathBuf> {
    if nix::unistd::getuid().is_root() {
        Ok(PathBuf::from(CACHE_PATH))
    } else {
        let data_dir = dirs::data_dir().context("Failed to get user data directory")?;
        Ok(data_dir.join("lazypull").join("blobs"))
    }
}
