use crate::commands::normalize_image;
use crate::config::Config;
use anyhow::{Context, Result, bail};
use clap::Args;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use libblobcache::{BlobCacher, CacheStatsSnapshot, Digest, Manifest};
use oci_spec::image::{Descriptor, ImageIndex};
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct PrefetchArgs {
    /// Image reference, e.g. `alpine:3.20` or `ghcr.io/org/app@sha256:...`
    pub image: String,

    /// Number of blobs pulled in parallel
    #[arg(short, long, default_value_t = 4)]
    pub jobs: usize,
}

pub async fn run(config: &Config, args: PrefetchArgs) -> Result<()> {
    let cacher = config.open_cacher().await?;
    let stats = prefetch(cacher, &args.image, args.jobs).await?;
    println!("Prefetched {}: {}", args.image, stats);
    Ok(())
}

/// Pulls the config and layer blobs of `image`. Blobs already in the cache
/// are not pulled again.
pub async fn prefetch(
    cacher: Arc<BlobCacher>,
    image: &str,
    jobs: usize,
) -> Result<CacheStatsSnapshot> {
    let (image, digests) = resolve_blobs(&cacher, image).await?;
    let total = digests.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::with_template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")?
            .progress_chars("#>-"),
    );
    pb.set_message(image.clone());

    let results = futures::stream::iter(digests)
        .map(|digest| {
            let cacher = cacher.clone();
            let image = image.clone();
            let pb = pb.clone();
            async move {
                let result = cacher.ensure_cached(&image, &digest).await;
                pb.inc(1);
                result.map_err(|e| (digest, e))
            }
        })
        .buffer_unordered(jobs.max(1))
        .collect::<Vec<_>>()
        .await;
    pb.finish_and_clear();

    let failures = results
        .into_iter()
        .filter_map(|r| r.err())
        .collect::<Vec<_>>();
    if let Some((digest, err)) = failures.first() {
        bail!(
            "Failed to prefetch {} of {} blobs of {}, first failure {}: {}",
            failures.len(),
            total,
            image,
            digest,
            err
        );
    }
    Ok(cacher.stats())
}

/// Resolves `image` to a single-platform manifest and lists the blobs it
/// references, config first. Returns the canonical image reference alongside.
pub async fn resolve_blobs(cacher: &BlobCacher, image: &str) -> Result<(String, Vec<Digest>)> {
    let reference = normalize_image(image)?;
    let image = reference.to_string();

    let manifest = match pull_manifest(cacher, &image).await? {
        Manifest::Image(manifest) => manifest,
        Manifest::Index(index) => {
            let entry = select_platform(&index)?;
            let pinned = reference
                .with_reference(entry.digest().to_string())
                .to_string();
            match pull_manifest(cacher, &pinned).await? {
                Manifest::Image(manifest) => manifest,
                Manifest::Index(_) => bail!("Nested image index at {pinned}"),
            }
        }
    };

    let mut digests: Vec<Digest> = Vec::with_capacity(manifest.layers().len() + 1);
    for descriptor in std::iter::once(manifest.config()).chain(manifest.layers().iter()) {
        let digest = to_digest(descriptor)?;
        if !digests.contains(&digest) {
            digests.push(digest);
        }
    }
    Ok((image, digests))
}

async fn pull_manifest(cacher: &BlobCacher, image: &str) -> Result<Manifest> {
    cacher
        .pull_manifest(image)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("Failed to pull manifest of {image}"))
}

fn to_digest(descriptor: &Descriptor) -> Result<Digest> {
    let digest = descriptor.digest().to_string();
    digest
        .parse()
        .with_context(|| format!("Unsupported blob digest `{digest}`"))
}

fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        arch => arch,
    }
}

fn select_platform(index: &ImageIndex) -> Result<&Descriptor> {
    let arch = host_arch();
    index
        .manifests()
        .iter()
        .find(|entry| {
            let Some(platform) = entry.platform() else {
                return false;
            };
            let Ok(platform) = serde_json::to_value(platform) else {
                return false;
            };
            platform["os"] == "linux" && platform["architecture"] == arch
        })
        .with_context(|| format!("No linux/{arch} manifest in image index"))
}
