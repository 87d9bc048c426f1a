pub mod cat;
pub mod prefetch;
pub mod stat;

use anyhow::{Context, Result};
use libblobcache::{Digest, ImageReference};

/// Parses an image reference and renders it in its canonical form.
pub fn normalize_image(image: &str) -> Result<ImageReference> {
    image
        .parse::<ImageReference>()
        .with_context(|| format!("Invalid image reference `{image}`"))
}

pub fn parse_digest(digest: &str) -> Result<Digest> {
    digest
        .parse::<Digest>()
        .with_context(|| format!("Invalid digest `{digest}`"))
}
