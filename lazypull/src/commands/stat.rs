use anyhow::{Context, Result};
use clap::Args;
use comfy_table::Table;
use comfy_table::presets::UTF8_FULL;
use liblazyfs::{FileKind, Resource, resource_to_attr};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct StatArgs {
    /// JSON file holding an array of file resources
    #[arg(long, value_name = "FILE")]
    pub resources: PathBuf,
}

pub fn run(args: StatArgs) -> Result<()> {
    let data = std::fs::read(&args.resources)
        .with_context(|| format!("Failed to read {:?}", args.resources))?;
    let resources: Vec<Resource> = serde_json::from_slice(&data)
        .with_context(|| format!("Failed to parse resources from {:?}", args.resources))?;
    println!("{}", render(&resources));
    Ok(())
}

fn kind_name(kind: FileKind) -> &'static str {
    match kind {
        FileKind::Regular => "file",
        FileKind::Directory => "dir",
        FileKind::Symlink => "symlink",
        FileKind::CharDevice => "char",
        FileKind::BlockDevice => "block",
        FileKind::Fifo => "fifo",
        FileKind::Socket => "socket",
    }
}

/// Lays the FUSE attributes of `resources` out as a table. Inode numbers are
/// assigned in order starting at 1. No content is fetched.
pub fn render(resources: &[Resource]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "ino", "path", "kind", "perm", "size", "blocks", "uid", "gid", "mtime", "digest",
    ]);
    for (idx, res) in resources.iter().enumerate() {
        let attr = resource_to_attr(res, idx as u64 + 1);
        let digest = res
            .content_digest()
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            attr.ino.to_string(),
            res.path.clone(),
            kind_name(res.kind).to_string(),
            format!("{:04o}", attr.perm),
            attr.size.to_string(),
            attr.blocks.to_string(),
            attr.uid.to_string(),
            attr.gid.to_string(),
            res.mtime.to_string(),
            digest,
        ]);
    }
    table
}
