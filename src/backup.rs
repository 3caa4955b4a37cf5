use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::DB_FILE_NAME;

pub const BUNDLE_FORMAT: &str = "rehber-workspace-v1";
pub const LEGACY_FORMAT: &str = "legacy-sqlite3";

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/rehber.sqlite3";
const META_ENTRY: &str = "meta/workspace.json";

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format: String,
    app_version: String,
    exported_at: String,
    db_sha256: String,
    db_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub db_sha256: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn write_entry<W: Write + std::io::Seek>(
    zip: &mut ZipWriter<W>,
    name: &str,
    bytes: &[u8],
) -> anyhow::Result<()> {
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(name, opts)
        .with_context(|| format!("failed to start entry {}", name))?;
    zip.write_all(bytes)
        .with_context(|| format!("failed to write entry {}", name))?;
    Ok(())
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("failed to read database {}", db_path.display()))?;
    let db_sha256 = sha256_hex(&db_bytes);

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create output file {}", out_path.display()))?;
    let mut zip = ZipWriter::new(out_file);

    let manifest = Manifest {
        format: BUNDLE_FORMAT.to_string(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        db_sha256: db_sha256.clone(),
        db_bytes: db_bytes.len() as u64,
    };
    let manifest_text =
        serde_json::to_vec_pretty(&manifest).context("failed to serialize manifest")?;
    write_entry(&mut zip, MANIFEST_ENTRY, &manifest_text)?;
    write_entry(&mut zip, DB_ENTRY, &db_bytes)?;

    let meta = json!({ "sourceWorkspace": workspace_path.to_string_lossy() });
    let meta_text = serde_json::to_vec_pretty(&meta).context("failed to serialize metadata")?;
    write_entry(&mut zip, META_ENTRY, &meta_text)?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        entry_count: 3,
        db_sha256,
    })
}

fn read_signature(path: &Path) -> anyhow::Result<Vec<u8>> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.display()))?;
    let mut sig = vec![0u8; SQLITE_MAGIC.len()];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    sig.truncate(read);
    Ok(sig)
}

fn read_bundle_db(in_path: &Path) -> anyhow::Result<Vec<u8>> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.display()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: Manifest =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid")?;
    if manifest.format != BUNDLE_FORMAT {
        bail!("unsupported bundle format: {}", manifest.format);
    }

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .with_context(|| format!("bundle missing {}", DB_ENTRY))?
        .read_to_end(&mut db_bytes)
        .context("failed to extract database entry")?;

    let actual = sha256_hex(&db_bytes);
    if !actual.eq_ignore_ascii_case(&manifest.db_sha256) {
        return Err(anyhow!(
            "database checksum mismatch: manifest {} but bundle holds {}",
            manifest.db_sha256,
            actual
        ));
    }
    Ok(db_bytes)
}

/// Replaces the workspace database with the one in `in_path`. A plain SQLite
/// file is accepted as a legacy backup. The current database is only
/// replaced once the incoming one has been fully written.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path)
        .with_context(|| format!("failed to create workspace {}", workspace_path.display()))?;

    let sig = read_signature(in_path)?;
    let (format, db_bytes) = if sig.starts_with(&ZIP_MAGIC) {
        (BUNDLE_FORMAT, read_bundle_db(in_path)?)
    } else if sig.as_slice() == SQLITE_MAGIC {
        let bytes = std::fs::read(in_path)
            .with_context(|| format!("failed to read backup {}", in_path.display()))?;
        (LEGACY_FORMAT, bytes)
    } else {
        bail!("{} is neither a workspace bundle nor a SQLite file", in_path.display());
    };

    let dst = workspace_path.join(DB_FILE_NAME);
    let tmp = workspace_path.join(format!("{}.importing", DB_FILE_NAME));
    {
        let mut out = File::create(&tmp)
            .with_context(|| format!("failed to create temp database {}", tmp.display()))?;
        out.write_all(&db_bytes)
            .context("failed to write extracted database")?;
        out.flush().context("failed to flush extracted database")?;
    }
    std::fs::rename(&tmp, &dst)
        .with_context(|| format!("failed to move extracted database to {}", dst.display()))?;

    Ok(ImportSummary {
        bundle_format_detected: format.to_string(),
        db_sha256: sha256_hex(&db_bytes),
    })
}
