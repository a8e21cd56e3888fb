use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use mfkit_core::path_safety::{self, PathPolicy};
use mfkit_core::{EncodeOptions, Manifest};

#[derive(Parser)]
#[command(name = "mfkit", version, about = "Inspect, verify and repack chunked content manifests")]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Header, metadata and totals
    Info {
        manifest: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// One line per file: size, part count, name
    Files {
        manifest: PathBuf,
        #[arg(long)]
        tag: Option<String>,
        /// Also print where each file would land under this install root
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        follow_symlinks: bool,
    },
    /// One line per chunk: download path, window size, stored size
    Chunks { manifest: PathBuf },
    /// Decode every manifest under the given paths
    Verify {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Decode (binary or legacy JSON) and write a fresh binary manifest
    Repack {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(0..=9))]
        level: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.cmd {
        Cmd::Info { manifest, json } => info(&manifest, json)?,
        Cmd::Files { manifest, tag, root, follow_symlinks } => {
            files(&manifest, tag.as_deref(), root.as_deref(), PathPolicy { follow_symlinks })?
        }
        Cmd::Chunks { manifest } => chunks(&manifest)?,
        Cmd::Verify { paths } => verify(&paths)?,
        Cmd::Repack { input, output, level } => repack(&input, &output, level)?,
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();
}

fn load(path: &Path) -> Result<Manifest> {
    // Manifests are small; reading whole keeps Seek cheap.
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Manifest::read(&mut Cursor::new(bytes)).with_context(|| format!("decode {}", path.display()))
}

#[derive(Serialize)]
struct InfoReport<'a> {
    format: &'static str,
    version: u32,
    feature_level: u32,
    header_size: Option<u32>,
    size_compressed: Option<u32>,
    size_uncompressed: Option<u32>,
    sha1: Option<String>,
    app_id: u32,
    app_name: &'a str,
    build_version: &'a str,
    build_id: &'a str,
    launch_exe: &'a str,
    launch_command: &'a str,
    prereq_ids: &'a [String],
    files: usize,
    chunks: usize,
    install_size: u64,
    download_size: u64,
    custom_fields: Vec<(&'a str, &'a str)>,
}

fn info(path: &Path, json: bool) -> Result<()> {
    let m = load(path)?;
    let meta = m.meta();
    let header = m.header();
    let report = InfoReport {
        format: if header.is_some() { "binary" } else { "json" },
        version: m.version(),
        feature_level: meta.feature_level,
        header_size: header.map(|h| h.header_size),
        size_compressed: header.map(|h| h.size_compressed),
        size_uncompressed: header.map(|h| h.size_uncompressed),
        sha1: header.map(|h| h.hash_hex()),
        app_id: meta.app_id,
        app_name: &meta.app_name,
        build_version: &meta.build_version,
        build_id: &meta.build_id,
        launch_exe: &meta.launch_exe,
        launch_command: &meta.launch_command,
        prereq_ids: &meta.prereq_ids,
        files: m.files().len(),
        chunks: m.chunks().len(),
        install_size: m.files().total_size(),
        download_size: m.chunks().download_size(),
        custom_fields: m.custom_fields().iter().collect(),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("Format:        {}", report.format);
    println!("Version:       {} (feature level {})", report.version, report.feature_level);
    if let Some(h) = header {
        println!("Payload:       {} bytes stored, {} bytes raw", h.size_compressed, h.size_uncompressed);
        println!("SHA-1:         {}", h.hash_hex());
    }
    println!("App:           {} (id {})", report.app_name, report.app_id);
    println!("Build:         {}", report.build_version);
    if !report.build_id.is_empty() {
        println!("Build id:      {}", report.build_id);
    }
    println!("Launch:        {} {}", report.launch_exe, report.launch_command);
    println!("Files:         {} ({} bytes installed)", report.files, report.install_size);
    println!("Chunks:        {} ({} bytes to download)", report.chunks, report.download_size);
    for (k, v) in &report.custom_fields {
        println!("Custom:        {k} = {v}");
    }
    Ok(())
}

fn files(path: &Path, tag: Option<&str>, root: Option<&Path>, policy: PathPolicy) -> Result<()> {
    let m = load(path)?;
    let selected: Vec<_> = match tag {
        Some(t) => m.files().with_tag(t).collect(),
        None => m.files().elements.iter().collect(),
    };
    let mut out = BufWriter::new(std::io::stdout().lock());
    for f in selected {
        write!(out, "{:>12} {:>4} {}", f.file_size(), f.chunk_parts.len(), f.filename)?;
        if let Some(root) = root {
            match path_safety::resolve_under(root, &f.filename, policy) {
                Ok(p) => write!(out, " -> {}", p.display())?,
                Err(e) => write!(out, " -> UNSAFE ({e})")?,
            }
        }
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

fn chunks(path: &Path) -> Result<()> {
    let m = load(path)?;
    let feature_level = m.chunks().feature_level;
    let mut out = BufWriter::new(std::io::stdout().lock());
    for c in m.chunks().elements() {
        writeln!(out, "{} {:>9} {:>9}", c.path(feature_level), c.window_size, c.file_size)?;
    }
    out.flush()?;
    Ok(())
}

fn is_manifest_name(p: &Path) -> bool {
    matches!(p.extension().and_then(|e| e.to_str()), Some("manifest" | "json"))
}

fn collect_manifests(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut v = vec![];
    for p in paths {
        let md = fs::metadata(p).with_context(|| format!("stat {}", p.display()))?;
        if md.is_dir() {
            for e in WalkDir::new(p).into_iter().filter_map(|e| e.ok()) {
                if e.file_type().is_file() && is_manifest_name(e.path()) {
                    v.push(e.path().to_path_buf());
                }
            }
        } else {
            v.push(p.clone());
        }
    }
    v.sort();
    Ok(v)
}

/// `Ok(())` when the manifest decodes and every install path is safe.
fn check_one(path: &Path) -> Result<()> {
    let m = load(path)?;
    let report = m.validate();
    if let Some(issue) = report.issues.first() {
        return Err(anyhow!("{} validation issue(s), first: {issue}", report.issues.len()));
    }
    tracing::info!(path = %path.display(), files = report.files_checked, parts = report.parts_checked, "verified");
    Ok(())
}

fn verify(paths: &[PathBuf]) -> Result<()> {
    let manifests = collect_manifests(paths)?;
    if manifests.is_empty() {
        return Err(anyhow!("no manifests found"));
    }
    let results: Vec<(PathBuf, Result<()>)> = manifests
        .into_par_iter()
        .map(|p| {
            let r = check_one(&p);
            (p, r)
        })
        .collect();

    let mut bad = 0usize;
    for (p, r) in &results {
        match r {
            Ok(()) => println!("OK  {}", p.display()),
            Err(e) => {
                bad += 1;
                println!("BAD {}: {e:#}", p.display());
            }
        }
    }
    eprintln!("Manifests ok={}, bad={}", results.len() - bad, bad);
    if bad > 0 {
        return Err(anyhow!("{bad} manifest(s) failed verification"));
    }
    Ok(())
}

fn repack(input: &Path, output: &Path, level: u32) -> Result<()> {
    let m = load(input)?;
    let mut buf = Cursor::new(Vec::new());
    let header = m.write_with(&mut buf, EncodeOptions { compression_level: level })?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut f = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(output)
        .with_context(|| format!("create {}", output.display()))?;
    f.write_all(buf.get_ref())?;
    f.sync_all()?;
    eprintln!(
        "Wrote {} ({} files, {} chunks, {} -> {} bytes)",
        output.display(),
        m.files().len(),
        m.chunks().len(),
        header.size_uncompressed,
        header.size_compressed
    );
    Ok(())
}
