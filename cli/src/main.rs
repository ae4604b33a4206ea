mod args;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn, LevelFilter};
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use args::{Cli, Commands};
use hgpak_core::{
    manifest, pack_to_file, repack_manifest, Filter, HgpakError, HgpakReader, PackRequest,
    Platform, Result, UnpackOptions,
};

fn main() {
    let cli = Cli::parse();
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var("RUST_LOG").is_err() {
        builder.filter(None, LevelFilter::Info);
    }
    if cli.verbose {
        builder.filter(None, LevelFilter::Debug);
    }
    builder.init();

    let platform: Platform = cli
        .platform
        .map(Into::into)
        .unwrap_or_else(Platform::native);

    let run = || -> Result<()> {
        match &cli.command {
            Commands::Unpack {
                inputs,
                output,
                filter,
                upper,
                manifest,
            } => {
                let paks = collect_paks(inputs)?;
                if paks.is_empty() {
                    warn!("No .pak files to unpack");
                    return Ok(());
                }
                let out_dir = output.clone().unwrap_or_else(|| PathBuf::from("EXTRACTED"));
                let filter = if filter.is_empty() {
                    Filter::All
                } else {
                    Filter::Patterns(filter.clone())
                };
                let options = UnpackOptions {
                    upper: *upper,
                    max_bytes: None,
                    write_manifest: *manifest,
                };

                let pb = progress_bar(paks.len() as u64);
                // One reader per archive. Readers own their file handle and
                // cache, so independent archives unpack in parallel.
                let counts = paks
                    .par_iter()
                    .map(|pak_path| {
                        let mut pak = HgpakReader::open(pak_path, platform)?;
                        let count = pak.unpack(&out_dir, &filter, &options)?;
                        pb.inc(1);
                        Ok(count)
                    })
                    .collect::<Result<Vec<usize>>>()?;
                pb.finish_and_clear();
                info!(
                    "Unpacked {} files from {} .pak's into {}",
                    counts.iter().sum::<usize>(),
                    counts.len(),
                    out_dir.display()
                );
                Ok(())
            }
            Commands::List { inputs, json } => {
                let paks = collect_paks(inputs)?;
                let mut reports = Vec::with_capacity(paks.len());
                for pak_path in &paks {
                    let pak = HgpakReader::open(pak_path, platform)?;
                    let files = pak
                        .list()
                        .into_iter()
                        .map(|entry| FileReport {
                            path: entry.path,
                            size: entry.size,
                            chunks: entry.chunks,
                        })
                        .collect();
                    reports.push(PakReport {
                        pak: pak_path.display().to_string(),
                        files,
                    });
                }

                if *json {
                    let text = serde_json::to_string_pretty(&reports)
                        .map_err(|e| HgpakError::Io(io::Error::other(e)))?;
                    fs::write("filenames.json", text)?;
                    info!("Listed {} .pak's into filenames.json", reports.len());
                } else {
                    let mut total = 0;
                    for report in &reports {
                        println!("\nListing {}", report.pak);
                        println!("{:<15} | {:<8} | Path", "Size (Bytes)", "Chunks");
                        println!("{:-<15}-|-{:-<8}-|--------------------------------", "", "");
                        for file in &report.files {
                            println!("{:<15} | {:<8} | {}", file.size, file.chunks, file.path);
                        }
                        total += report.files.len();
                    }
                    println!("\nTotal files: {total}");
                }
                Ok(())
            }
            Commands::Pack {
                inputs,
                output,
                root,
                compress,
            } => {
                let files = collect_pack_inputs(inputs)?;
                if files.is_empty() {
                    warn!("No files to pack");
                    return Ok(());
                }
                let root = match root {
                    Some(root) => root.clone(),
                    None => inputs
                        .first()
                        .and_then(|p| p.parent())
                        .unwrap_or(Path::new("."))
                        .to_path_buf(),
                };

                let mut paths = Vec::with_capacity(files.len());
                for file in &files {
                    let rel = file.strip_prefix(&root).map_err(|_| {
                        HgpakError::Unsupported(format!(
                            "{} is outside the pack root {}",
                            file.display(),
                            root.display()
                        ))
                    })?;
                    paths.push(manifest::normalise_path(&rel.to_string_lossy()));
                }

                let output = output.clone().unwrap_or_else(|| PathBuf::from("hgpak.pak"));
                let pak_name = output
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("hgpak.pak")
                    .to_string();
                let request = PackRequest {
                    paths,
                    root,
                    pak_name,
                    compress: *compress,
                };
                pack_to_file(&request, platform, &output)?;
                info!(
                    "Packed {} files into {}",
                    request.paths.len(),
                    output.display()
                );
                Ok(())
            }
            Commands::Repack {
                manifest,
                uncompressed,
            } => {
                let written = repack_manifest(manifest, platform, !*uncompressed)?;
                info!("Repacked archive to {}", written.display());
                Ok(())
            }
        }
    };

    if let Err(e) = run() {
        eprintln!("\x1b[31mError:\x1b[0m {e}");
        std::process::exit(1);
    }
}

#[derive(Serialize)]
struct FileReport {
    path: String,
    size: u64,
    chunks: u64,
}

#[derive(Serialize)]
struct PakReport {
    pak: String,
    files: Vec<FileReport>,
}

/// Expand the input list: directories contribute the .pak files directly
/// inside them.
fn collect_paks(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paks = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in fs::read_dir(input)? {
                let path = entry?.path();
                if path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("pak"))
                {
                    paks.push(path);
                } else if path.is_file() {
                    warn!("{} is not a .pak file, skipping", path.display());
                }
            }
        } else {
            paks.push(input.clone());
        }
    }
    paks.sort();
    Ok(paks)
}

/// Expand the pack inputs: directories are walked recursively in a
/// deterministic order.
fn collect_pack_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input).sort_by_file_name() {
                let entry = entry.map_err(io::Error::from)?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        )
        .unwrap()
        .progress_chars("#>-"),
    );
    pb
}
