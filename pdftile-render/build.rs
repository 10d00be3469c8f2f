//! Stages a Pdfium shared library for the `pdf` feature.
//!
//! The library is looked up in OUT_DIR, then unpacked from a local archive
//! (`PDFTILE_PDFIUM_ARCHIVE`) or downloaded from the pdfium-binaries
//! releases. Its path is exported as `PDFTILE_PDFIUM_LIBRARY_PATH`. Staging
//! failures only warn: the engine falls back to a library next to the binary
//! or a system-wide install at runtime.

use std::env;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use tar::Archive;
use ureq::AgentBuilder;
use walkdir::WalkDir;

const PDFIUM_RELEASE: &str = "chromium/7350";
const RELEASE_BASE_URL: &str = "https://github.com/bblanchon/pdfium-binaries/releases/download";

const WATCHED_ENV: &[&str] = &[
    "PDFTILE_PDFIUM_SKIP_DOWNLOAD",
    "PDFTILE_PDFIUM_ARCHIVE",
    "PDFTILE_PDFIUM_RELEASE",
    "PDFTILE_PDFIUM_PLATFORM",
    "PDFIUM_DYNAMIC_LIB_PATH",
    "PDFIUM_STATIC_LIB_PATH",
];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for var in WATCHED_ENV {
        println!("cargo:rerun-if-env-changed={var}");
    }

    match stage() {
        Ok(Some(library)) => {
            println!(
                "cargo:rustc-env=PDFTILE_PDFIUM_LIBRARY_PATH={}",
                library.display()
            );
        }
        Ok(None) => {}
        Err(err) => {
            println!("cargo:warning=Pdfium was not staged, relying on runtime lookup: {err:#}");
        }
    }
}

fn stage() -> Result<Option<PathBuf>> {
    if env::var_os("CARGO_FEATURE_PDF").is_none()
        || env::var_os("PDFTILE_PDFIUM_SKIP_DOWNLOAD").is_some()
        || env::var_os("PDFIUM_DYNAMIC_LIB_PATH").is_some()
        || env::var_os("PDFIUM_STATIC_LIB_PATH").is_some()
    {
        return Ok(None);
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").context("OUT_DIR is not set")?);
    let staging = out_dir.join("pdfium");
    fs::create_dir_all(&staging)
        .with_context(|| format!("failed to create {}", staging.display()))?;

    let os = env::var("CARGO_CFG_TARGET_OS").context("CARGO_CFG_TARGET_OS is not set")?;
    let arch = env::var("CARGO_CFG_TARGET_ARCH").context("CARGO_CFG_TARGET_ARCH is not set")?;
    let name = library_name(&os);

    if let Some(found) = find_library(&staging, name) {
        return Ok(Some(found));
    }

    let archive = match env::var_os("PDFTILE_PDFIUM_ARCHIVE") {
        Some(path) => PathBuf::from(path),
        None => {
            let platform = env::var("PDFTILE_PDFIUM_PLATFORM")
                .unwrap_or_else(|_| platform_name(&os, &arch));
            fetch(&staging, &platform)?
        }
    };
    unpack(&archive, &staging)?;

    find_library(&staging, name)
        .map(Some)
        .with_context(|| format!("{name} missing from {}", archive.display()))
}

fn platform_name(os: &str, arch: &str) -> String {
    let os = match os {
        "macos" => "mac",
        other => other,
    };
    let arch = match arch {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        other => other,
    };
    format!("{os}-{arch}")
}

fn library_name(os: &str) -> &'static str {
    match os {
        "windows" => "pdfium.dll",
        "macos" => "libpdfium.dylib",
        _ => "libpdfium.so",
    }
}

fn find_library(root: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_type().is_file() && entry.file_name() == name)
        .map(|entry| entry.into_path())
}

fn fetch(staging: &Path, platform: &str) -> Result<PathBuf> {
    let release = env::var("PDFTILE_PDFIUM_RELEASE").unwrap_or_else(|_| PDFIUM_RELEASE.into());
    let file_name = format!("pdfium-{platform}.tgz");
    let destination = staging.join(&file_name);
    if destination.exists() {
        return Ok(destination);
    }

    let url = format!("{RELEASE_BASE_URL}/{release}/{file_name}");
    let agent = AgentBuilder::new()
        .timeout_connect(Duration::from_secs(15))
        .timeout_read(Duration::from_secs(120))
        .build();
    let response = agent
        .get(&url)
        .call()
        .with_context(|| format!("GET {url} failed"))?;

    let partial = destination.with_extension("part");
    let mut file = File::create(&partial)
        .with_context(|| format!("failed to create {}", partial.display()))?;
    io::copy(&mut response.into_reader(), &mut file)
        .with_context(|| format!("failed to write {}", partial.display()))?;
    fs::rename(&partial, &destination)?;
    Ok(destination)
}

fn unpack(archive: &Path, destination: &Path) -> Result<()> {
    let is_tarball = archive
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tgz") || ext.eq_ignore_ascii_case("gz"));
    if !is_tarball {
        bail!("{} is not a .tgz archive", archive.display());
    }
    let file =
        File::open(archive).with_context(|| format!("failed to open {}", archive.display()))?;
    Archive::new(GzDecoder::new(file))
        .unpack(destination)
        .with_context(|| format!("failed to unpack {}", archive.display()))
}
