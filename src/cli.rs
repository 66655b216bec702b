use crate::backend::{Backend, DiskBackend, DEFAULT_BLOCK_SIZE};
use crate::checksum::digest_stream;
use crate::config::BackendConfig;
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::registry::CacheRegistry;
use crate::resolve::{Resolved, Resolver};
use indoc::indoc;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

const USAGE: &str = indoc! {"
    usage: slicestore [--help|--version|command...]

    # Fetch one object and write it to stdout, or to a file.
    # With --sha256 the data is verified before anything is written.
     fetch <path-or-reference> [--sha256 HEX] [--out PATH] [--config FILE] [--cache-dir DIR]

    # Print the SHA-256 of an object, in the same format as sha256sum.
     checksum <path-or-reference> [--config FILE]

    References may be file:, http:, https: or s3: URLs, or local paths.
    Set RUST_LOG=debug to see which backend and cache each fetch uses.
"};

/// `tracing` filter used when `RUST_LOG` is unset. Warnings everywhere, plus
/// the `caching.debug` line from the resolver.
pub const DEFAULT_LOG_FILTER: &str = "warn,slicestore::resolve=info";

const VALUE_FLAGS: [&str; 4] = ["--sha256", "--out", "--config", "--cache-dir"];

#[derive(PartialEq, Debug, Default)]
pub struct Options {
    pub sha256: Option<String>,
    pub out: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
}

/// What we decide to do based on CLI arguments
#[derive(PartialEq, Debug)]
pub enum Behavior {
    Help,
    Version,
    UnexpectedArg(String),
    MissingArg(&'static str),
    Fetch { reference: String, opts: Options },
    Checksum { reference: String, opts: Options },
}

pub fn parse<S>(args: impl Iterator<Item = S>) -> Behavior
where
    S: AsRef<str>,
{
    let mut positional: Vec<String> = vec![];
    let mut opts = Options::default();
    let mut args = args.map(|a| a.as_ref().to_owned());
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" => return Behavior::Version,
            "--help" => return Behavior::Help,
            flag if flag.starts_with("--") => {
                let Some(flag) = VALUE_FLAGS.iter().find(|f| **f == flag) else {
                    return Behavior::UnexpectedArg(flag.to_owned());
                };
                let Some(value) = args.next() else {
                    return Behavior::MissingArg(*flag);
                };
                match *flag {
                    "--sha256" => opts.sha256 = Some(value),
                    "--out" => opts.out = Some(value.into()),
                    "--config" => opts.config = Some(value.into()),
                    _ => opts.cache_dir = Some(value.into()),
                }
            }
            other => positional.push(other.to_owned()),
        }
    }

    let mut it = positional.into_iter();
    let (command, reference) = (it.next(), it.next());
    if let Some(extra) = it.next() {
        return Behavior::UnexpectedArg(extra);
    }
    match (command.as_deref(), reference) {
        (None, _) => Behavior::Help,
        (Some("fetch"), Some(reference)) => Behavior::Fetch { reference, opts },
        (Some("checksum"), Some(reference)) => Behavior::Checksum { reference, opts },
        (Some("fetch" | "checksum"), None) => Behavior::MissingArg("<path-or-reference>"),
        (Some(other), _) => Behavior::UnexpectedArg(other.to_owned()),
    }
}

pub fn execute<OUT: Write, ERR: Write>(behavior: Behavior, log: &mut Logger<OUT, ERR>) -> ExitCode {
    match run(behavior, log) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            // Nothing sensible left to do if stderr itself is broken.
            let _ = writeln!(log.failure(), "Failed to execute: {}", report(&e));
            ExitCode::from(1)
        }
    }
}

/// The error followed by each of its causes, so transport failures say why.
fn report(e: &Error) -> String {
    let mut text = e.to_string();
    let mut cause = std::error::Error::source(e);
    while let Some(c) = cause {
        text.push_str(": ");
        text.push_str(&c.to_string());
        cause = c.source();
    }
    text
}

pub fn run<OUT: Write, ERR: Write>(behavior: Behavior, log: &mut Logger<OUT, ERR>) -> Result<()> {
    match behavior {
        Behavior::Help => write!(log.stdout, "{}", USAGE)?,
        Behavior::Version => writeln!(log.stdout, "{}", env!("CARGO_PKG_VERSION"))?,
        Behavior::UnexpectedArg(a) => {
            return Err(Error::Config(format!("unexpected argument: {}", a)))
        }
        Behavior::MissingArg(a) => return Err(Error::Config(format!("missing argument: {}", a))),
        Behavior::Fetch { reference, opts } => fetch(&reference, &opts, log)?,
        Behavior::Checksum { reference, opts } => checksum(&reference, &opts, log)?,
    }
    Ok(())
}

fn resolve(reference: &str, opts: &Options) -> Result<(Arc<CacheRegistry>, Resolved)> {
    let mut config = match &opts.config {
        Some(path) => BackendConfig::from_path(path)?,
        None => BackendConfig::default(),
    };
    if let Some(dir) = &opts.cache_dir {
        config = config.with_cache_directory(dir);
    }
    let registry = Arc::new(CacheRegistry::new());
    let resolved = Resolver::new(config, registry.clone()).resolve_path_or_reference(reference)?;
    Ok((registry, resolved))
}

fn fetch<OUT: Write, ERR: Write>(reference: &str, opts: &Options, log: &mut Logger<OUT, ERR>) -> Result<()> {
    let checksum = opts.sha256.as_deref().map(Digest::from_hex).transpose()?;
    let (registry, resolved) = resolve(reference, opts)?;
    let mut stream = resolved.backend.open_for_read(&resolved.name, checksum.as_ref())?;

    match &opts.out {
        Some(out) => {
            let dir = match out.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let name = out
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| Error::Config(format!("--out {} is not a file path", out.display())))?;
            DiskBackend::new(dir).write_from_stream(name, &mut stream, DEFAULT_BLOCK_SIZE)?;
        }
        None => {
            std::io::copy(&mut stream, &mut *log.stdout)?;
            log.stdout.flush()?;
        }
    }
    writeln!(
        log.status(),
        "fetched {} from {}{}",
        resolved.name,
        resolved.backend.describe(),
        if checksum.is_some() { " (verified)" } else { "" }
    )?;
    registry.close_all();
    Ok(())
}

fn checksum<OUT: Write, ERR: Write>(
    reference: &str,
    opts: &Options,
    log: &mut Logger<OUT, ERR>,
) -> Result<()> {
    let (registry, resolved) = resolve(reference, opts)?;
    let mut stream = resolved.backend.open_for_read(&resolved.name, None)?;
    let digest = digest_stream(&mut stream)?;
    writeln!(log.stdout, "{}  {}", digest, reference)?;
    registry.close_all();
    Ok(())
}
