//! Fetching many tiles at once on a bounded pool of worker threads.

use crate::backend::Backend;
use crate::error::Result;
use crate::resolve::Resolver;
use crate::tile::TileRef;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Resolve `tile` against `base` and read it, verified when it has a checksum.
pub fn fetch_one(resolver: &Resolver, base: Option<&str>, tile: &TileRef) -> Result<Vec<u8>> {
    let checksum = tile.checksum()?;
    let resolved = resolver.resolve(&tile.file, base)?;
    resolved.backend.read_bytes(&resolved.name, checksum.as_ref())
}

/// Fetch every tile using at most `workers` threads.
///
/// Results are keyed by each tile's `file`, whatever order they finish in.
/// If any fetch fails, remaining work is abandoned and one of the errors is
/// returned once all workers have stopped.
pub fn fetch_all(
    resolver: &Resolver,
    base: Option<&str>,
    tiles: &[TileRef],
    workers: usize,
) -> Result<BTreeMap<String, Vec<u8>>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("slicestore-fetch-{}", i))
        .build()
        .map_err(std::io::Error::other)?;
    tracing::debug!(tiles = tiles.len(), workers, "fetching tiles");

    let fetched: Vec<(String, Vec<u8>)> = pool.install(|| {
        tiles
            .par_iter()
            .map(|tile| fetch_one(resolver, base, tile).map(|bytes| (tile.file.clone(), bytes)))
            .collect::<Result<Vec<_>>>()
    })?;
    Ok(fetched.into_iter().collect())
}
