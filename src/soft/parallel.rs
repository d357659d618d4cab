use std::sync::OnceLock;

use rayon::prelude::*;

use crate::env_config::define_env_flag;

/// Below this many bytes a fill or copy stays on the calling thread.
const PARALLEL_MIN_BYTES: usize = 1 << 20;
const MAX_WORKERS: usize = 8;

define_env_flag!(enabled_unless(parallel_copy_enabled, "SNOW_GS_DISABLE_PARALLEL_COPY"));

#[inline]
fn workers() -> usize {
    static WORKERS: OnceLock<usize> = OnceLock::new();
    (*WORKERS.get_or_init(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }))
    .min(MAX_WORKERS)
}

#[inline]
fn should_parallelize(bytes: usize) -> bool {
    parallel_copy_enabled() && workers() > 1 && bytes >= PARALLEL_MIN_BYTES
}

fn install<F>(job: F)
where
    F: FnOnce() + Send,
{
    static POOL: OnceLock<Option<rayon::ThreadPool>> = OnceLock::new();
    if let Some(pool) = POOL
        .get_or_init(|| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(workers())
                .thread_name(|i| format!("snow-gs-soft-{i}"))
                .build()
                .ok()
        })
        .as_ref()
    {
        pool.install(job);
    } else {
        job();
    }
}

/// Repeats `texel` across `dst`. A trailing partial texel is left alone.
pub(crate) fn fill_texels(dst: &mut [u8], texel: &[u8]) {
    if texel.is_empty() {
        return;
    }
    let fill = |chunk: &mut [u8]| {
        for px in chunk.chunks_exact_mut(texel.len()) {
            px.copy_from_slice(texel);
        }
    };
    if should_parallelize(dst.len()) {
        let chunk = (dst.len() / workers()).next_multiple_of(texel.len()).max(texel.len());
        install(|| dst.par_chunks_mut(chunk).for_each(fill));
    } else {
        fill(dst);
    }
}

/// Copies `rows` rows of `row_bytes` between pitched buffers.
pub(crate) fn copy_rows(
    dst: &mut [u8],
    dst_pitch: usize,
    src: &[u8],
    src_pitch: usize,
    row_bytes: usize,
    rows: usize,
) {
    if rows == 0 || row_bytes == 0 {
        return;
    }
    let copy_one = |(y, dst_row): (usize, &mut [u8])| {
        let start = y * src_pitch;
        dst_row[..row_bytes].copy_from_slice(&src[start..start + row_bytes]);
    };
    let dst = &mut dst[..dst_pitch * (rows - 1) + row_bytes];
    if should_parallelize(row_bytes * rows) {
        install(|| {
            dst.par_chunks_mut(dst_pitch)
                .take(rows)
                .enumerate()
                .for_each(copy_one)
        });
    } else {
        dst.chunks_mut(dst_pitch).take(rows).enumerate().for_each(copy_one);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_repeats_texel_over_large_buffers() {
        let mut dst = vec![0u8; PARALLEL_MIN_BYTES + 8];
        fill_texels(&mut dst, &[1, 2, 3, 4]);
        assert!(dst.chunks_exact(4).all(|px| px == [1, 2, 3, 4]));
    }

    #[test]
    fn copy_rows_honours_both_pitches() {
        let src: Vec<u8> = (0..12).collect();
        let mut dst = vec![0u8; 10];
        copy_rows(&mut dst, 5, &src, 6, 3, 2);
        assert_eq!(dst, [0, 1, 2, 0, 0, 6, 7, 8, 0, 0]);
    }

    #[test]
    fn large_copies_match_serial_result() {
        let width = 4096usize;
        let rows = 300usize;
        let src: Vec<u8> = (0..width * rows).map(|i| (i % 251) as u8).collect();
        let mut dst = vec![0u8; (width + 16) * rows];
        copy_rows(&mut dst, width + 16, &src, width, width, rows);
        for y in [0, rows / 2, rows - 1] {
            assert_eq!(
                &dst[y * (width + 16)..y * (width + 16) + width],
                &src[y * width..(y + 1) * width]
            );
        }
    }
}
