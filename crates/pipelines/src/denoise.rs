//! Speckle cleanup for classified defoliation maps
//!
//! Single flagged pixels and tiny clusters are usually residual cloud
//! or registration noise rather than canopy loss. Dropping groups below
//! a pixel-count floor keeps only spatially coherent damage.

use std::collections::VecDeque;

use defolia_core::raster::Raster;

/// Clear connected groups smaller than `min_pixels`.
///
/// Connectivity is 4-neighbour, so diagonal contact does not bridge
/// groups. Non-zero input pixels count as set; surviving groups come
/// back as 1, everything else 0. Georeferencing carries over.
pub fn filter_small_groups(binary: &Raster<u8>, min_pixels: usize) -> Raster<u8> {
    let (rows, cols) = binary.shape();
    let mut out = binary.with_same_meta::<u8>();
    out.set_nodata(binary.nodata());

    let mut visited = vec![false; rows * cols];
    let mut queue = VecDeque::new();
    let mut component = Vec::new();

    for start_row in 0..rows {
        for start_col in 0..cols {
            let idx = start_row * cols + start_col;
            if visited[idx] {
                continue;
            }
            // SAFETY: loop bounds match the raster shape
            if unsafe { binary.get_unchecked(start_row, start_col) } == 0 {
                continue;
            }
            visited[idx] = true;
            component.clear();
            component.push((start_row, start_col));
            queue.push_back((start_row, start_col));

            while let Some((r, c)) = queue.pop_front() {
                // 4-connected neighbours; wrapping_sub pushes edge
                // underflow past the bounds check
                let neighbours = [
                    (r.wrapping_sub(1), c),
                    (r + 1, c),
                    (r, c.wrapping_sub(1)),
                    (r, c + 1),
                ];
                for (nr, nc) in neighbours {
                    if nr >= rows || nc >= cols {
                        continue;
                    }
                    let nidx = nr * cols + nc;
                    if visited[nidx] {
                        continue;
                    }
                    if unsafe { binary.get_unchecked(nr, nc) } == 0 {
                        continue;
                    }
                    visited[nidx] = true;
                    component.push((nr, nc));
                    queue.push_back((nr, nc));
                }
            }

            if component.len() >= min_pixels {
                for &(r, c) in &component {
                    out.data_mut()[[r, c]] = 1;
                }
            }
        }
    }
    out
}
