//! Launch geometry for 1D elementwise kernels.

use super::context::CudaError;

/// Grid and block dimensions for one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    pub grid_dim: (u32, u32, u32),
    pub block_dim: (u32, u32, u32),
    pub shared_mem_bytes: u32,
}

impl LaunchGeometry {
    /// Total threads launched.
    pub fn total_threads(&self) -> u64 {
        let (gx, gy, gz) = self.grid_dim;
        let (bx, by, bz) = self.block_dim;
        [gx, gy, gz, bx, by, bz].iter().map(|&d| d as u64).product()
    }

    /// No blocks to run. The driver rejects such launches, so they are skipped.
    pub fn is_empty(&self) -> bool {
        let (gx, gy, gz) = self.grid_dim;
        gx == 0 || gy == 0 || gz == 0
    }
}

/// Compute grid dimensions covering `n` elements with `block_dim_x` threads per block.
///
/// `grid_x = ceil(n / block_dim_x)`. `n == 0` gives an empty grid, which
/// dispatches as a no-op.
pub fn grid_1d(n: u64, block_dim_x: u32) -> Result<LaunchGeometry, CudaError> {
    if block_dim_x == 0 {
        return Err(CudaError::InvalidGeometry("block dimension must be positive".to_string()));
    }
    let grid = n.div_ceil(block_dim_x as u64);
    let grid = u32::try_from(grid).map_err(|_| {
        CudaError::InvalidGeometry(format!(
            "{} elements need {} blocks of {}, more than a 1D grid holds",
            n, grid, block_dim_x
        ))
    })?;
    Ok(LaunchGeometry {
        grid_dim: (grid, 1, 1),
        block_dim: (block_dim_x, 1, 1),
        shared_mem_bytes: 0,
    })
}

/// Block size to launch with: the requested size capped at the device limit.
pub fn effective_block_dim(requested: Option<u32>, device_max: u32) -> u32 {
    requested.map_or(device_max, |r| r.min(device_max)).max(1)
}
