//! Window geometry shared by every spatial rank.
//!
//! A [`PoolGeometry`] describes one operator invocation: the `[batch,
//! channel, spatial...]` extents of the input and the per-axis kernel and
//! stride. The spatial rank `R` is a const generic, so the 1D, 2D and 3D
//! kernels are one monomorphized routine instead of three nested-loop bodies.

use crate::error::Error;

/// Threads per block on the device, and output cells per work chunk on the CPU.
pub const THREADS_PER_BLOCK: usize = 1024;

/// Upper bound on the number of blocks in one launch. Larger outputs are
/// covered by the grid-stride loop inside the kernels.
pub const MAX_BLOCKS: usize = 65_535;

/// Location of one output cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputCoord<const R: usize> {
    pub batch: usize,
    pub channel: usize,
    pub spatial: [usize; R],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolGeometry<const R: usize> {
    pub batch: usize,
    pub channels: usize,
    /// Input spatial extents, outermost axis first.
    pub extents: [usize; R],
    pub kernel: [usize; R],
    pub stride: [usize; R],
}

impl<const R: usize> PoolGeometry<R> {
    pub fn new(
        batch: usize,
        channels: usize,
        extents: [usize; R],
        kernel: [usize; R],
        stride: [usize; R],
    ) -> Result<Self, Error> {
        if kernel.contains(&0) {
            return Err(Error::InvalidOperation(format!(
                "Kernel size cannot be zero: {:?}",
                kernel
            )));
        }
        if stride.contains(&0) {
            return Err(Error::InvalidOperation(format!(
                "Stride cannot be zero: {:?}",
                stride
            )));
        }
        Ok(Self {
            batch,
            channels,
            extents,
            kernel,
            stride,
        })
    }

    /// Builds the geometry from an input shape `[N, C, spatial...]`.
    pub fn from_input_shape(
        shape: &[usize],
        kernel: [usize; R],
        stride: [usize; R],
    ) -> Result<Self, Error> {
        if shape.len() != R + 2 {
            return Err(Error::DimensionMismatch(R + 2, shape.len()));
        }
        let mut extents = [0usize; R];
        extents.copy_from_slice(&shape[2..]);
        Self::new(shape[0], shape[1], extents, kernel, stride)
    }

    /// Pooled extent per axis. Trailing cells that do not fill a stride are dropped.
    pub fn output_extents(&self) -> [usize; R] {
        let mut out = [0usize; R];
        for (axis, o) in out.iter_mut().enumerate() {
            *o = self.extents[axis] / self.stride[axis];
        }
        out
    }

    pub fn input_shape(&self) -> Vec<usize> {
        let mut shape = vec![self.batch, self.channels];
        shape.extend_from_slice(&self.extents);
        shape
    }

    pub fn output_shape(&self) -> Vec<usize> {
        let mut shape = vec![self.batch, self.channels];
        shape.extend_from_slice(&self.output_extents());
        shape
    }

    pub fn input_spatial_len(&self) -> usize {
        self.extents.iter().product()
    }

    pub fn output_spatial_len(&self) -> usize {
        self.output_extents().iter().product()
    }

    pub fn input_len(&self) -> usize {
        self.batch * self.channels * self.input_spatial_len()
    }

    pub fn output_len(&self) -> usize {
        self.batch * self.channels * self.output_spatial_len()
    }

    /// Decomposes a flat, row-major output index into batch, channel and
    /// pooled spatial coordinates.
    pub fn unravel_output(&self, flat: usize) -> OutputCoord<R> {
        let pooled = self.output_extents();
        let mut rem = flat;
        let mut spatial = [0usize; R];
        for axis in (0..R).rev() {
            spatial[axis] = rem % pooled[axis];
            rem /= pooled[axis];
        }
        OutputCoord {
            batch: rem / self.channels,
            channel: rem % self.channels,
            spatial,
        }
    }

    /// Inverse of [`unravel_output`](Self::unravel_output).
    pub fn ravel_output(&self, coord: &OutputCoord<R>) -> usize {
        let pooled = self.output_extents();
        let mut flat = coord.batch * self.channels + coord.channel;
        for axis in 0..R {
            flat = flat * pooled[axis] + coord.spatial[axis];
        }
        flat
    }

    /// Calls `f` with the flat input offset of every in-bounds cell of the
    /// window of `coord`, last axis fastest.
    ///
    /// The window of output position `po` on an axis covers
    /// `po * stride + offset - kernel / 2` for `offset in 0..kernel`.
    /// Candidates that fall before 0 or past the extent are skipped, so
    /// windows on the border are partial.
    #[inline]
    pub fn for_each_window_cell<F: FnMut(usize)>(&self, coord: &OutputCoord<R>, mut f: F) {
        let base = (coord.batch * self.channels + coord.channel) * self.input_spatial_len();
        let mut offset = [0usize; R];
        loop {
            let mut flat = 0usize;
            let mut in_bounds = true;
            for axis in 0..R {
                let pos = (coord.spatial[axis] * self.stride[axis] + offset[axis])
                    .checked_sub(self.kernel[axis] / 2);
                match pos {
                    Some(p) if p < self.extents[axis] => flat = flat * self.extents[axis] + p,
                    _ => {
                        in_bounds = false;
                        break;
                    }
                }
            }
            if in_bounds {
                f(base + flat);
            }

            // Advance the offset odometer.
            let mut axis = R;
            loop {
                if axis == 0 {
                    return;
                }
                axis -= 1;
                offset[axis] += 1;
                if offset[axis] < self.kernel[axis] {
                    break;
                }
                offset[axis] = 0;
            }
        }
    }

    /// Flat input offsets of the valid cells of one output cell's window.
    pub fn window_cells(&self, output_index: usize) -> Vec<usize> {
        let coord = self.unravel_output(output_index);
        let mut cells = Vec::new();
        self.for_each_window_cell(&coord, |i| cells.push(i));
        cells
    }

    /// The same geometry expressed with three spatial axes, leading axes
    /// padded with extent, kernel and stride 1. Windows are unchanged.
    pub fn padded_3d(&self) -> Result<PoolGeometry<3>, Error> {
        if R > 3 {
            return Err(Error::DimensionMismatch(3, R));
        }
        let mut extents = [1usize; 3];
        let mut kernel = [1usize; 3];
        let mut stride = [1usize; 3];
        extents[3 - R..].copy_from_slice(&self.extents);
        kernel[3 - R..].copy_from_slice(&self.kernel);
        stride[3 - R..].copy_from_slice(&self.stride);
        PoolGeometry::new(self.batch, self.channels, extents, kernel, stride)
    }

    pub(crate) fn check_input_len(&self, len: usize) -> Result<(), Error> {
        check_len(self.input_shape(), self.input_len(), len)
    }

    pub(crate) fn check_output_len(&self, len: usize) -> Result<(), Error> {
        check_len(self.output_shape(), self.output_len(), len)
    }
}

fn check_len(shape: Vec<usize>, expected: usize, actual: usize) -> Result<(), Error> {
    if expected != actual {
        return Err(Error::ShapeMismatch {
            expected: shape,
            actual: vec![actual],
        });
    }
    Ok(())
}

/// Grid and block sizing for one kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchDims {
    pub grid: u32,
    pub block: u32,
}

impl LaunchDims {
    /// One thread per output cell, in blocks of [`THREADS_PER_BLOCK`], with the
    /// grid capped at [`MAX_BLOCKS`].
    pub fn for_cells(cells: usize) -> Self {
        let blocks = cells.div_ceil(THREADS_PER_BLOCK).clamp(1, MAX_BLOCKS);
        Self {
            grid: blocks as u32,
            block: THREADS_PER_BLOCK as u32,
        }
    }

    /// Distance between consecutive cells handled by the same thread.
    pub fn grid_stride(&self) -> usize {
        self.grid as usize * self.block as usize
    }
}
