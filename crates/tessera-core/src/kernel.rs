//! Square convolution kernels and the static kernel catalog.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// An immutable `size x size` weight matrix with odd `size`.
///
/// Weights are shared behind an [`Arc`], so cloning a kernel for every worker
/// never copies the matrix. Deserialising runs the same checks as
/// [`Kernel::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "KernelParts", try_from = "KernelParts")]
pub struct Kernel {
    name: String,
    size: usize,
    weights: Arc<[f64]>,
}

impl Kernel {
    /// Build a kernel from row-major weights.
    pub fn new(name: impl Into<String>, size: usize, weights: Vec<f64>) -> Result<Self, CoreError> {
        let name = name.into();
        if size % 2 == 0 {
            return Err(CoreError::EvenKernel { name, size });
        }
        if weights.len() != size * size {
            return Err(CoreError::KernelWeights {
                name,
                size,
                expected: size * size,
                actual: weights.len(),
            });
        }
        Ok(Self {
            name,
            size,
            weights: weights.into(),
        })
    }

    /// The `size x size` kernel that leaves every image unchanged.
    pub fn identity(size: usize) -> Result<Self, CoreError> {
        let mut weights = vec![0.0; size * size];
        if size % 2 == 1 {
            weights[(size / 2) * size + size / 2] = 1.0;
        }
        Self::new("identity", size, weights)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// `size / 2`: how far the stencil reaches in each direction.
    pub fn radius(&self) -> usize {
        self.size / 2
    }

    /// Ghost rows needed on each side of a partition.
    pub fn halo_depth(&self) -> usize {
        self.radius()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    #[inline]
    pub fn weight(&self, ky: usize, kx: usize) -> f64 {
        self.weights[ky * self.size + kx]
    }
}

#[derive(Serialize, Deserialize)]
struct KernelParts {
    name: String,
    size: usize,
    weights: Vec<f64>,
}

impl From<Kernel> for KernelParts {
    fn from(kernel: Kernel) -> Self {
        Self {
            weights: kernel.weights.to_vec(),
            name: kernel.name,
            size: kernel.size,
        }
    }
}

impl TryFrom<KernelParts> for Kernel {
    type Error = CoreError;

    fn try_from(parts: KernelParts) -> Result<Self, CoreError> {
        Kernel::new(parts.name, parts.size, parts.weights)
    }
}

/// A catalog entry: static name, size and row-major weights.
#[derive(Debug, Clone, Copy)]
pub struct KernelSpec {
    pub name: &'static str,
    pub size: usize,
    pub weights: &'static [f64],
}

impl KernelSpec {
    pub fn to_kernel(&self) -> Kernel {
        Kernel {
            name: self.name.to_string(),
            size: self.size,
            weights: self.weights.into(),
        }
    }
}

const RIDGE: [f64; 9] = [0.0, -1.0, 0.0, -1.0, 4.0, -1.0, 0.0, -1.0, 0.0];

const EDGE: [f64; 9] = [-1.0, -1.0, -1.0, -1.0, 8.0, -1.0, -1.0, -1.0, -1.0];

const SHARPEN: [f64; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];

const BOXBLUR: [f64; 9] = [
    1.0 / 9.0, 1.0 / 9.0, 1.0 / 9.0,
    1.0 / 9.0, 1.0 / 9.0, 1.0 / 9.0,
    1.0 / 9.0, 1.0 / 9.0, 1.0 / 9.0,
];

const GAUSSIAN3: [f64; 9] = [
    1.0 / 16.0, 2.0 / 16.0, 1.0 / 16.0,
    2.0 / 16.0, 4.0 / 16.0, 2.0 / 16.0,
    1.0 / 16.0, 2.0 / 16.0, 1.0 / 16.0,
];

const GAUSSIAN5: [f64; 25] = [
    1.0 / 256.0, 4.0 / 256.0, 6.0 / 256.0, 4.0 / 256.0, 1.0 / 256.0,
    4.0 / 256.0, 16.0 / 256.0, 24.0 / 256.0, 16.0 / 256.0, 4.0 / 256.0,
    6.0 / 256.0, 24.0 / 256.0, 36.0 / 256.0, 24.0 / 256.0, 6.0 / 256.0,
    4.0 / 256.0, 16.0 / 256.0, 24.0 / 256.0, 16.0 / 256.0, 4.0 / 256.0,
    1.0 / 256.0, 4.0 / 256.0, 6.0 / 256.0, 4.0 / 256.0, 1.0 / 256.0,
];

const UNSHARP5: [f64; 25] = [
    -1.0 / 256.0, -4.0 / 256.0, -6.0 / 256.0, -4.0 / 256.0, -1.0 / 256.0,
    -4.0 / 256.0, -16.0 / 256.0, -24.0 / 256.0, -16.0 / 256.0, -4.0 / 256.0,
    -6.0 / 256.0, -24.0 / 256.0, 476.0 / 256.0, -24.0 / 256.0, -6.0 / 256.0,
    -4.0 / 256.0, -16.0 / 256.0, -24.0 / 256.0, -16.0 / 256.0, -4.0 / 256.0,
    -1.0 / 256.0, -4.0 / 256.0, -6.0 / 256.0, -4.0 / 256.0, -1.0 / 256.0,
];

/// The built-in kernels, in catalog order.
pub const KERNEL_CATALOG: [KernelSpec; 7] = [
    KernelSpec { name: "ridge", size: 3, weights: &RIDGE },
    KernelSpec { name: "edge", size: 3, weights: &EDGE },
    KernelSpec { name: "sharpen", size: 3, weights: &SHARPEN },
    KernelSpec { name: "boxblur", size: 3, weights: &BOXBLUR },
    KernelSpec { name: "gaussblur3", size: 3, weights: &GAUSSIAN3 },
    KernelSpec { name: "gaussblur5", size: 5, weights: &GAUSSIAN5 },
    KernelSpec { name: "unsharp5", size: 5, weights: &UNSHARP5 },
];

/// Look up a catalog kernel by name.
pub fn kernel_by_name(name: &str) -> Result<Kernel, CoreError> {
    KERNEL_CATALOG
        .iter()
        .find(|spec| spec.name == name)
        .map(KernelSpec::to_kernel)
        .ok_or_else(|| CoreError::UnknownKernel(name.to_string()))
}

/// Look up a catalog kernel by position.
pub fn kernel_by_index(index: usize) -> Result<Kernel, CoreError> {
    KERNEL_CATALOG
        .get(index)
        .map(KernelSpec::to_kernel)
        .ok_or_else(|| CoreError::UnknownKernel(format!("#{index}")))
}

/// Every catalog kernel, in order.
pub fn catalog() -> Vec<Kernel> {
    KERNEL_CATALOG.iter().map(KernelSpec::to_kernel).collect()
}
