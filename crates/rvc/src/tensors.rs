//! Memory-mapped safetensors access for voice-print indexes.

use std::path::Path;

use memmap2::MmapOptions;
use safetensors::tensor::{Dtype, SafeTensorError};
use thiserror::Error;

/// A row-major 2-D `f32` matrix read from a tensor file.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixF32 {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

#[derive(Debug)]
pub struct TensorStore {
    mmap: memmap2::Mmap,
}

#[derive(Debug, Error)]
pub enum TensorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("safetensors error: {0}")]
    SafeTensors(#[from] SafeTensorError),
    #[error("unsupported dtype for {name}: {dtype:?}")]
    UnsupportedDtype { name: String, dtype: Dtype },
    #[error("{name} must be 2-D, got shape {shape:?}")]
    NotAMatrix { name: String, shape: Vec<usize> },
    #[error("{name} has {bytes} bytes, expected {expected}")]
    InvalidByteLen {
        name: String,
        bytes: usize,
        expected: usize,
    },
}

impl TensorStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TensorError> {
        let file = std::fs::File::open(path)?;
        // SAFETY: read-only mapping; the file is never written through it.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Self { mmap })
    }

    pub fn names(&self) -> Result<Vec<String>, TensorError> {
        let st = safetensors::SafeTensors::deserialize(&self.mmap)?;
        Ok(st.iter().map(|(name, _)| name.to_string()).collect())
    }

    /// Read a 2-D F32 or BF16 tensor, widening to `f32`.
    pub fn matrix_f32(&self, name: &str) -> Result<MatrixF32, TensorError> {
        let st = safetensors::SafeTensors::deserialize(&self.mmap)?;
        let tv = st.tensor(name)?;
        let &[rows, cols] = tv.shape() else {
            return Err(TensorError::NotAMatrix {
                name: name.to_string(),
                shape: tv.shape().to_vec(),
            });
        };

        let elem_size = match tv.dtype() {
            Dtype::F32 => 4,
            Dtype::BF16 => 2,
            other => {
                return Err(TensorError::UnsupportedDtype {
                    name: name.to_string(),
                    dtype: other,
                });
            }
        };
        let raw = tv.data();
        let expected = rows * cols * elem_size;
        if raw.len() != expected {
            return Err(TensorError::InvalidByteLen {
                name: name.to_string(),
                bytes: raw.len(),
                expected,
            });
        }

        let data = if elem_size == 4 {
            raw.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        } else {
            raw.chunks_exact(2)
                .map(|c| f32::from_bits(u32::from(u16::from_le_bytes([c[0], c[1]])) << 16))
                .collect()
        };

        Ok(MatrixF32 { rows, cols, data })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::borrow::Cow;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use safetensors::tensor::{Dtype, View, serialize_to_file};

    #[derive(Debug, Clone)]
    pub(crate) struct RawTensor {
        pub dtype: Dtype,
        pub shape: Vec<usize>,
        pub data: Vec<u8>,
    }

    impl View for RawTensor {
        fn dtype(&self) -> Dtype {
            self.dtype
        }

        fn shape(&self) -> &[usize] {
            &self.shape
        }

        fn data(&self) -> Cow<'_, [u8]> {
            Cow::Borrowed(&self.data)
        }

        fn data_len(&self) -> usize {
            self.data.len()
        }
    }

    pub(crate) fn tmp_file(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        p.push(format!("rvc-test-{name}-{nanos}.safetensors"));
        p
    }

    pub(crate) fn f32_tensor(shape: Vec<usize>, values: &[f32]) -> RawTensor {
        RawTensor {
            dtype: Dtype::F32,
            shape,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    pub(crate) fn write(path: &PathBuf, tensors: Vec<(&str, RawTensor)>) {
        let named: Vec<(String, RawTensor)> = tensors
            .into_iter()
            .map(|(n, t)| (n.to_string(), t))
            .collect();
        serialize_to_file(named, &None, path).expect("serialize safetensors");
    }
}
