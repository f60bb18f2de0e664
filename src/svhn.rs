use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use ndarray::{Array1, Array4, ShapeBuilder};

use crate::error::{Result, ZError};
use crate::mat::{self, MatArray};

// ============================================================
// SVHN cropped-digits dataset
// ============================================================

pub const TRAIN_URL: &str = "http://ufldl.stanford.edu/housenumbers/train_32x32.mat";
pub const TEST_URL: &str = "http://ufldl.stanford.edu/housenumbers/test_32x32.mat";

pub const TRAIN_FILE: &str = "train_32x32.mat";
pub const TEST_FILE: &str = "test_32x32.mat";

/// One raw split as stored in the container: images in MATLAB
/// axis order `[height, width, channel, sample]`, labels `1..=10`
/// where 10 encodes the digit zero.
#[derive(Debug)]
pub struct SvhnSplit {
    pub images: Array4<u8>,
    pub labels: Array1<u8>,
}

/// Fetches `url` into `path` unless the file is already there.
/// Presence is the only check; no sizes, checksums or retries.
pub fn ensure_downloaded(path: &str, url: &str) -> Result<()> {
    if Path::new(path).exists() {
        log::info!("{} already present, skipping download", path);
        return Ok(());
    }
    log::info!("downloading {}", url);
    let response = reqwest::blocking::get(url)?;
    let status = response.status();
    if !status.is_success() {
        return Err(ZError::HttpStatus(status, url.to_string()));
    }
    let bytes = response.bytes()?;
    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    log::info!("wrote {} ({} bytes)", path, bytes.len());
    Ok(())
}

fn take_variable(arrays: &mut Vec<MatArray>, name: &str, path: &str) -> Result<MatArray> {
    match arrays.iter().position(|a| a.name == name) {
        Some(i) => Ok(arrays.swap_remove(i)),
        None => Err(ZError::MatError(format!(
            "{}: variable '{}' not found",
            path, name
        ))),
    }
}

/// Loads one split from disk. The container data is column-major;
/// the returned arrays keep MATLAB's logical indexing.
pub fn load_split(path: &str) -> Result<SvhnSplit> {
    log::info!("loading {}", path);
    let bytes = fs::read(path)?;
    let mut arrays = mat::parse_mat(&bytes)?;

    let x = take_variable(&mut arrays, "X", path)?;
    let y = take_variable(&mut arrays, "y", path)?;

    if x.dims.len() != 4 {
        return Err(ZError::ShapeError(format!(
            "{}: expected 4-d image data, got dimensions {:?}",
            path, x.dims
        )));
    }
    let (h, w, c, n) = (x.dims[0], x.dims[1], x.dims[2], x.dims[3]);
    let images = Array4::from_shape_vec((h, w, c, n).f(), x.data)
        .map_err(|e| ZError::ShapeError(format!("{}: images: {}", path, e)))?;

    if y.dims.len() > 2 || y.num_elements() != n {
        return Err(ZError::ShapeError(format!(
            "{}: expected {} labels, got dimensions {:?}",
            path, n, y.dims
        )));
    }
    let labels = Array1::from_vec(y.data);

    log::info!("{}: {} samples of {}x{}x{}", path, n, h, w, c);
    Ok(SvhnSplit { images, labels })
}
