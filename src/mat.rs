use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::{Result, ZError};

// ============================================================
// MAT-file level 5 reader
// ============================================================
// Just enough of the format to load the SVHN containers: a 128
// byte header followed by tagged data elements, where the
// payload elements are zlib-compressed (miCOMPRESSED) matrices
// of uint8 data. Little-endian files only.

const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;

const MX_UINT8_CLASS: u32 = 9;

const HEADER_LEN: usize = 128;
// complex flag in the array-flags word
const FLAG_COMPLEX: u32 = 0x0800;

/// One named numeric variable out of a MAT container. `data` is
/// in MATLAB column-major order, `dims.iter().product()` bytes.
#[derive(Debug, Clone)]
pub struct MatArray {
    pub name: String,
    pub dims: Vec<usize>,
    pub data: Vec<u8>,
}

impl MatArray {
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }
}

fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_i32(b: &[u8]) -> i32 {
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

// ============================================================
// Element stream
// ============================================================

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ZError::MatError(format!(
                "unexpected end of data at offset {} (wanted {} bytes, {} left)",
                self.pos,
                n,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(le_u32(self.take(4)?))
    }

    // Elements are 8-byte aligned; both the file body (offset 128)
    // and decompressed buffers start on an 8 boundary.
    fn align8(&mut self) {
        let rem = self.pos % 8;
        if rem != 0 {
            self.pos = (self.pos + 8 - rem).min(self.buf.len());
        }
    }
}

/// Reads one data element tag + payload. Handles the packed
/// small-element form (type in the low 16 tag bits, payload in
/// the tag's trailing 4 bytes).
fn next_element<'a>(cur: &mut Cursor<'a>) -> Result<(u32, &'a [u8])> {
    let first = cur.read_u32()?;
    if first >> 16 != 0 {
        let ty = first & 0xFFFF;
        let nbytes = (first >> 16) as usize;
        debug_assert!(nbytes <= 4);
        let data = cur.take(4)?;
        return Ok((ty, &data[..nbytes.min(4)]));
    }
    let nbytes = cur.read_u32()? as usize;
    let data = cur.take(nbytes)?;
    // compressed payloads are the one element kind not padded out
    if first != MI_COMPRESSED {
        cur.align8();
    }
    Ok((first, data))
}

// ============================================================
// Matrix elements
// ============================================================

fn parse_matrix(data: &[u8]) -> Result<MatArray> {
    let mut cur = Cursor::new(data, 0);

    let (ty, flags) = next_element(&mut cur)?;
    if ty != MI_UINT32 || flags.len() < 8 {
        return Err(ZError::MatError(format!(
            "bad array-flags sub-element (type {}, {} bytes)",
            ty,
            flags.len()
        )));
    }
    let flags_word = le_u32(flags);
    let class = flags_word & 0xFF;

    let (ty, dim_bytes) = next_element(&mut cur)?;
    if ty != MI_INT32 {
        return Err(ZError::MatError(format!(
            "bad dimensions sub-element (type {})",
            ty
        )));
    }
    let mut dims = Vec::with_capacity(dim_bytes.len() / 4);
    for chunk in dim_bytes.chunks_exact(4) {
        let d = le_i32(chunk);
        if d < 0 {
            return Err(ZError::MatError(format!("negative dimension {}", d)));
        }
        dims.push(d as usize);
    }

    let (ty, name_bytes) = next_element(&mut cur)?;
    if ty != MI_INT8 {
        return Err(ZError::MatError(format!(
            "bad array-name sub-element (type {})",
            ty
        )));
    }
    let name = String::from_utf8_lossy(name_bytes).into_owned();

    if class != MX_UINT8_CLASS {
        return Err(ZError::MatError(format!(
            "variable '{}': unsupported array class {} (only uint8 is handled)",
            name, class
        )));
    }
    if flags_word & FLAG_COMPLEX != 0 {
        return Err(ZError::MatError(format!(
            "variable '{}': complex data is not handled",
            name
        )));
    }

    let (ty, real) = next_element(&mut cur)?;
    if ty != MI_UINT8 && ty != MI_INT8 {
        return Err(ZError::MatError(format!(
            "variable '{}': unsupported storage type {}",
            name, ty
        )));
    }
    let expected: usize = dims.iter().product();
    if real.len() != expected {
        return Err(ZError::MatError(format!(
            "variable '{}': {} data bytes for dimensions {:?}",
            name,
            real.len(),
            dims
        )));
    }

    log::debug!("mat variable '{}' dims {:?}", name, dims);
    Ok(MatArray {
        name,
        dims,
        data: real.to_vec(),
    })
}

fn parse_element_stream(cur: &mut Cursor, arrays: &mut Vec<MatArray>) -> Result<()> {
    while cur.remaining() >= 8 {
        let (ty, data) = next_element(cur)?;
        match ty {
            MI_COMPRESSED => {
                let mut inflated = Vec::new();
                ZlibDecoder::new(data).read_to_end(&mut inflated)?;
                log::trace!(
                    "inflated compressed element: {} -> {} bytes",
                    data.len(),
                    inflated.len()
                );
                let mut inner = Cursor::new(&inflated, 0);
                parse_element_stream(&mut inner, arrays)?;
            }
            MI_MATRIX => arrays.push(parse_matrix(data)?),
            other => {
                log::trace!("skipping element type {} ({} bytes)", other, data.len());
            }
        }
    }
    Ok(())
}

// ============================================================
// Entry point
// ============================================================

/// Parses a whole MAT container, returning every named uint8
/// variable it holds.
pub fn parse_mat(bytes: &[u8]) -> Result<Vec<MatArray>> {
    if bytes.len() < HEADER_LEN {
        return Err(ZError::MatError(format!(
            "{} bytes is too short for a level 5 header",
            bytes.len()
        )));
    }
    let endian = &bytes[126..128];
    if endian == b"MI" {
        return Err(ZError::MatError(
            "big-endian mat files are not supported".to_string(),
        ));
    }
    if endian != b"IM" {
        return Err(ZError::MatError(
            "missing endian indicator, not a level 5 mat file".to_string(),
        ));
    }
    let version = le_u16(&bytes[124..126]);
    log::trace!(
        "mat header version {:#06x}: {}",
        version,
        String::from_utf8_lossy(&bytes[..116]).trim_end_matches(|c| c == '\0' || c == ' ')
    );

    let mut arrays = Vec::new();
    let mut cur = Cursor::new(bytes, HEADER_LEN);
    parse_element_stream(&mut cur, &mut arrays)?;
    Ok(arrays)
}


#[cfg(test)]
mod tests {
    use super::testdata::*;
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn fixture_x() -> (Vec<i32>, Vec<u8>) {
        let dims = vec![2, 2, 3, 2];
        let data: Vec<u8> = (0..24).collect();
        (dims, data)
    }

    #[test]
    fn parses_uncompressed_variables() {
        let (dims, data) = fixture_x();
        let mut file = header();
        file.extend_from_slice(&matrix_element(MX_UINT8_CLASS, "X", &dims, &data));
        file.extend_from_slice(&matrix_element(MX_UINT8_CLASS, "y", &[2, 1], &[3, 10]));

        let arrays = parse_mat(&file).unwrap();
        assert_eq!(arrays.len(), 2);
        assert_eq!(arrays[0].name, "X");
        assert_eq!(arrays[0].dims, vec![2, 2, 3, 2]);
        assert_eq!(arrays[0].data, data);
        assert_eq!(arrays[1].name, "y");
        assert_eq!(arrays[1].dims, vec![2, 1]);
        assert_eq!(arrays[1].data, vec![3, 10]);
    }

    #[test]
    fn parses_compressed_variables() {
        let (dims, data) = fixture_x();
        let inner = matrix_element(MX_UINT8_CLASS, "X", &dims, &data);
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&inner).unwrap();
        let compressed = enc.finish().unwrap();

        let mut file = header();
        // compressed elements carry no trailing pad
        file.extend_from_slice(&MI_COMPRESSED.to_le_bytes());
        file.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        file.extend_from_slice(&compressed);

        let arrays = parse_mat(&file).unwrap();
        assert_eq!(arrays.len(), 1);
        assert_eq!(arrays[0].name, "X");
        assert_eq!(arrays[0].dims, vec![2, 2, 3, 2]);
        assert_eq!(arrays[0].data, data);
    }

    #[test]
    fn rejects_big_endian_indicator() {
        let mut file = header();
        file[126..128].copy_from_slice(b"MI");
        let err = parse_mat(&file).unwrap_err();
        assert!(err.to_string().contains("big-endian"), "{}", err);
    }

    #[test]
    fn rejects_truncated_data() {
        let (dims, data) = fixture_x();
        let mut file = header();
        file.extend_from_slice(&matrix_element(MX_UINT8_CLASS, "X", &dims, &data));
        file.truncate(file.len() - 16);
        assert!(parse_mat(&file).is_err());
    }

    #[test]
    fn rejects_non_uint8_class() {
        let mx_double_class = 6;
        let mut file = header();
        file.extend_from_slice(&matrix_element(mx_double_class, "X", &[2, 2], &[0, 1, 2, 3]));
        let err = parse_mat(&file).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains('X') && msg.contains("class"), "{}", msg);
    }

    #[test]
    fn skips_unknown_top_level_elements() {
        let mut file = header();
        file.extend_from_slice(&element(MI_INT32, &42i32.to_le_bytes()));
        file.extend_from_slice(&matrix_element(MX_UINT8_CLASS, "y", &[2, 1], &[1, 2]));
        let arrays = parse_mat(&file).unwrap();
        assert_eq!(arrays.len(), 1);
        assert_eq!(arrays[0].name, "y");
    }
}
