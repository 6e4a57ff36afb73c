//! Binary persistence of mixtures.
//!
//! The format is little-endian throughout and byte-compatible with the
//! existing model tools:
//!
//! ```text
//! [4B id] [4B fd] [4B nd] [4B diagonal flag (1 = diagonal, 0 = full)]
//! nd x:
//!   [4B density id] [8B prior] [fd x 8B mean] [cov_len x 8B covariance]
//! ```
//!
//! `cov_len` is `fd` for diagonal and `fd * (fd + 1) / 2` (packed lower
//! triangle, row-major) for full covariances. A file may hold several
//! mixtures back to back.

use std::io::{self, BufReader, BufWriter, Read, Write};

use crate::density::{CovarianceKind, Density};
use crate::error::GmmError;
use crate::mixture::Mixture;

/// Upper bound on header fields; anything larger is treated as corruption.
const MAX_DIM: usize = 1 << 16;

/// Values reserved ahead of the data actually read from a stream.
const PREALLOC: usize = 4096;

/// Writes one mixture.
pub fn write_mixture(m: &Mixture, w: &mut dyn Write) -> Result<(), GmmError> {
    let mut bw = BufWriter::new(w);
    write_mixture_to(m, &mut bw)?;
    bw.flush()?;
    Ok(())
}

/// Writes a sequence of mixtures back to back.
pub fn write_mixtures(ms: &[Mixture], w: &mut dyn Write) -> Result<(), GmmError> {
    let mut bw = BufWriter::new(w);
    for m in ms {
        write_mixture_to(m, &mut bw)?;
    }
    bw.flush()?;
    Ok(())
}

fn write_mixture_to(m: &Mixture, w: &mut impl Write) -> Result<(), GmmError> {
    w.write_all(&m.id.to_le_bytes())?;
    w.write_all(&(m.fd() as i32).to_le_bytes())?;
    w.write_all(&(m.nd() as i32).to_le_bytes())?;
    let flag: i32 = match m.kind() {
        CovarianceKind::Diagonal => 1,
        CovarianceKind::Full => 0,
    };
    w.write_all(&flag.to_le_bytes())?;

    for d in m.components() {
        w.write_all(&d.id.to_le_bytes())?;
        w.write_all(&d.apr().to_le_bytes())?;
        for &v in d.mue() {
            w.write_all(&v.to_le_bytes())?;
        }
        for &v in d.cov() {
            w.write_all(&v.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Reads one mixture.
///
/// Consumes exactly one record, so consecutive calls on the same stream
/// read consecutive mixtures. Wrap unbuffered streams in a `BufReader`.
/// A stream that ends anywhere inside the record is reported as
/// [`GmmError::InvalidFormat`].
pub fn read_mixture(mut r: &mut dyn Read) -> Result<Mixture, GmmError> {
    let id = read_i32(&mut r)?;
    read_mixture_body(id, &mut r)
}

/// Reads mixtures until the stream ends cleanly at a record boundary.
pub fn read_mixtures(r: &mut dyn Read) -> Result<Vec<Mixture>, GmmError> {
    let mut br = BufReader::new(r);
    let mut out = Vec::new();
    loop {
        let mut head = [0u8; 4];
        let mut got = 0;
        while got < head.len() {
            let n = br.read(&mut head[got..])?;
            if n == 0 {
                break;
            }
            got += n;
        }
        match got {
            0 => return Ok(out),
            4 => out.push(read_mixture_body(i32::from_le_bytes(head), &mut br)?),
            _ => return Err(GmmError::InvalidFormat("truncated mixture header".into())),
        }
    }
}

fn read_mixture_body(id: i32, r: &mut impl Read) -> Result<Mixture, GmmError> {
    let fd = read_count(r, "feature dimension")?;
    let nd = read_count(r, "density count")?;
    let kind = match read_i32(r)? {
        1 => CovarianceKind::Diagonal,
        0 => CovarianceKind::Full,
        other => {
            return Err(GmmError::InvalidFormat(format!(
                "invalid diagonal flag {other}"
            )));
        }
    };

    let cov_len = kind.cov_len(fd);
    let mut components = Vec::with_capacity(nd.min(PREALLOC));
    for _ in 0..nd {
        let did = read_i32(r)?;
        let apr = read_f64(r)?;
        let mue = read_f64s(r, fd)?;
        let cov = read_f64s(r, cov_len)?;
        let mut d = Density::new(fd, kind);
        d.id = did;
        d.fill(apr, &mue, &cov)?;
        components.push(d);
    }
    Mixture::from_components(id, components)
}

pub(crate) fn truncated(e: io::Error) -> GmmError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        GmmError::InvalidFormat("truncated record".into())
    } else {
        GmmError::Io(e)
    }
}

pub(crate) fn read_i32(r: &mut impl Read) -> Result<i32, GmmError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(truncated)?;
    Ok(i32::from_le_bytes(buf))
}

pub(crate) fn read_f64(r: &mut impl Read) -> Result<f64, GmmError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(truncated)?;
    Ok(f64::from_le_bytes(buf))
}

/// Reads `len` values, growing the buffer only as data arrives so a
/// corrupt length cannot force a huge allocation.
pub(crate) fn read_f64s(r: &mut impl Read, len: usize) -> Result<Vec<f64>, GmmError> {
    let mut out = Vec::with_capacity(len.min(PREALLOC));
    for _ in 0..len {
        out.push(read_f64(r)?);
    }
    Ok(out)
}

pub(crate) fn read_count(r: &mut impl Read, what: &str) -> Result<usize, GmmError> {
    let v = read_i32(r)?;
    if v <= 0 || v as usize > MAX_DIM {
        return Err(GmmError::InvalidFormat(format!("invalid {what} {v}")));
    }
    Ok(v as usize)
}

impl Mixture {
    /// Writes the mixture in the binary model format.
    pub fn write(&self, w: &mut dyn Write) -> Result<(), GmmError> {
        write_mixture(self, w)
    }

    /// Reads a mixture in the binary model format.
    pub fn read(r: &mut dyn Read) -> Result<Mixture, GmmError> {
        read_mixture(r)
    }
}
