//! Persisted particle record: explicit field-by-field encoding.
//!
//! The record layout is a design-level contract, not a memory image — every
//! field is encoded individually in the declared order, so the format is
//! stable across platforms and compiler versions:
//!
//! ```text
//! position.x .y .z   f64 x3   base tracking block
//! cell               i64      base tracking block
//! mass               f64
//! u_pdf.x .y .z      f64 x3
//! u_particle.x .y .z f64 x3
//! u_filtered.x .y .z f64 x3
//! z                  f64
//! rho                f64
//! dt                 f64
//! shift.x .y .z      f64 x3   transient, zeroed on read
//! ghost              i32      transient, zeroed on read
//! ```
//!
//! Text encoding: the same fields as space-separated tokens, one record per
//! line. Binary encoding: little-endian, contiguous, 164 bytes per record.
//!
//! Restart semantics: `shift` and `ghost` are per-step transient bookkeeping
//! and are *always* reset to zero on read — they are written (keeping the
//! layout uniform) but never authoritative. A record with the wrong token
//! count or byte length is a hard error: missing numeric fields cannot be
//! guessed.

use std::io::{self, BufRead, Read, Write};

use glam::DVec3;
use thiserror::Error;

use crate::particle::{Particle, ParticleCloud};

/// Selectable record encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Space-separated tokens, one record per line.
    Text,
    /// Little-endian contiguous block, [`BINARY_RECORD_LEN`] bytes.
    Binary,
}

/// Number of whitespace-separated tokens in one text record.
pub const TEXT_FIELD_COUNT: usize = 21;

/// Byte length of one binary record: 19 f64 fields + i64 cell + i32 ghost.
pub const BINARY_RECORD_LEN: usize = 19 * 8 + 8 + 4;

/// Errors of the particle persistence layer.
#[derive(Debug, Error)]
pub enum ParticleIoError {
    /// A text record had the wrong number of tokens.
    #[error("particle record: expected {expected} fields, found {found}")]
    FieldCount {
        /// Number of tokens the schema requires.
        expected: usize,
        /// Number of tokens present.
        found: usize,
    },
    /// A field failed to parse or carried an invalid value.
    #[error("particle record: malformed field {index}: {token:?}")]
    Malformed {
        /// Zero-based field index within the record.
        index: usize,
        /// The offending token or value.
        token: String,
    },
    /// A binary record or cloud header was shorter than the schema requires.
    #[error("particle record: truncated input, expected {expected} bytes")]
    Truncated {
        /// Number of bytes the schema requires.
        expected: usize,
    },
    /// The cloud header line/count could not be read.
    #[error("particle cloud: malformed header: {reason}")]
    BadHeader {
        /// What went wrong.
        reason: String,
    },
    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

// ---------------------------------------------------------------------------
// Single-record codec
// ---------------------------------------------------------------------------

/// Write one particle as a line of space-separated tokens.
pub fn write_text<W: Write>(w: &mut W, p: &Particle) -> io::Result<()> {
    writeln!(
        w,
        "{} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {}",
        p.position.x,
        p.position.y,
        p.position.z,
        p.cell,
        p.mass,
        p.u_pdf.x,
        p.u_pdf.y,
        p.u_pdf.z,
        p.u_particle.x,
        p.u_particle.y,
        p.u_particle.z,
        p.u_filtered.x,
        p.u_filtered.y,
        p.u_filtered.z,
        p.z,
        p.rho,
        p.dt,
        p.shift.x,
        p.shift.y,
        p.shift.z,
        p.ghost,
    )
}

/// Parse one particle from a line of space-separated tokens.
///
/// `shift` and `ghost` tokens must be present (schema check) but their
/// values are discarded: both are reset on read.
pub fn read_text(line: &str) -> Result<Particle, ParticleIoError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != TEXT_FIELD_COUNT {
        return Err(ParticleIoError::FieldCount {
            expected: TEXT_FIELD_COUNT,
            found: tokens.len(),
        });
    }

    let float = |index: usize| -> Result<f64, ParticleIoError> {
        tokens[index]
            .parse::<f64>()
            .map_err(|_| ParticleIoError::Malformed {
                index,
                token: tokens[index].to_string(),
            })
    };
    let cell = tokens[3]
        .parse::<u64>()
        .map_err(|_| ParticleIoError::Malformed {
            index: 3,
            token: tokens[3].to_string(),
        })? as usize;
    // Transient fields: parsed for schema validation, values discarded.
    for index in 17..20 {
        float(index)?;
    }
    tokens[20]
        .parse::<i32>()
        .map_err(|_| ParticleIoError::Malformed {
            index: 20,
            token: tokens[20].to_string(),
        })?;

    Ok(Particle {
        position: DVec3::new(float(0)?, float(1)?, float(2)?),
        cell,
        mass: float(4)?,
        u_pdf: DVec3::new(float(5)?, float(6)?, float(7)?),
        u_particle: DVec3::new(float(8)?, float(9)?, float(10)?),
        u_filtered: DVec3::new(float(11)?, float(12)?, float(13)?),
        z: float(14)?,
        rho: float(15)?,
        dt: float(16)?,
        shift: DVec3::ZERO,
        ghost: 0,
    })
}

/// Byte cursor for assembling one binary record.
struct FieldWriter<'a> {
    buf: &'a mut [u8],
    at: usize,
}

impl FieldWriter<'_> {
    fn f64(&mut self, v: f64) {
        self.buf[self.at..self.at + 8].copy_from_slice(&v.to_le_bytes());
        self.at += 8;
    }

    fn vec3(&mut self, v: DVec3) {
        self.f64(v.x);
        self.f64(v.y);
        self.f64(v.z);
    }

    fn i64(&mut self, v: i64) {
        self.buf[self.at..self.at + 8].copy_from_slice(&v.to_le_bytes());
        self.at += 8;
    }

    fn i32(&mut self, v: i32) {
        self.buf[self.at..self.at + 4].copy_from_slice(&v.to_le_bytes());
        self.at += 4;
    }
}

/// Byte cursor for decoding one binary record.
struct FieldReader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl FieldReader<'_> {
    fn f64(&mut self) -> f64 {
        let v = f64::from_le_bytes(self.buf[self.at..self.at + 8].try_into().unwrap());
        self.at += 8;
        v
    }

    fn vec3(&mut self) -> DVec3 {
        DVec3::new(self.f64(), self.f64(), self.f64())
    }

    fn i64(&mut self) -> i64 {
        let v = i64::from_le_bytes(self.buf[self.at..self.at + 8].try_into().unwrap());
        self.at += 8;
        v
    }
}

/// Write one particle as a little-endian binary block.
pub fn write_binary<W: Write>(w: &mut W, p: &Particle) -> io::Result<()> {
    let mut buf = [0u8; BINARY_RECORD_LEN];
    let mut out = FieldWriter { buf: &mut buf, at: 0 };
    out.vec3(p.position);
    out.i64(p.cell as i64);
    out.f64(p.mass);
    out.vec3(p.u_pdf);
    out.vec3(p.u_particle);
    out.vec3(p.u_filtered);
    out.f64(p.z);
    out.f64(p.rho);
    out.f64(p.dt);
    out.vec3(p.shift);
    out.i32(p.ghost);
    debug_assert_eq!(out.at, BINARY_RECORD_LEN);
    w.write_all(&buf)
}

/// Read one particle from a little-endian binary block.
///
/// Short input is a hard schema error. `shift` and `ghost` are reset.
pub fn read_binary<R: Read>(r: &mut R) -> Result<Particle, ParticleIoError> {
    let mut buf = [0u8; BINARY_RECORD_LEN];
    r.read_all_or_truncated(&mut buf)?;

    let mut inp = FieldReader { buf: &buf, at: 0 };
    let position = inp.vec3();
    let cell_raw = inp.i64();
    if cell_raw < 0 {
        return Err(ParticleIoError::Malformed {
            index: 3,
            token: cell_raw.to_string(),
        });
    }
    let mass = inp.f64();
    let u_pdf = inp.vec3();
    let u_particle = inp.vec3();
    let u_filtered = inp.vec3();
    let z = inp.f64();
    let rho = inp.f64();
    let dt = inp.f64();
    let _shift = inp.vec3(); // transient: reset below
    // trailing ghost i32: transient, reset below

    Ok(Particle {
        position,
        cell: cell_raw as usize,
        mass,
        u_pdf,
        u_particle,
        u_filtered,
        z,
        rho,
        dt,
        shift: DVec3::ZERO,
        ghost: 0,
    })
}

/// `read_exact` that reports truncation as a schema error instead of a bare
/// I/O error.
trait ReadAllOrTruncated {
    fn read_all_or_truncated(&mut self, buf: &mut [u8]) -> Result<(), ParticleIoError>;
}

impl<R: Read> ReadAllOrTruncated for R {
    fn read_all_or_truncated(&mut self, buf: &mut [u8]) -> Result<(), ParticleIoError> {
        self.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ParticleIoError::Truncated { expected: buf.len() }
            } else {
                ParticleIoError::Io(e)
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Whole-cloud helpers
// ---------------------------------------------------------------------------

/// Write a particle count followed by every record.
pub fn write_cloud<W: Write>(
    w: &mut W,
    cloud: &ParticleCloud,
    encoding: Encoding,
) -> Result<(), ParticleIoError> {
    match encoding {
        Encoding::Text => {
            writeln!(w, "{}", cloud.len())?;
            for p in cloud.particles() {
                write_text(w, p)?;
            }
        }
        Encoding::Binary => {
            w.write_all(&(cloud.len() as u64).to_le_bytes())?;
            for p in cloud.particles() {
                write_binary(w, p)?;
            }
        }
    }
    Ok(())
}

/// Read a whole cloud written by [`write_cloud`].
pub fn read_cloud<R: BufRead>(
    r: &mut R,
    encoding: Encoding,
) -> Result<ParticleCloud, ParticleIoError> {
    let mut cloud = ParticleCloud::new();
    match encoding {
        Encoding::Text => {
            let mut header = String::new();
            r.read_line(&mut header)?;
            let count: usize =
                header
                    .trim()
                    .parse()
                    .map_err(|_| ParticleIoError::BadHeader {
                        reason: format!("invalid particle count {:?}", header.trim()),
                    })?;
            let mut line = String::new();
            for _ in 0..count {
                line.clear();
                let n = r.read_line(&mut line)?;
                if n == 0 {
                    return Err(ParticleIoError::FieldCount {
                        expected: TEXT_FIELD_COUNT,
                        found: 0,
                    });
                }
                cloud.push(read_text(&line)?);
            }
        }
        Encoding::Binary => {
            let mut header = [0u8; 8];
            r.read_all_or_truncated(&mut header)?;
            let count = u64::from_le_bytes(header) as usize;
            for _ in 0..count {
                cloud.push(read_binary(r)?);
            }
        }
    }
    Ok(cloud)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_particle() -> Particle {
        Particle {
            position: DVec3::new(0.125, -2.5, 3.75),
            cell: 42,
            mass: 1.0e-3,
            u_pdf: DVec3::new(2.0, 0.1, -0.2),
            u_particle: DVec3::new(1.9, 0.05, -0.15),
            u_filtered: DVec3::new(2.05, 0.0, -0.1),
            z: 0.3,
            rho: 1.2,
            dt: 5.0e-4,
            shift: DVec3::new(0.01, 0.02, 0.03),
            ghost: 1,
        }
    }

    #[test]
    fn text_record_has_declared_field_count() {
        let mut buf = Vec::new();
        write_text(&mut buf, &sample_particle()).unwrap();
        let line = String::from_utf8(buf).unwrap();
        assert_eq!(line.split_whitespace().count(), TEXT_FIELD_COUNT);
    }

    #[test]
    fn text_missing_field_is_hard_error() {
        let mut buf = Vec::new();
        write_text(&mut buf, &sample_particle()).unwrap();
        let line = String::from_utf8(buf).unwrap();
        let truncated = line.rsplit_once(' ').unwrap().0;
        assert!(matches!(
            read_text(truncated),
            Err(ParticleIoError::FieldCount { expected: 21, found: 20 })
        ));
    }

    #[test]
    fn text_garbage_field_is_hard_error() {
        let mut buf = Vec::new();
        write_text(&mut buf, &sample_particle()).unwrap();
        let line = String::from_utf8(buf).unwrap();
        let corrupted = line.replacen("1.2", "abc", 1);
        assert!(matches!(
            read_text(&corrupted),
            Err(ParticleIoError::Malformed { .. })
        ));
    }

    #[test]
    fn binary_truncated_block_is_hard_error() {
        let mut buf = Vec::new();
        write_binary(&mut buf, &sample_particle()).unwrap();
        assert_eq!(buf.len(), BINARY_RECORD_LEN);
        buf.truncate(BINARY_RECORD_LEN - 7);
        let mut cursor = &buf[..];
        assert!(matches!(
            read_binary(&mut cursor),
            Err(ParticleIoError::Truncated { .. })
        ));
    }
}
