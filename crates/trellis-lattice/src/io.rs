// crates/trellis-lattice/src/io.rs

//! Lattice file I/O.
//!
//! The binary container (`.lat`) holds the WFSN payload followed by the
//! per-state word-boundary-time table: magic `TLAT`, u32 version, u32
//! output-type tag, u32 initial state, u32 state count, u64 arc count,
//! then per state a final flag byte (+ pair weight when final), u32 arc
//! count and the arcs (u32 input, u32 output, f32 am, f32 lm,
//! u32 target); after the payload one u32 boundary time per state.
//! Little endian throughout.
//!
//! `.json` / `.cbor` paths use the serde representation instead.

use std::io::{Read, Write};
use std::path::Path;

use trellis_core::error::{Error, Result};
use trellis_core::io::ext_lower;
use trellis_core::semiring::PairWeight;
use trellis_core::types::{OutputType, StateId};

use crate::lattice::{Lattice, LatticeArc};

/// File magic of the lattice container.
pub const LATTICE_MAGIC: &[u8; 4] = b"TLAT";
/// Current container version.
pub const LATTICE_VERSION: u32 = 1;

/// Write the binary container.
pub fn write_lattice<W: Write>(l: &Lattice, w: &mut W) -> Result<()> {
    w.write_all(LATTICE_MAGIC)?;
    w.write_all(&LATTICE_VERSION.to_le_bytes())?;
    w.write_all(&output_type_tag(l.output_type()).to_le_bytes())?;
    w.write_all(&l.initial().to_le_bytes())?;
    w.write_all(&l.num_states().to_le_bytes())?;
    w.write_all(&(l.num_arcs() as u64).to_le_bytes())?;
    for s in 0..l.num_states() {
        let state = l.state(s);
        match state.final_weight {
            Some(f) => {
                w.write_all(&[1u8])?;
                w.write_all(&f.am.to_le_bytes())?;
                w.write_all(&f.lm.to_le_bytes())?;
            }
            None => w.write_all(&[0u8])?,
        }
        w.write_all(&(state.arcs.len() as u32).to_le_bytes())?;
        for a in &state.arcs {
            w.write_all(&a.input.to_le_bytes())?;
            w.write_all(&a.output.to_le_bytes())?;
            w.write_all(&a.weight.am.to_le_bytes())?;
            w.write_all(&a.weight.lm.to_le_bytes())?;
            w.write_all(&a.target.to_le_bytes())?;
        }
    }
    // Word-boundary table after the WFSN payload.
    for s in 0..l.num_states() {
        w.write_all(&l.word_boundary(s).to_le_bytes())?;
    }
    Ok(())
}

/// Read the binary container.
pub fn read_lattice<R: Read>(r: &mut R) -> Result<Lattice> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != LATTICE_MAGIC {
        return Err(Error::Format("bad lattice magic".into()));
    }
    let version = read_u32(r)?;
    if version != LATTICE_VERSION {
        return Err(Error::Format(format!("unsupported lattice version {version}")));
    }
    let output_type = tag_output_type(read_u32(r)?)?;
    let initial = read_u32(r)?;
    let n_states = read_u32(r)?;
    let n_arcs = read_u64(r)?;
    let mut l = Lattice::new();
    l.set_output_type(output_type);
    for _ in 0..n_states {
        l.add_state();
    }
    let mut arcs_read = 0u64;
    for s in 0..n_states {
        let mut flag = [0u8; 1];
        r.read_exact(&mut flag)?;
        if flag[0] != 0 {
            let am = read_f32(r)?;
            let lm = read_f32(r)?;
            l.set_final(s, PairWeight::new(am, lm));
        }
        let count = read_u32(r)?;
        for _ in 0..count {
            let arc = LatticeArc {
                input: read_u32(r)?,
                output: read_u32(r)?,
                weight: PairWeight::new(read_f32(r)?, read_f32(r)?),
                target: read_u32(r)?,
            };
            if arc.target >= n_states {
                return Err(Error::Format(format!(
                    "lattice arc target {} out of range",
                    arc.target
                )));
            }
            l.add_arc(s, arc);
            arcs_read += 1;
        }
    }
    if arcs_read != n_arcs {
        return Err(Error::Format(format!(
            "lattice arc count mismatch: header {n_arcs}, read {arcs_read}"
        )));
    }
    for s in 0..n_states {
        l.set_word_boundary(s, read_u32(r)?);
    }
    if n_states > 0 {
        l.set_initial(initial);
    }
    Ok(l)
}

/// Write a lattice to `path`; `.json` / `.cbor` use serde, anything else
/// the binary container.
pub fn write_lattice_file<P: AsRef<Path>>(l: &Lattice, path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    match ext_lower(path).as_deref() {
        Some("json" | "cbor") => trellis_core::io::write_auto(path, l),
        _ => {
            trellis_core::io::ensure_parent_dir(path)?;
            let f = std::fs::File::create(path)?;
            let mut w = std::io::BufWriter::new(f);
            write_lattice(l, &mut w)?;
            Ok(())
        }
    }
}

/// Read a lattice from `path` (auto-detected like [`write_lattice_file`]).
pub fn read_lattice_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Lattice> {
    let path = path.as_ref();
    match ext_lower(path).as_deref() {
        Some("json" | "cbor") => trellis_core::io::read_auto(path),
        _ => {
            let f = std::fs::File::open(path)?;
            let mut r = std::io::BufReader::new(f);
            Ok(read_lattice(&mut r)?)
        }
    }
}

fn output_type_tag(t: OutputType) -> u32 {
    match t {
        OutputType::Lemma => 0,
        OutputType::LemmaPronunciation => 1,
        OutputType::SyntacticToken => 2,
    }
}

fn tag_output_type(tag: u32) -> Result<OutputType> {
    match tag {
        0 => Ok(OutputType::Lemma),
        1 => Ok(OutputType::LemmaPronunciation),
        2 => Ok(OutputType::SyntacticToken),
        other => Err(Error::Format(format!("unknown output type tag {other}"))),
    }
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

fn read_f32<R: Read>(r: &mut R) -> Result<f32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(f32::from_le_bytes(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> Lattice {
        let mut l = Lattice::new();
        let s0 = l.add_state();
        let s1 = l.add_state();
        l.set_initial(s0);
        l.set_final(s1, PairWeight::new(0.0, 0.5));
        l.set_word_boundary(s0, 0);
        l.set_word_boundary(s1, 4);
        l.add_arc(s0, LatticeArc { input: 1, output: 7, weight: PairWeight::new(2.0, 1.0), target: s1 });
        l
    }

    #[test]
    fn binary_roundtrip() {
        let l = toy();
        let mut bytes = Vec::new();
        write_lattice(&l, &mut bytes).unwrap();
        let back = read_lattice(&mut bytes.as_slice()).unwrap();
        assert_eq!(back, l);
    }

    #[test]
    fn truncated_file_is_format_or_io_error() {
        let l = toy();
        let mut bytes = Vec::new();
        write_lattice(&l, &mut bytes).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(read_lattice(&mut bytes.as_slice()).is_err());
    }
}
