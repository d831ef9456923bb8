// crates/trellis-network/src/file.rs

//! Network container I/O.
//!
//! Layout (little endian): magic `TWFN`, u32 version, u32 initial state,
//! u32 state count, u64 arc count, then per state: u8 final flag
//! (+ f32 final weight when set), u32 arc count, and arcs as
//! (u32 input, u32 output, f32 weight, u32 target). Epsilon and
//! disambiguator inputs are segregated into the epsilon block on load;
//! within each block, file order is preserved, which fixes the iteration
//! order of every back-end.

use std::io::{Read, Write};
use std::path::Path;

use trellis_core::error::{Error, Result};
use trellis_core::state_sequence::StateSequenceList;
use trellis_core::types::{Score, EPSILON};

use crate::static_net::StaticNetwork;
use crate::Network;

/// File magic of the network container.
pub const NETWORK_MAGIC: &[u8; 4] = b"TWFN";
/// Current container version.
pub const NETWORK_VERSION: u32 = 1;

/// One arc as stored in the container (before epsilon segregation).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawArc {
    pub input: u32,
    pub output: u32,
    pub weight: Score,
    pub target: u32,
}

/// Un-segregated network description used by the writer.
#[derive(Clone, Debug, Default)]
pub struct NetworkDescription {
    pub initial: u32,
    /// Per state: optional final weight and arcs in emission order.
    pub states: Vec<(Option<Score>, Vec<RawArc>)>,
}

/// Write a network container.
pub fn write_network<W: Write>(desc: &NetworkDescription, w: &mut W) -> Result<()> {
    w.write_all(NETWORK_MAGIC)?;
    w.write_all(&NETWORK_VERSION.to_le_bytes())?;
    w.write_all(&desc.initial.to_le_bytes())?;
    w.write_all(&(desc.states.len() as u32).to_le_bytes())?;
    let n_arcs: u64 = desc.states.iter().map(|(_, a)| a.len() as u64).sum();
    w.write_all(&n_arcs.to_le_bytes())?;
    for (final_weight, arcs) in &desc.states {
        match final_weight {
            Some(f) => {
                w.write_all(&[1u8])?;
                w.write_all(&f.to_le_bytes())?;
            }
            None => w.write_all(&[0u8])?,
        }
        w.write_all(&(arcs.len() as u32).to_le_bytes())?;
        for a in arcs {
            w.write_all(&a.input.to_le_bytes())?;
            w.write_all(&a.output.to_le_bytes())?;
            w.write_all(&a.weight.to_le_bytes())?;
            w.write_all(&a.target.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Read a network container into a [`StaticNetwork`], segregating
/// epsilon/disambiguator arcs with the help of the state-sequence store.
pub fn read_network<R: Read>(r: &mut R, sequences: &StateSequenceList) -> Result<StaticNetwork> {
    read_container(r, Some(sequences))
}

/// Read a container as a grammar acceptor: input labels reference the
/// word alphabet, so no state-sequence validation or disambiguator
/// segregation applies (label 0 still lands in the epsilon block).
pub fn read_grammar<R: Read>(r: &mut R) -> Result<StaticNetwork> {
    read_container(r, None)
}

fn read_container<R: Read>(
    r: &mut R,
    sequences: Option<&StateSequenceList>,
) -> Result<StaticNetwork> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != NETWORK_MAGIC {
        return Err(Error::Format("bad network magic".into()));
    }
    let version = read_u32(r)?;
    if version != NETWORK_VERSION {
        return Err(Error::Format(format!("unsupported network version {version}")));
    }
    let initial = read_u32(r)?;
    let n_states = read_u32(r)?;
    let n_arcs = read_u64(r)?;
    let mut net = StaticNetwork::with_states(n_states);
    net.set_initial(initial);
    // Segregation helper for grammar reads (no disambiguator range).
    let no_sequences = StateSequenceList::new();
    let mut arcs_read = 0u64;
    for s in 0..n_states {
        let mut flag = [0u8; 1];
        r.read_exact(&mut flag)?;
        if flag[0] != 0 {
            net.set_final(s, read_f32(r)?);
        }
        let count = read_u32(r)?;
        for _ in 0..count {
            let input = read_u32(r)?;
            let output = read_u32(r)?;
            let weight = read_f32(r)?;
            let target = read_u32(r)?;
            if target >= n_states {
                return Err(Error::Format(format!("arc target {target} out of range")));
            }
            if let Some(seqs) = sequences {
                if input != EPSILON
                    && !seqs.is_disambiguator(input)
                    && seqs.sequence_for_label(input).is_none()
                {
                    return Err(Error::Format(format!(
                        "arc input label {input} references no state sequence"
                    )));
                }
                net.add_arc(s, input, output, weight, target, seqs);
            } else {
                net.add_arc(s, input, output, weight, target, &no_sequences);
            }
            arcs_read += 1;
        }
    }
    if arcs_read != n_arcs {
        return Err(Error::Format(format!(
            "network arc count mismatch: header {n_arcs}, read {arcs_read}"
        )));
    }
    net.validate()?;
    Ok(net)
}

/// Write a container to `path`.
pub fn write_network_file<P: AsRef<Path>>(desc: &NetworkDescription, path: P) -> Result<()> {
    let f = std::fs::File::create(path)?;
    let mut w = std::io::BufWriter::new(f);
    write_network(desc, &mut w)
}

/// Read a container from `path`.
pub fn read_network_file<P: AsRef<Path>>(
    path: P,
    sequences: &StateSequenceList,
) -> Result<StaticNetwork> {
    let f = std::fs::File::open(path)?;
    let mut r = std::io::BufReader::new(f);
    read_network(&mut r, sequences)
}

/// Read a grammar acceptor container from `path`.
pub fn read_grammar_file<P: AsRef<Path>>(path: P) -> Result<StaticNetwork> {
    let f = std::fs::File::open(path)?;
    let mut r = std::io::BufReader::new(f);
    read_grammar(&mut r)
}

/// Export a static network back into the writer description (epsilon
/// arcs after the non-epsilon block per state).
#[must_use]
pub fn describe(net: &StaticNetwork) -> NetworkDescription {
    let mut desc = NetworkDescription {
        initial: net.initial_state(),
        states: Vec::with_capacity(net.num_states() as usize),
    };
    for s in 0..net.num_states() {
        let final_weight = net.is_final(s).then(|| net.final_weight(s));
        let mut arcs = Vec::new();
        for a in net.state_arcs(s) {
            arcs.push(RawArc {
                input: a.input,
                output: a.output,
                weight: a.weight,
                target: a.target,
            });
        }
        for a in net.state_epsilon_arcs(s) {
            arcs.push(RawArc {
                input: EPSILON,
                output: a.output,
                weight: a.weight,
                target: a.target,
            });
        }
        desc.states.push((final_weight, arcs));
    }
    desc
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
    use trellis_core::state_sequence::HmmState;

    fn sequences() -> StateSequenceList {
        let mut l = StateSequenceList::new();
        l.push(&[HmmState { emission: 0, transition: 0 }], true, true);
        l
    }

    fn toy_desc() -> NetworkDescription {
        NetworkDescription {
            initial: 0,
            states: vec![
                (None, vec![
                    RawArc { input: 1, output: 4, weight: 0.5, target: 1 },
                    RawArc { input: EPSILON, output: EPSILON, weight: 0.0, target: 1 },
                ]),
                (Some(0.25), vec![]),
            ],
        }
    }

    #[test]
    fn container_roundtrip() {
        let seqs = sequences();
        let mut bytes = Vec::new();
        write_network(&toy_desc(), &mut bytes).unwrap();
        let net = read_network(&mut bytes.as_slice(), &seqs).unwrap();
        assert_eq!(net.num_states(), 2);
        assert_eq!(net.num_arcs(), 1);
        assert_eq!(net.num_epsilon_arcs(), 1);
        assert!(net.is_final(1));
        // Write the loaded network again: same payload.
        let mut bytes2 = Vec::new();
        write_network(&describe(&net), &mut bytes2).unwrap();
        assert_eq!(bytes, bytes2);
    }

    #[test]
    fn unknown_input_label_rejected() {
        let seqs = sequences();
        let mut desc = toy_desc();
        desc.states[0].1[0].input = 9; // no such sequence
        let mut bytes = Vec::new();
        write_network(&desc, &mut bytes).unwrap();
        assert!(matches!(
            read_network(&mut bytes.as_slice(), &seqs),
            Err(Error::Format(_))
        ));
    }
}
