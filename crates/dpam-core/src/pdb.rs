// crates/dpam-core/src/pdb.rs

//! Structure ingestion and emission.
//!
//! Handles the two coordinate inputs the pipeline sees (mmCIF and PDB),
//! plus the narrow PDB operations the stage kernels need: per-residue
//! coordinate maps, residue-subset rewrites, and minimum inter-residue
//! atom distances. Residue numbering is preserved verbatim; only the first
//! model of a multi-model file is read.

use crate::aa::three_to_one;
use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// One atom record.
#[derive(Clone, Debug)]
pub struct Atom {
    pub name: String,
    pub element: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One residue with its atoms, in file order.
#[derive(Clone, Debug)]
pub struct Residue {
    pub resid: i32,
    pub name: String,
    pub atoms: Vec<Atom>,
}

/// A single chain of residues, in file order.
#[derive(Clone, Debug)]
pub struct Chain {
    pub chain_id: String,
    pub residues: Vec<Residue>,
}

impl Chain {
    /// One-letter sequence in residue order.
    #[must_use]
    pub fn sequence(&self) -> String {
        self.residues.iter().map(|r| three_to_one(&r.name)).collect()
    }
}

/// Parse a structure file, dispatching on the `.cif` extension.
///
/// # Errors
/// Returns an error for unreadable or atom-free files.
pub fn parse_structure(path: &Path) -> Result<Vec<Chain>> {
    let is_cif = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("cif"));
    if is_cif {
        parse_mmcif(path)
    } else {
        parse_pdb(path)
    }
}

/// Parse ATOM records of a PDB file into chains.
///
/// # Errors
/// Returns an error if the file cannot be read or holds no atoms.
pub fn parse_pdb(path: &Path) -> Result<Vec<Chain>> {
    let file =
        File::open(path).with_context(|| format!("opening PDB {}", path.display()))?;
    let mut chains: Vec<Chain> = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.starts_with("ENDMDL") {
            break;
        }
        if !line.starts_with("ATOM") || line.len() < 54 {
            continue;
        }
        let name = line[12..16].trim().to_owned();
        let res_name = line[17..20].trim().to_owned();
        let chain_id = line[21..22].trim().to_owned();
        let resid: i32 = line[22..26]
            .trim()
            .parse()
            .with_context(|| format!("bad residue id in line {line:?}"))?;
        let x: f64 = line[30..38].trim().parse()?;
        let y: f64 = line[38..46].trim().parse()?;
        let z: f64 = line[46..54].trim().parse()?;
        let element = if line.len() >= 78 {
            line[76..78].trim().to_owned()
        } else {
            String::new()
        };
        push_atom(
            &mut chains,
            &chain_id,
            resid,
            &res_name,
            Atom { name, element, x, y, z },
        );
    }
    if chains.is_empty() {
        bail!("no ATOM records in {}", path.display());
    }
    Ok(chains)
}

/// Parse the `atom_site` loop of an mmCIF file into chains.
///
/// Only ATOM rows of the first model are kept; the auth numbering is used
/// where present, falling back to label numbering.
///
/// # Errors
/// Returns an error if the file cannot be read, the loop is missing, or a
/// row is malformed.
pub fn parse_mmcif(path: &Path) -> Result<Vec<Chain>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading mmCIF {}", path.display()))?;
    let mut lines = text.lines().peekable();

    // Locate the atom_site loop header.
    let mut columns: Vec<String> = Vec::new();
    while let Some(line) = lines.next() {
        if line.trim() != "loop_" {
            continue;
        }
        let mut header = Vec::new();
        while let Some(next) = lines.peek() {
            let trimmed = next.trim();
            if trimmed.starts_with('_') {
                header.push(trimmed.to_owned());
                lines.next();
            } else {
                break;
            }
        }
        if header.iter().any(|h| h.starts_with("_atom_site.")) {
            columns = header;
            break;
        }
    }
    if columns.is_empty() {
        bail!("no atom_site loop in {}", path.display());
    }

    let index = |names: &[&str]| -> Option<usize> {
        names
            .iter()
            .find_map(|n| columns.iter().position(|c| c == &format!("_atom_site.{n}")))
    };
    let group_col = index(&["group_PDB"]);
    let atom_col = index(&["auth_atom_id", "label_atom_id"])
        .context("atom_site loop lacks an atom id column")?;
    let comp_col = index(&["auth_comp_id", "label_comp_id"])
        .context("atom_site loop lacks a residue name column")?;
    let asym_col = index(&["auth_asym_id", "label_asym_id"])
        .context("atom_site loop lacks a chain id column")?;
    let seq_col = index(&["auth_seq_id", "label_seq_id"])
        .context("atom_site loop lacks a residue number column")?;
    let x_col = index(&["Cartn_x"]).context("atom_site loop lacks Cartn_x")?;
    let y_col = index(&["Cartn_y"]).context("atom_site loop lacks Cartn_y")?;
    let z_col = index(&["Cartn_z"]).context("atom_site loop lacks Cartn_z")?;
    let element_col = index(&["type_symbol"]);
    let model_col = index(&["pdbx_PDB_model_num"]);

    let mut chains: Vec<Chain> = Vec::new();
    let mut first_model: Option<String> = None;
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if trimmed.starts_with('_') || trimmed == "loop_" || trimmed.starts_with("data_") {
            break;
        }
        let fields = split_cif_row(trimmed);
        if fields.len() < columns.len() {
            continue;
        }
        if let Some(col) = group_col {
            if fields[col] != "ATOM" {
                continue;
            }
        }
        if let Some(col) = model_col {
            let model = fields[col].clone();
            match &first_model {
                None => first_model = Some(model),
                Some(first) if *first != model => break,
                Some(_) => {}
            }
        }
        let resid: i32 = fields[seq_col]
            .parse()
            .with_context(|| format!("bad auth_seq_id {:?}", fields[seq_col]))?;
        let atom = Atom {
            name: fields[atom_col].clone(),
            element: element_col.map(|c| fields[c].clone()).unwrap_or_default(),
            x: fields[x_col].parse()?,
            y: fields[y_col].parse()?,
            z: fields[z_col].parse()?,
        };
        let chain_id = fields[asym_col].clone();
        let comp = fields[comp_col].clone();
        push_atom(&mut chains, &chain_id, resid, &comp, atom);
    }
    if chains.is_empty() {
        bail!("no ATOM rows in {}", path.display());
    }
    Ok(chains)
}

fn push_atom(chains: &mut Vec<Chain>, chain_id: &str, resid: i32, res_name: &str, atom: Atom) {
    let chain = match chains.iter_mut().find(|c| c.chain_id == chain_id) {
        Some(chain) => chain,
        None => {
            chains.push(Chain {
                chain_id: chain_id.to_owned(),
                residues: Vec::new(),
            });
            chains.last_mut().expect("just pushed")
        }
    };
    match chain.residues.last_mut() {
        Some(last) if last.resid == resid => last.atoms.push(atom),
        _ => chain.residues.push(Residue {
            resid,
            name: res_name.to_owned(),
            atoms: vec![atom],
        }),
    }
}

/// mmCIF rows are whitespace separated with optional single/double quoting.
fn split_cif_row(row: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut chars = row.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '\'' || c == '"' {
            chars.next();
            let mut field = String::new();
            for inner in chars.by_ref() {
                if inner == c {
                    break;
                }
                field.push(inner);
            }
            fields.push(field);
        } else {
            let mut field = String::new();
            while let Some(&inner) = chars.peek() {
                if inner.is_whitespace() {
                    break;
                }
                field.push(inner);
                chars.next();
            }
            fields.push(field);
        }
    }
    fields
}

/// Write one chain as a standardised single-chain PDB, renaming the chain
/// to `A` and preserving residue numbering.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_pdb(path: &Path, chain: &Chain) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("creating PDB {}", path.display()))?;
    let mut out = BufWriter::new(file);
    let mut serial = 0usize;
    for residue in &chain.residues {
        for atom in &residue.atoms {
            serial += 1;
            let name = format_atom_name(&atom.name);
            writeln!(
                out,
                "ATOM  {serial:>5} {name}{res:>4}{chain}{resid:>4}    {x:>8.3}{y:>8.3}{z:>8.3}{occ:>6.2}{b:>6.2}          {elem:>2}",
                serial = serial.min(99_999),
                name = name,
                res = truncate(&residue.name, 3),
                chain = " A",
                resid = residue.resid,
                x = atom.x,
                y = atom.y,
                z = atom.z,
                occ = 1.00,
                b = 0.00,
                elem = truncate(&atom.element, 2),
            )?;
        }
    }
    writeln!(out, "TER")?;
    writeln!(out, "END")?;
    out.flush()?;
    Ok(())
}

/// PDB atom-name column is 4 wide; names shorter than 4 start at column 14.
fn format_atom_name(name: &str) -> String {
    if name.len() >= 4 {
        truncate(name, 4)
    } else {
        format!(" {name:<3}")
    }
}

fn truncate(s: &str, width: usize) -> String {
    s.chars().take(width).collect()
}

/// Per-residue atom coordinates from ATOM records.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_coords(path: &Path) -> Result<BTreeMap<i32, Vec<[f64; 3]>>> {
    let file =
        File::open(path).with_context(|| format!("opening PDB {}", path.display()))?;
    let mut coords: BTreeMap<i32, Vec<[f64; 3]>> = BTreeMap::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.starts_with("ATOM") || line.len() < 54 {
            continue;
        }
        let (Ok(resid), Ok(x), Ok(y), Ok(z)) = (
            line[22..26].trim().parse::<i32>(),
            line[30..38].trim().parse::<f64>(),
            line[38..46].trim().parse::<f64>(),
            line[46..54].trim().parse::<f64>(),
        ) else {
            continue;
        };
        coords.entry(resid).or_default().push([x, y, z]);
    }
    Ok(coords)
}

/// Residue ids present in a PDB file's ATOM records.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_residues(path: &Path) -> Result<BTreeSet<i32>> {
    Ok(read_coords(path)?.into_keys().collect())
}

/// Copy ATOM lines whose residue id is in `keep` from `input` to `output`.
///
/// # Errors
/// Returns an error on I/O failure.
pub fn filter_atoms(input: &Path, output: &Path, keep: &BTreeSet<i32>) -> Result<()> {
    let file =
        File::open(input).with_context(|| format!("opening PDB {}", input.display()))?;
    let out = File::create(output)
        .with_context(|| format!("creating PDB {}", output.display()))?;
    let mut writer = BufWriter::new(out);
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.starts_with("ATOM") || line.len() < 26 {
            continue;
        }
        let Ok(resid) = line[22..26].trim().parse::<i32>() else {
            continue;
        };
        if keep.contains(&resid) {
            writeln!(writer, "{line}")?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Minimum atom-to-atom distance between two residues' coordinate lists.
#[must_use]
pub fn min_distance(a: &[[f64; 3]], b: &[[f64; 3]]) -> f64 {
    let mut best = f64::INFINITY;
    for p in a {
        for q in b {
            let dx = p[0] - q[0];
            let dy = p[1] - q[1];
            let dz = p[2] - q[2];
            let dist = (dx * dx + dy * dy + dz * dz).sqrt();
            if dist < best {
                best = dist;
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDB: &str = "\
ATOM      1  N   MET A   1      11.104   6.134  -6.504  1.00  0.00           N
ATOM      2  CA  MET A   1      11.639   6.071  -5.147  1.00  0.00           C
ATOM      3  N   LYS A   2      10.500   7.000  -3.000  1.00  0.00           N
ATOM      4  CA  LYS B   5       1.000   2.000   3.000  1.00  0.00           C
TER
END
";

    #[test]
    fn pdb_parsing_groups_by_chain_and_residue() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("m.pdb");
        std::fs::write(&path, PDB).unwrap();
        let chains = parse_pdb(&path).unwrap();
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].chain_id, "A");
        assert_eq!(chains[0].residues.len(), 2);
        assert_eq!(chains[0].sequence(), "MK");
        assert_eq!(chains[1].residues[0].resid, 5);
    }

    #[test]
    fn write_then_reread_preserves_numbering() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("m.pdb");
        std::fs::write(&input, PDB).unwrap();
        let chains = parse_pdb(&input).unwrap();
        let output = tmp.path().join("out.pdb");
        write_pdb(&output, &chains[0]).unwrap();
        let coords = read_coords(&output).unwrap();
        assert_eq!(coords.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(coords[&1].len(), 2);
    }

    #[test]
    fn filter_atoms_keeps_subset() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("m.pdb");
        std::fs::write(&input, PDB).unwrap();
        let output = tmp.path().join("f.pdb");
        filter_atoms(&input, &output, &BTreeSet::from([2])).unwrap();
        let residues = read_residues(&output).unwrap();
        assert_eq!(residues, BTreeSet::from([2]));
    }

    #[test]
    fn mmcif_atom_site_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("m.cif");
        std::fs::write(
            &path,
            "data_test\n\
             loop_\n\
             _atom_site.group_PDB\n\
             _atom_site.label_atom_id\n\
             _atom_site.label_comp_id\n\
             _atom_site.auth_asym_id\n\
             _atom_site.auth_seq_id\n\
             _atom_site.Cartn_x\n\
             _atom_site.Cartn_y\n\
             _atom_site.Cartn_z\n\
             _atom_site.type_symbol\n\
             ATOM N MET A 1 11.104 6.134 -6.504 N\n\
             ATOM CA MET A 1 11.639 6.071 -5.147 C\n\
             ATOM N LYS A 2 10.500 7.000 -3.000 N\n\
             #\n",
        )
        .unwrap();
        let chains = parse_mmcif(&path).unwrap();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].sequence(), "MK");
        assert_eq!(chains[0].residues[0].atoms.len(), 2);
    }

    #[test]
    fn min_distance_is_pairwise_minimum() {
        let a = vec![[0.0, 0.0, 0.0], [10.0, 0.0, 0.0]];
        let b = vec![[0.0, 3.0, 4.0]];
        assert!((min_distance(&a, &b) - 5.0).abs() < 1e-12);
    }
}
