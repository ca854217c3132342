//! Trace file discovery and parsing.
//!
//! Grounded on `processor.py`'s `tick()`, which reads one whitespace-
//! separated hex `<op> <operand>` pair per line from a per-core file. Parsing
//! is pulled out of the processor here so the processor only ever sees an
//! already-validated instruction stream (`4.4`/`6` of the spec).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::SimError;

/// One decoded trace line. `Compute`'s payload is the cycle count to spend
/// executing it; `Load`/`Store` carry the memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Compute(u32),
    Load(u64),
    Store(u64),
}

/// Finds every `<prefix>_<core>.data` file next to `prefix`, sorted by core
/// index. `prefix` may include a directory component; if it doesn't, the
/// current directory is searched.
pub fn discover_core_files(prefix: &Path) -> Result<Vec<(usize, PathBuf)>, SimError> {
    let dir = match prefix.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let base = prefix
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| SimError::Config(format!("invalid trace prefix '{}'", prefix.display())))?;
    let needle = format!("{base}_");

    let entries = std::fs::read_dir(dir)
        .map_err(|e| SimError::Config(format!("cannot read trace directory '{}': {e}", dir.display())))?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SimError::Config(e.to_string()))?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let Some(rest) = name.strip_prefix(&needle) else {
            continue;
        };
        let Some(core_str) = rest.strip_suffix(".data") else {
            continue;
        };
        let Ok(core) = core_str.parse::<usize>() else {
            continue;
        };
        found.push((core, entry.path()));
    }

    if found.is_empty() {
        return Err(SimError::Config(format!(
            "no trace files matching '{}_<core>.data' found in '{}'",
            base,
            dir.display()
        )));
    }
    found.sort_by_key(|(core, _)| *core);
    Ok(found)
}

/// Parses a core's trace file. A malformed line stops parsing and is
/// reported as a `SimError::Trace`, but every instruction successfully
/// decoded before that line is still returned — per `7.2`, the core's
/// simulation proceeds on the partial stream and its result is marked
/// incomplete, rather than aborting the whole run.
pub fn read_trace(path: &Path, core: usize) -> (Vec<Instruction>, Option<SimError>) {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            return (
                Vec::new(),
                Some(SimError::Trace {
                    core,
                    line: 0,
                    reason: format!("cannot open '{}': {e}", path.display()),
                }),
            )
        }
    };

    let mut instructions = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line_no = idx + 1;
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                return (
                    instructions,
                    Some(SimError::Trace {
                        core,
                        line: line_no,
                        reason: e.to_string(),
                    }),
                )
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok(instr) => instructions.push(instr),
            Err(reason) => {
                return (
                    instructions,
                    Some(SimError::Trace {
                        core,
                        line: line_no,
                        reason,
                    }),
                )
            }
        }
    }
    (instructions, None)
}

fn parse_line(line: &str) -> Result<Instruction, String> {
    let mut parts = line.split_whitespace();
    let op = parts.next().ok_or("missing opcode")?;
    let operand = parts.next().ok_or("missing operand")?;
    let op = parse_hex(op)?;
    let operand = parse_hex(operand)?;
    match op {
        0 => Ok(Instruction::Load(operand)),
        1 => Ok(Instruction::Store(operand)),
        2 => Ok(Instruction::Compute(operand as u32)),
        other => Err(format!("unknown opcode '{other}'")),
    }
}

fn parse_hex(token: &str) -> Result<u64, String> {
    let trimmed = token.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(trimmed, 16).map_err(|e| format!("invalid hex token '{token}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_load_store_compute() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace_0.data");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "0 400").unwrap();
        writeln!(f, "1 800").unwrap();
        writeln!(f, "2 a").unwrap();
        drop(f);

        let (instrs, err) = read_trace(&path, 0);
        assert!(err.is_none());
        assert_eq!(
            instrs,
            vec![
                Instruction::Load(0x400),
                Instruction::Store(0x800),
                Instruction::Compute(0xa),
            ]
        );
    }

    #[test]
    fn malformed_line_stops_parsing_but_keeps_the_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace_0.data");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "0 10").unwrap();
        writeln!(f, "garbage line").unwrap();
        writeln!(f, "0 20").unwrap();
        drop(f);

        let (instrs, err) = read_trace(&path, 0);
        assert_eq!(instrs, vec![Instruction::Load(0x10)]);
        match err {
            Some(SimError::Trace { core, line, .. }) => {
                assert_eq!(core, 0);
                assert_eq!(line, 2);
            }
            other => panic!("expected a trace error, got {other:?}"),
        }
    }

    #[test]
    fn discovers_and_sorts_core_files() {
        let dir = tempfile::tempdir().unwrap();
        for core in [2, 0, 1] {
            File::create(dir.path().join(format!("bodytrack_{core}.data"))).unwrap();
        }
        File::create(dir.path().join("unrelated.data")).unwrap();

        let prefix = dir.path().join("bodytrack");
        let found = discover_core_files(&prefix).unwrap();
        let cores: Vec<usize> = found.iter().map(|(c, _)| *c).collect();
        assert_eq!(cores, vec![0, 1, 2]);
    }
}
