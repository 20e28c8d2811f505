// circuits: ordered gate applications, loadable from json or from a small
// line-oriented text format
//
//   QUBITS 3
//   H 0
//   CNOT 0 1
//   RZ 2 pi/4
//   // comments start with //, # or ;

use crate::error::{QsimError, Result};
use crate::gates::Gate;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateOp {
    pub gate: Gate,
    pub targets: Vec<usize>,
}

impl GateOp {
    pub fn new(gate: Gate, targets: &[usize]) -> Self {
        Self {
            gate,
            targets: targets.to_vec(),
        }
    }

    pub fn inverse(&self) -> Self {
        Self {
            gate: self.gate.inverse(),
            targets: self.targets.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Circuit {
    pub num_qubits: u32,
    pub ops: Vec<GateOp>,
}

impl Circuit {
    pub fn new(num_qubits: u32) -> Self {
        Self {
            num_qubits,
            ops: Vec::new(),
        }
    }

    pub fn push(&mut self, gate: Gate, targets: &[usize]) -> &mut Self {
        self.ops.push(GateOp::new(gate, targets));
        self
    }

    /// sequential dependency count; every gate is one layer
    pub fn depth(&self) -> usize {
        self.ops.len()
    }

    pub fn inverse(&self) -> Circuit {
        Circuit {
            num_qubits: self.num_qubits,
            ops: self.ops.iter().rev().map(GateOp::inverse).collect(),
        }
    }

    pub fn bell() -> Circuit {
        let mut c = Circuit::new(2);
        c.push(Gate::H, &[0]).push(Gate::Cnot, &[0, 1]);
        c
    }

    /// H on qubit 0 followed by a CNOT cascade
    pub fn ghz(num_qubits: u32) -> Circuit {
        let mut c = Circuit::new(num_qubits);
        c.push(Gate::H, &[0]);
        for q in 0..(num_qubits as usize).saturating_sub(1) {
            c.push(Gate::Cnot, &[q, q + 1]);
        }
        c
    }

    pub fn from_json(text: &str) -> Result<Circuit> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    // json if the file parses as json, the text format otherwise
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Circuit> {
        let text = fs::read_to_string(path)?;
        if text.trim_start().starts_with('{') {
            Circuit::from_json(&text)
        } else {
            parse_circuit(&text)
        }
    }
}

fn parse_angle(s: &str) -> std::result::Result<f64, String> {
    let lower = s.to_lowercase();
    let (sign, body) = match lower.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, lower.as_str()),
    };
    if let Some(rest) = body.strip_prefix("pi") {
        if rest.is_empty() {
            return Ok(sign * PI);
        }
        if let Some(div) = rest.strip_prefix('/') {
            let d = div
                .parse::<f64>()
                .map_err(|_| format!("invalid angle '{}'", s))?;
            return Ok(sign * PI / d);
        }
        return Err(format!("invalid angle '{}'", s));
    }
    s.parse::<f64>().map_err(|_| format!("invalid angle '{}'", s))
}

/// parses one gate line, e.g. `CNOT 0 1` or `RX 2 pi/2`
pub fn parse_gate_line(line: &str) -> std::result::Result<GateOp, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return Err("empty gate line".into());
    }
    let opcode = tokens[0].to_uppercase();
    let parse_qubit = |s: &str| s.parse::<usize>().map_err(|_| format!("invalid qubit '{}'", s));

    let fixed = |gate: Gate, arity: usize| -> std::result::Result<GateOp, String> {
        if tokens.len() != arity + 1 {
            return Err(format!("{} takes {} qubit(s)", opcode, arity));
        }
        let targets = tokens[1..]
            .iter()
            .map(|t| parse_qubit(t))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(GateOp { gate, targets })
    };
    let rotation = |make: fn(f64) -> Gate, arity: usize| -> std::result::Result<GateOp, String> {
        if tokens.len() != arity + 2 {
            return Err(format!("{} takes {} qubit(s) and an angle", opcode, arity));
        }
        let targets = tokens[1..=arity]
            .iter()
            .map(|t| parse_qubit(t))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let theta = parse_angle(tokens[arity + 1])?;
        Ok(GateOp {
            gate: make(theta),
            targets,
        })
    };

    match opcode.as_str() {
        "H" => fixed(Gate::H, 1),
        "X" => fixed(Gate::X, 1),
        "Y" => fixed(Gate::Y, 1),
        "Z" => fixed(Gate::Z, 1),
        "S" => fixed(Gate::S, 1),
        "SDG" => fixed(Gate::Sdg, 1),
        "T" => fixed(Gate::T, 1),
        "TDG" => fixed(Gate::Tdg, 1),
        "RX" => rotation(|theta| Gate::Rx { theta }, 1),
        "RY" => rotation(|theta| Gate::Ry { theta }, 1),
        "RZ" => rotation(|theta| Gate::Rz { theta }, 1),
        "PHASE" => rotation(|theta| Gate::Phase { theta }, 1),
        "CNOT" | "CX" => fixed(Gate::Cnot, 2),
        "CZ" => fixed(Gate::Cz, 2),
        "SWAP" => fixed(Gate::Swap, 2),
        "CPHASE" => rotation(|theta| Gate::CPhase { theta }, 2),
        "TOFFOLI" | "CCX" => fixed(Gate::Toffoli, 3),
        "FREDKIN" | "CSWAP" => fixed(Gate::Fredkin, 3),
        _ => Err(format!("unknown gate: {}", tokens[0])),
    }
}

pub fn parse_circuit(text: &str) -> Result<Circuit> {
    let mut circuit = Circuit::default();
    let mut declared = None;
    let mut highest = 0usize;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("//") || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let err = |message: String| QsimError::CircuitParse {
            line: idx + 1,
            message,
        };
        let mut tokens = line.split_whitespace();
        if tokens.next().map(|t| t.eq_ignore_ascii_case("QUBITS")) == Some(true) {
            let n = tokens
                .next()
                .and_then(|t| t.parse::<u32>().ok())
                .ok_or_else(|| err("usage: QUBITS <n>".to_string()))?;
            declared = Some(n);
            continue;
        }
        let op = parse_gate_line(line).map_err(err)?;
        highest = highest.max(op.targets.iter().copied().max().unwrap_or(0) + 1);
        circuit.ops.push(op);
    }

    // without a declaration the register is as wide as the highest target
    circuit.num_qubits = declared.unwrap_or(highest as u32);
    Ok(circuit)
}
