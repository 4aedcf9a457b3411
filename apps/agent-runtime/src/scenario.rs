// Purpose: Parser for the line-based scenario file format.
// Architecture: External Collaborator (file format)
// Dependencies: std

use std::collections::HashMap;

use crate::constraint::Quadratic;
use crate::error::MessageError;
use crate::graph::AgentId;

/// A single scripted change to the population or constraint set, applied
/// in order while a scenario plays out, parsed out of the flat
/// line-based scenario file grammar below.
#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioEvent {
    AddAgent(AgentId),
    RemoveAgent(AgentId),
    ChangeConstraint {
        i: usize,
        j: usize,
        coefficients: Quadratic,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Scenario {
    pub node_count: usize,
    pub edges: Vec<(usize, usize)>,
    pub constraints: HashMap<(usize, usize), Quadratic>,
    pub domains: HashMap<usize, Vec<f64>>,
    pub commands: Vec<ScenarioEvent>,
}

impl Scenario {
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let mut scenario = Scenario::default();
        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| MessageError::Malformed(format!("no `=` in line: {line}")))?;
            match key {
                "nodes" => {
                    scenario.node_count = value
                        .trim()
                        .parse()
                        .map_err(|_| MessageError::Malformed(format!("bad node count: {value}")))?;
                }
                "edges" => {
                    for pair in value.split_whitespace() {
                        scenario.edges.push(parse_index_pair(pair)?);
                    }
                }
                "cons" => {
                    for entry in value.split('>') {
                        let entry = entry.trim();
                        if entry.is_empty() {
                            continue;
                        }
                        let (edge_part, coeff_part) = entry
                            .split_once("):(")
                            .ok_or_else(|| MessageError::Malformed(format!("bad cons entry: {entry}")))?;
                        let edge = edge_part.trim_start_matches('(');
                        let (i, j) = parse_index_pair(edge)?;
                        let coeff_part = coeff_part.trim_end_matches(')');
                        let coeffs: Vec<f64> = coeff_part
                            .split(',')
                            .map(|s| s.trim().parse())
                            .collect::<Result<_, _>>()
                            .map_err(|_| MessageError::Malformed(format!("bad coefficients: {entry}")))?;
                        if coeffs.len() != 3 {
                            return Err(MessageError::Malformed(format!(
                                "expected 3 coefficients, got {}: {entry}",
                                coeffs.len()
                            )));
                        }
                        scenario
                            .constraints
                            .insert((i, j), Quadratic::new(coeffs[0], coeffs[1], coeffs[2]));
                    }
                }
                "domains" => {
                    for entry in value.split_whitespace() {
                        let (id, values) = entry
                            .split_once(':')
                            .ok_or_else(|| MessageError::Malformed(format!("bad domain entry: {entry}")))?;
                        let id: usize = id
                            .parse()
                            .map_err(|_| MessageError::Malformed(format!("bad domain id: {id}")))?;
                        let values: Vec<f64> = values
                            .split(',')
                            .map(|s| s.trim().parse())
                            .collect::<Result<_, _>>()
                            .map_err(|_| MessageError::Malformed(format!("bad domain values: {entry}")))?;
                        scenario.domains.insert(id, values);
                    }
                }
                "commands" => {
                    for cmd in value.split_whitespace() {
                        scenario.commands.push(parse_command(cmd)?);
                    }
                }
                other => {
                    return Err(MessageError::Malformed(format!("unknown scenario key: {other}")));
                }
            }
        }
        Ok(scenario)
    }
}

fn parse_index_pair(text: &str) -> Result<(usize, usize), MessageError> {
    let (i, j) = text
        .split_once(',')
        .ok_or_else(|| MessageError::Malformed(format!("bad index pair: {text}")))?;
    let i = i
        .trim_start_matches('(')
        .parse()
        .map_err(|_| MessageError::Malformed(format!("bad index: {i}")))?;
    let j = j
        .trim_end_matches(')')
        .parse()
        .map_err(|_| MessageError::Malformed(format!("bad index: {j}")))?;
    Ok((i, j))
}

fn parse_command(cmd: &str) -> Result<ScenarioEvent, MessageError> {
    let (action, rest) = cmd
        .split_once(':')
        .ok_or_else(|| MessageError::Malformed(format!("bad command: {cmd}")))?;
    match action {
        "add_agent" => Ok(ScenarioEvent::AddAgent(AgentId::from(rest))),
        "remove_agent" => Ok(ScenarioEvent::RemoveAgent(AgentId::from(rest))),
        "change_constraint" => {
            let (edge, coeffs) = rest
                .split_once(':')
                .ok_or_else(|| MessageError::Malformed(format!("bad change_constraint: {cmd}")))?;
            let (i, j) = edge
                .split_once('-')
                .ok_or_else(|| MessageError::Malformed(format!("bad edge in: {cmd}")))?;
            let i: usize = i
                .parse()
                .map_err(|_| MessageError::Malformed(format!("bad index: {i}")))?;
            let j: usize = j
                .parse()
                .map_err(|_| MessageError::Malformed(format!("bad index: {j}")))?;
            let values: Vec<f64> = coeffs
                .split(';')
                .map(|s| s.trim().parse())
                .collect::<Result<_, _>>()
                .map_err(|_| MessageError::Malformed(format!("bad coefficients: {cmd}")))?;
            if values.len() != 3 {
                return Err(MessageError::Malformed(format!("expected 3 coefficients: {cmd}")));
            }
            Ok(ScenarioEvent::ChangeConstraint {
                i,
                j,
                coefficients: Quadratic::new(values[0], values[1], values[2]),
            })
        }
        other => Err(MessageError::Malformed(format!("unknown command action: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_complete_scenario() {
        let text = "\
nodes=3
commands=add_agent:a0 add_agent:a1 remove_agent:a0 change_constraint:0-1:1;2;3
edges=0,1 1,2
cons=(0,1):(1,1,1)>(1,2):(2,0,1)
domains=0:-1,0,1 1:-1,0,1
";
        let scenario = Scenario::parse(text).unwrap();
        assert_eq!(scenario.node_count, 3);
        assert_eq!(scenario.edges, vec![(0, 1), (1, 2)]);
        assert_eq!(scenario.constraints[&(0, 1)], Quadratic::new(1.0, 1.0, 1.0));
        assert_eq!(scenario.domains[&0], vec![-1.0, 0.0, 1.0]);
        assert_eq!(scenario.commands.len(), 4);
        assert_eq!(scenario.commands[0], ScenarioEvent::AddAgent(AgentId::from("a0")));
        assert_eq!(
            scenario.commands[3],
            ScenarioEvent::ChangeConstraint {
                i: 0,
                j: 1,
                coefficients: Quadratic::new(1.0, 2.0, 3.0)
            }
        );
    }
}
