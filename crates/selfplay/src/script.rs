//! Agent-script parsing.
//!
//! A script is a sequence of `{ key=value; … }[N]` blocks, each describing
//! one agent configuration cloned `N` times (`[N]` optional, default 1).
//! Recognized keys: `Name`, `Exploration`, `Lambda`, `Discount`,
//! `LearningRate`, `NetDimensions`.

use crate::error::TrainError;

/// One parsed configuration block. Every key is optional so the same type
/// serves both full agent construction and hyperparameter adjustment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentScript {
    pub name: Option<String>,
    pub exploration: Option<f64>,
    pub lambda: Option<f64>,
    pub discount: Option<f64>,
    pub learning_rate: Option<f64>,
    pub net_dimensions: Option<Vec<usize>>,
}

fn parse_number(key: &str, value: &str) -> Result<f64, TrainError> {
    value
        .trim()
        .parse()
        .map_err(|_| TrainError::ScriptParse(format!("invalid number for {key}: `{value}`")))
}

fn parse_dimensions(value: &str) -> Result<Vec<usize>, TrainError> {
    value
        .split(',')
        .map(|entry| {
            entry.trim().parse().map_err(|_| {
                TrainError::ScriptParse(format!("invalid NetDimensions entry: `{entry}`"))
            })
        })
        .collect()
}

fn parse_block(body: &str) -> Result<AgentScript, TrainError> {
    let mut script = AgentScript::default();

    for item in body.split(';') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let Some((key, value)) = item.split_once('=') else {
            return Err(TrainError::ScriptParse(format!(
                "expected key=value, got `{item}`"
            )));
        };
        match key.trim() {
            "Name" => script.name = Some(value.trim().to_string()),
            "Exploration" => script.exploration = Some(parse_number("Exploration", value)?),
            "Lambda" => script.lambda = Some(parse_number("Lambda", value)?),
            "Discount" => script.discount = Some(parse_number("Discount", value)?),
            "LearningRate" => script.learning_rate = Some(parse_number("LearningRate", value)?),
            "NetDimensions" => script.net_dimensions = Some(parse_dimensions(value)?),
            unknown => {
                return Err(TrainError::ScriptParse(format!(
                    "unknown key `{unknown}`"
                )))
            }
        }
    }

    Ok(script)
}

/// Splits a script into `(block, repetition)` pairs in order of appearance.
pub fn parse_script(text: &str) -> Result<Vec<(AgentScript, usize)>, TrainError> {
    let mut blocks = Vec::new();
    let mut rest = text.trim_start();

    while !rest.is_empty() {
        let Some(after_open) = rest.strip_prefix('{') else {
            return Err(TrainError::ScriptParse(format!(
                "expected `{{` at `{}`",
                rest.chars().take(20).collect::<String>()
            )));
        };
        let Some(close) = after_open.find('}') else {
            return Err(TrainError::ScriptParse("unbalanced `{`".into()));
        };
        let script = parse_block(&after_open[..close])?;

        rest = after_open[close + 1..].trim_start();
        let mut repeat = 1usize;
        if let Some(after_bracket) = rest.strip_prefix('[') {
            let Some(end) = after_bracket.find(']') else {
                return Err(TrainError::ScriptParse("unbalanced `[`".into()));
            };
            let count = after_bracket[..end].trim();
            repeat = count.parse().map_err(|_| {
                TrainError::ScriptParse(format!("invalid repetition count `{count}`"))
            })?;
            if repeat == 0 {
                return Err(TrainError::ScriptParse(
                    "repetition count must be positive".into(),
                ));
            }
            rest = after_bracket[end + 1..].trim_start();
        }

        blocks.push((script, repeat));
    }

    Ok(blocks)
}
