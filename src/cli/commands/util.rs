use anyhow::{Result, anyhow, bail};

use axs::{EntryId, Kernel, Map, Pipeline, StepCall, Value};

/// Command-line literal: integers and floats are coerced, `null`/`~` mean null.
pub(crate) fn parse_cli_value(token: &str) -> Value {
    if token == "~" || token.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    match token {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::coerce_scalar(token),
    }
}

/// One `--key=value`, `--key` (true) or `--key-` (false) override.
fn parse_override(flag: &str) -> Result<(String, Value)> {
    let (key, value) = match flag.split_once('=') {
        Some((key, value)) => (key, parse_cli_value(value)),
        None => match flag.strip_suffix('-') {
            Some(key) => (key, Value::Bool(false)),
            None => (flag, Value::Bool(true)),
        },
    };
    if key.is_empty() {
        bail!("override `--{flag}` has no name");
    }
    Ok((key.to_string(), value))
}

/// Split `action arg... --k=v , action arg...` into pipeline steps.
pub(crate) fn parse_pipeline_tokens(tokens: &[String]) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new();
    for segment in tokens.split(|token| token == ",") {
        let Some((action, rest)) = segment.split_first() else {
            bail!("empty pipeline step between commas");
        };
        let mut step = StepCall::new(action.as_str());
        for token in rest {
            match token.strip_prefix("--") {
                Some(flag) => {
                    let (key, value) = parse_override(flag)?;
                    step = step.set(key, value);
                }
                None => step = step.arg(parse_cli_value(token)),
            }
        }
        pipeline = pipeline.call(step);
    }
    Ok(pipeline)
}

pub(crate) fn require_entry(kernel: &mut Kernel, name: &str) -> Result<EntryId> {
    kernel
        .byname(name)?
        .ok_or_else(|| anyhow!("no entry named `{name}` in the root collection"))
}

/// Text prints raw; everything else prints as pretty JSON.
pub(crate) fn print_value(kernel: &Kernel, value: &Value) -> Result<()> {
    match value {
        Value::Text(text) => println!("{text}"),
        other => println!("{}", serde_json::to_string_pretty(&kernel.pickle(other))?),
    }
    Ok(())
}

pub(crate) fn print_map(kernel: &Kernel, map: &Map) -> Result<()> {
    print_value(kernel, &Value::Map(map.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axs::Step;

    fn tokens(text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn splits_steps_on_commas() {
        let pipeline =
            parse_pipeline_tokens(&tokens("byname be_like , meme smart 3 --person=Mary --loud --quiet-"))
                .unwrap();
        assert_eq!(pipeline.steps.len(), 2);
        let Step::Call(meme) = &pipeline.steps[1] else {
            panic!("second step is a call");
        };
        assert_eq!(meme.action, "meme");
        assert_eq!(meme.args, vec![Value::from("smart"), Value::Int(3)]);
        assert_eq!(meme.overrides["person"], Value::from("Mary"));
        assert_eq!(meme.overrides["loud"], Value::Bool(true));
        assert_eq!(meme.overrides["quiet"], Value::Bool(false));
    }

    #[test]
    fn empty_step_is_rejected() {
        assert!(parse_pipeline_tokens(&tokens("get x , , get y")).is_err());
    }

    #[test]
    fn literals_are_coerced() {
        assert_eq!(parse_cli_value("2.5"), Value::Float(2.5));
        assert_eq!(parse_cli_value("null"), Value::Null);
        assert_eq!(parse_cli_value("word"), Value::from("word"));
    }
}
