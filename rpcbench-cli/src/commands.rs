//! Argument parsing and call execution.

use crate::{Cli, OutputFormat};
use colored::Colorize;
use rpcbench_client::{Args, Client, ClientError, Reply};
use rpcbench_protocol::{ImagePayload, NdArray, Param, Payload};
use serde_json::Value;
use std::path::Path;
use std::str::FromStr;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Explicit parameter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Int,
    Float,
    Bool,
    Str,
    Json,
    /// File contents as bytes.
    Binary,
    /// Decoded image file.
    Image,
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" => Ok(ValueType::Int),
            "float" => Ok(ValueType::Float),
            "bool" => Ok(ValueType::Bool),
            "str" => Ok(ValueType::Str),
            "json" => Ok(ValueType::Json),
            "binary" => Ok(ValueType::Binary),
            "image" => Ok(ValueType::Image),
            other => Err(format!("unknown type: {}", other)),
        }
    }
}

/// Executes the call and returns the formatted output.
pub fn execute(client: &mut Client, cli: &Cli) -> CliResult<String> {
    let args = build_args(cli)?;

    if cli.notify {
        client.notify(&cli.method, args)?;
        return Ok(format!("{} {}", "Notified".green(), cli.method.cyan()));
    }

    let reply = client.invoke(&cli.method, args)?;
    format_reply(reply, cli.format, cli.output.as_deref())
}

/// Collects every parameter flag into call arguments.
pub fn build_args(cli: &Cli) -> CliResult<Args> {
    let mut named = Vec::new();
    for spec in &cli.params {
        named.push(parse_named(spec)?);
    }
    for spec in &cli.files {
        let (key, path) = split_assignment(spec)?;
        named.push((key, parse_value(&path, Some(ValueType::Binary))?));
    }
    for spec in &cli.images {
        let (key, path) = split_assignment(spec)?;
        named.push((key, parse_value(&path, Some(ValueType::Image))?));
    }

    let mut positional = Vec::new();
    for spec in &cli.positional {
        positional.push(parse_positional(spec)?);
    }

    Ok(Args::from_parts(positional, named)?)
}

fn split_assignment(spec: &str) -> CliResult<(String, String)> {
    match spec.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(ClientError::InvalidArguments(format!("expected KEY=VALUE, got '{}'", spec)).into()),
    }
}

/// Parses `KEY[:TYPE]=VALUE`.
pub fn parse_named(spec: &str) -> CliResult<(String, Param)> {
    let (key, value) = split_assignment(spec)?;
    match key.split_once(':') {
        Some((name, ty)) => {
            let ty = ty.parse::<ValueType>()?;
            Ok((name.to_string(), parse_value(&value, Some(ty))?))
        }
        None => Ok((key, parse_value(&value, None)?)),
    }
}

/// Parses `VALUE[:TYPE]`. A suffix that is not a known type is part of the value.
pub fn parse_positional(spec: &str) -> CliResult<Param> {
    if let Some((value, ty)) = spec.rsplit_once(':') {
        if let Ok(ty) = ty.parse::<ValueType>() {
            return parse_value(value, Some(ty));
        }
    }
    parse_value(spec, None)
}

/// Converts one textual value. Untyped values become int, float or bool when
/// they parse as one, else a string.
pub fn parse_value(raw: &str, ty: Option<ValueType>) -> CliResult<Param> {
    let param = match ty {
        None => guess(raw),
        Some(ValueType::Int) => Param::from(raw.parse::<i64>()?),
        Some(ValueType::Float) => Param::from(raw.parse::<f64>()?),
        Some(ValueType::Bool) => Param::from(raw.parse::<bool>()?),
        Some(ValueType::Str) => Param::from(raw),
        Some(ValueType::Json) => Param::from(serde_json::from_str::<Value>(raw)?),
        Some(ValueType::Binary) => Param::from(read_file(raw)?),
        Some(ValueType::Image) => Param::from(ImagePayload::decode(&read_file(raw)?)?),
    };
    Ok(param)
}

fn guess(raw: &str) -> Param {
    if let Ok(n) = raw.parse::<i64>() {
        Param::from(n)
    } else if let Ok(x) = raw.parse::<f64>() {
        Param::from(x)
    } else if let Ok(b) = raw.parse::<bool>() {
        Param::from(b)
    } else {
        Param::from(raw)
    }
}

fn read_file(path: &str) -> CliResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| format!("cannot read '{}': {}", path, e).into())
}

/// Renders a reply, writing decoded payloads to `output` when given.
pub fn format_reply(reply: Reply, format: OutputFormat, output: Option<&Path>) -> CliResult<String> {
    match format {
        OutputFormat::Raw => Ok(serde_json::to_string_pretty(&reply.into_response())?),
        OutputFormat::Json => Ok(format_json(reply.value())),
        OutputFormat::Bytes => format_bytes(reply.bytes()?, output),
        OutputFormat::Array => format_array(&reply.array()?, output),
        OutputFormat::Image => format_image(&reply.image()?, output),
        OutputFormat::Auto => match reply.payload() {
            Payload::Json(value) => Ok(format_json(&value)),
            Payload::Bytes(bytes) => format_bytes(bytes, output),
            Payload::Array(array) => format_array(&array, output),
            Payload::Image(image) => format_image(&image, output),
        },
    }
}

fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn format_bytes(bytes: Vec<u8>, output: Option<&Path>) -> CliResult<String> {
    let header = format!("{} {} bytes", "Bytes".bold(), bytes.len());
    match output {
        Some(path) => {
            std::fs::write(path, &bytes)?;
            Ok(format!("{} -> {}", header, path.display()))
        }
        None => Ok(format!("{}\n{}", header, String::from_utf8_lossy(&bytes))),
    }
}

fn format_array(array: &NdArray, output: Option<&Path>) -> CliResult<String> {
    let header = format!(
        "{} dtype={} shape={:?}",
        "Array".bold(),
        array.dtype(),
        array.shape()
    );
    match output {
        Some(path) => {
            std::fs::write(path, array.to_npy())?;
            Ok(format!("{} -> {}", header, path.display()))
        }
        None => Ok(format!("{}\n{}", header, array)),
    }
}

fn format_image(image: &ImagePayload, output: Option<&Path>) -> CliResult<String> {
    let header = format!(
        "{} {}x{} {:?}",
        "Image".bold(),
        image.width(),
        image.height(),
        image.format
    );
    match output {
        Some(path) => {
            // The extension picks the container; without one, keep the received format.
            if path.extension().is_some() {
                image.image.save(path)?;
            } else {
                std::fs::write(path, image.encode()?)?;
            }
            Ok(format!("{} -> {}", header, path.display()))
        }
        None => Ok(header),
    }
}
