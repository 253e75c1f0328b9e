use std::io::IsTerminal;
use std::time::Duration;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One completed call as printed by `ctxrpc call`.
#[derive(Debug, Serialize)]
pub struct CallOutput<'a> {
    pub participant: &'a str,
    pub endpoint: &'a str,
    pub method: &'a str,
    pub result: serde_json::Value,
    pub elapsed_ms: u128,
}

impl<'a> CallOutput<'a> {
    pub fn new(
        participant: &'a str,
        endpoint: &'a str,
        method: &'a str,
        result: serde_json::Value,
        elapsed: Duration,
    ) -> Self {
        Self {
            participant,
            endpoint,
            method,
            result,
            elapsed_ms: elapsed.as_millis(),
        }
    }
}

pub fn print_call(out: &CallOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ENDPOINT", "METHOD", "ELAPSED", "RESULT"])
                .add_row(vec![
                    out.endpoint.to_string(),
                    out.method.to_string(),
                    format!("{}ms", out.elapsed_ms),
                    compact(&out.result),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{}/{}.{} ({}ms):",
                out.participant, out.endpoint, out.method, out.elapsed_ms
            );
            println!(
                "{}",
                serde_json::to_string_pretty(&out.result).unwrap_or_else(|_| compact(&out.result))
            );
        }
    }
}

fn compact(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
