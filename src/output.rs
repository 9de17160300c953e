use std::collections::BTreeMap;

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use serde_json::json;

use crate::error::Result;
use crate::migration::Outcome;
use crate::model::{Payload, Record, RecordSummary};
use crate::schema::FieldDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Pretty,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub fn print_outcome(outcome: &Outcome, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(outcome)?,
        Format::Pretty => {
            let line = outcome.to_string();
            match outcome {
                Outcome::Created { enrichment, .. } => {
                    println!("{}", line.green());
                    if !enrichment.is_complete() {
                        println!("  {}", "some enrichment steps failed, see log".yellow());
                    }
                }
                Outcome::Skipped { .. } => println!("{}", line.yellow()),
                Outcome::Failed { .. } => println!("{}", line.red()),
            }
        }
    }
    Ok(())
}

/// `N of M` line closing a batch run.
pub fn print_tally(succeeded: usize, total: usize, what: &str, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(&json!({ "succeeded": succeeded, "total": total }))?,
        Format::Pretty => {
            let line = format!("{succeeded} of {total} {what} processed successfully");
            if succeeded == total {
                println!("{}", line.bold());
            } else {
                println!("{}", line.red().bold());
            }
        }
    }
    Ok(())
}

/// One line per key for boolean batch operations.
pub fn print_step(key: &str, ok: bool, detail: &str, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(&json!({ "key": key, "ok": ok, "detail": detail }))?,
        Format::Pretty => {
            let mark = if ok { "ok".green() } else { "failed".red() };
            if detail.is_empty() {
                println!("{key}: {mark}");
            } else {
                println!("{key}: {mark} {}", detail.dimmed());
            }
        }
    }
    Ok(())
}

pub fn print_record(record: &Record, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(record)?,
        Format::Pretty => {
            println!(
                "{} {} ({})",
                format!("[{}]", record.key).cyan().bold(),
                record.summary,
                record.status
            );
            if let Some(description) = &record.description {
                println!("  {description}");
            }
            println!("  {} {} | {} {}", "project:".dimmed(), record.project, "type:".dimmed(), record.issue_type);
            if let Some(reporter) = &record.reporter {
                println!("  {} {}", "reporter:".dimmed(), reporter.label());
            }
            if !record.versions.is_empty() {
                println!("  {} {}", "versions:".dimmed(), record.versions.join(", "));
            }
            if !record.components.is_empty() {
                println!("  {} {}", "components:".dimmed(), record.components.join(", "));
            }
            println!("  {} {}", "comments:".dimmed(), record.comments.len());
        }
    }
    Ok(())
}

/// Field name -> value listing.
pub fn print_fields(key: &str, fields: &BTreeMap<String, String>, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(&json!({ "key": key, "fields": fields }))?,
        Format::Pretty => {
            println!("{}", format!("[{key}]").cyan().bold());
            let width = fields.keys().map(|k| k.chars().count()).max().unwrap_or(0);
            for (name, value) in fields {
                println!("  {}  {}", format!("{name:width$}").dimmed(), value);
            }
        }
    }
    Ok(())
}

pub fn print_summaries(hits: &[RecordSummary], format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(hits)?,
        Format::Pretty => {
            if hits.is_empty() {
                println!("{}", "No matching records.".dimmed());
            }
            for hit in hits {
                println!("{:12} {:12} {}", hit.key, hit.status, hit.summary);
            }
        }
    }
    Ok(())
}

pub fn print_schema(fields: &BTreeMap<String, FieldDescriptor>, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(&fields.values().collect::<Vec<_>>())?,
        Format::Pretty => {
            if fields.is_empty() {
                println!("{}", "No fields in schema.".dimmed());
            }
            for descriptor in fields.values() {
                let required = if descriptor.required {
                    "required".yellow().to_string()
                } else {
                    "optional".dimmed().to_string()
                };
                println!(
                    "{:32} {:22} {:12} {}",
                    descriptor.name,
                    descriptor.id,
                    descriptor.field_type.to_string(),
                    required
                );
                if !descriptor.allowed_values.is_empty() {
                    let labels: Vec<&str> = descriptor
                        .allowed_values
                        .iter()
                        .map(|v| v.label.as_str())
                        .collect();
                    println!("  {} {}", "allowed:".dimmed(), labels.join(", "));
                }
            }
        }
    }
    Ok(())
}

pub fn print_payload(source: &str, payload: &Payload, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(&json!({ "source": source, "payload": payload }))?,
        Format::Pretty => {
            println!("{}", format!("[{source}] would create:").cyan().bold());
            println!("{}", serde_json::to_string_pretty(payload)?);
        }
    }
    Ok(())
}
