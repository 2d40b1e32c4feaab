//! `weld status`: last sync point of every base.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use weld_core::markers::EventVerb;
use weld_sync::status::{status, BaseStatus, WeldStatus};
use weld_sync::workflow::short;

use super::open_session;

/// Arguments for `weld status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, root: Option<&Path>) -> Result<()> {
        let session = open_session(root)?;
        let report = status(&session).context("failed to read weld history")?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(&report);
        Ok(())
    }
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "base")]
    base: String,
    #[tabled(rename = "last sync")]
    last_sync: String,
    #[tabled(rename = "base commit")]
    base_commit: String,
    #[tabled(rename = "weld commit")]
    weld_commit: String,
    #[tabled(rename = "seams")]
    seams: usize,
}

fn event_label(event: Option<EventVerb>) -> String {
    match event {
        Some(EventVerb::Merged) => "merged".green().to_string(),
        Some(EventVerb::Pushed) => "pushed".cyan().to_string(),
        Some(EventVerb::Init) => "never pulled".yellow().to_string(),
        Some(other) => other.to_string(),
        None => "no history".red().to_string(),
    }
}

fn row(base: &BaseStatus) -> StatusTableRow {
    StatusTableRow {
        base: base.base.to_string(),
        last_sync: event_label(base.last_event),
        base_commit: base.base_commit.as_deref().map_or("-", short).to_string(),
        weld_commit: base.weld_commit.as_deref().map_or("-", short).to_string(),
        seams: base.seams,
    }
}

fn print_table(report: &WeldStatus) {
    println!(
        "weld v{} | {} | {} base(s)",
        env!("CARGO_PKG_VERSION"),
        report.name.bold(),
        report.bases.len()
    );
    if report.bases.is_empty() {
        println!("The manifest declares no bases.");
    } else {
        let mut table = Table::new(report.bases.iter().map(row));
        table.with(Style::rounded());
        println!("{table}");
    }

    match &report.operation {
        None => println!("No operation in progress."),
        Some(op) => {
            let verbs: Vec<&str> = op.verbs.iter().map(|v| v.as_str()).collect();
            println!(
                "{} {} of base {}: {}/{} commit(s) replayed",
                "▶".yellow(),
                op.kind,
                op.base,
                op.replayed,
                op.total
            );
            if op.bad_patches > 0 {
                println!(
                    "  {} patch section(s) need attention under .weld/bad-patches/",
                    op.bad_patches
                );
            }
            println!("  next: weld {}", verbs.join(" | weld "));
        }
    }
}
