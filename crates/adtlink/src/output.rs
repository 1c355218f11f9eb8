use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use crate::sim::SimulationReport;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
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

#[derive(Serialize)]
struct ReportOutput<'a> {
    schema_id: &'a str,
    #[serde(flatten)]
    report: &'a SimulationReport,
}

pub fn print_report(report: &SimulationReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ReportOutput {
                schema_id: "https://schemas.3leaps.dev/adtlink/cli/v1/simulation-report.schema.json",
                report,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut clients = Table::new();
            clients
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "CLIENT", "RECEIVED", "REPLIED", "RESETS", "MISSED", "OUT-OF-ORDER",
                ]);
            for c in &report.clients {
                clients.add_row(vec![
                    c.index.to_string(),
                    c.received.to_string(),
                    c.replied.to_string(),
                    c.resets.to_string(),
                    c.missed.to_string(),
                    c.out_of_order.to_string(),
                ]);
            }
            println!("{clients}");

            let mut summary = Table::new();
            summary
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METRIC", "VALUE"]);
            for (name, value) in summary_rows(report) {
                summary.add_row(vec![name.to_string(), value]);
            }
            println!("{summary}");
        }
        OutputFormat::Pretty => {
            for c in &report.clients {
                println!(
                    "client={} received={} replied={} resets={} missed={} out_of_order={}",
                    c.index, c.received, c.replied, c.resets, c.missed, c.out_of_order
                );
            }
            let line = summary_rows(report)
                .into_iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!("{line}");
        }
    }
}

fn summary_rows(report: &SimulationReport) -> Vec<(&'static str, String)> {
    vec![
        ("sent", report.sent.to_string()),
        ("delivered", report.delivered.to_string()),
        ("missed", report.missed.to_string()),
        ("replies_sent", report.replies_sent.to_string()),
        ("replies_received", report.replies_received.to_string()),
        ("exits_received", report.exits_received.to_string()),
        ("sender_backpressure", report.sender_backpressure.to_string()),
        ("rx_missed_batches", report.mux.adt.rx_missed_batches.to_string()),
        ("tx_transfers", report.remote.tx_transfers.to_string()),
        ("readiness", report.mux.readiness.to_string()),
        ("completed", report.completed.to_string()),
        ("elapsed_ms", report.elapsed_ms.to_string()),
    ]
}
