use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::store::TableData;

// Styling helpers

fn bright_yellow(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).bright().yellow()
}

fn bright_green(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).bright().green()
}

fn dim(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).dim()
}

fn magenta_bold(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).magenta().bold()
}

// Banner

pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("📊 ComLens"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("Community Insights Tool")
    );
}

// Progress tracking for the three-phase run: fetch, aggregate, write.

pub struct RunProgress {
    pb: ProgressBar,
}

impl RunProgress {
    pub fn start_fetch(what: &str) -> Self {
        let pb = spinner();
        pb.set_message(bright_yellow(format!("Phase 1/3: Fetching {what}")).to_string());
        Self { pb }
    }

    pub fn finish_fetch_start_aggregate(self, record_count: usize) -> Self {
        self.pb.finish_with_message(
            bright_green(format!("Phase 1/3: Fetched {record_count} records ✓")).to_string(),
        );

        let pb = spinner();
        pb.set_message(bright_yellow("Phase 2/3: Aggregating records").to_string());
        Self { pb }
    }

    pub fn finish_aggregate_start_write(self, row_count: usize) -> Self {
        self.pb.finish_with_message(
            bright_green(format!("Phase 2/3: Aggregated into {row_count} rows ✓")).to_string(),
        );

        let pb = spinner();
        pb.set_message(bright_yellow("Phase 3/3: Writing destination tables").to_string());
        Self { pb }
    }

    pub fn finish_write(self, table_count: usize) {
        self.pb.finish_with_message(
            bright_green(format!("Phase 3/3: Upserted {table_count} tables ✓")).to_string(),
        );
    }

    pub fn finish_print_only(self) {
        self.pb
            .finish_with_message(bright_green("Phase 3/3: No database configured, printing ✓").to_string());
    }
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {msg} {spinner}")
            .unwrap(),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

// Table dumps

/// Print a destination table's rows to stdout, mirroring its stored layout.
pub fn print_table(data: &TableData) {
    println!("\n{}", magenta_bold(data.spec.name));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(data.spec.columns.iter().map(|c| Cell::new(c.name)));

    for row in &data.rows {
        table.add_row(row.iter().map(|value| Cell::new(format_value(value))));
    }

    println!("{table}");
}

fn format_value(value: &rusqlite::types::Value) -> String {
    use rusqlite::types::Value;
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => format!("{r:.2}"),
        Value::Text(t) => t.clone(),
        Value::Blob(_) => "<blob>".to_string(),
    }
}
