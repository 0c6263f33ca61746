//! Dump command - decode a bulk persistence file without starting a manager.

use std::path::PathBuf;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use console::{Style, style};
use tessera_session::{BinaryCodec, BulkReader, SessionData};

use super::{Context, format_interval, format_millis};

/// Arguments for the dump command.
#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Bulk file written on stop (defaults to the configured pathname)
    pub file: Option<PathBuf>,
}

/// Run the dump command.
pub async fn run(args: DumpArgs, ctx: &Context) -> Result<()> {
    let path = match args.file {
        Some(path) => path,
        None => {
            let pathname = ctx.config().manager_section().pathname;
            if pathname.as_os_str().is_empty() {
                bail!("no file given and bulk persistence is disabled");
            }
            pathname
        }
    };

    let bytes =
        std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    let codec = BinaryCodec;
    let reader = BulkReader::new(&codec, &bytes)
        .with_context(|| format!("{} is not a session file", path.display()))?;
    let expected = reader.remaining();

    let mut records: Vec<SessionData> = Vec::with_capacity(expected);
    let mut failure = None;
    for record in reader {
        match record {
            Ok(data) => records.push(data),
            Err(e) => failure = Some(e),
        }
    }

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        print_records(&records, expected);
    }

    match failure {
        Some(e) => Err(anyhow::Error::new(e).context(format!(
            "decoded {} of {} session(s) before the stream broke",
            records.len(),
            expected
        ))),
        None => Ok(()),
    }
}

fn print_records(records: &[SessionData], expected: usize) {
    let dim = Style::new().dim();
    println!(
        "{}",
        style(format!("{} of {} session(s)", records.len(), expected)).bold()
    );
    println!("{}", dim.apply_to("─".repeat(50)));
    for data in records {
        println!("{}", style(&data.id).cyan());
        println!(
            "   {}",
            dim.apply_to(format!(
                "created {}  last access {}  timeout {}  attributes {}",
                format_millis(data.creation_time),
                format_millis(data.last_accessed_time),
                format_interval(data.max_inactive_interval),
                data.attributes.len()
            ))
        );
    }
}
