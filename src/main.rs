use std::ffi::OsString;
use std::io;

use clap::Parser;
use log::LevelFilter;

use npu_prof::backend::CsvSink;
use npu_prof::chain::calculate;
use npu_prof::event::Level;
use npu_prof::source::DirSource;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(required = true, help = "input directory of decoded trace records")]
    input: OsString,

    #[arg(
        short,
        long,
        default_value = "npu_prof_rows",
        help = "output directory pathname"
    )]
    output: OsString,

    #[arg(short, long, help = "overwrite output directory if it exists")]
    force: bool,

    #[arg(short, long, help = "print verbose assembly information")]
    verbose: bool,
}

fn main() -> io::Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if cli.verbose {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    println!("Reading trace records from {:?}...", cli.input);
    let source = DirSource::new(&cli.input);
    let mut sink = CsvSink::create(&cli.output, cli.force)?;

    let summary =
        calculate(&source, &mut sink).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    println!(
        "Assembled {} rows across {} threads",
        summary.total_rows(),
        summary.threads
    );
    for level in Level::ALL {
        println!(
            "  {:>6}: {} rows",
            level,
            summary.rows_per_level[level.depth()]
        );
    }
    if summary.skipped_records > 0 {
        println!("Skipped {} malformed records", summary.skipped_records);
    }
    if summary.unterminated > 0 {
        match summary.last_observed_end {
            Some(end) => println!(
                "{} intervals never terminated; activity observed through {:.3} us",
                summary.unterminated,
                end.to_us()
            ),
            None => println!("{} intervals never terminated", summary.unterminated),
        }
    }
    if summary.anomalies > 0 {
        println!("Observed {} nesting anomalies", summary.anomalies);
    }
    if !summary.incomplete.is_empty() {
        println!(
            "Warning: chains for {} threads aborted; their rows are incomplete: {:?}",
            summary.incomplete.len(),
            summary.incomplete
        );
    }

    Ok(())
}
