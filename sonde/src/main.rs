use clap::Parser;
use std::path::PathBuf;

/// Parse binary data against a declarative format definition
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Path to the definition file
    #[clap(name = "DEFINITION_FILE")]
    definition_file: PathBuf,
    /// Path to the binary data to read from
    #[clap(name = "BINARY_FILE")]
    binary_file: PathBuf,
    /// Directory that `!save` writes graphics into
    #[clap(long = "output-dir", name = "DIR", display_order = 0)]
    output_dir: Option<PathBuf>,
    /// Record per-field errors in the output instead of stopping at the first
    #[clap(long = "lenient")]
    lenient: bool,
    /// Track the dotted path of every parsed value
    #[clap(long = "rich")]
    rich: bool,
}

const MAX_PRETTY_WIDTH: usize = 80;

fn get_pretty_width() -> usize {
    let term_width = termsize::get().map_or(usize::MAX, |size| usize::from(size.cols));
    std::cmp::min(term_width, MAX_PRETTY_WIDTH)
}

fn main() -> ! {
    let cli = Cli::parse();

    let mut driver = sonde::Driver::new();
    driver.set_emit_width(get_pretty_width());

    let options = sonde::Options {
        output_dir: cli.output_dir,
        lenient: cli.lenient,
        rich: cli.rich,
    };
    let status = driver.run(&cli.definition_file, &cli.binary_file, &options);

    std::process::exit(status.exit_code());
}
