use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use log::LevelFilter;
use saxtape::{SaxTape, XmlWriter, read_document_from};
use simplelog::{ColorChoice, Config, SimpleLogger, TermLogger, TerminalMode};

struct SaxtapeDump {
    input: PathBuf,
    round_trip: bool,
    stats: bool,
    verbosity_level: LevelFilter,
}

impl SaxtapeDump {
    fn from_cli_matches(matches: &ArgMatches) -> Self {
        let input = matches
            .get_one::<String>("INPUT")
            .map(PathBuf::from)
            .expect("INPUT is a required argument");

        let verbosity_level = match matches.get_count("verbose") {
            0 => LevelFilter::Off,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        SaxtapeDump {
            input,
            round_trip: matches.get_flag("round-trip"),
            stats: matches.get_flag("stats"),
            verbosity_level,
        }
    }

    fn run(&self) -> anyhow::Result<()> {
        let source = fs::read_to_string(&self.input)
            .with_context(|| format!("failed to read `{}`", self.input.display()))?;

        let mut tape = SaxTape::new();
        read_document_from(&source, self.input.to_str(), &mut tape)
            .context("failed to parse input document")?;

        let tape = if self.round_trip {
            let mut bytes = Vec::new();
            tape.write_to(&mut bytes)
                .context("failed to serialize tape")?;
            SaxTape::read_from(&mut bytes.as_slice()).context("failed to restore tape")?
        } else {
            tape
        };

        if self.stats {
            eprintln!(
                "{} events, {} attributes, ~{} bytes",
                tape.len(),
                tape.recorded_attribute_count(),
                tape.approximate_size()
            );
        }

        let stdout = io::stdout();
        let mut writer = XmlWriter::new(stdout.lock());
        tape.replay(&mut writer)
            .context("failed to replay tape")?;
        let mut stdout = writer.into_inner();
        writeln!(stdout)?;
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let matches = Command::new("saxtape_dump")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Records an XML document to a tape and replays it back as XML")
        .arg(
            Arg::new("INPUT")
                .required(true)
                .help("XML file to record"),
        )
        .arg(
            Arg::new("round-trip")
                .long("round-trip")
                .action(ArgAction::SetTrue)
                .help("Round-trip the tape through its serialized byte form before replaying"),
        )
        .arg(
            Arg::new("stats")
                .long("stats")
                .action(ArgAction::SetTrue)
                .help("Print tape statistics to stderr"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("Increase verbosity (-v info, -vv debug, -vvv trace)"),
        )
        .get_matches();

    let app = SaxtapeDump::from_cli_matches(&matches);

    if app.verbosity_level != LevelFilter::Off {
        TermLogger::init(
            app.verbosity_level,
            Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        )
        .or_else(|_| SimpleLogger::init(app.verbosity_level, Config::default()))
        .context("failed to initialize logging")?;
    }

    app.run()
}
