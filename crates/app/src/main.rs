mod dry_run;
mod runner;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use quiz_core::StepGraph;
use quiz_core::model::NextRule;
use services::{Clock, HttpSubmissionClient, QuizConfig, QuizEngine, SubmissionClient};
use tokio::io::BufReader;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use url::Url;

use dry_run::DryRunClient;
use runner::{Outcome, Runner};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    MissingQuiz,
    InvalidEndpoint { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::MissingQuiz => write!(f, "--quiz is required"),
            ArgsError::InvalidEndpoint { raw } => write!(f, "invalid --endpoint value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- run   --quiz <file> [--endpoint <url>] [--dry-run]");
    eprintln!("  cargo run -p app -- check --quiz <file>");
    eprintln!();
    eprintln!("While running, type an option number or value, or one of:");
    eprintln!("  back, reset, quit");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  QUIZ_SUBMIT_URL, QUIZ_SUBMIT_TIMEOUT_SECS, QUIZ_SUBMIT_API_KEY, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    Check,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "run" => Some(Self::Run),
            "check" => Some(Self::Check),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Args {
    quiz: PathBuf,
    endpoint: Option<Url>,
    dry_run: bool,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut quiz = None;
        let mut endpoint = None;
        let mut dry_run = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--quiz" => quiz = Some(PathBuf::from(require_value(args, "--quiz")?)),
                "--endpoint" => {
                    let value = require_value(args, "--endpoint")?;
                    let url = Url::parse(value.trim())
                        .map_err(|_| ArgsError::InvalidEndpoint { raw: value.clone() })?;
                    endpoint = Some(url);
                }
                "--dry-run" => dry_run = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            quiz: quiz.ok_or(ArgsError::MissingQuiz)?,
            endpoint,
            dry_run,
        })
    }
}

fn init_tracing() {
    // stdout carries the quiz itself, so logs go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let parsed = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let mut config = QuizConfig::from_path(&parsed.quiz)?.with_env_overrides()?;
    if let Some(endpoint) = parsed.endpoint {
        config.submission.endpoint = Some(endpoint);
    }

    match cmd {
        Command::Check => {
            let graph = config.build_graph()?;
            print_topology(&graph);
            Ok(())
        }
        Command::Run => {
            // A broken graph fails here, before any prompt is shown.
            let engine_config = config.engine_config(Clock::system())?;
            let client: Arc<dyn SubmissionClient> = if parsed.dry_run {
                Arc::new(DryRunClient::default())
            } else {
                let http = HttpSubmissionClient::from_config(&config.submission)?;
                info!(endpoint = %http.endpoint(), "submitting to endpoint");
                Arc::new(http)
            };
            let engine = QuizEngine::new(engine_config, client);
            let _trace = engine.subscribe(|snapshot| {
                debug!(
                    quiz_id = %snapshot.quiz_id,
                    step = %snapshot.current_step,
                    status = ?snapshot.status,
                    percent = snapshot.progress.percent(),
                    "session changed"
                );
            });

            println!("Type an option number or value. Commands: back, reset, quit.");
            let input = BufReader::new(tokio::io::stdin());
            match Runner::new(&engine, input, std::io::stdout()).run().await? {
                Outcome::Completed => {
                    info!(quiz_id = %engine.quiz_id(), status = ?engine.status(), "quiz finished");
                }
                Outcome::Quit => println!("Bye."),
            }
            Ok(())
        }
    }
}

fn print_topology(graph: &StepGraph) {
    println!(
        "ok: {} steps, start {}, longest path {}",
        graph.steps().len(),
        graph.start(),
        graph.max_depth()
    );
    for step in graph.steps() {
        let kind = if step.is_choice() {
            "choice"
        } else if step.is_form() {
            "form"
        } else {
            "terminal"
        };
        let next = match &step.next {
            Some(NextRule::Fixed(to)) => format!("-> {to}"),
            Some(NextRule::Branch(branch)) => {
                let mut routes: Vec<String> = branch
                    .routes
                    .iter()
                    .map(|(value, to)| format!("{value}:{to}"))
                    .collect();
                if let Some(default) = branch.default {
                    routes.push(format!("*:{default}"));
                }
                format!("-> {}", routes.join(" "))
            }
            Some(NextRule::Computed(_)) => "-> (computed)".to_string(),
            None => String::new(),
        };
        println!("  {:>3} {kind:<8} {:<45} {next}", step.id, step.question);
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
