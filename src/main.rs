use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use scenario_assert::errors::with_node_and_colored;
use scenario_assert::{assertion, from_yaml_str, Error, Options, Registry, Result, Template, YamlSource};
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Assert an actual document against a templated expected document.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Expected document (YAML) with `{{ }}` templates
    expect: PathBuf,
    /// Actual document (YAML or JSON)
    actual: PathBuf,
    /// Options file (YAML): timeout_ms, color, vars
    #[arg(long)]
    config: Option<PathBuf>,
    /// Variables file (YAML), exposed as `vars`; replaces `vars` from --config
    #[arg(long)]
    vars: Option<PathBuf>,
    /// Deadline for each deferred evaluation, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Colorize document excerpts in errors
    #[arg(long)]
    color: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
    println!("ok");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("scenario_assert=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr).compact())
        .init();
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::Message(format!("failed to read {}: {e}", path.display())))
}

async fn run(args: Args) -> Result<()> {
    let mut options = match &args.config {
        Some(path) => Options::from_yaml_str(&read(path)?)?,
        None => Options::default(),
    };
    if let Some(path) = &args.vars {
        options.vars = serde_yaml::from_str(&read(path)?)
            .map_err(|e| Error::Parse(format!("invalid vars file: {e}")))?;
    }
    if args.timeout_ms.is_some() {
        options.timeout_ms = args.timeout_ms;
    }
    options.color |= args.color;
    debug!(?options, "resolved options");

    let expect_text = read(&args.expect)?;
    let expected = from_yaml_str(&expect_text)?;
    let actual = from_yaml_str(&read(&args.actual)?)?;

    let template = Template::from_options(&options, Registry::with_assertions());
    let source = Arc::new(YamlSource::new(&expect_text));
    let assertion = assertion::build(&template, &expected)
        .await
        .map_err(|e| with_node_and_colored(e, source.clone(), options.color))?;
    info!(
        expect = %args.expect.display(),
        timeout = ?options.timeout_ms.map(Duration::from_millis),
        "asserting"
    );
    assertion
        .assert(&actual)
        .await
        .map_err(|e| with_node_and_colored(e, source, options.color))
}
