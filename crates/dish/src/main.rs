//! dish CLI entry point.
//!
//! Usage:
//!   dish serve [OPTIONS]                       # Run the compilation scheduler
//!   dish pipe read|write --host H --port P     # One end of a remote pipe
//!   dish request compile <script> <vars> <ir>  # Talk to a running scheduler
//!   dish split <ir.json> [--distributed]       # Inspect a partitioned IR snapshot

mod args;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dish_client::{FifoClient, SchedulerClient};
use dish_kernel::compiler::load_snapshot;
use dish_kernel::emit::ScriptEmitter;
use dish_kernel::paths;
use dish_kernel::scheduler::ProcessId;
use dish_kernel::transport::{remote_read, remote_write, RetryPolicy};
use dish_kernel::{add_remote_pipes, split_ir, DishConfig, FifoChannel, PortAllocator, Scheduler, SnapshotCompiler};
use dish_types::FileIdGen;

use args::Options;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        None | Some("--help" | "-h" | "help") => {
            print_help();
            Ok(ExitCode::SUCCESS)
        }

        Some("--version" | "-V") => {
            println!("dish {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }

        Some("serve") => run_serve(&args[2..]),
        Some("pipe") => run_pipe(&args[2..]),
        Some("request") => run_request(&args[2..]),
        Some("split") => run_split(&args[2..]),

        Some(unknown) => {
            eprintln!("Unknown command: {unknown}");
            eprintln!("Run 'dish --help' for usage.");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_help() {
    println!(
        r#"dish v{}

Usage:
  dish serve [OPTIONS]                      Run the compilation scheduler
  dish pipe read|write --host H --port P    Stream stdin to, or stdout from, a remote pipe
  dish request compile <script> <vars> <ir> Ask a running scheduler to compile a pipeline
  dish request exit <pid>                   Report that a pipeline finished
  dish request done                         Wait for all pipelines and stop the scheduler
  dish split <ir.json> [OPTIONS]            Show how an IR snapshot is partitioned

Serve Options:
  --config=<path>    Config file (default: $XDG_CONFIG_HOME/dish/config.toml)
  --input=<path>     Request FIFO (default: $XDG_RUNTIME_DIR/dish/input.fifo)
  --output=<path>    Response FIFO (default: $XDG_RUNTIME_DIR/dish/output.fifo)
  --log-file=<path>  Append logs here instead of stderr
  --distributed      Partition pipelines for remote execution
  --dry-run          Compile without writing scripts

Request Options:
  --input=<path>     Request FIFO
  --output=<path>    Response FIFO

Split Options:
  --distributed      Also insert remote pipes and show the coordinator
  --emit             Print the generated scripts instead of the graphs
  --host=<addr>      Remote pipe host (default: from config)
  --base-port=<n>    First remote pipe port (default: from config)
  --config=<path>    Config file

Logging follows RUST_LOG, with dish=info by default.
"#,
        env!("CARGO_PKG_VERSION")
    );
}

/// Install the fmt subscriber on stderr, or appending to `log_file`.
fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("dish=info".parse()?);
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
                .with(filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }
    Ok(())
}

fn load_config(opts: &Options) -> Result<DishConfig> {
    let config = match opts.path("--config") {
        Some(path) => DishConfig::load_from(&path),
        None => DishConfig::load(),
    };
    config.context("Failed to load configuration")
}

// ═══════════════════════════════════════════════════════════════════════════
// serve
// ═══════════════════════════════════════════════════════════════════════════

fn run_serve(args: &[String]) -> Result<ExitCode> {
    let opts = Options::parse(
        args,
        &["--config", "--input", "--output", "--log-file"],
        &["--distributed", "--dry-run"],
    )?;
    if opts.wants_help() {
        print_help();
        return Ok(ExitCode::SUCCESS);
    }
    init_tracing(opts.path("--log-file").as_deref())?;

    let mut config = load_config(&opts)?;
    config.distributed |= opts.has("--distributed");
    config.dry_run |= opts.has("--dry-run");

    let input = opts.path("--input").unwrap_or_else(paths::request_fifo);
    let output = opts.path("--output").unwrap_or_else(paths::response_fifo);
    let mut channel = FifoChannel::create(&input, &output).context("Failed to create control FIFOs")?;

    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        distributed = config.distributed,
        dry_run = config.dry_run,
        "serving"
    );

    let compiler = SnapshotCompiler::new(&config);
    let mut scheduler = Scheduler::new(compiler, config);
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(scheduler.run(&mut channel)).context("Scheduler stopped")?;
    Ok(ExitCode::SUCCESS)
}

// ═══════════════════════════════════════════════════════════════════════════
// pipe
// ═══════════════════════════════════════════════════════════════════════════

fn run_pipe(args: &[String]) -> Result<ExitCode> {
    let opts = Options::parse(args, &["--host", "--port", "--config"], &[])?;
    if opts.wants_help() {
        print_help();
        return Ok(ExitCode::SUCCESS);
    }
    init_tracing(None)?;

    let config = load_config(&opts)?;
    let host = opts.value("--host").unwrap_or(&config.remote.host).to_string();
    let port: u16 = opts.parsed("--port")?.context("pipe requires --port")?;
    let policy = RetryPolicy::from_config(&config.remote);

    let rt = tokio::runtime::Runtime::new()?;
    let bytes = match opts.positional().first().map(String::as_str) {
        Some("write") => rt.block_on(async {
            let mut stdin = tokio::io::stdin();
            remote_write(&host, port, &mut stdin, policy).await
        })?,
        Some("read") => rt.block_on(async {
            let mut stdout = tokio::io::stdout();
            remote_read(&host, port, &mut stdout, policy).await
        })?,
        Some(other) => bail!("unknown pipe direction: {other} (expected read or write)"),
        None => bail!("pipe requires a direction: read or write"),
    };
    tracing::debug!(bytes, "pipe closed");
    Ok(ExitCode::SUCCESS)
}

// ═══════════════════════════════════════════════════════════════════════════
// request
// ═══════════════════════════════════════════════════════════════════════════

fn run_request(args: &[String]) -> Result<ExitCode> {
    let opts = Options::parse(args, &["--input", "--output"], &[])?;
    if opts.wants_help() {
        print_help();
        return Ok(ExitCode::SUCCESS);
    }
    init_tracing(None)?;

    let client = FifoClient::new(
        opts.path("--input").unwrap_or_else(paths::request_fifo),
        opts.path("--output").unwrap_or_else(paths::response_fifo),
    );
    let rt = tokio::runtime::Runtime::new()?;

    match opts.positional() {
        [cmd, script, vars, ir] if cmd == "compile" => {
            let pid = rt.block_on(client.compile(Path::new(script), Path::new(vars), Path::new(ir)))?;
            println!("{pid}");
        }
        [cmd, pid] if cmd == "exit" => {
            let pid: u64 = pid.parse().with_context(|| format!("invalid process id: {pid}"))?;
            rt.block_on(client.exit(ProcessId(pid)))?;
        }
        [cmd] if cmd == "done" => {
            rt.block_on(client.done())?;
            println!("All finished");
        }
        _ => bail!("usage: dish request compile <script> <vars> <ir> | exit <pid> | done"),
    }
    Ok(ExitCode::SUCCESS)
}

// ═══════════════════════════════════════════════════════════════════════════
// split
// ═══════════════════════════════════════════════════════════════════════════

fn run_split(args: &[String]) -> Result<ExitCode> {
    let opts = Options::parse(
        args,
        &["--config", "--host", "--base-port"],
        &["--distributed", "--emit"],
    )?;
    if opts.wants_help() {
        print_help();
        return Ok(ExitCode::SUCCESS);
    }
    init_tracing(None)?;

    let [path] = opts.positional() else {
        bail!("usage: dish split <ir.json> [--distributed] [--emit]");
    };
    let config = load_config(&opts)?;
    let host = opts.value("--host").unwrap_or(&config.remote.host).to_string();
    let base_port = opts.parsed::<u16>("--base-port")?.unwrap_or(config.remote.base_port);

    let rt = tokio::runtime::Runtime::new()?;
    let ir = rt.block_on(load_snapshot(Path::new(path)))?;
    let partition = split_ir(&ir, FileIdGen::continuing(&ir))?;
    let emitter = ScriptEmitter::from_config(&config);
    let show = |title: String, graph: &dish_types::Ir| -> Result<()> {
        println!("# {title}");
        if opts.has("--emit") {
            print!("{}", emitter.render(graph)?);
        } else {
            print!("{}", graph.dump());
        }
        println!();
        Ok(())
    };

    if !opts.has("--distributed") {
        for (index, sub) in partition.subgraphs.iter().enumerate() {
            show(format!("subgraph {index}"), sub)?;
        }
        for (edge, consumers) in &partition.boundary {
            println!("boundary {edge} -> {consumers:?}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let ports = PortAllocator::new(base_port);
    let dist = add_remote_pipes(partition, &ports, &host)?;
    for (index, sub) in dist.subgraphs.iter().enumerate() {
        show(format!("worker {index}"), sub)?;
    }
    show("coordinator".to_string(), &dist.coordinator)?;
    Ok(ExitCode::SUCCESS)
}
