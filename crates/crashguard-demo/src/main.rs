use crashguard::{CrashGuard, GuardResult};
use facet::Facet;
use figue as args;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

mod scenarios;

type AnyResult<T> = Result<T, String>;
pub(crate) const DEMO_CHILD_MODE_ENV: &str = "CRASHGUARD_DEMO_CHILD_MODE";
/// Label used when `--label` is not given.
const LABEL_ENV: &str = "CRASHGUARD_LABEL";
/// Exit status of a scenario whose crash was intercepted (EX_SOFTWARE).
const CRASH_EXIT_CODE: i32 = 70;

#[derive(Facet, Debug)]
struct Cli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    /// Label for dump file names (default: CRASHGUARD_LABEL).
    #[facet(args::named, default)]
    label: Option<String>,
    /// Where dumps go (default: CRASHGUARD_DUMP_DIR, then the temp dir).
    #[facet(args::named, default)]
    dump_dir: Option<String>,
    /// Run the scenario in this process instead of a child.
    #[facet(args::named, default)]
    in_process: bool,
    #[facet(args::subcommand)]
    command: ScenarioKind,
}

#[derive(Facet, Debug, Clone, Copy)]
#[repr(u8)]
enum ScenarioKind {
    Completes,
    Segfault,
    IllegalInstruction,
    Abort,
    Unlogged,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}

fn run() -> AnyResult<i32> {
    let cli = parse_cli()?;
    let child_mode = std::env::var_os(DEMO_CHILD_MODE_ENV).is_some();

    if child_mode || cli.in_process {
        return Ok(run_scenario(&cli));
    }

    let status = run_scenario_in_subprocess(&cli)?;
    println!("scenario {} exited: {}", scenario_name(cli.command), format_status(status));
    Ok(status.code().unwrap_or(1))
}

fn parse_cli() -> AnyResult<Cli> {
    let figue_config = args::builder::<Cli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("crashguard-demo")
                .description("Run fault scenarios under a crash guard")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();

    args::Driver::new(figue_config)
        .run()
        .into_result()
        .map(|v| v.value)
        .map_err(|e| e.to_string())
}

fn run_scenario(cli: &Cli) -> i32 {
    let mut builder = CrashGuard::builder();
    if let Some(dir) = &cli.dump_dir {
        builder = builder.dump_dir(PathBuf::from(dir));
    }
    let guard = builder.build();
    println!(
        "running {} under the {} strategy",
        scenario_name(cli.command),
        guard.strategy_kind()
    );

    let label = cli
        .label
        .clone()
        .or_else(|| std::env::var(LABEL_ENV).ok())
        .map(|label| label.trim().to_owned())
        .filter(|label| !label.is_empty());
    let label = label.as_deref();
    let result = match cli.command {
        ScenarioKind::Completes => scenarios::completes::run(&guard, label),
        ScenarioKind::Segfault => scenarios::faults::segfault(&guard, label),
        ScenarioKind::IllegalInstruction => scenarios::faults::illegal_instruction(&guard, label),
        ScenarioKind::Abort => scenarios::faults::abort(&guard, label),
        ScenarioKind::Unlogged => scenarios::faults::unlogged(&guard, label),
    };

    match result {
        GuardResult::Completed(status) => {
            println!("guarded call completed with status {status}");
            0
        }
        GuardResult::CrashIntercepted => {
            println!("guarded call crashed; the crash was intercepted");
            CRASH_EXIT_CODE
        }
    }
}

fn run_scenario_in_subprocess(cli: &Cli) -> AnyResult<ExitStatus> {
    let exe = std::env::current_exe().map_err(|e| format!("failed to resolve current exe: {e}"))?;
    let mut cmd = Command::new(exe);
    cmd.env(DEMO_CHILD_MODE_ENV, "1")
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    if let Some(label) = &cli.label {
        cmd.arg("--label").arg(label);
    }
    if let Some(dir) = &cli.dump_dir {
        cmd.arg("--dump-dir").arg(dir);
    }
    cmd.arg(scenario_name(cli.command));

    let mut child = cmd
        .spawn()
        .map_err(|e| format!("failed to run scenario subprocess: {e}"))?;
    child
        .wait()
        .map_err(|e| format!("failed waiting for scenario subprocess: {e}"))
}

fn scenario_name(command: ScenarioKind) -> &'static str {
    match command {
        ScenarioKind::Completes => "completes",
        ScenarioKind::Segfault => "segfault",
        ScenarioKind::IllegalInstruction => "illegal-instruction",
        ScenarioKind::Abort => "abort",
        ScenarioKind::Unlogged => "unlogged",
    }
}

fn format_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by {}", signal_name(signal));
        }
    }
    "signal".to_owned()
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    match signal {
        libc::SIGSEGV => "SIGSEGV".to_owned(),
        libc::SIGBUS => "SIGBUS".to_owned(),
        libc::SIGILL => "SIGILL".to_owned(),
        libc::SIGFPE => "SIGFPE".to_owned(),
        libc::SIGABRT => "SIGABRT".to_owned(),
        other => format!("signal {other}"),
    }
}
