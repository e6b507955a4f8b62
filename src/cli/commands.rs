use std::sync::Arc;
use std::time::Duration;

use crate::cli::{Args, Command};
use crate::config::ConfigFile;
use crate::detect::{assess, StallDetector, TtyDetector, Verdict};
use crate::error::{Error, Result};
use crate::registry::{FileStore, SessionRegistry};
use crate::shell::{ExecOutcome, RunOptions, RunOutcome, ShellRunner, TmuxTool};
use crate::tmux::{PathResolver, ProcessRunner, TmuxManager, SHARED_SESSION};

/// Everything a command needs, built once from the config file.
struct Context {
    config: ConfigFile,
    manager: TmuxManager,
    /// Same server, but each call is bounded by the detection timeout.
    detect_manager: TmuxManager,
    registry: Arc<SessionRegistry>,
}

impl Context {
    async fn load() -> Result<Self> {
        let config = ConfigFile::load().await?.unwrap_or_default();

        let resolver = PathResolver::new();
        // Start the lookup now; the first tmux call awaits the same cell.
        let _ = resolver.spawn_resolve();

        let runner = ProcessRunner::new(resolver)
            .with_socket(config.tmux_socket().map(str::to_string));
        let detect_runner = runner.clone().with_timeout(config.detect_timeout());
        let manager = TmuxManager::new(Arc::new(runner));
        let detect_manager = TmuxManager::new(Arc::new(detect_runner));

        let store = FileStore::new(config.state_dir()?);
        let registry = Arc::new(SessionRegistry::new(Arc::new(store)));

        Ok(Self {
            config,
            manager,
            detect_manager,
            registry,
        })
    }

    fn stall_detector(&self) -> StallDetector {
        StallDetector::new(self.detect_manager.clone())
            .with_samples(self.config.stall_samples())
            .with_interval(self.config.stall_interval())
    }

    fn tty_detector(&self) -> TtyDetector {
        TtyDetector::new(self.detect_manager.clone()).with_timeout(self.config.detect_timeout())
    }
}

pub async fn run_cli(args: Args) -> Result<()> {
    let conversation = args.conversation.as_str();

    if let Command::Version = args.command {
        println!("cea-tmux v{}", crate::VERSION);
        return Ok(());
    }

    let ctx = Context::load().await?;
    match args.command {
        Command::Exec { raw } => handle_exec(&ctx, conversation, &raw).await,

        Command::Capture { target, history } => {
            handle_capture(&ctx, &target, history).await
        }

        Command::Run {
            command,
            timeout_secs,
            target,
        } => handle_run(&ctx, conversation, &command, timeout_secs, target).await,

        Command::Detect { target, json } => handle_detect(&ctx, &target, json).await,

        Command::Stall {
            target,
            samples,
            interval_ms,
            json,
        } => handle_stall(&ctx, &target, samples, interval_ms, json).await,

        Command::Sessions { json, reconcile } => {
            handle_sessions(&ctx, conversation, json, reconcile).await
        }

        Command::Cleanup => handle_cleanup(&ctx, conversation).await,

        Command::Version => Ok(()),
    }
}

async fn handle_exec(ctx: &Context, conversation: &str, raw: &[String]) -> Result<()> {
    // Re-quote so the tool tokenises each argv element back into one token.
    let line = raw
        .iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ");

    let tool = TmuxTool::new(ctx.manager.clone(), ctx.registry.clone());
    match tool.execute(conversation, &line).await? {
        ExecOutcome::Blocked { message, .. } => Err(Error::InvalidInput(message)),
        ExecOutcome::Completed { success, output } => {
            if !output.trim().is_empty() {
                println!("{}", output.trim_end());
            }
            if success {
                Ok(())
            } else {
                Err(Error::CommandFailed("tmux exited with an error".to_string()))
            }
        }
    }
}

async fn handle_capture(ctx: &Context, target: &str, history: Option<usize>) -> Result<()> {
    let tool = TmuxTool::new(ctx.manager.clone(), ctx.registry.clone());
    let content = tool.capture(target, history).await?;
    print!("{}", content);
    Ok(())
}

async fn handle_run(
    ctx: &Context,
    conversation: &str,
    command: &str,
    timeout_secs: u64,
    target: Option<String>,
) -> Result<()> {
    let runner = ShellRunner::new(ctx.manager.clone(), ctx.registry.clone())
        .with_stall_detector(ctx.stall_detector())
        .with_tty_detector(ctx.tty_detector());
    let opts = RunOptions {
        target: target.unwrap_or_else(|| SHARED_SESSION.to_string()),
        timeout: Duration::from_secs(timeout_secs),
    };

    match runner.run(conversation, command, &opts).await? {
        RunOutcome::Completed { exit_code, output } => {
            if !output.is_empty() {
                println!("{}", output);
            }
            if exit_code == 0 {
                Ok(())
            } else {
                Err(Error::CommandFailed(format!("exit code {}", exit_code)))
            }
        }
        RunOutcome::TimedOut { report, .. } => {
            println!("{}", report);
            Ok(())
        }
    }
}

async fn handle_detect(ctx: &Context, target: &str, json: bool) -> Result<()> {
    let result = ctx.tty_detector().detect(target).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let Some(result) = result else {
        println!("Input detection unavailable for {}", target);
        return Ok(());
    };

    println!(
        "{}: {} ({} confidence)",
        target,
        if result.detected {
            "waiting for input"
        } else {
            "not waiting for input"
        },
        result.confidence
    );
    println!("  Process: {} (pid {})", result.command, result.pid);
    println!("  Detail:  {}", result.detail);
    for signal in &result.signals {
        let mark = if signal.indicates_wait { "+" } else { "-" };
        println!("  {} {:<8} {}", mark, signal.name, signal.value);
    }
    Ok(())
}

async fn handle_stall(
    ctx: &Context,
    target: &str,
    samples: Option<usize>,
    interval_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let mut detector = ctx.stall_detector();
    if let Some(n) = samples {
        detector = detector.with_samples(n.max(1));
    }
    if let Some(ms) = interval_ms {
        detector = detector.with_interval(Duration::from_millis(ms));
    }

    let result = detector.sample(target).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let status = match assess(&result, None) {
        Verdict::Stalled => "stalled",
        Verdict::Working => "changing",
        Verdict::Unknown => "unknown",
        Verdict::WaitingForInput(_) => "waiting for input",
    };
    println!("{}: {} ({} confidence)", target, status, result.confidence);
    println!("  {}", result.detail);
    Ok(())
}

async fn handle_sessions(
    ctx: &Context,
    conversation: &str,
    json: bool,
    reconcile: bool,
) -> Result<()> {
    if reconcile {
        let live = ctx.manager.list_sessions().await?;
        let dropped = ctx.registry.reconcile(conversation, &live).await;
        if !dropped.is_empty() && !json {
            println!("Dropped {} dead session(s): {}", dropped.len(), dropped.join(", "));
        }
    }

    let tracked = ctx.registry.tracked(conversation).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&tracked)?);
        return Ok(());
    }

    if tracked.is_empty() {
        println!("No sessions tracked for conversation '{}'.", conversation);
        return Ok(());
    }

    println!("Conversation: {}\n", conversation);
    for name in &tracked {
        println!("  {}", name);
    }
    println!("\nTotal: {} sessions", tracked.len());
    Ok(())
}

async fn handle_cleanup(ctx: &Context, conversation: &str) -> Result<()> {
    let report = ctx.registry.cleanup_all(conversation, &ctx.manager).await;

    for name in &report.killed {
        println!("✓ Killed {}", name);
    }
    for (name, reason) in &report.failed {
        eprintln!("Warning: could not kill {}: {}", name, reason);
    }
    if report.killed.is_empty() && report.failed.is_empty() {
        println!("No sessions tracked for conversation '{}'.", conversation);
    }
    Ok(())
}

/// Escape an argument so the tokenizer yields it back as a single token.
fn shell_quote(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    let mut out = String::with_capacity(arg.len());
    for c in arg.chars() {
        if c == '\\' || c == '\'' || c == '"' || c.is_whitespace() {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::tokenize;

    #[test]
    fn test_shell_quote_round_trips_through_tokenizer() {
        let argv = ["send-keys", "-t", "cea-x", r#"echo "it's" C:\tmp"#, "Enter", ";", ""];
        let line = argv.iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" ");
        assert_eq!(tokenize(&line), argv);
    }
}
