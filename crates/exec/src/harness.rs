//! Execution harness: runs built-in tools and external units.
//!
//! Function units run in a fresh PowerShell process through a generated
//! script; standalone script units are launched directly with their
//! arguments as argv. Both run under a wall-clock timeout. Output from both
//! streams is collected into one buffer as it arrives, so a timeout can
//! still report what the unit printed before it was killed.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use stepwise_core::catalog::{CatalogProvider, UnitInfo, UnitKind};
use stepwise_core::decision::ArgMap;
use stepwise_core::error::{CatalogError, ExecError};
use stepwise_core::tool::{RunResult, ToolRegistry};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cleanup::{CleanupRegistry, TempScript};
use crate::invocation::Invocation;
use crate::script::build_invocation_script;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Exit code reported when a built-in tool exceeds the timeout.
pub const TOOL_TIMEOUT_EXIT: i32 = 124;

const INTERPRETERS: [&str; 2] = ["pwsh", "powershell"];
const SHELLS: [&str; 2] = ["sh", "bash"];
const PS_FILE_ARGS: [&str; 3] = ["-NoProfile", "-NonInteractive", "-File"];

/// How long to keep reading pipes after the process itself has exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs catalog units.
pub struct UnitRunner {
    catalog: Arc<dyn CatalogProvider>,
    cleanup: Arc<CleanupRegistry>,
    interpreter: Option<PathBuf>,
    timeout: Duration,
    echo: bool,
}

impl UnitRunner {
    pub fn new(catalog: Arc<dyn CatalogProvider>, cleanup: Arc<CleanupRegistry>) -> Self {
        Self {
            catalog,
            cleanup,
            interpreter: None,
            timeout: DEFAULT_TIMEOUT,
            echo: false,
        }
    }

    /// Uses `interpreter` instead of searching for `pwsh` then `powershell`.
    pub fn with_interpreter(mut self, interpreter: Option<PathBuf>) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Echo unit output to stdout while it runs.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogProvider> {
        &self.catalog
    }

    /// Runs unit `name` and returns its combined output.
    pub async fn run_unit(
        &self,
        base_dir: &Path,
        name: &str,
        named: &ArgMap,
        positional: &[String],
    ) -> Result<String, ExecError> {
        let info = self.catalog.get_info(base_dir, name).map_err(|e| match e {
            CatalogError::NotFound(n) => ExecError::UnknownUnit(n),
            CatalogError::Io { path, reason } => ExecError::Io { path, reason },
        })?;
        let invocation = Invocation::for_unit(&info, named, positional)?;
        match info.kind {
            UnitKind::Function => self.run_function(base_dir, &info, &invocation).await,
            UnitKind::Script => self.run_script(base_dir, &info, &invocation).await,
        }
    }

    async fn run_function(
        &self,
        base_dir: &Path,
        info: &UnitInfo,
        invocation: &Invocation,
    ) -> Result<String, ExecError> {
        let script = build_invocation_script(&info.sources, &info.name, invocation);
        let temp = TempScript::create(&self.cleanup, &script)?;

        info!(unit = %info.name, args = invocation.named.len(), "Running unit");
        let launches = self
            .interpreters()
            .into_iter()
            .map(|ps| launch(ps, PS_FILE_ARGS.iter().map(OsString::from).chain([temp.path().into()])))
            .collect();
        self.first_available(base_dir, &info.name, launches).await
    }

    /// Standalone scripts get `argv` directly; no command string is built.
    async fn run_script(
        &self,
        base_dir: &Path,
        info: &UnitInfo,
        invocation: &Invocation,
    ) -> Result<String, ExecError> {
        // The child runs in `base_dir`; keep the catalog path valid there.
        let path = std::path::absolute(&info.path).unwrap_or_else(|_| info.path.clone());
        let argv = invocation.argv();
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let with_args = |leading: Vec<OsString>| -> Vec<OsString> {
            leading.into_iter().chain(argv.iter().map(OsString::from)).collect()
        };
        let launches: Vec<Launch> = match ext.as_str() {
            "ps1" => self
                .interpreters()
                .into_iter()
                .map(|ps| {
                    let mut leading: Vec<OsString> = PS_FILE_ARGS.iter().map(OsString::from).collect();
                    leading.push(path.clone().into());
                    launch(ps, with_args(leading))
                })
                .collect(),
            "sh" => SHELLS
                .iter()
                .map(|sh| launch(PathBuf::from(sh), with_args(vec![path.clone().into()])))
                .collect(),
            "cmd" | "bat" => vec![launch(
                PathBuf::from("cmd"),
                with_args(vec!["/C".into(), path.clone().into()]),
            )],
            _ => vec![launch(path.clone(), with_args(Vec::new()))],
        };

        info!(unit = %info.name, args = argv.len(), "Running script unit");
        self.first_available(base_dir, &info.name, launches).await
    }

    fn interpreters(&self) -> Vec<PathBuf> {
        match &self.interpreter {
            Some(path) => vec![path.clone()],
            None => INTERPRETERS.iter().map(PathBuf::from).collect(),
        }
    }

    /// Tries each launch in order until one finds its program.
    async fn first_available(
        &self,
        base_dir: &Path,
        target: &str,
        launches: Vec<Launch>,
    ) -> Result<String, ExecError> {
        let programs: Vec<String> = launches.iter().map(|l| l.program.display().to_string()).collect();
        for Launch { program, args } in launches {
            let mut cmd = Command::new(&program);
            cmd.args(args).current_dir(base_dir);
            match run_process(cmd, self.timeout, target, self.echo).await {
                Err(ExecError::InterpreterNotFound(_)) => {
                    debug!(program = %program.display(), "Program not found, trying next");
                }
                result => return result,
            }
        }
        Err(ExecError::InterpreterNotFound(programs.join(", ")))
    }
}

struct Launch {
    program: PathBuf,
    args: Vec<OsString>,
}

fn launch(program: PathBuf, args: impl IntoIterator<Item = OsString>) -> Launch {
    Launch {
        program,
        args: args.into_iter().collect(),
    }
}

/// Spawns `cmd` and waits up to `timeout` for it to exit.
///
/// The child is killed on timeout, and `ExecError::Timeout` carries the
/// output captured until then.
pub async fn run_process(
    mut cmd: Command,
    timeout: Duration,
    target: &str,
    echo: bool,
) -> Result<String, ExecError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExecError::InterpreterNotFound(
                cmd.as_std().get_program().to_string_lossy().into_owned(),
            ));
        }
        Err(e) => {
            return Err(ExecError::Io {
                path: PathBuf::from(cmd.as_std().get_program()),
                reason: e.to_string(),
            });
        }
    };

    let buffer = Arc::new(Mutex::new(String::new()));
    let readers = [
        pump(child.stdout.take(), Arc::clone(&buffer), echo),
        pump(child.stderr.take(), Arc::clone(&buffer), echo),
    ];

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            abort_all(&readers);
            return Err(ExecError::Io {
                path: PathBuf::from(target),
                reason: e.to_string(),
            });
        }
        Err(_) => {
            warn!(target_name = %target, timeout_secs = timeout.as_secs(), "Execution timed out, killing process");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill timed-out process");
            }
            // Grandchildren can hold the pipes open; take what arrived so far.
            tokio::time::sleep(Duration::from_millis(50)).await;
            abort_all(&readers);
            return Err(ExecError::Timeout {
                target: target.to_string(),
                after: timeout,
                output: snapshot(&buffer),
            });
        }
    };

    for mut reader in readers {
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await.is_err() {
            reader.abort();
        }
    }
    let output = snapshot(&buffer);
    debug!(target_name = %target, status = ?status.code(), bytes = output.len(), "Process exited");

    if status.success() {
        Ok(output)
    } else {
        Err(ExecError::NonZeroExit {
            target: target.to_string(),
            code: status.code().unwrap_or(-1),
            output,
        })
    }
}

fn pump<R>(reader: Option<R>, buffer: Arc<Mutex<String>>, echo: bool) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(reader) = reader else { return };
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    if echo {
                        print!("{text}");
                    }
                    buffer
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push_str(&text);
                }
            }
        }
    })
}

fn abort_all(readers: &[JoinHandle<()>]) {
    for reader in readers {
        reader.abort();
    }
}

fn snapshot(buffer: &Mutex<String>) -> String {
    buffer
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .trim_end()
        .to_string()
}

/// Runs tools and units for the agent loop.
pub struct Harness {
    units: UnitRunner,
    tools: Arc<ToolRegistry>,
    tool_timeout: Duration,
}

impl Harness {
    pub fn new(units: UnitRunner, tools: Arc<ToolRegistry>) -> Self {
        Self {
            units,
            tools,
            tool_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogProvider> {
        self.units.catalog()
    }

    /// Runs a built-in tool. A timeout becomes exit code 124.
    pub async fn run_tool(&self, base_dir: &Path, name: &str, args: &ArgMap) -> RunResult {
        debug!(tool = %name, "Running tool");
        match tokio::time::timeout(self.tool_timeout, self.tools.run_by_name(base_dir, name, args)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = %name, "Tool timed out");
                RunResult::failed(
                    TOOL_TIMEOUT_EXIT,
                    format!("tool {name} timed out after {}s", self.tool_timeout.as_secs()),
                )
            }
        }
    }

    pub async fn run_unit(
        &self,
        base_dir: &Path,
        name: &str,
        named: &ArgMap,
        positional: &[String],
    ) -> Result<String, ExecError> {
        self.units.run_unit(base_dir, name, named, positional).await
    }
}
