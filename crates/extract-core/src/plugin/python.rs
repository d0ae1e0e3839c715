use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::config::EmailSettings;
use crate::matching::geometry;
use crate::notify::Mailer;
use crate::request::Request;

use super::{ParamKind, ParamSpec, TaskProcessor, TaskRequest, TaskResult};

pub const PARAMETERS_FILE: &str = "parameters.json";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs a local script with `<interpreter> <script> <parameters.json> [args...]`
/// from the output folder.
pub struct PythonPlugin {
    timeout: Duration,
}

impl Default for PythonPlugin {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl PythonPlugin {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl TaskProcessor for PythonPlugin {
    fn code(&self) -> &'static str {
        "PYTHON"
    }

    fn label(&self) -> &'static str {
        "Python script"
    }

    fn description(&self) -> &'static str {
        "Runs a Python script on the request data"
    }

    fn help(&self) -> &'static str {
        "The script receives the path of parameters.json as its first argument. The file is a \
         GeoJSON Feature: the perimeter is the geometry and the request fields are the \
         properties. The script runs in the output folder and must exit with 0 on success."
    }

    fn picto_class(&self) -> &'static str {
        "fa-cogs"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::new("interpreter", "Python interpreter", ParamKind::Text, true).max_length(255),
            ParamSpec::new("script", "Script", ParamKind::Text, true).max_length(500),
            ParamSpec::new("additional_args", "Additional arguments", ParamKind::Text, false)
                .max_length(500),
        ]
    }

    fn execute(
        &self,
        request: &TaskRequest,
        params: &BTreeMap<String, String>,
        _email: &EmailSettings,
        _mailer: &dyn Mailer,
    ) -> TaskResult {
        let path_param = |key: &str| {
            params
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        let Some(interpreter) = path_param("interpreter") else {
            return TaskResult::error("The Python interpreter is not defined", "-1");
        };
        let Some(script) = path_param("script") else {
            return TaskResult::error("The Python script is not defined", "-1");
        };
        if !interpreter.is_file() {
            return TaskResult::error(
                format!("The Python interpreter does not exist: {}", interpreter.display()),
                "-1",
            );
        }
        if !script.is_file() {
            return TaskResult::error(
                format!("The Python script does not exist: {}", script.display()),
                "-1",
            );
        }
        let Some(output) = &request.output_dir else {
            return TaskResult::error("The output folder is not defined", "-1");
        };
        if let Err(e) = crate::io::ensure_dir(output) {
            return TaskResult::error(
                format!("The output folder {} cannot be created: {e}", output.display()),
                "-1",
            );
        }

        let parameters_file = output.join(PARAMETERS_FILE);
        let feature = parameters_feature(request);
        let written = serde_json::to_vec_pretty(&feature)
            .map_err(crate::error::ExtractError::from)
            .and_then(|data| crate::io::atomic_write(&parameters_file, &data));
        if let Err(e) = written {
            return TaskResult::error(format!("The parameters file cannot be written: {e}"), "-1");
        }

        let mut command = Command::new(&interpreter);
        command
            .arg(&script)
            .arg(&parameters_file)
            .args(
                params
                    .get("additional_args")
                    .map(|a| a.split_whitespace().collect::<Vec<_>>())
                    .unwrap_or_default(),
            )
            .current_dir(output);

        tracing::info!(
            request = request.request.id,
            interpreter = %interpreter.display(),
            script = %script.display(),
            "running script"
        );
        match run_with_timeout(command, self.timeout) {
            Ok(run) if run.status.success() => {
                tracing::debug!(request = request.request.id, output = %run.output, "script finished");
                TaskResult::success("The script ran successfully")
            }
            Ok(run) => {
                let code = run.status.code().unwrap_or(-1);
                tracing::warn!(request = request.request.id, code, output = %run.output, "script failed");
                TaskResult::error(failure_message(code, &run.output, &interpreter), code.to_string())
            }
            Err(RunError::Timeout) => TaskResult::error(
                format!(
                    "The script did not finish within {} seconds and was stopped",
                    self.timeout.as_secs()
                ),
                "-1",
            ),
            Err(RunError::Io(e)) => TaskResult::error(
                format!("The script could not be started with {}: {e}", interpreter.display()),
                "-1",
            ),
        }
    }
}

/// The request as a GeoJSON Feature: the perimeter is the geometry, the
/// request fields are the properties.
pub fn parameters_feature(task: &TaskRequest) -> Value {
    let request = &task.request;
    let folder = |dir: &Option<PathBuf>| dir.as_deref().map(|d| d.display().to_string());
    json!({
        "type": "Feature",
        "geometry": perimeter_geometry(request),
        "properties": {
            "RequestId": request.id,
            "FolderOut": folder(&task.output_dir),
            "FolderIn": folder(&task.input_dir),
            "OrderGuid": request.order_guid,
            "OrderLabel": request.order_label,
            "ClientGuid": request.client_guid,
            "ClientName": request.client,
            "OrganismGuid": request.organism_guid,
            "OrganismName": request.organism,
            "ProductGuid": request.product_guid,
            "ProductLabel": request.product_label,
            "Parameters": request.parameters,
        },
    })
}

/// WKT is converted; a perimeter that is already a GeoJSON geometry is kept.
fn perimeter_geometry(request: &Request) -> Value {
    let Some(perimeter) = request.perimeter.as_deref().filter(|p| !p.trim().is_empty()) else {
        return Value::Null;
    };
    if let Ok(geom) = geometry::parse_wkt(perimeter) {
        return geometry::to_geojson(&geom);
    }
    match serde_json::from_str::<Value>(perimeter) {
        Ok(value) if value.get("type").is_some() => value,
        _ => {
            tracing::warn!(request = request.id, "perimeter is neither WKT nor GeoJSON");
            Value::Null
        }
    }
}

fn failure_message(code: i32, output: &str, interpreter: &Path) -> String {
    let output = output.trim();
    let details = if output.is_empty() {
        String::new()
    } else {
        format!(":\n{output}")
    };
    match code {
        2 => format!("The script was called incorrectly, check its parameters{details}"),
        126 => "The script is not executable".to_string(),
        127 => format!("Command not found: {}", interpreter.display()),
        _ if output.contains("SyntaxError") => format!("Syntax error in the script{details}"),
        _ if output.contains("ModuleNotFoundError") || output.contains("ImportError") => {
            format!("A Python module is missing{details}")
        }
        _ => format!("The script failed with exit code {code}{details}"),
    }
}

// ---------------------------------------------------------------------------
// Child process with a timeout
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum RunError {
    Timeout,
    Io(std::io::Error),
}

struct ScriptRun {
    status: ExitStatus,
    /// stdout followed by stderr.
    output: String,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(child: &mut Child, stdout: JoinHandle<String>, stderr: JoinHandle<String>) -> String {
    let _ = child.wait();
    let mut output = stdout.join().unwrap_or_default();
    let err = stderr.join().unwrap_or_default();
    if !err.trim().is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&err);
    }
    output
}

/// Poll the child until it exits; kill it once `timeout` has elapsed.
fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<ScriptRun, RunError> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(RunError::Io)?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let start = Instant::now();

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let output = collect(&mut child, stdout, stderr);
                return Ok(ScriptRun { status, output });
            }
            Ok(None) if start.elapsed() > timeout => {
                let _ = child.kill();
                collect(&mut child, stdout, stderr);
                return Err(RunError::Timeout);
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                collect(&mut child, stdout, stderr);
                return Err(RunError::Io(e));
            }
        }
    }
}
