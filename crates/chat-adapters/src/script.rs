//! Sandbox de scripts por subproceso con deadline duro.
//!
//! El código del nodo se envuelve en un harness que expone `inputs`,
//! acumula `outputs` y captura `console.log`, y se ejecuta en un proceso
//! hijo del intérprete configurado (node por defecto) con el entorno
//! limpio. Exceder el timeout mata el proceso y devuelve un error Timeout
//! que el procesador registra en la traza. TypeScript se acepta bajo el
//! mismo intérprete (el autor es responsable de no usar sintaxis que el
//! runtime no soporte; las dependencias son URLs opacas que el harness
//! expone sin resolver).

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use log::debug;
use serde_json::{Map, Value};

use chat_core::effects::{ScriptExecutor, ScriptJob, ScriptOutcome};
use chat_core::errors::EngineError;

/// Ejecutor por subproceso. `interpreter` debe leer el programa de stdin
/// (`node` lo hace sin argumentos).
pub struct SubprocessScriptExecutor {
    interpreter: String,
}

impl Default for SubprocessScriptExecutor {
    fn default() -> Self {
        Self { interpreter: "node".to_string() }
    }
}

impl SubprocessScriptExecutor {
    pub fn new(interpreter: &str) -> Self {
        Self { interpreter: interpreter.to_string() }
    }

    fn harness(job: &ScriptJob) -> String {
        let inputs = Value::Object(job.inputs.clone()).to_string();
        let dependencies = serde_json::to_string(&job.dependencies).unwrap_or_else(|_| "[]".into());
        format!(
            "const __logs = [];\n\
             const console = {{\n\
                 log: (...a) => __logs.push(a.map(x => typeof x === 'string' ? x : JSON.stringify(x)).join(' ')),\n\
                 error: (...a) => __logs.push(a.map(x => typeof x === 'string' ? x : JSON.stringify(x)).join(' ')),\n\
             }};\n\
             const inputs = {inputs};\n\
             const dependencies = {dependencies};\n\
             const outputs = {{}};\n\
             {code}\n\
             process.stdout.write('\\n' + JSON.stringify({{outputs, console_logs: __logs}}));\n",
            inputs = inputs,
            dependencies = dependencies,
            code = job.code
        )
    }
}

impl ScriptExecutor for SubprocessScriptExecutor {
    fn run(&self, job: &ScriptJob) -> Result<ScriptOutcome, EngineError> {
        let program = Self::harness(job);
        let started = Instant::now();

        let mut child = Command::new(&self.interpreter)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::Internal(format!("spawn {}: {e}", self.interpreter)))?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(program.as_bytes())
                 .map_err(|e| EngineError::Internal(format!("writing script: {e}")))?;
        }
        drop(child.stdin.take());

        // Deadline duro: poll + kill
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) => {
                    if started.elapsed() > job.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(EngineError::Timeout(format!("script exceeded {:?} deadline", job.timeout)));
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(EngineError::Internal(format!("waiting for script: {e}"))),
            }
        }

        let output = child.wait_with_output()
                          .map_err(|e| EngineError::Internal(format!("collecting script output: {e}")))?;
        let execution_time_ms = started.elapsed().as_millis() as i64;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Validation(format!("script failed: {}", stderr.trim())));
        }

        // El harness emite el JSON de resultado en la última línea
        let stdout = String::from_utf8_lossy(&output.stdout);
        let last_line = stdout.lines().last().unwrap_or("");
        let parsed: Value = serde_json::from_str(last_line)
            .map_err(|e| EngineError::Validation(format!("script produced no result object: {e}")))?;

        let outputs: Map<String, Value> = parsed.get("outputs")
                                                .and_then(Value::as_object)
                                                .cloned()
                                                .unwrap_or_default();
        let console_logs: Vec<String> = parsed.get("console_logs")
                                              .and_then(Value::as_array)
                                              .map(|logs| {
                                                  logs.iter()
                                                      .filter_map(Value::as_str)
                                                      .map(str::to_string)
                                                      .collect()
                                              })
                                              .unwrap_or_default();
        debug!("script finished in {execution_time_ms}ms ({} outputs)", outputs.len());
        Ok(ScriptOutcome { outputs, console_logs, execution_time_ms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_domain::types::ScriptLanguage;
    use serde_json::json;

    fn node_available() -> bool {
        Command::new("node").arg("--version").output().is_ok()
    }

    fn job(code: &str, timeout_ms: u64, inputs: Map<String, Value>) -> ScriptJob {
        ScriptJob { code: code.to_string(),
                    language: ScriptLanguage::Javascript,
                    inputs,
                    dependencies: Vec::new(),
                    timeout: Duration::from_millis(timeout_ms) }
    }

    #[test]
    fn runs_code_with_inputs_and_collects_outputs() {
        if !node_available() {
            eprintln!("node not available - skipping script executor test");
            return;
        }
        let mut inputs = Map::new();
        inputs.insert("value".into(), json!(21));
        let executor = SubprocessScriptExecutor::default();
        let outcome = executor.run(&job("outputs.result = inputs.value * 2; console.log('done');", 5000, inputs))
                              .expect("script runs");
        assert_eq!(outcome.outputs.get("result"), Some(&json!(42)));
        assert_eq!(outcome.console_logs, vec!["done".to_string()]);
    }

    #[test]
    fn deadline_kills_runaway_scripts() {
        if !node_available() {
            eprintln!("node not available - skipping script executor test");
            return;
        }
        let executor = SubprocessScriptExecutor::default();
        let err = executor.run(&job("while (true) {}", 300, Map::new())).unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[test]
    fn syntax_errors_surface_as_validation() {
        if !node_available() {
            eprintln!("node not available - skipping script executor test");
            return;
        }
        let executor = SubprocessScriptExecutor::default();
        let err = executor.run(&job("this is not javascript", 5000, Map::new())).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
