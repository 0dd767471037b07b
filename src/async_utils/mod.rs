//! Asynchronous utilities for use with Tokio.
//!
//! The pipeline leans on async streams everywhere, and the recognition
//! engines shell out to external tools. The shared plumbing for both
//! lives here.

use std::pin::Pin;

use futures::Stream;

use crate::prelude::*;

pub mod io;

/// A type alias for a boxed future. This is used to make it easier to work
/// with complex futures.
pub type BoxedFuture<Output> = Pin<Box<dyn Future<Output = Output> + Send>>;

/// A type alias for a boxed stream. This is used to make it easier to work
/// with streams that return complex types.
pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// Wrapper around [`tokio::task::spawn_blocking`] that propagates panics
/// from the background task.
///
/// Image decoding and filtering are CPU-bound, so they run on the blocking
/// thread pool. A panic over there should take down the caller the same
/// way it would have inline.
pub async fn spawn_blocking_propagating_panics<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        // Propagate any panics from the blocking task.
        .unwrap()
}

/// Report any command failures, and include any error output.
///
/// Poppler and Tesseract both exit 0 while printing complaints to standard
/// error, so a zero exit status is not enough. Callers may pass a predicate
/// that decides, line by line, whether standard error indicates a real
/// failure.
pub fn check_for_command_failure(
    command_name: &str,
    output: &std::process::Output,
    error_line: Option<&dyn Fn(&str) -> bool>,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.is_empty() {
        debug!(command_name, output = %stdout, "standard output from command");
    }
    if !stderr.is_empty() {
        debug!(command_name, output = %stderr, "standard error from command");
    }

    if output.status.success() {
        if let Some(error_line) = error_line
            && stderr.lines().any(|line| error_line(line))
        {
            return Err(anyhow!(
                "{} printed error output:\n{}",
                command_name,
                stderr,
            ));
        }
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        ))
    } else {
        Err(anyhow!(
            "{} failed with error output:\n{}",
            command_name,
            stderr,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::{os::unix::process::ExitStatusExt as _, process::ExitStatus};

    use super::*;

    fn output(code: i32, stderr: &str) -> std::process::Output {
        std::process::Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn zero_exit_with_quiet_stderr_is_ok() {
        let result = check_for_command_failure("mytool", &output(0, ""), None);
        assert!(result.is_ok());
    }

    #[test]
    fn error_lines_fail_even_on_zero_exit() {
        let looks_bad = |line: &str| line.contains("Error");
        let out = output(0, "Syntax Warning: minor\nError: bad page\n");
        let result = check_for_command_failure("mytool", &out, Some(&looks_bad));
        assert!(result.is_err());

        let out = output(0, "Syntax Warning: minor\n");
        let result = check_for_command_failure("mytool", &out, Some(&looks_bad));
        assert!(result.is_ok());
    }

    #[test]
    fn nonzero_exit_reports_the_code() {
        let err = check_for_command_failure("mytool", &output(3, "boom"), None)
            .unwrap_err();
        let message = format!("{err}");
        assert!(message.contains("exit code 3"));
        assert!(message.contains("boom"));
    }
}
