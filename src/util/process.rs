//! Running external administration tools and capturing their output

use std::process::Stdio;

use tokio::process::Command;

use crate::error::Error;

/// Captured output of a successfully exited command
pub struct CmdOutput {
	pub stdout: String,
	pub stderr: String,
}

/// Run an external tool to completion.
///
/// A non-zero exit code becomes `Error::CommandFailure` carrying the exit
/// code and both output streams; callers that know their tool's failure
/// modes (see the driver wrapper) inspect the stderr tail to classify it.
pub async fn run(program: &str, args: &[&str]) -> Result<CmdOutput, Error> {
	let output = Command::new(program)
		.args(args)
		.stdin(Stdio::null())
		.output()
		.await?;

	let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
	let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

	if !output.status.success() {
		let code = output.status.code().unwrap_or(-1);
		warn!(
			"{} {} exited with code {}: {}",
			program,
			args.join(" "),
			code,
			stderr.trim_end()
		);
		return Err(Error::CommandFailure {
			program: program.to_string(),
			code,
			stdout,
			stderr,
		});
	}

	trace!("{} {}", program, args.join(" "));
	Ok(CmdOutput { stdout, stderr })
}
