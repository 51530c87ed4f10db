//! Offline audit-log verifier: recomputes the hash chain over a JSONL log
//! file and reports the first tampered or missing line, if any (§4.7
//! "Verification").

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use waf_gateway::integrity::verify_chain;

#[derive(Parser, Debug)]
#[command(version, about = "Verify the hash chain of a WAF audit log")]
struct Args {
	/// Path to the JSONL audit log to verify.
	log_path: PathBuf,
}

fn main() -> ExitCode {
	let args = Args::parse();
	match verify_chain(&args.log_path) {
		Ok(count) => {
			println!("OK: {count} entries verified, chain intact");
			ExitCode::SUCCESS
		},
		Err((line, detail)) if line == 0 => {
			eprintln!("FAILED: could not read log: {detail}");
			ExitCode::FAILURE
		},
		Err((line, detail)) => {
			eprintln!("FAILED: chain broken at line {line}: {detail}");
			ExitCode::FAILURE
		},
	}
}
