use std::env;
use std::io;
use std::process::ExitCode;

use feedport_cli::{run, CommandKind, CommonOptions};

fn main() -> ExitCode {
    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(1)
        }
    }
}

fn run_cli() -> Result<(), String> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        return Err(usage_text());
    }
    if args[0] == "-h" || args[0] == "--help" {
        print_usage();
        return Ok(());
    }

    let mut options = CommonOptions::default();
    let mut index = 0usize;
    while index < args.len() {
        match args[index].as_str() {
            "--port" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --port".to_string())?;
                options.port = value
                    .parse::<u16>()
                    .map_err(|_| format!("invalid --port value '{value}' (expected u16)"))?;
                index += 2;
            }
            "--timeout-ms" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --timeout-ms".to_string())?;
                options.timeout_ms = value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid --timeout-ms value '{value}' (expected u64)"))?;
                index += 2;
            }
            "--retry-ms" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --retry-ms".to_string())?;
                options.retry_ms = value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid --retry-ms value '{value}' (expected u64)"))?;
                index += 2;
            }
            "--include-telemetry" => {
                options.include_telemetry = true;
                index += 1;
            }
            _ => break,
        }
    }

    let command = args
        .get(index)
        .ok_or_else(|| "missing subcommand".to_string())?
        .as_str();
    let command_args = &args[(index + 1)..];

    let kind = match command {
        "wait-ready" => {
            if !command_args.is_empty() {
                return Err("wait-ready takes no arguments".to_string());
            }
            CommandKind::WaitReady
        }
        "send" => {
            if command_args.is_empty() {
                return Err("send requires a JSON event line".to_string());
            }
            CommandKind::Send {
                line: command_args.join(" "),
            }
        }
        "script" => {
            if command_args.len() != 1 {
                return Err("script requires exactly one file path".to_string());
            }
            CommandKind::Script {
                path: command_args[0].clone(),
            }
        }
        "watch" => {
            if !command_args.is_empty() {
                return Err("watch takes no arguments".to_string());
            }
            CommandKind::Watch
        }
        other => return Err(format!("unknown subcommand '{other}'")),
    };

    run(kind, options, &mut io::stdout())
}

fn print_usage() {
    println!("{}", usage_text());
}

fn usage_text() -> String {
    [
        "feedport_cli - line-oriented agent stage feed client",
        "",
        "Usage:",
        "  feedport_cli [--port <u16>] [--timeout-ms <u64>] [--retry-ms <u64>] [--include-telemetry] wait-ready",
        "  feedport_cli [--port <u16>] [--timeout-ms <u64>] [--retry-ms <u64>] [--include-telemetry] send <json-line...>",
        "  feedport_cli [--port <u16>] [--timeout-ms <u64>] [--retry-ms <u64>] [--include-telemetry] script <file>",
        "  feedport_cli [--port <u16>] [--timeout-ms <u64>] [--retry-ms <u64>] [--include-telemetry] watch",
        "",
        "Defaults:",
        "  --port 47401",
        "  --timeout-ms 5000",
        "  --retry-ms 100",
    ]
    .join("\n")
}
