//! Entry point for the dbwatch terminal viewer. Parses args and runs the App.

mod app;
mod types;
mod ws;

use app::App;
use std::env;

const DEFAULT_URL: &str = "ws://127.0.0.1:3000/ws";

#[derive(Debug, PartialEq, Eq)]
struct ParsedArgs {
    url: String,
    once: bool,
    changes_only: bool,
}

fn usage(prog: &str) -> String {
    format!("Usage: {prog} [--once|-1] [--changes|-c] [ws://HOST:PORT/ws]")
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "dbwatch".into());
    let mut url: Option<String> = None;
    let mut once = false; // --once
    let mut changes_only = false; // --changes

    for arg in it {
        match arg.as_str() {
            "-h" | "--help" => return Err(usage(&prog)),
            "--once" | "-1" => once = true,
            "--changes" | "-c" => changes_only = true,
            _ if url.is_none() && !arg.starts_with('-') => url = Some(arg),
            _ => return Err(format!("Unexpected argument '{arg}'. {}", usage(&prog))),
        }
    }

    let url = url.unwrap_or_else(|| DEFAULT_URL.to_string());
    match url::Url::parse(&url) {
        Ok(u) if matches!(u.scheme(), "ws" | "wss") => {}
        _ => return Err(format!("Invalid agent URL '{url}'. {}", usage(&prog))),
    }
    Ok(ParsedArgs {
        url,
        once,
        changes_only,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            return Ok(());
        }
    };

    let mut app = App::new(parsed.once, parsed.changes_only);
    tokio::select! {
        res = app.run(&parsed.url) => res,
        _ = tokio::signal::ctrl_c() => Ok(()),
    }
}
