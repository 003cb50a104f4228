use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use tabwire::{ClientConfig, ClientError, CloseReason, Command, Connection, Payload, ReassembledMessage};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("invalid JSON for {what}: {source}")]
    InvalidJson {
        what: String,
        source: serde_json::Error,
    },
    #[error("--field expects key=<json>, got `{0}`")]
    InvalidField(String),
    #[error("--args must be a JSON array")]
    ArgsNotArray,
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("connection closed before the command was answered: {0}")]
    Closed(CloseReason),
}

#[derive(Parser, Debug)]
#[command(name = "tabwire-cli", about = "Drive a remote table engine over its websocket protocol")]
struct Cli {
    #[arg(long, env = "TABWIRE_URL", default_value = "ws://127.0.0.1:8080/websocket")]
    url: String,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Connect, send the handshake and disconnect.
    Ping,
    /// Send one command and print its response.
    Request(RequestArgs),
    /// Subscribe to a command id and print every message pushed for it.
    Listen(ListenArgs),
}

#[derive(Args, Debug)]
struct CommandArgs {
    #[arg(long, allow_negative_numbers = true)]
    id: i64,

    #[arg(long)]
    cmd: String,

    /// Extra top-level field, as key=<json>. Repeatable.
    #[arg(long = "field", value_name = "KEY=JSON")]
    fields: Vec<String>,

    /// Positional arguments as a JSON array.
    #[arg(long)]
    args: Option<String>,

    /// File sent as the transferable first argument.
    #[arg(long)]
    binary: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RequestArgs {
    #[command(flatten)]
    command: CommandArgs,

    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Args, Debug)]
struct ListenArgs {
    #[command(flatten)]
    command: CommandArgs,

    #[arg(long, help = "Stop after this many messages")]
    max_messages: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let conn = Connection::connect_with(&cli.url, ClientConfig::from_env()).await?;

    let result = match cli.command {
        CliCommand::Ping => {
            println!("ok");
            Ok(())
        }
        CliCommand::Request(args) => run_request(&conn, args).await,
        CliCommand::Listen(args) => run_listen(&conn, args).await,
    };

    let reason = conn.terminate().await;
    tracing::debug!(%reason, "cli: disconnected");
    result
}

async fn run_request(conn: &Connection, args: RequestArgs) -> Result<(), CliError> {
    let command = build_command(args.command).await?;
    let payload = match args.timeout_secs {
        Some(secs) => conn.request_timeout(command, Duration::from_secs(secs)).await,
        None => conn.request(command).await,
    };

    match payload {
        Ok(payload) => print_json(&render(payload)),
        Err(ClientError::ConnectionClosed) => Err(CliError::Closed(conn.closed().await)),
        Err(e) => Err(e.into()),
    }
}

async fn run_listen(conn: &Connection, args: ListenArgs) -> Result<(), CliError> {
    let command = build_command(args.command).await?;
    let mut subscription = conn.subscribe(command.id)?;
    conn.send(command).await?;

    let mut received = 0_usize;
    loop {
        let message = tokio::select! {
            message = subscription.next() => message,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(message) = message else {
            break;
        };

        print_json(&render_message(message))?;
        received = received.saturating_add(1);
        if args.max_messages.is_some_and(|limit| received >= limit) {
            break;
        }
    }

    eprintln!("listen complete: received={received}");
    Ok(())
}

async fn build_command(args: CommandArgs) -> Result<Command, CliError> {
    let mut command = Command::new(args.id, args.cmd);

    if let Some(path) = args.binary {
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| CliError::ReadFile { path, source })?;
        command = command.with_binary(bytes);
    }

    if let Some(raw) = args.args {
        let Value::Array(values) = parse_json("--args", &raw)? else {
            return Err(CliError::ArgsNotArray);
        };
        for value in values {
            command = command.with_arg(value);
        }
    }

    for field in args.fields {
        let (key, raw) = field
            .split_once('=')
            .ok_or_else(|| CliError::InvalidField(field.clone()))?;
        command = command.with_field(key, parse_json(key, raw)?);
    }

    Ok(command)
}

fn parse_json(what: &str, raw: &str) -> Result<Value, CliError> {
    serde_json::from_str(raw).map_err(|source| CliError::InvalidJson {
        what: what.to_owned(),
        source,
    })
}

fn render(payload: Payload) -> Value {
    match payload {
        Payload::Json(value) => value,
        Payload::Binary(bytes) => json!({ "binary_bytes": bytes.len() }),
        Payload::Delta { port_id, delta } => json!({ "port_id": port_id, "delta_bytes": delta.len() }),
        Payload::Error(message) => json!({ "error": message }),
    }
}

fn render_message(message: ReassembledMessage) -> Value {
    json!({ "id": message.command_id, "payload": render(message.payload) })
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value).map_err(|source| CliError::InvalidJson {
        what: "output".to_owned(),
        source,
    })?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabwire::Arg;

    fn args(fields: &[&str], raw_args: Option<&str>) -> CommandArgs {
        CommandArgs {
            id: 3,
            cmd: "view_method".into(),
            fields: fields.iter().map(|f| (*f).to_owned()).collect(),
            args: raw_args.map(str::to_owned),
            binary: None,
        }
    }

    #[tokio::test]
    async fn builds_command_from_fields_and_args() {
        let command = build_command(args(&["name=\"prices\"", "subscribe=true"], Some("[1, \"a\"]")))
            .await
            .expect("command");

        assert_eq!(command.id, 3);
        assert_eq!(command.args, vec![Arg::Json(json!(1)), Arg::Json(json!("a"))]);
        assert_eq!(command.fields.get("name"), Some(&json!("prices")));
        assert_eq!(command.fields.get("subscribe"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn rejects_field_without_equals() {
        let err = build_command(args(&["name"], None)).await.expect_err("invalid");
        assert!(matches!(err, CliError::InvalidField(f) if f == "name"));
    }

    #[tokio::test]
    async fn rejects_non_array_args() {
        let err = build_command(args(&[], Some("{}"))).await.expect_err("invalid");
        assert!(matches!(err, CliError::ArgsNotArray));
    }

    #[tokio::test]
    async fn binary_file_becomes_first_argument() {
        let path = std::env::temp_dir().join(format!("tabwire-cli-test-{}.bin", std::process::id()));
        std::fs::write(&path, b"ARROW").expect("write temp file");

        let mut raw = args(&[], Some("[{\"mode\": \"stream\"}]"));
        raw.binary = Some(path.clone());
        let command = build_command(raw).await.expect("command");
        let _ = std::fs::remove_file(&path);

        assert!(command.is_transferable());
        assert_eq!(command.args.len(), 2);
        assert_eq!(command.args[1], Arg::Json(json!({"mode": "stream"})));
    }

    #[test]
    fn binary_payloads_render_as_sizes() {
        assert_eq!(render(Payload::Binary(vec![0; 4].into())), json!({"binary_bytes": 4}));
        assert_eq!(
            render(Payload::Delta { port_id: 2, delta: vec![0; 3].into() }),
            json!({"port_id": 2, "delta_bytes": 3})
        );
    }
}
