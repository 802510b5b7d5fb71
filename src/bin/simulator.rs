use clap::{App, Arg};
use colored::*;
use cspsim::protocol::{Outbound, ProtocolHandler, RequestKind, Response, ResultCode};
use cspsim::{ChangeEvent, DeviceHost, SimulatorConfig};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8080";

type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("cspsim-simulator")
        .version("0.1.0")
        .author("CSP Simulators Team")
        .about("CSP controller, subarray and beam simulators over newline-delimited JSON")
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Address to listen on")
                .takes_value(true)
                .default_value(DEFAULT_HOST),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Port to listen on")
                .takes_value(true)
                .default_value(DEFAULT_PORT),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Deployment file (JSON); defaults to the built-in Mid/Low deployment")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug logging"),
        )
        .get_matches();

    let default_level = if matches.is_present("verbose") { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = match matches.value_of("config") {
        Some(path) => SimulatorConfig::from_file(Path::new(path))?,
        None => SimulatorConfig::default_deployment(),
    };
    let host = Arc::new(DeviceHost::from_config(&config));

    println!("{}", "📡 CSP Device Simulators".bright_blue().bold());
    println!("{}", "========================".bright_blue());
    for device in host.devices() {
        println!("   {} {:<28} {:?}", "✓".green(), device.name().bright_white(), device.kind());
    }

    let address = format!(
        "{}:{}",
        matches.value_of("host").unwrap_or(DEFAULT_HOST),
        matches.value_of("port").unwrap_or(DEFAULT_PORT)
    );
    let listener = TcpListener::bind(&address).await?;
    println!("{} Listening on {}", "🌐".green(), address.bright_cyan());
    info!(%address, devices = host.len(), "simulator server started");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("🔗 New client connected: {}", addr);
                    let client_host = Arc::clone(&host);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, client_host).await {
                            warn!("Client {} error: {}", addr, e);
                        }
                        info!("🔌 Client {} disconnected", addr);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    println!("{}", "🛑 CSP Device Simulators stopped".bright_yellow());
    Ok(())
}

async fn handle_client(
    stream: TcpStream,
    host: Arc<DeviceHost>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let writer: SharedWriter = Arc::new(Mutex::new(writer));
    let mut handler = ProtocolHandler::new();
    let mut event_tasks = Vec::new();

    let mut line = String::new();
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if line.trim().is_empty() {
                    continue;
                }

                let response = match handler.parse_request(&line) {
                    Ok(request) => {
                        let response = host.dispatch(&request);
                        // Stream the device's change events to this client
                        if matches!(request.request, RequestKind::Subscribe)
                            && response.result_code == ResultCode::Ok
                        {
                            if let Some(device) = request.device.as_deref().and_then(|name| host.get(name)) {
                                let events = device.subscribe();
                                event_tasks.push(tokio::spawn(stream_events(events, Arc::clone(&writer))));
                            }
                        }
                        response
                    }
                    Err(e) => {
                        warn!("Failed to parse request: {}", e);
                        Response::error(0, ResultCode::Rejected, e.to_string())
                    }
                };

                let json = handler.serialize_outbound(&Outbound::Response(response))?;
                write_line(&writer, &json).await?;
            }
            Err(e) => {
                error!("Error reading from client: {}", e);
                break;
            }
        }
    }

    for task in event_tasks {
        task.abort();
    }
    Ok(())
}

async fn stream_events(mut events: broadcast::Receiver<ChangeEvent>, writer: SharedWriter) {
    let handler = ProtocolHandler::new();
    loop {
        match events.recv().await {
            Ok(event) => {
                let line = match handler.serialize_outbound(&Outbound::Event { event }) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to serialize change event: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write_line(&writer, &line).await {
                    warn!("Failed to send change event: {}", e);
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "client lagging behind change events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn write_line(writer: &SharedWriter, line: &str) -> std::io::Result<()> {
    let mut guard = writer.lock().await;
    guard.write_all(line.as_bytes()).await?;
    guard.write_all(b"\n").await
}
