//! lantern CLI
//!
//! Run a mesh data-announcement node, or talk to a running one.
//!
//! Usage:
//!   lantern --serve --interface eth0              # Run as slave
//!   lantern --serve --interface eth0 --master     # Run as master
//!   lantern --set-data 64 < payload.bin           # Store data via the daemon
//!   lantern --request 64                          # Pull data via the daemon

use std::env;
use std::io::Read;
use std::net::IpAddr;
use std::path::PathBuf;

use tracing::info;

use lantern_core::{Config, OpMode, Protocol};

fn print_usage() {
    println!("lantern v0.1.0 - mesh data-announcement daemon");
    println!();
    println!("Usage:");
    println!("  lantern --serve --interface <IF>          Run a node (slave by default)");
    println!("  lantern --set-data <TYPE>                 Store stdin as payload of TYPE");
    println!("  lantern --request <TYPE>                  Pull all payloads of TYPE");
    println!();
    println!("Server options:");
    println!("  --serve, -s                 Run in serve mode");
    println!("  --master, -m                Operate as master (default: slave)");
    println!("  --interface <IF>, -i <IF>   Interface to bind (repeatable)");
    println!("  --ipv4, -4                  Use IPv4 multicast instead of IPv6");
    println!("  --mcast <ADDR>              Override the multicast group");
    println!("  --port <PORT>               UDP port (default: 16962)");
    println!("  --testing                   Short intervals and retention for testing");
    println!();
    println!("Client options:");
    println!("  --data-version <N>          Payload version for --set-data (default: 0)");
    println!("  --hex                       Print pulled payloads hex-encoded");
    println!();
    println!("Common options:");
    println!("  --socket <PATH>, -u <PATH>  Unix socket path (default: /var/run/lantern.sock)");
    println!("  --help, -h                  Show this help");
    println!();
    println!("Environment:");
    println!("  RUST_LOG                    Log level (e.g. info, debug, trace)");
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    let show_help = args.iter().any(|a| a == "--help" || a == "-h");
    let serve_mode = args.iter().any(|a| a == "--serve" || a == "-s");
    let master_mode = args.iter().any(|a| a == "--master" || a == "-m");
    let ipv4_mode = args.iter().any(|a| a == "--ipv4" || a == "-4");
    let testing_mode = args.iter().any(|a| a == "--testing");
    let hex_output = args.iter().any(|a| a == "--hex");

    let interfaces: Vec<String> = args
        .windows(2)
        .filter(|w| w[0] == "--interface" || w[0] == "-i")
        .map(|w| w[1].clone())
        .collect();

    let socket_path: Option<PathBuf> = args
        .windows(2)
        .find(|w| w[0] == "--socket" || w[0] == "-u")
        .map(|w| PathBuf::from(&w[1]));

    let port: Option<u16> = args
        .windows(2)
        .find(|w| w[0] == "--port")
        .and_then(|w| w[1].parse().ok());

    let mcast: Option<IpAddr> = args
        .windows(2)
        .find(|w| w[0] == "--mcast")
        .and_then(|w| w[1].parse().ok());

    let set_data: Option<u8> = args
        .windows(2)
        .find(|w| w[0] == "--set-data")
        .and_then(|w| w[1].parse().ok());

    let request: Option<u8> = args
        .windows(2)
        .find(|w| w[0] == "--request")
        .and_then(|w| w[1].parse().ok());

    let data_version: u8 = args
        .windows(2)
        .find(|w| w[0] == "--data-version")
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(0);

    if show_help {
        print_usage();
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let default_socket = Config::default().socket_path;
    let socket = socket_path.clone().unwrap_or(default_socket);

    // Client modes talk to a running daemon and exit.
    if let Some(data_type) = set_data {
        let mut payload = Vec::new();
        if let Err(e) = std::io::stdin().read_to_end(&mut payload) {
            eprintln!("failed to read payload from stdin: {}", e);
            std::process::exit(1);
        }
        match lantern_core::ipc::set_data(&socket, data_type, data_version, payload).await {
            Ok(()) => return,
            Err(e) => {
                eprintln!("set-data failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Some(data_type) = request {
        match lantern_core::ipc::request_data(&socket, data_type).await {
            Ok(records) => {
                for record in records {
                    if hex_output {
                        println!("{} {}", record.source, hex::encode(&record.payload));
                    } else {
                        println!(
                            "{} {}",
                            record.source,
                            String::from_utf8_lossy(&record.payload)
                        );
                    }
                }
                return;
            }
            Err(e) => {
                eprintln!("request failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    if !serve_mode {
        print_usage();
        return;
    }

    if interfaces.is_empty() {
        eprintln!("--serve needs at least one --interface");
        std::process::exit(1);
    }

    let mut config = if testing_mode {
        Config::for_testing()
    } else {
        Config::default()
    };
    config.interfaces = interfaces;
    config.opmode = if master_mode {
        OpMode::Master
    } else {
        OpMode::Slave
    };
    if ipv4_mode {
        config.ipv4_mode = true;
    }
    if let Some(path) = socket_path {
        config.socket_path = path;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(addr) = mcast {
        config.mcast_addr = Some(addr);
    }

    println!("lantern v0.1.0 ({})", config.opmode);
    println!("interfaces: {}", config.interfaces.join(", "));
    println!("multicast:  {}:{}", config.mcast_group(), config.port);
    println!("socket:     {}", config.socket_path.display());

    let protocol = match Protocol::start(config).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("failed to start: {}", e);
            std::process::exit(1);
        }
    };

    // Surface data changes; deployments hook scripts in here.
    let events_task = protocol.events().await.map(|mut events| {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                info!(?event, "data changed");
            }
        })
    });

    tokio::signal::ctrl_c().await.ok();
    println!();
    info!("received shutdown signal");

    protocol.stop().await;
    if let Some(task) = events_task {
        task.abort();
    }
}
