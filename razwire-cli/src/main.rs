//! razwire-cli - Command-line interface for razwire
//!
//! Sends demo messages to a server and inspects frames offline.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use razwire_client::{Client, ClientConfig};
use razwire_protocol::ByteOrder;
use razwire_transport::TransportKind;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "razwire-cli")]
#[command(about = "Command-line interface for the razwire framed protocol")]
#[command(version)]
struct Cli {
    /// Server host
    #[arg(long, env = "RAZWIRE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, env = "RAZWIRE_PORT", default_value_t = 7401)]
    port: u16,

    /// Transport: tcp or udp
    #[arg(short, long, env = "RAZWIRE_TRANSPORT", default_value = "tcp")]
    transport: TransportKind,

    /// Byte order of head, payload and tail
    #[arg(long, env = "RAZWIRE_BYTE_ORDER", value_enum, default_value_t = OrderArg::Native)]
    byte_order: OrderArg,

    /// Reply timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Prefer IPv6 addresses when the host resolves to both families
    #[arg(long)]
    ipv6: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    Native,
    Network,
}

impl From<OrderArg> for ByteOrder {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::Native => ByteOrder::Native,
            OrderArg::Network => ByteOrder::Network,
        }
    }
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Send a ping; the echo server answers with twice the value
    Ping {
        #[arg(default_value_t = 1, allow_negative_numbers = true)]
        value: i32,
    },

    /// Send a greeting and print the echo
    Greet {
        name: String,

        #[arg(default_value_t = 0)]
        age: i32,
    },

    /// Print the frame a message encodes to, without connecting
    Frame {
        #[command(subcommand)]
        payload: Payload,
    },

    /// Print the packet type id derived from a name
    Hash { name: String },
}

#[derive(Subcommand)]
pub(crate) enum Payload {
    /// A ping message
    Ping {
        #[arg(allow_negative_numbers = true)]
        value: i32,
    },

    /// A greeting message
    Greet { name: String, age: i32 },

    /// A single string under an explicit type id
    Text {
        text: String,

        /// Packet type id (decimal or 0x-prefixed hex)
        #[arg(long = "type", default_value = "0", value_parser = commands::parse_type_id)]
        packet_type: u32,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let order = ByteOrder::from(cli.byte_order);

    // Offline commands need no connection.
    let result = match cli.command {
        Commands::Hash { name } => Ok(commands::hash(&name)),
        Commands::Frame { payload } => commands::frame(payload, order),
        cmd => {
            tracing::debug!("Connecting to {}:{} over {}", cli.host, cli.port, cli.transport);
            let config = ClientConfig::new(cli.host.clone(), cli.port)
                .with_transport(cli.transport)
                .with_byte_order(order)
                .with_prefer_ipv6(cli.ipv6)
                .with_receive_timeout(Duration::from_millis(cli.timeout_ms));

            match Client::connect(config) {
                Ok(mut client) => {
                    let output = commands::execute(&mut client, cmd);
                    client.disconnect();
                    output
                }
                Err(e) => {
                    eprintln!("{}: {}", "Connection failed".red(), e);
                    std::process::exit(1);
                }
            }
        }
    };

    match result {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
