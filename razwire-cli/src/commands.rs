//! Command execution.

use crate::{Commands, Payload};
use colored::Colorize;
use razwire_client::Client;
use razwire_protocol::message::{Greeting, Ping};
use razwire_protocol::{type_id, ByteOrder, Message, Packet, PacketType, HEAD_SIZE, TAIL_SIZE};

type CmdResult = Result<String, Box<dyn std::error::Error>>;

/// Executes a command against a connected server and returns the formatted output.
pub fn execute(client: &mut Client, cmd: Commands) -> CmdResult {
    match cmd {
        Commands::Ping { value } => {
            let reply: Ping = client.request(&mut Ping::new(value))?;
            Ok(format!("{} {} -> {}", "PONG".green(), value, reply.value))
        }

        Commands::Greet { name, age } => {
            let mut greeting = Greeting { name, age };
            let echoed: Greeting = client.request(&mut greeting)?;
            Ok(format!(
                "{} {} (age {})",
                "Echoed".green(),
                echoed.name.cyan(),
                echoed.age
            ))
        }

        Commands::Frame { .. } | Commands::Hash { .. } => {
            Err("command runs offline and needs no connection".into())
        }
    }
}

/// Encodes `payload` and dumps the sealed frame.
pub fn frame(payload: Payload, order: ByteOrder) -> CmdResult {
    let mut packet = Packet::with_order(0, razwire_protocol::MAX_PAYLOAD_SIZE, order);
    match payload {
        Payload::Ping { value } => packet.encode_message(&mut Ping::new(value))?,
        Payload::Greet { name, age } => packet.encode_message(&mut Greeting { name, age })?,
        Payload::Text {
            mut text,
            packet_type,
        } => {
            packet.set_packet_type(packet_type);
            packet.encode(&mut text)?;
        }
    }
    Ok(dump(&mut packet))
}

/// Renders a sealed frame as labelled hex: head, payload, tail.
pub fn dump(packet: &mut Packet) -> String {
    let packet_type = packet.packet_type();
    let frame = packet.seal();
    let payload_end = frame.len() - TAIL_SIZE;

    let mut out = String::new();
    out.push_str(&format!(
        "{} type={:#010x} length={} frame={} bytes\n",
        "frame".bold(),
        packet_type,
        payload_end - HEAD_SIZE,
        frame.len()
    ));
    out.push_str(&format!(
        "  {:<8} {}\n",
        "head",
        hex::encode(&frame[..HEAD_SIZE]).cyan()
    ));
    out.push_str(&format!(
        "  {:<8} {}\n",
        "payload",
        hex::encode(&frame[HEAD_SIZE..payload_end])
    ));
    out.push_str(&format!(
        "  {:<8} {}",
        "tail",
        hex::encode(&frame[payload_end..]).yellow()
    ));
    out
}

/// Formats the packet type id of `name`.
pub fn hash(name: &str) -> String {
    let id = type_id(name);
    let known = [Ping::PACKET_TYPE, Greeting::PACKET_TYPE].contains(&id);
    if known {
        format!("{:#010x} {}", id, "(built-in message)".dimmed())
    } else {
        format!("{:#010x}", id)
    }
}

/// Parses a packet type given in decimal or `0x` hex.
pub fn parse_type_id(s: &str) -> Result<PacketType, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(digits) => u32::from_str_radix(digits, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid packet type '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_id() {
        assert_eq!(parse_type_id("0x1234").unwrap(), 0x1234);
        assert_eq!(parse_type_id("4660").unwrap(), 0x1234);
        assert!(parse_type_id("0xzz").is_err());
        assert!(parse_type_id("-1").is_err());
    }

    #[test]
    fn test_dump_razzie_frame() {
        colored::control::set_override(false);
        let mut packet = Packet::with_order(0x1234, 1024, ByteOrder::Network);
        packet
            .encode(&mut (String::from("razzie"), 99i32))
            .unwrap();

        let out = dump(&mut packet);
        assert!(out.contains("type=0x00001234 length=14 frame=24 bytes"));
        assert!(out.contains("head     00001234000e"));
        assert!(out.contains("payload  0000000672617a7a696500000063"));
        assert!(out.contains("tail     00000000"));
    }

    #[test]
    fn test_hash_marks_builtins() {
        colored::control::set_override(false);
        assert!(hash("razwire.Ping").contains("built-in"));
        assert_eq!(hash("x"), format!("{:#010x}", type_id("x")));
    }

    #[test]
    fn test_frame_text_payload() {
        colored::control::set_override(false);
        let out = frame(
            Payload::Text {
                text: "hi".into(),
                packet_type: 7,
            },
            ByteOrder::Network,
        )
        .unwrap();
        assert!(out.contains("type=0x00000007 length=6"));
    }
}
